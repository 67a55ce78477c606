use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Single-slot delayed task. Scheduling replaces whatever is still waiting;
/// once the delay has elapsed the task runs to completion even if it gets
/// replaced afterwards, so a request already sent is never torn down.
pub struct DebounceTimer {
    delay: Duration,
    pending: Mutex<Option<CancellationToken>>,
}

impl DebounceTimer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Mutex::new(None),
        }
    }

    pub fn schedule<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        if let Some(previous) = self.pending.lock().replace(token.clone()) {
            previous.cancel();
        }
        let delay = self.delay;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => task.await,
            }
        });
    }

    /// Drops the waiting task, if any.
    pub fn cancel(&self) {
        if let Some(token) = self.pending.lock().take() {
            token.cancel();
        }
    }
}

impl Drop for DebounceTimer {
    fn drop(&mut self) {
        if let Some(token) = self.pending.get_mut().take() {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn only_last_scheduled_task_runs() {
        let timer = DebounceTimer::new(Duration::from_millis(300));
        let runs = Arc::new(Mutex::new(Vec::new()));
        for value in ["a", "ab", "abc"] {
            let runs = Arc::clone(&runs);
            timer.schedule(async move {
                runs.lock().push(value);
            });
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(*runs.lock(), vec!["abc"]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_pending_task() {
        let timer = DebounceTimer::new(Duration::from_millis(300));
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        timer.schedule(async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        timer.cancel();
        timer.cancel();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn replacing_after_fire_does_not_abort_running_task() {
        let timer = DebounceTimer::new(Duration::from_millis(10));
        let finished = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&finished);
        timer.schedule(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            counter.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        timer.schedule(async {});
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }
}
