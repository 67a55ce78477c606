use std::path::Path;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::debug;

/// Watches the directory holding the settings file and reports each change
/// to that file. Editors that save by renaming a temporary file over the
/// original are covered because the directory, not the inode, is watched.
pub fn start_settings_watcher(
    settings: &Path,
) -> notify::Result<(RecommendedWatcher, mpsc::UnboundedReceiver<()>)> {
    let dir = match settings.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => Path::new(".").to_path_buf(),
    };
    std::fs::create_dir_all(&dir).map_err(notify::Error::io)?;

    let (tx, rx) = mpsc::unbounded_channel();
    let target = settings.to_path_buf();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        if let Ok(event) = res
            && touches_settings(&target, &event)
        {
            debug!(kind = ?event.kind, "settings file changed");
            let _ = tx.send(());
        }
    })?;
    watcher.watch(&dir, RecursiveMode::NonRecursive)?;
    Ok((watcher, rx))
}

fn touches_settings(settings: &Path, event: &Event) -> bool {
    let relevant = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    );
    relevant
        && event
            .paths
            .iter()
            .any(|path| path.file_name().is_some() && path.file_name() == settings.file_name())
}
