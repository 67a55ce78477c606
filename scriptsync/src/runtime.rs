use std::error::Error;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use scriptsync_core::{ApiErrorClass, RemoteError};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::explorer::{Explorer, ExplorerError};
use crate::object_type::ObjectType;
use crate::registry::{ConnectionRegistry, SettingsFile};
use crate::session::SelectionSnapshot;
use crate::sync::actions::{CompareOutcome, EditorHost, PullOutcome};
use crate::sync::engine::{FetchOutcome, TreeEvent};
use crate::sync::settings_watcher::start_settings_watcher;
use crate::sync::tree::{LeafRef, render_lines};

/// Editor stand-in for a terminal: nothing to flush, files and diffs are
/// announced on stdout for the user to open.
pub struct TerminalHost;

impl EditorHost for TerminalHost {
    fn flush(&self, _path: &Path) -> io::Result<()> {
        Ok(())
    }

    fn open(&self, path: &Path) -> io::Result<()> {
        println!("open: {}", path.display());
        Ok(())
    }

    fn open_diff(&self, remote: &Path, local: &Path, title: &str) -> io::Result<()> {
        println!("diff [{title}]: {} {}", remote.display(), local.display());
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InteractiveCommand {
    Status,
    Tree,
    Help,
    Quit,
    Connection(String),
    Workspace(String),
    ObjectType(ObjectType),
    Search(String),
    Expand(String),
    Open(LeafRef),
    Pull(PathBuf),
    Push(PathBuf),
    PushAll(PathBuf),
    Compare {
        path: PathBuf,
        workspace: Option<String>,
    },
}

const HELP: &str = "\
commands:
  status                     show connection, workspace and object type
  connection <name>          switch connection
  workspace <name>           switch workspace
  type <folder>              switch object type (service, buscomp, applet, application, webtemplate)
  search <prefix>            search the active tree; empty prefix cancels
  expand <object>            list the scripts of an object
  open <object>/<script>     fetch a script (or `open <template>`)
  tree                       print the active tree
  pull <file>                overwrite a mirror file with the remote copy
  push <file>                upload a mirror file
  push-all <folder>          upload every script of an object folder
  compare <file> [workspace] compare with another workspace, or list candidates
  quit";

/// Parses one line of interactive input. Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<InteractiveCommand>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    let required = |what: &str| {
        if rest.is_empty() {
            Err(format!("{word}: missing {what}"))
        } else {
            Ok(rest.to_string())
        }
    };
    let command = match word {
        "status" => InteractiveCommand::Status,
        "tree" => InteractiveCommand::Tree,
        "help" | "?" => InteractiveCommand::Help,
        "quit" | "exit" => InteractiveCommand::Quit,
        "connection" => InteractiveCommand::Connection(required("connection name")?),
        "workspace" => InteractiveCommand::Workspace(required("workspace name")?),
        "type" => InteractiveCommand::ObjectType(required("object type")?.parse()?),
        "search" => InteractiveCommand::Search(rest.to_string()),
        "expand" => InteractiveCommand::Expand(required("object name")?),
        "open" => {
            let target = required("leaf name")?;
            InteractiveCommand::Open(match target.split_once('/') {
                Some((parent, name)) => LeafRef::script(parent, name),
                None => LeafRef::template(target),
            })
        }
        "pull" => InteractiveCommand::Pull(required("file")?.into()),
        "push" => InteractiveCommand::Push(required("file")?.into()),
        "push-all" => InteractiveCommand::PushAll(required("folder")?.into()),
        "compare" => {
            let target = required("file")?;
            match target.rsplit_once(char::is_whitespace) {
                Some((path, workspace)) if Path::new(path.trim()).exists() => {
                    InteractiveCommand::Compare {
                        path: path.trim().into(),
                        workspace: Some(workspace.to_string()),
                    }
                }
                _ => InteractiveCommand::Compare {
                    path: target.into(),
                    workspace: None,
                },
            }
        }
        other => return Err(format!("unknown command: {other} (try `help`)")),
    };
    Ok(Some(command))
}

pub struct AppRuntime {
    config: AppConfig,
    explorer: Arc<Explorer>,
}

impl AppRuntime {
    pub async fn bootstrap(config: AppConfig, host: Arc<dyn EditorHost>) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&config.mirror_root)
            .await
            .with_context(|| format!("failed to create mirror root at {:?}", config.mirror_root))?;
        tokio::fs::create_dir_all(&config.compare_root)
            .await
            .with_context(|| format!("failed to create compare root at {:?}", config.compare_root))?;

        let registry = ConnectionRegistry::new(SettingsFile::new(&config.settings_path));
        let explorer = Arc::new(Explorer::new(Arc::new(registry), &config, host));
        Ok(Self { config, explorer })
    }

    pub fn explorer(&self) -> &Arc<Explorer> {
        &self.explorer
    }

    /// Line-driven session on stdin. Settings edits made elsewhere and tree
    /// updates from debounced searches are reported as they happen.
    pub async fn run_interactive(&self) -> anyhow::Result<()> {
        let snapshot = self
            .explorer
            .activate()
            .await
            .context("failed to activate session")?;
        info!(
            settings = %self.config.settings_path.display(),
            mirror = %self.config.mirror_root.display(),
            "interactive session started"
        );
        print_snapshot(&snapshot);

        let (_watcher, mut settings_rx) = if self.config.watch_settings {
            match start_settings_watcher(&self.config.settings_path) {
                Ok((watcher, rx)) => (Some(watcher), Some(rx)),
                Err(err) => {
                    warn!("failed to start settings watcher: {err}");
                    (None, None)
                }
            }
        } else {
            (None, None)
        };

        let (tree_tx, mut tree_rx) = mpsc::unbounded_channel();
        let forwarders = self.forward_tree_events(tree_tx);
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line.context("failed to read stdin")? else {
                        break;
                    };
                    match parse_line(&line) {
                        Ok(Some(InteractiveCommand::Quit)) => break,
                        Ok(Some(command)) => {
                            if let Err(err) = self.execute(command).await {
                                report_error(&err);
                            }
                        }
                        Ok(None) => {}
                        Err(message) => eprintln!("{message}"),
                    }
                }
                Some(()) = next_settings_change(&mut settings_rx) => {
                    match self.explorer.settings_changed().await {
                        Ok(snapshot) => print_snapshot(&snapshot),
                        Err(err) => {
                            eprintln!("settings reload failed");
                            report_error(&err);
                        }
                    }
                }
                Some(event) = tree_rx.recv() => self.report_tree_event(event),
            }
        }

        for forwarder in forwarders {
            forwarder.abort();
        }
        info!("interactive session finished");
        Ok(())
    }

    pub async fn execute(&self, command: InteractiveCommand) -> Result<(), ExplorerError> {
        let explorer = &self.explorer;
        match command {
            InteractiveCommand::Status => print_snapshot(&explorer.session().snapshot()?),
            InteractiveCommand::Tree => self.print_active_tree(),
            InteractiveCommand::Help => println!("{HELP}"),
            InteractiveCommand::Quit => {}
            InteractiveCommand::Connection(name) => {
                print_snapshot(&explorer.select_connection(&name).await?);
            }
            InteractiveCommand::Workspace(name) => {
                print_snapshot(&explorer.select_workspace(&name)?);
            }
            InteractiveCommand::ObjectType(object_type) => {
                explorer.select_object_type(object_type);
                self.print_active_tree();
            }
            InteractiveCommand::Search(query) => explorer.search(&query),
            InteractiveCommand::Expand(object) => {
                if explorer.expand(&object).await? == FetchOutcome::Stale {
                    println!("selection changed while loading {object}");
                }
            }
            InteractiveCommand::Open(leaf) => {
                explorer.select_leaf(&leaf).await?;
            }
            InteractiveCommand::Pull(path) => match explorer.pull(&path).await? {
                PullOutcome::Updated => println!("pulled {}", path.display()),
                PullOutcome::Absent => println!("remote has no content for {}", path.display()),
            },
            InteractiveCommand::Push(path) => {
                explorer.push(&path).await?;
                println!("pushed {}", path.display());
            }
            InteractiveCommand::PushAll(folder) => {
                let count = explorer.push_all(&folder).await?;
                println!("pushed {count} script(s) from {}", folder.display());
            }
            InteractiveCommand::Compare {
                path,
                workspace: None,
            } => {
                let candidates = explorer.compare_candidates(&path).await?;
                if candidates.is_empty() {
                    println!("no other workspace to compare with");
                }
                for candidate in candidates {
                    println!("  {candidate}");
                }
            }
            InteractiveCommand::Compare {
                path,
                workspace: Some(workspace),
            } => print_compare(&explorer.compare(&path, &workspace).await?),
        }
        Ok(())
    }

    fn forward_tree_events(&self, tx: mpsc::UnboundedSender<TreeEvent>) -> Vec<JoinHandle<()>> {
        ObjectType::ALL
            .into_iter()
            .map(|object_type| {
                let mut rx = self.explorer.engine(object_type).subscribe();
                let tx = tx.clone();
                tokio::spawn(async move {
                    loop {
                        match rx.recv().await {
                            Ok(event) => {
                                if tx.send(event).is_err() {
                                    break;
                                }
                            }
                            Err(broadcast::error::RecvError::Lagged(_)) => continue,
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                })
            })
            .collect()
    }

    fn report_tree_event(&self, event: TreeEvent) {
        match event {
            TreeEvent::Changed(object_type) => {
                if object_type == self.explorer.session().object_type() {
                    self.print_active_tree();
                }
            }
            TreeEvent::SearchFailed {
                object_type,
                query,
                message,
            } => eprintln!("search {query:?} in {object_type} failed: {message}"),
        }
    }

    fn print_active_tree(&self) {
        let engine = self.explorer.active_engine();
        match engine.query() {
            Some(query) => println!("[{}] {query}*", engine.object_type()),
            None => println!("[{}]", engine.object_type()),
        }
        for line in render_lines(&engine.snapshot()) {
            println!("{line}");
        }
    }
}

async fn next_settings_change(rx: &mut Option<mpsc::UnboundedReceiver<()>>) -> Option<()> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Prints an error and, when a remote failure sits in its source chain, what
/// the user can do about it.
pub fn report_error(err: &(dyn Error + 'static)) {
    eprintln!("error: {err}");
    if let Some(hint) = remote_hint(err) {
        eprintln!("hint: {hint}");
    }
}

pub fn remote_hint(err: &(dyn Error + 'static)) -> Option<&'static str> {
    let remote = std::iter::successors(Some(err), |&err| err.source())
        .find_map(|err| err.downcast_ref::<RemoteError>())?;
    if remote.is_retryable() {
        Some("the server did not complete the request; try again")
    } else if remote.kind() == ApiErrorClass::Auth {
        Some("check the user name and password of the connection")
    } else {
        None
    }
}

pub fn print_snapshot(snapshot: &SelectionSnapshot) {
    println!(
        "connection: {}  workspace: {}  type: {}",
        snapshot.active_connection.as_deref().unwrap_or("-"),
        snapshot.active_workspace.as_deref().unwrap_or("-"),
        snapshot.object_type
    );
    if snapshot.active_connection.is_some() && snapshot.active_workspace.is_none() {
        println!("no workspace available; search is disabled");
    }
}

pub fn print_compare(outcome: &CompareOutcome) {
    match outcome {
        CompareOutcome::Staged { path } => println!("remote copy staged at {}", path.display()),
        CompareOutcome::SameWorkspace { exists } => {
            println!("same workspace; remote object exists: {exists}")
        }
        CompareOutcome::Absent { workspace } => println!("nothing to compare in {workspace}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::actions::ActionError;
    use scriptsync_core::StatusCode;

    #[test]
    fn parses_selection_commands() {
        assert_eq!(
            parse_line("connection dev server").unwrap(),
            Some(InteractiveCommand::Connection("dev server".into()))
        );
        assert_eq!(
            parse_line("  type buscomp ").unwrap(),
            Some(InteractiveCommand::ObjectType(ObjectType::BusinessComponent))
        );
        assert!(parse_line("type workflow").is_err());
        assert!(parse_line("workspace").is_err());
        assert_eq!(parse_line("   ").unwrap(), None);
    }

    #[test]
    fn empty_search_is_allowed() {
        assert_eq!(
            parse_line("search").unwrap(),
            Some(InteractiveCommand::Search(String::new()))
        );
        assert_eq!(
            parse_line("search Account Ut").unwrap(),
            Some(InteractiveCommand::Search("Account Ut".into()))
        );
    }

    #[test]
    fn open_distinguishes_scripts_and_templates() {
        assert_eq!(
            parse_line("open Account Utils/(declarations)").unwrap(),
            Some(InteractiveCommand::Open(LeafRef::script(
                "Account Utils",
                "(declarations)"
            )))
        );
        assert_eq!(
            parse_line("open CCPageContainer").unwrap(),
            Some(InteractiveCommand::Open(LeafRef::template("CCPageContainer")))
        );
    }

    #[test]
    fn compare_takes_optional_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("Calc.js");
        std::fs::write(&file, "").unwrap();

        assert_eq!(
            parse_line(&format!("compare {} MAIN", file.display())).unwrap(),
            Some(InteractiveCommand::Compare {
                path: file.clone(),
                workspace: Some("MAIN".into()),
            })
        );
        assert_eq!(
            parse_line(&format!("compare {}", file.display())).unwrap(),
            Some(InteractiveCommand::Compare {
                path: file,
                workspace: None,
            })
        );
    }

    #[test]
    fn remote_failures_carry_a_hint() {
        let api = |status| RemoteError::Api {
            status,
            body: String::new(),
        };
        let unavailable =
            ExplorerError::Action(ActionError::Remote(api(StatusCode::SERVICE_UNAVAILABLE)));
        assert_eq!(
            remote_hint(&unavailable),
            Some("the server did not complete the request; try again")
        );

        let rejected = ExplorerError::Action(ActionError::PartialPush {
            pushed: 1,
            total: 2,
            failed: "B".into(),
            source: Box::new(ActionError::Remote(api(StatusCode::UNAUTHORIZED))),
        });
        assert_eq!(
            remote_hint(&rejected),
            Some("check the user name and password of the connection")
        );

        let missing = ExplorerError::Action(ActionError::Remote(api(StatusCode::BAD_REQUEST)));
        assert_eq!(remote_hint(&missing), None);
        let local = ExplorerError::Action(ActionError::NameValidation {
            names: vec!["B".into()],
        });
        assert_eq!(remote_hint(&local), None);
    }

    #[test]
    fn unknown_command_is_rejected() {
        assert!(parse_line("deploy now").is_err());
    }
}
