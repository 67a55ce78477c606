use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use regex::Regex;
use scriptsync_core::{Item, Query, RemoteError, RestClient};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::object_type::SCRIPT_LANGUAGE;
use crate::registry::RegistryError;
use crate::session::{SessionError, SessionState};

use super::paths::{MirrorPath, PathError, decode, decode_folder, encode};

/// Script base name that holds global declarations rather than a function.
pub const DECLARATIONS: &str = "(declarations)";

/// Editor-side collaborator: buffers, windows and diff views.
pub trait EditorHost: Send + Sync {
    /// Writes any unsaved buffer of `path` to disk.
    fn flush(&self, path: &Path) -> io::Result<()>;
    fn open(&self, path: &Path) -> io::Result<()>;
    fn open_diff(&self, remote: &Path, local: &Path, title: &str) -> io::Result<()>;
}

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("path error: {0}")]
    Path(#[from] PathError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("editor error: {0}")]
    Editor(#[source] io::Error),
    #[error("{path} is not a mirror file of its type; expected a .{expected} file")]
    UnexpectedExtension { path: PathBuf, expected: String },
    #[error("function name does not match file name: {}", names.join(", "))]
    NameValidation { names: Vec<String> },
    #[error("pushed {pushed} of {total}, failed at {failed}: {source}")]
    PartialPush {
        pushed: usize,
        total: usize,
        failed: String,
        #[source]
        source: Box<ActionError>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullOutcome {
    Updated,
    /// Remote field empty or object gone; the local file was left alone.
    Absent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompareOutcome {
    /// Remote copy staged and handed to the diff view.
    Staged { path: PathBuf },
    /// Target workspace is the active one; reports whether the remote object
    /// exists there so the caller can refresh its marker.
    SameWorkspace { exists: bool },
    /// Nothing to compare against in the target workspace.
    Absent { workspace: String },
}

/// File-level operations between the local mirror and the remote repository.
pub struct SyncActions {
    session: Arc<SessionState>,
    host: Arc<dyn EditorHost>,
    mirror_root: PathBuf,
    compare_root: PathBuf,
    script_ext: String,
}

impl SyncActions {
    pub fn new(session: Arc<SessionState>, host: Arc<dyn EditorHost>, config: &AppConfig) -> Self {
        Self {
            session,
            host,
            mirror_root: config.mirror_root.clone(),
            compare_root: config.compare_root.clone(),
            script_ext: config.script_ext.clone(),
        }
    }

    pub fn mirror_root(&self) -> &Path {
        &self.mirror_root
    }

    /// Overwrites the local file with the remote content. Leaves the file
    /// untouched when the remote has nothing for it.
    pub async fn pull(&self, path: &Path) -> Result<PullOutcome, ActionError> {
        let mirror = self.decode_file(path)?;
        let client = self.client_for(&mirror.connection)?;
        match fetch_content(&client, &mirror).await? {
            Some(content) => {
                write_text(path, &content).await?;
                info!(path = %path.display(), "pulled");
                Ok(PullOutcome::Updated)
            }
            None => {
                warn!(path = %path.display(), "remote has no content, local file kept");
                Ok(PullOutcome::Absent)
            }
        }
    }

    pub async fn push(&self, path: &Path) -> Result<(), ActionError> {
        let mirror = self.decode_file(path)?;
        self.host.flush(path).map_err(ActionError::Editor)?;
        let text = read_text(path).await?;
        if mirror.object_type.is_script_bearing() && !validate_function_name(&mirror.leaf, &text) {
            return Err(ActionError::NameValidation {
                names: vec![mirror.leaf],
            });
        }
        let client = self.client_for(&mirror.connection)?;
        send(&client, &mirror, text).await?;
        info!(path = %path.display(), "pushed");
        Ok(())
    }

    /// Pushes every script in an object folder. Files without the script
    /// extension are skipped. All names are validated before the first write;
    /// writes run in file-name order and stop at the first failure. Returns
    /// the number of scripts pushed.
    pub async fn push_all(&self, folder: &Path) -> Result<usize, ActionError> {
        let object = decode_folder(&self.mirror_root, folder)?;
        let mut batch = Vec::new();
        for path in list_files(folder).await? {
            let mirror = match decode(&self.mirror_root, &path) {
                Ok(mirror) => mirror,
                Err(err) => {
                    debug!(path = %path.display(), "skipping file outside the mirror layout: {err}");
                    continue;
                }
            };
            if mirror.ext != self.script_ext {
                debug!(path = %path.display(), "skipping file without the script extension");
                continue;
            }
            self.host.flush(&path).map_err(ActionError::Editor)?;
            let text = read_text(&path).await?;
            batch.push((mirror, text));
        }

        let invalid: Vec<String> = batch
            .iter()
            .filter(|(mirror, text)| !validate_function_name(&mirror.leaf, text))
            .map(|(mirror, _)| mirror.leaf.clone())
            .collect();
        if !invalid.is_empty() {
            return Err(ActionError::NameValidation { names: invalid });
        }

        let client = self.client_for(&object.connection)?;
        let total = batch.len();
        for (pushed, (mirror, text)) in batch.into_iter().enumerate() {
            if let Err(err) = send(&client, &mirror, text).await {
                warn!(parent = %object.parent, failed = %mirror.leaf, pushed, total, "push stopped");
                return Err(ActionError::PartialPush {
                    pushed,
                    total,
                    failed: mirror.leaf,
                    source: Box::new(err),
                });
            }
        }
        info!(parent = %object.parent, total, "pushed all scripts");
        Ok(total)
    }

    /// Workspaces the file can be compared against: every workspace of its
    /// connection except the active one.
    pub async fn compare_candidates(&self, path: &Path) -> Result<Vec<String>, ActionError> {
        let mirror = decode(&self.mirror_root, path)?;
        let registry = self.session.registry();
        let connection = registry.resolve(&mirror.connection)?;
        let active = self.session.active_workspace();
        Ok(registry
            .workspaces_for(&connection)
            .await?
            .into_iter()
            .filter(|ws| Some(ws) != active.as_ref())
            .collect())
    }

    /// Stages the remote copy from `workspace` under the compare root and
    /// opens a diff against the local file, which is never modified. When
    /// `workspace` is the active one no diff is opened.
    pub async fn compare(&self, path: &Path, workspace: &str) -> Result<CompareOutcome, ActionError> {
        let mirror = self.decode_file(path)?;
        let target = mirror.in_workspace(workspace);
        let client = self.client_for(&mirror.connection)?;
        let content = fetch_content(&client, &target).await?;

        if self.session.active_workspace().as_deref() == Some(workspace) {
            return Ok(CompareOutcome::SameWorkspace {
                exists: content.is_some(),
            });
        }
        let Some(content) = content else {
            info!(path = %path.display(), workspace, "nothing to compare against");
            return Ok(CompareOutcome::Absent {
                workspace: workspace.to_string(),
            });
        };

        let staged = encode(&self.compare_root, &target)?;
        write_text(&staged, &content).await?;
        let title = format!("{} ({workspace}) vs local", mirror.file_name());
        self.host
            .open_diff(&staged, path, &title)
            .map_err(ActionError::Editor)?;
        info!(path = %path.display(), workspace, "comparison staged");
        Ok(CompareOutcome::Staged { path: staged })
    }

    fn decode_file(&self, path: &Path) -> Result<MirrorPath, ActionError> {
        let mirror = decode(&self.mirror_root, path)?;
        let expected = mirror.object_type.mirror_extension(&self.script_ext);
        if mirror.ext != expected {
            return Err(ActionError::UnexpectedExtension {
                path: path.to_path_buf(),
                expected: expected.to_string(),
            });
        }
        Ok(mirror)
    }

    fn client_for(&self, connection: &str) -> Result<Arc<RestClient>, ActionError> {
        let registry = self.session.registry();
        let connection = registry.resolve(connection)?;
        Ok(registry.client(&connection)?)
    }
}

/// True when `text` declares `function <name>(`; always true for the
/// declarations block.
pub fn validate_function_name(name: &str, text: &str) -> bool {
    if name == DECLARATIONS {
        return true;
    }
    let pattern = format!(r"\bfunction\s+{}\s*\(", regex::escape(name));
    match Regex::new(&pattern) {
        Ok(declaration) => declaration.is_match(text),
        Err(err) => {
            warn!(name, "cannot build name check: {err}");
            false
        }
    }
}

async fn fetch_content(
    client: &RestClient,
    mirror: &MirrorPath,
) -> Result<Option<String>, ActionError> {
    let segments = mirror
        .resource_segments()
        .ok_or(PathError::MissingParent(mirror.object_type))?;
    let field = mirror.object_type.content_field();
    let query = Query::fields(&["Name", field.as_str()]);
    let items = client.read(&segments, &query).await?;
    Ok(items
        .first()
        .and_then(|item| item.content(field))
        .map(str::to_string))
}

async fn send(client: &RestClient, mirror: &MirrorPath, text: String) -> Result<(), ActionError> {
    let segments = mirror
        .resource_segments()
        .ok_or(PathError::MissingParent(mirror.object_type))?;
    let mut item = Item::named(&mirror.leaf).with_content(mirror.object_type.content_field(), text);
    if mirror.object_type.is_script_bearing() {
        item = item.with_program_language(SCRIPT_LANGUAGE);
    }
    client.write(&segments, &item).await?;
    Ok(())
}

async fn list_files(folder: &Path) -> Result<Vec<PathBuf>, ActionError> {
    let io_error = |source: io::Error| ActionError::Io {
        path: folder.to_path_buf(),
        source,
    };
    let mut entries = tokio::fs::read_dir(folder).await.map_err(io_error)?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
        if entry.file_type().await.map_err(io_error)?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

async fn read_text(path: &Path) -> Result<String, ActionError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ActionError::Io {
            path: path.to_path_buf(),
            source,
        })
}

async fn write_text(path: &Path, content: &str) -> Result<(), ActionError> {
    let io_error = |source: io::Error| ActionError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await.map_err(io_error)?;
    }
    tokio::fs::write(path, content).await.map_err(io_error)
}

#[cfg(test)]
#[path = "actions_tests.rs"]
mod tests;
