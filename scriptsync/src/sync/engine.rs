use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use scriptsync_core::searchspec::name_prefix;
use scriptsync_core::{ContentField, Query, RemoteError};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::{AppConfig, FetchPolicy};
use crate::object_type::ObjectType;
use crate::session::{Scope, SessionError, SessionState};

use super::debounce::DebounceTimer;
use super::paths::{MirrorPath, PathError, encode, object_folder};
use super::tree::{LeafRef, ObjectNode, TemplateNode, TreeNode};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum TreeError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),
    #[error("path error: {0}")]
    Path(#[from] PathError),
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{0} objects have no script collection")]
    NotExpandable(ObjectType),
    #[error("object {0} is not in the current tree")]
    UnknownObject(String),
    #[error("{0} has no content in the remote repository")]
    Absent(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Empty,
    Searching,
    Populated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeEvent {
    Changed(ObjectType),
    SearchFailed {
        object_type: ObjectType,
        query: String,
        message: String,
    },
}

/// Result of a remote fetch whose response may arrive after the session or
/// the query moved on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Response applied; carries the number of entries received.
    Applied(usize),
    /// Response belonged to an older scope or query and was dropped.
    Stale,
    /// Nothing was requested.
    Skipped,
}

struct TreeState {
    phase: Phase,
    nodes: Vec<TreeNode>,
    query: Option<String>,
    /// Latest search ticket; responses carrying an older one are dropped.
    search_seq: u64,
}

/// In-memory tree for one object type, mirroring what a name search found
/// remotely and what of it exists in the local mirror.
pub struct TreeSyncEngine {
    object_type: ObjectType,
    session: Arc<SessionState>,
    mirror_root: PathBuf,
    page_size: u32,
    fetch_policy: FetchPolicy,
    script_ext: String,
    timer: DebounceTimer,
    state: Mutex<TreeState>,
    events: broadcast::Sender<TreeEvent>,
}

impl TreeSyncEngine {
    pub fn new(object_type: ObjectType, session: Arc<SessionState>, config: &AppConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            object_type,
            session,
            mirror_root: config.mirror_root.clone(),
            page_size: config.page_size,
            fetch_policy: config.fetch_policy,
            script_ext: config.script_ext.clone(),
            timer: DebounceTimer::new(config.search_debounce),
            state: Mutex::new(TreeState {
                phase: Phase::Empty,
                nodes: Vec::new(),
                query: None,
                search_seq: 0,
            }),
            events,
        }
    }

    pub fn object_type(&self) -> ObjectType {
        self.object_type
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TreeEvent> {
        self.events.subscribe()
    }

    pub fn phase(&self) -> Phase {
        self.state.lock().phase
    }

    pub fn query(&self) -> Option<String> {
        self.state.lock().query.clone()
    }

    pub fn snapshot(&self) -> Vec<TreeNode> {
        self.state.lock().nodes.clone()
    }

    /// Debounced search. Each call replaces the pending one; only the last
    /// query inside the debounce window reaches the remote. A blank query
    /// cancels the pending search and sends nothing.
    pub fn search(self: &Arc<Self>, query: &str) {
        let query = query.trim().to_string();
        if query.is_empty() {
            self.timer.cancel();
            return;
        }
        let seq = self.next_search_seq();
        let engine = Arc::clone(self);
        self.timer.schedule(async move {
            if let Err(err) = engine.run_search(seq, &query).await {
                warn!(object_type = %engine.object_type, query = %query, "search failed: {err}");
                let _ = engine.events.send(TreeEvent::SearchFailed {
                    object_type: engine.object_type,
                    query,
                    message: err.to_string(),
                });
            }
        });
    }

    /// Runs a search immediately, bypassing the debounce timer.
    pub async fn search_now(&self, query: &str) -> Result<FetchOutcome, TreeError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(FetchOutcome::Skipped);
        }
        let seq = self.next_search_seq();
        self.run_search(seq, query).await
    }

    /// Fetches the script names (and, under the full policy, contents) of one
    /// object and merges them into its node.
    pub async fn expand(&self, object: &str) -> Result<FetchOutcome, TreeError> {
        if !self.object_type.is_script_bearing() {
            return Err(TreeError::NotExpandable(self.object_type));
        }
        if !self.has_object(object) {
            return Err(TreeError::UnknownObject(object.to_string()));
        }
        let scope = self.session.scope()?;
        let segments = self
            .object_type
            .children_segments(&scope.workspace, object)
            .ok_or(TreeError::NotExpandable(self.object_type))?;
        let fields: &[&str] = match self.fetch_policy {
            FetchPolicy::NamesOnly => &["Name"],
            FetchPolicy::Full => &["Name", "Script"],
        };
        let query = Query::fields(fields).with_page_size(self.page_size);
        let client = self.session.registry().client(&scope.connection)?;
        let items = client.read(&segments, &query).await?;
        if !self.session.is_current(scope.generation) {
            debug!(object, "dropping expand response for an outdated scope");
            return Ok(FetchOutcome::Stale);
        }

        let mut children = Vec::with_capacity(items.len());
        for item in items.iter().filter(|item| !item.name.is_empty()) {
            let leaf = LeafRef::script(object, &item.name);
            let path = self.leaf_path(&scope, &leaf)?;
            let on_disk = match (self.fetch_policy, item.content(ContentField::Script)) {
                (FetchPolicy::Full, Some(text)) => {
                    write_mirror_file(&path, text).await?;
                    true
                }
                _ => exists(&path).await,
            };
            children.push((item.name.clone(), on_disk));
        }

        let count = children.len();
        {
            let mut state = self.state.lock();
            if !self.session.is_current(scope.generation) {
                return Ok(FetchOutcome::Stale);
            }
            let Some(node) = find_object(&mut state.nodes, object) else {
                debug!(object, "object left the tree before its scripts arrived");
                return Ok(FetchOutcome::Stale);
            };
            node.children.extend(children);
            node.expanded = true;
        }
        info!(object_type = %self.object_type, object, count, "object expanded");
        self.notify_changed();
        Ok(FetchOutcome::Applied(count))
    }

    /// Fetches one script or template, writes it to the mirror and returns the
    /// path to open. Overwrites any existing file.
    pub async fn select_leaf(&self, leaf: &LeafRef) -> Result<PathBuf, TreeError> {
        let scope = self.session.scope()?;
        let path = self.leaf_path(&scope, leaf)?;
        let segments = self
            .object_type
            .leaf_segments(&scope.workspace, leaf.parent.as_deref(), &leaf.name)
            .ok_or_else(|| self.shape_error(leaf))?;
        let field = self.object_type.content_field();
        let query = Query::fields(&["Name", field.as_str()]);
        let client = self.session.registry().client(&scope.connection)?;
        let items = client.read(&segments, &query).await?;
        let content = items
            .first()
            .and_then(|item| item.content(field))
            .ok_or_else(|| TreeError::Absent(leaf.name.clone()))?;

        write_mirror_file(&path, content).await?;
        if self.session.is_current(scope.generation) {
            self.mark_on_disk(leaf, true);
        }
        info!(object_type = %self.object_type, leaf = %leaf.name, path = %path.display(), "leaf fetched");
        Ok(path)
    }

    /// Drops the tree; pending searches are cancelled and in-flight ones will
    /// be discarded when they return.
    pub fn clear(&self) {
        self.timer.cancel();
        {
            let mut state = self.state.lock();
            state.search_seq += 1;
            state.nodes.clear();
            state.query = None;
            state.phase = Phase::Empty;
        }
        self.notify_changed();
    }

    /// Updates the on-disk flag of a leaf already present in the tree.
    /// Returns whether a node was updated.
    pub fn mark_on_disk(&self, leaf: &LeafRef, on_disk: bool) -> bool {
        let updated = {
            let mut state = self.state.lock();
            match leaf.parent.as_deref() {
                Some(parent) => match find_object(&mut state.nodes, parent) {
                    Some(node) => {
                        node.children.insert(leaf.name.clone(), on_disk);
                        true
                    }
                    None => false,
                },
                None => state.nodes.iter_mut().any(|node| match node {
                    TreeNode::Template(template) if template.name == leaf.name => {
                        template.on_disk = on_disk;
                        true
                    }
                    _ => false,
                }),
            }
        };
        if updated {
            self.notify_changed();
        }
        updated
    }

    /// Mirror path of a leaf within the given scope.
    pub fn leaf_path(&self, scope: &Scope, leaf: &LeafRef) -> Result<PathBuf, TreeError> {
        let ext = self.object_type.mirror_extension(&self.script_ext).to_string();
        Ok(encode(
            &self.mirror_root,
            &MirrorPath {
                connection: scope.connection.name.clone(),
                workspace: scope.workspace.clone(),
                object_type: self.object_type,
                parent: leaf.parent.clone(),
                leaf: leaf.name.clone(),
                ext,
            },
        )?)
    }

    async fn run_search(&self, seq: u64, query: &str) -> Result<FetchOutcome, TreeError> {
        let scope = self.session.scope()?;
        self.state.lock().phase = Phase::Searching;

        let segments = self.object_type.collection_segments(&scope.workspace);
        let request = Query::fields(&["Name"])
            .with_search_spec(name_prefix(query))
            .with_page_size(self.page_size);
        let result = match self.session.registry().client(&scope.connection) {
            Ok(client) => client.read(&segments, &request).await,
            Err(err) => Err(err),
        };
        let items = match result {
            Ok(items) => items,
            Err(err) => {
                self.settle_phase(seq);
                return Err(err.into());
            }
        };
        if !self.is_latest(seq, scope.generation) {
            debug!(query, "dropping search response for an outdated query or scope");
            return Ok(FetchOutcome::Stale);
        }

        let mut nodes: Vec<TreeNode> = Vec::with_capacity(items.len());
        for item in items {
            if item.name.is_empty() || nodes.iter().any(|node| node.name() == item.name) {
                continue;
            }
            let node = if self.object_type.is_script_bearing() {
                let on_disk = match object_folder(
                    &self.mirror_root,
                    &scope.connection.name,
                    &scope.workspace,
                    self.object_type,
                    Some(&item.name),
                ) {
                    Ok(folder) => exists(&folder).await,
                    Err(_) => false,
                };
                TreeNode::Object(ObjectNode::new(item.name, on_disk))
            } else {
                let on_disk = match self.leaf_path(&scope, &LeafRef::template(&item.name)) {
                    Ok(path) => exists(&path).await,
                    Err(_) => false,
                };
                TreeNode::Template(TemplateNode {
                    name: item.name,
                    on_disk,
                })
            };
            nodes.push(node);
        }

        let count = nodes.len();
        {
            let mut state = self.state.lock();
            if state.search_seq != seq || !self.session.is_current(scope.generation) {
                return Ok(FetchOutcome::Stale);
            }
            state.nodes = nodes;
            state.query = Some(query.to_string());
            state.phase = Phase::Populated;
        }
        info!(object_type = %self.object_type, query, count, "search applied");
        self.notify_changed();
        Ok(FetchOutcome::Applied(count))
    }

    fn next_search_seq(&self) -> u64 {
        let mut state = self.state.lock();
        state.search_seq += 1;
        state.search_seq
    }

    fn is_latest(&self, seq: u64, generation: u64) -> bool {
        self.state.lock().search_seq == seq && self.session.is_current(generation)
    }

    /// Leaves `Searching` after a failed search that is still the latest one.
    fn settle_phase(&self, seq: u64) {
        let mut state = self.state.lock();
        if state.search_seq == seq {
            state.phase = if state.nodes.is_empty() {
                Phase::Empty
            } else {
                Phase::Populated
            };
        }
    }

    fn has_object(&self, name: &str) -> bool {
        self.state
            .lock()
            .nodes
            .iter()
            .any(|node| matches!(node, TreeNode::Object(object) if object.name == name))
    }

    fn shape_error(&self, leaf: &LeafRef) -> TreeError {
        if leaf.parent.is_some() {
            TreeError::Path(PathError::UnexpectedParent(self.object_type))
        } else {
            TreeError::Path(PathError::MissingParent(self.object_type))
        }
    }

    fn notify_changed(&self) {
        let _ = self.events.send(TreeEvent::Changed(self.object_type));
    }
}

fn find_object<'a>(nodes: &'a mut [TreeNode], name: &str) -> Option<&'a mut ObjectNode> {
    nodes.iter_mut().find_map(|node| match node {
        TreeNode::Object(object) if object.name == name => Some(object),
        _ => None,
    })
}

async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

async fn write_mirror_file(path: &Path, content: &str) -> Result<(), TreeError> {
    let io_error = |source: io::Error| TreeError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await.map_err(io_error)?;
    }
    tokio::fs::write(path, content).await.map_err(io_error)
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
