use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::object_type::ObjectType;
use crate::registry::ConnectionRegistry;
use crate::session::{SelectionSnapshot, SessionError, SessionState};
use crate::sync::actions::{ActionError, CompareOutcome, EditorHost, PullOutcome, SyncActions};
use crate::sync::engine::{FetchOutcome, TreeError, TreeSyncEngine};
use crate::sync::paths::decode;
use crate::sync::tree::LeafRef;

#[derive(Debug, Error)]
pub enum ExplorerError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error(transparent)]
    Action(#[from] ActionError),
    #[error("editor error: {0}")]
    Editor(#[source] io::Error),
}

/// Entry point for every command coming from the front end. Owns the
/// session, one tree per object type and the file actions, and keeps the
/// trees in step with connection and workspace changes.
pub struct Explorer {
    session: Arc<SessionState>,
    engines: BTreeMap<ObjectType, Arc<TreeSyncEngine>>,
    actions: SyncActions,
    host: Arc<dyn EditorHost>,
}

impl Explorer {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        config: &AppConfig,
        host: Arc<dyn EditorHost>,
    ) -> Self {
        let session = Arc::new(SessionState::new(registry));
        let engines = ObjectType::ALL
            .into_iter()
            .map(|ty| {
                let engine = TreeSyncEngine::new(ty, Arc::clone(&session), config);
                (ty, Arc::new(engine))
            })
            .collect();
        let actions = SyncActions::new(Arc::clone(&session), Arc::clone(&host), config);
        Self {
            session,
            engines,
            actions,
            host,
        }
    }

    pub fn session(&self) -> &Arc<SessionState> {
        &self.session
    }

    pub fn actions(&self) -> &SyncActions {
        &self.actions
    }

    pub fn engine(&self, object_type: ObjectType) -> &Arc<TreeSyncEngine> {
        &self.engines[&object_type]
    }

    /// Tree of the object type currently selected in the session.
    pub fn active_engine(&self) -> &Arc<TreeSyncEngine> {
        self.engine(self.session.object_type())
    }

    pub async fn activate(&self) -> Result<SelectionSnapshot, ExplorerError> {
        let before = self.session.generation();
        let snapshot = self.session.activate().await?;
        self.after_transition(before, &snapshot);
        Ok(snapshot)
    }

    pub async fn select_connection(&self, name: &str) -> Result<SelectionSnapshot, ExplorerError> {
        let before = self.session.generation();
        let snapshot = self.session.select_connection(name).await?;
        self.after_transition(before, &snapshot);
        Ok(snapshot)
    }

    pub fn select_workspace(&self, name: &str) -> Result<SelectionSnapshot, ExplorerError> {
        let before = self.session.generation();
        let snapshot = self.session.select_workspace(name)?;
        self.after_transition(before, &snapshot);
        Ok(snapshot)
    }

    pub fn select_object_type(&self, object_type: ObjectType) {
        self.session.select_object_type(object_type);
    }

    pub async fn settings_changed(&self) -> Result<SelectionSnapshot, ExplorerError> {
        let before = self.session.generation();
        let snapshot = self.session.settings_changed().await?;
        self.after_transition(before, &snapshot);
        Ok(snapshot)
    }

    /// Debounced search on the active tree.
    pub fn search(&self, query: &str) {
        self.active_engine().search(query);
    }

    pub async fn search_now(&self, query: &str) -> Result<FetchOutcome, ExplorerError> {
        Ok(self.active_engine().search_now(query).await?)
    }

    pub async fn expand(&self, object: &str) -> Result<FetchOutcome, ExplorerError> {
        Ok(self.active_engine().expand(object).await?)
    }

    /// Fetches a leaf of the active tree and opens it in the editor.
    pub async fn select_leaf(&self, leaf: &LeafRef) -> Result<PathBuf, ExplorerError> {
        let path = self.active_engine().select_leaf(leaf).await?;
        self.host.open(&path).map_err(ExplorerError::Editor)?;
        Ok(path)
    }

    pub async fn pull(&self, path: &Path) -> Result<PullOutcome, ExplorerError> {
        let outcome = self.actions.pull(path).await?;
        if outcome == PullOutcome::Updated {
            self.mark(path, None, true);
        }
        Ok(outcome)
    }

    pub async fn push(&self, path: &Path) -> Result<(), ExplorerError> {
        Ok(self.actions.push(path).await?)
    }

    pub async fn push_all(&self, folder: &Path) -> Result<usize, ExplorerError> {
        Ok(self.actions.push_all(folder).await?)
    }

    pub async fn compare_candidates(&self, path: &Path) -> Result<Vec<String>, ExplorerError> {
        Ok(self.actions.compare_candidates(path).await?)
    }

    /// Compares against `workspace`. When that is the active workspace the
    /// marker of the matching tree node is refreshed instead of opening a diff.
    pub async fn compare(&self, path: &Path, workspace: &str) -> Result<CompareOutcome, ExplorerError> {
        let outcome = self.actions.compare(path, workspace).await?;
        if let CompareOutcome::SameWorkspace { exists } = outcome {
            self.mark(path, Some(workspace), exists);
        }
        Ok(outcome)
    }

    fn after_transition(&self, before: u64, snapshot: &SelectionSnapshot) {
        if snapshot.generation == before {
            return;
        }
        debug!(generation = snapshot.generation, "clearing trees");
        for engine in self.engines.values() {
            engine.clear();
        }
    }

    /// Updates the on-disk marker of the node behind a mirror file, read in
    /// `workspace` when given, if that is the active workspace and the node is
    /// in a tree.
    fn mark(&self, path: &Path, workspace: Option<&str>, on_disk: bool) {
        let Ok(mut mirror) = decode(self.actions.mirror_root(), path) else {
            return;
        };
        if let Some(workspace) = workspace {
            mirror = mirror.in_workspace(workspace);
        }
        let Ok(scope) = self.session.scope() else {
            return;
        };
        if mirror.connection != scope.connection.name || mirror.workspace != scope.workspace {
            return;
        }
        let leaf = LeafRef {
            parent: mirror.parent,
            name: mirror.leaf,
        };
        if self.engine(mirror.object_type).mark_on_disk(&leaf, on_disk) {
            info!(leaf = %leaf.name, on_disk, "tree marker updated");
        }
    }
}
