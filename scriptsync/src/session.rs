use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::object_type::ObjectType;
use crate::registry::{Connection, ConnectionRegistry, RegistryError, WorkspaceSource};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no connection is configured")]
    NoConnection,
    #[error("connection {0} has no workspace available")]
    NoWorkspace(String),
    #[error("selection was superseded by a newer transition")]
    Superseded,
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// What the presentation layer needs to redraw the selection form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionSnapshot {
    pub connections: Vec<String>,
    pub active_connection: Option<String>,
    pub workspaces: Vec<String>,
    pub active_workspace: Option<String>,
    pub object_type: ObjectType,
    pub generation: u64,
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    ConnectionChanged(SelectionSnapshot),
    WorkspaceChanged(SelectionSnapshot),
    ObjectTypeChanged(ObjectType),
}

/// Connection and workspace a remote call is bound to, stamped with the
/// generation it was taken at.
#[derive(Debug, Clone)]
pub struct Scope {
    pub connection: Connection,
    pub workspace: String,
    pub generation: u64,
}

struct Selection {
    connection: Option<Connection>,
    workspaces: Vec<String>,
    workspace: Option<String>,
    object_type: ObjectType,
    /// Bumped on every committed connection/workspace change.
    generation: u64,
    /// Bumped when a connection transition starts; a transition whose ticket
    /// is no longer current when its remote lookup returns is dropped.
    transition: u64,
}

pub struct SessionState {
    registry: Arc<ConnectionRegistry>,
    selection: Mutex<Selection>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionState {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            registry,
            selection: Mutex::new(Selection {
                connection: None,
                workspaces: Vec::new(),
                workspace: None,
                object_type: ObjectType::BusinessService,
                generation: 0,
                transition: 0,
            }),
            events,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Initial selection: the remembered default connection if it still
    /// exists, otherwise the first configured one.
    pub async fn activate(&self) -> Result<SelectionSnapshot, SessionError> {
        let connections = self.registry.list()?;
        let remembered = self.registry.default_connection()?;
        let chosen = remembered
            .filter(|name| connections.iter().any(|c| &c.name == name))
            .or_else(|| connections.first().map(|c| c.name.clone()));
        match chosen {
            Some(name) => self.select_connection(&name).await,
            None => {
                info!("no connection configured");
                self.clear_connection()
            }
        }
    }

    pub async fn select_connection(&self, name: &str) -> Result<SelectionSnapshot, SessionError> {
        let connection = self.registry.resolve(name)?;
        let ticket = {
            let mut selection = self.selection.lock();
            selection.transition += 1;
            selection.transition
        };

        let workspaces = self.registry.workspaces_for(&connection).await?;
        let names = self.connection_names()?;

        let snapshot = {
            let mut selection = self.selection.lock();
            if selection.transition != ticket {
                return Err(SessionError::Superseded);
            }
            let workspace = pick_workspace(
                selection.workspace.as_deref(),
                &workspaces,
                connection.default_workspace.as_deref(),
            );
            if workspace.is_none() {
                warn!(connection = %connection.name, "connection has no workspace");
            }
            selection.connection = Some(connection);
            selection.workspaces = workspaces;
            selection.workspace = workspace;
            selection.generation += 1;
            snapshot_of(&selection, names)
        };
        info!(
            connection = ?snapshot.active_connection,
            workspace = ?snapshot.active_workspace,
            generation = snapshot.generation,
            "connection selected"
        );
        let _ = self
            .events
            .send(SessionEvent::ConnectionChanged(snapshot.clone()));
        Ok(snapshot)
    }

    /// Switches workspace. The name is expected to come from the current
    /// workspace list shown to the user and is not re-validated.
    pub fn select_workspace(&self, name: &str) -> Result<SelectionSnapshot, SessionError> {
        let names = self.connection_names()?;
        let snapshot = {
            let mut selection = self.selection.lock();
            if selection.connection.is_none() {
                return Err(SessionError::NoConnection);
            }
            selection.workspace = Some(name.to_string());
            selection.generation += 1;
            snapshot_of(&selection, names)
        };
        info!(workspace = name, generation = snapshot.generation, "workspace selected");
        let _ = self
            .events
            .send(SessionEvent::WorkspaceChanged(snapshot.clone()));
        Ok(snapshot)
    }

    pub fn select_object_type(&self, object_type: ObjectType) {
        self.selection.lock().object_type = object_type;
        let _ = self
            .events
            .send(SessionEvent::ObjectTypeChanged(object_type));
    }

    /// Reacts to an external edit of the settings file.
    pub async fn settings_changed(&self) -> Result<SelectionSnapshot, SessionError> {
        self.registry.refresh();
        let connections = self.registry.list()?;
        let active = self.selection.lock().connection.clone();
        match active {
            None => match connections.first() {
                Some(first) => self.select_connection(&first.name).await,
                None => self.snapshot(),
            },
            Some(active) => match connections.iter().find(|c| c.name == active.name) {
                Some(current)
                    if *current == active && current.workspace_source == WorkspaceSource::Static =>
                {
                    self.snapshot()
                }
                Some(current) => self.select_connection(&current.name).await,
                None => self.activate().await,
            },
        }
    }

    pub fn scope(&self) -> Result<Scope, SessionError> {
        let selection = self.selection.lock();
        let connection = selection
            .connection
            .clone()
            .ok_or(SessionError::NoConnection)?;
        let workspace = selection
            .workspace
            .clone()
            .ok_or_else(|| SessionError::NoWorkspace(connection.name.clone()))?;
        Ok(Scope {
            connection,
            workspace,
            generation: selection.generation,
        })
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.selection.lock().generation == generation
    }

    pub fn generation(&self) -> u64 {
        self.selection.lock().generation
    }

    pub fn active_workspace(&self) -> Option<String> {
        self.selection.lock().workspace.clone()
    }

    pub fn object_type(&self) -> ObjectType {
        self.selection.lock().object_type
    }

    pub fn snapshot(&self) -> Result<SelectionSnapshot, SessionError> {
        let names = self.connection_names()?;
        Ok(snapshot_of(&self.selection.lock(), names))
    }

    fn clear_connection(&self) -> Result<SelectionSnapshot, SessionError> {
        let names = self.connection_names()?;
        let snapshot = {
            let mut selection = self.selection.lock();
            selection.transition += 1;
            selection.connection = None;
            selection.workspaces.clear();
            selection.workspace = None;
            selection.generation += 1;
            snapshot_of(&selection, names)
        };
        let _ = self
            .events
            .send(SessionEvent::ConnectionChanged(snapshot.clone()));
        Ok(snapshot)
    }

    fn connection_names(&self) -> Result<Vec<String>, SessionError> {
        Ok(self
            .registry
            .list()?
            .into_iter()
            .map(|connection| connection.name)
            .collect())
    }
}

fn snapshot_of(selection: &Selection, connections: Vec<String>) -> SelectionSnapshot {
    SelectionSnapshot {
        connections,
        active_connection: selection.connection.as_ref().map(|c| c.name.clone()),
        workspaces: selection.workspaces.clone(),
        active_workspace: selection.workspace.clone(),
        object_type: selection.object_type,
        generation: selection.generation,
    }
}

/// Workspace to activate after a connection change: keep the current one if
/// the new set still has it, else the connection default if present, else
/// the first entry, else nothing.
pub fn pick_workspace(
    current: Option<&str>,
    workspaces: &[String],
    default: Option<&str>,
) -> Option<String> {
    let member = |name: &str| workspaces.iter().any(|ws| ws == name);
    current
        .filter(|name| member(*name))
        .or_else(|| default.filter(|name| member(*name)))
        .map(str::to_string)
        .or_else(|| workspaces.first().cloned())
}
