use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use scriptsync_core::searchspec::status_in;
use scriptsync_core::{Query, RemoteError, RestClient};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

const WORKSPACE_LISTING: [&str; 3] = ["data", "Workspace", "Repository Workspace"];
const EDITABLE_WORKSPACE_STATUSES: [&str; 2] = ["Checkpointed", "Edit-In-Progress"];
const WORKSPACE_PAGE_SIZE: u32 = 100;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("settings I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("settings file {path} is not valid: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("connection not found: {0}")]
    NotFound(String),
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceSource {
    #[default]
    Static,
    Remote,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub name: String,
    pub base_url: String,
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Configured order is the user's priority order and is never re-sorted.
    #[serde(default)]
    pub workspaces: Vec<String>,
    #[serde(default)]
    pub default_workspace: Option<String>,
    #[serde(default)]
    pub workspace_source: WorkspaceSource,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSettings {
    #[serde(default)]
    pub connections: Vec<Connection>,
    #[serde(default)]
    pub default_connection: Option<String>,
}

/// JSON file holding the configured connections.
#[derive(Debug, Clone)]
pub struct SettingsFile {
    path: PathBuf,
}

impl SettingsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<StoredSettings, RegistryError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(StoredSettings::default());
            }
            Err(source) => return Err(self.io_error(source)),
        };
        if content.trim().is_empty() {
            return Ok(StoredSettings::default());
        }
        serde_json::from_str(&content).map_err(|source| RegistryError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    pub fn save(&self, settings: &StoredSettings) -> Result<(), RegistryError> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(|source| self.io_error(source))?;
        }
        let content =
            serde_json::to_string_pretty(settings).map_err(|source| RegistryError::Parse {
                path: self.path.clone(),
                source,
            })?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content).map_err(|source| self.io_error(source))?;
        std::fs::rename(&tmp, &self.path).map_err(|source| self.io_error(source))?;
        Ok(())
    }

    fn io_error(&self, source: io::Error) -> RegistryError {
        RegistryError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

/// Read-through cache over the settings file. External edits are picked up
/// by `refresh`; in-session edits go through `persist`. HTTP clients are
/// kept per connection and rebuilt only when its entry changes.
pub struct ConnectionRegistry {
    store: SettingsFile,
    cache: Mutex<Option<StoredSettings>>,
    clients: Mutex<HashMap<String, (Connection, Arc<RestClient>)>>,
}

impl ConnectionRegistry {
    pub fn new(store: SettingsFile) -> Self {
        Self {
            store,
            cache: Mutex::new(None),
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn list(&self) -> Result<Vec<Connection>, RegistryError> {
        Ok(self.settings()?.connections)
    }

    pub fn default_connection(&self) -> Result<Option<String>, RegistryError> {
        Ok(self.settings()?.default_connection)
    }

    pub fn resolve(&self, name: &str) -> Result<Connection, RegistryError> {
        self.settings()?
            .connections
            .into_iter()
            .find(|connection| connection.name == name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    pub fn refresh(&self) {
        debug!(path = %self.store.path().display(), "settings cache invalidated");
        *self.cache.lock() = None;
    }

    pub fn persist(&self, connections: Vec<Connection>) -> Result<(), RegistryError> {
        let mut settings = self.settings()?;
        if let Some(default) = settings.default_connection.as_deref()
            && !connections.iter().any(|connection| connection.name == default)
        {
            settings.default_connection = None;
        }
        settings.connections = connections;
        self.write_through(settings)
    }

    pub fn set_default(&self, name: &str) -> Result<(), RegistryError> {
        let mut settings = self.settings()?;
        if !settings
            .connections
            .iter()
            .any(|connection| connection.name == name)
        {
            return Err(RegistryError::NotFound(name.to_string()));
        }
        settings.default_connection = Some(name.to_string());
        self.write_through(settings)
    }

    /// Adds a connection or replaces the one with the same name in place.
    pub fn upsert(&self, connection: Connection) -> Result<(), RegistryError> {
        let mut connections = self.list()?;
        match connections
            .iter_mut()
            .find(|existing| existing.name == connection.name)
        {
            Some(existing) => *existing = connection,
            None => connections.push(connection),
        }
        self.persist(connections)
    }

    pub fn remove(&self, name: &str) -> Result<(), RegistryError> {
        let mut connections = self.list()?;
        let before = connections.len();
        connections.retain(|connection| connection.name != name);
        if connections.len() == before {
            return Err(RegistryError::NotFound(name.to_string()));
        }
        self.persist(connections)
    }

    /// Shared client for `connection`. Requests through it reuse pooled
    /// connections to the server.
    pub fn client(&self, connection: &Connection) -> Result<Arc<RestClient>, RemoteError> {
        let mut clients = self.clients.lock();
        if let Some((cached, client)) = clients.get(&connection.name)
            && cached == connection
        {
            return Ok(Arc::clone(client));
        }
        let client = Arc::new(RestClient::with_base_url(
            &connection.base_url,
            &connection.username,
            &connection.password,
        )?);
        debug!(connection = %connection.name, base_url = %client.base_url(), "http client created");
        clients.insert(
            connection.name.clone(),
            (connection.clone(), Arc::clone(&client)),
        );
        Ok(client)
    }

    /// Workspace names for a connection: the remote listing of editable
    /// workspaces in remote order, or the configured list as-is.
    pub async fn workspaces_for(
        &self,
        connection: &Connection,
    ) -> Result<Vec<String>, RegistryError> {
        match connection.workspace_source {
            WorkspaceSource::Static => Ok(connection.workspaces.clone()),
            WorkspaceSource::Remote => {
                let query = Query::fields(&["Name"])
                    .with_search_spec(status_in(&EDITABLE_WORKSPACE_STATUSES))
                    .with_page_size(WORKSPACE_PAGE_SIZE);
                let items = self.client(connection)?.read(&WORKSPACE_LISTING, &query).await?;
                let names: Vec<String> = items
                    .into_iter()
                    .map(|item| item.name)
                    .filter(|name| !name.is_empty())
                    .collect();
                info!(
                    connection = %connection.name,
                    count = names.len(),
                    "workspaces derived from remote"
                );
                Ok(names)
            }
        }
    }

    fn settings(&self) -> Result<StoredSettings, RegistryError> {
        let mut cache = self.cache.lock();
        if let Some(settings) = cache.as_ref() {
            return Ok(settings.clone());
        }
        let settings = self.store.load()?;
        *cache = Some(settings.clone());
        Ok(settings)
    }

    fn write_through(&self, settings: StoredSettings) -> Result<(), RegistryError> {
        self.store.save(&settings)?;
        *self.cache.lock() = Some(settings);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn connection(name: &str, workspaces: &[&str]) -> Connection {
        Connection {
            name: name.into(),
            base_url: "https://siebel.example/siebel/v1.0".into(),
            username: "sadmin".into(),
            password: "secret".into(),
            workspaces: workspaces.iter().map(|ws| ws.to_string()).collect(),
            default_workspace: None,
            workspace_source: WorkspaceSource::Static,
        }
    }

    #[test]
    fn missing_settings_file_means_no_connections() {
        let dir = tempdir().unwrap();
        let registry = ConnectionRegistry::new(SettingsFile::new(dir.path().join("none.json")));
        assert!(registry.list().unwrap().is_empty());
        assert!(matches!(
            registry.resolve("dev"),
            Err(RegistryError::NotFound(_))
        ));
    }

    #[test]
    fn persist_writes_through_and_survives_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let registry = ConnectionRegistry::new(SettingsFile::new(&path));
        registry
            .persist(vec![connection("dev", &["MAIN"]), connection("test", &[])])
            .unwrap();
        registry.set_default("test").unwrap();

        let reopened = ConnectionRegistry::new(SettingsFile::new(&path));
        let names: Vec<_> = reopened
            .list()
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["dev", "test"]);
        assert_eq!(reopened.default_connection().unwrap().as_deref(), Some("test"));
    }

    #[test]
    fn cache_ignores_external_edits_until_refresh() {
        let dir = tempdir().unwrap();
        let store = SettingsFile::new(dir.path().join("settings.json"));
        let registry = ConnectionRegistry::new(store.clone());
        assert!(registry.list().unwrap().is_empty());

        store
            .save(&StoredSettings {
                connections: vec![connection("dev", &["MAIN"])],
                default_connection: None,
            })
            .unwrap();
        assert!(registry.list().unwrap().is_empty());

        registry.refresh();
        assert_eq!(registry.resolve("dev").unwrap().workspaces, vec!["MAIN"]);
    }

    #[test]
    fn removing_default_connection_clears_default() {
        let dir = tempdir().unwrap();
        let registry = ConnectionRegistry::new(SettingsFile::new(dir.path().join("s.json")));
        registry.upsert(connection("dev", &[])).unwrap();
        registry.set_default("dev").unwrap();
        registry.remove("dev").unwrap();
        assert_eq!(registry.default_connection().unwrap(), None);
        assert!(matches!(
            registry.set_default("dev"),
            Err(RegistryError::NotFound(_))
        ));
    }

    #[test]
    fn upsert_replaces_in_place() {
        let dir = tempdir().unwrap();
        let registry = ConnectionRegistry::new(SettingsFile::new(dir.path().join("s.json")));
        registry.upsert(connection("a", &[])).unwrap();
        registry.upsert(connection("b", &[])).unwrap();
        registry.upsert(connection("a", &["MAIN"])).unwrap();
        let list = registry.list().unwrap();
        assert_eq!(list[0].name, "a");
        assert_eq!(list[0].workspaces, vec!["MAIN"]);
        assert_eq!(list[1].name, "b");
    }

    #[test]
    fn client_is_shared_until_connection_changes() {
        let dir = tempdir().unwrap();
        let registry = ConnectionRegistry::new(SettingsFile::new(dir.path().join("s.json")));
        let dev = connection("dev", &["MAIN"]);

        let first = registry.client(&dev).unwrap();
        let second = registry.client(&dev).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let moved = Connection {
            base_url: "https://other.example/siebel/v1.0".into(),
            ..dev
        };
        let rebuilt = registry.client(&moved).unwrap();
        assert!(!Arc::ptr_eq(&first, &rebuilt));
        assert_eq!(rebuilt.base_url().host_str(), Some("other.example"));
    }

    #[tokio::test]
    async fn static_workspaces_keep_configured_order() {
        let dir = tempdir().unwrap();
        let registry = ConnectionRegistry::new(SettingsFile::new(dir.path().join("s.json")));
        let conn = connection("dev", &["zeta", "alpha", "MAIN"]);
        assert_eq!(
            registry.workspaces_for(&conn).await.unwrap(),
            vec!["zeta", "alpha", "MAIN"]
        );
    }

    #[tokio::test]
    async fn remote_workspaces_use_editable_filter_and_remote_order() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data/Workspace/Repository%20Workspace"))
            .and(query_param(
                "searchspec",
                "[Status] = 'Checkpointed' OR [Status] = 'Edit-In-Progress'",
            ))
            .and(query_param("fields", "Name"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{ "Name": "dev_b" }, { "Name": "dev_a" }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let registry = ConnectionRegistry::new(SettingsFile::new(dir.path().join("s.json")));
        let conn = Connection {
            base_url: server.uri(),
            workspace_source: WorkspaceSource::Remote,
            ..connection("dev", &["ignored"])
        };
        assert_eq!(
            registry.workspaces_for(&conn).await.unwrap(),
            vec!["dev_b", "dev_a"]
        );
    }

    #[tokio::test]
    async fn remote_workspace_listing_not_found_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let registry = ConnectionRegistry::new(SettingsFile::new(dir.path().join("s.json")));
        let conn = Connection {
            base_url: server.uri(),
            workspace_source: WorkspaceSource::Remote,
            ..connection("dev", &[])
        };
        assert!(registry.workspaces_for(&conn).await.unwrap().is_empty());
    }
}
