// Connection Registry
// Tracks named connections and their lifecycle state

use crate::db::traits::{ConnectionInfo, ConnectionState, Credentials, TransportHandle};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// One logical session to the warehouse
pub struct Connection {
    name: String,
    state: ConnectionState,
    credentials: Option<Credentials>,
    handle: Option<Box<dyn TransportHandle>>,
}

impl Connection {
    fn new(name: String) -> Self {
        Self {
            name,
            state: ConnectionState::Uninitialized,
            credentials: None,
            handle: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open && self.handle.is_some()
    }

    pub fn handle_mut(&mut self) -> Option<&mut (dyn TransportHandle + 'static)> {
        self.handle.as_deref_mut()
    }

    pub(crate) fn set_credentials(&mut self, credentials: Credentials) {
        self.credentials = Some(credentials);
    }

    /// Store a fresh handle. Only valid with no live handle present.
    pub(crate) fn mark_open(&mut self, handle: Box<dyn TransportHandle>) {
        debug_assert!(self.handle.is_none());
        self.handle = Some(handle);
        self.state = ConnectionState::Open;
    }

    /// Drop into `fail`. Callers only reach this without a live handle.
    pub(crate) fn mark_failed(&mut self) {
        debug_assert!(self.handle.is_none());
        self.handle = None;
        self.state = ConnectionState::Fail;
    }

    /// Move to `closed` if a live handle exists, returning it for closing
    pub(crate) fn take_for_close(&mut self) -> Option<Box<dyn TransportHandle>> {
        let handle = self.handle.take();
        if handle.is_some() {
            self.state = ConnectionState::Closed;
        }
        handle
    }

    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            name: self.name.clone(),
            state: self.state,
            has_handle: self.handle.is_some(),
        }
    }
}

pub type SharedConnection = Arc<Mutex<Connection>>;

/// Registry of named connections, shared by everything that talks to the warehouse
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, SharedConnection>>,
}

impl ConnectionRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Get the connection for `name`, creating an uninitialized one on first reference
    pub async fn get_or_create(&self, name: &str) -> SharedConnection {
        {
            let connections = self.connections.read().await;
            if let Some(conn) = connections.get(name) {
                return Arc::clone(conn);
            }
        }

        let mut connections = self.connections.write().await;
        Arc::clone(
            connections
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(Connection::new(name.to_string())))),
        )
    }

    /// Get an existing connection by name
    pub async fn get(&self, name: &str) -> Option<SharedConnection> {
        let connections = self.connections.read().await;
        connections.get(name).map(Arc::clone)
    }

    /// Check if a connection is registered under `name`
    pub async fn contains(&self, name: &str) -> bool {
        let connections = self.connections.read().await;
        connections.contains_key(name)
    }

    /// State of a named connection, if registered
    pub async fn state(&self, name: &str) -> Option<ConnectionState> {
        let conn = self.get(name).await?;
        let conn = conn.lock().await;
        Some(conn.state())
    }

    /// Snapshot every registered connection
    pub async fn list(&self) -> Vec<ConnectionInfo> {
        let connections: Vec<SharedConnection> = {
            let connections = self.connections.read().await;
            connections.values().map(Arc::clone).collect()
        };

        let mut infos = Vec::with_capacity(connections.len());
        for conn in connections {
            infos.push(conn.lock().await.info());
        }
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Remove every record, handing back the live handles so the caller can close them
    pub(crate) async fn drain(&self) -> Vec<(String, Box<dyn TransportHandle>)> {
        let connections: Vec<SharedConnection> = {
            let mut connections = self.connections.write().await;
            connections.drain().map(|(_, conn)| conn).collect()
        };

        let mut handles = Vec::new();
        for conn in connections {
            let mut conn = conn.lock().await;
            if let Some(handle) = conn.take_for_close() {
                handles.push((conn.name.clone(), handle));
            }
        }
        handles
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
