// Connection Management
// Owns the open / reuse / fail / release lifecycle of named connections

use crate::db::dialect;
use crate::db::registry::{Connection, ConnectionRegistry};
use crate::db::traits::{
    AdapterConfig, AdapterError, AdapterResult, ConnectionInfo, ConnectionState, Credentials,
    ExecutionClient, QueryResult,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Opens, reuses and releases named connections through an execution client
pub struct ConnectionManager {
    registry: Arc<ConnectionRegistry>,
    client: Arc<dyn ExecutionClient>,
    config: AdapterConfig,
}

impl ConnectionManager {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        client: Arc<dyn ExecutionClient>,
        config: AdapterConfig,
    ) -> Self {
        Self {
            registry,
            client,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    /// Build the driver connection string for a set of credentials
    pub fn connection_string(&self, credentials: &Credentials) -> String {
        dialect::odbc_connection_string(&self.config.driver, credentials)
    }

    /// Open `name`, or return it unchanged if it is already open
    pub async fn open(&self, name: &str, credentials: &Credentials) -> AdapterResult<ConnectionInfo> {
        let conn = self.registry.get_or_create(name).await;
        let mut conn = conn.lock().await;

        if conn.is_open() {
            debug!(connection = name, "Connection is already open, skipping open.");
            return Ok(conn.info());
        }

        conn.set_credentials(credentials.clone());
        self.open_locked(&mut conn).await?;
        Ok(conn.info())
    }

    async fn open_locked(&self, conn: &mut Connection) -> AdapterResult<()> {
        let name = conn.name().to_string();

        conn.mark_failed();

        let credentials = match conn.credentials() {
            Some(c) => c.clone(),
            None => {
                return Err(AdapterError::FailedToConnect {
                    name,
                    message: "no credentials registered for connection".to_string(),
                })
            }
        };

        if let Err(e) = credentials.validate() {
            debug!(connection = %name, error = %e, "Rejected credentials before connecting");
            return Err(AdapterError::FailedToConnect {
                name,
                message: e.to_string(),
            });
        }

        let connection_string = self.connection_string(&credentials);
        match self.client.connect(&connection_string).await {
            Ok(handle) => {
                conn.mark_open(handle);
                info!(connection = %name, host = %credentials.host, "Opened connection");
                Ok(())
            }
            Err(e) => {
                debug!(
                    connection = %name,
                    "Got an error when attempting to open an azure_dw connection: '{}'",
                    e
                );
                Err(AdapterError::FailedToConnect {
                    name,
                    message: e.to_string(),
                })
            }
        }
    }

    /// Close the live handle of `name`, if any. Unknown names are a no-op.
    pub async fn release(&self, name: &str) {
        let Some(conn) = self.registry.get(name).await else {
            debug!(connection = name, "Release requested for unknown connection, skipping.");
            return;
        };

        let handle = conn.lock().await.take_for_close();
        match handle {
            Some(handle) => {
                self.client.close(handle).await;
                debug!(connection = name, "Released connection");
            }
            None => debug!(connection = name, "Connection has no live handle, nothing to release."),
        }
    }

    /// Close a connection from outside the task that is using it
    pub async fn cancel_connection(&self, name: &str) {
        let Some(conn) = self.registry.get(name).await else {
            return;
        };

        let handle = match conn.try_lock() {
            Ok(mut guard) => guard.take_for_close(),
            Err(_) => {
                // A statement is in flight; wait for it and close afterwards
                warn!(connection = name, "Connection busy, closing once the running statement returns");
                conn.lock().await.take_for_close()
            }
        };

        if let Some(handle) = handle {
            self.client.close(handle).await;
            info!(connection = name, "Cancelled connection");
        }
    }

    /// Rows affected by a completed execution
    pub fn get_status(&self, result: &QueryResult) -> u64 {
        result.rows_affected
    }

    /// Current state of `name`, or `None` if it was never referenced
    pub async fn state(&self, name: &str) -> Option<ConnectionState> {
        self.registry.state(name).await
    }

    /// Run one SQL batch on `name`. Reopens a closed/failed connection when configured to.
    pub async fn execute(
        &self,
        name: &str,
        sql: &str,
        model_name: Option<&str>,
    ) -> AdapterResult<QueryResult> {
        let Some(conn) = self.registry.get(name).await else {
            return Err(AdapterError::NotConnected {
                name: name.to_string(),
                message: "connection was never opened".to_string(),
            });
        };
        let mut conn = conn.lock().await;

        if !conn.is_open() {
            if !self.config.auto_reopen || conn.credentials().is_none() {
                return Err(AdapterError::NotConnected {
                    name: name.to_string(),
                    message: format!("connection is {}", conn.state()),
                });
            }

            debug!(connection = name, state = %conn.state(), "Reopening connection before execution");
            if let Err(e) = self.open_locked(&mut conn).await {
                return Err(AdapterError::NotConnected {
                    name: name.to_string(),
                    message: e.to_string(),
                });
            }
        }

        debug!(connection = name, model = model_name.unwrap_or(""), "On {}: {}", model_name.unwrap_or(name), sql.trim());

        let handle = conn.handle_mut().ok_or_else(|| AdapterError::NotConnected {
            name: name.to_string(),
            message: "connection has no handle".to_string(),
        })?;

        let start = Instant::now();
        let mut result = self
            .client
            .execute(handle, sql)
            .await
            .map_err(|e| AdapterError::runtime(e.to_string(), model_name))?;
        result.execution_time_ms = start.elapsed().as_millis() as u64;

        debug!(
            connection = name,
            query_id = %result.query_id,
            rows_affected = result.rows_affected,
            elapsed_ms = result.execution_time_ms,
            "Statement finished"
        );
        Ok(result)
    }

    /// Close every registered connection and forget them
    pub async fn shutdown(&self) {
        let handles = self.registry.drain().await;
        let count = handles.len();
        for (name, handle) in handles {
            debug!(connection = %name, "Closing connection on shutdown");
            self.client.close(handle).await;
        }
        info!(closed = count, "Connection registry shut down");
    }
}
