// Adapter Types and Transport Traits
// Defines the credentials, error taxonomy, catalog value types and the
// low-level execution capability every transport must provide

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default TDS port for SQL Server / Azure SQL Data Warehouse
pub const DEFAULT_PORT: u16 = 1433;

/// Default ODBC driver named in the connection string
pub const DEFAULT_ODBC_DRIVER: &str = "ODBC Driver 13 for SQL Server";

/// Low-level transport error, as reported by an execution client
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Login failed: {0}")]
    LoginFailed(String),

    #[error("Password expired. Please change your password using another tool properly.")]
    PasswordExpired,

    #[error("Query execution error: {0}")]
    QueryError(String),

    #[error("Invalid connection string: {0}")]
    InvalidConnectionString(String),

    #[error("Invalid connection handle")]
    InvalidHandle,

    #[error("Timeout error")]
    Timeout,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<tiberius::error::Error> for DatabaseError {
    fn from(err: tiberius::error::Error) -> Self {
        match &err {
            tiberius::error::Error::Server(e) => match e.code() {
                18456 => DatabaseError::LoginFailed(e.message().to_string()),
                18488 => DatabaseError::PasswordExpired,
                _ => DatabaseError::QueryError(err.to_string()),
            },
            tiberius::error::Error::Io { .. } | tiberius::error::Error::Routing { .. } => {
                DatabaseError::ConnectionFailed(err.to_string())
            }
            tiberius::error::Error::Tls(_) => DatabaseError::ConnectionFailed(err.to_string()),
            _ => DatabaseError::QueryError(err.to_string()),
        }
    }
}

/// Errors surfaced to callers of the adapter
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("Failed to connect '{name}': {message}")]
    FailedToConnect { name: String, message: String },

    #[error("Connection '{name}' is not open: {message}")]
    NotConnected { name: String, message: String },

    #[error("Runtime error{}: {message}", model_suffix(.model_name))]
    RuntimeFailure {
        message: String,
        model_name: Option<String>,
    },

    #[error("Configuration error: {0}")]
    InvalidConfig(String),
}

fn model_suffix(model_name: &Option<String>) -> String {
    model_name
        .as_deref()
        .map(|m| format!(" in model {}", m))
        .unwrap_or_default()
}

impl AdapterError {
    pub fn runtime(message: impl Into<String>, model_name: Option<&str>) -> Self {
        AdapterError::RuntimeFailure {
            message: message.into(),
            model_name: model_name.map(str::to_string),
        }
    }
}

pub type AdapterResult<T> = Result<T, AdapterError>;

/// Connection credentials. Opaque to the adapter beyond field access.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    pub database: String,
    pub username: String,
    #[serde(skip_serializing, default)]
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"********")
            .finish()
    }
}

impl Credentials {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        database: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: Some(port),
            database: database.into(),
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn validate(&self) -> Result<(), AdapterError> {
        if self.host.trim().is_empty() {
            return Err(AdapterError::InvalidConfig("Host is required".to_string()));
        }
        if self.username.trim().is_empty() {
            return Err(AdapterError::InvalidConfig("Username is required".to_string()));
        }
        if self.database.trim().is_empty() {
            return Err(AdapterError::InvalidConfig(
                "Database name is required".to_string(),
            ));
        }
        Ok(())
    }

    pub fn get_port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }
}

/// Adapter-wide settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// ODBC driver name placed in the connection string
    pub driver: String,
    /// Reopen a closed or failed connection before running a statement
    pub auto_reopen: bool,
    pub trust_certificate: bool,
    pub encrypt: bool,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            driver: DEFAULT_ODBC_DRIVER.to_string(),
            auto_reopen: true,
            trust_certificate: true,
            encrypt: false,
        }
    }
}

impl AdapterConfig {
    /// Parse a profile fragment such as `{"driver": "...", "auto_reopen": false}`
    pub fn from_json(json: &str) -> Result<Self, AdapterError> {
        serde_json::from_str(json).map_err(|e| AdapterError::InvalidConfig(e.to_string()))
    }
}

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Uninitialized,
    Open,
    Fail,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Uninitialized => "uninitialized",
            ConnectionState::Open => "open",
            ConnectionState::Fail => "fail",
            ConnectionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Snapshot of a named connection, without the transport handle
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub name: String,
    pub state: ConnectionState,
    pub has_handle: bool,
}

/// Cell value in a result set
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    DateTime(String),
    Binary(Vec<u8>),
}

impl CellValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            CellValue::String(s) | CellValue::DateTime(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            CellValue::Int(v) => Some(*v),
            CellValue::Bool(b) => Some(*b as i64),
            CellValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }
}

/// Result of one executed statement
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryResult {
    pub query_id: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
    pub rows_affected: u64,
    pub execution_time_ms: u64,
}

impl QueryResult {
    pub fn new(query_id: String) -> Self {
        Self {
            query_id,
            ..Default::default()
        }
    }

    pub fn with_rows(columns: Vec<String>, rows: Vec<Vec<CellValue>>) -> Self {
        let rows_affected = rows.len() as u64;
        Self {
            query_id: uuid::Uuid::new_v4().to_string(),
            columns,
            rows,
            rows_affected,
            execution_time_ms: 0,
        }
    }

    pub fn with_rows_affected(rows_affected: u64) -> Self {
        Self {
            query_id: uuid::Uuid::new_v4().to_string(),
            rows_affected,
            ..Default::default()
        }
    }

    /// First-column string values of every row, skipping NULLs
    pub fn first_column_strings(&self) -> Vec<String> {
        self.rows
            .iter()
            .filter_map(|row| row.first().and_then(CellValue::as_str).map(str::to_string))
            .collect()
    }
}

/// Kind of a relation in the warehouse
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RelationKind {
    Table,
    View,
    /// Scalar, inline or table-valued function
    Function,
    Other,
}

impl RelationKind {
    /// Map a `sys.objects.type` code or an INFORMATION_SCHEMA table type
    pub fn from_catalog(code: &str) -> Self {
        match code.trim().to_ascii_uppercase().as_str() {
            "U" | "BASE TABLE" | "TABLE" | "USER_TABLE" => RelationKind::Table,
            "V" | "VIEW" => RelationKind::View,
            "FN" | "IF" | "TF" => RelationKind::Function,
            _ => RelationKind::Other,
        }
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RelationKind::Table => "table",
            RelationKind::View => "view",
            RelationKind::Function => "function",
            RelationKind::Other => "other",
        };
        f.write_str(s)
    }
}

/// A named schema object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Relation {
    pub schema: String,
    pub name: String,
    pub kind: RelationKind,
}

impl Relation {
    pub fn new(schema: impl Into<String>, name: impl Into<String>, kind: RelationKind) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            kind,
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Column information from catalog introspection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub data_type: String,
    pub is_nullable: bool,
    pub ordinal_position: i32,
    pub char_max_length: Option<i32>,
    pub numeric_precision: Option<i32>,
    pub numeric_scale: Option<i32>,
}

impl Column {
    /// Full type text, e.g. `varchar(255)` or `decimal(18,2)`
    pub fn data_type_text(&self) -> String {
        match (self.char_max_length, self.numeric_precision, self.numeric_scale) {
            (Some(-1), _, _) => format!("{}(max)", self.data_type),
            (Some(len), _, _) => format!("{}({})", self.data_type, len),
            (None, Some(p), Some(s))
                if matches!(self.data_type.as_str(), "decimal" | "numeric") =>
            {
                format!("{}({},{})", self.data_type, p, s)
            }
            _ => self.data_type.clone(),
        }
    }
}

/// Opaque live transport session
pub trait TransportHandle: Send {
    /// Allow downcasting for driver-specific operations
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;

    /// Recover the concrete handle when closing
    fn into_any(self: Box<Self>) -> Box<dyn std::any::Any + Send>;
}

/// Low-level execution capability. Implementations own connection-string parsing.
#[async_trait::async_trait]
pub trait ExecutionClient: Send + Sync {
    /// Open a transport session
    async fn connect(
        &self,
        connection_string: &str,
    ) -> Result<Box<dyn TransportHandle>, DatabaseError>;

    /// Execute one batch of SQL on an open session
    async fn execute(
        &self,
        handle: &mut dyn TransportHandle,
        sql: &str,
    ) -> Result<QueryResult, DatabaseError>;

    /// Close a session. Errors are not reported; the handle is gone either way.
    async fn close(&self, handle: Box<dyn TransportHandle>);
}
