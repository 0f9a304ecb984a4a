// Database Module
// Connection lifecycle, T-SQL dialect and relation management for
// Azure SQL Data Warehouse

pub mod adapter;
pub mod connection;
pub mod dialect;
pub mod drivers;
pub mod handler;
pub mod registry;
pub mod relation;
pub mod traits;

pub use adapter::AzureDwAdapter;
pub use connection::ConnectionManager;
pub use drivers::{MssqlClient, MssqlHandle, OdbcParams};
pub use handler::exception_handler;
pub use registry::{Connection, ConnectionRegistry, SharedConnection};
pub use relation::{
    Columns, DependencyGraph, DropStep, ForeignKeyRef, RelationEngine, SchemaDrop,
};
pub use traits::{
    AdapterConfig, AdapterError, AdapterResult, CellValue, Column, ConnectionInfo,
    ConnectionState, Credentials, DatabaseError, ExecutionClient, QueryResult, Relation,
    RelationKind, TransportHandle,
};
