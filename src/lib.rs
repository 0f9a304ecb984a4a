// Azure SQL Data Warehouse adapter
//
// A dialect-aware adapter over a pluggable execution client: named connection
// lifecycle, bracket quoting, sp_rename, and cascading drops synthesized from
// the system catalogs.

pub mod db;

pub use db::{
    AdapterConfig, AdapterError, AdapterResult, AzureDwAdapter, Column, Columns,
    ConnectionRegistry, ConnectionState, Credentials, DropStep, ExecutionClient, QueryResult,
    Relation, RelationKind, SchemaDrop,
};
