// Execution clients
// Transports that satisfy the ExecutionClient contract

pub mod mssql;

#[cfg(test)]
pub mod mock;

pub use mssql::{MssqlClient, MssqlHandle, OdbcParams};
