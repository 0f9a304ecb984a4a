// Exception Translation Boundary
// Every statement the adapter runs goes through here: failures are logged,
// the connection is released, and one normalized error comes back out

use crate::db::connection::ConnectionManager;
use crate::db::traits::{AdapterError, AdapterResult};
use std::future::Future;
use tracing::debug;

/// Run `op` for the statement `sql` on connection `name`.
///
/// On success the connection stays open for reuse. On failure the connection
/// is released before the error is returned, so it is never left `open`.
/// Connection-level errors keep their kind; everything else becomes
/// [`AdapterError::RuntimeFailure`] carrying the model name.
pub async fn exception_handler<T, F>(
    manager: &ConnectionManager,
    name: &str,
    sql: &str,
    model_name: Option<&str>,
    op: F,
) -> AdapterResult<T>
where
    F: Future<Output = AdapterResult<T>>,
{
    match op.await {
        Ok(value) => Ok(value),
        Err(err) => {
            debug!(connection = name, "Error running SQL: {}", sql.trim());
            debug!(connection = name, "Rolling back transaction.");
            manager.release(name).await;
            Err(translate(err, model_name))
        }
    }
}

fn translate(err: AdapterError, model_name: Option<&str>) -> AdapterError {
    match err {
        AdapterError::FailedToConnect { .. } | AdapterError::NotConnected { .. } => err,
        AdapterError::RuntimeFailure {
            message,
            model_name: inner,
        } => AdapterError::RuntimeFailure {
            message,
            model_name: inner.or_else(|| model_name.map(str::to_string)),
        },
        AdapterError::InvalidConfig(message) => AdapterError::runtime(message, model_name),
    }
}
