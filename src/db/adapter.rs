// Azure Data Warehouse Adapter
// Public entry point: ties the connection manager, the exception boundary and
// the relation engine together behind one service object

use crate::db::connection::ConnectionManager;
use crate::db::dialect;
use crate::db::drivers::MssqlClient;
use crate::db::registry::ConnectionRegistry;
use crate::db::relation::{Columns, DropStep, RelationEngine, SchemaDrop};
use crate::db::traits::{
    AdapterConfig, AdapterResult, ConnectionInfo, ConnectionState, Credentials, ExecutionClient,
    QueryResult, Relation, RelationKind,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{Instrument, Span};

/// Stateless service over an explicit registry and execution client.
///
/// Callers serialize statements per connection name; different names may be
/// used from different tasks at the same time. Every operation runs inside the
/// span given at construction.
pub struct AzureDwAdapter {
    engine: RelationEngine,
    span: Span,
}

impl AzureDwAdapter {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        client: Arc<dyn ExecutionClient>,
        config: AdapterConfig,
    ) -> Self {
        let manager = Arc::new(ConnectionManager::new(registry, client, config));
        Self {
            engine: RelationEngine::new(manager),
            span: tracing::info_span!("azure_dw"),
        }
    }

    /// Adapter over the tiberius transport, honouring the TLS settings in `config`
    pub fn with_mssql(registry: Arc<ConnectionRegistry>, config: AdapterConfig) -> Self {
        let client = Arc::new(MssqlClient::new(config.trust_certificate, config.encrypt));
        Self::new(registry, client, config)
    }

    /// Replace the logging span every operation is instrumented with
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    fn manager(&self) -> &ConnectionManager {
        self.engine.manager()
    }

    pub fn type_name(&self) -> &'static str {
        dialect::type_name()
    }

    pub fn date_function(&self) -> &'static str {
        dialect::date_function()
    }

    pub fn quote(&self, identifier: &str) -> String {
        dialect::quote(identifier)
    }

    pub fn quote_schema_and_table(&self, schema: &str, table: &str) -> String {
        dialect::quote_schema_and_table(schema, table)
    }

    pub fn get_status(&self, result: &QueryResult) -> u64 {
        self.manager().get_status(result)
    }

    pub async fn open(&self, name: &str, credentials: &Credentials) -> AdapterResult<ConnectionInfo> {
        self.manager()
            .open(name, credentials)
            .instrument(self.span.clone())
            .await
    }

    pub async fn release(&self, name: &str) {
        self.manager().release(name).instrument(self.span.clone()).await
    }

    pub async fn cancel_connection(&self, name: &str) {
        self.manager()
            .cancel_connection(name)
            .instrument(self.span.clone())
            .await
    }

    pub async fn connection_state(&self, name: &str) -> Option<ConnectionState> {
        self.manager().state(name).await
    }

    pub async fn list_connections(&self) -> Vec<ConnectionInfo> {
        self.manager().registry().list().await
    }

    /// Close every connection; the registry is empty afterwards
    pub async fn shutdown(&self) {
        self.manager().shutdown().instrument(self.span.clone()).await
    }

    /// Execute arbitrary SQL through the exception boundary
    pub async fn execute(
        &self,
        conn: &str,
        sql: &str,
        model_name: Option<&str>,
    ) -> AdapterResult<QueryResult> {
        self.engine
            .add_query(conn, sql, model_name)
            .instrument(self.span.clone())
            .await
    }

    pub async fn drop_relation(
        &self,
        conn: &str,
        schema: &str,
        rel_name: &str,
        rel_type: RelationKind,
        model_name: Option<&str>,
    ) -> AdapterResult<Vec<DropStep>> {
        self.engine
            .drop_relation(conn, schema, rel_name, rel_type, model_name)
            .instrument(self.span.clone())
            .await
    }

    pub async fn rename(
        &self,
        conn: &str,
        schema: &str,
        from_name: &str,
        to_name: &str,
        model_name: Option<&str>,
    ) -> AdapterResult<()> {
        self.engine
            .rename(conn, schema, from_name, to_name, model_name)
            .instrument(self.span.clone())
            .await
    }

    pub async fn get_columns_in_table(
        &self,
        conn: &str,
        schema: &str,
        table: &str,
        model_name: Option<&str>,
    ) -> AdapterResult<Columns> {
        self.engine
            .get_columns_in_table(conn, schema, table, model_name)
            .instrument(self.span.clone())
            .await
    }

    pub async fn alter_column_type(
        &self,
        conn: &str,
        schema: &str,
        table: &str,
        column: &str,
        new_type: &str,
        model_name: Option<&str>,
    ) -> AdapterResult<()> {
        self.engine
            .alter_column_type(conn, schema, table, column, new_type, model_name)
            .instrument(self.span.clone())
            .await
    }

    pub async fn check_schema_exists(
        &self,
        conn: &str,
        schema: &str,
        model_name: Option<&str>,
    ) -> AdapterResult<bool> {
        self.engine
            .check_schema_exists(conn, schema, model_name)
            .instrument(self.span.clone())
            .await
    }

    pub async fn get_existing_schemas(
        &self,
        conn: &str,
        model_name: Option<&str>,
    ) -> AdapterResult<BTreeSet<String>> {
        self.engine
            .get_existing_schemas(conn, model_name)
            .instrument(self.span.clone())
            .await
    }

    pub async fn create_schema(
        &self,
        conn: &str,
        schema: &str,
        model_name: Option<&str>,
    ) -> AdapterResult<()> {
        self.engine
            .create_schema(conn, schema, model_name)
            .instrument(self.span.clone())
            .await
    }

    pub async fn drop_schema(
        &self,
        conn: &str,
        schema: &str,
        mode: SchemaDrop,
        model_name: Option<&str>,
    ) -> AdapterResult<()> {
        self.engine
            .drop_schema(conn, schema, mode, model_name)
            .instrument(self.span.clone())
            .await
    }

    pub async fn list_relations(
        &self,
        conn: &str,
        schema: &str,
        model_name: Option<&str>,
    ) -> AdapterResult<Vec<Relation>> {
        self.engine
            .list_relations(conn, schema, model_name)
            .instrument(self.span.clone())
            .await
    }

    pub async fn query_for_existing(
        &self,
        conn: &str,
        schemas: &[String],
        model_name: Option<&str>,
    ) -> AdapterResult<HashMap<String, HashMap<String, RelationKind>>> {
        self.engine
            .query_for_existing(conn, schemas, model_name)
            .instrument(self.span.clone())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::drivers::mock::{text, valid_credentials, MockClient};
    use crate::db::traits::AdapterError;

    fn adapter(client: Arc<MockClient>) -> AzureDwAdapter {
        AzureDwAdapter::new(
            Arc::new(ConnectionRegistry::new()),
            client,
            AdapterConfig::default(),
        )
        .with_span(tracing::debug_span!("test_adapter"))
    }

    #[tokio::test]
    async fn test_select_one_scenario() {
        let client = Arc::new(MockClient::new().on_affected(&["SELECT 1"], 1));
        let adapter = adapter(Arc::clone(&client));

        adapter.open("conn1", &valid_credentials()).await.unwrap();
        let result = adapter.execute("conn1", "SELECT 1", None).await.unwrap();
        assert_eq!(adapter.get_status(&result), 1);
        assert_eq!(adapter.connection_state("conn1").await, Some(ConnectionState::Open));
    }

    #[tokio::test]
    async fn test_invalid_credentials_scenario() {
        let client = Arc::new(MockClient::new().reject_password("wrong"));
        let adapter = adapter(Arc::clone(&client));

        let mut creds = valid_credentials();
        creds.password = "wrong".to_string();

        let err = adapter.open("conn1", &creds).await.unwrap_err();
        assert!(matches!(err, AdapterError::FailedToConnect { .. }));

        let err = adapter.execute("conn1", "SELECT 1", Some("m")).await.unwrap_err();
        assert!(matches!(err, AdapterError::NotConnected { .. }));
        assert_ne!(adapter.connection_state("conn1").await, Some(ConnectionState::Open));
    }

    #[tokio::test]
    async fn test_failed_statement_never_leaves_connection_open() {
        let client = Arc::new(MockClient::new().fail_on(&["FROM nowhere"], "Invalid object name 'nowhere'."));
        let adapter = adapter(Arc::clone(&client));

        adapter.open("conn1", &valid_credentials()).await.unwrap();
        let err = adapter
            .execute("conn1", "SELECT * FROM nowhere", Some("model_x"))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("model_x"));
        assert_ne!(adapter.connection_state("conn1").await, Some(ConnectionState::Open));
        assert_eq!(client.close_count(), 1);
    }

    #[tokio::test]
    async fn test_rename_and_drop_through_adapter() {
        let client = Arc::new(
            MockClient::new()
                .on(&["FROM sys.objects o", "N'table_t'"], &["type"], vec![vec![text("U")]])
                .on(
                    &["sql_expression_dependencies", "[dbo].[table_t]"],
                    &["schema_name", "object_name", "type"],
                    vec![vec![text("dbo"), text("view_v"), text("V")]],
                ),
        );
        let adapter = adapter(Arc::clone(&client));
        adapter.open("conn1", &valid_credentials()).await.unwrap();

        adapter.rename("conn1", "dbo", "t1", "t2", None).await.unwrap();
        let steps = adapter
            .drop_relation("conn1", "dbo", "table_t", RelationKind::Table, None)
            .await
            .unwrap();

        let sql: Vec<String> = steps.iter().map(DropStep::sql).collect();
        assert_eq!(sql, vec!["DROP VIEW [dbo].[view_v]", "DROP TABLE [dbo].[table_t]"]);
        assert_eq!(client.executed()[0], "sp_rename [dbo].[t1], [t2]");
    }

    #[tokio::test]
    async fn test_independent_names_from_concurrent_tasks() {
        let client = Arc::new(MockClient::new());
        let adapter = Arc::new(adapter(Arc::clone(&client)));

        let mut tasks = Vec::new();
        for i in 0..4 {
            let adapter = Arc::clone(&adapter);
            tasks.push(tokio::spawn(async move {
                let name = format!("model_{}", i);
                adapter.open(&name, &valid_credentials()).await?;
                adapter.execute(&name, "SELECT 1", Some(&name)).await?;
                adapter.release(&name).await;
                Ok::<_, AdapterError>(())
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(client.connect_count(), 4);
        assert_eq!(client.close_count(), 4);
        let states: Vec<ConnectionState> =
            adapter.list_connections().await.into_iter().map(|c| c.state).collect();
        assert_eq!(states, vec![ConnectionState::Closed; 4]);
    }

    #[test]
    fn test_dialect_passthrough() {
        let adapter = adapter(Arc::new(MockClient::new()));
        assert_eq!(adapter.type_name(), "azure_dw");
        assert_eq!(adapter.date_function(), "CURRENT_TIMESTAMP()");
        assert_eq!(adapter.quote("x"), "[x]");
        assert_eq!(adapter.quote_schema_and_table("s", "t"), "[s].[t]");
    }
}
