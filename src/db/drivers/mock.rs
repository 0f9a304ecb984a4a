// Scripted execution client for tests
// Records every connect/execute/close and answers statements from a script

use crate::db::traits::{
    CellValue, Credentials, DatabaseError, ExecutionClient, QueryResult, TransportHandle,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub struct MockHandle {
    pub id: usize,
}

impl TransportHandle for MockHandle {
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn std::any::Any + Send> {
        self
    }
}

enum Reply {
    Rows(QueryResult),
    Fail(String),
}

struct Rule {
    needles: Vec<String>,
    reply: Reply,
}

#[derive(Default)]
pub struct MockClient {
    rejected_password: Option<String>,
    rules: Vec<Rule>,
    executed: Mutex<Vec<String>>,
    connection_strings: Mutex<Vec<String>>,
    connects: AtomicUsize,
    closes: AtomicUsize,
}

impl MockClient {
    pub fn new() -> Self {
        init_tracing();
        Self::default()
    }

    /// Refuse to connect when the connection string carries this password
    pub fn reject_password(mut self, password: &str) -> Self {
        self.rejected_password = Some(password.to_string());
        self
    }

    /// Answer statements containing every needle with these rows
    pub fn on(mut self, needles: &[&str], columns: &[&str], rows: Vec<Vec<CellValue>>) -> Self {
        self.rules.push(Rule {
            needles: needles.iter().map(|s| s.to_string()).collect(),
            reply: Reply::Rows(QueryResult::with_rows(
                columns.iter().map(|s| s.to_string()).collect(),
                rows,
            )),
        });
        self
    }

    /// Answer statements containing every needle with a rows-affected count
    pub fn on_affected(mut self, needles: &[&str], rows_affected: u64) -> Self {
        self.rules.push(Rule {
            needles: needles.iter().map(|s| s.to_string()).collect(),
            reply: Reply::Rows(QueryResult::with_rows_affected(rows_affected)),
        });
        self
    }

    /// Fail statements containing every needle
    pub fn fail_on(mut self, needles: &[&str], message: &str) -> Self {
        self.rules.push(Rule {
            needles: needles.iter().map(|s| s.to_string()).collect(),
            reply: Reply::Fail(message.to_string()),
        });
        self
    }

    /// Every executed statement, trimmed, in order
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    /// Executed statements that start with `prefix`
    pub fn executed_starting_with(&self, prefix: &str) -> Vec<String> {
        self.executed()
            .into_iter()
            .filter(|s| s.starts_with(prefix))
            .collect()
    }

    pub fn connection_strings(&self) -> Vec<String> {
        self.connection_strings.lock().unwrap().clone()
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ExecutionClient for MockClient {
    async fn connect(
        &self,
        connection_string: &str,
    ) -> Result<Box<dyn TransportHandle>, DatabaseError> {
        self.connection_strings
            .lock()
            .unwrap()
            .push(connection_string.to_string());

        if let Some(pw) = &self.rejected_password {
            if connection_string.ends_with(&format!("PWD={}", pw)) {
                return Err(DatabaseError::LoginFailed(
                    "Login failed for user 'loader'.".to_string(),
                ));
            }
        }

        let id = self.connects.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Box::new(MockHandle { id }))
    }

    async fn execute(
        &self,
        handle: &mut dyn TransportHandle,
        sql: &str,
    ) -> Result<QueryResult, DatabaseError> {
        handle
            .as_any_mut()
            .downcast_mut::<MockHandle>()
            .ok_or(DatabaseError::InvalidHandle)?;

        self.executed.lock().unwrap().push(sql.trim().to_string());

        let rule = self
            .rules
            .iter()
            .find(|rule| rule.needles.iter().all(|n| sql.contains(n.as_str())));

        match rule.map(|r| &r.reply) {
            Some(Reply::Rows(result)) => Ok(result.clone()),
            Some(Reply::Fail(message)) => Err(DatabaseError::QueryError(message.clone())),
            None => Ok(QueryResult::with_rows_affected(0)),
        }
    }

    async fn close(&self, _handle: Box<dyn TransportHandle>) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn valid_credentials() -> Credentials {
    Credentials::new("dw.example.net", 1433, "analytics", "loader", "s3cret")
}

pub fn text(s: &str) -> CellValue {
    CellValue::String(s.to_string())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
