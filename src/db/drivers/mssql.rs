// MS-SQL Transport
// ExecutionClient over tiberius: parses the ODBC-style connection string,
// opens a TDS session and maps result rows into CellValues

use crate::db::traits::{
    CellValue, DatabaseError, ExecutionClient, QueryResult, TransportHandle, DEFAULT_PORT,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use futures::TryStreamExt;
use std::collections::HashMap;
use tiberius::{AuthMethod, Client, ColumnType, Config, EncryptionLevel, Row};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::debug;

/// Live tiberius session
pub struct MssqlHandle {
    client: Client<Compat<TcpStream>>,
}

impl TransportHandle for MssqlHandle {
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn std::any::Any + Send> {
        self
    }
}

/// Fields pulled out of a `KEY=value;KEY={braced value}` connection string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OdbcParams {
    pub host: String,
    pub port: u16,
    pub database: Option<String>,
    pub username: String,
    pub password: String,
}

/// Split a connection string into upper-cased keys and raw values.
/// Braced values may contain `;`; `}}` inside braces is a literal `}`.
pub fn parse_connection_string(s: &str) -> Result<HashMap<String, String>, DatabaseError> {
    let mut pairs = HashMap::new();
    let mut chars = s.chars().peekable();

    loop {
        while matches!(chars.peek(), Some(';') | Some(' ')) {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        for c in chars.by_ref() {
            if c == '=' {
                break;
            }
            key.push(c);
        }
        let key = key.trim().to_ascii_uppercase();
        if key.is_empty() {
            return Err(DatabaseError::InvalidConnectionString(
                "empty key".to_string(),
            ));
        }

        let mut value = String::new();
        let braced = chars.peek() == Some(&'{');
        if braced {
            chars.next();
            let mut closed = false;
            while let Some(c) = chars.next() {
                if c == '}' {
                    if chars.peek() == Some(&'}') {
                        chars.next();
                        value.push('}');
                        continue;
                    }
                    closed = true;
                    break;
                }
                value.push(c);
            }
            if !closed {
                return Err(DatabaseError::InvalidConnectionString(format!(
                    "unterminated braced value for {}",
                    key
                )));
            }
            while let Some(&c) = chars.peek() {
                chars.next();
                if c == ';' {
                    break;
                }
            }
        } else {
            for c in chars.by_ref() {
                if c == ';' {
                    break;
                }
                value.push(c);
            }
        }

        // Braced values are taken verbatim
        let value = if braced { value } else { value.trim().to_string() };
        pairs.insert(key, value);
    }

    Ok(pairs)
}

impl OdbcParams {
    pub fn from_connection_string(s: &str) -> Result<Self, DatabaseError> {
        let pairs = parse_connection_string(s)?;
        let get = |keys: &[&str]| keys.iter().find_map(|k| pairs.get(*k).cloned());

        let server = get(&["SERVER", "ADDRESS"]).ok_or_else(|| {
            DatabaseError::InvalidConnectionString("SERVER is required".to_string())
        })?;
        // SERVER may be `tcp:host,port`
        let server = server.strip_prefix("tcp:").unwrap_or(&server).to_string();
        let (host, server_port) = match server.split_once(',') {
            Some((h, p)) => (h.to_string(), p.trim().parse::<u16>().ok()),
            None => (server, None),
        };

        let port = match get(&["PORT"]) {
            Some(p) => p.parse::<u16>().map_err(|_| {
                DatabaseError::InvalidConnectionString(format!("invalid PORT '{}'", p))
            })?,
            None => server_port.unwrap_or(DEFAULT_PORT),
        };

        Ok(Self {
            host,
            port,
            database: get(&["DATABASE", "INITIAL CATALOG"]).filter(|d| !d.is_empty()),
            username: get(&["UID", "USER ID", "USER"]).unwrap_or_default(),
            password: get(&["PWD", "PASSWORD"]).unwrap_or_default(),
        })
    }
}

/// Execution client speaking TDS through tiberius
pub struct MssqlClient {
    trust_certificate: bool,
    encrypt: bool,
}

impl MssqlClient {
    pub fn new(trust_certificate: bool, encrypt: bool) -> Self {
        Self {
            trust_certificate,
            encrypt,
        }
    }

    /// Create a tiberius Config from parsed connection parameters
    pub fn to_tiberius_config(&self, params: &OdbcParams) -> Config {
        let mut config = Config::new();
        config.host(&params.host);
        config.port(params.port);
        if let Some(database) = &params.database {
            config.database(database);
        }
        config.authentication(AuthMethod::sql_server(&params.username, &params.password));

        if self.trust_certificate {
            config.trust_cert();
        }

        config.encryption(if self.encrypt {
            EncryptionLevel::Required
        } else {
            EncryptionLevel::Off
        });

        config
    }

    fn client_of(handle: &mut dyn TransportHandle) -> Result<&mut Client<Compat<TcpStream>>, DatabaseError> {
        handle
            .as_any_mut()
            .downcast_mut::<MssqlHandle>()
            .map(|h| &mut h.client)
            .ok_or(DatabaseError::InvalidHandle)
    }
}

impl Default for MssqlClient {
    fn default() -> Self {
        Self::new(true, false)
    }
}

/// Skip whitespace, `--` line comments and `/* */` block comments
fn skip_leading_trivia(mut sql: &str) -> &str {
    loop {
        sql = sql.trim_start();
        if let Some(rest) = sql.strip_prefix("--") {
            sql = rest.split_once('\n').map(|(_, tail)| tail).unwrap_or("");
        } else if let Some(rest) = sql.strip_prefix("/*") {
            sql = rest.split_once("*/").map(|(_, tail)| tail).unwrap_or("");
        } else {
            return sql;
        }
    }
}

/// Whether a batch may produce a result set we should read back
pub fn returns_rows(sql: &str) -> bool {
    let body = skip_leading_trivia(sql).trim_start_matches(|c: char| c == '(' || c.is_whitespace());
    let first = body
        .split(|c: char| c.is_whitespace() || c == '(' || c == ';')
        .next()
        .unwrap_or("")
        .to_ascii_uppercase();
    matches!(first.as_str(), "SELECT" | "WITH" | "EXEC" | "EXECUTE")
}

#[async_trait::async_trait]
impl ExecutionClient for MssqlClient {
    async fn connect(
        &self,
        connection_string: &str,
    ) -> Result<Box<dyn TransportHandle>, DatabaseError> {
        let params = OdbcParams::from_connection_string(connection_string)?;
        let config = self.to_tiberius_config(&params);

        let tcp = TcpStream::connect(format!("{}:{}", params.host, params.port))
            .await
            .map_err(|e| DatabaseError::ConnectionFailed(format!("TCP connection failed: {}", e)))?;

        tcp.set_nodelay(true).map_err(|e| {
            DatabaseError::ConnectionFailed(format!("Failed to set TCP_NODELAY: {}", e))
        })?;

        let client = Client::connect(config, tcp.compat_write()).await?;
        debug!(host = %params.host, port = params.port, "TDS session established");

        Ok(Box::new(MssqlHandle { client }))
    }

    async fn execute(
        &self,
        handle: &mut dyn TransportHandle,
        sql: &str,
    ) -> Result<QueryResult, DatabaseError> {
        let client = Self::client_of(handle)?;
        let mut result = QueryResult::new(uuid::Uuid::new_v4().to_string());

        if returns_rows(sql) {
            let stream = client.simple_query(sql).await?;
            let rows: Vec<Row> = stream.into_row_stream().try_collect().await?;

            if let Some(first) = rows.first() {
                result.columns = first.columns().iter().map(|c| c.name().to_string()).collect();
            }
            result.rows = rows
                .iter()
                .map(|row| (0..row.len()).map(|idx| cell_value_from_row(row, idx)).collect())
                .collect();
            result.rows_affected = result.rows.len() as u64;
        } else {
            let done = client.execute(sql, &[]).await?;
            result.rows_affected = done.rows_affected().iter().sum();
        }

        Ok(result)
    }

    async fn close(&self, handle: Box<dyn TransportHandle>) {
        match handle.into_any().downcast::<MssqlHandle>() {
            Ok(handle) => {
                if let Err(e) = handle.client.close().await {
                    debug!("Error closing TDS session: {}", e);
                }
            }
            Err(_) => debug!("Close called with a foreign handle, dropping it"),
        }
    }
}

/// Extract cell value from row
fn cell_value_from_row(row: &Row, idx: usize) -> CellValue {
    let col_type = row
        .columns()
        .get(idx)
        .map(|c| c.column_type())
        .unwrap_or(ColumnType::Null);

    match col_type {
        ColumnType::Null => CellValue::Null,

        ColumnType::Int1 => row
            .try_get::<u8, _>(idx)
            .ok()
            .flatten()
            .map(|v| CellValue::Int(v as i64))
            .unwrap_or(CellValue::Null),
        ColumnType::Int2 => row
            .try_get::<i16, _>(idx)
            .ok()
            .flatten()
            .map(|v| CellValue::Int(v as i64))
            .unwrap_or(CellValue::Null),
        ColumnType::Int4 => row
            .try_get::<i32, _>(idx)
            .ok()
            .flatten()
            .map(|v| CellValue::Int(v as i64))
            .unwrap_or(CellValue::Null),
        ColumnType::Int8 => row
            .try_get::<i64, _>(idx)
            .ok()
            .flatten()
            .map(CellValue::Int)
            .unwrap_or(CellValue::Null),
        // Intn carries its width per value
        ColumnType::Intn => row
            .try_get::<i64, _>(idx)
            .ok()
            .flatten()
            .map(CellValue::Int)
            .or_else(|| row.try_get::<i32, _>(idx).ok().flatten().map(|v| CellValue::Int(v as i64)))
            .or_else(|| row.try_get::<i16, _>(idx).ok().flatten().map(|v| CellValue::Int(v as i64)))
            .or_else(|| row.try_get::<u8, _>(idx).ok().flatten().map(|v| CellValue::Int(v as i64)))
            .unwrap_or(CellValue::Null),

        ColumnType::Float4 => row
            .try_get::<f32, _>(idx)
            .ok()
            .flatten()
            .map(|v| CellValue::Float(v as f64))
            .unwrap_or(CellValue::Null),
        ColumnType::Float8 | ColumnType::Money | ColumnType::Money4 => row
            .try_get::<f64, _>(idx)
            .ok()
            .flatten()
            .map(CellValue::Float)
            .unwrap_or(CellValue::Null),
        ColumnType::Floatn => row
            .try_get::<f64, _>(idx)
            .ok()
            .flatten()
            .map(CellValue::Float)
            .or_else(|| row.try_get::<f32, _>(idx).ok().flatten().map(|v| CellValue::Float(v as f64)))
            .unwrap_or(CellValue::Null),

        ColumnType::Decimaln | ColumnType::Numericn => row
            .try_get::<tiberius::numeric::Numeric, _>(idx)
            .ok()
            .flatten()
            .map(|n| CellValue::Float(f64::from(n)))
            .unwrap_or(CellValue::Null),

        ColumnType::Bit | ColumnType::Bitn => row
            .try_get::<bool, _>(idx)
            .ok()
            .flatten()
            .map(CellValue::Bool)
            .unwrap_or(CellValue::Null),

        ColumnType::BigVarChar
        | ColumnType::BigChar
        | ColumnType::NVarchar
        | ColumnType::NChar
        | ColumnType::Text
        | ColumnType::NText => row
            .try_get::<&str, _>(idx)
            .ok()
            .flatten()
            .map(|s| CellValue::String(s.to_string()))
            .unwrap_or(CellValue::Null),

        ColumnType::Datetime
        | ColumnType::Datetime2
        | ColumnType::Datetimen
        | ColumnType::Datetime4 => row
            .try_get::<NaiveDateTime, _>(idx)
            .ok()
            .flatten()
            .map(|dt| CellValue::DateTime(dt.to_string()))
            .unwrap_or(CellValue::Null),
        ColumnType::DatetimeOffsetn => row
            .try_get::<DateTime<Utc>, _>(idx)
            .ok()
            .flatten()
            .map(|dt| CellValue::DateTime(dt.to_rfc3339()))
            .unwrap_or(CellValue::Null),
        ColumnType::Daten => row
            .try_get::<NaiveDate, _>(idx)
            .ok()
            .flatten()
            .map(|d| CellValue::DateTime(d.to_string()))
            .unwrap_or(CellValue::Null),
        ColumnType::Timen => row
            .try_get::<NaiveTime, _>(idx)
            .ok()
            .flatten()
            .map(|t| CellValue::DateTime(t.to_string()))
            .unwrap_or(CellValue::Null),

        ColumnType::BigVarBin | ColumnType::BigBinary | ColumnType::Image => row
            .try_get::<&[u8], _>(idx)
            .ok()
            .flatten()
            .map(|b| CellValue::Binary(b.to_vec()))
            .unwrap_or(CellValue::Null),

        ColumnType::Guid => row
            .try_get::<tiberius::Uuid, _>(idx)
            .ok()
            .flatten()
            .map(|u| CellValue::String(u.to_string()))
            .unwrap_or(CellValue::Null),

        _ => CellValue::Null,
    }
}
