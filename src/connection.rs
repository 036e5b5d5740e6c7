//! Database connection used for metadata introspection.
//!
//! [`Connection`] is the seam between the metadata provider and the database.
//! [`HttpConnection`] talks to the ClickHouse HTTP interface; parameters are
//! bound server-side through `{name:Type}` placeholders and sent as
//! `param_<name>` query arguments, so identifiers are never spliced into SQL.
//!
//! # Retry Behavior
//!
//! Transient failures are retried with exponential backoff:
//! - Connection failures and timeouts
//! - Rate limiting (429)
//! - Server errors (5xx)
//!
//! # Example
//!
//! ```
//! use chmacro::{
//!     config::{DataSourceConfig, RetryConfig},
//!     connection::{Connection, HttpConnection}
//! };
//!
//! let settings = DataSourceConfig {
//!     url: Some("http://localhost:8123".into()),
//!     ..Default::default()
//! };
//! let connection = HttpConnection::new(&settings, RetryConfig::default()).unwrap();
//! assert_eq!(connection.default_database(), "default");
//! ```

use std::{future::Future, time::Duration};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::sleep;
use tracing::warn;

use crate::{
    config::{Config, DataSourceConfig, RetryConfig},
    error::{AppError, AppResult, config_error, database_error, error_message, http_error}
};

/// Column description as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name:      String,
    #[serde(rename = "type")]
    pub type_name: String
}

/// Tabular query result in `JSONCompact` shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    #[serde(rename = "meta", default)]
    pub columns: Vec<Column>,
    #[serde(rename = "data", default)]
    pub rows:    Vec<Vec<Value>>
}

impl QueryResult {
    pub fn new(columns: Vec<Column>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            columns,
            rows
        }
    }
}

/// Read a result cell as text.
///
/// `null` reads as the empty string; numbers, arrays and objects are rejected.
pub fn cell_as_string(value: &Value) -> AppResult<String> {
    match value {
        Value::String(text) => Ok(text.clone()),
        Value::Null => Ok(String::new()),
        _ => Err(database_error("invalid type"))
    }
}

/// Something that can run a parameterised query.
pub trait Connection: Send + Sync {
    /// Run `sql` with server-side bound `params`
    fn query(
        &self,
        sql: &str,
        params: &[(&str, &str)]
    ) -> impl Future<Output = AppResult<QueryResult>> + Send;

    /// Database used when a query does not name one
    fn default_database(&self) -> &str;
}

/// ClickHouse HTTP interface client with retry support.
pub struct HttpConnection {
    client:   reqwest::Client,
    url:      String,
    database: String,
    user:     Option<String>,
    password: Option<String>,
    retry:    RetryConfig
}

impl HttpConnection {
    pub fn new(settings: &DataSourceConfig, retry: RetryConfig) -> AppResult<Self> {
        Self::with_timeout(settings, retry, Duration::from_secs(30))
    }

    pub fn with_timeout(
        settings: &DataSourceConfig,
        retry: RetryConfig,
        timeout: Duration
    ) -> AppResult<Self> {
        let url = settings
            .url
            .clone()
            .ok_or_else(|| config_error("datasource.url is not configured"))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Ok(Self {
            client,
            url,
            database: settings.default_database.clone(),
            user: settings.user.clone(),
            password: settings.password.clone(),
            retry
        })
    }

    async fn execute(&self, sql: &str, params: &[(&str, &str)]) -> AppResult<QueryResult> {
        let mut arguments = vec![
            (String::from("database"), self.database.as_str()),
            (String::from("default_format"), "JSONCompact")
        ];
        arguments.extend(params.iter().map(|(name, value)| (format!("param_{}", name), *value)));

        let mut request = self
            .client
            .post(&self.url)
            .query(&arguments)
            .body(sql.to_string());
        if let Some(user) = &self.user {
            request = request.header("X-ClickHouse-User", user);
        }
        if let Some(password) = &self.password {
            request = request.header("X-ClickHouse-Key", password);
        }

        let response = request.send().await.map_err(http_error)?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(database_error(format!(
                "HTTP error {}: {}",
                status.as_u16(),
                text.trim()
            )));
        }
        response.json().await.map_err(http_error)
    }
}

impl Connection for HttpConnection {
    async fn query(&self, sql: &str, params: &[(&str, &str)]) -> AppResult<QueryResult> {
        let mut last_error = None;
        let mut delay = self.retry.initial_delay_ms;
        for attempt in 0..=self.retry.max_retries {
            if attempt > 0 {
                warn!(
                    attempt = attempt + 1,
                    max_attempts = self.retry.max_retries + 1,
                    delay_ms = delay,
                    "Retrying ClickHouse request"
                );
                sleep(Duration::from_millis(delay)).await;
                delay = self.retry.next_delay(delay);
            }
            match self.execute(sql, params).await {
                Ok(result) => return Ok(result),
                Err(e) if is_retryable_error(&e) => last_error = Some(e),
                Err(e) => return Err(e)
            }
        }
        Err(last_error.unwrap_or_else(|| database_error("All retry attempts failed")))
    }

    fn default_database(&self) -> &str {
        &self.database
    }
}

/// Connection for setups without a database: every query fails.
pub struct OfflineConnection {
    database: String
}

impl OfflineConnection {
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into()
        }
    }
}

impl Connection for OfflineConnection {
    async fn query(&self, _sql: &str, _params: &[(&str, &str)]) -> AppResult<QueryResult> {
        Err(database_error(
            "no datasource configured (set datasource.url or CLICKHOUSE_URL)"
        ))
    }

    fn default_database(&self) -> &str {
        &self.database
    }
}

/// Connection chosen from configuration.
pub enum ConfiguredConnection {
    Http(HttpConnection),
    Offline(OfflineConnection)
}

impl ConfiguredConnection {
    pub fn from_config(config: &Config) -> AppResult<Self> {
        if config.datasource.url.is_none() {
            return Ok(Self::Offline(OfflineConnection::new(
                config.datasource.default_database.clone()
            )));
        }
        HttpConnection::with_timeout(
            &config.datasource,
            config.retry.clone(),
            config.query.timeout()
        )
        .map(Self::Http)
    }

    pub fn is_offline(&self) -> bool {
        matches!(self, Self::Offline(_))
    }
}

impl Connection for ConfiguredConnection {
    async fn query(&self, sql: &str, params: &[(&str, &str)]) -> AppResult<QueryResult> {
        match self {
            Self::Http(connection) => connection.query(sql, params).await,
            Self::Offline(connection) => connection.query(sql, params).await
        }
    }

    fn default_database(&self) -> &str {
        match self {
            Self::Http(connection) => connection.default_database(),
            Self::Offline(connection) => connection.default_database()
        }
    }
}

fn is_retryable_error(error: &AppError) -> bool {
    let msg = error_message(error);
    msg.starts_with("Request timeout")
        || msg.starts_with("Connection failed")
        || msg.starts_with("HTTP error 429")
        || msg.starts_with("HTTP error 5")
}
