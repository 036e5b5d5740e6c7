//! Table metadata lookups with time-bounded caching.
//!
//! Macros that omit their column argument need the owning table's primary
//! key; `$__adHocFilter()` needs the column names and types of its source.
//! Both are fetched from the live database through a [`Connection`] and kept
//! in independent [`TtlCache`]s shared by every interpolation that uses the
//! same provider.

use std::{sync::Arc, time::Duration};

use indexmap::IndexMap;
use tracing::debug;

use crate::{
    cache::TtlCache,
    connection::{Connection, cell_as_string},
    error::{AppResult, keys_not_found, primary_key_not_found},
    scope::Scope
};

/// Default lifetime of cached metadata
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Sorting key lookup, bound server-side.
pub const PRIMARY_KEY_QUERY: &str = "SELECT primary_key FROM system.tables WHERE database = {database:String} AND table = {table:String}";

/// Column name to ClickHouse type name, in table order.
pub type ColumnTypes = IndexMap<String, String>;

pub struct MetadataProvider<C> {
    connection:   C,
    primary_keys: TtlCache<String>,
    columns:      TtlCache<Arc<ColumnTypes>>
}

impl<C: Connection> MetadataProvider<C> {
    pub fn new(connection: C) -> Self {
        Self::with_ttl(connection, DEFAULT_TTL)
    }

    pub fn with_ttl(connection: C, ttl: Duration) -> Self {
        Self {
            connection,
            primary_keys: TtlCache::new(ttl),
            columns: TtlCache::new(ttl)
        }
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    /// Primary key column of `database.table`.
    ///
    /// An empty `database` means the connection's default database.
    pub async fn primary_key(&self, scope: &Scope, database: &str, table: &str) -> AppResult<String> {
        let database = if database.is_empty() {
            self.connection.default_database()
        } else {
            database
        };
        let cache_key = format!("{}_{}", database, table);
        if let Some(pk) = self.primary_keys.get(&cache_key) {
            debug!(key = %cache_key, "Primary key cache hit");
            return Ok(pk);
        }
        debug!(key = %cache_key, "Primary key cache miss");
        let pk = scope.run(self.query_primary_key(database, table)).await?;
        self.primary_keys.insert(cache_key, pk.clone());
        Ok(pk)
    }

    /// Column names and types of a FROM source (table expression or sub-select).
    pub async fn column_types(&self, scope: &Scope, cte: &str) -> AppResult<Arc<ColumnTypes>> {
        if let Some(columns) = self.columns.get(cte) {
            debug!(key = %cte, "Column cache hit");
            return Ok(columns);
        }
        debug!(key = %cte, "Column cache miss");
        let columns = Arc::new(scope.run(self.query_column_types(cte)).await?);
        self.columns.insert(cte, Arc::clone(&columns));
        Ok(columns)
    }

    /// Uncached primary key lookup
    pub async fn query_primary_key(&self, database: &str, table: &str) -> AppResult<String> {
        let result = self
            .connection
            .query(PRIMARY_KEY_QUERY, &[("database", database), ("table", table)])
            .await?;
        let cell = result
            .rows
            .first()
            .and_then(|row| row.first())
            .ok_or_else(primary_key_not_found)?;
        cell_as_string(cell)
    }

    /// Uncached column lookup through `DESCRIBE`
    pub async fn query_column_types(&self, cte: &str) -> AppResult<ColumnTypes> {
        let sql = if cte.to_uppercase().contains("SELECT") {
            format!("DESCRIBE ({})", cte)
        } else {
            format!("DESCRIBE {}", cte)
        };
        let result = self.connection.query(&sql, &[]).await?;
        if result.columns.len() < 2 {
            return Err(keys_not_found());
        }
        result
            .rows
            .iter()
            .map(|row| {
                let name = row.first().map_or(Ok(String::new()), cell_as_string)?;
                let type_name = row.get(1).map_or(Ok(String::new()), cell_as_string)?;
                Ok((name, type_name))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering}
    };

    use serde_json::{Value, json};

    use super::*;
    use crate::{
        connection::{Column, QueryResult},
        error::{database_error, error_message}
    };

    #[derive(Default)]
    struct Recorder {
        calls:   AtomicUsize,
        queries: Mutex<Vec<(String, Vec<(String, String)>)>>,
        result:  QueryResult
    }

    impl Connection for Recorder {
        async fn query(&self, sql: &str, params: &[(&str, &str)]) -> AppResult<QueryResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Ok(mut queries) = self.queries.lock() {
                queries.push((
                    sql.to_string(),
                    params.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
                ));
            }
            Ok(self.result.clone())
        }

        fn default_database(&self) -> &str {
            "default"
        }
    }

    fn column(name: &str) -> Column {
        Column {
            name:      name.into(),
            type_name: "String".into()
        }
    }

    fn recorder(columns: &[&str], rows: Vec<Vec<Value>>) -> Recorder {
        Recorder {
            result: QueryResult::new(columns.iter().map(|c| column(c)).collect(), rows),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_primary_key_binds_parameters() {
        let provider = MetadataProvider::new(recorder(&["primary_key"], vec![vec![json!("id")]]));
        let pk = provider.primary_key(&Scope::unbounded(), "db1", "tbl1").await.unwrap();
        assert_eq!(pk, "id");
        let queries = provider.connection().queries.lock().unwrap();
        assert_eq!(queries[0].0, PRIMARY_KEY_QUERY);
        assert_eq!(
            queries[0].1,
            vec![
                ("database".to_string(), "db1".to_string()),
                ("table".to_string(), "tbl1".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_primary_key_default_database() {
        let provider = MetadataProvider::new(recorder(&["primary_key"], vec![vec![json!("ts")]]));
        provider.primary_key(&Scope::unbounded(), "", "logs").await.unwrap();
        let queries = provider.connection().queries.lock().unwrap();
        assert_eq!(queries[0].1[0].1, "default");
    }

    #[tokio::test]
    async fn test_primary_key_cached() {
        let provider = MetadataProvider::new(recorder(&["primary_key"], vec![vec![json!("id")]]));
        let scope = Scope::unbounded();
        provider.primary_key(&scope, "db1", "tbl1").await.unwrap();
        provider.primary_key(&scope, "db1", "tbl1").await.unwrap();
        assert_eq!(provider.connection().calls.load(Ordering::SeqCst), 1);
        provider.primary_key(&scope, "db1", "tbl2").await.unwrap();
        assert_eq!(provider.connection().calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_primary_key_expired_entry_requeried() {
        let provider = MetadataProvider::with_ttl(
            recorder(&["primary_key"], vec![vec![json!("id")]]),
            Duration::ZERO
        );
        let scope = Scope::unbounded();
        provider.primary_key(&scope, "db1", "tbl1").await.unwrap();
        provider.primary_key(&scope, "db1", "tbl1").await.unwrap();
        assert_eq!(provider.connection().calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_primary_key_not_found() {
        let provider = MetadataProvider::new(recorder(&["primary_key"], vec![]));
        let err = provider.primary_key(&Scope::unbounded(), "db2", "tbl2").await.unwrap_err();
        assert_eq!(error_message(&err), "primary key not found");
    }

    #[tokio::test]
    async fn test_primary_key_null_reads_empty() {
        let provider = MetadataProvider::new(recorder(&["primary_key"], vec![vec![Value::Null]]));
        let pk = provider.primary_key(&Scope::unbounded(), "db", "t").await.unwrap();
        assert_eq!(pk, "");
    }

    #[tokio::test]
    async fn test_primary_key_invalid_type() {
        let provider = MetadataProvider::new(recorder(&["primary_key"], vec![vec![json!(1)]]));
        let err = provider.primary_key(&Scope::unbounded(), "db", "t").await.unwrap_err();
        assert_eq!(error_message(&err), "invalid type");
    }

    #[tokio::test]
    async fn test_column_types_describe_table() {
        let provider = MetadataProvider::new(recorder(
            &["name", "type", "default_type"],
            vec![
                vec![json!("ts"), json!("DateTime"), json!("")],
                vec![json!("host"), json!("String"), json!("")]
            ]
        ));
        let columns = provider.column_types(&Scope::unbounded(), "akamai.logs").await.unwrap();
        assert_eq!(columns.get("host").map(String::as_str), Some("String"));
        assert_eq!(columns.keys().next().map(String::as_str), Some("ts"));
        let queries = provider.connection().queries.lock().unwrap();
        assert_eq!(queries[0].0, "DESCRIBE akamai.logs");
    }

    #[tokio::test]
    async fn test_column_types_wraps_sub_select() {
        let provider = MetadataProvider::new(recorder(&["name", "type"], vec![]));
        provider
            .column_types(&Scope::unbounded(), "(select * from t)")
            .await
            .unwrap();
        let queries = provider.connection().queries.lock().unwrap();
        assert_eq!(queries[0].0, "DESCRIBE ((select * from t))");
    }

    #[tokio::test]
    async fn test_column_types_cached_by_text() {
        let provider = MetadataProvider::new(recorder(&["name", "type"], vec![]));
        let scope = Scope::unbounded();
        provider.column_types(&scope, "logs").await.unwrap();
        provider.column_types(&scope, "logs").await.unwrap();
        provider.column_types(&scope, "logs AS l").await.unwrap();
        assert_eq!(provider.connection().calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_column_types_need_two_columns() {
        let provider = MetadataProvider::new(recorder(&["name"], vec![vec![json!("ts")]]));
        let err = provider.column_types(&Scope::unbounded(), "logs").await.unwrap_err();
        assert_eq!(error_message(&err), "adHocFilter keys not found");
    }

    struct Failing;

    impl Connection for Failing {
        async fn query(&self, _sql: &str, _params: &[(&str, &str)]) -> AppResult<QueryResult> {
            Err(database_error("boom"))
        }

        fn default_database(&self) -> &str {
            "default"
        }
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let provider = MetadataProvider::new(Failing);
        assert!(provider.primary_key(&Scope::unbounded(), "db", "t").await.is_err());
        assert!(provider.primary_keys.is_empty());
    }
}
