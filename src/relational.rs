//! Relational store adapter.
//!
//! [`RelationalStore`] is the capability the ingestion job and the SQL agent
//! need from the database: run a statement, read rows, and introspect the
//! schema. [`PgRelationalStore`] implements it for PostgreSQL by holding a
//! connection string and opening a fresh connection for every call; it is
//! not a pool owner.
//!
//! Rows are read as `row_to_json(..)::text`, so any column type renders
//! without per-type decoding. The JSON object is decoded entry by entry:
//! columns stay in select order and a repeated name (`e.name, d.name`)
//! keeps both values.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use sqlx::{Connection, PgConnection};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::connection::ConnectionConfig;
use crate::models::Row;

/// Returned by [`execute_statement`] when the statement succeeds.
pub const EXECUTE_SUCCESS: &str = "Query executed successfully!";
/// Prefix of every [`execute_statement`] failure message.
pub const EXECUTE_ERROR_PREFIX: &str = "Error executing query:";

/// Sample rows appended to [`RelationalStore::describe_table`] output.
pub const DEFAULT_SAMPLE_ROWS: usize = 3;

#[async_trait]
pub trait RelationalStore: Send + Sync {
    /// SQL dialect name given to the agent (e.g. `"postgresql"`).
    fn dialect(&self) -> &str;

    /// Run one statement and commit. Returns rows affected.
    async fn execute(&self, sql: &str) -> Result<u64>;

    /// Run a row-returning statement.
    async fn query_rows(&self, sql: &str) -> Result<Vec<Row>>;

    /// User tables, sorted by name.
    async fn list_tables(&self) -> Result<Vec<String>>;

    /// `CREATE TABLE` rendering of a table followed by a few sample rows.
    async fn describe_table(&self, table: &str, sample_rows: usize) -> Result<String>;
}

/// Typed outcome of an operator-issued statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecuteOutcome {
    Ok { rows_affected: u64 },
    Err { message: String },
}

impl ExecuteOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }

    /// The user-facing line for this outcome.
    pub fn message(&self) -> String {
        match self {
            Self::Ok { .. } => EXECUTE_SUCCESS.to_string(),
            Self::Err { message } => format!("{} {}", EXECUTE_ERROR_PREFIX, message),
        }
    }
}

/// Run an operator statement (CREATE / ALTER) and capture the outcome.
pub async fn execute_outcome(store: &dyn RelationalStore, sql: &str) -> ExecuteOutcome {
    match store.execute(sql).await {
        Ok(rows_affected) => ExecuteOutcome::Ok { rows_affected },
        Err(e) => {
            tracing::warn!(error = %format!("{:#}", e), "operator statement failed");
            ExecuteOutcome::Err {
                message: format!("{:#}", e),
            }
        }
    }
}

/// Run an operator statement and return a success or error line. Never fails.
pub async fn execute_statement(store: &dyn RelationalStore, sql: &str) -> String {
    execute_outcome(store, sql).await.message()
}

/// Quote an identifier for interpolation (`orders` → `"orders"`).
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Render a column value the way rows are shown to people and the agent.
///
/// Strings are shown raw, NULL as `None`, everything else as JSON text.
pub fn render_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => "None".to_string(),
        other => other.to_string(),
    }
}

/// Tab-separated rendering of rows with a header line.
pub fn render_rows(rows: &[Row]) -> String {
    let Some(first) = rows.first() else {
        return String::new();
    };
    let mut out = first
        .iter()
        .map(|(col, _)| col.as_str())
        .collect::<Vec<_>>()
        .join("\t");
    for row in rows {
        out.push('\n');
        out.push_str(
            &row.iter()
                .map(|(_, v)| render_value(v))
                .collect::<Vec<_>>()
                .join("\t"),
        );
    }
    out
}

fn strip_terminator(sql: &str) -> &str {
    sql.trim().trim_end_matches(';').trim_end()
}

/// Wrap a row-returning statement so each row comes back as JSON text.
///
/// The statement sits on its own lines so a trailing `-- comment` cannot
/// swallow the closing parenthesis.
fn wrap_row_query(sql: &str) -> String {
    format!(
        "SELECT row_to_json(q)::text FROM (\n{}\n) AS q",
        strip_terminator(sql)
    )
}

/// A JSON object decoded as an ordered list of entries, duplicates kept.
struct Columns(Row);

impl<'de> Deserialize<'de> for Columns {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ColumnsVisitor;

        impl<'de> Visitor<'de> for ColumnsVisitor {
            type Value = Columns;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a JSON object")
            }

            fn visit_map<A>(self, mut map: A) -> std::result::Result<Columns, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut row = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(entry) = map.next_entry::<String, serde_json::Value>()? {
                    row.push(entry);
                }
                Ok(Columns(row))
            }
        }

        deserializer.deserialize_map(ColumnsVisitor)
    }
}

fn parse_row(json: &str) -> Result<Row> {
    let Columns(row) =
        serde_json::from_str(json).context("row_to_json returned invalid JSON")?;
    Ok(row)
}

/// PostgreSQL adapter. Holds a connection string only.
pub struct PgRelationalStore {
    url: String,
    display: String,
}

impl PgRelationalStore {
    pub fn from_connection(conn: &ConnectionConfig) -> Self {
        Self {
            url: conn.connection_string(),
            display: conn.redacted(),
        }
    }

    async fn connect(&self) -> Result<PgConnection> {
        PgConnection::connect(&self.url)
            .await
            .with_context(|| format!("failed to connect to {}", self.display))
    }
}

#[async_trait]
impl RelationalStore for PgRelationalStore {
    fn dialect(&self) -> &str {
        "postgresql"
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        let mut conn = self.connect().await?;
        // Simple-query protocol: DDL and multi-statement text run as one implicit transaction.
        let result = sqlx::Executor::execute(&mut conn, sqlx::raw_sql(sql)).await;
        conn.close().await.ok();
        let rows = result?.rows_affected();
        tracing::debug!(rows, "statement executed");
        Ok(rows)
    }

    async fn query_rows(&self, sql: &str) -> Result<Vec<Row>> {
        let wrapped = wrap_row_query(sql);
        let mut conn = self.connect().await?;
        let result: std::result::Result<Vec<String>, sqlx::Error> =
            sqlx::query_scalar(&wrapped).fetch_all(&mut conn).await;
        conn.close().await.ok();
        result?.iter().map(|json| parse_row(json)).collect()
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        let mut conn = self.connect().await?;
        let result: std::result::Result<Vec<String>, sqlx::Error> = sqlx::query_scalar(
            "SELECT table_name::text FROM information_schema.tables \
             WHERE table_schema = 'public' AND table_type = 'BASE TABLE' \
             ORDER BY table_name",
        )
        .fetch_all(&mut conn)
        .await;
        conn.close().await.ok();
        Ok(result?)
    }

    async fn describe_table(&self, table: &str, sample_rows: usize) -> Result<String> {
        let mut conn = self.connect().await?;
        let columns: std::result::Result<Vec<(String, String, String)>, sqlx::Error> =
            sqlx::query_as(
                "SELECT column_name::text, data_type::text, is_nullable::text \
                 FROM information_schema.columns \
                 WHERE table_schema = 'public' AND table_name = $1 \
                 ORDER BY ordinal_position",
            )
            .bind(table)
            .fetch_all(&mut conn)
            .await;
        conn.close().await.ok();
        let columns = columns?;

        if columns.is_empty() {
            bail!("table not found: {}", table);
        }

        let samples = if sample_rows > 0 {
            self.query_rows(&format!(
                "SELECT * FROM {} LIMIT {}",
                quote_ident(table),
                sample_rows
            ))
            .await?
        } else {
            Vec::new()
        };

        Ok(render_table_description(table, &columns, &samples))
    }
}

/// Render columns as `CREATE TABLE` plus a commented block of sample rows.
pub fn render_table_description(
    table: &str,
    columns: &[(String, String, String)],
    samples: &[Row],
) -> String {
    let cols = columns
        .iter()
        .map(|(name, data_type, nullable)| {
            if nullable == "NO" {
                format!("\t{} {} NOT NULL", name, data_type)
            } else {
                format!("\t{} {}", name, data_type)
            }
        })
        .collect::<Vec<_>>()
        .join(",\n");

    let mut out = format!("CREATE TABLE {} (\n{}\n)", table, cols);
    if !samples.is_empty() {
        out.push_str(&format!(
            "\n\n/*\n{} rows from {} table:\n{}\n*/",
            samples.len(),
            table,
            render_rows(samples)
        ));
    }
    out
}

pub type AdapterFactory = Box<dyn Fn(&ConnectionConfig) -> Arc<dyn RelationalStore> + Send + Sync>;

/// Reuses adapters per connection string for a bounded time window.
///
/// Only configuration is cached; adapters still open a connection per call.
/// Expired entries are dropped on every lookup.
pub struct AdapterCache {
    ttl: Duration,
    factory: AdapterFactory,
    entries: Mutex<HashMap<String, (Instant, Arc<dyn RelationalStore>)>>,
}

impl AdapterCache {
    pub fn new(ttl: Duration, factory: AdapterFactory) -> Self {
        Self {
            ttl,
            factory,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Cache of [`PgRelationalStore`] adapters.
    pub fn postgres(ttl: Duration) -> Self {
        Self::new(
            ttl,
            Box::new(|conn: &ConnectionConfig| {
                Arc::new(PgRelationalStore::from_connection(conn)) as Arc<dyn RelationalStore>
            }),
        )
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn get(&self, conn: &ConnectionConfig) -> Arc<dyn RelationalStore> {
        let key = conn.connection_string();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.retain(|_, (created, _)| created.elapsed() < self.ttl);
        if let Some((_, adapter)) = entries.get(&key) {
            return adapter.clone();
        }
        tracing::debug!(db = %conn.redacted(), "building relational adapter");
        let adapter = (self.factory)(conn);
        entries.insert(key, (Instant::now(), adapter.clone()));
        adapter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NullStore;

    #[async_trait]
    impl RelationalStore for NullStore {
        fn dialect(&self) -> &str {
            "postgresql"
        }
        async fn execute(&self, sql: &str) -> Result<u64> {
            if sql.starts_with("CREATE") {
                Ok(0)
            } else {
                bail!("syntax error at or near \"{}\"", sql)
            }
        }
        async fn query_rows(&self, _sql: &str) -> Result<Vec<Row>> {
            Ok(Vec::new())
        }
        async fn list_tables(&self) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
        async fn describe_table(&self, table: &str, _sample_rows: usize) -> Result<String> {
            bail!("table not found: {}", table)
        }
    }

    #[tokio::test]
    async fn execute_statement_reports_success() {
        let msg = execute_statement(&NullStore, "CREATE TABLE t (id int)").await;
        assert_eq!(msg, EXECUTE_SUCCESS);
    }

    #[tokio::test]
    async fn execute_statement_swallows_errors() {
        let msg = execute_statement(&NullStore, "CRATE TABEL").await;
        assert!(msg.starts_with(EXECUTE_ERROR_PREFIX), "got: {}", msg);
        assert!(msg.contains("syntax error"));
    }

    #[test]
    fn quote_ident_doubles_quotes() {
        assert_eq!(quote_ident("orders"), "\"orders\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn render_value_shapes() {
        assert_eq!(render_value(&json!("Widget")), "Widget");
        assert_eq!(render_value(&json!(null)), "None");
        assert_eq!(render_value(&json!(42)), "42");
        assert_eq!(render_value(&json!(19.99)), "19.99");
        assert_eq!(render_value(&json!(true)), "true");
    }

    #[test]
    fn parse_row_keeps_column_order() {
        let row = parse_row(r#"{"zeta": 1, "alpha": "a", "mid": null}"#).unwrap();
        let cols: Vec<&str> = row.iter().map(|(c, _)| c.as_str()).collect();
        assert_eq!(cols, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn parse_row_keeps_repeated_column_names() {
        let row = parse_row(r#"{"name":"Ann","name":"Sales"}"#).unwrap();
        assert_eq!(
            row,
            vec![
                ("name".to_string(), json!("Ann")),
                ("name".to_string(), json!("Sales")),
            ]
        );
        assert_eq!(render_rows(&[row]), "name\tname\nAnn\tSales");
    }

    #[test]
    fn parse_row_rejects_non_objects() {
        assert!(parse_row("[1, 2]").is_err());
    }

    #[test]
    fn strip_terminator_removes_trailing_semicolons() {
        assert_eq!(strip_terminator("  SELECT 1 ;; \n"), "SELECT 1");
    }

    #[test]
    fn trailing_comment_stays_inside_wrapper() {
        let wrapped = wrap_row_query("SELECT price FROM products ORDER BY price DESC -- top price");
        assert_eq!(
            wrapped,
            "SELECT row_to_json(q)::text FROM (\nSELECT price FROM products ORDER BY price DESC -- top price\n) AS q"
        );
        let last_line = wrapped.lines().last().unwrap();
        assert_eq!(last_line, ") AS q");
    }

    #[test]
    fn table_description_includes_samples() {
        let columns = vec![
            ("id".to_string(), "integer".to_string(), "NO".to_string()),
            ("name".to_string(), "text".to_string(), "YES".to_string()),
        ];
        let samples = vec![vec![
            ("id".to_string(), json!(1)),
            ("name".to_string(), json!("Widget")),
        ]];
        let out = render_table_description("products", &columns, &samples);
        assert!(out.starts_with("CREATE TABLE products (\n\tid integer NOT NULL,\n\tname text\n)"));
        assert!(out.contains("1 rows from products table:\nid\tname\n1\tWidget"));
    }

    #[test]
    fn adapter_cache_reuses_until_ttl() {
        let built = Arc::new(AtomicUsize::new(0));
        let counter = built.clone();
        let cache = AdapterCache::new(
            Duration::from_secs(3600),
            Box::new(move |_: &ConnectionConfig| {
                counter.fetch_add(1, Ordering::SeqCst);
                Arc::new(NullStore) as Arc<dyn RelationalStore>
            }),
        );
        let conn = ConnectionConfig::default();
        cache.get(&conn);
        cache.get(&conn);
        assert_eq!(built.load(Ordering::SeqCst), 1);

        let other = ConnectionConfig {
            database: "sales".to_string(),
            ..ConnectionConfig::default()
        };
        cache.get(&other);
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn adapter_cache_rebuilds_after_expiry() {
        let built = Arc::new(AtomicUsize::new(0));
        let counter = built.clone();
        let cache = AdapterCache::new(
            Duration::ZERO,
            Box::new(move |_: &ConnectionConfig| {
                counter.fetch_add(1, Ordering::SeqCst);
                Arc::new(NullStore) as Arc<dyn RelationalStore>
            }),
        );
        let conn = ConnectionConfig::default();
        cache.get(&conn);
        cache.get(&conn);
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn adapter_cache_drops_expired_entries_for_other_connections() {
        let cache = AdapterCache::new(
            Duration::from_millis(20),
            Box::new(|_: &ConnectionConfig| Arc::new(NullStore) as Arc<dyn RelationalStore>),
        );
        for db in ["a", "b", "c"] {
            cache.get(&ConnectionConfig {
                database: db.to_string(),
                ..ConnectionConfig::default()
            });
        }
        assert_eq!(cache.len(), 3);

        std::thread::sleep(Duration::from_millis(50));
        cache.get(&ConnectionConfig::default());
        assert_eq!(cache.len(), 1);
    }
}
