//! DuckDB store implementation
//!
//! Provides an embedded analytical database, file-backed or in-memory.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

use chrono::{DateTime, NaiveDate};
use tracing::debug;

use super::{AnalyticsStore, DatabaseError, DatabaseResult, QueryResult};

/// DuckDB backed analytics store
///
/// Keeps the connection that opened the database plus a pool of idle
/// connections cloned from it. Each operation checks out its own connection,
/// so partitions populating on different worker threads do not serialize on
/// a single lock.
pub struct DuckDbStore {
    /// Path to the database file (None for in-memory)
    db_path: Option<PathBuf>,
    /// Connection that opened the database, used to clone new connections
    primary: Mutex<duckdb::Connection>,
    /// Connections returned after use
    idle: Mutex<Vec<duckdb::Connection>>,
}

impl DuckDbStore {
    /// Open (or create) a file-based database
    pub fn new(db_path: impl AsRef<Path>) -> DatabaseResult<Self> {
        let path = db_path.as_ref().to_path_buf();
        let connection = duckdb::Connection::open(&path).map_err(|e| {
            DatabaseError::ConnectionFailed(format!("Failed to open DuckDB: {}", e))
        })?;

        Ok(Self {
            db_path: Some(path),
            primary: Mutex::new(connection),
            idle: Mutex::new(Vec::new()),
        })
    }

    /// Create an in-memory database
    ///
    /// Cloned connections share the same in-memory database.
    pub fn in_memory() -> DatabaseResult<Self> {
        let connection = duckdb::Connection::open_in_memory().map_err(|e| {
            DatabaseError::ConnectionFailed(format!("Failed to create in-memory DuckDB: {}", e))
        })?;

        Ok(Self {
            db_path: None,
            primary: Mutex::new(connection),
            idle: Mutex::new(Vec::new()),
        })
    }

    /// Get the database file path (None for in-memory)
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Check if this is an in-memory database
    pub fn is_in_memory(&self) -> bool {
        self.db_path.is_none()
    }

    /// Run `f` on a connection checked out of the pool
    fn with_connection<T>(
        &self,
        f: impl FnOnce(&mut duckdb::Connection) -> DatabaseResult<T>,
    ) -> DatabaseResult<T> {
        let pooled = self
            .idle
            .lock()
            .map_err(|e| DatabaseError::ConnectionFailed(format!("Lock error: {}", e)))?
            .pop();

        let mut conn = match pooled {
            Some(conn) => conn,
            None => {
                let primary = self
                    .primary
                    .lock()
                    .map_err(|e| DatabaseError::ConnectionFailed(format!("Lock error: {}", e)))?;
                primary.try_clone().map_err(|e| {
                    DatabaseError::ConnectionFailed(format!("Failed to clone connection: {}", e))
                })?
            }
        };

        let result = f(&mut conn);

        if let Ok(mut idle) = self.idle.lock() {
            idle.push(conn);
        }

        result
    }

    /// Convert a DuckDB row to a JSON value
    fn row_to_json(row: &duckdb::Row, columns: &[String]) -> serde_json::Value {
        let mut map = serde_json::Map::new();

        for (i, col_name) in columns.iter().enumerate() {
            let value = match row.get_ref(i) {
                Ok(value_ref) => Self::value_ref_to_json(value_ref),
                Err(_) => serde_json::Value::Null,
            };
            map.insert(col_name.clone(), value);
        }

        serde_json::Value::Object(map)
    }

    /// Convert a DuckDB ValueRef to a JSON value
    fn value_ref_to_json(value: duckdb::types::ValueRef) -> serde_json::Value {
        use duckdb::types::{TimeUnit, ValueRef};

        match value {
            ValueRef::Null => serde_json::Value::Null,
            ValueRef::Boolean(b) => serde_json::Value::Bool(b),
            ValueRef::TinyInt(i) => serde_json::Value::Number(i.into()),
            ValueRef::SmallInt(i) => serde_json::Value::Number(i.into()),
            ValueRef::Int(i) => serde_json::Value::Number(i.into()),
            ValueRef::BigInt(i) => serde_json::Value::Number(i.into()),
            ValueRef::HugeInt(i) => serde_json::Value::String(i.to_string()),
            ValueRef::UTinyInt(i) => serde_json::Value::Number(i.into()),
            ValueRef::USmallInt(i) => serde_json::Value::Number(i.into()),
            ValueRef::UInt(i) => serde_json::Value::Number(i.into()),
            ValueRef::UBigInt(i) => serde_json::Value::Number(i.into()),
            ValueRef::Float(f) => serde_json::Number::from_f64(f as f64)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            ValueRef::Double(f) => serde_json::Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            ValueRef::Text(bytes) => String::from_utf8_lossy(bytes).into_owned().into(),
            ValueRef::Blob(bytes) => {
                use base64::Engine;
                serde_json::Value::String(base64::engine::general_purpose::STANDARD.encode(bytes))
            }
            ValueRef::Timestamp(unit, t) => {
                let micros = match unit {
                    TimeUnit::Second => t.saturating_mul(1_000_000),
                    TimeUnit::Millisecond => t.saturating_mul(1_000),
                    TimeUnit::Microsecond => t,
                    TimeUnit::Nanosecond => t / 1_000,
                };
                DateTime::from_timestamp_micros(micros)
                    .map(|ts| serde_json::Value::String(crate::table::sql::long_date_string(&ts)))
                    .unwrap_or(serde_json::Value::Null)
            }
            ValueRef::Date32(days) => NaiveDate::from_ymd_opt(1970, 1, 1)
                .and_then(|epoch| epoch.checked_add_signed(chrono::Duration::days(days as i64)))
                .map(|d| serde_json::Value::String(crate::table::sql::medium_date_string(&d)))
                .unwrap_or(serde_json::Value::Null),
            ValueRef::Time64(_, _) => serde_json::Value::String(format!("{:?}", value)),
            ValueRef::Interval { .. } => serde_json::Value::String(format!("{:?}", value)),
            ValueRef::List(_, _) => serde_json::Value::String(format!("{:?}", value)),
            ValueRef::Enum(_, _) => serde_json::Value::String(format!("{:?}", value)),
            ValueRef::Struct(_, _) => serde_json::Value::String(format!("{:?}", value)),
            ValueRef::Map(_, _) => serde_json::Value::String(format!("{:?}", value)),
            ValueRef::Union(_, _) => serde_json::Value::String(format!("{:?}", value)),
            ValueRef::Array(_, _) => serde_json::Value::String(format!("{:?}", value)),
            ValueRef::Decimal(d) => serde_json::Value::String(d.to_string()),
        }
    }
}

impl AnalyticsStore for DuckDbStore {
    fn execute(&self, sql: &str) -> DatabaseResult<usize> {
        self.with_connection(|conn| {
            conn.execute(sql, [])
                .map_err(|e| DatabaseError::QueryFailed(format!("Execute failed: {}", e)))
        })
    }

    fn execute_batch(&self, sql: &str) -> DatabaseResult<()> {
        self.with_connection(|conn| {
            conn.execute_batch(sql)
                .map_err(|e| DatabaseError::QueryFailed(format!("Batch execute failed: {}", e)))
        })
    }

    fn execute_in_transaction(&self, statements: &[String]) -> DatabaseResult<usize> {
        self.with_connection(|conn| {
            let tx = conn.transaction().map_err(|e| {
                DatabaseError::TransactionFailed(format!("Failed to begin transaction: {}", e))
            })?;

            let mut affected = 0;
            for sql in statements {
                debug!(sql = %sql, "executing in transaction");
                affected += tx
                    .execute(sql, [])
                    .map_err(|e| DatabaseError::QueryFailed(format!("Execute failed: {}", e)))?;
            }

            tx.commit().map_err(|e| {
                DatabaseError::TransactionFailed(format!("Failed to commit transaction: {}", e))
            })?;

            Ok(affected)
        })
    }

    fn query(&self, sql: &str) -> DatabaseResult<QueryResult> {
        let start = Instant::now();

        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(sql)
                .map_err(|e| DatabaseError::QueryFailed(format!("Prepare failed: {}", e)))?;

            // Column metadata is only available once the statement has run
            let mut result_rows = stmt
                .query([])
                .map_err(|e| DatabaseError::QueryFailed(format!("Query failed: {}", e)))?;

            let column_count = result_rows.as_ref().map(|r| r.column_count()).unwrap_or(0);
            let columns: Vec<String> = (0..column_count)
                .map(|i| {
                    result_rows
                        .as_ref()
                        .and_then(|r| r.column_name(i).ok())
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| format!("col{}", i))
                })
                .collect();

            let mut rows = Vec::new();
            while let Some(row) = result_rows
                .next()
                .map_err(|e| DatabaseError::QueryFailed(format!("Row fetch error: {}", e)))?
            {
                rows.push(Self::row_to_json(row, &columns));
            }

            Ok(QueryResult {
                columns,
                rows,
                execution_time_ms: start.elapsed().as_millis() as u64,
            })
        })
    }

    fn backend_type(&self) -> &'static str {
        "duckdb"
    }
}
