//! Update watermarks per analytics table type
//!
//! A watermark records the cutoff of the last successful build. Full
//! rebuilds and incremental builds are tracked separately; an incremental
//! build picks up changes from the later of the two.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{AnalyticsStore, DatabaseError, DatabaseResult};
use crate::table::AnalyticsTableType;
use crate::table::sql::{LONG_DATE_FORMAT, escape_literal, long_date_string};

/// Persisted watermarks of one table type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableState {
    pub table_type: AnalyticsTableType,
    pub last_full_update: Option<DateTime<Utc>>,
    pub last_latest_update: Option<DateTime<Utc>>,
}

impl TableState {
    /// State of a table type that was never built
    pub fn empty(table_type: AnalyticsTableType) -> Self {
        Self {
            table_type,
            last_full_update: None,
            last_latest_update: None,
        }
    }

    /// Start of the next incremental window
    ///
    /// `None` until a full update has completed.
    pub fn latest_watermark(&self) -> Option<DateTime<Utc>> {
        let full = self.last_full_update?;
        Some(match self.last_latest_update {
            Some(latest) if latest > full => latest,
            _ => full,
        })
    }
}

/// Reads and advances watermarks in `analytics_table_state`
pub struct StateRepository<'a> {
    store: &'a dyn AnalyticsStore,
}

impl<'a> StateRepository<'a> {
    pub fn new(store: &'a dyn AnalyticsStore) -> Self {
        Self { store }
    }

    /// Load the state of one table type
    pub fn load(&self, table_type: AnalyticsTableType) -> DatabaseResult<TableState> {
        let result = self.store.query(&format!(
            "{} WHERE table_type = '{}'",
            Self::select_sql(),
            escape_literal(&table_type.to_string())
        ))?;

        match result.rows.first() {
            Some(row) => Self::row_to_state(row, table_type),
            None => Ok(TableState::empty(table_type)),
        }
    }

    /// States of all table types that were ever built, ordered by type name
    pub fn list(&self) -> DatabaseResult<Vec<TableState>> {
        let result = self
            .store
            .query(&format!("{} ORDER BY table_type", Self::select_sql()))?;

        let mut states = Vec::new();
        for row in &result.rows {
            let name = row["table_type"].as_str().unwrap_or_default();
            match name.parse::<AnalyticsTableType>() {
                Ok(table_type) => states.push(Self::row_to_state(row, table_type)?),
                Err(e) => warn!("Ignoring state row: {}", e),
            }
        }
        Ok(states)
    }

    /// Advance the full update watermark
    pub fn record_full_update(
        &self,
        table_type: AnalyticsTableType,
        cutoff: DateTime<Utc>,
    ) -> DatabaseResult<()> {
        self.upsert(table_type, "last_full_update", cutoff)
    }

    /// Advance the incremental update watermark
    pub fn record_latest_update(
        &self,
        table_type: AnalyticsTableType,
        cutoff: DateTime<Utc>,
    ) -> DatabaseResult<()> {
        self.upsert(table_type, "last_latest_update", cutoff)
    }

    fn upsert(
        &self,
        table_type: AnalyticsTableType,
        column: &str,
        cutoff: DateTime<Utc>,
    ) -> DatabaseResult<()> {
        debug!(%table_type, column, cutoff = %long_date_string(&cutoff), "advancing watermark");

        self.store.execute(&format!(
            "INSERT INTO analytics_table_state (table_type, {column}) \
             VALUES ('{}', CAST('{}' AS TIMESTAMP)) \
             ON CONFLICT (table_type) DO UPDATE SET {column} = excluded.{column}",
            escape_literal(&table_type.to_string()),
            long_date_string(&cutoff),
        ))?;
        Ok(())
    }

    fn select_sql() -> String {
        format!(
            "SELECT table_type, \
             strftime(last_full_update, '{fmt}') AS last_full_update, \
             strftime(last_latest_update, '{fmt}') AS last_latest_update \
             FROM analytics_table_state",
            fmt = LONG_DATE_FORMAT
        )
    }

    fn row_to_state(
        row: &serde_json::Value,
        table_type: AnalyticsTableType,
    ) -> DatabaseResult<TableState> {
        Ok(TableState {
            table_type,
            last_full_update: parse_timestamp(&row["last_full_update"])?,
            last_latest_update: parse_timestamp(&row["last_latest_update"])?,
        })
    }
}

fn parse_timestamp(value: &serde_json::Value) -> DatabaseResult<Option<DateTime<Utc>>> {
    match value.as_str() {
        None => Ok(None),
        Some(s) => NaiveDateTime::parse_from_str(s, LONG_DATE_FORMAT)
            .map(|ts| Some(ts.and_utc()))
            .map_err(|e| {
                DatabaseError::SerializationError(format!("Invalid watermark '{}': {}", s, e))
            }),
    }
}
