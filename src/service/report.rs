//! Build results
//!
//! A build never throws for missing data and never hides a failed
//! partition: everything that happened is in the returned report.

use serde::Serialize;

use super::BuildError;
use crate::database::TableState;
use crate::postprocess::PostProcessHandle;
use crate::table::AnalyticsTableType;

/// What happened to one partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum PartitionOutcome {
    /// Swapped into (or appended to) production
    Published { rows: usize },
    /// Populated without rows and discarded
    Empty,
    /// Population, validation or publishing failed; production untouched
    Failed { error: String },
}

impl PartitionOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, PartitionOutcome::Failed { .. })
    }

    pub fn is_published(&self) -> bool {
        matches!(self, PartitionOutcome::Published { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionSummary {
    /// Production table name
    pub name: String,
    pub year: Option<i32>,
    pub latest: bool,
    pub outcome: PartitionOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSummary {
    /// Name of the master view
    pub table_name: String,
    pub partitions: Vec<PartitionSummary>,
}

impl TableSummary {
    /// Rows written to production by this build
    pub fn rows_published(&self) -> usize {
        self.partitions
            .iter()
            .map(|p| match p.outcome {
                PartitionOutcome::Published { rows } => rows,
                _ => 0,
            })
            .sum()
    }

    pub fn has_failures(&self) -> bool {
        self.partitions.iter().any(|p| p.outcome.is_failed())
    }

    /// Production names of the published partitions
    pub fn published_partitions(&self) -> Vec<String> {
        self.partitions
            .iter()
            .filter(|p| p.outcome.is_published())
            .map(|p| p.name.clone())
            .collect()
    }
}

/// Result of building one table type
///
/// `post_processing` holds the handles of the maintenance queued after
/// publishing. They may be awaited or dropped; their outcome is not part
/// of the result.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildResult {
    pub table_type: AnalyticsTableType,
    pub tables_built: Vec<TableSummary>,
    pub skipped_reason: Option<String>,
    #[serde(skip)]
    pub post_processing: Vec<PostProcessHandle>,
}

impl BuildResult {
    pub fn skipped(table_type: AnalyticsTableType, reason: impl Into<String>) -> Self {
        Self {
            table_type,
            tables_built: Vec::new(),
            skipped_reason: Some(reason.into()),
            post_processing: Vec::new(),
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.skipped_reason.is_some()
    }

    /// Whether at least one partition failed
    pub fn is_partial_failure(&self) -> bool {
        self.tables_built.iter().any(|t| t.has_failures())
    }

    /// Detach the post-processing handles
    pub fn take_post_processing(&mut self) -> Vec<PostProcessHandle> {
        std::mem::take(&mut self.post_processing)
    }
}

/// Results of one update across table types
#[derive(Debug, Default)]
pub struct UpdateReport {
    /// Table types excluded by the update parameters
    pub skipped_types: Vec<AnalyticsTableType>,
    /// One entry per built table type, in registration order
    pub results: Vec<(AnalyticsTableType, Result<BuildResult, BuildError>)>,
}

impl UpdateReport {
    pub fn result(&self, table_type: AnalyticsTableType) -> Option<&Result<BuildResult, BuildError>> {
        self.results
            .iter()
            .find(|(t, _)| *t == table_type)
            .map(|(_, result)| result)
    }

    /// Whether any table type failed outright or partially
    pub fn has_failures(&self) -> bool {
        self.results.iter().any(|(_, result)| match result {
            Ok(result) => result.is_partial_failure(),
            Err(_) => true,
        })
    }

    /// Detach every post-processing handle
    pub fn take_post_processing(&mut self) -> Vec<PostProcessHandle> {
        self.results
            .iter_mut()
            .filter_map(|(_, result)| result.as_mut().ok())
            .flat_map(|result| result.take_post_processing())
            .collect()
    }

    /// JSON rendering for machine consumers
    pub fn to_json(&self) -> serde_json::Value {
        let results: Vec<serde_json::Value> = self
            .results
            .iter()
            .map(|(table_type, result)| match result {
                Ok(result) => serde_json::json!({
                    "tableType": table_type,
                    "result": result,
                }),
                Err(error) => serde_json::json!({
                    "tableType": table_type,
                    "error": error.to_string(),
                }),
            })
            .collect();

        serde_json::json!({
            "skippedTypes": self.skipped_types,
            "results": results,
        })
    }
}

/// Current production state of one table type
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableStatus {
    pub state: TableState,
    /// Production partitions with their row counts
    pub partitions: Vec<(String, i64)>,
}
