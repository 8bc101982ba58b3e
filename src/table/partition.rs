//! Analytics table and partition model
//!
//! A logical analytics table is published as one physical table per
//! partition plus a master view over all of them:
//!
//! - `<base>_<year>` holds one full year of data
//! - `<base>_latest` holds rows refreshed by incremental updates
//! - `<base>` is the view queries run against
//!
//! While a build is running, partitions are populated into staging tables
//! named `<base>_temp_<year>` and `<base>_temp_latest`.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::ConfigurationError;
use super::column::AnalyticsTableColumn;

/// Suffix of the latest partition
pub const LATEST_SUFFIX: &str = "latest";

/// Infix of staging tables
pub const STAGING_INFIX: &str = "temp";

/// Analytic subject area
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalyticsTableType {
    DataValue,
    Completeness,
    CompletenessTarget,
    OrgUnitTarget,
    Event,
    Enrollment,
    ValidationResult,
}

impl AnalyticsTableType {
    pub const ALL: [AnalyticsTableType; 7] = [
        AnalyticsTableType::DataValue,
        AnalyticsTableType::Completeness,
        AnalyticsTableType::CompletenessTarget,
        AnalyticsTableType::OrgUnitTarget,
        AnalyticsTableType::Event,
        AnalyticsTableType::Enrollment,
        AnalyticsTableType::ValidationResult,
    ];

    /// Base name of the published table
    pub fn table_name(&self) -> &'static str {
        match self {
            AnalyticsTableType::DataValue => "analytics",
            AnalyticsTableType::Completeness => "analytics_completeness",
            AnalyticsTableType::CompletenessTarget => "analytics_completenesstarget",
            AnalyticsTableType::OrgUnitTarget => "analytics_orgunittarget",
            AnalyticsTableType::Event => "analytics_event",
            AnalyticsTableType::Enrollment => "analytics_enrollment",
            AnalyticsTableType::ValidationResult => "analytics_validationresult",
        }
    }

    /// Whether incremental updates are supported for this subject area
    pub fn has_latest_partition(&self) -> bool {
        matches!(
            self,
            AnalyticsTableType::DataValue
                | AnalyticsTableType::Completeness
                | AnalyticsTableType::Event
        )
    }
}

impl std::str::FromStr for AnalyticsTableType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().replace('-', "_").as_str() {
            "DATA_VALUE" => Ok(AnalyticsTableType::DataValue),
            "COMPLETENESS" => Ok(AnalyticsTableType::Completeness),
            "COMPLETENESS_TARGET" => Ok(AnalyticsTableType::CompletenessTarget),
            "ORG_UNIT_TARGET" => Ok(AnalyticsTableType::OrgUnitTarget),
            "EVENT" => Ok(AnalyticsTableType::Event),
            "ENROLLMENT" => Ok(AnalyticsTableType::Enrollment),
            "VALIDATION_RESULT" => Ok(AnalyticsTableType::ValidationResult),
            _ => Err(format!("Unknown analytics table type: {}", s)),
        }
    }
}

impl std::fmt::Display for AnalyticsTableType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AnalyticsTableType::DataValue => "DATA_VALUE",
            AnalyticsTableType::Completeness => "COMPLETENESS",
            AnalyticsTableType::CompletenessTarget => "COMPLETENESS_TARGET",
            AnalyticsTableType::OrgUnitTarget => "ORG_UNIT_TARGET",
            AnalyticsTableType::Event => "EVENT",
            AnalyticsTableType::Enrollment => "ENROLLMENT",
            AnalyticsTableType::ValidationResult => "VALIDATION_RESULT",
        };
        write!(f, "{}", name)
    }
}

/// Identity of a partition within its table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PartitionKey {
    Year(i32),
    Latest,
}

impl PartitionKey {
    pub fn suffix(&self) -> String {
        match self {
            PartitionKey::Year(year) => year.to_string(),
            PartitionKey::Latest => LATEST_SUFFIX.to_string(),
        }
    }

    /// Production table name of this partition
    pub fn production_name(&self, base_name: &str) -> String {
        format!("{}_{}", base_name, self.suffix())
    }

    /// Staging table name of this partition
    pub fn staging_name(&self, base_name: &str) -> String {
        format!("{}_{}_{}", base_name, STAGING_INFIX, self.suffix())
    }

    /// Parse a production table name back into a partition key
    ///
    /// Returns `None` for names that are not production partitions of
    /// `base_name`, including staging tables.
    pub fn parse(base_name: &str, table_name: &str) -> Option<PartitionKey> {
        let suffix = table_name.strip_prefix(base_name)?.strip_prefix('_')?;

        if suffix == LATEST_SUFFIX {
            return Some(PartitionKey::Latest);
        }

        if suffix.len() == 4 && suffix.chars().all(|c| c.is_ascii_digit()) {
            return suffix.parse().ok().map(PartitionKey::Year);
        }

        None
    }
}

/// One time-bounded slice of an analytics table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyticsTablePartition {
    /// Base name of the master table this partition belongs to
    master_table: String,
    /// Year for full-year partitions, `None` for the latest partition
    year: Option<i32>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl AnalyticsTablePartition {
    fn for_year(master_table: &str, year: i32) -> Option<Self> {
        let start = Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).single()?;
        let end = Utc.with_ymd_and_hms(year + 1, 1, 1, 0, 0, 0).single()?;

        Some(Self {
            master_table: master_table.to_string(),
            year: Some(year),
            start,
            end,
        })
    }

    fn latest(master_table: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            master_table: master_table.to_string(),
            year: None,
            start,
            end,
        }
    }

    pub fn year(&self) -> Option<i32> {
        self.year
    }

    /// Inclusive lower bound of the partition's time window
    pub fn start_date(&self) -> DateTime<Utc> {
        self.start
    }

    /// Exclusive upper bound of the partition's time window
    pub fn end_date(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn is_latest_partition(&self) -> bool {
        self.year.is_none()
    }

    pub fn key(&self) -> PartitionKey {
        match self.year {
            Some(year) => PartitionKey::Year(year),
            None => PartitionKey::Latest,
        }
    }

    pub fn master_table_name(&self) -> &str {
        &self.master_table
    }

    pub fn staging_name(&self) -> String {
        self.key().staging_name(&self.master_table)
    }

    pub fn production_name(&self) -> String {
        self.key().production_name(&self.master_table)
    }
}

/// A logical analytics table for one build cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsTable {
    pub table_type: AnalyticsTableType,
    pub dimension_columns: Vec<AnalyticsTableColumn>,
    pub value_columns: Vec<AnalyticsTableColumn>,
    partitions: Vec<AnalyticsTablePartition>,
}

impl AnalyticsTable {
    pub fn new(
        table_type: AnalyticsTableType,
        dimension_columns: Vec<AnalyticsTableColumn>,
        value_columns: Vec<AnalyticsTableColumn>,
    ) -> Self {
        Self {
            table_type,
            dimension_columns,
            value_columns,
            partitions: Vec::new(),
        }
    }

    pub fn base_name(&self) -> &'static str {
        self.table_type.table_name()
    }

    /// Add a full-year partition
    pub fn add_partition(&mut self, year: i32) -> Result<&mut Self, ConfigurationError> {
        if self.partitions.iter().any(|p| p.year == Some(year)) {
            return Err(ConfigurationError::DuplicatePartition(
                PartitionKey::Year(year).production_name(self.base_name()),
            ));
        }

        let partition = AnalyticsTablePartition::for_year(self.base_name(), year)
            .ok_or(ConfigurationError::InvalidPartitionYear(year))?;
        self.partitions.push(partition);
        Ok(self)
    }

    /// Add the latest partition covering `[start, end)`
    pub fn add_latest_partition(
        &mut self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<&mut Self, ConfigurationError> {
        if self.latest_partition().is_some() {
            return Err(ConfigurationError::DuplicatePartition(
                PartitionKey::Latest.production_name(self.base_name()),
            ));
        }

        self.partitions
            .push(AnalyticsTablePartition::latest(self.base_name(), start, end));
        Ok(self)
    }

    pub fn partitions(&self) -> &[AnalyticsTablePartition] {
        &self.partitions
    }

    pub fn latest_partition(&self) -> Option<&AnalyticsTablePartition> {
        self.partitions.iter().find(|p| p.is_latest_partition())
    }

    pub fn has_partition_tables(&self) -> bool {
        !self.partitions.is_empty()
    }

    /// All columns in insert order: dimension columns, then value columns
    pub fn columns(&self) -> Vec<AnalyticsTableColumn> {
        self.dimension_columns
            .iter()
            .chain(self.value_columns.iter())
            .cloned()
            .collect()
    }
}
