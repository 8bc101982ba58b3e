//! Analytics table column model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::ConfigurationError;
use super::sql::quote;

/// Data type of an analytics column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ColumnDataType {
    Text,
    Integer,
    Boolean,
    Date,
    Timestamp,
    Double,
    /// Fixed width character column
    Character(u8),
}

impl ColumnDataType {
    /// DDL type name
    pub fn sql_type(&self) -> String {
        match self {
            ColumnDataType::Text => "TEXT".to_string(),
            ColumnDataType::Integer => "INTEGER".to_string(),
            ColumnDataType::Boolean => "BOOLEAN".to_string(),
            ColumnDataType::Date => "DATE".to_string(),
            ColumnDataType::Timestamp => "TIMESTAMP".to_string(),
            ColumnDataType::Double => "DOUBLE".to_string(),
            ColumnDataType::Character(width) => format!("VARCHAR({})", width),
        }
    }
}

/// Shorthand for the 11 character identifier columns
pub const CHARACTER_11: ColumnDataType = ColumnDataType::Character(11);

/// Period types that get a column in the period structure, coarsest last
pub const PERIOD_TYPES: [&str; 11] = [
    "daily",
    "weekly",
    "monthly",
    "bimonthly",
    "quarterly",
    "sixmonthly",
    "sixmonthlyapril",
    "financialapril",
    "financialjuly",
    "financialoct",
    "yearly",
];

/// Nullability of an analytics column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ColumnNotNullConstraint {
    #[default]
    Null,
    NotNull,
}

/// One column of an analytics table
///
/// `alias` is the source expression selected when populating the column.
/// `created` is the creation time of the dimension backing the column, used
/// to skip columns that older partitions cannot have.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyticsTableColumn {
    pub name: String,
    pub data_type: ColumnDataType,
    pub not_null: ColumnNotNullConstraint,
    pub alias: String,
    pub created: Option<DateTime<Utc>>,
}

impl AnalyticsTableColumn {
    pub fn new(name: impl Into<String>, data_type: ColumnDataType, alias: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type,
            not_null: ColumnNotNullConstraint::Null,
            alias: alias.into(),
            created: None,
        }
    }

    pub fn not_null(
        name: impl Into<String>,
        data_type: ColumnDataType,
        alias: impl Into<String>,
    ) -> Self {
        Self {
            not_null: ColumnNotNullConstraint::NotNull,
            ..Self::new(name, data_type, alias)
        }
    }

    pub fn with_created(mut self, created: DateTime<Utc>) -> Self {
        self.created = Some(created);
        self
    }

    pub fn is_not_null(&self) -> bool {
        self.not_null == ColumnNotNullConstraint::NotNull
    }

    pub fn quoted_name(&self) -> String {
        quote(&self.name)
    }

    /// Column definition for `CREATE TABLE`
    pub fn definition_sql(&self) -> String {
        let mut sql = format!("{} {}", self.quoted_name(), self.data_type.sql_type());
        if self.is_not_null() {
            sql.push_str(" NOT NULL");
        }
        sql
    }

    /// Expression for the populate select list
    pub fn select_sql(&self) -> String {
        format!("{} as {}", self.alias, self.quoted_name())
    }

    /// Whether the backing dimension existed at `timestamp`
    pub fn existed_at(&self, timestamp: &DateTime<Utc>) -> bool {
        self.created.is_none_or(|created| created < *timestamp)
    }
}

/// Check that no two dimension columns share a name
pub fn validate_dimension_columns(columns: &[AnalyticsTableColumn]) -> Result<(), ConfigurationError> {
    let mut seen = HashSet::new();

    for column in columns {
        if !seen.insert(column.name.as_str()) {
            return Err(ConfigurationError::DuplicateColumn(column.name.clone()));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_definition_sql() {
        let col = AnalyticsTableColumn::not_null("dx", CHARACTER_11, "ds.uid");
        assert_eq!(col.definition_sql(), "\"dx\" VARCHAR(11) NOT NULL");

        let col = AnalyticsTableColumn::new("timely", ColumnDataType::Boolean, "true");
        assert_eq!(col.definition_sql(), "\"timely\" BOOLEAN");
    }

    #[test]
    fn test_select_sql() {
        let col = AnalyticsTableColumn::new("uidlevel1", CHARACTER_11, "ous.\"uidlevel1\"");
        assert_eq!(col.select_sql(), "ous.\"uidlevel1\" as \"uidlevel1\"");
    }

    #[test]
    fn test_existed_at() {
        let created = Utc.with_ymd_and_hms(2021, 6, 1, 0, 0, 0).unwrap();
        let col = AnalyticsTableColumn::new("a", ColumnDataType::Text, "x").with_created(created);

        assert!(col.existed_at(&Utc.with_ymd_and_hms(2021, 7, 1, 0, 0, 0).unwrap()));
        assert!(!col.existed_at(&Utc.with_ymd_and_hms(2021, 5, 1, 0, 0, 0).unwrap()));
        assert!(AnalyticsTableColumn::new("b", ColumnDataType::Text, "y").existed_at(&created));
    }

    #[test]
    fn test_validate_dimension_columns() {
        let unique = vec![
            AnalyticsTableColumn::new("a", ColumnDataType::Text, "x.a"),
            AnalyticsTableColumn::new("b", ColumnDataType::Text, "x.b"),
        ];
        assert!(validate_dimension_columns(&unique).is_ok());

        let duplicate = vec![
            AnalyticsTableColumn::new("a", ColumnDataType::Text, "x.a"),
            AnalyticsTableColumn::new("b", ColumnDataType::Text, "x.b"),
            AnalyticsTableColumn::new("a", ColumnDataType::Text, "y.a"),
        ];
        match validate_dimension_columns(&duplicate) {
            Err(ConfigurationError::DuplicateColumn(name)) => assert_eq!(name, "a"),
            other => panic!("expected duplicate column error, got {:?}", other),
        }
    }
}
