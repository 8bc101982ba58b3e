//! Database schema definitions
//!
//! Two groups of tables live next to the analytics tables:
//!
//! - the engine's own bookkeeping ([`EngineSchema`])
//! - the normalized source tables and resource structure tables the
//!   completeness tables are built from ([`SourceSchema`])
//!
//! The resource structure tables have one column per configured dimension,
//! so their DDL is generated from a catalog.

use crate::catalog::DimensionCatalog;
use crate::table::sql::{is_valid_uid, quote};
use crate::table::{ConfigurationError, PERIOD_TYPES};

/// Schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Resource table with one column per org unit group set
pub const ORG_UNIT_GROUP_SET_STRUCTURE: &str = "_organisationunitgroupsetstructure";

/// Resource table with one column per attribute category and category
/// option group set
pub const CATEGORY_STRUCTURE: &str = "_categorystructure";

/// Engine bookkeeping tables
pub struct EngineSchema;

impl EngineSchema {
    /// Get the schema creation SQL
    pub fn create_tables_sql() -> &'static str {
        r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);

-- Update watermarks per analytics table type
CREATE TABLE IF NOT EXISTS analytics_table_state (
    table_type TEXT PRIMARY KEY,
    last_full_update TIMESTAMP,
    last_latest_update TIMESTAMP
);
"#
    }

    /// Insert the current version into schema_version
    pub fn record_version_sql() -> String {
        format!(
            "INSERT INTO schema_version (version) VALUES ({}) ON CONFLICT (version) DO NOTHING",
            SCHEMA_VERSION
        )
    }

    /// Get the current schema version
    pub fn check_version_sql() -> &'static str {
        "SELECT MAX(version) AS version FROM schema_version"
    }
}

/// Normalized source tables and resource structure tables
pub struct SourceSchema;

impl SourceSchema {
    /// Source table creation SQL
    pub fn create_tables_sql() -> &'static str {
        r#"
CREATE TABLE IF NOT EXISTS dataset (
    datasetid BIGINT PRIMARY KEY,
    uid VARCHAR(11) NOT NULL UNIQUE,
    name TEXT,
    periodtype TEXT,
    timelydays INTEGER NOT NULL DEFAULT 15
);

CREATE TABLE IF NOT EXISTS period (
    periodid BIGINT PRIMARY KEY,
    iso TEXT NOT NULL UNIQUE,
    periodtype TEXT,
    startdate DATE NOT NULL,
    enddate DATE NOT NULL
);

CREATE TABLE IF NOT EXISTS organisationunit (
    organisationunitid BIGINT PRIMARY KEY,
    uid VARCHAR(11) NOT NULL UNIQUE,
    name TEXT,
    path TEXT,
    hierarchylevel INTEGER
);

CREATE TABLE IF NOT EXISTS categoryoptioncombo (
    categoryoptioncomboid BIGINT PRIMARY KEY,
    uid VARCHAR(11) NOT NULL UNIQUE,
    name TEXT
);

CREATE TABLE IF NOT EXISTS completedatasetregistration (
    datasetid BIGINT NOT NULL,
    periodid BIGINT NOT NULL,
    sourceid BIGINT NOT NULL,
    attributeoptioncomboid BIGINT NOT NULL,
    date TIMESTAMP,
    storedby TEXT,
    lastupdatedby TEXT,
    lastupdated TIMESTAMP,
    completed BOOLEAN NOT NULL DEFAULT true,
    PRIMARY KEY (datasetid, periodid, sourceid, attributeoptioncomboid)
);
"#
    }

    /// Resource structure table creation SQL for the dimensions in `catalog`
    ///
    /// Fails when a dimension identifier cannot be used as a column name.
    pub fn create_resource_tables_sql(
        catalog: &dyn DimensionCatalog,
    ) -> Result<String, ConfigurationError> {
        let mut sql = String::new();

        let period_columns: Vec<String> = PERIOD_TYPES
            .iter()
            .map(|period_type| format!("    {} TEXT,\n", quote(period_type)))
            .collect();
        sql.push_str(&format!(
            "CREATE TABLE IF NOT EXISTS _periodstructure (\n    \
             periodid BIGINT PRIMARY KEY,\n    \
             iso TEXT NOT NULL,\n{}    \
             year INTEGER NOT NULL\n);\n\n",
            period_columns.concat()
        ));

        let level_columns: Vec<String> = catalog
            .list_org_unit_levels()
            .iter()
            .map(|level| format!(",\n    {} VARCHAR(11)", quote(&level.column_name())))
            .collect();
        sql.push_str(&format!(
            "CREATE TABLE IF NOT EXISTS _orgunitstructure (\n    \
             organisationunitid BIGINT PRIMARY KEY,\n    \
             organisationunituid VARCHAR(11) NOT NULL,\n    \
             level INTEGER{}\n);\n\n",
            level_columns.concat()
        ));

        let group_set_columns = dimension_column_definitions(
            catalog.list_org_unit_group_sets().iter().map(|d| d.uid.as_str()),
        )?;
        sql.push_str(&format!(
            "CREATE TABLE IF NOT EXISTS _organisationunitgroupsetstructure (\n    \
             organisationunitid BIGINT NOT NULL,\n    \
             startdate DATE{}\n);\n\n",
            group_set_columns
        ));

        let option_group_sets = catalog.list_attribute_category_option_group_sets();
        let categories = catalog.list_attribute_categories();
        let category_columns = dimension_column_definitions(
            option_group_sets
                .iter()
                .chain(categories.iter())
                .map(|d| d.uid.as_str()),
        )?;
        sql.push_str(&format!(
            "CREATE TABLE IF NOT EXISTS _categorystructure (\n    \
             categoryoptioncomboid BIGINT PRIMARY KEY{}\n);\n",
            category_columns
        ));

        Ok(sql)
    }
}

fn dimension_column_definitions<'a>(
    uids: impl Iterator<Item = &'a str>,
) -> Result<String, ConfigurationError> {
    let mut sql = String::new();
    for uid in uids {
        if !is_valid_uid(uid) {
            return Err(ConfigurationError::InvalidIdentifier(uid.to_string()));
        }
        sql.push_str(&format!(",\n    {} VARCHAR(11)", quote(uid)));
    }
    Ok(sql)
}
