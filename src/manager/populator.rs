//! Partition population
//!
//! An [`InsertStatement`] is the `insert into <staging> (...) select ...`
//! that fills one partition; [`PartitionPopulator`] runs it and logs how
//! long it took.

use std::time::Instant;

use tracing::info;

use crate::database::{AnalyticsStore, DatabaseResult};
use crate::table::AnalyticsTableColumn;
use crate::table::sql::{apply_legacy_org_unit_alias, quote};

/// Insert of source rows into a staging table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertStatement {
    target: String,
    columns: Vec<AnalyticsTableColumn>,
    from: String,
    filters: Vec<String>,
    legacy_org_unit_alias: bool,
}

impl InsertStatement {
    /// Insert into `target`, one select expression per column
    ///
    /// The column list is taken as given; callers pass dimension columns
    /// followed by value columns.
    pub fn new(target: impl Into<String>, columns: Vec<AnalyticsTableColumn>) -> Self {
        Self {
            target: target.into(),
            columns,
            from: String::new(),
            filters: Vec::new(),
            legacy_org_unit_alias: false,
        }
    }

    /// Source tables and joins, without the `from` keyword
    pub fn from(mut self, from: impl Into<String>) -> Self {
        self.from = from.into();
        self
    }

    /// Add a condition; conditions are combined with `and`
    pub fn filter(mut self, condition: impl Into<String>) -> Self {
        self.filters.push(condition.into());
        self
    }

    /// Read org unit ids from `sourceid` instead of `organisationunitid`
    pub fn with_legacy_org_unit_alias(mut self) -> Self {
        self.legacy_org_unit_alias = true;
        self
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Quoted column names in insert order
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.quoted_name()).collect()
    }

    /// Select list in insert order
    pub fn select_list(&self) -> String {
        let select: Vec<String> = self.columns.iter().map(|c| c.select_sql()).collect();
        let select = select.join(", ");

        if self.legacy_org_unit_alias {
            apply_legacy_org_unit_alias(&select)
        } else {
            select
        }
    }

    pub fn to_sql(&self) -> String {
        let mut sql = format!(
            "insert into {} ({}) select {} from {}",
            quote(&self.target),
            self.column_names().join(", "),
            self.select_list(),
            self.from
        );

        if !self.filters.is_empty() {
            sql.push_str(" where ");
            sql.push_str(&self.filters.join(" and "));
        }

        sql
    }
}

/// Runs insert statements against the store
pub struct PartitionPopulator<'a> {
    store: &'a dyn AnalyticsStore,
}

impl<'a> PartitionPopulator<'a> {
    pub fn new(store: &'a dyn AnalyticsStore) -> Self {
        Self { store }
    }

    /// Execute the insert, returning the number of rows written
    pub fn populate(&self, statement: &InsertStatement) -> DatabaseResult<usize> {
        let start = Instant::now();
        let rows = self.store.execute(&statement.to_sql())?;

        info!(
            "Populate {}: {} rows in {} ms",
            statement.target(),
            rows,
            start.elapsed().as_millis()
        );

        Ok(rows)
    }
}
