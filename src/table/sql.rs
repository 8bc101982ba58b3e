//! SQL text helpers shared by all table managers
//!
//! Analytics SQL is generated from runtime metadata, so identifiers are never
//! trusted: every table and column name goes through [`quote`], and dimension
//! identifiers are checked with [`is_valid_uid`] before they are used.
//! Timestamps are rendered in one canonical, timezone-free long form so that
//! comparisons are lexically and ordinally consistent.

use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

/// Format used for timestamp literals (UTC, second precision)
pub const LONG_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Format used for date literals
pub const MEDIUM_DATE_FORMAT: &str = "%Y-%m-%d";

static UID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9]{10}$").expect("valid uid pattern"));

static LEGACY_ORG_UNIT_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\borganisationunitid\b").expect("valid legacy alias pattern"));

/// Quote an identifier, doubling any embedded quote characters
pub fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// Quote an identifier and qualify it with a table alias, e.g. `ougs."J5jldMd8OHv"`
pub fn quote_alias(table_alias: &str, identifier: &str) -> String {
    format!("{}.{}", table_alias, quote(identifier))
}

/// Escape a value for use inside a single quoted string literal
pub fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}

/// Render a list of values as a parenthesised string literal list
pub fn literal_list<I, S>(values: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let items: Vec<String> = values
        .into_iter()
        .map(|v| format!("'{}'", escape_literal(v.as_ref())))
        .collect();
    format!("({})", items.join(","))
}

/// Check whether a string is a well-formed 11 character identifier
pub fn is_valid_uid(uid: &str) -> bool {
    UID_PATTERN.is_match(uid)
}

/// Canonical long timestamp string, e.g. `2021-03-04T10:15:00`
pub fn long_date_string(timestamp: &DateTime<Utc>) -> String {
    timestamp.format(LONG_DATE_FORMAT).to_string()
}

/// Canonical date string, e.g. `2021-03-04`
pub fn medium_date_string(date: &NaiveDate) -> String {
    date.format(MEDIUM_DATE_FORMAT).to_string()
}

/// Expression yielding the number of days from `start` to `end`
pub fn days_between_dates(start: &str, end: &str) -> String {
    format!("({} - {})", end, start)
}

/// Expression casting `expression` to a date
pub fn cast_to_date(expression: &str) -> String {
    format!("cast({} as date)", expression)
}

/// Rewrite the structural `organisationunitid` field name to the name used by
/// transactional tables (`sourceid`).
///
/// Both refer to the same organisation unit; only the column names differ
/// between the structure tables and the registration tables.
// TODO: drop once registration tables name the column organisationunitid
pub fn apply_legacy_org_unit_alias(select_list: &str) -> String {
    LEGACY_ORG_UNIT_ID
        .replace_all(select_list, "sourceid")
        .into_owned()
}
