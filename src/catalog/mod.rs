//! Dimension catalog
//!
//! The catalog is the read-only view of the configured dimensions that shape
//! an analytics table: organisation unit group sets, organisation unit levels,
//! attribute category option group sets and attribute categories. The set is
//! configured by end users, so the column layout of every analytics table is
//! only known at build time.
//!
//! The metadata layer that owns these objects lives outside this crate. A
//! [`CatalogSnapshot`] captures its state once and can be shared between
//! concurrent builds behind an `Arc`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Error type for loading a catalog snapshot
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// Failed to read the snapshot file
    #[error("Failed to read catalog {0}: {1}")]
    Io(String, String),

    /// Snapshot content could not be parsed
    #[error("Failed to parse catalog: {0}")]
    Parse(String),
}

/// One configured dimension (group set or category)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimension {
    /// Stable 11 character identifier, used as the column name
    pub uid: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// When the dimension was created
    pub created: DateTime<Utc>,
}

impl Dimension {
    pub fn new(uid: impl Into<String>, name: impl Into<String>, created: DateTime<Utc>) -> Self {
        Self {
            uid: uid.into(),
            name: name.into(),
            created,
        }
    }
}

/// An organisation unit hierarchy level
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgUnitLevel {
    /// Level number, 1 being the root
    pub level: i32,
    #[serde(default)]
    pub name: String,
    pub created: DateTime<Utc>,
}

impl OrgUnitLevel {
    pub fn new(level: i32, name: impl Into<String>, created: DateTime<Utc>) -> Self {
        Self {
            level,
            name: name.into(),
            created,
        }
    }

    /// Column name of this level in the org unit structure table
    pub fn column_name(&self) -> String {
        format!("uidlevel{}", self.level)
    }
}

/// Read-only source of dimension definitions
///
/// Every method returns its collection in a stable order; the order becomes
/// the column order of the analytics tables.
pub trait DimensionCatalog: Send + Sync {
    /// Organisation unit group sets flagged as data dimensions
    fn list_org_unit_group_sets(&self) -> Vec<Dimension>;

    /// Configured organisation unit levels
    fn list_org_unit_levels(&self) -> Vec<OrgUnitLevel>;

    /// Category option group sets of the attribute data dimension type
    fn list_attribute_category_option_group_sets(&self) -> Vec<Dimension>;

    /// Attribute categories flagged as data dimensions
    fn list_attribute_categories(&self) -> Vec<Dimension>;
}

/// In-memory catalog state, loadable from YAML or JSON
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSnapshot {
    #[serde(default)]
    pub org_unit_group_sets: Vec<Dimension>,
    #[serde(default)]
    pub org_unit_levels: Vec<OrgUnitLevel>,
    #[serde(default)]
    pub attribute_category_option_group_sets: Vec<Dimension>,
    #[serde(default)]
    pub attribute_categories: Vec<Dimension>,
}

impl CatalogSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_org_unit_group_set(mut self, dimension: Dimension) -> Self {
        self.org_unit_group_sets.push(dimension);
        self
    }

    pub fn with_org_unit_level(mut self, level: OrgUnitLevel) -> Self {
        self.org_unit_levels.push(level);
        self
    }

    pub fn with_attribute_category_option_group_set(mut self, dimension: Dimension) -> Self {
        self.attribute_category_option_group_sets.push(dimension);
        self
    }

    pub fn with_attribute_category(mut self, dimension: Dimension) -> Self {
        self.attribute_categories.push(dimension);
        self
    }

    /// Parse a snapshot from YAML (JSON is accepted as a YAML subset)
    pub fn parse(content: &str) -> Result<Self, CatalogError> {
        serde_yaml::from_str(content).map_err(|e| CatalogError::Parse(e.to_string()))
    }

    /// Load a snapshot from a `.yaml`, `.yml` or `.json` file
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CatalogError::Io(path.display().to_string(), e.to_string()))?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => {
                serde_json::from_str(&content).map_err(|e| CatalogError::Parse(e.to_string()))
            }
            _ => Self::parse(&content),
        }
    }
}

impl DimensionCatalog for CatalogSnapshot {
    fn list_org_unit_group_sets(&self) -> Vec<Dimension> {
        self.org_unit_group_sets.clone()
    }

    fn list_org_unit_levels(&self) -> Vec<OrgUnitLevel> {
        let mut levels = self.org_unit_levels.clone();
        levels.sort_by_key(|l| l.level);
        levels
    }

    fn list_attribute_category_option_group_sets(&self) -> Vec<Dimension> {
        self.attribute_category_option_group_sets.clone()
    }

    fn list_attribute_categories(&self) -> Vec<Dimension> {
        self.attribute_categories.clone()
    }
}
