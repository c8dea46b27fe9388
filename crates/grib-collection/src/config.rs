//! Per-collection build configuration.

use crate::error::{CollectionError, Result};
use grib_common::{GridHash, HeaderRecord};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Options that change how records are grouped and identified.
///
/// All fields are optional in YAML; an empty mapping gives the defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GribConfig {
    /// Grid hashes that denote the same grid as another hash. Some encoders
    /// write byte-different definitions for one grid.
    pub grid_hash_remap: HashMap<u32, u32>,

    /// Group id overrides keyed by (remapped) grid hash.
    pub group_names: HashMap<u32, String>,

    /// Interval-exclusion policy applied while grouping.
    pub interval_filter: IntervalFilter,

    /// Leave the interval length out of variable identity, so records of
    /// different accumulation lengths share one variable.
    pub interval_merge: bool,

    pub table_version: TableVersionPolicy,
}

impl GribConfig {
    /// Grid hash after applying the remap table.
    pub fn remap(&self, hash: GridHash) -> GridHash {
        self.grid_hash_remap
            .get(&hash.0)
            .map(|&h| GridHash(h))
            .unwrap_or(hash)
    }

    /// Group id for a (remapped) grid hash.
    pub fn group_id(&self, hash: GridHash) -> String {
        self.group_names
            .get(&hash.0)
            .cloned()
            .unwrap_or_else(|| hash.default_group_id())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for name in self.group_names.values() {
            if name.trim().is_empty() {
                return Err(CollectionError::InvalidConfig(
                    "group names cannot be empty".to_string(),
                ));
            }
            if !seen.insert(name.as_str()) {
                return Err(CollectionError::InvalidConfig(format!(
                    "group name '{}' is used for more than one grid",
                    name
                )));
            }
        }

        for rule in &self.interval_filter.rules {
            if rule.interval_length < 0 {
                return Err(CollectionError::InvalidConfig(format!(
                    "interval filter for {} has negative length {}",
                    rule.variable, rule.interval_length
                )));
            }
        }

        Ok(())
    }
}

/// Which statistical-interval records are dropped before indexing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntervalFilter {
    /// Drop `[0, 0]` intervals.
    pub exclude_zero: bool,

    /// Per-parameter interval lengths to keep.
    pub rules: Vec<IntervalRule>,
}

impl Default for IntervalFilter {
    fn default() -> Self {
        Self {
            exclude_zero: true,
            rules: Vec::new(),
        }
    }
}

impl IntervalFilter {
    /// Whether the record survives the filter.
    ///
    /// Point forecasts always pass. For intervals the first rule naming the
    /// record's parameter (and probability threshold, if the rule has one)
    /// decides: the record is kept only if its length matches the rule.
    pub fn keep(&self, record: &HeaderRecord) -> bool {
        if !record.is_interval() {
            return true;
        }
        let interval = record.interval();
        if self.exclude_zero && interval.is_zero() {
            return false;
        }
        let length = interval.length();

        let id = record.param_id();
        let threshold = record.probability.map(|p| p.threshold());
        self.rules
            .iter()
            .find(|rule| {
                rule.variable.0 == id
                    && rule.probability.map_or(true, |p| threshold == Some(p))
            })
            .map_or(true, |rule| i64::from(rule.interval_length) == length)
    }
}

/// Keep only `interval_length` intervals of `variable`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntervalRule {
    pub variable: ParamId,
    pub interval_length: i32,
    /// Probability threshold (`1000 * upper limit`) the rule is restricted to.
    #[serde(default)]
    pub probability: Option<i32>,
}

/// Parameter id written as `discipline-category-number`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ParamId(pub u32);

impl ParamId {
    pub fn new(discipline: u8, category: u8, number: u8) -> Self {
        Self(((discipline as u32) << 16) + ((category as u32) << 8) + number as u32)
    }
}

impl TryFrom<String> for ParamId {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        let parts: Vec<&str> = value.split('-').collect();
        if parts.len() != 3 {
            return Err(format!(
                "parameter id '{}' must have the form discipline-category-number",
                value
            ));
        }
        let mut nums = [0u8; 3];
        for (slot, part) in nums.iter_mut().zip(&parts) {
            *slot = part
                .trim()
                .parse()
                .map_err(|e| format!("parameter id '{}': {}", value, e))?;
        }
        Ok(ParamId::new(nums[0], nums[1], nums[2]))
    }
}

impl From<ParamId> for String {
    fn from(id: ParamId) -> Self {
        id.to_string()
    }
}

impl fmt::Display for ParamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.0 >> 16, (self.0 >> 8) & 0xff, self.0 & 0xff)
    }
}

/// How the master table version enters variable identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TableVersionPolicy {
    /// When false, every record is treated as table version 0.
    pub use_in_identity: bool,
    /// Table version substitutions, applied before hashing.
    pub overrides: HashMap<u8, u8>,
}

impl Default for TableVersionPolicy {
    fn default() -> Self {
        Self {
            use_in_identity: true,
            overrides: HashMap::new(),
        }
    }
}

impl TableVersionPolicy {
    pub fn effective(&self, version: u8) -> u8 {
        if !self.use_in_identity {
            return 0;
        }
        self.overrides.get(&version).copied().unwrap_or(version)
    }
}

/// When an existing index is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateMode {
    /// Always rebuild.
    Always,
    /// Rebuild when any source is newer than the index.
    #[default]
    #[serde(alias = "test")]
    IfStale,
    /// Use an existing index without checking sources.
    Nocheck,
}

impl UpdateMode {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "always" => Some(UpdateMode::Always),
            "if_stale" | "if-stale" | "test" => Some(UpdateMode::IfStale),
            "nocheck" | "never" => Some(UpdateMode::Nocheck),
            _ => None,
        }
    }
}

/// Which partition serves as the schema template of a time partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtoChoice {
    First,
    Latest,
    /// The next-to-last partition; the last one is often still filling.
    #[default]
    Penultimate,
    Index(usize),
}
