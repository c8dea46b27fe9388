//! Configuration loader for the indexer.
//!
//! Reads a single YAML file listing the collections and time partitions to
//! index, together with the grouping options and logging settings shared
//! by all of them.
//!
//! Supports environment variable substitution using ${VAR} syntax.

use anyhow::{Context, Result};
use grib_collection::{CollectionSpec, GribConfig, PartitionSpec, ProtoChoice, UpdateMode};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

// ============================================================================
// Indexer Configuration (indexer.yaml)
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Grouping and identity options applied to every collection.
    #[serde(default)]
    pub grib: GribConfig,

    /// When existing indexes are reused.
    #[serde(default)]
    pub update: UpdateMode,

    /// Default canonical partition for time partitions.
    #[serde(default)]
    pub proto: ProtoChoice,

    /// Oldest index version accepted when loading; older indexes are
    /// rebuilt.
    #[serde(default)]
    pub min_version: Option<i32>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub collections: Vec<CollectionSpec>,

    #[serde(default)]
    pub partitions: Vec<PartitionEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `json` or `pretty`.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

/// A time partition and an optional override of the canonical choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionEntry {
    #[serde(flatten)]
    pub spec: PartitionSpec,
    #[serde(default)]
    pub proto: Option<ProtoChoice>,
}

impl IndexerConfig {
    /// Names of everything this configuration indexes, collections first.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.collections
            .iter()
            .map(|c| c.name.as_str())
            .chain(self.partitions.iter().map(|p| p.spec.name.as_str()))
    }
}

// ============================================================================
// Loading Functions
// ============================================================================

/// Load and parse the indexer configuration YAML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<IndexerConfig> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read indexer config from {:?}", path.as_ref()))?;

    parse_config(&content)
        .with_context(|| format!("Invalid indexer config in {:?}", path.as_ref()))
}

/// Parse configuration text after environment expansion
pub fn parse_config(content: &str) -> Result<IndexerConfig> {
    let expanded = expand_env_vars(content)?;

    let config: IndexerConfig =
        serde_yaml::from_str(&expanded).with_context(|| "Failed to parse indexer config YAML")?;

    validate_config(&config)?;

    Ok(config)
}

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand references from the process environment. Comment lines are
/// copied unchanged.
fn expand_env_vars(content: &str) -> Result<String> {
    let lookup = |name: &str| std::env::var(name).ok();
    let mut out = String::with_capacity(content.len());
    for line in content.split_inclusive('\n') {
        if line.trim_start().starts_with('#') {
            out.push_str(line);
        } else {
            out.push_str(&expand_with(line, &lookup)?);
        }
    }
    Ok(out)
}

/// Replace every `${NAME}` or `${NAME:-fallback}` in `text` using `lookup`.
///
/// A fallback is used when the variable is unset or empty, and may itself
/// contain references.
fn expand_with(text: &str, lookup: &dyn Fn(&str) -> Option<String>) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(at) = rest.find("${") {
        out.push_str(&rest[..at]);
        let body_start = at + 2;
        let body_len = placeholder_len(&rest[body_start..])
            .with_context(|| format!("Unterminated '${{' in: {}", rest[at..].lines().next().unwrap_or("")))?;
        let body = &rest[body_start..body_start + body_len];

        let value = match body.split_once(":-") {
            Some((name, fallback)) => match lookup(name.trim()) {
                Some(value) if !value.is_empty() => value,
                _ => expand_with(fallback, lookup)?,
            },
            None => lookup(body.trim())
                .with_context(|| format!("Environment variable {} is not set", body.trim()))?,
        };
        out.push_str(&value);
        rest = &rest[body_start + body_len + 1..];
    }

    out.push_str(rest);
    Ok(out)
}

/// Byte length of a placeholder body up to its matching `}`.
fn placeholder_len(body: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in body.char_indices() {
        match c {
            '{' => depth += 1,
            '}' if depth == 0 => return Some(i),
            '}' => depth -= 1,
            _ => {}
        }
    }
    None
}

// ============================================================================
// Validation
// ============================================================================

fn validate_config(config: &IndexerConfig) -> Result<()> {
    config.grib.validate()?;

    anyhow::ensure!(
        matches!(config.logging.format.as_str(), "json" | "pretty"),
        "Unknown log format '{}' (expected json or pretty)",
        config.logging.format
    );

    if let Some(min_version) = config.min_version {
        anyhow::ensure!(min_version > 0, "min_version must be positive");
    }

    let mut seen = HashSet::new();
    for name in config.names() {
        anyhow::ensure!(!name.trim().is_empty(), "Collection names cannot be empty");
        anyhow::ensure!(seen.insert(name), "Duplicate collection name '{}'", name);
    }

    for entry in &config.partitions {
        anyhow::ensure!(
            !entry.spec.partitions.is_empty(),
            "Partition '{}' lists no collections",
            entry.spec.name
        );
        let mut children = HashSet::new();
        for child in &entry.spec.partitions {
            anyhow::ensure!(
                children.insert(child.name.as_str()),
                "Partition '{}' lists '{}' twice",
                entry.spec.name,
                child.name
            );
        }
    }

    Ok(())
}
