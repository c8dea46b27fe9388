//! Build reports.
//!
//! Every build-or-load returns a report next to its value so that callers
//! (the indexer service, tests) can see what was read, skipped and merged
//! without scraping logs.

use std::fmt;

/// What a build-or-load did with the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildAction {
    Created,
    Loaded,
    Rebuilt { reason: String },
}

impl fmt::Display for BuildAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildAction::Created => f.write_str("created"),
            BuildAction::Loaded => f.write_str("loaded"),
            BuildAction::Rebuilt { reason } => write!(f, "rebuilt ({})", reason),
        }
    }
}

/// A file or partition left out of a build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFile {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupReport {
    pub id: String,
    pub variables: usize,
    pub records: usize,
    pub duplicates: usize,
    pub density: f64,
}

/// Outcome of one collection build-or-load.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildReport {
    pub name: String,
    pub action: BuildAction,
    pub files_read: usize,
    pub files_skipped: Vec<SkippedFile>,
    pub records_total: usize,
    pub records_kept: usize,
    pub records_filtered: usize,
    pub records_invalid: usize,
    pub records_duplicate: usize,
    /// Records whose time could not be placed on their variable's axis.
    pub records_skipped: usize,
    pub hash_collisions: usize,
    pub groups: Vec<GroupReport>,
    pub warnings: Vec<String>,
}

impl BuildReport {
    pub fn new(name: impl Into<String>, action: BuildAction) -> Self {
        Self {
            name: name.into(),
            action,
            files_read: 0,
            files_skipped: Vec::new(),
            records_total: 0,
            records_kept: 0,
            records_filtered: 0,
            records_invalid: 0,
            records_duplicate: 0,
            records_skipped: 0,
            hash_collisions: 0,
            groups: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn loaded(name: impl Into<String>) -> Self {
        Self::new(name, BuildAction::Loaded)
    }

    pub fn was_built(&self) -> bool {
        self.action != BuildAction::Loaded
    }
}

impl fmt::Display for BuildReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "collection {}: {}", self.name, self.action)?;
        if !self.was_built() {
            return Ok(());
        }
        writeln!(
            f,
            "  files: {} read, {} skipped",
            self.files_read,
            self.files_skipped.len()
        )?;
        writeln!(
            f,
            "  records: {} total, {} kept, {} filtered, {} invalid, {} duplicate, {} skipped",
            self.records_total,
            self.records_kept,
            self.records_filtered,
            self.records_invalid,
            self.records_duplicate,
            self.records_skipped
        )?;
        for g in &self.groups {
            writeln!(
                f,
                "  group {}: {} variables, {} records, density {:.3}",
                g.id, g.variables, g.records, g.density
            )?;
        }
        for skipped in &self.files_skipped {
            writeln!(f, "  skipped {}: {}", skipped.name, skipped.reason)?;
        }
        for w in &self.warnings {
            writeln!(f, "  warning: {}", w)?;
        }
        Ok(())
    }
}

/// Outcome of one time partition build-or-load.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionReport {
    pub name: String,
    pub action: BuildAction,
    pub children: Vec<BuildReport>,
    /// Partitions that failed to open and were left out.
    pub dropped: Vec<SkippedFile>,
    pub canonical: Option<String>,
    /// Groups or variables of the canonical partition absent elsewhere.
    pub missing: Vec<String>,
    /// Variables whose vertical or ensemble values differ by partition.
    pub flagged: Vec<String>,
    pub union_coordinates: usize,
    pub warnings: Vec<String>,
}

impl PartitionReport {
    pub fn new(name: impl Into<String>, action: BuildAction) -> Self {
        Self {
            name: name.into(),
            action,
            children: Vec::new(),
            dropped: Vec::new(),
            canonical: None,
            missing: Vec::new(),
            flagged: Vec::new(),
            union_coordinates: 0,
            warnings: Vec::new(),
        }
    }
}

impl fmt::Display for PartitionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "partition {}: {}", self.name, self.action)?;
        if let Some(canonical) = &self.canonical {
            writeln!(
                f,
                "  canonical {}, {} union time coordinates",
                canonical, self.union_coordinates
            )?;
        }
        for child in &self.children {
            write!(f, "{}", child)?;
        }
        for d in &self.dropped {
            writeln!(f, "  dropped {}: {}", d.name, d.reason)?;
        }
        for m in &self.missing {
            writeln!(f, "  missing: {}", m)?;
        }
        for m in &self.flagged {
            writeln!(f, "  differs: {}", m)?;
        }
        for w in &self.warnings {
            writeln!(f, "  warning: {}", w)?;
        }
        Ok(())
    }
}

/// A built or loaded value with the report describing how it came to be.
#[derive(Debug)]
pub struct Built<T, R = BuildReport> {
    pub value: T,
    pub report: R,
}

impl<T, R> Built<T, R> {
    pub fn into_value(self) -> T {
        self.value
    }
}
