//! Collection sources and the record decoder boundary.

use crate::diagnostics::SkippedFile;
use crate::error::Result;
use crate::index::{COLLECTION_SUFFIX, PARTITION_SUFFIX};
use anyhow::Context;
use grib_common::{system_time_millis, HeaderRecord};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Turns a source file into header records.
///
/// Message decoding is not part of this crate; implementations wrap a
/// GRIB2 decoder or read a pre-extracted inventory.
pub trait RecordDecoder: Send + Sync {
    fn decode(&self, path: &Path) -> anyhow::Result<Vec<HeaderRecord>>;
}

/// Reads JSON inventories: one array of [`HeaderRecord`]s per source file.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonInventoryDecoder;

impl RecordDecoder for JsonInventoryDecoder {
    fn decode(&self, path: &Path) -> anyhow::Result<Vec<HeaderRecord>> {
        let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let records: Vec<HeaderRecord> = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse inventory {}", path.display()))?;
        Ok(records)
    }
}

/// Where a collection's files come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CollectionSource {
    /// Every file under `root` whose name ends with one of `suffixes`
    /// (all files when empty).
    Directory {
        root: PathBuf,
        #[serde(default)]
        suffixes: Vec<String>,
        #[serde(default = "default_recursive")]
        recursive: bool,
    },
    /// An explicit list; relative paths are resolved against `root`.
    Files { root: PathBuf, files: Vec<PathBuf> },
    SingleFile { path: PathBuf },
}

fn default_recursive() -> bool {
    true
}

/// One file found by a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    /// Path relative to the collection root, `/`-separated.
    pub name: String,
    pub size: u64,
    pub last_modified: i64,
}

#[derive(Debug, Clone, Default)]
pub struct SourceScan {
    /// Files in collection order.
    pub files: Vec<SourceFile>,
    pub skipped: Vec<SkippedFile>,
}

impl CollectionSource {
    pub fn directory(root: impl Into<PathBuf>, suffix: &str) -> Self {
        CollectionSource::Directory {
            root: root.into(),
            suffixes: vec![suffix.to_string()],
            recursive: true,
        }
    }

    /// Directory relative file names are computed against.
    pub fn root(&self) -> PathBuf {
        match self {
            CollectionSource::Directory { root, .. } | CollectionSource::Files { root, .. } => root.clone(),
            CollectionSource::SingleFile { path } => path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
        }
    }

    /// List the collection's files, sorted by relative name.
    pub fn scan(&self) -> Result<SourceScan> {
        let root = self.root();
        let mut scan = SourceScan::default();

        let candidates: Vec<PathBuf> = match self {
            CollectionSource::Directory { suffixes, recursive, .. } => {
                let mut walker = WalkDir::new(&root).follow_links(true);
                if !recursive {
                    walker = walker.max_depth(1);
                }
                let mut found = Vec::new();
                for entry in walker {
                    let entry = match entry {
                        Ok(e) => e,
                        Err(e) => {
                            warn!(root = %root.display(), error = %e, "Skipping unreadable entry");
                            continue;
                        }
                    };
                    if entry.file_type().is_file() && wanted(entry.path(), suffixes) {
                        found.push(entry.into_path());
                    }
                }
                found
            }
            CollectionSource::Files { files, .. } => files.iter().map(|f| root.join(f)).collect(),
            CollectionSource::SingleFile { path } => vec![path.clone()],
        };

        for path in candidates {
            let name = relative_name(&root, &path);
            match fs::metadata(&path).and_then(|m| Ok((m.len(), m.modified()?))) {
                Ok((size, modified)) => scan.files.push(SourceFile {
                    path,
                    name,
                    size,
                    last_modified: system_time_millis(modified),
                }),
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "Source file not accessible");
                    scan.skipped.push(SkippedFile {
                        name,
                        reason: e.to_string(),
                    });
                }
            }
        }

        scan.files.sort_by(|a, b| a.name.cmp(&b.name));
        debug!(root = %root.display(), files = scan.files.len(), "Scanned collection source");
        Ok(scan)
    }
}

fn wanted(path: &Path, suffixes: &[String]) -> bool {
    let name = match path.file_name().and_then(|n| n.to_str()) {
        Some(n) => n,
        None => return false,
    };
    // index files and in-flight temporaries live next to the sources
    if name.ends_with(COLLECTION_SUFFIX) || name.ends_with(PARTITION_SUFFIX) || name.starts_with(".tmp") {
        return false;
    }
    suffixes.is_empty() || suffixes.iter().any(|s| name.ends_with(s.as_str()))
}

fn relative_name(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
