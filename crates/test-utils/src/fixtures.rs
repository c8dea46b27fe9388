//! On-disk collection fixtures.
//!
//! Source files are JSON inventories: an array of header records per file,
//! the format the inventory decoder reads.

use grib_common::HeaderRecord;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Suffix of generated inventory files.
pub const INVENTORY_SUFFIX: &str = ".grib2.json";

/// A temporary directory holding one collection's inventory files.
pub struct CollectionFixture {
    dir: TempDir,
    files: Vec<PathBuf>,
}

impl CollectionFixture {
    pub fn new() -> Self {
        Self {
            dir: crate::temp_test_dir_with_prefix("grib_collection_"),
            files: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Write `records` as `<stem>.grib2.json` and return its path.
    pub fn add_file(&mut self, stem: &str, records: &[HeaderRecord]) -> PathBuf {
        let path = write_inventory(self.dir.path(), stem, records);
        self.files.push(path.clone());
        path
    }

    /// Create a subdirectory for a nested collection (one partition).
    pub fn subdir(&self, name: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::create_dir_all(&path).expect("Failed to create fixture subdirectory");
        path
    }
}

impl Default for CollectionFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Write an inventory file into `dir`.
pub fn write_inventory(dir: &Path, stem: &str, records: &[HeaderRecord]) -> PathBuf {
    let path = dir.join(format!("{}{}", stem, INVENTORY_SUFFIX));
    let json = serde_json::to_vec_pretty(records).expect("Failed to serialize records");
    std::fs::write(&path, json).expect("Failed to write inventory file");
    path
}
