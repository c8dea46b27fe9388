//! Grid grouping and interval filtering.
//!
//! Records arrive file by file, in collection file order. Each record is
//! bucketed by its (remapped) grid hash after the interval filter has had
//! its say. File order is preserved inside every bucket; rectilinearization
//! relies on it to break ties between colliding records.

use crate::config::GribConfig;
use grib_common::{GridHash, HeaderRecord};
use std::collections::HashMap;
use tracing::debug;

/// Records of one grid waiting to be rectilinearized.
#[derive(Debug, Clone)]
pub struct PendingGroup {
    pub hash: GridHash,
    /// Grid-definition bytes of the first record seen for this hash.
    pub gds: Vec<u8>,
    pub records: Vec<HeaderRecord>,
}

/// Running record counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupingStats {
    pub total: usize,
    pub kept: usize,
    pub filtered: usize,
}

/// Buckets records by grid.
pub struct GridGrouper<'a> {
    config: &'a GribConfig,
    groups: Vec<PendingGroup>,
    by_hash: HashMap<GridHash, usize>,
    stats: GroupingStats,
}

impl<'a> GridGrouper<'a> {
    pub fn new(config: &'a GribConfig) -> Self {
        Self {
            config,
            groups: Vec::new(),
            by_hash: HashMap::new(),
            stats: GroupingStats::default(),
        }
    }

    /// Add every record of one source file, tagging each with `file_index`.
    pub fn add_file(&mut self, file_index: u32, records: Vec<HeaderRecord>) {
        for mut record in records {
            self.stats.total += 1;

            if !self.config.interval_filter.keep(&record) {
                self.stats.filtered += 1;
                continue;
            }

            record.file_index = file_index;
            let hash = self.config.remap(GridHash::of(&record.gds));
            let slot = match self.by_hash.get(&hash) {
                Some(&slot) => slot,
                None => {
                    debug!(grid = %hash, file_index, "New grid");
                    self.groups.push(PendingGroup {
                        hash,
                        gds: record.gds.clone(),
                        records: Vec::new(),
                    });
                    self.by_hash.insert(hash, self.groups.len() - 1);
                    self.groups.len() - 1
                }
            };
            self.groups[slot].records.push(record);
            self.stats.kept += 1;
        }
    }

    pub fn stats(&self) -> GroupingStats {
        self.stats
    }

    /// Groups in first-seen order, with the final counters.
    pub fn finish(self) -> (Vec<PendingGroup>, GroupingStats) {
        (self.groups, self.stats)
    }
}
