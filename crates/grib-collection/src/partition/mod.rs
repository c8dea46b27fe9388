//! Time partitions.
//!
//! A time partition stitches several collections (typically one per day
//! or per model run) into one logical dataset. Its index stores only
//! metadata: the canonical partition's groups and variables, a union time
//! coordinate per variable, and for each variable where it lives in every
//! partition. Record lookups open the owning partition's collection index
//! on first use.

mod builder;
mod union;

pub use builder::{CanonicalPolicy, PartitionBuilder, PartitionSpec};
pub use union::{RejectedAxis, UnionCoordinate, UnionEntry};

use crate::collection::{CenterInfo, GribCollection};
use crate::coord::{Coordinate, EnsCoord, TimeCoord, VertCoord};
use crate::error::{CollectionError, Result};
use crate::index::read_collection;
use crate::variable::{CoordRefs, RecordLocation, VariableKey};
use chrono::{DateTime, Utc};
use grib_common::{system_time_millis, GridHash, TimeInterval};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, warn};

/// The variable's vertical values differ from the canonical partition's.
pub const VERT_COORDS_DIFFER: u8 = 1;
/// The variable's ensemble members differ from the canonical partition's.
pub const ENS_COORDS_DIFFER: u8 = 2;

/// Where a partitioned variable lives in one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionSlot {
    pub partition: u32,
    pub group: u32,
    pub variable: u32,
    pub flags: u8,
}

impl PartitionSlot {
    pub fn vert_differs(&self) -> bool {
        self.flags & VERT_COORDS_DIFFER != 0
    }

    pub fn ens_differs(&self) -> bool {
        self.flags & ENS_COORDS_DIFFER != 0
    }
}

/// One member collection of a time partition.
#[derive(Debug)]
pub struct Partition {
    pub name: String,
    pub index_path: PathBuf,
    /// Modification time of `index_path` when the partition index was
    /// written, in milliseconds.
    pub last_modified: i64,
    collection: OnceLock<GribCollection>,
}

impl Partition {
    pub fn new(name: String, index_path: PathBuf, last_modified: i64) -> Self {
        Self {
            name,
            index_path,
            last_modified,
            collection: OnceLock::new(),
        }
    }

    pub(crate) fn with_collection(name: String, index_path: PathBuf, last_modified: i64, collection: GribCollection) -> Self {
        let partition = Self::new(name, index_path, last_modified);
        let _ = partition.collection.set(collection);
        partition
    }

    pub fn is_open(&self) -> bool {
        self.collection.get().is_some()
    }

    /// The partition's collection, reading its index on first use.
    pub fn collection(&self, min_version: i32) -> Result<&GribCollection> {
        if let Some(c) = self.collection.get() {
            return Ok(c);
        }

        if let Ok(modified) = fs::metadata(&self.index_path).and_then(|m| m.modified()) {
            if system_time_millis(modified) > self.last_modified {
                warn!(
                    partition = %self.name,
                    index = %self.index_path.display(),
                    "Partition index changed after the time partition was built"
                );
            }
        }

        let collection = read_collection(&self.index_path, min_version)?;
        debug!(partition = %self.name, "Opened partition collection");
        let _ = self.collection.set(collection);
        self.collection
            .get()
            .ok_or_else(|| CollectionError::invalid(&self.index_path, "partition collection unavailable"))
    }

    /// Release the collection's index file; it stays usable.
    pub fn close(&self) {
        if let Some(c) = self.collection.get() {
            c.close();
        }
    }
}

#[derive(Debug, Clone)]
pub struct PartitionedVariable {
    pub key: VariableKey,
    pub cdm_hash: u32,
    /// Axes in the group's (canonical) coordinate list; `time` is the
    /// canonical partition's axis, superseded by `union` for lookups.
    pub coords: CoordRefs,
    pub mixed_intervals: bool,
    /// Index into [`TimePartition::unions`].
    pub union: usize,
    /// One slot per partition holding the variable, ascending.
    pub partitions: Vec<PartitionSlot>,
}

impl PartitionedVariable {
    pub fn name(&self) -> String {
        if self.mixed_intervals {
            format!("{}_Mixed_intervals", self.key.name())
        } else {
            self.key.name()
        }
    }

    pub fn slot(&self, partition: u32) -> Option<&PartitionSlot> {
        self.partitions
            .binary_search_by_key(&partition, |s| s.partition)
            .ok()
            .map(|i| &self.partitions[i])
    }
}

#[derive(Debug, Clone)]
pub struct PartitionedGroup {
    pub hash: GridHash,
    pub gds: Vec<u8>,
    pub id: String,
    pub coordinates: Vec<Coordinate>,
    pub variables: Vec<PartitionedVariable>,
}

impl PartitionedGroup {
    pub fn variable_index(&self, cdm_hash: u32) -> Option<usize> {
        self.variables.iter().position(|v| v.cdm_hash == cdm_hash)
    }

    pub fn vertical_coord(&self, var: &PartitionedVariable) -> Option<&VertCoord> {
        self.coordinates.get(var.coords.vertical?)?.as_vertical()
    }

    pub fn ensemble_coord(&self, var: &PartitionedVariable) -> Option<&EnsCoord> {
        self.coordinates.get(var.coords.ensemble?)?.as_ensemble()
    }
}

/// A record found through a time partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRecord {
    /// Index of the partition the record came from.
    pub partition: usize,
    pub runtime: DateTime<Utc>,
    pub file: PathBuf,
    pub location: RecordLocation,
}

#[derive(Debug)]
pub struct TimePartition {
    pub name: String,
    pub directory: PathBuf,
    pub partitions: Vec<Partition>,
    /// Index of the partition whose schema the groups follow.
    pub canonical: usize,
    pub groups: Vec<PartitionedGroup>,
    pub unions: Vec<UnionCoordinate>,
    pub center: CenterInfo,
    pub version: i32,
    pub(crate) min_version: i32,
    pub(crate) index_path: Option<PathBuf>,
}

impl TimePartition {
    pub fn groups(&self) -> &[PartitionedGroup] {
        &self.groups
    }

    pub fn group_index(&self, id: &str) -> Option<usize> {
        self.groups.iter().position(|g| g.id == id)
    }

    pub fn partition(&self, name: &str) -> Option<&Partition> {
        self.partitions.iter().find(|p| p.name == name)
    }

    pub fn index_path(&self) -> Option<&Path> {
        self.index_path.as_deref()
    }

    fn variable(&self, group: usize, variable: usize) -> Result<(&PartitionedGroup, &PartitionedVariable)> {
        let g = self.groups.get(group).ok_or(CollectionError::UnknownVariable { group, variable })?;
        let v = g
            .variables
            .get(variable)
            .ok_or(CollectionError::UnknownVariable { group, variable })?;
        Ok((g, v))
    }

    /// The merged time axis of one variable.
    pub fn union_coordinate(&self, group: usize, variable: usize) -> Result<&UnionCoordinate> {
        let (_, v) = self.variable(group, variable)?;
        self.unions
            .get(v.union)
            .ok_or(CollectionError::UnknownVariable { group, variable })
    }

    /// Locate a record by union time index and canonical ensemble and
    /// vertical indices (0 for absent axes).
    ///
    /// The record comes from the partition owning the time value; the
    /// latest runtime holding it wins. Returns `None` for a missing cell,
    /// including one whose ensemble member or level does not exist in the
    /// owning partition.
    pub fn resolve(
        &self,
        group: usize,
        variable: usize,
        time: usize,
        ensemble: usize,
        vertical: usize,
    ) -> Result<Option<ResolvedRecord>> {
        let (pgroup, pvar) = self.variable(group, variable)?;
        let union = self
            .unions
            .get(pvar.union)
            .ok_or(CollectionError::UnknownVariable { group, variable })?;
        let Some(entry) = union.entries.get(time) else {
            return Ok(None);
        };
        let Some(slot) = pvar.slot(entry.partition) else {
            return Ok(None);
        };
        let pi = entry.partition as usize;
        let partition = self
            .partitions
            .get(pi)
            .ok_or_else(|| CollectionError::invalid(self.describe(), "union entry names a missing partition"))?;

        let collection = partition.collection(self.min_version)?;
        let (gi, vi) = (slot.group as usize, slot.variable as usize);
        let local_var = collection
            .groups
            .get(gi)
            .and_then(|g| g.variables.get(vi).map(|v| (g, v)));
        let (local_group, local_var) = match local_var {
            Some((g, v)) if v.cdm_hash == pvar.cdm_hash => (g, v),
            _ => {
                return Err(CollectionError::invalid(
                    &partition.index_path,
                    format!("does not hold {} where the time partition expects it", pvar.name()),
                ))
            }
        };

        let ensemble = if slot.ens_differs() {
            let wanted = pgroup.ensemble_coord(pvar).and_then(|c| c.values.get(ensemble));
            let local = wanted.and_then(|m| local_group.ensemble_coord(local_var)?.index_of(m));
            match local {
                Some(i) => i,
                None => return Ok(None),
            }
        } else {
            ensemble
        };
        let vertical = if slot.vert_differs() {
            let wanted = pgroup.vertical_coord(pvar).and_then(|c| c.values.get(vertical));
            let local = wanted.and_then(|l| local_group.vertical_coord(local_var)?.index_of(l));
            match local {
                Some(i) => i,
                None => return Ok(None),
            }
        } else {
            vertical
        };

        let records = collection.records(gi, vi)?;
        let shape = local_var.shape;
        let local_time = entry.local as usize;
        for runtime in (0..shape.runtime).rev() {
            let Some(cell) = shape.index(runtime, local_time, ensemble, vertical) else {
                continue;
            };
            if let Some(location) = records.get(cell).copied().flatten() {
                let runtime = local_group
                    .runtime_coord(local_var)
                    .and_then(|c| c.values.get(runtime).copied())
                    .unwrap_or_default();
                let file = collection.file_path(location.file_index).ok_or_else(|| {
                    CollectionError::invalid(&partition.index_path, "record names a file outside the file list")
                })?;
                return Ok(Some(ResolvedRecord {
                    partition: pi,
                    runtime,
                    file,
                    location,
                }));
            }
        }
        Ok(None)
    }

    /// Like [`TimePartition::resolve`], addressing time by value in the
    /// union's unit. A value not on the union axis is a missing cell.
    pub fn resolve_value(
        &self,
        group: usize,
        variable: usize,
        time: TimeInterval,
        ensemble: usize,
        vertical: usize,
    ) -> Result<Option<ResolvedRecord>> {
        match self.union_coordinate(group, variable)?.index_of(&time) {
            Some(t) => self.resolve(group, variable, t, ensemble, vertical),
            None => Ok(None),
        }
    }

    /// The canonical partition's time axis of a variable.
    pub fn canonical_time(&self, group: usize, variable: usize) -> Result<Option<&TimeCoord>> {
        let (g, v) = self.variable(group, variable)?;
        Ok(g.coordinates.get(v.coords.time).and_then(Coordinate::as_time))
    }

    /// Release every open partition index file.
    pub fn close(&self) {
        for p in &self.partitions {
            p.close();
        }
    }

    fn describe(&self) -> PathBuf {
        self.index_path
            .clone()
            .unwrap_or_else(|| self.directory.join(&self.name))
    }
}
