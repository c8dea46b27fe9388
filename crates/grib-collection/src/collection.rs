//! Built or loaded collections.

use crate::coord::{Coordinate, EnsCoord, RuntimeCoord, TimeCoord, VertCoord};
use crate::error::{CollectionError, Result};
use crate::index::handle::IndexHandle;
use crate::variable::{CoordRefs, RecordLocation, Shape, Variable};
use grib_common::{GridHash, HeaderRecord};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A source file of a collection. `name` is relative to the collection
/// directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    pub size: u64,
    /// Milliseconds since the Unix epoch.
    pub last_modified: i64,
}

/// Originating center and generating process, taken from the first record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CenterInfo {
    pub center: u16,
    pub subcenter: u16,
    pub master_table_version: u8,
    pub local_table_version: u8,
    pub gen_process_type: u8,
    pub gen_process_id: u8,
    pub background_process_id: u8,
}

impl CenterInfo {
    pub fn from_record(record: &HeaderRecord) -> Self {
        Self {
            center: record.center,
            subcenter: record.subcenter,
            master_table_version: record.master_table_version,
            local_table_version: record.local_table_version,
            gen_process_type: record.gen_process_type,
            gen_process_id: record.gen_process_id,
            background_process_id: record.background_process_id,
        }
    }
}

/// Position of one cell in a variable's record map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CellIndex {
    pub runtime: usize,
    pub time: usize,
    pub ensemble: usize,
    pub vertical: usize,
}

impl CellIndex {
    pub fn new(runtime: usize, time: usize) -> Self {
        Self { runtime, time, ..Default::default() }
    }

    pub fn with_vertical(mut self, vertical: usize) -> Self {
        self.vertical = vertical;
        self
    }

    pub fn with_ensemble(mut self, ensemble: usize) -> Self {
        self.ensemble = ensemble;
        self
    }
}

/// All variables of one horizontal grid.
#[derive(Debug)]
pub struct Group {
    pub hash: GridHash,
    pub gds: Vec<u8>,
    pub id: String,
    pub coordinates: Vec<Coordinate>,
    pub variables: Vec<Variable>,
    /// Indices into the collection file list of the files contributing
    /// records, ascending.
    pub files: Vec<u32>,
}

impl Group {
    /// Position of the variable with this hash; the first one wins if an
    /// index holds duplicates.
    pub fn variable_index(&self, cdm_hash: u32) -> Option<usize> {
        self.variables.iter().position(|v| v.cdm_hash == cdm_hash)
    }

    pub fn variable(&self, cdm_hash: u32) -> Option<&Variable> {
        self.variable_index(cdm_hash).map(|i| &self.variables[i])
    }

    pub fn runtime_coord(&self, var: &Variable) -> Option<&RuntimeCoord> {
        self.coordinates.get(var.coords.runtime)?.as_runtime()
    }

    pub fn time_coord(&self, var: &Variable) -> Option<&TimeCoord> {
        self.coordinates.get(var.coords.time)?.as_time()
    }

    pub fn vertical_coord(&self, var: &Variable) -> Option<&VertCoord> {
        self.coordinates.get(var.coords.vertical?)?.as_vertical()
    }

    pub fn ensemble_coord(&self, var: &Variable) -> Option<&EnsCoord> {
        self.coordinates.get(var.coords.ensemble?)?.as_ensemble()
    }

    /// Fraction of record-map cells holding a record, over all variables.
    pub fn density(&self) -> f64 {
        let (filled, total) = self.variables.iter().fold((0usize, 0usize), |(f, t), v| {
            (f + v.record_count, t + v.shape.len())
        });
        if total == 0 {
            0.0
        } else {
            filled as f64 / total as f64
        }
    }
}

/// Record-map shape of `refs`, or `None` if a reference is out of range
/// or points at the wrong kind of axis.
pub(crate) fn shape_of(coords: &[Coordinate], refs: &CoordRefs) -> Option<Shape> {
    let runtime = coords.get(refs.runtime)?.as_runtime()?.values.len();
    let time = coords.get(refs.time)?.as_time()?.values.len();
    let vertical = match refs.vertical {
        Some(i) => coords.get(i)?.as_vertical()?.values.len(),
        None => 1,
    };
    let ensemble = match refs.ensemble {
        Some(i) => coords.get(i)?.as_ensemble()?.values.len(),
        None => 1,
    };
    Some(Shape { runtime, time, ensemble, vertical })
}

/// An indexed collection of GRIB files.
#[derive(Debug)]
pub struct GribCollection {
    pub name: String,
    pub directory: PathBuf,
    pub files: Vec<FileEntry>,
    pub groups: Vec<Group>,
    pub center: CenterInfo,
    /// Format version of the index this collection was read from, or the
    /// current version for fresh builds.
    pub version: i32,
    pub(crate) index: Option<IndexHandle>,
}

impl GribCollection {
    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn group_index(&self, id: &str) -> Option<usize> {
        self.groups.iter().position(|g| g.id == id)
    }

    pub fn group(&self, id: &str) -> Option<&Group> {
        self.group_index(id).map(|i| &self.groups[i])
    }

    pub fn files(&self) -> &[FileEntry] {
        &self.files
    }

    /// Full path of a source file.
    pub fn file_path(&self, file_index: u32) -> Option<PathBuf> {
        self.files
            .get(file_index as usize)
            .map(|f| self.directory.join(&f.name))
    }

    /// Source files contributing to one group.
    pub fn group_files(&self, group: &Group) -> Vec<&FileEntry> {
        group
            .files
            .iter()
            .filter_map(|&i| self.files.get(i as usize))
            .collect()
    }

    pub fn variable_count(&self) -> usize {
        self.groups.iter().map(|g| g.variables.len()).sum()
    }

    pub fn index_path(&self) -> Option<&Path> {
        self.index.as_ref().map(|h| h.path())
    }

    /// The record map of one variable, paged in from the index if needed.
    pub fn records(&self, group: usize, variable: usize) -> Result<&[Option<RecordLocation>]> {
        let var = self
            .groups
            .get(group)
            .and_then(|g| g.variables.get(variable))
            .ok_or(CollectionError::UnknownVariable { group, variable })?;

        var.cells_with(|var, block| match &self.index {
            Some(handle) => handle.read_block(var, block),
            None => Ok(vec![None; var.shape.len()]),
        })
    }

    /// Location of the record at `cell`, or `None` for an empty or
    /// out-of-range cell.
    pub fn resolve(&self, group: usize, variable: usize, cell: CellIndex) -> Result<Option<RecordLocation>> {
        let records = self.records(group, variable)?;
        let shape = self.groups[group].variables[variable].shape;
        Ok(shape
            .index(cell.runtime, cell.time, cell.ensemble, cell.vertical)
            .and_then(|i| records.get(i).copied().flatten()))
    }

    /// Release the index file handle. Records already paged in stay
    /// available; later lookups reopen the file.
    pub fn close(&self) {
        if let Some(handle) = &self.index {
            handle.close();
        }
    }
}
