//! Rectilinearization: turns one grid's records into coordinates and
//! variables with dense, tuple-addressed record maps.

use crate::collection::{shape_of, Group};
use crate::config::GribConfig;
use crate::coord::{
    Coordinate, CoordinateBuilder, EnsBuilder, RuntimeBuilder, TimeBuilder, VertBuilder,
};
use crate::grouping::PendingGroup;
use crate::variable::{CoordRefs, RecordLocation, Variable, VariableKey};
use grib_common::HeaderRecord;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

/// Counters for one rectilinearized group.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RectilyserStats {
    pub records: usize,
    /// Records that landed on an already-filled cell.
    pub duplicates: usize,
    /// Records that could not be placed (time unit mismatch, hash clash).
    pub skipped: usize,
    /// Distinct identities that collided on one cdm hash.
    pub hash_collisions: usize,
    pub filled: usize,
    pub cells: usize,
}

impl RectilyserStats {
    pub fn density(&self) -> f64 {
        if self.cells == 0 {
            0.0
        } else {
            self.filled as f64 / self.cells as f64
        }
    }
}

pub struct Rectilyser<'a> {
    config: &'a GribConfig,
}

impl<'a> Rectilyser<'a> {
    pub fn new(config: &'a GribConfig) -> Self {
        Self { config }
    }

    /// Derive the group's coordinates and variables.
    ///
    /// Records must be in collection file order: when two records map to
    /// the same cell the earlier one is kept.
    pub fn make(&self, pending: PendingGroup) -> (Group, RectilyserStats) {
        let mut stats = RectilyserStats {
            records: pending.records.len(),
            ..Default::default()
        };

        let mut coordinates: Vec<Coordinate> = Vec::new();
        let mut variables = Vec::new();
        let mut files = BTreeSet::new();
        let mut hashes = HashMap::new();

        for (key, records) in self.partition(&pending.records) {
            let cdm_hash = key.cdm_hash();
            if let Some(first) = hashes.get(&cdm_hash) {
                warn!(
                    grid = %pending.hash,
                    hash = format_args!("{:08x}", cdm_hash),
                    kept = %first,
                    dropped = %key.name(),
                    "Variable hash collision, keeping first variable"
                );
                stats.hash_collisions += 1;
                stats.skipped += records.len();
                continue;
            }
            hashes.insert(cdm_hash, key.name());

            if let Some(var) = self.make_variable(key, &records, &mut coordinates, &mut files, &mut stats) {
                variables.push(var);
            }
        }

        let group = Group {
            hash: pending.hash,
            id: self.config.group_id(pending.hash),
            gds: pending.gds,
            coordinates,
            variables,
            files: files.into_iter().collect(),
        };
        debug!(
            group = %group.id,
            variables = group.variables.len(),
            coordinates = group.coordinates.len(),
            density = stats.density(),
            "Rectilyzed group"
        );
        (group, stats)
    }

    /// Records by variable identity, in first-seen order.
    fn partition<'r>(&self, records: &'r [HeaderRecord]) -> Vec<(VariableKey, Vec<&'r HeaderRecord>)> {
        let mut order: Vec<(VariableKey, Vec<&HeaderRecord>)> = Vec::new();
        let mut by_key: HashMap<VariableKey, usize> = HashMap::new();
        for record in records {
            let key = VariableKey::from_record(record, self.config);
            match by_key.get(&key) {
                Some(&i) => order[i].1.push(record),
                None => {
                    by_key.insert(key.clone(), order.len());
                    order.push((key, vec![record]));
                }
            }
        }
        order
    }

    fn make_variable(
        &self,
        key: VariableKey,
        records: &[&HeaderRecord],
        coordinates: &mut Vec<Coordinate>,
        files: &mut BTreeSet<u32>,
        stats: &mut RectilyserStats,
    ) -> Option<Variable> {
        let mut time = TimeBuilder::for_records(records.iter().copied());
        let mut accepted = Vec::with_capacity(records.len());
        for &record in records {
            match time.add(record) {
                Ok(()) => accepted.push(record),
                Err(e) => {
                    debug!(variable = %key.name(), error = %e, "Skipping record");
                    stats.skipped += 1;
                }
            }
        }
        let first = *accepted.first()?;

        let mut runtime = RuntimeBuilder::default();
        let mut vertical = first.level.has_value().then(|| VertBuilder::new(first.level.level_type));
        let mut ensemble = accepted
            .iter()
            .any(|r| r.ensemble.is_some())
            .then(EnsBuilder::default);
        for &record in &accepted {
            // these builders accept every record
            let _ = runtime.add(record);
            if let Some(b) = vertical.as_mut() {
                let _ = b.add(record);
            }
            if let Some(b) = ensemble.as_mut() {
                let _ = b.add(record);
            }
        }

        let refs = CoordRefs {
            runtime: intern(coordinates, runtime.finish()),
            time: intern(coordinates, time.finish()),
            vertical: vertical.map(|b| intern(coordinates, b.finish())),
            ensemble: ensemble.map(|b| intern(coordinates, b.finish())),
        };
        let shape = shape_of(coordinates, &refs)?;

        let mut cells: Vec<Option<RecordLocation>> = vec![None; shape.len()];
        let mut lengths = BTreeSet::new();
        for &record in &accepted {
            let locate = |axis: Option<usize>| match axis {
                Some(i) => coordinates[i].index_of_record(record),
                None => Some(0),
            };
            let cell = match (
                locate(Some(refs.runtime)),
                locate(Some(refs.time)),
                locate(refs.ensemble),
                locate(refs.vertical),
            ) {
                (Some(r), Some(t), Some(e), Some(v)) => shape.index(r, t, e, v),
                _ => None,
            };
            let Some(cell) = cell else {
                stats.skipped += 1;
                continue;
            };
            if cells[cell].is_some() {
                stats.duplicates += 1;
                continue;
            }
            cells[cell] = Some(RecordLocation::of(record));
            files.insert(record.file_index);
            lengths.insert(record.interval().length());
            stats.filled += 1;
        }
        stats.cells += shape.len();

        let mixed_intervals = self.config.interval_merge && key.interval_type.is_some() && lengths.len() > 1;
        Some(Variable::built(key, refs, shape, cells, mixed_intervals))
    }
}

/// Index of `coord` in `coordinates`, appending it if no equal coordinate
/// is present.
fn intern(coordinates: &mut Vec<Coordinate>, coord: Coordinate) -> usize {
    match coordinates.iter().position(|c| *c == coord) {
        Some(i) => i,
        None => {
            coordinates.push(coord);
            coordinates.len() - 1
        }
    }
}
