//! Union time coordinates.
//!
//! A union coordinate merges one variable's time axis across partitions.
//! Each value remembers which partition supplies it and where it sits on
//! that partition's own axis; when several partitions hold the same value
//! the earliest partition wins.

use crate::coord::TimeCoord;
use grib_common::{TimeInterval, TimeUnit};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnionEntry {
    pub value: TimeInterval,
    /// Partition supplying this value.
    pub partition: u32,
    /// Index of the value on that partition's time axis.
    pub local: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnionCoordinate {
    pub unit: TimeUnit,
    pub is_interval: bool,
    /// Ascending by value.
    pub entries: Vec<UnionEntry>,
}

/// A partition's time axis left out of a union.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedAxis {
    pub partition: u32,
    pub reason: String,
}

impl UnionCoordinate {
    /// Merge the time axes of one variable.
    ///
    /// `axes` pairs partition indices with that partition's axis for the
    /// variable, in partition order. The union takes its unit and interval
    /// type from `canonical`; an axis of the other type, or one whose unit
    /// cannot be converted, is rejected as if the variable were absent
    /// from that partition.
    pub fn build(canonical: &TimeCoord, axes: &[(u32, &TimeCoord)]) -> (Self, Vec<RejectedAxis>) {
        let mut values: BTreeMap<TimeInterval, (u32, u32)> = BTreeMap::new();
        let mut rejected = Vec::new();

        for &(partition, axis) in axes {
            if axis.is_interval != canonical.is_interval {
                rejected.push(RejectedAxis {
                    partition,
                    reason: "time axis interval type differs from canonical".to_string(),
                });
                continue;
            }
            let converted: Result<Vec<TimeInterval>, _> = axis
                .values
                .iter()
                .map(|v| v.convert(axis.unit, canonical.unit))
                .collect();
            let converted = match converted {
                Ok(c) => c,
                Err(e) => {
                    rejected.push(RejectedAxis {
                        partition,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            for (local, value) in converted.into_iter().enumerate() {
                values.entry(value).or_insert((partition, local as u32));
            }
        }

        let entries = values
            .into_iter()
            .map(|(value, (partition, local))| UnionEntry { value, partition, local })
            .collect();

        (
            Self {
                unit: canonical.unit,
                is_interval: canonical.is_interval,
                entries,
            },
            rejected,
        )
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn values(&self) -> Vec<TimeInterval> {
        self.entries.iter().map(|e| e.value).collect()
    }

    pub fn index_of(&self, value: &TimeInterval) -> Option<usize> {
        self.entries.binary_search_by(|e| e.value.cmp(value)).ok()
    }
}

/// Union coordinates shared by equality across a time partition.
#[derive(Debug, Default)]
pub(crate) struct UnionTable {
    unions: Vec<UnionCoordinate>,
    positions: HashMap<UnionCoordinate, usize>,
}

impl UnionTable {
    pub fn intern(&mut self, union: UnionCoordinate) -> usize {
        if let Some(&i) = self.positions.get(&union) {
            return i;
        }
        let i = self.unions.len();
        self.positions.insert(union.clone(), i);
        self.unions.push(union);
        i
    }

    pub fn into_inner(self) -> Vec<UnionCoordinate> {
        self.unions
    }
}
