//! Coordinate axes.
//!
//! A coordinate is an immutable, strictly ascending, deduplicated list of
//! axis values. Each kind is accumulated by its own builder and frozen with
//! `finish()`; the finished [`Coordinate`] can then locate any header
//! record on its axis.

use chrono::{DateTime, Utc};
use grib_common::{
    cmp_level_values, EnsembleMember, HeaderRecord, RecordResult, TimeInterval, TimeUnit,
};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CoordKind {
    Runtime,
    Time,
    Vertical,
    Ensemble,
}

impl fmt::Display for CoordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CoordKind::Runtime => "runtime",
            CoordKind::Time => "time",
            CoordKind::Vertical => "vertical",
            CoordKind::Ensemble => "ensemble",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Coordinate {
    Runtime(RuntimeCoord),
    Time(TimeCoord),
    Vertical(VertCoord),
    Ensemble(EnsCoord),
}

impl Coordinate {
    pub fn kind(&self) -> CoordKind {
        match self {
            Coordinate::Runtime(_) => CoordKind::Runtime,
            Coordinate::Time(_) => CoordKind::Time,
            Coordinate::Vertical(_) => CoordKind::Vertical,
            Coordinate::Ensemble(_) => CoordKind::Ensemble,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Coordinate::Runtime(c) => c.values.len(),
            Coordinate::Time(c) => c.values.len(),
            Coordinate::Vertical(c) => c.values.len(),
            Coordinate::Ensemble(c) => c.values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Position of the record's value on this axis.
    pub fn index_of_record(&self, record: &HeaderRecord) -> Option<usize> {
        match self {
            Coordinate::Runtime(c) => c.index_of(&record.reference_time),
            Coordinate::Time(c) => c.index_of(&c.record_value(record).ok()?),
            Coordinate::Vertical(c) => c.index_of(&LevelValue::from_record(record)),
            Coordinate::Ensemble(c) => c.index_of(&record.ensemble?),
        }
    }

    pub fn as_runtime(&self) -> Option<&RuntimeCoord> {
        match self {
            Coordinate::Runtime(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<&TimeCoord> {
        match self {
            Coordinate::Time(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_vertical(&self) -> Option<&VertCoord> {
        match self {
            Coordinate::Vertical(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_ensemble(&self) -> Option<&EnsCoord> {
        match self {
            Coordinate::Ensemble(c) => Some(c),
            _ => None,
        }
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]:", self.kind(), self.len())?;
        match self {
            Coordinate::Runtime(c) => {
                for v in &c.values {
                    write!(f, " {}", v.format("%Y-%m-%dT%H:%MZ"))?;
                }
            }
            Coordinate::Time(c) => {
                write!(f, " ({})", c.unit)?;
                for v in &c.values {
                    write!(f, " {}", v)?;
                }
            }
            Coordinate::Vertical(c) => {
                write!(f, " (type {})", c.level_type)?;
                for v in &c.values {
                    if c.is_layer {
                        write!(f, " ({},{})", v.value1, v.value2)?;
                    } else {
                        write!(f, " {}", v.value1)?;
                    }
                }
            }
            Coordinate::Ensemble(c) => {
                for v in &c.values {
                    write!(f, " {}:{}", v.ens_type, v.number)?;
                }
            }
        }
        Ok(())
    }
}

/// Model run (reference) times.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeCoord {
    pub values: Vec<DateTime<Utc>>,
}

impl RuntimeCoord {
    pub fn index_of(&self, value: &DateTime<Utc>) -> Option<usize> {
        self.values.binary_search(value).ok()
    }
}

/// Forecast offsets or statistical intervals, in `unit`.
///
/// Point offsets are stored as degenerate intervals; `is_interval` tells
/// whether the axis should be read as `(start, end)` pairs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeCoord {
    pub unit: TimeUnit,
    pub is_interval: bool,
    pub values: Vec<TimeInterval>,
}

impl TimeCoord {
    /// Multiplier of `unit` relative to its base unit.
    pub fn scale(&self) -> i32 {
        self.unit.multiplier()
    }

    pub fn index_of(&self, value: &TimeInterval) -> Option<usize> {
        self.values.binary_search(value).ok()
    }

    /// The record's forecast time expressed on this axis.
    pub fn record_value(&self, record: &HeaderRecord) -> RecordResult<TimeInterval> {
        record.interval().convert(record.time_unit, self.unit)
    }

    /// Forecast offsets (interval ends for interval axes).
    pub fn offsets(&self) -> Vec<i32> {
        self.values.iter().map(|v| v.end).collect()
    }
}

/// One vertical level; `value2` is [`grib_common::MISSING_LEVEL_VALUE`]
/// unless the level is a layer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LevelValue {
    pub value1: f64,
    pub value2: f64,
}

impl LevelValue {
    pub fn from_record(record: &HeaderRecord) -> Self {
        let (value1, value2) = record.level.values();
        Self { value1, value2 }
    }
}

impl PartialEq for LevelValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for LevelValue {}

impl PartialOrd for LevelValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LevelValue {
    fn cmp(&self, other: &Self) -> Ordering {
        cmp_level_values((self.value1, self.value2), (other.value1, other.value2))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VertCoord {
    pub level_type: u8,
    pub is_layer: bool,
    pub values: Vec<LevelValue>,
}

impl VertCoord {
    pub fn index_of(&self, value: &LevelValue) -> Option<usize> {
        self.values.binary_search(value).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnsCoord {
    pub values: Vec<EnsembleMember>,
}

impl EnsCoord {
    pub fn index_of(&self, value: &EnsembleMember) -> Option<usize> {
        self.values.binary_search(value).ok()
    }
}

/// Accumulates the distinct values of one axis.
pub trait CoordinateBuilder {
    /// Add the record's value. Fails if the record cannot be placed on
    /// this axis.
    fn add(&mut self, record: &HeaderRecord) -> RecordResult<()>;

    fn finish(self) -> Coordinate;
}

#[derive(Debug, Default)]
pub struct RuntimeBuilder {
    values: BTreeSet<DateTime<Utc>>,
}

impl CoordinateBuilder for RuntimeBuilder {
    fn add(&mut self, record: &HeaderRecord) -> RecordResult<()> {
        self.values.insert(record.reference_time);
        Ok(())
    }

    fn finish(self) -> Coordinate {
        Coordinate::Runtime(RuntimeCoord {
            values: self.values.into_iter().collect(),
        })
    }
}

/// Records are converted into the axis unit; those that cannot be are
/// rejected.
#[derive(Debug)]
pub struct TimeBuilder {
    unit: TimeUnit,
    is_interval: bool,
    values: BTreeSet<TimeInterval>,
}

impl TimeBuilder {
    pub fn new(unit: TimeUnit) -> Self {
        Self {
            unit,
            is_interval: false,
            values: BTreeSet::new(),
        }
    }

    /// Axis in the finest unit any of `records` uses, so the outcome does
    /// not depend on record order. Hours are used when `records` is empty.
    pub fn for_records<'r>(records: impl IntoIterator<Item = &'r HeaderRecord>) -> Self {
        let unit = TimeUnit::finest(records.into_iter().map(|r| r.time_unit));
        Self::new(unit.unwrap_or(TimeUnit::Hour))
    }
}

impl CoordinateBuilder for TimeBuilder {
    fn add(&mut self, record: &HeaderRecord) -> RecordResult<()> {
        let value = record.interval().convert(record.time_unit, self.unit)?;
        self.is_interval |= record.is_interval();
        self.values.insert(value);
        Ok(())
    }

    fn finish(self) -> Coordinate {
        Coordinate::Time(TimeCoord {
            unit: self.unit,
            is_interval: self.is_interval,
            values: self.values.into_iter().collect(),
        })
    }
}

#[derive(Debug)]
pub struct VertBuilder {
    level_type: u8,
    is_layer: bool,
    values: BTreeSet<LevelValue>,
}

impl VertBuilder {
    pub fn new(level_type: u8) -> Self {
        Self {
            level_type,
            is_layer: false,
            values: BTreeSet::new(),
        }
    }
}

impl CoordinateBuilder for VertBuilder {
    fn add(&mut self, record: &HeaderRecord) -> RecordResult<()> {
        self.is_layer |= record.level.is_layer();
        self.values.insert(LevelValue::from_record(record));
        Ok(())
    }

    fn finish(self) -> Coordinate {
        Coordinate::Vertical(VertCoord {
            level_type: self.level_type,
            is_layer: self.is_layer,
            values: self.values.into_iter().collect(),
        })
    }
}

#[derive(Debug, Default)]
pub struct EnsBuilder {
    values: BTreeSet<EnsembleMember>,
}

impl CoordinateBuilder for EnsBuilder {
    fn add(&mut self, record: &HeaderRecord) -> RecordResult<()> {
        if let Some(member) = record.ensemble {
            self.values.insert(member);
        }
        Ok(())
    }

    fn finish(self) -> Coordinate {
        Coordinate::Ensemble(EnsCoord {
            values: self.values.into_iter().collect(),
        })
    }
}
