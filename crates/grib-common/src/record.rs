//! Decoded message header records.

use crate::error::{RecordError, RecordResult};
use crate::time::{TimeInterval, TimeUnit};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Stand-in for the second value of a level that is not a layer.
pub const MISSING_LEVEL_VALUE: f64 = -9999.0;

/// Level types that name a surface rather than a position on an axis
/// (GRIB2 code table 4.5). Records on these levels get no vertical
/// coordinate.
const UNVALUED_LEVEL_TYPES: &[u8] = &[
    1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 14, 101, 200, 201, 204, 206, 207, 209, 210, 211, 212,
    213, 214, 220, 222, 223, 224, 232, 234, 242, 243, 244, 245, 246, 247, 248, 249, 251, 252,
];

/// Header of one GRIB2 message, as produced by the external decoder.
///
/// Only the fields needed to place the message in a collection index are
/// kept; the payload itself is located through `data_offset`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeaderRecord {
    pub discipline: u8,
    pub category: u8,
    pub parameter: u8,

    #[serde(default)]
    pub master_table_version: u8,
    #[serde(default)]
    pub local_table_version: u8,
    #[serde(default)]
    pub center: u16,
    #[serde(default)]
    pub subcenter: u16,

    pub reference_time: DateTime<Utc>,
    pub time_unit: TimeUnit,
    pub forecast: ForecastTime,
    pub level: Level,

    #[serde(default)]
    pub ensemble: Option<EnsembleMember>,
    #[serde(default)]
    pub ensemble_derived_type: Option<u8>,
    #[serde(default)]
    pub probability: Option<Probability>,

    #[serde(default)]
    pub gen_process_type: u8,
    #[serde(default)]
    pub gen_process_id: u8,
    #[serde(default)]
    pub background_process_id: u8,

    /// Raw grid-definition section bytes.
    pub gds: Vec<u8>,

    /// Position of the source file in its collection; assigned while
    /// grouping.
    #[serde(default)]
    pub file_index: u32,
    pub data_offset: u64,
    #[serde(default)]
    pub bitmap_offset: Option<u64>,
}

impl HeaderRecord {
    /// Parameter id used by interval filters:
    /// `(discipline << 16) + (category << 8) + parameter`.
    pub fn param_id(&self) -> u32 {
        ((self.discipline as u32) << 16) + ((self.category as u32) << 8) + self.parameter as u32
    }

    /// Forecast time as an interval; point forecasts have `start == end`.
    pub fn interval(&self) -> TimeInterval {
        match self.forecast {
            ForecastTime::Offset(offset) => TimeInterval::point(offset),
            ForecastTime::Interval { start, end, .. } => TimeInterval::new(start, end),
        }
    }

    pub fn is_interval(&self) -> bool {
        matches!(self.forecast, ForecastTime::Interval { .. })
    }

    /// Statistical process type of an interval forecast.
    pub fn interval_type(&self) -> Option<u8> {
        match self.forecast {
            ForecastTime::Offset(_) => None,
            ForecastTime::Interval { statistic, .. } => Some(statistic),
        }
    }

    /// Basic structural checks on decoder output.
    pub fn validate(&self) -> RecordResult<()> {
        if self.gds.is_empty() {
            return Err(RecordError::MissingGrid);
        }
        if self.data_offset == 0 {
            return Err(RecordError::ZeroOffset);
        }
        if let ForecastTime::Interval { start, end, .. } = self.forecast {
            if end < start {
                return Err(RecordError::InvalidInterval { start, end });
            }
        }
        Ok(())
    }
}

/// Forecast offset or statistical interval relative to the reference time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastTime {
    Offset(i32),
    Interval { start: i32, end: i32, statistic: u8 },
}

/// Vertical level of a record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Level {
    pub level_type: u8,
    #[serde(default)]
    pub value1: f64,
    /// Second bound, present only for layers.
    #[serde(default)]
    pub value2: Option<f64>,
}

impl Level {
    pub fn new(level_type: u8, value1: f64) -> Self {
        Self { level_type, value1, value2: None }
    }

    pub fn layer(level_type: u8, value1: f64, value2: f64) -> Self {
        Self { level_type, value1, value2: Some(value2) }
    }

    pub fn is_layer(&self) -> bool {
        self.value2.is_some()
    }

    /// Whether this level type carries a value worth a vertical axis.
    pub fn has_value(&self) -> bool {
        !UNVALUED_LEVEL_TYPES.contains(&self.level_type)
    }

    /// `(value1, value2)` with the missing sentinel for non-layers.
    pub fn values(&self) -> (f64, f64) {
        (self.value1, self.value2.unwrap_or(MISSING_LEVEL_VALUE))
    }
}

/// One member of an ensemble forecast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EnsembleMember {
    pub ens_type: u8,
    pub number: u32,
}

/// Probability forecast descriptor (GRIB2 code table 4.9).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Probability {
    pub prob_type: u8,
    #[serde(default)]
    pub lower_limit: f64,
    #[serde(default)]
    pub upper_limit: f64,
}

impl Probability {
    /// Name distinguishing probability products of one parameter.
    pub fn name(&self) -> String {
        match self.prob_type {
            0 => format!("probability_below_{}", self.lower_limit),
            1 => format!("probability_above_{}", self.upper_limit),
            2 => format!("probability_between_{}_{}", self.lower_limit, self.upper_limit),
            3 => format!("probability_above_{}", self.lower_limit),
            4 => format!("probability_below_{}", self.upper_limit),
            other => format!("probability_type{}", other),
        }
    }

    /// Threshold used by interval filters: `1000 * upper_limit`.
    pub fn threshold(&self) -> i32 {
        (self.upper_limit * 1000.0).round() as i32
    }
}

/// Total order on level value pairs.
pub fn cmp_level_values(a: (f64, f64), b: (f64, f64)) -> Ordering {
    a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1))
}
