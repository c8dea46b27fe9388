//! Synthetic header record generators.
//!
//! These generators create predictable, verifiable records: data offsets
//! are derived from the record's position so tests can check exactly which
//! record ended up in which index cell.

use chrono::{DateTime, Duration, TimeZone, Utc};
use grib_common::{
    EnsembleMember, ForecastTime, HeaderRecord, Level, Probability, TimeUnit,
};

/// Reference time all generated runtimes are relative to.
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap()
}

/// Runtime `hours` after [`base_time`].
pub fn runtime(hours: i64) -> DateTime<Utc> {
    base_time() + Duration::hours(hours)
}

/// Grid-definition bytes for synthetic grid number `n`.
///
/// Distinct `n` produce distinct bytes (and therefore distinct grid hashes).
pub fn grid_bytes(n: u8) -> Vec<u8> {
    let mut gds = vec![0u8, 0, 0, 72, 3, 0];
    gds.extend_from_slice(&[n; 8]);
    gds.extend_from_slice(&(1440u32 + n as u32).to_be_bytes());
    gds.extend_from_slice(&721u32.to_be_bytes());
    gds
}

/// Fluent builder for [`HeaderRecord`]s.
///
/// Defaults to a surface temperature analysis on grid 0 at [`base_time`].
#[derive(Debug, Clone)]
pub struct RecordBuilder {
    record: HeaderRecord,
}

impl Default for RecordBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordBuilder {
    pub fn new() -> Self {
        Self {
            record: HeaderRecord {
                discipline: 0,
                category: 0,
                parameter: 0,
                master_table_version: 2,
                local_table_version: 1,
                center: 7,
                subcenter: 0,
                reference_time: base_time(),
                time_unit: TimeUnit::Hour,
                forecast: ForecastTime::Offset(0),
                level: Level::new(1, 0.0),
                ensemble: None,
                ensemble_derived_type: None,
                probability: None,
                gen_process_type: 2,
                gen_process_id: 96,
                background_process_id: 0,
                gds: grid_bytes(0),
                file_index: 0,
                data_offset: 1024,
                bitmap_offset: None,
            },
        }
    }

    pub fn param(mut self, discipline: u8, category: u8, parameter: u8) -> Self {
        self.record.discipline = discipline;
        self.record.category = category;
        self.record.parameter = parameter;
        self
    }

    pub fn runtime_hours(mut self, hours: i64) -> Self {
        self.record.reference_time = runtime(hours);
        self
    }

    pub fn offset(mut self, offset: i32) -> Self {
        self.record.forecast = ForecastTime::Offset(offset);
        self
    }

    pub fn interval(mut self, start: i32, end: i32) -> Self {
        self.record.forecast = ForecastTime::Interval { start, end, statistic: 1 };
        self
    }

    pub fn unit(mut self, unit: TimeUnit) -> Self {
        self.record.time_unit = unit;
        self
    }

    pub fn level(mut self, level_type: u8, value: f64) -> Self {
        self.record.level = Level::new(level_type, value);
        self
    }

    pub fn layer(mut self, level_type: u8, value1: f64, value2: f64) -> Self {
        self.record.level = Level::layer(level_type, value1, value2);
        self
    }

    /// Isobaric level in Pa.
    pub fn isobaric(self, pa: f64) -> Self {
        self.level(100, pa)
    }

    pub fn ensemble(mut self, ens_type: u8, number: u32) -> Self {
        self.record.ensemble = Some(EnsembleMember { ens_type, number });
        self
    }

    pub fn probability(mut self, prob_type: u8, lower: f64, upper: f64) -> Self {
        self.record.probability = Some(Probability {
            prob_type,
            lower_limit: lower,
            upper_limit: upper,
        });
        self
    }

    pub fn grid(mut self, n: u8) -> Self {
        self.record.gds = grid_bytes(n);
        self
    }

    pub fn center(mut self, center: u16, subcenter: u16) -> Self {
        self.record.center = center;
        self.record.subcenter = subcenter;
        self
    }

    pub fn table_version(mut self, version: u8) -> Self {
        self.record.master_table_version = version;
        self
    }

    pub fn at(mut self, data_offset: u64) -> Self {
        self.record.data_offset = data_offset;
        self
    }

    pub fn bitmap(mut self, bitmap_offset: u64) -> Self {
        self.record.bitmap_offset = Some(bitmap_offset);
        self
    }

    pub fn build(self) -> HeaderRecord {
        self.record
    }
}

/// Temperature on isobaric levels for every `(offset, level)` pair of one
/// runtime. Data offsets increase by 1000 per record, starting at 1000.
pub fn isobaric_temperature(runtime_hours: i64, offsets: &[i32], levels: &[f64]) -> Vec<HeaderRecord> {
    let mut records = Vec::with_capacity(offsets.len() * levels.len());
    for &offset in offsets {
        for &level in levels {
            let pos = 1000 * (records.len() as u64 + 1);
            records.push(
                RecordBuilder::new()
                    .runtime_hours(runtime_hours)
                    .offset(offset)
                    .isobaric(level)
                    .at(pos)
                    .build(),
            );
        }
    }
    records
}

/// Surface pressure (no vertical axis) at the given offsets of one runtime.
pub fn surface_pressure(runtime_hours: i64, offsets: &[i32]) -> Vec<HeaderRecord> {
    offsets
        .iter()
        .enumerate()
        .map(|(i, &offset)| {
            RecordBuilder::new()
                .param(0, 3, 0)
                .runtime_hours(runtime_hours)
                .offset(offset)
                .at(500 + 1000 * i as u64)
                .build()
        })
        .collect()
}
