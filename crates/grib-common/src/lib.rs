//! Common types shared by the GRIB collection indexing crates.
//!
//! The decoder that turns raw GRIB2 messages into [`HeaderRecord`]s lives
//! outside this workspace; everything downstream of it speaks the types
//! defined here.

pub mod error;
pub mod grid;
pub mod record;
pub mod time;

pub use error::{RecordError, RecordResult};
pub use grid::GridHash;
pub use record::{
    cmp_level_values, EnsembleMember, ForecastTime, HeaderRecord, Level, Probability,
    MISSING_LEVEL_VALUE,
};
pub use time::{system_time_millis, TimeInterval, TimeUnit};
