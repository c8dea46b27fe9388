//! GRIB collection indexing and time partitioning.
//!
//! This crate turns a set of GRIB2 files into a *collection*: records are
//! grouped by horizontal grid, sorted into variables, and each variable's
//! records are placed on a rectilinear runtime × time × ensemble × vertical
//! grid of cells. The result is persisted as a compact binary index so
//! later opens never rescan the files.
//!
//! Collections spanning consecutive periods can be combined into a
//! [`TimePartition`], which serves one logical dataset whose time axes are
//! the union of its partitions' axes.
//!
//! # Example
//!
//! ```ignore
//! use grib_collection::{
//!     BuildContext, CollectionBuilder, CollectionSource, CollectionSpec,
//!     GribConfig, JsonInventoryDecoder, UpdateMode,
//! };
//!
//! let config = GribConfig::default();
//! let ctx = BuildContext::new(&config, &JsonInventoryDecoder);
//! let spec = CollectionSpec::new("gfs", CollectionSource::directory("/data/gfs", ".grib2.json"));
//! let built = CollectionBuilder::new(spec, &ctx).read_or_create(UpdateMode::IfStale)?;
//! println!("{}", built.report);
//! ```

pub mod builder;
pub mod collection;
pub mod config;
pub mod coord;
pub mod diagnostics;
pub mod error;
pub mod grouping;
pub mod index;
pub mod partition;
pub mod rectilyser;
pub mod source;
pub mod variable;

pub use builder::{BuildContext, CollectionBuilder, CollectionSpec};
pub use collection::{CellIndex, CenterInfo, FileEntry, GribCollection, Group};
pub use config::{GribConfig, IntervalFilter, IntervalRule, ParamId, ProtoChoice, TableVersionPolicy, UpdateMode};
pub use coord::{CoordKind, Coordinate, EnsCoord, LevelValue, RuntimeCoord, TimeCoord, VertCoord};
pub use diagnostics::{BuildAction, BuildReport, Built, PartitionReport, SkippedFile};
pub use error::{AxisMismatch, CollectionError, Result};
pub use index::{IndexKind, INDEX_VERSION, MIN_INDEX_VERSION};
pub use partition::{
    CanonicalPolicy, Partition, PartitionBuilder, PartitionSlot, PartitionSpec, PartitionedGroup,
    PartitionedVariable, ResolvedRecord, TimePartition, UnionCoordinate, UnionEntry,
};
pub use source::{CollectionSource, JsonInventoryDecoder, RecordDecoder, SourceFile};
pub use variable::{CoordRefs, RecordLocation, Shape, Variable, VariableKey};
