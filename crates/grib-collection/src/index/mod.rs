//! Binary index files.
//!
//! Layout, all integers big-endian:
//!
//! ```text
//! magic            "GribCollectionIndex" | "GribPartitionIndex"
//! version          i32
//! records length   i64
//! records          one block per variable (partition indexes: empty)
//! metadata length  unsigned varint
//! metadata         bincode, fixed-width big-endian integers
//! ```
//!
//! A record block is `cdm_hash:u32, cells:u32` followed by `cells` entries
//! of `file_index:u32, pos:u64, bitmap_pos:u64`; an empty cell is all
//! zeros.

pub mod handle;
pub mod reader;
mod records;
mod schema;
pub mod writer;

use bincode::Options;

pub use reader::{probe, read_collection, read_partition};
pub use writer::{write_collection, write_partition};

pub const COLLECTION_MAGIC: &[u8] = b"GribCollectionIndex";
pub const PARTITION_MAGIC: &[u8] = b"GribPartitionIndex";

/// Version written by this build.
pub const INDEX_VERSION: i32 = 1;

/// Oldest version this build can read.
pub const MIN_INDEX_VERSION: i32 = 1;

pub const COLLECTION_SUFFIX: &str = ".gcx";
pub const PARTITION_SUFFIX: &str = ".gpx";

const MAX_METADATA_LEN: u64 = 512 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Collection,
    Partition,
}

impl IndexKind {
    pub fn magic(&self) -> &'static [u8] {
        match self {
            IndexKind::Collection => COLLECTION_MAGIC,
            IndexKind::Partition => PARTITION_MAGIC,
        }
    }
}

fn metadata_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_big_endian()
        .with_fixint_encoding()
        .with_limit(MAX_METADATA_LEN)
}
