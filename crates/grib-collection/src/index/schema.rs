//! Metadata block schema.
//!
//! These structs are the persisted form; they mirror the in-memory model
//! but carry record block positions instead of record maps. Any change
//! here needs an `INDEX_VERSION` bump.

use crate::collection::{CenterInfo, FileEntry};
use crate::coord::Coordinate;
use crate::partition::{PartitionSlot, UnionCoordinate};
use crate::variable::{BlockRef, CoordRefs, VariableKey};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct CollectionMeta {
    pub name: String,
    pub directory: String,
    pub files: Vec<FileEntry>,
    pub groups: Vec<GroupMeta>,
    pub center: CenterInfo,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct GroupMeta {
    pub hash: u32,
    pub gds: Vec<u8>,
    pub id: String,
    pub coordinates: Vec<Coordinate>,
    pub variables: Vec<VariableMeta>,
    pub files: Vec<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct VariableMeta {
    pub key: VariableKey,
    pub cdm_hash: u32,
    pub coords: CoordRefs,
    pub mixed_intervals: bool,
    pub record_count: u64,
    pub block: BlockRef,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct PartitionMeta {
    pub name: String,
    pub directory: String,
    pub partitions: Vec<PartitionRefMeta>,
    pub canonical: u32,
    pub groups: Vec<PartitionedGroupMeta>,
    pub unions: Vec<UnionCoordinate>,
    pub center: CenterInfo,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct PartitionRefMeta {
    pub name: String,
    pub index_path: String,
    pub last_modified: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct PartitionedGroupMeta {
    pub hash: u32,
    pub gds: Vec<u8>,
    pub id: String,
    pub coordinates: Vec<Coordinate>,
    pub variables: Vec<PartitionedVariableMeta>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct PartitionedVariableMeta {
    pub key: VariableKey,
    pub cdm_hash: u32,
    pub coords: CoordRefs,
    pub mixed_intervals: bool,
    pub union: u32,
    pub partitions: Vec<PartitionSlot>,
}
