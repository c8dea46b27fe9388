//! Common helpers for grib-collection integration tests.

#![allow(dead_code)]

use grib_collection::{
    BuildContext, CollectionSource, CollectionSpec, GribConfig, JsonInventoryDecoder, PartitionSpec,
};
use std::path::Path;
use test_utils::INVENTORY_SUFFIX;

pub static DECODER: JsonInventoryDecoder = JsonInventoryDecoder;

pub fn context(config: &GribConfig) -> BuildContext<'_> {
    BuildContext::new(config, &DECODER)
}

/// A collection over every inventory under `dir`.
pub fn spec_for(name: &str, dir: &Path) -> CollectionSpec {
    CollectionSpec::new(name, CollectionSource::directory(dir, INVENTORY_SUFFIX))
}

/// A time partition over the named subdirectories of `root`, in order.
pub fn partition_for(name: &str, root: &Path, children: &[&str]) -> PartitionSpec {
    PartitionSpec::new(
        name,
        root,
        children.iter().map(|c| spec_for(c, &root.join(c))).collect(),
    )
}
