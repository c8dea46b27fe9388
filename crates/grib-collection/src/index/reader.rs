//! Index readers.
//!
//! Reading never derives coordinates: everything comes from the metadata
//! block, and record maps stay on disk until first use.

use super::handle::IndexHandle;
use super::records::block_len;
use super::schema::{CollectionMeta, PartitionMeta};
use super::{metadata_options, IndexKind, INDEX_VERSION, MAX_METADATA_LEN};
use crate::collection::{shape_of, GribCollection, Group};
use crate::error::{CollectionError, Result};
use crate::partition::{Partition, PartitionedGroup, PartitionedVariable, TimePartition};
use crate::variable::{BlockRef, Variable};
use bincode::Options;
use grib_common::GridHash;
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::debug;

struct Envelope {
    file: File,
    version: i32,
    records_start: u64,
    records_len: u64,
    metadata: Vec<u8>,
}

/// Check magic and version without decoding the metadata.
pub fn probe(path: &Path, kind: IndexKind, min_version: i32) -> Result<i32> {
    let mut file = File::open(path)?;
    read_header(&mut file, path, kind, min_version).map(|(version, _)| version)
}

fn read_header(file: &mut File, path: &Path, kind: IndexKind, min_version: i32) -> Result<(i32, i64)> {
    let truncated = |e: io::Error| CollectionError::invalid(path, format!("truncated header: {}", e));

    let magic = kind.magic();
    let mut found = vec![0u8; magic.len()];
    file.read_exact(&mut found).map_err(truncated)?;
    if found != magic {
        return Err(CollectionError::invalid(
            path,
            format!("expected magic {:?}", String::from_utf8_lossy(magic)),
        ));
    }

    let mut word = [0u8; 4];
    file.read_exact(&mut word).map_err(truncated)?;
    let version = i32::from_be_bytes(word);
    if version < min_version || version > INDEX_VERSION {
        return Err(CollectionError::Incompatible {
            path: path.to_path_buf(),
            found: version,
            min: min_version,
            max: INDEX_VERSION,
        });
    }

    let mut long = [0u8; 8];
    file.read_exact(&mut long).map_err(truncated)?;
    Ok((version, i64::from_be_bytes(long)))
}

fn read_envelope(path: &Path, kind: IndexKind, min_version: i32) -> Result<Envelope> {
    let mut file = File::open(path)?;
    let (version, records_len) = read_header(&mut file, path, kind, min_version)?;
    if records_len < 0 {
        return Err(CollectionError::invalid(path, "negative records length"));
    }
    let records_len = records_len as u64;
    let records_start = (kind.magic().len() + 12) as u64;

    let file_len = file.metadata()?.len();
    if records_start + records_len > file_len {
        return Err(CollectionError::invalid(path, "records section runs past end of file"));
    }
    file.seek(SeekFrom::Start(records_start + records_len))?;

    let metadata_len = unsigned_varint::io::read_u64(&mut file)
        .map_err(|e| CollectionError::invalid(path, format!("metadata length: {}", e)))?;
    if metadata_len > MAX_METADATA_LEN || metadata_len > file_len {
        return Err(CollectionError::invalid(
            path,
            format!("metadata length {} is implausible", metadata_len),
        ));
    }
    let mut metadata = vec![0u8; metadata_len as usize];
    file.read_exact(&mut metadata)
        .map_err(|e| CollectionError::invalid(path, format!("truncated metadata: {}", e)))?;

    Ok(Envelope {
        file,
        version,
        records_start,
        records_len,
        metadata,
    })
}

fn decode_metadata<T: DeserializeOwned>(path: &Path, bytes: &[u8]) -> Result<T> {
    metadata_options()
        .deserialize(bytes)
        .map_err(|e| CollectionError::invalid(path, format!("metadata: {}", e)))
}

/// A block must hold exactly `cells` cells and end inside the records section.
pub(crate) fn block_fits(block: BlockRef, cells: usize, records_len: u64) -> bool {
    block.length == block_len(cells) as u64
        && block
            .offset
            .checked_add(block.length)
            .is_some_and(|end| end <= records_len)
}

/// Read a collection index. Record maps are paged in on first lookup.
pub fn read_collection(path: &Path, min_version: i32) -> Result<GribCollection> {
    let env = read_envelope(path, IndexKind::Collection, min_version)?;
    let meta: CollectionMeta = decode_metadata(path, &env.metadata)?;

    let nfiles = meta.files.len() as u32;
    let mut groups = Vec::with_capacity(meta.groups.len());
    for gm in meta.groups {
        if gm.files.iter().any(|&f| f >= nfiles) {
            return Err(CollectionError::invalid(
                path,
                format!("group {} references a file outside the file list", gm.id),
            ));
        }
        let mut variables = Vec::with_capacity(gm.variables.len());
        for vm in gm.variables {
            let shape = shape_of(&gm.coordinates, &vm.coords).ok_or_else(|| {
                CollectionError::invalid(
                    path,
                    format!("variable {} has bad coordinate references", vm.key.name()),
                )
            })?;
            if !block_fits(vm.block, shape.len(), env.records_len) {
                return Err(CollectionError::invalid(
                    path,
                    format!(
                        "record block {}+{} of {} does not fit the records section",
                        vm.block.offset,
                        vm.block.length,
                        vm.key.name()
                    ),
                ));
            }
            variables.push(Variable::lazy(
                vm.key,
                vm.cdm_hash,
                vm.coords,
                shape,
                vm.mixed_intervals,
                vm.record_count as usize,
                vm.block,
            ));
        }
        groups.push(Group {
            hash: GridHash(gm.hash),
            gds: gm.gds,
            id: gm.id,
            coordinates: gm.coordinates,
            variables,
            files: gm.files,
        });
    }

    debug!(path = %path.display(), version = env.version, groups = groups.len(), "Read collection index");

    Ok(GribCollection {
        name: meta.name,
        directory: PathBuf::from(meta.directory),
        files: meta.files,
        groups,
        center: meta.center,
        version: env.version,
        index: Some(IndexHandle::new(
            path.to_path_buf(),
            env.file,
            env.records_start,
            env.records_len,
        )),
    })
}

/// Read a partition index. Partition collections are opened on demand.
pub fn read_partition(path: &Path, min_version: i32) -> Result<TimePartition> {
    let env = read_envelope(path, IndexKind::Partition, min_version)?;
    let meta: PartitionMeta = decode_metadata(path, &env.metadata)?;

    let npartitions = meta.partitions.len() as u32;
    let nunions = meta.unions.len();
    if meta.canonical >= npartitions.max(1) {
        return Err(CollectionError::invalid(path, "canonical partition out of range"));
    }

    let mut groups = Vec::with_capacity(meta.groups.len());
    for gm in meta.groups {
        let mut variables = Vec::with_capacity(gm.variables.len());
        for vm in gm.variables {
            let bad_slot = vm.partitions.iter().any(|s| s.partition >= npartitions);
            if shape_of(&gm.coordinates, &vm.coords).is_none() || vm.union as usize >= nunions || bad_slot {
                return Err(CollectionError::invalid(
                    path,
                    format!("partitioned variable {} has bad references", vm.key.name()),
                ));
            }
            variables.push(PartitionedVariable {
                key: vm.key,
                cdm_hash: vm.cdm_hash,
                coords: vm.coords,
                mixed_intervals: vm.mixed_intervals,
                union: vm.union as usize,
                partitions: vm.partitions,
            });
        }
        groups.push(PartitionedGroup {
            hash: GridHash(gm.hash),
            gds: gm.gds,
            id: gm.id,
            coordinates: gm.coordinates,
            variables,
        });
    }

    let partitions = meta
        .partitions
        .into_iter()
        .map(|p| Partition::new(p.name, PathBuf::from(p.index_path), p.last_modified))
        .collect();

    debug!(path = %path.display(), version = env.version, "Read partition index");

    Ok(TimePartition {
        name: meta.name,
        directory: PathBuf::from(meta.directory),
        partitions,
        canonical: meta.canonical as usize,
        groups,
        unions: meta.unions,
        center: meta.center,
        version: env.version,
        min_version,
        index_path: Some(path.to_path_buf()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{BuildContext, CollectionBuilder, CollectionSpec};
    use crate::config::{GribConfig, UpdateMode};
    use crate::index::MIN_INDEX_VERSION;
    use crate::source::{CollectionSource, JsonInventoryDecoder};
    use std::fs;
    use test_utils::{isobaric_temperature, CollectionFixture, INVENTORY_SUFFIX};
    use unsigned_varint::encode as varint;

    fn build_index(fixture: &mut CollectionFixture) -> PathBuf {
        fixture.add_file("run00", &isobaric_temperature(0, &[0, 6], &[50000.0, 85000.0]));
        let config = GribConfig::default();
        let ctx = BuildContext::new(&config, &JsonInventoryDecoder);
        let spec = CollectionSpec::new("blocks", CollectionSource::directory(fixture.path(), INVENTORY_SUFFIX));
        let builder = CollectionBuilder::new(spec, &ctx);
        builder.read_or_create(UpdateMode::Always).unwrap();
        builder.spec().index_path()
    }

    /// Rewrite the metadata block of a collection index in place.
    fn edit_metadata(path: &Path, edit: impl FnOnce(&mut CollectionMeta)) {
        let env = read_envelope(path, IndexKind::Collection, INDEX_VERSION).unwrap();
        let mut meta: CollectionMeta = decode_metadata(path, &env.metadata).unwrap();
        edit(&mut meta);
        let encoded = metadata_options().serialize(&meta).unwrap();

        let bytes = fs::read(path).unwrap();
        let mut out = bytes[..(env.records_start + env.records_len) as usize].to_vec();
        let mut len_buf = varint::u64_buffer();
        out.extend_from_slice(varint::u64(encoded.len() as u64, &mut len_buf));
        out.extend_from_slice(&encoded);
        fs::write(path, out).unwrap();
    }

    #[test]
    fn test_block_offset_past_records_is_invalid() {
        let mut fixture = CollectionFixture::new();
        let path = build_index(&mut fixture);
        edit_metadata(&path, |meta| meta.groups[0].variables[0].block.offset = u64::MAX - 2);

        let err = read_collection(&path, MIN_INDEX_VERSION).unwrap_err();
        assert!(matches!(err, CollectionError::IndexInvalid { .. }));
    }

    #[test]
    fn test_block_length_must_match_shape() {
        let mut fixture = CollectionFixture::new();
        let path = build_index(&mut fixture);
        edit_metadata(&path, |meta| meta.groups[0].variables[0].block.length -= 20);

        let err = read_collection(&path, MIN_INDEX_VERSION).unwrap_err();
        assert!(err.is_unusable_index());
    }

    #[test]
    fn test_overflowing_block_is_rejected_on_page_in() {
        let mut fixture = CollectionFixture::new();
        let path = build_index(&mut fixture);
        let mut coll = read_collection(&path, MIN_INDEX_VERSION).unwrap();
        let length = coll.groups[0].variables[0].block.map(|b| b.length).unwrap();
        coll.groups[0].variables[0].block = Some(BlockRef {
            offset: u64::MAX - 2,
            length,
        });

        let err = coll.records(0, 0).unwrap_err();
        assert!(matches!(err, CollectionError::IndexInvalid { .. }));
    }

    #[test]
    fn test_valid_index_pages_in() {
        let mut fixture = CollectionFixture::new();
        let path = build_index(&mut fixture);
        let coll = read_collection(&path, MIN_INDEX_VERSION).unwrap();
        let cells = coll.records(0, 0).unwrap();
        assert_eq!(cells.iter().flatten().count(), 4);
    }
}
