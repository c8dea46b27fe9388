//! Index writers.
//!
//! Indexes are written to a temporary file in the target directory and
//! renamed over the target only once complete, so a failed write never
//! disturbs an existing index.

use super::records::encode_block;
use super::schema::{
    CollectionMeta, GroupMeta, PartitionMeta, PartitionRefMeta, PartitionedGroupMeta,
    PartitionedVariableMeta, VariableMeta,
};
use super::{metadata_options, IndexKind, INDEX_VERSION};
use crate::collection::GribCollection;
use crate::error::{CollectionError, Result};
use crate::partition::TimePartition;
use crate::variable::BlockRef;
use bincode::Options;
use serde::Serialize;
use std::fs;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, info};
use unsigned_varint::encode as varint;

/// Sink for record blocks that tracks their offsets.
struct RecordSink<'w, W: Write> {
    out: &'w mut W,
    written: u64,
}

impl<W: Write> RecordSink<'_, W> {
    fn write_block(&mut self, bytes: &[u8]) -> Result<BlockRef> {
        self.out.write_all(bytes)?;
        let block = BlockRef {
            offset: self.written,
            length: bytes.len() as u64,
        };
        self.written += block.length;
        Ok(block)
    }
}

/// Write a collection index at `path`.
///
/// Fails without touching `path` if the collection has no variables.
pub fn write_collection(path: &Path, collection: &GribCollection) -> Result<()> {
    if collection.variable_count() == 0 {
        return Err(CollectionError::NoVariables(collection.name.clone()));
    }

    write_index(path, IndexKind::Collection, |sink| {
        let mut groups = Vec::with_capacity(collection.groups.len());
        for (gi, group) in collection.groups.iter().enumerate() {
            let mut variables = Vec::with_capacity(group.variables.len());
            for (vi, var) in group.variables.iter().enumerate() {
                let cells = collection.records(gi, vi)?;
                let block = sink.write_block(&encode_block(var.cdm_hash, cells))?;
                variables.push(VariableMeta {
                    key: var.key.clone(),
                    cdm_hash: var.cdm_hash,
                    coords: var.coords,
                    mixed_intervals: var.mixed_intervals,
                    record_count: var.record_count as u64,
                    block,
                });
            }
            groups.push(GroupMeta {
                hash: group.hash.0,
                gds: group.gds.clone(),
                id: group.id.clone(),
                coordinates: group.coordinates.clone(),
                variables,
                files: group.files.clone(),
            });
        }

        encode_metadata(&CollectionMeta {
            name: collection.name.clone(),
            directory: collection.directory.to_string_lossy().into_owned(),
            files: collection.files.clone(),
            groups,
            center: collection.center,
        })
    })?;

    info!(
        path = %path.display(),
        groups = collection.groups.len(),
        variables = collection.variable_count(),
        files = collection.files.len(),
        "Wrote collection index"
    );
    Ok(())
}

/// Write a partition index at `path`. The records section is empty; cells
/// live in the partitions' own indexes.
pub fn write_partition(path: &Path, partition: &TimePartition) -> Result<()> {
    write_index(path, IndexKind::Partition, |_sink| {
        let partitions = partition
            .partitions
            .iter()
            .map(|p| PartitionRefMeta {
                name: p.name.clone(),
                index_path: p.index_path.to_string_lossy().into_owned(),
                last_modified: p.last_modified,
            })
            .collect();

        let groups = partition
            .groups
            .iter()
            .map(|g| PartitionedGroupMeta {
                hash: g.hash.0,
                gds: g.gds.clone(),
                id: g.id.clone(),
                coordinates: g.coordinates.clone(),
                variables: g
                    .variables
                    .iter()
                    .map(|v| PartitionedVariableMeta {
                        key: v.key.clone(),
                        cdm_hash: v.cdm_hash,
                        coords: v.coords,
                        mixed_intervals: v.mixed_intervals,
                        union: v.union as u32,
                        partitions: v.partitions.clone(),
                    })
                    .collect(),
            })
            .collect();

        encode_metadata(&PartitionMeta {
            name: partition.name.clone(),
            directory: partition.directory.to_string_lossy().into_owned(),
            partitions,
            canonical: partition.canonical as u32,
            groups,
            unions: partition.unions.clone(),
            center: partition.center,
        })
    })?;

    info!(
        path = %path.display(),
        partitions = partition.partitions.len(),
        unions = partition.unions.len(),
        "Wrote partition index"
    );
    Ok(())
}

fn encode_metadata<T: Serialize>(meta: &T) -> Result<Vec<u8>> {
    metadata_options()
        .serialize(meta)
        .map_err(|e| CollectionError::Other(anyhow::anyhow!("Failed to encode index metadata: {}", e)))
}

/// Write the envelope around the records produced by `body`, which
/// returns the encoded metadata block.
fn write_index<F>(path: &Path, kind: IndexKind, body: F) -> Result<()>
where
    F: FnOnce(&mut RecordSink<'_, BufWriter<&fs::File>>) -> Result<Vec<u8>>,
{
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    // dropped (and deleted) on any early return
    let tmp = NamedTempFile::new_in(dir)?;
    {
        let mut out = BufWriter::new(tmp.as_file());
        let magic = kind.magic();
        out.write_all(magic)?;
        out.write_all(&INDEX_VERSION.to_be_bytes())?;
        let length_pos = (magic.len() + 4) as u64;
        out.write_all(&0i64.to_be_bytes())?;

        let mut sink = RecordSink { out: &mut out, written: 0 };
        let metadata = body(&mut sink)?;
        let records_len = sink.written;

        out.seek(SeekFrom::Start(length_pos))?;
        out.write_all(&(records_len as i64).to_be_bytes())?;
        out.seek(SeekFrom::End(0))?;

        let mut len_buf = varint::u64_buffer();
        out.write_all(varint::u64(metadata.len() as u64, &mut len_buf))?;
        out.write_all(&metadata)?;
        out.flush()?;
        debug!(records = records_len, metadata = metadata.len(), "Index body written");
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| CollectionError::Io(e.error))?;
    Ok(())
}
