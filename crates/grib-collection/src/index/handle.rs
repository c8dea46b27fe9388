//! Open index file used for lazy record paging.

use super::reader::block_fits;
use super::records::decode_block;
use crate::error::{CollectionError, Result};
use crate::variable::{BlockRef, Cells, Variable};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::trace;

/// Exclusive handle on one index file.
///
/// The file is closed by [`IndexHandle::close`] or on drop, and reopened on
/// the next block read.
#[derive(Debug)]
pub struct IndexHandle {
    path: PathBuf,
    records_start: u64,
    records_len: u64,
    file: Mutex<Option<File>>,
}

impl IndexHandle {
    pub(crate) fn new(path: PathBuf, file: File, records_start: u64, records_len: u64) -> Self {
        Self {
            path,
            records_start,
            records_len,
            file: Mutex::new(Some(file)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.file.lock().is_some()
    }

    pub fn close(&self) {
        self.file.lock().take();
    }

    /// Read and decode the record block of `var`.
    pub(crate) fn read_block(&self, var: &Variable, block: BlockRef) -> Result<Cells> {
        let start = self
            .records_start
            .checked_add(block.offset)
            .filter(|_| block_fits(block, var.shape.len(), self.records_len));
        let Some(start) = start else {
            return Err(CollectionError::invalid(
                &self.path,
                format!(
                    "record block {}+{} of {} does not fit the records section",
                    block.offset,
                    block.length,
                    var.name()
                ),
            ));
        };

        let mut buf = vec![0u8; block.length as usize];
        {
            let mut guard = self.file.lock();
            if guard.is_none() {
                *guard = Some(File::open(&self.path)?);
            }
            if let Some(file) = guard.as_mut() {
                file.seek(SeekFrom::Start(start))?;
                file.read_exact(&mut buf)
                    .map_err(|e| CollectionError::invalid(&self.path, e))?;
            }
        }
        trace!(path = %self.path.display(), variable = %var.name(), bytes = buf.len(), "Paged in records");

        decode_block(&self.path, &buf, var.cdm_hash, var.shape.len())
    }
}
