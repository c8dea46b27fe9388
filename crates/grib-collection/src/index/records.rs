//! Record block codec.

use crate::error::{CollectionError, Result};
use crate::variable::{Cells, RecordLocation};
use bytes::{Buf, BufMut};
use std::path::Path;

const HEADER_SIZE: usize = 8;
const CELL_SIZE: usize = 20;

pub(crate) fn block_len(cells: usize) -> usize {
    HEADER_SIZE + cells * CELL_SIZE
}

pub(crate) fn encode_block(cdm_hash: u32, cells: &[Option<RecordLocation>]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(block_len(cells.len()));
    buf.put_u32(cdm_hash);
    buf.put_u32(cells.len() as u32);
    for cell in cells {
        match cell {
            Some(loc) => {
                buf.put_u32(loc.file_index);
                buf.put_u64(loc.pos);
                buf.put_u64(loc.bitmap_pos.unwrap_or(0));
            }
            None => {
                buf.put_u32(0);
                buf.put_u64(0);
                buf.put_u64(0);
            }
        }
    }
    buf
}

/// Decode a block, checking it belongs to the expected variable and has
/// the expected number of cells.
pub(crate) fn decode_block(path: &Path, mut bytes: &[u8], cdm_hash: u32, cells: usize) -> Result<Cells> {
    if bytes.len() != block_len(cells) {
        return Err(CollectionError::invalid(
            path,
            format!(
                "record block is {} bytes, expected {} for {} cells",
                bytes.len(),
                block_len(cells),
                cells
            ),
        ));
    }

    let found = bytes.get_u32();
    if found != cdm_hash {
        return Err(CollectionError::CorruptRecords {
            expected: cdm_hash,
            found,
        });
    }
    let count = bytes.get_u32() as usize;
    if count != cells {
        return Err(CollectionError::invalid(
            path,
            format!("record block holds {} cells, expected {}", count, cells),
        ));
    }

    let mut out = Vec::with_capacity(cells);
    for _ in 0..cells {
        let file_index = bytes.get_u32();
        let pos = bytes.get_u64();
        let bitmap = bytes.get_u64();
        out.push((file_index != 0 || pos != 0).then_some(RecordLocation {
            file_index,
            pos,
            bitmap_pos: (bitmap != 0).then_some(bitmap),
        }));
    }
    Ok(out)
}
