//! Variable identity and sparse record maps.

use crate::config::GribConfig;
use crate::error::Result;
use grib_common::HeaderRecord;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Everything that makes two records "the same variable" within a group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VariableKey {
    pub table_version: u8,
    pub discipline: u8,
    pub category: u8,
    pub parameter: u8,
    pub level_type: u8,
    pub is_layer: bool,
    pub interval_type: Option<u8>,
    pub interval_name: Option<String>,
    pub ens_derived_type: Option<u8>,
    pub prob_type: Option<u8>,
    pub prob_name: Option<String>,
    pub gen_process_type: u8,
}

impl VariableKey {
    pub fn from_record(record: &HeaderRecord, config: &GribConfig) -> Self {
        let interval_name = match (record.is_interval(), config.interval_merge) {
            (true, false) => Some(interval_name(record)),
            _ => None,
        };
        Self {
            table_version: config.table_version.effective(record.master_table_version),
            discipline: record.discipline,
            category: record.category,
            parameter: record.parameter,
            level_type: record.level.level_type,
            is_layer: record.level.is_layer(),
            interval_type: record.interval_type(),
            interval_name,
            ens_derived_type: record.ensemble_derived_type,
            prob_type: record.probability.map(|p| p.prob_type),
            prob_name: record.probability.map(|p| p.name()),
            gen_process_type: record.gen_process_type,
        }
    }

    /// CRC-32 over a canonical encoding of every identity field.
    pub fn cdm_hash(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&[
            self.table_version,
            self.discipline,
            self.category,
            self.parameter,
            self.level_type,
            self.is_layer as u8,
        ]);
        hash_opt_u8(&mut hasher, self.interval_type);
        hash_opt_str(&mut hasher, self.interval_name.as_deref());
        hash_opt_u8(&mut hasher, self.ens_derived_type);
        hash_opt_u8(&mut hasher, self.prob_type);
        hash_opt_str(&mut hasher, self.prob_name.as_deref());
        hasher.update(&[self.gen_process_type]);
        hasher.finalize()
    }

    /// Human-readable name, unique within a group.
    pub fn name(&self) -> String {
        let mut name = format!(
            "VAR_{}-{}-{}_L{}",
            self.discipline, self.category, self.parameter, self.level_type
        );
        if self.is_layer {
            name.push_str("_layer");
        }
        match (&self.interval_name, self.interval_type) {
            (Some(intv), _) => name.push_str(&format!("_{}", intv)),
            (None, Some(stat)) => name.push_str(&format!("_S{}", stat)),
            _ => {}
        }
        if let Some(derived) = self.ens_derived_type {
            name.push_str(&format!("_D{}", derived));
        }
        if let Some(prob) = &self.prob_name {
            name.push_str(&format!("_{}", prob));
        }
        name
    }
}

fn hash_opt_u8(hasher: &mut crc32fast::Hasher, value: Option<u8>) {
    match value {
        Some(v) => hasher.update(&[1, v]),
        None => hasher.update(&[0]),
    }
}

fn hash_opt_str(hasher: &mut crc32fast::Hasher, value: Option<&str>) {
    match value {
        Some(s) => {
            hasher.update(&[1]);
            hasher.update(&(s.len() as u32).to_be_bytes());
            hasher.update(s.as_bytes());
        }
        None => hasher.update(&[0]),
    }
}

/// `<length>_<base unit>`, e.g. `6_Hour`.
fn interval_name(record: &HeaderRecord) -> String {
    let length = record.interval().length() * i64::from(record.time_unit.multiplier());
    format!("{}_{}", length, record.time_unit.base_name())
}

/// Where one message lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLocation {
    pub file_index: u32,
    pub pos: u64,
    pub bitmap_pos: Option<u64>,
}

impl RecordLocation {
    pub fn of(record: &HeaderRecord) -> Self {
        Self {
            file_index: record.file_index,
            pos: record.data_offset,
            bitmap_pos: record.bitmap_offset,
        }
    }
}

/// Indices of a variable's axes in its group's coordinate list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CoordRefs {
    pub runtime: usize,
    pub time: usize,
    pub vertical: Option<usize>,
    pub ensemble: Option<usize>,
}

/// Axis lengths of a record map; absent axes count as 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shape {
    pub runtime: usize,
    pub time: usize,
    pub ensemble: usize,
    pub vertical: usize,
}

impl Shape {
    pub fn len(&self) -> usize {
        self.runtime * self.time * self.ensemble * self.vertical
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Canonical cell position: runtime, then time, ensemble, vertical.
    pub fn index(&self, runtime: usize, time: usize, ensemble: usize, vertical: usize) -> Option<usize> {
        if runtime >= self.runtime
            || time >= self.time
            || ensemble >= self.ensemble
            || vertical >= self.vertical
        {
            return None;
        }
        Some(((runtime * self.time + time) * self.ensemble + ensemble) * self.vertical + vertical)
    }
}

/// Byte range of a variable's record block within the records section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    pub offset: u64,
    pub length: u64,
}

pub type Cells = Vec<Option<RecordLocation>>;

/// A variable of one group.
///
/// Freshly built variables hold their record map in memory; variables read
/// from an index page it in on first use.
#[derive(Debug)]
pub struct Variable {
    pub key: VariableKey,
    pub cdm_hash: u32,
    pub coords: CoordRefs,
    pub shape: Shape,
    /// Records of more than one interval length share this variable.
    pub mixed_intervals: bool,
    /// Number of cells holding a record.
    pub record_count: usize,
    pub(crate) block: Option<BlockRef>,
    cells: OnceLock<Cells>,
}

impl Variable {
    pub(crate) fn built(key: VariableKey, coords: CoordRefs, shape: Shape, cells: Cells, mixed_intervals: bool) -> Self {
        let record_count = cells.iter().filter(|c| c.is_some()).count();
        let lock = OnceLock::new();
        let _ = lock.set(cells);
        Self {
            cdm_hash: key.cdm_hash(),
            key,
            coords,
            shape,
            mixed_intervals,
            record_count,
            block: None,
            cells: lock,
        }
    }

    pub(crate) fn lazy(
        key: VariableKey,
        cdm_hash: u32,
        coords: CoordRefs,
        shape: Shape,
        mixed_intervals: bool,
        record_count: usize,
        block: BlockRef,
    ) -> Self {
        Self {
            key,
            cdm_hash,
            coords,
            shape,
            mixed_intervals,
            record_count,
            block: Some(block),
            cells: OnceLock::new(),
        }
    }

    pub fn name(&self) -> String {
        if self.mixed_intervals {
            format!("{}_Mixed_intervals", self.key.name())
        } else {
            self.key.name()
        }
    }

    /// Fraction of cells holding a record.
    pub fn density(&self) -> f64 {
        if self.shape.is_empty() {
            0.0
        } else {
            self.record_count as f64 / self.shape.len() as f64
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.cells.get().is_some()
    }

    /// The record map, paging it in with `load` when not yet resident.
    pub(crate) fn cells_with<F>(&self, load: F) -> Result<&[Option<RecordLocation>]>
    where
        F: FnOnce(&Variable, BlockRef) -> Result<Cells>,
    {
        if let Some(cells) = self.cells.get() {
            return Ok(cells);
        }
        let block = self.block.unwrap_or(BlockRef { offset: 0, length: 0 });
        let cells = load(self, block)?;
        // another reader may have won the race; both decoded the same block
        let _ = self.cells.set(cells);
        Ok(self.cells.get().map(Vec::as_slice).unwrap_or(&[]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::RecordBuilder;

    #[test]
    fn test_same_variable_same_hash() {
        let config = GribConfig::default();
        let a = VariableKey::from_record(&RecordBuilder::new().offset(0).build(), &config);
        let b = VariableKey::from_record(
            &RecordBuilder::new().offset(6).runtime_hours(12).build(),
            &config,
        );
        assert_eq!(a, b);
        assert_eq!(a.cdm_hash(), b.cdm_hash());
    }

    #[test]
    fn test_identity_fields_change_hash() {
        let config = GribConfig::default();
        let base = VariableKey::from_record(&RecordBuilder::new().build(), &config);
        let others = [
            RecordBuilder::new().param(0, 0, 1).build(),
            RecordBuilder::new().table_version(3).build(),
            RecordBuilder::new().isobaric(50000.0).build(),
            RecordBuilder::new().interval(0, 6).build(),
            RecordBuilder::new().probability(1, 0.0, 1.0).build(),
        ];
        for record in others {
            let key = VariableKey::from_record(&record, &config);
            assert_ne!(key.cdm_hash(), base.cdm_hash(), "{:?}", key);
        }
    }

    #[test]
    fn test_interval_merge_drops_length() {
        let mut config = GribConfig::default();
        let three = RecordBuilder::new().interval(0, 3).build();
        let six = RecordBuilder::new().interval(0, 6).build();
        assert_ne!(
            VariableKey::from_record(&three, &config),
            VariableKey::from_record(&six, &config)
        );
        assert_eq!(
            VariableKey::from_record(&six, &config).interval_name.as_deref(),
            Some("6_Hour")
        );

        config.interval_merge = true;
        assert_eq!(
            VariableKey::from_record(&three, &config),
            VariableKey::from_record(&six, &config)
        );
    }

    #[test]
    fn test_shape_index_is_canonical() {
        let shape = Shape { runtime: 2, time: 3, ensemble: 1, vertical: 4 };
        assert_eq!(shape.len(), 24);
        assert_eq!(shape.index(0, 0, 0, 0), Some(0));
        assert_eq!(shape.index(0, 0, 0, 3), Some(3));
        assert_eq!(shape.index(0, 1, 0, 0), Some(4));
        assert_eq!(shape.index(1, 0, 0, 0), Some(12));
        assert_eq!(shape.index(1, 2, 0, 3), Some(23));
        assert_eq!(shape.index(2, 0, 0, 0), None);
    }

    #[test]
    fn test_name() {
        let config = GribConfig::default();
        let key = VariableKey::from_record(
            &RecordBuilder::new().param(0, 1, 8).interval(0, 6).build(),
            &config,
        );
        assert_eq!(key.name(), "VAR_0-1-8_L1_6_Hour");
    }

    #[test]
    fn test_name_of_extreme_interval() {
        let config = GribConfig::default();
        let record = RecordBuilder::new()
            .param(0, 1, 8)
            .interval(i32::MIN, i32::MAX)
            .unit(grib_common::TimeUnit::Hours6)
            .build();
        let key = VariableKey::from_record(&record, &config);
        assert_eq!(key.name(), "VAR_0-1-8_L1_25769803770_Hour");
    }
}
