//! Time partition build-or-load.

use super::union::{UnionCoordinate, UnionTable};
use super::{
    Partition, PartitionSlot, PartitionedGroup, PartitionedVariable, TimePartition, ENS_COORDS_DIFFER,
    VERT_COORDS_DIFFER,
};
use crate::builder::{BuildContext, CollectionBuilder, CollectionSpec};
use crate::collection::GribCollection;
use crate::config::{ProtoChoice, UpdateMode};
use crate::coord::TimeCoord;
use crate::diagnostics::{BuildAction, Built, PartitionReport, SkippedFile};
use crate::error::{AxisMismatch, CollectionError, Result};
use crate::index::{probe, read_partition, write_partition, IndexKind, INDEX_VERSION, PARTITION_SUFFIX};
use grib_common::system_time_millis;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, instrument, warn};

/// Picks the canonical partition among `count` (at least one) partitions,
/// in partition order.
pub trait CanonicalPolicy: Send + Sync {
    fn choose(&self, count: usize) -> usize;
}

impl CanonicalPolicy for ProtoChoice {
    fn choose(&self, count: usize) -> usize {
        let last = count.saturating_sub(1);
        match self {
            ProtoChoice::First => 0,
            ProtoChoice::Latest => last,
            ProtoChoice::Penultimate => last.saturating_sub(1),
            ProtoChoice::Index(i) => (*i).min(last),
        }
    }
}

impl<F> CanonicalPolicy for F
where
    F: Fn(usize) -> usize + Send + Sync,
{
    fn choose(&self, count: usize) -> usize {
        self(count)
    }
}

/// A named time partition over child collections, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionSpec {
    pub name: String,
    pub directory: PathBuf,
    pub partitions: Vec<CollectionSpec>,
    /// Defaults to `<directory>/<name>.gpx`.
    #[serde(default)]
    pub index_path: Option<PathBuf>,
}

impl PartitionSpec {
    pub fn new(name: impl Into<String>, directory: impl Into<PathBuf>, partitions: Vec<CollectionSpec>) -> Self {
        Self {
            name: name.into(),
            directory: directory.into(),
            partitions,
            index_path: None,
        }
    }

    pub fn index_path(&self) -> PathBuf {
        self.index_path
            .clone()
            .unwrap_or_else(|| self.directory.join(format!("{}{}", self.name, PARTITION_SUFFIX)))
    }
}

pub struct PartitionBuilder<'a> {
    spec: PartitionSpec,
    ctx: &'a BuildContext<'a>,
    policy: &'a dyn CanonicalPolicy,
}

/// Output of merging partition schemas.
struct Assembly {
    groups: Vec<PartitionedGroup>,
    unions: Vec<UnionCoordinate>,
    missing: Vec<String>,
    flagged: Vec<String>,
    warnings: Vec<String>,
}

enum AxisCheck {
    Same,
    Differ,
    Presence { canonical_has_axis: bool },
}

fn compare_axis<T: PartialEq>(canonical: Option<&T>, other: Option<&T>) -> AxisCheck {
    match (canonical, other) {
        (None, None) => AxisCheck::Same,
        (Some(a), Some(b)) if a == b => AxisCheck::Same,
        (Some(_), Some(_)) => AxisCheck::Differ,
        (Some(_), None) => AxisCheck::Presence { canonical_has_axis: true },
        (None, Some(_)) => AxisCheck::Presence { canonical_has_axis: false },
    }
}

fn mtime_millis(path: &Path) -> Result<i64> {
    Ok(system_time_millis(fs::metadata(path)?.modified()?))
}

impl<'a> PartitionBuilder<'a> {
    pub fn new(spec: PartitionSpec, ctx: &'a BuildContext<'a>, policy: &'a dyn CanonicalPolicy) -> Self {
        Self { spec, ctx, policy }
    }

    pub fn spec(&self) -> &PartitionSpec {
        &self.spec
    }

    /// Load the partition index, building it (and any stale partition
    /// collections) first when `mode` asks for it.
    #[instrument(skip(self), fields(partition = %self.spec.name))]
    pub fn read_or_create(&self, mode: UpdateMode) -> Result<Built<TimePartition, PartitionReport>> {
        let index = self.spec.index_path();
        if !index.exists() {
            return self.create(mode, BuildAction::Created);
        }

        let reason = match mode {
            UpdateMode::Always => Some("update mode is always".to_string()),
            UpdateMode::Nocheck => None,
            UpdateMode::IfStale => self.stale_reason()?,
        };
        if let Some(reason) = reason {
            info!(reason = %reason, "Partition index needs rebuild");
            return self.create(mode, BuildAction::Rebuilt { reason });
        }

        match read_partition(&index, self.ctx.min_version) {
            Ok(partition) => {
                debug!(index = %index.display(), "Using existing partition index");
                Ok(Built {
                    value: partition,
                    report: PartitionReport::new(&self.spec.name, BuildAction::Loaded),
                })
            }
            Err(e) if e.is_unusable_index() => {
                warn!(index = %index.display(), error = %e, "Existing partition index unusable, rebuilding");
                self.create(mode, BuildAction::Rebuilt { reason: e.to_string() })
            }
            Err(e) => Err(e),
        }
    }

    /// Whether [`UpdateMode::IfStale`] would rebuild the partition index.
    pub fn needs_update(&self) -> Result<bool> {
        Ok(!self.spec.index_path().exists() || self.stale_reason()?.is_some())
    }

    fn stale_reason(&self) -> Result<Option<String>> {
        let index = self.spec.index_path();
        if let Err(e) = probe(&index, IndexKind::Partition, self.ctx.min_version) {
            if e.is_unusable_index() {
                return Ok(Some(e.to_string()));
            }
            return Err(e);
        }
        let index_mtime = mtime_millis(&index)?;

        for child in &self.spec.partitions {
            let child_index = child.index_path();
            if !child_index.exists() {
                return Ok(Some(format!("partition {} has no index", child.name)));
            }
            if mtime_millis(&child_index)? > index_mtime {
                return Ok(Some(format!("partition {} index is newer", child.name)));
            }
            if CollectionBuilder::new(child.clone(), self.ctx).needs_update()? {
                return Ok(Some(format!("partition {} is stale", child.name)));
            }
        }
        Ok(None)
    }

    fn create(&self, mode: UpdateMode, action: BuildAction) -> Result<Built<TimePartition, PartitionReport>> {
        let mut report = PartitionReport::new(&self.spec.name, action);
        info!(partitions = self.spec.partitions.len(), action = %report.action, "Building partition index");

        let opened: Vec<Result<Built<GribCollection>>> = self
            .spec
            .partitions
            .par_iter()
            .map(|child| CollectionBuilder::new(child.clone(), self.ctx).read_or_create(mode))
            .collect();

        let mut survivors: Vec<(&CollectionSpec, GribCollection)> = Vec::with_capacity(opened.len());
        for (child, result) in self.spec.partitions.iter().zip(opened) {
            match result {
                Ok(built) => {
                    report.children.push(built.report);
                    survivors.push((child, built.value));
                }
                Err(e) => {
                    error!(partition = %child.name, error = %e, "Failed to open partition, dropping it");
                    report.dropped.push(SkippedFile {
                        name: child.name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        if survivors.is_empty() {
            return Err(CollectionError::NoPartitions(self.spec.name.clone()));
        }

        let canonical = self.policy.choose(survivors.len()).min(survivors.len() - 1);
        report.canonical = Some(survivors[canonical].0.name.clone());

        let assembled = self.assemble(&survivors, canonical);
        for (_, c) in &survivors {
            c.close();
        }
        let assembly = assembled?;

        report.missing = assembly.missing;
        report.flagged = assembly.flagged;
        report.warnings = assembly.warnings;
        report.union_coordinates = assembly.unions.len();

        let center = survivors[canonical].1.center;
        let mut partitions = Vec::with_capacity(survivors.len());
        for (child, collection) in survivors {
            let index_path = child.index_path();
            let last_modified = mtime_millis(&index_path)?;
            partitions.push(Partition::with_collection(
                child.name.clone(),
                index_path,
                last_modified,
                collection,
            ));
        }

        let index_path = self.spec.index_path();
        let partition = TimePartition {
            name: self.spec.name.clone(),
            directory: self.spec.directory.clone(),
            partitions,
            canonical,
            groups: assembly.groups,
            unions: assembly.unions,
            center,
            version: INDEX_VERSION,
            min_version: self.ctx.min_version,
            index_path: Some(index_path.clone()),
        };
        write_partition(&index_path, &partition)?;
        info!(
            groups = partition.groups.len(),
            unions = partition.unions.len(),
            dropped = report.dropped.len(),
            "Time partition built"
        );

        Ok(Built { value: partition, report })
    }

    /// Merge partition schemas into the canonical partition's layout.
    ///
    /// A vertical or ensemble axis present in one partition's variable but
    /// not the canonical one's is fatal; differing values on an axis both
    /// have only flag the slot.
    fn assemble(&self, parts: &[(&CollectionSpec, GribCollection)], canonical: usize) -> Result<Assembly> {
        let canon = &parts[canonical].1;
        let mut table = UnionTable::default();
        let mut mismatches = Vec::new();
        let mut assembly = Assembly {
            groups: Vec::with_capacity(canon.groups.len()),
            unions: Vec::new(),
            missing: Vec::new(),
            flagged: Vec::new(),
            warnings: Vec::new(),
        };

        for cgroup in &canon.groups {
            let located: Vec<Option<usize>> = parts.iter().map(|(_, c)| c.group_index(&cgroup.id)).collect();
            for (p, loc) in located.iter().enumerate() {
                if loc.is_none() {
                    warn!(group = %cgroup.id, partition = %parts[p].0.name, "Group missing from partition");
                    assembly
                        .missing
                        .push(format!("group {} in partition {}", cgroup.id, parts[p].0.name));
                }
            }

            let mut variables = Vec::with_capacity(cgroup.variables.len());
            for cvar in &cgroup.variables {
                let Some(canon_time) = cgroup.time_coord(cvar) else {
                    return Err(CollectionError::invalid(
                        self.spec.index_path(),
                        format!("canonical variable {} has no time axis", cvar.name()),
                    ));
                };

                let mut slots = Vec::new();
                let mut axes: Vec<(u32, &TimeCoord)> = Vec::new();
                for (p, (child, coll)) in parts.iter().enumerate() {
                    let Some(gi) = located[p] else { continue };
                    let pgroup = &coll.groups[gi];
                    let Some(vi) = pgroup.variable_index(cvar.cdm_hash) else {
                        assembly
                            .missing
                            .push(format!("{}/{} in partition {}", cgroup.id, cvar.name(), child.name));
                        continue;
                    };
                    let pvar = &pgroup.variables[vi];

                    let mut flags = 0u8;
                    let mut fatal = false;
                    let checks = [
                        (
                            "vertical",
                            VERT_COORDS_DIFFER,
                            compare_axis(cgroup.vertical_coord(cvar), pgroup.vertical_coord(pvar)),
                        ),
                        (
                            "ensemble",
                            ENS_COORDS_DIFFER,
                            compare_axis(cgroup.ensemble_coord(cvar), pgroup.ensemble_coord(pvar)),
                        ),
                    ];
                    for (axis, flag, check) in checks {
                        match check {
                            AxisCheck::Same => {}
                            AxisCheck::Differ => flags |= flag,
                            AxisCheck::Presence { canonical_has_axis } => {
                                fatal = true;
                                mismatches.push(AxisMismatch {
                                    group: cgroup.id.clone(),
                                    variable: cvar.name(),
                                    partition: child.name.clone(),
                                    axis,
                                    canonical_has_axis,
                                });
                            }
                        }
                    }
                    if fatal {
                        continue;
                    }
                    if flags != 0 {
                        assembly
                            .flagged
                            .push(format!("{}/{} in partition {}", cgroup.id, cvar.name(), child.name));
                    }

                    slots.push(PartitionSlot {
                        partition: p as u32,
                        group: gi as u32,
                        variable: vi as u32,
                        flags,
                    });
                    if let Some(time) = pgroup.time_coord(pvar) {
                        axes.push((p as u32, time));
                    }
                }

                let (union, rejected) = UnionCoordinate::build(canon_time, &axes);
                for r in rejected {
                    let partition = &parts[r.partition as usize].0.name;
                    warn!(variable = %cvar.name(), partition = %partition, reason = %r.reason, "Time axis left out of union");
                    assembly.warnings.push(format!(
                        "{}/{} in partition {}: {}",
                        cgroup.id,
                        cvar.name(),
                        partition,
                        r.reason
                    ));
                }

                variables.push(PartitionedVariable {
                    key: cvar.key.clone(),
                    cdm_hash: cvar.cdm_hash,
                    coords: cvar.coords,
                    mixed_intervals: cvar.mixed_intervals,
                    union: table.intern(union),
                    partitions: slots,
                });
            }

            assembly.groups.push(PartitionedGroup {
                hash: cgroup.hash,
                gds: cgroup.gds.clone(),
                id: cgroup.id.clone(),
                coordinates: cgroup.coordinates.clone(),
                variables,
            });
        }

        // groups and variables only outside the canonical partition are not served
        for (p, (child, coll)) in parts.iter().enumerate() {
            if p == canonical {
                continue;
            }
            for group in &coll.groups {
                let cgroup = canon.group(&group.id);
                for var in &group.variables {
                    if cgroup.and_then(|g| g.variable(var.cdm_hash)).is_none() {
                        debug!(group = %group.id, variable = %var.name(), partition = %child.name, "Ignoring non-canonical variable");
                        assembly.warnings.push(format!(
                            "{}/{} in partition {} is not in the canonical partition",
                            group.id,
                            var.name(),
                            child.name
                        ));
                    }
                }
            }
        }

        if !mismatches.is_empty() {
            return Err(CollectionError::PartitionInconsistent {
                name: self.spec.name.clone(),
                mismatches,
            });
        }

        assembly.unions = table.into_inner();
        Ok(assembly)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::FileEntry;
    use crate::config::GribConfig;
    use crate::grouping::GridGrouper;
    use crate::index::write_collection;
    use crate::rectilyser::Rectilyser;
    use crate::source::{CollectionSource, JsonInventoryDecoder};
    use test_utils::{isobaric_temperature, temp_test_dir_with_prefix};

    fn collection_from(name: &str, dir: &Path, records: Vec<grib_common::HeaderRecord>) -> GribCollection {
        let config = GribConfig::default();
        let mut grouper = GridGrouper::new(&config);
        grouper.add_file(0, records);
        let (pending, _) = grouper.finish();
        let rectilyser = Rectilyser::new(&config);
        GribCollection {
            name: name.to_string(),
            directory: dir.to_path_buf(),
            files: vec![FileEntry {
                name: format!("{}.grib2", name),
                size: 1,
                last_modified: 0,
            }],
            groups: pending.into_iter().map(|p| rectilyser.make(p).0).collect(),
            center: Default::default(),
            version: INDEX_VERSION,
            index: None,
        }
    }

    fn child(dir: &Path, name: &str) -> CollectionSpec {
        CollectionSpec::new(name, CollectionSource::directory(dir, ".grib2"))
            .with_index_path(dir.join(format!("{}.gcx", name)))
    }

    #[test]
    fn test_vertical_presence_mismatch_is_fatal() {
        let dir = temp_test_dir_with_prefix("partition_");
        let day1 = collection_from("day1", dir.path(), isobaric_temperature(0, &[0, 6], &[50000.0]));
        let mut day2 = collection_from("day2", dir.path(), isobaric_temperature(24, &[0, 6], &[50000.0]));
        for var in &mut day2.groups[0].variables {
            var.coords.vertical = None;
        }
        write_collection(&dir.path().join("day1.gcx"), &day1).unwrap();
        write_collection(&dir.path().join("day2.gcx"), &day2).unwrap();

        let spec = PartitionSpec::new(
            "both",
            dir.path(),
            vec![child(dir.path(), "day1"), child(dir.path(), "day2")],
        );
        let config = GribConfig::default();
        let ctx = BuildContext::new(&config, &JsonInventoryDecoder);
        let err = PartitionBuilder::new(spec.clone(), &ctx, &ProtoChoice::First)
            .read_or_create(UpdateMode::Nocheck)
            .unwrap_err();

        match err {
            CollectionError::PartitionInconsistent { name, mismatches } => {
                assert_eq!(name, "both");
                assert_eq!(mismatches.len(), 1);
                assert_eq!(mismatches[0].axis, "vertical");
                assert_eq!(mismatches[0].partition, "day2");
                assert!(mismatches[0].canonical_has_axis);
            }
            other => panic!("unexpected error: {}", other),
        }
        assert!(!spec.index_path().exists());
    }

    #[test]
    fn test_proto_choice() {
        assert_eq!(ProtoChoice::First.choose(4), 0);
        assert_eq!(ProtoChoice::Latest.choose(4), 3);
        assert_eq!(ProtoChoice::Penultimate.choose(4), 2);
        assert_eq!(ProtoChoice::Penultimate.choose(1), 0);
        assert_eq!(ProtoChoice::Index(7).choose(4), 3);
    }

    #[test]
    fn test_closure_policy() {
        let policy = |count: usize| count / 2;
        assert_eq!(policy.choose(5), 2);
    }

    #[test]
    fn test_compare_axis() {
        assert!(matches!(compare_axis::<u8>(None, None), AxisCheck::Same));
        assert!(matches!(compare_axis(Some(&1), Some(&1)), AxisCheck::Same));
        assert!(matches!(compare_axis(Some(&1), Some(&2)), AxisCheck::Differ));
        assert!(matches!(
            compare_axis(Some(&1), None),
            AxisCheck::Presence { canonical_has_axis: true }
        ));
        assert!(matches!(
            compare_axis(None, Some(&1)),
            AxisCheck::Presence { canonical_has_axis: false }
        ));
    }

    #[test]
    fn test_default_index_path() {
        let spec = PartitionSpec::new("gfs", "/data/gfs", Vec::new());
        assert_eq!(spec.index_path(), PathBuf::from("/data/gfs/gfs.gpx"));
    }
}
