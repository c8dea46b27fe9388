//! Collection build-or-load.
//!
//! [`CollectionBuilder::read_or_create`] is the entry point: depending on
//! the [`UpdateMode`] it reuses the collection index, or scans and decodes
//! the sources, groups and rectilinearizes their records and writes a fresh
//! index.

use crate::collection::{CenterInfo, FileEntry, GribCollection};
use crate::config::{GribConfig, UpdateMode};
use crate::diagnostics::{BuildAction, BuildReport, Built, GroupReport, SkippedFile};
use crate::error::{CollectionError, Result};
use crate::grouping::GridGrouper;
use crate::index::{read_collection, write_collection, COLLECTION_SUFFIX, INDEX_VERSION, MIN_INDEX_VERSION};
use crate::rectilyser::Rectilyser;
use crate::source::{CollectionSource, RecordDecoder, SourceScan};
use grib_common::{system_time_millis, HeaderRecord};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, instrument, warn};

/// Shared inputs of every build.
#[derive(Clone, Copy)]
pub struct BuildContext<'a> {
    pub config: &'a GribConfig,
    pub decoder: &'a dyn RecordDecoder,
    /// Oldest index version accepted when loading.
    pub min_version: i32,
}

impl<'a> BuildContext<'a> {
    pub fn new(config: &'a GribConfig, decoder: &'a dyn RecordDecoder) -> Self {
        Self {
            config,
            decoder,
            min_version: MIN_INDEX_VERSION,
        }
    }

    pub fn with_min_version(mut self, min_version: i32) -> Self {
        self.min_version = min_version;
        self
    }
}

/// A named collection and where its files and index live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSpec {
    pub name: String,
    pub source: CollectionSource,
    /// Defaults to `<source root>/<name>.gcx`.
    #[serde(default)]
    pub index_path: Option<PathBuf>,
}

impl CollectionSpec {
    pub fn new(name: impl Into<String>, source: CollectionSource) -> Self {
        Self {
            name: name.into(),
            source,
            index_path: None,
        }
    }

    pub fn with_index_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.index_path = Some(path.into());
        self
    }

    pub fn index_path(&self) -> PathBuf {
        self.index_path.clone().unwrap_or_else(|| {
            self.source
                .root()
                .join(format!("{}{}", self.name, COLLECTION_SUFFIX))
        })
    }
}

pub struct CollectionBuilder<'a> {
    spec: CollectionSpec,
    ctx: &'a BuildContext<'a>,
}

impl<'a> CollectionBuilder<'a> {
    pub fn new(spec: CollectionSpec, ctx: &'a BuildContext<'a>) -> Self {
        Self { spec, ctx }
    }

    pub fn spec(&self) -> &CollectionSpec {
        &self.spec
    }

    /// Load the collection index, building it first when `mode` asks for it.
    ///
    /// An index that cannot be used (bad magic, unsupported version,
    /// corrupt records) is rebuilt rather than reported.
    #[instrument(skip(self), fields(collection = %self.spec.name))]
    pub fn read_or_create(&self, mode: UpdateMode) -> Result<Built<GribCollection>> {
        let index = self.spec.index_path();
        if !index.exists() {
            return self.create(BuildAction::Created);
        }

        match mode {
            UpdateMode::Always => self.create(BuildAction::Rebuilt {
                reason: "update mode is always".to_string(),
            }),
            UpdateMode::Nocheck => self.load_or_rebuild(&index, |_| Ok(None)),
            UpdateMode::IfStale => {
                let scan = self.spec.source.scan()?;
                self.load_or_rebuild(&index, |collection| self.stale_reason(collection, &scan))
            }
        }
    }

    /// Whether [`UpdateMode::IfStale`] would rebuild the index.
    pub fn needs_update(&self) -> Result<bool> {
        let index = self.spec.index_path();
        if !index.exists() {
            return Ok(true);
        }
        let scan = self.spec.source.scan()?;
        let collection = match read_collection(&index, self.ctx.min_version) {
            Ok(c) => c,
            Err(e) if e.is_unusable_index() => return Ok(true),
            Err(e) => return Err(e),
        };
        let stale = self.stale_reason(&collection, &scan)?;
        collection.close();
        Ok(stale.is_some())
    }

    fn load_or_rebuild<F>(&self, index: &Path, check: F) -> Result<Built<GribCollection>>
    where
        F: FnOnce(&GribCollection) -> Result<Option<String>>,
    {
        let collection = match read_collection(index, self.ctx.min_version) {
            Ok(c) => c,
            Err(e) if e.is_unusable_index() => {
                warn!(index = %index.display(), error = %e, "Existing index unusable, rebuilding");
                return self.create(BuildAction::Rebuilt { reason: e.to_string() });
            }
            Err(e) => return Err(e),
        };

        match check(&collection)? {
            Some(reason) => {
                collection.close();
                info!(reason = %reason, "Collection index is stale");
                self.create(BuildAction::Rebuilt { reason })
            }
            None => {
                debug!(index = %index.display(), "Using existing collection index");
                Ok(Built {
                    value: collection,
                    report: BuildReport::loaded(&self.spec.name),
                })
            }
        }
    }

    /// Why the index no longer reflects the sources, if it doesn't.
    fn stale_reason(&self, collection: &GribCollection, scan: &SourceScan) -> Result<Option<String>> {
        let index_mtime = fs::metadata(self.spec.index_path())?.modified()?;
        let index_mtime = system_time_millis(index_mtime);

        if let Some(newer) = scan.files.iter().find(|f| f.last_modified > index_mtime) {
            return Ok(Some(format!("{} is newer than the index", newer.name)));
        }

        let indexed = collection.files.iter().map(|f| f.name.as_str());
        let current = scan.files.iter().map(|f| f.name.as_str());
        if !indexed.eq(current) {
            return Ok(Some("file list changed".to_string()));
        }
        Ok(None)
    }

    fn create(&self, action: BuildAction) -> Result<Built<GribCollection>> {
        let ctx = self.ctx;
        let scan = self.spec.source.scan()?;
        let mut report = BuildReport::new(&self.spec.name, action);
        report.files_skipped.extend(scan.skipped.iter().cloned());

        info!(files = scan.files.len(), action = %report.action, "Building collection index");

        let mut grouper = GridGrouper::new(ctx.config);
        let mut center: Option<CenterInfo> = None;
        for (i, file) in scan.files.iter().enumerate() {
            let records = match ctx.decoder.decode(&file.path) {
                Ok(records) => records,
                Err(e) => {
                    error!(file = %file.name, error = %e, "Failed to read source file, skipping");
                    report.files_skipped.push(SkippedFile {
                        name: file.name.clone(),
                        reason: format!("{:#}", e),
                    });
                    continue;
                }
            };
            report.files_read += 1;

            let (valid, invalid) = validate_records(&file.name, records);
            report.records_invalid += invalid;
            if center.is_none() {
                center = valid.first().map(CenterInfo::from_record);
            }
            grouper.add_file(i as u32, valid);
        }

        let (pending, stats) = grouper.finish();
        report.records_total = stats.total + report.records_invalid;
        report.records_kept = stats.kept;
        report.records_filtered = stats.filtered;
        if stats.kept == 0 {
            return Err(CollectionError::NoRecords(self.spec.name.clone()));
        }

        let rectilyser = Rectilyser::new(ctx.config);
        let mut groups = Vec::with_capacity(pending.len());
        for p in pending {
            let (group, gstats) = rectilyser.make(p);
            report.records_duplicate += gstats.duplicates;
            report.records_skipped += gstats.skipped;
            report.hash_collisions += gstats.hash_collisions;
            if gstats.hash_collisions > 0 {
                report.warnings.push(format!(
                    "group {}: {} variables dropped on identity hash collision",
                    group.id, gstats.hash_collisions
                ));
            }
            report.groups.push(GroupReport {
                id: group.id.clone(),
                variables: group.variables.len(),
                records: gstats.filled,
                duplicates: gstats.duplicates,
                density: gstats.density(),
            });
            groups.push(group);
        }

        let collection = GribCollection {
            name: self.spec.name.clone(),
            directory: self.spec.source.root(),
            files: scan
                .files
                .iter()
                .map(|f| FileEntry {
                    name: f.name.clone(),
                    size: f.size,
                    last_modified: f.last_modified,
                })
                .collect(),
            groups,
            center: center.unwrap_or_default(),
            version: INDEX_VERSION,
            index: None,
        };

        write_collection(&self.spec.index_path(), &collection)?;
        info!(
            groups = collection.groups.len(),
            variables = collection.variable_count(),
            records = report.records_kept,
            "Collection built"
        );

        Ok(Built { value: collection, report })
    }
}

/// Split decoded records into usable ones and a count of rejected ones.
fn validate_records(file: &str, records: Vec<HeaderRecord>) -> (Vec<HeaderRecord>, usize) {
    let mut invalid = 0;
    let valid = records
        .into_iter()
        .filter(|r| match r.validate() {
            Ok(()) => true,
            Err(e) => {
                warn!(file = %file, error = %e, "Dropping invalid record");
                invalid += 1;
                false
            }
        })
        .collect();
    (valid, invalid)
}
