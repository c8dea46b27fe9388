//! Index build pass over every configured collection and time partition.

use anyhow::Result;
use grib_collection::{
    BuildAction, BuildContext, CollectionBuilder, JsonInventoryDecoder, PartitionBuilder, RecordDecoder, UpdateMode,
    MIN_INDEX_VERSION,
};
use tracing::{error, info, instrument, warn};

use crate::config_loader::{IndexerConfig, PartitionEntry};

/// Outcome of one indexer run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub built: usize,
    pub loaded: usize,
    /// Indexes found stale by a `--check` run.
    pub stale: usize,
    pub failed: Vec<String>,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct Indexer {
    config: IndexerConfig,
    decoder: Box<dyn RecordDecoder>,
    mode: UpdateMode,
}

impl Indexer {
    pub fn new(config: IndexerConfig) -> Self {
        let mode = config.update;
        Self {
            config,
            decoder: Box::new(JsonInventoryDecoder),
            mode,
        }
    }

    /// Override the configured update mode.
    pub fn with_mode(mut self, mode: UpdateMode) -> Self {
        self.mode = mode;
        self
    }

    fn context(&self) -> BuildContext<'_> {
        BuildContext::new(&self.config.grib, self.decoder.as_ref())
            .with_min_version(self.config.min_version.unwrap_or(MIN_INDEX_VERSION))
    }

    /// Build or load everything whose name passes `only` (all when `None`).
    #[instrument(skip(self), fields(mode = ?self.mode))]
    pub fn run(&self, only: Option<&str>) -> RunSummary {
        let ctx = self.context();
        let mut summary = RunSummary::default();

        for spec in &self.config.collections {
            if only.is_some_and(|name| name != spec.name) {
                continue;
            }
            match CollectionBuilder::new(spec.clone(), &ctx).read_or_create(self.mode) {
                Ok(built) => {
                    info!(collection = %spec.name, "{}", built.report);
                    if built.report.was_built() {
                        summary.built += 1;
                    } else {
                        summary.loaded += 1;
                    }
                }
                Err(e) => {
                    error!(collection = %spec.name, error = %e, "Collection index failed");
                    summary.failed.push(spec.name.clone());
                }
            }
        }

        for entry in &self.config.partitions {
            if only.is_some_and(|name| name != entry.spec.name) {
                continue;
            }
            let proto = entry.proto.unwrap_or(self.config.proto);
            match PartitionBuilder::new(entry.spec.clone(), &ctx, &proto).read_or_create(self.mode) {
                Ok(built) => {
                    info!(partition = %entry.spec.name, "{}", built.report);
                    if built.report.action == BuildAction::Loaded {
                        summary.loaded += 1;
                    } else {
                        summary.built += 1;
                    }
                    built.value.close();
                }
                Err(e) => {
                    error!(partition = %entry.spec.name, error = %e, "Partition index failed");
                    summary.failed.push(entry.spec.name.clone());
                }
            }
        }

        info!(
            built = summary.built,
            loaded = summary.loaded,
            failed = summary.failed.len(),
            "Indexer run complete"
        );
        summary
    }

    /// Report which indexes would be rebuilt, without building anything.
    #[instrument(skip(self))]
    pub fn check(&self, only: Option<&str>) -> RunSummary {
        let ctx = self.context();
        let mut summary = RunSummary::default();

        let mut record = |name: &str, result: Result<bool>| match result {
            Ok(true) => {
                warn!(collection = %name, "Index is stale");
                summary.stale += 1;
            }
            Ok(false) => {
                info!(collection = %name, "Index is current");
                summary.loaded += 1;
            }
            Err(e) => {
                error!(collection = %name, error = %e, "Index check failed");
                summary.failed.push(name.to_string());
            }
        };

        for spec in &self.config.collections {
            if only.is_some_and(|name| name != spec.name) {
                continue;
            }
            let result = CollectionBuilder::new(spec.clone(), &ctx)
                .needs_update()
                .map_err(anyhow::Error::from);
            record(&spec.name, result);
        }
        for PartitionEntry { spec, proto } in &self.config.partitions {
            if only.is_some_and(|name| name != spec.name) {
                continue;
            }
            let proto = proto.unwrap_or(self.config.proto);
            let result = PartitionBuilder::new(spec.clone(), &ctx, &proto)
                .needs_update()
                .map_err(anyhow::Error::from);
            record(&spec.name, result);
        }

        summary
    }
}
