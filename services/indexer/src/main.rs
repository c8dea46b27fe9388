//! GRIB collection indexer.
//!
//! Builds (or refreshes) the collection and time partition indexes listed
//! in a YAML configuration file, then exits.

mod config_loader;
mod run;

use anyhow::{Context, Result};
use clap::Parser;
use grib_collection::UpdateMode;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use run::Indexer;

#[derive(Parser, Debug)]
#[command(name = "indexer")]
#[command(about = "Builds GRIB collection and time partition indexes")]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "INDEXER_CONFIG", default_value = "config/indexer.yaml")]
    config: String,

    /// Only index the collection or partition with this name
    #[arg(short = 'n', long)]
    collection: Option<String>,

    /// Update mode override: always, if_stale or nocheck
    #[arg(short, long)]
    mode: Option<String>,

    /// Report stale indexes without rebuilding them
    #[arg(long)]
    check: bool,

    /// Log level (overrides the configuration file)
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let config = config_loader::load_config(&args.config)?;

    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));
    let builder = fmt().with_env_filter(filter).with_target(true).with_thread_ids(true);
    if config.logging.format == "pretty" {
        builder.pretty().init();
    } else {
        builder.json().init();
    }

    info!(
        config = %args.config,
        collections = config.collections.len(),
        partitions = config.partitions.len(),
        "Starting GRIB indexer"
    );

    let mut indexer = Indexer::new(config);
    if let Some(mode) = &args.mode {
        let mode = UpdateMode::from_str(mode)
            .with_context(|| format!("Unknown update mode '{}'", mode))?;
        indexer = indexer.with_mode(mode);
    }

    let only = args.collection.as_deref();
    let summary = if args.check {
        indexer.check(only)
    } else {
        indexer.run(only)
    };

    if !summary.is_success() {
        anyhow::bail!("{} index(es) failed: {}", summary.failed.len(), summary.failed.join(", "));
    }
    if args.check && summary.stale > 0 {
        // non-zero exit so schedulers can trigger a rebuild
        std::process::exit(2);
    }
    Ok(())
}
