//! zipfs Bench - Synthetic flush workload
//!
//! Drives the inode index and metadata cache with generated files and
//! reports arena, index, and cache statistics.

mod workload;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use workload::Workload;
use zipfs_common::Config;

#[derive(Parser, Debug)]
#[command(name = "zipfs-bench")]
#[command(about = "zipfs inode index and metadata cache benchmark")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "zipfs.toml")]
    config: String,

    /// Number of inodes to index
    #[arg(short = 'n', long, default_value_t = 10_000)]
    inodes: usize,

    /// Dirty blocks flushed with each inode
    #[arg(long, default_value_t = 4)]
    blocks_per_inode: usize,

    /// Bytes per block
    #[arg(long, default_value_t = 4096)]
    block_size: usize,

    /// B+Tree order (overrides config file)
    #[arg(long)]
    order: Option<usize>,

    /// Fraction of inodes deleted after indexing
    #[arg(long, default_value_t = 0.1)]
    tombstone_ratio: f64,

    /// Cache lookups replayed after the cache is filled
    #[arg(long, default_value_t = 10_000)]
    lookups: usize,

    /// Random seed for block contents and deletions
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Log level (overrides config file)
    #[arg(long, env = "ZIPFS_LOG_LEVEL")]
    log_level: Option<String>,

    /// Print the report as JSON on stdout
    #[arg(long)]
    json: bool,
}

/// Read `path` if it exists, falling back to defaults otherwise
fn load_config(path: &str) -> Result<Config> {
    if !Path::new(path).exists() {
        return Ok(Config::default());
    }
    let config_str =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {path}"))?;
    toml::from_str(&config_str).with_context(|| format!("Failed to parse {path}"))
}

/// Merge CLI args with config file (CLI takes precedence)
fn apply_overrides(mut config: Config, args: &Args) -> Result<Config> {
    if let Some(order) = args.order {
        config.index.order = order;
    }
    if let Some(level) = &args.log_level {
        config.logging.level.clone_from(level);
    }
    config.validate()?;
    Ok(config)
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = apply_overrides(load_config(&args.config)?, &args)?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting zipfs bench");
    info!("Config file: {}", args.config);
    info!(
        "Order {}, cache capacity {}, arena segments of {} bytes up to {} bytes",
        config.index.order, config.cache.capacity, config.arena.segment_size, config.arena.max_size
    );

    let workload = Workload {
        inodes: args.inodes,
        blocks_per_inode: args.blocks_per_inode,
        block_size: args.block_size,
        tombstone_ratio: args.tombstone_ratio,
        lookups: args.lookups,
        seed: args.seed,
    };
    let report = workload::run(&workload, &config)?;

    let index = &report.index;
    info!(
        "Index: {} keys, {} records, height {}, {} nodes ({} leaves), {} splits",
        index.keys, index.records, index.height, index.nodes, index.leaves, index.splits
    );
    info!(
        "Arena: {} bytes used in {} segments ({} allocations)",
        index.arena.used, index.arena.segments, index.arena.allocations
    );
    for (name, store) in [
        ("entries", report.cache.entries),
        ("inverted", report.cache.inverted),
        ("roots", report.cache.roots),
        ("nodes", report.cache.nodes),
        ("data", report.cache.data),
    ] {
        info!(
            "Cache {}: {} entries, {} hits, {} misses ({:.1}% hit), {} clears",
            name,
            store.len,
            store.hits,
            store.misses,
            store.hit_ratio() * 100.0,
            store.clears
        );
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}
