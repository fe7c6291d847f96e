//! Synthetic flush workload
//!
//! Mimics a file system flushing dirty inodes: every file is indexed with
//! its blocks, a share of the files is then deleted, and the resulting
//! layout is pushed through the metadata cache the way a traversal would
//! read it back.

use anyhow::{Result, bail};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use zipfs_common::{Block, BlockMtimes, Config, DirtyBlocks, Inode, InodeKey};
use zipfs_index::{
    BPlusIndex, BumpArena, CacheStats, IndexStats, MetadataCache, PathEntry, SharedIndex,
};

/// Directories the synthetic files are spread over; one root per directory
const DIRECTORIES: usize = 64;

/// Node files the block data is spread over
const NODE_FILES: u64 = 16;

/// Shape of one bench run
#[derive(Clone, Debug)]
pub struct Workload {
    pub inodes: usize,
    pub blocks_per_inode: usize,
    pub block_size: usize,
    /// Fraction of inodes deleted after the insert phase
    pub tombstone_ratio: f64,
    /// Cache lookups replayed after the cache is filled
    pub lookups: usize,
    pub seed: u64,
}

/// Outcome of one bench run
#[derive(Debug, Serialize)]
pub struct Report {
    pub inserted: usize,
    pub tombstoned: usize,
    pub insert_ms: u128,
    pub tombstone_ms: u128,
    pub cache_ms: u128,
    pub inserts_per_sec: f64,
    pub index: IndexStats,
    pub cache: CacheStats,
}

fn file_path(i: usize) -> String {
    format!("/bench/dir{:02}/file{i:06}", i % DIRECTORIES)
}

fn root_name(i: usize) -> String {
    format!("dir{:02}.root", i % DIRECTORIES)
}

fn rate(count: usize, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs == 0.0 { 0.0 } else { count as f64 / secs }
}

/// Build the index and cache described by `config` and run `workload` on them
pub fn run(workload: &Workload, config: &Config) -> Result<Report> {
    if !(0.0..=1.0).contains(&workload.tombstone_ratio) {
        bail!(
            "tombstone ratio must be within 0.0..=1.0, got {}",
            workload.tombstone_ratio
        );
    }

    let arena = BumpArena::new(config.arena.clone())?;
    let index = SharedIndex::new(BPlusIndex::new(arena, &config.index)?);
    let cache = MetadataCache::new(&config.cache)?;
    let mut rng = StdRng::seed_from_u64(workload.seed);

    // Insert phase
    let start = Instant::now();
    for i in 0..workload.inodes {
        let mut inode = Inode::new(file_path(i));
        inode.mtime = i as u64;
        inode.ctime = i as u64;
        inode.size = (workload.blocks_per_inode * workload.block_size) as u64;

        let mut dirty_blocks = DirtyBlocks::new();
        let mut block_mtimes = BlockMtimes::new();
        for block_id in 0..workload.blocks_per_inode as u64 {
            let mut data = vec![0u8; workload.block_size];
            rng.fill(&mut data[..]);
            dirty_blocks.insert(block_id, Arc::new(Block::new(data)));
            block_mtimes.insert(block_id, i as u64);
        }
        index.add_inode(&inode, &dirty_blocks, &block_mtimes)?;
    }
    let insert_elapsed = start.elapsed();
    info!(
        "Indexed {} inodes in {:?} ({:.0} inserts/s)",
        workload.inodes,
        insert_elapsed,
        rate(workload.inodes, insert_elapsed)
    );

    // Tombstone phase
    let start = Instant::now();
    let mut deleted = vec![false; workload.inodes];
    for (i, flag) in deleted.iter_mut().enumerate() {
        if rng.gen_bool(workload.tombstone_ratio) {
            index.tombstone(file_path(i).as_bytes(), (workload.inodes + i) as u64)?;
            *flag = true;
        }
    }
    let tombstoned = deleted.iter().filter(|d| **d).count();
    let tombstone_elapsed = start.elapsed();
    info!("Tombstoned {} inodes in {:?}", tombstoned, tombstone_elapsed);

    verify(&index, &deleted)?;

    // Cache phase
    let start = Instant::now();
    fill_cache(&index, &cache, &deleted)?;
    for _ in 0..workload.lookups {
        let i = rng.gen_range(0..workload.inodes.max(1));
        let entries = cache.get_entry(&file_path(i), &root_name(i));
        if entries.is_empty() && !cache.root_content_in_cache(&root_name(i)) {
            // Miss: rebuild the root file from the inverted view
            cache.add_root_file(&root_name(i), render_root(&cache, &root_name(i)));
        }
    }
    let cache_elapsed = start.elapsed();

    let report = Report {
        inserted: workload.inodes,
        tombstoned,
        insert_ms: insert_elapsed.as_millis(),
        tombstone_ms: tombstone_elapsed.as_millis(),
        cache_ms: cache_elapsed.as_millis(),
        inserts_per_sec: rate(workload.inodes, insert_elapsed),
        index: index.stats(),
        cache: cache.stats(),
    };
    Ok(report)
}

/// Check the tree and every inode's visibility against what was written
fn verify(index: &SharedIndex, deleted: &[bool]) -> Result<()> {
    let index = index.read();
    index.check_invariants()?;

    if index.len() != deleted.len() as u64 {
        bail!("index holds {} keys, expected {}", index.len(), deleted.len());
    }
    for (i, is_deleted) in deleted.iter().enumerate() {
        let path = file_path(i);
        let live = index.lookup(path.as_bytes())?.is_some();
        if live == *is_deleted {
            bail!("inode {path} visible={live} after deleted={is_deleted}");
        }
    }
    debug!("Verified {} inodes", deleted.len());
    Ok(())
}

/// Load the path entries of every live inode into the cache
fn fill_cache(index: &SharedIndex, cache: &MetadataCache, deleted: &[bool]) -> Result<()> {
    let index = index.read();
    for (i, is_deleted) in deleted.iter().enumerate() {
        if *is_deleted {
            continue;
        }
        let path = file_path(i);
        let Some(record) = index.lookup(path.as_bytes())? else {
            continue;
        };
        let inode_id = InodeKey::from_hash(path.as_bytes()).to_string();

        let mut offset = 0;
        let mut entries = Vec::new();
        for block in index.blocks(&record)? {
            let node_file = format!("node{:02}", block.block_id % NODE_FILES);
            if !cache.node_content_in_cache(&node_file) {
                cache.add_node_file(&node_file, index.block_bytes(&block)?.to_vec());
            }
            entries.push(PathEntry::new(node_file, inode_id.clone(), offset, block.size));
            offset += block.size;
        }
        cache.cache_path_entries(&path, &root_name(i), entries);
    }
    Ok(())
}

/// Render a root file from the paths cached under it
fn render_root(cache: &MetadataCache, root: &str) -> String {
    let mut lines: Vec<String> = cache
        .get_inverted_root_ent(root, "")
        .into_iter()
        .flat_map(|(path, entries)| {
            entries.into_iter().map(move |e| {
                format!("{path} {} {} {} {}", e.node_name, e.inode_id, e.offset, e.size)
            })
        })
        .collect();
    lines.sort();
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use zipfs_common::{ArenaConfig, CacheConfig, IndexConfig};

    fn small_config(order: usize, capacity: usize) -> Config {
        Config {
            arena: ArenaConfig {
                segment_size: 1024 * 1024,
                max_size: 64 * 1024 * 1024,
            },
            index: IndexConfig::with_order(order),
            cache: CacheConfig { capacity },
            ..Config::default()
        }
    }

    fn workload(inodes: usize) -> Workload {
        Workload {
            inodes,
            blocks_per_inode: 2,
            block_size: 64,
            tombstone_ratio: 0.25,
            lookups: 100,
            seed: 7,
        }
    }

    #[test]
    fn test_small_run() {
        let report = run(&workload(300), &small_config(4, 1024)).unwrap();

        assert_eq!(report.inserted, 300);
        assert_eq!(report.index.keys, 300);
        assert_eq!(report.index.records, 300 + report.tombstoned as u64);
        assert!(report.index.height > 1);
        assert_eq!(report.cache.entries.len, 300 - report.tombstoned);
        assert!(report.cache.inverted.len <= DIRECTORIES);
        assert_eq!(report.cache.entries.clears, 0);
    }

    #[test]
    fn test_cache_capacity_is_respected() {
        let report = run(&workload(200), &small_config(8, 32)).unwrap();
        assert!(report.cache.entries.len <= 32);
        assert!(report.cache.entries.clears > 0);
        assert!(report.cache.inverted.len <= 32);
    }

    #[test]
    fn test_seeded_runs_agree() {
        let a = run(&workload(100), &small_config(5, 1024)).unwrap();
        let b = run(&workload(100), &small_config(5, 1024)).unwrap();
        assert_eq!(a.tombstoned, b.tombstoned);
        assert_eq!(a.index.nodes, b.index.nodes);
    }

    #[test]
    fn test_rejects_bad_ratio() {
        let mut bad = workload(10);
        bad.tombstone_ratio = 1.5;
        assert!(run(&bad, &small_config(4, 16)).is_err());
    }

    #[test]
    fn test_exhausted_arena_surfaces() {
        let mut config = small_config(4, 16);
        config.arena = ArenaConfig::fixed(64 * 1024);
        let err = run(&workload(500), &config).unwrap_err();
        let err = err.downcast::<zipfs_common::Error>().unwrap();
        assert!(err.is_exhaustion());
    }
}
