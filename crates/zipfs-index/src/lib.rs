//! zipfs Index - Arena-backed inode index and metadata cache
//!
//! This crate implements the in-memory core of zipfs:
//! - Bump arena addressed by stable offsets
//! - Insertion-only B+Tree of inode records living in the arena
//! - Bounded metadata cache for path entries and file contents

pub mod arena;
pub mod index;
pub mod metadata;

// Re-exports
pub use arena::{ALIGNMENT, ArenaOffset, ArenaStats, BumpArena};
pub use index::{BPlusIndex, BlockData, IndexStats, InodeRecord, SharedIndex};
pub use metadata::{CacheStats, MetadataCache, PathEntry, RootEntries, StoreStats};
