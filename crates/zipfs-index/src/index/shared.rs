//! Writer-locked handle to an index shared between a flusher and readers

use super::btree::{BPlusIndex, IndexStats};
use super::records::InodeRecord;
use crate::arena::ArenaOffset;
use parking_lot::{RwLock, RwLockReadGuard};
use std::sync::Arc;
use zipfs_common::{BlockMtimes, DirtyBlocks, Inode, InodeKey, Result};

/// Cloneable handle guarding arena and tree with one lock
///
/// An insertion, splits included, runs under the write lock, so readers
/// never observe a node whose children reference half of a split.
#[derive(Clone)]
pub struct SharedIndex {
    inner: Arc<RwLock<BPlusIndex>>,
}

impl SharedIndex {
    pub fn new(index: BPlusIndex) -> Self {
        Self {
            inner: Arc::new(RwLock::new(index)),
        }
    }

    /// See [`BPlusIndex::add_inode`]
    pub fn add_inode(
        &self,
        inode: &Inode,
        dirty_blocks: &DirtyBlocks,
        block_mtimes: &BlockMtimes,
    ) -> Result<ArenaOffset> {
        self.inner.write().add_inode(inode, dirty_blocks, block_mtimes)
    }

    /// See [`BPlusIndex::tombstone`]
    pub fn tombstone(&self, hash: &[u8], ctime: u64) -> Result<Option<ArenaOffset>> {
        self.inner.write().tombstone(hash, ctime)
    }

    pub fn get(&self, key: InodeKey) -> Result<Option<InodeRecord>> {
        self.inner.read().get(key)
    }

    pub fn lookup(&self, hash: &[u8]) -> Result<Option<InodeRecord>> {
        self.inner.read().lookup(hash)
    }

    /// Read access for several lookups against one consistent tree
    pub fn read(&self) -> RwLockReadGuard<'_, BPlusIndex> {
        self.inner.read()
    }

    pub fn stats(&self) -> IndexStats {
        self.inner.read().stats()
    }
}
