//! Core value types exchanged with the file system layer
//!
//! The virtual file system produces [`Inode`] and [`Block`] values when it
//! flushes; the index copies them into its arena and never holds on to
//! the caller's values.

use bytes::Bytes;
use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use xxhash_rust::xxh64::xxh64;

/// Size of the hash buffer every inode record carries
pub const HASH_LEN: usize = 512;

/// Dirty blocks of one inode, keyed by block id
pub type DirtyBlocks = BTreeMap<u64, Arc<Block>>;

/// Modification times of dirty blocks, keyed by block id
pub type BlockMtimes = BTreeMap<u64, u64>;

/// Ordering key of an inode in the index
///
/// Derived from the inode's hash bytes, compared numerically. Two hashes
/// with the same digest share one key; readers that need the identity
/// compare the stored hash bytes as well.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, From, Into, Display,
)]
#[display("{_0:016x}")]
pub struct InodeKey(u64);

impl InodeKey {
    /// Derive the key for the given hash bytes
    #[must_use]
    pub fn from_hash(hash: &[u8]) -> Self {
        Self(xxh64(hash, 0))
    }

    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

/// Stat-like inode metadata as produced by the file system layer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Inode {
    pub mode: u32,
    pub nlink: u32,
    /// Modification time (unix seconds)
    pub mtime: u64,
    /// Status change time (unix seconds)
    pub ctime: u64,
    /// Logical file size in bytes
    pub size: u64,
    /// Tombstone flag
    pub deleted: bool,
    /// Identity hash, at most [`HASH_LEN`] bytes
    pub hash: Bytes,
}

impl Inode {
    /// Create a live regular-file inode with the given identity hash
    pub fn new(hash: impl Into<Bytes>) -> Self {
        Self {
            mode: 0o100_644,
            nlink: 1,
            mtime: 0,
            ctime: 0,
            size: 0,
            deleted: false,
            hash: hash.into(),
        }
    }

    /// Create a tombstone for the inode with the given identity hash
    pub fn tombstone(hash: impl Into<Bytes>, ctime: u64) -> Self {
        Self {
            mode: 0,
            nlink: 0,
            mtime: ctime,
            ctime,
            size: 0,
            deleted: true,
            hash: hash.into(),
        }
    }

    /// Ordering key of this inode
    #[must_use]
    pub fn key(&self) -> InodeKey {
        InodeKey::from_hash(&self.hash)
    }
}

/// Raw contents of one file block
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Block {
    data: Bytes,
}

impl Block {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
