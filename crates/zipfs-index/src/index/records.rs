//! Fixed-size records stored in the arena
//!
//! Inode record layout (little-endian):
//! ```text
//! +-----------------------+ 0
//! | mode: u32             | 4
//! | nlink: u32            | 8
//! | mtime: u64            | 16
//! | ctime: u64            | 24
//! | size: u64             | 32
//! | deleted: u32          | 36
//! | hash_len: u32         | 40
//! | hash: i64             | 48  -> HASH_LEN byte buffer
//! | block_data: i64       | 56  -> first BlockData record
//! | block_data_size: u64  | 64  bytes of BlockData records
//! | previous: i64         | 72  -> record this one superseded
//! +-----------------------+
//! ```
//!
//! Block data record layout:
//! ```text
//! +-----------------------+ 0
//! | block_id: u64         | 8
//! | mtime: u64            | 16
//! | size: u64             | 24
//! | data_offset: i64      | 32  -> raw block bytes
//! +-----------------------+
//! ```

use crate::arena::{ArenaOffset, BumpArena};
use bytes::{Buf, BufMut, BytesMut};
use serde::Serialize;
use zipfs_common::{Inode, Result};

/// An inode as persisted in the arena
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InodeRecord {
    pub mode: u32,
    pub nlink: u32,
    pub mtime: u64,
    pub ctime: u64,
    pub size: u64,
    pub deleted: bool,
    /// Meaningful bytes at the front of the hash buffer
    pub hash_len: u32,
    pub hash: ArenaOffset,
    /// Head of the block data chain
    pub block_data: ArenaOffset,
    /// Byte length of the block data chain
    pub block_data_size: u64,
    /// Older record under the same key
    pub previous: ArenaOffset,
}

impl InodeRecord {
    pub const SIZE: usize = 72;

    /// Record for `inode` whose hash and block chain live at the given handles
    pub(crate) fn new(
        inode: &Inode,
        hash: ArenaOffset,
        block_data: ArenaOffset,
        block_count: usize,
        previous: ArenaOffset,
    ) -> Self {
        Self {
            mode: inode.mode,
            nlink: inode.nlink,
            mtime: inode.mtime,
            ctime: inode.ctime,
            size: inode.size,
            deleted: inode.deleted,
            hash_len: inode.hash.len() as u32,
            hash,
            block_data,
            block_data_size: (block_count * BlockData::SIZE) as u64,
            previous,
        }
    }

    /// Number of blocks in the chain
    #[must_use]
    pub const fn block_count(&self) -> usize {
        self.block_data_size as usize / BlockData::SIZE
    }

    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(Self::SIZE);
        buf.put_u32_le(self.mode);
        buf.put_u32_le(self.nlink);
        buf.put_u64_le(self.mtime);
        buf.put_u64_le(self.ctime);
        buf.put_u64_le(self.size);
        buf.put_u32_le(u32::from(self.deleted));
        buf.put_u32_le(self.hash_len);
        buf.put_i64_le(self.hash.raw());
        buf.put_i64_le(self.block_data.raw());
        buf.put_u64_le(self.block_data_size);
        buf.put_i64_le(self.previous.raw());
        buf
    }

    pub fn from_bytes(mut buf: &[u8]) -> Self {
        Self {
            mode: buf.get_u32_le(),
            nlink: buf.get_u32_le(),
            mtime: buf.get_u64_le(),
            ctime: buf.get_u64_le(),
            size: buf.get_u64_le(),
            deleted: buf.get_u32_le() != 0,
            hash_len: buf.get_u32_le(),
            hash: buf.get_i64_le().into(),
            block_data: buf.get_i64_le().into(),
            block_data_size: buf.get_u64_le(),
            previous: buf.get_i64_le().into(),
        }
    }

    pub fn load(arena: &BumpArena, offset: ArenaOffset) -> Result<Self> {
        Ok(Self::from_bytes(arena.read(offset, Self::SIZE)?))
    }

    pub fn store(&self, arena: &mut BumpArena, offset: ArenaOffset) -> Result<()> {
        arena.write(offset, &self.to_bytes())
    }
}

/// One stored block of an inode
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct BlockData {
    pub block_id: u64,
    pub mtime: u64,
    pub size: u64,
    /// Raw block bytes, null for an empty block
    pub data_offset: ArenaOffset,
}

impl BlockData {
    pub const SIZE: usize = 32;

    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(Self::SIZE);
        buf.put_u64_le(self.block_id);
        buf.put_u64_le(self.mtime);
        buf.put_u64_le(self.size);
        buf.put_i64_le(self.data_offset.raw());
        buf
    }

    pub fn from_bytes(mut buf: &[u8]) -> Self {
        Self {
            block_id: buf.get_u64_le(),
            mtime: buf.get_u64_le(),
            size: buf.get_u64_le(),
            data_offset: buf.get_i64_le().into(),
        }
    }

    pub fn load(arena: &BumpArena, offset: ArenaOffset) -> Result<Self> {
        Ok(Self::from_bytes(arena.read(offset, Self::SIZE)?))
    }

    pub fn store(&self, arena: &mut BumpArena, offset: ArenaOffset) -> Result<()> {
        arena.write(offset, &self.to_bytes())
    }
}
