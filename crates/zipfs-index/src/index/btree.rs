//! Insertion-only B+Tree over inode keys
//!
//! Nodes, inode records, hash buffers and block chains all live in the
//! tree's [`BumpArena`] and refer to each other by [`ArenaOffset`].
//! Nothing is ever freed: an update or a tombstone is a fresh inode record
//! that takes over the key's leaf slot and links back to the record it
//! replaced.
//!
//! # Insert path
//! 1. Validate the block and mtime maps (no arena space used yet)
//! 2. Descend from the root, remembering the path
//! 3. Count the splits the insertion will cause
//! 4. Reserve every arena region the insertion needs
//! 5. Write the records and splice them into the tree
//!
//! Arena exhaustion can only surface in step 4, before any node has been
//! modified, so a failed insertion never leaves a half-applied split.

use super::node::{Node, NodeLayout};
use super::records::{BlockData, InodeRecord};
use crate::arena::{ArenaOffset, ArenaStats, BumpArena};
use serde::Serialize;
use tracing::{debug, warn};
use zipfs_common::{
    BlockMtimes, DirtyBlocks, Error, HASH_LEN, IndexConfig, Inode, InodeKey, Result,
};

/// One internal node visited on the way to a leaf
#[derive(Clone, Copy, Debug)]
struct PathStep {
    node: ArenaOffset,
    /// Child taken from this node
    child: usize,
    num_keys: usize,
}

/// Arena regions reserved for the splits of one insertion
#[derive(Default)]
struct Reservation {
    nodes: Vec<ArenaOffset>,
    lists: Vec<ArenaOffset>,
}

impl Reservation {
    fn node(&mut self) -> Result<ArenaOffset> {
        self.nodes
            .pop()
            .ok_or_else(|| Error::invalid_node(-1, "split used more nodes than reserved"))
    }

    fn list(&mut self) -> Result<ArenaOffset> {
        self.lists
            .pop()
            .ok_or_else(|| Error::invalid_node(-1, "split used more inode lists than reserved"))
    }
}

/// Point-in-time index shape
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub order: usize,
    pub height: usize,
    /// Distinct keys
    pub keys: u64,
    /// Inode records written, including superseded ones
    pub records: u64,
    pub nodes: u64,
    pub leaves: u64,
    pub splits: u64,
    pub arena: ArenaStats,
}

/// Arena-backed B+Tree of inode records
pub struct BPlusIndex {
    arena: BumpArena,
    layout: NodeLayout,
    /// Null until the first insertion
    root: ArenaOffset,
    /// Levels including the leaves, 0 when empty
    height: usize,
    keys: u64,
    records: u64,
    nodes: u64,
    leaves: u64,
    splits: u64,
}

impl BPlusIndex {
    /// Create an empty index on top of `arena`
    pub fn new(arena: BumpArena, config: &IndexConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            arena,
            layout: NodeLayout::new(config.order),
            root: ArenaOffset::NULL,
            height: 0,
            keys: 0,
            records: 0,
            nodes: 0,
            leaves: 0,
            splits: 0,
        })
    }

    // =========================================================================
    // Write Path (Single Writer)
    // =========================================================================

    /// Add `inode` and its dirty blocks to the index
    ///
    /// Every block id in `dirty_blocks` needs a modification time in
    /// `block_mtimes` and vice versa. Returns the handle of the new inode
    /// record.
    pub fn add_inode(
        &mut self,
        inode: &Inode,
        dirty_blocks: &DirtyBlocks,
        block_mtimes: &BlockMtimes,
    ) -> Result<ArenaOffset> {
        Self::validate_input(inode, dirty_blocks, block_mtimes)?;
        let key = inode.key();

        let (path, leaf) = self.find_leaf(key.as_u64())?;
        let existing = match leaf {
            Some(leaf) => self.leaf_slot(leaf, key.as_u64())?,
            None => None,
        };
        let reservation = self.reserve_splits(&path, leaf, existing.is_some())?;

        let (block_data, block_count) = self.store_blocks(dirty_blocks, block_mtimes)?;
        let hash = self.arena.allocate(HASH_LEN)?;
        let record_offset = self.arena.allocate(InodeRecord::SIZE)?;

        // Everything below only writes into reserved regions
        self.arena.write(hash, &inode.hash)?;
        let previous = existing.unwrap_or(ArenaOffset::NULL);
        InodeRecord::new(inode, hash, block_data, block_count, previous)
            .store(&mut self.arena, record_offset)?;

        self.insert(key, record_offset, &path, leaf, reservation)?;
        self.records += 1;
        if existing.is_none() {
            self.keys += 1;
        }

        debug!(
            "Indexed inode {} ({} blocks, deleted={}, replaced={})",
            key,
            block_count,
            inode.deleted,
            existing.is_some()
        );
        Ok(record_offset)
    }

    /// Mark the inode with `hash` deleted
    ///
    /// The tombstone is a new record; older records stay in the arena.
    /// Returns `None` without writing anything when no inode with `hash`
    /// was ever indexed.
    pub fn tombstone(&mut self, hash: &[u8], ctime: u64) -> Result<Option<ArenaOffset>> {
        let key = InodeKey::from_hash(hash);
        if self.get_offset(key)?.is_none() {
            debug!("Skipped tombstone for unindexed inode {}", key);
            return Ok(None);
        }
        let inode = Inode::tombstone(bytes::Bytes::copy_from_slice(hash), ctime);
        self.add_inode(&inode, &DirtyBlocks::new(), &BlockMtimes::new())
            .map(Some)
    }

    fn validate_input(
        inode: &Inode,
        dirty_blocks: &DirtyBlocks,
        block_mtimes: &BlockMtimes,
    ) -> Result<()> {
        if inode.hash.len() > HASH_LEN {
            warn!("Rejected inode with {} byte hash", inode.hash.len());
            return Err(Error::HashTooLong {
                len: inode.hash.len(),
                max: HASH_LEN,
            });
        }
        if let Some(block_id) = dirty_blocks.keys().find(|id| !block_mtimes.contains_key(*id)) {
            warn!("Block {} has no modification time", block_id);
            return Err(Error::MissingBlockMtime {
                block_id: *block_id,
            });
        }
        if let Some(block_id) = block_mtimes.keys().find(|id| !dirty_blocks.contains_key(*id)) {
            warn!("Modification time for unknown block {}", block_id);
            return Err(Error::OrphanBlockMtime {
                block_id: *block_id,
            });
        }
        Ok(())
    }

    /// Copy the dirty blocks into the arena as one contiguous chain
    ///
    /// Returns the chain head and the number of records in it.
    fn store_blocks(
        &mut self,
        dirty_blocks: &DirtyBlocks,
        block_mtimes: &BlockMtimes,
    ) -> Result<(ArenaOffset, usize)> {
        if dirty_blocks.is_empty() {
            return Ok((ArenaOffset::NULL, 0));
        }

        let chain = self.arena.allocate(dirty_blocks.len() * BlockData::SIZE)?;
        let mut records = Vec::with_capacity(dirty_blocks.len());
        for (block_id, block) in dirty_blocks {
            let data_offset = if block.is_empty() {
                ArenaOffset::NULL
            } else {
                let offset = self.arena.allocate(block.len())?;
                self.arena.write(offset, block.data())?;
                offset
            };
            records.push(BlockData {
                block_id: *block_id,
                mtime: block_mtimes[block_id],
                size: block.len() as u64,
                data_offset,
            });
        }

        for (i, record) in records.iter().enumerate() {
            record.store(&mut self.arena, chain.add(i * BlockData::SIZE))?;
        }
        Ok((chain, records.len()))
    }

    /// Reserve the nodes and inode lists the coming insertion will need
    fn reserve_splits(
        &mut self,
        path: &[PathStep],
        leaf: Option<(ArenaOffset, usize)>,
        replaces: bool,
    ) -> Result<Reservation> {
        let mut reservation = Reservation::default();
        let max_keys = self.layout.max_keys();

        let Some((_, leaf_keys)) = leaf else {
            // Empty tree: the root leaf itself
            reservation.nodes.push(self.allocate_node()?);
            reservation.lists.push(self.allocate_list()?);
            return Ok(reservation);
        };
        if replaces || leaf_keys < max_keys {
            return Ok(reservation);
        }

        let mut splits = 1;
        for step in path.iter().rev() {
            if step.num_keys < max_keys {
                break;
            }
            splits += 1;
        }
        // Every level splits, including the root: one more node for the new root
        let new_root = usize::from(splits == path.len() + 1);

        for _ in 0..splits + new_root {
            reservation.nodes.push(self.allocate_node()?);
        }
        reservation.lists.push(self.allocate_list()?);
        Ok(reservation)
    }

    fn allocate_node(&mut self) -> Result<ArenaOffset> {
        self.arena.allocate(self.layout.node_size())
    }

    fn allocate_list(&mut self) -> Result<ArenaOffset> {
        self.arena.allocate(self.layout.inode_list_size())
    }

    fn insert(
        &mut self,
        key: InodeKey,
        record: ArenaOffset,
        path: &[PathStep],
        leaf: Option<(ArenaOffset, usize)>,
        mut reservation: Reservation,
    ) -> Result<()> {
        let key = key.as_u64();

        let Some((leaf_offset, _)) = leaf else {
            let root = reservation.node()?;
            let mut node = Node::leaf(ArenaOffset::NULL, reservation.list()?);
            node.keys.push(key);
            node.values.push(record);
            self.layout.store(&mut self.arena, root, &node)?;
            self.root = root;
            self.height = 1;
            self.nodes = 1;
            self.leaves = 1;
            return Ok(());
        };

        let mut node = self.layout.load(&self.arena, leaf_offset)?;
        match node.keys.binary_search(&key) {
            Ok(pos) => node.values[pos] = record,
            Err(pos) => {
                node.keys.insert(pos, key);
                node.values.insert(pos, record);
            }
        }
        if node.keys.len() <= self.layout.max_keys() {
            return self.layout.store(&mut self.arena, leaf_offset, &node);
        }

        // Split the leaf at the median: the upper half moves to a new sibling
        let mid = node.keys.len() / 2;
        let sibling_offset = reservation.node()?;
        let mut sibling = Node::leaf(node.parent, reservation.list()?);
        sibling.keys = node.keys.split_off(mid);
        sibling.values = node.values.split_off(mid);
        let separator = sibling.keys[0];

        self.layout.store(&mut self.arena, leaf_offset, &node)?;
        self.layout.store(&mut self.arena, sibling_offset, &sibling)?;
        self.nodes += 1;
        self.leaves += 1;
        self.splits += 1;
        debug!("Split leaf {} at key {:016x}", leaf_offset, separator);

        self.insert_into_parent(path, leaf_offset, separator, sibling_offset, &mut reservation)
    }

    /// Hook `right` in next to `left` after `left` split around `separator`
    fn insert_into_parent(
        &mut self,
        path: &[PathStep],
        left: ArenaOffset,
        separator: u64,
        right: ArenaOffset,
        reservation: &mut Reservation,
    ) -> Result<()> {
        let Some((step, rest)) = path.split_last() else {
            // `left` was the root
            let root = reservation.node()?;
            let mut node = Node::internal(ArenaOffset::NULL);
            node.keys.push(separator);
            node.children.extend([left, right]);
            self.layout.store(&mut self.arena, root, &node)?;
            NodeLayout::set_parent(&mut self.arena, left, root)?;
            NodeLayout::set_parent(&mut self.arena, right, root)?;

            self.root = root;
            self.height += 1;
            self.nodes += 1;
            debug!("New root {} (height {})", root, self.height);
            return Ok(());
        };

        let mut node = self.layout.load(&self.arena, step.node)?;
        node.keys.insert(step.child, separator);
        node.children.insert(step.child + 1, right);
        if node.keys.len() <= self.layout.max_keys() {
            return self.layout.store(&mut self.arena, step.node, &node);
        }

        // The median key moves up; it stays in neither half
        let mid = node.keys.len() / 2;
        let sibling_offset = reservation.node()?;
        let mut sibling = Node::internal(node.parent);
        sibling.keys = node.keys.split_off(mid + 1);
        sibling.children = node.children.split_off(mid + 1);
        let up = node.keys.pop().ok_or_else(|| {
            Error::invalid_node(step.node.raw(), "internal split of an empty node")
        })?;

        self.layout.store(&mut self.arena, step.node, &node)?;
        self.layout.store(&mut self.arena, sibling_offset, &sibling)?;
        for child in &sibling.children {
            NodeLayout::set_parent(&mut self.arena, *child, sibling_offset)?;
        }
        self.nodes += 1;
        self.splits += 1;
        debug!("Split internal node {} at key {:016x}", step.node, up);

        self.insert_into_parent(rest, step.node, up, sibling_offset, reservation)
    }

    // =========================================================================
    // Read Path
    // =========================================================================

    /// Descend to the leaf that holds or would hold `key`
    ///
    /// Returns the internal nodes visited and the leaf with its key count,
    /// or no leaf when the tree is empty.
    fn find_leaf(&self, key: u64) -> Result<(Vec<PathStep>, Option<(ArenaOffset, usize)>)> {
        let mut path = Vec::with_capacity(self.height);
        if self.root.is_null() {
            return Ok((path, None));
        }

        let mut current = self.root;
        loop {
            let node = self.layout.load(&self.arena, current)?;
            if node.is_leaf {
                return Ok((path, Some((current, node.keys.len()))));
            }
            let child = node.child_index(key);
            path.push(PathStep {
                node: current,
                child,
                num_keys: node.keys.len(),
            });
            current = node.children[child];
        }
    }

    /// Inode record currently stored for `key` in `leaf`
    fn leaf_slot(&self, (leaf, _): (ArenaOffset, usize), key: u64) -> Result<Option<ArenaOffset>> {
        let node = self.layout.load(&self.arena, leaf)?;
        Ok(node
            .keys
            .binary_search(&key)
            .ok()
            .map(|pos| node.values[pos]))
    }

    /// Handle of the latest record for `key`
    pub fn get_offset(&self, key: InodeKey) -> Result<Option<ArenaOffset>> {
        match self.find_leaf(key.as_u64())? {
            (_, Some(leaf)) => self.leaf_slot(leaf, key.as_u64()),
            (_, None) => Ok(None),
        }
    }

    /// Latest record for `key`, tombstones included
    pub fn get(&self, key: InodeKey) -> Result<Option<InodeRecord>> {
        self.get_offset(key)?
            .map(|offset| InodeRecord::load(&self.arena, offset))
            .transpose()
    }

    /// Latest live record for the inode with `hash`
    ///
    /// Returns `None` when the inode was never indexed, its latest record
    /// is a tombstone, or the slot belongs to another hash with the same
    /// key.
    pub fn lookup(&self, hash: &[u8]) -> Result<Option<InodeRecord>> {
        let key = InodeKey::from_hash(hash);
        let Some(record) = self.get(key)? else {
            return Ok(None);
        };
        if self.hash_of(&record)? != hash {
            warn!("Key {} is held by a different hash", key);
            return Ok(None);
        }
        Ok(Some(record).filter(|record| !record.deleted))
    }

    /// Every record ever written for `key`, newest first
    pub fn versions(&self, key: InodeKey) -> Result<Vec<InodeRecord>> {
        let mut versions = Vec::new();
        let mut next = self.get_offset(key)?.unwrap_or(ArenaOffset::NULL);
        while !next.is_null() {
            let record = InodeRecord::load(&self.arena, next)?;
            next = record.previous;
            versions.push(record);
        }
        Ok(versions)
    }

    /// Block chain of `record`, in the order the blocks were stored
    pub fn blocks(&self, record: &InodeRecord) -> Result<Vec<BlockData>> {
        (0..record.block_count())
            .map(|i| BlockData::load(&self.arena, record.block_data.add(i * BlockData::SIZE)))
            .collect()
    }

    /// Raw bytes of a stored block
    pub fn block_bytes(&self, block: &BlockData) -> Result<&[u8]> {
        if block.data_offset.is_null() {
            return Ok(&[]);
        }
        self.arena.read(block.data_offset, block.size as usize)
    }

    /// Identity hash of `record`
    pub fn hash_of(&self, record: &InodeRecord) -> Result<&[u8]> {
        self.arena.read(record.hash, record.hash_len as usize)
    }

    /// All keys with their latest record, in ascending key order
    pub fn entries(&self) -> Result<Vec<(InodeKey, InodeRecord)>> {
        let mut entries = Vec::with_capacity(self.keys as usize);
        if self.root.is_null() {
            return Ok(entries);
        }

        let mut stack = vec![self.root];
        while let Some(offset) = stack.pop() {
            let node = self.layout.load(&self.arena, offset)?;
            if node.is_leaf {
                for (key, value) in node.keys.iter().zip(&node.values) {
                    entries.push((InodeKey::from(*key), InodeRecord::load(&self.arena, *value)?));
                }
            } else {
                // Reversed so the leftmost child is visited first
                stack.extend(node.children.iter().rev());
            }
        }
        Ok(entries)
    }

    /// Verify the B+Tree invariants over the whole tree
    ///
    /// Checks key order and bounds, fan-out limits, parent links, and that
    /// every leaf sits at the same depth.
    pub fn check_invariants(&self) -> Result<()> {
        if self.root.is_null() {
            return if self.keys == 0 {
                Ok(())
            } else {
                Err(Error::invalid_node(-1, "keys counted but no root"))
            };
        }

        // (node, expected parent, depth, lower bound, upper bound)
        let mut stack = vec![(self.root, ArenaOffset::NULL, 1usize, None, None)];
        let mut leaf_keys = 0u64;
        let mut last_key: Option<u64> = None;

        while let Some((offset, parent, depth, lower, upper)) = stack.pop() {
            let node = self.layout.load(&self.arena, offset)?;
            let fail = |reason: String| Err(Error::invalid_node(offset.raw(), reason));

            if node.parent != parent {
                return fail(format!("parent is {}, expected {}", node.parent, parent));
            }
            if !node.keys.windows(2).all(|w| w[0] < w[1]) {
                return fail("keys not strictly increasing".into());
            }
            if offset != self.root && node.keys.len() < self.layout.min_keys() {
                return fail(format!(
                    "{} keys, minimum is {}",
                    node.keys.len(),
                    self.layout.min_keys()
                ));
            }
            if node.keys.is_empty() {
                return fail("node holds no keys".into());
            }
            let in_bounds = node.keys.iter().all(|k| {
                lower.is_none_or(|lo: u64| *k >= lo) && upper.is_none_or(|hi: u64| *k < hi)
            });
            if !in_bounds {
                return fail("key outside the range routed to this node".into());
            }

            if node.is_leaf {
                if depth != self.height {
                    return fail(format!("leaf at depth {depth}, height is {}", self.height));
                }
                if last_key.is_some_and(|last| node.keys[0] <= last) {
                    return fail("leaf keys overlap the previous leaf".into());
                }
                last_key = node.keys.last().copied();
                leaf_keys += node.keys.len() as u64;
                continue;
            }

            if node.children.len() != node.keys.len() + 1 {
                return fail(format!(
                    "{} children for {} keys",
                    node.children.len(),
                    node.keys.len()
                ));
            }
            for i in (0..node.children.len()).rev() {
                let lo = if i == 0 { lower } else { Some(node.keys[i - 1]) };
                let hi = node.keys.get(i).copied().or(upper);
                stack.push((node.children[i], offset, depth + 1, lo, hi));
            }
        }

        if leaf_keys != self.keys {
            return Err(Error::invalid_node(
                self.root.raw(),
                format!("{leaf_keys} keys in leaves, {} inserted", self.keys),
            ));
        }
        Ok(())
    }

    /// Root node handle, null when empty
    #[must_use]
    pub const fn root(&self) -> ArenaOffset {
        self.root
    }

    /// Parent handle stored in the node at `node`
    pub fn parent_of(&self, node: ArenaOffset) -> Result<ArenaOffset> {
        NodeLayout::parent(&self.arena, node)
    }

    /// Levels including the leaf level, 0 when empty
    #[must_use]
    pub const fn height(&self) -> usize {
        self.height
    }

    /// Number of distinct keys
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.keys
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.keys == 0
    }

    #[must_use]
    pub const fn order(&self) -> usize {
        self.layout.order()
    }

    #[must_use]
    pub const fn arena(&self) -> &BumpArena {
        &self.arena
    }

    #[must_use]
    pub fn stats(&self) -> IndexStats {
        IndexStats {
            order: self.layout.order(),
            height: self.height,
            keys: self.keys,
            records: self.records,
            nodes: self.nodes,
            leaves: self.leaves,
            splits: self.splits,
            arena: self.arena.stats(),
        }
    }
}
