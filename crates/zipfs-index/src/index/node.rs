//! B+Tree node layout in the arena
//!
//! Every node of a tree has the same fixed footprint, sized by the tree's
//! order at allocation time:
//!
//! ```text
//! +------------------------+ 0
//! | parent: i64            | 8
//! | num_keys: u64          | 16
//! | is_leaf: u64           | 24
//! | inodes: i64            | 32  -> inode list (leaves only)
//! | values_size: u64       | 40  (HEADER_SIZE)
//! +------------------------+
//! | keys: [u64; order - 1] |
//! +------------------------+
//! | children: [i64; order] |  unused slots hold -1
//! +------------------------+
//! ```
//!
//! A leaf's inode list is a separate allocation of `order - 1` handles;
//! slot `i` holds the latest inode record for `keys[i]`.

use crate::arena::{ArenaOffset, BumpArena};
use bytes::{Buf, BufMut, BytesMut};
use zipfs_common::{Error, Result};

const PARENT: usize = 0;
const NUM_KEYS: usize = 8;
const IS_LEAF: usize = 16;
const INODES: usize = 24;
const VALUES_SIZE: usize = 32;
const HEADER_SIZE: usize = 40;

const HANDLE_SIZE: usize = 8;

/// Byte layout of nodes for a given order
#[derive(Clone, Copy, Debug)]
pub(crate) struct NodeLayout {
    order: usize,
}

impl NodeLayout {
    pub(crate) const fn new(order: usize) -> Self {
        Self { order }
    }

    pub(crate) const fn order(self) -> usize {
        self.order
    }

    pub(crate) const fn max_keys(self) -> usize {
        self.order - 1
    }

    /// Fewest keys any non-root node may hold
    pub(crate) const fn min_keys(self) -> usize {
        self.order.div_ceil(2) - 1
    }

    const fn keys_offset() -> usize {
        HEADER_SIZE
    }

    const fn children_offset(self) -> usize {
        HEADER_SIZE + self.max_keys() * 8
    }

    pub(crate) const fn node_size(self) -> usize {
        self.children_offset() + self.order * HANDLE_SIZE
    }

    pub(crate) const fn inode_list_size(self) -> usize {
        self.max_keys() * HANDLE_SIZE
    }

    /// Rewrite only the parent field of the node at `node`
    pub(crate) fn set_parent(
        arena: &mut BumpArena,
        node: ArenaOffset,
        parent: ArenaOffset,
    ) -> Result<()> {
        arena.write_offset(node.add(PARENT), parent)
    }

    pub(crate) fn parent(arena: &BumpArena, node: ArenaOffset) -> Result<ArenaOffset> {
        arena.read_offset(node.add(PARENT))
    }

    /// Decode the node at `offset` into a working copy
    pub(crate) fn load(self, arena: &BumpArena, offset: ArenaOffset) -> Result<Node> {
        let mut header = arena.read(offset, HEADER_SIZE)?;
        let parent = ArenaOffset::from(header.get_i64_le());
        let num_keys = header.get_u64_le() as usize;
        let is_leaf = header.get_u64_le() != 0;
        let inodes = ArenaOffset::from(header.get_i64_le());
        let values_size = header.get_u64_le() as usize;

        if num_keys > self.max_keys() {
            return Err(Error::invalid_node(
                offset.raw(),
                format!("{num_keys} keys exceeds capacity {}", self.max_keys()),
            ));
        }

        let mut raw = arena.read(offset.add(Self::keys_offset()), num_keys * 8)?;
        let keys = (0..num_keys).map(|_| raw.get_u64_le()).collect();

        if is_leaf {
            if values_size != num_keys {
                return Err(Error::invalid_node(
                    offset.raw(),
                    format!("{values_size} inodes for {num_keys} keys"),
                ));
            }
            let values = read_handles(arena, inodes, values_size)?;
            Ok(Node {
                parent,
                is_leaf,
                keys,
                children: Vec::new(),
                inodes,
                values,
            })
        } else {
            let children = read_handles(arena, offset.add(self.children_offset()), num_keys + 1)?;
            Ok(Node {
                parent,
                is_leaf,
                keys,
                children,
                inodes: ArenaOffset::NULL,
                values: Vec::new(),
            })
        }
    }

    /// Write the full fixed-size image of `node` to `offset`
    pub(crate) fn store(self, arena: &mut BumpArena, offset: ArenaOffset, node: &Node) -> Result<()> {
        let fanout = if node.is_leaf { node.values.len() } else { node.children.len() };
        if node.keys.len() > self.max_keys() || fanout > self.order {
            return Err(Error::invalid_node(
                offset.raw(),
                format!("{} keys / {fanout} children overflow order {}", node.keys.len(), self.order),
            ));
        }

        let mut buf = BytesMut::with_capacity(self.node_size());
        buf.put_i64_le(node.parent.raw());
        buf.put_u64_le(node.keys.len() as u64);
        buf.put_u64_le(u64::from(node.is_leaf));
        buf.put_i64_le(node.inodes.raw());
        buf.put_u64_le(if node.is_leaf { node.values.len() as u64 } else { 0 });

        for key in &node.keys {
            buf.put_u64_le(*key);
        }
        buf.put_bytes(0, (self.max_keys() - node.keys.len()) * 8);

        for child in &node.children {
            buf.put_i64_le(child.raw());
        }
        for _ in node.children.len()..self.order {
            buf.put_i64_le(ArenaOffset::NULL.raw());
        }
        arena.write(offset, &buf)?;

        if node.is_leaf && !node.values.is_empty() {
            let mut list = BytesMut::with_capacity(node.values.len() * HANDLE_SIZE);
            for value in &node.values {
                list.put_i64_le(value.raw());
            }
            arena.write(node.inodes, &list)?;
        }
        Ok(())
    }
}

fn read_handles(arena: &BumpArena, offset: ArenaOffset, count: usize) -> Result<Vec<ArenaOffset>> {
    if count == 0 {
        return Ok(Vec::new());
    }
    let mut raw = arena.read(offset, count * HANDLE_SIZE)?;
    Ok((0..count).map(|_| ArenaOffset::from(raw.get_i64_le())).collect())
}

/// Working copy of one node
///
/// Loaded, edited, and written back whole; the arena image is what keeps
/// the fixed capacity.
#[derive(Clone, Debug)]
pub(crate) struct Node {
    pub(crate) parent: ArenaOffset,
    pub(crate) is_leaf: bool,
    pub(crate) keys: Vec<u64>,
    /// Child nodes (internal only), always `keys.len() + 1`
    pub(crate) children: Vec<ArenaOffset>,
    /// Inode list handle (leaves only)
    pub(crate) inodes: ArenaOffset,
    /// Inode records (leaves only), parallel to `keys`
    pub(crate) values: Vec<ArenaOffset>,
}

impl Node {
    pub(crate) const fn leaf(parent: ArenaOffset, inodes: ArenaOffset) -> Self {
        Self {
            parent,
            is_leaf: true,
            keys: Vec::new(),
            children: Vec::new(),
            inodes,
            values: Vec::new(),
        }
    }

    pub(crate) const fn internal(parent: ArenaOffset) -> Self {
        Self {
            parent,
            is_leaf: false,
            keys: Vec::new(),
            children: Vec::new(),
            inodes: ArenaOffset::NULL,
            values: Vec::new(),
        }
    }

    /// Index of the child whose subtree may hold `key`
    ///
    /// `children[i + 1]` holds keys `>= keys[i]`.
    pub(crate) fn child_index(&self, key: u64) -> usize {
        self.keys.partition_point(|k| *k <= key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_bounds() {
        let layout = NodeLayout::new(1000);
        assert_eq!(layout.max_keys(), 999);
        assert_eq!(layout.min_keys(), 499);
        assert_eq!(layout.node_size(), 40 + 999 * 8 + 1000 * 8);

        let small = NodeLayout::new(4);
        assert_eq!(small.max_keys(), 3);
        assert_eq!(small.min_keys(), 1);
        assert_eq!(NodeLayout::new(5).min_keys(), 2);
    }

    #[test]
    fn test_leaf_store_load() {
        let layout = NodeLayout::new(4);
        let mut arena = BumpArena::with_capacity(4096).unwrap();
        let offset = arena.allocate(layout.node_size()).unwrap();
        let list = arena.allocate(layout.inode_list_size()).unwrap();

        let mut leaf = Node::leaf(ArenaOffset::NULL, list);
        leaf.keys = vec![3, 9];
        leaf.values = vec![ArenaOffset::from(800), ArenaOffset::from(880)];
        layout.store(&mut arena, offset, &leaf).unwrap();

        let loaded = layout.load(&arena, offset).unwrap();
        assert!(loaded.is_leaf);
        assert_eq!(loaded.keys, vec![3, 9]);
        assert_eq!(loaded.values, leaf.values);
        assert!(loaded.parent.is_null());
    }

    #[test]
    fn test_internal_store_load() {
        let layout = NodeLayout::new(4);
        let mut arena = BumpArena::with_capacity(4096).unwrap();
        let offset = arena.allocate(layout.node_size()).unwrap();

        let mut node = Node::internal(ArenaOffset::from(512));
        node.keys = vec![10];
        node.children = vec![ArenaOffset::from(0), ArenaOffset::from(256)];
        layout.store(&mut arena, offset, &node).unwrap();

        let loaded = layout.load(&arena, offset).unwrap();
        assert!(!loaded.is_leaf);
        assert_eq!(loaded.children, node.children);
        assert_eq!(loaded.child_index(9), 0);
        assert_eq!(loaded.child_index(10), 1);
        assert_eq!(NodeLayout::parent(&arena, offset).unwrap(), ArenaOffset::from(512));

        // Unused child slots hold the null handle
        let tail = arena.read_offset(offset.add(layout.node_size() - 8)).unwrap();
        assert!(tail.is_null());
    }

    #[test]
    fn test_store_rejects_overflow() {
        let layout = NodeLayout::new(3);
        let mut arena = BumpArena::with_capacity(4096).unwrap();
        let offset = arena.allocate(layout.node_size()).unwrap();

        let mut node = Node::internal(ArenaOffset::NULL);
        node.keys = vec![1, 2, 3];
        node.children = vec![ArenaOffset::from(0); 4];
        assert!(matches!(
            layout.store(&mut arena, offset, &node),
            Err(Error::InvalidNode { .. })
        ));
    }
}
