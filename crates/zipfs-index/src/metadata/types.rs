//! Metadata cache value types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One line of a `.root` file: where a path's data lives
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathEntry {
    /// Node file holding the data
    pub node_name: String,
    pub inode_id: String,
    /// Byte offset within the node file
    pub offset: u64,
    pub size: u64,
}

impl PathEntry {
    pub fn new(
        node_name: impl Into<String>,
        inode_id: impl Into<String>,
        offset: u64,
        size: u64,
    ) -> Self {
        Self {
            node_name: node_name.into(),
            inode_id: inode_id.into(),
            offset,
            size,
        }
    }
}

impl From<(String, String, u64, u64)> for PathEntry {
    fn from((node_name, inode_id, offset, size): (String, String, u64, u64)) -> Self {
        Self {
            node_name,
            inode_id,
            offset,
            size,
        }
    }
}

/// Path entries of every path cached under one root, keyed by path
pub type RootEntries = HashMap<String, Vec<PathEntry>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_entry_from_tuple() {
        let entry = PathEntry::from(("n1".to_string(), "ino".to_string(), 64, 128));
        assert_eq!(entry, PathEntry::new("n1", "ino", 64, 128));
    }
}
