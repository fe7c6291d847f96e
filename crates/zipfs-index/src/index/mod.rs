//! Inode index
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       BPlusIndex                         │
//! │   root ──► internal node ──► leaf ──► inode list         │
//! │                                          │               │
//! │                                          ▼               │
//! │                 inode record ──► hash buffer (512 B)     │
//! │                       │    └──► block data chain ──► raw │
//! │                       └──► previous inode record         │
//! └────────────────────────────┬─────────────────────────────┘
//!                              │ offsets only
//! ┌────────────────────────────▼─────────────────────────────┐
//! │                       BumpArena                          │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Every arrow is an [`ArenaOffset`](crate::arena::ArenaOffset); nothing in
//! the tree holds a Rust reference into the arena.

mod btree;
mod node;
mod records;
mod shared;

pub use btree::{BPlusIndex, IndexStats};
pub use records::{BlockData, InodeRecord};
pub use shared::SharedIndex;
