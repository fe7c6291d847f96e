//! Metadata cache for path entries and rendered file contents

mod cache;
mod types;

pub use cache::{CacheStats, MetadataCache, StoreStats};
pub use types::{PathEntry, RootEntries};
