//! Error types for zipfs
//!
//! Errors fall into two classes that callers must be able to tell apart:
//! the arena running out of space (nothing can be reclaimed, so the
//! in-flight insertion is abandoned) and contract violations, where the
//! caller handed the core bad input or a bad handle.

use thiserror::Error;

/// Common result type for zipfs operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for zipfs
#[derive(Debug, Error)]
pub enum Error {
    // Resource exhaustion
    #[error("arena exhausted: requested {requested} bytes with {used} of {capacity} bytes reserved")]
    ArenaExhausted {
        requested: usize,
        used: usize,
        capacity: usize,
    },

    // Contract violations
    #[error("block {block_id} has data but no modification time")]
    MissingBlockMtime { block_id: u64 },

    #[error("modification time given for block {block_id} which has no data")]
    OrphanBlockMtime { block_id: u64 },

    #[error("inode hash is {len} bytes, maximum is {max}")]
    HashTooLong { len: usize, max: usize },

    #[error("arena access out of bounds: offset {offset}, len {len}, arena length {arena_len}")]
    OutOfBounds {
        offset: i64,
        len: usize,
        arena_len: usize,
    },

    #[error("dereferenced a null arena handle")]
    NullHandle,

    #[error("invalid node at offset {offset}: {reason}")]
    InvalidNode { offset: i64, reason: String },

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create an invalid node error
    pub fn invalid_node(offset: i64, reason: impl Into<String>) -> Self {
        Self::InvalidNode {
            offset,
            reason: reason.into(),
        }
    }

    /// Check if the arena ran out of space
    #[must_use]
    pub const fn is_exhaustion(&self) -> bool {
        matches!(self, Self::ArenaExhausted { .. })
    }

    /// Check if the caller broke the input or handle contract
    #[must_use]
    pub const fn is_contract_violation(&self) -> bool {
        !self.is_exhaustion()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        let full = Error::ArenaExhausted {
            requested: 64,
            used: 1024,
            capacity: 1024,
        };
        assert!(full.is_exhaustion());
        assert!(!full.is_contract_violation());

        let bad = Error::MissingBlockMtime { block_id: 7 };
        assert!(bad.is_contract_violation());
        assert!(!bad.is_exhaustion());
        assert!(Error::NullHandle.is_contract_violation());
    }

    #[test]
    fn test_error_display() {
        let err = Error::OrphanBlockMtime { block_id: 3 };
        assert_eq!(
            err.to_string(),
            "modification time given for block 3 which has no data"
        );
        let err = Error::invalid_node(16, "keys out of order");
        assert_eq!(err.to_string(), "invalid node at offset 16: keys out of order");
    }
}
