//! Bump arena backing the inode index
//!
//! Memory is handed out by advancing a single cursor and is never freed
//! or moved. The arena grows by appending disjoint segments, so an offset
//! stays valid for the arena's whole lifetime.
//!
//! ```text
//!  segment 0                 segment 1
//! +----------------------+  +------------------------------+
//! | a0 | a1 | a2 |  tail |  | a3 | a4 |        free        |
//! +----------------------+  +------------------------------+
//! 0                      S  S              ^ cursor
//! ```
//!
//! An allocation that does not fit the tail of the current segment starts
//! at the base of a fresh one; the tail is left unused.

use derive_more::{Display, From, Into};
use serde::Serialize;
use tracing::{info, warn};
use zipfs_common::{ArenaConfig, Error, Result};

/// Allocation granularity in bytes
pub const ALIGNMENT: usize = 8;

/// Round `value` up to the allocation granularity, `None` on overflow
#[inline]
const fn align_up(value: usize) -> Option<usize> {
    value.checked_next_multiple_of(ALIGNMENT)
}

/// Handle to a region inside a [`BumpArena`]
///
/// `-1` is reserved as the null handle. Dereferencing it through the arena
/// fails with [`Error::NullHandle`] instead of reading garbage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into, Display, Serialize)]
#[display("{_0}")]
pub struct ArenaOffset(i64);

impl ArenaOffset {
    pub const NULL: Self = Self(-1);

    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 < 0
    }

    /// Byte offset, or `None` for the null handle
    #[must_use]
    pub const fn get(self) -> Option<u64> {
        if self.0 < 0 { None } else { Some(self.0 as u64) }
    }

    #[must_use]
    pub const fn raw(self) -> i64 {
        self.0
    }

    /// Handle `bytes` further into the same region
    #[must_use]
    pub const fn add(self, bytes: usize) -> Self {
        if self.is_null() {
            self
        } else {
            Self(self.0 + bytes as i64)
        }
    }
}

impl Default for ArenaOffset {
    fn default() -> Self {
        Self::NULL
    }
}

/// One contiguous, zero-initialized slab
struct Segment {
    base: usize,
    data: Box<[u8]>,
}

impl Segment {
    fn end(&self) -> usize {
        self.base + self.data.len()
    }
}

/// Point-in-time arena usage
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ArenaStats {
    /// Bytes handed out to callers
    pub used: usize,
    /// Next free offset
    pub high_water: usize,
    /// Bytes backed by segments
    pub reserved: usize,
    /// Upper bound on reserved bytes
    pub capacity: usize,
    pub segments: usize,
    pub allocations: u64,
}

/// Append-only memory arena
///
/// Single writer: allocation and writes take `&mut self`.
pub struct BumpArena {
    segments: Vec<Segment>,
    cursor: usize,
    used: usize,
    reserved: usize,
    allocations: u64,
    config: ArenaConfig,
}

impl BumpArena {
    /// Create an empty arena; no memory is reserved until the first allocation
    pub fn new(config: ArenaConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            segments: Vec::new(),
            cursor: 0,
            used: 0,
            reserved: 0,
            allocations: 0,
            config,
        })
    }

    /// Arena limited to a single segment of `size` bytes
    pub fn with_capacity(size: usize) -> Result<Self> {
        Self::new(ArenaConfig::fixed(size))
    }

    /// Reserve a zeroed region of at least `size` bytes and return its offset
    pub fn allocate(&mut self, size: usize) -> Result<ArenaOffset> {
        let size = align_up(size.max(1)).ok_or_else(|| self.exhausted(size))?;

        let fits = self.segments.last().is_some_and(|seg| {
            self.cursor
                .checked_add(size)
                .is_some_and(|end| end <= seg.end())
        });
        if !fits {
            self.grow(size)?;
        }

        let offset = self.cursor;
        self.cursor += size;
        self.used += size;
        self.allocations += 1;
        Ok(ArenaOffset(offset as i64))
    }

    /// Append a segment large enough for `size` bytes
    fn grow(&mut self, size: usize) -> Result<()> {
        let len = align_up(self.config.segment_size.max(size))
            .ok_or_else(|| self.exhausted(size))?;
        let within_limit = self
            .reserved
            .checked_add(len)
            .is_some_and(|total| total <= self.config.max_size);
        if !within_limit {
            return Err(self.exhausted(size));
        }

        let base = self.segments.last().map_or(0, Segment::end);
        self.segments.push(Segment {
            base,
            data: vec![0u8; len].into_boxed_slice(),
        });
        self.reserved += len;
        self.cursor = base;

        info!(
            "Arena grew to {} segments ({} of {} bytes reserved)",
            self.segments.len(),
            self.reserved,
            self.config.max_size
        );
        Ok(())
    }

    fn exhausted(&self, requested: usize) -> Error {
        Error::ArenaExhausted {
            requested,
            used: self.reserved,
            capacity: self.config.max_size,
        }
    }

    /// Resolve a handle to (segment index, start within segment)
    fn locate(&self, offset: ArenaOffset, len: usize) -> Result<(usize, usize)> {
        let Some(start) = offset.get() else {
            warn!("Dereferenced the null arena handle");
            return Err(Error::NullHandle);
        };
        let start = start as usize;
        let out_of_bounds = || {
            warn!(
                "Arena access of {} bytes at {} is outside the {} allocated bytes",
                len, offset, self.cursor
            );
            Error::OutOfBounds {
                offset: offset.raw(),
                len,
                arena_len: self.cursor,
            }
        };

        if start.checked_add(len).is_none_or(|end| end > self.cursor) {
            return Err(out_of_bounds());
        }
        let idx = self
            .segments
            .partition_point(|seg| seg.base <= start)
            .checked_sub(1)
            .ok_or_else(out_of_bounds)?;
        let seg = &self.segments[idx];
        if start + len > seg.end() {
            return Err(out_of_bounds());
        }
        Ok((idx, start - seg.base))
    }

    /// Borrow `len` bytes starting at `offset`
    pub fn read(&self, offset: ArenaOffset, len: usize) -> Result<&[u8]> {
        let (idx, start) = self.locate(offset, len)?;
        Ok(&self.segments[idx].data[start..start + len])
    }

    /// Copy `bytes` into the arena at `offset`
    pub fn write(&mut self, offset: ArenaOffset, bytes: &[u8]) -> Result<()> {
        let (idx, start) = self.locate(offset, bytes.len())?;
        self.segments[idx].data[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    pub fn read_u64(&self, offset: ArenaOffset) -> Result<u64> {
        let bytes = self.read(offset, 8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(buf))
    }

    pub fn write_u64(&mut self, offset: ArenaOffset, value: u64) -> Result<()> {
        self.write(offset, &value.to_le_bytes())
    }

    pub fn read_i64(&self, offset: ArenaOffset) -> Result<i64> {
        let bytes = self.read(offset, 8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(i64::from_le_bytes(buf))
    }

    pub fn write_i64(&mut self, offset: ArenaOffset, value: i64) -> Result<()> {
        self.write(offset, &value.to_le_bytes())
    }

    /// Read a stored handle
    pub fn read_offset(&self, offset: ArenaOffset) -> Result<ArenaOffset> {
        self.read_i64(offset).map(ArenaOffset)
    }

    /// Store a handle
    pub fn write_offset(&mut self, offset: ArenaOffset, value: ArenaOffset) -> Result<()> {
        self.write_i64(offset, value.raw())
    }

    /// Bytes handed out to callers
    #[must_use]
    pub const fn used(&self) -> usize {
        self.used
    }

    /// Next offset the cursor will hand out
    #[must_use]
    pub const fn high_water(&self) -> usize {
        self.cursor
    }

    /// Bytes backed by segments
    #[must_use]
    pub const fn reserved(&self) -> usize {
        self.reserved
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.config.max_size
    }

    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    #[must_use]
    pub fn stats(&self) -> ArenaStats {
        ArenaStats {
            used: self.used,
            high_water: self.cursor,
            reserved: self.reserved,
            capacity: self.config.max_size,
            segments: self.segments.len(),
            allocations: self.allocations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arena(segment: usize, max: usize) -> BumpArena {
        BumpArena::new(ArenaConfig {
            segment_size: segment,
            max_size: max,
        })
        .unwrap()
    }

    #[test]
    fn test_allocations_are_monotonic() {
        let mut arena = arena(256, 4096);
        let sizes = [1usize, 8, 13, 64, 100, 3, 200, 7, 256, 40];

        let mut prev: Option<(u64, usize)> = None;
        for size in sizes {
            let offset = arena.allocate(size).unwrap().get().unwrap();
            if let Some((prev_offset, prev_size)) = prev {
                assert!(offset >= prev_offset + prev_size as u64);
            }
            prev = Some((offset, size));
        }
        assert_eq!(arena.stats().allocations, sizes.len() as u64);
    }

    #[test]
    fn test_allocations_do_not_overlap() {
        let mut arena = arena(128, 4096);
        let mut regions = Vec::new();
        for i in 0..20u8 {
            let size = 5 + usize::from(i) * 3;
            let offset = arena.allocate(size).unwrap();
            arena.write(offset, &vec![i; size]).unwrap();
            regions.push((offset, size, i));
        }
        for (offset, size, fill) in regions {
            assert!(arena.read(offset, size).unwrap().iter().all(|b| *b == fill));
        }
    }

    #[test]
    fn test_regions_are_zeroed() {
        let mut arena = BumpArena::with_capacity(1024).unwrap();
        let offset = arena.allocate(100).unwrap();
        assert!(arena.read(offset, 100).unwrap().iter().all(|b| *b == 0));
    }

    #[test]
    fn test_growth_keeps_offsets_stable() {
        let mut arena = arena(64, 1024);
        let first = arena.allocate(48).unwrap();
        arena.write(first, b"first region").unwrap();

        // Does not fit the 16-byte tail: a second segment is appended
        let second = arena.allocate(32).unwrap();
        assert_eq!(arena.segment_count(), 2);
        assert_eq!(second.get(), Some(64));
        assert_eq!(arena.read(first, 12).unwrap(), b"first region");

        // Oversized requests get a segment of their own
        let big = arena.allocate(200).unwrap();
        arena.write(big, &[9u8; 200]).unwrap();
        assert_eq!(arena.segment_count(), 3);
        assert_eq!(arena.read(first, 12).unwrap(), b"first region");
    }

    #[test]
    fn test_exhaustion() {
        let mut arena = BumpArena::with_capacity(64).unwrap();
        arena.allocate(64).unwrap();
        let err = arena.allocate(1).unwrap_err();
        assert!(err.is_exhaustion());
        assert!(matches!(err, Error::ArenaExhausted { capacity: 64, .. }));
    }

    #[test]
    fn test_oversized_request_is_exhaustion() {
        let mut arena = BumpArena::with_capacity(1024).unwrap();
        arena.allocate(16).unwrap();

        for size in [usize::MAX, usize::MAX - 3, usize::MAX / 2 + 8] {
            let err = arena.allocate(size).unwrap_err();
            assert!(err.is_exhaustion());
            assert!(matches!(err, Error::ArenaExhausted { capacity: 1024, .. }));
        }
        // A failed request leaves the cursor where it was
        assert_eq!(arena.high_water(), 16);
        assert_eq!(arena.allocate(8).unwrap().get(), Some(16));
    }

    #[test]
    fn test_checked_access() {
        let mut arena = BumpArena::with_capacity(128).unwrap();
        let offset = arena.allocate(16).unwrap();

        assert!(matches!(
            arena.read(ArenaOffset::NULL, 8),
            Err(Error::NullHandle)
        ));
        // Past the cursor, even though the segment has room
        assert!(matches!(
            arena.read(offset, 32),
            Err(Error::OutOfBounds { .. })
        ));
        assert!(arena.write(offset.add(16), &[1]).unwrap_err().is_contract_violation());
        // Lengths that would wrap the address space are rejected too
        assert!(matches!(
            arena.read(offset, usize::MAX),
            Err(Error::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_typed_helpers() {
        let mut arena = BumpArena::with_capacity(128).unwrap();
        let offset = arena.allocate(16).unwrap();
        arena.write_u64(offset, 0xdead_beef).unwrap();
        arena.write_offset(offset.add(8), ArenaOffset::NULL).unwrap();

        assert_eq!(arena.read_u64(offset).unwrap(), 0xdead_beef);
        assert_eq!(arena.read_i64(offset.add(8)).unwrap(), -1);
        assert!(arena.read_offset(offset.add(8)).unwrap().is_null());
    }

    #[test]
    fn test_null_handle() {
        assert!(ArenaOffset::NULL.is_null());
        assert_eq!(ArenaOffset::NULL.get(), None);
        assert_eq!(ArenaOffset::NULL.add(8), ArenaOffset::NULL);
        assert_eq!(ArenaOffset::default(), ArenaOffset::NULL);
        assert_eq!(ArenaOffset::from(24).get(), Some(24));
    }
}
