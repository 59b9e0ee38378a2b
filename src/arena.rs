// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Session-lifetime bucketed buffer arena.
//!
//! Replaces the original implementation's `malloc`/`free`-with-arena-header
//! (see `spec.md` §9, REDESIGN FLAGS) with a bucketed free-list: fifteen size
//! classes, each a `Vec` of reusable buffers. `alloc` rounds up to the
//! smallest class that fits and either reuses a freed buffer or grows a new
//! one; `free` returns it to its class's free list. Nothing is released back
//! to the OS until the whole `Arena` (owned by the session) drops.
//!
//! Frame buffers are sized once at `publish`/`subscribe` time and then reused
//! for the lifetime of the entry, so the steady-state send/receive path never
//! calls `alloc`/`free` at all — only entry creation and teardown do.

use crate::error::{Error, Result};

/// Size classes, ascending. 1432 is carried verbatim since it is the exact
/// maximum PD dataset length and most publications will size to it exactly.
const BUCKET_SIZES: [usize; 15] = [
    16, 32, 64, 128, 256, 512, 1024, 1432, 2048, 4096, 8192, 16384, 32768, 65536, 131_072,
];

struct Bucket {
    size: usize,
    free: Vec<Vec<u8>>,
}

/// Bucketed allocator whose lifetime is the owning [`crate::session::Session`].
pub struct Arena {
    buckets: [Bucket; 15],
}

/// A buffer checked out from the arena. Callers track the handle (index +
/// requested length) themselves; there is no `Drop`-based auto-return since
/// the arena's callers (publications, subscriptions, MD sessions) have
/// well-defined creation/teardown points that call [`Arena::free`] directly.
pub struct ArenaBuf {
    data: Vec<u8>,
    bucket: usize,
}

impl ArenaBuf {
    /// Borrow the buffer's bytes (length is the originally requested size).
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Mutably borrow the buffer's bytes.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Requested length, not the bucket's backing capacity.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Arena {
    /// Create an arena with all fifteen buckets empty; buffers are grown
    /// lazily on first `alloc` for each size class.
    #[must_use]
    pub fn new() -> Self {
        let buckets = BUCKET_SIZES.map(|size| Bucket {
            size,
            free: Vec::new(),
        });
        Self { buckets }
    }

    /// Check out a buffer of at least `len` bytes, zero-filled.
    ///
    /// # Errors
    /// Returns [`Error::Mem`] if `len` exceeds the largest bucket.
    pub fn alloc(&mut self, len: usize) -> Result<ArenaBuf> {
        let bucket = self
            .buckets
            .iter()
            .position(|b| b.size >= len)
            .ok_or(Error::Mem)?;

        let mut data = self.buckets[bucket]
            .free
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(self.buckets[bucket].size));
        data.clear();
        data.resize(len, 0);

        Ok(ArenaBuf { data, bucket })
    }

    /// Return a buffer to its size class's free list for reuse.
    pub fn free(&mut self, buf: ArenaBuf) {
        self.buckets[buf.bucket].free.push(buf.data);
    }

    /// Total buffers currently parked in free lists, for diagnostics/tests.
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.buckets.iter().map(|b| b.free.len()).sum()
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_rounds_up_to_bucket() {
        let mut arena = Arena::new();
        let buf = arena.alloc(10).unwrap();
        assert_eq!(buf.len(), 10);
    }

    #[test]
    fn oversized_alloc_is_mem_err() {
        let mut arena = Arena::new();
        assert!(matches!(arena.alloc(1_000_000), Err(Error::Mem)));
    }

    #[test]
    fn freed_buffer_is_reused() {
        let mut arena = Arena::new();
        let buf = arena.alloc(100).unwrap();
        assert_eq!(arena.free_count(), 0);
        arena.free(buf);
        assert_eq!(arena.free_count(), 1);
        let _buf2 = arena.alloc(50).unwrap();
        assert_eq!(arena.free_count(), 0);
    }

    #[test]
    fn reused_buffer_is_zeroed() {
        let mut arena = Arena::new();
        let mut buf = arena.alloc(16).unwrap();
        buf.as_mut_slice().fill(0xAA);
        arena.free(buf);
        let buf2 = arena.alloc(16).unwrap();
        assert!(buf2.as_slice().iter().all(|&b| b == 0));
    }
}
