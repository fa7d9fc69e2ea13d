// src/compute/buffers.rs - Edge buffers, bucket views, and index arrays
// Tree location: ./src/compute/buffers.rs

//! Buffer management for the trimming pipeline
//!
//! An `EdgeBuffer` is a flat, zero-initialized span of atomic u32 words.
//! Kernels never address it directly; they go through a `BucketView`,
//! which carves the span into fixed-capacity buckets of packed (two-word)
//! or compact (one-word) edges for one pipeline stage. Capacities are a
//! property of the view, not the allocation, which is how the round
//! capacity schedule reuses the same storage at different bucket sizes.
//!
//! An `IndexArray` holds one fill counter per bucket. Writers reserve
//! slots with a clamped atomic add: reservations past the capacity are
//! truncated and the excess entries dropped, never written out of bounds.
//! Readers bound their scans by `fill`, which clamps the counter back to
//! the capacity.

use std::sync::atomic::{AtomicU32, Ordering};

/// Flat span of device words backing one or more pipeline stages.
pub struct EdgeBuffer {
    words: Box<[AtomicU32]>,
}

impl EdgeBuffer {
    /// Allocate `words` zero-initialized u32 words.
    pub fn new(words: usize) -> Self {
        let mut v = Vec::with_capacity(words);
        v.resize_with(words, || AtomicU32::new(0));
        Self {
            words: v.into_boxed_slice(),
        }
    }

    /// Word count of the allocation.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Whether the allocation is empty.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Allocation size in bytes.
    pub fn bytes(&self) -> u64 {
        self.words.len() as u64 * 4
    }

    /// Raw word access, used by the tail readback.
    pub fn words(&self) -> &[AtomicU32] {
        &self.words
    }

    /// View the whole buffer as `nbuckets` buckets of `cap` edges of
    /// `width` words each.
    pub fn view(&self, nbuckets: usize, cap: usize, width: usize) -> BucketView<'_> {
        self.view_at(0, nbuckets, cap, width)
    }

    /// View a sub-span starting at `offset` words. Used to lay the NB
    /// seed-B partitions out back to back in one allocation.
    pub fn view_at(
        &self,
        offset: usize,
        nbuckets: usize,
        cap: usize,
        width: usize,
    ) -> BucketView<'_> {
        let need = nbuckets * cap * width;
        assert!(
            offset + need <= self.words.len(),
            "bucket view [{offset}, {}) exceeds allocation of {} words",
            offset + need,
            self.words.len()
        );
        BucketView {
            words: &self.words[offset..offset + need],
            cap,
            width,
        }
    }
}

/// A fixed-capacity bucketed view over an edge buffer.
#[derive(Clone, Copy)]
pub struct BucketView<'a> {
    words: &'a [AtomicU32],
    cap: usize,
    width: usize,
}

impl<'a> BucketView<'a> {
    /// Edge capacity of each bucket.
    pub fn cap(&self) -> u32 {
        self.cap as u32
    }

    /// Words per edge: 2 packed, 1 compact.
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    fn base(&self, bucket: usize, slot: usize) -> usize {
        debug_assert!(slot < self.cap);
        bucket * self.cap * self.width + slot * self.width
    }

    /// Store a packed edge.
    #[inline]
    pub fn write_pair(&self, bucket: usize, slot: usize, edge: (u32, u32)) {
        debug_assert_eq!(self.width, 2);
        let at = self.base(bucket, slot);
        self.words[at].store(edge.0, Ordering::Relaxed);
        self.words[at + 1].store(edge.1, Ordering::Relaxed);
    }

    /// Load a packed edge.
    #[inline]
    pub fn read_pair(&self, bucket: usize, slot: usize) -> (u32, u32) {
        debug_assert_eq!(self.width, 2);
        let at = self.base(bucket, slot);
        (
            self.words[at].load(Ordering::Relaxed),
            self.words[at + 1].load(Ordering::Relaxed),
        )
    }

    /// Store a compact edge (a bare nonce).
    #[inline]
    pub fn write_word(&self, bucket: usize, slot: usize, word: u32) {
        debug_assert_eq!(self.width, 1);
        self.words[self.base(bucket, slot)].store(word, Ordering::Relaxed);
    }

    /// Load a compact edge.
    #[inline]
    pub fn read_word(&self, bucket: usize, slot: usize) -> u32 {
        debug_assert_eq!(self.width, 1);
        self.words[self.base(bucket, slot)].load(Ordering::Relaxed)
    }
}

/// Per-bucket fill counters for one pipeline stage.
pub struct IndexArray {
    counters: Box<[AtomicU32]>,
}

impl IndexArray {
    /// Allocate `n` zeroed counters.
    pub fn new(n: usize) -> Self {
        let mut v = Vec::with_capacity(n);
        v.resize_with(n, || AtomicU32::new(0));
        Self {
            counters: v.into_boxed_slice(),
        }
    }

    /// Counter count.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    /// Whether the array is empty.
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Allocation size in bytes.
    pub fn bytes(&self) -> u64 {
        self.counters.len() as u64 * 4
    }

    /// Reset every counter. Called between stages and between rounds.
    pub fn zero(&self) {
        for c in self.counters.iter() {
            c.store(0, Ordering::Relaxed);
        }
    }

    /// Reserve `n` slots in `bucket`, clamped to `cap`. Returns the start
    /// slot and how many of the requested slots may actually be written;
    /// `None` when the bucket is already full. The counter itself may run
    /// past `cap`; readers clamp it back through `fill`.
    #[inline]
    pub fn reserve(&self, bucket: usize, n: u32, cap: u32) -> Option<(u32, u32)> {
        let old = self.counters[bucket].fetch_add(n, Ordering::Relaxed);
        if old >= cap {
            return None;
        }
        Some((old, n.min(cap - old)))
    }

    /// Readable fill of `bucket`, clamped to `cap`.
    #[inline]
    pub fn fill(&self, bucket: usize, cap: u32) -> u32 {
        self.counters[bucket].load(Ordering::Relaxed).min(cap)
    }

    /// Unclamped counter value, for diagnostics.
    pub fn raw(&self, bucket: usize) -> u32 {
        self.counters[bucket].load(Ordering::Relaxed)
    }
}
