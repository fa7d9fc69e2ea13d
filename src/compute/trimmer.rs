// src/compute/trimmer.rs - Trimmer controller: buffers, dispatch sequencing, readback
// Tree location: ./src/compute/trimmer.rs

//! The trimmer controller
//!
//! Owns the two edge buffers and the NB+1 index arrays, bound to one
//! device for the trimmer's lifetime, and sequences the pipeline: Seed A,
//! NA Seed-B launches over disjoint row ranges, the trimming rounds under
//! the stepped capacity schedule, and the terminal Tail compaction. Every
//! dispatch is followed by the kernel-boundary barrier; counters are
//! zeroed between stages; the SipHash key set is snapshotted from the
//! host-side field at the start of every call. Cancellation is honored
//! only between dispatches.
//!
//! # Version History
//! - 0.1.0: Initial pipeline sequencing
//! - 0.1.1: Recorded the device binding at construction so release
//!   happens against the same device
//! - 0.2.0: Capacity schedule generalized over EDGEBITS, expand modes

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use super::buffers::{BucketView, EdgeBuffer, IndexArray};
use super::device::{Device, DeviceRegistry};
use super::kernels::{self, RoundInput};
use super::ComputeError;
use crate::algorithms::siphash::SipKeys;
use crate::algorithms::{Variant, PROOFSIZE};

/// Seed-B launches over disjoint row sub-ranges of the Seed-A buffer.
pub const NA: usize = 4;
/// Partitions the A→B transfer splits each grid bucket across.
pub const NB: usize = 2;

/// Grid geometry of one kernel dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelShape {
    /// Thread-blocks in the grid.
    pub blocks: u32,
    /// Threads per block. The CPU substrate folds a block's threads into
    /// one sequential group sharing the block-local tiles.
    pub tpb: u32,
}

impl KernelShape {
    /// Construct a shape.
    pub fn new(blocks: u32, tpb: u32) -> Self {
        Self { blocks, tpb }
    }
}

/// Tuning parameters for one trimmer instance. All tunables flow through
/// here; nothing is read from the environment. Each shape's `blocks` sets
/// the dispatch granularity of its kernel: a grid smaller than the bucket
/// or row count makes each block walk a contiguous slice of them.
#[derive(Debug, Clone)]
pub struct TrimParams {
    /// Seed-A geometry.
    pub gen_a: KernelShape,
    /// Seed-B geometry.
    pub gen_b: KernelShape,
    /// Trim-round geometry.
    pub trim: KernelShape,
    /// Tail geometry.
    pub tail: KernelShape,
    /// Recovery geometry.
    pub recover: KernelShape,
    /// Number of trimming rounds.
    pub ntrims: u32,
    /// Expansion mode: 0 packed from Seed A, 1 compact through Seed A,
    /// 2 compact through Seed B.
    pub expand: u8,
}

impl Default for TrimParams {
    fn default() -> Self {
        Self {
            gen_a: KernelShape::new(2048, 128),
            gen_b: KernelShape::new(1024, 128),
            trim: KernelShape::new(4096, 1024),
            tail: KernelShape::new(4096, 1024),
            recover: KernelShape::new(2048, 256),
            ntrims: 120,
            expand: 0,
        }
    }
}

/// Construction-time graph geometry derived from EDGEBITS. All counts are
/// powers of two and X + Y + Z = EDGEBITS.
#[derive(Debug, Clone, Copy)]
pub struct Params {
    /// log2 of the edge count.
    pub edge_bits: u32,
    /// Row bits of the bucket grid.
    pub x_bits: u32,
    /// Column bits of the bucket grid.
    pub y_bits: u32,
    /// Bits counted by the per-bucket degree bitmap.
    pub z_bits: u32,
}

impl Params {
    /// Derive the geometry for an edge-bits value in `14..=31`.
    pub fn new(edge_bits: u32) -> Result<Self, ComputeError> {
        if !(14..=31).contains(&edge_bits) {
            return Err(ComputeError::InvalidParams(format!(
                "edge_bits {edge_bits} outside supported range 14..=31"
            )));
        }
        let x_bits = (edge_bits - 9) / 2;
        Ok(Self {
            edge_bits,
            x_bits,
            y_bits: x_bits,
            z_bits: edge_bits - 2 * x_bits,
        })
    }

    /// Total edge count.
    pub fn nedges(&self) -> u64 {
        1u64 << self.edge_bits
    }

    /// Mask selecting an endpoint from a hash word.
    pub fn edge_mask(&self) -> u32 {
        (self.nedges() - 1) as u32
    }

    /// Rows of the bucket grid.
    pub fn nx(&self) -> usize {
        1 << self.x_bits
    }

    /// Columns of the bucket grid.
    pub fn ny(&self) -> usize {
        1 << self.y_bits
    }

    /// Buckets in the grid.
    pub fn nxy(&self) -> usize {
        1 << (self.x_bits + self.y_bits)
    }

    /// Size of the per-bucket Z subspace; also the mean grid-bucket fill.
    pub fn nz(&self) -> usize {
        1 << self.z_bits
    }

    /// Bits below the row field of an endpoint.
    pub fn yz_bits(&self) -> u32 {
        self.y_bits + self.z_bits
    }

    /// Mask selecting the Z bits of an endpoint.
    pub fn zmask(&self) -> u32 {
        (self.nz() - 1) as u32
    }

    /// u32 words per degree-bitmap plane.
    pub fn counter_words(&self) -> usize {
        self.nz() / 32
    }

    /// Per-bucket capacity at the Seed-A stage.
    pub fn edges_a(&self) -> u32 {
        (3 * self.nz() / 2) as u32
    }

    /// Per-bucket capacity at the Seed-B stage.
    pub fn edges_b(&self) -> u32 {
        (2 * self.nz()) as u32
    }

    /// Row-bucket capacity of the Seed-A scatter.
    pub fn row_cap(&self) -> u32 {
        self.edges_a() * self.ny() as u32
    }

    /// Words one edge buffer must hold.
    fn buffer_words(&self) -> usize {
        self.nxy() * self.edges_b() as usize * 2
    }
}

/// The trimming engine. Owns its device binding and buffers for its whole
/// lifetime; stateless across calls apart from the allocations.
pub struct Trimmer {
    params: Params,
    tp: TrimParams,
    variant: Variant,
    device: Device,
    buf_a: EdgeBuffer,
    buf_b: EdgeBuffer,
    idx: Vec<IndexArray>,
    tail_total: AtomicU32,
    nonce_slots: Vec<AtomicU32>,
    cancel: Arc<std::sync::atomic::AtomicBool>,
    /// Host-side key set; snapshotted into the engine at each call.
    pub sip_keys: SipKeys,
    dev_keys: SipKeys,
    residue_in_a: bool,
}

impl Trimmer {
    /// Construct against the detected device registry.
    pub fn new(
        tp: TrimParams,
        params: Params,
        device_id: usize,
        variant: Variant,
    ) -> Result<Self, ComputeError> {
        let registry = DeviceRegistry::detect();
        Self::with_registry(&registry, tp, params, device_id, variant)
    }

    /// Construct against an explicit registry. Allocation is all or
    /// nothing: the budget check happens before any buffer exists.
    pub fn with_registry(
        registry: &DeviceRegistry,
        tp: TrimParams,
        params: Params,
        device_id: usize,
        variant: Variant,
    ) -> Result<Self, ComputeError> {
        if tp.expand > 2 {
            return Err(ComputeError::InvalidParams(format!(
                "expand {} outside 0..=2",
                tp.expand
            )));
        }
        if tp.ntrims < 2 {
            return Err(ComputeError::InvalidParams(format!(
                "ntrims {} below minimum of 2",
                tp.ntrims
            )));
        }
        let device = registry.bind(device_id)?;

        let buffer_words = params.buffer_words();
        let index_bytes = (NB + 1) as u64 * params.nxy() as u64 * 4;
        let required = 2 * buffer_words as u64 * 4 + index_bytes + PROOFSIZE as u64 * 4 + 32;
        let available = device.capabilities().memory;
        if required > available {
            return Err(ComputeError::OutOfMemory {
                required,
                available,
            });
        }

        tracing::info!(
            "🚧 allocating trimmer: edgebits {}, {} variant, {:.1} MiB across 2 buffers + {} index arrays",
            params.edge_bits,
            variant.name(),
            required as f64 / (1024.0 * 1024.0),
            NB + 1
        );

        let buf_a = EdgeBuffer::new(buffer_words);
        let buf_b = EdgeBuffer::new(buffer_words);
        let idx = (0..NB + 1).map(|_| IndexArray::new(params.nxy())).collect();
        let nonce_slots = (0..PROOFSIZE).map(|_| AtomicU32::new(0)).collect();

        Ok(Self {
            params,
            tp,
            variant,
            device,
            buf_a,
            buf_b,
            idx,
            tail_total: AtomicU32::new(0),
            nonce_slots,
            cancel: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            sip_keys: SipKeys::default(),
            dev_keys: SipKeys::default(),
            residue_in_a: false,
        })
    }

    /// Geometry this trimmer was built with.
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Variant selected at construction.
    pub fn variant(&self) -> Variant {
        self.variant
    }

    /// Id of the device recorded at construction.
    pub fn device_id(&self) -> usize {
        self.device.id()
    }

    /// Flag the caller may set to cancel a running trim. Checked between
    /// kernel dispatches only; a long round sequence may take a while to
    /// notice.
    pub fn cancel_handle(&self) -> Arc<std::sync::atomic::AtomicBool> {
        Arc::clone(&self.cancel)
    }

    fn checkpoint(&self) -> Result<(), ComputeError> {
        if self.cancel.load(Ordering::Relaxed) {
            return Err(ComputeError::Cancelled);
        }
        Ok(())
    }

    /// Input and output per-bucket capacities of round `r` under the
    /// stepped schedule: the A↔B sub-partition capacities for rounds 0
    /// and 1, stepping down through EDGES_A/4 to the EDGES_B/4 steady
    /// state. Output capacity of round r always equals input capacity of
    /// round r + 1 so successive rounds agree on the bucket stride.
    fn round_caps(&self, r: u32) -> (u32, u32) {
        let ea = self.params.edges_a();
        let eb = self.params.edges_b();
        match r {
            0 => (eb / NB as u32, eb / 2),
            1 => (eb / 2, ea / 4),
            2 => (ea / 4, eb / 4),
            _ => (eb / 4, eb / 4),
        }
    }

    /// Run the full pipeline and return the residual edge count.
    pub fn trim(&mut self) -> Result<u32, ComputeError> {
        let start = std::time::Instant::now();
        self.dev_keys = self.sip_keys;
        let keys = self.dev_keys;
        let params = self.params;
        tracing::debug!(
            "trim dispatch: keys {:016x?}, ntrims {}, expand {}, genA {}x{}, trim {}x{}",
            [keys.k0, keys.k1, keys.k2, keys.k3],
            self.tp.ntrims,
            self.tp.expand,
            self.tp.gen_a.blocks,
            self.tp.gen_a.tpb,
            self.tp.trim.blocks,
            self.tp.trim.tpb,
        );

        for ia in &self.idx {
            ia.zero();
        }
        self.tail_total.store(0, Ordering::Relaxed);
        self.checkpoint()?;

        let compact_a = self.tp.expand >= 1;
        let compact_b = self.tp.expand == 2;
        let width_a = if compact_a { 1 } else { 2 };
        let width_b = if compact_b { 1 } else { 2 };

        // Seed A scatters rows into buffer B.
        let rows = self
            .buf_b
            .view(params.nx(), params.row_cap() as usize, width_a);
        kernels::seed_a(
            &self.device,
            self.tp.gen_a,
            self.variant,
            &keys,
            &params,
            &rows,
            &self.idx[NB],
            compact_a,
        );
        self.checkpoint()?;

        // Seed B re-scatters into the NB grid partitions in buffer A,
        // one launch per disjoint row sub-range.
        let part_cap = params.edges_b() as usize / NB;
        let parts: Vec<BucketView<'_>> = (0..NB)
            .map(|p| {
                self.buf_a
                    .view_at(p * params.nxy() * part_cap * width_b, params.nxy(), part_cap, width_b)
            })
            .collect();
        let rows_per_launch = params.nx() / NA;
        for launch in 0..NA {
            kernels::seed_b(
                &self.device,
                self.tp.gen_b,
                self.variant,
                &keys,
                &params,
                &rows,
                &self.idx[NB],
                launch * rows_per_launch,
                (launch + 1) * rows_per_launch,
                &parts,
                &self.idx[..NB],
                compact_a,
                compact_b,
            );
            self.checkpoint()?;
        }

        // Round 0 folds the NB partitions into one bitmap per bucket and
        // writes packed survivors back to buffer B.
        self.idx[NB].zero();
        let (_, out0) = self.round_caps(0);
        {
            let inputs: Vec<RoundInput<'_>> = (0..NB)
                .map(|p| RoundInput {
                    view: parts[p],
                    idx: &self.idx[p],
                    compact: compact_b,
                })
                .collect();
            let out = self.buf_b.view(params.nxy(), out0 as usize, 2);
            kernels::trim_round(
                &self.device,
                self.tp.trim,
                self.variant,
                &keys,
                &params,
                &inputs,
                &out,
                &self.idx[NB],
            );
        }
        self.checkpoint()?;

        // Rounds 1..ntrims ping-pong between the buffers; index array NB
        // tracks buffer B, index array 0 tracks buffer A.
        let mut src_in_a = false;
        for r in 1..self.tp.ntrims {
            let (cin, cout) = self.round_caps(r);
            let (src_buf, dst_buf) = if src_in_a {
                (&self.buf_a, &self.buf_b)
            } else {
                (&self.buf_b, &self.buf_a)
            };
            let (src_idx, dst_idx) = if src_in_a {
                (&self.idx[0], &self.idx[NB])
            } else {
                (&self.idx[NB], &self.idx[0])
            };
            dst_idx.zero();
            let inputs = [RoundInput {
                view: src_buf.view(params.nxy(), cin as usize, 2),
                idx: src_idx,
                compact: false,
            }];
            let out = dst_buf.view(params.nxy(), cout as usize, 2);
            kernels::trim_round(
                &self.device,
                self.tp.trim,
                self.variant,
                &keys,
                &params,
                &inputs,
                &out,
                dst_idx,
            );
            self.checkpoint()?;
            src_in_a = !src_in_a;
        }

        // Tail concatenates the survivors into the head of the other
        // buffer.
        let (tail_cap, _) = self.round_caps(self.tp.ntrims);
        let (src_buf, dst_buf) = if src_in_a {
            (&self.buf_a, &self.buf_b)
        } else {
            (&self.buf_b, &self.buf_a)
        };
        let src_idx = if src_in_a { &self.idx[0] } else { &self.idx[NB] };
        self.tail_total.store(0, Ordering::Relaxed);
        kernels::tail(
            &self.device,
            self.tp.tail,
            &params,
            &src_buf.view(params.nxy(), tail_cap as usize, 2),
            src_idx,
            dst_buf.words(),
            &self.tail_total,
        );
        self.checkpoint()?;
        self.residue_in_a = !src_in_a;

        let count = self.tail_total.load(Ordering::Relaxed);
        tracing::info!(
            "✅ trim complete: {} residual edges after {} rounds in {:?}",
            count,
            self.tp.ntrims,
            start.elapsed()
        );
        Ok(count)
    }

    /// Read back the compacted residue in canonical `(u, v)` orientation.
    /// `count` is the value the matching `trim` call returned.
    pub fn read_edges(&self, count: u32) -> Vec<(u32, u32)> {
        let words = if self.residue_in_a {
            self.buf_a.words()
        } else {
            self.buf_b.words()
        };
        // Odd round counts leave the residue stored v-first.
        let swap = self.tp.ntrims % 2 == 1;
        (0..count as usize)
            .map(|i| {
                let a = words[i * 2].load(Ordering::Relaxed);
                let b = words[i * 2 + 1].load(Ordering::Relaxed);
                if swap {
                    (b, a)
                } else {
                    (a, b)
                }
            })
            .collect()
    }

    /// Brute-force nonce recovery for a candidate cycle of 42 endpoint
    /// pairs in canonical `(u, v)` orientation. Unmatched slots stay zero.
    pub fn recover(
        &mut self,
        expected: &[(u32, u32); PROOFSIZE],
    ) -> Result<[u32; PROOFSIZE], ComputeError> {
        self.dev_keys = self.sip_keys;
        for slot in &self.nonce_slots {
            slot.store(0, Ordering::Relaxed);
        }
        self.checkpoint()?;
        kernels::recover(
            &self.device,
            self.tp.recover,
            self.variant,
            &self.dev_keys,
            &self.params,
            expected,
            &self.nonce_slots,
        );
        self.checkpoint()?;
        let mut out = [0u32; PROOFSIZE];
        for (slot, word) in out.iter_mut().zip(self.nonce_slots.iter()) {
            *slot = word.load(Ordering::Relaxed);
        }
        Ok(out)
    }
}

impl Drop for Trimmer {
    fn drop(&mut self) {
        tracing::debug!(
            "trimmer released: {:.1} MiB freed from device {}",
            (self.buf_a.bytes() + self.buf_b.bytes()) as f64 / (1024.0 * 1024.0),
            self.device.id()
        );
    }
}
