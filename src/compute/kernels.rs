// src/compute/kernels.rs - The five trimming-pipeline kernels
// Tree location: ./src/compute/kernels.rs

//! Pipeline kernels: seed_a, seed_b, trim_round, tail, recover
//!
//! Each kernel is dispatched as a grid of blocks over the bound device.
//! The seed kernels enumerate the nonce space and scatter edges through
//! block-local row tiles, flushing to global buckets with clamped atomic
//! reservations. The trim round builds a two-bit degree counter per bucket
//! and re-emits only edges whose counted endpoint saw degree >= 2. Tail
//! concatenates the surviving buckets; recover brute-forces the nonces of
//! a candidate cycle.
//!
//! Edge storage convention: the freshly counted endpoint is always stored
//! first, and each round re-emits survivors with the endpoints swapped, so
//! round r counts u when r is even and v when r is odd.
//!
//! # Version History
//! - 0.1.0: Initial seed and round kernels
//! - 0.2.0: NP-way partition fold in the round kernel, compact-edge paths

use std::sync::atomic::{AtomicU32, Ordering};

use super::buffers::{BucketView, IndexArray};
use super::device::Device;
use super::trimmer::{KernelShape, Params, NB};
use crate::algorithms::siphash::{SipKeys, EDGE_BLOCK_SIZE};
use crate::algorithms::{Variant, PROOFSIZE};

/// Row-tile flush threshold for Seed A.
pub(crate) const FLUSH_A: usize = 16;
/// Column-tile flush threshold for Seed B.
pub(crate) const FLUSH_B: usize = 16;

/// Record one occurrence of `z` in the two-plane counter. Plane 0 is
/// "seen once"; plane 1 is only set when the plane-0 bit was already set,
/// which makes the counter saturate at "two or more" under any call order.
#[inline]
pub(crate) fn increase_2b_counter(plane0: &mut [u32], plane1: &mut [u32], z: u32) {
    let word = (z >> 5) as usize;
    let mask = 1u32 << (z & 31);
    let seen = plane0[word] & mask;
    plane0[word] |= mask;
    if seen != 0 {
        plane1[word] |= mask;
    }
}

/// Whether `z` was counted at least twice.
#[inline]
pub(crate) fn counter_at_least_two(plane1: &[u32], z: u32) -> bool {
    plane1[(z >> 5) as usize] & (1u32 << (z & 31)) != 0
}

/// Flush a staged tile into its destination bucket. Entries past the
/// clamped reservation are dropped.
#[inline]
fn flush_tile(
    tile: &mut Vec<(u32, u32)>,
    bucket: usize,
    out: &BucketView<'_>,
    out_idx: &IndexArray,
    compact: bool,
) {
    if tile.is_empty() {
        return;
    }
    if let Some((start, take)) = out_idx.reserve(bucket, tile.len() as u32, out.cap()) {
        for (i, &entry) in tile.iter().take(take as usize).enumerate() {
            let slot = (start + i as u32) as usize;
            if compact {
                out.write_word(bucket, slot, entry.0);
            } else {
                out.write_pair(bucket, slot, entry);
            }
        }
    }
    tile.clear();
}

/// Seed A: enumerate the full nonce space and scatter edges into NX row
/// buckets by the first endpoint's X bits. Compact output stores the bare
/// nonce; packed output stores both endpoints.
#[allow(clippy::too_many_arguments)]
pub fn seed_a(
    device: &Device,
    shape: KernelShape,
    variant: Variant,
    keys: &SipKeys,
    params: &Params,
    out: &BucketView<'_>,
    out_idx: &IndexArray,
    compact: bool,
) {
    let nblocks64 = (params.nedges() / EDGE_BLOCK_SIZE as u64) as usize;
    let groups = (shape.blocks as usize).clamp(1, nblocks64);
    let chunk = nblocks64.div_ceil(groups);
    let yz_bits = params.yz_bits();
    let edge_mask = params.edge_mask();

    device.dispatch(groups, |g| {
        let lo = g * chunk;
        let hi = ((g + 1) * chunk).min(nblocks64);
        let mut tiles: Vec<Vec<(u32, u32)>> = vec![Vec::with_capacity(2 * FLUSH_A); params.nx()];
        let mut edges = [(0u32, 0u32); EDGE_BLOCK_SIZE];
        for b in lo..hi {
            let base = (b * EDGE_BLOCK_SIZE) as u32;
            variant.block_edges(keys, base, edge_mask, &mut edges);
            for (i, &(u, v)) in edges.iter().enumerate() {
                if u == 0 && v == 0 {
                    continue;
                }
                let row = (u >> yz_bits) as usize;
                let tile = &mut tiles[row];
                if compact {
                    tile.push((base + i as u32, 0));
                } else {
                    tile.push((u, v));
                }
                if tile.len() >= FLUSH_A {
                    flush_tile(tile, row, out, out_idx, compact);
                }
            }
        }
        for (row, tile) in tiles.iter_mut().enumerate() {
            flush_tile(tile, row, out, out_idx, compact);
        }
    });
}

/// Seed B: consume a range of row buckets and re-scatter into the NX·NY
/// grid by the first endpoint's Y bits, splitting each grid bucket's
/// content across the NB partitions by a low endpoint bit so per-partition
/// fill stays balanced. The host calls this once per launch over disjoint
/// row sub-ranges. The reference geometry assigns one block per row; a
/// smaller grid makes each block walk a contiguous row slice.
#[allow(clippy::too_many_arguments)]
pub fn seed_b(
    device: &Device,
    shape: KernelShape,
    variant: Variant,
    keys: &SipKeys,
    params: &Params,
    input: &BucketView<'_>,
    in_idx: &IndexArray,
    row_lo: usize,
    row_hi: usize,
    parts: &[BucketView<'_>],
    part_idx: &[IndexArray],
    compact_in: bool,
    compact_out: bool,
) {
    debug_assert_eq!(parts.len(), NB);
    debug_assert_eq!(part_idx.len(), NB);
    // Compact output implies compact input: a packed edge no longer knows
    // its nonce.
    debug_assert!(compact_in || !compact_out);
    let nrows = row_hi - row_lo;
    if nrows == 0 {
        return;
    }
    let groups = (shape.blocks as usize).clamp(1, nrows);
    let chunk = nrows.div_ceil(groups);
    let z_bits = params.z_bits;
    let ny = params.ny();
    let edge_mask = params.edge_mask();

    device.dispatch(groups, |g| {
        let lo = row_lo + g * chunk;
        let hi = (row_lo + (g + 1) * chunk).min(row_hi);
        for row in lo..hi {
            let fill = in_idx.fill(row, input.cap()) as usize;
            let mut tiles: Vec<Vec<(u32, u32)>> = vec![Vec::with_capacity(2 * FLUSH_B); ny * NB];
            for slot in 0..fill {
                let (nonce, u, v) = if compact_in {
                    let nonce = input.read_word(row, slot);
                    let (u, v) = variant.edge(keys, nonce, edge_mask);
                    if u == 0 && v == 0 {
                        continue;
                    }
                    (nonce, u, v)
                } else {
                    let (u, v) = input.read_pair(row, slot);
                    if u == 0 && v == 0 {
                        continue;
                    }
                    (0, u, v)
                };
                let col = ((u >> z_bits) as usize) & (ny - 1);
                let part = (u as usize) & (NB - 1);
                let tile = &mut tiles[col * NB + part];
                if compact_out {
                    tile.push((nonce, 0));
                } else {
                    tile.push((u, v));
                }
                if tile.len() >= FLUSH_B {
                    let grid = row * ny + col;
                    flush_tile(tile, grid, &parts[part], &part_idx[part], compact_out);
                }
            }
            for col in 0..ny {
                for part in 0..NB {
                    let grid = row * ny + col;
                    flush_tile(
                        &mut tiles[col * NB + part],
                        grid,
                        &parts[part],
                        &part_idx[part],
                        compact_out,
                    );
                }
            }
        }
    });
}

/// One input partition of a trim round.
pub struct RoundInput<'a> {
    /// Bucketed edges to fold into the round's bitmap.
    pub view: BucketView<'a>,
    /// Fill counters for `view`.
    pub idx: &'a IndexArray,
    /// Whether `view` stores compact nonces needing expansion.
    pub compact: bool,
}

/// One trim round: per grid bucket, count the Z-subspace degree of every
/// edge's stored-first endpoint in a two-plane bitmap, then re-emit only
/// the edges whose counted endpoint reached degree >= 2, routed by the
/// other endpoint's X·Y bits with the endpoints swapped. Counting and
/// emission are separate passes over the same staged edge list, so the
/// emission sees a complete bitmap. Multiple input partitions fold into a
/// single bitmap before any edge is emitted. The reference geometry
/// assigns one block per bucket; a smaller grid makes each block walk a
/// contiguous bucket slice.
#[allow(clippy::too_many_arguments)]
pub fn trim_round(
    device: &Device,
    shape: KernelShape,
    variant: Variant,
    keys: &SipKeys,
    params: &Params,
    inputs: &[RoundInput<'_>],
    out: &BucketView<'_>,
    out_idx: &IndexArray,
) {
    let nxy = params.nxy();
    let groups = (shape.blocks as usize).clamp(1, nxy);
    let chunk = nxy.div_ceil(groups);
    let z_bits = params.z_bits;
    let zmask = params.zmask();
    let edge_mask = params.edge_mask();
    let words = params.counter_words();

    device.dispatch(groups, |g| {
        for bucket in g * chunk..((g + 1) * chunk).min(nxy) {
            let mut plane0 = vec![0u32; words];
            let mut plane1 = vec![0u32; words];
            let mut staged: Vec<(u32, u32)> = Vec::new();

            // Count phase: fold every partition into one bitmap.
            for part in inputs {
                let fill = part.idx.fill(bucket, part.view.cap()) as usize;
                staged.reserve(fill);
                for slot in 0..fill {
                    let (a, b) = if part.compact {
                        let nonce = part.view.read_word(bucket, slot);
                        let pair = variant.edge(keys, nonce, edge_mask);
                        if pair == (0, 0) {
                            continue;
                        }
                        pair
                    } else {
                        let pair = part.view.read_pair(bucket, slot);
                        if pair == (0, 0) {
                            continue;
                        }
                        pair
                    };
                    increase_2b_counter(&mut plane0, &mut plane1, a & zmask);
                    staged.push((a, b));
                }
            }

            // Emit phase: consult the completed bitmap.
            for &(a, b) in &staged {
                if !counter_at_least_two(&plane1, a & zmask) {
                    continue;
                }
                let dest = (b >> z_bits) as usize;
                if let Some((slot, take)) = out_idx.reserve(dest, 1, out.cap()) {
                    if take > 0 {
                        out.write_pair(dest, slot as usize, (b, a));
                    }
                }
            }
        }
    });
}

/// Tail: concatenate the surviving per-bucket edge lists into one
/// contiguous run of packed edges at the head of `dest`, and accumulate
/// the total surviving count. One block per bucket in the reference
/// geometry; a smaller grid makes each block walk a contiguous bucket
/// slice.
pub fn tail(
    device: &Device,
    shape: KernelShape,
    params: &Params,
    input: &BucketView<'_>,
    in_idx: &IndexArray,
    dest: &[AtomicU32],
    total: &AtomicU32,
) {
    let nxy = params.nxy();
    let groups = (shape.blocks as usize).clamp(1, nxy);
    let chunk = nxy.div_ceil(groups);
    device.dispatch(groups, |g| {
        for bucket in g * chunk..((g + 1) * chunk).min(nxy) {
            let fill = in_idx.fill(bucket, input.cap());
            if fill == 0 {
                continue;
            }
            let base = total.fetch_add(fill, Ordering::Relaxed) as usize;
            for i in 0..fill as usize {
                let (a, b) = input.read_pair(bucket, i);
                dest[(base + i) * 2].store(a, Ordering::Relaxed);
                dest[(base + i) * 2 + 1].store(b, Ordering::Relaxed);
            }
        }
    });
}

/// Recovery: scan the full nonce space and record, for each of the 42
/// expected endpoint pairs, a nonce whose edge matches it. Unmatched slots
/// stay zero.
pub fn recover(
    device: &Device,
    shape: KernelShape,
    variant: Variant,
    keys: &SipKeys,
    params: &Params,
    expected: &[(u32, u32); PROOFSIZE],
    nonces: &[AtomicU32],
) {
    debug_assert_eq!(nonces.len(), PROOFSIZE);
    let nblocks64 = (params.nedges() / EDGE_BLOCK_SIZE as u64) as usize;
    let groups = (shape.blocks as usize).clamp(1, nblocks64);
    let chunk = nblocks64.div_ceil(groups);
    let edge_mask = params.edge_mask();

    device.dispatch(groups, |g| {
        let lo = g * chunk;
        let hi = ((g + 1) * chunk).min(nblocks64);
        let mut edges = [(0u32, 0u32); EDGE_BLOCK_SIZE];
        for b in lo..hi {
            let base = (b * EDGE_BLOCK_SIZE) as u32;
            variant.block_edges(keys, base, edge_mask, &mut edges);
            for (i, &pair) in edges.iter().enumerate() {
                if pair == (0, 0) {
                    continue;
                }
                for (slot, &want) in expected.iter().enumerate() {
                    if pair == want {
                        nonces[slot].store(base + i as u32, Ordering::Relaxed);
                    }
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::buffers::EdgeBuffer;
    use crate::compute::device::DeviceRegistry;
    use crate::compute::trimmer::NA;

    fn test_device() -> Device {
        DeviceRegistry::detect().bind(0).unwrap()
    }

    fn test_keys() -> SipKeys {
        SipKeys {
            k0: 1,
            k1: 2,
            k2: 3,
            k3: 4,
        }
    }

    #[test]
    fn test_counter_saturates() {
        let mut p0 = vec![0u32; 4];
        let mut p1 = vec![0u32; 4];
        increase_2b_counter(&mut p0, &mut p1, 70);
        assert!(!counter_at_least_two(&p1, 70));
        increase_2b_counter(&mut p0, &mut p1, 70);
        assert!(counter_at_least_two(&p1, 70));
        // Further increments keep it saturated.
        increase_2b_counter(&mut p0, &mut p1, 70);
        assert!(counter_at_least_two(&p1, 70));
        assert!(!counter_at_least_two(&p1, 71));
    }

    #[test]
    fn test_counter_commutative() {
        // Any ordering of the same multiset of increments yields the same
        // plane-1 bits.
        let orders: [&[u32]; 3] = [&[5, 9, 5, 31, 9], &[9, 5, 31, 9, 5], &[31, 9, 9, 5, 5]];
        let mut results = Vec::new();
        for order in orders {
            let mut p0 = vec![0u32; 1];
            let mut p1 = vec![0u32; 1];
            for &z in order {
                increase_2b_counter(&mut p0, &mut p1, z);
            }
            results.push(p1[0]);
        }
        assert_eq!(results[0], results[1]);
        assert_eq!(results[1], results[2]);
        assert!(counter_at_least_two(&results[0..1].to_vec(), 5));
        assert!(counter_at_least_two(&results[0..1].to_vec(), 9));
        assert!(!counter_at_least_two(&results[0..1].to_vec(), 31));
    }

    /// Count the edges the oracle yields that are not the null sentinel.
    fn live_edges(variant: Variant, keys: &SipKeys, params: &Params) -> u64 {
        (0..params.nedges() as u32)
            .filter(|&n| variant.edge(keys, n, params.edge_mask()) != (0, 0))
            .count() as u64
    }

    #[test]
    fn test_seed_a_row_invariant() {
        let device = test_device();
        let params = Params::new(14).unwrap();
        let keys = test_keys();
        let buf = EdgeBuffer::new(params.nx() * params.row_cap() as usize * 2);
        let idx = IndexArray::new(params.nxy());
        let rows = buf.view(params.nx(), params.row_cap() as usize, 2);
        seed_a(
            &device,
            KernelShape::new(64, 64),
            Variant::Cuckaroo,
            &keys,
            &params,
            &rows,
            &idx,
            false,
        );
        let mut total = 0u64;
        for row in 0..params.nx() {
            let fill = idx.fill(row, rows.cap());
            total += fill as u64;
            for slot in 0..fill as usize {
                let (u, _) = rows.read_pair(row, slot);
                assert_eq!((u >> params.yz_bits()) as usize, row);
            }
        }
        // Every live edge is bucketed; the null final-slot edges are not.
        assert_eq!(total, live_edges(Variant::Cuckaroo, &keys, &params));
        assert!(total < params.nedges());
    }

    #[test]
    fn test_seed_b_grid_invariant() {
        let device = test_device();
        let params = Params::new(14).unwrap();
        let keys = test_keys();
        let row_buf = EdgeBuffer::new(params.nx() * params.row_cap() as usize * 2);
        let row_idx = IndexArray::new(params.nxy());
        let rows = row_buf.view(params.nx(), params.row_cap() as usize, 2);
        seed_a(
            &device,
            KernelShape::new(64, 64),
            Variant::Cuckoo,
            &keys,
            &params,
            &rows,
            &row_idx,
            false,
        );

        let part_cap = params.edges_b() as usize / NB;
        let grid_buf = EdgeBuffer::new(params.nxy() * params.edges_b() as usize * 2);
        let part_idx: Vec<IndexArray> = (0..NB).map(|_| IndexArray::new(params.nxy())).collect();
        let parts: Vec<BucketView<'_>> = (0..NB)
            .map(|p| grid_buf.view_at(p * params.nxy() * part_cap * 2, params.nxy(), part_cap, 2))
            .collect();
        let rows_per_launch = params.nx() / NA;
        for l in 0..NA {
            seed_b(
                &device,
                KernelShape::new(64, 64),
                Variant::Cuckoo,
                &keys,
                &params,
                &rows,
                &row_idx,
                l * rows_per_launch,
                (l + 1) * rows_per_launch,
                &parts,
                &part_idx,
                false,
                false,
            );
        }

        let mut total = 0u64;
        for bucket in 0..params.nxy() {
            for p in 0..NB {
                let fill = part_idx[p].fill(bucket, parts[p].cap());
                total += fill as u64;
                for slot in 0..fill as usize {
                    let (u, _) = parts[p].read_pair(bucket, slot);
                    assert_eq!((u >> params.z_bits) as usize, bucket);
                    assert_eq!(u as usize & (NB - 1), p);
                }
            }
        }
        assert_eq!(total, live_edges(Variant::Cuckoo, &keys, &params));
    }

    #[test]
    fn test_round_survivors_had_degree_two() {
        let device = test_device();
        let params = Params::new(14).unwrap();
        let keys = test_keys();
        let variant = Variant::Cuckaroo;

        // Host-side reference: per grid bucket, the Z histogram of every
        // first endpoint.
        let mut hist = vec![vec![0u32; params.nz()]; params.nxy()];
        for nonce in 0..params.nedges() as u32 {
            let (u, v) = variant.edge(&keys, nonce, params.edge_mask());
            if (u, v) == (0, 0) {
                continue;
            }
            hist[(u >> params.z_bits) as usize][(u & params.zmask()) as usize] += 1;
        }

        let row_buf = EdgeBuffer::new(params.nx() * params.row_cap() as usize * 2);
        let row_idx = IndexArray::new(params.nxy());
        let rows = row_buf.view(params.nx(), params.row_cap() as usize, 2);
        seed_a(
            &device,
            KernelShape::new(64, 64),
            variant,
            &keys,
            &params,
            &rows,
            &row_idx,
            false,
        );
        let part_cap = params.edges_b() as usize / NB;
        let grid_buf = EdgeBuffer::new(params.nxy() * params.edges_b() as usize * 2);
        let part_idx: Vec<IndexArray> = (0..NB).map(|_| IndexArray::new(params.nxy())).collect();
        let parts: Vec<BucketView<'_>> = (0..NB)
            .map(|p| grid_buf.view_at(p * params.nxy() * part_cap * 2, params.nxy(), part_cap, 2))
            .collect();
        seed_b(
            &device,
            KernelShape::new(64, 64),
            variant,
            &keys,
            &params,
            &rows,
            &row_idx,
            0,
            params.nx(),
            &parts,
            &part_idx,
            false,
            false,
        );

        let out_buf = EdgeBuffer::new(params.nxy() * params.edges_b() as usize);
        let out_idx = IndexArray::new(params.nxy());
        let out = out_buf.view(params.nxy(), params.edges_b() as usize / 2, 2);
        let inputs: Vec<RoundInput<'_>> = (0..NB)
            .map(|p| RoundInput {
                view: parts[p],
                idx: &part_idx[p],
                compact: false,
            })
            .collect();
        trim_round(
            &device,
            KernelShape::new(64, 64),
            variant,
            &keys,
            &params,
            &inputs,
            &out,
            &out_idx,
        );

        let mut survivors = 0u64;
        for bucket in 0..params.nxy() {
            let fill = out_idx.fill(bucket, out.cap());
            survivors += fill as u64;
            for slot in 0..fill as usize {
                // Survivors are stored swapped: (v, u) with u counted.
                let (_, u) = out.read_pair(bucket, slot);
                assert!(hist[(u >> params.z_bits) as usize][(u & params.zmask()) as usize] >= 2);
            }
        }
        assert!(survivors > 0);
        assert!(survivors < params.nedges());
    }

    #[test]
    fn test_round_empty_input() {
        let device = test_device();
        let params = Params::new(14).unwrap();
        let keys = test_keys();
        let buf = EdgeBuffer::new(params.nxy() * 8 * 2);
        let idx = IndexArray::new(params.nxy());
        let out_buf = EdgeBuffer::new(params.nxy() * 8 * 2);
        let out_idx = IndexArray::new(params.nxy());
        let inputs = [RoundInput {
            view: buf.view(params.nxy(), 8, 2),
            idx: &idx,
            compact: false,
        }];
        trim_round(
            &device,
            KernelShape::new(16, 16),
            Variant::Cuckoo,
            &keys,
            &params,
            &inputs,
            &out_buf.view(params.nxy(), 8, 2),
            &out_idx,
        );
        for bucket in 0..params.nxy() {
            assert_eq!(out_idx.fill(bucket, 8), 0);
        }
    }

    #[test]
    fn test_tail_preserves_multiset() {
        let device = test_device();
        let params = Params::new(14).unwrap();
        let buf = EdgeBuffer::new(params.nxy() * 4 * 2);
        let idx = IndexArray::new(params.nxy());
        let view = buf.view(params.nxy(), 4, 2);
        let mut expected = Vec::new();
        for bucket in (0..params.nxy()).step_by(3) {
            let n = (bucket % 3 + 1) as u32;
            let (start, take) = idx.reserve(bucket, n, view.cap()).unwrap();
            for i in 0..take {
                let edge = (bucket as u32 + 1, start + i + 1);
                view.write_pair(bucket, (start + i) as usize, edge);
                expected.push(edge);
            }
        }
        let dest = EdgeBuffer::new(expected.len() * 2 + 8);
        let total = AtomicU32::new(0);
        tail(
            &device,
            KernelShape::new(7, 16),
            &params,
            &view,
            &idx,
            dest.words(),
            &total,
        );
        let count = total.load(Ordering::Relaxed) as usize;
        assert_eq!(count, expected.len());
        let mut got: Vec<(u32, u32)> = (0..count)
            .map(|i| {
                (
                    dest.words()[i * 2].load(Ordering::Relaxed),
                    dest.words()[i * 2 + 1].load(Ordering::Relaxed),
                )
            })
            .collect();
        got.sort_unstable();
        expected.sort_unstable();
        assert_eq!(got, expected);
    }

    #[test]
    fn test_recover_finds_known_nonces() {
        let device = test_device();
        let params = Params::new(14).unwrap();
        let keys = test_keys();
        let variant = Variant::Cuckaroo;
        let mut expected = [(0u32, 0u32); PROOFSIZE];
        // Multiples of 60 never land on a block's final slot, so every
        // expected pair is a live edge.
        for (i, pair) in expected.iter_mut().enumerate() {
            *pair = variant.edge(&keys, (i as u32 + 1) * 60, params.edge_mask());
        }
        let nonces: Vec<AtomicU32> = (0..PROOFSIZE).map(|_| AtomicU32::new(0)).collect();
        recover(
            &device,
            KernelShape::new(64, 64),
            variant,
            &keys,
            &params,
            &expected,
            &nonces,
        );
        for (i, slot) in nonces.iter().enumerate() {
            let nonce = slot.load(Ordering::Relaxed);
            assert_ne!(nonce, 0, "slot {i} unmatched");
            assert_eq!(variant.edge(&keys, nonce, params.edge_mask()), expected[i]);
        }
    }
}
