// src/algorithms/siphash.rs - SipHash-2-4 edge oracle for Cuckoo/Cuckaroo trimming
// Tree location: ./src/algorithms/siphash.rs

//! SipHash-2-4 edge generation
//!
//! Implements the keyed SipHash-2-4 construction both edge variants are
//! built on: two SIPROUNDs after message absorption, four SIPROUNDs after
//! finalization with `v2 ^= 0xff`. The Cuckoo variant hashes `2n` and
//! `2n+1` independently per nonce; the Cuckaroo variant runs a single
//! chained state over an aligned block of 64 nonces and xor-folds every
//! lane against the block's final word.
//!
//! Key sets are four 64-bit words, normally derived from the work header
//! with BLAKE2b-256.
//!
//! # Version History
//! - 0.1.0: Initial per-nonce SipHash-2-4
//! - 0.2.0: Added chained block hashing and header key derivation

use blake2_rfc::blake2b::blake2b;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

use super::AlgorithmError;

/// Nonces per Cuckaroo hash block.
pub const EDGE_BLOCK_SIZE: usize = 64;
/// Mask selecting the in-block slot of a nonce.
pub const EDGE_BLOCK_MASK: u32 = (EDGE_BLOCK_SIZE - 1) as u32;

/// The four 64-bit SipHash key words derived upstream from the work header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SipKeys {
    /// Key word 0
    pub k0: u64,
    /// Key word 1
    pub k1: u64,
    /// Key word 2
    pub k2: u64,
    /// Key word 3
    pub k3: u64,
}

impl SipKeys {
    /// Derive a key set from a work header: BLAKE2b-256, read as four
    /// little-endian words.
    pub fn from_header(header: &[u8]) -> Result<Self, AlgorithmError> {
        let hash = blake2b(32, &[], header);
        let mut cursor = Cursor::new(hash.as_bytes());
        let mut words = [0u64; 4];
        for w in words.iter_mut() {
            *w = cursor
                .read_u64::<LittleEndian>()
                .map_err(|e| AlgorithmError::KeyDerivation(e.to_string()))?;
        }
        Ok(SipKeys {
            k0: words[0],
            k1: words[1],
            k2: words[2],
            k3: words[3],
        })
    }
}

/// SipHash internal state, seeded directly from the four key words.
#[derive(Debug, Clone)]
pub struct SipState {
    v0: u64,
    v1: u64,
    v2: u64,
    v3: u64,
}

impl SipState {
    /// Seed the state from a key set.
    pub fn new(keys: &SipKeys) -> Self {
        Self {
            v0: keys.k0,
            v1: keys.k1,
            v2: keys.k2,
            v3: keys.k3,
        }
    }

    /// Absorb one message word: 2 rounds after absorption, 4 after
    /// finalization with `v2 ^= 0xff`. The state carries over between
    /// calls, which is what the block variant relies on.
    pub fn hash24(&mut self, nonce: u64) {
        self.v3 ^= nonce;
        self.round();
        self.round();
        self.v0 ^= nonce;
        self.v2 ^= 0xff;
        self.round();
        self.round();
        self.round();
        self.round();
    }

    /// Xor of the four lanes, the output read after each `hash24`.
    pub fn xor_lanes(&self) -> u64 {
        self.v0 ^ self.v1 ^ self.v2 ^ self.v3
    }

    #[inline]
    fn round(&mut self) {
        self.v0 = self.v0.wrapping_add(self.v1);
        self.v1 = self.v1.rotate_left(13);
        self.v1 ^= self.v0;
        self.v0 = self.v0.rotate_left(32);

        self.v2 = self.v2.wrapping_add(self.v3);
        self.v3 = self.v3.rotate_left(16);
        self.v3 ^= self.v2;

        self.v0 = self.v0.wrapping_add(self.v3);
        self.v3 = self.v3.rotate_left(21);
        self.v3 ^= self.v0;

        self.v2 = self.v2.wrapping_add(self.v1);
        self.v1 = self.v1.rotate_left(17);
        self.v1 ^= self.v2;
        self.v2 = self.v2.rotate_left(32);
    }
}

/// One-shot SipHash-2-4 of a single message word.
pub fn siphash24(keys: &SipKeys, nonce: u64) -> u64 {
    let mut state = SipState::new(keys);
    state.hash24(nonce);
    state.xor_lanes()
}

/// Fill `buf` with the 64 folded lane-xors for the block containing
/// `base` (which must be EDGE_BLOCK_SIZE aligned). A single chained state
/// hashes the whole block; every slot is then xored against the final
/// word, which drives the final slot itself to zero. The nonce in that
/// slot therefore maps to the all-zero null edge, which never represents
/// a real edge.
pub fn sip_block(keys: &SipKeys, base: u64, buf: &mut [u64; EDGE_BLOCK_SIZE]) {
    debug_assert_eq!(base % EDGE_BLOCK_SIZE as u64, 0);
    let mut state = SipState::new(keys);
    for (i, slot) in buf.iter_mut().enumerate() {
        state.hash24(base + i as u64);
        *slot = state.xor_lanes();
    }
    let last = buf[EDGE_BLOCK_SIZE - 1];
    for slot in buf.iter_mut() {
        *slot ^= last;
    }
}
