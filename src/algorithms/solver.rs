// src/algorithms/solver.rs - Solve orchestration and proof verification
// Tree location: ./src/algorithms/solver.rs

//! Solution search and verification
//!
//! Ties the pipeline together: trim the graph, read back the residue,
//! search it for 42-edge cycles, recover the nonces of each cycle, and
//! verify the result before reporting it. Verification re-derives every
//! edge from its nonce and checks the degree-2 and single-cycle
//! properties, so a bad recovery or a bogus cycle never escapes.
//!
//! # Version History
//! - 0.1.0: Initial solve loop
//! - 0.1.1: Split the structural cycle check out of verification

use hashbrown::HashMap;

use super::graph;
use super::siphash::SipKeys;
use super::{AlgorithmError, Solution, Variant, PROOFSIZE};
use crate::compute::Trimmer;

/// Run the full solve: trim, search the residue for cycles, recover each
/// cycle's nonces, and return up to `max_solutions` verified solutions. An
/// empty result is the common case and not an error.
pub fn solve(trimmer: &mut Trimmer, max_solutions: usize) -> crate::Result<Vec<Solution>> {
    let count = trimmer.trim()?;
    let edges = trimmer.read_edges(count);
    let cycles = graph::find_cycles(&edges, max_solutions)?;
    if cycles.is_empty() {
        tracing::info!("no 42-cycles in residue of {} edges", count);
        return Ok(Vec::new());
    }

    let variant = trimmer.variant();
    let keys = trimmer.sip_keys;
    let edge_mask = trimmer.params().edge_mask();
    let mut solutions = Vec::new();
    for cycle in &cycles {
        let recovered = trimmer.recover(cycle)?;
        let mut nonces = recovered;
        nonces.sort_unstable();
        let filled = nonces[0] > 0 && nonces.windows(2).all(|w| w[0] < w[1]);
        if !filled {
            tracing::warn!("recovery left unmatched or duplicate nonce slots, dropping cycle");
            continue;
        }
        let solution = Solution::new(nonces);
        match verify(variant, &keys, edge_mask, &solution) {
            Ok(()) => {
                tracing::info!("🎯 verified 42-cycle, lowest nonce {}", solution.nonces[0]);
                solutions.push(solution);
            }
            Err(e) => tracing::warn!("recovered cycle failed verification: {e}"),
        }
    }
    Ok(solutions)
}

/// Verify a proof: the 42 nonces must be strictly increasing, in range,
/// and their edges must form a single alternating 42-cycle.
pub fn verify(
    variant: Variant,
    keys: &SipKeys,
    edge_mask: u32,
    solution: &Solution,
) -> Result<(), AlgorithmError> {
    let nonces = &solution.nonces;
    if !nonces.windows(2).all(|w| w[0] < w[1]) {
        return Err(AlgorithmError::InvalidCycle(
            "nonces not strictly increasing".into(),
        ));
    }
    if nonces[PROOFSIZE - 1] > edge_mask {
        return Err(AlgorithmError::InvalidCycle("nonce out of range".into()));
    }
    let mut edges = [(0u32, 0u32); PROOFSIZE];
    for (slot, &nonce) in edges.iter_mut().zip(nonces.iter()) {
        *slot = variant.edge(keys, nonce, edge_mask);
    }
    cycle_check(&edges)
}

/// Structural check: every endpoint appears on exactly two edges, and the
/// edge-to-edge walk alternating shared v and shared u nodes closes after
/// exactly 42 steps, which rules out a union of shorter cycles.
pub fn cycle_check(edges: &[(u32, u32); PROOFSIZE]) -> Result<(), AlgorithmError> {
    let mut by_u: HashMap<u32, Vec<usize>> = HashMap::new();
    let mut by_v: HashMap<u32, Vec<usize>> = HashMap::new();
    for (i, &(u, v)) in edges.iter().enumerate() {
        by_u.entry(u).or_default().push(i);
        by_v.entry(v).or_default().push(i);
    }
    let mut partner_via_u = [0usize; PROOFSIZE];
    let mut partner_via_v = [0usize; PROOFSIZE];
    for (node_map, partners, side) in [
        (&by_u, &mut partner_via_u, "u"),
        (&by_v, &mut partner_via_v, "v"),
    ] {
        for (node, incident) in node_map {
            if incident.len() != 2 {
                return Err(AlgorithmError::InvalidCycle(format!(
                    "{side} endpoint {node} on {} edges, expected 2",
                    incident.len()
                )));
            }
            partners[incident[0]] = incident[1];
            partners[incident[1]] = incident[0];
        }
    }

    let mut edge = 0usize;
    let mut via_v = true;
    let mut steps = 0usize;
    loop {
        edge = if via_v {
            partner_via_v[edge]
        } else {
            partner_via_u[edge]
        };
        via_v = !via_v;
        steps += 1;
        if edge == 0 {
            break;
        }
        if steps > PROOFSIZE {
            return Err(AlgorithmError::InvalidCycle("walk does not close".into()));
        }
    }
    if steps != PROOFSIZE {
        return Err(AlgorithmError::InvalidCycle(format!(
            "walk closed after {steps} edges, expected {PROOFSIZE}"
        )));
    }
    Ok(())
}
