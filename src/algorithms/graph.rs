// src/algorithms/graph.rs - Cycle detection over the trimmed residue
// Tree location: ./src/algorithms/graph.rs

//! CPU-side cycle detection
//!
//! After trimming reduces the edge set to a small residue, this module
//! searches the bipartite graph for 42-edge cycles with a depth-first
//! search over edges. Paths alternate sides (u, v, u, ...), track visited
//! edges for backtracking, and close only when the 42nd edge returns to
//! the starting u node. Duplicate discoveries of the same cycle are
//! collapsed by their edge-index signature.
//!
//! Typical input after a full round sequence is a few hundred to a few
//! thousand edges, mostly of degree two; the iteration budget bounds the
//! pathological cases.
//!
//! # Version History
//! - 0.1.0: Initial DFS cycle search
//! - 0.1.1: Signature dedup, iteration budget

use hashbrown::{HashMap, HashSet};

use super::{AlgorithmError, PROOFSIZE};

/// Residues larger than this are rejected as a trimming failure.
const MAX_EDGES: usize = 500_000;

/// DFS call budget across the whole search.
const MAX_SEARCH_ITERATIONS: usize = 2_000_000;

/// Search statistics for diagnostics.
#[derive(Debug, Clone, Default)]
pub struct SearchStats {
    /// Edges the graph was built from, sentinels excluded.
    pub edges_processed: usize,
    /// DFS calls consumed.
    pub iterations: usize,
    /// Distinct cycles found.
    pub cycles_found: usize,
}

/// Bipartite residue graph with per-side adjacency.
pub struct CycleGraph {
    edges: Vec<(u32, u32)>,
    u_adj: HashMap<u32, Vec<usize>>,
    v_adj: HashMap<u32, Vec<usize>>,
    stats: SearchStats,
}

struct Search {
    path: Vec<usize>,
    used: Vec<bool>,
    found: Vec<[(u32, u32); PROOFSIZE]>,
    signatures: HashSet<Vec<usize>>,
    iterations: usize,
    max_cycles: usize,
}

impl CycleGraph {
    /// Build the graph from residue edges. Null-sentinel edges are
    /// skipped.
    pub fn from_edges(edges: &[(u32, u32)]) -> Result<Self, AlgorithmError> {
        if edges.len() > MAX_EDGES {
            return Err(AlgorithmError::InvalidCycle(format!(
                "residue of {} edges exceeds search limit {}",
                edges.len(),
                MAX_EDGES
            )));
        }
        let mut graph = Self {
            edges: Vec::with_capacity(edges.len()),
            u_adj: HashMap::with_capacity(edges.len()),
            v_adj: HashMap::with_capacity(edges.len()),
            stats: SearchStats::default(),
        };
        for &(u, v) in edges {
            if u == 0 && v == 0 {
                continue;
            }
            let idx = graph.edges.len();
            graph.edges.push((u, v));
            graph.u_adj.entry(u).or_default().push(idx);
            graph.v_adj.entry(v).or_default().push(idx);
        }
        graph.stats.edges_processed = graph.edges.len();
        Ok(graph)
    }

    /// Search for up to `max_cycles` distinct 42-edge cycles. Returns each
    /// cycle as its edges in path order, canonical `(u, v)` orientation.
    pub fn find_cycles(&mut self, max_cycles: usize) -> Vec<[(u32, u32); PROOFSIZE]> {
        let mut search = Search {
            path: Vec::with_capacity(PROOFSIZE),
            used: vec![false; self.edges.len()],
            found: Vec::new(),
            signatures: HashSet::new(),
            iterations: 0,
            max_cycles,
        };
        if self.edges.len() >= PROOFSIZE {
            let mut starts: Vec<u32> = self
                .u_adj
                .iter()
                .filter(|(_, adj)| adj.len() >= 2)
                .map(|(&u, _)| u)
                .collect();
            starts.sort_unstable();
            for start in starts {
                if search.found.len() >= search.max_cycles
                    || search.iterations >= MAX_SEARCH_ITERATIONS
                {
                    break;
                }
                self.dfs(start, true, start, &mut search);
            }
        }
        self.stats.iterations = search.iterations;
        self.stats.cycles_found = search.found.len();
        tracing::debug!(
            "cycle search: {} edges, {} iterations, {} cycles",
            self.stats.edges_processed,
            self.stats.iterations,
            self.stats.cycles_found
        );
        search.found
    }

    /// Statistics from the last search.
    pub fn stats(&self) -> &SearchStats {
        &self.stats
    }

    fn dfs(&self, node: u32, on_u_side: bool, start: u32, search: &mut Search) {
        search.iterations += 1;
        if search.iterations >= MAX_SEARCH_ITERATIONS
            || search.found.len() >= search.max_cycles
            || search.path.len() >= PROOFSIZE
        {
            return;
        }
        let adj = if on_u_side {
            self.u_adj.get(&node)
        } else {
            self.v_adj.get(&node)
        };
        let Some(adj) = adj else { return };
        for &e in adj {
            if search.used[e] {
                continue;
            }
            let (u, v) = self.edges[e];
            let other = if on_u_side { v } else { u };
            if !on_u_side && u == start {
                if search.path.len() == PROOFSIZE - 1 {
                    search.path.push(e);
                    self.record(search);
                    search.path.pop();
                }
                continue;
            }
            if search.path.len() + 1 < PROOFSIZE {
                search.used[e] = true;
                search.path.push(e);
                self.dfs(other, !on_u_side, start, search);
                search.path.pop();
                search.used[e] = false;
            }
        }
    }

    fn record(&self, search: &mut Search) {
        let mut signature = search.path.clone();
        signature.sort_unstable();
        if !search.signatures.insert(signature) {
            return;
        }
        let mut cycle = [(0u32, 0u32); PROOFSIZE];
        for (slot, &e) in cycle.iter_mut().zip(search.path.iter()) {
            *slot = self.edges[e];
        }
        search.found.push(cycle);
    }
}

/// Convenience entry: build the graph and search in one call.
pub fn find_cycles(
    edges: &[(u32, u32)],
    max_cycles: usize,
) -> Result<Vec<[(u32, u32); PROOFSIZE]>, AlgorithmError> {
    if edges.is_empty() {
        return Ok(Vec::new());
    }
    let mut graph = CycleGraph::from_edges(edges)?;
    Ok(graph.find_cycles(max_cycles))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 21 u nodes and 21 v nodes joined into one 42-edge cycle.
    fn planted_cycle() -> Vec<(u32, u32)> {
        let mut edges = Vec::new();
        for i in 0..21u32 {
            edges.push((1000 + i, 2000 + i));
            edges.push((1000 + (i + 1) % 21, 2000 + i));
        }
        edges
    }

    #[test]
    fn test_empty_residue() {
        assert!(find_cycles(&[], 4).unwrap().is_empty());
    }

    #[test]
    fn test_finds_planted_cycle() {
        let cycles = find_cycles(&planted_cycle(), 4).unwrap();
        assert_eq!(cycles.len(), 1);
        let cycle = &cycles[0];
        // Every planted edge appears exactly once.
        let mut got: Vec<(u32, u32)> = cycle.to_vec();
        let mut want = planted_cycle();
        got.sort_unstable();
        want.sort_unstable();
        assert_eq!(got, want);
    }

    #[test]
    fn test_noise_does_not_break_search() {
        let mut edges = planted_cycle();
        // Pendant edges and an unrelated path.
        edges.push((1000, 9000));
        edges.push((500, 2000));
        edges.push((501, 9001));
        let cycles = find_cycles(&edges, 4).unwrap();
        assert_eq!(cycles.len(), 1);
    }

    #[test]
    fn test_sentinels_skipped() {
        let mut edges = vec![(0, 0), (0, 0)];
        edges.extend(planted_cycle());
        let cycles = find_cycles(&edges, 4).unwrap();
        assert_eq!(cycles.len(), 1);
    }

    #[test]
    fn test_short_cycles_rejected() {
        // A 4-cycle is not a proof.
        let edges = vec![(1, 10), (2, 10), (2, 11), (1, 11)];
        assert!(find_cycles(&edges, 4).unwrap().is_empty());
    }

    #[test]
    fn test_residue_limit() {
        let edges = vec![(1u32, 2u32); MAX_EDGES + 1];
        assert!(find_cycles(&edges, 1).is_err());
    }
}
