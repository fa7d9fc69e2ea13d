// src/config/settings.rs - Default tuning for the CLI

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
/// Default run settings for the meantrim CLI. Engine tunables still flow
/// through `TrimParams` only; this is the layer the CLI fills them from.
pub struct Settings {
    /// log2 of the edge count
    pub edge_bits: u32,
    /// Edge construction: "cuckoo" or "cuckaroo"
    pub variant: String,
    /// Trimming rounds per call
    pub ntrims: u32,
    /// Expansion mode (0, 1, or 2)
    pub expand: u8,
    /// Device to bind
    pub device: usize,
    /// Candidate cycles to report per solve
    pub max_solutions: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            edge_bits: 29,
            variant: "cuckaroo".to_string(),
            ntrims: 120,
            expand: 0,
            device: 0,
            max_solutions: 4,
        }
    }
}
