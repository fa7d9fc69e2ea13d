// src/lib.rs - Main library file for the meantrim edge-trimming engine
// Tree location: ./src/lib.rs

//! meantrim - Cuckoo/Cuckaroo edge trimming and 42-cycle solving
//!
//! A solver preprocessor for Cuckoo-cycle proof-of-work: takes a 256-bit
//! SipHash key set, reduces the 2^N implicitly-defined edge graph down to
//! the small residue that can contain length-42 cycles, and recovers the
//! edge nonces of any cycle found there. The SIMT kernel contracts are
//! realized on a multi-threaded CPU substrate; see the `compute` module.
//!
//! # Version History
//! - 0.1.0: Initial trimming pipeline
//! - 0.2.0: Cuckoo variant, expand modes, cycle search and verification
//! - 0.2.1: Cancellation between kernel dispatches

#![warn(missing_docs)]

pub mod algorithms;
/// Parallel compute substrate: device binding, buffers, kernels, trimmer
pub mod compute;
/// Configuration for the CLI layer
pub mod config;

pub use algorithms::siphash::SipKeys;
pub use algorithms::{AlgorithmError, Solution, Variant, PROOFSIZE};
pub use compute::{ComputeError, KernelShape, Params, TrimParams, Trimmer};
pub use config::Settings;

use thiserror::Error;

/// Main error type for meantrim
#[derive(Error, Debug)]
pub enum MeantrimError {
    /// Algorithm-layer errors
    #[error("algorithm error: {0}")]
    Algorithm(#[from] AlgorithmError),

    /// Compute-layer errors
    #[error("compute error: {0}")]
    Compute(#[from] ComputeError),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// IO operation errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Hex decoding errors from the CLI layer
    #[error("hex decode error: {0}")]
    Hex(#[from] hex::FromHexError),
}

/// Result type alias for meantrim operations
pub type Result<T> = std::result::Result<T, MeantrimError>;

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Application name from Cargo.toml
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Initialize tracing from the environment filter.
pub fn init() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    tracing::info!("{} v{}", NAME, VERSION);
    Ok(())
}
