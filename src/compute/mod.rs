// src/compute/mod.rs - Compute module organization and public API
// Tree location: ./src/compute/mod.rs

//! Parallel compute substrate for meantrim
//!
//! Realizes the trimmer's SIMT data contracts on a multi-threaded CPU
//! substrate: a kernel dispatch fans a grid of blocks across a worker pool
//! owned by the bound device, block-local staging stands in for shared
//! memory, and global-memory atomics are `AtomicU32` operations on the
//! edge buffers and index arrays. Dispatch completion is the
//! kernel-boundary synchronization barrier.

/// Edge buffers, bucket views, and index arrays
pub mod buffers;
/// Device registry, capabilities, and the dispatch primitive
pub mod device;
/// The five pipeline kernels and the two-bit degree counter
pub mod kernels;
/// The trimmer controller
pub mod trimmer;

pub use device::{Device, DeviceCapabilities, DeviceRegistry};
pub use trimmer::{KernelShape, Params, TrimParams, Trimmer};

use thiserror::Error;

/// Compute-layer errors, in propagation order: allocation failures are
/// fatal at construction, runtime failures are fatal to the invocation.
#[derive(Error, Debug)]
pub enum ComputeError {
    /// The requested device id is not in the registry.
    #[error("device {0} not found")]
    DeviceNotFound(usize),

    /// The buffers would exceed the device memory budget. Nothing is
    /// allocated when this is returned.
    #[error("out of device memory: need {required} bytes, budget is {available}")]
    OutOfMemory {
        /// Bytes the trimmer would allocate.
        required: u64,
        /// The device's memory budget.
        available: u64,
    },

    /// Construction or dispatch failure in the compute runtime.
    #[error("compute runtime error: {0}")]
    Runtime(String),

    /// Parameters outside the supported envelope.
    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    /// The caller requested cancellation; honored between kernel
    /// dispatches only.
    #[error("trim cancelled between kernel dispatches")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = ComputeError::OutOfMemory {
            required: 1024,
            available: 512,
        };
        let s = e.to_string();
        assert!(s.contains("1024"));
        assert!(s.contains("512"));
    }
}
