// src/compute/device.rs - Device detection, binding, and kernel dispatch
// Tree location: ./src/compute/device.rs

//! Device registry and worker-pool binding
//!
//! Enumerates the compute devices a trimmer can bind. The CPU substrate
//! exposes one device per host; binding it builds the worker pool that
//! every kernel dispatch fans out over. A bound device is exclusively
//! owned by one trimmer; multiple trimmers on the same host must be pinned
//! to distinct devices.
//!
//! # Version History
//! - 0.1.0: Initial registry with host device detection
//! - 0.1.1: Custom capability lists for budget-constrained bindings

use super::ComputeError;

/// Default per-device memory budget when none is configured. Generous
/// enough for EDGEBITS 29 working sets on well-provisioned hosts; callers
/// with tighter hosts override it through a custom registry.
const DEFAULT_MEMORY_BUDGET: u64 = 24 * 1024 * 1024 * 1024;

/// Capabilities of a bindable device.
#[derive(Debug, Clone)]
pub struct DeviceCapabilities {
    /// Registry index of the device.
    pub device_id: usize,
    /// Device name for reporting.
    pub name: String,
    /// Worker count the bound pool will use.
    pub workers: usize,
    /// Memory budget in bytes; allocation requests are validated against
    /// this before any buffer is created.
    pub memory: u64,
}

/// Registry of bindable devices.
pub struct DeviceRegistry {
    devices: Vec<DeviceCapabilities>,
}

impl DeviceRegistry {
    /// Detect the devices available on this host.
    pub fn detect() -> Self {
        let workers = num_cpus::get().max(1);
        let devices = vec![DeviceCapabilities {
            device_id: 0,
            name: format!("host-cpu ({} workers)", workers),
            workers,
            memory: DEFAULT_MEMORY_BUDGET,
        }];
        tracing::debug!("detected {} compute device(s)", devices.len());
        Self { devices }
    }

    /// Build a registry from an explicit capability list. Device ids are
    /// reassigned to registry order.
    pub fn custom(mut devices: Vec<DeviceCapabilities>) -> Self {
        for (i, dev) in devices.iter_mut().enumerate() {
            dev.device_id = i;
        }
        Self { devices }
    }

    /// All known devices.
    pub fn list(&self) -> &[DeviceCapabilities] {
        &self.devices
    }

    /// Bind a device by id, constructing its worker pool. The returned
    /// binding owns the pool until dropped.
    pub fn bind(&self, device_id: usize) -> Result<Device, ComputeError> {
        let caps = self
            .devices
            .get(device_id)
            .ok_or(ComputeError::DeviceNotFound(device_id))?
            .clone();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(caps.workers)
            .thread_name(move |i| format!("meantrim-worker-{i}"))
            .build()
            .map_err(|e| ComputeError::Runtime(format!("worker pool construction: {e}")))?;
        tracing::info!(
            "🔧 bound device {}: {} ({:.1} GiB budget)",
            caps.device_id,
            caps.name,
            caps.memory as f64 / (1024.0 * 1024.0 * 1024.0)
        );
        Ok(Device { caps, pool })
    }
}

/// A bound device: capabilities plus the owned worker pool.
pub struct Device {
    caps: DeviceCapabilities,
    pool: rayon::ThreadPool,
}

impl Device {
    /// Capabilities recorded at binding time.
    pub fn capabilities(&self) -> &DeviceCapabilities {
        &self.caps
    }

    /// The device id recorded at binding time; release happens against
    /// this same binding when the owner drops.
    pub fn id(&self) -> usize {
        self.caps.device_id
    }

    /// Dispatch a kernel: run `body` once per block id in `[0, groups)`
    /// across the worker pool. Returning from this call is the
    /// kernel-boundary synchronization barrier; every write made by the
    /// blocks is visible afterwards.
    pub fn dispatch<F>(&self, groups: usize, body: F)
    where
        F: Fn(usize) + Sync,
    {
        if groups == 0 {
            return;
        }
        use rayon::prelude::*;
        self.pool
            .install(|| (0..groups).into_par_iter().for_each(|g| body(g)));
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        tracing::debug!("released device {}", self.caps.device_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_detect_nonempty() {
        let registry = DeviceRegistry::detect();
        assert!(!registry.list().is_empty());
        assert!(registry.list()[0].workers >= 1);
    }

    #[test]
    fn test_bad_device_id() {
        let registry = DeviceRegistry::detect();
        assert!(matches!(
            registry.bind(99),
            Err(ComputeError::DeviceNotFound(99))
        ));
    }

    #[test]
    fn test_dispatch_covers_all_groups() {
        let registry = DeviceRegistry::detect();
        let device = registry.bind(0).unwrap();
        let hits: Vec<AtomicU32> = (0..257).map(|_| AtomicU32::new(0)).collect();
        device.dispatch(hits.len(), |g| {
            hits[g].fetch_add(1, Ordering::Relaxed);
        });
        assert!(hits.iter().all(|h| h.load(Ordering::Relaxed) == 1));
    }

    #[test]
    fn test_dispatch_empty_grid() {
        let registry = DeviceRegistry::detect();
        let device = registry.bind(0).unwrap();
        device.dispatch(0, |_| panic!("no blocks should run"));
    }

    #[test]
    fn test_rebind_after_drop() {
        let registry = DeviceRegistry::detect();
        let device = registry.bind(0).unwrap();
        drop(device);
        assert!(registry.bind(0).is_ok());
    }
}
