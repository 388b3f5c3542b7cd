use sysinfo::System;
use tracing::debug;

use crate::languages::ResourceProfile;

/// Host resources read once when a pool is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostResources {
    pub cpu_cores: usize,
    pub available_memory_mb: u64,
}

impl HostResources {
    /// Reads core count and available memory from the host.
    pub fn detect() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        let available = match sys.available_memory() {
            0 => sys.total_memory(),
            n => n,
        };
        let host = Self {
            cpu_cores: num_cpus::get().max(1),
            available_memory_mb: available / (1024 * 1024),
        };
        debug!(
            "host resources: {} cores, {} MB available",
            host.cpu_cores, host.available_memory_mb
        );
        host
    }
}

/// Number of analyzer instances a host can afford for one language:
/// `min(cores * cpu_efficiency, (available - reserved) / memory_per_instance, hard_cap)`,
/// at least 1 and at most `global_max`.
pub fn compute_pool_size(
    host: &HostResources,
    profile: &ResourceProfile,
    reserved_memory_mb: u64,
    global_max: usize,
) -> usize {
    let by_cpu = (host.cpu_cores as f64 * profile.cpu_efficiency).round() as usize;
    let by_memory = host
        .available_memory_mb
        .saturating_sub(reserved_memory_mb)
        .checked_div(profile.memory_per_instance_mb)
        .unwrap_or(u64::MAX);
    let by_memory = usize::try_from(by_memory).unwrap_or(usize::MAX);

    by_cpu
        .min(by_memory)
        .min(profile.hard_cap)
        .max(1)
        .min(global_max.max(1))
}

/// Decides pool sizes for every language from one host reading.
#[derive(Debug, Clone)]
pub struct PoolSizer {
    host: HostResources,
    fixed: Option<usize>,
    reserved_memory_mb: u64,
    global_max: usize,
}

impl PoolSizer {
    pub fn new(host: HostResources, fixed: Option<usize>, reserved_memory_mb: u64, global_max: usize) -> Self {
        Self {
            host,
            fixed,
            reserved_memory_mb,
            global_max,
        }
    }

    pub fn host(&self) -> &HostResources {
        &self.host
    }

    /// The fixed size when configured, otherwise the computed one.
    pub fn size_for(&self, profile: &ResourceProfile) -> usize {
        match self.fixed {
            Some(n) => n.max(1),
            None => compute_pool_size(&self.host, profile, self.reserved_memory_mb, self.global_max),
        }
    }
}
