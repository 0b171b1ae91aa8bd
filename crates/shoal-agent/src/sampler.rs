use std::sync::Mutex;

use shoal_core::{CpuLoad, MemLoad};
use sysinfo::System;

const BYTES_PER_MEGABYTE: u64 = 1024 * 1024;

/// One CPU and memory reading.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostLoad {
    pub cpu: CpuLoad,
    pub mem: MemLoad,
}

/// Source of host load readings.
pub trait LoadSampler: Send + Sync {
    fn sample(&self) -> HostLoad;
}

/// Reads the local machine through `sysinfo`.
///
/// CPU usage is measured between consecutive refreshes, so the first reading
/// after construction reports zero usage.
pub struct SystemLoadSampler {
    system: Mutex<System>,
}

impl SystemLoadSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        system.refresh_memory();
        Self {
            system: Mutex::new(system),
        }
    }
}

impl Default for SystemLoadSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadSampler for SystemLoadSampler {
    fn sample(&self) -> HostLoad {
        let mut system = self.system.lock().unwrap_or_else(|e| e.into_inner());
        system.refresh_cpu();
        system.refresh_memory();

        let cpus = system.cpus();
        let usage_percent = if cpus.is_empty() {
            0.0
        } else {
            cpus.iter().map(|c| c.cpu_usage()).sum::<f32>() / cpus.len() as f32
        };

        HostLoad {
            cpu: CpuLoad {
                count: u32::try_from(cpus.len()).unwrap_or(u32::MAX),
                usage_percent,
            },
            mem: MemLoad {
                total: system.total_memory() / BYTES_PER_MEGABYTE,
                used: system.used_memory() / BYTES_PER_MEGABYTE,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_sampler_reports_plausible_values() {
        let sampler = SystemLoadSampler::new();
        let load = sampler.sample();
        assert!(load.cpu.count >= 1);
        assert!(load.mem.total > 0);
        assert!(load.mem.used <= load.mem.total);
        assert!((0.0..=100.0).contains(&load.cpu.usage_percent));
    }
}
