//! Host resource sampling

use anyhow::{anyhow, Result};
use std::sync::Mutex;
use sysinfo::{CpuRefreshKind, Disks, MemoryRefreshKind, RefreshKind, System};

use crate::core::{NodeStatus, StatusSampler};

/// Samples CPU, memory and disk usage plus host uptime via `sysinfo`
pub struct SystemSampler {
    sys: Mutex<System>,
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemSampler {
    pub fn new() -> Self {
        let mut sys = System::new_with_specifics(
            RefreshKind::nothing()
                .with_cpu(CpuRefreshKind::nothing().with_cpu_usage())
                .with_memory(MemoryRefreshKind::everything()),
        );
        // CPU usage is a delta, prime it so the first sample is meaningful.
        sys.refresh_cpu_usage();
        Self {
            sys: Mutex::new(sys),
        }
    }
}

fn percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        used as f64 / total as f64 * 100.0
    }
}

impl StatusSampler for SystemSampler {
    fn sample(&self) -> Result<NodeStatus> {
        let mut sys = self
            .sys
            .lock()
            .map_err(|_| anyhow!("system sampler lock poisoned"))?;
        sys.refresh_cpu_usage();
        sys.refresh_memory();

        let cpu = sys.global_cpu_usage() as f64;
        let mem = percent(sys.used_memory(), sys.total_memory());
        drop(sys);

        let disks = Disks::new_with_refreshed_list();
        let (total, available) = disks.list().iter().fold((0u64, 0u64), |(t, a), disk| {
            (t + disk.total_space(), a + disk.available_space())
        });
        let disk = percent(total.saturating_sub(available), total);

        Ok(NodeStatus {
            cpu,
            mem,
            disk,
            uptime: System::uptime(),
        })
    }
}
