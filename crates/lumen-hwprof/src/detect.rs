use anyhow::Result;
use std::time::Instant;
use sysinfo::System;
use tracing::{debug, warn};

use crate::types::{CpuInfo, DeviceProfile};

// Used when the OS does not report a figure.
const FALLBACK_MEMORY_MB: u64 = 4000;
const FALLBACK_THREADS: u32 = 4;

pub fn detect_now() -> Result<DeviceProfile> {
    let started = Instant::now();
    let os = std::env::consts::OS.to_string();
    let arch = std::env::consts::ARCH.to_string();

    let mut sys = System::new();
    sys.refresh_memory();
    sys.refresh_cpu();

    let bytes = sys.total_memory(); // sysinfo returns bytes
    let total_memory_mb = if bytes == 0 {
        warn!("total memory unavailable, assuming {FALLBACK_MEMORY_MB} MiB");
        FALLBACK_MEMORY_MB
    } else {
        bytes / (1024 * 1024)
    };

    let cpu = detect_cpu(&sys);
    let mut profile = DeviceProfile::assemble(os, arch, cpu, total_memory_mb);
    profile.probe_ms = Some(started.elapsed().as_millis() as u64);

    debug!(
        tier = %profile.tier,
        memory_mb = profile.total_memory_mb,
        threads = profile.cpu.threads,
        "device probed"
    );
    Ok(profile)
}

fn detect_cpu(sys: &System) -> CpuInfo {
    let brand = sys
        .cpus()
        .first()
        .map(|c| c.brand().trim().to_string())
        .filter(|b| !b.is_empty())
        .unwrap_or_else(|| "Unknown CPU".into());

    let threads = match num_cpus::get() as u32 {
        0 => {
            warn!("processor count unavailable, assuming {FALLBACK_THREADS}");
            FALLBACK_THREADS
        }
        n => n,
    };

    CpuInfo {
        brand,
        threads,
        physical_cores: Some(num_cpus::get_physical() as u32),
    }
}
