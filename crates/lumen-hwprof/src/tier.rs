use crate::types::{CpuInfo, DeviceProfile, DeviceTier};

const HIGH_MEMORY_MB: u64 = 6000;
const HIGH_THREADS: u32 = 6;
const MID_MEMORY_MB: u64 = 3000;
const MID_THREADS: u32 = 4;
const QUANTIZED_BELOW_MB: u64 = 4000;

/// Tier from total memory (MiB) and logical thread count.
pub fn classify(total_memory_mb: u64, threads: u32) -> DeviceTier {
    if total_memory_mb >= HIGH_MEMORY_MB && threads >= HIGH_THREADS {
        DeviceTier::High
    } else if total_memory_mb >= MID_MEMORY_MB && threads >= MID_THREADS {
        DeviceTier::Mid
    } else {
        DeviceTier::Low
    }
}

impl DeviceProfile {
    /// Build an unstamped profile (no fingerprint or timestamps) from probe results.
    pub fn assemble(os: String, arch: String, cpu: CpuInfo, total_memory_mb: u64) -> Self {
        let tier = classify(total_memory_mb, cpu.threads);
        Self {
            schema: 1,
            os,
            arch,
            cpu,
            total_memory_mb,
            tier,
            is_low_end: tier == DeviceTier::Low,
            prefers_quantized: total_memory_mb < QUANTIZED_BELOW_MB,
            fingerprint: String::new(),
            created_at: String::new(),
            updated_at: String::new(),
            probe_ms: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_boundaries() {
        assert_eq!(classify(8000, 8), DeviceTier::High);
        assert_eq!(classify(6000, 6), DeviceTier::High);
        assert_eq!(classify(6000, 5), DeviceTier::Mid);
        assert_eq!(classify(16000, 4), DeviceTier::Mid);
        assert_eq!(classify(3000, 4), DeviceTier::Mid);
        assert_eq!(classify(2999, 8), DeviceTier::Low);
        assert_eq!(classify(8000, 2), DeviceTier::Low);
    }

    #[test]
    fn assemble_derives_flags() {
        let cpu = CpuInfo {
            brand: "test".into(),
            threads: 4,
            physical_cores: Some(2),
        };
        let p = DeviceProfile::assemble("linux".into(), "x86_64".into(), cpu, 3500);
        assert_eq!(p.tier, DeviceTier::Mid);
        assert!(!p.is_low_end);
        assert!(p.prefers_quantized);
        assert!(p.fingerprint.is_empty());
    }
}
