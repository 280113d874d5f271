use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub schema: u32, // major, stays 1

    pub os: String,
    pub arch: String,

    pub cpu: CpuInfo,
    /// Total physical memory in MiB.
    pub total_memory_mb: u64,

    pub tier: DeviceTier,
    pub is_low_end: bool,
    /// Devices under 4000 MiB should prefer quantized weights.
    pub prefers_quantized: bool,

    pub fingerprint: String,
    pub created_at: String,
    pub updated_at: String,

    #[serde(default)]
    pub probe_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuInfo {
    pub brand: String,
    pub threads: u32, // logical
    #[serde(default)]
    pub physical_cores: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceTier {
    Low,
    Mid,
    High,
}

impl DeviceTier {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceTier::Low => "low",
            DeviceTier::Mid => "mid",
            DeviceTier::High => "high",
        }
    }
}

impl fmt::Display for DeviceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// OS-reported thermal pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThermalState {
    #[default]
    Nominal,
    Fair,
    Serious,
    Critical,
}

impl FromStr for ThermalState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nominal" => Ok(ThermalState::Nominal),
            "fair" => Ok(ThermalState::Fair),
            "serious" => Ok(ThermalState::Serious),
            "critical" => Ok(ThermalState::Critical),
            other => Err(format!("unknown thermal state '{other}'")),
        }
    }
}

/// Model shape suited to a device tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRecommendation {
    pub model_size: String,
    pub quantization: String,
    pub context_size: usize,
    pub max_batch_size: usize,
}
