//! Adaptive performance modes: maps a requested mode onto thread/batch settings
//! that the generation pipeline applies at the next backend dispatch.
//!
//! Reads and writes here are short critical sections (a copy in or out of a
//! small struct), so callers can poll or switch modes while a generation runs
//! without waiting for more than the current token.

mod metrics;

pub use metrics::{InferenceStats, MetricsRecorder, PerformanceMetrics};

use std::fmt;
use std::str::FromStr;

use lumen_abi::RuntimeConfig;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sysinfo::System;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PerformanceMode {
    #[serde(rename = "performance")]
    Performance,
    #[default]
    #[serde(rename = "balanced")]
    Balanced,
    #[serde(rename = "powersave", alias = "power-saving", alias = "power_save")]
    PowerSave,
    #[serde(rename = "low-memory", alias = "low_memory")]
    LowMemory,
}

/// Concrete settings a mode resolves to on a given machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeProfile {
    pub threads: usize,
    pub batch_size: usize,
    pub prefer_sparse: bool,
}

impl PerformanceMode {
    pub const ALL: [PerformanceMode; 4] = [
        PerformanceMode::Performance,
        PerformanceMode::Balanced,
        PerformanceMode::PowerSave,
        PerformanceMode::LowMemory,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PerformanceMode::Performance => "performance",
            PerformanceMode::Balanced => "balanced",
            PerformanceMode::PowerSave => "powersave",
            PerformanceMode::LowMemory => "low-memory",
        }
    }

    /// Fixed mapping from mode to thread/batch settings for `max_threads` cores.
    pub fn profile(self, max_threads: usize) -> ModeProfile {
        let max = max_threads.max(1);
        let save = max.min(2);
        match self {
            PerformanceMode::Performance => ModeProfile {
                threads: max,
                batch_size: 512,
                prefer_sparse: false,
            },
            PerformanceMode::Balanced => ModeProfile {
                threads: (save + max).div_ceil(2),
                batch_size: 256,
                prefer_sparse: false,
            },
            PerformanceMode::PowerSave => ModeProfile {
                threads: save,
                batch_size: 64,
                prefer_sparse: false,
            },
            PerformanceMode::LowMemory => ModeProfile {
                threads: 1,
                batch_size: 32,
                prefer_sparse: true,
            },
        }
    }
}

impl fmt::Display for PerformanceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PerformanceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "performance" => Ok(PerformanceMode::Performance),
            "balanced" => Ok(PerformanceMode::Balanced),
            "powersave" | "power-saving" | "power_save" | "power-save" => {
                Ok(PerformanceMode::PowerSave)
            }
            "low-memory" | "low_memory" | "lowmemory" => Ok(PerformanceMode::LowMemory),
            other => Err(format!("unknown performance mode '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ControllerState {
    mode: PerformanceMode,
    runtime: RuntimeConfig,
    prefer_sparse: bool,
    /// Bumped on every change; lets the pipeline notice a new configuration between steps.
    revision: u64,
}

/// Point-in-time copy of the controller's configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerSnapshot {
    pub mode: PerformanceMode,
    pub runtime: RuntimeConfig,
    pub prefer_sparse: bool,
    pub revision: u64,
}

#[derive(Debug)]
pub struct PerformanceController {
    max_threads: usize,
    state: Mutex<ControllerState>,
    metrics: MetricsRecorder,
}

impl PerformanceController {
    /// Start in `mode`; an explicit `thread_count` (from `load_model`) overrides the mode's threads.
    pub fn new(mode: PerformanceMode, max_threads: usize, thread_count: Option<usize>) -> Self {
        let max_threads = max_threads.max(1);
        let profile = mode.profile(max_threads);
        let threads = thread_count.unwrap_or(profile.threads).max(1);
        Self {
            max_threads,
            state: Mutex::new(ControllerState {
                mode,
                runtime: RuntimeConfig {
                    threads,
                    batch_size: profile.batch_size,
                },
                prefer_sparse: profile.prefer_sparse,
                revision: 0,
            }),
            metrics: MetricsRecorder::default(),
        }
    }

    /// Recompute thread/batch settings for `mode`. Takes effect at the next dispatch;
    /// an in-flight backend call keeps the configuration it started with.
    pub fn adjust(&self, mode: PerformanceMode) -> RuntimeConfig {
        let profile = mode.profile(self.max_threads);
        let runtime = RuntimeConfig {
            threads: profile.threads,
            batch_size: profile.batch_size,
        };
        {
            let mut st = self.state.lock();
            st.mode = mode;
            st.runtime = runtime;
            st.prefer_sparse = profile.prefer_sparse;
            st.revision += 1;
        }
        info!(
            mode = %mode,
            threads = runtime.threads,
            batch_size = runtime.batch_size,
            "performance mode adjusted"
        );
        runtime
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        let st = *self.state.lock();
        ControllerSnapshot {
            mode: st.mode,
            runtime: st.runtime,
            prefer_sparse: st.prefer_sparse,
            revision: st.revision,
        }
    }

    #[inline]
    pub fn mode(&self) -> PerformanceMode {
        self.state.lock().mode
    }

    #[inline]
    pub fn runtime(&self) -> RuntimeConfig {
        self.state.lock().runtime
    }

    #[inline]
    pub fn max_threads(&self) -> usize {
        self.max_threads
    }

    #[inline]
    pub fn metrics(&self) -> &MetricsRecorder {
        &self.metrics
    }
}

/// Resident memory of this process, used when the backend gives no figure of its own.
pub fn process_resident_bytes() -> Option<u64> {
    let pid = sysinfo::get_current_pid().ok()?;
    let mut sys = System::new();
    sys.refresh_process(pid);
    sys.process(pid).map(|p| p.memory())
}
