//! Engine configuration: built-in defaults < JSON file < `LUMEN_*` environment.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

use crate::error::EngineError;
use crate::kv::EvictionPolicy;
use crate::perf::PerformanceMode;

/// Logical cores seen by this process (probed once).
pub static AVAILABLE_THREADS: Lazy<usize> = Lazy::new(|| num_cpus::get().max(1));

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Cache capacity used when `load_model` leaves it unset, and the `max_size`
    /// reported while no model is loaded.
    pub default_context_size: usize,
    pub default_quantization: String,
    /// `None` ⇒ `max(1, cores - 1)`.
    pub default_thread_count: Option<usize>,
    /// Upper bound for the performance controller; `None` ⇒ detected cores.
    pub max_threads: Option<usize>,

    pub default_max_tokens: usize,
    pub default_temperature: f32,
    pub default_top_k: Option<u32>,
    pub default_top_p: Option<f32>,

    /// Hard cap on emitted tokens per request, whatever the caller asks for.
    pub max_decode_tokens: Option<usize>,
    /// Upper bound on tokens per prefill dispatch (also bounded by the mode's batch size).
    pub prefill_chunk: usize,

    pub eviction: EvictionPolicy,
    pub default_mode: PerformanceMode,
    /// Quantized models with a larger context default to sparse attention.
    pub auto_sparse_context: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_context_size: 4096,
            default_quantization: "none".to_string(),
            default_thread_count: None,
            max_threads: None,
            default_max_tokens: 256,
            default_temperature: 0.7,
            default_top_k: Some(40),
            default_top_p: Some(0.95),
            max_decode_tokens: None,
            prefill_chunk: 64,
            eviction: EvictionPolicy::Fifo,
            default_mode: PerformanceMode::Balanced,
            auto_sparse_context: 4096,
        }
    }
}

impl EngineConfig {
    /// Defaults overlaid with `LUMEN_*` environment variables.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Read a JSON config file (missing keys fall back to defaults), then apply env overrides.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
        let cfg: EngineConfig = serde_json::from_slice(&raw)
            .with_context(|| format!("parse engine config {}", path.display()))?;
        Ok(cfg.with_env_overrides())
    }

    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup. Unparseable values are ignored with a warning.
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_env::<usize>(&lookup, "LUMEN_CONTEXT_SIZE") {
            self.default_context_size = v;
        }
        if let Some(v) = parse_env::<usize>(&lookup, "LUMEN_THREADS") {
            self.default_thread_count = Some(v.max(1));
        }
        if let Some(v) = parse_env::<usize>(&lookup, "LUMEN_MAX_DECODE_TOKENS") {
            self.max_decode_tokens = Some(v.max(1));
        }
        if let Some(v) = parse_env::<EvictionPolicy>(&lookup, "LUMEN_EVICTION") {
            self.eviction = v;
        }
        if let Some(v) = parse_env::<PerformanceMode>(&lookup, "LUMEN_MODE") {
            self.default_mode = v;
        }
        self
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.default_context_size == 0 {
            return Err(EngineError::invalid("default_context_size must be > 0"));
        }
        if self.prefill_chunk == 0 {
            return Err(EngineError::invalid("prefill_chunk must be > 0"));
        }
        if !(self.default_temperature >= 0.0 && self.default_temperature.is_finite()) {
            return Err(EngineError::invalid("default_temperature must be finite and >= 0"));
        }
        Ok(())
    }

    /// Threads used by `load_model` when the caller does not pass any.
    pub fn resolved_thread_count(&self) -> usize {
        self.default_thread_count
            .unwrap_or_else(|| AVAILABLE_THREADS.saturating_sub(1))
            .max(1)
    }

    /// Ceiling for the `performance` mode.
    pub fn resolved_max_threads(&self) -> usize {
        self.max_threads.unwrap_or(*AVAILABLE_THREADS).max(1)
    }
}

fn parse_env<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparseable config override");
            None
        }
    }
}
