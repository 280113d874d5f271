use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

use super::PerformanceMode;

/// Lock-free running counters updated by the pipeline and read by metric polls.
#[derive(Debug, Default)]
pub struct MetricsRecorder {
    last_tokens_per_second: AtomicU64, // f64 bits
    peak_memory_bytes: AtomicU64,
    inference_count: AtomicU64,
    total_inference_ms: AtomicU64,
    last_inference_ms: AtomicU64,
    tokens_generated: AtomicU64,
}

/// Counters copied out of a `MetricsRecorder`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InferenceStats {
    pub tokens_per_second: f64,
    pub peak_memory_bytes: u64,
    pub inference_count: u64,
    pub total_inference_ms: u64,
    pub last_inference_ms: u64,
    pub tokens_generated: u64,
}

impl MetricsRecorder {
    /// Record one finished request. `decode_elapsed` covers only the token loop.
    pub fn record_inference(&self, tokens: usize, decode_elapsed: Duration, total_elapsed: Duration) {
        let secs = decode_elapsed.as_secs_f64();
        if tokens > 0 && secs > 0.0 {
            let tps = tokens as f64 / secs;
            self.last_tokens_per_second
                .store(tps.to_bits(), Ordering::Relaxed);
        }
        let ms = total_elapsed.as_millis() as u64;
        self.inference_count.fetch_add(1, Ordering::Relaxed);
        self.total_inference_ms.fetch_add(ms, Ordering::Relaxed);
        self.last_inference_ms.store(ms, Ordering::Relaxed);
        self.tokens_generated
            .fetch_add(tokens as u64, Ordering::Relaxed);
    }

    pub fn observe_memory(&self, bytes: u64) {
        self.peak_memory_bytes.fetch_max(bytes, Ordering::Relaxed);
    }

    pub fn stats(&self) -> InferenceStats {
        InferenceStats {
            tokens_per_second: f64::from_bits(self.last_tokens_per_second.load(Ordering::Relaxed)),
            peak_memory_bytes: self.peak_memory_bytes.load(Ordering::Relaxed),
            inference_count: self.inference_count.load(Ordering::Relaxed),
            total_inference_ms: self.total_inference_ms.load(Ordering::Relaxed),
            last_inference_ms: self.last_inference_ms.load(Ordering::Relaxed),
            tokens_generated: self.tokens_generated.load(Ordering::Relaxed),
        }
    }
}

/// Metrics record returned to UI/host code.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    pub size: usize,
    pub max_size: usize,
    pub cache_occupancy: f32,
    pub tokens_per_second: f64,
    pub peak_memory_bytes: u64,
    pub inference_count: u64,
    pub total_inference_ms: u64,
    pub last_inference_ms: u64,
    pub tokens_generated: u64,
    pub mode: Option<PerformanceMode>,
    pub thread_count: usize,
    pub batch_size: usize,
}

impl PerformanceMetrics {
    /// Degraded record for polling code when no model is loaded.
    pub fn unloaded(max_size: usize) -> Self {
        Self {
            size: 0,
            max_size,
            cache_occupancy: 0.0,
            tokens_per_second: 0.0,
            peak_memory_bytes: 0,
            inference_count: 0,
            total_inference_ms: 0,
            last_inference_ms: 0,
            tokens_generated: 0,
            mode: None,
            thread_count: 0,
            batch_size: 0,
        }
    }
}
