//! Session lifecycle: one loaded model, its cache and its performance controller.

mod manager;

pub use manager::SessionManager;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use lumen_abi::{InferenceBackend, ModelCoreInfo};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::error::{EngineError, Result};
use crate::kv::KvCache;
use crate::perf::PerformanceController;

/// Opaque identifier of a loaded model. `SessionHandle::NONE` means "no model loaded".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionHandle(u64);

impl SessionHandle {
    pub const NONE: SessionHandle = SessionHandle(0);

    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        SessionHandle(raw)
    }

    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

/// Parameters for `SessionManager::load_model`. Unset fields fall back to `EngineConfig`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadOptions {
    pub path: PathBuf,
    pub quantization: Option<String>,
    pub context_size: Option<usize>,
    pub thread_count: Option<usize>,
}

impl LoadOptions {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn quantization<S: Into<String>>(mut self, q: S) -> Self {
        self.quantization = Some(q.into());
        self
    }

    pub fn context_size(mut self, n: usize) -> Self {
        self.context_size = Some(n);
        self
    }

    pub fn thread_count(mut self, n: usize) -> Self {
        self.thread_count = Some(n);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Loaded,
}

/// Metadata returned by a successful load.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub handle: SessionHandle,
    pub status: SessionStatus,
    pub model_path: PathBuf,
    pub quantization: String,
    pub context_size: usize,
    pub thread_count: usize,
    pub model: ModelCoreInfo,
}

impl SessionInfo {
    #[inline]
    pub fn is_quantized(&self) -> bool {
        is_quantized_label(&self.quantization)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSize {
    pub size: usize,
    pub max_size: usize,
}

const QUANT_LABELS: &[&str] = &[
    // Longer labels first so `Q3_K_S` is not reported as a bare `Q3_K`.
    "Q3_K_S",
    "Q3_K_M",
    "Q3_K_L",
    "Q4_K_S",
    "Q4_K_M",
    "Q5_K_S",
    "Q5_K_M",
    "Q2_K",
    "Q6_K",
    "Q4_0",
    "Q5_0",
    "Q8_0",
    "MobileQuant",
];

/// Quantization label embedded in a model file name, e.g. `llama-7b.Q4_K_M.gguf`.
pub fn detect_quantization(path: &Path) -> Option<&'static str> {
    let name = path.file_name()?.to_string_lossy().to_ascii_uppercase();
    QUANT_LABELS
        .iter()
        .copied()
        .find(|label| name.contains(&label.to_ascii_uppercase()))
}

pub(crate) fn is_quantized_label(label: &str) -> bool {
    !label.is_empty() && !label.eq_ignore_ascii_case("none")
}

/// Mutable per-session state. Locked once per backend dispatch.
pub(crate) struct SessionState<B> {
    pub(crate) backend: B,
    pub(crate) kv: KvCache,
}

/// One loaded model as seen by the manager and the pipeline.
pub(crate) struct SessionSlot<B> {
    pub(crate) info: SessionInfo,
    /// `None` once the backend has been released.
    state: Mutex<Option<SessionState<B>>>,
    pub(crate) controller: PerformanceController,

    busy: Mutex<bool>,
    idle: Condvar,
    closed: AtomicBool,
    cancel: Mutex<CancelToken>,

    // Lock-free mirrors for size queries.
    kv_len: AtomicUsize,
    kv_capacity: usize,
}

impl<B: InferenceBackend> SessionSlot<B> {
    pub(crate) fn new(info: SessionInfo, state: SessionState<B>, controller: PerformanceController) -> Self {
        let kv_capacity = state.kv.capacity();
        Self {
            info,
            state: Mutex::new(Some(state)),
            controller,
            busy: Mutex::new(false),
            idle: Condvar::new(),
            closed: AtomicBool::new(false),
            cancel: Mutex::new(CancelToken::new()),
            kv_len: AtomicUsize::new(0),
            kv_capacity,
        }
    }

    #[inline]
    pub(crate) fn handle(&self) -> SessionHandle {
        self.info.handle
    }

    /// Run `f` under the state lock. The size mirror is refreshed before the lock is released.
    pub(crate) fn with_state<T>(&self, f: impl FnOnce(&mut SessionState<B>) -> Result<T>) -> Result<T> {
        let mut guard = self.state.lock();
        let st = guard.as_mut().ok_or(EngineError::NoModelLoaded)?;
        let out = f(&mut *st);
        self.kv_len.store(st.kv.len(), Ordering::Release);
        out
    }

    pub(crate) fn cache_size(&self) -> CacheSize {
        CacheSize {
            size: self.kv_len.load(Ordering::Acquire),
            max_size: self.kv_capacity,
        }
    }

    /// Claim the single generation slot, or fail with `SessionBusy`.
    pub(crate) fn begin_generation(&self, cancel: CancelToken) -> Result<GenerationGuard<'_, B>> {
        let mut busy = self.busy.lock();
        if *busy {
            return Err(EngineError::SessionBusy);
        }
        if self.closed.load(Ordering::Acquire) {
            return Err(EngineError::NoModelLoaded);
        }
        *busy = true;
        *self.cancel.lock() = cancel.clone();
        Ok(GenerationGuard { slot: self, cancel })
    }

    pub(crate) fn is_generating(&self) -> bool {
        *self.busy.lock()
    }

    pub(crate) fn cancel_current(&self) {
        self.cancel.lock().cancel();
    }

    /// Cancel any in-flight generation, wait for it to end, then drop the backend.
    pub(crate) fn close(&self) -> Option<B> {
        let mut busy = self.busy.lock();
        // `begin_generation` checks `closed` and installs its token under this lock,
        // so whatever token is cancelled here belongs to the generation being awaited.
        self.closed.store(true, Ordering::Release);
        self.cancel_current();
        while *busy {
            self.idle.wait(&mut busy);
        }
        drop(busy);
        let state = self.state.lock().take();
        self.kv_len.store(0, Ordering::Release);
        state.map(|s| s.backend)
    }
}

/// Held for the duration of one generation; releases the slot and wakes `close` on drop.
pub(crate) struct GenerationGuard<'a, B: InferenceBackend> {
    slot: &'a SessionSlot<B>,
    pub(crate) cancel: CancelToken,
}

impl<'a, B: InferenceBackend> GenerationGuard<'a, B> {
    #[inline]
    pub(crate) fn slot(&self) -> &'a SessionSlot<B> {
        self.slot
    }
}

impl<B: InferenceBackend> Drop for GenerationGuard<'_, B> {
    fn drop(&mut self) {
        let mut busy = self.slot.busy.lock();
        *busy = false;
        self.slot.idle.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_quantization_from_file_name() {
        assert_eq!(detect_quantization(Path::new("/m/llama-7b.Q4_K_M.gguf")), Some("Q4_K_M"));
        assert_eq!(detect_quantization(Path::new("phi-q3_k_s.gguf")), Some("Q3_K_S"));
        assert_eq!(detect_quantization(Path::new("tiny-mobilequant.bin")), Some("MobileQuant"));
        assert_eq!(detect_quantization(Path::new("model-f16.gguf")), None);
        // Directory names do not count.
        assert_eq!(detect_quantization(Path::new("/Q4_0/model.gguf")), None);
    }

    #[test]
    fn none_label_is_not_quantized() {
        assert!(!is_quantized_label("none"));
        assert!(!is_quantized_label("NONE"));
        assert!(is_quantized_label("Q8_0"));
    }

    #[test]
    fn handle_zero_means_no_model() {
        assert!(SessionHandle::NONE.is_none());
        assert!(SessionHandle::default().is_none());
        assert!(!SessionHandle::from_raw(3).is_none());
        assert_eq!(SessionHandle::from_raw(3).to_string(), "session#3");
    }
}
