use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use lumen_abi::{BackendError, InferenceBackend, LoadParams, RuntimeConfig};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{
    CacheSize, LoadOptions, SessionHandle, SessionInfo, SessionSlot, SessionState, SessionStatus,
    detect_quantization,
};
use crate::config::EngineConfig;
use crate::engine::{Generation, GenerationRequest, Pipeline};
use crate::error::{EngineError, Result};
use crate::kv::KvCache;
use crate::perf::{PerformanceController, PerformanceMetrics, PerformanceMode, process_resident_bytes};

type Loader<B> = Box<dyn Fn(&LoadParams) -> std::result::Result<B, BackendError> + Send + Sync>;

/// Owns the single active session and routes every engine operation to it.
///
/// Compute calls (`load_model`, `generate`, `embed`, `performance_metrics`) report
/// precise errors. Management calls degrade to no-ops on a stale or absent handle.
pub struct SessionManager<B: InferenceBackend> {
    config: EngineConfig,
    loader: Loader<B>,
    active: Mutex<Option<Arc<SessionSlot<B>>>>,
    next_handle: AtomicU64,
    /// Serializes load/free against each other.
    lifecycle: Mutex<()>,
}

impl<B: InferenceBackend + 'static> SessionManager<B> {
    /// Manager that materializes models through `B::load`.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_loader(config, |params| B::load(params))
    }

    /// Manager with a custom load routine (plugin hosts, tests).
    pub fn with_loader<F>(config: EngineConfig, loader: F) -> Self
    where
        F: Fn(&LoadParams) -> std::result::Result<B, BackendError> + Send + Sync + 'static,
    {
        Self {
            config,
            loader: Box::new(loader),
            active: Mutex::new(None),
            next_handle: AtomicU64::new(1),
            lifecycle: Mutex::new(()),
        }
    }

    #[inline]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Load a model, replacing (and first freeing) any active session.
    pub fn load_model(&self, opts: LoadOptions) -> Result<SessionInfo> {
        let context_size = opts.context_size.unwrap_or(self.config.default_context_size);
        if context_size == 0 {
            return Err(EngineError::invalid("contextSize must be > 0"));
        }
        if opts.thread_count == Some(0) {
            return Err(EngineError::invalid("threadCount must be >= 1"));
        }
        if opts.path.as_os_str().is_empty() {
            return Err(EngineError::invalid("model path must not be empty"));
        }
        let thread_count = opts
            .thread_count
            .unwrap_or_else(|| self.config.resolved_thread_count());
        let quantization = opts
            .quantization
            .clone()
            .filter(|q| !q.trim().is_empty())
            .or_else(|| detect_quantization(&opts.path).map(str::to_string))
            .unwrap_or_else(|| self.config.default_quantization.clone());

        let _life = self.lifecycle.lock();

        let previous = self.active.lock().take();
        if let Some(prev) = previous {
            debug!(handle = %prev.handle(), "replacing active session");
            release(prev);
        }

        let params = LoadParams {
            model_path: opts.path.clone(),
            quantization: quantization.clone(),
            context_size,
            thread_count,
        };
        info!(
            path = %params.model_path.display(),
            quantization = %params.quantization,
            context_size,
            thread_count,
            "loading model"
        );
        let backend = (self.loader)(&params).map_err(|e| {
            warn!(error = %e, "model load failed");
            EngineError::ModelLoad(e.to_string())
        })?;

        let handle = SessionHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let mut model = backend.model_info();
        if model.path.as_os_str().is_empty() {
            model.path = params.model_path.clone();
        }
        let info = SessionInfo {
            handle,
            status: SessionStatus::Loaded,
            model_path: params.model_path,
            quantization,
            context_size,
            thread_count,
            model,
        };

        let controller = PerformanceController::new(
            self.config.default_mode,
            self.config.resolved_max_threads(),
            Some(thread_count),
        );
        if let Some(bytes) = backend.memory_usage_bytes().or_else(process_resident_bytes) {
            controller.metrics().observe_memory(bytes);
        }
        let state = SessionState {
            backend,
            kv: KvCache::new(context_size, self.config.eviction),
        };
        let slot = Arc::new(SessionSlot::new(info.clone(), state, controller));
        *self.active.lock() = Some(slot);

        info!(handle = %handle, "model loaded");
        Ok(info)
    }

    /// Release the session behind `handle`. Stale or absent handles are a no-op.
    pub fn free_model(&self, handle: SessionHandle) {
        let _life = self.lifecycle.lock();
        let slot = {
            let mut active = self.active.lock();
            match active.as_ref() {
                Some(s) if s.handle() == handle => active.take(),
                _ => None,
            }
        };
        match slot {
            Some(s) => release(s),
            None => debug!(handle = %handle, "free_model: no such session"),
        }
    }

    /// Handle of the active session, or `SessionHandle::NONE`.
    pub fn current_handle(&self) -> SessionHandle {
        self.active
            .lock()
            .as_ref()
            .map(|s| s.handle())
            .unwrap_or(SessionHandle::NONE)
    }

    pub fn session_info(&self, handle: SessionHandle) -> Option<SessionInfo> {
        self.session(handle).map(|s| s.info.clone())
    }

    pub fn generate(&self, handle: SessionHandle, req: GenerationRequest) -> Result<Generation> {
        self.generate_stream(handle, req, |_| {})
    }

    /// Like `generate`, also handing each decoded UTF-8 delta to `on_delta` as it appears.
    pub fn generate_stream<F>(
        &self,
        handle: SessionHandle,
        req: GenerationRequest,
        on_delta: F,
    ) -> Result<Generation>
    where
        F: FnMut(&str),
    {
        let slot = self.session(handle).ok_or(EngineError::NoModelLoaded)?;
        req.validate()?;

        let cancel = req.cancel.clone().unwrap_or_default();
        let guard = slot.begin_generation(cancel)?;
        let pipeline = Pipeline::new(guard.slot(), &self.config, &req, guard.cancel.clone())?;
        let out = pipeline.run(&req.prompt, on_delta);

        let hinted = slot
            .with_state(|st| Ok(st.backend.memory_usage_bytes()))
            .unwrap_or(None);
        if hinted.is_none() {
            if let Some(bytes) = process_resident_bytes() {
                slot.controller.metrics().observe_memory(bytes);
            }
        }
        drop(guard);
        out
    }

    /// Embedding for `text`. Never touches the cache.
    pub fn embed(&self, handle: SessionHandle, text: &str) -> Result<Vec<f32>> {
        let slot = self.session(handle).ok_or(EngineError::NoModelLoaded)?;
        if text.is_empty() {
            return Err(EngineError::Embedding("text must not be empty".into()));
        }
        let vector = slot.with_state(|st| {
            if !st.backend.capabilities().embeddings {
                return Err(EngineError::Embedding("backend does not support embeddings".into()));
            }
            st.backend
                .embed(text)
                .map_err(|e| EngineError::Embedding(e.to_string()))
        })?;
        if vector.is_empty() {
            return Err(EngineError::Embedding("backend returned an empty vector".into()));
        }
        debug!(dim = vector.len(), "embedding computed");
        Ok(vector)
    }

    /// Drop all cached context and boundaries; the model stays loaded.
    pub fn clear_kv_cache(&self, handle: SessionHandle) {
        if let Some(slot) = self.session(handle) {
            let _ = slot.with_state(|st| {
                st.kv.clear();
                st.backend.reset();
                Ok(())
            });
            debug!(handle = %handle, "kv cache cleared");
        }
    }

    /// Mark the end of the current turn. No-op without a model or on an empty cache.
    pub fn add_message_boundary(&self, handle: SessionHandle) {
        if let Some(slot) = self.session(handle) {
            let _ = slot.with_state(|st| Ok(st.kv.mark_boundary()));
        }
    }

    /// Boundary indices into the current cache entries.
    pub fn message_boundaries(&self, handle: SessionHandle) -> Vec<usize> {
        self.session(handle)
            .and_then(|s| s.with_state(|st| Ok(st.kv.boundaries())).ok())
            .unwrap_or_default()
    }

    /// Never fails; reports `{0, default_context_size}` without a model.
    pub fn get_kv_cache_size(&self, handle: SessionHandle) -> CacheSize {
        match self.session(handle) {
            Some(slot) => slot.cache_size(),
            None => CacheSize {
                size: 0,
                max_size: self.config.default_context_size,
            },
        }
    }

    pub fn performance_metrics(&self, handle: SessionHandle) -> Result<PerformanceMetrics> {
        let slot = self.session(handle).ok_or(EngineError::NoModelLoaded)?;
        let cache = slot.cache_size();
        let snap = slot.controller.snapshot();
        let stats = slot.controller.metrics().stats();
        Ok(PerformanceMetrics {
            size: cache.size,
            max_size: cache.max_size,
            cache_occupancy: cache.size as f32 / cache.max_size.max(1) as f32,
            tokens_per_second: stats.tokens_per_second,
            peak_memory_bytes: stats.peak_memory_bytes,
            inference_count: stats.inference_count,
            total_inference_ms: stats.total_inference_ms,
            last_inference_ms: stats.last_inference_ms,
            tokens_generated: stats.tokens_generated,
            mode: Some(snap.mode),
            thread_count: snap.runtime.threads,
            batch_size: snap.runtime.batch_size,
        })
    }

    /// `performance_metrics`, degraded to a zeroed record when no model is loaded.
    pub fn metrics_or_default(&self, handle: SessionHandle) -> PerformanceMetrics {
        self.performance_metrics(handle)
            .unwrap_or_else(|_| PerformanceMetrics::unloaded(self.config.default_context_size))
    }

    /// Switch mode. Takes effect at the next backend dispatch. `None` when unloaded.
    pub fn adjust_performance_mode(
        &self,
        handle: SessionHandle,
        mode: PerformanceMode,
    ) -> Option<RuntimeConfig> {
        self.session(handle).map(|s| s.controller.adjust(mode))
    }

    /// Fire the in-flight request's cancellation token. Returns whether a generation was running.
    pub fn cancel_generation(&self, handle: SessionHandle) -> bool {
        match self.session(handle) {
            Some(slot) => {
                let running = slot.is_generating();
                if running {
                    slot.cancel_current();
                    info!(handle = %handle, "cancel requested");
                }
                running
            }
            None => false,
        }
    }

    pub fn is_generating(&self, handle: SessionHandle) -> bool {
        self.session(handle).is_some_and(|s| s.is_generating())
    }

    fn session(&self, handle: SessionHandle) -> Option<Arc<SessionSlot<B>>> {
        if handle.is_none() {
            return None;
        }
        self.active
            .lock()
            .as_ref()
            .filter(|s| s.handle() == handle)
            .cloned()
    }
}

impl<B: InferenceBackend> Drop for SessionManager<B> {
    fn drop(&mut self) {
        if let Some(slot) = self.active.get_mut().take() {
            release(slot);
        }
    }
}

/// Cancel and await any in-flight generation, then drop the backend.
fn release<B: InferenceBackend>(slot: Arc<SessionSlot<B>>) {
    let handle = slot.handle();
    if let Some(mut backend) = slot.close() {
        backend.reset();
        drop(backend);
    }
    info!(handle = %handle, "model freed");
}
