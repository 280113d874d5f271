//! Generation pipeline: prompt prefill and the token-by-token decode loop over
//! a session's backend and cache.

use std::fmt;
use std::time::Duration;

use lumen_abi::{InferenceBackend, SamplingParams, Token};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cancel::CancelToken;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::session::SessionSlot;

// Child modules hold `impl Pipeline` blocks; they can reach its private fields.
mod decode;
mod prefill;
mod sampler;
mod utils;

pub use sampler::Sampler;

/// One generation call. Unset fields fall back to `EngineConfig` defaults.
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub prompt: String,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
    pub top_k: Option<u32>,
    pub top_p: Option<f32>,
    pub seed: Option<u64>,
    /// Generation ends before the first occurrence of any of these.
    pub stop: Vec<String>,
    /// `None` lets the engine decide from model quantization and the performance mode.
    pub use_sparse_attention: Option<bool>,
    /// Caller-owned cancellation; a fresh token is used when absent.
    pub cancel: Option<CancelToken>,
}

impl GenerationRequest {
    pub fn new<S: Into<String>>(prompt: S) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.max_tokens = Some(n);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = Some(t);
        self
    }

    pub fn top_k(mut self, k: u32) -> Self {
        self.top_k = Some(k);
        self
    }

    pub fn top_p(mut self, p: f32) -> Self {
        self.top_p = Some(p);
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn stop<S: Into<String>>(mut self, s: S) -> Self {
        self.stop.push(s.into());
        self
    }

    pub fn sparse_attention(mut self, on: bool) -> Self {
        self.use_sparse_attention = Some(on);
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.prompt.is_empty() {
            return Err(EngineError::invalid("prompt must not be empty"));
        }
        if self.max_tokens == Some(0) {
            return Err(EngineError::invalid("maxTokens must be >= 1"));
        }
        if let Some(t) = self.temperature {
            if !t.is_finite() || t < 0.0 {
                return Err(EngineError::invalid(format!(
                    "temperature must be finite and >= 0, got {t}"
                )));
            }
        }
        if let Some(p) = self.top_p {
            if !(p > 0.0 && p <= 1.0) {
                return Err(EngineError::invalid(format!("topP must be in (0, 1], got {p}")));
            }
        }
        Ok(())
    }

    /// Sampling parameters with config defaults filled in.
    pub fn sampling(&self, cfg: &EngineConfig) -> SamplingParams {
        SamplingParams {
            temperature: self.temperature.unwrap_or(cfg.default_temperature),
            top_k: self.top_k.or(cfg.default_top_k),
            top_p: self.top_p.or(cfg.default_top_p),
            seed: self.seed,
        }
    }

    /// Requested token budget clamped by `max_decode_tokens`.
    pub fn token_budget(&self, cfg: &EngineConfig) -> usize {
        let asked = self.max_tokens.unwrap_or(cfg.default_max_tokens).max(1);
        match cfg.max_decode_tokens {
            Some(cap) => asked.min(cap.max(1)),
            None => asked,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Eos,
    MaxTokens,
    StopSequence,
}

/// Result of a completed request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Generation {
    pub text: String,
    pub tokens_generated: usize,
    pub prompt_tokens: usize,
    pub finish: FinishReason,
    pub sparse_attention: bool,
    pub elapsed: Duration,
    pub tokens_per_second: f64,
}

/// Lifecycle of a single request. Terminal states accept no further transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Pending,
    Decoding,
    Completed,
    Cancelled,
    Failed,
}

impl RequestState {
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestState::Completed | RequestState::Cancelled | RequestState::Failed
        )
    }

    pub fn can_transition(self, next: RequestState) -> bool {
        use RequestState::*;
        match (self, next) {
            (Pending, Decoding) => true,
            // Validation/tokenize failures and an early cancel end a request before decoding.
            (Pending, Cancelled) | (Pending, Failed) => true,
            (Decoding, Completed) | (Decoding, Cancelled) | (Decoding, Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RequestState::Pending => "pending",
            RequestState::Decoding => "decoding",
            RequestState::Completed => "completed",
            RequestState::Cancelled => "cancelled",
            RequestState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Drives one request against one session. Built per call; the session state
/// lock is taken once per backend dispatch so management calls can interleave
/// at token boundaries.
pub(crate) struct Pipeline<'s, B: InferenceBackend> {
    slot: &'s SessionSlot<B>,
    config: &'s EngineConfig,
    cancel: CancelToken,
    sampler: Sampler,
    sparse: bool,
    budget: usize,
    stop: Vec<String>,
    eos: Token,
    state: RequestState,
    /// Controller revision last pushed to the backend.
    applied_revision: Option<u64>,
}

impl<'s, B: InferenceBackend> Pipeline<'s, B> {
    pub(crate) fn new(
        slot: &'s SessionSlot<B>,
        config: &'s EngineConfig,
        req: &GenerationRequest,
        cancel: CancelToken,
    ) -> Result<Self> {
        let (eos, caps) = slot.with_state(|st| Ok((st.backend.eos_token(), st.backend.capabilities())))?;
        let ctl = slot.controller.snapshot();

        let sparse = match req.use_sparse_attention {
            Some(on) => on,
            None => {
                ctl.prefer_sparse
                    || (slot.info.is_quantized() && slot.info.context_size > config.auto_sparse_context)
            }
        };
        if sparse && !caps.sparse_attention {
            debug!("backend does not advertise sparse attention; forwarding flag anyway");
        }

        Ok(Self {
            slot,
            config,
            cancel,
            sampler: Sampler::new(&req.sampling(config)),
            sparse,
            budget: req.token_budget(config),
            stop: req.stop.iter().filter(|s| !s.is_empty()).cloned().collect(),
            eos,
            state: RequestState::Pending,
            applied_revision: None,
        })
    }

    fn transition(&mut self, next: RequestState) {
        debug_assert!(
            self.state.can_transition(next),
            "illegal request transition {} -> {}",
            self.state,
            next
        );
        if self.state.can_transition(next) {
            debug!(from = %self.state, to = %next, "request state");
            self.state = next;
        }
    }

    #[inline]
    fn check_cancel(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(EngineError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Re-apply the controller's thread/batch settings if they changed since the
    /// last dispatch. Called with the state lock held, right before evaluating.
    fn sync_runtime(&mut self, backend: &mut B) -> Result<usize> {
        let snap = self.slot.controller.snapshot();
        if self.applied_revision != Some(snap.revision) {
            backend
                .configure(snap.runtime)
                .map_err(|e| EngineError::Generation(format!("configure: {e}")))?;
            debug!(
                threads = snap.runtime.threads,
                batch_size = snap.runtime.batch_size,
                revision = snap.revision,
                "runtime config applied"
            );
            self.applied_revision = Some(snap.revision);
        }
        Ok(snap.runtime.batch_size)
    }
}
