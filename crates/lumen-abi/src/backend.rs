use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::cache::{CacheEntry, CacheView};
use crate::metadata::ModelCoreInfo;
use crate::token::{Logits, Token};

/// Opaque failure reported by a backend. The engine maps it onto its own taxonomy
/// depending on which operation was running.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct BackendError(pub String);

impl From<String> for BackendError {
    fn from(s: String) -> Self {
        BackendError(s)
    }
}

impl From<&str> for BackendError {
    fn from(s: &str) -> Self {
        BackendError(s.to_string())
    }
}

/// Everything a backend needs to map a model and size its attention state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadParams {
    pub model_path: PathBuf,
    /// Quantization label, "none" for full precision weights.
    pub quantization: String,
    /// Maximum number of cache entries the engine will ever present in one evaluation.
    pub context_size: usize,
    pub thread_count: usize,
}

/// Thread/batch configuration applied by the performance controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub threads: usize,
    pub batch_size: usize,
}

/// One forward pass: condition on `history`, append `pending`, return logits
/// for the token following the last pending entry.
#[derive(Debug, Clone, Copy)]
pub struct EvalRequest<'a> {
    pub history: CacheView<'a>,
    pub pending: &'a [CacheEntry],
    /// Restrict attention to a reduced window. Fixed for the whole request.
    pub sparse_attention: bool,
}

/// Optional features a backend can advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendCapabilities {
    pub sparse_attention: bool,
    pub embeddings: bool,
}

impl Default for BackendCapabilities {
    fn default() -> Self {
        Self {
            sparse_attention: false,
            embeddings: true,
        }
    }
}

/// Backend-agnostic numerical inference capability. The engine never looks
/// inside; it only drives these primitives.
pub trait InferenceBackend: Send {
    fn load(params: &LoadParams) -> Result<Self, BackendError>
    where
        Self: Sized;

    fn tokenize(&self, text: &str) -> Result<Vec<Token>, BackendError>;

    fn evaluate(&mut self, req: &EvalRequest<'_>) -> Result<Logits, BackendError>;

    /// Embedding vector for `text`. Must not touch conversational attention state.
    fn embed(&mut self, text: &str) -> Result<Vec<f32>, BackendError>;

    /// Decode a single token ID into a UTF-8 fragment.
    fn decode_token(&self, token: Token) -> Result<String, BackendError>;

    /// Model’s EOS token.
    fn eos_token(&self) -> Token;

    // ========== OPTIONAL HOOKS ==========

    fn model_info(&self) -> ModelCoreInfo {
        ModelCoreInfo::default()
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::default()
    }

    /// Apply a new thread/batch configuration before the next dispatch.
    fn configure(&mut self, _cfg: RuntimeConfig) -> Result<(), BackendError> {
        Ok(())
    }

    /// Forget all attention state while keeping the model mapped.
    fn reset(&mut self) {}

    /// Resident memory attributable to the model + state, if known.
    fn memory_usage_bytes(&self) -> Option<u64> {
        None
    }

    /// Detokenize to UTF-8 bytes (override with a native detokenizer if available).
    fn detokenize(&self, tokens: &[Token]) -> Result<Vec<u8>, BackendError> {
        let mut s = String::new();
        for tok in tokens {
            s.push_str(
                &self
                    .decode_token(*tok)
                    .map_err(|e| BackendError(format!("fallback detok: {e}")))?,
            );
        }
        Ok(s.into_bytes())
    }
}
