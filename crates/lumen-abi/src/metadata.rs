//! Backend-agnostic model metadata.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Minimal, normalized view the engine expects from any backend once a model is mapped.
/// Backends can park extra info under `raw`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelCoreInfo {
    /// Display name if known (e.g., "Qwen3 1.7B Instruct").
    pub name: Option<String>,
    /// Family / architecture hint (e.g., "llama", "qwen3", "phi3").
    pub family: Option<String>,
    /// Which backend produced this (e.g., "llama", "mlx").
    pub backend: String,

    pub path: PathBuf,

    /// Context length the weights were trained for, if known.
    pub context_length: Option<u32>,
    pub vocab_size: Option<u32>,
    /// Width of vectors returned by `embed`, if the model supports embeddings.
    pub embedding_dim: Option<u32>,

    pub eos_token_id: Option<i32>,
    pub bos_token_id: Option<i32>,

    /// Quantization label if known (e.g., "Q8_0", "Q5_K_M", "fp16").
    pub quantization: Option<String>,

    #[serde(default)]
    pub raw: HashMap<String, String>,
}
