//! Lumen inference session engine: model lifecycle, bounded KV cache,
//! generation pipeline and adaptive performance control above an opaque
//! `InferenceBackend`.

pub mod cancel;
pub mod config;
pub mod engine;
pub mod error;
pub mod kv;
pub mod perf;
pub mod session;

pub use cancel::{CancelOnDrop, CancelToken};
pub use config::EngineConfig;
pub use engine::{FinishReason, Generation, GenerationRequest, RequestState};
pub use error::{EngineError, Result};
pub use kv::{EvictionPolicy, KvCache};
pub use perf::{PerformanceController, PerformanceMetrics, PerformanceMode};
pub use session::{CacheSize, LoadOptions, SessionHandle, SessionInfo, SessionManager, SessionStatus};

pub use lumen_abi as abi;
