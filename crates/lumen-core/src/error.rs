use thiserror::Error;

/// Failure kinds surfaced by the engine. Management calls degrade to no-ops
/// instead of returning most of these; compute calls report them precisely.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("model load failed: {0}")]
    ModelLoad(String),

    #[error("no model loaded")]
    NoModelLoaded,

    #[error("a generation is already running on this session")]
    SessionBusy,

    #[error("generation failed: {0}")]
    Generation(String),

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("generation cancelled")]
    Cancelled,
}

impl EngineError {
    pub fn invalid<S: Into<String>>(msg: S) -> Self {
        EngineError::InvalidArgument(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
