use stampede_core::CoreError;
use thiserror::Error;

/// Errors raised while preparing or reporting a run.
///
/// Faults inside a run (setup failures, iteration errors, threshold breaches)
/// are not errors: they are folded into the run summary.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid configuration, profile or threshold.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A background task panicked or was cancelled by the runtime.
    #[error("task failed: {0}")]
    Task(String),

    /// Report could not be written.
    #[error("report I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Report could not be serialized.
    #[error("report serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<tokio::task::JoinError> for EngineError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}

/// Convenient result alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
