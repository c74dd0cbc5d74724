use thiserror::Error;

/// Canonical error type for profile, threshold and configuration handling.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Stage profile violates its invariants.
    #[error("invalid stage profile: {message}")]
    InvalidProfile {
        /// Human-readable explanation of the violation.
        message: String,
    },

    /// Threshold expression or metric selector could not be parsed.
    #[error("invalid threshold `{expression}`: {message}")]
    InvalidThreshold {
        /// The offending expression as written by the user.
        expression: String,
        /// What is wrong with it.
        message: String,
    },

    /// Duration literal could not be parsed (e.g. `"30x"`).
    #[error("invalid duration `{0}`")]
    InvalidDuration(String),

    /// Configuration could not be loaded or failed validation.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// I/O error while writing reports or reading files.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error occurred.
    #[error("serialization error: {0}")]
    SerializationError(String),
}

impl CoreError {
    /// Creates an `InvalidProfile` variant.
    #[must_use]
    pub fn invalid_profile(message: impl Into<String>) -> Self {
        Self::InvalidProfile {
            message: message.into(),
        }
    }

    /// Creates an `InvalidThreshold` variant.
    #[must_use]
    pub fn invalid_threshold(expression: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidThreshold {
            expression: expression.into(),
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

/// Convenient result alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
