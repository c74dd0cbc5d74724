use thiserror::Error;

/// Errors building the HTTP client or a request.
///
/// Failed calls are not errors: they come back as a response with status 0.
#[derive(Debug, Error)]
pub enum HttpError {
    /// The underlying client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    /// A base URL or path could not be turned into a request URL.
    #[error("invalid URL `{url}`: {message}")]
    InvalidUrl { url: String, message: String },

    /// Request body could not be serialized.
    #[error("failed to encode request body: {0}")]
    Body(#[from] serde_json::Error),
}

/// Convenient result alias for HTTP operations.
pub type HttpResult<T> = Result<T, HttpError>;
