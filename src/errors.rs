use thiserror::Error;

/// Top-level application error shared by the server, the invoker and the client session.
/// All variants carry a human-readable message for display/logging.
#[derive(Debug, Error)]
pub enum AppError {
    // ── Transport errors ─────────────────────────────────────────────────────
    #[error("Stream unavailable: {message}")]
    StreamUnavailable { message: String },

    // ── Configuration errors ─────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    // ── Upstream (AI provider) errors ────────────────────────────────────────
    #[error("Upstream service unavailable at {host}")]
    UpstreamUnavailable { host: String },

    #[error("Model '{model_name}' not found upstream")]
    ModelNotFound { model_name: String },

    #[error("Inference error: {message}")]
    InferenceError { message: String },

    // ── Validation errors ────────────────────────────────────────────────────
    #[error("Field '{field_name}' cannot be empty")]
    EmptyField { field_name: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    // ── System errors ────────────────────────────────────────────────────────
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn stream_unavailable(message: impl Into<String>) -> Self {
        AppError::StreamUnavailable { message: message.into() }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        AppError::Configuration { message: message.into() }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        AppError::InvalidRequest { message: message.into() }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, AppError::EmptyField { .. } | AppError::InvalidRequest { .. })
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, AppError::Configuration { .. })
    }

    pub fn is_upstream_unavailable(&self) -> bool {
        matches!(self, AppError::UpstreamUnavailable { .. } | AppError::StreamUnavailable { .. })
    }
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        AppError::stream_unavailable(e.to_string())
    }
}
