//! Error types for the ironloop domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Only setup-time misconfiguration and exhausted backends surface as
//! `Error`; anything the model must read comes back as text instead.

use thiserror::Error;

/// The top-level error type for all ironloop operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// The backend kept failing after every retry.
    #[error("Model unavailable after {attempts} attempts: {source}")]
    ModelUnavailable {
        attempts: u32,
        #[source]
        source: ProviderError,
    },

    // --- Command errors ---
    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Configuration errors abort the process; everything else is recoverable.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Config { .. })
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Command not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    ExecutionFailed(String),

    #[error("missing required argument '{0}'")]
    MissingArgument(String),

    #[error("Invalid command arguments: {0}")]
    InvalidArguments(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("{0}")]
    Io(#[from] std::io::Error),
}
