//! Error types for devhost
//!
//! Every fatal condition in the supervisor ends up as one of these variants.
//! The `Display` output carries the captured diagnostic text, so callers can
//! surface it to the operator verbatim.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// devhost error type
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration
    // ========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // Start sequence
    // ========================================================================
    /// Missing tool or occupied required port. Nothing has been spawned yet.
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// Checkout could not be materialized
    #[error("Setup failed: {0}")]
    Setup(String),

    /// Dependency installation exhausted its attempts
    #[error("Install failed: {0}")]
    Install(String),

    /// The supervised process exited while it was expected to be running
    #[error("{message}\n{diagnostics}")]
    Crashed { message: String, diagnostics: String },

    /// The required readiness phase never succeeded
    #[error("Readiness check failed: {0}")]
    Readiness(String),

    /// Spawning or signalling the supervised process failed
    #[error("Process error: {0}")]
    Process(String),

    // ========================================================================
    // External error conversions
    // ========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(String),
}

impl Error {
    /// Whether the failure happened before any process was spawned
    pub fn is_precondition(&self) -> bool {
        matches!(self, Error::Precondition(_))
    }

    /// Crash helper
    pub fn crashed(message: impl Into<String>, diagnostics: impl Into<String>) -> Self {
        Error::Crashed {
            message: message.into(),
            diagnostics: diagnostics.into(),
        }
    }
}
