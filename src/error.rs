use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the ingestion pipeline
#[derive(Error, Debug)]
pub enum IngestError {
    /// Invalid or missing configuration, raised before any I/O
    #[error("Configuration error: {0}")]
    Config(String),

    /// A date flag that is not a real `YYYY-MM-DD` calendar date
    #[error("{flag} must be YYYY-MM-DD (got {value})")]
    InvalidDate { flag: String, value: String },

    /// The acquisition tool exited unsuccessfully without a rate-limit signature
    #[error("{tool} exited with code {code}")]
    Acquisition { tool: String, code: String },

    /// The acquisition tool could not be started
    #[error("Failed to spawn {tool}: {source}")]
    ToolSpawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    /// Generation backend exhausted its attempts for a single item
    #[error("Extraction failed after retries: {0}")]
    Extraction(String),

    /// Generation backend could not be constructed or reached
    #[error("Backend error: {0}")]
    Backend(String),

    /// Credential required by the configured backend is absent
    #[error("Missing {0} in environment (set in .env).")]
    MissingCredential(String),

    /// A per-item state change that skips or reverses a stage
    #[error("Invalid transition for {video_code}: {from} -> {to}")]
    InvalidTransition {
        video_code: String,
        from: String,
        to: String,
    },

    /// Production dataset has an unexpected shape
    #[error("Invalid dataset at {path}: {reason}")]
    Dataset { path: PathBuf, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, IngestError>;

impl IngestError {
    /// Per-item errors are recorded in side-channel artifacts; everything else halts the run
    pub fn is_recoverable(&self) -> bool {
        matches!(self, IngestError::Extraction(_))
    }
}
