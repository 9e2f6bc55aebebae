//! Error types for the leakscope-core crate.

use thiserror::Error;

/// Top-level error type for campaign, dataset, evaluation and baseline operations.
#[derive(Debug, Error)]
pub enum LeakError {
    /// A trial did not complete cleanly. Recorded, never fatal to a campaign.
    #[error("Sandbox failure in trial {trial}: {reason}")]
    SandboxFailure { trial: String, reason: String },

    #[error("Schema mismatch: expected {expected:?}, found {found:?}")]
    SchemaMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("Insufficient data for {what}: {reason}")]
    InsufficientData { what: String, reason: String },

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("View pools {0} distinct resource-limit configurations")]
    MixedResourceLimits(usize),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl LeakError {
    pub fn sandbox(trial: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SandboxFailure {
            trial: trial.into(),
            reason: reason.into(),
        }
    }

    pub fn insufficient(what: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InsufficientData {
            what: what.into(),
            reason: reason.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn invalid_record(msg: impl Into<String>) -> Self {
        Self::InvalidRecord(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Whether this error only marks a combination as unavailable rather than
    /// aborting the surrounding analysis.
    pub fn is_insufficient_data(&self) -> bool {
        matches!(self, Self::InsufficientData { .. })
    }
}
