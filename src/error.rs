//! Error handling module for installflow
//!
//! Only conditions that stop the engine from starting are errors. Merge and
//! selection problems are logged anomalies and never surface here.

use thiserror::Error;

/// Main error type for the workflow engine
#[derive(Error, Debug)]
pub enum WorkflowError {
    /// IO errors (reading control documents, recovery marker)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Base control document missing or malformed
    #[error("Control document error: {0}")]
    ControlDocument(String),

    /// Add-on control document malformed
    #[error("Add-on error: {0}")]
    Addon(String),

    /// Recovery marker could not be written or removed
    #[error("Recovery marker error: {0}")]
    Recovery(String),

    /// Executor invoked with arguments it cannot honour
    #[error("Execution error: {0}")]
    Execution(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for workflow engine operations
pub type Result<T> = std::result::Result<T, WorkflowError>;

impl WorkflowError {
    /// Create a control document error
    pub fn control_document(msg: impl Into<String>) -> Self {
        Self::ControlDocument(msg.into())
    }

    /// Create an add-on error
    pub fn addon(msg: impl Into<String>) -> Self {
        Self::Addon(msg.into())
    }

    /// Create a recovery marker error
    pub fn recovery(msg: impl Into<String>) -> Self {
        Self::Recovery(msg.into())
    }

    /// Create an execution error
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }
}
