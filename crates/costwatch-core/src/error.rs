//! Error taxonomy for the pipeline
//!
//! Every error is handled inside the cycle that produced it; nothing here is
//! fatal to the process. Startup configuration errors live in the binary.

use std::time::Duration;
use thiserror::Error;

/// Errors raised by the snapshot store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Store operation exceeded its deadline
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    /// Persisted row could not be mapped back to a model
    #[error("invalid data: {0}")]
    InvalidData(String),
}

/// Errors raised by the control-plane and metrics sources
#[derive(Debug, Error)]
pub enum SourceError {
    /// Kubernetes API request failed
    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),

    /// Source call exceeded its deadline
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Resource quantity could not be parsed
    #[error("invalid quantity {0:?}")]
    InvalidQuantity(String),

    /// Source answered but the payload was unusable
    #[error("{0}")]
    Other(String),
}

/// Per-cycle errors of the collector and calculator
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Control plane unreachable; the collector cycle aborts before writing
    #[error("control-plane source unavailable: {0}")]
    SourceUnavailable(String),

    /// Metrics source unreachable or empty; usage is skipped for the cycle
    #[error("metrics source unavailable: {0}")]
    MetricsUnavailable(String),

    /// A store write failed; remaining steps of the cycle are aborted
    #[error("store write failed: {0}")]
    StoreWriteFailed(#[source] StoreError),

    /// A group had missing or invalid rate inputs and was skipped
    #[error("invalid data for group {namespace}/{}: {reason}", .deployment.as_deref().unwrap_or("*"))]
    InvalidGroupData {
        namespace: String,
        deployment: Option<String>,
        reason: String,
    },
}

impl PipelineError {
    /// Short label used for metrics and structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::SourceUnavailable(_) => "source_unavailable",
            PipelineError::MetricsUnavailable(_) => "metrics_unavailable",
            PipelineError::StoreWriteFailed(_) => "store_write_failed",
            PipelineError::InvalidGroupData { .. } => "invalid_group_data",
        }
    }
}
