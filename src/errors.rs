//! Error types for the observability stores and the detection pipeline
//!
//! Each store family exposes its own error enum. Callers distinguish
//! failures by matching on the variant; transport variants wrap the
//! underlying cause so the chain stays inspectable via `source()`.

use thiserror::Error;

/// Errors surfaced by event store operations
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// Lookup by event id found nothing
    #[error("event not found: {0}")]
    EventNotFound(String),

    /// Strict run lookup found nothing
    #[error("run not found: {0}")]
    RunNotFound(String),

    /// A sequence number was already taken for the run
    #[error("sequence conflict for run {run_id} at sequence {sequence}")]
    SequenceConflict { run_id: String, sequence: u64 },

    /// Event failed validation before append
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    /// No snapshot has been saved for the run
    #[error("snapshot not found for run: {0}")]
    SnapshotNotFound(String),

    /// Backend unavailable; wraps the underlying cause
    #[error("connection failed")]
    ConnectionFailed(#[source] anyhow::Error),

    /// Operation exceeded its deadline or was cancelled
    #[error("operation timed out: {0}")]
    OperationTimeout(String),

    /// The subscription channel was closed
    #[error("subscription closed for run: {0}")]
    SubscriptionClosed(String),
}

/// Result type for event store operations
pub type EventStoreResult<T> = Result<T, EventStoreError>;

/// Errors surfaced by run store operations
#[derive(Debug, Error)]
pub enum RunStoreError {
    /// Lookup by run id found nothing
    #[error("run not found: {0}")]
    RunNotFound(String),

    /// Save attempted with an id that already exists
    #[error("run already exists: {0}")]
    RunExists(String),

    /// Run id failed validation
    #[error("invalid run id: {0}")]
    InvalidRunId(String),

    /// Reserved for backends that surface write conflicts
    #[error("concurrent update on run: {0}")]
    ConcurrentUpdate(String),

    /// Backend unavailable; wraps the underlying cause
    #[error("connection failed")]
    ConnectionFailed(#[source] anyhow::Error),

    /// Operation exceeded its deadline or was cancelled
    #[error("operation timed out: {0}")]
    OperationTimeout(String),
}

/// Result type for run store operations
pub type RunStoreResult<T> = Result<T, RunStoreError>;

/// Errors surfaced by pattern stores and detectors
#[derive(Debug, Error)]
pub enum PatternError {
    /// Lookup by pattern id found nothing
    #[error("pattern not found: {0}")]
    PatternNotFound(String),

    /// Save attempted with an id that already exists
    #[error("pattern already exists: {0}")]
    PatternExists(String),

    /// Pattern failed validation
    #[error("invalid pattern: {0}")]
    InvalidPattern(String),

    /// Unrecognized pattern type name
    #[error("invalid pattern type: {0}")]
    InvalidPatternType(String),

    /// Not enough corpus data for the requested analysis
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    /// Detection failed across every constituent detector
    #[error("detection failed: {0}")]
    DetectionFailed(String),

    /// Backend unavailable; wraps the underlying cause
    #[error("connection failed")]
    ConnectionFailed(#[source] anyhow::Error),

    /// Operation exceeded its deadline or was cancelled
    #[error("operation timed out: {0}")]
    OperationTimeout(String),
}

/// Result type for pattern operations
pub type PatternResult<T> = Result<T, PatternError>;

/// Errors surfaced by artifact store operations
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// Lookup by artifact ref found nothing
    #[error("artifact not found: {0}")]
    ArtifactNotFound(String),

    /// Artifact reference failed validation
    #[error("invalid artifact ref: {0}")]
    InvalidRef(String),

    /// Backend unavailable; wraps the underlying cause
    #[error("connection failed")]
    ConnectionFailed(#[source] anyhow::Error),

    /// Operation exceeded its deadline or was cancelled
    #[error("operation timed out: {0}")]
    OperationTimeout(String),
}

/// Result type for artifact store operations
pub type ArtifactResult<T> = Result<T, ArtifactError>;
