//! Observability and analytics core for autonomous agent runtimes
//!
//! Agents execute goal-directed runs that move through operational
//! states, invoke tools, request approvals, and consume bounded
//! resources. This crate persists every externally meaningful action as
//! an immutable event, reconstructs run state from those events, streams
//! live events to subscribers, and mines the accumulated corpus for
//! recurring behavioral, failure, performance, cost, and bottleneck
//! patterns.
//!
//! # Architecture
//!
//! ```text
//! producer ──► Event Store ──► Subscribers (bounded channels)
//!                  │
//!              Run Store ──► filtered listing / summaries
//!                  │
//!         Pattern Detectors ──► Composite Detector ──► ranked patterns
//! ```
//!
//! # Modules
//!
//! - [`events`] - Event types, the typed payload codec, snapshots
//! - [`event_store`] - Append-only per-run log contract + in-memory store
//! - [`run_store`] - Run aggregates, lifecycle, queryable catalog
//! - [`patterns`] - Pattern model, detection options, pattern store
//! - [`detectors`] - The nine detectors and the composite entry point
//! - [`artifacts`] - Opaque large-payload storage contract
//! - [`errors`] - Error taxonomy, one enum per store family
//! - [`subjects`], [`nats`] - Live NATS streaming adapter (feature `nats`)
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use agent_observability::detectors::{CompositeDetector, PatternDetector};
//! use agent_observability::event_store::InMemoryEventStore;
//! use agent_observability::patterns::DetectionOptions;
//! use agent_observability::run_store::InMemoryRunStore;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let events = Arc::new(InMemoryEventStore::new());
//!     let runs = Arc::new(InMemoryRunStore::new());
//!
//!     let detector = CompositeDetector::with_default_detectors(events, runs);
//!     let patterns = detector.detect(&DetectionOptions::default()).await?;
//!     assert!(patterns.is_empty());
//!
//!     Ok(())
//! }
//! ```

// Core modules
pub mod artifacts;
pub mod detectors;
pub mod errors;
pub mod event_store;
pub mod events;
pub mod patterns;
pub mod run_store;

// Streaming adapter (feature-gated)
#[cfg(feature = "nats")]
pub mod nats;
#[cfg(feature = "nats")]
pub mod subjects;

// Re-export commonly used types
pub use artifacts::{ArtifactRef, ArtifactStore, InMemoryArtifactStore, StoreOptions};
pub use detectors::{CompositeDetector, PatternDetector};
pub use errors::{
    ArtifactError, ArtifactResult, EventStoreError, EventStoreResult, PatternError,
    PatternResult, RunStoreError, RunStoreResult,
};
pub use event_store::{
    EventPruning, EventQuery, EventStore, EventSubscription, InMemoryEventStore,
    MemoryStoreConfig, SnapshotStore,
};
pub use events::{Event, EventPayload, EventType, QueryOptions, Snapshot};
pub use patterns::{
    DetectionOptions, InMemoryPatternStore, Pattern, PatternData, PatternEvidence, PatternFilter,
    PatternStore, PatternType,
};
pub use run_store::{
    InMemoryRunStore, Run, RunFilter, RunOrder, RunStatus, RunStore, RunSummary,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
