//! Pattern Detection Pipeline
//!
//! Detectors scan the event/run corpus and produce typed patterns with
//! confidence scores and supporting evidence. Each detector is stateless
//! between invocations (all analysis state lives on the call stack) and
//! safe for concurrent use.
//!
//! # Pipeline Shape
//!
//! ```text
//! EventStore ─┐
//!             ├─ load corpus ─→ per-family analysis ─→ Vec<Pattern>
//! RunStore  ──┘
//! ```
//!
//! The [`CompositeDetector`](composite::CompositeDetector) is the primary
//! entry point; the individual detectors are its constituents and are
//! assembled explicitly at wiring time; there is no registry.
//!
//! # Shared Conventions
//!
//! - Insufficient samples yield an empty result, never an error
//! - Confidence is clamped to [0.3, 0.95] unless a detector states
//!   otherwise; 0 is reserved for "no data"
//! - Count-based ties break deterministically in first-seen order
//! - Zero-variance data produces no anomalies

use chrono::{DateTime, Utc};

use crate::errors::PatternResult;
use crate::event_store::{EventQuery as _, EventStore};
use crate::events::Event;
use crate::patterns::{DetectionOptions, Pattern, PatternType};
use crate::run_store::{RunFilter, RunStore};

pub mod approval;
pub mod budget;
pub mod composite;
pub mod cost;
pub mod failure;
pub mod loops;
pub mod performance;
pub mod preference;
pub mod sequence;
pub mod timeout;

pub use approval::{ApprovalDelayConfig, ApprovalDelayDetector};
pub use budget::{BudgetExhaustionConfig, BudgetExhaustionDetector};
pub use composite::CompositeDetector;
pub use cost::{CostAnomalyConfig, CostAnomalyDetector};
pub use failure::{FailureConfig, FailureDetector};
pub use loops::{LoopConfig, LoopDetector};
pub use performance::{PerformanceConfig, PerformanceDetector};
pub use preference::{ToolPreferenceConfig, ToolPreferenceDetector};
pub use sequence::{SequenceConfig, SequenceDetector};
pub use timeout::{TimeoutConfig, TimeoutDetector};

/// Detector contract
///
/// `detect` scans the corpus under the supplied options; `pattern_types`
/// is the closed set of types the detector can produce.
#[async_trait::async_trait]
pub trait PatternDetector: Send + Sync {
    /// Human-readable detector name, used in logs and aggregated errors
    fn name(&self) -> &'static str;

    /// Pattern types this detector can produce
    fn pattern_types(&self) -> Vec<PatternType>;

    /// Scan the corpus and return detected patterns
    async fn detect(&self, options: &DetectionOptions) -> PatternResult<Vec<Pattern>>;
}

/// One run's slice of the corpus
#[derive(Debug, Clone)]
pub struct RunEvents {
    /// Run the events belong to
    pub run_id: String,

    /// Run start, used for windowing and trend ordering
    pub start_time: DateTime<Utc>,

    /// The run's events in sequence order
    pub events: Vec<Event>,
}

/// Resolve the runs under analysis and load their events
///
/// Explicit `run_ids` restrict the corpus and intersect the time window;
/// otherwise the window alone selects runs from the run store. When the
/// run store knows nothing (producers that only write events), the event
/// store's run listing is the fallback. Results are ordered by run start
/// time so index-based trends are well-defined.
pub(crate) async fn load_corpus(
    event_store: &dyn EventStore,
    run_store: &dyn RunStore,
    options: &DetectionOptions,
) -> PatternResult<Vec<RunEvents>> {
    let mut corpus = Vec::new();

    if !options.run_ids.is_empty() {
        for run_id in &options.run_ids {
            let events = event_store
                .load_events(run_id)
                .await
                .map_err(|e| crate::errors::PatternError::ConnectionFailed(anyhow::Error::new(e)))?;

            let start_time = match run_store.get(run_id).await {
                Ok(run) => run.start_time,
                Err(_) => match events.first() {
                    Some(first) => first.timestamp,
                    None => continue,
                },
            };

            if in_window(start_time, options) {
                corpus.push(RunEvents {
                    run_id: run_id.clone(),
                    start_time,
                    events,
                });
            }
        }
    } else {
        let filter = RunFilter {
            started_after: options.from_time,
            started_before: options.to_time,
            ..Default::default()
        };

        let runs = run_store
            .list(&filter)
            .await
            .map_err(|e| crate::errors::PatternError::ConnectionFailed(anyhow::Error::new(e)))?;

        if runs.is_empty() {
            if let Some(query) = event_store.as_query() {
                let run_ids = query.list_runs().await.map_err(|e| {
                    crate::errors::PatternError::ConnectionFailed(anyhow::Error::new(e))
                })?;

                for run_id in run_ids {
                    let events = event_store.load_events(&run_id).await.map_err(|e| {
                        crate::errors::PatternError::ConnectionFailed(anyhow::Error::new(e))
                    })?;
                    let Some(first) = events.first() else {
                        continue;
                    };
                    let start_time = first.timestamp;
                    if in_window(start_time, options) {
                        corpus.push(RunEvents {
                            run_id,
                            start_time,
                            events,
                        });
                    }
                }
            }
        } else {
            for run in runs {
                let events = event_store.load_events(&run.id).await.map_err(|e| {
                    crate::errors::PatternError::ConnectionFailed(anyhow::Error::new(e))
                })?;
                corpus.push(RunEvents {
                    run_id: run.id,
                    start_time: run.start_time,
                    events,
                });
            }
        }
    }

    corpus.sort_by_key(|r| r.start_time);
    Ok(corpus)
}

fn in_window(start_time: DateTime<Utc>, options: &DetectionOptions) -> bool {
    if let Some(from) = options.from_time {
        if start_time < from {
            return false;
        }
    }
    if let Some(to) = options.to_time {
        if start_time > to {
            return false;
        }
    }
    true
}

/// Whether the options ask for this pattern type
pub(crate) fn wants(options: &DetectionOptions, pattern_type: PatternType) -> bool {
    options.pattern_types.is_empty() || options.pattern_types.contains(&pattern_type)
}

/// Apply the uniform post-filters: min_confidence, min_frequency, limit
pub(crate) fn apply_options(
    mut patterns: Vec<Pattern>,
    options: &DetectionOptions,
) -> Vec<Pattern> {
    if options.min_confidence > 0.0 {
        patterns.retain(|p| p.confidence >= options.min_confidence);
    }
    if options.min_frequency > 0 {
        patterns.retain(|p| p.frequency >= options.min_frequency);
    }
    if options.limit > 0 {
        patterns.truncate(options.limit);
    }
    patterns
}

/// Clamp a raw confidence score to the standard [0.3, 0.95] band
pub(crate) fn clamp_confidence(raw: f64) -> f64 {
    raw.clamp(0.3, 0.95)
}

/// Arithmetic mean; 0 for an empty slice
pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n − 1); 0 below two samples
pub(crate) fn sample_std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance =
        values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

/// Nearest-rank percentile over an ascending-sorted slice; 0 when empty
pub(crate) fn percentile(sorted: &[i64], pct: f64) -> i64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// Nanoseconds between two instants, saturating
pub(crate) fn nanos_between(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (to - from).num_nanoseconds().unwrap_or(i64::MAX)
}
