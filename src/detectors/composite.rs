//! Composite Detection
//!
//! Fans one detection request out to every constituent detector, merges
//! the results, ranks them, and bounds the list. Aggregation is
//! best-effort: a failing constituent is ignored as long as at least one
//! sibling succeeds; only total failure surfaces an error.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, warn};

use crate::detectors::{
    ApprovalDelayDetector, BudgetExhaustionDetector, CostAnomalyDetector, FailureDetector,
    LoopDetector, PatternDetector, PerformanceDetector, SequenceDetector, TimeoutDetector,
    ToolPreferenceDetector,
};
use crate::errors::{PatternError, PatternResult};
use crate::event_store::EventStore;
use crate::patterns::{DetectionOptions, Pattern, PatternType};
use crate::run_store::RunStore;

/// Fans out to constituent detectors and merges their results
///
/// Constituents are assembled explicitly, at construction or via
/// [`add_detector`](Self::add_detector), never discovered. Callers
/// serialize configuration changes against concurrent detection.
pub struct CompositeDetector {
    detectors: Vec<Arc<dyn PatternDetector>>,
}

impl CompositeDetector {
    /// Create a composite over an explicit constituent list
    pub fn new(detectors: Vec<Arc<dyn PatternDetector>>) -> Self {
        Self { detectors }
    }

    /// Create a composite wired with every built-in detector
    pub fn with_default_detectors(
        event_store: Arc<dyn EventStore>,
        run_store: Arc<dyn RunStore>,
    ) -> Self {
        let detectors: Vec<Arc<dyn PatternDetector>> = vec![
            Arc::new(SequenceDetector::new(event_store.clone(), run_store.clone())),
            Arc::new(LoopDetector::new(event_store.clone(), run_store.clone())),
            Arc::new(FailureDetector::new(event_store.clone(), run_store.clone())),
            Arc::new(PerformanceDetector::new(
                event_store.clone(),
                run_store.clone(),
            )),
            Arc::new(TimeoutDetector::new(event_store.clone(), run_store.clone())),
            Arc::new(CostAnomalyDetector::new(
                event_store.clone(),
                run_store.clone(),
            )),
            Arc::new(ApprovalDelayDetector::new(
                event_store.clone(),
                run_store.clone(),
            )),
            Arc::new(ToolPreferenceDetector::new(
                event_store.clone(),
                run_store.clone(),
            )),
            Arc::new(BudgetExhaustionDetector::new(event_store, run_store)),
        ];
        Self::new(detectors)
    }

    /// Append a constituent detector
    pub fn add_detector(&mut self, detector: Arc<dyn PatternDetector>) {
        self.detectors.push(detector);
    }

    /// Number of constituent detectors
    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    /// Whether the composite has no constituents
    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }
}

#[async_trait]
impl PatternDetector for CompositeDetector {
    fn name(&self) -> &'static str {
        "composite"
    }

    fn pattern_types(&self) -> Vec<PatternType> {
        let mut types = Vec::new();
        for detector in &self.detectors {
            for pattern_type in detector.pattern_types() {
                if !types.contains(&pattern_type) {
                    types.push(pattern_type);
                }
            }
        }
        types
    }

    async fn detect(&self, options: &DetectionOptions) -> PatternResult<Vec<Pattern>> {
        let selected: Vec<&Arc<dyn PatternDetector>> = self
            .detectors
            .iter()
            .filter(|d| {
                options.pattern_types.is_empty()
                    || d.pattern_types()
                        .iter()
                        .any(|t| options.pattern_types.contains(t))
            })
            .collect();

        if selected.is_empty() {
            return Ok(Vec::new());
        }

        let results = join_all(selected.iter().map(|d| d.detect(options))).await;

        let mut patterns = Vec::new();
        let mut failures = Vec::new();
        for (detector, result) in selected.iter().zip(results) {
            match result {
                Ok(found) => patterns.extend(found),
                Err(e) => {
                    warn!(detector = detector.name(), error = %e, "constituent detector failed");
                    failures.push(format!("{}: {e}", detector.name()));
                }
            }
        }

        if patterns.is_empty() && failures.len() == selected.len() {
            return Err(PatternError::DetectionFailed(failures.join("; ")));
        }

        patterns.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.frequency.cmp(&a.frequency))
        });

        if options.limit > 0 {
            patterns.truncate(options.limit);
        }

        debug!(
            patterns = patterns.len(),
            constituents = selected.len(),
            failed = failures.len(),
            "composite detection finished"
        );
        Ok(patterns)
    }
}
