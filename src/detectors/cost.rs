//! Cost Anomaly Detection
//!
//! Computes per-run cost along each cost dimension, flags runs whose
//! z-score magnitude clears the deviation threshold, and labels the cost
//! trend across the window. Uniform cost never produces an anomaly:
//! zero variance means an empty result, not a division.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::detectors::{
    apply_options, clamp_confidence, load_corpus, mean, sample_std_dev, wants, PatternDetector,
    RunEvents,
};
use crate::errors::PatternResult;
use crate::event_store::EventStore;
use crate::events::{EventPayload, EventType};
use crate::patterns::{CostType, DetectionOptions, Pattern, PatternData, PatternType, TrendDirection};
use crate::run_store::RunStore;

/// Thresholds for cost anomaly detection
#[derive(Debug, Clone)]
pub struct CostAnomalyConfig {
    /// Minimum runs with data before statistics are attempted (default: 5)
    pub min_sample_size: usize,

    /// Z-score magnitude at which a run is flagged (default: 2.0)
    pub deviation_threshold: f64,

    /// |slope / mean| above which the trend is directional (default: 0.05)
    pub trend_threshold: f64,
}

impl Default for CostAnomalyConfig {
    fn default() -> Self {
        Self {
            min_sample_size: 5,
            deviation_threshold: 2.0,
            trend_threshold: 0.05,
        }
    }
}

/// Detects per-run cost outliers per cost dimension
pub struct CostAnomalyDetector {
    event_store: Arc<dyn EventStore>,
    run_store: Arc<dyn RunStore>,
    config: CostAnomalyConfig,
}

impl CostAnomalyDetector {
    /// Create a detector with default thresholds
    pub fn new(event_store: Arc<dyn EventStore>, run_store: Arc<dyn RunStore>) -> Self {
        Self::with_config(event_store, run_store, CostAnomalyConfig::default())
    }

    /// Create a detector with custom thresholds
    pub fn with_config(
        event_store: Arc<dyn EventStore>,
        run_store: Arc<dyn RunStore>,
        config: CostAnomalyConfig,
    ) -> Self {
        Self {
            event_store,
            run_store,
            config,
        }
    }

    /// Per-run cost along one dimension; `None` when the run carries no
    /// data for it
    fn run_cost(run: &RunEvents, cost_type: CostType) -> Option<f64> {
        match cost_type {
            CostType::ToolCalls => {
                let count = run
                    .events
                    .iter()
                    .filter(|e| e.event_type == EventType::ToolCalled)
                    .count();
                Some(count as f64)
            }
            CostType::Tokens => Self::budget_sum(run, "tokens"),
            CostType::ApiCalls => Self::budget_sum(run, "api_calls"),
        }
    }

    fn budget_sum(run: &RunEvents, budget_name: &str) -> Option<f64> {
        let mut total = 0i64;
        let mut seen = false;
        for event in &run.events {
            if event.event_type != EventType::BudgetConsumed {
                continue;
            }
            if let Ok(EventPayload::BudgetConsumed(p)) = event.decoded_payload() {
                if p.budget_name == budget_name {
                    total += p.amount;
                    seen = true;
                }
            }
        }
        seen.then_some(total as f64)
    }

    /// Least-squares slope of cost over run index, relative to the mean
    fn trend(costs: &[f64], average: f64, threshold: f64) -> TrendDirection {
        if costs.len() < 2 || average == 0.0 {
            return TrendDirection::Stable;
        }

        let n = costs.len() as f64;
        let mean_x = (n - 1.0) / 2.0;
        let mut numerator = 0.0;
        let mut denominator = 0.0;
        for (i, cost) in costs.iter().enumerate() {
            let dx = i as f64 - mean_x;
            numerator += dx * (cost - average);
            denominator += dx * dx;
        }
        if denominator == 0.0 {
            return TrendDirection::Stable;
        }

        let relative_slope = (numerator / denominator) / average;
        if relative_slope > threshold {
            TrendDirection::Increasing
        } else if relative_slope < -threshold {
            TrendDirection::Decreasing
        } else {
            TrendDirection::Stable
        }
    }
}

#[async_trait]
impl PatternDetector for CostAnomalyDetector {
    fn name(&self) -> &'static str {
        "cost_anomaly"
    }

    fn pattern_types(&self) -> Vec<PatternType> {
        vec![PatternType::CostAnomaly]
    }

    async fn detect(&self, options: &DetectionOptions) -> PatternResult<Vec<Pattern>> {
        if !wants(options, PatternType::CostAnomaly) {
            return Ok(Vec::new());
        }

        let corpus = load_corpus(self.event_store.as_ref(), self.run_store.as_ref(), options)
            .await?;

        let mut patterns = Vec::new();

        for cost_type in [CostType::ToolCalls, CostType::Tokens, CostType::ApiCalls] {
            // Corpus is start-time ordered, so index order is run order
            let samples: Vec<(&RunEvents, f64)> = corpus
                .iter()
                .filter_map(|run| Self::run_cost(run, cost_type).map(|cost| (run, cost)))
                .collect();

            if samples.len() < self.config.min_sample_size {
                continue;
            }

            let costs: Vec<f64> = samples.iter().map(|(_, c)| *c).collect();
            let average = mean(&costs);
            let std_dev = sample_std_dev(&costs);
            if std_dev == 0.0 {
                continue;
            }

            let flagged: Vec<(&RunEvents, f64, f64)> = samples
                .iter()
                .map(|(run, cost)| (*run, *cost, (cost - average) / std_dev))
                .filter(|(_, _, z)| z.abs() >= self.config.deviation_threshold)
                .collect();
            if flagged.is_empty() {
                continue;
            }

            let anomaly_cost = mean(&flagged.iter().map(|(_, c, _)| *c).collect::<Vec<_>>());
            let deviation = mean(&flagged.iter().map(|(_, _, z)| z.abs()).collect::<Vec<_>>());
            let trend = Self::trend(&costs, average, self.config.trend_threshold);

            let mut pattern = Pattern::new(
                format!("Cost anomaly: {cost_type}"),
                format!(
                    "{} of {} runs deviate from the mean {} cost",
                    flagged.len(),
                    samples.len(),
                    cost_type
                ),
                PatternData::CostAnomaly {
                    cost_type,
                    average_cost: average,
                    anomaly_cost,
                    deviation,
                    anomaly_count: flagged.len() as u64,
                    trend,
                },
            );

            for (run, cost, z) in &flagged {
                pattern.add_evidence(
                    run.run_id.clone(),
                    run.start_time,
                    json!({ "cost": cost, "z_score": z }),
                );
            }

            pattern.confidence =
                clamp_confidence(0.5 + 0.15 * (deviation - self.config.deviation_threshold));
            patterns.push(pattern);
        }

        debug!(patterns = patterns.len(), "cost anomaly detection finished");
        Ok(apply_options(patterns, options))
    }
}
