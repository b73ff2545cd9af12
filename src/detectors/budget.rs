//! Budget Exhaustion Detection
//!
//! Per-budget statistics over consumption and exhaustion events: how
//! often a budget runs out, how often runs get close (near misses), how
//! usage trends over time, and what an operator should do about it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::debug;

use crate::detectors::{apply_options, load_corpus, mean, wants, PatternDetector};
use crate::errors::PatternResult;
use crate::event_store::EventStore;
use crate::events::{EventPayload, EventType};
use crate::patterns::{DetectionOptions, Pattern, PatternData, PatternType, TrendDirection};
use crate::run_store::RunStore;

/// Thresholds for budget exhaustion detection
#[derive(Debug, Clone)]
pub struct BudgetExhaustionConfig {
    /// Usage ratio at or above which an unexhausted run counts as a near
    /// miss (default: 0.8)
    pub warning_ratio: f64,

    /// Minimum exhaustion events before a budget becomes a pattern
    /// (default: 1)
    pub min_exhaustions: usize,

    /// Near misses at or above which the recommendation escalates
    /// (default: 3)
    pub near_miss_alert: u64,
}

impl Default for BudgetExhaustionConfig {
    fn default() -> Self {
        Self {
            warning_ratio: 0.8,
            min_exhaustions: 1,
            near_miss_alert: 3,
        }
    }
}

/// Exhaustion frequency trend from inter-arrival gaps
///
/// Needs at least four exhaustions; the mean gap of the second half is
/// compared against the first. Shrinking gaps mean exhaustions are
/// arriving faster.
fn exhaustion_trend(timestamps: &[DateTime<Utc>]) -> TrendDirection {
    if timestamps.len() < 4 {
        return TrendDirection::Stable;
    }

    let gaps: Vec<f64> = timestamps
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).num_milliseconds() as f64)
        .collect();

    let half = gaps.len() / 2;
    let first = mean(&gaps[..half]);
    let second = mean(&gaps[half..]);
    if first <= 0.0 {
        return TrendDirection::Stable;
    }

    let ratio = second / first;
    if ratio < 0.7 {
        TrendDirection::Increasing
    } else if ratio > 1.3 {
        TrendDirection::Decreasing
    } else {
        TrendDirection::Stable
    }
}

/// Operator recommendation from the exhaustion decision table
fn recommend(
    budget_name: &str,
    exhaustion_rate: f64,
    trend: TrendDirection,
    near_miss_count: u64,
    near_miss_alert: u64,
) -> String {
    if exhaustion_rate >= 0.5 {
        format!("increase the {budget_name} budget limit or reduce per-run consumption")
    } else if trend == TrendDirection::Increasing {
        format!("{budget_name} exhaustions are accelerating; review recent configuration changes")
    } else if near_miss_count >= near_miss_alert {
        format!("consumption is pressing the {budget_name} limit; consider raising it")
    } else {
        format!("monitor {budget_name} consumption")
    }
}

#[derive(Default)]
struct BudgetStats {
    /// Exhaustion events as (run_id, timestamp)
    exhaustions: Vec<(String, DateTime<Utc>)>,

    /// Final usage ratio per run, in corpus order
    final_ratios: Vec<f64>,

    /// Runs that touched the budget at all
    run_count: u64,

    /// Runs that exhausted it
    exhausted_runs: u64,

    /// Runs that crossed the warning ratio without exhausting
    near_misses: u64,
}

/// Detects budgets that run out or run close to the line
pub struct BudgetExhaustionDetector {
    event_store: Arc<dyn EventStore>,
    run_store: Arc<dyn RunStore>,
    config: BudgetExhaustionConfig,
}

impl BudgetExhaustionDetector {
    /// Create a detector with default thresholds
    pub fn new(event_store: Arc<dyn EventStore>, run_store: Arc<dyn RunStore>) -> Self {
        Self::with_config(event_store, run_store, BudgetExhaustionConfig::default())
    }

    /// Create a detector with custom thresholds
    pub fn with_config(
        event_store: Arc<dyn EventStore>,
        run_store: Arc<dyn RunStore>,
        config: BudgetExhaustionConfig,
    ) -> Self {
        Self {
            event_store,
            run_store,
            config,
        }
    }
}

#[async_trait]
impl PatternDetector for BudgetExhaustionDetector {
    fn name(&self) -> &'static str {
        "budget_exhaustion"
    }

    fn pattern_types(&self) -> Vec<PatternType> {
        vec![PatternType::BudgetExhaustion]
    }

    async fn detect(&self, options: &DetectionOptions) -> PatternResult<Vec<Pattern>> {
        if !wants(options, PatternType::BudgetExhaustion) {
            return Ok(Vec::new());
        }

        let corpus = load_corpus(self.event_store.as_ref(), self.run_store.as_ref(), options)
            .await?;

        let mut order: Vec<String> = Vec::new();
        let mut budgets: HashMap<String, BudgetStats> = HashMap::new();

        for run in &corpus {
            // Per-budget cumulative consumption within this run
            let mut consumed: HashMap<String, i64> = HashMap::new();
            let mut last_ratio: HashMap<String, f64> = HashMap::new();
            let mut exhausted_here: Vec<String> = Vec::new();

            for event in &run.events {
                match event.event_type {
                    EventType::BudgetConsumed => {
                        if let Ok(EventPayload::BudgetConsumed(p)) = event.decoded_payload() {
                            let total = consumed.entry(p.budget_name.clone()).or_insert(0);
                            *total += p.amount;
                            let limit = *total + p.remaining.max(0);
                            if limit > 0 {
                                last_ratio
                                    .insert(p.budget_name, *total as f64 / limit as f64);
                            }
                        }
                    }
                    EventType::BudgetExhausted => {
                        if let Ok(EventPayload::BudgetExhausted(p)) = event.decoded_payload() {
                            let entry =
                                budgets.entry(p.budget_name.clone()).or_insert_with(|| {
                                    order.push(p.budget_name.clone());
                                    BudgetStats::default()
                                });
                            entry
                                .exhaustions
                                .push((run.run_id.clone(), event.timestamp));
                            if !exhausted_here.contains(&p.budget_name) {
                                exhausted_here.push(p.budget_name);
                            }
                        }
                    }
                    _ => {}
                }
            }

            let mut touched: Vec<&String> = consumed.keys().collect();
            for name in &exhausted_here {
                if !touched.contains(&name) {
                    touched.push(name);
                }
            }

            for name in touched {
                let entry = budgets.entry(name.clone()).or_insert_with(|| {
                    order.push(name.clone());
                    BudgetStats::default()
                });
                entry.run_count += 1;

                let ratio = last_ratio.get(name).copied();
                let exhausted = exhausted_here.contains(name);
                if exhausted {
                    entry.exhausted_runs += 1;
                    entry.final_ratios.push(1.0);
                } else if let Some(ratio) = ratio {
                    entry.final_ratios.push(ratio);
                    if ratio >= self.config.warning_ratio {
                        entry.near_misses += 1;
                    }
                }
            }
        }

        let mut patterns = Vec::new();

        for budget_name in &order {
            let Some(stats) = budgets.get(budget_name) else {
                continue;
            };
            if stats.exhaustions.len() < self.config.min_exhaustions {
                continue;
            }

            let exhaustion_rate = if stats.run_count > 0 {
                stats.exhausted_runs as f64 / stats.run_count as f64
            } else {
                0.0
            };
            let near_miss_rate = if stats.run_count > 0 {
                stats.near_misses as f64 / stats.run_count as f64
            } else {
                0.0
            };

            let mut timestamps: Vec<DateTime<Utc>> =
                stats.exhaustions.iter().map(|(_, ts)| *ts).collect();
            timestamps.sort_unstable();
            let trend = exhaustion_trend(&timestamps);

            let recommendation = recommend(
                budget_name,
                exhaustion_rate,
                trend,
                stats.near_misses,
                self.config.near_miss_alert,
            );

            let mut pattern = Pattern::new(
                format!("Budget exhaustion: {budget_name}"),
                format!(
                    "{budget_name} ran out {} times across {} runs",
                    stats.exhaustions.len(),
                    stats.run_count
                ),
                PatternData::BudgetExhaustion {
                    budget_name: Some(budget_name.clone()),
                    exhaustion_count: stats.exhaustions.len() as u64,
                    near_miss_count: stats.near_misses,
                    total_runs: stats.run_count,
                    exhaustion_rate,
                    avg_usage_ratio: mean(&stats.final_ratios),
                    trend: Some(trend),
                    recommendation: Some(recommendation),
                },
            );

            for (run_id, timestamp) in &stats.exhaustions {
                pattern.add_evidence(run_id.clone(), *timestamp, json!({ "budget": budget_name }));
            }

            let confidence = 0.5
                + 0.3 * exhaustion_rate
                + 0.1 * near_miss_rate
                + (0.05 * stats.exhaustions.len() as f64).min(0.2);
            pattern.confidence = confidence.min(0.98);
            patterns.push(pattern);
        }

        debug!(patterns = patterns.len(), "budget exhaustion detection finished");
        Ok(apply_options(patterns, options))
    }
}
