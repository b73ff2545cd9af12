//! In-Memory Pattern Store

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use crate::errors::{PatternError, PatternResult};
use crate::patterns::store::{
    PatternFilter, PatternOrder, PatternStore, PatternSummarizer, PatternSummary,
};
use crate::patterns::{Pattern, PatternType};

/// In-memory pattern store
pub struct InMemoryPatternStore {
    patterns: RwLock<HashMap<Uuid, Pattern>>,
}

impl InMemoryPatternStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            patterns: RwLock::new(HashMap::new()),
        }
    }

    fn validate(pattern: &Pattern) -> PatternResult<()> {
        if pattern.name.is_empty() {
            return Err(PatternError::InvalidPattern(
                "pattern name must not be empty".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&pattern.confidence) {
            return Err(PatternError::InvalidPattern(format!(
                "confidence {} outside [0, 1]",
                pattern.confidence
            )));
        }
        Ok(())
    }

    fn matching(&self, filter: &PatternFilter) -> Vec<Pattern> {
        let patterns = self.patterns.read().unwrap_or_else(PoisonError::into_inner);
        patterns
            .values()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect()
    }

    fn sort(patterns: &mut [Pattern], order_by: PatternOrder, descending: bool) {
        match order_by {
            PatternOrder::FirstSeen => patterns.sort_by_key(|p| p.first_seen),
            PatternOrder::LastSeen => patterns.sort_by_key(|p| p.last_seen),
            PatternOrder::Frequency => patterns.sort_by_key(|p| p.frequency),
            PatternOrder::Confidence => {
                patterns.sort_by(|a, b| {
                    a.confidence
                        .partial_cmp(&b.confidence)
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
            }
        }
        if descending {
            patterns.reverse();
        }
    }
}

impl Default for InMemoryPatternStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PatternStore for InMemoryPatternStore {
    async fn save(&self, pattern: &Pattern) -> PatternResult<()> {
        Self::validate(pattern)?;

        let mut patterns = self.patterns.write().unwrap_or_else(PoisonError::into_inner);
        if patterns.contains_key(&pattern.id) {
            return Err(PatternError::PatternExists(pattern.id.to_string()));
        }

        patterns.insert(pattern.id, pattern.clone());
        debug!(pattern_id = %pattern.id, pattern_type = %pattern.pattern_type, "saved pattern");
        Ok(())
    }

    async fn get(&self, id: &Uuid) -> PatternResult<Pattern> {
        let patterns = self.patterns.read().unwrap_or_else(PoisonError::into_inner);
        patterns
            .get(id)
            .cloned()
            .ok_or_else(|| PatternError::PatternNotFound(id.to_string()))
    }

    async fn update(&self, pattern: &Pattern) -> PatternResult<()> {
        Self::validate(pattern)?;

        let mut patterns = self.patterns.write().unwrap_or_else(PoisonError::into_inner);
        if !patterns.contains_key(&pattern.id) {
            return Err(PatternError::PatternNotFound(pattern.id.to_string()));
        }

        patterns.insert(pattern.id, pattern.clone());
        Ok(())
    }

    async fn delete(&self, id: &Uuid) -> PatternResult<()> {
        let mut patterns = self.patterns.write().unwrap_or_else(PoisonError::into_inner);
        patterns
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| PatternError::PatternNotFound(id.to_string()))
    }

    async fn list(&self, filter: &PatternFilter) -> PatternResult<Vec<Pattern>> {
        let mut patterns = self.matching(filter);
        Self::sort(&mut patterns, filter.order_by, filter.descending);

        let patterns: Vec<Pattern> = patterns.into_iter().skip(filter.offset).collect();
        let patterns = if filter.limit > 0 {
            patterns.into_iter().take(filter.limit).collect()
        } else {
            patterns
        };

        Ok(patterns)
    }

    async fn count(&self, filter: &PatternFilter) -> PatternResult<u64> {
        Ok(self.matching(filter).len() as u64)
    }

    fn as_summary(&self) -> Option<&dyn PatternSummarizer> {
        Some(self)
    }
}

#[async_trait]
impl PatternSummarizer for InMemoryPatternStore {
    async fn summarize(&self, filter: &PatternFilter) -> PatternResult<PatternSummary> {
        let patterns = self.matching(filter);

        let mut by_type: Vec<(PatternType, u64)> = Vec::new();
        for pattern_type in PatternType::ALL {
            let count = patterns
                .iter()
                .filter(|p| p.pattern_type == pattern_type)
                .count() as u64;
            if count > 0 {
                by_type.push((pattern_type, count));
            }
        }

        let average_confidence = if patterns.is_empty() {
            None
        } else {
            Some(patterns.iter().map(|p| p.confidence).sum::<f64>() / patterns.len() as f64)
        };

        Ok(PatternSummary {
            total: patterns.len() as u64,
            by_type,
            average_confidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::PatternData;
    use chrono::Utc;
    use serde_json::json;

    fn pattern(name: &str, confidence: f64, run_id: &str) -> Pattern {
        let mut pattern = Pattern::new(
            name,
            "test pattern",
            PatternData::ToolFailure {
                tool_name: name.to_string(),
                error_type: "network".to_string(),
                error_count: 2,
            },
        );
        pattern.confidence = confidence;
        pattern.add_evidence(run_id, Utc::now(), json!({}));
        pattern
    }

    #[tokio::test]
    async fn save_get_update_delete_round_trip() {
        let store = InMemoryPatternStore::new();
        let mut p = pattern("web_search failures", 0.7, "run-1");

        store.save(&p).await.unwrap();
        assert_eq!(store.get(&p.id).await.unwrap(), p);

        p.confidence = 0.9;
        store.update(&p).await.unwrap();
        assert_eq!(store.get(&p.id).await.unwrap().confidence, 0.9);

        store.delete(&p.id).await.unwrap();
        assert!(matches!(
            store.get(&p.id).await,
            Err(PatternError::PatternNotFound(_))
        ));
    }

    #[tokio::test]
    async fn save_validates_and_rejects_duplicates() {
        let store = InMemoryPatternStore::new();

        let mut invalid = pattern("p", 1.5, "run-1");
        assert!(matches!(
            store.save(&invalid).await,
            Err(PatternError::InvalidPattern(_))
        ));
        invalid.confidence = 0.5;
        invalid.name = String::new();
        assert!(matches!(
            store.save(&invalid).await,
            Err(PatternError::InvalidPattern(_))
        ));

        let p = pattern("p", 0.5, "run-1");
        store.save(&p).await.unwrap();
        assert!(matches!(
            store.save(&p).await,
            Err(PatternError::PatternExists(_))
        ));
    }

    #[tokio::test]
    async fn list_filters_and_orders_by_confidence() {
        let store = InMemoryPatternStore::new();
        store.save(&pattern("low", 0.4, "run-1")).await.unwrap();
        store.save(&pattern("high", 0.9, "run-2")).await.unwrap();
        store.save(&pattern("mid", 0.6, "run-1")).await.unwrap();

        let filter = PatternFilter {
            min_confidence: 0.5,
            order_by: PatternOrder::Confidence,
            descending: true,
            ..Default::default()
        };
        let patterns = store.list(&filter).await.unwrap();
        assert_eq!(
            patterns.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
            vec!["high", "mid"]
        );

        let by_run = PatternFilter {
            run_id: Some("run-2".to_string()),
            ..Default::default()
        };
        assert_eq!(store.count(&by_run).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn summary_groups_by_type() {
        let store = InMemoryPatternStore::new();
        store.save(&pattern("a", 0.4, "run-1")).await.unwrap();
        store.save(&pattern("b", 0.8, "run-2")).await.unwrap();

        let summary = store
            .as_summary()
            .unwrap()
            .summarize(&PatternFilter::default())
            .await
            .unwrap();

        assert_eq!(summary.total, 2);
        assert_eq!(summary.by_type, vec![(PatternType::ToolFailure, 2)]);
        let avg = summary.average_confidence.unwrap();
        assert!((avg - 0.6).abs() < 1e-9);
    }
}
