//! In-Memory Run Store
//!
//! Reference implementation of the run store contract, including the
//! summary capability. Last-writer-wins on concurrent updates.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use tracing::debug;

use crate::errors::{RunStoreError, RunStoreResult};
use crate::run_store::{Run, RunFilter, RunOrder, RunStatus, RunStore, RunSummarizer, RunSummary};

/// In-memory run store
pub struct InMemoryRunStore {
    runs: RwLock<HashMap<String, Run>>,
}

impl InMemoryRunStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
        }
    }

    fn matching(&self, filter: &RunFilter) -> Vec<Run> {
        let runs = self.runs.read().unwrap_or_else(PoisonError::into_inner);
        runs.values()
            .filter(|run| filter.matches(run))
            .cloned()
            .collect()
    }

    fn sort(runs: &mut [Run], order_by: RunOrder, descending: bool) {
        match order_by {
            RunOrder::StartTime => runs.sort_by_key(|r| r.start_time),
            RunOrder::EndTime => runs.sort_by_key(|r| r.end_time),
            RunOrder::Id => runs.sort_by(|a, b| a.id.cmp(&b.id)),
            RunOrder::Status => {
                runs.sort_by(|a, b| a.status.to_string().cmp(&b.status.to_string()))
            }
        }
        if descending {
            runs.reverse();
        }
    }
}

impl Default for InMemoryRunStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn save(&self, run: &Run) -> RunStoreResult<()> {
        if run.id.is_empty() {
            return Err(RunStoreError::InvalidRunId(
                "run id must not be empty".to_string(),
            ));
        }

        let mut runs = self.runs.write().unwrap_or_else(PoisonError::into_inner);
        if runs.contains_key(&run.id) {
            return Err(RunStoreError::RunExists(run.id.clone()));
        }

        runs.insert(run.id.clone(), run.clone());
        debug!(run_id = %run.id, "saved run");
        Ok(())
    }

    async fn get(&self, id: &str) -> RunStoreResult<Run> {
        let runs = self.runs.read().unwrap_or_else(PoisonError::into_inner);
        runs.get(id)
            .cloned()
            .ok_or_else(|| RunStoreError::RunNotFound(id.to_string()))
    }

    async fn update(&self, run: &Run) -> RunStoreResult<()> {
        let mut runs = self.runs.write().unwrap_or_else(PoisonError::into_inner);
        if !runs.contains_key(&run.id) {
            return Err(RunStoreError::RunNotFound(run.id.clone()));
        }

        runs.insert(run.id.clone(), run.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> RunStoreResult<()> {
        let mut runs = self.runs.write().unwrap_or_else(PoisonError::into_inner);
        runs.remove(id)
            .map(|_| ())
            .ok_or_else(|| RunStoreError::RunNotFound(id.to_string()))
    }

    async fn list(&self, filter: &RunFilter) -> RunStoreResult<Vec<Run>> {
        let mut runs = self.matching(filter);
        Self::sort(&mut runs, filter.order_by, filter.descending);

        let runs: Vec<Run> = runs.into_iter().skip(filter.offset).collect();
        let runs = if filter.limit > 0 {
            runs.into_iter().take(filter.limit).collect()
        } else {
            runs
        };

        Ok(runs)
    }

    async fn count(&self, filter: &RunFilter) -> RunStoreResult<u64> {
        Ok(self.matching(filter).len() as u64)
    }

    fn as_summary(&self) -> Option<&dyn RunSummarizer> {
        Some(self)
    }
}

#[async_trait]
impl RunSummarizer for InMemoryRunStore {
    async fn summarize(&self, filter: &RunFilter) -> RunStoreResult<RunSummary> {
        let runs = self.matching(filter);

        let mut summary = RunSummary {
            total: runs.len() as u64,
            ..Default::default()
        };

        let mut durations_ns: Vec<i64> = Vec::new();
        for run in &runs {
            match run.status {
                RunStatus::Completed => summary.completed += 1,
                RunStatus::Failed => summary.failed += 1,
                RunStatus::Running => summary.running += 1,
                _ => {}
            }
            if let Some(end) = run.end_time {
                durations_ns
                    .push((end - run.start_time).num_nanoseconds().unwrap_or(i64::MAX));
            }
        }

        if !durations_ns.is_empty() {
            let sum: i64 = durations_ns.iter().sum();
            summary.average_duration_ns = Some(sum / durations_ns.len() as i64);
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use pretty_assertions::assert_eq;

    fn run_with(id: &str, status: RunStatus) -> Run {
        let mut run = Run::new(id, format!("goal for {id}"));
        match status {
            RunStatus::Pending => {}
            RunStatus::Running => run.start().unwrap(),
            RunStatus::Paused => {
                run.start().unwrap();
                run.pause().unwrap();
            }
            RunStatus::Completed => {
                run.start().unwrap();
                run.complete(None).unwrap();
            }
            RunStatus::Failed => {
                run.start().unwrap();
                run.fail("boom").unwrap();
            }
        }
        run
    }

    #[tokio::test]
    async fn save_get_round_trip() {
        let store = InMemoryRunStore::new();
        let run = run_with("run-1", RunStatus::Running);

        store.save(&run).await.unwrap();
        assert_eq!(store.get("run-1").await.unwrap(), run);
    }

    #[tokio::test]
    async fn save_rejects_empty_and_duplicate_ids() {
        let store = InMemoryRunStore::new();

        let empty = Run::new("", "goal");
        assert!(matches!(
            store.save(&empty).await,
            Err(RunStoreError::InvalidRunId(_))
        ));

        let run = run_with("run-1", RunStatus::Pending);
        store.save(&run).await.unwrap();
        assert!(matches!(
            store.save(&run).await,
            Err(RunStoreError::RunExists(_))
        ));
    }

    #[tokio::test]
    async fn get_update_delete_miss_is_not_found() {
        let store = InMemoryRunStore::new();
        let run = run_with("run-1", RunStatus::Pending);

        assert!(matches!(
            store.get("run-1").await,
            Err(RunStoreError::RunNotFound(_))
        ));
        assert!(matches!(
            store.update(&run).await,
            Err(RunStoreError::RunNotFound(_))
        ));
        assert!(matches!(
            store.delete("run-1").await,
            Err(RunStoreError::RunNotFound(_))
        ));
    }

    #[tokio::test]
    async fn update_replaces_the_whole_value() {
        let store = InMemoryRunStore::new();
        let mut run = run_with("run-1", RunStatus::Running);
        store.save(&run).await.unwrap();

        run.current_state = crate::run_store::states::VALIDATE.to_string();
        run.variables
            .insert("attempts".to_string(), serde_json::json!(3));
        store.update(&run).await.unwrap();

        assert_eq!(store.get("run-1").await.unwrap(), run);
    }

    #[tokio::test]
    async fn list_filters_by_status_and_paginates() {
        let store = InMemoryRunStore::new();
        for i in 0..3 {
            store
                .save(&run_with(&format!("done-{i}"), RunStatus::Completed))
                .await
                .unwrap();
        }
        for i in 0..2 {
            store
                .save(&run_with(&format!("bad-{i}"), RunStatus::Failed))
                .await
                .unwrap();
        }

        let filter = RunFilter {
            statuses: vec![RunStatus::Completed],
            ..Default::default()
        };
        assert_eq!(store.list(&filter).await.unwrap().len(), 3);
        assert_eq!(store.count(&filter).await.unwrap(), 3);

        let page = RunFilter {
            statuses: vec![RunStatus::Completed],
            limit: 2,
            offset: 2,
            order_by: RunOrder::Id,
            ..Default::default()
        };
        let runs = store.list(&page).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].id, "done-2");
        // Count ignores pagination
        assert_eq!(store.count(&page).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn list_orders_by_start_time_ascending_by_default() {
        let store = InMemoryRunStore::new();

        let mut older = run_with("older", RunStatus::Pending);
        older.start_time = Utc::now() - Duration::hours(2);
        let newer = run_with("newer", RunStatus::Pending);

        store.save(&newer).await.unwrap();
        store.save(&older).await.unwrap();

        let runs = store.list(&RunFilter::default()).await.unwrap();
        assert_eq!(runs[0].id, "older");
        assert_eq!(runs[1].id, "newer");

        let descending = RunFilter {
            descending: true,
            ..Default::default()
        };
        let runs = store.list(&descending).await.unwrap();
        assert_eq!(runs[0].id, "newer");
    }

    #[tokio::test]
    async fn summary_counts_and_averages_finished_runs() {
        let store = InMemoryRunStore::new();

        for i in 0..3 {
            let mut run = run_with(&format!("done-{i}"), RunStatus::Completed);
            run.start_time = Utc::now() - Duration::seconds(10);
            run.end_time = Some(run.start_time + Duration::seconds(10));
            store.save(&run).await.unwrap();
        }
        let mut failed = run_with("bad-0", RunStatus::Failed);
        failed.end_time = None; // still unset; excluded from the mean
        store.save(&failed).await.unwrap();
        store
            .save(&run_with("live-0", RunStatus::Running))
            .await
            .unwrap();

        let summary = store
            .as_summary()
            .unwrap()
            .summarize(&RunFilter::default())
            .await
            .unwrap();

        assert_eq!(summary.total, 5);
        assert_eq!(summary.completed, 3);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.running, 1);
        assert_eq!(
            summary.average_duration_ns,
            Some(Duration::seconds(10).num_nanoseconds().unwrap())
        );
    }

    #[tokio::test]
    async fn summary_with_no_finished_runs_has_no_average() {
        let store = InMemoryRunStore::new();
        store
            .save(&run_with("live-0", RunStatus::Running))
            .await
            .unwrap();

        let summary = store
            .as_summary()
            .unwrap()
            .summarize(&RunFilter::default())
            .await
            .unwrap();

        assert_eq!(summary.total, 1);
        assert_eq!(summary.average_duration_ns, None);
    }
}
