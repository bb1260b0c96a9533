//! Per-run execution logs and aggregate job statistics.

use crate::{
    error::{Error, Result},
    metrics::AdminMetrics,
    storage::{ExecutionLogStore, ScheduledJobStore},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Lifecycle of one physical execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Success,
    Failed,
    Timeout,
}

impl ExecutionStatus {
    /// Whether the run has finished, one way or another.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Success | ExecutionStatus::Failed | ExecutionStatus::Timeout
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Timeout => "timeout",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ExecutionStatus::Pending),
            "running" => Some(ExecutionStatus::Running),
            "success" => Some(ExecutionStatus::Success),
            "failed" => Some(ExecutionStatus::Failed),
            "timeout" => Some(ExecutionStatus::Timeout),
            _ => None,
        }
    }
}

/// One row per physical execution attempt, keyed by the external run id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLogRecord {
    pub id: i64,
    pub scheduled_job_id: i64,
    /// Identifier of the run in the external queue.
    pub run_id: String,
    pub status: ExecutionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub result_data: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub retry_count: u32,
}

/// Fields merged into an execution log as lifecycle callbacks arrive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionUpdate {
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub result_data: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub retry_count: Option<u32>,
}

/// Records execution outcomes and rolls up per-job statistics.
#[derive(Clone)]
pub struct ExecutionTracker {
    jobs: Arc<dyn ScheduledJobStore>,
    logs: Arc<dyn ExecutionLogStore>,
    metrics: Arc<AdminMetrics>,
}

impl ExecutionTracker {
    pub fn new(
        jobs: Arc<dyn ScheduledJobStore>,
        logs: Arc<dyn ExecutionLogStore>,
        metrics: Arc<AdminMetrics>,
    ) -> Self {
        Self { jobs, logs, metrics }
    }

    /// Record a lifecycle callback for one run.
    ///
    /// Upserts by `run_id`: the first callback inserts the row, later ones
    /// update it in place, so "running" followed by "success" leaves exactly
    /// one row. Errors if the job row is missing.
    pub async fn log_execution(
        &self,
        scheduled_job_id: i64,
        run_id: &str,
        status: ExecutionStatus,
        update: ExecutionUpdate,
    ) -> Result<ExecutionLogRecord> {
        if self.jobs.job(scheduled_job_id).await?.is_none() {
            return Err(Error::JobNotFound(scheduled_job_id));
        }

        let record = match self.logs.log_by_run_id(run_id).await? {
            Some(mut existing) => {
                existing.status = status;
                if update.started_at.is_some() {
                    existing.started_at = update.started_at;
                }
                if update.finished_at.is_some() {
                    existing.finished_at = update.finished_at;
                }
                if update.duration_ms.is_some() {
                    existing.duration_ms = update.duration_ms;
                }
                if update.result_data.is_some() {
                    existing.result_data = update.result_data;
                }
                if update.error_message.is_some() {
                    existing.error_message = update.error_message;
                }
                if let Some(retries) = update.retry_count {
                    existing.retry_count = retries;
                }
                if !self.logs.update_log(&existing).await? {
                    return Err(Error::Storage(format!(
                        "execution log for run '{run_id}' vanished during update"
                    )));
                }
                existing
            }
            None => {
                let record = ExecutionLogRecord {
                    id: 0, // assigned by the store
                    scheduled_job_id,
                    run_id: run_id.to_string(),
                    status,
                    started_at: update.started_at,
                    finished_at: update.finished_at,
                    duration_ms: update.duration_ms,
                    result_data: update.result_data,
                    error_message: update.error_message,
                    retry_count: update.retry_count.unwrap_or(0),
                };
                self.logs.insert_log(record).await?
            }
        };

        self.metrics.record_execution();
        Ok(record)
    }

    /// Roll one finished run into the job's aggregate statistics.
    ///
    /// Increments `total_runs` and exactly one of `success_runs` or
    /// `failed_runs`, and stamps `last_run_at`/`last_run_status`.
    pub async fn update_statistics(
        &self,
        scheduled_job_id: i64,
        success: bool,
        execution_time_ms: Option<u64>,
    ) -> Result<()> {
        let updated = self
            .jobs
            .bump_run_stats(scheduled_job_id, success, Utc::now(), execution_time_ms)
            .await?;
        if !updated {
            return Err(Error::JobNotFound(scheduled_job_id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{scheduler::NewScheduledJob, storage::MemoryStore};

    async fn tracked_job(store: &Arc<MemoryStore>) -> i64 {
        let job = store
            .insert_job(NewScheduledJob::new("default", "nightly", "sync"))
            .await
            .unwrap();
        job.id
    }

    fn tracker(store: &Arc<MemoryStore>) -> ExecutionTracker {
        ExecutionTracker::new(store.clone(), store.clone(), Arc::new(AdminMetrics::new()))
    }

    #[tokio::test]
    async fn test_log_execution_upserts_by_run_id() {
        let store = Arc::new(MemoryStore::new());
        let job_id = tracked_job(&store).await;
        let tracker = tracker(&store);

        tracker
            .log_execution(
                job_id,
                "run-1",
                ExecutionStatus::Running,
                ExecutionUpdate {
                    started_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let finished = tracker
            .log_execution(
                job_id,
                "run-1",
                ExecutionStatus::Success,
                ExecutionUpdate {
                    finished_at: Some(Utc::now()),
                    duration_ms: Some(1200),
                    result_data: Some(serde_json::json!({"rows": 42})),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(finished.status, ExecutionStatus::Success);
        assert!(finished.started_at.is_some());
        assert_eq!(finished.duration_ms, Some(1200));

        let logs = store.logs_for_job(job_id).await.unwrap();
        assert_eq!(logs.len(), 1);
    }

    #[tokio::test]
    async fn test_log_execution_requires_existing_job() {
        let store = Arc::new(MemoryStore::new());
        let tracker = tracker(&store);
        let err = tracker
            .log_execution(999, "run-x", ExecutionStatus::Pending, ExecutionUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::JobNotFound(999)));
    }

    #[tokio::test]
    async fn test_statistics_count_success_xor_failure() {
        let store = Arc::new(MemoryStore::new());
        let job_id = tracked_job(&store).await;
        let tracker = tracker(&store);

        tracker.update_statistics(job_id, true, Some(100)).await.unwrap();
        tracker.update_statistics(job_id, false, None).await.unwrap();
        tracker.update_statistics(job_id, true, None).await.unwrap();

        let job = store.job(job_id).await.unwrap().unwrap();
        assert_eq!(job.total_runs, 3);
        assert_eq!(job.success_runs, 2);
        assert_eq!(job.failed_runs, 1);
        assert_eq!(job.last_run_status, Some(ExecutionStatus::Success));
        assert_eq!(job.last_run_duration_ms, None);
        assert!(job.last_run_at.is_some());
    }
}
