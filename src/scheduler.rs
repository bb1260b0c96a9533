//! Scheduled job registry over an external recurring-job scheduler.
//!
//! Job definitions live in the relational store and are the source of truth.
//! Registration with the external scheduler is best-effort: a failure is
//! logged and counted, never propagated out of job CRUD, and `reconcile`
//! brings the scheduler back in line with the store on startup or on demand.

#[cfg(feature = "audit")]
use log::info;
use log::warn;

use crate::{
    cron,
    error::{Error, Result},
    execution::ExecutionStatus,
    metrics::AdminMetrics,
    storage::ScheduledJobStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

/// Reserved payload key carrying the worker-side execution timeout.
pub const PAYLOAD_TIMEOUT_KEY: &str = "__timeout_ms";
/// Reserved payload key carrying the queue priority.
pub const PAYLOAD_PRIORITY_KEY: &str = "__priority";
/// Reserved payload key carrying the scheduled job row id.
pub const PAYLOAD_JOB_ID_KEY: &str = "__scheduled_job_id";

/// Desired lifecycle state of a scheduled job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Registered with the external scheduler.
    Enabled,
    /// Kept in the store, never registered.
    Disabled,
    /// Kept in the store, deregistered until re-enabled.
    Paused,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Enabled => "enabled",
            JobStatus::Disabled => "disabled",
            JobStatus::Paused => "paused",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "enabled" => Some(JobStatus::Enabled),
            "disabled" => Some(JobStatus::Disabled),
            "paused" => Some(JobStatus::Paused),
            _ => None,
        }
    }
}

/// A scheduled job row, including its aggregate run statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledJobRecord {
    pub id: i64,
    pub domain: String,
    /// Unique within the domain; also keys the external scheduler entry.
    pub name: String,
    pub handler_name: String,
    pub cron_expression: String,
    pub timezone: Option<String>,
    pub status: JobStatus,
    pub payload: serde_json::Value,
    /// Retries after the first attempt.
    pub retry_attempts: u32,
    /// Base delay for exponential backoff between attempts.
    pub retry_delay_ms: u64,
    pub timeout_ms: u64,
    pub priority: i32,
    pub total_runs: u64,
    pub success_runs: u64,
    pub failed_runs: u64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_run_status: Option<ExecutionStatus>,
    pub last_run_duration_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduledJobRecord {
    /// Key identifying this job's entry in the external scheduler.
    ///
    /// Domain-qualified so the same name in two domains registers twice.
    pub fn scheduler_key(&self) -> String {
        format!("{}:{}", self.domain, self.name)
    }
}

/// Input for creating a scheduled job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewScheduledJob {
    pub domain: String,
    pub name: String,
    pub handler_name: String,
    pub cron_expression: String,
    pub timezone: Option<String>,
    pub status: JobStatus,
    pub payload: serde_json::Value,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub timeout_ms: u64,
    pub priority: i32,
}

impl NewScheduledJob {
    /// A job enabled on an hourly schedule with default retry policy.
    pub fn new(
        domain: impl Into<String>,
        name: impl Into<String>,
        handler_name: impl Into<String>,
    ) -> Self {
        Self {
            domain: domain.into(),
            name: name.into(),
            handler_name: handler_name.into(),
            cron_expression: "0 * * * *".to_string(),
            timezone: None,
            status: JobStatus::Enabled,
            payload: serde_json::Value::Object(Default::default()),
            retry_attempts: 3,
            retry_delay_ms: 5_000,
            timeout_ms: 60_000,
            priority: 0,
        }
    }

    pub fn with_cron(mut self, expression: impl Into<String>) -> Self {
        self.cron_expression = expression.into();
        self
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = Some(timezone.into());
        self
    }
}

/// Partial update applied to a scheduled job row.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduledJobUpdate {
    pub name: Option<String>,
    pub handler_name: Option<String>,
    pub cron_expression: Option<String>,
    pub timezone: Option<Option<String>>,
    pub payload: Option<serde_json::Value>,
    pub retry_attempts: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
    pub priority: Option<i32>,
}

/// Recurrence settings handed to the external scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepeatOptions {
    pub pattern: String,
    pub timezone: Option<String>,
}

/// Backoff strategy between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "delay_ms")]
pub enum Backoff {
    Fixed(u64),
    Exponential(u64),
}

/// Job template handed to the external scheduler alongside the recurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobTemplate {
    pub handler_name: String,
    /// Caller payload plus the reserved metadata keys.
    pub payload: serde_json::Value,
    /// Total attempts, first try included.
    pub attempts: u32,
    pub backoff: Backoff,
    pub priority: i32,
}

/// One registered recurring entry, as reported by the external scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepeatableJob {
    pub key: String,
    pub pattern: String,
    pub timezone: Option<String>,
    pub next_run: Option<DateTime<Utc>>,
}

/// The external recurring-job scheduler, consumed as a black box.
#[async_trait]
pub trait RecurringScheduler: Send + Sync {
    /// Register or replace the recurring entry stored under `key`.
    async fn upsert_job_scheduler(
        &self,
        key: &str,
        repeat: &RepeatOptions,
        template: &JobTemplate,
    ) -> Result<()>;

    /// Remove the recurring entry under `key`. Missing entries are fine.
    async fn remove_repeatable(&self, key: &str, repeat: &RepeatOptions) -> Result<bool>;

    /// Currently registered recurring entries.
    async fn repeatable_jobs(&self) -> Result<Vec<RepeatableJob>>;

    /// Enqueue one immediate run of `template`, returning the run id.
    async fn enqueue_now(&self, key: &str, template: &JobTemplate) -> Result<String>;
}

/// In-memory scheduler stand-in recording registrations and manual runs.
#[derive(Debug, Default)]
pub struct MemoryScheduler {
    entries: DashMap<String, (RepeatOptions, JobTemplate)>,
    manual_runs: DashMap<String, Vec<String>>,
}

impl MemoryScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registered template for `key`, if any.
    pub fn entry(&self, key: &str) -> Option<(RepeatOptions, JobTemplate)> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    /// Run ids enqueued manually for `key`.
    pub fn manual_runs(&self, key: &str) -> Vec<String> {
        self.manual_runs
            .get(key)
            .map(|runs| runs.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RecurringScheduler for MemoryScheduler {
    async fn upsert_job_scheduler(
        &self,
        key: &str,
        repeat: &RepeatOptions,
        template: &JobTemplate,
    ) -> Result<()> {
        self.entries
            .insert(key.to_string(), (repeat.clone(), template.clone()));
        Ok(())
    }

    async fn remove_repeatable(&self, key: &str, _repeat: &RepeatOptions) -> Result<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn repeatable_jobs(&self) -> Result<Vec<RepeatableJob>> {
        let mut jobs: Vec<RepeatableJob> = self
            .entries
            .iter()
            .map(|entry| RepeatableJob {
                key: entry.key().clone(),
                pattern: entry.value().0.pattern.clone(),
                timezone: entry.value().0.timezone.clone(),
                next_run: None,
            })
            .collect();
        jobs.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(jobs)
    }

    async fn enqueue_now(&self, key: &str, _template: &JobTemplate) -> Result<String> {
        let run_id = Uuid::new_v4().to_string();
        self.manual_runs
            .entry(key.to_string())
            .or_default()
            .push(run_id.clone());
        Ok(run_id)
    }
}

/// Registry of known job handler names.
///
/// A job may only reference a handler registered here; the worker side binds
/// the same names to actual handler functions.
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    handlers: DashMap<String, String>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler name with a short description.
    pub fn register(&self, name: impl Into<String>, description: impl Into<String>) {
        self.handlers.insert(name.into(), description.into());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered handler names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

/// Result of a [`JobRegistry::reconcile`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Scheduler keys registered during the pass.
    pub registered: Vec<String>,
    /// Scheduler keys removed during the pass.
    pub removed: Vec<String>,
}

/// Service mapping persisted job definitions onto the external scheduler.
#[derive(Clone)]
pub struct JobRegistry {
    store: Arc<dyn ScheduledJobStore>,
    scheduler: Arc<dyn RecurringScheduler>,
    handlers: Arc<HandlerRegistry>,
    metrics: Arc<AdminMetrics>,
}

impl JobRegistry {
    pub fn new(
        store: Arc<dyn ScheduledJobStore>,
        scheduler: Arc<dyn RecurringScheduler>,
        handlers: Arc<HandlerRegistry>,
        metrics: Arc<AdminMetrics>,
    ) -> Self {
        Self {
            store,
            scheduler,
            handlers,
            metrics,
        }
    }

    /// Create a job definition, registering it when enabled.
    ///
    /// Validation runs before any write. Scheduler registration failure does
    /// not fail creation: the row is the source of truth and the next
    /// start/restart or reconcile pass converges the scheduler.
    pub async fn create_job(&self, input: NewScheduledJob) -> Result<ScheduledJobRecord> {
        self.validate_definition(
            &input.handler_name,
            &input.cron_expression,
            input.timezone.as_deref(),
        )?;

        if self
            .store
            .job_by_name(&input.domain, &input.name)
            .await?
            .is_some()
        {
            return Err(Error::DuplicateJobName {
                domain: input.domain,
                name: input.name,
            });
        }

        let record = self.store.insert_job(input).await?;

        if record.status == JobStatus::Enabled {
            self.start_job_best_effort(&record).await;
        }

        #[cfg(feature = "audit")]
        info!(
            "Scheduled job '{}' created in domain '{}' ({})",
            record.name,
            record.domain,
            record.status.as_str()
        );

        Ok(record)
    }

    /// Update a job definition and unconditionally restart its scheduler
    /// entry.
    ///
    /// Restarting regardless of which fields changed keeps the logic simple;
    /// registration is idempotent, so a redundant restart is harmless.
    pub async fn update_job(
        &self,
        id: i64,
        domain: &str,
        patch: ScheduledJobUpdate,
    ) -> Result<ScheduledJobRecord> {
        let existing = self.job_in_domain(id, domain).await?;

        let handler_name = patch.handler_name.as_deref().unwrap_or(&existing.handler_name);
        let cron_expression = patch
            .cron_expression
            .as_deref()
            .unwrap_or(&existing.cron_expression);
        let timezone = match &patch.timezone {
            Some(tz) => tz.as_deref(),
            None => existing.timezone.as_deref(),
        };
        self.validate_definition(handler_name, cron_expression, timezone)?;

        if let Some(new_name) = &patch.name {
            if new_name != &existing.name {
                if self.store.job_by_name(domain, new_name).await?.is_some() {
                    return Err(Error::DuplicateJobName {
                        domain: domain.to_string(),
                        name: new_name.clone(),
                    });
                }
            }
        }

        let mut updated = existing.clone();
        if let Some(name) = patch.name {
            updated.name = name;
        }
        if let Some(handler) = patch.handler_name {
            updated.handler_name = handler;
        }
        if let Some(cron) = patch.cron_expression {
            updated.cron_expression = cron;
        }
        if let Some(tz) = patch.timezone {
            updated.timezone = tz;
        }
        if let Some(payload) = patch.payload {
            updated.payload = payload;
        }
        if let Some(attempts) = patch.retry_attempts {
            updated.retry_attempts = attempts;
        }
        if let Some(delay) = patch.retry_delay_ms {
            updated.retry_delay_ms = delay;
        }
        if let Some(timeout) = patch.timeout_ms {
            updated.timeout_ms = timeout;
        }
        if let Some(priority) = patch.priority {
            updated.priority = priority;
        }
        updated.updated_at = Utc::now();

        if !self.store.update_job(&updated).await? {
            return Err(Error::JobNotFound(id));
        }

        // Tear down the old entry first; a rename moves the scheduler key
        self.stop_job_best_effort(&existing).await;
        if updated.status == JobStatus::Enabled {
            self.start_job_best_effort(&updated).await;
        }

        #[cfg(feature = "audit")]
        info!(
            "Scheduled job '{}' updated in domain '{}'",
            updated.name, updated.domain
        );

        Ok(updated)
    }

    /// Deregister and delete a job definition.
    pub async fn delete_job(&self, id: i64, domain: &str) -> Result<()> {
        let record = self.job_in_domain(id, domain).await?;

        // Stop first so the scheduler cannot fire for a deleted row
        self.stop_job_best_effort(&record).await;
        if !self.store.delete_job(id).await? {
            return Err(Error::JobNotFound(id));
        }

        #[cfg(feature = "audit")]
        info!(
            "Scheduled job '{}' deleted from domain '{}'",
            record.name, record.domain
        );

        Ok(())
    }

    /// Persist a new status and converge the scheduler towards it.
    pub async fn toggle_status(
        &self,
        id: i64,
        domain: &str,
        status: JobStatus,
    ) -> Result<ScheduledJobRecord> {
        let mut record = self.job_in_domain(id, domain).await?;
        record.status = status;
        record.updated_at = Utc::now();

        if !self.store.update_job(&record).await? {
            return Err(Error::JobNotFound(id));
        }

        match status {
            JobStatus::Enabled => self.start_job_best_effort(&record).await,
            JobStatus::Disabled | JobStatus::Paused => self.stop_job_best_effort(&record).await,
        }

        Ok(record)
    }

    /// Enqueue one immediate run, bypassing the cron pattern.
    pub async fn execute_now(&self, id: i64, domain: &str) -> Result<String> {
        let record = self.job_in_domain(id, domain).await?;
        let template = Self::template_for(&record);
        self.scheduler
            .enqueue_now(&record.scheduler_key(), &template)
            .await
    }

    /// Registered recurring entries, straight from the external scheduler.
    pub async fn repeatable_jobs(&self) -> Result<Vec<RepeatableJob>> {
        self.scheduler.repeatable_jobs().await
    }

    /// Remove every recurring entry from the external scheduler.
    ///
    /// Job rows are untouched; a reconcile pass re-registers enabled jobs.
    pub async fn clear_all_repeatable(&self) -> Result<usize> {
        let entries = self.scheduler.repeatable_jobs().await?;
        let mut removed = 0;
        for entry in entries {
            let repeat = RepeatOptions {
                pattern: entry.pattern.clone(),
                timezone: entry.timezone.clone(),
            };
            if self.scheduler.remove_repeatable(&entry.key, &repeat).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Bring the external scheduler in line with the store.
    ///
    /// Registers enabled jobs missing from the scheduler and removes entries
    /// with no enabled row behind them. Idempotent; per-entry failures are
    /// logged and skipped so one bad entry cannot wedge the pass.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let desired = self.store.list_enabled().await?;
        let desired_by_key: HashMap<String, &ScheduledJobRecord> = desired
            .iter()
            .map(|job| (job.scheduler_key(), job))
            .collect();

        let registered = self.scheduler.repeatable_jobs().await?;
        let registered_keys: HashSet<String> =
            registered.iter().map(|entry| entry.key.clone()).collect();

        let mut report = ReconcileReport::default();

        for (key, job) in &desired_by_key {
            if !registered_keys.contains(key) {
                match self.register(job).await {
                    Ok(()) => report.registered.push(key.clone()),
                    Err(e) => {
                        self.metrics.record_scheduler_desync();
                        warn!("Reconcile could not register '{key}': {e}");
                    }
                }
            }
        }

        for entry in &registered {
            if !desired_by_key.contains_key(&entry.key) {
                let repeat = RepeatOptions {
                    pattern: entry.pattern.clone(),
                    timezone: entry.timezone.clone(),
                };
                match self.scheduler.remove_repeatable(&entry.key, &repeat).await {
                    Ok(_) => report.removed.push(entry.key.clone()),
                    Err(e) => {
                        self.metrics.record_scheduler_desync();
                        warn!("Reconcile could not remove '{}': {e}", entry.key);
                    }
                }
            }
        }

        report.registered.sort();
        report.removed.sort();
        Ok(report)
    }

    /// Register `record` with the external scheduler, propagating errors.
    pub async fn start_job(&self, record: &ScheduledJobRecord) -> Result<()> {
        self.register(record).await
    }

    /// Deregister `record` from the external scheduler, propagating errors.
    pub async fn stop_job(&self, record: &ScheduledJobRecord) -> Result<bool> {
        let repeat = Self::repeat_for(record);
        self.scheduler
            .remove_repeatable(&record.scheduler_key(), &repeat)
            .await
    }

    /// Stop then start, applying any definition change atomically from the
    /// scheduler's perspective.
    pub async fn restart_job(&self, record: &ScheduledJobRecord) -> Result<()> {
        self.stop_job(record).await?;
        self.register(record).await
    }

    async fn job_in_domain(&self, id: i64, domain: &str) -> Result<ScheduledJobRecord> {
        match self.store.job(id).await? {
            Some(record) if record.domain == domain => Ok(record),
            _ => Err(Error::JobNotFound(id)),
        }
    }

    fn validate_definition(
        &self,
        handler_name: &str,
        cron_expression: &str,
        timezone: Option<&str>,
    ) -> Result<()> {
        if !self.handlers.contains(handler_name) {
            return Err(Error::UnknownHandler(handler_name.to_string()));
        }
        cron::validate_cron(cron_expression)?;
        if let Some(tz) = timezone {
            cron::validate_timezone(tz)?;
        }
        Ok(())
    }

    fn repeat_for(record: &ScheduledJobRecord) -> RepeatOptions {
        RepeatOptions {
            pattern: record.cron_expression.clone(),
            timezone: record.timezone.clone(),
        }
    }

    /// Map a job row onto the scheduler's job template.
    ///
    /// `retry_attempts` counts retries, the queue counts attempts, hence the
    /// `+ 1`. Timeout and priority ride along in the payload under reserved
    /// keys so the worker side can enforce them.
    fn template_for(record: &ScheduledJobRecord) -> JobTemplate {
        let mut payload = match &record.payload {
            serde_json::Value::Object(map) => map.clone(),
            other => {
                let mut map = serde_json::Map::new();
                if !other.is_null() {
                    map.insert("data".to_string(), other.clone());
                }
                map
            }
        };
        payload.insert(
            PAYLOAD_TIMEOUT_KEY.to_string(),
            serde_json::json!(record.timeout_ms),
        );
        payload.insert(
            PAYLOAD_PRIORITY_KEY.to_string(),
            serde_json::json!(record.priority),
        );
        payload.insert(
            PAYLOAD_JOB_ID_KEY.to_string(),
            serde_json::json!(record.id),
        );

        JobTemplate {
            handler_name: record.handler_name.clone(),
            payload: serde_json::Value::Object(payload),
            attempts: record.retry_attempts + 1,
            backoff: Backoff::Exponential(record.retry_delay_ms),
            priority: record.priority,
        }
    }

    async fn start_job_best_effort(&self, record: &ScheduledJobRecord) {
        if let Err(e) = self.register(record).await {
            self.metrics.record_scheduler_desync();
            warn!(
                "Could not register job '{}' with the scheduler: {e}",
                record.scheduler_key()
            );
        }
    }

    async fn stop_job_best_effort(&self, record: &ScheduledJobRecord) {
        if let Err(e) = self.stop_job(record).await {
            self.metrics.record_scheduler_desync();
            warn!(
                "Could not deregister job '{}' from the scheduler: {e}",
                record.scheduler_key()
            );
        }
    }

    async fn register(&self, record: &ScheduledJobRecord) -> Result<()> {
        let repeat = Self::repeat_for(record);
        let template = Self::template_for(record);
        self.scheduler
            .upsert_job_scheduler(&record.scheduler_key(), &repeat, &template)
            .await
    }
}
