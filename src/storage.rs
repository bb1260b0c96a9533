//! Relational store abstractions for roles, menus, jobs, and execution logs.
//!
//! The traits model the narrow slice of a relational store the admin core
//! needs. `MemoryStore` implements all of them for tests and single-process
//! use; the `database` feature provides the PostgreSQL equivalents.

use crate::{
    error::{Error, Result},
    execution::{ExecutionLogRecord, ExecutionStatus},
    menu::MenuRecord,
    role::RoleRecord,
    scheduler::{JobStatus, NewScheduledJob, ScheduledJobRecord},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};

/// Role rows.
#[async_trait]
pub trait RoleStore: Send + Sync {
    /// Insert a role. Errors with [`Error::RoleAlreadyExists`] on a taken id.
    async fn insert_role(&self, role: RoleRecord) -> Result<RoleRecord>;

    async fn role(&self, id: &str) -> Result<Option<RoleRecord>>;

    async fn role_exists(&self, id: &str) -> Result<bool>;

    /// Update a role row, returning whether it existed.
    async fn update_role(&self, role: &RoleRecord) -> Result<bool>;

    /// Delete a role row, returning whether it existed.
    async fn delete_role(&self, id: &str) -> Result<bool>;

    async fn list_roles(&self) -> Result<Vec<RoleRecord>>;
}

/// Menu rows and role-to-menu assignments.
#[async_trait]
pub trait MenuStore: Send + Sync {
    async fn insert_menu(&self, menu: MenuRecord) -> Result<MenuRecord>;

    /// Menu rows for `ids` within `domain`, any order.
    async fn menus_by_ids(&self, domain: &str, ids: &[i64]) -> Result<Vec<MenuRecord>>;

    /// Distinct menu ids assigned to any of `roles` within `domain`.
    async fn menu_ids_for_roles(&self, domain: &str, roles: &[String]) -> Result<Vec<i64>>;

    async fn assign_menus(&self, domain: &str, role: &str, menu_ids: &[i64]) -> Result<()>;

    async fn unassign_menus(&self, domain: &str, role: &str, menu_ids: &[i64]) -> Result<()>;

    /// Delete a menu row and its assignments, returning whether it existed.
    async fn delete_menu(&self, domain: &str, id: i64) -> Result<bool>;
}

/// Scheduled job rows.
#[async_trait]
pub trait ScheduledJobStore: Send + Sync {
    /// Insert a job, assigning its id. Errors with
    /// [`Error::DuplicateJobName`] when `(domain, name)` is taken.
    async fn insert_job(&self, job: NewScheduledJob) -> Result<ScheduledJobRecord>;

    async fn job(&self, id: i64) -> Result<Option<ScheduledJobRecord>>;

    async fn job_by_name(&self, domain: &str, name: &str) -> Result<Option<ScheduledJobRecord>>;

    /// Update a job row, returning whether it existed.
    async fn update_job(&self, job: &ScheduledJobRecord) -> Result<bool>;

    /// Delete a job row, returning whether it existed.
    async fn delete_job(&self, id: i64) -> Result<bool>;

    async fn list_jobs(&self, domain: &str) -> Result<Vec<ScheduledJobRecord>>;

    /// Every enabled job across all domains, for reconciliation.
    async fn list_enabled(&self) -> Result<Vec<ScheduledJobRecord>>;

    /// Fold one finished run into the job's aggregate statistics, returning
    /// whether the job existed.
    async fn bump_run_stats(
        &self,
        id: i64,
        success: bool,
        run_at: DateTime<Utc>,
        duration_ms: Option<u64>,
    ) -> Result<bool>;
}

/// Execution log rows, upserted by run id.
#[async_trait]
pub trait ExecutionLogStore: Send + Sync {
    /// Insert a log row, assigning its id.
    async fn insert_log(&self, log: ExecutionLogRecord) -> Result<ExecutionLogRecord>;

    async fn log_by_run_id(&self, run_id: &str) -> Result<Option<ExecutionLogRecord>>;

    /// Update a log row, returning whether it existed.
    async fn update_log(&self, log: &ExecutionLogRecord) -> Result<bool>;

    /// Logs for one job, newest first.
    async fn logs_for_job(&self, scheduled_job_id: i64) -> Result<Vec<ExecutionLogRecord>>;
}

/// In-memory store implementing every store trait, backed by `DashMap`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    roles: DashMap<String, RoleRecord>,
    menus: DashMap<i64, MenuRecord>,
    // (domain, role) -> assigned menu ids
    role_menus: DashMap<(String, String), HashSet<i64>>,
    jobs: DashMap<i64, ScheduledJobRecord>,
    job_seq: AtomicI64,
    logs: DashMap<i64, ExecutionLogRecord>,
    log_seq: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoleStore for MemoryStore {
    async fn insert_role(&self, role: RoleRecord) -> Result<RoleRecord> {
        if self.roles.contains_key(&role.id) {
            return Err(Error::RoleAlreadyExists(role.id));
        }
        self.roles.insert(role.id.clone(), role.clone());
        Ok(role)
    }

    async fn role(&self, id: &str) -> Result<Option<RoleRecord>> {
        Ok(self.roles.get(id).map(|r| r.clone()))
    }

    async fn role_exists(&self, id: &str) -> Result<bool> {
        Ok(self.roles.contains_key(id))
    }

    async fn update_role(&self, role: &RoleRecord) -> Result<bool> {
        if !self.roles.contains_key(&role.id) {
            return Ok(false);
        }
        self.roles.insert(role.id.clone(), role.clone());
        Ok(true)
    }

    async fn delete_role(&self, id: &str) -> Result<bool> {
        Ok(self.roles.remove(id).is_some())
    }

    async fn list_roles(&self) -> Result<Vec<RoleRecord>> {
        let mut roles: Vec<RoleRecord> = self.roles.iter().map(|e| e.value().clone()).collect();
        roles.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(roles)
    }
}

#[async_trait]
impl MenuStore for MemoryStore {
    async fn insert_menu(&self, menu: MenuRecord) -> Result<MenuRecord> {
        self.menus.insert(menu.id, menu.clone());
        Ok(menu)
    }

    async fn menus_by_ids(&self, domain: &str, ids: &[i64]) -> Result<Vec<MenuRecord>> {
        let wanted: HashSet<i64> = ids.iter().copied().collect();
        let mut rows: Vec<MenuRecord> = self
            .menus
            .iter()
            .filter(|e| e.value().domain == domain && wanted.contains(&e.value().id))
            .map(|e| e.value().clone())
            .collect();
        rows.sort_by_key(|m| m.id);
        Ok(rows)
    }

    async fn menu_ids_for_roles(&self, domain: &str, roles: &[String]) -> Result<Vec<i64>> {
        let mut ids: HashSet<i64> = HashSet::new();
        for role in roles {
            if let Some(assigned) = self.role_menus.get(&(domain.to_string(), role.clone())) {
                ids.extend(assigned.iter().copied());
            }
        }
        let mut ids: Vec<i64> = ids.into_iter().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn assign_menus(&self, domain: &str, role: &str, menu_ids: &[i64]) -> Result<()> {
        self.role_menus
            .entry((domain.to_string(), role.to_string()))
            .or_default()
            .extend(menu_ids.iter().copied());
        Ok(())
    }

    async fn unassign_menus(&self, domain: &str, role: &str, menu_ids: &[i64]) -> Result<()> {
        if let Some(mut assigned) = self
            .role_menus
            .get_mut(&(domain.to_string(), role.to_string()))
        {
            for id in menu_ids {
                assigned.remove(id);
            }
        }
        Ok(())
    }

    async fn delete_menu(&self, domain: &str, id: i64) -> Result<bool> {
        let existed = self
            .menus
            .get(&id)
            .map(|menu| menu.domain == domain)
            .unwrap_or(false);
        if !existed {
            return Ok(false);
        }
        self.menus.remove(&id);
        for mut entry in self.role_menus.iter_mut() {
            if entry.key().0 == domain {
                entry.value_mut().remove(&id);
            }
        }
        Ok(true)
    }
}

#[async_trait]
impl ScheduledJobStore for MemoryStore {
    async fn insert_job(&self, job: NewScheduledJob) -> Result<ScheduledJobRecord> {
        let duplicate = self
            .jobs
            .iter()
            .any(|e| e.value().domain == job.domain && e.value().name == job.name);
        if duplicate {
            return Err(Error::DuplicateJobName {
                domain: job.domain,
                name: job.name,
            });
        }

        let id = self.job_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let now = Utc::now();
        let record = ScheduledJobRecord {
            id,
            domain: job.domain,
            name: job.name,
            handler_name: job.handler_name,
            cron_expression: job.cron_expression,
            timezone: job.timezone,
            status: job.status,
            payload: job.payload,
            retry_attempts: job.retry_attempts,
            retry_delay_ms: job.retry_delay_ms,
            timeout_ms: job.timeout_ms,
            priority: job.priority,
            total_runs: 0,
            success_runs: 0,
            failed_runs: 0,
            last_run_at: None,
            last_run_status: None,
            last_run_duration_ms: None,
            created_at: now,
            updated_at: now,
        };
        self.jobs.insert(id, record.clone());
        Ok(record)
    }

    async fn job(&self, id: i64) -> Result<Option<ScheduledJobRecord>> {
        Ok(self.jobs.get(&id).map(|j| j.clone()))
    }

    async fn job_by_name(&self, domain: &str, name: &str) -> Result<Option<ScheduledJobRecord>> {
        Ok(self
            .jobs
            .iter()
            .find(|e| e.value().domain == domain && e.value().name == name)
            .map(|e| e.value().clone()))
    }

    async fn update_job(&self, job: &ScheduledJobRecord) -> Result<bool> {
        if !self.jobs.contains_key(&job.id) {
            return Ok(false);
        }
        self.jobs.insert(job.id, job.clone());
        Ok(true)
    }

    async fn delete_job(&self, id: i64) -> Result<bool> {
        Ok(self.jobs.remove(&id).is_some())
    }

    async fn list_jobs(&self, domain: &str) -> Result<Vec<ScheduledJobRecord>> {
        let mut jobs: Vec<ScheduledJobRecord> = self
            .jobs
            .iter()
            .filter(|e| e.value().domain == domain)
            .map(|e| e.value().clone())
            .collect();
        jobs.sort_by_key(|j| j.id);
        Ok(jobs)
    }

    async fn list_enabled(&self) -> Result<Vec<ScheduledJobRecord>> {
        let mut jobs: Vec<ScheduledJobRecord> = self
            .jobs
            .iter()
            .filter(|e| e.value().status == JobStatus::Enabled)
            .map(|e| e.value().clone())
            .collect();
        jobs.sort_by_key(|j| j.id);
        Ok(jobs)
    }

    async fn bump_run_stats(
        &self,
        id: i64,
        success: bool,
        run_at: DateTime<Utc>,
        duration_ms: Option<u64>,
    ) -> Result<bool> {
        match self.jobs.get_mut(&id) {
            Some(mut job) => {
                job.total_runs += 1;
                if success {
                    job.success_runs += 1;
                } else {
                    job.failed_runs += 1;
                }
                job.last_run_at = Some(run_at);
                job.last_run_status = Some(if success {
                    ExecutionStatus::Success
                } else {
                    ExecutionStatus::Failed
                });
                job.last_run_duration_ms = duration_ms;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl ExecutionLogStore for MemoryStore {
    async fn insert_log(&self, mut log: ExecutionLogRecord) -> Result<ExecutionLogRecord> {
        log.id = self.log_seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.logs.insert(log.id, log.clone());
        Ok(log)
    }

    async fn log_by_run_id(&self, run_id: &str) -> Result<Option<ExecutionLogRecord>> {
        Ok(self
            .logs
            .iter()
            .find(|e| e.value().run_id == run_id)
            .map(|e| e.value().clone()))
    }

    async fn update_log(&self, log: &ExecutionLogRecord) -> Result<bool> {
        if !self.logs.contains_key(&log.id) {
            return Ok(false);
        }
        self.logs.insert(log.id, log.clone());
        Ok(true)
    }

    async fn logs_for_job(&self, scheduled_job_id: i64) -> Result<Vec<ExecutionLogRecord>> {
        let mut logs: Vec<ExecutionLogRecord> = self
            .logs
            .iter()
            .filter(|e| e.value().scheduled_job_id == scheduled_job_id)
            .map(|e| e.value().clone())
            .collect();
        logs.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(logs)
    }
}
