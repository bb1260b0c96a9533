//! PostgreSQL backends for the policy store and the relational stores.

#[cfg(feature = "database")]
use crate::{
    error::{Error, Result},
    execution::{ExecutionLogRecord, ExecutionStatus},
    menu::{MenuRecord, MenuStatus},
    policy::{self, GroupingRule, PolicyRule, PolicyStore, GROUPING_CHILD, GROUPING_PARENT},
    role::{RoleRecord, RoleStatus},
    scheduler::{JobStatus, NewScheduledJob, ScheduledJobRecord},
    storage::{ExecutionLogStore, MenuStore, RoleStore, ScheduledJobStore},
};

#[cfg(feature = "database")]
use async_trait::async_trait;
#[cfg(feature = "database")]
use chrono::{DateTime, Utc};
#[cfg(feature = "database")]
use sqlx::{postgres::PgRow, PgPool, Row};

/// PostgreSQL-backed policy store.
///
/// Permission and grouping rules live in two tables with uniqueness on the
/// full tuple, which is what makes add/remove idempotent under retry.
#[cfg(feature = "database")]
pub struct PgPolicyStore {
    pool: PgPool,
    table_prefix: String,
}

#[cfg(feature = "database")]
impl PgPolicyStore {
    /// Connect and bootstrap the policy schema.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| Error::Storage(format!("Database connection failed: {}", e)))?;
        Self::with_pool(pool, "admin_".to_string()).await
    }

    /// Use an existing pool with a custom table prefix.
    pub async fn with_pool(pool: PgPool, table_prefix: String) -> Result<Self> {
        let store = Self { pool, table_prefix };
        store.initialize_schema().await?;
        Ok(store)
    }

    async fn initialize_schema(&self) -> Result<()> {
        let create_policies = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id BIGSERIAL PRIMARY KEY,
                subject VARCHAR(255) NOT NULL,
                resource VARCHAR(255) NOT NULL,
                action VARCHAR(255) NOT NULL,
                UNIQUE(subject, resource, action)
            )
            "#,
            self.policies_table()
        );

        let create_groupings = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id BIGSERIAL PRIMARY KEY,
                child VARCHAR(255) NOT NULL,
                parent VARCHAR(255) NOT NULL,
                UNIQUE(child, parent)
            )
            "#,
            self.groupings_table()
        );

        sqlx::query(&create_policies)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Storage(format!("Failed to create policy table: {}", e)))?;
        sqlx::query(&create_groupings)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Storage(format!("Failed to create grouping table: {}", e)))?;

        Ok(())
    }

    fn policies_table(&self) -> String {
        format!("{}policy_rules", self.table_prefix)
    }

    fn groupings_table(&self) -> String {
        format!("{}grouping_rules", self.table_prefix)
    }

    fn rule_from_row(row: &PgRow) -> PolicyRule {
        PolicyRule {
            subject: row.get("subject"),
            resource: row.get("resource"),
            action: row.get("action"),
        }
    }
}

#[cfg(feature = "database")]
#[async_trait]
impl PolicyStore for PgPolicyStore {
    async fn add_policies(&self, rules: &[PolicyRule]) -> Result<bool> {
        let query = format!(
            "INSERT INTO {} (subject, resource, action) VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
            self.policies_table()
        );

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Storage(format!("Failed to start transaction: {}", e)))?;
        for rule in rules {
            sqlx::query(&query)
                .bind(&rule.subject)
                .bind(&rule.resource)
                .bind(&rule.action)
                .execute(&mut *tx)
                .await
                .map_err(|e| Error::PolicyStore(format!("Failed to add policy: {}", e)))?;
        }
        tx.commit()
            .await
            .map_err(|e| Error::PolicyStore(format!("Failed to commit policy add: {}", e)))?;
        Ok(true)
    }

    async fn remove_policies(&self, rules: &[PolicyRule]) -> Result<bool> {
        let query = format!(
            "DELETE FROM {} WHERE subject = $1 AND resource = $2 AND action = $3",
            self.policies_table()
        );

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Storage(format!("Failed to start transaction: {}", e)))?;
        for rule in rules {
            sqlx::query(&query)
                .bind(&rule.subject)
                .bind(&rule.resource)
                .bind(&rule.action)
                .execute(&mut *tx)
                .await
                .map_err(|e| Error::PolicyStore(format!("Failed to remove policy: {}", e)))?;
        }
        tx.commit()
            .await
            .map_err(|e| Error::PolicyStore(format!("Failed to commit policy remove: {}", e)))?;
        Ok(true)
    }

    async fn permissions_for(&self, subject: &str) -> Result<Vec<PolicyRule>> {
        let query = format!(
            "SELECT subject, resource, action FROM {} WHERE subject = $1 ORDER BY resource, action",
            self.policies_table()
        );
        let rows = sqlx::query(&query)
            .bind(subject)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::PolicyStore(format!("Failed to load permissions: {}", e)))?;
        Ok(rows.iter().map(Self::rule_from_row).collect())
    }

    async fn implicit_permissions_for(&self, subject: &str) -> Result<Vec<PolicyRule>> {
        let grouping = self.grouping_policy().await?;
        let map = policy::adjacency(&grouping);
        let mut subjects = vec![subject.to_string()];
        subjects.extend(policy::collect_ancestors(&map, subject));

        let query = format!(
            "SELECT subject, resource, action FROM {} WHERE subject = ANY($1) ORDER BY subject, resource, action",
            self.policies_table()
        );
        let rows = sqlx::query(&query)
            .bind(&subjects)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::PolicyStore(format!("Failed to load implicit permissions: {}", e)))?;
        Ok(rows.iter().map(Self::rule_from_row).collect())
    }

    async fn roles_for(&self, subject: &str) -> Result<Vec<String>> {
        let query = format!(
            "SELECT parent FROM {} WHERE child = $1 ORDER BY parent",
            self.groupings_table()
        );
        let rows = sqlx::query(&query)
            .bind(subject)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::PolicyStore(format!("Failed to load parents: {}", e)))?;
        Ok(rows.iter().map(|row| row.get("parent")).collect())
    }

    async fn implicit_roles_for(&self, subject: &str) -> Result<Vec<String>> {
        let grouping = self.grouping_policy().await?;
        let map = policy::adjacency(&grouping);
        Ok(policy::collect_ancestors(&map, subject))
    }

    async fn grouping_policy(&self) -> Result<Vec<GroupingRule>> {
        let query = format!(
            "SELECT child, parent FROM {} ORDER BY child, parent",
            self.groupings_table()
        );
        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::PolicyStore(format!("Failed to load grouping policy: {}", e)))?;
        Ok(rows
            .iter()
            .map(|row| GroupingRule {
                child: row.get("child"),
                parent: row.get("parent"),
            })
            .collect())
    }

    async fn add_grouping_policies(&self, rules: &[GroupingRule]) -> Result<bool> {
        let query = format!(
            "INSERT INTO {} (child, parent) VALUES ($1, $2) ON CONFLICT DO NOTHING",
            self.groupings_table()
        );

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Storage(format!("Failed to start transaction: {}", e)))?;
        for rule in rules {
            sqlx::query(&query)
                .bind(&rule.child)
                .bind(&rule.parent)
                .execute(&mut *tx)
                .await
                .map_err(|e| Error::PolicyStore(format!("Failed to add grouping: {}", e)))?;
        }
        tx.commit()
            .await
            .map_err(|e| Error::PolicyStore(format!("Failed to commit grouping add: {}", e)))?;
        Ok(true)
    }

    async fn remove_filtered_grouping_policy(
        &self,
        field_index: usize,
        value: &str,
    ) -> Result<bool> {
        let column = match field_index {
            GROUPING_CHILD => "child",
            GROUPING_PARENT => "parent",
            _ => {
                return Err(Error::PolicyStore(format!(
                    "unsupported grouping field index {field_index}"
                )))
            }
        };
        let query = format!(
            "DELETE FROM {} WHERE {column} = $1",
            self.groupings_table()
        );
        sqlx::query(&query)
            .bind(value)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::PolicyStore(format!("Failed to remove groupings: {}", e)))?;
        Ok(true)
    }
}

/// PostgreSQL-backed store for roles, menus, jobs, and execution logs.
#[cfg(feature = "database")]
pub struct PgAdminStore {
    pool: PgPool,
    table_prefix: String,
}

#[cfg(feature = "database")]
impl PgAdminStore {
    /// Connect and bootstrap the admin schema.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| Error::Storage(format!("Database connection failed: {}", e)))?;
        Self::with_pool(pool, "admin_".to_string()).await
    }

    /// Use an existing pool with a custom table prefix.
    pub async fn with_pool(pool: PgPool, table_prefix: String) -> Result<Self> {
        let store = Self { pool, table_prefix };
        store.initialize_schema().await?;
        Ok(store)
    }

    async fn initialize_schema(&self) -> Result<()> {
        let statements = [
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    id VARCHAR(255) PRIMARY KEY,
                    name VARCHAR(255) NOT NULL,
                    description TEXT,
                    status VARCHAR(32) NOT NULL DEFAULT 'enabled',
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )
                "#,
                self.roles_table()
            ),
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    id BIGINT PRIMARY KEY,
                    domain VARCHAR(255) NOT NULL,
                    pid BIGINT,
                    name VARCHAR(255) NOT NULL,
                    path VARCHAR(255) NOT NULL,
                    component VARCHAR(255),
                    sort_order INT NOT NULL DEFAULT 0,
                    status VARCHAR(32) NOT NULL DEFAULT 'enabled',
                    hidden BOOLEAN NOT NULL DEFAULT false
                )
                "#,
                self.menus_table()
            ),
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    id BIGSERIAL PRIMARY KEY,
                    domain VARCHAR(255) NOT NULL,
                    role_id VARCHAR(255) NOT NULL,
                    menu_id BIGINT NOT NULL,
                    UNIQUE(domain, role_id, menu_id)
                )
                "#,
                self.role_menus_table()
            ),
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    id BIGSERIAL PRIMARY KEY,
                    domain VARCHAR(255) NOT NULL,
                    name VARCHAR(255) NOT NULL,
                    handler_name VARCHAR(255) NOT NULL,
                    cron_expression VARCHAR(255) NOT NULL,
                    timezone VARCHAR(64),
                    status VARCHAR(32) NOT NULL DEFAULT 'enabled',
                    payload JSONB NOT NULL DEFAULT '{{}}',
                    retry_attempts INT NOT NULL DEFAULT 0,
                    retry_delay_ms BIGINT NOT NULL DEFAULT 0,
                    timeout_ms BIGINT NOT NULL DEFAULT 0,
                    priority INT NOT NULL DEFAULT 0,
                    total_runs BIGINT NOT NULL DEFAULT 0,
                    success_runs BIGINT NOT NULL DEFAULT 0,
                    failed_runs BIGINT NOT NULL DEFAULT 0,
                    last_run_at TIMESTAMPTZ,
                    last_run_status VARCHAR(32),
                    last_run_duration_ms BIGINT,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    UNIQUE(domain, name)
                )
                "#,
                self.jobs_table()
            ),
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    id BIGSERIAL PRIMARY KEY,
                    scheduled_job_id BIGINT NOT NULL,
                    run_id VARCHAR(255) NOT NULL UNIQUE,
                    status VARCHAR(32) NOT NULL,
                    started_at TIMESTAMPTZ,
                    finished_at TIMESTAMPTZ,
                    duration_ms BIGINT,
                    result_data JSONB,
                    error_message TEXT,
                    retry_count INT NOT NULL DEFAULT 0
                )
                "#,
                self.logs_table()
            ),
        ];

        for statement in &statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| Error::Storage(format!("Failed to create table: {}", e)))?;
        }
        Ok(())
    }

    fn roles_table(&self) -> String {
        format!("{}roles", self.table_prefix)
    }

    fn menus_table(&self) -> String {
        format!("{}menus", self.table_prefix)
    }

    fn role_menus_table(&self) -> String {
        format!("{}role_menus", self.table_prefix)
    }

    fn jobs_table(&self) -> String {
        format!("{}scheduled_jobs", self.table_prefix)
    }

    fn logs_table(&self) -> String {
        format!("{}execution_logs", self.table_prefix)
    }

    fn role_from_row(row: &PgRow) -> Result<RoleRecord> {
        let status: String = row.get("status");
        Ok(RoleRecord {
            id: row.get("id"),
            name: row.get("name"),
            description: row.get("description"),
            status: RoleStatus::parse(&status)
                .ok_or_else(|| Error::Storage(format!("unknown role status '{status}'")))?,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    fn menu_from_row(row: &PgRow) -> Result<MenuRecord> {
        let status: String = row.get("status");
        Ok(MenuRecord {
            id: row.get("id"),
            domain: row.get("domain"),
            pid: row.get("pid"),
            name: row.get("name"),
            path: row.get("path"),
            component: row.get("component"),
            order: row.get("sort_order"),
            status: MenuStatus::parse(&status)
                .ok_or_else(|| Error::Storage(format!("unknown menu status '{status}'")))?,
            hidden: row.get("hidden"),
        })
    }

    fn job_from_row(row: &PgRow) -> Result<ScheduledJobRecord> {
        let status: String = row.get("status");
        let last_run_status: Option<String> = row.get("last_run_status");
        let last_run_status = match last_run_status {
            Some(s) => Some(
                ExecutionStatus::parse(&s)
                    .ok_or_else(|| Error::Storage(format!("unknown run status '{s}'")))?,
            ),
            None => None,
        };
        Ok(ScheduledJobRecord {
            id: row.get("id"),
            domain: row.get("domain"),
            name: row.get("name"),
            handler_name: row.get("handler_name"),
            cron_expression: row.get("cron_expression"),
            timezone: row.get("timezone"),
            status: JobStatus::parse(&status)
                .ok_or_else(|| Error::Storage(format!("unknown job status '{status}'")))?,
            payload: row.get("payload"),
            retry_attempts: row.get::<i32, _>("retry_attempts") as u32,
            retry_delay_ms: row.get::<i64, _>("retry_delay_ms") as u64,
            timeout_ms: row.get::<i64, _>("timeout_ms") as u64,
            priority: row.get("priority"),
            total_runs: row.get::<i64, _>("total_runs") as u64,
            success_runs: row.get::<i64, _>("success_runs") as u64,
            failed_runs: row.get::<i64, _>("failed_runs") as u64,
            last_run_at: row.get("last_run_at"),
            last_run_status,
            last_run_duration_ms: row
                .get::<Option<i64>, _>("last_run_duration_ms")
                .map(|d| d as u64),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    fn log_from_row(row: &PgRow) -> Result<ExecutionLogRecord> {
        let status: String = row.get("status");
        Ok(ExecutionLogRecord {
            id: row.get("id"),
            scheduled_job_id: row.get("scheduled_job_id"),
            run_id: row.get("run_id"),
            status: ExecutionStatus::parse(&status)
                .ok_or_else(|| Error::Storage(format!("unknown run status '{status}'")))?,
            started_at: row.get("started_at"),
            finished_at: row.get("finished_at"),
            duration_ms: row.get::<Option<i64>, _>("duration_ms").map(|d| d as u64),
            result_data: row.get("result_data"),
            error_message: row.get("error_message"),
            retry_count: row.get::<i32, _>("retry_count") as u32,
        })
    }

    fn is_unique_violation(e: &sqlx::Error) -> bool {
        matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
    }
}

#[cfg(feature = "database")]
#[async_trait]
impl RoleStore for PgAdminStore {
    async fn insert_role(&self, role: RoleRecord) -> Result<RoleRecord> {
        let query = format!(
            "INSERT INTO {} (id, name, description, status, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6)",
            self.roles_table()
        );
        sqlx::query(&query)
            .bind(&role.id)
            .bind(&role.name)
            .bind(&role.description)
            .bind(role.status.as_str())
            .bind(role.created_at)
            .bind(role.updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if Self::is_unique_violation(&e) {
                    Error::RoleAlreadyExists(role.id.clone())
                } else {
                    Error::Storage(format!("Failed to insert role: {}", e))
                }
            })?;
        Ok(role)
    }

    async fn role(&self, id: &str) -> Result<Option<RoleRecord>> {
        let query = format!(
            "SELECT id, name, description, status, created_at, updated_at FROM {} WHERE id = $1",
            self.roles_table()
        );
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::Storage(format!("Failed to get role: {}", e)))?;
        row.map(|r| Self::role_from_row(&r)).transpose()
    }

    async fn role_exists(&self, id: &str) -> Result<bool> {
        Ok(self.role(id).await?.is_some())
    }

    async fn update_role(&self, role: &RoleRecord) -> Result<bool> {
        let query = format!(
            "UPDATE {} SET name = $2, description = $3, status = $4, updated_at = NOW() WHERE id = $1",
            self.roles_table()
        );
        let result = sqlx::query(&query)
            .bind(&role.id)
            .bind(&role.name)
            .bind(&role.description)
            .bind(role.status.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Storage(format!("Failed to update role: {}", e)))?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_role(&self, id: &str) -> Result<bool> {
        let query = format!("DELETE FROM {} WHERE id = $1", self.roles_table());
        let result = sqlx::query(&query)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Storage(format!("Failed to delete role: {}", e)))?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_roles(&self) -> Result<Vec<RoleRecord>> {
        let query = format!(
            "SELECT id, name, description, status, created_at, updated_at FROM {} ORDER BY id",
            self.roles_table()
        );
        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::Storage(format!("Failed to list roles: {}", e)))?;
        rows.iter().map(Self::role_from_row).collect()
    }
}

#[cfg(feature = "database")]
#[async_trait]
impl MenuStore for PgAdminStore {
    async fn insert_menu(&self, menu: MenuRecord) -> Result<MenuRecord> {
        let query = format!(
            r#"
            INSERT INTO {} (id, domain, pid, name, path, component, sort_order, status, hidden)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                pid = EXCLUDED.pid, name = EXCLUDED.name, path = EXCLUDED.path,
                component = EXCLUDED.component, sort_order = EXCLUDED.sort_order,
                status = EXCLUDED.status, hidden = EXCLUDED.hidden
            "#,
            self.menus_table()
        );
        sqlx::query(&query)
            .bind(menu.id)
            .bind(&menu.domain)
            .bind(menu.pid)
            .bind(&menu.name)
            .bind(&menu.path)
            .bind(&menu.component)
            .bind(menu.order)
            .bind(menu.status.as_str())
            .bind(menu.hidden)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Storage(format!("Failed to insert menu: {}", e)))?;
        Ok(menu)
    }

    async fn menus_by_ids(&self, domain: &str, ids: &[i64]) -> Result<Vec<MenuRecord>> {
        let query = format!(
            "SELECT id, domain, pid, name, path, component, sort_order, status, hidden FROM {} WHERE domain = $1 AND id = ANY($2)",
            self.menus_table()
        );
        let rows = sqlx::query(&query)
            .bind(domain)
            .bind(ids)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::Storage(format!("Failed to load menus: {}", e)))?;
        rows.iter().map(Self::menu_from_row).collect()
    }

    async fn menu_ids_for_roles(&self, domain: &str, roles: &[String]) -> Result<Vec<i64>> {
        let query = format!(
            "SELECT DISTINCT menu_id FROM {} WHERE domain = $1 AND role_id = ANY($2) ORDER BY menu_id",
            self.role_menus_table()
        );
        let rows = sqlx::query(&query)
            .bind(domain)
            .bind(roles)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::Storage(format!("Failed to load menu assignments: {}", e)))?;
        Ok(rows.iter().map(|row| row.get("menu_id")).collect())
    }

    async fn assign_menus(&self, domain: &str, role: &str, menu_ids: &[i64]) -> Result<()> {
        let query = format!(
            "INSERT INTO {} (domain, role_id, menu_id) VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
            self.role_menus_table()
        );
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Storage(format!("Failed to start transaction: {}", e)))?;
        for menu_id in menu_ids {
            sqlx::query(&query)
                .bind(domain)
                .bind(role)
                .bind(menu_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| Error::Storage(format!("Failed to assign menu: {}", e)))?;
        }
        tx.commit()
            .await
            .map_err(|e| Error::Storage(format!("Failed to commit assignment: {}", e)))?;
        Ok(())
    }

    async fn unassign_menus(&self, domain: &str, role: &str, menu_ids: &[i64]) -> Result<()> {
        let query = format!(
            "DELETE FROM {} WHERE domain = $1 AND role_id = $2 AND menu_id = ANY($3)",
            self.role_menus_table()
        );
        sqlx::query(&query)
            .bind(domain)
            .bind(role)
            .bind(menu_ids)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Storage(format!("Failed to unassign menus: {}", e)))?;
        Ok(())
    }

    async fn delete_menu(&self, domain: &str, id: i64) -> Result<bool> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Storage(format!("Failed to start transaction: {}", e)))?;

        let delete_assignments = format!(
            "DELETE FROM {} WHERE domain = $1 AND menu_id = $2",
            self.role_menus_table()
        );
        sqlx::query(&delete_assignments)
            .bind(domain)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Storage(format!("Failed to delete assignments: {}", e)))?;

        let delete_menu = format!(
            "DELETE FROM {} WHERE domain = $1 AND id = $2",
            self.menus_table()
        );
        let result = sqlx::query(&delete_menu)
            .bind(domain)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Storage(format!("Failed to delete menu: {}", e)))?;

        tx.commit()
            .await
            .map_err(|e| Error::Storage(format!("Failed to commit menu delete: {}", e)))?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(feature = "database")]
#[async_trait]
impl ScheduledJobStore for PgAdminStore {
    async fn insert_job(&self, job: NewScheduledJob) -> Result<ScheduledJobRecord> {
        let query = format!(
            r#"
            INSERT INTO {} (domain, name, handler_name, cron_expression, timezone, status,
                            payload, retry_attempts, retry_delay_ms, timeout_ms, priority)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING id, domain, name, handler_name, cron_expression, timezone, status, payload,
                      retry_attempts, retry_delay_ms, timeout_ms, priority, total_runs,
                      success_runs, failed_runs, last_run_at, last_run_status,
                      last_run_duration_ms, created_at, updated_at
            "#,
            self.jobs_table()
        );
        let row = sqlx::query(&query)
            .bind(&job.domain)
            .bind(&job.name)
            .bind(&job.handler_name)
            .bind(&job.cron_expression)
            .bind(&job.timezone)
            .bind(job.status.as_str())
            .bind(&job.payload)
            .bind(job.retry_attempts as i32)
            .bind(job.retry_delay_ms as i64)
            .bind(job.timeout_ms as i64)
            .bind(job.priority)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                if Self::is_unique_violation(&e) {
                    Error::DuplicateJobName {
                        domain: job.domain.clone(),
                        name: job.name.clone(),
                    }
                } else {
                    Error::Storage(format!("Failed to insert job: {}", e))
                }
            })?;
        Self::job_from_row(&row)
    }

    async fn job(&self, id: i64) -> Result<Option<ScheduledJobRecord>> {
        let query = format!("SELECT * FROM {} WHERE id = $1", self.jobs_table());
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::Storage(format!("Failed to get job: {}", e)))?;
        row.map(|r| Self::job_from_row(&r)).transpose()
    }

    async fn job_by_name(&self, domain: &str, name: &str) -> Result<Option<ScheduledJobRecord>> {
        let query = format!(
            "SELECT * FROM {} WHERE domain = $1 AND name = $2",
            self.jobs_table()
        );
        let row = sqlx::query(&query)
            .bind(domain)
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::Storage(format!("Failed to get job by name: {}", e)))?;
        row.map(|r| Self::job_from_row(&r)).transpose()
    }

    async fn update_job(&self, job: &ScheduledJobRecord) -> Result<bool> {
        let query = format!(
            r#"
            UPDATE {} SET name = $2, handler_name = $3, cron_expression = $4, timezone = $5,
                          status = $6, payload = $7, retry_attempts = $8, retry_delay_ms = $9,
                          timeout_ms = $10, priority = $11, updated_at = NOW()
            WHERE id = $1
            "#,
            self.jobs_table()
        );
        let result = sqlx::query(&query)
            .bind(job.id)
            .bind(&job.name)
            .bind(&job.handler_name)
            .bind(&job.cron_expression)
            .bind(&job.timezone)
            .bind(job.status.as_str())
            .bind(&job.payload)
            .bind(job.retry_attempts as i32)
            .bind(job.retry_delay_ms as i64)
            .bind(job.timeout_ms as i64)
            .bind(job.priority)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if Self::is_unique_violation(&e) {
                    Error::DuplicateJobName {
                        domain: job.domain.clone(),
                        name: job.name.clone(),
                    }
                } else {
                    Error::Storage(format!("Failed to update job: {}", e))
                }
            })?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_job(&self, id: i64) -> Result<bool> {
        let query = format!("DELETE FROM {} WHERE id = $1", self.jobs_table());
        let result = sqlx::query(&query)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Storage(format!("Failed to delete job: {}", e)))?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_jobs(&self, domain: &str) -> Result<Vec<ScheduledJobRecord>> {
        let query = format!(
            "SELECT * FROM {} WHERE domain = $1 ORDER BY id",
            self.jobs_table()
        );
        let rows = sqlx::query(&query)
            .bind(domain)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::Storage(format!("Failed to list jobs: {}", e)))?;
        rows.iter().map(Self::job_from_row).collect()
    }

    async fn list_enabled(&self) -> Result<Vec<ScheduledJobRecord>> {
        let query = format!(
            "SELECT * FROM {} WHERE status = 'enabled' ORDER BY id",
            self.jobs_table()
        );
        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::Storage(format!("Failed to list enabled jobs: {}", e)))?;
        rows.iter().map(Self::job_from_row).collect()
    }

    async fn bump_run_stats(
        &self,
        id: i64,
        success: bool,
        run_at: DateTime<Utc>,
        duration_ms: Option<u64>,
    ) -> Result<bool> {
        // Relative increments keep concurrent executions from losing counts
        let query = format!(
            r#"
            UPDATE {} SET
                total_runs = total_runs + 1,
                success_runs = success_runs + CASE WHEN $2 THEN 1 ELSE 0 END,
                failed_runs = failed_runs + CASE WHEN $2 THEN 0 ELSE 1 END,
                last_run_at = $3,
                last_run_status = CASE WHEN $2 THEN 'success' ELSE 'failed' END,
                last_run_duration_ms = $4
            WHERE id = $1
            "#,
            self.jobs_table()
        );
        let result = sqlx::query(&query)
            .bind(id)
            .bind(success)
            .bind(run_at)
            .bind(duration_ms.map(|d| d as i64))
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Storage(format!("Failed to update job statistics: {}", e)))?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(feature = "database")]
#[async_trait]
impl ExecutionLogStore for PgAdminStore {
    async fn insert_log(&self, log: ExecutionLogRecord) -> Result<ExecutionLogRecord> {
        let query = format!(
            r#"
            INSERT INTO {} (scheduled_job_id, run_id, status, started_at, finished_at,
                            duration_ms, result_data, error_message, retry_count)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id, scheduled_job_id, run_id, status, started_at, finished_at,
                      duration_ms, result_data, error_message, retry_count
            "#,
            self.logs_table()
        );
        let row = sqlx::query(&query)
            .bind(log.scheduled_job_id)
            .bind(&log.run_id)
            .bind(log.status.as_str())
            .bind(log.started_at)
            .bind(log.finished_at)
            .bind(log.duration_ms.map(|d| d as i64))
            .bind(&log.result_data)
            .bind(&log.error_message)
            .bind(log.retry_count as i32)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| Error::Storage(format!("Failed to insert execution log: {}", e)))?;
        Self::log_from_row(&row)
    }

    async fn log_by_run_id(&self, run_id: &str) -> Result<Option<ExecutionLogRecord>> {
        let query = format!("SELECT * FROM {} WHERE run_id = $1", self.logs_table());
        let row = sqlx::query(&query)
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::Storage(format!("Failed to get execution log: {}", e)))?;
        row.map(|r| Self::log_from_row(&r)).transpose()
    }

    async fn update_log(&self, log: &ExecutionLogRecord) -> Result<bool> {
        let query = format!(
            r#"
            UPDATE {} SET status = $2, started_at = $3, finished_at = $4, duration_ms = $5,
                          result_data = $6, error_message = $7, retry_count = $8
            WHERE id = $1
            "#,
            self.logs_table()
        );
        let result = sqlx::query(&query)
            .bind(log.id)
            .bind(log.status.as_str())
            .bind(log.started_at)
            .bind(log.finished_at)
            .bind(log.duration_ms.map(|d| d as i64))
            .bind(&log.result_data)
            .bind(&log.error_message)
            .bind(log.retry_count as i32)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Storage(format!("Failed to update execution log: {}", e)))?;
        Ok(result.rows_affected() > 0)
    }

    async fn logs_for_job(&self, scheduled_job_id: i64) -> Result<Vec<ExecutionLogRecord>> {
        let query = format!(
            "SELECT * FROM {} WHERE scheduled_job_id = $1 ORDER BY id DESC",
            self.logs_table()
        );
        let rows = sqlx::query(&query)
            .bind(scheduled_job_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::Storage(format!("Failed to list execution logs: {}", e)))?;
        rows.iter().map(Self::log_from_row).collect()
    }
}
