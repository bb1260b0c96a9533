//! # Domain Admin
//!
//! Core services for a domain-scoped (multi-tenant) admin backend: an RBAC
//! permission engine with role inheritance, menu route resolution with
//! cache-aside reads, and a cron job registry coordinating a durable queue.
//!
//! ## Features
//!
//! - Role inheritance as an acyclic grouping relation with cycle detection
//! - Full-replace permission assignment computed as a minimal diff, with
//!   remove-then-add ordering and compensating rollback
//! - Rejection of direct assignments that duplicate inherited permissions
//! - User route trees resolved through the inheritance closure and cached
//!   per user and domain, invalidated domain-wide
//! - Scheduled job definitions reconciled against an external recurring-job
//!   scheduler, with per-run execution logs and aggregate statistics
//! - Pluggable policy store, relational store, cache, and scheduler seams
//!   with in-memory implementations; PostgreSQL backends behind the
//!   `database` feature
//!
//! ## Quick Start
//!
//! ```rust
//! use domain_admin::{
//!     AdminMetrics, MemoryPolicyStore, MemoryStore, PermissionAssignments, RoleRecord,
//! };
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let policy = Arc::new(MemoryPolicyStore::new());
//! let store = Arc::new(MemoryStore::new());
//! let metrics = Arc::new(AdminMetrics::new());
//!
//! let assignments = PermissionAssignments::new(policy, store.clone(), metrics);
//!
//! use domain_admin::storage::RoleStore;
//! store.insert_role(RoleRecord::new("editor", "Editor")).await?;
//!
//! let report = assignments
//!     .save_permissions(
//!         "editor",
//!         &[("articles".to_string(), "write".to_string())],
//!         None,
//!     )
//!     .await?;
//! assert_eq!(report.added, 1);
//! # Ok::<(), domain_admin::Error>(())
//! # });
//! ```
//!
//! ## Audit Logging
//!
//! With the `audit` feature enabled, role, permission, and scheduler
//! mutations are logged through the standard logging facade. Scheduler
//! desync warnings and rollback failures are logged regardless of the
//! feature, since operators must be able to see them.

#[cfg(feature = "audit")]
pub fn init_audit_logger() {
    env_logger::init();
}

pub mod assignment;
pub mod cache;
pub mod cron;
pub mod database;
pub mod error;
pub mod execution;
pub mod hierarchy;
pub mod menu;
pub mod metrics;
pub mod policy;
pub mod property_tests;
pub mod resolver;
pub mod role;
pub mod scheduler;
pub mod storage;

// Re-export main types for convenience
pub use crate::{
    assignment::{PermissionAssignments, SaveReport},
    cache::{Cache, MemoryCache},
    error::Error,
    execution::{ExecutionLogRecord, ExecutionStatus, ExecutionTracker, ExecutionUpdate},
    hierarchy::RoleHierarchy,
    menu::{MenuNode, MenuRecord, MenuStatus, RouteTree},
    metrics::{AdminMetrics, MetricsSnapshot},
    policy::{GroupingRule, MemoryPolicyStore, PolicyRule, PolicyStore},
    resolver::{ResolverConfig, RouteResolver},
    role::{RoleRecord, RoleStatus, RoleWithParents},
    scheduler::{
        HandlerRegistry, JobRegistry, JobStatus, MemoryScheduler, NewScheduledJob,
        ReconcileReport, RecurringScheduler, ScheduledJobRecord, ScheduledJobUpdate,
    },
    storage::MemoryStore,
};

#[cfg(feature = "database")]
pub use crate::database::{PgAdminStore, PgPolicyStore};
