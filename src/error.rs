//! Error types for the admin core.

use thiserror::Error;

/// The main error type for admin core operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Role with the given id was not found.
    #[error("Role '{0}' not found")]
    RoleNotFound(String),

    /// Role with the given id already exists.
    #[error("Role '{0}' already exists")]
    RoleAlreadyExists(String),

    /// One or more parent roles referenced in an assignment do not exist.
    #[error("Parent roles do not exist: {}", .0.join(", "))]
    ParentRolesNotFound(Vec<String>),

    /// Setting the requested parents would create an inheritance cycle.
    #[error("Circular inheritance detected for role '{0}'")]
    CircularInheritance(String),

    /// A permission already received through inheritance cannot be assigned directly.
    #[error("Cannot directly assign inherited permissions: {}", .0.join(", "))]
    InheritedPermissions(Vec<String>),

    /// Scheduled job with the given id was not found.
    #[error("Scheduled job '{0}' not found")]
    JobNotFound(i64),

    /// A scheduled job with the same name already exists in the domain.
    #[error("Scheduled job '{name}' already exists in domain '{domain}'")]
    DuplicateJobName { domain: String, name: String },

    /// Cron expression failed validation.
    #[error("Invalid cron expression: {0}")]
    InvalidCron(String),

    /// Job handler name is not registered.
    #[error("Unknown job handler '{0}'")]
    UnknownHandler(String),

    /// Timezone string is not a valid IANA timezone.
    #[error("Invalid timezone '{0}'")]
    InvalidTimezone(String),

    /// A policy store operation failed or was refused.
    #[error("Policy store operation failed: {0}")]
    PolicyStore(String),

    /// A compensating re-add after a failed permission add also failed.
    ///
    /// The role is left with fewer direct permissions than before the call.
    /// Surfaced as its own variant so operators can detect the inconsistency
    /// instead of seeing a generic store failure.
    #[error(
        "Permission rollback failed for role '{role}': {restored} of {expected} tuples restored ({reason})"
    )]
    RollbackFailed {
        role: String,
        expected: usize,
        restored: usize,
        reason: String,
    },

    /// Relational storage operation failed.
    #[error("Storage operation failed: {0}")]
    Storage(String),

    /// External scheduler operation failed.
    #[error("Scheduler operation failed: {0}")]
    Scheduler(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for admin core operations.
pub type Result<T> = std::result::Result<T, Error>;
