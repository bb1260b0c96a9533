//! Role records and enrichment types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether a role is usable for authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleStatus {
    Enabled,
    Disabled,
}

impl RoleStatus {
    /// Stable string form used by relational backends.
    pub fn as_str(&self) -> &'static str {
        match self {
            RoleStatus::Enabled => "enabled",
            RoleStatus::Disabled => "disabled",
        }
    }

    /// Parse the stable string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "enabled" => Some(RoleStatus::Enabled),
            "disabled" => Some(RoleStatus::Disabled),
            _ => None,
        }
    }
}

/// A role row in the relational store.
///
/// Permission and inheritance edges live in the policy store, not here;
/// consistency is procedural: deleting a role purges its tuples first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleRecord {
    /// Stable role id, also the policy-store subject.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    pub description: Option<String>,
    pub status: RoleStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RoleRecord {
    /// Create an enabled role with the given id and name.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            status: RoleStatus::Enabled,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the role description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the role status.
    pub fn with_status(mut self, status: RoleStatus) -> Self {
        self.status = status;
        self
    }
}

/// A role together with its direct parent role ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleWithParents {
    #[serde(flatten)]
    pub role: RoleRecord,
    pub parent_roles: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_builders() {
        let role = RoleRecord::new("editor", "Editor")
            .with_description("Can edit articles")
            .with_status(RoleStatus::Disabled);

        assert_eq!(role.id, "editor");
        assert_eq!(role.description.as_deref(), Some("Can edit articles"));
        assert_eq!(role.status, RoleStatus::Disabled);
    }

    #[test]
    fn test_status_round_trip() {
        assert_eq!(RoleStatus::parse("enabled"), Some(RoleStatus::Enabled));
        assert_eq!(RoleStatus::parse(RoleStatus::Disabled.as_str()), Some(RoleStatus::Disabled));
        assert_eq!(RoleStatus::parse("paused"), None);
    }
}
