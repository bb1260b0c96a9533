//! Permission assignment with full-replace semantics.
//!
//! Callers supply the complete desired permission set for a role; the service
//! computes a minimal diff against the role's current direct permissions and
//! applies it as remove-then-add. A permission the role already receives
//! through inheritance cannot be assigned directly.

#[cfg(feature = "audit")]
use log::info;
use log::error;

use crate::{
    error::{Error, Result},
    hierarchy::RoleHierarchy,
    metrics::AdminMetrics,
    policy::{PolicyRule, PolicyStore},
    storage::RoleStore,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Outcome of a [`PermissionAssignments::save_permissions`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveReport {
    /// Rules newly added.
    pub added: usize,
    /// Rules removed.
    pub removed: usize,
    /// Size of the desired set the role now holds.
    pub total: usize,
}

/// Service reconciling a role's desired permission set against its current
/// direct permissions.
#[derive(Clone)]
pub struct PermissionAssignments {
    policy: Arc<dyn PolicyStore>,
    roles: Arc<dyn RoleStore>,
    hierarchy: RoleHierarchy,
    metrics: Arc<AdminMetrics>,
}

impl PermissionAssignments {
    /// Create a new assignment service.
    pub fn new(
        policy: Arc<dyn PolicyStore>,
        roles: Arc<dyn RoleStore>,
        metrics: Arc<AdminMetrics>,
    ) -> Self {
        let hierarchy = RoleHierarchy::new(Arc::clone(&policy));
        Self {
            policy,
            roles,
            hierarchy,
            metrics,
        }
    }

    /// The hierarchy manager sharing this service's policy store.
    pub fn hierarchy(&self) -> &RoleHierarchy {
        &self.hierarchy
    }

    /// Replace `role_id`'s direct permissions with `desired`, optionally
    /// replacing its parent roles first.
    ///
    /// Validation order, with no mutation before the first failure:
    /// 1. the role row must exist,
    /// 2. every entry of `parent_role_ids` must exist and must not close an
    ///    inheritance cycle,
    /// 3. no desired permission may duplicate one inherited from an ancestor.
    ///
    /// The diff is then applied remove-first. If the add step fails after a
    /// successful remove, the removed rules are re-added best-effort; a failed
    /// re-add is reported as [`Error::RollbackFailed`].
    pub async fn save_permissions(
        &self,
        role_id: &str,
        desired: &[(String, String)],
        parent_role_ids: Option<&[String]>,
    ) -> Result<SaveReport> {
        if !self.roles.role_exists(role_id).await? {
            return Err(Error::RoleNotFound(role_id.to_string()));
        }

        if let Some(parents) = parent_role_ids {
            let mut missing = Vec::new();
            for parent in parents {
                if !self.roles.role_exists(parent).await? {
                    missing.push(parent.clone());
                }
            }
            if !missing.is_empty() {
                return Err(Error::ParentRolesNotFound(missing));
            }
            // set_parents re-runs the circular check before touching edges
            self.hierarchy.set_parents(role_id, parents).await?;
        }

        let direct = self.policy.permissions_for(role_id).await?;
        let implicit = self.policy.implicit_permissions_for(role_id).await?;

        let direct_by_key: HashMap<String, PolicyRule> =
            direct.into_iter().map(|r| (r.key(), r)).collect();
        let inherited_only: HashSet<String> = implicit
            .iter()
            .map(PolicyRule::key)
            .filter(|key| !direct_by_key.contains_key(key))
            .collect();

        let desired_by_key: HashMap<String, PolicyRule> = desired
            .iter()
            .map(|(resource, action)| {
                let rule = PolicyRule::new(role_id, resource.clone(), action.clone());
                (rule.key(), rule)
            })
            .collect();

        let mut duplicated: Vec<String> = desired_by_key
            .keys()
            .filter(|key| inherited_only.contains(*key))
            .cloned()
            .collect();
        if !duplicated.is_empty() {
            duplicated.sort();
            return Err(Error::InheritedPermissions(duplicated));
        }

        let to_remove: Vec<PolicyRule> = direct_by_key
            .iter()
            .filter(|(key, _)| !desired_by_key.contains_key(*key))
            .map(|(_, rule)| rule.clone())
            .collect();
        let to_add: Vec<PolicyRule> = desired_by_key
            .iter()
            .filter(|(key, _)| !direct_by_key.contains_key(*key))
            .map(|(_, rule)| rule.clone())
            .collect();

        if !to_remove.is_empty() {
            // Remove before add, so rollback has a well-defined meaning
            if !self.policy.remove_policies(&to_remove).await? {
                return Err(Error::PolicyStore(format!(
                    "removing {} permission rules for role '{role_id}' was refused",
                    to_remove.len()
                )));
            }
            self.metrics.record_rules_removed(to_remove.len());
        }

        if !to_add.is_empty() {
            let add_failure = match self.policy.add_policies(&to_add).await {
                Ok(true) => None,
                Ok(false) => Some(format!(
                    "adding {} permission rules for role '{role_id}' was refused",
                    to_add.len()
                )),
                Err(e) => Some(e.to_string()),
            };

            if let Some(reason) = add_failure {
                return Err(self.roll_back(role_id, &to_remove, reason).await);
            }
            self.metrics.record_rules_added(to_add.len());
        }

        #[cfg(feature = "audit")]
        info!(
            "Permissions saved for role '{role_id}': {} added, {} removed",
            to_add.len(),
            to_remove.len()
        );

        Ok(SaveReport {
            added: to_add.len(),
            removed: to_remove.len(),
            total: desired.len(),
        })
    }

    /// Delete a role row together with its policy tuples.
    ///
    /// Direct permissions and inheritance edges are purged strictly before the
    /// row delete so no dangling tuples can be observed. A deleted role cannot
    /// participate in the hierarchy again without being recreated.
    pub async fn delete_role(&self, role_id: &str) -> Result<()> {
        if !self.roles.role_exists(role_id).await? {
            return Err(Error::RoleNotFound(role_id.to_string()));
        }

        let direct = self.policy.permissions_for(role_id).await?;
        if !direct.is_empty() {
            self.policy.remove_policies(&direct).await?;
            self.metrics.record_rules_removed(direct.len());
        }
        self.hierarchy.clean_inheritance(role_id).await?;
        self.roles.delete_role(role_id).await?;

        #[cfg(feature = "audit")]
        info!("Role '{role_id}' deleted with {} direct rules purged", direct.len());

        Ok(())
    }

    /// Best-effort compensating re-add of rules removed earlier in the call.
    async fn roll_back(&self, role_id: &str, removed: &[PolicyRule], reason: String) -> Error {
        self.metrics.record_rollback_attempted();

        if removed.is_empty() {
            return Error::PolicyStore(reason);
        }

        match self.policy.add_policies(removed).await {
            Ok(true) => {
                self.metrics.record_rules_added(removed.len());
                Error::PolicyStore(reason)
            }
            Ok(false) | Err(_) => {
                self.metrics.record_rollback_failed();
                error!(
                    "Rollback failed for role '{role_id}': {} removed rules could not be restored",
                    removed.len()
                );
                Error::RollbackFailed {
                    role: role_id.to_string(),
                    expected: removed.len(),
                    restored: 0,
                    reason,
                }
            }
        }
    }
}
