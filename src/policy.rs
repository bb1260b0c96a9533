//! Policy store abstraction and tuple types.
//!
//! The policy store holds two relation kinds: permission rules
//! `(subject, resource, action)` and grouping rules `(child, parent)` that
//! form the role inheritance graph. All mutating operations are idempotent
//! under retry and report success as a boolean instead of failing on
//! expected no-matching-rows conditions.

use crate::error::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

/// A permission rule granting `subject` the right to perform `action` on
/// `resource`. The effect is always "allow"; deny rules are not modeled.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolicyRule {
    /// The role id the rule is attached to.
    pub subject: String,
    /// The resource the rule applies to.
    pub resource: String,
    /// The action being granted.
    pub action: String,
}

impl PolicyRule {
    /// Create a new permission rule.
    pub fn new(
        subject: impl Into<String>,
        resource: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            resource: resource.into(),
            action: action.into(),
        }
    }

    /// Uniqueness key within a subject, `resource:action`.
    pub fn key(&self) -> String {
        format!("{}:{}", self.resource, self.action)
    }
}

impl std::fmt::Display for PolicyRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}, {}, {}", self.subject, self.resource, self.action)
    }
}

/// An inheritance edge: `child` inherits everything `parent` grants.
///
/// The edge set must stay acyclic; [`crate::hierarchy::RoleHierarchy`]
/// enforces that before committing user-driven changes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupingRule {
    pub child: String,
    pub parent: String,
}

impl GroupingRule {
    /// Create a new inheritance edge.
    pub fn new(child: impl Into<String>, parent: impl Into<String>) -> Self {
        Self {
            child: child.into(),
            parent: parent.into(),
        }
    }
}

/// Field index selecting the child column of a grouping rule.
pub const GROUPING_CHILD: usize = 0;
/// Field index selecting the parent column of a grouping rule.
pub const GROUPING_PARENT: usize = 1;

/// Relation-based policy engine interface.
///
/// Mutating methods return `Ok(true)` when the operation was applied
/// (including the no-op case of re-adding an existing tuple) and `Ok(false)`
/// when the backend refused the batch without raising an error. Callers treat
/// `Ok(false)` on a non-empty batch as a store failure.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Add permission rules as a batch. Re-adding an existing rule is a no-op.
    async fn add_policies(&self, rules: &[PolicyRule]) -> Result<bool>;

    /// Remove permission rules as a batch. Missing rules are skipped.
    async fn remove_policies(&self, rules: &[PolicyRule]) -> Result<bool>;

    /// Permission rules attached directly to `subject`.
    async fn permissions_for(&self, subject: &str) -> Result<Vec<PolicyRule>>;

    /// Direct and inherited permission rules, resolved through the transitive
    /// closure of the grouping relation. Inherited rules keep the ancestor
    /// that owns them as their `subject`.
    async fn implicit_permissions_for(&self, subject: &str) -> Result<Vec<PolicyRule>>;

    /// Direct parents of `subject` in the grouping relation.
    async fn roles_for(&self, subject: &str) -> Result<Vec<String>>;

    /// All ancestors of `subject`, transitively.
    async fn implicit_roles_for(&self, subject: &str) -> Result<Vec<String>>;

    /// The entire grouping relation.
    async fn grouping_policy(&self) -> Result<Vec<GroupingRule>>;

    /// Add inheritance edges as a batch. Re-adding an existing edge is a no-op.
    async fn add_grouping_policies(&self, rules: &[GroupingRule]) -> Result<bool>;

    /// Remove every grouping rule whose field at `field_index` equals `value`.
    ///
    /// `field_index` is [`GROUPING_CHILD`] or [`GROUPING_PARENT`].
    async fn remove_filtered_grouping_policy(&self, field_index: usize, value: &str)
        -> Result<bool>;
}

/// Build a child-to-parents adjacency map from a flat grouping relation.
pub(crate) fn adjacency(rules: &[GroupingRule]) -> HashMap<String, HashSet<String>> {
    let mut map: HashMap<String, HashSet<String>> = HashMap::new();
    for rule in rules {
        map.entry(rule.child.clone())
            .or_default()
            .insert(rule.parent.clone());
    }
    map
}

/// Collect every ancestor reachable from `start` in the adjacency map.
///
/// Breadth-first with a visited set, so already-malformed data with a cycle
/// terminates instead of looping.
pub(crate) fn collect_ancestors(
    map: &HashMap<String, HashSet<String>>,
    start: &str,
) -> Vec<String> {
    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<&str> = VecDeque::new();
    queue.push_back(start);

    while let Some(node) = queue.pop_front() {
        if let Some(parents) = map.get(node) {
            for parent in parents {
                if visited.insert(parent.clone()) {
                    queue.push_back(parent);
                }
            }
        }
    }

    let mut out: Vec<String> = visited.into_iter().collect();
    out.sort();
    out
}

/// In-memory policy store backed by `DashMap`, used for tests and
/// single-process deployments. The `database` feature provides the
/// PostgreSQL-backed equivalent.
#[derive(Debug, Default)]
pub struct MemoryPolicyStore {
    // subject -> set of (resource, action)
    permissions: DashMap<String, HashSet<(String, String)>>,
    // child -> set of parents
    parents: DashMap<String, HashSet<String>>,
}

impl MemoryPolicyStore {
    /// Create a new empty policy store.
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot_adjacency(&self) -> HashMap<String, HashSet<String>> {
        self.parents
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

#[async_trait]
impl PolicyStore for MemoryPolicyStore {
    async fn add_policies(&self, rules: &[PolicyRule]) -> Result<bool> {
        for rule in rules {
            self.permissions
                .entry(rule.subject.clone())
                .or_default()
                .insert((rule.resource.clone(), rule.action.clone()));
        }
        Ok(true)
    }

    async fn remove_policies(&self, rules: &[PolicyRule]) -> Result<bool> {
        for rule in rules {
            if let Some(mut set) = self.permissions.get_mut(&rule.subject) {
                set.remove(&(rule.resource.clone(), rule.action.clone()));
                if set.is_empty() {
                    drop(set);
                    self.permissions.remove(&rule.subject);
                }
            }
        }
        Ok(true)
    }

    async fn permissions_for(&self, subject: &str) -> Result<Vec<PolicyRule>> {
        let mut rules: Vec<PolicyRule> = self
            .permissions
            .get(subject)
            .map(|set| {
                set.iter()
                    .map(|(resource, action)| PolicyRule::new(subject, resource, action))
                    .collect()
            })
            .unwrap_or_default();
        rules.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(rules)
    }

    async fn implicit_permissions_for(&self, subject: &str) -> Result<Vec<PolicyRule>> {
        let map = self.snapshot_adjacency();
        let mut subjects = vec![subject.to_string()];
        subjects.extend(collect_ancestors(&map, subject));

        let mut rules = Vec::new();
        for owner in subjects {
            rules.extend(self.permissions_for(&owner).await?);
        }
        Ok(rules)
    }

    async fn roles_for(&self, subject: &str) -> Result<Vec<String>> {
        let mut parents: Vec<String> = self
            .parents
            .get(subject)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        parents.sort();
        Ok(parents)
    }

    async fn implicit_roles_for(&self, subject: &str) -> Result<Vec<String>> {
        let map = self.snapshot_adjacency();
        Ok(collect_ancestors(&map, subject))
    }

    async fn grouping_policy(&self) -> Result<Vec<GroupingRule>> {
        let mut rules: Vec<GroupingRule> = self
            .parents
            .iter()
            .flat_map(|entry| {
                let child = entry.key().clone();
                entry
                    .value()
                    .iter()
                    .map(move |parent| GroupingRule::new(child.clone(), parent.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();
        rules.sort_by(|a, b| (&a.child, &a.parent).cmp(&(&b.child, &b.parent)));
        Ok(rules)
    }

    async fn add_grouping_policies(&self, rules: &[GroupingRule]) -> Result<bool> {
        for rule in rules {
            self.parents
                .entry(rule.child.clone())
                .or_default()
                .insert(rule.parent.clone());
        }
        Ok(true)
    }

    async fn remove_filtered_grouping_policy(
        &self,
        field_index: usize,
        value: &str,
    ) -> Result<bool> {
        match field_index {
            GROUPING_CHILD => {
                self.parents.remove(value);
            }
            GROUPING_PARENT => {
                let children: Vec<String> = self
                    .parents
                    .iter()
                    .filter(|entry| entry.value().contains(value))
                    .map(|entry| entry.key().clone())
                    .collect();
                for child in children {
                    if let Some(mut set) = self.parents.get_mut(&child) {
                        set.remove(value);
                        if set.is_empty() {
                            drop(set);
                            self.parents.remove(&child);
                        }
                    }
                }
            }
            _ => {
                return Err(crate::error::Error::PolicyStore(format!(
                    "unsupported grouping field index {field_index}"
                )))
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_add_policies_is_idempotent() {
        let store = MemoryPolicyStore::new();
        let rule = PolicyRule::new("editor", "articles", "write");

        assert!(store.add_policies(&[rule.clone()]).await.unwrap());
        assert!(store.add_policies(&[rule.clone()]).await.unwrap());

        let direct = store.permissions_for("editor").await.unwrap();
        assert_eq!(direct.len(), 1);
        assert_eq!(direct[0].key(), "articles:write");
    }

    #[tokio::test]
    async fn test_remove_missing_policy_is_not_an_error() {
        let store = MemoryPolicyStore::new();
        let rule = PolicyRule::new("editor", "articles", "write");
        assert!(store.remove_policies(&[rule]).await.unwrap());
    }

    #[tokio::test]
    async fn test_implicit_permissions_follow_inheritance() {
        let store = MemoryPolicyStore::new();
        store
            .add_policies(&[PolicyRule::new("base", "docs", "read")])
            .await
            .unwrap();
        store
            .add_policies(&[PolicyRule::new("editor", "docs", "write")])
            .await
            .unwrap();
        store
            .add_grouping_policies(&[GroupingRule::new("editor", "base")])
            .await
            .unwrap();

        let implicit = store.implicit_permissions_for("editor").await.unwrap();
        let keys: HashSet<String> = implicit.iter().map(|r| r.key()).collect();
        assert!(keys.contains("docs:read"));
        assert!(keys.contains("docs:write"));

        // Direct permissions stay direct-only
        let direct = store.permissions_for("editor").await.unwrap();
        assert_eq!(direct.len(), 1);
    }

    #[tokio::test]
    async fn test_implicit_roles_are_transitive() {
        let store = MemoryPolicyStore::new();
        store
            .add_grouping_policies(&[
                GroupingRule::new("c", "b"),
                GroupingRule::new("b", "a"),
            ])
            .await
            .unwrap();

        assert_eq!(store.roles_for("c").await.unwrap(), vec!["b"]);
        assert_eq!(store.implicit_roles_for("c").await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_ancestor_walk_terminates_on_malformed_cycle() {
        let store = MemoryPolicyStore::new();
        // Insert a cycle directly, bypassing hierarchy validation
        store
            .add_grouping_policies(&[
                GroupingRule::new("a", "b"),
                GroupingRule::new("b", "a"),
            ])
            .await
            .unwrap();

        let ancestors = store.implicit_roles_for("a").await.unwrap();
        assert_eq!(ancestors, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_remove_filtered_by_child_and_parent() {
        let store = MemoryPolicyStore::new();
        store
            .add_grouping_policies(&[
                GroupingRule::new("a", "p"),
                GroupingRule::new("b", "p"),
                GroupingRule::new("p", "root"),
            ])
            .await
            .unwrap();

        store
            .remove_filtered_grouping_policy(GROUPING_CHILD, "p")
            .await
            .unwrap();
        assert!(store.roles_for("p").await.unwrap().is_empty());

        store
            .remove_filtered_grouping_policy(GROUPING_PARENT, "p")
            .await
            .unwrap();
        let remaining = store.grouping_policy().await.unwrap();
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_field_index_errors() {
        let store = MemoryPolicyStore::new();
        assert!(store
            .remove_filtered_grouping_policy(2, "x")
            .await
            .is_err());
    }
}
