//! Role inheritance graph management.
//!
//! The hierarchy manager owns the grouping relation: replacing a role's
//! parents, detecting cycles before they are committed, enriching role rows
//! with their parent ids, and purging edges when a role is deleted.

#[cfg(feature = "audit")]
use log::info;

use crate::{
    error::{Error, Result},
    policy::{self, GroupingRule, PolicyStore, GROUPING_CHILD, GROUPING_PARENT},
    role::{RoleRecord, RoleWithParents},
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Manager for the role inheritance graph.
///
/// All traversals run over an adjacency snapshot fetched once per call, so
/// query count is bounded regardless of graph depth.
#[derive(Clone)]
pub struct RoleHierarchy {
    policy: Arc<dyn PolicyStore>,
}

impl RoleHierarchy {
    /// Create a new hierarchy manager over the given policy store.
    pub fn new(policy: Arc<dyn PolicyStore>) -> Self {
        Self { policy }
    }

    /// Direct parents of `role_id`.
    pub async fn parents_of(&self, role_id: &str) -> Result<Vec<String>> {
        self.policy.roles_for(role_id).await
    }

    /// All ancestors of `role_id`, transitively.
    pub async fn ancestors_of(&self, role_id: &str) -> Result<Vec<String>> {
        self.policy.implicit_roles_for(role_id).await
    }

    /// Atomically replace `role_id`'s outbound inheritance edges.
    ///
    /// Rejects with [`Error::CircularInheritance`] before touching the store
    /// if any candidate parent is the role itself or already inherits from it.
    /// An empty `parent_ids` turns the role into a root.
    pub async fn set_parents(&self, role_id: &str, parent_ids: &[String]) -> Result<()> {
        if self.check_circular(role_id, parent_ids).await? {
            return Err(Error::CircularInheritance(role_id.to_string()));
        }

        self.policy
            .remove_filtered_grouping_policy(GROUPING_CHILD, role_id)
            .await?;

        if !parent_ids.is_empty() {
            let rules: Vec<GroupingRule> = parent_ids
                .iter()
                .map(|parent| GroupingRule::new(role_id, parent.clone()))
                .collect();
            if !self.policy.add_grouping_policies(&rules).await? {
                return Err(Error::PolicyStore(format!(
                    "adding {} grouping rules for role '{role_id}' was refused",
                    rules.len()
                )));
            }
        }

        #[cfg(feature = "audit")]
        info!("Role '{role_id}' parents replaced with {parent_ids:?}");

        Ok(())
    }

    /// Whether linking `role_id` under any of `candidate_parents` would close
    /// a cycle.
    ///
    /// True if a candidate is the role itself, or if walking a candidate's
    /// existing ancestor chain reaches the role. The walk carries a visited
    /// set so already-malformed data cannot loop it.
    pub async fn check_circular(
        &self,
        role_id: &str,
        candidate_parents: &[String],
    ) -> Result<bool> {
        if candidate_parents.iter().any(|p| p == role_id) {
            return Ok(true);
        }
        if candidate_parents.is_empty() {
            return Ok(false);
        }

        let rules = self.policy.grouping_policy().await?;
        let map = policy::adjacency(&rules);

        for candidate in candidate_parents {
            if Self::reaches(&map, candidate, role_id) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn reaches(map: &HashMap<String, HashSet<String>>, from: &str, target: &str) -> bool {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = vec![from];

        while let Some(node) = stack.pop() {
            if node == target {
                return true;
            }
            if !visited.insert(node) {
                continue;
            }
            if let Some(parents) = map.get(node) {
                stack.extend(parents.iter().map(String::as_str));
            }
        }
        false
    }

    /// Attach the direct parent ids to a single role row.
    pub async fn enrich_with_parents(&self, role: RoleRecord) -> Result<RoleWithParents> {
        let parent_roles = self.policy.roles_for(&role.id).await?;
        Ok(RoleWithParents { role, parent_roles })
    }

    /// Attach direct parent ids to many role rows.
    ///
    /// Fetches the grouping relation once and resolves parents from the
    /// in-memory map instead of querying per role.
    pub async fn enrich_many_with_parents(
        &self,
        roles: Vec<RoleRecord>,
    ) -> Result<Vec<RoleWithParents>> {
        let rules = self.policy.grouping_policy().await?;
        let map = policy::adjacency(&rules);

        Ok(roles
            .into_iter()
            .map(|role| {
                let mut parent_roles: Vec<String> = map
                    .get(&role.id)
                    .map(|set| set.iter().cloned().collect())
                    .unwrap_or_default();
                parent_roles.sort();
                RoleWithParents { role, parent_roles }
            })
            .collect())
    }

    /// Remove every inheritance edge touching `role_id`, on both sides.
    ///
    /// Must run before the role row itself is deleted so no dangling edges
    /// can be observed.
    pub async fn clean_inheritance(&self, role_id: &str) -> Result<()> {
        self.policy
            .remove_filtered_grouping_policy(GROUPING_CHILD, role_id)
            .await?;
        self.policy
            .remove_filtered_grouping_policy(GROUPING_PARENT, role_id)
            .await?;

        #[cfg(feature = "audit")]
        info!("Inheritance edges for role '{role_id}' removed");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::MemoryPolicyStore;

    fn hierarchy() -> RoleHierarchy {
        RoleHierarchy::new(Arc::new(MemoryPolicyStore::new()))
    }

    #[tokio::test]
    async fn test_set_parents_round_trip() {
        let h = hierarchy();
        h.set_parents("r", &["p1".into(), "p2".into()]).await.unwrap();

        let parents = h.parents_of("r").await.unwrap();
        assert_eq!(parents, vec!["p1", "p2"]);
    }

    #[tokio::test]
    async fn test_set_parents_replaces_existing_edges() {
        let h = hierarchy();
        h.set_parents("r", &["p1".into()]).await.unwrap();
        h.set_parents("r", &["p2".into()]).await.unwrap();

        assert_eq!(h.parents_of("r").await.unwrap(), vec!["p2"]);
    }

    #[tokio::test]
    async fn test_empty_parents_makes_role_a_root() {
        let h = hierarchy();
        h.set_parents("r", &["p1".into()]).await.unwrap();
        h.set_parents("r", &[]).await.unwrap();

        assert!(h.parents_of("r").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_self_parent_is_circular() {
        let h = hierarchy();
        assert!(h.check_circular("r", &["r".into()]).await.unwrap());
        assert!(matches!(
            h.set_parents("r", &["r".into()]).await,
            Err(Error::CircularInheritance(_))
        ));
    }

    #[tokio::test]
    async fn test_two_node_cycle_is_rejected() {
        let h = hierarchy();
        h.set_parents("a", &["b".into()]).await.unwrap();
        assert!(h.check_circular("b", &["a".into()]).await.unwrap());
        assert!(h.set_parents("b", &["a".into()]).await.is_err());
    }

    #[tokio::test]
    async fn test_deep_cycle_is_rejected() {
        let h = hierarchy();
        h.set_parents("b", &["c".into()]).await.unwrap();
        h.set_parents("c", &["d".into()]).await.unwrap();
        h.set_parents("a", &["b".into()]).await.unwrap();

        // d -> a would close a cycle through b and c
        assert!(h.check_circular("d", &["a".into()]).await.unwrap());
    }

    #[tokio::test]
    async fn test_diamond_is_not_circular() {
        let h = hierarchy();
        h.set_parents("a", &["b".into(), "c".into()]).await.unwrap();
        h.set_parents("b", &["d".into()]).await.unwrap();
        h.set_parents("c", &["d".into()]).await.unwrap();

        // Re-parenting d to something unrelated must pass
        assert!(!h.check_circular("d", &["unrelated".into()]).await.unwrap());
        h.set_parents("d", &["unrelated".into()]).await.unwrap();
    }

    #[tokio::test]
    async fn test_clean_inheritance_removes_both_sides() {
        let h = hierarchy();
        h.set_parents("r", &["p".into()]).await.unwrap();
        h.set_parents("child", &["r".into()]).await.unwrap();

        h.clean_inheritance("r").await.unwrap();

        assert!(h.parents_of("r").await.unwrap().is_empty());
        assert!(h.parents_of("child").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_enrich_many_uses_one_snapshot() {
        let h = hierarchy();
        h.set_parents("a", &["root".into()]).await.unwrap();
        h.set_parents("b", &["root".into(), "a".into()]).await.unwrap();

        let roles = vec![
            RoleRecord::new("a", "A"),
            RoleRecord::new("b", "B"),
            RoleRecord::new("c", "C"),
        ];
        let enriched = h.enrich_many_with_parents(roles).await.unwrap();

        assert_eq!(enriched[0].parent_roles, vec!["root"]);
        assert_eq!(enriched[1].parent_roles, vec!["a", "root"]);
        assert!(enriched[2].parent_roles.is_empty());
    }
}
