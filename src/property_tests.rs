//! Property-based tests for the inheritance graph.
//!
//! Uses `proptest` to verify that the grouping relation stays acyclic under
//! arbitrary sequences of parent replacements, checked against an
//! independent from-scratch traversal.

#[cfg(test)]
mod tests {
    use crate::{
        hierarchy::RoleHierarchy,
        policy::{GroupingRule, MemoryPolicyStore, PolicyStore},
    };
    use proptest::prelude::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Arc;

    const ROLE_POOL: usize = 6;

    fn role_name(index: usize) -> String {
        format!("r{index}")
    }

    /// A sequence of set-parents operations over a small role pool.
    fn ops_strategy() -> impl Strategy<Value = Vec<(usize, Vec<usize>)>> {
        prop::collection::vec(
            (
                0..ROLE_POOL,
                prop::collection::vec(0..ROLE_POOL, 0..ROLE_POOL),
            ),
            0..40,
        )
    }

    /// Independent cycle detection over the full relation, depth-first with
    /// three colors.
    fn has_cycle(rules: &[GroupingRule]) -> bool {
        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        for rule in rules {
            adjacency
                .entry(rule.child.as_str())
                .or_default()
                .push(rule.parent.as_str());
        }

        let mut done: HashSet<&str> = HashSet::new();
        let mut in_progress: HashSet<&str> = HashSet::new();

        fn visit<'a>(
            node: &'a str,
            adjacency: &HashMap<&'a str, Vec<&'a str>>,
            done: &mut HashSet<&'a str>,
            in_progress: &mut HashSet<&'a str>,
        ) -> bool {
            if done.contains(node) {
                return false;
            }
            if !in_progress.insert(node) {
                return true;
            }
            if let Some(parents) = adjacency.get(node) {
                for parent in parents {
                    if visit(parent, adjacency, done, in_progress) {
                        return true;
                    }
                }
            }
            in_progress.remove(node);
            done.insert(node);
            false
        }

        let nodes: Vec<&str> = adjacency.keys().copied().collect();
        for node in nodes {
            if visit(node, &adjacency, &mut done, &mut in_progress) {
                return true;
            }
        }
        false
    }

    proptest! {
        /// Any sequence of accepted set-parents calls leaves the graph
        /// acyclic; rejected calls change nothing.
        #[test]
        fn accepted_parent_updates_never_create_cycles(ops in ops_strategy()) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .build()
                .expect("runtime");

            rt.block_on(async move {
                let policy = Arc::new(MemoryPolicyStore::new());
                let hierarchy = RoleHierarchy::new(policy.clone());

                for (child, parents) in ops {
                    let child = role_name(child);
                    let parents: Vec<String> = parents
                        .into_iter()
                        .map(role_name)
                        .collect::<HashSet<_>>()
                        .into_iter()
                        .collect();

                    // Rejected calls are expected; the invariant is about
                    // what the accepted ones leave behind
                    let _ = hierarchy.set_parents(&child, &parents).await;

                    let rules = policy.grouping_policy().await.unwrap();
                    prop_assert!(!has_cycle(&rules), "cycle after linking {child} -> {parents:?}");
                }
                Ok(())
            })?;
        }

        /// A role is always flagged circular as its own parent, whatever the
        /// surrounding graph looks like.
        #[test]
        fn self_parent_is_always_circular(ops in ops_strategy(), role in 0..ROLE_POOL) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .build()
                .expect("runtime");

            rt.block_on(async move {
                let policy = Arc::new(MemoryPolicyStore::new());
                let hierarchy = RoleHierarchy::new(policy);

                for (child, parents) in ops {
                    let parents: Vec<String> = parents.into_iter().map(role_name).collect();
                    let _ = hierarchy.set_parents(&role_name(child), &parents).await;
                }

                let role = role_name(role);
                let circular = hierarchy
                    .check_circular(&role, &[role.clone()])
                    .await
                    .unwrap();
                prop_assert!(circular);
                Ok(())
            })?;
        }
    }
}
