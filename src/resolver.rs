//! User route resolution with cache-aside reads.
//!
//! A user's effective role set comes from the transitive closure of the
//! grouping relation; roles map to menu ids scoped by domain, menu rows
//! become a tree, and the result is cached per user and domain. Empty
//! results are cached too, with a shorter TTL, to dampen repeated misses.

#[cfg(feature = "audit")]
use log::debug;

use crate::{
    cache::{self, Cache},
    error::Result,
    menu::{self, RouteTree},
    metrics::AdminMetrics,
    policy::PolicyStore,
    storage::MenuStore,
};
use std::sync::Arc;

/// TTLs and defaults for route resolution.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// TTL for populated route trees.
    pub routes_ttl_seconds: u64,
    /// TTL for the cached empty result of a roleless user.
    pub empty_ttl_seconds: u64,
    /// Home route used when no visible leaf exists.
    pub default_home: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            routes_ttl_seconds: 1800,
            empty_ttl_seconds: 60,
            default_home: "home".to_string(),
        }
    }
}

/// Resolves a user's menu route tree for a domain.
#[derive(Clone)]
pub struct RouteResolver {
    policy: Arc<dyn PolicyStore>,
    menus: Arc<dyn MenuStore>,
    cache: Arc<dyn Cache>,
    metrics: Arc<AdminMetrics>,
    config: ResolverConfig,
}

impl RouteResolver {
    pub fn new(
        policy: Arc<dyn PolicyStore>,
        menus: Arc<dyn MenuStore>,
        cache: Arc<dyn Cache>,
        metrics: Arc<AdminMetrics>,
        config: ResolverConfig,
    ) -> Self {
        Self {
            policy,
            menus,
            cache,
            metrics,
            config,
        }
    }

    /// Resolve the route tree for `user_id` within `domain`.
    pub async fn user_routes(&self, user_id: &str, domain: &str) -> Result<RouteTree> {
        let key = cache::user_routes_key(domain, user_id);

        if let Some(cached) = self.cache.get(&key).await? {
            self.metrics.record_cache_hit();
            return Ok(serde_json::from_str(&cached)?);
        }
        self.metrics.record_cache_miss();

        let roles = self.policy.implicit_roles_for(user_id).await?;
        if roles.is_empty() {
            let empty = RouteTree::empty();
            self.cache
                .setex(
                    &key,
                    self.config.empty_ttl_seconds,
                    &serde_json::to_string(&empty)?,
                )
                .await?;
            return Ok(empty);
        }

        let menu_ids = self.menus.menu_ids_for_roles(domain, &roles).await?;
        let rows = self.menus.menus_by_ids(domain, &menu_ids).await?;
        let enabled: Vec<_> = rows
            .into_iter()
            .filter(|m| m.status == crate::menu::MenuStatus::Enabled)
            .collect();

        let routes = menu::build_tree(enabled);
        let home = menu::first_visible_leaf(&routes)
            .unwrap_or(&self.config.default_home)
            .to_string();
        let tree = RouteTree { home, routes };

        self.cache
            .setex(
                &key,
                self.config.routes_ttl_seconds,
                &serde_json::to_string(&tree)?,
            )
            .await?;

        #[cfg(feature = "audit")]
        debug!(
            "Routes resolved for user '{user_id}' in domain '{domain}': {} roles, home '{}'",
            roles.len(),
            tree.home
        );

        Ok(tree)
    }

    /// Drop every cached route entry for `domain`.
    ///
    /// Called after any mutation to menus, role-menu assignment, or role
    /// inheritance. Domain-wide on purpose: the set of affected users is not
    /// cheaply known, so correctness wins over precision.
    pub async fn invalidate_domain(&self, domain: &str) -> Result<u64> {
        cache::purge_pattern(self.cache.as_ref(), &cache::domain_routes_pattern(domain)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cache::MemoryCache,
        menu::{MenuRecord, MenuStatus},
        policy::{GroupingRule, MemoryPolicyStore},
        storage::MemoryStore,
    };

    struct Fixture {
        resolver: RouteResolver,
        policy: Arc<MemoryPolicyStore>,
        store: Arc<MemoryStore>,
        metrics: Arc<AdminMetrics>,
    }

    fn fixture() -> Fixture {
        let policy = Arc::new(MemoryPolicyStore::new());
        let store = Arc::new(MemoryStore::new());
        let metrics = Arc::new(AdminMetrics::new());
        let resolver = RouteResolver::new(
            policy.clone(),
            store.clone(),
            Arc::new(MemoryCache::new()),
            metrics.clone(),
            ResolverConfig::default(),
        );
        Fixture {
            resolver,
            policy,
            store,
            metrics,
        }
    }

    #[tokio::test]
    async fn test_roleless_user_gets_cached_empty_result() {
        let f = fixture();
        let tree = f.resolver.user_routes("nobody", "default").await.unwrap();
        assert!(tree.is_empty());
        assert_eq!(tree.home, "");

        // Second call is served from cache
        f.resolver.user_routes("nobody", "default").await.unwrap();
        assert_eq!(f.metrics.snapshot().cache_hits, 1);
        assert_eq!(f.metrics.snapshot().cache_misses, 1);
    }

    #[tokio::test]
    async fn test_routes_resolve_through_inherited_roles() {
        let f = fixture();
        // user -> r1 -> r_parent, menu assigned to r_parent
        f.policy
            .add_grouping_policies(&[
                GroupingRule::new("u1", "r1"),
                GroupingRule::new("r1", "r_parent"),
            ])
            .await
            .unwrap();
        f.store
            .insert_menu(MenuRecord::new(1, "default", "m1"))
            .await
            .unwrap();
        f.store
            .assign_menus("default", "r_parent", &[1])
            .await
            .unwrap();

        let tree = f.resolver.user_routes("u1", "default").await.unwrap();
        assert_eq!(tree.routes.len(), 1);
        assert_eq!(tree.routes[0].menu.name, "m1");
        assert_eq!(tree.home, "m1");
    }

    #[tokio::test]
    async fn test_disabled_menus_are_filtered() {
        let f = fixture();
        f.policy
            .add_grouping_policies(&[GroupingRule::new("u1", "r1")])
            .await
            .unwrap();
        f.store
            .insert_menu(MenuRecord::new(1, "default", "on"))
            .await
            .unwrap();
        f.store
            .insert_menu(MenuRecord::new(2, "default", "off").with_status(MenuStatus::Disabled))
            .await
            .unwrap();
        f.store.assign_menus("default", "r1", &[1, 2]).await.unwrap();

        let tree = f.resolver.user_routes("u1", "default").await.unwrap();
        assert_eq!(tree.routes.len(), 1);
        assert_eq!(tree.routes[0].menu.name, "on");
    }

    #[tokio::test]
    async fn test_invalidation_forces_fresh_resolution() {
        let f = fixture();
        f.policy
            .add_grouping_policies(&[GroupingRule::new("u1", "r1")])
            .await
            .unwrap();
        f.store
            .insert_menu(MenuRecord::new(1, "default", "m1"))
            .await
            .unwrap();
        f.store.assign_menus("default", "r1", &[1]).await.unwrap();

        let before = f.resolver.user_routes("u1", "default").await.unwrap();
        assert_eq!(before.routes.len(), 1);

        f.store.unassign_menus("default", "r1", &[1]).await.unwrap();
        f.resolver.invalidate_domain("default").await.unwrap();

        let after = f.resolver.user_routes("u1", "default").await.unwrap();
        assert!(after.is_empty());
    }

    #[tokio::test]
    async fn test_default_home_when_all_leaves_hidden() {
        let f = fixture();
        f.policy
            .add_grouping_policies(&[GroupingRule::new("u1", "r1")])
            .await
            .unwrap();
        f.store
            .insert_menu(MenuRecord::new(1, "default", "ghost").hidden())
            .await
            .unwrap();
        f.store.assign_menus("default", "r1", &[1]).await.unwrap();

        let tree = f.resolver.user_routes("u1", "default").await.unwrap();
        assert_eq!(tree.home, "home");
    }
}
