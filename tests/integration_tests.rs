//! Integration tests for the admin core.

use domain_admin::{
    cache::MemoryCache,
    execution::{ExecutionStatus, ExecutionTracker, ExecutionUpdate},
    storage::{ExecutionLogStore, RoleStore, ScheduledJobStore},
    AdminMetrics, Error, HandlerRegistry, JobRegistry, JobStatus, MemoryPolicyStore,
    MemoryScheduler, MemoryStore, MenuRecord, NewScheduledJob, PermissionAssignments, PolicyStore,
    ResolverConfig, RoleRecord, RouteResolver,
};
use std::sync::Arc;

struct Harness {
    policy: Arc<MemoryPolicyStore>,
    store: Arc<MemoryStore>,
    scheduler: Arc<MemoryScheduler>,
    assignments: PermissionAssignments,
    resolver: RouteResolver,
    registry: JobRegistry,
    tracker: ExecutionTracker,
}

fn harness() -> Harness {
    let policy = Arc::new(MemoryPolicyStore::new());
    let store = Arc::new(MemoryStore::new());
    let scheduler = Arc::new(MemoryScheduler::new());
    let metrics = Arc::new(AdminMetrics::new());

    let handlers = Arc::new(HandlerRegistry::new());
    handlers.register("sync", "Sync remote data");

    let assignments = PermissionAssignments::new(policy.clone(), store.clone(), metrics.clone());
    let resolver = RouteResolver::new(
        policy.clone(),
        store.clone(),
        Arc::new(MemoryCache::new()),
        metrics.clone(),
        ResolverConfig::default(),
    );
    let registry = JobRegistry::new(store.clone(), scheduler.clone(), handlers, metrics.clone());
    let tracker = ExecutionTracker::new(store.clone(), store.clone(), metrics);

    Harness {
        policy,
        store,
        scheduler,
        assignments,
        resolver,
        registry,
        tracker,
    }
}

fn perms(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(r, a)| (r.to_string(), a.to_string()))
        .collect()
}

#[tokio::test]
async fn test_editor_author_inheritance_scenario() {
    let h = harness();
    h.store
        .insert_role(RoleRecord::new("editor", "Editor"))
        .await
        .unwrap();
    h.store
        .insert_role(RoleRecord::new("author", "Author"))
        .await
        .unwrap();

    // Editor gets articles:write directly
    let report = h
        .assignments
        .save_permissions("editor", &perms(&[("articles", "write")]), None)
        .await
        .unwrap();
    assert_eq!((report.added, report.removed, report.total), (1, 0, 1));

    // Author inherits from editor
    h.assignments
        .save_permissions("author", &[], Some(&["editor".to_string()]))
        .await
        .unwrap();

    let implicit = h.policy.implicit_permissions_for("author").await.unwrap();
    assert!(implicit.iter().any(|r| r.key() == "articles:write"));

    // Direct duplication of the inherited permission is a validation error
    let err = h
        .assignments
        .save_permissions("author", &perms(&[("articles", "write")]), None)
        .await
        .unwrap_err();
    match err {
        Error::InheritedPermissions(keys) => assert_eq!(keys, vec!["articles:write"]),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_save_permissions_is_idempotent() {
    let h = harness();
    h.store
        .insert_role(RoleRecord::new("editor", "Editor"))
        .await
        .unwrap();

    let desired = perms(&[("articles", "write"), ("articles", "read")]);
    h.assignments
        .save_permissions("editor", &desired, None)
        .await
        .unwrap();
    let second = h
        .assignments
        .save_permissions("editor", &desired, None)
        .await
        .unwrap();

    assert_eq!((second.added, second.removed, second.total), (0, 0, 2));
}

#[tokio::test]
async fn test_parent_round_trip_is_order_independent() {
    let h = harness();
    let hierarchy = h.assignments.hierarchy();

    hierarchy
        .set_parents("r", &["p2".to_string(), "p1".to_string()])
        .await
        .unwrap();

    let parents = hierarchy.parents_of("r").await.unwrap();
    let set: std::collections::HashSet<_> = parents.into_iter().collect();
    assert_eq!(
        set,
        ["p1".to_string(), "p2".to_string()].into_iter().collect()
    );
}

#[tokio::test]
async fn test_cascade_cleanup_leaves_no_edges() {
    let h = harness();
    let hierarchy = h.assignments.hierarchy();

    hierarchy.set_parents("r", &["p".to_string()]).await.unwrap();
    hierarchy
        .set_parents("child", &["r".to_string()])
        .await
        .unwrap();

    hierarchy.clean_inheritance("r").await.unwrap();

    assert!(h.policy.roles_for("r").await.unwrap().is_empty());
    let grouping = h.policy.grouping_policy().await.unwrap();
    assert!(grouping.iter().all(|g| g.parent != "r" && g.child != "r"));
}

#[tokio::test]
async fn test_diamond_inheritance_is_not_circular() {
    let h = harness();
    let hierarchy = h.assignments.hierarchy();

    hierarchy
        .set_parents("a", &["b".to_string(), "c".to_string()])
        .await
        .unwrap();
    hierarchy.set_parents("b", &["d".to_string()]).await.unwrap();
    hierarchy.set_parents("c", &["d".to_string()]).await.unwrap();

    assert!(!hierarchy
        .check_circular("d", &["unrelated".to_string()])
        .await
        .unwrap());
    hierarchy
        .set_parents("d", &["unrelated".to_string()])
        .await
        .unwrap();
}

#[tokio::test]
async fn test_scheduled_job_lifecycle_scenario() {
    let h = harness();

    let record = h
        .registry
        .create_job(
            NewScheduledJob::new("default", "nightly-sync", "sync").with_cron("0 2 * * *"),
        )
        .await
        .unwrap();
    assert_eq!(record.status, JobStatus::Enabled);
    assert!(h.scheduler.entry(&record.scheduler_key()).is_some());

    let record = h
        .registry
        .toggle_status(record.id, "default", JobStatus::Disabled)
        .await
        .unwrap();
    assert_eq!(record.status, JobStatus::Disabled);
    assert!(h.scheduler.entry(&record.scheduler_key()).is_none());

    // Deleting an id that never existed is NotFound and affects nothing
    let err = h.registry.delete_job(99999, "default").await.unwrap_err();
    assert!(matches!(err, Error::JobNotFound(99999)));
    assert!(h.store.job(record.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_job_names_are_unique_per_domain_only() {
    let h = harness();
    h.registry
        .create_job(NewScheduledJob::new("default", "sync", "sync"))
        .await
        .unwrap();

    let err = h
        .registry
        .create_job(NewScheduledJob::new("default", "sync", "sync"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DuplicateJobName { .. }));

    h.registry
        .create_job(NewScheduledJob::new("tenant-b", "sync", "sync"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_execution_log_upserts_by_run_id() {
    let h = harness();
    let job = h
        .registry
        .create_job(NewScheduledJob::new("default", "sync", "sync"))
        .await
        .unwrap();

    h.tracker
        .log_execution(job.id, "run-7", ExecutionStatus::Running, ExecutionUpdate::default())
        .await
        .unwrap();
    h.tracker
        .log_execution(
            job.id,
            "run-7",
            ExecutionStatus::Success,
            ExecutionUpdate {
                duration_ms: Some(300),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let logs = h.store.logs_for_job(job.id).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, ExecutionStatus::Success);
    assert_eq!(logs[0].run_id, "run-7");

    h.tracker
        .update_statistics(job.id, true, Some(300))
        .await
        .unwrap();
    let job = h.store.job(job.id).await.unwrap().unwrap();
    assert_eq!(job.total_runs, 1);
    assert_eq!(job.success_runs, 1);
    assert_eq!(job.failed_runs, 0);
}

#[tokio::test]
async fn test_route_resolution_scenario() {
    let h = harness();

    // u1 -> r1 -> r_parent, menu m1 assigned to r_parent
    h.policy
        .add_grouping_policies(&[
            domain_admin::GroupingRule::new("u1", "r1"),
            domain_admin::GroupingRule::new("r1", "r_parent"),
        ])
        .await
        .unwrap();
    {
        use domain_admin::storage::MenuStore;
        h.store
            .insert_menu(MenuRecord::new(1, "default", "m1"))
            .await
            .unwrap();
        h.store
            .assign_menus("default", "r_parent", &[1])
            .await
            .unwrap();
    }

    let tree = h.resolver.user_routes("u1", "default").await.unwrap();
    assert!(tree.routes.iter().any(|n| n.menu.name == "m1"));

    // Drop the assignment and invalidate the domain cache
    {
        use domain_admin::storage::MenuStore;
        h.store
            .unassign_menus("default", "r_parent", &[1])
            .await
            .unwrap();
    }
    h.resolver.invalidate_domain("default").await.unwrap();

    let tree = h.resolver.user_routes("u1", "default").await.unwrap();
    assert!(tree.routes.iter().all(|n| n.menu.name != "m1"));
}

#[tokio::test]
async fn test_reconcile_recovers_from_scheduler_wipe() {
    let h = harness();
    let record = h
        .registry
        .create_job(NewScheduledJob::new("default", "sync", "sync"))
        .await
        .unwrap();

    h.registry.clear_all_repeatable().await.unwrap();
    assert!(h.scheduler.entry(&record.scheduler_key()).is_none());

    let report = h.registry.reconcile().await.unwrap();
    assert_eq!(report.registered, vec![record.scheduler_key()]);
    assert!(h.scheduler.entry(&record.scheduler_key()).is_some());
}

#[tokio::test]
async fn test_deleted_role_disappears_from_hierarchy_and_policy() {
    let h = harness();
    h.store
        .insert_role(RoleRecord::new("tmp", "Temporary"))
        .await
        .unwrap();
    h.store
        .insert_role(RoleRecord::new("base", "Base"))
        .await
        .unwrap();

    h.assignments
        .save_permissions("tmp", &perms(&[("docs", "read")]), Some(&["base".to_string()]))
        .await
        .unwrap();
    h.assignments.delete_role("tmp").await.unwrap();

    assert!(!h.store.role_exists("tmp").await.unwrap());
    assert!(h.policy.permissions_for("tmp").await.unwrap().is_empty());
    assert!(h.policy.roles_for("tmp").await.unwrap().is_empty());

    // Re-assigning permissions to the deleted role is rejected
    let err = h
        .assignments
        .save_permissions("tmp", &perms(&[("docs", "read")]), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RoleNotFound(_)));
}
