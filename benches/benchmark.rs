use criterion::{criterion_group, criterion_main, Criterion};
use domain_admin::{
    AdminMetrics, MemoryPolicyStore, MemoryStore, PermissionAssignments, PolicyStore, RoleRecord,
};
use domain_admin::storage::RoleStore;
use std::hint::black_box;
use std::sync::Arc;

fn bench_implicit_role_resolution(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let policy = Arc::new(MemoryPolicyStore::new());

    // Chain of ten roles, r0 inherits from r1 inherits from ... r9
    rt.block_on(async {
        for i in 0..9 {
            policy
                .add_grouping_policies(&[domain_admin::GroupingRule::new(
                    format!("r{i}"),
                    format!("r{}", i + 1),
                )])
                .await
                .unwrap();
        }
    });

    c.bench_function("implicit_role_resolution", |b| {
        b.iter(|| {
            rt.block_on(async {
                black_box(policy.implicit_roles_for("r0").await.unwrap());
            })
        })
    });
}

fn bench_save_permissions_noop(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let policy = Arc::new(MemoryPolicyStore::new());
    let store = Arc::new(MemoryStore::new());
    let assignments =
        PermissionAssignments::new(policy, store.clone(), Arc::new(AdminMetrics::new()));

    let desired: Vec<(String, String)> = (0..20)
        .map(|i| (format!("resource{i}"), "read".to_string()))
        .collect();

    rt.block_on(async {
        store.insert_role(RoleRecord::new("bench", "Bench")).await.unwrap();
        assignments
            .save_permissions("bench", &desired, None)
            .await
            .unwrap();
    });

    // Steady state: same desired set, diff resolves to nothing
    c.bench_function("save_permissions_noop", |b| {
        b.iter(|| {
            rt.block_on(async {
                black_box(
                    assignments
                        .save_permissions("bench", &desired, None)
                        .await
                        .unwrap(),
                );
            })
        })
    });
}

criterion_group!(
    benches,
    bench_implicit_role_resolution,
    bench_save_permissions_noop
);
criterion_main!(benches);
