use criterion::{criterion_group, criterion_main, Criterion};
use pallet_core::{CancelToken, HandlerRegistry, MockCluster, PhaseExecutor, PhasePlan, Resolver};
use pallet_repo::{RepositoryIndex, VersionedEntry};
use pallet_schema::{
    Dependency, DependencyName, Digest, Environment, Fqdn, ImageRef, PackageObject, Phase,
    VersionRange,
};
use semver::Version;

fn build_index(packages: usize, versions: u64) -> RepositoryIndex {
    let mut index = RepositoryIndex::new();
    for p in 0..packages {
        for minor in 0..versions {
            index.insert(VersionedEntry {
                fqdn: Fqdn::new(format!("pkg{p}"), "bench"),
                version: Version::new(1, minor, 0),
                image: ImageRef::new(format!("quay.io/bench/pkg{p}")),
                digest: Digest::new(format!("sha256:{p}-{minor}")),
                constraints: Vec::new(),
                repository: "bench".to_owned(),
            });
        }
    }
    index
}

fn dependencies(count: usize) -> Vec<Dependency> {
    (0..count)
        .map(|p| Dependency {
            name: DependencyName::new(format!("dep{p}")),
            package: Fqdn::new(format!("pkg{p}"), "bench"),
            range: VersionRange::parse(">=1.10 <1.40").unwrap(),
        })
        .collect()
}

fn bench_resolve(c: &mut Criterion) {
    let index = build_index(100, 50);
    let deps = dependencies(100);
    let env = Environment::kubernetes("1.29.0");

    c.bench_function("resolve_100deps_50versions", |b| {
        b.iter(|| {
            let resolution = Resolver::new(&index).with_environment(&env).resolve(&deps);
            assert!(resolution.is_complete());
        });
    });
}

fn bench_index_insert(c: &mut Criterion) {
    c.bench_function("index_insert_5000_entries", |b| {
        b.iter(|| build_index(100, 50));
    });
}

fn bench_rollout_pass(c: &mut Criterion) {
    let phases: Vec<Phase> = (0..10).map(|i| Phase::new(format!("p{i}"))).collect();
    let objects: Vec<PackageObject> = (0..200)
        .map(|i| {
            serde_json::from_value(serde_json::json!({
                "apiVersion": "v1",
                "kind": "ConfigMap",
                "metadata": {
                    "name": format!("cm{i}"),
                    "namespace": "bench",
                    "annotations": {"package-operator.run/phase": format!("p{}", i % 10)}
                }
            }))
            .unwrap()
        })
        .collect();
    let plan = PhasePlan::assemble(&phases, objects).unwrap();
    let registry = HandlerRegistry::new();

    c.bench_function("rollout_pass_10phases_200objects", |b| {
        b.iter_with_setup(MockCluster::ready, |cluster| {
            let executor = PhaseExecutor::new(&plan, &registry, &cluster, &[]).unwrap();
            assert!(executor.run_pass(&CancelToken::new()).unwrap().is_available());
        });
    });
}

criterion_group!(
    benches,
    bench_resolve,
    bench_index_insert,
    bench_rollout_pass
);
criterion_main!(benches);
