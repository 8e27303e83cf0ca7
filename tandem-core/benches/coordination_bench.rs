// Benchmark operation registration and conflict checks at varying graph sizes.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use tandem_core::CoordinationStore;
use tandem_core::config::TandemConfig;
use tandem_dag::{ConflictCandidate, Operation, OperationKind};

const AGENTS: [&str; 4] = ["alpha", "beta", "gamma", "delta"];

/// Operation `i` touches two of `file_count` files, cycling agents so that
/// roughly every fourth neighbour belongs to the same agent.
fn synthetic_operation(i: usize, file_count: usize) -> Operation {
    let files = [
        format!("src/file_{}.rs", i % file_count),
        format!("src/file_{}.rs", (i * 7 + 3) % file_count),
    ];
    Operation::new(OperationKind::Edit, AGENTS[i % AGENTS.len()], files)
}

fn populated_store(vertices: usize) -> CoordinationStore {
    let mut config = TandemConfig::default();
    config.graph.max_vertices = vertices.max(config.graph.lookback_window);
    let store = CoordinationStore::new(config).expect("valid config");
    for i in 0..vertices {
        store
            .register_operation(synthetic_operation(i, 50))
            .expect("valid operation");
    }
    store
}

fn bench_register(c: &mut Criterion) {
    let mut group = c.benchmark_group("register_operation");

    for size in [100, 1_000, 10_000] {
        let store = populated_store(size);
        let mut i = size;
        group.bench_with_input(BenchmarkId::new("vertices", size), &store, |b, s| {
            b.iter(|| {
                i += 1;
                s.register_operation(synthetic_operation(i, 50))
                    .expect("valid operation")
            });
        });
    }

    group.finish();
}

fn bench_check_conflicts(c: &mut Criterion) {
    let mut group = c.benchmark_group("check_conflicts");

    for size in [100, 1_000, 10_000] {
        let store = populated_store(size);
        let proposal = ConflictCandidate::Proposed(synthetic_operation(size + 1, 50));
        group.bench_with_input(BenchmarkId::new("vertices", size), &store, |b, s| {
            b.iter(|| s.check_conflicts(&proposal));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_register, bench_check_conflicts);
criterion_main!(benches);
