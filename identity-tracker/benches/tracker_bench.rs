//! Identity tracker benchmarks
//!
//! Lookup latency with a warm cache, a cold cache and a RocksDB-backed
//! table, plus the cost of one reconciliation cycle.

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use identity_tracker::{
    EventLog, GraphConsistencyChecker, HnswVectorIndex, IdentityTracker, MappingStore,
    MemoryGraphStore, MemoryMappingStore, Metadata, ReconciliationScheduler, RocksMappingStore,
    SharedCache, VectorIdStrategy, VectorIndexAdapter,
};
use std::sync::Arc;
use tempfile::TempDir;

const ENTITIES: usize = 1_000;
const DIM: usize = 32;

fn tracker_over(store: Arc<dyn MappingStore>, cache_bytes: usize) -> IdentityTracker {
    let tracker = IdentityTracker::new(
        store,
        Arc::new(SharedCache::new(cache_bytes)),
        Arc::new(EventLog::new()),
    );
    for i in 0..ENTITIES {
        tracker
            .add_mapping(&format!("entity_{i}"), &format!("vec_{i}"), Metadata::new())
            .unwrap();
    }
    tracker
}

fn embedding(seed: usize) -> Vec<f32> {
    (0..DIM).map(|d| ((seed * 31 + d * 7) % 97) as f32 / 97.0).collect()
}

fn bench_lookups(c: &mut Criterion) {
    let mut group = c.benchmark_group("lookup");

    let warm = tracker_over(Arc::new(MemoryMappingStore::new()), 64 * 1024 * 1024);
    group.bench_function("warm_cache", |b| {
        let mut i = 0;
        b.iter(|| {
            i = (i + 1) % ENTITIES;
            warm.get_vector_id(&format!("entity_{i}")).unwrap()
        })
    });

    group.bench_function("cold_cache", |b| {
        let mut i = 0;
        b.iter_batched(
            || {
                warm.cache().clear();
                i = (i + 1) % ENTITIES;
                format!("vec_{i}")
            },
            |id| warm.get_external_id(&id).unwrap(),
            BatchSize::SmallInput,
        )
    });

    let dir = TempDir::new().unwrap();
    let rocks = tracker_over(Arc::new(RocksMappingStore::open(dir.path()).unwrap()), 0);
    group.bench_function("rocksdb_uncached", |b| {
        let mut i = 0;
        b.iter(|| {
            i = (i + 1) % ENTITIES;
            rocks.get_vector_id(&format!("entity_{i}")).unwrap()
        })
    });

    group.finish();
}

fn bench_reconcile(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconcile");

    for drift in [0usize, 10, 100] {
        group.bench_with_input(BenchmarkId::new("cycle", drift), &drift, |b, &drift| {
            b.iter_batched(
                || {
                    let tracker = Arc::new(IdentityTracker::new(
                        Arc::new(MemoryMappingStore::new()),
                        Arc::new(SharedCache::default()),
                        Arc::new(EventLog::new()),
                    ));
                    let index = Arc::new(HnswVectorIndex::in_memory(DIM));
                    let adapter = VectorIndexAdapter::new(
                        index.clone(),
                        tracker.clone(),
                        VectorIdStrategy::Uuid,
                    );
                    for i in 0..ENTITIES {
                        adapter
                            .index(&format!("entity_{i}"), &embedding(i), Metadata::new())
                            .unwrap();
                    }
                    // Forget some mappings so the cycle has work to do
                    for i in 0..drift {
                        tracker.remove_mapping(&format!("entity_{i}")).unwrap();
                    }
                    let checker = Arc::new(GraphConsistencyChecker::new(
                        Arc::new(MemoryGraphStore::new()),
                        tracker.clone(),
                        vec!["BugReport".to_string()],
                    ));
                    ReconciliationScheduler::new(tracker, index, checker)
                },
                |scheduler| scheduler.run_cycle(),
                BatchSize::LargeInput,
            )
        });
    }

    group.finish();
}

criterion_group!(benches, bench_lookups, bench_reconcile);
criterion_main!(benches);
