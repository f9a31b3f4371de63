//! Performance benchmarks for synchronized collections.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use opsboard_sync::query::sort_rows;
use opsboard_sync::subscriptions::ListenerSet;
use opsboard_sync::{
    CollectionConfig, Delta, Filter, MemoryBackend, OrderBy, Record, RecordId, Row,
    SyncedCollection,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::runtime::Runtime;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Metric {
    id: RecordId,
    name: String,
    current: f64,
}

impl Record for Metric {
    fn id(&self) -> &RecordId {
        &self.id
    }

    fn set_id(&mut self, id: RecordId) {
        self.id = id;
    }
}

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn seeded(size: usize) -> Arc<MemoryBackend> {
    let backend = Arc::new(MemoryBackend::new());
    backend.set_emit_on_write(false);
    backend.seed(
        "kpis",
        (0..size)
            .map(|i| json!({"id": format!("k{}", i), "name": format!("metric {}", i), "current": i}))
            .collect(),
    );
    backend
}

/// Optimistic update round trip: apply, remote call, confirm. Each step
/// recomputes the snapshot.
fn bench_update_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("update_round_trip");
    let rt = runtime();

    for size in [10, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("records", size), &size, |b, &size| {
            let backend = seeded(size);
            let kpis = SyncedCollection::<Metric>::builder(
                CollectionConfig::new("kpis").order_by(OrderBy::asc("name")),
                backend,
            )
            .open()
            .unwrap();
            rt.block_on(kpis.load(Filter::all())).unwrap();

            let id = RecordId::from("k0");
            let mut n = 0u64;
            b.iter(|| {
                n += 1;
                let mut delta = Delta::new();
                delta.insert("current".to_string(), json!(n));
                rt.block_on(kpis.update(&id, delta)).unwrap();
            });
        });
    }

    group.finish();
}

/// Full reload of a collection.
fn bench_load(c: &mut Criterion) {
    let mut group = c.benchmark_group("load");
    let rt = runtime();

    for size in [100, 1000] {
        group.bench_with_input(BenchmarkId::new("records", size), &size, |b, &size| {
            let backend = seeded(size);
            let kpis = SyncedCollection::<Metric>::builder(CollectionConfig::new("kpis"), backend)
                .open()
                .unwrap();

            b.iter(|| {
                black_box(rt.block_on(kpis.refresh()).unwrap());
            });
        });
    }

    group.finish();
}

/// Notify fan-out to many listeners.
fn bench_listener_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("listener_fanout");

    for listeners in [1, 10, 100] {
        group.bench_with_input(
            BenchmarkId::new("listeners", listeners),
            &listeners,
            |b, &listeners| {
                let set = ListenerSet::new();
                let hits = Arc::new(AtomicUsize::new(0));
                for _ in 0..listeners {
                    let hits = Arc::clone(&hits);
                    set.add(move || {
                        hits.fetch_add(1, Ordering::Relaxed);
                    });
                }

                b.iter(|| black_box(set.notify()));
            },
        );
    }

    group.finish();
}

fn bench_sort_rows(c: &mut Criterion) {
    let rows: Vec<Row> = (0..1000)
        .map(|i| {
            json!({"id": i, "pinned": i % 7 == 0, "created_at": format!("2024-01-{:02}", i % 28 + 1)})
                .as_object()
                .cloned()
                .unwrap()
        })
        .collect();
    let order = vec![OrderBy::desc("pinned"), OrderBy::desc("created_at")];

    c.bench_function("sort_rows_1000", |b| {
        b.iter(|| {
            let mut working = rows.clone();
            sort_rows(&mut working, &order);
            black_box(working);
        });
    });
}

criterion_group!(
    benches,
    bench_update_round_trip,
    bench_load,
    bench_listener_fanout,
    bench_sort_rows,
);
criterion_main!(benches);
