//! Benchmarks for the entitydb logs, indices and query engine
//!
//! Run with: cargo bench

use entitydb::index::TagRecord;
use entitydb::storage::*;
use entitydb::{EntityStore, SearchOptions, StoreConfig};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use tempfile::tempdir;

fn create_test_records(count: usize) -> Vec<LogRecord<TagRecord>> {
    (0..count)
        .map(|i| {
            LogRecord::insert(TagRecord {
                id: i as u64 + 1,
                tag: format!("tag{}", i % 10),
            })
        })
        .collect()
}

fn unbatched(dir: &std::path::Path) -> StoreConfig {
    StoreConfig {
        log: LogSettings {
            writer: WriterOptions::unbatched(),
            ..Default::default()
        },
        ..StoreConfig::new(dir)
    }
}

fn bench_log(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("log");

    for size in [100, 1000, 10000] {
        let records = create_test_records(size);
        group.throughput(Throughput::Elements(size as u64));

        group.bench_function(format!("encode_{}", size), |b| {
            b.iter(|| encode_batch(black_box(&records)).unwrap())
        });

        let dir = tempdir().unwrap();
        let path = dir.path().join("tags.data");
        std::fs::write(&path, encode_batch(&records).unwrap()).unwrap();

        group.bench_function(format!("replay_{}", size), |b| {
            b.iter(|| {
                rt.block_on(async {
                    let mut count = 0;
                    read_log::<TagRecord, _>(black_box(&path), |_| count += 1)
                        .await
                        .unwrap();
                    count
                })
            })
        });
    }

    group.bench_function("append_batch_100", |b| {
        let dir = tempdir().unwrap();
        let writer = LogWriter::new(dir.path().join("bench.data"), WriterOptions::unbatched());
        let records = create_test_records(100);

        b.iter(|| rt.block_on(writer.append_all(black_box(&records))).unwrap());
    });

    group.finish();
}

fn bench_store(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("store");

    group.bench_function("tag_single", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let dir = tempdir().unwrap();
                let store = EntityStore::open(unbatched(dir.path())).await.unwrap();

                let start = std::time::Instant::now();

                for i in 0..iters {
                    store.create_entity().tag(&format!("t{}", i % 16)).await.unwrap();
                }

                start.elapsed()
            })
        });
    });

    group.bench_function("search_graph_1000", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let dir = tempdir().unwrap();
                let store = EntityStore::open(StoreConfig::new(dir.path())).await.unwrap();

                // Setup: 1000 people, every third likes one of 100 dogs
                let dogs: Vec<EntityId> = (0..100).map(|_| store.create_entity().id()).collect();
                for (i, dog) in dogs.iter().enumerate() {
                    let e = store.entity(*dog);
                    e.tag("dog").await.unwrap();
                    e.prop("name", format!("dog number {}", i)).await.unwrap();
                }
                for i in 0..1000usize {
                    let person = store.create_entity();
                    person.tag("person").await.unwrap();
                    if i % 3 == 0 {
                        person.rel(dogs[i % dogs.len()], Some("likes")).await;
                    }
                }

                let options = SearchOptions::first(50);
                let start = std::time::Instant::now();

                for _ in 0..iters {
                    let _ = store
                        .search(black_box("tag:person likes.tag:dog"), &options)
                        .await
                        .unwrap();
                    let _ = store
                        .search(black_box("prop:name~number -prop:name=^dog1"), &options)
                        .await
                        .unwrap();
                }

                start.elapsed()
            })
        });
    });

    group.finish();
}

criterion_group!(benches, bench_log, bench_store);
criterion_main!(benches);
