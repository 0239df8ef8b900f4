use core::hint::black_box;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use futures::future::try_join_all;
use segid::{AllocatorConfig, MemoryStore, SegmentAllocator};
use std::time::Instant;
use tokio::runtime::{Builder, Runtime};

// Number of IDs requested per benchmark iteration.
const TOTAL_IDS: usize = 4096;

fn runtime() -> Runtime {
    Builder::new_multi_thread().enable_all().build().unwrap()
}

/// Builds and initializes an allocator serving `tags`, each starting at 0
/// with the given store step.
fn allocator(rt: &Runtime, tags: &[String], step: i32) -> SegmentAllocator<MemoryStore> {
    let store = MemoryStore::new();
    for tag in tags {
        store.insert(tag.as_str(), 0, step);
    }
    let allocator = SegmentAllocator::with_config(store, AllocatorConfig::default());
    assert!(rt.block_on(allocator.initialize()));
    allocator
}

/// One task requesting ids back to back for a single tag.
fn bench_sequential(c: &mut Criterion, group_name: &str, step: i32) {
    let mut group = c.benchmark_group(group_name);
    group.throughput(Throughput::Elements(TOTAL_IDS as u64));

    let rt = runtime();
    let tags = vec!["bench".to_owned()];
    let allocator = allocator(&rt, &tags, step);

    group.bench_function(format!("elems/{TOTAL_IDS}/step/{step}"), |b| {
        b.to_async(&rt).iter_custom(|iters| {
            let allocator = allocator.clone();
            async move {
                let start = Instant::now();
                for _ in 0..iters {
                    for _ in 0..TOTAL_IDS {
                        black_box(allocator.next_id("bench").await);
                    }
                }
                start.elapsed()
            }
        });
    });

    group.finish();
    rt.block_on(allocator.shutdown()).unwrap();
}

/// Many tasks spread over `num_tags` tags, all sharing one allocator.
fn bench_contended(c: &mut Criterion, group_name: &str, num_tags: usize) {
    let mut group = c.benchmark_group(group_name);
    group.sample_size(10);
    group.sampling_mode(criterion::SamplingMode::Flat);

    let total_ids = TOTAL_IDS * 64;
    let rt = runtime();
    let tags: Vec<String> = (0..num_tags).map(|i| format!("tag-{i}")).collect();
    let allocator = allocator(&rt, &tags, 1_000);

    for num_tasks in [1, 4, 16, 64, 256] {
        let ids_per_task = total_ids / num_tasks;

        group.throughput(Throughput::Elements(total_ids as u64));
        group.bench_function(
            format!("elems/{total_ids}/tags/{num_tags}/tasks/{num_tasks}"),
            |b| {
                b.to_async(&rt).iter_custom(|iters| {
                    let allocator = allocator.clone();
                    let tags = tags.clone();
                    async move {
                        let start = Instant::now();
                        for _ in 0..iters {
                            let tasks: Vec<_> = (0..num_tasks)
                                .map(|i| {
                                    let allocator = allocator.clone();
                                    let tag = tags[i % tags.len()].clone();
                                    tokio::spawn(async move {
                                        for _ in 0..ids_per_task {
                                            black_box(allocator.next_id(&tag).await);
                                        }
                                    })
                                })
                                .collect();
                            try_join_all(tasks).await.unwrap();
                        }
                        start.elapsed()
                    }
                });
            },
        );
    }

    group.finish();
    rt.block_on(allocator.shutdown()).unwrap();
}

fn benchmark_sequential_small_step(c: &mut Criterion) {
    bench_sequential(c, "sequential/small_step", 10);
}

fn benchmark_sequential_large_step(c: &mut Criterion) {
    bench_sequential(c, "sequential/large_step", 100_000);
}

fn benchmark_contended_single_tag(c: &mut Criterion) {
    bench_contended(c, "contended/single_tag", 1);
}

fn benchmark_contended_many_tags(c: &mut Criterion) {
    bench_contended(c, "contended/many_tags", 64);
}

criterion_group!(
    benches,
    benchmark_sequential_small_step,
    benchmark_sequential_large_step,
    benchmark_contended_single_tag,
    benchmark_contended_many_tags,
);
criterion_main!(benches);
