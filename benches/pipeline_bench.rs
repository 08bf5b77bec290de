//! Benchmark for list pipelines.
//!
//! Compares the bulk dispatch path (resident upstream) with the incremental
//! one (upstream pulled through an iterator), on the inline and the runtime
//! contexts.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use lazy_collections::context::SharedContext;
use lazy_collections::context::inline::InlineContext;
use lazy_collections::context::runtime::RuntimeContext;
use lazy_collections::iterator::FutureIterator;
use lazy_collections::list::FutureList;
use std::hint::black_box;

fn values(size: i64) -> Vec<i64> {
    (0..size).collect()
}

fn pipeline(list: &FutureList<i64>) -> FutureList<i64> {
    list.filter(|value| value % 3 != 0)
        .map(|value| value * 2)
        .drop(10)
        .fold_left(0, |sum, value| sum + value)
}

// =============================================================================
// Dispatch Paths
// =============================================================================

fn benchmark_dispatch_paths(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("dispatch_paths");

    for size in [100, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::new("bulk", size), &size, |bencher, &size| {
            let context: SharedContext = InlineContext::new().into_shared();
            bencher.iter(|| {
                let list = FutureList::of(context.clone(), values(size));
                black_box(pipeline(&list).get())
            });
        });

        group.bench_with_input(BenchmarkId::new("incremental", size), &size, |bencher, &size| {
            let context: SharedContext = InlineContext::new().into_shared();
            bencher.iter(|| {
                let list = FutureIterator::of(context.clone(), values(size))
                    .filter(|_| true)
                    .to_list();
                black_box(pipeline(&list).get())
            });
        });
    }

    group.finish();
}

// =============================================================================
// Execution Contexts
// =============================================================================

fn benchmark_contexts(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("contexts");
    let inline: SharedContext = InlineContext::new().into_shared();
    let runtime: SharedContext = RuntimeContext::new().into_shared();

    for (name, context) in [("inline", inline), ("runtime", runtime)] {
        group.bench_function(name, |bencher| {
            bencher.iter(|| {
                let list = FutureList::of(context.clone(), values(1_000));
                black_box(pipeline(&list).get())
            });
        });
    }

    group.finish();
}

fn benchmark_short_circuit(criterion: &mut Criterion) {
    let context: SharedContext = InlineContext::new().into_shared();

    criterion.bench_function("exists_first_element", |bencher| {
        bencher.iter(|| {
            let list = FutureIterator::of(context.clone(), values(10_000))
                .filter(|_| true)
                .to_list();
            black_box(list.exists(|value| *value == 0).get())
        });
    });
}

criterion_group!(
    benches,
    benchmark_dispatch_paths,
    benchmark_contexts,
    benchmark_short_circuit
);
criterion_main!(benches);
