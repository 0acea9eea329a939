//! Benchmarks for the tree-walking interpreter.
//!
//! Measures the cost of a long sequential run and of a bounded-parallel
//! `ForEach` batch, the two shapes most sensitive to per-step overhead.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use serde_json::json;
use tokio::runtime::Runtime;

use flowloom::{DefinitionBuilder, Executor, MapState, StepContext, StepFailure};

const SEQUENTIAL_LENGTHS: &[usize] = &[10, 100, 1_000];
const FOR_EACH_ITEM_COUNTS: &[usize] = &[20, 200];

fn build_sequential(steps: usize) -> flowloom::Definition<MapState> {
    let mut builder = DefinitionBuilder::<MapState>::new();
    for i in 0..steps {
        builder = builder.step(format!("step-{i}"), |state: &mut MapState, _ctx: &StepContext| async move {
            state.set("touched", true);
            Ok::<bool, StepFailure>(true)
        });
    }
    builder.build().expect("benchmark definition is well-formed")
}

fn build_for_each(parallelism: usize) -> flowloom::Definition<MapState> {
    DefinitionBuilder::<MapState>::new()
        .for_each(
            |state: &MapState| state.array("items"),
            |_item, idx| {
                DefinitionBuilder::<MapState>::new().step(
                    format!("item-{idx}"),
                    |state: &mut MapState, _ctx: &StepContext| async move {
                        state.set("touched", true);
                        Ok::<bool, StepFailure>(true)
                    },
                )
            },
        )
        .with_parallelism(parallelism as i64)
        .build()
        .expect("benchmark definition is well-formed")
}

fn items_state(count: usize) -> MapState {
    let mut state = MapState::new("bench");
    let items: Vec<_> = (0..count).map(|i| json!(i)).collect();
    state.set("items", json!(items));
    state
}

fn sequential_throughput(c: &mut Criterion) {
    let runtime = Runtime::new().expect("tokio runtime");
    let mut group = c.benchmark_group("executor_sequential");

    for &steps in SEQUENTIAL_LENGTHS {
        group.throughput(Throughput::Elements(steps as u64));
        group.bench_with_input(BenchmarkId::from_parameter(steps), &steps, |b, &steps| {
            b.to_async(&runtime).iter(|| async move {
                let executor = Executor::new(build_sequential(steps)).without_checkpointer();
                executor.execute(MapState::new("seq-bench")).await.expect("execute");
            });
        });
    }

    group.finish();
}

fn bounded_for_each_throughput(c: &mut Criterion) {
    let runtime = Runtime::new().expect("tokio runtime");
    let mut group = c.benchmark_group("executor_for_each");

    for &count in FOR_EACH_ITEM_COUNTS {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.to_async(&runtime).iter(|| async move {
                let executor = Executor::new(build_for_each(8)).without_checkpointer();
                executor.execute(items_state(count)).await.expect("execute");
            });
        });
    }

    group.finish();
}

criterion_group!(benches, sequential_throughput, bounded_for_each_throughput);
criterion_main!(benches);
