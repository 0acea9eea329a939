//! End-to-end scenarios run against the public `Executor` surface: the
//! interpreter's invariants (saga rollback, bounded parallelism, rejection,
//! interrupt/resume, branching) observed the way a caller would actually
//! see them — through `ExecutionResult` and mutated state, never through
//! crate-internal cursor machinery.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use flowloom::{DefinitionBuilder, ErrorKind, ExecutionResult, Executor, FlowId, MapState, StepContext, StepFailure};

fn log_state(flow: &str) -> MapState {
    MapState::new(flow)
}

/// Scenario 1: a saga where the third step always fails. Compensation for
/// the two completed steps runs in reverse completion order.
#[tokio::test]
async fn saga_with_mid_failure_rollback() {
    let definition = DefinitionBuilder::<MapState>::new()
        .step("reserve_inventory", |state: &mut MapState, _ctx: &StepContext| async move {
            state.set("inventory_reserved", true);
            Ok::<bool, StepFailure>(true)
        })
        .with_compensation(|state: &mut MapState, _ctx: &StepContext| async move {
            state.push_log("comp-A");
            state.set("inventory_reserved", false);
            Ok::<(), StepFailure>(())
        })
        .step("process_payment", |state: &mut MapState, _ctx: &StepContext| async move {
            state.set("payment_processed", true);
            Ok::<bool, StepFailure>(true)
        })
        .with_compensation(|state: &mut MapState, _ctx: &StepContext| async move {
            state.push_log("comp-B");
            state.set("payment_processed", false);
            Ok::<(), StepFailure>(())
        })
        .step("ship_order", |_state: &mut MapState, _ctx: &StepContext| async move {
            Err::<bool, StepFailure>(StepFailure::new("carrier unavailable"))
        })
        .build()
        .unwrap();

    let executor = Executor::new(definition).without_checkpointer();
    let result = executor.execute(log_state("saga-1")).await.unwrap();

    match result {
        ExecutionResult::RolledBack { state, error } => {
            assert_eq!(error.kind(), ErrorKind::StepFailed);
            assert!(!state.get_bool("inventory_reserved"));
            assert!(!state.get_bool("payment_processed"));
            assert_eq!(state.log(), vec!["comp-B".to_string(), "comp-A".to_string()]);
        }
        other => panic!("expected RolledBack, got {other:?}"),
    }
}

/// Scenario 2: 20 items, parallelism 5, each sleeping 50ms. Total wall clock
/// must stay well under the fully-sequential 1000ms, and every item runs.
#[tokio::test]
async fn bounded_parallelism_stays_under_sequential_wall_clock() {
    let counter = Arc::new(AtomicUsize::new(0));
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let counter_for_factory = Arc::clone(&counter);
    let active_for_factory = Arc::clone(&active);
    let peak_for_factory = Arc::clone(&peak);

    let definition = DefinitionBuilder::<MapState>::new()
        .for_each(
            |state: &MapState| state.array("items"),
            move |_item, idx| {
                let counter = Arc::clone(&counter_for_factory);
                let active = Arc::clone(&active_for_factory);
                let peak = Arc::clone(&peak_for_factory);
                DefinitionBuilder::<MapState>::new().step(
                    format!("item-{idx}"),
                    move |_state: &mut MapState, _ctx: &StepContext| {
                        let counter = Arc::clone(&counter);
                        let active = Arc::clone(&active);
                        let peak = Arc::clone(&peak);
                        async move {
                            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            active.fetch_sub(1, Ordering::SeqCst);
                            counter.fetch_add(1, Ordering::SeqCst);
                            Ok::<bool, StepFailure>(true)
                        }
                    },
                )
            },
        )
        .with_parallelism(5)
        .build()
        .unwrap();

    let executor = Executor::new(definition).without_checkpointer();
    let mut state = log_state("batch-1");
    let items: Vec<_> = (0..20).map(|i| json!(i)).collect();
    state.set("items", json!(items));

    let started = tokio::time::Instant::now();
    let result = executor.execute(state).await.unwrap();
    let elapsed = started.elapsed();

    assert!(result.is_completed());
    assert_eq!(counter.load(Ordering::SeqCst), 20);
    assert!(peak.load(Ordering::SeqCst) <= 5);
    assert!(elapsed < Duration::from_millis(20 * 50));
}

/// Scenario 3: a step that rejects skips everything after it and pushes no
/// compensation of its own.
#[tokio::test]
async fn step_rejection_skips_subsequent_steps() {
    let definition = DefinitionBuilder::<MapState>::new()
        .step("validate", |state: &mut MapState, _ctx: &StepContext| async move {
            state.set("status", "Rejected");
            Ok::<bool, StepFailure>(false)
        })
        .step("never_runs", |state: &mut MapState, _ctx: &StepContext| async move {
            state.set("never_runs", true);
            Ok::<bool, StepFailure>(true)
        })
        .build()
        .unwrap();

    let executor = Executor::new(definition).without_checkpointer();
    let result = executor.execute(log_state("reject-1")).await.unwrap();

    match result {
        ExecutionResult::RolledBack { state, error } => {
            assert_eq!(error.kind(), ErrorKind::StepRejected);
            assert_eq!(state.get_str("status"), Some("Rejected"));
            assert!(!state.get_bool("never_runs"));
        }
        other => panic!("expected RolledBack, got {other:?}"),
    }
}

/// Scenario 4 (adapted): this engine treats cancellation as a terminal
/// `cancelled` outcome, not a resumable pause — compensation runs for every
/// step that already completed, exactly as for a step rejection or failure
/// (see DESIGN.md's open-question resolution). `resume` is reserved for
/// replaying a checkpoint left by a process that crashed mid-flight, which a
/// single in-process run never produces once cancellation itself rolls
/// back, so there is nothing left to resume into after this run settles.
#[tokio::test]
async fn top_level_cancellation_rolls_back_without_running_later_steps() {
    let token = CancellationToken::new();
    let token_for_step = token.clone();

    let definition = DefinitionBuilder::<MapState>::new()
        .step("step-1", |state: &mut MapState, _ctx: &StepContext| async move {
            state.push_log("step-1");
            Ok::<bool, StepFailure>(true)
        })
        .step("step-2", |state: &mut MapState, _ctx: &StepContext| async move {
            state.push_log("step-2");
            Ok::<bool, StepFailure>(true)
        })
        .step("step-3", move |state: &mut MapState, _ctx: &StepContext| {
            let token = token_for_step.clone();
            async move {
                state.push_log("step-3");
                token.cancel();
                Ok::<bool, StepFailure>(true)
            }
        })
        .step("step-4", |state: &mut MapState, _ctx: &StepContext| async move {
            state.push_log("step-4");
            Ok::<bool, StepFailure>(true)
        })
        .step("step-5", |state: &mut MapState, _ctx: &StepContext| async move {
            state.push_log("step-5");
            Ok::<bool, StepFailure>(true)
        })
        .build()
        .unwrap();

    let executor = Executor::new(definition);
    let flow_id = FlowId::new("interrupt-1");

    let result = executor.execute_cancellable(log_state(flow_id.as_str()), token).await.unwrap();
    match result {
        ExecutionResult::RolledBack { state, error } => {
            assert_eq!(error.kind(), ErrorKind::Cancelled);
            assert_eq!(
                state.log(),
                vec!["step-1", "step-2", "step-3"]
                    .into_iter()
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            );
        }
        other => panic!("expected RolledBack, got {other:?}"),
    }

    assert!(executor.resume(&flow_id).await.is_err());
}

/// Scenario 5: an ElseIf chain where no predicate before Else matches.
#[tokio::test]
async fn else_if_chain_falls_through_to_else() {
    let definition = DefinitionBuilder::<MapState>::new()
        .if_branch(
            |state: &MapState| state.get_i64("counter") == Some(1),
            |b| b.step("one", |state: &mut MapState, _ctx: &StepContext| async move {
                state.push_log("one");
                Ok::<bool, StepFailure>(true)
            }),
        )
        .else_if(
            |state: &MapState| state.get_i64("counter") == Some(2),
            |b| b.step("two", |state: &mut MapState, _ctx: &StepContext| async move {
                state.push_log("two");
                Ok::<bool, StepFailure>(true)
            }),
        )
        .else_if(
            |state: &MapState| state.get_i64("counter") == Some(3),
            |b| b.step("three", |state: &mut MapState, _ctx: &StepContext| async move {
                state.push_log("three");
                Ok::<bool, StepFailure>(true)
            }),
        )
        .else_if(
            |state: &MapState| state.get_i64("counter") == Some(4),
            |b| b.step("four", |state: &mut MapState, _ctx: &StepContext| async move {
                state.push_log("four");
                Ok::<bool, StepFailure>(true)
            }),
        )
        .else_branch(|b| b.step("fallback", |state: &mut MapState, _ctx: &StepContext| async move {
            state.push_log("else");
            Ok::<bool, StepFailure>(true)
        }))
        .end_if()
        .build()
        .unwrap();

    let mut state = log_state("elseif-1");
    state.set("counter", 100);

    let executor = Executor::new(definition).without_checkpointer();
    let result = executor.execute(state).await.unwrap();

    match result {
        ExecutionResult::Completed { state } => {
            assert_eq!(state.log(), vec!["else".to_string()]);
        }
        other => panic!("expected Completed, got {other:?}"),
    }
}

/// Scenario 6: four always-true nested Ifs; the innermost step still runs.
#[tokio::test]
async fn deeply_nested_if_reaches_the_innermost_step() {
    let definition = DefinitionBuilder::<MapState>::new()
        .if_branch(|_: &MapState| true, |b| {
            b.step("L1", |state: &mut MapState, _ctx: &StepContext| async move {
                state.push_log("L1");
                Ok::<bool, StepFailure>(true)
            })
            .if_branch(|_: &MapState| true, |b| {
                b.step("L2", |state: &mut MapState, _ctx: &StepContext| async move {
                    state.push_log("L2");
                    Ok::<bool, StepFailure>(true)
                })
                .if_branch(|_: &MapState| true, |b| {
                    b.step("L3", |state: &mut MapState, _ctx: &StepContext| async move {
                        state.push_log("L3");
                        Ok::<bool, StepFailure>(true)
                    })
                    .if_branch(|_: &MapState| true, |b| {
                        b.step("L4", |state: &mut MapState, _ctx: &StepContext| async move {
                            state.push_log("L4");
                            Ok::<bool, StepFailure>(true)
                        })
                    })
                    .end_if()
                })
                .end_if()
            })
            .end_if()
        })
        .end_if()
        .build()
        .unwrap();

    let executor = Executor::new(definition).without_checkpointer();
    let result = executor.execute(log_state("nested-1")).await.unwrap();

    match result {
        ExecutionResult::Completed { state } => {
            assert_eq!(
                state.log(),
                vec!["L1", "L2", "L3", "L4"].into_iter().map(str::to_string).collect::<Vec<_>>()
            );
        }
        other => panic!("expected Completed, got {other:?}"),
    }
}
