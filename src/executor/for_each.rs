//! `ForEach` dispatch: a sequential walk that shares the outer `Engine`
//! directly, and a bounded-parallel walk that gives each item its own
//! throwaway `Engine` over a cloned slice of state guarded by a shared
//! mutex.

use std::collections::VecDeque;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

use crate::compensation::CompensationStack;
use crate::concurrency::run_bounded;
use crate::config::RuntimeConfig;
use crate::cursor::{Cursor, Frame, Position};
use crate::definition::node::{ForEachNode, ItemBodyFactory};
use crate::definition::{Definition, Node};
use crate::diagnostics::DiagnosticsBus;
use crate::error::FlowError;
use crate::flow_state::FlowState;
use crate::ids::FlowId;

use super::{Engine, StepOutcome, StopReason, ROOT_NODE_ID};

impl<S: FlowState> Engine<S> {
    pub(super) async fn run_for_each(
        &mut self,
        node: &ForEachNode<S>,
        resume: &mut Option<VecDeque<Frame>>,
    ) -> Result<StepOutcome, FlowError> {
        let items = (node.items)(&self.state);

        let mut start = 0usize;
        let mut descend_resume: Option<VecDeque<Frame>> = None;

        if let Some(queue) = resume.as_mut() {
            match queue.front().cloned() {
                Some(front) if front.node == node.id => {
                    let Position::ForEach { next, .. } = front.position else {
                        unreachable!("a ForEach's frame always carries Position::ForEach")
                    };
                    let has_more = queue.len() > 1;
                    queue.pop_front();
                    if has_more {
                        start = next;
                        descend_resume = resume.take();
                    } else {
                        *resume = None;
                        start = next + 1;
                    }
                }
                _ => *resume = None,
            }
        }

        if start >= items.len() {
            return Ok(StepOutcome::Continue);
        }

        if node.parallelism <= 1 {
            self.run_for_each_sequential(node, &items, start, descend_resume).await
        } else {
            // Progress through a parallel batch is never checkpointed (see
            // `run_for_each_parallel`), so a resume can only ever land here
            // with `start == 0` and nothing left to descend into; run the
            // whole batch fresh regardless of what `descend_resume` holds.
            self.run_for_each_parallel(node, &items).await
        }
    }

    async fn run_for_each_sequential(
        &mut self,
        node: &ForEachNode<S>,
        items: &[Value],
        start: usize,
        mut descend_resume: Option<VecDeque<Frame>>,
    ) -> Result<StepOutcome, FlowError> {
        let len = items.len();
        let mut first_failure: Option<FlowError> = None;

        for idx in start..len {
            let mut item_resume = if idx == start { descend_resume.take() } else { None };
            let body = build_item_body(node, &items[idx], idx)?;

            self.cursor.push(Frame::new(node.id, Position::ForEach { len, next: idx }));
            let outcome = self.run_body(node.id, &body, &mut item_resume).await;
            self.cursor.pop();

            match outcome {
                Ok(StepOutcome::Continue) => continue,
                Ok(StepOutcome::Stop(StopReason::Cancelled)) => {
                    return Ok(StepOutcome::Stop(StopReason::Cancelled));
                }
                Ok(StepOutcome::Stop(StopReason::Rejected { step, node: rejected })) => {
                    let error = FlowError::StepRejected { step, node: rejected };
                    if node.continue_on_failure {
                        first_failure.get_or_insert(error);
                        continue;
                    }
                    return Err(error);
                }
                Err(e) => {
                    if node.continue_on_failure {
                        first_failure.get_or_insert(e);
                        continue;
                    }
                    return Err(e);
                }
            }
        }

        match first_failure {
            Some(e) => Err(e),
            None => Ok(StepOutcome::Continue),
        }
    }

    /// Runs every item concurrently (bounded by `node.parallelism`), each
    /// against its own snapshot of `self.state` taken and merged back
    /// through a shared mutex held only for those two brief moments, not
    /// for the item's execution itself. Nothing here is checkpointed
    /// mid-batch: a crash restarts the entire batch from item `0` on resume.
    ///
    /// Unless `node.continue_on_failure` is set, the first item to fail
    /// cancels a child token scoped to this batch so items still waiting on
    /// a permit skip their body entirely instead of starting after the
    /// batch has already lost. The child token never reaches back up to
    /// `self.cancellation`, so a self-inflicted batch cancel can't be
    /// mistaken for genuine outer cancellation once the batch settles.
    async fn run_for_each_parallel(
        &mut self,
        node: &ForEachNode<S>,
        items: &[Value],
    ) -> Result<StepOutcome, FlowError> {
        if self.cancellation.is_cancelled() {
            return Ok(StepOutcome::Stop(StopReason::Cancelled));
        }

        let len = items.len();
        self.cursor.push(Frame::new(node.id, Position::ForEach { len, next: 0 }));

        let shared = Arc::new(AsyncMutex::new(self.state.clone()));
        let shared_outer = Arc::clone(&shared);
        let diagnostics = Arc::clone(&self.diagnostics);
        let config = self.config.clone();
        let flow_id = self.flow_id.clone();
        let body_factory = Arc::clone(&node.body_factory);
        let items_vec = items.to_vec();

        let cancel_remaining = !node.continue_on_failure;
        let batch_token =
            if cancel_remaining { self.cancellation.child_token() } else { self.cancellation.clone() };

        let results = run_bounded(len, node.parallelism, batch_token, move |idx, token| {
            let shared = Arc::clone(&shared);
            let diagnostics = Arc::clone(&diagnostics);
            let config = config.clone();
            let flow_id = flow_id.clone();
            let body_factory = Arc::clone(&body_factory);
            let item = items_vec[idx].clone();
            async move {
                let result =
                    run_parallel_item(shared, diagnostics, config, flow_id, body_factory, item, idx, token.clone())
                        .await;
                if cancel_remaining {
                    if let Err(ref error) = result {
                        if !matches!(error, FlowError::Cancelled { .. }) {
                            token.cancel();
                        }
                    }
                }
                result
            }
        })
        .await;

        self.cursor.pop();

        self.state = Arc::try_unwrap(shared_outer)
            .unwrap_or_else(|_| unreachable!("run_bounded awaits every spawned item before returning"))
            .into_inner();

        if self.cancellation.is_cancelled() {
            return Ok(StepOutcome::Stop(StopReason::Cancelled));
        }
        if let Some(error) = results.into_iter().find_map(|r| match r {
            Err(error) if !matches!(error, FlowError::Cancelled { .. }) => Some(error),
            _ => None,
        }) {
            return Err(error);
        }
        Ok(StepOutcome::Continue)
    }
}

fn build_item_body<S: FlowState>(node: &ForEachNode<S>, item: &Value, idx: usize) -> Result<Node<S>, FlowError> {
    (node.body_factory)(item, idx).build_subtree().map_err(FlowError::Build)
}

#[allow(clippy::too_many_arguments)]
async fn run_parallel_item<S: FlowState>(
    shared: Arc<AsyncMutex<S>>,
    diagnostics: Arc<DiagnosticsBus>,
    config: RuntimeConfig,
    flow_id: FlowId,
    body_factory: ItemBodyFactory<S>,
    item: Value,
    idx: usize,
    cancellation: CancellationToken,
) -> Result<(), FlowError> {
    let body = match body_factory(&item, idx).build_subtree() {
        Ok(body) => body,
        Err(e) => return Err(FlowError::Build(e)),
    };

    // The lock is only held to snapshot and to merge back, never across the
    // item's own execution: holding it for the full duration would collapse
    // bounded parallelism into full serialization. Items that mutate
    // disjoint fields of `S` compose cleanly; items racing on the same
    // field get last-write-wins at merge time, which is the documented
    // "no synchronization" contract for shared mutable state.
    let item_state = shared.lock().await.clone();

    let mut engine: Engine<S> = Engine {
        definition: Arc::new(Definition {
            root: Node::Sequence(Vec::new()),
            steps: FxHashMap::default(),
        }),
        checkpointer: None,
        diagnostics,
        config,
        cancellation,
        state: item_state,
        cursor: Cursor::new(),
        compensation: CompensationStack::new(),
        runtime_compensations: Vec::new(),
        flow_id,
    };

    let outcome = engine.run_body(ROOT_NODE_ID, &body, &mut None).await;
    let result = match outcome {
        Ok(StepOutcome::Continue) => Ok(()),
        Ok(StepOutcome::Stop(StopReason::Cancelled)) => {
            engine.rollback().await;
            Err(FlowError::Cancelled { flow_id: engine.flow_id.clone() })
        }
        Ok(StepOutcome::Stop(StopReason::Rejected { step, node })) => {
            engine.rollback().await;
            Err(FlowError::StepRejected { step, node })
        }
        Err(e) => {
            engine.rollback().await;
            Err(e)
        }
    };

    *shared.lock().await = engine.state;
    result
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use serde_json::json;

    use crate::definition::DefinitionBuilder;
    use crate::error::{ErrorKind, StepFailure};
    use crate::executor::Executor;
    use crate::flow_state::MapState;
    use crate::result::ExecutionResult;
    use crate::step::StepContext;

    fn items_state(flow: &str, count: usize) -> MapState {
        let mut state = MapState::new(flow);
        let items: Vec<_> = (0..count).map(|i| json!(i)).collect();
        state.set("items", json!(items));
        state
    }

    #[tokio::test]
    async fn bounded_parallel_for_each_runs_every_item() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_for_factory = Arc::clone(&counter);

        let definition = DefinitionBuilder::<MapState>::new()
            .for_each(
                |state: &MapState| state.array("items"),
                move |_item, idx| {
                    let counter = Arc::clone(&counter_for_factory);
                    DefinitionBuilder::<MapState>::new().step(
                        format!("item-{idx}"),
                        move |state: &mut MapState, _ctx: &StepContext| {
                            let counter = Arc::clone(&counter);
                            async move {
                                counter.fetch_add(1, Ordering::SeqCst);
                                state.set(format!("done_{idx}"), true);
                                Ok::<bool, StepFailure>(true)
                            }
                        },
                    )
                },
            )
            .with_parallelism(4)
            .build()
            .unwrap();

        let executor = Executor::new(definition).without_checkpointer();
        let result = executor.execute(items_state("batch-1", 5)).await.unwrap();

        match result {
            ExecutionResult::Completed { state } => {
                for idx in 0..5 {
                    assert!(state.get_bool(&format!("done_{idx}")));
                }
            }
            other => panic!("expected Completed, got {other:?}"),
        }
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn continue_on_failure_runs_every_item_before_rolling_back() {
        let definition = DefinitionBuilder::<MapState>::new()
            .for_each(
                |state: &MapState| state.array("items"),
                |_item, idx| {
                    DefinitionBuilder::<MapState>::new().step(
                        format!("item-{idx}"),
                        move |state: &mut MapState, _ctx: &StepContext| async move {
                            if idx == 2 {
                                Ok::<bool, StepFailure>(false)
                            } else {
                                state.set(format!("done_{idx}"), true);
                                Ok::<bool, StepFailure>(true)
                            }
                        },
                    )
                },
            )
            .with_continue_on_failure()
            .build()
            .unwrap();

        let executor = Executor::new(definition).without_checkpointer();
        let result = executor.execute(items_state("batch-2", 5)).await.unwrap();

        match result {
            ExecutionResult::RolledBack { state, error } => {
                assert_eq!(error.kind(), ErrorKind::StepRejected);
                assert!(state.get_bool("done_4"));
                assert!(!state.get_bool("done_2"));
            }
            other => panic!("expected RolledBack, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn parallel_for_each_skips_items_waiting_on_a_permit_after_a_sibling_fails() {
        let definition = DefinitionBuilder::<MapState>::new()
            .for_each(
                |state: &MapState| state.array("items"),
                |_item, idx| {
                    DefinitionBuilder::<MapState>::new().step(
                        format!("item-{idx}"),
                        move |state: &mut MapState, _ctx: &StepContext| async move {
                            if idx == 0 {
                                return Ok::<bool, StepFailure>(false);
                            }
                            if idx == 1 {
                                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                            }
                            state.set(format!("done_{idx}"), true);
                            Ok::<bool, StepFailure>(true)
                        },
                    )
                },
            )
            .with_parallelism(2)
            .build()
            .unwrap();

        let executor = Executor::new(definition).without_checkpointer();
        let result = executor.execute(items_state("batch-3", 6)).await.unwrap();

        match result {
            ExecutionResult::RolledBack { state, error } => {
                assert_eq!(error.kind(), ErrorKind::StepRejected);
                // Items 2-5 sit behind the two-permit gate; by the time a
                // permit frees, item 0 has already cancelled the batch.
                for idx in 2..6 {
                    assert!(!state.get_bool(&format!("done_{idx}")));
                }
            }
            other => panic!("expected RolledBack, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn parallel_for_each_with_continue_on_failure_runs_every_item() {
        let definition = DefinitionBuilder::<MapState>::new()
            .for_each(
                |state: &MapState| state.array("items"),
                |_item, idx| {
                    DefinitionBuilder::<MapState>::new().step(
                        format!("item-{idx}"),
                        move |state: &mut MapState, _ctx: &StepContext| async move {
                            if idx == 2 {
                                Ok::<bool, StepFailure>(false)
                            } else {
                                state.set(format!("done_{idx}"), true);
                                Ok::<bool, StepFailure>(true)
                            }
                        },
                    )
                },
            )
            .with_parallelism(4)
            .with_continue_on_failure()
            .build()
            .unwrap();

        let executor = Executor::new(definition).without_checkpointer();
        let result = executor.execute(items_state("batch-4", 5)).await.unwrap();

        match result {
            ExecutionResult::RolledBack { state, error } => {
                assert_eq!(error.kind(), ErrorKind::StepRejected);
                for idx in [0, 1, 3, 4] {
                    assert!(state.get_bool(&format!("done_{idx}")));
                }
                assert!(!state.get_bool("done_2"));
            }
            other => panic!("expected RolledBack, got {other:?}"),
        }
    }
}
