//! The tree-walking interpreter.
//!
//! [`Engine`] owns one in-flight execution: the live [`Cursor`], the
//! compensation stack (both its durable record and the run-local callables
//! needed to actually invoke rollback), and the user state. [`Executor`] is
//! the caller-facing handle that constructs an `Engine` per call and never
//! holds state itself, mirroring the split between a stateless runner and
//! its per-invocation session that the rest of this crate's ecosystem uses.

mod for_each;

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::checkpoint::{CheckpointRecord, Checkpointer};
use crate::compensation::{CompensationEntry, CompensationStack};
use crate::config::RuntimeConfig;
use crate::cursor::{Cursor, Frame, Position};
use crate::definition::{Definition, IfNode, Node, StepSpec, SwitchNode, WhileNode};
use crate::diagnostics::{DiagnosticsBus, FlowEvent, FlowEventKind};
use crate::error::{BuildError, FlowError};
use crate::flow_state::FlowState;
use crate::ids::{FlowId, NodeId};
use crate::result::ExecutionResult;
use crate::step::{CompensationBody, StepContext};

/// Frame identifier for the root `Sequence` of a `Definition`, which has no
/// owning construct and therefore no `NodeId` of its own. The builder's
/// allocator starts at `0` and only ever reaches `u32::MAX` for trees far
/// beyond anything this engine is meant to hold, so the value is safe to
/// reserve.
pub(crate) const ROOT_NODE_ID: NodeId = NodeId::from_raw(u32::MAX);

/// What a subtree's walk resolved to, short of a terminal error.
#[derive(Debug)]
pub(crate) enum StepOutcome {
    /// The subtree ran to completion; the caller should proceed to its next
    /// sibling (or, at the root, to a successful terminal result).
    Continue,
    Stop(StopReason),
}

#[derive(Debug)]
pub(crate) enum StopReason {
    Rejected { step: String, node: NodeId },
    Cancelled,
}

/// Caller-facing handle to run or resume a [`Definition`].
///
/// Stateless between calls: every `execute`/`resume` builds a fresh
/// [`Engine`] from the configured collaborators.
pub struct Executor<S: FlowState> {
    definition: Arc<Definition<S>>,
    checkpointer: Option<Arc<dyn Checkpointer>>,
    diagnostics: Arc<DiagnosticsBus>,
    config: RuntimeConfig,
}

impl<S: FlowState> Executor<S> {
    #[must_use]
    pub fn new(definition: Definition<S>) -> Self {
        let config = RuntimeConfig::default();
        Self {
            definition: Arc::new(definition),
            checkpointer: Some(Arc::new(crate::checkpoint::InMemoryCheckpointer::new())),
            diagnostics: DiagnosticsBus::new(config.diagnostics_capacity),
            config,
        }
    }

    #[must_use]
    pub fn with_checkpointer(mut self, checkpointer: Arc<dyn Checkpointer>) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    /// Disables durable checkpointing. `resume` will always fail with
    /// `StoreError::NotFound`; useful for one-shot, fire-and-forget flows.
    #[must_use]
    pub fn without_checkpointer(mut self) -> Self {
        self.checkpointer = None;
        self
    }

    #[must_use]
    pub fn with_diagnostics(mut self, bus: Arc<DiagnosticsBus>) -> Self {
        self.diagnostics = bus;
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.diagnostics = DiagnosticsBus::new(config.diagnostics_capacity);
        self.config = config;
        self
    }

    #[must_use]
    pub fn diagnostics(&self) -> Arc<DiagnosticsBus> {
        Arc::clone(&self.diagnostics)
    }

    pub async fn execute(&self, state: S) -> Result<ExecutionResult<S>, FlowError> {
        self.execute_cancellable(state, CancellationToken::new()).await
    }

    #[instrument(skip(self, state, cancellation), fields(flow_id = %state.flow_id()))]
    pub async fn execute_cancellable(
        &self,
        state: S,
        cancellation: CancellationToken,
    ) -> Result<ExecutionResult<S>, FlowError> {
        let flow_id = state.flow_id().clone();
        if flow_id.as_str().is_empty() {
            return Err(FlowError::Build(BuildError::MissingFlowId));
        }
        let engine = Engine {
            definition: Arc::clone(&self.definition),
            checkpointer: self.checkpointer.clone(),
            diagnostics: Arc::clone(&self.diagnostics),
            config: self.config.clone(),
            cancellation,
            state,
            cursor: Cursor::new(),
            compensation: CompensationStack::new(),
            runtime_compensations: Vec::new(),
            flow_id,
        };
        engine.run().await
    }

    pub async fn resume(&self, flow_id: &FlowId) -> Result<ExecutionResult<S>, FlowError> {
        self.resume_cancellable(flow_id, CancellationToken::new()).await
    }

    #[instrument(skip(self, cancellation), fields(%flow_id))]
    pub async fn resume_cancellable(
        &self,
        flow_id: &FlowId,
        cancellation: CancellationToken,
    ) -> Result<ExecutionResult<S>, FlowError> {
        if flow_id.as_str().is_empty() {
            return Err(FlowError::Build(BuildError::MissingFlowId));
        }
        let checkpointer = self.checkpointer.as_ref().ok_or_else(|| {
            FlowError::Store(crate::checkpoint::StoreError::NotFound { flow_id: flow_id.clone() })
        })?;
        let record = checkpointer
            .load(flow_id)
            .await?
            .ok_or_else(|| crate::checkpoint::StoreError::NotFound { flow_id: flow_id.clone() })?;
        let state: S = record.decode_state()?;

        // Every entry restored from a checkpoint predates this process, so no
        // direct callable is available for it yet; rollback falls back to
        // looking the static step up by id (see `Engine::rollback`).
        let runtime_compensations = vec![None; record.compensation.len()];

        let engine = Engine {
            definition: Arc::clone(&self.definition),
            checkpointer: Some(Arc::clone(checkpointer)),
            diagnostics: Arc::clone(&self.diagnostics),
            config: self.config.clone(),
            cancellation,
            state,
            cursor: record.cursor,
            compensation: record.compensation,
            runtime_compensations,
            flow_id: flow_id.clone(),
        };
        engine.run().await
    }
}

/// One in-flight walk of a [`Definition`].
pub(crate) struct Engine<S: FlowState> {
    definition: Arc<Definition<S>>,
    checkpointer: Option<Arc<dyn Checkpointer>>,
    diagnostics: Arc<DiagnosticsBus>,
    config: RuntimeConfig,
    cancellation: CancellationToken,
    state: S,
    cursor: Cursor,
    compensation: CompensationStack,
    /// Kept 1:1 with `compensation`'s entries; `None` marks an entry whose
    /// callable was not pushed in the current process (loaded from a
    /// checkpoint rather than just-completed).
    runtime_compensations: Vec<Option<Arc<dyn CompensationBody<S>>>>,
    flow_id: FlowId,
}

impl<S: FlowState> Engine<S> {
    async fn run(mut self) -> Result<ExecutionResult<S>, FlowError> {
        let mut resume = if self.cursor.is_root() {
            None
        } else {
            Some(VecDeque::from(self.cursor.frames().to_vec()))
        };
        // The cursor we just took the resume path from is stale the moment
        // we start walking; it gets rebuilt live, frame for frame, as the
        // interpreter descends.
        self.cursor = Cursor::new();

        let definition = Arc::clone(&self.definition);
        let Node::Sequence(children) = definition.root() else {
            unreachable!("DefinitionBuilder::build always wraps the tree root in a Sequence")
        };

        let outcome = self.run_sequence(ROOT_NODE_ID, children, &mut resume).await;

        match outcome {
            Ok(StepOutcome::Continue) => {
                self.forget_checkpoint().await;
                Ok(ExecutionResult::Completed { state: self.state })
            }
            Ok(StepOutcome::Stop(StopReason::Cancelled)) => {
                self.emit(FlowEventKind::Cancelled);
                let error = FlowError::Cancelled { flow_id: self.flow_id.clone() };
                self.finish_with_rollback(error).await
            }
            Ok(StepOutcome::Stop(StopReason::Rejected { step, node })) => {
                let error = FlowError::StepRejected { step, node };
                self.finish_with_rollback(error).await
            }
            Err(error) => self.finish_with_rollback(error).await,
        }
    }

    async fn finish_with_rollback(mut self, error: FlowError) -> Result<ExecutionResult<S>, FlowError> {
        let unresolved = self.rollback().await;
        self.forget_checkpoint().await;
        if unresolved.is_empty() {
            Ok(ExecutionResult::RolledBack { state: self.state, error })
        } else {
            let wrapped = FlowError::CompensationIncomplete {
                flow_id: self.flow_id.clone(),
                failed_steps: unresolved,
                original: Box::new(error),
            };
            Ok(ExecutionResult::RolledBack { state: self.state, error: wrapped })
        }
    }

    async fn forget_checkpoint(&self) {
        if let Some(checkpointer) = &self.checkpointer {
            if let Err(error) = checkpointer.delete(&self.flow_id).await {
                tracing::warn!(target: "flowloom::executor", %error, "failed to delete settled checkpoint");
            }
        }
    }

    /// Invokes compensation bodies in reverse completion order. Returns the
    /// names of steps whose compensation either raised or could not be
    /// resolved to a callable (see `runtime_compensations`' doc comment).
    pub(super) async fn rollback(&mut self) -> Vec<String> {
        let mut unresolved = Vec::new();
        while let Some(entry) = self.compensation.pop() {
            let local = self.runtime_compensations.pop().flatten();
            let callable = local.or_else(|| {
                self.definition
                    .step(entry.step)
                    .and_then(|spec| spec.compensation.clone())
            });
            match callable {
                Some(body) => {
                    let ctx = StepContext::new(entry.step_name.clone(), 1, self.cancellation.clone());
                    match body.run(&mut self.state, &ctx).await {
                        Ok(()) => {
                            self.emit(FlowEventKind::CompensationInvoked {
                                node: entry.step,
                                step: entry.step_name.clone(),
                                ok: true,
                            });
                        }
                        Err(failure) => {
                            tracing::warn!(
                                target: "flowloom::executor",
                                step = %entry.step_name,
                                error = %failure,
                                "compensation body failed; rollback continues"
                            );
                            self.emit(FlowEventKind::CompensationInvoked {
                                node: entry.step,
                                step: entry.step_name.clone(),
                                ok: false,
                            });
                            unresolved.push(entry.step_name.clone());
                        }
                    }
                }
                None => {
                    tracing::warn!(
                        target: "flowloom::executor",
                        step = %entry.step_name,
                        "no compensation body available for this step (not resolvable after resume)"
                    );
                    unresolved.push(entry.step_name.clone());
                }
            }
        }
        unresolved
    }

    fn emit(&self, kind: FlowEventKind) {
        self.diagnostics.publish(FlowEvent::new(self.flow_id.clone(), kind));
    }

    async fn checkpoint_now(&mut self) -> Result<(), FlowError> {
        let Some(checkpointer) = self.checkpointer.clone() else {
            return Ok(());
        };
        let record = CheckpointRecord::new(self.cursor.clone(), self.compensation.clone(), &self.state)?;
        checkpointer.save(record).await?;
        let node = self.cursor.current().map(|f| f.node).unwrap_or(ROOT_NODE_ID);
        self.emit(FlowEventKind::CheckpointWritten { node });
        Ok(())
    }

    fn push_compensation(&mut self, node: NodeId, name: impl Into<String>, body: Arc<dyn CompensationBody<S>>) {
        self.compensation.push(CompensationEntry::new(node, name));
        self.runtime_compensations.push(Some(body));
    }

    /// A `Sequence`'s children are always leaves or composites, never
    /// another bare `Sequence` — the builder only produces `Node::Sequence`
    /// as the body of a composite, never as an element within one.
    pub(super) async fn run_sequence(
        &mut self,
        owner: NodeId,
        children: &[Node<S>],
        resume: &mut Option<VecDeque<Frame>>,
    ) -> Result<StepOutcome, FlowError> {
        let mut start = 0usize;

        if let Some(queue) = resume.as_mut() {
            match queue.front().cloned() {
                Some(front) if front.node == owner => {
                    let Position::Sequence(idx) = front.position else {
                        unreachable!("a Sequence's frame always carries Position::Sequence")
                    };
                    let has_more = queue.len() > 1;
                    queue.pop_front();
                    if !has_more {
                        // `idx` completed right before the checkpoint.
                        *resume = None;
                        start = idx + 1;
                    } else if idx < children.len() {
                        // Still mid-flight inside child `idx`; descend with
                        // the remaining queue, then fall through to its
                        // siblings.
                        self.cursor.push(Frame::new(owner, Position::Sequence(idx)));
                        let outcome = self.run_child(&children[idx], resume).await;
                        self.cursor.pop();
                        match outcome {
                            Ok(StepOutcome::Continue) => start = idx + 1,
                            other => return other,
                        }
                    } else {
                        *resume = None;
                        start = children.len();
                    }
                }
                // A well-formed cursor never diverges from the tree it was
                // cut from; fall back to a fresh walk defensively rather
                // than trust a frame that doesn't belong here.
                _ => *resume = None,
            }
        }

        for idx in start..children.len() {
            self.cursor.push(Frame::new(owner, Position::Sequence(idx)));
            let outcome = self.run_child(&children[idx], resume).await;
            self.cursor.pop();
            match outcome {
                Ok(StepOutcome::Continue) => continue,
                other => return other,
            }
        }
        Ok(StepOutcome::Continue)
    }

    pub(super) async fn run_child(
        &mut self,
        node: &Node<S>,
        resume: &mut Option<VecDeque<Frame>>,
    ) -> Result<StepOutcome, FlowError> {
        if resume.is_none() && self.cancellation.is_cancelled() {
            return Ok(StepOutcome::Stop(StopReason::Cancelled));
        }
        match node {
            Node::Step(spec) => self.run_step(spec, resume).await,
            Node::If(if_node) => self.run_if(if_node, resume).await,
            Node::Switch(switch_node) => self.run_switch(switch_node, resume).await,
            Node::While(while_node) => self.run_while(while_node, resume).await,
            Node::ForEach(for_each) => self.run_for_each(for_each, resume).await,
            Node::Sequence(_) => unreachable!("a Sequence never appears as a Sequence's own child"),
        }
    }

    pub(super) fn run_body<'a>(
        &'a mut self,
        owner: NodeId,
        node: &'a Node<S>,
        resume: &'a mut Option<VecDeque<Frame>>,
    ) -> Pin<Box<dyn Future<Output = Result<StepOutcome, FlowError>> + Send + 'a>> {
        Box::pin(async move {
            match node {
                Node::Sequence(children) => self.run_sequence(owner, children, resume).await,
                other => self.run_child(other, resume).await,
            }
        })
    }

    async fn run_step(
        &mut self,
        spec: &Arc<StepSpec<S>>,
        resume: &mut Option<VecDeque<Frame>>,
    ) -> Result<StepOutcome, FlowError> {
        // Steps are leaves: by the time a resume reaches here, `run_sequence`
        // (and the other composites) have already consumed the checkpointed
        // position, so there is nothing left to replay.
        *resume = None;

        if self.cancellation.is_cancelled() {
            return Ok(StepOutcome::Stop(StopReason::Cancelled));
        }

        let timeout = spec.timeout.or(self.config.default_step_timeout);

        let mut attempt: u32 = 1;
        loop {
            self.emit(FlowEventKind::StepStarted { node: spec.id, step: spec.name.clone(), attempt });
            tracing::debug!(target: "flowloom::executor", step = %spec.name, node = %spec.id, attempt, "step started");

            let ctx = StepContext::new(spec.name.clone(), attempt, self.cancellation.clone());
            let run_fut = spec.body.run(&mut self.state, &ctx);
            let outcome = match timeout {
                Some(duration) => match tokio::time::timeout(duration, run_fut).await {
                    Ok(result) => result,
                    Err(_) => {
                        tracing::warn!(target: "flowloom::executor", step = %spec.name, node = %spec.id, "step timed out");
                        self.emit(FlowEventKind::StepTimedOut { node: spec.id, step: spec.name.clone() });
                        return Err(FlowError::Timeout {
                            step: spec.name.clone(),
                            node: spec.id,
                            elapsed_ms: duration.as_millis() as u64,
                        });
                    }
                },
                None => run_fut.await,
            };

            match outcome {
                Ok(true) => {
                    tracing::debug!(target: "flowloom::executor", step = %spec.name, node = %spec.id, "step completed");
                    self.emit(FlowEventKind::StepCompleted { node: spec.id, step: spec.name.clone() });
                    if let Some(comp) = &spec.compensation {
                        self.push_compensation(spec.id, spec.name.clone(), Arc::clone(comp));
                    }
                    self.checkpoint_now().await?;
                    return Ok(StepOutcome::Continue);
                }
                Ok(false) => {
                    tracing::warn!(target: "flowloom::executor", step = %spec.name, node = %spec.id, "step rejected");
                    self.emit(FlowEventKind::StepRejected { node: spec.id, step: spec.name.clone() });
                    return Ok(StepOutcome::Stop(StopReason::Rejected { step: spec.name.clone(), node: spec.id }));
                }
                Err(failure) => {
                    tracing::warn!(target: "flowloom::executor", step = %spec.name, node = %spec.id, error = %failure, "step failed");
                    self.emit(FlowEventKind::StepFailed {
                        node: spec.id,
                        step: spec.name.clone(),
                        message: failure.message.clone(),
                    });
                    let next_attempt = attempt + 1;
                    let delay = match &spec.retry {
                        Some(policy) => policy.delay_before(next_attempt).await,
                        None if next_attempt <= self.config.default_max_attempts => Some(std::time::Duration::ZERO),
                        None => None,
                    };
                    if let Some(delay) = delay {
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                        attempt = next_attempt;
                        continue;
                    }
                    return Err(FlowError::StepFailed {
                        step: spec.name.clone(),
                        node: spec.id,
                        message: failure.message.clone(),
                        cause: Some(failure),
                    });
                }
            }
        }
    }

    async fn run_if(
        &mut self,
        if_node: &IfNode<S>,
        resume: &mut Option<VecDeque<Frame>>,
    ) -> Result<StepOutcome, FlowError> {
        if let Some(queue) = resume.as_mut() {
            if let Some(front) = queue.front().cloned() {
                if front.node == if_node.id {
                    let Position::Branch(idx) = front.position else {
                        unreachable!("an If's frame always carries Position::Branch")
                    };
                    let has_more = queue.len() > 1;
                    queue.pop_front();
                    if !has_more {
                        *resume = None;
                        return Ok(StepOutcome::Continue);
                    }
                    let body = branch_body(if_node, idx);
                    self.cursor.push(Frame::new(if_node.id, Position::Branch(idx)));
                    let outcome = self.run_body(if_node.id, body, resume).await;
                    self.cursor.pop();
                    return outcome;
                }
                *resume = None;
            } else {
                *resume = None;
            }
        }

        for (idx, arm) in if_node.arms.iter().enumerate() {
            if (arm.predicate)(&self.state) {
                self.emit(FlowEventKind::BranchTaken { node: if_node.id, arm: branch_label(if_node, idx) });
                self.cursor.push(Frame::new(if_node.id, Position::Branch(idx)));
                let outcome = self.run_body(if_node.id, &arm.body, resume).await?;
                self.cursor.pop();
                return Ok(outcome);
            }
        }
        if let Some(else_branch) = &if_node.else_branch {
            let idx = if_node.arms.len();
            self.emit(FlowEventKind::BranchTaken { node: if_node.id, arm: branch_label(if_node, idx) });
            self.cursor.push(Frame::new(if_node.id, Position::Branch(idx)));
            let outcome = self.run_body(if_node.id, else_branch, resume).await?;
            self.cursor.pop();
            return Ok(outcome);
        }
        Ok(StepOutcome::Continue)
    }

    async fn run_switch(
        &mut self,
        switch_node: &SwitchNode<S>,
        resume: &mut Option<VecDeque<Frame>>,
    ) -> Result<StepOutcome, FlowError> {
        if let Some(queue) = resume.as_mut() {
            if let Some(front) = queue.front().cloned() {
                if front.node == switch_node.id {
                    let Position::Case(idx_opt) = front.position else {
                        unreachable!("a Switch's frame always carries Position::Case")
                    };
                    let has_more = queue.len() > 1;
                    queue.pop_front();
                    if !has_more {
                        *resume = None;
                        return Ok(StepOutcome::Continue);
                    }
                    let body = case_body(switch_node, idx_opt);
                    self.cursor.push(Frame::new(switch_node.id, Position::Case(idx_opt)));
                    let outcome = self.run_body(switch_node.id, body, resume).await;
                    self.cursor.pop();
                    return outcome;
                }
                *resume = None;
            } else {
                *resume = None;
            }
        }

        let key = (switch_node.key)(&self.state);
        let matched = switch_node.cases.iter().position(|(case_key, _)| case_key == &key);
        let (idx_opt, body) = match matched {
            Some(idx) => (Some(idx), switch_node.cases[idx].1.as_ref()),
            None => match &switch_node.default {
                Some(default_body) => (None, default_body.as_ref()),
                None => {
                    self.emit(FlowEventKind::SwitchMatched { node: switch_node.id, case: None });
                    return Ok(StepOutcome::Continue);
                }
            },
        };
        self.emit(FlowEventKind::SwitchMatched {
            node: switch_node.id,
            case: idx_opt.map(|i| switch_node.cases[i].0.clone()),
        });
        self.cursor.push(Frame::new(switch_node.id, Position::Case(idx_opt)));
        let outcome = self.run_body(switch_node.id, body, resume).await?;
        self.cursor.pop();
        Ok(outcome)
    }

    async fn run_while(
        &mut self,
        while_node: &WhileNode<S>,
        resume: &mut Option<VecDeque<Frame>>,
    ) -> Result<StepOutcome, FlowError> {
        let mut iteration: u64 = 0;
        let mut mid_iteration: Option<VecDeque<Frame>> = None;

        if let Some(queue) = resume.as_mut() {
            match queue.front().cloned() {
                Some(front) if front.node == while_node.id => {
                    let Position::Iteration(n) = front.position else {
                        unreachable!("a While's frame always carries Position::Iteration")
                    };
                    let has_more = queue.len() > 1;
                    queue.pop_front();
                    if has_more {
                        iteration = n;
                        mid_iteration = resume.take();
                    } else {
                        *resume = None;
                        iteration = n + 1;
                    }
                }
                _ => *resume = None,
            }
        }

        loop {
            let mut local_resume = mid_iteration.take();
            if local_resume.is_none() {
                if self.cancellation.is_cancelled() {
                    return Ok(StepOutcome::Stop(StopReason::Cancelled));
                }
                if !(while_node.predicate)(&self.state) {
                    break;
                }
            }
            self.cursor.push(Frame::new(while_node.id, Position::Iteration(iteration)));
            let outcome = self.run_body(while_node.id, &while_node.body, &mut local_resume).await;
            self.cursor.pop();
            match outcome {
                Ok(StepOutcome::Continue) => {
                    iteration += 1;
                    continue;
                }
                other => return other,
            }
        }
        Ok(StepOutcome::Continue)
    }
}

fn branch_body<'a, S: FlowState>(if_node: &'a IfNode<S>, idx: usize) -> &'a Node<S> {
    if idx < if_node.arms.len() {
        &if_node.arms[idx].body
    } else {
        if_node
            .else_branch
            .as_ref()
            .expect("a resumed Branch(idx) past arms.len() always names the else branch")
    }
}

fn case_body<'a, S: FlowState>(switch_node: &'a SwitchNode<S>, idx_opt: Option<usize>) -> &'a Node<S> {
    match idx_opt {
        Some(idx) => &switch_node.cases[idx].1,
        None => switch_node
            .default
            .as_ref()
            .expect("a resumed Case(None) always names the default arm"),
    }
}

fn branch_label<S: FlowState>(if_node: &IfNode<S>, idx: usize) -> String {
    if idx < if_node.arms.len() {
        if idx == 0 { "then".to_string() } else { format!("else_if[{idx}]") }
    } else {
        "else".to_string()
    }
}
