//! The step body contract: the one place caller code actually runs.
//!
//! Mirrors the shape of an async trait with a request-scoped context object,
//! the same split the rest of this crate's ecosystem uses for callbacks that
//! need both shared state and per-invocation metadata.

use std::future::Future;
use std::pin::Pin;

use tokio_util::sync::CancellationToken;

use crate::error::StepFailure;
use crate::flow_state::FlowState;

/// Per-invocation metadata handed to a step or compensation body.
///
/// `cancellation` must not be cloned out and retained past the body's
/// return; the executor may drop or replace the token on the next
/// invocation (e.g. a fresh child token scoped to a step's `Timeout`).
#[derive(Clone)]
pub struct StepContext {
    step_name: String,
    attempt: u32,
    cancellation: CancellationToken,
}

impl StepContext {
    pub(crate) fn new(step_name: impl Into<String>, attempt: u32, cancellation: CancellationToken) -> Self {
        Self {
            step_name: step_name.into(),
            attempt,
            cancellation,
        }
    }

    #[must_use]
    pub fn step_name(&self) -> &str {
        &self.step_name
    }

    /// 1-indexed attempt number; `1` on the first try, incremented on every
    /// retry the step's `RetryPolicy` grants.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Await cancellation cooperatively; resolves immediately if already
    /// cancelled. Step bodies that perform I/O should race this against
    /// their own suspension points.
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await;
    }
}

/// A named, caller-supplied unit of work.
///
/// Returns `Ok(true)` to advance (pushing any attached compensation),
/// `Ok(false)` to reject the step as a non-exceptional stop (compensation
/// for prior steps still runs, but this step pushes none), or `Err` to
/// signal failure (consulted against the step's `RetryPolicy` before
/// rollback begins).
pub trait StepBody<S: FlowState>: Send + Sync {
    fn run<'a>(
        &'a self,
        state: &'a mut S,
        ctx: &'a StepContext,
    ) -> Pin<Box<dyn Future<Output = Result<bool, StepFailure>> + Send + 'a>>;
}

/// Bridges a plain `Fn(&mut S, &StepContext) -> impl Future` closure (the
/// shape callers write) into [`StepBody`], whose trait-object-safe `run`
/// needs a single future type per lifetime. Plain `Fn` bounds can't express
/// that the output future's type depends on the borrow lifetime of its
/// arguments; this sealed per-lifetime trait does.
trait StepFnAt<'a, S: 'a>: 'a {
    type Fut: Future<Output = Result<bool, StepFailure>> + Send + 'a;
    fn call(&'a self, state: &'a mut S, ctx: &'a StepContext) -> Self::Fut;
}

impl<'a, S, F, Fut> StepFnAt<'a, S> for F
where
    S: FlowState + 'a,
    F: Fn(&'a mut S, &'a StepContext) -> Fut + 'a,
    Fut: Future<Output = Result<bool, StepFailure>> + Send + 'a,
{
    type Fut = Fut;
    fn call(&'a self, state: &'a mut S, ctx: &'a StepContext) -> Self::Fut {
        self(state, ctx)
    }
}

impl<S, F> StepBody<S> for F
where
    S: FlowState,
    F: Send + Sync + for<'a> StepFnAt<'a, S>,
{
    fn run<'a>(
        &'a self,
        state: &'a mut S,
        ctx: &'a StepContext,
    ) -> Pin<Box<dyn Future<Output = Result<bool, StepFailure>> + Send + 'a>> {
        Box::pin(StepFnAt::call(self, state, ctx))
    }
}

/// A caller-supplied undo body associated with a step, invoked in reverse
/// completion order during rollback.
///
/// A compensation body that raises is logged and skipped; it never aborts
/// rollback of the remaining stack.
pub trait CompensationBody<S: FlowState>: Send + Sync {
    fn run<'a>(
        &'a self,
        state: &'a mut S,
        ctx: &'a StepContext,
    ) -> Pin<Box<dyn Future<Output = Result<(), StepFailure>> + Send + 'a>>;
}

/// See [`StepFnAt`] for why this per-lifetime bridge trait is needed.
trait CompensationFnAt<'a, S: 'a>: 'a {
    type Fut: Future<Output = Result<(), StepFailure>> + Send + 'a;
    fn call(&'a self, state: &'a mut S, ctx: &'a StepContext) -> Self::Fut;
}

impl<'a, S, F, Fut> CompensationFnAt<'a, S> for F
where
    S: FlowState + 'a,
    F: Fn(&'a mut S, &'a StepContext) -> Fut + 'a,
    Fut: Future<Output = Result<(), StepFailure>> + Send + 'a,
{
    type Fut = Fut;
    fn call(&'a self, state: &'a mut S, ctx: &'a StepContext) -> Self::Fut {
        self(state, ctx)
    }
}

impl<S, F> CompensationBody<S> for F
where
    S: FlowState,
    F: Send + Sync + for<'a> CompensationFnAt<'a, S>,
{
    fn run<'a>(
        &'a self,
        state: &'a mut S,
        ctx: &'a StepContext,
    ) -> Pin<Box<dyn Future<Output = Result<(), StepFailure>> + Send + 'a>> {
        Box::pin(CompensationFnAt::call(self, state, ctx))
    }
}
