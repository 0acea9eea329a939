//! The envelope an `execute`/`resume` call returns: the flow always settles,
//! either completing every step or unwinding compensation for whatever
//! completed before a rejection, failure, or cancellation stopped it.
//! `resume` exists only to replay a checkpoint left behind by a process that
//! crashed mid-flight; no outcome in this module represents a live pause.

use crate::error::FlowError;
use crate::flow_state::FlowState;

/// Outcome of running a flow to completion, rejection, failure, or
/// cancellation.
#[derive(Debug)]
pub enum ExecutionResult<S: FlowState> {
    /// Every step completed (or was intentionally skipped by control flow).
    Completed { state: S },
    /// A step failed, was rejected, or the run was cancelled, and
    /// compensation unwound whatever had completed.
    RolledBack { state: S, error: FlowError },
}

impl<S: FlowState> ExecutionResult<S> {
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, ExecutionResult::Completed { .. })
    }

    #[must_use]
    pub fn is_rolled_back(&self) -> bool {
        matches!(self, ExecutionResult::RolledBack { .. })
    }

    #[must_use]
    pub fn state(&self) -> &S {
        match self {
            ExecutionResult::Completed { state } | ExecutionResult::RolledBack { state, .. } => state,
        }
    }
}
