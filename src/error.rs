//! Error taxonomy and diagnostics.
//!
//! Every fallible boundary in the crate (build-time validation, step
//! invocation, checkpoint I/O) gets its own `thiserror` enum. `FlowError`
//! aggregates them behind a single `miette::Diagnostic` so both plain
//! `std::error::Error` consumers and `miette`-aware ones (CLIs, test
//! harnesses) see the same cause chain.

use miette::Diagnostic;
use thiserror::Error;

use crate::checkpoint::StoreError;
use crate::ids::{FlowId, NodeId};

/// Errors rejected at build time, before a single step has run.
#[derive(Debug, Error, Diagnostic)]
pub enum BuildError {
    #[error("modifier `{modifier}` was attached to a step that already has one")]
    #[diagnostic(
        code(flowloom::build::duplicate_modifier),
        help("at most one compensation, one retry policy, and one timeout may be attached per step")
    )]
    DuplicateModifier { modifier: &'static str, step: String },

    #[error("a `Switch` node declared more than one `Default` arm")]
    #[diagnostic(code(flowloom::build::duplicate_default))]
    DuplicateDefault,

    #[error("`ForEach` parallelism degree must be >= 1, got {degree}")]
    #[diagnostic(code(flowloom::build::invalid_parallelism))]
    InvalidParallelism { degree: i64 },

    #[error("`WithParallelism` must immediately follow a `ForEach`")]
    #[diagnostic(
        code(flowloom::build::misplaced_parallelism),
        help("attach parallelism directly on the ForEach call instead")
    )]
    MisplacedParallelism,

    #[error("flow state did not carry a non-empty flow id")]
    #[diagnostic(code(flowloom::build::missing_flow_id))]
    MissingFlowId,

    #[error("modifier `{modifier}` can only be attached to a step, not to the preceding construct")]
    #[diagnostic(code(flowloom::build::modifier_on_non_step))]
    ModifierOnNonStep { modifier: &'static str },

    #[error("{} definition error(s) found", .0.len())]
    #[diagnostic(code(flowloom::build::multiple))]
    Multiple(Vec<BuildError>),
}

/// A step or compensation body's failure, carried with an optional cause.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct StepFailure {
    pub message: String,
    #[source]
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl StepFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(
        message: impl Into<String>,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            cause: Some(Box::new(cause)),
        }
    }
}

/// The classification of a terminal `FlowError`, mirroring the taxonomy a
/// caller needs to branch on without matching the full error enum.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    StepRejected,
    StepFailed,
    Timeout,
    Cancelled,
    CompensationIncomplete,
    StoreIo,
}

/// The engine's aggregated error type. Every terminal failure surfaced in a
/// [`crate::result::ExecutionResult`] is classified from one of these
/// variants via [`FlowError::kind`].
#[derive(Debug, Error, Diagnostic)]
pub enum FlowError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Build(#[from] BuildError),

    #[error("step `{step}` ({node}) was rejected")]
    #[diagnostic(
        code(flowloom::execute::step_rejected),
        help("the step body returned false; compensation has already run for every prior completed step")
    )]
    StepRejected { step: String, node: NodeId },

    #[error("step `{step}` ({node}) failed: {message}")]
    #[diagnostic(code(flowloom::execute::step_failed))]
    StepFailed {
        step: String,
        node: NodeId,
        message: String,
        #[source]
        cause: Option<StepFailure>,
    },

    #[error("step `{step}` ({node}) timed out after {elapsed_ms}ms")]
    #[diagnostic(code(flowloom::execute::timeout))]
    Timeout {
        step: String,
        node: NodeId,
        elapsed_ms: u64,
    },

    #[error("execution of flow `{flow_id}` was cancelled")]
    #[diagnostic(code(flowloom::execute::cancelled))]
    Cancelled { flow_id: FlowId },

    #[error("compensation did not complete cleanly for flow `{flow_id}`: {failed_steps:?}")]
    #[diagnostic(
        code(flowloom::execute::compensation_incomplete),
        help("one or more compensation bodies raised during rollback; rollback continued past them")
    )]
    CompensationIncomplete {
        flow_id: FlowId,
        failed_steps: Vec<String>,
        #[source]
        original: Box<FlowError>,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),
}

impl FlowError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            FlowError::Build(_) => ErrorKind::Validation,
            FlowError::StepRejected { .. } => ErrorKind::StepRejected,
            FlowError::StepFailed { .. } => ErrorKind::StepFailed,
            FlowError::Timeout { .. } => ErrorKind::Timeout,
            FlowError::Cancelled { .. } => ErrorKind::Cancelled,
            FlowError::CompensationIncomplete { .. } => ErrorKind::CompensationIncomplete,
            FlowError::Store(_) => ErrorKind::StoreIo,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_classifies_each_variant() {
        let err = FlowError::StepRejected {
            step: "reserve".into(),
            node: NodeId::from_raw(3),
        };
        assert_eq!(err.kind(), ErrorKind::StepRejected);
    }

    #[test]
    fn build_error_is_transparent_through_flow_error() {
        let build = BuildError::DuplicateDefault;
        let wrapped: FlowError = build.into();
        assert_eq!(wrapped.kind(), ErrorKind::Validation);
        assert!(wrapped.to_string().contains("Default"));
    }
}
