//! Step-scoped lifecycle events published on the diagnostics bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ids::{FlowId, NodeId};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FlowEvent {
    pub flow_id: FlowId,
    pub when: DateTime<Utc>,
    pub kind: FlowEventKind,
}

impl FlowEvent {
    pub(crate) fn new(flow_id: FlowId, kind: FlowEventKind) -> Self {
        Self {
            flow_id,
            when: Utc::now(),
            kind,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum FlowEventKind {
    StepStarted { node: NodeId, step: String, attempt: u32 },
    StepCompleted { node: NodeId, step: String },
    StepRejected { node: NodeId, step: String },
    StepFailed { node: NodeId, step: String, message: String },
    StepTimedOut { node: NodeId, step: String },
    BranchTaken { node: NodeId, arm: String },
    SwitchMatched { node: NodeId, case: Option<String> },
    CompensationInvoked { node: NodeId, step: String, ok: bool },
    CheckpointWritten { node: NodeId },
    Cancelled,
}

impl fmt::Display for FlowEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            FlowEventKind::StepStarted { step, attempt, .. } => {
                write!(f, "[{}] step `{step}` started (attempt {attempt})", self.flow_id)
            }
            FlowEventKind::StepCompleted { step, .. } => {
                write!(f, "[{}] step `{step}` completed", self.flow_id)
            }
            FlowEventKind::StepRejected { step, .. } => {
                write!(f, "[{}] step `{step}` rejected", self.flow_id)
            }
            FlowEventKind::StepFailed { step, message, .. } => {
                write!(f, "[{}] step `{step}` failed: {message}", self.flow_id)
            }
            FlowEventKind::StepTimedOut { step, .. } => {
                write!(f, "[{}] step `{step}` timed out", self.flow_id)
            }
            FlowEventKind::BranchTaken { arm, .. } => {
                write!(f, "[{}] branch `{arm}` taken", self.flow_id)
            }
            FlowEventKind::SwitchMatched { case, .. } => match case {
                Some(c) => write!(f, "[{}] switch matched `{c}`", self.flow_id),
                None => write!(f, "[{}] switch had no match", self.flow_id),
            },
            FlowEventKind::CompensationInvoked { step, ok, .. } => {
                write!(f, "[{}] compensation for `{step}` invoked (ok={ok})", self.flow_id)
            }
            FlowEventKind::CheckpointWritten { .. } => {
                write!(f, "[{}] checkpoint written", self.flow_id)
            }
            FlowEventKind::Cancelled => write!(f, "[{}] cancelled", self.flow_id),
        }
    }
}
