//! Checkpointer infrastructure: durable persistence of a paused flow's
//! cursor, state, and compensation stack so it can be resumed later, even
//! across a process restart.

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::compensation::CompensationStack;
use crate::cursor::Cursor;
use crate::flow_state::FlowState;
use crate::ids::FlowId;
use crate::serializer::{JsonSerializer, SerializeError, Serializer};

pub use memory::InMemoryCheckpointer;

/// Errors from checkpointer operations.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum StoreError {
    #[error("flow not found: {flow_id}")]
    #[diagnostic(
        code(flowloom::checkpoint::not_found),
        help("the flow `{flow_id}` has no saved checkpoint, or it was already deleted")
    )]
    NotFound { flow_id: FlowId },

    #[error("checkpoint backend error: {message}")]
    #[diagnostic(code(flowloom::checkpoint::backend))]
    Backend { message: String },

    #[error("checkpoint encoding error: {0}")]
    #[diagnostic(code(flowloom::checkpoint::encoding))]
    Encoding(#[from] SerializeError),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// A durable snapshot of one flow's paused execution state.
///
/// The generic `S` is serialized through a [`Serializer`] rather than
/// directly, so the on-disk/on-wire shape is plain JSON bytes regardless
/// of which [`Serializer`] a caller configures.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub flow_id: FlowId,
    pub cursor: Cursor,
    pub compensation: CompensationStack,
    pub state: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl CheckpointRecord {
    pub fn new<S: FlowState>(cursor: Cursor, compensation: CompensationStack, state: &S) -> Result<Self> {
        let serializer = JsonSerializer;
        let encoded = serializer.encode(state)?;
        let value = serde_json::from_slice(&encoded).map_err(|e| StoreError::Backend {
            message: format!("checkpoint state is not valid JSON: {e}"),
        })?;
        Ok(Self {
            flow_id: state.flow_id().clone(),
            cursor,
            compensation,
            state: value,
            created_at: Utc::now(),
        })
    }

    pub fn decode_state<S: FlowState>(&self) -> Result<S> {
        let serializer = JsonSerializer;
        let bytes = serde_json::to_vec(&self.state).map_err(|e| StoreError::Backend {
            message: format!("checkpoint state re-encoding failed: {e}"),
        })?;
        Ok(serializer.decode(&bytes)?)
    }
}

/// Persists and retrieves [`CheckpointRecord`]s by [`FlowId`].
///
/// Implementations must ensure saves are atomic: a reader never observes a
/// half-written record. `save` replaces any existing record for the flow.
#[async_trait]
pub trait Checkpointer: Send + Sync {
    async fn save(&self, record: CheckpointRecord) -> Result<()>;
    async fn load(&self, flow_id: &FlowId) -> Result<Option<CheckpointRecord>>;
    async fn delete(&self, flow_id: &FlowId) -> Result<()>;
    async fn list_flows(&self) -> Result<Vec<FlowId>>;
}
