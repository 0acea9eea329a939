//! Volatile, process-local checkpointer. Stores only the latest record per
//! flow; suitable for tests and single-process runs with no durability
//! requirement.

use std::sync::RwLock;

use async_trait::async_trait;
use rustc_hash::FxHashMap;

use crate::ids::FlowId;

use super::{Checkpointer, CheckpointRecord, Result, StoreError};

#[derive(Default)]
pub struct InMemoryCheckpointer {
    inner: RwLock<FxHashMap<FlowId, CheckpointRecord>>,
}

impl InMemoryCheckpointer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(FxHashMap::default()),
        }
    }
}

#[async_trait]
impl Checkpointer for InMemoryCheckpointer {
    async fn save(&self, record: CheckpointRecord) -> Result<()> {
        let mut map = self.inner.write().map_err(|e| StoreError::Backend {
            message: format!("lock poisoned: {e}"),
        })?;
        map.insert(record.flow_id.clone(), record);
        Ok(())
    }

    async fn load(&self, flow_id: &FlowId) -> Result<Option<CheckpointRecord>> {
        let map = self.inner.read().map_err(|e| StoreError::Backend {
            message: format!("lock poisoned: {e}"),
        })?;
        Ok(map.get(flow_id).cloned())
    }

    async fn delete(&self, flow_id: &FlowId) -> Result<()> {
        let mut map = self.inner.write().map_err(|e| StoreError::Backend {
            message: format!("lock poisoned: {e}"),
        })?;
        map.remove(flow_id);
        Ok(())
    }

    async fn list_flows(&self) -> Result<Vec<FlowId>> {
        let map = self.inner.read().map_err(|e| StoreError::Backend {
            message: format!("lock poisoned: {e}"),
        })?;
        Ok(map.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compensation::CompensationStack;
    use crate::cursor::Cursor;
    use crate::flow_state::MapState;

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let store = InMemoryCheckpointer::new();
        let state = MapState::builder(FlowId::new("f1")).build();
        let record = CheckpointRecord::new(Cursor::new(), CompensationStack::new(), &state).unwrap();
        store.save(record).await.unwrap();

        let loaded = store.load(&FlowId::new("f1")).await.unwrap();
        assert!(loaded.is_some());
        assert_eq!(loaded.unwrap().flow_id, FlowId::new("f1"));
    }

    #[tokio::test]
    async fn missing_flow_loads_as_none() {
        let store = InMemoryCheckpointer::new();
        assert!(store.load(&FlowId::new("missing")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_removes_the_record() {
        let store = InMemoryCheckpointer::new();
        let state = MapState::builder(FlowId::new("f1")).build();
        let record = CheckpointRecord::new(Cursor::new(), CompensationStack::new(), &state).unwrap();
        store.save(record).await.unwrap();
        store.delete(&FlowId::new("f1")).await.unwrap();
        assert!(store.load(&FlowId::new("f1")).await.unwrap().is_none());
    }
}
