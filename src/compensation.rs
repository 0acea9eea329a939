//! The saga rollback log.
//!
//! A LIFO stack of entries, pushed only when a step body returns `true`
//! (never on rejection or failure — see the open-question resolution in
//! `DESIGN.md`), popped and invoked in reverse completion order once the
//! executor begins rollback.

use serde::{Deserialize, Serialize};

use crate::ids::NodeId;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationEntry {
    pub step: NodeId,
    pub step_name: String,
}

impl CompensationEntry {
    #[must_use]
    pub fn new(step: NodeId, step_name: impl Into<String>) -> Self {
        Self {
            step,
            step_name: step_name.into(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationStack {
    entries: Vec<CompensationEntry>,
}

impl CompensationStack {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: CompensationEntry) {
        self.entries.push(entry);
    }

    pub fn pop(&mut self) -> Option<CompensationEntry> {
        self.entries.pop()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// The entries in the order compensation bodies will actually run:
    /// most-recently-completed step first.
    pub fn rollback_order(&self) -> impl Iterator<Item = &CompensationEntry> {
        self.entries.iter().rev()
    }
}
