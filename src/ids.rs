//! Stable identifiers threaded through the definition tree, the cursor, and
//! the checkpoint store.
//!
//! `NodeId` is assigned once, at build time, in definition order; it never
//! changes after `DefinitionBuilder::build` returns, which is what makes a
//! `Cursor` a durable reference rather than an in-memory pointer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Caller-chosen identifier for a single flow instance.
///
/// Unique within the checkpoint store while the flow has not reached a
/// terminal state (success, or successful full compensation).
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FlowId(String);

impl FlowId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for FlowId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for FlowId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Definition-order identifier assigned to every node in the tree at build
/// time. Stable across the lifetime of a `Definition` value, which is what
/// lets a `Cursor` survive a serialize/deserialize round trip.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(u32);

impl NodeId {
    pub(crate) const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[must_use]
    pub fn raw(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Monotonic allocator used exclusively by the builder while a tree is under
/// construction. Never exposed past `build()`.
#[derive(Debug, Default)]
pub(crate) struct NodeIdAllocator {
    next: u32,
}

impl NodeIdAllocator {
    pub(crate) fn alloc(&mut self) -> NodeId {
        let id = NodeId(self.next);
        self.next += 1;
        id
    }
}
