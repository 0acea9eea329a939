//! The workflow definition: an immutable node tree plus a flat index of
//! its static steps (used for compensation lookup during rollback).

pub mod builder;
pub mod node;

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::flow_state::FlowState;
use crate::ids::NodeId;

pub use builder::{DefinitionBuilder, IfBuilder, SwitchBuilder};
pub use node::{
    BranchArm, ForEachNode, IfNode, ItemBodyFactory, ItemSource, KeySelector, Node, Predicate,
    StepSpec, SwitchNode, WhileNode,
};

/// An immutable, shareable workflow definition produced by
/// [`DefinitionBuilder::build`].
pub struct Definition<S: FlowState> {
    pub(crate) root: Node<S>,
    pub(crate) steps: FxHashMap<NodeId, Arc<StepSpec<S>>>,
}

impl<S: FlowState> Definition<S> {
    #[must_use]
    pub fn root(&self) -> &Node<S> {
        &self.root
    }

    /// Looks up a step by its static `NodeId`. Returns `None` for steps
    /// inside a `ForEach` item body, which are not part of the static tree.
    #[must_use]
    pub fn step(&self, id: NodeId) -> Option<&Arc<StepSpec<S>>> {
        self.steps.get(&id)
    }

    #[must_use]
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }
}
