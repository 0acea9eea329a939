//! The workflow definition tree: an immutable, tagged-variant AST built
//! once by [`super::builder::DefinitionBuilder`] and never mutated again.
//! The tree is data; [`crate::executor`] is its only consumer.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::flow_state::FlowState;
use crate::ids::NodeId;
use crate::resilience::RetryPolicy;
use crate::step::{CompensationBody, StepBody};

/// A predicate evaluated against the current state, used by `If`/`While` arms.
pub type Predicate<S> = Arc<dyn Fn(&S) -> bool + Send + Sync>;
/// A switch key selector, compared to case values by string equality.
pub type KeySelector<S> = Arc<dyn Fn(&S) -> String + Send + Sync>;
/// A collection selector, materialized once at `ForEach` entry.
pub type ItemSource<S> = Arc<dyn Fn(&S) -> Vec<Value> + Send + Sync>;
/// Produces the per-item subtree builder for one `ForEach` element.
pub type ItemBodyFactory<S> =
    Arc<dyn Fn(&Value, usize) -> super::builder::DefinitionBuilder<S> + Send + Sync>;

/// One node of the definition tree.
pub enum Node<S: FlowState> {
    Sequence(Vec<Node<S>>),
    Step(Arc<StepSpec<S>>),
    If(IfNode<S>),
    Switch(SwitchNode<S>),
    While(WhileNode<S>),
    ForEach(ForEachNode<S>),
}

/// A step and its attached modifiers: at most one compensation body, one
/// retry policy, and one timeout.
pub struct StepSpec<S: FlowState> {
    pub id: NodeId,
    pub name: String,
    pub body: Arc<dyn StepBody<S>>,
    pub compensation: Option<Arc<dyn CompensationBody<S>>>,
    pub retry: Option<Arc<dyn RetryPolicy>>,
    pub timeout: Option<Duration>,
}

/// One `then`/`ElseIf` arm: a predicate paired with its subtree.
pub struct BranchArm<S: FlowState> {
    pub predicate: Predicate<S>,
    pub body: Box<Node<S>>,
}

pub struct IfNode<S: FlowState> {
    pub id: NodeId,
    /// `arms[0]` is the `then` arm; the rest are `ElseIf` arms, in order.
    pub arms: Vec<BranchArm<S>>,
    pub else_branch: Option<Box<Node<S>>>,
}

pub struct SwitchNode<S: FlowState> {
    pub id: NodeId,
    pub key: KeySelector<S>,
    pub cases: Vec<(String, Box<Node<S>>)>,
    pub default: Option<Box<Node<S>>>,
}

pub struct WhileNode<S: FlowState> {
    pub id: NodeId,
    pub predicate: Predicate<S>,
    pub body: Box<Node<S>>,
}

pub struct ForEachNode<S: FlowState> {
    pub id: NodeId,
    pub items: ItemSource<S>,
    pub body_factory: ItemBodyFactory<S>,
    pub parallelism: usize,
    pub continue_on_failure: bool,
}
