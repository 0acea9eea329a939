//! The fluent definition surface.
//!
//! `DefinitionBuilder` accumulates nodes at the current nesting level via a
//! self-consuming chain (`self -> Self`), the same idiom used throughout
//! this crate's ecosystem for builders. Branching constructs are opened by
//! a method that takes a `FnOnce(DefinitionBuilder<S>) -> DefinitionBuilder<S>`
//! closure for their subtree and returns a dedicated sub-builder
//! (`IfBuilder`/`SwitchBuilder`) whose `end_if`/`end_switch` hands control
//! back to the parent chain — the Rust-native equivalent of an explicit
//! `EndIf`/`EndSwitch` token.

use std::sync::Arc;
use std::time::Duration;
use std::fmt;

use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::error::BuildError;
use crate::flow_state::FlowState;
use crate::ids::{NodeId, NodeIdAllocator};
use crate::resilience::RetryPolicy;
use crate::step::{CompensationBody, StepBody};

use super::node::{
    BranchArm, ForEachNode, IfNode, ItemBodyFactory, ItemSource, KeySelector, Node, Predicate,
    StepSpec, SwitchNode, WhileNode,
};
use super::Definition;

#[derive(Clone, Copy)]
enum Last {
    Step(NodeId),
    ForEach(NodeId),
}

/// Accumulates nodes into an ordered sequence at the current nesting level.
pub struct DefinitionBuilder<S: FlowState> {
    alloc: NodeIdAllocator,
    nodes: Vec<Node<S>>,
    errors: Vec<BuildError>,
    last: Option<Last>,
}

impl<S: FlowState> fmt::Debug for DefinitionBuilder<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefinitionBuilder")
            .field("nodes", &self.nodes.len())
            .field("errors", &self.errors.len())
            .finish()
    }
}

impl<S: FlowState> Default for DefinitionBuilder<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: FlowState> DefinitionBuilder<S> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            alloc: NodeIdAllocator::default(),
            nodes: Vec::new(),
            errors: Vec::new(),
            last: None,
        }
    }

    fn continuing(alloc: NodeIdAllocator) -> Self {
        Self {
            alloc,
            nodes: Vec::new(),
            errors: Vec::new(),
            last: None,
        }
    }

    fn into_parts(self) -> (NodeIdAllocator, Node<S>, Vec<BuildError>) {
        (self.alloc, Node::Sequence(self.nodes), self.errors)
    }

    fn absorb_nested(&mut self, nested: Self) -> Node<S> {
        let (alloc, subtree, mut errors) = nested.into_parts();
        self.alloc = alloc;
        self.errors.append(&mut errors);
        subtree
    }

    fn run_nested(
        &mut self,
        body: impl FnOnce(DefinitionBuilder<S>) -> DefinitionBuilder<S>,
    ) -> Node<S> {
        let alloc = std::mem::take(&mut self.alloc);
        let nested = body(Self::continuing(alloc));
        self.absorb_nested(nested)
    }

    fn attach_to_last_step(
        &mut self,
        modifier: &'static str,
        apply: impl FnOnce(&mut StepSpec<S>) -> bool,
    ) {
        match self.last {
            Some(Last::Step(id)) => match self.nodes.last_mut() {
                Some(Node::Step(spec)) => {
                    let spec = Arc::get_mut(spec).expect("step spec is builder-exclusive until build()");
                    debug_assert_eq!(spec.id, id);
                    if !apply(spec) {
                        self.errors.push(BuildError::DuplicateModifier {
                            modifier,
                            step: spec.name.clone(),
                        });
                    }
                }
                _ => unreachable!("Last::Step always pairs with a Node::Step at nodes.last()"),
            },
            _ => self.errors.push(BuildError::ModifierOnNonStep { modifier }),
        }
    }

    /// Appends a named step.
    #[must_use]
    pub fn step(mut self, name: impl Into<String>, body: impl StepBody<S> + 'static) -> Self {
        let id = self.alloc.alloc();
        let spec = StepSpec {
            id,
            name: name.into(),
            body: Arc::new(body),
            compensation: None,
            retry: None,
            timeout: None,
        };
        self.nodes.push(Node::Step(Arc::new(spec)));
        self.last = Some(Last::Step(id));
        self
    }

    /// Attaches a compensation body to the immediately preceding step.
    #[must_use]
    pub fn with_compensation(mut self, compensation: impl CompensationBody<S> + 'static) -> Self {
        self.attach_to_last_step("compensation", |spec| {
            if spec.compensation.is_some() {
                false
            } else {
                spec.compensation = Some(Arc::new(compensation));
                true
            }
        });
        self
    }

    /// Attaches a retry policy to the immediately preceding step.
    #[must_use]
    pub fn with_retry(mut self, policy: impl RetryPolicy + 'static) -> Self {
        self.attach_to_last_step("retry", |spec| {
            if spec.retry.is_some() {
                false
            } else {
                spec.retry = Some(Arc::new(policy));
                true
            }
        });
        self
    }

    /// Attaches a timeout to the immediately preceding step.
    #[must_use]
    pub fn with_timeout(mut self, duration: Duration) -> Self {
        self.attach_to_last_step("timeout", |spec| {
            if spec.timeout.is_some() {
                false
            } else {
                spec.timeout = Some(duration);
                true
            }
        });
        self
    }

    /// Opens an `If` with a predicate and the `then` subtree.
    #[must_use]
    pub fn if_branch(
        mut self,
        predicate: impl Fn(&S) -> bool + Send + Sync + 'static,
        then_branch: impl FnOnce(DefinitionBuilder<S>) -> DefinitionBuilder<S>,
    ) -> IfBuilder<S> {
        let id = self.alloc.alloc();
        let subtree = self.run_nested(then_branch);
        self.last = None;
        IfBuilder {
            id,
            arms: vec![BranchArm {
                predicate: Arc::new(predicate) as Predicate<S>,
                body: Box::new(subtree),
            }],
            else_branch: None,
            outer: self,
        }
    }

    /// Opens a `Switch` with a key selector.
    #[must_use]
    pub fn switch(mut self, key: impl Fn(&S) -> String + Send + Sync + 'static) -> SwitchBuilder<S> {
        let id = self.alloc.alloc();
        self.last = None;
        SwitchBuilder {
            id,
            key: Arc::new(key) as KeySelector<S>,
            cases: Vec::new(),
            default: None,
            outer: self,
        }
    }

    /// Opens a `While` with a predicate and body, closing it immediately
    /// (there is only ever one subtree, so no separate `EndWhile` step is
    /// needed once the body closure returns).
    #[must_use]
    pub fn while_loop(
        mut self,
        predicate: impl Fn(&S) -> bool + Send + Sync + 'static,
        body: impl FnOnce(DefinitionBuilder<S>) -> DefinitionBuilder<S>,
    ) -> Self {
        let id = self.alloc.alloc();
        let subtree = self.run_nested(body);
        self.nodes.push(Node::While(WhileNode {
            id,
            predicate: Arc::new(predicate) as Predicate<S>,
            body: Box::new(subtree),
        }));
        self.last = None;
        self
    }

    /// Appends a `ForEach` over a collection materialized from state at
    /// entry, with a per-item subtree produced by `body_factory`.
    #[must_use]
    pub fn for_each(
        mut self,
        items: impl Fn(&S) -> Vec<Value> + Send + Sync + 'static,
        body_factory: impl Fn(&Value, usize) -> DefinitionBuilder<S> + Send + Sync + 'static,
    ) -> Self {
        let id = self.alloc.alloc();
        self.nodes.push(Node::ForEach(ForEachNode {
            id,
            items: Arc::new(items) as ItemSource<S>,
            body_factory: Arc::new(body_factory) as ItemBodyFactory<S>,
            parallelism: 1,
            continue_on_failure: false,
        }));
        self.last = Some(Last::ForEach(id));
        self
    }

    /// Sets the parallelism degree of the immediately preceding `ForEach`.
    #[must_use]
    pub fn with_parallelism(mut self, degree: i64) -> Self {
        if degree < 1 {
            self.errors.push(BuildError::InvalidParallelism { degree });
            return self;
        }
        match self.last {
            Some(Last::ForEach(id)) => {
                if let Some(Node::ForEach(node)) = self.nodes.last_mut() {
                    debug_assert_eq!(node.id, id);
                    node.parallelism = degree as usize;
                }
            }
            _ => self.errors.push(BuildError::MisplacedParallelism),
        }
        self
    }

    /// Marks the immediately preceding `ForEach` as tolerant of item
    /// failures: the loop succeeds iff every item individually resolved.
    #[must_use]
    pub fn with_continue_on_failure(mut self) -> Self {
        match self.last {
            Some(Last::ForEach(id)) => {
                if let Some(Node::ForEach(node)) = self.nodes.last_mut() {
                    debug_assert_eq!(node.id, id);
                    node.continue_on_failure = true;
                }
            }
            _ => self.errors.push(BuildError::MisplacedParallelism),
        }
        self
    }

    /// Builds a standalone subtree without flow-id validation. Used for
    /// `ForEach` item bodies, which are constructed fresh per item at
    /// execution time rather than once at definition time.
    pub fn build_subtree(self) -> Result<Node<S>, BuildError> {
        let (_, subtree, errors) = self.into_parts();
        finalize_errors(errors)?;
        Ok(subtree)
    }

    /// Freezes the definition. Fails fast on any structural error recorded
    /// while building (unmatched modifiers, duplicate `Default` arms,
    /// invalid parallelism degrees).
    pub fn build(self) -> Result<Definition<S>, BuildError> {
        let (_, root, errors) = self.into_parts();
        finalize_errors(errors)?;
        let mut steps = FxHashMap::default();
        collect_steps(&root, &mut steps);
        Ok(Definition { root, steps })
    }
}

fn finalize_errors(errors: Vec<BuildError>) -> Result<(), BuildError> {
    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.into_iter().next().unwrap()),
        _ => Err(BuildError::Multiple(errors)),
    }
}

fn collect_steps<S: FlowState>(node: &Node<S>, out: &mut FxHashMap<NodeId, Arc<StepSpec<S>>>) {
    match node {
        Node::Sequence(children) => {
            for child in children {
                collect_steps(child, out);
            }
        }
        Node::Step(spec) => {
            out.insert(spec.id, Arc::clone(spec));
        }
        Node::If(if_node) => {
            for arm in &if_node.arms {
                collect_steps(&arm.body, out);
            }
            if let Some(else_branch) = &if_node.else_branch {
                collect_steps(else_branch, out);
            }
        }
        Node::Switch(switch_node) => {
            for (_, case) in &switch_node.cases {
                collect_steps(case, out);
            }
            if let Some(default) = &switch_node.default {
                collect_steps(default, out);
            }
        }
        Node::While(while_node) => collect_steps(&while_node.body, out),
        // ForEach item subtrees are constructed per item at execution time;
        // they are not part of the static step index.
        Node::ForEach(_) => {}
    }
}

/// Returned by [`DefinitionBuilder::if_branch`]; accumulates `ElseIf`/`Else`
/// arms until [`end_if`](Self::end_if) hands control back to the parent
/// builder.
pub struct IfBuilder<S: FlowState> {
    id: NodeId,
    arms: Vec<BranchArm<S>>,
    else_branch: Option<Box<Node<S>>>,
    outer: DefinitionBuilder<S>,
}

impl<S: FlowState> IfBuilder<S> {
    #[must_use]
    pub fn else_if(
        mut self,
        predicate: impl Fn(&S) -> bool + Send + Sync + 'static,
        branch: impl FnOnce(DefinitionBuilder<S>) -> DefinitionBuilder<S>,
    ) -> Self {
        let subtree = self.outer.run_nested(branch);
        self.arms.push(BranchArm {
            predicate: Arc::new(predicate) as Predicate<S>,
            body: Box::new(subtree),
        });
        self
    }

    #[must_use]
    pub fn else_branch(
        mut self,
        branch: impl FnOnce(DefinitionBuilder<S>) -> DefinitionBuilder<S>,
    ) -> Self {
        let subtree = self.outer.run_nested(branch);
        self.else_branch = Some(Box::new(subtree));
        self
    }

    #[must_use]
    pub fn end_if(mut self) -> DefinitionBuilder<S> {
        self.outer.nodes.push(Node::If(IfNode {
            id: self.id,
            arms: self.arms,
            else_branch: self.else_branch,
        }));
        self.outer.last = None;
        self.outer
    }
}

/// Returned by [`DefinitionBuilder::switch`]; accumulates `Case`/`Default`
/// arms until [`end_switch`](Self::end_switch) hands control back to the
/// parent builder.
pub struct SwitchBuilder<S: FlowState> {
    id: NodeId,
    key: KeySelector<S>,
    cases: Vec<(String, Box<Node<S>>)>,
    default: Option<Box<Node<S>>>,
    outer: DefinitionBuilder<S>,
}

impl<S: FlowState> SwitchBuilder<S> {
    #[must_use]
    pub fn case(
        mut self,
        value: impl Into<String>,
        branch: impl FnOnce(DefinitionBuilder<S>) -> DefinitionBuilder<S>,
    ) -> Self {
        let subtree = self.outer.run_nested(branch);
        self.cases.push((value.into(), Box::new(subtree)));
        self
    }

    #[must_use]
    pub fn default_case(
        mut self,
        branch: impl FnOnce(DefinitionBuilder<S>) -> DefinitionBuilder<S>,
    ) -> Self {
        if self.default.is_some() {
            self.outer.errors.push(BuildError::DuplicateDefault);
            return self;
        }
        let subtree = self.outer.run_nested(branch);
        self.default = Some(Box::new(subtree));
        self
    }

    #[must_use]
    pub fn end_switch(mut self) -> DefinitionBuilder<S> {
        self.outer.nodes.push(Node::Switch(SwitchNode {
            id: self.id,
            key: self.key,
            cases: self.cases,
            default: self.default,
        }));
        self.outer.last = None;
        self.outer
    }
}
