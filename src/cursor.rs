//! The durable program counter.
//!
//! A `Cursor` is an ordered path of frames, one per currently-open control
//! node from the root to the point execution is currently at. It is the
//! only thing (besides user state) persisted across a checkpoint, and the
//! only thing consulted on resume.

use serde::{Deserialize, Serialize};

use crate::ids::NodeId;

/// The position within a single open control node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Position {
    /// Index of the child currently executing within a `Sequence`.
    Sequence(usize),
    /// Index into an `If`'s arms: `0` is `then`, increasing indices are
    /// `ElseIf` arms in order, and the final index (when present) is `Else`.
    Branch(usize),
    /// Index of the matched `Switch` case, or `None` for `Default`/no-match.
    Case(Option<usize>),
    /// Iteration number of a `While`, about to run or just completed.
    Iteration(u64),
    /// `ForEach`: the item count fixed at loop entry and the next item index
    /// to dispatch. `next == len` means the loop has fully settled.
    ForEach { len: usize, next: usize },
}

/// One entry in the cursor, naming the control node currently open and
/// where within it execution currently stands.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub node: NodeId,
    pub position: Position,
}

impl Frame {
    #[must_use]
    pub fn new(node: NodeId, position: Position) -> Self {
        Self { node, position }
    }
}

/// The resumable program counter: a stack of [`Frame`]s from the root to
/// the currently executing node.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    frames: Vec<Frame>,
}

impl Cursor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    pub fn pop(&mut self) -> Option<Frame> {
        self.frames.pop()
    }

    #[must_use]
    pub fn current(&self) -> Option<&Frame> {
        self.frames.last()
    }

    pub fn current_mut(&mut self) -> Option<&mut Frame> {
        self.frames.last_mut()
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.frames.is_empty()
    }

    #[must_use]
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_is_lifo() {
        let mut cursor = Cursor::new();
        cursor.push(Frame::new(NodeId::from_raw(0), Position::Sequence(0)));
        cursor.push(Frame::new(NodeId::from_raw(1), Position::Branch(0)));
        assert_eq!(cursor.depth(), 2);
        let top = cursor.pop().unwrap();
        assert_eq!(top.node, NodeId::from_raw(1));
        assert_eq!(cursor.depth(), 1);
    }

    #[test]
    fn serde_round_trip_preserves_frames() {
        let mut cursor = Cursor::new();
        cursor.push(Frame::new(
            NodeId::from_raw(4),
            Position::ForEach { len: 20, next: 5 },
        ));
        let bytes = serde_json::to_vec(&cursor).unwrap();
        let decoded: Cursor = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(cursor, decoded);
    }
}
