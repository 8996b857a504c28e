use std::fmt::Display;

use crate::tree::NodeIdx;

/// A node of a `Tree`, linked to its neighbours by index.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub idx: NodeIdx,
    pub parent: Option<NodeIdx>,
    pub children: Vec<NodeIdx>,
    /// Length of the branch above the node, kept equal to the height difference
    /// with the parent.
    pub blen: f64,
    /// Time before the most recent sample.
    pub height: f64,
    pub id: String,
}

impl Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.id.is_empty() {
            write!(f, "{} at height {}", self.idx, self.height)
        } else {
            write!(f, "{} ({}) at height {}", self.idx, self.id, self.height)
        }
    }
}

impl Node {
    /// Unlinked node at height zero.
    pub(crate) fn new(idx: NodeIdx, id: impl Into<String>) -> Self {
        Self {
            idx,
            parent: None,
            children: Vec::new(),
            blen: 0.0,
            height: 0.0,
            id: id.into(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.idx, NodeIdx::Leaf(_))
    }
}
