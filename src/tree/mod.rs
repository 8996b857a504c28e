use std::fmt::{Display, Formatter};

use anyhow::bail;
use fixedbitset::FixedBitSet;
use log::debug;

use crate::errors::CoalescentError;
use crate::Result;

mod simulator;
mod tree_node;
pub(crate) mod tree_parser;

pub use simulator::simulate_coalescent_tree;
pub use tree_node::Node;
pub use tree_parser::from_newick;
use NodeIdx::{Internal as Int, Leaf};

#[derive(Debug, PartialEq, Clone, Copy, PartialOrd, Eq, Ord, Hash)]
pub enum NodeIdx {
    Internal(usize),
    Leaf(usize),
}

impl From<NodeIdx> for usize {
    fn from(node_idx: NodeIdx) -> usize {
        match node_idx {
            Int(idx) => idx,
            Leaf(idx) => idx,
        }
    }
}

impl From<&NodeIdx> for usize {
    fn from(node_idx: &NodeIdx) -> usize {
        usize::from(*node_idx)
    }
}

impl Display for NodeIdx {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Int(idx) => write!(f, "internal node {}", idx),
            Leaf(idx) => write!(f, "leaf node {}", idx),
        }
    }
}

/// Read-only view of a genealogy: a rooted tree whose node heights are measured
/// backwards in time from the most recent sample.
///
/// Node positions run over `0..node_count()`, `node_idx(i)` gives the index of the
/// node stored at position `i` and `usize::from(node_idx(i)) == i`.
pub trait Genealogy: Clone + Send + Sync {
    fn root(&self) -> NodeIdx;
    fn node_count(&self) -> usize;
    fn leaf_count(&self) -> usize;
    fn internal_count(&self) -> usize {
        self.node_count() - self.leaf_count()
    }
    fn node_idx(&self, i: usize) -> NodeIdx;
    fn height(&self, node: NodeIdx) -> f64;
    fn children(&self, node: NodeIdx) -> &[NodeIdx];
    fn parent(&self, node: NodeIdx) -> Option<NodeIdx>;
    /// Fails with `CoalescentError::MissingTaxon` if no leaf carries the id.
    fn leaf_by_id(&self, id: &str) -> Result<NodeIdx>;
    fn root_height(&self) -> f64 {
        self.height(self.root())
    }
    fn is_leaf(&self, node: NodeIdx) -> bool {
        self.children(node).is_empty()
    }
    /// Internal nodes ordered by position.
    fn internal_nodes(&self) -> Vec<NodeIdx> {
        (0..self.node_count())
            .map(|i| self.node_idx(i))
            .filter(|&node| !self.is_leaf(node))
            .collect()
    }

    /// Most recent common ancestor of a non-empty set of nodes.
    fn mrca(&self, nodes: &[NodeIdx]) -> Result<NodeIdx> {
        let Some((first, rest)) = nodes.split_first() else {
            bail!(CoalescentError::Configuration(
                "Cannot find the common ancestor of an empty clade".to_string()
            ));
        };
        let mut on_path = FixedBitSet::with_capacity(self.node_count());
        let mut path = vec![*first];
        on_path.insert(usize::from(first));
        let mut cur = *first;
        while let Some(parent) = self.parent(cur) {
            on_path.insert(usize::from(parent));
            path.push(parent);
            cur = parent;
        }
        // position on the path of the deepest shared ancestor found so far
        let mut depth = 0;
        for node in rest {
            let mut cur = *node;
            while !on_path.contains(usize::from(cur)) {
                match self.parent(cur) {
                    Some(parent) => cur = parent,
                    None => bail!(CoalescentError::InvariantViolation(format!(
                        "{} is not connected to the root",
                        node
                    ))),
                }
            }
            let pos = path
                .iter()
                .position(|idx| *idx == cur)
                .unwrap_or(path.len() - 1);
            depth = depth.max(pos);
        }
        Ok(path[depth])
    }

    /// Leaves below a node, the node itself if it is a leaf.
    fn leaves_below(&self, node: NodeIdx) -> Vec<NodeIdx> {
        let mut leaves = Vec::new();
        let mut stack = vec![node];
        while let Some(cur) = stack.pop() {
            if self.is_leaf(cur) {
                leaves.push(cur);
            } else {
                stack.extend(self.children(cur).iter().copied());
            }
        }
        leaves
    }

    /// Whether `ancestor` lies on the path from `node` to the root, `node` included.
    fn is_ancestor(&self, ancestor: NodeIdx, node: NodeIdx) -> bool {
        let mut cur = Some(node);
        while let Some(idx) = cur {
            if idx == ancestor {
                return true;
            }
            cur = self.parent(idx);
        }
        false
    }
}

#[derive(Debug, Clone)]
pub struct Tree {
    pub root: NodeIdx,
    pub nodes: Vec<Node>,
    pub preorder: Vec<NodeIdx>,
    pub(crate) n: usize,
    pub height: f64,
    pub(crate) leaf_ids: Vec<String>,
    pub(crate) dirty: Vec<bool>,
}

impl Tree {
    /// Links up nodes stored at their own positions, heights are taken as given.
    pub(crate) fn from_nodes(root: NodeIdx, nodes: Vec<Node>) -> Self {
        let leaf_ids: Vec<String> = nodes
            .iter()
            .filter(|node| node.is_leaf())
            .map(|node| node.id.clone())
            .collect();
        let mut tree = Self {
            root,
            n: leaf_ids.len(),
            height: nodes[usize::from(root)].height,
            dirty: vec![false; nodes.len()],
            nodes,
            preorder: Vec::new(),
            leaf_ids,
        };
        tree.compute_preorder();
        tree
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn leaves(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|node| node.is_leaf())
    }

    pub fn internals(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|node| !node.is_leaf())
    }

    pub fn leaf_ids(&self) -> &[String] {
        &self.leaf_ids
    }

    pub fn node(&self, node_idx: &NodeIdx) -> &Node {
        &self.nodes[usize::from(node_idx)]
    }

    pub fn node_height(&self, node_idx: &NodeIdx) -> f64 {
        self.nodes[usize::from(node_idx)].height
    }

    /// Returns the index of the node with the given id, leaves and labelled
    /// internal nodes alike.
    pub fn try_idx(&self, id: &str) -> Result<NodeIdx> {
        match self.nodes.iter().find(|node| node.id == id) {
            Some(node) => Ok(node.idx),
            None => bail!(CoalescentError::MissingTaxon(id.to_string())),
        }
    }

    /// Moves a node to a new height and keeps the adjacent branch lengths in
    /// sync. Ordering against the parent and children is not checked here,
    /// interval extraction reports a tree that became inconsistent.
    pub fn set_height(&mut self, node_idx: &NodeIdx, height: f64) -> Result<()> {
        if !height.is_finite() || height < 0.0 {
            bail!(CoalescentError::InvariantViolation(format!(
                "Cannot move {} to height {}",
                node_idx, height
            )));
        }
        let idx = usize::from(node_idx);
        self.nodes[idx].height = height;
        if let Some(parent) = self.nodes[idx].parent {
            self.nodes[idx].blen = self.node_height(&parent) - height;
        }
        for child in self.nodes[idx].children.clone() {
            let child = usize::from(child);
            self.nodes[child].blen = height - self.nodes[child].height;
        }
        if *node_idx == self.root {
            self.height = height;
        }
        self.dirty[idx] = true;
        debug!("Moved {} to height {}", node_idx, height);
        Ok(())
    }

    pub fn dirty_nodes(&self) -> Vec<NodeIdx> {
        self.dirty
            .iter()
            .enumerate()
            .filter(|(_, &dirty)| dirty)
            .map(|(idx, _)| self.nodes[idx].idx)
            .collect()
    }

    pub fn clean(&mut self) {
        self.dirty.iter_mut().for_each(|d| *d = false);
    }

    pub fn preorder_subroot(&self, subroot_idx: &NodeIdx) -> Vec<NodeIdx> {
        let mut order = Vec::<NodeIdx>::with_capacity(self.len());
        let mut stack = vec![*subroot_idx];
        while let Some(cur) = stack.pop() {
            order.push(cur);
            stack.extend(self.node(&cur).children.iter().rev());
        }
        order
    }

    pub(crate) fn compute_preorder(&mut self) {
        self.preorder = self.preorder_subroot(&self.root.clone());
    }

    /// Fills in node heights from branch lengths: the node furthest from the root
    /// sits at height zero.
    pub(crate) fn compute_heights(&mut self) {
        let mut dist = vec![0.0; self.len()];
        for node_idx in self.preorder.iter() {
            let idx = usize::from(node_idx);
            if let Some(parent) = self.nodes[idx].parent {
                dist[idx] = dist[usize::from(parent)] + self.nodes[idx].blen;
            }
        }
        let max_dist = dist.iter().copied().fold(0.0, f64::max);
        for (node, d) in self.nodes.iter_mut().zip(dist) {
            node.height = max_dist - d;
        }
        self.height = self.node_height(&self.root.clone());
    }
}

impl Genealogy for Tree {
    fn root(&self) -> NodeIdx {
        self.root
    }

    fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn leaf_count(&self) -> usize {
        self.n
    }

    fn node_idx(&self, i: usize) -> NodeIdx {
        self.nodes[i].idx
    }

    fn height(&self, node: NodeIdx) -> f64 {
        self.node_height(&node)
    }

    fn children(&self, node: NodeIdx) -> &[NodeIdx] {
        &self.node(&node).children
    }

    fn parent(&self, node: NodeIdx) -> Option<NodeIdx> {
        self.node(&node).parent
    }

    fn leaf_by_id(&self, id: &str) -> Result<NodeIdx> {
        match self.leaves().find(|node| node.id == id) {
            Some(node) => Ok(node.idx),
            None => bail!(CoalescentError::MissingTaxon(id.to_string())),
        }
    }
}
