use anyhow::bail;
use fixedbitset::FixedBitSet;
use hashbrown::HashSet;
use itertools::Itertools;
use log::debug;

use crate::errors::CoalescentError;
use crate::intervals::{Event, EventKind, Intervals};
use crate::tree::{Genealogy, NodeIdx};
use crate::Result;

/// Restricts interval extraction to part of a genealogy.
///
/// `include` roots the extraction at the common ancestor of the given taxa,
/// every clade in `exclude` is cut off at its common ancestor which then acts
/// as a single sample.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Restriction {
    pub include: Option<Vec<String>>,
    pub exclude: Vec<Vec<String>>,
}

impl Restriction {
    pub fn is_empty(&self) -> bool {
        self.include.is_none() && self.exclude.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Pending {
    Nothing,
    Nodes(Vec<NodeIdx>),
    Everything,
}

/// Keeps the sorted events and intervals of one genealogy up to date.
///
/// Height changes reported for single nodes are merged into the sorted event
/// list, anything else triggers a full extraction.
#[derive(Debug, Clone)]
pub struct TreeIntervals {
    restriction: Restriction,
    events: Vec<Event>,
    intervals: Intervals,
    pending: Pending,
    full_rebuilds: usize,
    incremental_updates: usize,
}

impl Default for TreeIntervals {
    fn default() -> Self {
        Self::new(Restriction::default())
    }
}

impl TreeIntervals {
    pub fn new(restriction: Restriction) -> Self {
        Self {
            restriction,
            events: Vec::new(),
            intervals: Intervals::default(),
            pending: Pending::Everything,
            full_rebuilds: 0,
            incremental_updates: 0,
        }
    }

    pub fn restriction(&self) -> &Restriction {
        &self.restriction
    }

    pub fn is_known(&self) -> bool {
        self.pending == Pending::Nothing
    }

    /// Last extracted intervals, possibly stale, see `is_known`.
    pub fn intervals(&self) -> &Intervals {
        &self.intervals
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn full_rebuilds(&self) -> usize {
        self.full_rebuilds
    }

    pub fn incremental_updates(&self) -> usize {
        self.incremental_updates
    }

    /// Registers nodes whose height (or number of children) changed, an empty
    /// list means the whole genealogy changed.
    pub fn mark_dirty(&mut self, dirty_nodes: &[NodeIdx]) {
        if dirty_nodes.is_empty() {
            self.pending = Pending::Everything;
            return;
        }
        match &mut self.pending {
            Pending::Everything => {}
            Pending::Nothing => self.pending = Pending::Nodes(dirty_nodes.to_vec()),
            Pending::Nodes(nodes) => nodes.extend_from_slice(dirty_nodes),
        }
    }

    pub fn mark_all_dirty(&mut self) {
        self.pending = Pending::Everything;
    }

    /// Brings the intervals in line with the genealogy.
    pub fn refresh<G: Genealogy>(&mut self, tree: &G) -> Result<&Intervals> {
        match std::mem::replace(&mut self.pending, Pending::Everything) {
            Pending::Nothing => {}
            Pending::Nodes(nodes)
                if self.restriction.is_empty() && self.events.len() == tree.node_count() =>
            {
                self.merge_moved(tree, &nodes)?;
                self.incremental_updates += 1;
            }
            _ => {
                self.events = self.collect_events(tree)?;
                self.full_rebuilds += 1;
            }
        }
        self.intervals = Intervals::from_events(&self.events)?;
        self.pending = Pending::Nothing;
        Ok(&self.intervals)
    }

    /// Full extraction, ignoring whatever was computed before.
    pub fn extract<G: Genealogy>(&mut self, tree: &G) -> Result<&Intervals> {
        self.mark_all_dirty();
        self.refresh(tree)
    }

    fn merge_moved<G: Genealogy>(&mut self, tree: &G, nodes: &[NodeIdx]) -> Result<()> {
        let mut moved = FixedBitSet::with_capacity(tree.node_count());
        for node in nodes {
            moved.insert(usize::from(node));
        }
        let mut moved_events = Vec::with_capacity(moved.count_ones(..));
        for pos in moved.ones() {
            let node = tree.node_idx(pos);
            check_node_order(tree, node)?;
            if let Some(parent) = tree.parent(node) {
                check_node_order(tree, parent)?;
            }
            moved_events.push(node_event(tree, node));
        }
        moved_events.sort_unstable_by_key(Event::sort_key);

        let kept = std::mem::take(&mut self.events);
        self.events = kept
            .into_iter()
            .filter(|event| !moved.contains(usize::from(event.node)))
            .merge_by(moved_events, |a, b| a.sort_key() <= b.sort_key())
            .collect();
        debug!("Merged {} moved node(s) into the event list", moved.count_ones(..));
        Ok(())
    }

    fn collect_events<G: Genealogy>(&self, tree: &G) -> Result<Vec<Event>> {
        let mut events = if self.restriction.is_empty() {
            let mut events = Vec::with_capacity(tree.node_count());
            for i in 0..tree.node_count() {
                let node = tree.node_idx(i);
                check_node_order(tree, node)?;
                events.push(node_event(tree, node));
            }
            events
        } else {
            self.collect_restricted_events(tree)?
        };
        events.sort_unstable_by_key(Event::sort_key);
        Ok(events)
    }

    fn collect_restricted_events<G: Genealogy>(&self, tree: &G) -> Result<Vec<Event>> {
        let root = match &self.restriction.include {
            Some(taxa) => clade_mrca(tree, taxa)?,
            None => tree.root(),
        };
        let mut excluded = HashSet::with_capacity(self.restriction.exclude.len());
        for clade in &self.restriction.exclude {
            let mrca = clade_mrca(tree, clade)?;
            let unique: HashSet<&String> = clade.iter().collect();
            if tree.leaves_below(mrca).len() != unique.len() {
                bail!(CoalescentError::Configuration(format!(
                    "Excluded clade {:?} is not monophyletic",
                    clade
                )));
            }
            if mrca == root || !tree.is_ancestor(root, mrca) {
                bail!(CoalescentError::Configuration(format!(
                    "Excluded clade {:?} does not lie strictly inside the included subtree",
                    clade
                )));
            }
            excluded.insert(mrca);
        }

        let mut events = Vec::new();
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            if tree.is_leaf(node) || excluded.contains(&node) {
                events.push(Event {
                    time: tree.height(node),
                    kind: EventKind::Sample,
                    node,
                });
            } else {
                check_node_order(tree, node)?;
                events.push(node_event(tree, node));
                stack.extend(tree.children(node).iter().copied());
            }
        }
        Ok(events)
    }
}

fn clade_mrca<G: Genealogy>(tree: &G, taxa: &[String]) -> Result<NodeIdx> {
    let leaves = taxa
        .iter()
        .map(|id| tree.leaf_by_id(id))
        .collect::<Result<Vec<_>>>()?;
    tree.mrca(&leaves)
}

fn node_event<G: Genealogy>(tree: &G, node: NodeIdx) -> Event {
    let kind = if tree.is_leaf(node) {
        EventKind::Sample
    } else {
        EventKind::Coalescent {
            lineages_merged: tree.children(node).len(),
        }
    };
    Event {
        time: tree.height(node),
        kind,
        node,
    }
}

fn check_node_order<G: Genealogy>(tree: &G, node: NodeIdx) -> Result<()> {
    let height = tree.height(node);
    if !height.is_finite() {
        bail!(CoalescentError::InvariantViolation(format!(
            "{} has height {}",
            node, height
        )));
    }
    for child in tree.children(node) {
        if tree.height(*child) > height {
            bail!(CoalescentError::InvariantViolation(format!(
                "{} at height {} is younger than its child {} at height {}",
                node,
                height,
                child,
                tree.height(*child)
            )));
        }
    }
    Ok(())
}
