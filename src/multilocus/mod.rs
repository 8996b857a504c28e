use anyhow::bail;
use cfg_if::cfg_if;
use log::{debug, info};

use crate::errors::CoalescentError;
use crate::grid::{GridAggregator, SufficientStatistics};
use crate::intervals::{Intervals, Restriction, TreeIntervals};
use crate::parameter::Parameter;
use crate::tree::{Genealogy, NodeIdx};
use crate::Result;

#[cfg(feature = "par-loci")]
use rayon::prelude::*;

/// One genealogy together with its interval timeline and its own, unscaled,
/// contribution to the shared field.
#[derive(Debug, Clone)]
pub struct Locus<G: Genealogy> {
    tree: G,
    ploidy: Parameter,
    timeline: TreeIntervals,
    partial: SufficientStatistics,
    dirty: bool,
}

impl<G: Genealogy> Locus<G> {
    /// Extracts the intervals right away, so configuration problems such as
    /// missing taxa surface here.
    pub fn new(tree: G, ploidy: f64, restriction: Restriction) -> Result<Self> {
        let ploidy =
            Parameter::scalar("ploidy", ploidy).with_bounds(f64::MIN_POSITIVE, f64::INFINITY)?;
        let mut timeline = TreeIntervals::new(restriction);
        timeline.extract(&tree)?;
        Ok(Self {
            tree,
            ploidy,
            timeline,
            partial: SufficientStatistics::default(),
            dirty: true,
        })
    }

    pub fn tree(&self) -> &G {
        &self.tree
    }

    pub fn ploidy(&self) -> f64 {
        self.ploidy.value(0)
    }

    pub fn timeline(&self) -> &TreeIntervals {
        &self.timeline
    }

    pub fn intervals(&self) -> &Intervals {
        self.timeline.intervals()
    }

    pub fn partial(&self) -> &SufficientStatistics {
        &self.partial
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Time of the oldest event of the locus, the root of the restricted
    /// genealogy if there is a restriction.
    pub fn root_height(&self) -> f64 {
        let intervals = self.timeline.intervals();
        intervals.start_time() + intervals.total_duration()
    }

    fn recompute(&mut self, aggregator: &dyn GridAggregator) -> Result<()> {
        let intervals = self.timeline.refresh(&self.tree)?;
        self.partial = aggregator.aggregate(intervals)?;
        self.dirty = false;
        Ok(())
    }
}

/// Loci sharing one population size field.
///
/// Every locus keeps its own partial statistics, a change to one genealogy only
/// recomputes that genealogy before the partials are summed again.
#[derive(Debug, Clone)]
pub struct MultiLocus<G: Genealogy> {
    aggregator: Box<dyn GridAggregator>,
    loci: Vec<Locus<G>>,
    stored_loci: Vec<Locus<G>>,
    has_stored: bool,
    recompute_counts: Vec<usize>,
}

impl<G: Genealogy> MultiLocus<G> {
    pub fn new(aggregator: Box<dyn GridAggregator>, loci: Vec<Locus<G>>) -> Result<Self> {
        if loci.is_empty() {
            bail!(CoalescentError::Configuration(
                "At least one genealogy is needed".to_string()
            ));
        }
        let timelines: Vec<&Intervals> = loci.iter().map(|l| l.intervals()).collect();
        aggregator.validate(&timelines)?;
        info!(
            "Combining {} locus/loci on a {} field of length {}",
            loci.len(),
            aggregator.name(),
            aggregator.field_length()
        );
        let mut multi = Self {
            aggregator,
            recompute_counts: vec![0; loci.len()],
            stored_loci: Vec::new(),
            has_stored: false,
            loci,
        };
        multi.refresh()?;
        Ok(multi)
    }

    pub fn aggregator(&self) -> &dyn GridAggregator {
        self.aggregator.as_ref()
    }

    pub fn field_length(&self) -> usize {
        self.aggregator.field_length()
    }

    pub fn len(&self) -> usize {
        self.loci.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loci.is_empty()
    }

    pub fn locus(&self, locus: usize) -> Result<&Locus<G>> {
        match self.loci.get(locus) {
            Some(l) => Ok(l),
            None => bail!(CoalescentError::Configuration(format!(
                "There is no locus {}, only {} known",
                locus,
                self.loci.len()
            ))),
        }
    }

    fn locus_mut(&mut self, locus: usize) -> Result<&mut Locus<G>> {
        let count = self.loci.len();
        match self.loci.get_mut(locus) {
            Some(l) => Ok(l),
            None => bail!(CoalescentError::Configuration(format!(
                "There is no locus {}, only {} known",
                locus, count
            ))),
        }
    }

    pub fn loci(&self) -> &[Locus<G>] {
        &self.loci
    }

    pub fn tree(&self, locus: usize) -> Result<&G> {
        Ok(self.locus(locus)?.tree())
    }

    /// Replaces the genealogy of one locus. `dirty_nodes` lists the nodes whose
    /// height or children changed, an empty list means the whole tree changed.
    pub fn update_tree(&mut self, locus: usize, tree: G, dirty_nodes: &[NodeIdx]) -> Result<()> {
        let l = self.locus_mut(locus)?;
        l.tree = tree;
        l.timeline.mark_dirty(dirty_nodes);
        l.dirty = true;
        Ok(())
    }

    pub fn set_ploidy(&mut self, locus: usize, ploidy: f64) -> Result<()> {
        self.locus_mut(locus)?.ploidy.set_value(0, ploidy)
    }

    pub fn make_dirty(&mut self) {
        for l in self.loci.iter_mut() {
            l.timeline.mark_all_dirty();
            l.dirty = true;
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.loci.iter().any(|l| l.dirty)
    }

    /// Recomputes the partial statistics of dirty loci only.
    pub fn refresh(&mut self) -> Result<()> {
        let aggregator = self.aggregator.as_ref();
        cfg_if! {
            if #[cfg(feature = "par-loci")] {
                let recomputed = self
                    .loci
                    .par_iter_mut()
                    .enumerate()
                    .filter(|(_, l)| l.dirty)
                    .map(|(i, l)| l.recompute(aggregator).map(|_| i))
                    .collect::<Result<Vec<usize>>>()?;
            } else {
                let mut recomputed = Vec::new();
                for (i, l) in self.loci.iter_mut().enumerate().filter(|(_, l)| l.dirty) {
                    l.recompute(aggregator)?;
                    recomputed.push(i);
                }
            }
        }
        for &i in &recomputed {
            self.recompute_counts[i] += 1;
        }
        if !recomputed.is_empty() {
            debug!("Recomputed statistics of loci {:?}", recomputed);
        }
        Ok(())
    }

    /// Sums the ploidy scaled partials into `stats`, a single writer pass.
    pub fn reduce(&self, stats: &mut SufficientStatistics) {
        if stats.field_length() != self.field_length() {
            *stats = SufficientStatistics::zeros(self.field_length());
        } else {
            stats.reset();
        }
        stats.start_time = f64::INFINITY;
        for l in &self.loci {
            stats.accumulate(&l.partial, l.ploidy());
            stats.start_time = stats.start_time.min(l.partial.start_time);
        }
    }

    /// Number of times the statistics of `locus` were recomputed.
    pub fn recompute_count(&self, locus: usize) -> usize {
        self.recompute_counts.get(locus).copied().unwrap_or(0)
    }

    /// Oldest root over all loci.
    pub fn root_height(&self) -> f64 {
        self.loci
            .iter()
            .map(|l| l.root_height())
            .fold(0.0, f64::max)
    }

    /// Heights of all coalescent events over all loci, oldest last.
    pub fn coalescent_times(&self) -> Vec<f64> {
        let mut times: Vec<f64> = self
            .loci
            .iter()
            .flat_map(|l| l.intervals().coalescent_times())
            .collect();
        times.sort_by(f64::total_cmp);
        times
    }

    pub fn store_state(&mut self) {
        self.stored_loci.clone_from(&self.loci);
        self.has_stored = true;
    }

    /// Swaps the stored loci back in, returns false if nothing was stored.
    pub fn restore_state(&mut self) -> bool {
        if !self.has_stored {
            return false;
        }
        std::mem::swap(&mut self.loci, &mut self.stored_loci);
        self.has_stored = false;
        true
    }

    pub fn accept_state(&mut self) {
        self.has_stored = false;
    }
}
