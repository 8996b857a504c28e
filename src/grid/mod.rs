use std::fmt::Debug;

use dyn_clone::DynClone;

use crate::intervals::Intervals;
use crate::Result;

mod coalescent_groups;
mod fixed_grid;

pub use coalescent_groups::CoalescentGroups;
pub use fixed_grid::FixedGrid;

/// Per-cell summaries of the intervals that the coalescent likelihood needs.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SufficientStatistics {
    /// Pairwise coalescence intensity, `k(k-1)/2` times duration, summed per cell.
    pub intensity: Vec<f64>,
    pub coalescent_counts: Vec<usize>,
    /// `ln(ploidyFactor)` times the number of coalescences, summed over loci.
    pub ploidy_adjustment: Vec<f64>,
    /// Amount of genealogy time covered by each cell.
    pub cell_lengths: Vec<f64>,
    /// Time of the earliest sample.
    pub start_time: f64,
}

impl SufficientStatistics {
    pub fn zeros(field_length: usize) -> Self {
        Self {
            intensity: vec![0.0; field_length],
            coalescent_counts: vec![0; field_length],
            ploidy_adjustment: vec![0.0; field_length],
            cell_lengths: vec![0.0; field_length],
            start_time: 0.0,
        }
    }

    pub fn field_length(&self) -> usize {
        self.intensity.len()
    }

    pub fn reset(&mut self) {
        self.intensity.fill(0.0);
        self.coalescent_counts.fill(0);
        self.ploidy_adjustment.fill(0.0);
        self.cell_lengths.fill(0.0);
        self.start_time = 0.0;
    }

    /// Adds the unscaled statistics of one locus whose effective population
    /// size is `ploidy` times the shared one.
    pub fn accumulate(&mut self, partial: &SufficientStatistics, ploidy: f64) {
        debug_assert_eq!(self.field_length(), partial.field_length());
        let factor = 1.0 / ploidy;
        let log_factor = factor.ln();
        for i in 0..self.field_length() {
            self.intensity[i] += partial.intensity[i] * factor;
            self.coalescent_counts[i] += partial.coalescent_counts[i];
            self.ploidy_adjustment[i] +=
                partial.ploidy_adjustment[i] + log_factor * partial.coalescent_counts[i] as f64;
            self.cell_lengths[i] = self.cell_lengths[i].max(partial.cell_lengths[i]);
        }
    }

    pub fn total_intensity(&self) -> f64 {
        self.intensity.iter().sum()
    }

    pub fn total_coalescent_count(&self) -> usize {
        self.coalescent_counts.iter().sum()
    }
}

/// Maps a genealogy's intervals onto the cells of the population size field.
pub trait GridAggregator: Debug + DynClone + Send + Sync {
    fn field_length(&self) -> usize;
    /// Checks the aggregator against the intervals of every locus it will see.
    fn validate(&self, timelines: &[&Intervals]) -> Result<()>;
    /// Statistics of one locus, without any ploidy scaling.
    fn aggregate(&self, intervals: &Intervals) -> Result<SufficientStatistics>;
    /// Cell lengths used to weight neighbours in time-aware smoothing.
    fn smoothing_lengths(&self, stats: &SufficientStatistics) -> Vec<f64>;
    fn time_aware_by_default(&self) -> bool;
    /// Whether the cell boundaries stay put when node heights move.
    fn has_fixed_boundaries(&self) -> bool;
    /// Cell whose population size applies at `time`.
    fn cell_at(&self, stats: &SufficientStatistics, time: f64) -> usize;
    fn name(&self) -> &'static str;
}

dyn_clone::clone_trait_object!(GridAggregator);

#[cfg(test)]
#[cfg_attr(coverage, coverage(off))]
mod tests;
