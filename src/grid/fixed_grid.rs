use anyhow::bail;

use crate::errors::CoalescentError;
use crate::grid::{GridAggregator, SufficientStatistics};
use crate::intervals::{IntervalKind, Intervals};
use crate::Result;

/// Skygrid cells cut at fixed, strictly increasing times.
///
/// With `m` cut points there are `m + 1` cells `[0, g_0), [g_0, g_1), ...,
/// [g_{m-1}, inf)`, an event exactly on a cut point belongs to the later cell.
#[derive(Debug, Clone, PartialEq)]
pub struct FixedGrid {
    points: Vec<f64>,
}

impl FixedGrid {
    pub fn new(points: &[f64]) -> Result<Self> {
        if points.iter().any(|p| !p.is_finite() || *p <= 0.0) {
            bail!(CoalescentError::Configuration(format!(
                "Grid points must be finite and positive, got {:?}",
                points
            )));
        }
        if points.windows(2).any(|w| w[0] >= w[1]) {
            bail!(CoalescentError::Configuration(format!(
                "Grid points must be strictly increasing, got {:?}",
                points
            )));
        }
        Ok(Self {
            points: points.to_vec(),
        })
    }

    /// `num_grid_points` equally spaced points, the last one at `cutoff`.
    pub fn from_cutoff(cutoff: f64, num_grid_points: usize) -> Result<Self> {
        if num_grid_points == 0 {
            bail!(CoalescentError::Configuration(
                "A grid needs at least one grid point".to_string()
            ));
        }
        let points: Vec<f64> = (0..num_grid_points)
            .map(|i| (i + 1) as f64 * cutoff / num_grid_points as f64)
            .collect();
        Self::new(&points)
    }

    pub fn points(&self) -> &[f64] {
        &self.points
    }
}

impl GridAggregator for FixedGrid {
    fn field_length(&self) -> usize {
        self.points.len() + 1
    }

    fn validate(&self, _timelines: &[&Intervals]) -> Result<()> {
        Ok(())
    }

    fn aggregate(&self, intervals: &Intervals) -> Result<SufficientStatistics> {
        let mut stats = SufficientStatistics::zeros(self.field_length());
        stats.start_time = intervals.start_time();
        let mut cell = self.points.partition_point(|&p| p <= intervals.start_time());
        for piece in intervals.split_at(&self.points).iter() {
            stats.intensity[cell] += piece.intensity();
            stats.cell_lengths[cell] += piece.duration;
            match piece.kind {
                IntervalKind::Coalescent => stats.coalescent_counts[cell] += 1,
                IntervalKind::GridMarker => cell += 1,
                IntervalKind::Sample => {}
            }
        }
        Ok(stats)
    }

    fn smoothing_lengths(&self, _stats: &SufficientStatistics) -> Vec<f64> {
        let mut lengths = Vec::with_capacity(self.field_length());
        let mut previous = 0.0;
        for &p in &self.points {
            lengths.push(p - previous);
            previous = p;
        }
        // the last cell is unbounded, it borrows the width of its neighbour
        lengths.push(lengths.last().copied().unwrap_or(1.0));
        lengths
    }

    fn time_aware_by_default(&self) -> bool {
        false
    }

    fn has_fixed_boundaries(&self) -> bool {
        true
    }

    fn cell_at(&self, _stats: &SufficientStatistics, time: f64) -> usize {
        self.points.partition_point(|&p| p <= time)
    }

    fn name(&self) -> &'static str {
        "skygrid"
    }
}
