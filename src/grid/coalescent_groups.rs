use anyhow::bail;

use crate::errors::CoalescentError;
use crate::grid::{GridAggregator, SufficientStatistics};
use crate::intervals::{IntervalKind, Intervals};
use crate::Result;

/// Skyride/skyline cells: consecutive coalescences grouped together, each
/// cell ending at the last coalescence of its group.
#[derive(Debug, Clone, PartialEq)]
pub struct CoalescentGroups {
    sizes: Vec<usize>,
}

impl CoalescentGroups {
    pub fn new(sizes: &[usize]) -> Result<Self> {
        if sizes.is_empty() || sizes.contains(&0) {
            bail!(CoalescentError::Configuration(format!(
                "Group sizes must be positive, got {:?}",
                sizes
            )));
        }
        Ok(Self {
            sizes: sizes.to_vec(),
        })
    }

    /// One cell per coalescent event.
    pub fn one_per_event(coalescent_count: usize) -> Result<Self> {
        Self::new(&vec![1; coalescent_count])
    }

    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    fn event_count(&self) -> usize {
        self.sizes.iter().sum()
    }
}

impl GridAggregator for CoalescentGroups {
    fn field_length(&self) -> usize {
        self.sizes.len()
    }

    fn validate(&self, timelines: &[&Intervals]) -> Result<()> {
        if timelines.len() != 1 {
            bail!(CoalescentError::Configuration(format!(
                "Coalescent event groups are defined on exactly one genealogy, got {}",
                timelines.len()
            )));
        }
        let found = timelines[0].coalescent_count();
        if found != self.event_count() {
            bail!(CoalescentError::DimensionMismatch {
                what: "coalescent events covered by the groups".to_string(),
                expected: found,
                found: self.event_count(),
            });
        }
        Ok(())
    }

    fn aggregate(&self, intervals: &Intervals) -> Result<SufficientStatistics> {
        let mut stats = SufficientStatistics::zeros(self.field_length());
        stats.start_time = intervals.start_time();
        let mut group = 0;
        for interval in intervals.iter() {
            if group == self.sizes.len() {
                bail!(CoalescentError::DimensionMismatch {
                    what: "coalescent events covered by the groups".to_string(),
                    expected: intervals.coalescent_count(),
                    found: self.event_count(),
                });
            }
            stats.intensity[group] += interval.intensity();
            stats.cell_lengths[group] += interval.duration;
            if interval.kind == IntervalKind::Coalescent {
                stats.coalescent_counts[group] += 1;
                if stats.coalescent_counts[group] == self.sizes[group] {
                    group += 1;
                }
            }
        }
        if group != self.sizes.len() {
            bail!(CoalescentError::DimensionMismatch {
                what: "coalescent events covered by the groups".to_string(),
                expected: intervals.coalescent_count(),
                found: self.event_count(),
            });
        }
        Ok(stats)
    }

    fn smoothing_lengths(&self, stats: &SufficientStatistics) -> Vec<f64> {
        stats.cell_lengths.clone()
    }

    fn time_aware_by_default(&self) -> bool {
        true
    }

    fn has_fixed_boundaries(&self) -> bool {
        false
    }

    fn cell_at(&self, stats: &SufficientStatistics, time: f64) -> usize {
        let mut end = stats.start_time;
        for (i, length) in stats.cell_lengths.iter().enumerate() {
            end += length;
            if time < end {
                return i;
            }
        }
        self.field_length().saturating_sub(1)
    }

    fn name(&self) -> &'static str {
        "skyride"
    }
}
