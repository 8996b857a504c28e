use std::fmt::Display;

use anyhow::bail;

use crate::errors::CoalescentError;
use crate::tree::NodeIdx;
use crate::{f64_h, Result};

mod tree_intervals;
pub use tree_intervals::{Restriction, TreeIntervals};

/// Events closer than this are treated as simultaneous.
pub const MULTIFURCATION_LIMIT: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Sample,
    /// Coalescence of `lineages_merged` lineages into one.
    Coalescent { lineages_merged: usize },
}

/// A sampling or coalescence time of a node of the genealogy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Event {
    pub time: f64,
    pub kind: EventKind,
    pub node: NodeIdx,
}

impl Event {
    /// Ascending time, samples before coalescences at the same time.
    pub(crate) fn sort_key(&self) -> (f64_h, u8, NodeIdx) {
        let rank = match self.kind {
            EventKind::Sample => 0,
            EventKind::Coalescent { .. } => 1,
        };
        (f64_h::from(self.time), rank, self.node)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalKind {
    Sample,
    Coalescent,
    /// Ends at an external grid cut point where nothing happens in the genealogy.
    GridMarker,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interval {
    pub duration: f64,
    pub lineages: usize,
    pub kind: IntervalKind,
    /// Node whose coalescence ends the interval.
    pub node: Option<NodeIdx>,
}

impl Interval {
    /// Pairwise coalescence intensity, `k(k-1)/2` times the duration.
    pub fn intensity(&self) -> f64 {
        let k = self.lineages as f64;
        0.5 * k * (k - 1.0) * self.duration
    }
}

/// Time-ordered interval decomposition of a genealogy, starting at the most
/// recent sample.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Intervals {
    start_time: f64,
    intervals: Vec<Interval>,
    sample_count: usize,
}

impl Display for Intervals {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Intervals from {}:", self.start_time)?;
        for interval in &self.intervals {
            writeln!(
                f,
                "  {:?} after {} with {} lineages",
                interval.kind, interval.duration, interval.lineages
            )?;
        }
        Ok(())
    }
}

impl Intervals {
    /// Builds the intervals from events sorted by `Event::sort_key`.
    ///
    /// Events within `MULTIFURCATION_LIMIT` of the first event of a group are
    /// simultaneous: samples are added first, then every merge of a polytomy
    /// becomes its own zero-length coalescent interval.
    pub fn from_events(events: &[Event]) -> Result<Self> {
        let Some(first) = events.first() else {
            return Ok(Self::default());
        };
        let mut intervals = Vec::with_capacity(events.len());
        let mut start = first.time;
        let mut lineages = 0;
        let mut sample_count = 0;
        let mut merges: Vec<(NodeIdx, usize)> = Vec::new();
        let mut i = 0;
        while i < events.len() {
            let finish = events[i].time;
            let mut added = 0;
            merges.clear();
            while i < events.len() && (events[i].time - finish).abs() < MULTIFURCATION_LIMIT {
                match events[i].kind {
                    EventKind::Sample => added += 1,
                    EventKind::Coalescent { lineages_merged } => {
                        merges.push((events[i].node, lineages_merged.saturating_sub(1)))
                    }
                }
                i += 1;
            }

            if added > 0 {
                if !intervals.is_empty() || finish - start > MULTIFURCATION_LIMIT {
                    intervals.push(Interval {
                        duration: finish - start,
                        lineages,
                        kind: IntervalKind::Sample,
                        node: None,
                    });
                }
                start = finish;
                lineages += added;
                sample_count += added;
            }

            for &(node, removed) in &merges {
                for _ in 0..removed {
                    if lineages < 2 {
                        bail!(CoalescentError::InvariantViolation(format!(
                            "Coalescence of {} at {} with only {} lineage(s)",
                            node, finish, lineages
                        )));
                    }
                    intervals.push(Interval {
                        duration: finish - start,
                        lineages,
                        kind: IntervalKind::Coalescent,
                        node: Some(node),
                    });
                    start = finish;
                    lineages -= 1;
                }
            }
        }

        if lineages != 1 {
            bail!(CoalescentError::InvariantViolation(format!(
                "Genealogy ends with {} lineages instead of one",
                lineages
            )));
        }
        Ok(Self {
            start_time: first.time,
            intervals,
            sample_count,
        })
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Interval> {
        self.intervals.iter()
    }

    pub fn get(&self, i: usize) -> Option<&Interval> {
        self.intervals.get(i)
    }

    /// Time of the first (most recent) sample.
    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    pub fn total_duration(&self) -> f64 {
        self.intervals.iter().map(|i| i.duration).sum()
    }

    pub fn total_intensity(&self) -> f64 {
        self.intervals.iter().map(Interval::intensity).sum()
    }

    pub fn coalescent_count(&self) -> usize {
        self.intervals
            .iter()
            .filter(|i| i.kind == IntervalKind::Coalescent)
            .count()
    }

    /// Node whose coalescence ends interval `i`, if it is a coalescent interval.
    pub fn coalescent_node(&self, i: usize) -> Option<NodeIdx> {
        self.intervals.get(i).and_then(|i| i.node)
    }

    /// Start time of every interval.
    pub fn start_times(&self) -> Vec<f64> {
        let mut time = self.start_time;
        self.intervals
            .iter()
            .map(|interval| {
                let start = time;
                time += interval.duration;
                start
            })
            .collect()
    }

    /// Times of the coalescent events in increasing order.
    pub fn coalescent_times(&self) -> Vec<f64> {
        let mut time = self.start_time;
        let mut times = Vec::with_capacity(self.sample_count.saturating_sub(1));
        for interval in &self.intervals {
            time += interval.duration;
            if interval.kind == IntervalKind::Coalescent {
                times.push(time);
            }
        }
        times
    }

    /// Cuts the intervals at the given increasing points.
    ///
    /// Every point `p` inside the timeline (`start_time < p <= end`) ends a
    /// `GridMarker` interval. An event lying exactly on a point follows it as a
    /// zero-length interval. Points beyond the last event are dropped, the
    /// timeline holds a single lineage there.
    pub fn split_at(&self, points: &[f64]) -> Intervals {
        let mut split = Vec::with_capacity(self.intervals.len() + points.len());
        let mut start = self.start_time;
        let mut next = points.partition_point(|&p| p <= start);
        for interval in &self.intervals {
            let end = start + interval.duration;
            let mut cur = start;
            while next < points.len() && points[next] <= end {
                split.push(Interval {
                    duration: points[next] - cur,
                    lineages: interval.lineages,
                    kind: IntervalKind::GridMarker,
                    node: None,
                });
                cur = points[next];
                next += 1;
            }
            split.push(Interval {
                duration: end - cur,
                ..*interval
            });
            start = end;
        }
        Intervals {
            start_time: self.start_time,
            intervals: split,
            sample_count: self.sample_count,
        }
    }
}
