use std::f64::consts::LN_2;

use approx::assert_relative_eq;
use assert_matches::assert_matches;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rstest::rstest;

use crate::errors::CoalescentError;
use crate::grid::{CoalescentGroups, FixedGrid, GridAggregator, SufficientStatistics};
use crate::intervals::{Event, EventKind, Intervals, TreeIntervals};
use crate::tree::{
    simulate_coalescent_tree,
    NodeIdx::{Internal as I, Leaf as L},
};
use crate::{assert_float_relative_slice_eq, tree};

const GOLDEN: &str = "((((5:0.5,1:0.2):0.5,0:1):0.2,2:0.8):0.2,3:1.4);";

fn intervals_of(newick: &str) -> Intervals {
    TreeIntervals::default()
        .extract(&tree!(newick))
        .unwrap()
        .clone()
}

#[test]
fn golden_grid_statistics() {
    let grid = FixedGrid::new(&[0.35, 0.7, 1.05]).unwrap();
    assert_eq!(grid.field_length(), 4);
    let stats = grid.aggregate(&intervals_of(GOLDEN)).unwrap();
    assert_eq!(stats.coalescent_counts, vec![0, 1, 1, 2]);
    assert_float_relative_slice_eq(&stats.intensity, &[1.2, 2.5, 1.95, 0.65], 1e-12);
    assert_float_relative_slice_eq(&stats.cell_lengths, &[0.35, 0.35, 0.35, 0.35], 1e-12);
    assert_eq!(stats.ploidy_adjustment, vec![0.0; 4]);
}

#[test]
fn grid_conserves_intensity_across_boundaries() {
    // cut points at 0.25, 0.5 and 1.0 straddle the intervals ending at 0.3 and 0.7
    let intervals = intervals_of("(((A:0.3,B:0.3):0.4,C:0.7):0.5,(D:0.9,E:0.9):0.3);");
    let grid = FixedGrid::new(&[0.25, 0.5, 1.0]).unwrap();
    let stats = grid.aggregate(&intervals).unwrap();
    assert_float_relative_slice_eq(&stats.intensity, &[2.5, 1.7, 1.9, 0.2], 1e-12);
    assert_eq!(stats.coalescent_counts, vec![0, 1, 2, 1]);
    assert_relative_eq!(stats.total_intensity(), 6.3, epsilon = 1e-12);
    assert_relative_eq!(
        stats.total_intensity(),
        intervals.iter().map(|i| i.intensity()).sum::<f64>(),
        epsilon = 1e-12
    );
}

#[rstest]
#[case::few_points(21, 3)]
#[case::many_points(22, 40)]
#[case::single_point(23, 1)]
fn random_grid_conservation(#[case] seed: u64, #[case] num_points: usize) {
    let mut rng = StdRng::seed_from_u64(seed);
    let samples: Vec<f64> = (0..30).map(|_| rng.gen_range(0.0..1.0)).collect();
    let tree = simulate_coalescent_tree(&samples, 0.5, &mut rng).unwrap();
    let intervals = TreeIntervals::default().extract(&tree).unwrap().clone();
    let mut points: Vec<f64> = (0..num_points).map(|_| rng.gen_range(0.01..3.0)).collect();
    points.sort_by(f64::total_cmp);
    points.dedup();
    let grid = FixedGrid::new(&points).unwrap();
    let stats = grid.aggregate(&intervals).unwrap();
    assert_relative_eq!(
        stats.total_intensity(),
        intervals.total_intensity(),
        max_relative = 1e-12
    );
    assert_eq!(stats.total_coalescent_count(), 29);
    assert_relative_eq!(
        stats.cell_lengths.iter().sum::<f64>(),
        intervals.total_duration(),
        max_relative = 1e-12
    );
}

#[test]
fn event_on_cut_point_belongs_to_later_cell() {
    let merge = EventKind::Coalescent { lineages_merged: 2 };
    let event = |time, kind, node| Event { time, kind, node };
    let intervals = Intervals::from_events(&[
        event(0.0, EventKind::Sample, L(0)),
        event(0.0, EventKind::Sample, L(1)),
        event(0.0, EventKind::Sample, L(2)),
        event(0.5, merge, I(3)),
        event(1.0, merge, I(4)),
    ])
    .unwrap();
    let stats = FixedGrid::new(&[0.5]).unwrap().aggregate(&intervals).unwrap();
    assert_eq!(stats.coalescent_counts, vec![0, 2]);
    assert_eq!(stats.intensity, vec![1.5, 0.5]);
}

#[test]
fn ancient_genealogy_falls_in_terminal_cell() {
    let mut rng = StdRng::seed_from_u64(5);
    let tree = simulate_coalescent_tree(&[2.0, 2.5, 3.0, 2.2], 1.0, &mut rng).unwrap();
    let intervals = TreeIntervals::default().extract(&tree).unwrap().clone();
    let grid = FixedGrid::new(&[0.5, 1.0]).unwrap();
    let stats = grid.aggregate(&intervals).unwrap();
    assert_eq!(stats.coalescent_counts, vec![0, 0, 3]);
    assert_eq!(stats.intensity[..2], [0.0, 0.0]);
    assert_relative_eq!(stats.intensity[2], intervals.total_intensity());
    assert_eq!(stats.start_time, 2.0);
}

#[test]
fn grid_from_cutoff() {
    let grid = FixedGrid::from_cutoff(1.4, 4).unwrap();
    assert_float_relative_slice_eq(grid.points(), &[0.35, 0.7, 1.05, 1.4], 1e-12);
    assert_eq!(grid.field_length(), 5);
    assert!(FixedGrid::from_cutoff(1.4, 0).is_err());
}

#[rstest]
#[case::decreasing(&[0.5, 0.2])]
#[case::repeated(&[0.5, 0.5])]
#[case::zero(&[0.0, 0.5])]
#[case::infinite(&[0.5, f64::INFINITY])]
fn invalid_grid(#[case] points: &[f64]) {
    let err = FixedGrid::new(points).unwrap_err();
    assert_matches!(
        err.downcast_ref::<CoalescentError>(),
        Some(CoalescentError::Configuration(_))
    );
}

#[test]
fn grid_cells_and_smoothing_lengths() {
    let grid = FixedGrid::new(&[0.5, 1.5, 2.0]).unwrap();
    let stats = SufficientStatistics::zeros(4);
    assert_eq!(grid.smoothing_lengths(&stats), vec![0.5, 1.0, 0.5, 0.5]);
    assert_eq!(grid.cell_at(&stats, 0.0), 0);
    assert_eq!(grid.cell_at(&stats, 0.5), 1);
    assert_eq!(grid.cell_at(&stats, 1.9), 2);
    assert_eq!(grid.cell_at(&stats, 100.0), 3);
    assert!(!grid.time_aware_by_default());
    assert!(grid.has_fixed_boundaries());
}

#[test]
fn skyride_one_cell_per_coalescence() {
    let intervals = intervals_of(GOLDEN);
    let groups = CoalescentGroups::one_per_event(4).unwrap();
    groups.validate(&[&intervals]).unwrap();
    let stats = groups.aggregate(&intervals).unwrap();
    assert_eq!(stats.coalescent_counts, vec![1, 1, 1, 1]);
    assert_float_relative_slice_eq(&stats.intensity, &[2.5, 3.0, 0.6, 0.2], 1e-12);
    assert_float_relative_slice_eq(&stats.cell_lengths, &[0.5, 0.5, 0.2, 0.2], 1e-12);
    assert!(groups.time_aware_by_default());
    assert!(!groups.has_fixed_boundaries());
}

#[test]
fn skyline_groups() {
    let intervals = intervals_of(GOLDEN);
    let groups = CoalescentGroups::new(&[2, 2]).unwrap();
    let stats = groups.aggregate(&intervals).unwrap();
    assert_eq!(stats.coalescent_counts, vec![2, 2]);
    assert_float_relative_slice_eq(&stats.intensity, &[5.5, 0.8], 1e-12);
    assert_float_relative_slice_eq(&groups.smoothing_lengths(&stats), &[1.0, 0.4], 1e-12);
    assert_eq!(groups.cell_at(&stats, 0.5), 0);
    assert_eq!(groups.cell_at(&stats, 1.2), 1);
    assert_eq!(groups.cell_at(&stats, 5.0), 1);
}

#[test]
fn groups_must_cover_every_coalescence() {
    let intervals = intervals_of(GOLDEN);
    let groups = CoalescentGroups::new(&[2, 1]).unwrap();
    let err = groups.validate(&[&intervals]).unwrap_err();
    assert_matches!(
        err.downcast_ref::<CoalescentError>(),
        Some(CoalescentError::DimensionMismatch {
            expected: 4,
            found: 3,
            ..
        })
    );
    assert!(groups.aggregate(&intervals).is_err());
    assert!(CoalescentGroups::new(&[2, 3]).unwrap().aggregate(&intervals).is_err());

    let err = CoalescentGroups::new(&[4])
        .unwrap()
        .validate(&[&intervals, &intervals])
        .unwrap_err();
    assert!(err
        .downcast_ref::<CoalescentError>()
        .unwrap()
        .is_configuration());
    assert!(CoalescentGroups::new(&[2, 0]).is_err());
    assert!(CoalescentGroups::one_per_event(0).is_err());
}

#[test]
fn accumulate_scales_by_ploidy() {
    let partial = SufficientStatistics {
        intensity: vec![2.0, 4.0],
        coalescent_counts: vec![1, 2],
        ploidy_adjustment: vec![0.0, 0.0],
        cell_lengths: vec![0.5, 1.0],
        start_time: 0.0,
    };
    let mut total = SufficientStatistics::zeros(2);
    total.accumulate(&partial, 1.0);
    total.accumulate(&partial, 0.5);
    assert_eq!(total.intensity, vec![6.0, 12.0]);
    assert_eq!(total.coalescent_counts, vec![2, 4]);
    assert_float_relative_slice_eq(&total.ploidy_adjustment, &[LN_2, 2.0 * LN_2], 1e-15);
    assert_eq!(total.cell_lengths, vec![0.5, 1.0]);
    total.reset();
    assert_eq!(total, SufficientStatistics::zeros(2));
}
