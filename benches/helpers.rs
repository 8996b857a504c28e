#![allow(dead_code)]
/// this file is essentially a workaround for #[cfg(test)] like behaviour for the benchmarks
/// The dev-depencies are only available in benchmarks or tests
use std::{hint::black_box, time::Duration};

use criterion::Criterion;
use rand::{rngs::StdRng, Rng, SeedableRng};

use skygrid::gmrf::{GmrfLikelihood, GmrfLikelihoodBuilder};
use skygrid::tree::{simulate_coalescent_tree, Genealogy, Tree};

pub const SEED: u64 = 1729;

/// Serially sampled genealogy with `taxa` leaves sampled over half a unit of time.
pub fn black_box_simulated_tree(taxa: usize, seed: u64) -> Tree {
    let mut rng = StdRng::seed_from_u64(seed);
    let samples: Vec<f64> = (0..taxa).map(|_| rng.gen_range(0.0..0.5)).collect();
    black_box(
        simulate_coalescent_tree(&samples, 1.0, &mut rng)
            .expect("simulation with positive population size should pass"),
    )
}

/// Skygrid over `loci` simulated genealogies with `cells` cells up to the oldest root.
pub fn black_box_skygrid(taxa: usize, loci: usize, cells: usize) -> GmrfLikelihood {
    let trees: Vec<Tree> = (0..loci)
        .map(|i| black_box_simulated_tree(taxa, SEED + i as u64))
        .collect();
    let cutoff = trees
        .iter()
        .map(|tree| tree.root_height())
        .fold(0.0, f64::max);
    let mut builder = GmrfLikelihoodBuilder::new(trees[0].clone());
    for tree in &trees[1..] {
        builder = builder.locus(tree.clone(), 1.0);
    }
    black_box(
        builder
            .grid_from_cutoff(cutoff, cells - 1)
            .precision(2.0)
            .build()
            .expect("failed to build skygrid likelihood"),
    )
}

pub fn setup_suite() -> Criterion {
    Criterion::default()
        .measurement_time(Duration::from_secs(20))
        .with_profiler(pprof::criterion::PProfProfiler::new(
            997, // taken from the flamegraph repo's default
            pprof::criterion::Output::Flamegraph(None),
        ))
}

/// empty on purpose, there are no benches here but the crate still needs
/// to be runnable otherwise criterion crashes
fn main() {}
