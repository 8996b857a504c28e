use std::{
    hint::black_box,
    time::{Duration, Instant},
};

use criterion::{criterion_group, criterion_main, Criterion};
use skygrid::gmrf::WrtParameter;
use skygrid::tree::Genealogy;

mod helpers;
use helpers::black_box_skygrid;

const SIZES: [(&str, usize, usize, usize); 4] = [
    ("50 taxa x 1 locus x 20 cells", 50, 1, 20),
    ("200 taxa x 1 locus x 50 cells", 200, 1, 50),
    ("100 taxa x 8 loci x 50 cells", 100, 8, 50),
    ("500 taxa x 4 loci x 100 cells", 500, 4, 100),
];

fn full_evaluation(criterion: &mut Criterion) {
    let mut bench_group = criterion.benchmark_group("Skygrid full evaluation");
    for (id, taxa, loci, cells) in SIZES {
        let mut gmrf = black_box_skygrid(taxa, loci, cells);
        bench_group.bench_function(id, |bench| {
            bench.iter(|| {
                gmrf.make_dirty();
                black_box(gmrf.log_likelihood().unwrap())
            });
        });
    }
    bench_group.finish();
}

fn rejected_root_proposal(criterion: &mut Criterion) {
    let mut bench_group = criterion.benchmark_group("Skygrid rejected root proposal");
    for (id, taxa, loci, cells) in SIZES {
        let mut gmrf = black_box_skygrid(taxa, loci, cells);
        let _ = gmrf.log_likelihood();
        let tree = gmrf.loci().tree(0).unwrap().clone();
        let root = tree.root();
        bench_group.bench_function(id, |bench| {
            bench.iter_custom(|iters| {
                let mut elapsed = Duration::ZERO;
                for _ in 0..iters {
                    let mut moved = tree.clone();
                    moved.set_height(&root, tree.root_height() * 1.1).unwrap();
                    let start = Instant::now();
                    gmrf.store_state();
                    gmrf.update_tree(0, moved, &[root]).unwrap();
                    let _ = black_box(gmrf.log_likelihood());
                    gmrf.restore_state();
                    elapsed += start.elapsed();
                }
                elapsed
            });
        });
    }
    bench_group.finish();
}

fn log_pop_size_gradient(criterion: &mut Criterion) {
    let mut bench_group = criterion.benchmark_group("Skygrid log population size gradient");
    for (id, taxa, loci, cells) in SIZES {
        let gmrf = black_box_skygrid(taxa, loci, cells);
        bench_group.bench_function(id, |bench| {
            bench.iter(|| {
                black_box(gmrf.gradient(WrtParameter::LogPopSizes).unwrap())
            });
        });
    }
    bench_group.finish();
}

criterion_group! {
name = evaluation;
config = helpers::setup_suite();
targets = full_evaluation, rejected_root_proposal,
}
criterion_group! {
name = gradients;
config = helpers::setup_suite();
targets = log_pop_size_gradient,
}
criterion_main!(evaluation, gradients);
