use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use log::LevelFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub(super) struct Cli {
    /// Tree file in newick format, every tree is a locus
    #[arg(short, long, value_name = "TREE_FILE")]
    pub(super) tree_file: PathBuf,

    /// Grid cut points, e.g. -g 0.5 -g 1.0; a skyride is used if no grid is given
    #[arg(short, long, value_name = "GRID_POINTS")]
    pub(super) grid_points: Vec<f64>,

    /// Grid cutoff, cut into equally spaced cells
    #[arg(short, long, value_name = "CUTOFF", conflicts_with = "grid_points")]
    pub(super) cutoff: Option<f64>,

    /// Number of cells of a grid given by its cutoff, the last one unbounded
    #[arg(long, default_value_t = 10, requires = "cutoff")]
    pub(super) grid_cells: usize,

    /// GMRF precision
    #[arg(short, long, default_value_t = 1.0)]
    pub(super) precision: f64,

    /// Mixing weight between the random walk and independent cells
    #[arg(short, long, default_value_t = 1.0)]
    pub(super) mixing: f64,

    /// Log population sizes, one per cell; all zero if not given
    #[arg(short, long, value_name = "LOG_POP_SIZES", allow_negative_numbers = true)]
    pub(super) log_pop_sizes: Vec<f64>,

    /// Ploidy of each locus in file order, 1 for any not given
    #[arg(long, value_name = "PLOIDY")]
    pub(super) ploidy: Vec<f64>,

    /// Evaluate each tree as its own single locus likelihood
    #[arg(long)]
    pub(super) per_tree: bool,

    /// Report file, printed to stdout if not given
    #[arg(short, long, value_name = "OUTPUT_FILE")]
    pub(super) output: Option<PathBuf>,

    #[arg(short, long, value_enum, default_value_t = Verbosity::Info)]
    pub(super) verbosity: Verbosity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(super) enum Verbosity {
    Quiet,
    Warn,
    Info,
    Debug,
}

impl From<Verbosity> for LevelFilter {
    fn from(verbosity: Verbosity) -> Self {
        match verbosity {
            Verbosity::Quiet => LevelFilter::Off,
            Verbosity::Warn => LevelFilter::Warn,
            Verbosity::Info => LevelFilter::Info,
            Verbosity::Debug => LevelFilter::Debug,
        }
    }
}
