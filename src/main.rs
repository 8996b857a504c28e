use anyhow::{bail, Error};
use clap::Parser;
use ftail::Ftail;
use log::{info, LevelFilter};

use skygrid::gmrf::{GmrfLikelihood, GmrfLikelihoodBuilder};
use skygrid::io::{read_newick_from_file, write_likelihood_report, write_report, LikelihoodRow};
use skygrid::tree::Tree;

mod cli;
use crate::cli::Cli;

type Result<T> = std::result::Result<T, Error>;

fn main() -> Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => {
            bail!("Unable to parse command line arguments: \n {}", error)
        }
    };
    if let Err(error) = Ftail::new()
        .console(LevelFilter::from(cli.verbosity))
        .init()
    {
        bail!("Unable to set up logging: {:?}", error);
    }
    info!("Skygrid run started.");

    let trees = read_newick_from_file(&cli.tree_file)?;
    let rows = if cli.per_tree {
        (0..trees.len())
            .map(|i| {
                let gmrf = configure(&cli, &trees[i..=i], i)?;
                row(format!("tree{}", i + 1), &gmrf)
            })
            .collect::<Result<Vec<_>>>()?
    } else {
        let gmrf = configure(&cli, &trees, 0)?;
        vec![row(cli.tree_file.display().to_string(), &gmrf)?]
    };

    match &cli.output {
        Some(path) => write_likelihood_report(&rows, path)?,
        None => write_report(&rows, &mut std::io::stdout().lock())?,
    }
    info!("Skygrid run finished.");
    Ok(())
}

/// Builds one likelihood over `trees`, taking ploidies from position `offset`.
fn configure(cli: &Cli, trees: &[Tree], offset: usize) -> Result<GmrfLikelihood> {
    let ploidy = |i: usize| cli.ploidy.get(offset + i).copied().unwrap_or(1.0);
    let Some((first, rest)) = trees.split_first() else {
        bail!("No trees to evaluate");
    };
    let mut builder = GmrfLikelihoodBuilder::new(first.clone()).ploidy(ploidy(0));
    for (i, tree) in rest.iter().enumerate() {
        builder = builder.locus(tree.clone(), ploidy(i + 1));
    }
    if let Some(cutoff) = cli.cutoff {
        if cli.grid_cells < 2 {
            bail!("A grid needs at least two cells, got {}", cli.grid_cells);
        }
        builder = builder.grid_from_cutoff(cutoff, cli.grid_cells - 1);
    } else if !cli.grid_points.is_empty() {
        builder = builder.grid(&cli.grid_points);
    }
    if !cli.log_pop_sizes.is_empty() {
        builder = builder.log_pop_sizes(&cli.log_pop_sizes);
    }
    builder.precision(cli.precision).mixing(cli.mixing).build()
}

fn row(label: String, gmrf: &GmrfLikelihood) -> Result<LikelihoodRow> {
    let row = LikelihoodRow {
        label,
        coalescent: gmrf.coalescent_log_likelihood()?,
        field: gmrf.field_log_likelihood()?,
    };
    info!("{}: {}", row.label, row.total());
    Ok(row)
}
