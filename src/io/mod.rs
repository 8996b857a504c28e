use std::fmt;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::bail;
use log::info;

use crate::tree::{from_newick, Tree};
use crate::Result;

/// An input or output file that cannot be used as asked.
#[derive(Debug)]
pub(crate) struct DataError {
    pub(crate) path: PathBuf,
    pub(crate) reason: &'static str,
}

impl fmt::Display for DataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.reason, self.path.display())
    }
}

impl std::error::Error for DataError {}

/// One evaluated likelihood, a row of the likelihood report.
#[derive(Debug, Clone, PartialEq)]
pub struct LikelihoodRow {
    pub label: String,
    pub coalescent: f64,
    pub field: f64,
}

impl LikelihoodRow {
    pub fn total(&self) -> f64 {
        self.coalescent + self.field
    }
}

/// Reads every newick tree of a file, each one a locus for the likelihood.
/// Bails if the file holds no tree.
pub fn read_newick_from_file(path: &Path) -> Result<Vec<Tree>> {
    info!("Reading newick trees from file {}", path.display());
    let trees = from_newick(&fs::read_to_string(path)?)?;
    if trees.is_empty() {
        bail!(DataError {
            path: path.to_path_buf(),
            reason: "No trees found in file",
        });
    }
    info!("Read {} tree(s) successfully", trees.len());
    Ok(trees)
}

/// Writes the log-likelihood parts as a tab separated table with a header line.
pub fn write_report(rows: &[LikelihoodRow], writer: &mut impl Write) -> Result<()> {
    writeln!(writer, "label\tcoalescent\tfield\ttotal")?;
    for row in rows {
        writeln!(
            writer,
            "{}\t{}\t{}\t{}",
            row.label,
            row.coalescent,
            row.field,
            row.total()
        )?;
    }
    Ok(())
}

/// Writes the report to a new file, an existing file is never overwritten.
pub fn write_likelihood_report(rows: &[LikelihoodRow], path: &Path) -> Result<()> {
    if path.exists() {
        bail!(DataError {
            path: path.to_path_buf(),
            reason: "Refusing to overwrite existing file",
        });
    }
    info!("Writing {} log-likelihood(s) to {}", rows.len(), path.display());
    write_report(rows, &mut File::create(path)?)
}
