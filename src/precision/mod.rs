use std::fmt::Display;

use anyhow::bail;
use log::debug;
use nalgebra::{DMatrix, DVector};

use crate::errors::CoalescentError;
use crate::Result;

mod eigen;
use eigen::tridiagonal_eigenvalues;

/// Eigenvalues at or below this are the null space of an improper prior.
pub const EIGENVALUE_THRESHOLD: f64 = 1e-5;

/// Symmetric tridiagonal matrix stored as its diagonal and first off-diagonal.
#[derive(Debug, Clone, PartialEq)]
pub struct SymTridiagMatrix {
    diag: Vec<f64>,
    off_diag: Vec<f64>,
}

/// Which end of a random walk is tied to an observed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    /// The walk continues from a value observed just before its first cell.
    Start,
    /// The walk continues from a value observed just after its last cell.
    End,
}

impl Display for SymTridiagMatrix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_dense())
    }
}

impl SymTridiagMatrix {
    pub fn new(diag: Vec<f64>, off_diag: Vec<f64>) -> Result<Self> {
        if diag.is_empty() || off_diag.len() + 1 != diag.len() {
            bail!(CoalescentError::DimensionMismatch {
                what: "off-diagonal of a tridiagonal matrix".to_string(),
                expected: diag.len().saturating_sub(1),
                found: off_diag.len(),
            });
        }
        Ok(Self { diag, off_diag })
    }

    pub fn identity(dim: usize) -> Self {
        Self {
            diag: vec![1.0; dim],
            off_diag: vec![0.0; dim.saturating_sub(1)],
        }
    }

    /// First order random walk structure matrix with unit weights.
    pub fn random_walk(dim: usize) -> Self {
        Self::from_off_diagonal(vec![-1.0; dim.saturating_sub(1)])
    }

    /// Random walk where neighbours `i` and `i+1` are weighted by
    /// `2 / (l_i + l_{i+1})`, times `scale`.
    ///
    /// Neighbours that both have zero length, as produced by the zero length
    /// intervals of a polytomy, borrow the smallest positive pair length so
    /// their weight stays finite. Unit weights are used if no pair has any length.
    pub fn time_aware(lengths: &[f64], scale: f64) -> Result<Self> {
        let pair_lengths = lengths
            .windows(2)
            .map(|w| {
                let sum = w[0] + w[1];
                if !sum.is_finite() || sum < 0.0 {
                    bail!(CoalescentError::Numerical(format!(
                        "Cannot weight neighbouring cells of lengths {} and {}",
                        w[0], w[1]
                    )));
                }
                Ok(sum)
            })
            .collect::<Result<Vec<_>>>()?;
        let floor = pair_lengths
            .iter()
            .copied()
            .filter(|&sum| sum > 0.0)
            .min_by(f64::total_cmp)
            .unwrap_or(2.0);
        let empty = pair_lengths.iter().filter(|&&sum| sum == 0.0).count();
        if empty > 0 {
            debug!(
                "{} neighbouring cell pairs have zero length, weighting them by length {}",
                empty, floor
            );
        }
        let off_diag = pair_lengths
            .into_iter()
            .map(|sum| -2.0 / if sum > 0.0 { sum } else { floor } * scale)
            .collect();
        Ok(Self::from_off_diagonal(off_diag))
    }

    /// Unit random walk over `dim` cells that continues from a fixed value at
    /// one end, the anchored end row keeps the weight of its outside neighbour.
    pub fn anchored_random_walk(dim: usize, anchor: Anchor) -> Self {
        let mut matrix = Self::random_walk(dim);
        if dim == 0 {
            return matrix;
        }
        matrix.diag.fill(2.0);
        match anchor {
            Anchor::Start => matrix.diag[dim - 1] = 1.0,
            Anchor::End => matrix.diag[0] = 1.0,
        }
        if dim == 1 {
            matrix.diag[0] = 1.0;
        }
        matrix
    }

    fn from_off_diagonal(off_diag: Vec<f64>) -> Self {
        let dim = off_diag.len() + 1;
        let mut diag = vec![0.0; dim];
        for (i, &w) in off_diag.iter().enumerate() {
            diag[i] -= w;
            diag[i + 1] -= w;
        }
        Self { diag, off_diag }
    }

    pub fn dim(&self) -> usize {
        self.diag.len()
    }

    pub fn diag(&self) -> &[f64] {
        &self.diag
    }

    pub fn off_diag(&self) -> &[f64] {
        &self.off_diag
    }

    /// `precision * (mixing * self + (1 - mixing) * I)`.
    pub fn scaled(&self, precision: f64, mixing: f64) -> Self {
        if mixing == 1.0 {
            return Self {
                diag: self.diag.iter().map(|d| d * precision).collect(),
                off_diag: self.off_diag.iter().map(|o| o * precision).collect(),
            };
        }
        Self {
            diag: self
                .diag
                .iter()
                .map(|d| precision * (mixing * d + 1.0 - mixing))
                .collect(),
            off_diag: self
                .off_diag
                .iter()
                .map(|o| precision * mixing * o)
                .collect(),
        }
    }

    pub fn mul_vec(&self, x: &DVector<f64>) -> DVector<f64> {
        debug_assert_eq!(x.len(), self.dim());
        let n = self.dim();
        DVector::from_fn(n, |i, _| {
            let mut value = self.diag[i] * x[i];
            if i > 0 {
                value += self.off_diag[i - 1] * x[i - 1];
            }
            if i + 1 < n {
                value += self.off_diag[i] * x[i + 1];
            }
            value
        })
    }

    /// `xᵀ A x`
    pub fn quadratic_form(&self, x: &DVector<f64>) -> f64 {
        debug_assert_eq!(x.len(), self.dim());
        let diagonal: f64 = self.diag.iter().zip(x.iter()).map(|(d, v)| d * v * v).sum();
        let off: f64 = self
            .off_diag
            .iter()
            .enumerate()
            .map(|(i, o)| o * x[i] * x[i + 1])
            .sum();
        diagonal + 2.0 * off
    }

    pub fn eigenvalues(&self) -> Result<Vec<f64>> {
        tridiagonal_eigenvalues(&self.diag, &self.off_diag)
    }

    /// Sum of the logs of the eigenvalues above `EIGENVALUE_THRESHOLD`, the log
    /// determinant restricted to the proper subspace of the prior.
    pub fn log_pseudo_determinant(&self) -> Result<f64> {
        let eigenvalues = self.eigenvalues()?;
        let kept = eigenvalues
            .iter()
            .filter(|&&v| v > EIGENVALUE_THRESHOLD)
            .count();
        debug!(
            "Pseudo-determinant keeps {} of {} eigenvalues",
            kept,
            eigenvalues.len()
        );
        Ok(eigenvalues
            .iter()
            .filter(|&&v| v > EIGENVALUE_THRESHOLD)
            .map(|v| v.ln())
            .sum())
    }

    pub fn to_dense(&self) -> DMatrix<f64> {
        let n = self.dim();
        DMatrix::from_fn(n, n, |i, j| {
            if i == j {
                self.diag[i]
            } else if i + 1 == j {
                self.off_diag[i]
            } else if j + 1 == i {
                self.off_diag[j]
            } else {
                0.0
            }
        })
    }
}

/// How neighbouring cells of the random walk prior are weighted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Smoothing {
    Uniform,
    /// Weights inversely proportional to the mean length of neighbouring cells.
    TimeAware { rescale_by_root_height: bool },
}

/// Builds the unscaled structure matrix of the GMRF prior.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrecisionBuilder {
    smoothing: Smoothing,
}

impl PrecisionBuilder {
    pub fn new(smoothing: Smoothing) -> Self {
        Self { smoothing }
    }

    pub fn smoothing(&self) -> Smoothing {
        self.smoothing
    }

    /// `cell_lengths` and `root_height` are only read by time-aware smoothing.
    pub fn build(
        &self,
        field_length: usize,
        cell_lengths: &[f64],
        root_height: f64,
    ) -> Result<SymTridiagMatrix> {
        if field_length == 0 {
            bail!(CoalescentError::Configuration(
                "The GMRF field needs at least one cell".to_string()
            ));
        }
        match self.smoothing {
            Smoothing::Uniform => Ok(SymTridiagMatrix::random_walk(field_length)),
            Smoothing::TimeAware {
                rescale_by_root_height,
            } => {
                if cell_lengths.len() != field_length {
                    bail!(CoalescentError::DimensionMismatch {
                        what: "cell lengths for time-aware smoothing".to_string(),
                        expected: field_length,
                        found: cell_lengths.len(),
                    });
                }
                let scale = if rescale_by_root_height {
                    root_height
                } else {
                    1.0
                };
                SymTridiagMatrix::time_aware(cell_lengths, scale)
            }
        }
    }
}
