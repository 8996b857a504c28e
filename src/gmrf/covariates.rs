use anyhow::bail;
use nalgebra::{DMatrix, DVector};

use crate::errors::CoalescentError;
use crate::parameter::Parameter;
use crate::precision::{Anchor, SymTridiagMatrix};
use crate::Result;

/// A `d x K` design matrix whose columns shift the field by `X * beta`.
#[derive(Debug, Clone, PartialEq)]
pub struct DesignMatrix {
    matrix: DMatrix<f64>,
    coefficients: Parameter,
}

/// A `p x d` matrix of per-cell covariates shifting the field by `C^T * beta`.
#[derive(Debug, Clone, PartialEq)]
pub struct CellCovariate {
    values: DMatrix<f64>,
    coefficients: Parameter,
}

/// Unobserved cells of one row of a `CellCovariate`.
///
/// The row is only observed from `first_observed` to `last_observed`, the
/// imputed values outside that range enter the regression like any other
/// covariate value. Each unobserved end follows its own random walk
/// continuing from the nearest observed value, with its own precision.
#[derive(Debug, Clone, PartialEq)]
pub struct MissingCovariate {
    covariate: usize,
    row: usize,
    first_observed: usize,
    last_observed: usize,
    recent_precision: Parameter,
    distant_precision: Parameter,
}

impl MissingCovariate {
    /// Marks the first row of cell covariate `covariate` as unobserved outside
    /// `first_observed..=last_observed`.
    pub fn new(covariate: usize, first_observed: usize, last_observed: usize) -> Result<Self> {
        if first_observed > last_observed {
            bail!(CoalescentError::Configuration(format!(
                "Observed covariate range {}..={} is empty",
                first_observed, last_observed
            )));
        }
        Ok(Self {
            covariate,
            row: 0,
            first_observed,
            last_observed,
            recent_precision: positive_scalar("recentPrecision", 1.0)?,
            distant_precision: positive_scalar("distantPrecision", 1.0)?,
        })
    }

    pub fn on_row(mut self, row: usize) -> Self {
        self.row = row;
        self
    }

    pub fn with_precisions(mut self, recent: f64, distant: f64) -> Result<Self> {
        self.set_precisions(recent, distant)?;
        Ok(self)
    }

    pub fn set_precisions(&mut self, recent: f64, distant: f64) -> Result<()> {
        self.recent_precision.set_value(0, recent)?;
        self.distant_precision.set_value(0, distant)
    }

    pub fn covariate(&self) -> usize {
        self.covariate
    }

    pub fn row(&self) -> usize {
        self.row
    }

    pub fn first_observed(&self) -> usize {
        self.first_observed
    }

    pub fn last_observed(&self) -> usize {
        self.last_observed
    }

    /// `0.5 m ln(prec) - 0.5 prec v^T A v` summed over both unobserved ends
    /// of `values`, with `v` the deviation from the anchoring observation.
    pub fn log_density(&self, values: &[f64]) -> Result<f64> {
        if self.last_observed >= values.len() {
            bail!(CoalescentError::Configuration(format!(
                "Observed covariate range {}..={} does not fit {} cells",
                self.first_observed,
                self.last_observed,
                values.len()
            )));
        }
        let mut log_density = 0.0;

        let recent = self.first_observed;
        if recent > 0 {
            let anchor = values[self.first_observed];
            let v = DVector::from_iterator(recent, values[..recent].iter().map(|x| x - anchor));
            let walk = SymTridiagMatrix::anchored_random_walk(recent, Anchor::End);
            log_density += segment_log_density(&walk, &v, self.recent_precision.value(0));
        }

        let distant = values.len() - 1 - self.last_observed;
        if distant > 0 {
            let anchor = values[self.last_observed];
            let v = DVector::from_iterator(
                distant,
                values[self.last_observed + 1..].iter().map(|x| x - anchor),
            );
            let walk = SymTridiagMatrix::anchored_random_walk(distant, Anchor::Start);
            log_density += segment_log_density(&walk, &v, self.distant_precision.value(0));
        }
        Ok(log_density)
    }
}

fn segment_log_density(walk: &SymTridiagMatrix, v: &DVector<f64>, precision: f64) -> f64 {
    0.5 * v.len() as f64 * precision.ln() - 0.5 * precision * walk.quadratic_form(v)
}

fn positive_scalar(id: &str, value: f64) -> Result<Parameter> {
    Parameter::scalar(id, value).with_bounds(f64::MIN_POSITIVE, f64::INFINITY)
}

/// Regression of the log population sizes on external covariates.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Covariates {
    design: Option<DesignMatrix>,
    cells: Vec<CellCovariate>,
    missing: Vec<MissingCovariate>,
}

impl Covariates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_design_matrix(mut self, matrix: DMatrix<f64>, coefficients: &[f64]) -> Self {
        self.design = Some(DesignMatrix {
            matrix,
            coefficients: Parameter::new("beta", coefficients),
        });
        self
    }

    pub fn with_cell_covariate(mut self, values: DMatrix<f64>, coefficients: &[f64]) -> Self {
        let id = format!("beta{}", self.cells.len());
        self.cells.push(CellCovariate {
            values,
            coefficients: Parameter::new(&id, coefficients),
        });
        self
    }

    pub fn with_missing_covariate(mut self, missing: MissingCovariate) -> Self {
        self.missing.push(missing);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.design.is_none() && self.cells.is_empty() && self.missing.is_empty()
    }

    pub fn cell_covariate_count(&self) -> usize {
        self.cells.len()
    }

    /// Checks every covariate against a field of `field_length` cells.
    pub fn validate(&self, field_length: usize) -> Result<()> {
        if let Some(design) = &self.design {
            check_dimension("design matrix rows", field_length, design.matrix.nrows())?;
            check_dimension(
                "design matrix coefficients",
                design.matrix.ncols(),
                design.coefficients.dimension(),
            )?;
        }
        for cell in &self.cells {
            check_dimension("covariate columns", field_length, cell.values.ncols())?;
            check_dimension(
                "covariate coefficients",
                cell.values.nrows(),
                cell.coefficients.dimension(),
            )?;
        }
        for missing in &self.missing {
            let cell = self.cell(missing.covariate)?;
            if missing.row >= cell.values.nrows() || missing.last_observed >= field_length {
                bail!(CoalescentError::Configuration(format!(
                    "Observed range {}..={} of row {} of covariate {} does not fit {} x {} values",
                    missing.first_observed,
                    missing.last_observed,
                    missing.row,
                    missing.covariate,
                    cell.values.nrows(),
                    field_length
                )));
            }
        }
        Ok(())
    }

    /// `gamma - X beta - sum_k C_k^T beta_k`
    pub fn adjust(&self, log_pop_sizes: &[f64]) -> DVector<f64> {
        let mut adjusted = DVector::from_column_slice(log_pop_sizes);
        if let Some(design) = &self.design {
            let beta = DVector::from_column_slice(design.coefficients.values());
            adjusted -= &design.matrix * beta;
        }
        for cell in &self.cells {
            let beta = DVector::from_column_slice(cell.coefficients.values());
            adjusted -= cell.values.tr_mul(&beta);
        }
        adjusted
    }

    pub fn design_coefficients(&self) -> Option<&[f64]> {
        self.design.as_ref().map(|d| d.coefficients.values())
    }

    pub fn set_design_coefficients(&mut self, coefficients: &[f64]) -> Result<()> {
        match &mut self.design {
            Some(design) => design.coefficients.set_values(coefficients),
            None => bail!(CoalescentError::Configuration(
                "No design matrix was given".to_string()
            )),
        }
    }

    pub fn cell_coefficients(&self, covariate: usize) -> Result<&[f64]> {
        Ok(self.cell(covariate)?.coefficients.values())
    }

    pub fn set_cell_coefficients(&mut self, covariate: usize, coefficients: &[f64]) -> Result<()> {
        self.cell(covariate)?;
        self.cells[covariate].coefficients.set_values(coefficients)
    }

    pub fn covariate_values(&self, covariate: usize) -> Result<&DMatrix<f64>> {
        Ok(&self.cell(covariate)?.values)
    }

    /// Overwrites one row of a cell covariate, typically its imputed entries.
    pub fn set_covariate_values(
        &mut self,
        covariate: usize,
        row: usize,
        values: &[f64],
    ) -> Result<()> {
        let cell = self.cell(covariate)?;
        if row >= cell.values.nrows() {
            bail!(CoalescentError::Configuration(format!(
                "Covariate {} has no row {}",
                covariate, row
            )));
        }
        check_dimension("covariate values", cell.values.ncols(), values.len())?;
        self.cells[covariate]
            .values
            .row_mut(row)
            .iter_mut()
            .zip(values)
            .for_each(|(x, v)| *x = *v);
        Ok(())
    }

    pub fn missing_covariate(&self, covariate: usize) -> Result<&MissingCovariate> {
        match self.missing.get(covariate) {
            Some(missing) => Ok(missing),
            None => bail!(CoalescentError::Configuration(format!(
                "There is no missing covariate {}",
                covariate
            ))),
        }
    }

    pub fn missing_covariate_mut(&mut self, covariate: usize) -> Result<&mut MissingCovariate> {
        self.missing_covariate(covariate)?;
        Ok(&mut self.missing[covariate])
    }

    /// Log density of all unobserved covariate stretches.
    pub fn missing_log_density(&self) -> Result<f64> {
        self.missing.iter().try_fold(0.0, |total, missing| -> Result<f64> {
            let row: Vec<f64> = self
                .cell(missing.covariate)?
                .values
                .row(missing.row)
                .iter()
                .copied()
                .collect();
            Ok(total + missing.log_density(&row)?)
        })
    }

    /// Field gradient for the design coefficients given `Q gamma'`.
    pub fn design_gradient(&self, q_adjusted: &DVector<f64>) -> Result<Vec<f64>> {
        match &self.design {
            Some(design) => Ok(design.matrix.tr_mul(q_adjusted).iter().copied().collect()),
            None => bail!(CoalescentError::Configuration(
                "No design matrix was given".to_string()
            )),
        }
    }

    /// `-x_j^T Q x_j` for each design column `x_j`.
    pub fn design_hessian(&self, q: &SymTridiagMatrix) -> Result<Vec<f64>> {
        match &self.design {
            Some(design) => Ok(design
                .matrix
                .column_iter()
                .map(|col| -q.quadratic_form(&col.into_owned()))
                .collect()),
            None => bail!(CoalescentError::Configuration(
                "No design matrix was given".to_string()
            )),
        }
    }

    pub fn cell_gradient(&self, covariate: usize, q_adjusted: &DVector<f64>) -> Result<Vec<f64>> {
        Ok((&self.cell(covariate)?.values * q_adjusted)
            .iter()
            .copied()
            .collect())
    }

    pub fn cell_hessian(&self, covariate: usize, q: &SymTridiagMatrix) -> Result<Vec<f64>> {
        Ok(self
            .cell(covariate)?
            .values
            .row_iter()
            .map(|row| -q.quadratic_form(&row.transpose()))
            .collect())
    }

    fn cell(&self, covariate: usize) -> Result<&CellCovariate> {
        match self.cells.get(covariate) {
            Some(cell) => Ok(cell),
            None => bail!(CoalescentError::Configuration(format!(
                "There is no covariate {}",
                covariate
            ))),
        }
    }
}

fn check_dimension(what: &str, expected: usize, found: usize) -> Result<()> {
    if expected != found {
        bail!(CoalescentError::DimensionMismatch {
            what: what.to_string(),
            expected,
            found,
        });
    }
    Ok(())
}
