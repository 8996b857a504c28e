use std::fmt::Display;

use anyhow::bail;

use crate::errors::CoalescentError;
use crate::Result;

/// A named, bounded vector of real values sampled by the MCMC sampler.
///
/// Bounds are inclusive and checked on every write, a rejected write leaves the
/// parameter untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    id: String,
    values: Vec<f64>,
    lower: f64,
    upper: f64,
}

impl Display for Parameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} = {:?}", self.id, self.values)
    }
}

impl Parameter {
    pub fn new(id: &str, values: &[f64]) -> Self {
        Self {
            id: id.to_string(),
            values: values.to_vec(),
            lower: f64::NEG_INFINITY,
            upper: f64::INFINITY,
        }
    }

    pub fn scalar(id: &str, value: f64) -> Self {
        Self::new(id, &[value])
    }

    /// Attaches inclusive bounds, fails if any current value lies outside them.
    pub fn with_bounds(mut self, lower: f64, upper: f64) -> Result<Self> {
        if lower.is_nan() || upper.is_nan() || lower > upper {
            bail!(CoalescentError::Configuration(format!(
                "Invalid bounds [{}, {}] for parameter {}",
                lower, upper, self.id
            )));
        }
        self.lower = lower;
        self.upper = upper;
        for &value in &self.values {
            self.check(value)?;
        }
        Ok(self)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    pub fn value(&self, i: usize) -> f64 {
        self.values[i]
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn bounds(&self) -> (f64, f64) {
        (self.lower, self.upper)
    }

    pub fn set_value(&mut self, i: usize, value: f64) -> Result<()> {
        if i >= self.values.len() {
            bail!(CoalescentError::DimensionMismatch {
                what: format!("index into {}", self.id),
                expected: self.values.len(),
                found: i + 1,
            });
        }
        self.check(value)?;
        self.values[i] = value;
        Ok(())
    }

    pub fn set_values(&mut self, values: &[f64]) -> Result<()> {
        if values.len() != self.values.len() {
            bail!(CoalescentError::DimensionMismatch {
                what: self.id.clone(),
                expected: self.values.len(),
                found: values.len(),
            });
        }
        for &value in values {
            self.check(value)?;
        }
        self.values.copy_from_slice(values);
        Ok(())
    }

    fn check(&self, value: f64) -> Result<()> {
        if value.is_nan() || value < self.lower || value > self.upper {
            bail!(CoalescentError::Configuration(format!(
                "Value {} of parameter {} is outside [{}, {}]",
                value, self.id, self.lower, self.upper
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
#[cfg_attr(coverage, coverage(off))]
mod tests;
