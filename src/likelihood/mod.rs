use anyhow::bail;

use crate::errors::CoalescentError;
use crate::gmrf::{GmrfLikelihood, WrtParameter};
use crate::tree::Genealogy;
use crate::Result;

/// The transaction protocol an MCMC sampler drives a likelihood with.
///
/// A proposal is bracketed by `store_state` and either `accept_state` or
/// `restore_state`, the latter putting back exactly the stored state.
pub trait ModelLikelihood {
    fn log_likelihood(&self) -> Result<f64>;
    fn make_dirty(&mut self);
    fn store_state(&mut self);
    fn restore_state(&mut self);
    fn accept_state(&mut self);
}

/// Derivatives of a log density with respect to one parameter, for gradient
/// based samplers.
pub trait GradientProvider {
    fn dimension(&self) -> usize;
    fn gradient_log_density(&self) -> Result<Vec<f64>>;
    fn diagonal_hessian_log_density(&self) -> Result<Vec<f64>>;
}

impl<G: Genealogy> ModelLikelihood for GmrfLikelihood<G> {
    fn log_likelihood(&self) -> Result<f64> {
        GmrfLikelihood::log_likelihood(self)
    }

    fn make_dirty(&mut self) {
        GmrfLikelihood::make_dirty(self)
    }

    fn store_state(&mut self) {
        GmrfLikelihood::store_state(self)
    }

    fn restore_state(&mut self) {
        GmrfLikelihood::restore_state(self)
    }

    fn accept_state(&mut self) {
        GmrfLikelihood::accept_state(self)
    }
}

/// Gradient of a `GmrfLikelihood` with respect to one of its parameters.
#[derive(Debug, Clone)]
pub struct FieldGradient<'a, G: Genealogy> {
    likelihood: &'a GmrfLikelihood<G>,
    wrt: WrtParameter,
    dimension: usize,
}

impl<'a, G: Genealogy> FieldGradient<'a, G> {
    /// Fails if the likelihood has no parameter `wrt`, e.g. no design matrix.
    pub fn new(likelihood: &'a GmrfLikelihood<G>, wrt: WrtParameter) -> Result<Self> {
        let dimension = likelihood.dimension(wrt)?;
        if dimension == 0 {
            bail!(CoalescentError::Configuration(format!(
                "{:?} has no entries to differentiate",
                wrt
            )));
        }
        Ok(Self {
            likelihood,
            wrt,
            dimension,
        })
    }

    pub fn wrt(&self) -> WrtParameter {
        self.wrt
    }
}

impl<G: Genealogy> GradientProvider for FieldGradient<'_, G> {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn gradient_log_density(&self) -> Result<Vec<f64>> {
        self.likelihood.gradient(self.wrt)
    }

    fn diagonal_hessian_log_density(&self) -> Result<Vec<f64>> {
        self.likelihood.diagonal_hessian(self.wrt)
    }
}

#[cfg(test)]
#[cfg_attr(coverage, coverage(off))]
mod tests;
