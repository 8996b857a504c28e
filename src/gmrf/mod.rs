use std::cell::{Ref, RefCell};
use std::fmt::Display;

use anyhow::bail;
use log::{debug, error, warn};
use nalgebra::DVector;

use crate::errors::{CoalescentError, LikelihoodTerm};
use crate::grid::SufficientStatistics;
use crate::intervals::IntervalKind;
use crate::multilocus::{Locus, MultiLocus};
use crate::parameter::Parameter;
use crate::precision::{PrecisionBuilder, Smoothing, SymTridiagMatrix};
use crate::tree::{Genealogy, NodeIdx, Tree};
use crate::Result;

mod covariates;
mod gmrf_builder;
pub use covariates::{Covariates, MissingCovariate};
pub use gmrf_builder::GmrfLikelihoodBuilder;

/// ln(2 pi)
pub const LOG_TWO_PI: f64 = 1.837_877_066_409_345_3;

/// What is still valid in the cached likelihood.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Clean,
    /// A genealogy changed, statistics and likelihood are stale.
    IntervalsDirty,
    /// Only parameters changed, the statistics are still valid.
    LikelihoodDirty,
}

/// Parameter the gradient and Hessian are taken with respect to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrtParameter {
    LogPopSizes,
    Precision,
    DesignCoefficients,
    CellCoefficients(usize),
    /// Heights of the internal nodes, ordered by position, of a single
    /// unrestricted genealogy on a grid with fixed cut points.
    NodeHeights,
}

/// Values sampled by the MCMC sampler, swapped as a whole on restore.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FieldParameters {
    pub(crate) log_pop_sizes: Parameter,
    pub(crate) precision: Parameter,
    pub(crate) mixing: Parameter,
    pub(crate) covariates: Covariates,
}

#[derive(Debug, Clone)]
pub(crate) struct FieldCache {
    pub(crate) state: CacheState,
    pub(crate) stats: SufficientStatistics,
    /// Whether `stats` holds the current ploidy scaled sum of the partials.
    pub(crate) reduced: bool,
    /// Unscaled structure matrix of the random walk.
    pub(crate) structure: SymTridiagMatrix,
    pub(crate) coalescent: Option<f64>,
    pub(crate) field: Option<f64>,
}

/// Skyride/skygrid log-likelihood: the coalescent density of one or more
/// genealogies given piecewise constant log population sizes, plus a GMRF
/// random walk prior smoothing those sizes.
///
/// Evaluation is lazy, the cached value is reused until a genealogy or a
/// parameter changes. `store_state`/`restore_state` bracket an MCMC proposal.
#[derive(Debug, Clone)]
pub struct GmrfLikelihood<G: Genealogy = Tree> {
    params: FieldParameters,
    stored_params: FieldParameters,
    loci: RefCell<MultiLocus<G>>,
    cache: RefCell<FieldCache>,
    stored_cache: FieldCache,
    has_stored: bool,
    precision_builder: PrecisionBuilder,
}

impl<G: Genealogy> Display for GmrfLikelihood<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let loci = self.loci.borrow();
        write!(
            f,
            "{} GMRF over {} cells and {} locus/loci, precision {}, mixing {}",
            loci.aggregator().name(),
            self.field_length(),
            loci.len(),
            self.precision(),
            self.mixing()
        )
    }
}

impl<G: Genealogy> GmrfLikelihood<G> {
    pub(crate) fn new(
        loci: MultiLocus<G>,
        params: FieldParameters,
        precision_builder: PrecisionBuilder,
    ) -> Result<Self> {
        let mut cache = FieldCache {
            state: CacheState::IntervalsDirty,
            stats: SufficientStatistics::zeros(loci.field_length()),
            reduced: false,
            structure: SymTridiagMatrix::identity(loci.field_length()),
            coalescent: None,
            field: None,
        };
        let mut loci = loci;
        Self::recompute_statistics(&mut loci, &precision_builder, &mut cache)?;
        Ok(Self {
            stored_params: params.clone(),
            params,
            stored_cache: cache.clone(),
            cache: RefCell::new(cache),
            loci: RefCell::new(loci),
            has_stored: false,
            precision_builder,
        })
    }

    pub fn field_length(&self) -> usize {
        self.params.log_pop_sizes.dimension()
    }

    pub fn log_pop_sizes(&self) -> &[f64] {
        self.params.log_pop_sizes.values()
    }

    pub fn precision(&self) -> f64 {
        self.params.precision.value(0)
    }

    pub fn mixing(&self) -> f64 {
        self.params.mixing.value(0)
    }

    pub fn smoothing(&self) -> Smoothing {
        self.precision_builder.smoothing()
    }

    pub fn covariates(&self) -> &Covariates {
        &self.params.covariates
    }

    pub fn state(&self) -> CacheState {
        self.cache.borrow().state
    }

    pub fn loci(&self) -> Ref<'_, MultiLocus<G>> {
        self.loci.borrow()
    }

    pub fn recompute_count(&self, locus: usize) -> usize {
        self.loci.borrow().recompute_count(locus)
    }

    pub fn log_likelihood(&self) -> Result<f64> {
        let (coalescent, field) = self.compute()?;
        Ok(coalescent + field)
    }

    pub fn coalescent_log_likelihood(&self) -> Result<f64> {
        Ok(self.compute()?.0)
    }

    pub fn field_log_likelihood(&self) -> Result<f64> {
        Ok(self.compute()?.1)
    }

    pub fn set_log_pop_sizes(&mut self, values: &[f64]) -> Result<()> {
        self.params.log_pop_sizes.set_values(values)?;
        self.invalidate_likelihood();
        Ok(())
    }

    pub fn set_log_pop_size(&mut self, cell: usize, value: f64) -> Result<()> {
        self.params.log_pop_sizes.set_value(cell, value)?;
        self.invalidate_likelihood();
        Ok(())
    }

    pub fn set_precision(&mut self, precision: f64) -> Result<()> {
        self.params.precision.set_value(0, precision)?;
        self.invalidate_likelihood();
        Ok(())
    }

    pub fn set_mixing(&mut self, mixing: f64) -> Result<()> {
        self.params.mixing.set_value(0, mixing)?;
        self.invalidate_likelihood();
        Ok(())
    }

    pub fn set_ploidy(&mut self, locus: usize, ploidy: f64) -> Result<()> {
        self.loci.get_mut().set_ploidy(locus, ploidy)?;
        self.cache.get_mut().reduced = false;
        self.invalidate_likelihood();
        Ok(())
    }

    /// Mutable access to the covariates, the likelihood is considered stale
    /// afterwards.
    pub fn covariates_mut(&mut self) -> &mut Covariates {
        self.invalidate_likelihood();
        &mut self.params.covariates
    }

    /// Replaces the genealogy of `locus`, see `MultiLocus::update_tree`.
    pub fn update_tree(&mut self, locus: usize, tree: G, dirty_nodes: &[NodeIdx]) -> Result<()> {
        self.loci.get_mut().update_tree(locus, tree, dirty_nodes)?;
        self.invalidate_intervals();
        Ok(())
    }

    /// Forgets everything that was computed.
    pub fn make_dirty(&mut self) {
        self.loci.get_mut().make_dirty();
        self.invalidate_intervals();
    }

    pub fn store_state(&mut self) {
        self.stored_params.clone_from(&self.params);
        self.stored_cache.clone_from(self.cache.get_mut());
        self.loci.get_mut().store_state();
        self.has_stored = true;
    }

    /// Puts back the state saved by the last `store_state` without any
    /// recomputation, does nothing if no state was stored.
    pub fn restore_state(&mut self) {
        if !self.has_stored {
            warn!("Restoring the GMRF likelihood without a stored state, ignoring");
            return;
        }
        std::mem::swap(&mut self.params, &mut self.stored_params);
        std::mem::swap(self.cache.get_mut(), &mut self.stored_cache);
        self.loci.get_mut().restore_state();
        self.has_stored = false;
        debug!("Restored GMRF likelihood in state {:?}", self.state());
    }

    pub fn accept_state(&mut self) {
        self.loci.get_mut().accept_state();
        self.has_stored = false;
    }

    /// Gradient of the log-likelihood with respect to `wrt`.
    pub fn gradient(&self, wrt: WrtParameter) -> Result<Vec<f64>> {
        self.compute()?;
        let cache = self.cache.borrow();
        let q = self.scaled_precision(&cache.structure);
        let adjusted = self.params.covariates.adjust(self.log_pop_sizes());
        match wrt {
            WrtParameter::LogPopSizes => {
                let q_adjusted = q.mul_vec(&adjusted);
                Ok(self
                    .log_pop_sizes()
                    .iter()
                    .enumerate()
                    .map(|(i, gamma)| {
                        -(cache.stats.coalescent_counts[i] as f64)
                            + cache.stats.intensity[i] * (-gamma).exp()
                            - q_adjusted[i]
                    })
                    .collect())
            }
            WrtParameter::Precision => {
                let d = self.field_length() as f64;
                let mixed = cache.structure.scaled(1.0, self.mixing());
                Ok(vec![
                    0.5 * (d - 1.0) / self.precision() - 0.5 * mixed.quadratic_form(&adjusted),
                ])
            }
            WrtParameter::DesignCoefficients => {
                self.params.covariates.design_gradient(&q.mul_vec(&adjusted))
            }
            WrtParameter::CellCoefficients(k) => {
                self.params.covariates.cell_gradient(k, &q.mul_vec(&adjusted))
            }
            WrtParameter::NodeHeights => self.node_height_gradient(&cache.stats),
        }
    }

    /// Diagonal of the Hessian of the log-likelihood with respect to `wrt`.
    pub fn diagonal_hessian(&self, wrt: WrtParameter) -> Result<Vec<f64>> {
        self.compute()?;
        let cache = self.cache.borrow();
        let q = self.scaled_precision(&cache.structure);
        match wrt {
            WrtParameter::LogPopSizes => Ok(self
                .log_pop_sizes()
                .iter()
                .enumerate()
                .map(|(i, gamma)| -cache.stats.intensity[i] * (-gamma).exp() - q.diag()[i])
                .collect()),
            WrtParameter::Precision => {
                let d = self.field_length() as f64;
                Ok(vec![-0.5 * (d - 1.0) / self.precision().powi(2)])
            }
            WrtParameter::DesignCoefficients => self.params.covariates.design_hessian(&q),
            WrtParameter::CellCoefficients(k) => self.params.covariates.cell_hessian(k, &q),
            // not modelled
            WrtParameter::NodeHeights => Ok(vec![0.0; self.dimension(wrt)?]),
        }
    }

    /// Dimension of the parameter named by `wrt`.
    pub fn dimension(&self, wrt: WrtParameter) -> Result<usize> {
        Ok(match wrt {
            WrtParameter::LogPopSizes => self.field_length(),
            WrtParameter::Precision => 1,
            WrtParameter::DesignCoefficients => match self.params.covariates.design_coefficients() {
                Some(beta) => beta.len(),
                None => bail!(CoalescentError::Configuration(
                    "No design matrix was given".to_string()
                )),
            },
            WrtParameter::CellCoefficients(k) => self.params.covariates.cell_coefficients(k)?.len(),
            WrtParameter::NodeHeights => {
                let loci = self.loci.borrow();
                self.node_height_locus(&loci)?.tree().internal_count()
            }
        })
    }

    pub fn sufficient_statistics(&self) -> Result<SufficientStatistics> {
        self.compute()?;
        Ok(self.cache.borrow().stats.clone())
    }

    /// Copy of the scaled precision matrix `precision * (mixing Q + (1 - mixing) I)`.
    pub fn precision_matrix(&self) -> Result<SymTridiagMatrix> {
        self.refresh_statistics()?;
        Ok(self.scaled_precision(&self.cache.borrow().structure))
    }

    pub fn precision_log_pseudo_determinant(&self) -> Result<f64> {
        self.precision_matrix()?.log_pseudo_determinant()
    }

    /// `gamma^T Q gamma` for the unscaled structure matrix.
    pub fn weighted_sse(&self) -> Result<f64> {
        self.refresh_statistics()?;
        let gamma = DVector::from_column_slice(self.log_pop_sizes());
        Ok(self.cache.borrow().structure.quadratic_form(&gamma))
    }

    /// Effective population size in effect at `time`.
    pub fn population_size_at(&self, time: f64) -> Result<f64> {
        self.refresh_statistics()?;
        let loci = self.loci.borrow();
        let cell = loci.aggregator().cell_at(&self.cache.borrow().stats, time);
        Ok(self.log_pop_sizes()[cell].exp())
    }

    pub fn coalescent_interval_heights(&self) -> Result<Vec<f64>> {
        self.refresh_statistics()?;
        Ok(self.loci.borrow().coalescent_times())
    }

    /// The only locus, if node height gradients make sense for this field.
    fn node_height_locus<'a>(&self, loci: &'a MultiLocus<G>) -> Result<&'a Locus<G>> {
        if !loci.aggregator().has_fixed_boundaries() {
            bail!(CoalescentError::Configuration(format!(
                "Node height gradients need fixed grid cells, the {} cells move with the nodes",
                loci.aggregator().name()
            )));
        }
        if let Smoothing::TimeAware {
            rescale_by_root_height: true,
        } = self.smoothing()
        {
            bail!(CoalescentError::Configuration(
                "Node height gradients cannot follow smoothing rescaled by the root height"
                    .to_string()
            ));
        }
        match loci.loci() {
            [locus] if locus.timeline().restriction().is_empty() => Ok(locus),
            _ => bail!(CoalescentError::Configuration(
                "Node height gradients need exactly one unrestricted genealogy".to_string()
            )),
        }
    }

    /// Moving a node up lengthens the interval its coalescence ends and
    /// shortens the one above it, both in the cell of the node.
    fn node_height_gradient(&self, stats: &SufficientStatistics) -> Result<Vec<f64>> {
        let loci = self.loci.borrow();
        let locus = self.node_height_locus(&loci)?;
        let tree = locus.tree();
        let internals = tree.internal_nodes();
        let mut ranks = vec![None; tree.node_count()];
        for (rank, node) in internals.iter().enumerate() {
            ranks[usize::from(node)] = Some(rank);
        }

        let intervals = locus.intervals();
        let mut gradient = vec![0.0; internals.len()];
        for (i, interval) in intervals.iter().enumerate() {
            let (IntervalKind::Coalescent, Some(node)) = (interval.kind, interval.node) else {
                continue;
            };
            let Some(rank) = ranks[usize::from(node)] else {
                bail!(CoalescentError::InvariantViolation(format!(
                    "Coalescent interval ends at {}",
                    node
                )));
            };
            let cell = loci.aggregator().cell_at(stats, tree.height(node));
            let above = intervals.get(i + 1).map_or(0.0, |next| lineage_pairs(next.lineages));
            gradient[rank] -=
                (lineage_pairs(interval.lineages) - above) * (-self.log_pop_sizes()[cell]).exp();
        }
        let factor = 1.0 / locus.ploidy();
        Ok(gradient.into_iter().map(|g| g * factor).collect())
    }

    fn scaled_precision(&self, structure: &SymTridiagMatrix) -> SymTridiagMatrix {
        structure.scaled(self.precision(), self.mixing())
    }

    fn invalidate_likelihood(&mut self) {
        let cache = self.cache.get_mut();
        if cache.state == CacheState::Clean {
            cache.state = CacheState::LikelihoodDirty;
        }
        cache.coalescent = None;
        cache.field = None;
    }

    fn invalidate_intervals(&mut self) {
        let cache = self.cache.get_mut();
        cache.state = CacheState::IntervalsDirty;
        cache.coalescent = None;
        cache.field = None;
    }

    fn refresh_statistics(&self) -> Result<()> {
        let mut cache = self.cache.borrow_mut();
        if cache.state == CacheState::IntervalsDirty {
            Self::recompute_statistics(
                &mut self.loci.borrow_mut(),
                &self.precision_builder,
                &mut cache,
            )?;
        }
        if !cache.reduced {
            self.loci.borrow().reduce(&mut cache.stats);
            cache.reduced = true;
        }
        Ok(())
    }

    fn recompute_statistics(
        loci: &mut MultiLocus<G>,
        precision_builder: &PrecisionBuilder,
        cache: &mut FieldCache,
    ) -> Result<()> {
        loci.refresh()?;
        loci.reduce(&mut cache.stats);
        cache.reduced = true;
        let lengths = loci.aggregator().smoothing_lengths(&cache.stats);
        cache.structure =
            precision_builder.build(loci.field_length(), &lengths, loci.root_height())?;
        cache.state = CacheState::LikelihoodDirty;
        debug!(
            "Recomputed sufficient statistics, {} coalescences over {} cells",
            cache.stats.total_coalescent_count(),
            cache.stats.field_length()
        );
        Ok(())
    }

    fn compute(&self) -> Result<(f64, f64)> {
        self.refresh_statistics()?;
        let mut cache = self.cache.borrow_mut();
        if let (CacheState::Clean, Some(coalescent), Some(field)) =
            (cache.state, cache.coalescent, cache.field)
        {
            return Ok((coalescent, field));
        }
        let coalescent = self.coalescent_term(&cache.stats)?;
        let field = self.field_term(&cache.structure)?;
        cache.coalescent = Some(coalescent);
        cache.field = Some(field);
        cache.state = CacheState::Clean;
        Ok((coalescent, field))
    }

    fn coalescent_term(&self, stats: &SufficientStatistics) -> Result<f64> {
        let value = self
            .log_pop_sizes()
            .iter()
            .enumerate()
            .map(|(i, gamma)| {
                -(stats.coalescent_counts[i] as f64) * gamma + stats.ploidy_adjustment[i]
                    - stats.intensity[i] * (-gamma).exp()
            })
            .sum();
        check_finite(LikelihoodTerm::Coalescent, value)
    }

    fn field_term(&self, structure: &SymTridiagMatrix) -> Result<f64> {
        let d = self.field_length() as f64;
        let adjusted = self.params.covariates.adjust(self.log_pop_sizes());
        let q = self.scaled_precision(structure);
        // the improper random walk loses the constant shift direction
        let degrees = if self.mixing() == 1.0 { d - 1.0 } else { d };
        let field = check_finite(
            LikelihoodTerm::Field,
            0.5 * (d - 1.0) * self.precision().ln() - 0.5 * q.quadratic_form(&adjusted)
                - 0.5 * degrees * LOG_TWO_PI,
        )?;
        let missing = check_finite(
            LikelihoodTerm::MissingCovariates,
            self.params.covariates.missing_log_density()?,
        )?;
        Ok(field + missing)
    }
}

fn lineage_pairs(lineages: usize) -> f64 {
    let k = lineages as f64;
    0.5 * k * (k - 1.0)
}

fn check_finite(term: LikelihoodTerm, value: f64) -> Result<f64> {
    if !value.is_finite() {
        error!("The {} log-likelihood evaluated to {}", term, value);
        bail!(CoalescentError::NonFiniteLikelihood { term, value });
    }
    Ok(value)
}
