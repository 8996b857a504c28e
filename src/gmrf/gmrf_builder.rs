use anyhow::bail;
use log::info;

use crate::errors::CoalescentError;
use crate::gmrf::{Covariates, FieldParameters, GmrfLikelihood};
use crate::grid::{CoalescentGroups, FixedGrid, GridAggregator};
use crate::intervals::Restriction;
use crate::multilocus::{Locus, MultiLocus};
use crate::parameter::Parameter;
use crate::precision::{PrecisionBuilder, Smoothing};
use crate::tree::{Genealogy, Tree};
use crate::Result;

#[derive(Debug, Clone, PartialEq)]
enum FieldCells {
    /// One cell per coalescent event.
    Skyride,
    Groups(Vec<usize>),
    Grid(Vec<f64>),
    Cutoff { cutoff: f64, grid_points: usize },
}

#[derive(Debug, Clone)]
struct LocusConfig<G> {
    tree: G,
    ploidy: f64,
    restriction: Restriction,
}

/// Configures a `GmrfLikelihood`, everything is validated by `build`.
///
/// Without further settings this is a single locus skyride with precision 1,
/// mixing 1 and all log population sizes at 0.
pub struct GmrfLikelihoodBuilder<G: Genealogy = Tree> {
    loci: Vec<LocusConfig<G>>,
    cells: FieldCells,
    log_pop_sizes: Option<Vec<f64>>,
    precision: f64,
    mixing: f64,
    smoothing: Option<Smoothing>,
    covariates: Covariates,
}

impl<G: Genealogy> GmrfLikelihoodBuilder<G> {
    /// Starts from the genealogy of the first locus.
    ///
    /// # Example
    /// ```
    /// use skygrid::gmrf::GmrfLikelihoodBuilder;
    /// use skygrid::tree::from_newick;
    /// let tree = from_newick("((A:0.5,B:0.5):0.5,C:1.0);").unwrap().pop().unwrap();
    /// let gmrf = GmrfLikelihoodBuilder::new(tree)
    ///     .grid(&[0.25, 0.75])
    ///     .precision(2.0)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(gmrf.field_length(), 3);
    /// assert!(gmrf.log_likelihood().unwrap().is_finite());
    /// ```
    pub fn new(tree: G) -> Self {
        Self {
            loci: vec![LocusConfig {
                tree,
                ploidy: 1.0,
                restriction: Restriction::default(),
            }],
            cells: FieldCells::Skyride,
            log_pop_sizes: None,
            precision: 1.0,
            mixing: 1.0,
            smoothing: None,
            covariates: Covariates::default(),
        }
    }

    /// Adds another locus sharing the population size field.
    pub fn locus(mut self, tree: G, ploidy: f64) -> Self {
        self.loci.push(LocusConfig {
            tree,
            ploidy,
            restriction: Restriction::default(),
        });
        self
    }

    /// Sets the ploidy of the most recently added locus.
    pub fn ploidy(mut self, ploidy: f64) -> Self {
        if let Some(last) = self.loci.last_mut() {
            last.ploidy = ploidy;
        }
        self
    }

    /// Restricts the most recently added locus to part of its genealogy.
    pub fn restriction(mut self, restriction: Restriction) -> Self {
        if let Some(last) = self.loci.last_mut() {
            last.restriction = restriction;
        }
        self
    }

    /// Skygrid cells cut at the given times.
    pub fn grid(mut self, points: &[f64]) -> Self {
        self.cells = FieldCells::Grid(points.to_vec());
        self
    }

    /// Skygrid with `grid_points` equally spaced cut points up to `cutoff`.
    pub fn grid_from_cutoff(mut self, cutoff: f64, grid_points: usize) -> Self {
        self.cells = FieldCells::Cutoff {
            cutoff,
            grid_points,
        };
        self
    }

    /// Skyline cells, each covering the given number of coalescent events.
    pub fn coalescent_groups(mut self, sizes: &[usize]) -> Self {
        self.cells = FieldCells::Groups(sizes.to_vec());
        self
    }

    pub fn log_pop_sizes(mut self, values: &[f64]) -> Self {
        self.log_pop_sizes = Some(values.to_vec());
        self
    }

    pub fn precision(mut self, precision: f64) -> Self {
        self.precision = precision;
        self
    }

    pub fn mixing(mut self, mixing: f64) -> Self {
        self.mixing = mixing;
        self
    }

    /// Overrides the smoothing chosen by the kind of cells: time-aware for
    /// event groups, uniform for grids.
    pub fn smoothing(mut self, smoothing: Smoothing) -> Self {
        self.smoothing = Some(smoothing);
        self
    }

    pub fn covariates(mut self, covariates: Covariates) -> Self {
        self.covariates = covariates;
        self
    }

    /// Extracts the intervals of every locus and checks all dimensions.
    /// Bails with `CoalescentError::DimensionMismatch` if the log population
    /// sizes do not match the number of cells.
    pub fn build(self) -> Result<GmrfLikelihood<G>> {
        let loci = self
            .loci
            .into_iter()
            .map(|config| Locus::new(config.tree, config.ploidy, config.restriction))
            .collect::<Result<Vec<_>>>()?;

        let aggregator: Box<dyn GridAggregator> = match self.cells {
            FieldCells::Skyride => {
                let coalescences = match loci.as_slice() {
                    [single] => single.intervals().coalescent_count(),
                    _ => bail!(CoalescentError::Configuration(
                        "A skyride needs exactly one genealogy, give a grid for several loci"
                            .to_string()
                    )),
                };
                Box::new(CoalescentGroups::one_per_event(coalescences)?)
            }
            FieldCells::Groups(sizes) => Box::new(CoalescentGroups::new(&sizes)?),
            FieldCells::Grid(points) => Box::new(FixedGrid::new(&points)?),
            FieldCells::Cutoff {
                cutoff,
                grid_points,
            } => Box::new(FixedGrid::from_cutoff(cutoff, grid_points)?),
        };
        let smoothing = self.smoothing.unwrap_or(if aggregator.time_aware_by_default() {
            Smoothing::TimeAware {
                rescale_by_root_height: false,
            }
        } else {
            Smoothing::Uniform
        });

        let multi = MultiLocus::new(aggregator, loci)?;
        let field_length = multi.field_length();
        let log_pop_sizes = self
            .log_pop_sizes
            .unwrap_or_else(|| vec![0.0; field_length]);
        if log_pop_sizes.len() != field_length {
            bail!(CoalescentError::DimensionMismatch {
                what: "log population sizes".to_string(),
                expected: field_length,
                found: log_pop_sizes.len(),
            });
        }
        self.covariates.validate(field_length)?;

        let params = FieldParameters {
            log_pop_sizes: Parameter::new("logPopSize", &log_pop_sizes),
            precision: Parameter::scalar("precision", self.precision)
                .with_bounds(f64::MIN_POSITIVE, f64::INFINITY)?,
            mixing: Parameter::scalar("lambda", self.mixing).with_bounds(0.0, 1.0)?,
            covariates: self.covariates,
        };
        let gmrf = GmrfLikelihood::new(multi, params, PrecisionBuilder::new(smoothing))?;
        info!("Built {}", gmrf);
        info!("Smoothing: {:?}", smoothing);
        if !gmrf.covariates().is_empty() {
            info!("Log population sizes are regressed on covariates");
        }
        Ok(gmrf)
    }
}
