use std::error::Error;
use std::fmt;

/// Which part of the log-likelihood a non-finite value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LikelihoodTerm {
    Coalescent,
    Field,
    MissingCovariates,
}

impl fmt::Display for LikelihoodTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LikelihoodTerm::Coalescent => write!(f, "coalescent"),
            LikelihoodTerm::Field => write!(f, "GMRF field"),
            LikelihoodTerm::MissingCovariates => write!(f, "missing covariate"),
        }
    }
}

/// Errors raised by the coalescent likelihood machinery.
///
/// Functions in this crate return `anyhow::Error`, callers that need to tell the
/// classes apart can use `err.downcast_ref::<CoalescentError>()`.
#[derive(Debug, Clone, PartialEq)]
pub enum CoalescentError {
    /// Invalid construction-time argument.
    Configuration(String),
    /// A requested taxon does not exist in the genealogy.
    MissingTaxon(String),
    /// Parameter dimension disagrees with the grid or tree derived one.
    DimensionMismatch {
        what: String,
        expected: usize,
        found: usize,
    },
    /// The genealogy or a derived structure breaks an ordering invariant.
    InvariantViolation(String),
    /// The tridiagonal eigen-solver ran out of iterations.
    NotConverged { iterations: usize },
    Numerical(String),
    /// A likelihood term evaluated to NaN or an infinity.
    NonFiniteLikelihood { term: LikelihoodTerm, value: f64 },
}

impl CoalescentError {
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            CoalescentError::Configuration(_)
                | CoalescentError::MissingTaxon(_)
                | CoalescentError::DimensionMismatch { .. }
        )
    }

    /// Numerical failures can be handled by rejecting the current state.
    pub fn is_numerical(&self) -> bool {
        matches!(
            self,
            CoalescentError::NotConverged { .. }
                | CoalescentError::Numerical(_)
                | CoalescentError::NonFiniteLikelihood { .. }
        )
    }
}

impl fmt::Display for CoalescentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoalescentError::Configuration(msg) => write!(f, "Invalid configuration: {}", msg),
            CoalescentError::MissingTaxon(id) => {
                write!(f, "Taxon {} is not present in the genealogy", id)
            }
            CoalescentError::DimensionMismatch {
                what,
                expected,
                found,
            } => write!(
                f,
                "Dimension of {} is {}, expected {}",
                what, found, expected
            ),
            CoalescentError::InvariantViolation(msg) => write!(f, "Invariant violated: {}", msg),
            CoalescentError::NotConverged { iterations } => write!(
                f,
                "Tridiagonal eigenvalue solver did not converge in {} iterations",
                iterations
            ),
            CoalescentError::Numerical(msg) => write!(f, "Numerical error: {}", msg),
            CoalescentError::NonFiniteLikelihood { term, value } => {
                write!(f, "The {} log-likelihood is not finite: {}", term, value)
            }
        }
    }
}

impl Error for CoalescentError {}

#[cfg(test)]
#[cfg_attr(coverage, coverage(off))]
mod tests {
    use anyhow::bail;

    use super::{CoalescentError, LikelihoodTerm};
    use crate::Result;

    fn failing() -> Result<()> {
        bail!(CoalescentError::DimensionMismatch {
            what: "log population sizes".to_string(),
            expected: 4,
            found: 3,
        })
    }

    #[test]
    fn downcast_from_anyhow() {
        let err = failing().unwrap_err();
        let err = err.downcast_ref::<CoalescentError>().unwrap();
        assert!(err.is_configuration());
        assert!(!err.is_numerical());
        assert_eq!(
            err.to_string(),
            "Dimension of log population sizes is 3, expected 4"
        );
    }

    #[test]
    fn non_finite_is_numerical() {
        let err = CoalescentError::NonFiniteLikelihood {
            term: LikelihoodTerm::Field,
            value: f64::NAN,
        };
        assert!(err.is_numerical());
        assert!(err.to_string().contains("GMRF field"));
    }
}
