use approx::assert_relative_eq;
use assert_matches::assert_matches;

use crate::errors::CoalescentError;
use crate::gmrf::{GmrfLikelihood, GmrfLikelihoodBuilder, WrtParameter};
use crate::likelihood::{FieldGradient, GradientProvider, ModelLikelihood};
use crate::tree::NodeIdx::Internal as I;
use crate::{assert_float_relative_slice_eq, tree};

const GOLDEN: &str = "((((5:0.5,1:0.2):0.5,0:1):0.2,2:0.8):0.2,3:1.4);";

fn golden_skygrid() -> GmrfLikelihood {
    GmrfLikelihoodBuilder::new(tree!(GOLDEN))
        .grid(&[0.35, 0.7, 1.05])
        .precision(5.0)
        .log_pop_sizes(&[0.1, -0.2, 0.3, 0.5])
        .build()
        .unwrap()
}

/// Proposes through `propose`, then rejects, returning the proposed value.
fn propose_and_reject<L: ModelLikelihood>(model: &mut L, propose: impl FnOnce(&mut L)) -> f64 {
    model.store_state();
    propose(model);
    let proposed = model.log_likelihood().unwrap();
    model.restore_state();
    proposed
}

#[test]
fn rejected_proposal_restores_likelihood() {
    let mut gmrf = golden_skygrid();
    let before = ModelLikelihood::log_likelihood(&gmrf).unwrap();
    let proposed = propose_and_reject(&mut gmrf, |g| {
        let mut moved = tree!(GOLDEN);
        moved.set_height(&I(2), 1.1).unwrap();
        g.update_tree(0, moved, &[I(2)]).unwrap();
        g.set_precision(1.0).unwrap();
    });
    assert_ne!(proposed, before);
    assert_eq!(ModelLikelihood::log_likelihood(&gmrf).unwrap(), before);
}

#[test]
fn accepted_proposal_keeps_new_state() {
    let mut gmrf = golden_skygrid();
    gmrf.store_state();
    gmrf.set_log_pop_sizes(&[0.0; 4]).unwrap();
    gmrf.accept_state();
    assert_relative_eq!(
        ModelLikelihood::log_likelihood(&gmrf).unwrap(),
        -6.642658730962868,
        epsilon = 1e-9
    );
    gmrf.restore_state();
    assert_eq!(gmrf.log_pop_sizes(), &[0.0; 4]);
}

#[test]
fn make_dirty_gives_same_value() {
    let mut gmrf = golden_skygrid();
    let before = gmrf.log_likelihood().unwrap();
    ModelLikelihood::make_dirty(&mut gmrf);
    assert_relative_eq!(gmrf.log_likelihood().unwrap(), before, epsilon = 1e-12);
    assert_eq!(gmrf.recompute_count(0), 2);
}

#[test]
fn gradient_provider_on_log_pop_sizes() {
    let gmrf = golden_skygrid();
    let provider = FieldGradient::new(&gmrf, WrtParameter::LogPopSizes).unwrap();
    assert_eq!(provider.dimension(), 4);
    assert_eq!(provider.wrt(), WrtParameter::LogPopSizes);
    assert_float_relative_slice_eq(
        &provider.gradient_log_density().unwrap(),
        &[
            -0.41419509835684876,
            6.0535068954004245,
            -1.0554044696706504,
            -2.6057550711867883,
        ],
        1e-9,
    );
    assert_float_relative_slice_eq(
        &provider.diagonal_hessian_log_density().unwrap(),
        &[
            -6.085804901643152,
            -13.053506895400425,
            -11.44459553032935,
            -5.394244928813212,
        ],
        1e-9,
    );
}

#[test]
fn gradient_provider_on_precision() {
    let gmrf = golden_skygrid();
    let provider = FieldGradient::new(&gmrf, WrtParameter::Precision).unwrap();
    assert_eq!(provider.dimension(), 1);
    let gradient = provider.gradient_log_density().unwrap();
    assert_relative_eq!(gradient[0], 0.11, epsilon = 1e-9);
    let hessian = provider.diagonal_hessian_log_density().unwrap();
    assert_relative_eq!(hessian[0], -0.5 * 3.0 / 25.0, epsilon = 1e-12);
}

#[test]
fn gradient_provider_needs_the_parameter() {
    let gmrf = golden_skygrid();
    let err = FieldGradient::new(&gmrf, WrtParameter::DesignCoefficients).unwrap_err();
    assert_matches!(
        err.downcast_ref::<CoalescentError>(),
        Some(CoalescentError::Configuration(_))
    );
    assert!(FieldGradient::new(&gmrf, WrtParameter::CellCoefficients(0)).is_err());
}
