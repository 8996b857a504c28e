use assert_matches::assert_matches;

use crate::errors::CoalescentError;
use crate::parameter::Parameter;

#[test]
fn set_value_within_bounds() {
    let mut p = Parameter::new("mixing", &[0.5, 0.7])
        .with_bounds(0.0, 1.0)
        .unwrap();
    p.set_value(1, 1.0).unwrap();
    assert_eq!(p.values(), &[0.5, 1.0]);
    assert_eq!(p.dimension(), 2);
    assert_eq!(p.bounds(), (0.0, 1.0));
}

#[test]
fn rejected_value_leaves_parameter_untouched() {
    let mut p = Parameter::scalar("precision", 2.0)
        .with_bounds(f64::MIN_POSITIVE, f64::INFINITY)
        .unwrap();
    let err = p.set_value(0, -1.0).unwrap_err();
    assert_matches!(
        err.downcast_ref::<CoalescentError>(),
        Some(CoalescentError::Configuration(_))
    );
    assert!(p.set_value(0, f64::NAN).is_err());
    assert_eq!(p.value(0), 2.0);
}

#[test]
fn initial_values_checked_against_bounds() {
    assert!(Parameter::scalar("mixing", 1.5)
        .with_bounds(0.0, 1.0)
        .is_err());
    assert!(Parameter::scalar("mixing", 0.5)
        .with_bounds(1.0, 0.0)
        .is_err());
}

#[test]
fn set_values_dimension_mismatch() {
    let mut p = Parameter::new("log population sizes", &[0.0; 3]);
    let err = p.set_values(&[1.0, 2.0]).unwrap_err();
    assert_matches!(
        err.downcast_ref::<CoalescentError>(),
        Some(CoalescentError::DimensionMismatch {
            expected: 3,
            found: 2,
            ..
        })
    );
    assert!(p.set_value(3, 0.0).is_err());
    p.set_values(&[1.0, 2.0, 3.0]).unwrap();
    assert_eq!(p.values(), &[1.0, 2.0, 3.0]);
}
