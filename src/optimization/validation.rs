//! Validation helpers shared by the strategy option structs and the
//! finite-difference layer.
//!
//! - **Tolerance checks**: [`verify_tol`] for positive, finite tolerances.
//! - **Iteration caps**: [`verify_max_iter`].
//! - **Gradients**: [`validate_grad`] enforces dimension and finiteness.
//! - **Probabilities**: [`verify_probability`] for crossover / recombination
//!   rates.
use crate::optimization::{
    errors::{OptError, OptResult},
    types::Vector,
};

/// Validate an optional tolerance.
///
/// # Errors
/// [`OptError::InvalidTolerance`] if the value is non-finite or ≤ 0.0.
pub fn verify_tol(name: &'static str, tol: Option<f64>) -> OptResult<()> {
    if let Some(tol) = tol {
        if !tol.is_finite() {
            return Err(OptError::InvalidTolerance { name, tol, reason: "Tolerance must be finite." });
        }
        if tol <= 0.0 {
            return Err(OptError::InvalidTolerance {
                name,
                tol,
                reason: "Tolerance must be positive.",
            });
        }
    }
    Ok(())
}

/// Validate an optional iteration cap.
///
/// # Errors
/// [`OptError::InvalidMaxIter`] if `max_iter == 0`.
pub fn verify_max_iter(max_iter: Option<usize>) -> OptResult<()> {
    if let Some(max_iter) = max_iter {
        if max_iter == 0 {
            return Err(OptError::InvalidMaxIter {
                max_iter,
                reason: "Maximum iterations must be greater than zero.",
            });
        }
    }
    Ok(())
}

/// Validate a probability in `[0, 1]`.
///
/// # Errors
/// [`OptError::InvalidCrossover`] when outside the unit interval or NaN.
pub fn verify_probability(value: f64) -> OptResult<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(OptError::InvalidCrossover {
            value,
            reason: "Probabilities must lie in [0, 1].",
        });
    }
    Ok(())
}

/// Validate a distribution index (SBX / polynomial mutation).
///
/// # Errors
/// [`OptError::InvalidCrossover`] when non-finite or negative.
pub fn verify_distribution_index(value: f64) -> OptResult<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(OptError::InvalidCrossover {
            value,
            reason: "Distribution indices must be finite and non-negative.",
        });
    }
    Ok(())
}

/// Validate a gradient vector against dimension and finiteness.
///
/// # Errors
/// - [`OptError::Surface`] wrapping a dimension mismatch if the length is off.
/// - [`OptError::NonFiniteCost`] carrying the first offending entry.
pub fn validate_grad(grad: &Vector, dim: usize) -> OptResult<()> {
    if grad.len() != dim {
        return Err(crate::surface::SurfaceError::DimensionMismatch {
            expected: dim,
            found: grad.len(),
        }
        .into());
    }
    if let Some(&value) = grad.iter().find(|v| !v.is_finite()) {
        return Err(OptError::NonFiniteCost { value });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn tolerances_must_be_positive_and_finite() {
        assert!(verify_tol("tol", None).is_ok());
        assert!(verify_tol("tol", Some(1e-8)).is_ok());
        assert!(matches!(verify_tol("tol", Some(0.0)), Err(OptError::InvalidTolerance { .. })));
        assert!(matches!(
            verify_tol("tol", Some(f64::NAN)),
            Err(OptError::InvalidTolerance { .. })
        ));
    }

    #[test]
    fn zero_iteration_cap_is_rejected() {
        assert!(verify_max_iter(Some(1)).is_ok());
        assert!(matches!(verify_max_iter(Some(0)), Err(OptError::InvalidMaxIter { .. })));
    }

    #[test]
    fn probabilities_and_indices_are_range_checked() {
        assert!(verify_probability(0.7).is_ok());
        assert!(verify_probability(1.2).is_err());
        assert!(verify_distribution_index(20.0).is_ok());
        assert!(verify_distribution_index(-1.0).is_err());
    }

    #[test]
    fn gradients_are_checked_for_shape_and_finiteness() {
        assert!(validate_grad(&array![1.0, 2.0], 2).is_ok());
        assert!(matches!(validate_grad(&array![1.0], 2), Err(OptError::Surface(_))));
        assert!(matches!(
            validate_grad(&array![1.0, f64::INFINITY], 2),
            Err(OptError::NonFiniteCost { .. })
        ));
    }
}
