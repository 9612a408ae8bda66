use argmin::core::{ArgminError, Error};

use crate::surface::errors::SurfaceError;

/// Crate-wide result alias for optimizer operations.
pub type OptResult<T> = Result<T, OptError>;

#[derive(Debug, Clone, PartialEq)]
pub enum OptError {
    // ---- Options ----
    /// Tolerances need to be positive and finite.
    InvalidTolerance {
        name: &'static str,
        tol: f64,
        reason: &'static str,
    },
    /// Maximum iterations needs to be positive.
    InvalidMaxIter {
        max_iter: usize,
        reason: &'static str,
    },
    /// At least one stopping rule must be provided.
    NoTolerancesProvided,

    /// Variable scale needs to be positive and finite.
    InvalidScale {
        scale: f64,
    },

    /// Population settings out of range.
    InvalidPopulation {
        size: usize,
        reason: &'static str,
    },

    /// Differential-evolution mutation (dithering) bounds out of range.
    InvalidMutation {
        low: f64,
        high: f64,
        reason: &'static str,
    },

    /// Crossover probability or distribution index out of range.
    InvalidCrossover {
        value: f64,
        reason: &'static str,
    },

    /// Sobol sequences support a bounded number of dimensions.
    SobolDimension {
        dim: usize,
        max: usize,
    },

    /// Unrecognized strategy, sampling, or initialization name.
    InvalidStrategy {
        name: String,
        reason: &'static str,
    },

    // ---- Request ----
    /// Total budget must be finite and non-negative.
    InvalidBudget {
        value: f64,
    },

    /// Per-category cap must be finite and non-negative.
    InvalidCap {
        category: String,
        value: f64,
    },

    /// Metric floor must be finite.
    InvalidFloor {
        metric: String,
        value: f64,
    },

    /// Multi-objective runs need at least one objective.
    NoObjectives,

    // ---- Cost function ----
    /// Objective returned a non-finite value.
    NonFiniteCost {
        value: f64,
    },

    // ---- Surface ----
    /// Setup-time failure of the response-surface layer.
    Surface(SurfaceError),

    // ---- Argmin ---
    /// Wrapper for argmin::InvalidParameter
    InvalidParameter {
        text: String,
    },
    /// Wrapper for argmin::NotImplemented
    NotImplemented {
        text: String,
    },
    /// Wrapper for argmin::NotInitialized
    NotInitialized {
        text: String,
    },
    /// Wrapper for argmin::ConditionViolated
    ConditionViolated {
        text: String,
    },
    /// Wrapper for argmin::CheckPointNotFound
    CheckPointNotFound {
        text: String,
    },
    /// Wrapper for argmin::PotentialBug
    PotentialBug {
        text: String,
    },
    /// Wrapper for argmin::ImpossibleError
    ImpossibleError {
        text: String,
    },
    /// Wrapper for other argmin::Error types
    BackendError {
        text: String,
    },

    // ---- Fallback ----
    UnknownError,
}

impl std::error::Error for OptError {}

impl std::fmt::Display for OptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            // ---- Options ----
            OptError::InvalidTolerance { name, tol, reason } => {
                write!(f, "Invalid {name} tolerance {tol}: {reason}")
            }
            OptError::InvalidMaxIter { max_iter, reason } => {
                write!(f, "Invalid maximum iterations {max_iter}: {reason}")
            }
            OptError::NoTolerancesProvided => {
                write!(f, "No tolerances provided")
            }
            OptError::InvalidScale { scale } => {
                write!(f, "Invalid variable scale {scale}: must be finite and > 0")
            }
            OptError::InvalidPopulation { size, reason } => {
                write!(f, "Invalid population size {size}: {reason}")
            }
            OptError::InvalidMutation { low, high, reason } => {
                write!(f, "Invalid mutation bounds ({low}, {high}): {reason}")
            }
            OptError::InvalidCrossover { value, reason } => {
                write!(f, "Invalid crossover setting {value}: {reason}")
            }
            OptError::SobolDimension { dim, max } => {
                write!(f, "Sobol sequence requested in {dim} dimensions; at most {max} supported")
            }
            OptError::InvalidStrategy { name, reason } => {
                write!(f, "Invalid strategy '{name}': {reason}")
            }

            // ---- Request ----
            OptError::InvalidBudget { value } => {
                write!(f, "Invalid total budget {value}: must be finite and >= 0")
            }
            OptError::InvalidCap { category, value } => {
                write!(f, "Invalid cap {value} for category '{category}': must be finite and >= 0")
            }
            OptError::InvalidFloor { metric, value } => {
                write!(f, "Invalid floor {value} for metric '{metric}': must be finite")
            }
            OptError::NoObjectives => {
                write!(f, "At least one objective metric is required")
            }

            // ---- Cost function ----
            OptError::NonFiniteCost { value } => {
                write!(f, "Non-finite cost value: {value}")
            }

            // ---- Surface ----
            OptError::Surface(err) => {
                write!(f, "Response surface error: {err}")
            }

            // ---- Argmin ----
            OptError::InvalidParameter { text } => {
                write!(f, "Invalid parameter: {text}")
            }
            OptError::NotImplemented { text } => {
                write!(f, "Not implemented: {text}")
            }
            OptError::NotInitialized { text } => {
                write!(f, "Not initialized: {text}")
            }
            OptError::ConditionViolated { text } => {
                write!(f, "Condition violated: {text}")
            }
            OptError::CheckPointNotFound { text } => {
                write!(f, "Checkpoint not found: {text}")
            }
            OptError::PotentialBug { text } => {
                write!(f, "Potential bug: {text}")
            }
            OptError::ImpossibleError { text } => {
                write!(f, "Impossible error: {text}")
            }
            OptError::BackendError { text } => {
                write!(f, "Backend error: {text}")
            }

            // ---- Fallback ----
            OptError::UnknownError => {
                write!(f, "Unknown error")
            }
        }
    }
}

impl From<Error> for OptError {
    fn from(original_err: Error) -> Self {
        // Errors raised by our own cost functions travel through argmin as
        // `anyhow` payloads; recover them before falling back to argmin's own.
        let original_err = match original_err.downcast::<OptError>() {
            Ok(opt_err) => return opt_err,
            Err(err) => err,
        };
        let original_err = match original_err.downcast::<SurfaceError>() {
            Ok(surface_err) => return OptError::Surface(surface_err),
            Err(err) => err,
        };
        match original_err.downcast() {
            Ok(opt_err) => match opt_err {
                ArgminError::InvalidParameter { text } => OptError::InvalidParameter { text },
                ArgminError::NotImplemented { text } => OptError::NotImplemented { text },
                ArgminError::NotInitialized { text } => OptError::NotInitialized { text },
                ArgminError::ConditionViolated { text } => OptError::ConditionViolated { text },
                ArgminError::CheckpointNotFound { text } => OptError::CheckPointNotFound { text },
                ArgminError::PotentialBug { text } => OptError::PotentialBug { text },
                ArgminError::ImpossibleError { text } => OptError::ImpossibleError { text },
                _ => OptError::UnknownError,
            },
            Err(err) => OptError::BackendError { text: err.to_string() },
        }
    }
}

impl From<SurfaceError> for OptError {
    fn from(err: SurfaceError) -> Self {
        OptError::Surface(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    // Purpose
    // -------
    // A surface lookup error raised inside an argmin cost function must come
    // back out of the executor as the same lookup error, not as an opaque
    // backend string.
    fn surface_errors_round_trip_through_argmin_error() {
        let inner = SurfaceError::UnknownMetric { name: "GHG".to_string() };
        let wrapped: Error = inner.clone().into();
        assert_eq!(OptError::from(wrapped), OptError::Surface(inner));
    }

    #[test]
    fn opt_errors_round_trip_through_argmin_error() {
        let wrapped: Error = OptError::NonFiniteCost { value: f64::INFINITY }.into();
        assert_eq!(OptError::from(wrapped), OptError::NonFiniteCost { value: f64::INFINITY });
    }

    #[test]
    fn argmin_errors_map_to_wrappers() {
        let wrapped: Error = ArgminError::NotInitialized { text: "param".to_string() }.into();
        assert_eq!(OptError::from(wrapped), OptError::NotInitialized { text: "param".to_string() });
    }
}
