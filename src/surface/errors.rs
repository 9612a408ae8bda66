//! surface::errors — setup-time failures of the response-surface layer.
//!
//! Every variant here describes a construction or lookup mistake made by the
//! caller (malformed sample table, unknown label, invalid statistic). None of
//! them are search outcomes; the optimization layer wraps them in
//! [`OptError::Surface`](crate::optimization::errors::OptError::Surface) and
//! propagates them as hard failures.

/// Result alias for response-surface operations.
pub type SurfaceResult<T> = Result<T, SurfaceError>;

#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceError {
    // ---- Sample table ----
    /// The sample table holds no observations.
    EmptySampleTable,

    /// Amounts must be finite and non-negative.
    InvalidAmount {
        category: String,
        value: f64,
        reason: &'static str,
    },

    /// Observed values must be finite.
    InvalidValue {
        category: String,
        metric: String,
        value: f64,
    },

    /// Sample indices start at 1.
    InvalidSample {
        sample: u32,
    },

    /// Category and metric labels must be non-empty.
    EmptyLabel {
        field: &'static str,
    },

    /// A metric was reported with two different unit labels.
    ConflictingUnits {
        metric: String,
        first: String,
        second: String,
    },

    // ---- Lookups ----
    /// Category name not present in the sample table.
    UnknownCategory {
        name: String,
    },

    /// Metric name not present in the sample table.
    UnknownMetric {
        name: String,
    },

    /// Vector length does not match the number of categories.
    DimensionMismatch {
        expected: usize,
        found: usize,
    },

    // ---- Statistics ----
    /// Quantile level must lie in [0, 1].
    InvalidQuantile {
        q: f64,
    },

    /// Unrecognized statistic name.
    InvalidStatistic {
        name: String,
        reason: &'static str,
    },

    // ---- Corner grid ----
    /// The Cartesian product of amount levels exceeds the configured limit.
    CornerGridTooLarge {
        corners: usize,
        limit: usize,
    },
}

impl std::error::Error for SurfaceError {}

impl std::fmt::Display for SurfaceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            // ---- Sample table ----
            SurfaceError::EmptySampleTable => {
                write!(f, "Sample table contains no observations")
            }
            SurfaceError::InvalidAmount { category, value, reason } => {
                write!(f, "Invalid amount {value} for category '{category}': {reason}")
            }
            SurfaceError::InvalidValue { category, metric, value } => {
                write!(
                    f,
                    "Invalid value {value} for category '{category}', metric '{metric}': must be finite"
                )
            }
            SurfaceError::InvalidSample { sample } => {
                write!(f, "Invalid sample index {sample}: samples are numbered from 1")
            }
            SurfaceError::EmptyLabel { field } => {
                write!(f, "Empty {field} label in sample table")
            }
            SurfaceError::ConflictingUnits { metric, first, second } => {
                write!(f, "Metric '{metric}' reported in both '{first}' and '{second}'")
            }

            // ---- Lookups ----
            SurfaceError::UnknownCategory { name } => {
                write!(f, "Unknown category '{name}'")
            }
            SurfaceError::UnknownMetric { name } => {
                write!(f, "Unknown metric '{name}'")
            }
            SurfaceError::DimensionMismatch { expected, found } => {
                write!(f, "Allocation dimension mismatch: expected {expected}, found {found}")
            }

            // ---- Statistics ----
            SurfaceError::InvalidQuantile { q } => {
                write!(f, "Invalid quantile level {q}: must lie in [0, 1]")
            }
            SurfaceError::InvalidStatistic { name, reason } => {
                write!(f, "Invalid statistic '{name}': {reason}")
            }

            // ---- Corner grid ----
            SurfaceError::CornerGridTooLarge { corners, limit } => {
                write!(f, "Corner grid has {corners} corners, exceeding the limit of {limit}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    // Purpose
    // -------
    // Lookup errors must name the offending label so callers can fix typos.
    fn unknown_metric_message_names_the_metric() {
        let err = SurfaceError::UnknownMetric { name: "LCOE".to_string() };
        assert_eq!(err.to_string(), "Unknown metric 'LCOE'");
    }

    #[test]
    fn corner_grid_message_reports_size_and_limit() {
        let err = SurfaceError::CornerGridTooLarge { corners: 4096, limit: 1000 };
        assert!(err.to_string().contains("4096"));
        assert!(err.to_string().contains("1000"));
    }
}
