//! surface::statistic — reductions that collapse the sample dimension.
//!
//! Purpose
//! -------
//! Provide the [`Statistic`] enum used throughout the evaluator and the
//! optimizer to turn a vector of per-sample outcomes into a single scalar.
//! Numerics are delegated to `statrs`.
//!
//! Conventions
//! -----------
//! - `StdDev` is the population standard deviation (divisor `n`), so a
//!   single sample has zero spread.
//! - `Quantile(q)` uses the `statrs` order-statistics estimator; `Median`
//!   is `Quantile(0.5)`.
//! - Only `Mean` is linear. The two aggregation orders offered by the
//!   evaluator agree exactly for `Mean` and may legitimately disagree for
//!   every other variant.
use std::str::FromStr;

use statrs::statistics::{Data, OrderStatistics, Statistics};

use crate::surface::errors::{SurfaceError, SurfaceResult};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Statistic {
    #[default]
    Mean,
    StdDev,
    Median,
    Quantile(f64),
    Min,
    Max,
}

impl Statistic {
    /// Validated quantile constructor.
    ///
    /// # Errors
    /// [`SurfaceError::InvalidQuantile`] when `q` is outside `[0, 1]` or NaN.
    pub fn quantile(q: f64) -> SurfaceResult<Self> {
        if !(0.0..=1.0).contains(&q) {
            return Err(SurfaceError::InvalidQuantile { q });
        }
        Ok(Statistic::Quantile(q))
    }

    /// Reduce `values` to a scalar. Empty input yields `NaN`.
    pub fn apply(&self, values: &[f64]) -> f64 {
        if values.is_empty() {
            return f64::NAN;
        }
        match *self {
            Statistic::Mean => Statistics::mean(values),
            Statistic::StdDev => Statistics::population_std_dev(values),
            Statistic::Min => Statistics::min(values),
            Statistic::Max => Statistics::max(values),
            Statistic::Median => Data::new(values.to_vec()).quantile(0.5),
            Statistic::Quantile(q) => Data::new(values.to_vec()).quantile(q),
        }
    }

    /// `true` when the statistic commutes with summation across categories.
    pub fn is_linear(&self) -> bool {
        matches!(self, Statistic::Mean)
    }
}

impl FromStr for Statistic {
    type Err = SurfaceError;

    /// Parse a statistic name (case-insensitive).
    ///
    /// Accepts `mean`, `std` / `stddev` / `std_dev`, `median`, `min`, `max`,
    /// `quantile:<q>` with `q ∈ [0, 1]`, and `p<nn>` percentiles such as
    /// `p90`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_lowercase();
        match name.as_str() {
            "mean" | "average" => return Ok(Statistic::Mean),
            "std" | "stddev" | "std_dev" => return Ok(Statistic::StdDev),
            "median" => return Ok(Statistic::Median),
            "min" => return Ok(Statistic::Min),
            "max" => return Ok(Statistic::Max),
            _ => {}
        }
        let level = if let Some(rest) = name.strip_prefix("quantile:") {
            rest.parse::<f64>().ok()
        } else if let Some(rest) = name.strip_prefix('p') {
            rest.parse::<f64>().ok().map(|p| p / 100.0)
        } else {
            None
        };
        match level {
            Some(q) => Statistic::quantile(q),
            None => Err(SurfaceError::InvalidStatistic {
                name: s.to_string(),
                reason: "Valid options are 'mean', 'std', 'median', 'min', 'max', \
                         'quantile:<q>' or 'p<percent>'.",
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn mean_and_population_std_dev_match_hand_computation() {
        let xs = [1.0, 2.0, 3.0, 4.0];
        assert_relative_eq!(Statistic::Mean.apply(&xs), 2.5);
        // population variance = 1.25
        assert_relative_eq!(Statistic::StdDev.apply(&xs), 1.25_f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn median_of_odd_count_is_middle_value() {
        let xs = [9.0, 1.0, 5.0];
        assert_relative_eq!(Statistic::Median.apply(&xs), 5.0, epsilon = 1e-12);
    }

    #[test]
    fn min_max_and_single_sample_behave() {
        let xs = [3.0, -1.0, 7.0];
        assert_relative_eq!(Statistic::Min.apply(&xs), -1.0);
        assert_relative_eq!(Statistic::Max.apply(&xs), 7.0);
        assert_relative_eq!(Statistic::StdDev.apply(&[4.2]), 0.0);
        assert!(Statistic::Mean.apply(&[]).is_nan());
    }

    #[test]
    // Purpose
    // -------
    // Parsing accepts the documented spellings and rejects garbage with a
    // lookup-style error instead of defaulting to the mean.
    fn from_str_parses_documented_names() {
        assert_eq!("Mean".parse::<Statistic>(), Ok(Statistic::Mean));
        assert_eq!("STD".parse::<Statistic>(), Ok(Statistic::StdDev));
        assert_eq!("quantile:0.25".parse::<Statistic>(), Ok(Statistic::Quantile(0.25)));
        assert_eq!("p90".parse::<Statistic>(), Ok(Statistic::Quantile(0.9)));
        assert!(matches!("mode".parse::<Statistic>(), Err(SurfaceError::InvalidStatistic { .. })));
        assert!(matches!("quantile:1.5".parse::<Statistic>(), Err(SurfaceError::InvalidQuantile { .. })));
    }

    #[test]
    fn only_mean_is_linear() {
        assert!(Statistic::Mean.is_linear());
        assert!(!Statistic::StdDev.is_linear());
        assert!(!Statistic::Quantile(0.5).is_linear());
    }
}
