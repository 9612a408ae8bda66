//! surface::observation — the sampled evaluation table consumed by the evaluator.
//!
//! Purpose
//! -------
//! Hold the long-form Monte-Carlo outcomes produced upstream: one
//! [`Observation`] per `(category, amount, sample, metric)` with its value
//! and unit label. [`SampleTable::new`] validates the rows once; afterwards
//! the table is immutable and the evaluator can assume finite, non-negative
//! amounts, finite values, 1-based samples, and non-empty labels.
//!
//! Conventions
//! -----------
//! - Units are optional per row; the first non-empty unit label seen for a
//!   metric wins and any later, different label is a
//!   [`SurfaceError::ConflictingUnits`].
//! - Row order carries no meaning; the evaluator sorts by amount per key.
use serde::{Deserialize, Serialize};

use crate::surface::errors::{SurfaceError, SurfaceResult};

/// One sampled outcome of investing `amount` in `category`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub category: String,
    pub amount: f64,
    pub sample: u32,
    pub metric: String,
    pub value: f64,
    #[serde(default)]
    pub units: String,
}

impl Observation {
    pub fn new(
        category: impl Into<String>, amount: f64, sample: u32, metric: impl Into<String>,
        value: f64, units: impl Into<String>,
    ) -> Self {
        Self {
            category: category.into(),
            amount,
            sample,
            metric: metric.into(),
            value,
            units: units.into(),
        }
    }
}

/// Validated, immutable collection of [`Observation`]s.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleTable {
    rows: Vec<Observation>,
}

impl SampleTable {
    /// Validate and wrap raw observations.
    ///
    /// # Errors
    /// - [`SurfaceError::EmptySampleTable`] if `rows` is empty.
    /// - [`SurfaceError::EmptyLabel`] for blank category or metric labels.
    /// - [`SurfaceError::InvalidAmount`] for negative or non-finite amounts.
    /// - [`SurfaceError::InvalidValue`] for non-finite values.
    /// - [`SurfaceError::InvalidSample`] for sample index `0`.
    pub fn new(rows: Vec<Observation>) -> SurfaceResult<Self> {
        if rows.is_empty() {
            return Err(SurfaceError::EmptySampleTable);
        }
        for row in &rows {
            validate_observation(row)?;
        }
        Ok(Self { rows })
    }

    pub fn rows(&self) -> &[Observation] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn validate_observation(row: &Observation) -> SurfaceResult<()> {
    if row.category.trim().is_empty() {
        return Err(SurfaceError::EmptyLabel { field: "category" });
    }
    if row.metric.trim().is_empty() {
        return Err(SurfaceError::EmptyLabel { field: "metric" });
    }
    if !row.amount.is_finite() {
        return Err(SurfaceError::InvalidAmount {
            category: row.category.clone(),
            value: row.amount,
            reason: "Amount must be finite.",
        });
    }
    if row.amount < 0.0 {
        return Err(SurfaceError::InvalidAmount {
            category: row.category.clone(),
            value: row.amount,
            reason: "Amount must be non-negative.",
        });
    }
    if !row.value.is_finite() {
        return Err(SurfaceError::InvalidValue {
            category: row.category.clone(),
            metric: row.metric.clone(),
            value: row.value,
        });
    }
    if row.sample == 0 {
        return Err(SurfaceError::InvalidSample { sample: row.sample });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // Row-level validation performed by `SampleTable::new`. Grouping and
    // interpolation live in the evaluator tests.
    // -------------------------------------------------------------------------

    fn row(amount: f64, sample: u32, value: f64) -> Observation {
        Observation::new("Solar", amount, sample, "LCOE", value, "$/kWh")
    }

    #[test]
    fn sample_table_accepts_valid_rows() {
        let table = SampleTable::new(vec![row(0.0, 1, 0.1), row(1e6, 1, 0.08)])
            .expect("valid rows should be accepted");
        assert_eq!(table.len(), 2);
        assert!(!table.is_empty());
    }

    #[test]
    fn sample_table_rejects_empty_input() {
        assert_eq!(SampleTable::new(Vec::new()), Err(SurfaceError::EmptySampleTable));
    }

    #[test]
    // Purpose
    // -------
    // Negative and non-finite amounts are construction errors, not values
    // to be clamped.
    fn sample_table_rejects_negative_or_nan_amounts() {
        let negative = SampleTable::new(vec![row(-1.0, 1, 0.1)]);
        assert!(matches!(negative, Err(SurfaceError::InvalidAmount { .. })));

        let nan = SampleTable::new(vec![row(f64::NAN, 1, 0.1)]);
        assert!(matches!(nan, Err(SurfaceError::InvalidAmount { .. })));
    }

    #[test]
    fn sample_table_rejects_zero_sample_and_infinite_value() {
        assert_eq!(
            SampleTable::new(vec![row(0.0, 0, 0.1)]),
            Err(SurfaceError::InvalidSample { sample: 0 })
        );
        assert!(matches!(
            SampleTable::new(vec![row(0.0, 1, f64::INFINITY)]),
            Err(SurfaceError::InvalidValue { .. })
        ));
    }

    #[test]
    fn sample_table_rejects_blank_labels() {
        let blank = Observation::new(" ", 0.0, 1, "LCOE", 0.1, "");
        assert_eq!(
            SampleTable::new(vec![blank]),
            Err(SurfaceError::EmptyLabel { field: "category" })
        );
    }
}
