//! surface::corners — the discretized surface used by the exact optimizer.
//!
//! Purpose
//! -------
//! Materialize every combination of the categories' observed amount levels
//! (their Cartesian product) together with the statistic-reduced value of
//! every metric at that combination. The result is the "wide" corner table
//! over which the piecewise-linear MILP formulation is built.
//!
//! Scalability
//! -----------
//! The number of corners is the product of per-category level counts and
//! grows combinatorially with the number of categories; this is the
//! scalability limit of the exact strategy. [`Evaluator::corner_count`]
//! reports the size without materializing anything, and
//! [`Evaluator::evaluate_corners_limited`] refuses grids beyond a limit.
//!
//! Conventions
//! -----------
//! - Corners are enumerated lexicographically by level index with the last
//!   category varying fastest; "adjacent" corners in the MILP are
//!   consecutive rows of this ordering.
//! - Values are exact observed sums because interpolation is exact at
//!   nodes.
use std::collections::BTreeMap;

use ndarray::{Array1, Array2};

use crate::surface::{
    errors::{SurfaceError, SurfaceResult},
    evaluator::{Allocation, Evaluator},
    statistic::Statistic,
};

/// Wide corner table: one row per corner.
#[derive(Debug, Clone, PartialEq)]
pub struct CornerGrid {
    pub categories: Vec<String>,
    pub metrics: Vec<String>,
    pub statistic: Statistic,
    /// `corners × categories` amounts.
    pub amounts: Array2<f64>,
    /// `corners × metrics` reduced values.
    pub values: Array2<f64>,
}

impl CornerGrid {
    pub fn len(&self) -> usize {
        self.amounts.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.amounts.nrows() == 0
    }

    /// Amounts of corner `i` as an allocation.
    pub fn allocation(&self, i: usize) -> Allocation {
        self.categories.iter().cloned().zip(self.amounts.row(i).iter().copied()).collect()
    }

    /// Reduced metric values of corner `i`.
    pub fn metric_values(&self, i: usize) -> BTreeMap<String, f64> {
        self.metrics.iter().cloned().zip(self.values.row(i).iter().copied()).collect()
    }

    /// Column of `metric` across all corners.
    pub fn metric_column(&self, metric: &str) -> SurfaceResult<Array1<f64>> {
        let m = self
            .metrics
            .iter()
            .position(|name| name == metric)
            .ok_or_else(|| SurfaceError::UnknownMetric { name: metric.to_string() })?;
        Ok(self.values.column(m).to_owned())
    }
}

impl Evaluator {
    /// Number of corners in the grid (saturating at `usize::MAX`).
    pub fn corner_count(&self) -> usize {
        (0..self.categories().len())
            .map(|c| self.levels(c).len())
            .fold(1usize, |acc, n| acc.saturating_mul(n))
    }

    /// Materialize the full corner grid.
    pub fn evaluate_corners_wide(&self, statistic: Statistic) -> SurfaceResult<CornerGrid> {
        self.evaluate_corners_limited(statistic, usize::MAX)
    }

    /// Materialize the corner grid, refusing grids with more than `limit`
    /// corners.
    ///
    /// # Errors
    /// [`SurfaceError::CornerGridTooLarge`] when the grid exceeds `limit`.
    pub fn evaluate_corners_limited(
        &self, statistic: Statistic, limit: usize,
    ) -> SurfaceResult<CornerGrid> {
        let corners = self.corner_count();
        if corners > limit {
            return Err(SurfaceError::CornerGridTooLarge { corners, limit });
        }
        let n_cat = self.categories().len();
        let mut amounts = Array2::zeros((corners, n_cat));
        let mut values = Array2::zeros((corners, self.metrics().len()));
        let mut digits = vec![0usize; n_cat];

        for row in 0..corners {
            let mut corner = Array1::zeros(n_cat);
            for (c, &d) in digits.iter().enumerate() {
                corner[c] = self.levels(c)[d];
            }
            let reduced = self.evaluate_statistic_vector(corner.view(), statistic)?;
            amounts.row_mut(row).assign(&corner);
            values.row_mut(row).assign(&reduced);
            advance(&mut digits, |c| self.levels(c).len());
        }

        Ok(CornerGrid {
            categories: self.categories().to_vec(),
            metrics: self.metrics().to_vec(),
            statistic,
            amounts,
            values,
        })
    }
}

/// Odometer increment with the last position varying fastest.
fn advance(digits: &mut [usize], radix: impl Fn(usize) -> usize) {
    for pos in (0..digits.len()).rev() {
        digits[pos] += 1;
        if digits[pos] < radix(pos) {
            return;
        }
        digits[pos] = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::observation::{Observation, SampleTable};
    use approx::assert_relative_eq;
    use ndarray::array;

    fn grid_table() -> SampleTable {
        let rows = vec![
            Observation::new("A", 0.0, 1, "M", 0.0, ""),
            Observation::new("A", 100.0, 1, "M", 10.0, ""),
            Observation::new("B", 0.0, 1, "M", 0.0, ""),
            Observation::new("B", 50.0, 1, "M", 4.0, ""),
            Observation::new("B", 100.0, 1, "M", 5.0, ""),
        ];
        SampleTable::new(rows).unwrap()
    }

    #[test]
    // Purpose
    // -------
    // The grid enumerates every level combination in lexicographic order
    // and stores the exact summed values at each corner.
    //
    // Expect
    // ------
    // - 2 × 3 = 6 corners, B varying fastest.
    // - M at (100, 50) = 10 + 4.
    fn corner_grid_enumerates_cartesian_product() {
        let ev = Evaluator::new(&grid_table()).unwrap();
        let grid = ev.evaluate_corners_wide(Statistic::Mean).unwrap();

        assert_eq!(ev.corner_count(), 6);
        assert_eq!(grid.len(), 6);
        assert_eq!(
            grid.amounts,
            array![[0.0, 0.0], [0.0, 50.0], [0.0, 100.0], [100.0, 0.0], [100.0, 50.0], [100.0, 100.0]]
        );
        let m = grid.metric_column("M").unwrap();
        assert_relative_eq!(m[4], 14.0);
        assert_relative_eq!(m[5], 15.0);
        assert_relative_eq!(grid.allocation(4)["B"], 50.0);
        assert_relative_eq!(grid.metric_values(2)["M"], 5.0);
    }

    #[test]
    fn corner_grid_respects_limit() {
        let ev = Evaluator::new(&grid_table()).unwrap();
        assert_eq!(
            ev.evaluate_corners_limited(Statistic::Mean, 5).unwrap_err(),
            SurfaceError::CornerGridTooLarge { corners: 6, limit: 5 }
        );
    }

    #[test]
    fn unknown_metric_column_is_an_error() {
        let ev = Evaluator::new(&grid_table()).unwrap();
        let grid = ev.evaluate_corners_wide(Statistic::Mean).unwrap();
        assert!(matches!(grid.metric_column("X"), Err(SurfaceError::UnknownMetric { .. })));
    }
}
