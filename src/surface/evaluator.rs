//! surface::evaluator — response surfaces fit from sampled tranche outcomes.
//!
//! Purpose
//! -------
//! Turn the discrete [`SampleTable`] into continuous response surfaces and
//! evaluate arbitrary allocations against them. One [`LinearInterpolator`]
//! is fit per `(category, metric, sample)` key; outcomes of independent
//! categories add, and a [`Statistic`] collapses the sample dimension.
//!
//! Key behaviors
//! -------------
//! - [`Evaluator::new`] derives the category, metric, and sample label sets,
//!   metric units, per-category maximum observed amounts, and per-metric
//!   values at the all-minimum and all-maximum allocations.
//! - [`Evaluator::evaluate`] returns every interpolated value indexed by
//!   `(metric, sample, category)`.
//! - [`Evaluator::evaluate_statistic`] sums across categories per
//!   `(metric, sample)` and then applies the statistic across samples.
//! - [`Evaluator::make_statistic_evaluator`] applies the statistic across
//!   samples first, per `(category, amount, metric)`, and interpolates the
//!   reduced values. For a non-linear statistic this order can disagree
//!   with [`Evaluator::evaluate_statistic`]; both orders are kept.
//!
//! Invariants & assumptions
//! ------------------------
//! - Label sets are fixed at construction and stored sorted, so vector
//!   positions are stable for the lifetime of the evaluator.
//! - Interpolators are read-only after construction; `&Evaluator` can be
//!   shared across threads for concurrent evaluation.
//! - A key missing from the sample table (e.g. a category never reporting
//!   some metric) contributes `0` to the category sum.
//!
//! Conventions
//! -----------
//! - Map-based entry points ([`Allocation`]) validate names and signs and
//!   treat missing categories as a zero amount.
//! - Vector entry points (`*_vector`) are the solver path: positions follow
//!   [`Evaluator::categories`], only the length is checked, and negative
//!   evaluations (e.g. finite differences around zero) are extrapolated.
use std::collections::{BTreeMap, BTreeSet, HashMap};

use ndarray::{Array1, Array3, ArrayView1, Axis};
use tracing::debug;

use crate::surface::{
    errors::{SurfaceError, SurfaceResult},
    interpolator::LinearInterpolator,
    observation::SampleTable,
    statistic::Statistic,
};

/// Amount invested per category.
pub type Allocation = BTreeMap<String, f64>;

/// Composite key `(category, metric, sample)` as positions into the
/// evaluator's sorted label sets.
pub type SurfaceKey = (usize, usize, usize);

/// Response-surface evaluator over a fixed sample table.
#[derive(Debug, Clone)]
pub struct Evaluator {
    categories: Vec<String>,
    metrics: Vec<String>,
    samples: Vec<u32>,
    units: BTreeMap<String, String>,
    levels: Vec<Vec<f64>>,
    max_amount: Array1<f64>,
    min_metric: Array1<f64>,
    max_metric: Array1<f64>,
    interpolators: HashMap<SurfaceKey, LinearInterpolator>,
}

/// Interpolated values of one allocation, indexed `[metric, sample, category]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub metrics: Vec<String>,
    pub samples: Vec<u32>,
    pub categories: Vec<String>,
    pub values: Array3<f64>,
}

impl Evaluation {
    /// Look up one value by labels.
    ///
    /// # Errors
    /// Unknown metric, sample, or category labels are reported as lookup
    /// errors; an unknown sample is reported as [`SurfaceError::InvalidSample`].
    pub fn get(&self, metric: &str, sample: u32, category: &str) -> SurfaceResult<f64> {
        let m = position(&self.metrics, metric)
            .ok_or_else(|| SurfaceError::UnknownMetric { name: metric.to_string() })?;
        let s = self
            .samples
            .iter()
            .position(|&x| x == sample)
            .ok_or(SurfaceError::InvalidSample { sample })?;
        let c = position(&self.categories, category)
            .ok_or_else(|| SurfaceError::UnknownCategory { name: category.to_string() })?;
        Ok(self.values[[m, s, c]])
    }

    /// Reduce to one scalar per metric: sum over categories, then apply
    /// `statistic` across samples.
    pub fn reduce(&self, statistic: Statistic) -> Array1<f64> {
        let totals = self.values.sum_axis(Axis(2));
        totals.rows().into_iter().map(|row| statistic.apply(&row.to_vec())).collect()
    }
}

impl Evaluator {
    /// Build every per-key interpolator from `table`.
    ///
    /// # Errors
    /// [`SurfaceError::ConflictingUnits`] when a metric carries two
    /// different non-empty unit labels.
    pub fn new(table: &SampleTable) -> SurfaceResult<Self> {
        let rows = table.rows();
        let categories: Vec<String> =
            rows.iter().map(|r| r.category.clone()).collect::<BTreeSet<_>>().into_iter().collect();
        let metrics: Vec<String> =
            rows.iter().map(|r| r.metric.clone()).collect::<BTreeSet<_>>().into_iter().collect();
        let samples: Vec<u32> =
            rows.iter().map(|r| r.sample).collect::<BTreeSet<_>>().into_iter().collect();

        let mut units: BTreeMap<String, String> =
            metrics.iter().map(|m| (m.clone(), String::new())).collect();
        let mut nodes: HashMap<SurfaceKey, Vec<(f64, f64)>> = HashMap::new();
        let mut level_sets: Vec<BTreeSet<OrderedAmount>> = vec![BTreeSet::new(); categories.len()];

        for row in rows {
            let c = position(&categories, &row.category)
                .ok_or_else(|| SurfaceError::UnknownCategory { name: row.category.clone() })?;
            let m = position(&metrics, &row.metric)
                .ok_or_else(|| SurfaceError::UnknownMetric { name: row.metric.clone() })?;
            let s = samples.binary_search(&row.sample).map_err(|_| SurfaceError::InvalidSample {
                sample: row.sample,
            })?;
            nodes.entry((c, m, s)).or_default().push((row.amount, row.value));
            level_sets[c].insert(OrderedAmount(row.amount));

            if !row.units.is_empty() {
                if let Some(existing) = units.get_mut(&row.metric) {
                    if existing.is_empty() {
                        *existing = row.units.clone();
                    } else if *existing != row.units {
                        return Err(SurfaceError::ConflictingUnits {
                            metric: row.metric.clone(),
                            first: existing.clone(),
                            second: row.units.clone(),
                        });
                    }
                }
            }
        }

        let interpolators: HashMap<SurfaceKey, LinearInterpolator> =
            nodes.into_iter().map(|(key, pts)| (key, LinearInterpolator::fit(&pts))).collect();
        let levels: Vec<Vec<f64>> =
            level_sets.into_iter().map(|set| set.into_iter().map(|a| a.0).collect()).collect();
        let min_amount: Array1<f64> =
            levels.iter().map(|l| l.first().copied().unwrap_or(0.0)).collect();
        let max_amount: Array1<f64> =
            levels.iter().map(|l| l.last().copied().unwrap_or(0.0)).collect();

        let mut evaluator = Self {
            categories,
            metrics,
            samples,
            units,
            levels,
            max_amount,
            min_metric: Array1::zeros(0),
            max_metric: Array1::zeros(0),
            interpolators,
        };
        evaluator.min_metric = evaluator.evaluate_statistic_vector(min_amount.view(), Statistic::Mean)?;
        evaluator.max_metric =
            evaluator.evaluate_statistic_vector(evaluator.max_amount.view(), Statistic::Mean)?;

        debug!(
            categories = evaluator.categories.len(),
            metrics = evaluator.metrics.len(),
            samples = evaluator.samples.len(),
            interpolators = evaluator.interpolators.len(),
            "built response-surface evaluator"
        );
        Ok(evaluator)
    }

    // ---- Label sets ----

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub fn metrics(&self) -> &[String] {
        &self.metrics
    }

    pub fn samples(&self) -> &[u32] {
        &self.samples
    }

    /// Unit label of `metric` (empty when the table carried none).
    pub fn units(&self, metric: &str) -> SurfaceResult<&str> {
        self.units
            .get(metric)
            .map(String::as_str)
            .ok_or_else(|| SurfaceError::UnknownMetric { name: metric.to_string() })
    }

    pub fn category_index(&self, name: &str) -> SurfaceResult<usize> {
        position(&self.categories, name)
            .ok_or_else(|| SurfaceError::UnknownCategory { name: name.to_string() })
    }

    pub fn metric_index(&self, name: &str) -> SurfaceResult<usize> {
        position(&self.metrics, name)
            .ok_or_else(|| SurfaceError::UnknownMetric { name: name.to_string() })
    }

    /// Distinct observed amounts of the category at position `category`,
    /// ascending.
    pub fn levels(&self, category: usize) -> &[f64] {
        self.levels.get(category).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Maximum observed amount per category.
    pub fn max_amount(&self) -> Allocation {
        self.to_allocation(self.max_amount.view())
    }

    pub fn max_amount_vector(&self) -> ArrayView1<'_, f64> {
        self.max_amount.view()
    }

    /// Mean of each metric with every category at its minimum observed amount.
    pub fn min_metric(&self) -> BTreeMap<String, f64> {
        self.to_metric_map(self.min_metric.view())
    }

    /// Mean of each metric with every category at its maximum observed amount.
    pub fn max_metric(&self) -> BTreeMap<String, f64> {
        self.to_metric_map(self.max_metric.view())
    }

    // ---- Evaluation ----

    /// Interpolated value of every `(metric, sample, category)` key.
    ///
    /// # Errors
    /// Unknown category names or negative/non-finite amounts in `allocation`.
    pub fn evaluate(&self, allocation: &Allocation) -> SurfaceResult<Evaluation> {
        let x = allocation_vector(&self.categories, allocation)?;
        self.evaluate_vector(x.view())
    }

    /// Solver-path variant of [`evaluate`](Self::evaluate).
    pub fn evaluate_vector(&self, amounts: ArrayView1<'_, f64>) -> SurfaceResult<Evaluation> {
        self.check_dimension(amounts.len())?;
        let shape = (self.metrics.len(), self.samples.len(), self.categories.len());
        let values = Array3::from_shape_fn(shape, |(m, s, c)| {
            self.interpolators.get(&(c, m, s)).map_or(0.0, |f| f.eval(amounts[c]))
        });
        Ok(Evaluation {
            metrics: self.metrics.clone(),
            samples: self.samples.clone(),
            categories: self.categories.clone(),
            values,
        })
    }

    /// Sum across categories, then reduce samples with `statistic`.
    pub fn evaluate_statistic(
        &self, allocation: &Allocation, statistic: Statistic,
    ) -> SurfaceResult<BTreeMap<String, f64>> {
        let x = allocation_vector(&self.categories, allocation)?;
        let reduced = self.evaluate_statistic_vector(x.view(), statistic)?;
        Ok(self.to_metric_map(reduced.view()))
    }

    /// Solver-path variant of [`evaluate_statistic`](Self::evaluate_statistic);
    /// entries follow [`metrics`](Self::metrics).
    pub fn evaluate_statistic_vector(
        &self, amounts: ArrayView1<'_, f64>, statistic: Statistic,
    ) -> SurfaceResult<Array1<f64>> {
        self.check_dimension(amounts.len())?;
        let mut totals = vec![0.0; self.samples.len()];
        let mut reduced = Array1::zeros(self.metrics.len());
        for (m, out) in reduced.iter_mut().enumerate() {
            totals.iter_mut().for_each(|t| *t = 0.0);
            for (s, total) in totals.iter_mut().enumerate() {
                for (c, &x) in amounts.iter().enumerate() {
                    if let Some(f) = self.interpolators.get(&(c, m, s)) {
                        *total += f.eval(x);
                    }
                }
            }
            *out = statistic.apply(&totals);
        }
        Ok(reduced)
    }

    /// Reduce samples per `(category, amount, metric)` first, then fit one
    /// interpolator per `(category, metric)`.
    ///
    /// Matches [`evaluate_statistic`](Self::evaluate_statistic) exactly only
    /// for linear statistics.
    pub fn make_statistic_evaluator(&self, statistic: Statistic) -> StatisticSurface {
        let mut interpolators = HashMap::new();
        for c in 0..self.categories.len() {
            for m in 0..self.metrics.len() {
                // Every sample takes part at every level: a missing key counts
                // as 0 and a missing node is read off that sample's curve, as
                // on the sample-first path.
                let points: Vec<(f64, f64)> = self.levels[c]
                    .iter()
                    .map(|&amount| {
                        let across_samples: Vec<f64> = (0..self.samples.len())
                            .map(|s| {
                                self.interpolators.get(&(c, m, s)).map_or(0.0, |f| {
                                    node_value(f, amount).unwrap_or_else(|| f.eval(amount))
                                })
                            })
                            .collect();
                        (amount, statistic.apply(&across_samples))
                    })
                    .collect();
                if !points.is_empty() {
                    interpolators.insert((c, m), LinearInterpolator::fit(&points));
                }
            }
        }
        StatisticSurface {
            categories: self.categories.clone(),
            metrics: self.metrics.clone(),
            statistic,
            interpolators,
        }
    }

    // ---- Helpers ----

    pub(crate) fn check_dimension(&self, found: usize) -> SurfaceResult<()> {
        if found != self.categories.len() {
            return Err(SurfaceError::DimensionMismatch { expected: self.categories.len(), found });
        }
        Ok(())
    }

    /// Validate a map-based allocation into a vector in category order.
    pub fn allocation_vector(&self, allocation: &Allocation) -> SurfaceResult<Array1<f64>> {
        allocation_vector(&self.categories, allocation)
    }

    pub fn to_allocation(&self, amounts: ArrayView1<'_, f64>) -> Allocation {
        self.categories.iter().cloned().zip(amounts.iter().copied()).collect()
    }

    pub fn to_metric_map(&self, values: ArrayView1<'_, f64>) -> BTreeMap<String, f64> {
        self.metrics.iter().cloned().zip(values.iter().copied()).collect()
    }
}

/// Statistic-first response surface returned by
/// [`Evaluator::make_statistic_evaluator`].
#[derive(Debug, Clone)]
pub struct StatisticSurface {
    categories: Vec<String>,
    metrics: Vec<String>,
    statistic: Statistic,
    interpolators: HashMap<(usize, usize), LinearInterpolator>,
}

impl StatisticSurface {
    pub fn statistic(&self) -> Statistic {
        self.statistic
    }

    /// One reduced value per metric for `allocation`.
    pub fn evaluate(&self, allocation: &Allocation) -> SurfaceResult<BTreeMap<String, f64>> {
        let x = allocation_vector(&self.categories, allocation)?;
        let reduced = self.evaluate_vector(x.view())?;
        Ok(self.metrics.iter().cloned().zip(reduced.iter().copied()).collect())
    }

    /// Solver-path variant of [`evaluate`](Self::evaluate).
    pub fn evaluate_vector(&self, amounts: ArrayView1<'_, f64>) -> SurfaceResult<Array1<f64>> {
        if amounts.len() != self.categories.len() {
            return Err(SurfaceError::DimensionMismatch {
                expected: self.categories.len(),
                found: amounts.len(),
            });
        }
        Ok((0..self.metrics.len())
            .map(|m| {
                amounts
                    .iter()
                    .enumerate()
                    .filter_map(|(c, &x)| self.interpolators.get(&(c, m)).map(|f| f.eval(x)))
                    .sum()
            })
            .collect())
    }
}

// ---- Module helpers ----

/// Total order over validated (finite) amounts for level sets.
#[derive(Debug, Clone, Copy, PartialEq)]
struct OrderedAmount(f64);

impl Eq for OrderedAmount {}

impl PartialOrd for OrderedAmount {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedAmount {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

fn position(labels: &[String], name: &str) -> Option<usize> {
    labels.binary_search_by(|label| label.as_str().cmp(name)).ok()
}

fn node_value(f: &LinearInterpolator, amount: f64) -> Option<f64> {
    f.nodes().iter().position(|&x| x == amount).map(|i| f.values()[i])
}

pub(crate) fn allocation_vector(
    categories: &[String], allocation: &Allocation,
) -> SurfaceResult<Array1<f64>> {
    let mut x = Array1::zeros(categories.len());
    for (name, &amount) in allocation {
        let c = position(categories, name)
            .ok_or_else(|| SurfaceError::UnknownCategory { name: name.clone() })?;
        if !amount.is_finite() || amount < 0.0 {
            return Err(SurfaceError::InvalidAmount {
                category: name.clone(),
                value: amount,
                reason: "Allocated amounts must be finite and non-negative.",
            });
        }
        x[c] = amount;
    }
    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::observation::Observation;
    use approx::assert_relative_eq;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover:
    // - Label, unit, and range derivation at construction.
    // - Exactness at nodes and linear extrapolation through `evaluate`.
    // - Agreement of both aggregation orders for the mean and their
    //   divergence for the standard deviation.
    // - Lookup errors for unknown categories and metrics.
    //
    // Corner-grid materialization is covered in `surface::corners`.
    // -------------------------------------------------------------------------

    /// Two categories, two samples, one metric "M".
    ///
    /// - A: amounts [0, 100]; sample 1 → [0, 10], sample 2 → [2, 14].
    /// - B: amounts [0, 50, 100]; sample 1 → [0, 8, 5] (non-monotonic),
    ///   sample 2 → [0, 4, 9].
    fn two_sample_table() -> SampleTable {
        let rows = vec![
            Observation::new("A", 0.0, 1, "M", 0.0, "t"),
            Observation::new("A", 100.0, 1, "M", 10.0, "t"),
            Observation::new("A", 0.0, 2, "M", 2.0, "t"),
            Observation::new("A", 100.0, 2, "M", 14.0, "t"),
            Observation::new("B", 0.0, 1, "M", 0.0, ""),
            Observation::new("B", 50.0, 1, "M", 8.0, ""),
            Observation::new("B", 100.0, 1, "M", 5.0, ""),
            Observation::new("B", 0.0, 2, "M", 0.0, "t"),
            Observation::new("B", 50.0, 2, "M", 4.0, "t"),
            Observation::new("B", 100.0, 2, "M", 9.0, "t"),
        ];
        SampleTable::new(rows).expect("fixture rows are valid")
    }

    fn alloc(a: f64, b: f64) -> Allocation {
        Allocation::from([("A".to_string(), a), ("B".to_string(), b)])
    }

    #[test]
    fn construction_derives_labels_units_and_ranges() {
        let ev = Evaluator::new(&two_sample_table()).expect("evaluator should build");

        assert_eq!(ev.categories(), &["A".to_string(), "B".to_string()]);
        assert_eq!(ev.metrics(), &["M".to_string()]);
        assert_eq!(ev.samples(), &[1, 2]);
        assert_eq!(ev.units("M"), Ok("t"));
        assert_eq!(ev.levels(1), &[0.0, 50.0, 100.0]);
        assert_relative_eq!(ev.max_amount()["A"], 100.0);
        assert_relative_eq!(ev.max_amount()["B"], 100.0);
        // At zero: mean over samples of (0 + 0, 2 + 0) = 1.
        assert_relative_eq!(ev.min_metric()["M"], 1.0);
        // At max: mean of (10 + 5, 14 + 9) = 19.
        assert_relative_eq!(ev.max_metric()["M"], 19.0);
    }

    #[test]
    // Purpose
    // -------
    // `evaluate` must reproduce every observed value at observed amounts,
    // including the non-monotonic interior node of B.
    fn evaluate_is_exact_at_observed_amounts() {
        let ev = Evaluator::new(&two_sample_table()).expect("evaluator should build");
        let out = ev.evaluate(&alloc(100.0, 50.0)).expect("evaluate should succeed");

        assert_relative_eq!(out.get("M", 1, "A").unwrap(), 10.0);
        assert_relative_eq!(out.get("M", 2, "A").unwrap(), 14.0);
        assert_relative_eq!(out.get("M", 1, "B").unwrap(), 8.0);
        assert_relative_eq!(out.get("M", 2, "B").unwrap(), 4.0);
    }

    #[test]
    fn evaluate_extrapolates_beyond_observed_range() {
        let ev = Evaluator::new(&two_sample_table()).expect("evaluator should build");
        let out = ev.evaluate(&alloc(150.0, 0.0)).expect("evaluate should succeed");
        assert_relative_eq!(out.get("M", 1, "A").unwrap(), 15.0);
        assert_relative_eq!(out.get("M", 2, "A").unwrap(), 20.0);
    }

    #[test]
    fn evaluate_statistic_sums_categories_before_reducing() {
        let ev = Evaluator::new(&two_sample_table()).expect("evaluator should build");
        // Totals per sample at (100, 50): s1 = 18, s2 = 18.
        let mean = ev.evaluate_statistic(&alloc(100.0, 50.0), Statistic::Mean).unwrap();
        let std = ev.evaluate_statistic(&alloc(100.0, 50.0), Statistic::StdDev).unwrap();
        assert_relative_eq!(mean["M"], 18.0);
        assert_relative_eq!(std["M"], 0.0);
    }

    #[test]
    // Purpose
    // -------
    // The mean is linear, so reducing before or after interpolation must
    // agree everywhere, including between and beyond nodes.
    fn mean_agrees_across_aggregation_orders() {
        let ev = Evaluator::new(&two_sample_table()).expect("evaluator should build");
        let surface = ev.make_statistic_evaluator(Statistic::Mean);
        for &(a, b) in &[(0.0, 0.0), (30.0, 75.0), (100.0, 50.0), (120.0, 10.0)] {
            let direct = ev.evaluate_statistic(&alloc(a, b), Statistic::Mean).unwrap();
            let reduced_first = surface.evaluate(&alloc(a, b)).unwrap();
            assert_relative_eq!(direct["M"], reduced_first["M"], epsilon = 1e-12);
        }
    }

    #[test]
    // Purpose
    // -------
    // The standard deviation is not linear: summing categories before
    // reducing lets their per-sample deviations cancel, while reducing first
    // adds the per-category spreads.
    //
    // Given
    // -----
    // - Allocation (100, 50): A per sample (10, 14), B per sample (8, 4).
    //
    // Expect
    // ------
    // - Sample-first: totals (18, 18) → std 0.
    // - Statistic-first: std_A = 2, std_B = 2 → 4.
    fn std_dev_diverges_across_aggregation_orders() {
        let ev = Evaluator::new(&two_sample_table()).expect("evaluator should build");
        let surface = ev.make_statistic_evaluator(Statistic::StdDev);

        let direct = ev.evaluate_statistic(&alloc(100.0, 50.0), Statistic::StdDev).unwrap();
        let reduced_first = surface.evaluate(&alloc(100.0, 50.0)).unwrap();

        assert_relative_eq!(direct["M"], 0.0, epsilon = 1e-12);
        assert_relative_eq!(reduced_first["M"], 4.0, epsilon = 1e-12);
    }

    #[test]
    // Purpose
    // -------
    // Upper quantiles are not linear either: the per-sample totals tie, while
    // reducing first picks each category's upper sample.
    //
    // Given
    // -----
    // - Allocation (100, 50): A per sample (10, 14), B per sample (8, 4).
    //
    // Expect
    // ------
    // - Sample-first: totals (18, 18) → q90 = 18.
    // - Statistic-first: q90_A = 14, q90_B = 8 → 22.
    fn upper_quantile_diverges_across_aggregation_orders() {
        let ev = Evaluator::new(&two_sample_table()).expect("evaluator should build");
        let q90 = Statistic::quantile(0.9).expect("0.9 is a valid level");
        let surface = ev.make_statistic_evaluator(q90);

        let direct = ev.evaluate_statistic(&alloc(100.0, 50.0), q90).unwrap();
        let reduced_first = surface.evaluate(&alloc(100.0, 50.0)).unwrap();

        assert_relative_eq!(direct["M"], 18.0, epsilon = 1e-12);
        assert_relative_eq!(reduced_first["M"], 22.0, epsilon = 1e-12);
    }

    #[test]
    // Purpose
    // -------
    // With two samples the median is the mean, so both orders must still
    // agree at every allocation.
    fn two_sample_median_agrees_across_aggregation_orders() {
        let ev = Evaluator::new(&two_sample_table()).expect("evaluator should build");
        let surface = ev.make_statistic_evaluator(Statistic::Median);
        for &(a, b) in &[(0.0, 0.0), (100.0, 50.0), (40.0, 80.0)] {
            let direct = ev.evaluate_statistic(&alloc(a, b), Statistic::Median).unwrap();
            let reduced_first = surface.evaluate(&alloc(a, b)).unwrap();
            assert_relative_eq!(direct["M"], reduced_first["M"], epsilon = 1e-9);
        }
    }

    #[test]
    // Purpose
    // -------
    // The mean must agree across orders even when keys are uneven: a
    // category missing a sample contributes 0 for it, and a sample missing
    // an amount level is read off its own curve.
    //
    // Given
    // -----
    // - A: samples 1 and 2 at [0, 100] → [0, 10].
    // - B: sample 1 only at [0, 100] → [0, 6].
    // - C: sample 1 at [0, 50, 100] → [0, 4, 6]; sample 2 at [0, 100] → [0, 10].
    //
    // Expect
    // ------
    // - (A=0, B=100, C=0): totals (6, 0) → mean 3 on both paths.
    // - (A=0, B=0, C=50): totals (4, 5) → mean 4.5 on both paths.
    fn mean_agrees_across_orders_with_uneven_samples() {
        let rows = vec![
            Observation::new("A", 0.0, 1, "M", 0.0, ""),
            Observation::new("A", 100.0, 1, "M", 10.0, ""),
            Observation::new("A", 0.0, 2, "M", 0.0, ""),
            Observation::new("A", 100.0, 2, "M", 10.0, ""),
            Observation::new("B", 0.0, 1, "M", 0.0, ""),
            Observation::new("B", 100.0, 1, "M", 6.0, ""),
            Observation::new("C", 0.0, 1, "M", 0.0, ""),
            Observation::new("C", 50.0, 1, "M", 4.0, ""),
            Observation::new("C", 100.0, 1, "M", 6.0, ""),
            Observation::new("C", 0.0, 2, "M", 0.0, ""),
            Observation::new("C", 100.0, 2, "M", 10.0, ""),
        ];
        let ev = Evaluator::new(&SampleTable::new(rows).unwrap()).expect("evaluator should build");
        let surface = ev.make_statistic_evaluator(Statistic::Mean);
        let at = |a: f64, b: f64, c: f64| {
            Allocation::from([("A".to_string(), a), ("B".to_string(), b), ("C".to_string(), c)])
        };

        let direct = ev.evaluate_statistic(&at(0.0, 100.0, 0.0), Statistic::Mean).unwrap();
        let reduced_first = surface.evaluate(&at(0.0, 100.0, 0.0)).unwrap();
        assert_relative_eq!(direct["M"], 3.0, epsilon = 1e-12);
        assert_relative_eq!(reduced_first["M"], 3.0, epsilon = 1e-12);

        let direct = ev.evaluate_statistic(&at(0.0, 0.0, 50.0), Statistic::Mean).unwrap();
        let reduced_first = surface.evaluate(&at(0.0, 0.0, 50.0)).unwrap();
        assert_relative_eq!(direct["M"], 4.5, epsilon = 1e-12);
        assert_relative_eq!(reduced_first["M"], 4.5, epsilon = 1e-12);

        for &(a, b, c) in &[(30.0, 70.0, 20.0), (100.0, 0.0, 75.0), (120.0, 110.0, 130.0)] {
            let direct = ev.evaluate_statistic(&at(a, b, c), Statistic::Mean).unwrap();
            let reduced_first = surface.evaluate(&at(a, b, c)).unwrap();
            assert_relative_eq!(direct["M"], reduced_first["M"], epsilon = 1e-9);
        }
    }

    #[test]
    fn unknown_names_fail_with_lookup_errors() {
        let ev = Evaluator::new(&two_sample_table()).expect("evaluator should build");
        let mut bad = alloc(1.0, 1.0);
        bad.insert("C".to_string(), 1.0);

        assert_eq!(
            ev.evaluate(&bad).unwrap_err(),
            SurfaceError::UnknownCategory { name: "C".to_string() }
        );
        assert_eq!(
            ev.metric_index("LCOE").unwrap_err(),
            SurfaceError::UnknownMetric { name: "LCOE".to_string() }
        );
        assert!(matches!(ev.units("LCOE"), Err(SurfaceError::UnknownMetric { .. })));
    }

    #[test]
    fn negative_amounts_are_rejected_on_the_map_path() {
        let ev = Evaluator::new(&two_sample_table()).expect("evaluator should build");
        assert!(matches!(
            ev.evaluate(&alloc(-1.0, 0.0)),
            Err(SurfaceError::InvalidAmount { .. })
        ));
    }

    #[test]
    fn missing_categories_count_as_zero() {
        let ev = Evaluator::new(&two_sample_table()).expect("evaluator should build");
        let only_a = Allocation::from([("A".to_string(), 100.0)]);
        let stat = ev.evaluate_statistic(&only_a, Statistic::Mean).unwrap();
        let explicit = ev.evaluate_statistic(&alloc(100.0, 0.0), Statistic::Mean).unwrap();
        assert_relative_eq!(stat["M"], explicit["M"]);
    }

    #[test]
    fn conflicting_units_are_a_setup_error() {
        let rows = vec![
            Observation::new("A", 0.0, 1, "M", 0.0, "kg"),
            Observation::new("A", 1.0, 1, "M", 1.0, "t"),
        ];
        let table = SampleTable::new(rows).unwrap();
        assert!(matches!(Evaluator::new(&table), Err(SurfaceError::ConflictingUnits { .. })));
    }

    #[test]
    // Purpose
    // -------
    // A category observed only at zero is a constant surface; evaluation at
    // positive amounts must return that constant rather than fail.
    fn degenerate_single_amount_category_is_constant() {
        let rows = vec![
            Observation::new("A", 0.0, 1, "M", 3.0, ""),
            Observation::new("B", 0.0, 1, "M", 1.0, ""),
            Observation::new("B", 10.0, 1, "M", 2.0, ""),
        ];
        let ev = Evaluator::new(&SampleTable::new(rows).unwrap()).unwrap();
        let stat = ev.evaluate_statistic(&alloc(500.0, 10.0), Statistic::Mean).unwrap();
        assert_relative_eq!(stat["M"], 5.0);
        assert_relative_eq!(ev.max_amount()["A"], 0.0);
    }

    #[test]
    fn vector_path_checks_dimension() {
        let ev = Evaluator::new(&two_sample_table()).expect("evaluator should build");
        let x = Array1::from(vec![1.0, 2.0, 3.0]);
        assert_eq!(
            ev.evaluate_vector(x.view()).unwrap_err(),
            SurfaceError::DimensionMismatch { expected: 2, found: 3 }
        );
    }
}
