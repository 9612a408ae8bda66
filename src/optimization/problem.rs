//! optimization::problem — the one objective/constraint formulation every
//! strategy shares.
//!
//! Purpose
//! -------
//! Turn a caller's [`OptimizationRequest`] into an [`AllocationProblem`]:
//! scaled box bounds, an optional budget, metric floors, and an objective
//! that maximizes the statistic-reduced target metric. The problem is built
//! once per call and handed, unchanged, to whichever strategy is selected.
//!
//! Key behaviors
//! -------------
//! - Resolve every metric/category name eagerly; unknown names are setup
//!   errors, never silent defaults.
//! - Evaluate all metrics in one pass per point with the requested
//!   [`AggregationOrder`].
//! - Express constraints in `g(x) ≥ 0` form, each with a normalizer so that
//!   violations of differently-scaled constraints are comparable.
//!
//! Invariants & assumptions
//! ------------------------
//! - Decision vectors are in scaled space: `x = amount / scale`.
//! - Lower bounds are always zero; upper bounds are the per-category caps
//!   (observed maximum unless overridden), scaled.
//! - Constraint order: budget (if any) first, then floors in metric order.
//!
//! Conventions
//! -----------
//! - `objective(x)` is the *cost*: the negated target value.
//! - `violation(x)` is the sum of normalized constraint shortfalls plus any
//!   bound excursions; `≤ FEASIBILITY_TOL` counts as feasible.
use std::{collections::BTreeMap, time::Instant};

use ndarray::Array1;

use crate::{
    optimization::{
        errors::{OptError, OptResult},
        traits::{ExitStatus, Optimum},
        types::{Vector, FEASIBILITY_TOL},
    },
    surface::{Allocation, Evaluator, Statistic, StatisticSurface},
};

/// Which evaluator path the objective and constraints go through.
///
/// - `SampleFirst`: sum categories per sample, then reduce samples
///   (`Evaluator::evaluate_statistic`).
/// - `StatisticFirst`: reduce samples per tranche, interpolate, then sum
///   categories (`Evaluator::make_statistic_evaluator`).
///
/// The two agree for the mean only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AggregationOrder {
    #[default]
    SampleFirst,
    StatisticFirst,
}

/// Caller-supplied configuration for one optimization call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OptimizationRequest {
    /// Metric to maximize.
    pub target: String,
    /// Upper bound on the sum of amounts.
    pub total_amount: Option<f64>,
    /// Per-category caps overriding the observed maxima.
    pub max_amount: Option<Allocation>,
    /// Floors on statistic-reduced metric values.
    pub min_metric: Option<BTreeMap<String, f64>>,
    pub statistic: Statistic,
    pub aggregation: AggregationOrder,
    /// Starting point for the local strategy (missing categories start at 0).
    pub initial: Option<Allocation>,
}

impl OptimizationRequest {
    pub fn new(target: impl Into<String>) -> Self {
        Self { target: target.into(), ..Self::default() }
    }

    pub fn with_total_amount(mut self, total: f64) -> Self {
        self.total_amount = Some(total);
        self
    }

    pub fn with_max_amount(mut self, caps: Allocation) -> Self {
        self.max_amount = Some(caps);
        self
    }

    pub fn with_min_metric(mut self, floors: BTreeMap<String, f64>) -> Self {
        self.min_metric = Some(floors);
        self
    }

    pub fn with_statistic(mut self, statistic: Statistic) -> Self {
        self.statistic = statistic;
        self
    }

    pub fn with_aggregation(mut self, aggregation: AggregationOrder) -> Self {
        self.aggregation = aggregation;
        self
    }

    pub fn with_initial(mut self, initial: Allocation) -> Self {
        self.initial = Some(initial);
        self
    }
}

/// Shared objective, constraints, and bounds of one optimization call.
#[derive(Debug, Clone)]
pub struct AllocationProblem<'a> {
    evaluator: &'a Evaluator,
    surface: Option<StatisticSurface>,
    statistic: Statistic,
    aggregation: AggregationOrder,
    scale: f64,
    target: usize,
    lower: Vector,
    upper: Vector,
    budget: Option<f64>,
    floors: Vec<(usize, f64)>,
    normalizers: Vector,
    initial: Vector,
}

impl<'a> AllocationProblem<'a> {
    /// Build the shared formulation.
    ///
    /// # Errors
    /// - [`OptError::InvalidScale`] for a non-positive or non-finite scale.
    /// - [`OptError::Surface`] for unknown metric or category names and
    ///   invalid initial amounts.
    /// - [`OptError::InvalidBudget`], [`OptError::InvalidCap`],
    ///   [`OptError::InvalidFloor`] for non-finite or negative limits.
    pub fn new(
        evaluator: &'a Evaluator, request: &OptimizationRequest, scale: f64,
    ) -> OptResult<Self> {
        if !scale.is_finite() || scale <= 0.0 {
            return Err(OptError::InvalidScale { scale });
        }
        let target = evaluator.metric_index(&request.target)?;

        let budget = match request.total_amount {
            Some(value) if !value.is_finite() || value < 0.0 => {
                return Err(OptError::InvalidBudget { value });
            }
            Some(value) => Some(value / scale),
            None => None,
        };

        let mut upper = evaluator.max_amount_vector().to_owned();
        if let Some(caps) = &request.max_amount {
            for (category, &value) in caps {
                let c = evaluator.category_index(category)?;
                if !value.is_finite() || value < 0.0 {
                    return Err(OptError::InvalidCap { category: category.clone(), value });
                }
                upper[c] = value;
            }
        }
        upper.mapv_inplace(|u| u / scale);
        let lower = Array1::zeros(upper.len());

        let mut floors = Vec::new();
        if let Some(min_metric) = &request.min_metric {
            for (metric, &value) in min_metric {
                let m = evaluator.metric_index(metric)?;
                if !value.is_finite() {
                    return Err(OptError::InvalidFloor { metric: metric.clone(), value });
                }
                floors.push((m, value));
            }
        }
        floors.sort_by_key(|&(m, _)| m);

        let mut normalizers = Vec::with_capacity(floors.len() + 1);
        if let Some(b) = budget {
            let span: f64 = upper.sum();
            normalizers.push(positive_or_one(b.max(span)));
        }
        let (lo, hi) = (evaluator.min_metric(), evaluator.max_metric());
        for &(m, floor) in &floors {
            let name = &evaluator.metrics()[m];
            let range = match (lo.get(name), hi.get(name)) {
                (Some(a), Some(b)) => (b - a).abs(),
                _ => 0.0,
            };
            normalizers.push(positive_or_one(floor.abs().max(range)));
        }

        let mut initial = match &request.initial {
            Some(start) => evaluator.allocation_vector(start)? / scale,
            None => Array1::zeros(upper.len()),
        };
        initial.zip_mut_with(&upper, |x, &u| *x = x.min(u));

        let surface = match request.aggregation {
            AggregationOrder::SampleFirst => None,
            AggregationOrder::StatisticFirst => {
                Some(evaluator.make_statistic_evaluator(request.statistic))
            }
        };

        Ok(Self {
            evaluator,
            surface,
            statistic: request.statistic,
            aggregation: request.aggregation,
            scale,
            target,
            lower,
            upper,
            budget,
            floors,
            normalizers: Array1::from(normalizers),
            initial,
        })
    }

    // ---- Accessors ----

    pub fn evaluator(&self) -> &'a Evaluator {
        self.evaluator
    }

    pub fn dim(&self) -> usize {
        self.upper.len()
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn statistic(&self) -> Statistic {
        self.statistic
    }

    pub fn aggregation(&self) -> AggregationOrder {
        self.aggregation
    }

    /// Index of the target metric in `evaluator().metrics()`.
    pub fn target(&self) -> usize {
        self.target
    }

    pub fn target_name(&self) -> &str {
        &self.evaluator.metrics()[self.target]
    }

    /// Scaled lower bounds (zeros).
    pub fn lower(&self) -> &Vector {
        &self.lower
    }

    /// Scaled upper bounds.
    pub fn upper(&self) -> &Vector {
        &self.upper
    }

    /// Scaled budget, if any.
    pub fn budget(&self) -> Option<f64> {
        self.budget
    }

    /// `(metric index, floor)` pairs in metric order.
    pub fn floors(&self) -> &[(usize, f64)] {
        &self.floors
    }

    /// Scaled starting point, clipped to the upper bounds.
    pub fn initial(&self) -> &Vector {
        &self.initial
    }

    pub fn n_constraints(&self) -> usize {
        self.normalizers.len()
    }

    /// Divisor applied to each constraint when measuring violations.
    pub fn normalizers(&self) -> &Vector {
        &self.normalizers
    }

    // ---- Evaluation ----

    /// Amounts in caller units.
    pub fn unscale(&self, x: &Vector) -> Vector {
        x * self.scale
    }

    /// Every metric's reduced value at `x`, in `evaluator().metrics()` order.
    pub fn metrics_at(&self, x: &Vector) -> OptResult<Vector> {
        let amounts = self.unscale(x);
        let values = match &self.surface {
            Some(surface) => surface.evaluate_vector(amounts.view())?,
            None => self.evaluator.evaluate_statistic_vector(amounts.view(), self.statistic)?,
        };
        Ok(values)
    }

    /// Cost: the negated target value.
    ///
    /// # Errors
    /// [`OptError::NonFiniteCost`] when the target is not finite at `x`.
    pub fn objective(&self, x: &Vector) -> OptResult<f64> {
        self.objective_of(x, self.target)
    }

    /// Cost for an arbitrary metric index.
    pub fn objective_of(&self, x: &Vector, metric: usize) -> OptResult<f64> {
        let value = self.metrics_at(x)?[metric];
        if !value.is_finite() {
            return Err(OptError::NonFiniteCost { value });
        }
        Ok(-value)
    }

    /// Constraint values in `g(x) ≥ 0` form.
    pub fn constraints(&self, x: &Vector) -> OptResult<Vector> {
        let mut g = Vec::with_capacity(self.n_constraints());
        if let Some(b) = self.budget {
            g.push(b - x.sum());
        }
        if !self.floors.is_empty() {
            let metrics = self.metrics_at(x)?;
            g.extend(self.floors.iter().map(|&(m, floor)| metrics[m] - floor));
        }
        Ok(Array1::from(g))
    }

    /// Normalized violation of already-evaluated constraints plus bounds.
    pub fn violation_of(&self, x: &Vector, g: &Vector) -> f64 {
        let shortfall: f64 =
            g.iter().zip(self.normalizers.iter()).map(|(gj, nj)| (-gj / nj).max(0.0)).sum();
        let span = positive_or_one(self.upper.iter().fold(0.0_f64, |acc, u| acc.max(*u)));
        let excursion: f64 = x
            .iter()
            .zip(self.lower.iter().zip(self.upper.iter()))
            .map(|(xi, (l, u))| (l - xi).max(0.0) + (xi - u).max(0.0))
            .sum();
        shortfall + excursion / span
    }

    /// Normalized violation at `x`.
    pub fn violation(&self, x: &Vector) -> OptResult<f64> {
        let g = self.constraints(x)?;
        Ok(self.violation_of(x, &g))
    }

    /// Project `x` onto the box bounds.
    pub fn clip(&self, x: &Vector) -> Vector {
        let mut out = x.clone();
        out.iter_mut()
            .zip(self.lower.iter().zip(self.upper.iter()))
            .for_each(|(xi, (&l, &u))| *xi = xi.max(l).min(u));
        out
    }

    /// Exit status of a continuous search ending at `x`.
    pub fn settle(&self, x: &Vector, converged: bool) -> OptResult<(ExitStatus, f64)> {
        let violation = self.violation(x)?;
        let status = if violation > FEASIBILITY_TOL {
            ExitStatus::Infeasible
        } else if converged {
            ExitStatus::Converged
        } else {
            ExitStatus::IterationLimit
        };
        Ok((status, violation))
    }

    /// Package a continuous strategy's final point as an [`Optimum`].
    pub fn optimum(
        &self, x: &Vector, status: ExitStatus, detail: &str, started: Instant,
    ) -> OptResult<Optimum> {
        let amounts = self.unscale(x);
        let metrics = self.metrics_at(x)?;
        Ok(Optimum::new(
            status,
            detail,
            Some(self.evaluator.to_allocation(amounts.view())),
            Some(self.evaluator.to_metric_map(metrics.view())),
            started.elapsed().as_secs_f64(),
        ))
    }
}

/// Deb's feasibility ordering: `true` when `(cost_a, viol_a)` is preferred.
pub fn deb_better(cost_a: f64, viol_a: f64, cost_b: f64, viol_b: f64) -> bool {
    let (feas_a, feas_b) = (viol_a <= FEASIBILITY_TOL, viol_b <= FEASIBILITY_TOL);
    match (feas_a, feas_b) {
        (true, true) => cost_a < cost_b,
        (true, false) => true,
        (false, true) => false,
        (false, false) => viol_a < viol_b,
    }
}

fn positive_or_one(value: f64) -> f64 {
    if value > 0.0 && value.is_finite() {
        value
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::{Observation, SampleTable};
    use approx::assert_relative_eq;
    use ndarray::array;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // Request resolution (names, caps, floors), the scaled formulation, and
    // the violation measure shared by every strategy.
    // -------------------------------------------------------------------------

    fn two_category_evaluator() -> Evaluator {
        let rows = vec![
            Observation::new("A", 0.0, 1, "M", 0.0, "u"),
            Observation::new("A", 100.0, 1, "M", 10.0, "u"),
            Observation::new("B", 0.0, 1, "M", 0.0, "u"),
            Observation::new("B", 100.0, 1, "M", 5.0, "u"),
            Observation::new("A", 0.0, 1, "N", 4.0, "v"),
            Observation::new("A", 100.0, 1, "N", 0.0, "v"),
            Observation::new("B", 0.0, 1, "N", 0.0, "v"),
            Observation::new("B", 100.0, 1, "N", 2.0, "v"),
        ];
        Evaluator::new(&SampleTable::new(rows).unwrap()).unwrap()
    }

    #[test]
    // Purpose
    // -------
    // Budget and caps are scaled, the default caps are the observed maxima,
    // and overrides replace them per category.
    //
    // Expect
    // ------
    // - budget 150 → 1.5e-4 scaled.
    // - upper = [100, 40] / 1e6 with B overridden to 40.
    fn request_is_scaled_and_caps_are_overridden() {
        let ev = two_category_evaluator();
        let request = OptimizationRequest::new("M")
            .with_total_amount(150.0)
            .with_max_amount(BTreeMap::from([("B".to_string(), 40.0)]));

        let problem = AllocationProblem::new(&ev, &request, 1e6).unwrap();

        assert_relative_eq!(problem.budget().unwrap(), 1.5e-4);
        assert_relative_eq!(problem.upper()[0], 1e-4);
        assert_relative_eq!(problem.upper()[1], 4e-5);
        assert_eq!(problem.target_name(), "M");
        assert_eq!(problem.n_constraints(), 1);
    }

    #[test]
    // Purpose
    // -------
    // The objective is the negated target, and constraints follow the
    // budget-then-floors order.
    //
    // Given
    // -----
    // x = (50, 50) in caller units, budget 80, floor N ≥ 1.
    //
    // Expect
    // ------
    // - cost = -(5 + 2.5).
    // - g = [80e-6 - 100e-6, (2 + 1) - 1].
    fn objective_and_constraints_share_one_evaluation() {
        let ev = two_category_evaluator();
        let request = OptimizationRequest::new("M")
            .with_total_amount(80.0)
            .with_min_metric(BTreeMap::from([("N".to_string(), 1.0)]));
        let problem = AllocationProblem::new(&ev, &request, 1e6).unwrap();
        let x = array![50e-6, 50e-6];

        assert_relative_eq!(problem.objective(&x).unwrap(), -7.5, epsilon = 1e-12);
        let g = problem.constraints(&x).unwrap();
        assert_relative_eq!(g[0], -20e-6, epsilon = 1e-15);
        assert_relative_eq!(g[1], 2.0, epsilon = 1e-12);
        assert!(problem.violation(&x).unwrap() > 0.0);
        assert_eq!(problem.settle(&x, true).unwrap().0, ExitStatus::Infeasible);
    }

    #[test]
    fn all_zero_is_feasible_for_zero_budget() {
        let ev = two_category_evaluator();
        let request = OptimizationRequest::new("M").with_total_amount(0.0);
        let problem = AllocationProblem::new(&ev, &request, 1e6).unwrap();

        let zero = Array1::zeros(2);
        assert_relative_eq!(problem.violation(&zero).unwrap(), 0.0);
        assert_eq!(problem.settle(&zero, true).unwrap().0, ExitStatus::Converged);
    }

    #[test]
    // Purpose
    // -------
    // Setup mistakes are hard errors rather than defaults.
    fn unknown_names_and_invalid_limits_are_errors() {
        let ev = two_category_evaluator();
        let bad_target = OptimizationRequest::new("GHG");
        assert!(matches!(AllocationProblem::new(&ev, &bad_target, 1e6), Err(OptError::Surface(_))));

        let bad_cap = OptimizationRequest::new("M")
            .with_max_amount(BTreeMap::from([("Z".to_string(), 1.0)]));
        assert!(matches!(AllocationProblem::new(&ev, &bad_cap, 1e6), Err(OptError::Surface(_))));

        let negative_budget = OptimizationRequest::new("M").with_total_amount(-1.0);
        assert!(matches!(
            AllocationProblem::new(&ev, &negative_budget, 1e6),
            Err(OptError::InvalidBudget { .. })
        ));

        let bad_floor = OptimizationRequest::new("M")
            .with_min_metric(BTreeMap::from([("N".to_string(), f64::NAN)]));
        assert!(matches!(
            AllocationProblem::new(&ev, &bad_floor, 1e6),
            Err(OptError::InvalidFloor { .. })
        ));

        let request = OptimizationRequest::new("M");
        assert!(matches!(
            AllocationProblem::new(&ev, &request, 0.0),
            Err(OptError::InvalidScale { .. })
        ));
    }

    #[test]
    fn initial_allocation_is_scaled_and_clipped() {
        let ev = two_category_evaluator();
        let request = OptimizationRequest::new("M")
            .with_initial(BTreeMap::from([("A".to_string(), 500.0), ("B".to_string(), 20.0)]));
        let problem = AllocationProblem::new(&ev, &request, 1e6).unwrap();
        assert_relative_eq!(problem.initial()[0], 1e-4);
        assert_relative_eq!(problem.initial()[1], 2e-5);
    }

    #[test]
    fn deb_rules_prefer_feasibility_then_cost() {
        assert!(deb_better(5.0, 0.0, -5.0, 1.0));
        assert!(deb_better(-5.0, 0.0, 5.0, 0.0));
        assert!(deb_better(9.0, 0.1, -9.0, 0.2));
        assert!(!deb_better(0.0, 0.3, 0.0, 0.2));
    }
}
