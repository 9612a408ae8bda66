//! optimization::milp — the ExactMILP strategy.
//!
//! Purpose
//! -------
//! Globally optimal allocation over the piecewise-linear corner grid using
//! the incremental (convex-combination) formulation:
//!
//! ```text
//! maximize    Σ_i w_i · target_i
//! subject to  Σ_i w_i = 1,                 w_i ≥ 0     (one per corner)
//!             Σ_k y_k = 1,                 y_k ∈ {0,1} (one per adjacent pair)
//!             w_0 ≤ y_0,  w_i ≤ y_{i-1} + y_i,  w_{K-1} ≤ y_{K-2}
//!             Σ_i w_i · Σ_c amount_ic ≤ total_amount
//!             Σ_i w_i · amount_ic     ≤ cap_c
//!             Σ_i w_i · value_im      ≥ floor_m
//! ```
//!
//! Only the two corners of the active pair can carry weight, so the chosen
//! point lies on one linear piece. Corners are consecutive rows of the
//! grid ordering (see `surface::corners`).
//!
//! Key behaviors
//! -------------
//! - Depth-first branch and bound on the most fractional `y_k`, exploring
//!   the `y_k = 1` branch first; LP relaxations are solved with
//!   [`LinearProgram`].
//! - Infeasible problem → `exit_code = 2` with undefined amounts and
//!   metrics. Node cap → `exit_code = 3` with the incumbent if one exists.
//! - A grid beyond `max_corners` is a setup error.
//!
//! Conventions
//! -----------
//! Reported amounts and metrics are the weighted corner amounts and values,
//! i.e. the point on the piecewise-linear relaxation.
use std::{collections::BTreeMap, time::Instant};

use ndarray::{Array1, Array2};
use tracing::{debug, info, warn};

use crate::optimization::{
    errors::{OptError, OptResult},
    lp::{LinearProgram, LpOutcome, Relation},
    problem::{AggregationOrder, AllocationProblem},
    traits::{AllocationSolver, ExitStatus, Optimum},
    validation::verify_tol,
};

/// Options for the ExactMILP strategy.
///
/// Default: `max_corners = 10_000`, `max_nodes = 10_000`, integrality
/// `tol = 1e-6`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MilpOptions {
    pub max_corners: usize,
    pub max_nodes: usize,
    pub tol: f64,
}

impl MilpOptions {
    /// # Errors
    /// - [`OptError::InvalidPopulation`] when `max_corners` or `max_nodes`
    ///   is zero.
    /// - [`OptError::InvalidTolerance`] for a non-positive `tol`.
    pub fn new(max_corners: usize, max_nodes: usize, tol: f64) -> OptResult<Self> {
        let options = Self { max_corners, max_nodes, tol };
        options.validate()?;
        Ok(options)
    }

    /// # Errors
    /// As [`MilpOptions::new`].
    pub fn validate(&self) -> OptResult<()> {
        if self.max_corners == 0 {
            return Err(OptError::InvalidPopulation {
                size: self.max_corners,
                reason: "The corner limit must be greater than zero.",
            });
        }
        if self.max_nodes == 0 {
            return Err(OptError::InvalidPopulation {
                size: self.max_nodes,
                reason: "The node limit must be greater than zero.",
            });
        }
        verify_tol("tol", Some(self.tol))
    }
}

impl Default for MilpOptions {
    fn default() -> Self {
        Self { max_corners: 10_000, max_nodes: 10_000, tol: 1e-6 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ExactMilp {
    pub options: MilpOptions,
}

/// Corner data in caller units, ready for the formulation.
struct Corners {
    amounts: Array2<f64>,
    values: Array2<f64>,
}

/// Search outcome before packaging.
enum Search {
    Solved(Vec<f64>),
    Infeasible,
    NodeLimit(Option<Vec<f64>>),
}

impl ExactMilp {
    pub fn new(options: MilpOptions) -> Self {
        Self { options }
    }

    fn corners(&self, problem: &AllocationProblem<'_>) -> OptResult<Corners> {
        let grid = problem
            .evaluator()
            .evaluate_corners_limited(problem.statistic(), self.options.max_corners)?;
        let mut values = grid.values;
        if problem.aggregation() == AggregationOrder::StatisticFirst {
            for (i, row) in grid.amounts.rows().into_iter().enumerate() {
                let x = row.mapv(|a| a / problem.scale());
                values.row_mut(i).assign(&problem.metrics_at(&x)?);
            }
        }
        Ok(Corners { amounts: grid.amounts, values })
    }

    /// Relaxation shared by every node: variables `[w_0..w_K, y_0..y_{K-1}]`.
    fn base_program(&self, problem: &AllocationProblem<'_>, corners: &Corners) -> LinearProgram {
        let k = corners.amounts.nrows();
        let n = 2 * k - 1;
        let target = corners.values.column(problem.target());
        let mut objective = vec![0.0; n];
        for i in 0..k {
            objective[i] = -target[i];
        }
        let mut lp = LinearProgram::minimize(objective);

        let mut weights = vec![0.0; n];
        weights[..k].iter_mut().for_each(|v| *v = 1.0);
        lp.add_row(weights, Relation::Eq, 1.0);
        let mut indicators = vec![0.0; n];
        indicators[k..].iter_mut().for_each(|v| *v = 1.0);
        lp.add_row(indicators, Relation::Eq, 1.0);

        // w_i ≤ y_{i-1} + y_i
        for i in 0..k {
            let mut row = vec![0.0; n];
            row[i] = 1.0;
            if i > 0 {
                row[k + i - 1] = -1.0;
            }
            if i < k - 1 {
                row[k + i] = -1.0;
            }
            lp.add_row(row, Relation::Le, 0.0);
        }

        if let Some(budget) = problem.budget() {
            let mut row = vec![0.0; n];
            for (i, corner) in corners.amounts.rows().into_iter().enumerate() {
                row[i] = corner.sum();
            }
            lp.add_row(row, Relation::Le, budget * problem.scale());
        }
        for c in 0..problem.dim() {
            let cap = problem.upper()[c] * problem.scale();
            let column = corners.amounts.column(c);
            let highest = column.iter().fold(0.0_f64, |acc, a| acc.max(*a));
            if cap < highest {
                let mut row = vec![0.0; n];
                row[..k].iter_mut().zip(column.iter()).for_each(|(r, a)| *r = *a);
                lp.add_row(row, Relation::Le, cap);
            }
        }
        for &(m, floor) in problem.floors() {
            let mut row = vec![0.0; n];
            row[..k].iter_mut().zip(corners.values.column(m).iter()).for_each(|(r, v)| *r = *v);
            lp.add_row(row, Relation::Ge, floor);
        }
        lp
    }

    /// Depth-first branch and bound over the pair indicators.
    fn branch_and_bound(&self, base: &LinearProgram, k: usize) -> Search {
        let tol = self.options.tol;
        let mut incumbent: Option<(Vec<f64>, f64)> = None;
        let mut stack: Vec<Vec<(usize, bool)>> = vec![Vec::new()];
        let mut nodes = 0usize;

        while let Some(fixed) = stack.pop() {
            if nodes >= self.options.max_nodes {
                warn!(nodes, "branch-and-bound node limit reached");
                return Search::NodeLimit(incumbent.map(|(x, _)| x));
            }
            nodes += 1;

            let mut lp = base.clone();
            for &(j, one) in &fixed {
                if one {
                    lp.add_lower_bound(k + j, 1.0);
                } else {
                    lp.add_upper_bound(k + j, 0.0);
                }
            }
            let (x, objective) = match lp.solve() {
                LpOutcome::Optimal { x, objective } => (x, objective),
                outcome => {
                    debug!(?outcome, depth = fixed.len(), "pruned node");
                    continue;
                }
            };
            if let Some((_, best)) = &incumbent {
                if objective >= best - tol * best.abs().max(1.0) {
                    continue;
                }
            }

            let branch = (0..k - 1)
                .map(|j| (j, x[k + j]))
                .filter(|&(_, y)| y > tol && y < 1.0 - tol)
                .max_by(|a, b| fractionality(a.1).total_cmp(&fractionality(b.1)));
            match branch {
                None => incumbent = Some((x, objective)),
                Some((j, _)) => {
                    let mut zero = fixed.clone();
                    zero.push((j, false));
                    let mut one = fixed;
                    one.push((j, true));
                    stack.push(zero);
                    stack.push(one);
                }
            }
        }
        debug!(nodes, "branch and bound finished");
        match incumbent {
            Some((x, _)) => Search::Solved(x),
            None => Search::Infeasible,
        }
    }

    fn package(
        &self, problem: &AllocationProblem<'_>, corners: &Corners, weights: &[f64], status: ExitStatus,
        detail: &str, started: Instant,
    ) -> Optimum {
        let w = Array1::from(weights.to_vec());
        let amounts = corners.amounts.t().dot(&w);
        let evaluator = problem.evaluator();
        Optimum::new(
            status,
            detail,
            Some(evaluator.to_allocation(amounts.view())),
            Some(blend_metrics(evaluator.metrics(), &corners.values, &w)),
            started.elapsed().as_secs_f64(),
        )
    }
}

fn fractionality(y: f64) -> f64 {
    (y - y.round()).abs()
}

impl AllocationSolver for ExactMilp {
    fn name(&self) -> &'static str {
        "ExactMILP"
    }

    /// # Errors
    /// [`OptError::Surface`] wrapping `CornerGridTooLarge` when the grid
    /// exceeds `max_corners`.
    fn solve(&self, problem: &AllocationProblem<'_>) -> OptResult<Optimum> {
        let started = Instant::now();
        self.options.validate()?;
        let corners = self.corners(problem)?;
        let k = corners.amounts.nrows();
        debug!(corners = k, target_metric = problem.target_name(), "building piecewise-linear program");

        let search = if k == 1 {
            let g = problem.constraints(&corners.amounts.row(0).mapv(|a| a / problem.scale()))?;
            if g.iter().all(|gj| *gj >= -1e-9) {
                Search::Solved(vec![1.0])
            } else {
                Search::Infeasible
            }
        } else {
            let base = self.base_program(problem, &corners);
            self.branch_and_bound(&base, k)
        };

        let optimum = match search {
            Search::Solved(x) => {
                let optimum =
                    self.package(problem, &corners, &x[..k], ExitStatus::Converged, "", started);
                info!(target_metric = problem.target_name(), solve_time = optimum.solve_time, "exact optimum found");
                optimum
            }
            Search::Infeasible => {
                warn!(target_metric = problem.target_name(), "piecewise-linear program is infeasible");
                Optimum::undefined(
                    ExitStatus::Infeasible,
                    "no corner combination satisfies the constraints",
                    started.elapsed().as_secs_f64(),
                )
            }
            Search::NodeLimit(Some(x)) => self.package(
                problem,
                &corners,
                &x[..k],
                ExitStatus::NodeLimit,
                "returning best incumbent",
                started,
            ),
            Search::NodeLimit(None) => Optimum::undefined(
                ExitStatus::NodeLimit,
                "no incumbent found",
                started.elapsed().as_secs_f64(),
            ),
        };
        Ok(optimum)
    }
}

/// Weighted corner values for a given weight vector, keyed by metric.
pub fn blend_metrics(
    metrics: &[String], values: &Array2<f64>, weights: &Array1<f64>,
) -> BTreeMap<String, f64> {
    metrics.iter().cloned().zip(values.t().dot(weights).iter().copied()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimization::problem::OptimizationRequest;
    use crate::surface::{Evaluator, Observation, SampleTable, SurfaceError};
    use approx::assert_relative_eq;
    use ndarray::array;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // The incremental formulation on the two-category, two-level grid
    // (budget binding, on an edge, zero budget), infeasible floors, a
    // non-convex single-category case that needs branching, and the
    // corner and node limits.
    // -------------------------------------------------------------------------

    fn two_by_two() -> Evaluator {
        let rows = vec![
            Observation::new("A", 0.0, 1, "M", 0.0, ""),
            Observation::new("A", 100.0, 1, "M", 10.0, ""),
            Observation::new("B", 0.0, 1, "M", 0.0, ""),
            Observation::new("B", 100.0, 1, "M", 5.0, ""),
        ];
        Evaluator::new(&SampleTable::new(rows).unwrap()).unwrap()
    }

    /// Convex single-category response: blending the ends beats the middle.
    fn convex_single() -> Evaluator {
        let rows = vec![
            Observation::new("A", 0.0, 1, "M", 0.0, ""),
            Observation::new("A", 50.0, 1, "M", 1.0, ""),
            Observation::new("A", 100.0, 1, "M", 10.0, ""),
        ];
        Evaluator::new(&SampleTable::new(rows).unwrap()).unwrap()
    }

    fn solve(ev: &Evaluator, request: OptimizationRequest, options: MilpOptions) -> Optimum {
        let problem = AllocationProblem::new(ev, &request, 1e6).unwrap();
        ExactMilp::new(options).solve(&problem).unwrap()
    }

    #[test]
    // Purpose
    // -------
    // The optimum sits on a grid corner and matches the continuous answer.
    //
    // Given
    // -----
    // total_amount = 100.
    //
    // Expect
    // ------
    // (100, 0), M = 10, exit code 0.
    fn budget_optimum_is_a_corner() {
        let ev = two_by_two();
        let opt = solve(&ev, OptimizationRequest::new("M").with_total_amount(100.0), MilpOptions::default());

        assert_eq!(opt.exit_code, 0, "{}", opt.exit_message);
        assert_relative_eq!(opt.amount("A").unwrap(), 100.0, epsilon = 1e-6);
        assert_relative_eq!(opt.amount("B").unwrap(), 0.0, epsilon = 1e-6);
        assert_relative_eq!(opt.metric("M").unwrap(), 10.0, epsilon = 1e-6);
    }

    #[test]
    // Purpose
    // -------
    // A budget of 150 is met on the edge between (100, 0) and (100, 100).
    fn budget_optimum_on_an_edge() {
        let ev = two_by_two();
        let opt = solve(&ev, OptimizationRequest::new("M").with_total_amount(150.0), MilpOptions::default());

        assert_eq!(opt.exit_code, 0);
        assert_relative_eq!(opt.amount("A").unwrap(), 100.0, epsilon = 1e-6);
        assert_relative_eq!(opt.amount("B").unwrap(), 50.0, epsilon = 1e-6);
        assert_relative_eq!(opt.metric("M").unwrap(), 12.5, epsilon = 1e-6);
    }

    #[test]
    fn zero_budget_selects_origin() {
        let ev = two_by_two();
        let opt = solve(&ev, OptimizationRequest::new("M").with_total_amount(0.0), MilpOptions::default());

        assert_eq!(opt.exit_code, 0);
        assert_relative_eq!(opt.amount("A").unwrap(), 0.0, epsilon = 1e-9);
        assert_relative_eq!(opt.amount("B").unwrap(), 0.0, epsilon = 1e-9);
        assert_relative_eq!(opt.metric("M").unwrap(), 0.0, epsilon = 1e-9);
    }

    #[test]
    // Purpose
    // -------
    // Infeasible floors leave amounts and metrics undefined.
    fn infeasible_floor_yields_undefined_optimum() {
        let ev = two_by_two();
        let request = OptimizationRequest::new("M")
            .with_total_amount(100.0)
            .with_min_metric(BTreeMap::from([("M".to_string(), 20.0)]));
        let opt = solve(&ev, request, MilpOptions::default());

        assert_eq!(opt.exit_code, ExitStatus::Infeasible.code());
        assert!(opt.amounts.is_none());
        assert!(opt.metrics.is_none());
    }

    #[test]
    // Purpose
    // -------
    // The relaxation blends the 0 and 100 corners (value 5); branching
    // restores a single piece.
    //
    // Expect
    // ------
    // A = 50, M = 1.
    fn branching_rejects_distant_blends() {
        let ev = convex_single();
        let opt = solve(&ev, OptimizationRequest::new("M").with_total_amount(50.0), MilpOptions::default());

        assert_eq!(opt.exit_code, 0, "{}", opt.exit_message);
        assert_relative_eq!(opt.amount("A").unwrap(), 50.0, epsilon = 1e-6);
        assert_relative_eq!(opt.metric("M").unwrap(), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn node_limit_without_incumbent_is_undefined() {
        let ev = convex_single();
        let options = MilpOptions::new(100, 1, 1e-6).unwrap();
        let opt = solve(&ev, OptimizationRequest::new("M").with_total_amount(50.0), options);

        assert_eq!(opt.exit_code, ExitStatus::NodeLimit.code());
        assert!(opt.amounts.is_none());
    }

    #[test]
    fn caps_bind_inside_the_grid() {
        let ev = two_by_two();
        let request = OptimizationRequest::new("M")
            .with_total_amount(100.0)
            .with_max_amount(BTreeMap::from([("A".to_string(), 40.0)]));
        let opt = solve(&ev, request, MilpOptions::default());

        // (40, 60) on the edge between (0, 100) and (100, 0): 4 + 3.
        assert_eq!(opt.exit_code, 0);
        assert_relative_eq!(opt.amount("A").unwrap(), 40.0, epsilon = 1e-6);
        assert_relative_eq!(opt.metric("M").unwrap(), 7.0, epsilon = 1e-6);
    }

    #[test]
    fn oversized_grid_is_a_setup_error() {
        let ev = two_by_two();
        let problem =
            AllocationProblem::new(&ev, &OptimizationRequest::new("M"), 1e6).unwrap();
        let err = ExactMilp::new(MilpOptions::new(3, 10, 1e-6).unwrap()).solve(&problem).unwrap_err();
        assert_eq!(err, OptError::Surface(SurfaceError::CornerGridTooLarge { corners: 4, limit: 3 }));
    }

    #[test]
    fn blend_metrics_weights_corner_values() {
        let metrics = vec!["M".to_string(), "N".to_string()];
        let values = array![[0.0, 2.0], [10.0, 4.0]];
        let blended = blend_metrics(&metrics, &values, &array![0.25, 0.75]);
        assert_relative_eq!(blended["M"], 7.5);
        assert_relative_eq!(blended["N"], 3.5);
    }

    #[test]
    fn options_are_validated() {
        assert!(MilpOptions::new(0, 10, 1e-6).is_err());
        assert!(MilpOptions::new(10, 0, 1e-6).is_err());
        assert!(MilpOptions::new(10, 10, 0.0).is_err());
    }
}
