//! optimization::local_gradient — the LocalGradient strategy.
//!
//! Purpose
//! -------
//! Fast, deterministic, bounded local search for a single target metric
//! under budget and floor constraints. Implemented as a trust-region
//! sequential linear programming (SLP) solver driven by argmin's
//! `Executor`.
//!
//! Key behaviors
//! -------------
//! - Each iteration linearizes the cost and the constraints at the
//!   incumbent (finite-difference gradients through
//!   [`ArgMinAdapter`]) and solves an elastic LP inside an ∞-norm trust
//!   region intersected with the box bounds:
//!   ```text
//!   minimize   ∇c·d + μ Σ s_j
//!   subject to ĝ_j + ∇ĝ_j·d + s_j ≥ 0,   s ≥ 0,
//!              l ≤ x + d ≤ u,   |d|∞ ≤ Δ
//!   ```
//!   where `ĝ` are the normalized constraints.
//! - Steps are accepted on the ℓ1 merit `φ = c + μ Σ max(0, -ĝ_j)` with the
//!   usual ratio test; the radius doubles on very good steps that hit the
//!   boundary and halves on poor ones.
//! - The penalty `μ` grows tenfold (a few times per iteration at most) until
//!   the LP reaches the least linearized violation attainable in the region.
//!
//! Invariants & assumptions
//! ------------------------
//! - Iterates stay inside the box bounds; only the budget and floors can be
//!   violated, and the final iterate is returned even when they are.
//! - Converges when the predicted merit decrease falls below
//!   `tol · max(1, |φ|)` or the trust region collapses.
//! - Deterministic for a fixed starting point.
//!
//! Downstream usage
//! ----------------
//! - Selected directly as [`LocalGradient`].
//! - Used as the polishing / refinement step of the global and population
//!   strategies via [`LocalGradient::search`].
use std::time::Instant;

use argmin::core::{
    ArgminError, Error, Problem, Solver, State, TerminationReason, TerminationStatus, KV,
};
use tracing::{debug, info, warn};

use crate::optimization::{
    adapter::ArgMinAdapter,
    errors::OptResult,
    lp::{LinearProgram, LpOutcome, Relation},
    problem::AllocationProblem,
    run::run_solver,
    traits::{AllocationSolver, ExitStatus, Optimum, Tolerances},
    types::{AllocationState, Vector},
    validation::verify_tol,
};

const ACCEPT_RATIO: f64 = 0.1;
const SHRINK_RATIO: f64 = 0.25;
const EXPAND_RATIO: f64 = 0.75;
const MAX_PENALTY_UPDATES: usize = 6;

/// Options for the LocalGradient strategy.
///
/// - `tols.tol`: stop when the predicted merit decrease is below
///   `tol · max(1, |φ|)`.
/// - `tols.max_iter`: iteration cap (accepted and rejected steps both count).
/// - `initial_radius`: starting trust radius in caller units; defaults to
///   the largest category range.
/// - `verbose`: attach the slog observer (feature `obs_slog`).
#[derive(Debug, Clone, PartialEq)]
pub struct LocalGradientOptions {
    pub tols: Tolerances,
    pub initial_radius: Option<f64>,
    pub verbose: bool,
}

impl LocalGradientOptions {
    /// # Errors
    /// [`OptError::InvalidTolerance`](crate::optimization::errors::OptError::InvalidTolerance)
    /// when `initial_radius` is non-finite or non-positive.
    pub fn new(tols: Tolerances, initial_radius: Option<f64>, verbose: bool) -> OptResult<Self> {
        let options = Self { tols, initial_radius, verbose };
        options.validate()?;
        Ok(options)
    }

    /// # Errors
    /// As [`LocalGradientOptions::new`], plus invalid `tols`.
    pub fn validate(&self) -> OptResult<()> {
        self.tols.validate()?;
        verify_tol("initial_radius", self.initial_radius)
    }
}

impl Default for LocalGradientOptions {
    fn default() -> Self {
        Self {
            tols: Tolerances { tol: Some(1e-8), max_iter: Some(100) },
            initial_radius: None,
            verbose: false,
        }
    }
}

/// Sequential-linear-programming local strategy.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LocalGradient {
    pub options: LocalGradientOptions,
}

/// Final point of a local search, before packaging into an [`Optimum`].
#[derive(Debug, Clone, PartialEq)]
pub struct LocalOutcome {
    pub x: Vector,
    pub cost: f64,
    pub violation: f64,
    pub status: ExitStatus,
    pub detail: String,
}

impl LocalGradient {
    pub fn new(options: LocalGradientOptions) -> Self {
        Self { options }
    }

    /// Run the SLP search from `x0` (scaled space).
    pub fn search(&self, problem: &AllocationProblem<'_>, x0: Vector) -> OptResult<LocalOutcome> {
        self.options.validate()?;
        let x0 = problem.clip(&x0);
        let solver = TrustRegionSlp::new(&self.options, problem);
        let summary =
            run_solver(problem, solver, x0.clone(), self.options.tols.max_iter, self.options.verbose)?;
        let x = summary.param.clone().unwrap_or(x0);
        let (status, violation) = problem.settle(&x, summary.solver.converged)?;
        let detail = if summary.solver.finished {
            format!("{} after {} iterations", summary.solver.detail, summary.iterations)
        } else {
            summary.describe()
        };
        let cost = problem.objective(&x)?;
        Ok(LocalOutcome { x, cost, violation, status, detail })
    }
}

impl AllocationSolver for LocalGradient {
    fn name(&self) -> &'static str {
        "LocalGradient"
    }

    fn solve(&self, problem: &AllocationProblem<'_>) -> OptResult<Optimum> {
        let started = Instant::now();
        let outcome = self.search(problem, problem.initial().clone())?;
        match outcome.status {
            ExitStatus::Converged => info!(
                target_metric = problem.target_name(),
                value = -outcome.cost,
                "local search converged"
            ),
            _ => warn!(
                target_metric = problem.target_name(),
                violation = outcome.violation,
                detail = %outcome.detail,
                "local search stopped without a converged feasible point"
            ),
        }
        problem.optimum(&outcome.x, outcome.status, &outcome.detail, started)
    }
}

// ---- argmin solver ----

/// Trust-region SLP state machine run by argmin's `Executor`.
#[derive(Debug, Clone)]
pub struct TrustRegionSlp {
    tol: f64,
    radius: f64,
    max_radius: f64,
    lower: Vector,
    upper: Vector,
    normalizers: Vector,
    penalty: f64,
    x: Vector,
    cost: f64,
    g: Vector,
    model: Option<(Vector, Vec<Vector>)>,
    pub finished: bool,
    pub converged: bool,
    pub detail: String,
}

impl TrustRegionSlp {
    pub fn new(options: &LocalGradientOptions, problem: &AllocationProblem<'_>) -> Self {
        let range = problem.upper() - problem.lower();
        let max_radius = range.iter().fold(0.0_f64, |acc, r| acc.max(*r));
        let radius = options
            .initial_radius
            .map(|r| (r / problem.scale()).min(max_radius))
            .unwrap_or(max_radius);
        Self {
            tol: options.tols.tol.unwrap_or(f64::EPSILON),
            radius,
            max_radius,
            lower: problem.lower().clone(),
            upper: problem.upper().clone(),
            normalizers: problem.normalizers().clone(),
            penalty: 0.0,
            x: Vector::zeros(0),
            cost: 0.0,
            g: Vector::zeros(0),
            model: None,
            finished: false,
            converged: false,
            detail: String::new(),
        }
    }

    /// Sum of normalized constraint shortfalls.
    fn shortfall(&self, g: &Vector) -> f64 {
        g.iter().zip(self.normalizers.iter()).map(|(gj, nj)| (-gj / nj).max(0.0)).sum()
    }

    /// Ten times the largest ratio of cost slope to normalized constraint
    /// slope, a rough bound on the multipliers.
    fn initial_penalty(&self, grad: &Vector, jac: &[Vector]) -> f64 {
        let steepest = grad.iter().fold(0.0_f64, |acc, gi| acc.max(gi.abs()));
        let ratio = jac
            .iter()
            .zip(self.normalizers.iter())
            .map(|(row, nj)| row.iter().fold(0.0_f64, |acc, v| acc.max(v.abs())) / nj)
            .filter(|slope| *slope > 0.0)
            .fold(0.0_f64, |acc, slope| acc.max(steepest / slope));
        10.0 * ratio.max(1.0)
    }

    fn merit(&self, cost: f64, g: &Vector) -> f64 {
        cost + self.penalty * self.shortfall(g)
    }

    fn finish(&mut self, converged: bool, detail: &str) {
        self.finished = true;
        self.converged = converged;
        self.detail = detail.to_string();
    }

    /// Elastic LP in shifted, radius-normalized step variables.
    ///
    /// Variables: `τ_i = d_i/Δ - lo_i ∈ [0, hi_i - lo_i]`, then one slack per
    /// constraint. Returns the program and the shifts `lo`.
    fn subproblem(
        &self, grad: &Vector, jac: &[Vector], penalty: Option<f64>,
    ) -> (LinearProgram, Vec<f64>) {
        let n = self.x.len();
        let m = jac.len();
        let delta = self.radius;
        let mut lo = Vec::with_capacity(n);
        let mut hi = Vec::with_capacity(n);
        for i in 0..n {
            let l = ((self.lower[i] - self.x[i]) / delta).max(-1.0);
            let h = ((self.upper[i] - self.x[i]) / delta).min(1.0);
            lo.push(l.min(0.0));
            hi.push(h.max(l.min(0.0)));
        }

        let mut objective = Vec::with_capacity(n + m);
        match penalty {
            Some(mu) => {
                objective.extend(grad.iter().map(|gi| gi * delta));
                objective.extend(std::iter::repeat(mu).take(m));
            }
            None => {
                objective.extend(std::iter::repeat(0.0).take(n));
                objective.extend(std::iter::repeat(1.0).take(m));
            }
        }
        let mut lp = LinearProgram::minimize(objective);
        for i in 0..n {
            lp.add_upper_bound(i, hi[i] - lo[i]);
        }
        for (j, row) in jac.iter().enumerate() {
            let nj = self.normalizers[j];
            let mut coeffs = vec![0.0; n + m];
            let mut shift = 0.0;
            for i in 0..n {
                coeffs[i] = row[i] * delta / nj;
                shift += coeffs[i] * lo[i];
            }
            coeffs[n + j] = 1.0;
            lp.add_row(coeffs, Relation::Ge, -self.g[j] / nj - shift);
        }
        (lp, lo)
    }

    /// Solve the elastic LP, raising the penalty until the slack matches the
    /// least attainable linearized violation. Returns the step and slack sum.
    fn step(&mut self, grad: &Vector, jac: &[Vector]) -> Option<(Vector, f64)> {
        let n = self.x.len();
        let least_slack = if jac.is_empty() {
            0.0
        } else {
            match self.subproblem(grad, jac, None).0.solve() {
                LpOutcome::Optimal { objective, .. } => objective,
                _ => return None,
            }
        };
        let mut best = None;
        for _ in 0..=MAX_PENALTY_UPDATES {
            let (lp, lo) = self.subproblem(grad, jac, Some(self.penalty));
            let LpOutcome::Optimal { x: sol, .. } = lp.solve() else {
                return None;
            };
            let d: Vector = (0..n).map(|i| self.radius * (sol[i] + lo[i])).collect();
            let slack: f64 = sol[n..].iter().sum();
            best = Some((d, slack));
            if slack <= least_slack + 1e-9 {
                break;
            }
            self.penalty *= 10.0;
        }
        best
    }
}

impl<'p, 'a> Solver<ArgMinAdapter<'p, 'a>, AllocationState> for TrustRegionSlp {
    const NAME: &'static str = "LocalGradient (trust-region SLP)";

    fn init(
        &mut self, problem: &mut Problem<ArgMinAdapter<'p, 'a>>, state: AllocationState,
    ) -> Result<(AllocationState, Option<KV>), Error> {
        let x0 = state.get_param().cloned().ok_or_else(|| {
            Error::from(ArgminError::NotInitialized {
                text: "LocalGradient requires an initial parameter vector".to_string(),
            })
        })?;
        self.cost = problem.cost(&x0)?;
        self.g = problem.problem("constraint_count", |p| p.constraints(&x0))?;
        self.x = x0;
        if self.max_radius <= 0.0 {
            self.finish(true, "every category is capped at zero");
        }
        let merit = self.merit(self.cost, &self.g);
        Ok((state.param(self.x.clone()).cost(merit), None))
    }

    fn next_iter(
        &mut self, problem: &mut Problem<ArgMinAdapter<'p, 'a>>, state: AllocationState,
    ) -> Result<(AllocationState, Option<KV>), Error> {
        let (grad, jac) = match self.model.take() {
            Some(model) => model,
            None => {
                let x = self.x.clone();
                let grad = problem.gradient(&x)?;
                let jac = problem.problem("jacobian_count", |p| p.constraint_gradients(&x))?;
                (grad, jac)
            }
        };
        if self.penalty == 0.0 {
            self.penalty = self.initial_penalty(&grad, &jac);
        }

        let Some((d, slack)) = self.step(&grad, &jac) else {
            self.finish(false, "linear sub-problem failed");
            return Ok((state.param(self.x.clone()).cost(self.merit(self.cost, &self.g)), None));
        };
        let merit = self.merit(self.cost, &self.g);
        let predicted = self.penalty * self.shortfall(&self.g) - (grad.dot(&d) + self.penalty * slack);
        if predicted <= self.tol * merit.abs().max(1.0) {
            self.finish(true, "predicted merit decrease below tolerance");
            return Ok((state.param(self.x.clone()).cost(merit).gradient(grad), None));
        }

        let trial: Vector = (&self.x + &d)
            .iter()
            .zip(self.lower.iter().zip(self.upper.iter()))
            .map(|(v, (&l, &u))| v.max(l).min(u))
            .collect();
        let trial_cost = problem.cost(&trial)?;
        let trial_g = problem.problem("constraint_count", |p| p.constraints(&trial))?;
        let actual = merit - self.merit(trial_cost, &trial_g);
        let ratio = actual / predicted;
        let step_norm = d.iter().fold(0.0_f64, |acc, di| acc.max(di.abs()));

        if ratio > ACCEPT_RATIO {
            self.x = trial;
            self.cost = trial_cost;
            self.g = trial_g;
        } else {
            self.model = Some((grad.clone(), jac));
        }
        if ratio < SHRINK_RATIO {
            self.radius = 0.5 * if step_norm > 0.0 { step_norm } else { self.radius };
        } else if ratio > EXPAND_RATIO && step_norm >= 0.99 * self.radius {
            self.radius = (2.0 * self.radius).min(self.max_radius);
        }
        if self.radius <= 1e-12 * self.max_radius {
            self.finish(true, "trust region collapsed");
        }
        debug!(ratio, radius = self.radius, penalty = self.penalty, predicted, "slp step");

        let merit = self.merit(self.cost, &self.g);
        Ok((state.param(self.x.clone()).cost(merit).gradient(grad), None))
    }

    fn terminate(&mut self, _state: &AllocationState) -> TerminationStatus {
        if self.finished {
            TerminationStatus::Terminated(TerminationReason::SolverConverged)
        } else {
            TerminationStatus::NotTerminated
        }
    }
}
