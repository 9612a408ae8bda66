//! optimization::optimizer — the `Optimizer` façade.
//!
//! Purpose
//! -------
//! Bind an [`Evaluator`] to the five interchangeable strategies. Each call
//! builds one [`AllocationProblem`] (objective, constraints, bounds) from an
//! [`OptimizationRequest`] and hands it to the selected [`Strategy`].
//!
//! Key behaviors
//! -------------
//! - [`Optimizer::optimize`]: one request, one strategy, one [`Optimum`].
//! - [`Optimizer::max_metrics`]: per-metric achievable ceilings, returned
//!   as a value the caller may cache.
//! - [`Optimizer::epsilon_frontier`]: the target traced against a sweep of
//!   floors on another metric.
//! - [`Optimizer::pareto_front`]: non-dominated allocations for several
//!   metrics at once.
//!
//! Conventions
//! -----------
//! - Unknown names and invalid options are `Err`; search outcomes are
//!   reported on each `Optimum`.
//! - The optimizer holds no mutable state; every call is independent.
use std::{collections::BTreeMap, str::FromStr};

use tracing::{debug, info, warn};

use crate::{
    optimization::{
        differential_evolution::{DifferentialEvolution, DifferentialEvolutionOptions},
        errors::{OptError, OptResult},
        global_deterministic::{GlobalDeterministic, GlobalDeterministicOptions},
        local_gradient::{LocalGradient, LocalGradientOptions},
        milp::{ExactMilp, MilpOptions},
        nsga::{Nsga2, PopulationOptions},
        problem::{AllocationProblem, OptimizationRequest},
        traits::{AllocationSolver, Optimum},
        types::DEFAULT_SCALE,
    },
    surface::Evaluator,
};

/// Strategy selector without options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    LocalGradient,
    GlobalStochastic,
    GlobalDeterministic,
    PopulationMultiObjective,
    ExactMilp,
}

impl FromStr for StrategyKind {
    type Err = OptError;

    /// Case-insensitive; `_`, `-` and spaces are ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String =
            s.chars().filter(|c| !matches!(c, '_' | '-' | ' ')).collect::<String>().to_lowercase();
        match key.as_str() {
            "localgradient" => Ok(StrategyKind::LocalGradient),
            "globalstochastic" => Ok(StrategyKind::GlobalStochastic),
            "globaldeterministic" => Ok(StrategyKind::GlobalDeterministic),
            "populationmultiobjective" => Ok(StrategyKind::PopulationMultiObjective),
            "exactmilp" => Ok(StrategyKind::ExactMilp),
            _ => Err(OptError::InvalidStrategy {
                name: s.to_string(),
                reason: "Valid options are 'LocalGradient', 'GlobalStochastic', \
                         'GlobalDeterministic', 'PopulationMultiObjective' or 'ExactMILP'.",
            }),
        }
    }
}

/// A strategy together with its options.
#[derive(Debug, Clone, PartialEq)]
pub enum Strategy {
    LocalGradient(LocalGradientOptions),
    GlobalStochastic(DifferentialEvolutionOptions),
    GlobalDeterministic(GlobalDeterministicOptions),
    PopulationMultiObjective(PopulationOptions),
    ExactMilp(MilpOptions),
}

impl Strategy {
    pub fn kind(&self) -> StrategyKind {
        match self {
            Strategy::LocalGradient(_) => StrategyKind::LocalGradient,
            Strategy::GlobalStochastic(_) => StrategyKind::GlobalStochastic,
            Strategy::GlobalDeterministic(_) => StrategyKind::GlobalDeterministic,
            Strategy::PopulationMultiObjective(_) => StrategyKind::PopulationMultiObjective,
            Strategy::ExactMilp(_) => StrategyKind::ExactMilp,
        }
    }
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy::LocalGradient(LocalGradientOptions::default())
    }
}

impl From<StrategyKind> for Strategy {
    /// The strategy with default options.
    fn from(kind: StrategyKind) -> Self {
        match kind {
            StrategyKind::LocalGradient => Strategy::LocalGradient(LocalGradientOptions::default()),
            StrategyKind::GlobalStochastic => {
                Strategy::GlobalStochastic(DifferentialEvolutionOptions::default())
            }
            StrategyKind::GlobalDeterministic => {
                Strategy::GlobalDeterministic(GlobalDeterministicOptions::default())
            }
            StrategyKind::PopulationMultiObjective => {
                Strategy::PopulationMultiObjective(PopulationOptions::default())
            }
            StrategyKind::ExactMilp => Strategy::ExactMilp(MilpOptions::default()),
        }
    }
}

impl AllocationSolver for Strategy {
    fn name(&self) -> &'static str {
        match self {
            Strategy::LocalGradient(_) => "LocalGradient",
            Strategy::GlobalStochastic(_) => "GlobalStochastic",
            Strategy::GlobalDeterministic(_) => "GlobalDeterministic",
            Strategy::PopulationMultiObjective(_) => "PopulationMultiObjective",
            Strategy::ExactMilp(_) => "ExactMILP",
        }
    }

    fn solve(&self, problem: &AllocationProblem<'_>) -> OptResult<Optimum> {
        match self {
            Strategy::LocalGradient(o) => LocalGradient::new(o.clone()).solve(problem),
            Strategy::GlobalStochastic(o) => DifferentialEvolution::new(o.clone()).solve(problem),
            Strategy::GlobalDeterministic(o) => GlobalDeterministic::new(o.clone()).solve(problem),
            Strategy::PopulationMultiObjective(o) => Nsga2::new(o.clone()).solve(problem),
            Strategy::ExactMilp(o) => ExactMilp::new(*o).solve(problem),
        }
    }
}

/// Constrained allocation optimizer over one response surface.
#[derive(Debug, Clone, Copy)]
pub struct Optimizer<'a> {
    evaluator: &'a Evaluator,
    scale: f64,
}

impl<'a> Optimizer<'a> {
    /// Optimizer with the default internal scale (`1e6`).
    pub fn new(evaluator: &'a Evaluator) -> Self {
        Self { evaluator, scale: DEFAULT_SCALE }
    }

    /// Override the internal scale that maps caller amounts to solver units.
    ///
    /// # Errors
    /// [`OptError::InvalidScale`] for a non-positive or non-finite scale.
    pub fn with_scale(self, scale: f64) -> OptResult<Self> {
        if !scale.is_finite() || scale <= 0.0 {
            return Err(OptError::InvalidScale { scale });
        }
        Ok(Self { scale, ..self })
    }

    pub fn evaluator(&self) -> &'a Evaluator {
        self.evaluator
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// The shared formulation for `request`.
    ///
    /// # Errors
    /// Unknown metric or category names and invalid limits.
    pub fn problem(&self, request: &OptimizationRequest) -> OptResult<AllocationProblem<'a>> {
        AllocationProblem::new(self.evaluator, request, self.scale)
    }

    /// Maximize the request's target with the given strategy.
    ///
    /// # Errors
    /// Setup failures only; infeasibility and non-convergence are reported
    /// through the returned `Optimum`.
    pub fn optimize(&self, request: &OptimizationRequest, strategy: &Strategy) -> OptResult<Optimum> {
        let problem = self.problem(request)?;
        debug!(
            strategy = strategy.name(),
            target_metric = %request.target,
            budget = ?request.total_amount,
            floors = problem.floors().len(),
            "optimizing allocation"
        );
        let optimum = strategy.solve(&problem)?;
        info!(
            strategy = strategy.name(),
            target_metric = %request.target,
            exit_code = optimum.exit_code,
            solve_time = optimum.solve_time,
            "optimization finished"
        );
        Ok(optimum)
    }

    /// Achievable ceiling of every metric, each maximized on its own with
    /// the local strategy. Floors in `base` are ignored; budget and caps
    /// are kept. A metric whose search does not converge maps to `None`.
    ///
    /// # Errors
    /// Setup failures in `base` (e.g. unknown category in caps).
    pub fn max_metrics(
        &self, base: &OptimizationRequest, options: &LocalGradientOptions,
    ) -> OptResult<BTreeMap<String, Option<f64>>> {
        let strategy = Strategy::LocalGradient(options.clone());
        let mut ceilings = BTreeMap::new();
        for metric in self.evaluator.metrics() {
            let mut request = base.clone();
            request.target = metric.clone();
            request.min_metric = None;
            let optimum = self.optimize(&request, &strategy)?;
            let ceiling = if optimum.is_converged() { optimum.metric(metric) } else { None };
            if ceiling.is_none() {
                warn!(metric = %metric, exit_message = %optimum.exit_message, "metric ceiling undefined");
            }
            ceilings.insert(metric.clone(), ceiling);
        }
        Ok(ceilings)
    }

    /// Repeat the request with each value in `floors` placed as the floor on
    /// `metric`, keeping any other floors (epsilon-constraint method).
    ///
    /// # Errors
    /// [`OptError::Surface`] for an unknown `metric`, plus any setup failure
    /// of the individual requests.
    pub fn epsilon_frontier(
        &self, request: &OptimizationRequest, metric: &str, floors: &[f64], strategy: &Strategy,
    ) -> OptResult<Vec<Optimum>> {
        self.evaluator.metric_index(metric)?;
        floors
            .iter()
            .map(|&floor| {
                let mut constrained = request.clone();
                constrained
                    .min_metric
                    .get_or_insert_with(BTreeMap::new)
                    .insert(metric.to_string(), floor);
                self.optimize(&constrained, strategy)
            })
            .collect()
    }

    /// Pareto front of several metrics with the population strategy. The
    /// request's budget, caps and floors apply; its target is ignored.
    ///
    /// # Errors
    /// - [`OptError::NoObjectives`] for an empty list.
    /// - [`OptError::Surface`] for unknown metric names.
    pub fn pareto_front(
        &self, request: &OptimizationRequest, objectives: &[&str], options: &PopulationOptions,
    ) -> OptResult<Vec<Optimum>> {
        if objectives.is_empty() {
            return Err(OptError::NoObjectives);
        }
        let indices =
            objectives.iter().map(|name| self.evaluator.metric_index(name)).collect::<Result<Vec<_>, _>>()?;
        let mut request = request.clone();
        request.target = objectives[0].to_string();
        let problem = self.problem(&request)?;
        let front = Nsga2::new(options.clone()).pareto_front(&problem, &indices)?;
        info!(objectives = ?objectives, size = front.len(), "pareto front traced");
        Ok(front)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::{Observation, SampleTable, SurfaceError};
    use approx::assert_relative_eq;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // Façade wiring: strategy parsing and dispatch, scale validation,
    // per-metric ceilings, and the epsilon-constraint sweep. End-to-end
    // strategy comparisons live in the integration tests.
    // -------------------------------------------------------------------------

    fn evaluator() -> Evaluator {
        let rows = vec![
            Observation::new("A", 0.0, 1, "M", 0.0, ""),
            Observation::new("A", 100.0, 1, "M", 10.0, ""),
            Observation::new("B", 0.0, 1, "M", 0.0, ""),
            Observation::new("B", 100.0, 1, "M", 5.0, ""),
            Observation::new("A", 0.0, 1, "N", 0.0, ""),
            Observation::new("A", 100.0, 1, "N", 1.0, ""),
            Observation::new("B", 0.0, 1, "N", 0.0, ""),
            Observation::new("B", 100.0, 1, "N", 3.0, ""),
        ];
        Evaluator::new(&SampleTable::new(rows).unwrap()).unwrap()
    }

    #[test]
    fn strategy_kind_parses_loosely() {
        assert_eq!("local_gradient".parse::<StrategyKind>(), Ok(StrategyKind::LocalGradient));
        assert_eq!("ExactMILP".parse::<StrategyKind>(), Ok(StrategyKind::ExactMilp));
        assert_eq!(
            "population-multi-objective".parse::<StrategyKind>(),
            Ok(StrategyKind::PopulationMultiObjective)
        );
        assert!(matches!("simplex".parse::<StrategyKind>(), Err(OptError::InvalidStrategy { .. })));

        let strategy = Strategy::from(StrategyKind::GlobalDeterministic);
        assert_eq!(strategy.kind(), StrategyKind::GlobalDeterministic);
        assert_eq!(strategy.name(), "GlobalDeterministic");
    }

    #[test]
    fn scale_must_be_positive() {
        let ev = evaluator();
        assert!(Optimizer::new(&ev).with_scale(0.0).is_err());
        assert!(Optimizer::new(&ev).with_scale(f64::NAN).is_err());
        let opt = Optimizer::new(&ev).with_scale(1e3).unwrap();
        assert_relative_eq!(opt.scale(), 1e3);
    }

    #[test]
    // Purpose
    // -------
    // An unknown target is a setup error, not a default.
    fn unknown_target_fails_fast() {
        let ev = evaluator();
        let err = Optimizer::new(&ev)
            .optimize(&OptimizationRequest::new("Missing"), &Strategy::default())
            .unwrap_err();
        assert_eq!(err, OptError::Surface(SurfaceError::UnknownMetric { name: "Missing".to_string() }));
    }

    #[test]
    // Purpose
    // -------
    // Each metric is maximized on its own under the budget.
    //
    // Expect
    // ------
    // M: all on A → 10. N: all on B → 3.
    fn max_metrics_reports_each_ceiling() {
        let ev = evaluator();
        let base = OptimizationRequest::new("M")
            .with_total_amount(100.0)
            .with_min_metric(BTreeMap::from([("N".to_string(), 100.0)]));

        let ceilings =
            Optimizer::new(&ev).max_metrics(&base, &LocalGradientOptions::default()).unwrap();

        assert_relative_eq!(ceilings["M"].unwrap(), 10.0, epsilon = 1e-6);
        assert_relative_eq!(ceilings["N"].unwrap(), 3.0, epsilon = 1e-6);
    }

    #[test]
    // Purpose
    // -------
    // Raising the floor on N trades M away along the budget line.
    //
    // Given
    // -----
    // Budget 100; floors N ≥ 1 and N ≥ 2.
    //
    // Expect
    // ------
    // N = 1 + 0.02·B with A + B = 100 gives B = 0 (N = 1) and B = 50
    // (N = 2); M = 10 and 7.5.
    fn epsilon_frontier_traces_tradeoff() {
        let ev = evaluator();
        let request = OptimizationRequest::new("M").with_total_amount(100.0);
        let strategy = Strategy::ExactMilp(MilpOptions::default());

        let frontier =
            Optimizer::new(&ev).epsilon_frontier(&request, "N", &[1.0, 2.0], &strategy).unwrap();

        assert_eq!(frontier.len(), 2);
        assert_relative_eq!(frontier[0].metric("M").unwrap(), 10.0, epsilon = 1e-6);
        assert_relative_eq!(frontier[1].metric("M").unwrap(), 7.5, epsilon = 1e-6);
        assert_relative_eq!(frontier[1].metric("N").unwrap(), 2.0, epsilon = 1e-6);
    }

    #[test]
    fn pareto_front_requires_objectives() {
        let ev = evaluator();
        let err = Optimizer::new(&ev)
            .pareto_front(&OptimizationRequest::new("M"), &[], &PopulationOptions::default())
            .unwrap_err();
        assert_eq!(err, OptError::NoObjectives);
        assert!(Optimizer::new(&ev)
            .pareto_front(&OptimizationRequest::new("M"), &["Nope"], &PopulationOptions::default())
            .is_err());
    }
}
