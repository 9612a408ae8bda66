//! optimization::differential_evolution — the GlobalStochastic strategy.
//!
//! Purpose
//! -------
//! Seeded population search (DE/best/1/bin with dithering) for a single
//! target metric. Budget and floors travel as one vector-valued constraint
//! evaluated per member; members are ranked with Deb's feasibility rules.
//!
//! Key behaviors
//! -------------
//! - Population of `max(5, population_factor · dim)` members initialized by
//!   Latin hypercube, uniform random, or Sobol sampling inside the bounds;
//!   the request's starting point replaces the first member.
//! - Each generation draws a mutation factor uniformly from `mutation`,
//!   builds `best + F·(r1 - r2)`, applies binomial crossover with
//!   probability `recombination`, and re-samples out-of-bounds entries.
//! - A trial replaces its target unless Deb's rules prefer the target.
//! - Stops when every member is feasible and the cost spread satisfies
//!   `std ≤ atol + tol·|mean|`, or at the generation cap.
//! - Optionally polishes the winner with [`LocalGradient`].
//!
//! Invariants & assumptions
//! ------------------------
//! - Same seed, same options, same problem → same result.
//! - Exact convergence is not guaranteed; looser tolerances are expected.
use std::{str::FromStr, time::Instant};

use argmin::core::{Error, Problem, Solver, State, TerminationReason, TerminationStatus, KV};
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use statrs::statistics::Statistics;
use tracing::{debug, info, warn};

use crate::optimization::{
    adapter::ArgMinAdapter,
    errors::{OptError, OptResult},
    local_gradient::{LocalGradient, LocalGradientOptions},
    problem::{deb_better, AllocationProblem},
    run::run_solver,
    sobol::Sobol,
    traits::{AllocationSolver, ExitStatus, Optimum, Tolerances},
    types::{AllocationState, Vector, FEASIBILITY_TOL},
    validation::verify_probability,
};

/// How the initial population is laid out in the bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitStrategy {
    #[default]
    LatinHypercube,
    Random,
    Sobol,
}

impl FromStr for InitStrategy {
    type Err = OptError;

    /// Case-insensitive: `latinhypercube` (or `lhs`), `random`, `sobol`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "latinhypercube" | "lhs" => Ok(InitStrategy::LatinHypercube),
            "random" => Ok(InitStrategy::Random),
            "sobol" => Ok(InitStrategy::Sobol),
            _ => Err(OptError::InvalidStrategy {
                name: s.to_string(),
                reason: "Valid options are case insensitive 'LatinHypercube', 'Random' or 'Sobol'.",
            }),
        }
    }
}

/// Options for the GlobalStochastic strategy.
///
/// Default: relative tol `1e-2`, 1000 generations, `atol = 0`,
/// `population_factor = 15`, `mutation = (0.5, 1.0)`,
/// `recombination = 0.7`, Latin hypercube init, unseeded, polish on.
#[derive(Debug, Clone, PartialEq)]
pub struct DifferentialEvolutionOptions {
    pub tols: Tolerances,
    pub atol: f64,
    pub population_factor: usize,
    pub mutation: (f64, f64),
    pub recombination: f64,
    pub init: InitStrategy,
    pub seed: Option<u64>,
    pub polish: bool,
    pub verbose: bool,
}

impl DifferentialEvolutionOptions {
    /// Validated options.
    ///
    /// # Errors
    /// - [`OptError::InvalidTolerance`] for a negative or non-finite `atol`.
    /// - [`OptError::InvalidPopulation`] when `population_factor == 0`.
    /// - [`OptError::InvalidMutation`] unless `0 ≤ low ≤ high ≤ 2`.
    /// - [`OptError::InvalidCrossover`] when `recombination ∉ [0, 1]`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tols: Tolerances, atol: f64, population_factor: usize, mutation: (f64, f64),
        recombination: f64, init: InitStrategy, seed: Option<u64>, polish: bool, verbose: bool,
    ) -> OptResult<Self> {
        let options = Self {
            tols,
            atol,
            population_factor,
            mutation,
            recombination,
            init,
            seed,
            polish,
            verbose,
        };
        options.validate()?;
        Ok(options)
    }

    /// Checks applied by [`DifferentialEvolutionOptions::new`], repeated at
    /// the start of every solve.
    ///
    /// # Errors
    /// As [`DifferentialEvolutionOptions::new`], plus invalid `tols`.
    pub fn validate(&self) -> OptResult<()> {
        if !self.atol.is_finite() || self.atol < 0.0 {
            return Err(OptError::InvalidTolerance {
                name: "atol",
                tol: self.atol,
                reason: "Absolute tolerance must be finite and non-negative.",
            });
        }
        if self.population_factor == 0 {
            return Err(OptError::InvalidPopulation {
                size: self.population_factor,
                reason: "Population factor must be greater than zero.",
            });
        }
        let (low, high) = self.mutation;
        if !(0.0..=2.0).contains(&low) || !(0.0..=2.0).contains(&high) || low > high {
            return Err(OptError::InvalidMutation {
                low,
                high,
                reason: "Mutation bounds must satisfy 0 <= low <= high <= 2.",
            });
        }
        self.tols.validate()?;
        verify_probability(self.recombination)
    }
}

impl Default for DifferentialEvolutionOptions {
    fn default() -> Self {
        Self {
            tols: Tolerances { tol: Some(1e-2), max_iter: Some(1000) },
            atol: 0.0,
            population_factor: 15,
            mutation: (0.5, 1.0),
            recombination: 0.7,
            init: InitStrategy::LatinHypercube,
            seed: None,
            polish: true,
            verbose: false,
        }
    }
}

/// Differential-evolution global strategy.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DifferentialEvolution {
    pub options: DifferentialEvolutionOptions,
}

impl DifferentialEvolution {
    pub fn new(options: DifferentialEvolutionOptions) -> Self {
        Self { options }
    }
}

impl AllocationSolver for DifferentialEvolution {
    fn name(&self) -> &'static str {
        "GlobalStochastic"
    }

    fn solve(&self, problem: &AllocationProblem<'_>) -> OptResult<Optimum> {
        let started = Instant::now();
        self.options.validate()?;
        let solver = DeSolver::new(&self.options, problem)?;
        let summary = run_solver(
            problem,
            solver,
            problem.initial().clone(),
            self.options.tols.max_iter,
            self.options.verbose,
        )?;
        let mut x = summary.param.clone().unwrap_or_else(|| problem.initial().clone());
        let mut converged = summary.solver.converged;
        let mut detail = if converged {
            format!("population converged after {} generations", summary.iterations)
        } else {
            format!("generation cap reached after {} generations", summary.iterations)
        };

        if self.options.polish {
            let local = LocalGradient::new(LocalGradientOptions::default()).search(problem, x.clone())?;
            let (cost, violation) = (problem.objective(&x)?, problem.violation(&x)?);
            if !deb_better(cost, violation, local.cost, local.violation) {
                debug!(before = cost, after = local.cost, "polished differential-evolution winner");
                x = local.x;
                converged |= local.status == ExitStatus::Converged;
                detail = format!("{detail}; polished: {}", local.detail);
            }
        }

        let (status, violation) = problem.settle(&x, converged)?;
        match status {
            ExitStatus::Converged => {
                info!(target_metric = problem.target_name(), %detail, "differential evolution converged")
            }
            _ => warn!(
                target_metric = problem.target_name(),
                violation,
                %detail,
                "differential evolution stopped without a converged feasible point"
            ),
        }
        problem.optimum(&x, status, &detail, started)
    }
}

// ---- argmin solver ----

/// DE/best/1/bin state machine run by argmin's `Executor`.
#[derive(Debug, Clone)]
pub struct DeSolver {
    tol: f64,
    atol: f64,
    size: usize,
    mutation: (f64, f64),
    recombination: f64,
    init: InitStrategy,
    lower: Vector,
    upper: Vector,
    rng: StdRng,
    population: Vec<Vector>,
    costs: Vec<f64>,
    violations: Vec<f64>,
    best: usize,
    pub converged: bool,
}

impl DeSolver {
    /// # Errors
    /// [`OptError::SobolDimension`] for Sobol initialization above
    /// [`crate::optimization::sobol::MAX_DIM`].
    pub fn new(options: &DifferentialEvolutionOptions, problem: &AllocationProblem<'_>) -> OptResult<Self> {
        let dim = problem.dim();
        if options.init == InitStrategy::Sobol {
            Sobol::new(dim)?;
        }
        let rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            tol: options.tols.tol.unwrap_or(0.0),
            atol: options.atol,
            size: (options.population_factor * dim).max(5),
            mutation: options.mutation,
            recombination: options.recombination,
            init: options.init,
            lower: problem.lower().clone(),
            upper: problem.upper().clone(),
            rng,
            population: Vec::new(),
            costs: Vec::new(),
            violations: Vec::new(),
            best: 0,
            converged: false,
        })
    }

    /// Points of the unit cube laid out per the init strategy.
    fn unit_samples(&mut self) -> Result<Vec<Vec<f64>>, Error> {
        let dim = self.lower.len();
        let n = self.size;
        let samples = match self.init {
            InitStrategy::Random => {
                (0..n).map(|_| (0..dim).map(|_| self.rng.gen::<f64>()).collect()).collect()
            }
            InitStrategy::Sobol => Sobol::new(dim)?.take_points(n),
            InitStrategy::LatinHypercube => {
                let mut samples = vec![vec![0.0; dim]; n];
                for j in 0..dim {
                    let mut strata: Vec<usize> = (0..n).collect();
                    strata.shuffle(&mut self.rng);
                    for (sample, stratum) in samples.iter_mut().zip(strata) {
                        sample[j] = (stratum as f64 + self.rng.gen::<f64>()) / n as f64;
                    }
                }
                samples
            }
        };
        Ok(samples)
    }

    fn within_bounds(&self, unit: &[f64]) -> Vector {
        unit.iter()
            .zip(self.lower.iter().zip(self.upper.iter()))
            .map(|(u, (&l, &h))| l + u * (h - l))
            .collect()
    }

    fn evaluate(
        problem: &mut Problem<ArgMinAdapter<'_, '_>>, x: &Vector,
    ) -> Result<(f64, f64), Error> {
        let cost = problem.cost(x)?;
        let (_, violation) = problem.problem("constraint_count", |p| p.constraints_and_violation(x))?;
        Ok((cost, violation))
    }

    fn distinct_other(&mut self, exclude: &[usize]) -> usize {
        loop {
            let r = self.rng.gen_range(0..self.size);
            if !exclude.contains(&r) {
                return r;
            }
        }
    }

    fn spread_converged(&self) -> bool {
        if self.violations.iter().any(|&v| v > FEASIBILITY_TOL) {
            return false;
        }
        let mean = self.costs.iter().mean();
        let std = self.costs.iter().population_std_dev();
        std <= self.atol + self.tol * mean.abs()
    }

    fn state_for(&self, state: AllocationState) -> AllocationState {
        state.param(self.population[self.best].clone()).cost(self.costs[self.best])
    }
}

impl<'p, 'a> Solver<ArgMinAdapter<'p, 'a>, AllocationState> for DeSolver {
    const NAME: &'static str = "GlobalStochastic (differential evolution)";

    fn init(
        &mut self, problem: &mut Problem<ArgMinAdapter<'p, 'a>>, state: AllocationState,
    ) -> Result<(AllocationState, Option<KV>), Error> {
        let samples = self.unit_samples()?;
        self.population = samples.iter().map(|u| self.within_bounds(u)).collect();
        if let Some(x0) = state.get_param() {
            self.population[0] = x0.clone();
        }
        self.costs.clear();
        self.violations.clear();
        for x in &self.population {
            let (cost, violation) = Self::evaluate(problem, x)?;
            self.costs.push(cost);
            self.violations.push(violation);
        }
        self.best = (1..self.size).fold(0, |best, i| {
            if deb_better(self.costs[i], self.violations[i], self.costs[best], self.violations[best]) {
                i
            } else {
                best
            }
        });
        Ok((self.state_for(state), None))
    }

    fn next_iter(
        &mut self, problem: &mut Problem<ArgMinAdapter<'p, 'a>>, state: AllocationState,
    ) -> Result<(AllocationState, Option<KV>), Error> {
        let dim = self.lower.len();
        let (low, high) = self.mutation;
        let factor = low + self.rng.gen::<f64>() * (high - low);

        for i in 0..self.size {
            let r1 = self.distinct_other(&[i]);
            let r2 = self.distinct_other(&[i, r1]);
            let forced = self.rng.gen_range(0..dim);
            let mut trial = self.population[i].clone();
            for j in 0..dim {
                if j == forced || self.rng.gen::<f64>() < self.recombination {
                    let v = self.population[self.best][j]
                        + factor * (self.population[r1][j] - self.population[r2][j]);
                    trial[j] = if v < self.lower[j] || v > self.upper[j] {
                        self.lower[j] + self.rng.gen::<f64>() * (self.upper[j] - self.lower[j])
                    } else {
                        v
                    };
                }
            }
            let (cost, violation) = Self::evaluate(problem, &trial)?;
            if !deb_better(self.costs[i], self.violations[i], cost, violation) {
                self.population[i] = trial;
                self.costs[i] = cost;
                self.violations[i] = violation;
                if deb_better(cost, violation, self.costs[self.best], self.violations[self.best]) {
                    self.best = i;
                }
            }
        }
        self.converged = self.spread_converged();
        Ok((self.state_for(state), None))
    }

    fn terminate(&mut self, _state: &AllocationState) -> TerminationStatus {
        if self.converged {
            TerminationStatus::Terminated(TerminationReason::SolverConverged)
        } else {
            TerminationStatus::NotTerminated
        }
    }
}
