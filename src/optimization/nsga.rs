//! optimization::nsga — the PopulationMultiObjective strategy (NSGA-II).
//!
//! Purpose
//! -------
//! Trade several metrics off simultaneously. Each metric listed as an
//! objective is maximized; budget and floors stay as constraints and are
//! handled by constraint-domination.
//!
//! Key behaviors
//! -------------
//! - Fixed population size and offspring count per generation.
//! - Parents chosen by binary tournament on (front rank, crowding distance);
//!   children produced by simulated binary crossover and polynomial
//!   mutation, clipped to the bounds.
//! - Survivors chosen front by front from parents ∪ offspring, the last
//!   admitted front truncated by crowding distance.
//! - Stops when the best first objective has moved less than
//!   `tol · (1 + |best|)` over the last `STALL_WINDOW` generations, or at
//!   the generation cap.
//!
//! Conventions
//! -----------
//! - Objective vectors are costs (negated metric values) throughout.
//! - Used as a single-objective [`AllocationSolver`] the objective list is
//!   the request's target, and the winner is optionally polished with
//!   [`LocalGradient`].
use std::{cmp::Ordering, time::Instant};

use argmin::core::{Error, Problem, Solver, State, TerminationReason, TerminationStatus, KV};
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::{debug, info, warn};

use crate::optimization::{
    adapter::ArgMinAdapter,
    errors::{OptError, OptResult},
    local_gradient::{LocalGradient, LocalGradientOptions},
    problem::{deb_better, AllocationProblem},
    run::run_solver,
    traits::{AllocationSolver, ExitStatus, Optimum, Tolerances},
    types::{AllocationState, Vector, FEASIBILITY_TOL},
    validation::verify_distribution_index,
};

/// Generations over which the best objective must stall.
const STALL_WINDOW: usize = 10;
/// Probability that a selected pair is recombined.
const CROSSOVER_PROBABILITY: f64 = 0.9;

/// Options for the PopulationMultiObjective strategy.
///
/// Default: population 100, offspring 100, tol `1e-6`, 250 generations,
/// unseeded, `crossover_eta = 15`, `mutation_eta = 20`, polish on.
#[derive(Debug, Clone, PartialEq)]
pub struct PopulationOptions {
    pub population: usize,
    pub offspring: usize,
    pub tols: Tolerances,
    pub seed: Option<u64>,
    pub crossover_eta: f64,
    pub mutation_eta: f64,
    pub polish: bool,
    pub verbose: bool,
}

impl PopulationOptions {
    /// # Errors
    /// - [`OptError::InvalidPopulation`] when `population < 4` or
    ///   `offspring < 2`.
    /// - [`OptError::InvalidCrossover`] for a negative distribution index.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        population: usize, offspring: usize, tols: Tolerances, seed: Option<u64>, crossover_eta: f64,
        mutation_eta: f64, polish: bool, verbose: bool,
    ) -> OptResult<Self> {
        let options =
            Self { population, offspring, tols, seed, crossover_eta, mutation_eta, polish, verbose };
        options.validate()?;
        Ok(options)
    }

    /// Checks applied by [`PopulationOptions::new`]; run again before every
    /// evolution since the fields are public.
    ///
    /// # Errors
    /// As [`PopulationOptions::new`], plus invalid `tols`.
    pub fn validate(&self) -> OptResult<()> {
        if self.population < 4 {
            return Err(OptError::InvalidPopulation {
                size: self.population,
                reason: "Population must hold at least four members.",
            });
        }
        if self.offspring < 2 {
            return Err(OptError::InvalidPopulation {
                size: self.offspring,
                reason: "At least two offspring are required per generation.",
            });
        }
        self.tols.validate()?;
        verify_distribution_index(self.crossover_eta)?;
        verify_distribution_index(self.mutation_eta)
    }
}

impl Default for PopulationOptions {
    fn default() -> Self {
        Self {
            population: 100,
            offspring: 100,
            tols: Tolerances { tol: Some(1e-6), max_iter: Some(250) },
            seed: None,
            crossover_eta: 15.0,
            mutation_eta: 20.0,
            polish: true,
            verbose: false,
        }
    }
}

/// One population member.
#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    pub x: Vector,
    /// Costs, one per objective.
    pub objectives: Vector,
    pub violation: f64,
    pub rank: usize,
    pub crowding: f64,
}

impl Member {
    pub fn is_feasible(&self) -> bool {
        self.violation <= FEASIBILITY_TOL
    }

    /// Constraint-domination: feasibility first, then Pareto dominance.
    pub fn dominates(&self, other: &Member) -> bool {
        match (self.is_feasible(), other.is_feasible()) {
            (true, false) => true,
            (false, true) => false,
            (false, false) => self.violation < other.violation,
            (true, true) => {
                let mut strictly = false;
                for (a, b) in self.objectives.iter().zip(other.objectives.iter()) {
                    if a > b {
                        return false;
                    }
                    strictly |= a < b;
                }
                strictly
            }
        }
    }
}

/// Final population of an NSGA-II run.
#[derive(Debug, Clone)]
pub struct Evolution {
    pub members: Vec<Member>,
    pub converged: bool,
    pub generations: u64,
}

/// NSGA-II population strategy.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Nsga2 {
    pub options: PopulationOptions,
}

impl Nsga2 {
    pub fn new(options: PopulationOptions) -> Self {
        Self { options }
    }

    /// Evolve a population against the given metric indices.
    ///
    /// # Errors
    /// [`OptError::NoObjectives`] for an empty objective list; evaluation
    /// failures otherwise.
    pub fn evolve(&self, problem: &AllocationProblem<'_>, objectives: &[usize]) -> OptResult<Evolution> {
        self.options.validate()?;
        if objectives.is_empty() {
            return Err(OptError::NoObjectives);
        }
        let solver = NsgaSolver::new(&self.options, problem, objectives);
        let summary = run_solver(
            problem,
            solver,
            problem.initial().clone(),
            self.options.tols.max_iter,
            self.options.verbose,
        )?;
        Ok(Evolution {
            members: summary.solver.population,
            converged: summary.solver.converged,
            generations: summary.iterations,
        })
    }

    /// Non-dominated feasible members as [`Optimum`]s, ordered by
    /// decreasing value of the first objective metric. Near-duplicates
    /// (objectives equal to within `1e-9` relative) are dropped.
    ///
    /// # Errors
    /// As [`Nsga2::evolve`].
    pub fn pareto_front(
        &self, problem: &AllocationProblem<'_>, objectives: &[usize],
    ) -> OptResult<Vec<Optimum>> {
        let started = Instant::now();
        let evolution = self.evolve(problem, objectives)?;
        let mut front: Vec<Member> =
            evolution.members.into_iter().filter(|m| m.rank == 0 && m.is_feasible()).collect();
        front.sort_by(|a, b| a.objectives[0].total_cmp(&b.objectives[0]));
        front.dedup_by(|a, b| {
            a.objectives
                .iter()
                .zip(b.objectives.iter())
                .all(|(x, y)| (x - y).abs() <= 1e-9 * (1.0 + y.abs()))
        });
        if front.is_empty() {
            warn!(generations = evolution.generations, "no feasible member in the final population");
        }

        let status =
            if evolution.converged { ExitStatus::Converged } else { ExitStatus::IterationLimit };
        let detail = format!("rank-0 member after {} generations", evolution.generations);
        front.iter().map(|m| problem.optimum(&m.x, status, &detail, started)).collect()
    }
}

impl AllocationSolver for Nsga2 {
    fn name(&self) -> &'static str {
        "PopulationMultiObjective"
    }

    fn solve(&self, problem: &AllocationProblem<'_>) -> OptResult<Optimum> {
        let started = Instant::now();
        let evolution = self.evolve(problem, &[problem.target()])?;
        let best = evolution.members.iter().fold(None::<&Member>, |best, m| match best {
            Some(b) if !deb_better(m.objectives[0], m.violation, b.objectives[0], b.violation) => Some(b),
            _ => Some(m),
        });
        let mut x = best.map(|m| m.x.clone()).unwrap_or_else(|| problem.initial().clone());
        let mut converged = evolution.converged;
        let mut detail = if converged {
            format!("best objective stalled after {} generations", evolution.generations)
        } else {
            format!("generation cap reached after {} generations", evolution.generations)
        };

        if self.options.polish {
            let local = LocalGradient::new(LocalGradientOptions::default()).search(problem, x.clone())?;
            let (cost, violation) = (problem.objective(&x)?, problem.violation(&x)?);
            if !deb_better(cost, violation, local.cost, local.violation) {
                x = local.x;
                converged |= local.status == ExitStatus::Converged;
                detail = format!("{detail}; polished: {}", local.detail);
            }
        }

        let (status, violation) = problem.settle(&x, converged)?;
        match status {
            ExitStatus::Converged => {
                info!(target_metric = problem.target_name(), %detail, "population search converged")
            }
            _ => warn!(target_metric = problem.target_name(), violation, %detail, "population search ended early"),
        }
        problem.optimum(&x, status, &detail, started)
    }
}

// ---- Sorting ----

/// Assign front ranks (0 = non-dominated) and return the fronts.
pub fn non_dominated_sort(members: &mut [Member]) -> Vec<Vec<usize>> {
    let n = members.len();
    let mut dominated_by: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut counts = vec![0usize; n];
    for i in 0..n {
        for j in (i + 1)..n {
            if members[i].dominates(&members[j]) {
                dominated_by[i].push(j);
                counts[j] += 1;
            } else if members[j].dominates(&members[i]) {
                dominated_by[j].push(i);
                counts[i] += 1;
            }
        }
    }
    let mut fronts = Vec::new();
    let mut current: Vec<usize> = (0..n).filter(|&i| counts[i] == 0).collect();
    let mut rank = 0;
    while !current.is_empty() {
        let mut next = Vec::new();
        for &i in &current {
            members[i].rank = rank;
            for &j in &dominated_by[i] {
                counts[j] -= 1;
                if counts[j] == 0 {
                    next.push(j);
                }
            }
        }
        fronts.push(current);
        current = next;
        rank += 1;
    }
    fronts
}

/// Crowding distance within one front; boundary members get infinity.
pub fn assign_crowding(members: &mut [Member], front: &[usize]) {
    for &i in front {
        members[i].crowding = 0.0;
    }
    if front.len() <= 2 {
        for &i in front {
            members[i].crowding = f64::INFINITY;
        }
        return;
    }
    let n_obj = members[front[0]].objectives.len();
    let mut order = front.to_vec();
    for k in 0..n_obj {
        order.sort_by(|&a, &b| members[a].objectives[k].total_cmp(&members[b].objectives[k]));
        let first = order[0];
        let last = order[order.len() - 1];
        let span = members[last].objectives[k] - members[first].objectives[k];
        members[first].crowding = f64::INFINITY;
        members[last].crowding = f64::INFINITY;
        if span <= 0.0 {
            continue;
        }
        for w in 1..order.len() - 1 {
            let gap = members[order[w + 1]].objectives[k] - members[order[w - 1]].objectives[k];
            members[order[w]].crowding += gap / span;
        }
    }
}

fn crowded_cmp(a: &Member, b: &Member) -> Ordering {
    a.rank.cmp(&b.rank).then_with(|| b.crowding.total_cmp(&a.crowding))
}

// ---- argmin solver ----

/// NSGA-II generation loop run by argmin's `Executor`.
#[derive(Debug, Clone)]
pub struct NsgaSolver {
    objectives: Vec<usize>,
    size: usize,
    offspring: usize,
    tol: f64,
    crossover_eta: f64,
    mutation_eta: f64,
    lower: Vector,
    upper: Vector,
    rng: StdRng,
    history: Vec<f64>,
    pub population: Vec<Member>,
    pub converged: bool,
}

impl NsgaSolver {
    pub fn new(options: &PopulationOptions, problem: &AllocationProblem<'_>, objectives: &[usize]) -> Self {
        let rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            objectives: objectives.to_vec(),
            size: options.population,
            offspring: options.offspring,
            tol: options.tols.tol.unwrap_or(0.0),
            crossover_eta: options.crossover_eta,
            mutation_eta: options.mutation_eta,
            lower: problem.lower().clone(),
            upper: problem.upper().clone(),
            rng,
            history: Vec::new(),
            population: Vec::new(),
            converged: false,
        }
    }

    fn member(&self, problem: &mut Problem<ArgMinAdapter<'_, '_>>, x: Vector) -> Result<Member, Error> {
        let objectives = problem.problem("objective_count", |p| p.objectives(&x, &self.objectives))?;
        let (_, violation) = problem.problem("constraint_count", |p| p.constraints_and_violation(&x))?;
        Ok(Member { x, objectives, violation, rank: 0, crowding: 0.0 })
    }

    fn tournament(&mut self) -> usize {
        let a = self.rng.gen_range(0..self.population.len());
        let b = self.rng.gen_range(0..self.population.len());
        match crowded_cmp(&self.population[a], &self.population[b]) {
            Ordering::Greater => b,
            _ => a,
        }
    }

    /// Simulated binary crossover.
    fn crossover(&mut self, a: &Vector, b: &Vector) -> (Vector, Vector) {
        let (mut c1, mut c2) = (a.clone(), b.clone());
        if self.rng.gen::<f64>() > CROSSOVER_PROBABILITY {
            return (c1, c2);
        }
        let exponent = 1.0 / (self.crossover_eta + 1.0);
        for j in 0..a.len() {
            if self.rng.gen::<f64>() >= 0.5 || (a[j] - b[j]).abs() <= 1e-14 {
                continue;
            }
            let u: f64 = self.rng.gen();
            let beta =
                if u <= 0.5 { (2.0 * u).powf(exponent) } else { (1.0 / (2.0 * (1.0 - u))).powf(exponent) };
            c1[j] = 0.5 * ((1.0 + beta) * a[j] + (1.0 - beta) * b[j]);
            c2[j] = 0.5 * ((1.0 - beta) * a[j] + (1.0 + beta) * b[j]);
        }
        (c1, c2)
    }

    /// Polynomial mutation with per-variable probability `1 / dim`, then clip.
    fn mutate(&mut self, mut x: Vector) -> Vector {
        let dim = x.len();
        let exponent = 1.0 / (self.mutation_eta + 1.0);
        for j in 0..dim {
            if self.rng.gen::<f64>() < 1.0 / dim as f64 {
                let u: f64 = self.rng.gen();
                let delta = if u < 0.5 {
                    (2.0 * u).powf(exponent) - 1.0
                } else {
                    1.0 - (2.0 * (1.0 - u)).powf(exponent)
                };
                x[j] += delta * (self.upper[j] - self.lower[j]);
            }
            x[j] = x[j].max(self.lower[j]).min(self.upper[j]);
        }
        x
    }

    fn rank_population(&mut self) {
        let fronts = non_dominated_sort(&mut self.population);
        for front in &fronts {
            assign_crowding(&mut self.population, front);
        }
    }

    fn best(&self) -> Option<&Member> {
        self.population.iter().fold(None, |best: Option<&Member>, m| match best {
            Some(b) if !deb_better(m.objectives[0], m.violation, b.objectives[0], b.violation) => Some(b),
            _ => Some(m),
        })
    }

    fn record_best(&mut self) {
        let best = self.best().filter(|m| m.is_feasible()).map(|m| m.objectives[0]);
        let value = best.unwrap_or(f64::INFINITY);
        self.history.push(value);
        let n = self.history.len();
        self.converged = value.is_finite()
            && n > STALL_WINDOW
            && (self.history[n - 1 - STALL_WINDOW] - value).abs() <= self.tol * (1.0 + value.abs());
    }

    fn state_for(&self, state: AllocationState) -> AllocationState {
        match self.best() {
            Some(best) => state.param(best.x.clone()).cost(best.objectives[0]),
            None => state,
        }
    }
}

impl<'p, 'a> Solver<ArgMinAdapter<'p, 'a>, AllocationState> for NsgaSolver {
    const NAME: &'static str = "PopulationMultiObjective (NSGA-II)";

    fn init(
        &mut self, problem: &mut Problem<ArgMinAdapter<'p, 'a>>, state: AllocationState,
    ) -> Result<(AllocationState, Option<KV>), Error> {
        let dim = self.lower.len();
        self.population.clear();
        if let Some(x0) = state.get_param() {
            let first = self.member(problem, x0.clone())?;
            self.population.push(first);
        }
        while self.population.len() < self.size {
            let x: Vector = (0..dim)
                .map(|j| self.lower[j] + self.rng.gen::<f64>() * (self.upper[j] - self.lower[j]))
                .collect();
            let member = self.member(problem, x)?;
            self.population.push(member);
        }
        self.rank_population();
        self.record_best();
        Ok((self.state_for(state), None))
    }

    fn next_iter(
        &mut self, problem: &mut Problem<ArgMinAdapter<'p, 'a>>, state: AllocationState,
    ) -> Result<(AllocationState, Option<KV>), Error> {
        let mut children = Vec::with_capacity(self.offspring + 1);
        while children.len() < self.offspring {
            let (pa, pb) = (self.tournament(), self.tournament());
            let (a, b) = (self.population[pa].x.clone(), self.population[pb].x.clone());
            let (c1, c2) = self.crossover(&a, &b);
            for child in [c1, c2] {
                if children.len() < self.offspring {
                    let child = self.mutate(child);
                    children.push(self.member(problem, child)?);
                }
            }
        }

        let mut combined = std::mem::take(&mut self.population);
        combined.extend(children);
        let fronts = non_dominated_sort(&mut combined);
        let mut survivors = Vec::with_capacity(self.size);
        for front in fronts {
            assign_crowding(&mut combined, &front);
            if survivors.len() + front.len() <= self.size {
                survivors.extend(front);
                continue;
            }
            let mut last = front;
            last.sort_by(|&a, &b| combined[b].crowding.total_cmp(&combined[a].crowding));
            survivors.extend(last.into_iter().take(self.size - survivors.len()));
            break;
        }
        self.population = survivors.into_iter().map(|i| combined[i].clone()).collect();
        self.record_best();
        debug!(
            generation = state.get_iter(),
            best = ?self.history.last(),
            "nsga generation"
        );
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
