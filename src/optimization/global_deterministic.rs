//! optimization::global_deterministic — the GlobalDeterministic strategy.
//!
//! Purpose
//! -------
//! Deterministic global search in the spirit of simplicial homology global
//! optimization: sample the box, identify the sampled local minimizers
//! through a neighborhood graph, and refine the most promising ones with
//! [`LocalGradient`].
//!
//! Sampling methods
//! ----------------
//! - `Simplicial`: vertices of a Freudenthal (Kuhn) triangulation of the box
//!   with `2^iters` intervals per axis. Neighbors of a vertex `v` are
//!   `v ± Σ_{i∈S} e_i` for every non-empty axis set `S`. Refining `iters`
//!   drives the sample toward every basin, at exponential cost in the
//!   number of categories; depth is lowered automatically to keep the work
//!   bounded, and the method falls back to Sobol sampling when even depth 1
//!   is too large.
//! - `Sobol`: the lower corner plus `n_points` Sobol points; neighbors are
//!   the `2·dim + 2` nearest samples. Faster, without a convergence
//!   guarantee.
//!
//! Invariants & assumptions
//! ------------------------
//! - Sampled points are ranked with Deb's feasibility rules; constraints are
//!   evaluated as a list of named inequalities (budget, then floors).
//! - Fully deterministic: no random state is involved.
use std::{str::FromStr, time::Instant};

use argmin_math::ArgminL2Norm;
use tracing::{debug, info, warn};

use crate::optimization::{
    errors::{OptError, OptResult},
    local_gradient::{LocalGradient, LocalGradientOptions},
    problem::{deb_better, AllocationProblem},
    sobol::Sobol,
    traits::{AllocationSolver, ExitStatus, Optimum},
    types::Vector,
};

/// Upper bound on `vertices · neighbors` for simplicial sampling.
const SIMPLICIAL_WORK_LIMIT: usize = 4_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SamplingMethod {
    #[default]
    Simplicial,
    Sobol,
}

impl FromStr for SamplingMethod {
    type Err = OptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "simplicial" => Ok(SamplingMethod::Simplicial),
            "sobol" => Ok(SamplingMethod::Sobol),
            _ => Err(OptError::InvalidStrategy {
                name: s.to_string(),
                reason: "Valid options are case insensitive 'Simplicial' or 'Sobol'.",
            }),
        }
    }
}

/// Options for the GlobalDeterministic strategy.
///
/// Default: simplicial sampling, `iters = 3`, `n_points = 128`,
/// `max_local = 5`, default local options.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalDeterministicOptions {
    pub sampling: SamplingMethod,
    pub iters: usize,
    pub n_points: usize,
    pub max_local: usize,
    pub local: LocalGradientOptions,
}

impl GlobalDeterministicOptions {
    /// # Errors
    /// - [`OptError::InvalidMaxIter`] when `iters == 0`.
    /// - [`OptError::InvalidPopulation`] when `n_points` or `max_local` is 0.
    pub fn new(
        sampling: SamplingMethod, iters: usize, n_points: usize, max_local: usize,
        local: LocalGradientOptions,
    ) -> OptResult<Self> {
        let options = Self { sampling, iters, n_points, max_local, local };
        options.validate()?;
        Ok(options)
    }

    /// # Errors
    /// As [`GlobalDeterministicOptions::new`], plus invalid local options.
    pub fn validate(&self) -> OptResult<()> {
        if self.iters == 0 {
            return Err(OptError::InvalidMaxIter {
                max_iter: self.iters,
                reason: "Simplicial refinement depth must be greater than zero.",
            });
        }
        if self.n_points == 0 {
            return Err(OptError::InvalidPopulation {
                size: self.n_points,
                reason: "Sobol sampling needs at least one point.",
            });
        }
        if self.max_local == 0 {
            return Err(OptError::InvalidPopulation {
                size: self.max_local,
                reason: "At least one local refinement is required.",
            });
        }
        self.local.validate()
    }
}

impl Default for GlobalDeterministicOptions {
    fn default() -> Self {
        Self {
            sampling: SamplingMethod::Simplicial,
            iters: 3,
            n_points: 128,
            max_local: 5,
            local: LocalGradientOptions::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GlobalDeterministic {
    pub options: GlobalDeterministicOptions,
}

/// Evaluated sample point.
#[derive(Debug, Clone)]
struct Sample {
    x: Vector,
    cost: f64,
    violation: f64,
}

impl GlobalDeterministic {
    pub fn new(options: GlobalDeterministicOptions) -> Self {
        Self { options }
    }

    /// Sample, then return the indices of sampled local minimizers (best
    /// first) along with the samples.
    fn sample(&self, problem: &AllocationProblem<'_>) -> OptResult<(Vec<Sample>, Vec<usize>, &'static str)> {
        let dim = problem.dim();
        if self.options.sampling == SamplingMethod::Simplicial {
            if let Some(depth) = simplicial_depth(dim, self.options.iters) {
                let (samples, minimizers) = simplicial_sample(problem, depth)?;
                return Ok((samples, minimizers, "simplicial"));
            }
            warn!(dim, "simplicial grid too large for this many categories; using Sobol sampling");
        }
        let (samples, minimizers) = sobol_sample(problem, self.options.n_points)?;
        Ok((samples, minimizers, "Sobol"))
    }
}

impl AllocationSolver for GlobalDeterministic {
    fn name(&self) -> &'static str {
        "GlobalDeterministic"
    }

    fn solve(&self, problem: &AllocationProblem<'_>) -> OptResult<Optimum> {
        let started = Instant::now();
        self.options.validate()?;
        let (samples, mut minimizers, method) = self.sample(problem)?;
        minimizers.sort_by(|&a, &b| rank(&samples[a], &samples[b]));
        minimizers.truncate(self.options.max_local);
        debug!(samples = samples.len(), minimizers = minimizers.len(), method, "sampling finished");

        let local = LocalGradient::new(self.options.local.clone());
        let mut best: Option<(Vector, f64, f64, bool, String)> = None;
        for &i in &minimizers {
            let outcome = local.search(problem, samples[i].x.clone())?;
            let replace = match &best {
                None => true,
                Some((_, cost, violation, _, _)) => {
                    deb_better(outcome.cost, outcome.violation, *cost, *violation)
                }
            };
            if replace {
                let converged = outcome.status == ExitStatus::Converged;
                best = Some((outcome.x, outcome.cost, outcome.violation, converged, outcome.detail));
            }
        }

        let (x, converged, local_detail) = match best {
            Some((x, _, _, converged, detail)) => (x, converged, detail),
            None => (problem.initial().clone(), false, "no sampled minimizer".to_string()),
        };
        let detail = format!(
            "{} local minimizers from {} {method} samples; best refinement: {local_detail}",
            minimizers.len(),
            samples.len()
        );
        let (status, violation) = problem.settle(&x, converged)?;
        match status {
            ExitStatus::Converged => {
                info!(target_metric = problem.target_name(), %detail, "global search converged")
            }
            _ => warn!(target_metric = problem.target_name(), violation, %detail, "global search ended early"),
        }
        problem.optimum(&x, status, &detail, started)
    }
}

// ---- Sampling ----

fn evaluate(problem: &AllocationProblem<'_>, x: Vector) -> OptResult<Sample> {
    let cost = problem.objective(&x)?;
    let violation = problem.violation(&x)?;
    Ok(Sample { x, cost, violation })
}

fn rank(a: &Sample, b: &Sample) -> std::cmp::Ordering {
    if deb_better(a.cost, a.violation, b.cost, b.violation) {
        std::cmp::Ordering::Less
    } else if deb_better(b.cost, b.violation, a.cost, a.violation) {
        std::cmp::Ordering::Greater
    } else {
        std::cmp::Ordering::Equal
    }
}

/// `true` when sample `a` (index `ia`) beats `b` (index `ib`); ties go to the
/// lower index so plateaus yield one minimizer.
fn beats(samples: &[Sample], ia: usize, ib: usize) -> bool {
    match rank(&samples[ia], &samples[ib]) {
        std::cmp::Ordering::Less => true,
        std::cmp::Ordering::Greater => false,
        std::cmp::Ordering::Equal => ia < ib,
    }
}

/// Deepest refinement `≤ iters` whose work stays under the limit.
fn simplicial_depth(dim: usize, iters: usize) -> Option<usize> {
    if dim >= usize::BITS as usize - 2 {
        return None;
    }
    let neighbors = 1usize << (dim + 1);
    (1..=iters.min(20)).rev().find(|&depth| {
        let per_axis = (1usize << depth) + 1;
        let vertices = (0..dim).try_fold(1usize, |acc, _| acc.checked_mul(per_axis));
        matches!(vertices.and_then(|v| v.checked_mul(neighbors)), Some(work) if work <= SIMPLICIAL_WORK_LIMIT)
    })
}

fn simplicial_sample(
    problem: &AllocationProblem<'_>, depth: usize,
) -> OptResult<(Vec<Sample>, Vec<usize>)> {
    let dim = problem.dim();
    let intervals = 1usize << depth;
    let (lower, upper) = (problem.lower(), problem.upper());
    // Axes with no room collapse to a single level.
    let counts: Vec<usize> =
        (0..dim).map(|i| if upper[i] > lower[i] { intervals + 1 } else { 1 }).collect();
    let total: usize = counts.iter().product();

    let mut samples = Vec::with_capacity(total);
    let mut digits = vec![0usize; dim];
    for _ in 0..total {
        let x: Vector = (0..dim)
            .map(|i| {
                if counts[i] == 1 {
                    lower[i]
                } else {
                    lower[i] + (upper[i] - lower[i]) * digits[i] as f64 / intervals as f64
                }
            })
            .collect();
        samples.push(evaluate(problem, x)?);
        increment(&mut digits, &counts);
    }

    let mut minimizers = Vec::new();
    let mut digits = vec![0usize; dim];
    for v in 0..total {
        let mut is_min = true;
        'subsets: for mask in 1usize..(1 << dim) {
            for sign in [1isize, -1] {
                if let Some(w) = neighbor(&digits, &counts, mask, sign) {
                    if beats(&samples, w, v) {
                        is_min = false;
                        break 'subsets;
                    }
                }
            }
        }
        if is_min {
            minimizers.push(v);
        }
        increment(&mut digits, &counts);
    }
    Ok((samples, minimizers))
}

/// Flat index of `digits ± 1_S`, if it stays on the grid.
fn neighbor(digits: &[usize], counts: &[usize], mask: usize, sign: isize) -> Option<usize> {
    let mut index = 0usize;
    for (i, (&d, &c)) in digits.iter().zip(counts).enumerate() {
        let shifted = if mask & (1 << i) != 0 { d as isize + sign } else { d as isize };
        if shifted < 0 || shifted >= c as isize {
            return None;
        }
        index = index * c + shifted as usize;
    }
    Some(index)
}

/// Mixed-radix increment, last axis fastest (matches the flat index).
fn increment(digits: &mut [usize], counts: &[usize]) {
    for pos in (0..digits.len()).rev() {
        digits[pos] += 1;
        if digits[pos] < counts[pos] {
            return;
        }
        digits[pos] = 0;
    }
}

fn sobol_sample(
    problem: &AllocationProblem<'_>, n_points: usize,
) -> OptResult<(Vec<Sample>, Vec<usize>)> {
    let dim = problem.dim();
    let (lower, upper) = (problem.lower(), problem.upper());
    let mut samples = vec![evaluate(problem, lower.clone())?];
    let mut sobol = Sobol::new(dim)?;
    for unit in sobol.take_points(n_points) {
        let x: Vector = (0..dim).map(|i| lower[i] + unit[i] * (upper[i] - lower[i])).collect();
        samples.push(evaluate(problem, x)?);
    }

    let span: Vector = (upper - lower).mapv(|r| if r > 0.0 { r } else { 1.0 });
    let k = (2 * dim + 2).min(samples.len().saturating_sub(1));
    let mut minimizers = Vec::new();
    for v in 0..samples.len() {
        let mut by_distance: Vec<(f64, usize)> = (0..samples.len())
            .filter(|&w| w != v)
            .map(|w| {
                let d: f64 = ((&samples[w].x - &samples[v].x) / &span).l2_norm();
                (d, w)
            })
            .collect();
        by_distance.sort_by(|a, b| a.0.total_cmp(&b.0));
        if by_distance.iter().take(k).all(|&(_, w)| !beats(&samples, w, v)) {
            minimizers.push(v);
        }
    }
    Ok((samples, minimizers))
}
