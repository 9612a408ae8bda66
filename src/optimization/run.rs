//! Execution helper that runs an `argmin` solver on an allocation problem.
use argmin::core::{Executor, Solver, State, TerminationReason, TerminationStatus};
use tracing::debug;

use crate::optimization::{
    adapter::ArgMinAdapter,
    errors::OptResult,
    problem::AllocationProblem,
    types::{AllocationState, FnEvalMap, Vector},
};

/// Final state of one argmin run.
#[derive(Debug, Clone)]
pub struct RunSummary<S> {
    /// The solver as it stood when the executor stopped.
    pub solver: S,
    /// Current parameter vector of the final state (the solver's incumbent).
    pub param: Option<Vector>,
    pub iterations: u64,
    pub fn_evals: FnEvalMap,
    pub termination: TerminationStatus,
}

impl<S> RunSummary<S> {
    /// `true` when the solver's own stopping rule fired.
    pub fn converged(&self) -> bool {
        matches!(self.termination, TerminationStatus::Terminated(TerminationReason::SolverConverged))
    }

    /// Human-readable description of why the run stopped.
    pub fn describe(&self) -> String {
        let reason = match &self.termination {
            TerminationStatus::NotTerminated => "not terminated".to_string(),
            TerminationStatus::Terminated(reason) => format!("{reason:?}"),
        };
        format!("{reason} after {} iterations", self.iterations)
    }
}

/// Run an `argmin` solver on an [`AllocationProblem`].
///
/// Wires up the problem via [`ArgMinAdapter`], the starting point, the
/// optional iteration cap, and (behind the `obs_slog` feature, when
/// `verbose` is set) a terminal slog observer. The solvers in this crate
/// keep their incumbent in the state's *current* parameter, which is what
/// [`RunSummary::param`] reports.
///
/// # Errors
/// Propagates any argmin runtime error, including errors raised by the
/// cost or constraint evaluations, via `From<argmin::core::Error>`.
pub fn run_solver<'p, 'a, S>(
    problem: &'p AllocationProblem<'a>, solver: S, x0: Vector, max_iter: Option<usize>,
    verbose: bool,
) -> OptResult<RunSummary<S>>
where
    S: Solver<ArgMinAdapter<'p, 'a>, AllocationState> + Clone,
{
    debug!(solver = S::NAME, dim = x0.len(), ?max_iter, "starting argmin run");
    let mut executor = Executor::new(ArgMinAdapter::new(problem), solver);
    executor = executor.configure(|state| state.param(x0));
    if let Some(max_iter) = max_iter {
        executor = executor.configure(|state| state.max_iters(max_iter as u64));
    }
    #[cfg(feature = "obs_slog")]
    if verbose {
        let observer = argmin_observer_slog::SlogLogger::term_noblock();
        executor = executor.add_observer(observer, argmin::core::observers::ObserverMode::Always);
    }
    #[cfg(not(feature = "obs_slog"))]
    let _ = verbose;

    let result = executor.run()?;
    let state = result.state();
    let summary = RunSummary {
        solver: result.solver().clone(),
        param: state.get_param().cloned(),
        iterations: state.get_iter(),
        fn_evals: state.get_func_counts().clone(),
        termination: state.get_termination_status().clone(),
    };
    debug!(
        solver = S::NAME,
        iterations = summary.iterations,
        fn_evals = ?summary.fn_evals,
        status = %summary.describe(),
        "argmin run finished"
    );
    Ok(summary)
}
