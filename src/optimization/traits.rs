//! Public API surface shared by every allocation strategy.
//!
//! - [`AllocationSolver`]: the one interface the five strategies implement.
//! - [`Tolerances`]: stopping rules carried by each strategy's options.
//! - [`ExitStatus`]: the search outcome taxonomy behind `Optimum::exit_code`.
//! - [`Optimum`]: the canonical, immutable result of one optimization call.
//!
//! Convention: search outcomes (infeasible, iteration cap, node cap) are
//! reported through [`Optimum::exit_code`] / [`Optimum::exit_message`] and
//! returned as `Ok`. Only setup mistakes are `Err`.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    optimization::{
        errors::{OptError, OptResult},
        problem::AllocationProblem,
        validation::{verify_max_iter, verify_tol},
    },
    surface::Allocation,
};

/// One interchangeable optimization back-end.
///
/// Every implementation consumes the same [`AllocationProblem`] (objective,
/// constraints, bounds) and returns an [`Optimum`]. Failing to converge or to
/// satisfy the constraints is *not* an error: it is reported through the
/// returned exit status.
pub trait AllocationSolver {
    /// Short, stable strategy name used in logs.
    fn name(&self) -> &'static str;

    /// Run the search.
    ///
    /// # Errors
    /// Setup-time failures only (e.g. a corner grid beyond the configured
    /// limit, a surface lookup failure).
    fn solve(&self, problem: &AllocationProblem<'_>) -> OptResult<Optimum>;
}

/// Numerical tolerance and iteration cap.
///
/// At least one of the two must be provided (see [`Tolerances::new`]). The
/// meaning of `tol` is strategy specific: predicted merit decrease for the
/// local strategy, relative energy spread for differential evolution,
/// best-objective stall for the population strategy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerances {
    pub tol: Option<f64>,
    pub max_iter: Option<usize>,
}

impl Tolerances {
    /// Construct validated tolerances.
    ///
    /// # Errors
    /// - [`OptError::NoTolerancesProvided`] if both are `None`.
    /// - [`OptError::InvalidTolerance`] for a non-finite or non-positive `tol`.
    /// - [`OptError::InvalidMaxIter`] if `max_iter == 0`.
    pub fn new(tol: Option<f64>, max_iter: Option<usize>) -> OptResult<Self> {
        let tols = Self { tol, max_iter };
        tols.validate()?;
        Ok(tols)
    }

    /// Re-check tolerances built with a struct literal.
    ///
    /// # Errors
    /// As [`Tolerances::new`].
    pub fn validate(&self) -> OptResult<()> {
        if self.tol.is_none() && self.max_iter.is_none() {
            return Err(OptError::NoTolerancesProvided);
        }
        verify_tol("tol", self.tol)?;
        verify_max_iter(self.max_iter)
    }
}

/// Outcome class of a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExitStatus {
    /// Stopping rule satisfied at a feasible point.
    Converged,
    /// Iteration or generation cap reached at a feasible point.
    IterationLimit,
    /// The returned point (if any) violates the constraints.
    Infeasible,
    /// Branch and bound stopped at its node cap.
    NodeLimit,
}

impl ExitStatus {
    pub fn code(&self) -> i32 {
        match self {
            ExitStatus::Converged => 0,
            ExitStatus::IterationLimit => 1,
            ExitStatus::Infeasible => 2,
            ExitStatus::NodeLimit => 3,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(ExitStatus::Converged),
            1 => Some(ExitStatus::IterationLimit),
            2 => Some(ExitStatus::Infeasible),
            3 => Some(ExitStatus::NodeLimit),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ExitStatus::Converged => "Optimization terminated successfully",
            ExitStatus::IterationLimit => "Iteration limit reached",
            ExitStatus::Infeasible => "Constraints could not be satisfied",
            ExitStatus::NodeLimit => "Branch-and-bound node limit reached",
        }
    }
}

/// Canonical result of one optimization call.
///
/// - `exit_code` / `exit_message`: see [`ExitStatus`].
/// - `amounts`: allocation per category in caller units. `None` means
///   undefined (exact strategy infeasible or stopped without incumbent);
///   continuous strategies always report their best iterate.
/// - `metrics`: statistic-reduced value of every metric at `amounts`.
/// - `solve_time`: wall-clock seconds spent inside the strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Optimum {
    pub exit_code: i32,
    pub exit_message: String,
    pub amounts: Option<Allocation>,
    pub metrics: Option<BTreeMap<String, f64>>,
    pub solve_time: f64,
}

impl Optimum {
    pub fn new(
        status: ExitStatus, detail: &str, amounts: Option<Allocation>,
        metrics: Option<BTreeMap<String, f64>>, solve_time: f64,
    ) -> Self {
        let exit_message = if detail.is_empty() {
            status.label().to_string()
        } else {
            format!("{}: {detail}", status.label())
        };
        Self { exit_code: status.code(), exit_message, amounts, metrics, solve_time }
    }

    /// Result with undefined amounts and metrics.
    pub fn undefined(status: ExitStatus, detail: &str, solve_time: f64) -> Self {
        Self::new(status, detail, None, None, solve_time)
    }

    pub fn status(&self) -> Option<ExitStatus> {
        ExitStatus::from_code(self.exit_code)
    }

    pub fn is_converged(&self) -> bool {
        self.exit_code == ExitStatus::Converged.code()
    }

    pub fn amount(&self, category: &str) -> Option<f64> {
        self.amounts.as_ref().and_then(|a| a.get(category).copied())
    }

    pub fn metric(&self, metric: &str) -> Option<f64> {
        self.metrics.as_ref().and_then(|m| m.get(metric).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    // Purpose
    // -------
    // At least one stopping rule is mandatory and each is validated.
    fn tolerances_require_a_stopping_rule() {
        assert_eq!(Tolerances::new(None, None), Err(OptError::NoTolerancesProvided));
        assert!(Tolerances::new(Some(1e-6), None).is_ok());
        assert!(Tolerances::new(None, Some(10)).is_ok());
        assert!(matches!(Tolerances::new(Some(-1.0), None), Err(OptError::InvalidTolerance { .. })));
        assert!(matches!(Tolerances::new(None, Some(0)), Err(OptError::InvalidMaxIter { .. })));
    }

    #[test]
    fn exit_codes_round_trip() {
        for status in [
            ExitStatus::Converged,
            ExitStatus::IterationLimit,
            ExitStatus::Infeasible,
            ExitStatus::NodeLimit,
        ] {
            assert_eq!(ExitStatus::from_code(status.code()), Some(status));
        }
        assert_eq!(ExitStatus::from_code(42), None);
    }

    #[test]
    // Purpose
    // -------
    // An undefined optimum carries its status but no amounts or metrics, and
    // the accessors answer `None` instead of a default.
    fn undefined_optimum_has_no_amounts_or_metrics() {
        let opt = Optimum::undefined(ExitStatus::Infeasible, "relaxation infeasible", 0.5);

        assert_eq!(opt.exit_code, 2);
        assert!(opt.exit_message.contains("relaxation infeasible"));
        assert!(!opt.is_converged());
        assert_eq!(opt.amount("A"), None);
        assert_eq!(opt.metric("M"), None);
        assert_eq!(opt.status(), Some(ExitStatus::Infeasible));
    }
}
