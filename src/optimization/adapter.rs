//! Adapter that exposes an [`AllocationProblem`] as an `argmin` problem.
//!
//! We convert the *maximization* of the target metric into a *minimization*
//! by using the problem's cost `c(x) = -target(x)`. Surfaces are piecewise
//! linear and have no analytic gradient, so gradients of the cost and of the
//! constraints are finite-differenced.
//!
//! Kinks sit only at each category's observed amount levels. The gradient
//! uses forward differences and switches a coordinate to a backward
//! difference when a level lies inside its forward step, so each partial
//! is the slope of a single segment rather than a blend across a node.
use std::cell::RefCell;

use argmin::core::{CostFunction, Error, Gradient};
use finitediff::FiniteDiff;

use crate::optimization::{
    errors::OptResult, problem::AllocationProblem, types::Vector, validation::validate_grad,
};

/// Bridges an [`AllocationProblem`] to argmin's `CostFunction` and
/// `Gradient`, plus the constraint and multi-objective evaluations the
/// custom solvers request through `Problem::problem`.
#[derive(Debug, Clone, Copy)]
pub struct ArgMinAdapter<'p, 'a> {
    pub problem: &'p AllocationProblem<'a>,
}

impl<'p, 'a> ArgMinAdapter<'p, 'a> {
    pub fn new(problem: &'p AllocationProblem<'a>) -> Self {
        Self { problem }
    }

    /// Constraint values in `g(x) ≥ 0` form.
    pub fn constraints(&self, x: &Vector) -> Result<Vector, Error> {
        Ok(self.problem.constraints(x)?)
    }

    /// Constraint values together with their normalized violation.
    pub fn constraints_and_violation(&self, x: &Vector) -> Result<(Vector, f64), Error> {
        let g = self.problem.constraints(x)?;
        let violation = self.problem.violation_of(x, &g);
        Ok((g, violation))
    }

    /// One gradient row per constraint.
    ///
    /// The budget row is exact (`-1` everywhere); floor rows are
    /// finite-differenced.
    pub fn constraint_gradients(&self, x: &Vector) -> Result<Vec<Vector>, Error> {
        let mut rows = Vec::with_capacity(self.problem.n_constraints());
        let breaks = self.breakpoints();
        if self.problem.budget().is_some() {
            rows.push(Vector::from_elem(x.len(), -1.0));
        }
        for &(m, floor) in self.problem.floors() {
            let row = fd_gradient(x, &breaks, |x: &Vector| -> OptResult<f64> {
                Ok(self.problem.metrics_at(x)?[m] - floor)
            })?;
            rows.push(row);
        }
        Ok(rows)
    }

    /// Observed amount levels per category in scaled units.
    pub fn breakpoints(&self) -> Vec<Vec<f64>> {
        let scale = self.problem.scale();
        (0..self.problem.dim())
            .map(|c| self.problem.evaluator().levels(c).iter().map(|&a| a / scale).collect())
            .collect()
    }

    /// Costs (negated values) of several metrics from one evaluation.
    pub fn objectives(&self, x: &Vector, metrics: &[usize]) -> Result<Vector, Error> {
        let values = self.problem.metrics_at(x)?;
        Ok(metrics.iter().map(|&m| -values[m]).collect())
    }
}

impl CostFunction for ArgMinAdapter<'_, '_> {
    type Param = Vector;
    type Output = f64;

    /// Evaluate `c(x) = -target(x)`.
    ///
    /// # Errors
    /// Propagates surface failures and `NonFiniteCost` from the problem.
    fn cost(&self, x: &Self::Param) -> Result<Self::Output, Error> {
        Ok(self.problem.objective(x)?)
    }
}

impl Gradient for ArgMinAdapter<'_, '_> {
    type Param = Vector;
    type Gradient = Vector;

    /// One-sided finite-difference gradient of the cost; see [`fd_gradient`].
    fn gradient(&self, x: &Self::Param) -> Result<Self::Gradient, Error> {
        fd_gradient(x, &self.breakpoints(), |x: &Vector| self.problem.objective(x))
    }
}

/// Forward step length used by `finitediff`.
const FD_STEP: f64 = 1.490_116_119_384_765_6e-8;

/// One-sided finite-difference gradient of a fallible, piecewise-linear
/// scalar function.
///
/// `breaks[i]` lists the (scaled) amounts where coordinate `i` may have a
/// kink. Partials come from forward differences, except where a break lies
/// in `(x_i, x_i + h]`; those use a backward difference so the step stays
/// on the segment containing `x_i`. At a break itself the right-hand slope
/// is reported.
///
/// The FD closure must return `f64`, so the first error raised by `func` is
/// captured in `closure_err` and the closure returns `NaN`.
///
/// # Errors
/// The first error raised by `func`, or a validation error on the resulting
/// gradient.
pub fn fd_gradient<F>(x: &Vector, breaks: &[Vec<f64>], func: F) -> Result<Vector, Error>
where
    F: Fn(&Vector) -> OptResult<f64>,
{
    let closure_err: RefCell<Option<Error>> = RefCell::new(None);
    let wrapped = |x: &Vector| -> f64 {
        match func(x) {
            Ok(val) => val,
            Err(e) => {
                let mut slot = closure_err.borrow_mut();
                if slot.is_none() {
                    *slot = Some(e.into());
                }
                f64::NAN
            }
        }
    };
    let mut grad = x.forward_diff(&wrapped);

    let straddled: Vec<usize> = (0..x.len())
        .filter(|&i| {
            breaks
                .get(i)
                .is_some_and(|b| b.iter().any(|&k| k > x[i] && k <= x[i] + FD_STEP))
        })
        .collect();
    if !straddled.is_empty() {
        // Forward differences of z ↦ f(2x − z) are negated backward
        // differences of f.
        let mirrored = |z: &Vector| -> f64 { wrapped(&(2.0 * x - z)) };
        let backward = x.forward_diff(&mirrored);
        for i in straddled {
            grad[i] = -backward[i];
        }
    }

    if let Some(err) = closure_err.take() {
        return Err(err);
    }
    validate_grad(&grad, x.len())?;
    Ok(grad)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimization::problem::OptimizationRequest;
    use crate::surface::{Evaluator, Observation, SampleTable};
    use approx::assert_relative_eq;
    use ndarray::array;
    use std::collections::BTreeMap;

    fn evaluator() -> Evaluator {
        let rows = vec![
            Observation::new("A", 0.0, 1, "M", 0.0, ""),
            Observation::new("A", 100.0, 1, "M", 10.0, ""),
            Observation::new("B", 0.0, 1, "M", 0.0, ""),
            Observation::new("B", 100.0, 1, "M", 5.0, ""),
        ];
        Evaluator::new(&SampleTable::new(rows).unwrap()).unwrap()
    }

    #[test]
    // Purpose
    // -------
    // The cost is the negated target, and its FD gradient recovers the
    // scaled slopes of the linear surfaces.
    //
    // Expect
    // ------
    // ∂c/∂x = -(0.1, 0.05) · 1e6 in scaled space.
    fn cost_and_gradient_follow_sign_convention() {
        let ev = evaluator();
        let problem = AllocationProblem::new(&ev, &OptimizationRequest::new("M"), 1e6).unwrap();
        let adapter = ArgMinAdapter::new(&problem);
        let x = array![30e-6, 40e-6];

        assert_relative_eq!(adapter.cost(&x).unwrap(), -5.0, epsilon = 1e-9);
        let g = adapter.gradient(&x).unwrap();
        assert_relative_eq!(g[0], -1e5, max_relative = 1e-4);
        assert_relative_eq!(g[1], -5e4, max_relative = 1e-4);
    }

    #[test]
    fn constraint_rows_follow_budget_then_floors() {
        let ev = evaluator();
        let request = OptimizationRequest::new("M")
            .with_total_amount(100.0)
            .with_min_metric(BTreeMap::from([("M".to_string(), 1.0)]));
        let problem = AllocationProblem::new(&ev, &request, 1e6).unwrap();
        let adapter = ArgMinAdapter::new(&problem);

        let rows = adapter.constraint_gradients(&array![10e-6, 10e-6]).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], array![-1.0, -1.0]);
        assert_relative_eq!(rows[1][0], 1e5, max_relative = 1e-4);
        assert_relative_eq!(rows[1][1], 5e4, max_relative = 1e-4);
    }

    #[test]
    fn failing_function_surfaces_its_error() {
        let x = array![1.0, 2.0];
        let err = fd_gradient(&x, &[], |_| Err(crate::optimization::errors::OptError::NoObjectives));
        assert!(err.is_err());
    }
}
