//! optimization::types — shared numeric aliases and solver wiring.
//!
//! Purpose
//! -------
//! Centralize the numeric types every allocation strategy shares so the rest
//! of the optimizer stays agnostic to `ndarray` and argmin generics.
//!
//! Conventions
//! -----------
//! - Decision vectors live in *scaled* space: one entry per category, equal
//!   to the allocated amount divided by the problem scale
//!   ([`DEFAULT_SCALE`] unless overridden).
//! - Every argmin-driven strategy uses the same [`AllocationState`]; the
//!   gradient slot carries the objective gradient when a strategy has one.
use argmin::core::IterState;
use ndarray::Array1;
use std::collections::HashMap;

/// Decision / gradient vector in scaled space.
pub type Vector = Array1<f64>;

/// Function-evaluation counters as reported by argmin
/// (e.g. `"cost_count"`, `"gradient_count"`, `"constraint_count"`).
pub type FnEvalMap = HashMap<String, u64>;

/// Iteration state shared by the argmin-driven strategies.
pub type AllocationState = IterState<Vector, Vector, (), (), (), f64>;

/// Divisor applied to amounts before they reach a solver.
pub const DEFAULT_SCALE: f64 = 1_000_000.0;

/// Normalized constraint violation below which a point counts as feasible.
pub const FEASIBILITY_TOL: f64 = 1e-6;
