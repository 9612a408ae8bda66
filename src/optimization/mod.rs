//! optimization — constrained allocation over a response surface.
//!
//! Purpose
//! -------
//! Turn a caller's request ("maximize this metric, spend at most this much,
//! keep these metrics above these floors") into one shared formulation and
//! solve it with any of five interchangeable strategies.
//!
//! Key behaviors
//! -------------
//! - [`problem`] builds the formulation once per call: the cost (negated
//!   target), constraints in `g(x) ≥ 0` form (budget first, then floors),
//!   box bounds from caps and observed maxima, and an internal scale.
//! - Strategies implement [`traits::AllocationSolver`]:
//!   - `LocalGradient` ([`local_gradient`]): trust-region SLP.
//!   - `GlobalStochastic` ([`differential_evolution`]): seeded DE with
//!     optional polishing.
//!   - `GlobalDeterministic` ([`global_deterministic`]): simplicial or Sobol
//!     sampling plus local refinement.
//!   - `PopulationMultiObjective` ([`nsga`]): NSGA-II.
//!   - `ExactMILP` ([`milp`]): incremental piecewise-linear formulation with
//!     branch and bound.
//! - [`optimizer::Optimizer`] is the caller-facing façade.
//!
//! Invariants & assumptions
//! ------------------------
//! - Search outcomes (infeasible, iteration cap, node cap) come back as
//!   `Ok(Optimum)` with a non-zero exit code; only setup failures are `Err`.
//! - Continuous strategies always report their best iterate; the exact
//!   strategy reports undefined amounts when infeasible.
//!
//! Conventions
//! -----------
//! - Solvers work in scaled units (`amount / scale`, default `1e6`);
//!   everything crossing the public surface is in caller units.
//! - The argmin-driven strategies share [`adapter::ArgMinAdapter`] and
//!   [`run::run_solver`].
//!
//! Testing notes
//! -------------
//! - Unit tests per strategy use two-category surfaces with known optima.
//! - `tests/integration_allocation_pipeline.rs` compares all strategies on
//!   the same scenarios.

pub mod adapter;
pub mod differential_evolution;
pub mod errors;
pub mod global_deterministic;
pub mod local_gradient;
pub mod lp;
pub mod milp;
pub mod nsga;
pub mod optimizer;
pub mod problem;
pub mod run;
pub mod sobol;
pub mod traits;
pub mod types;
pub mod validation;

pub use self::differential_evolution::{
    DifferentialEvolution, DifferentialEvolutionOptions, InitStrategy,
};
pub use self::errors::{OptError, OptResult};
pub use self::global_deterministic::{
    GlobalDeterministic, GlobalDeterministicOptions, SamplingMethod,
};
pub use self::local_gradient::{LocalGradient, LocalGradientOptions};
pub use self::milp::{ExactMilp, MilpOptions};
pub use self::nsga::{Nsga2, PopulationOptions};
pub use self::optimizer::{Optimizer, Strategy, StrategyKind};
pub use self::problem::{AggregationOrder, AllocationProblem, OptimizationRequest};
pub use self::traits::{AllocationSolver, ExitStatus, Optimum, Tolerances};

// ---- Optional convenience prelude for downstream crates -------------------
//
//     use rd_allocation::optimization::prelude::*;

pub mod prelude {
    pub use super::{
        AggregationOrder, AllocationSolver, DifferentialEvolutionOptions, ExitStatus,
        GlobalDeterministicOptions, InitStrategy, LocalGradientOptions, MilpOptions, OptError,
        OptResult, OptimizationRequest, Optimizer, Optimum, PopulationOptions, SamplingMethod,
        Strategy, StrategyKind, Tolerances,
    };
}
