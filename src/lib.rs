//! rd_allocation — response surfaces and constrained portfolio allocation.
//!
//! Purpose
//! -------
//! Serve as the crate root for the two halves of the library: building
//! continuous response surfaces from Monte-Carlo tranche outcomes
//! ([`surface`]) and searching those surfaces for the allocation that
//! maximizes one metric under a budget, per-category caps, and metric
//! floors ([`optimization`]).
//!
//! Key behaviors
//! -------------
//! - [`surface::Evaluator`] is built once from a validated
//!   [`surface::SampleTable`] and answers every evaluation the optimizers
//!   need (per sample, reduced by a statistic, or over the corner grid).
//! - [`optimization::Optimizer`] binds an evaluator to the five strategies
//!   and exposes `optimize`, `max_metrics`, `epsilon_frontier` and
//!   `pareto_front`.
//!
//! Invariants & assumptions
//! ------------------------
//! - Inputs are validated at construction; a built evaluator is immutable
//!   and can be shared by any number of optimizer calls.
//! - Setup mistakes are errors; search outcomes are statuses on
//!   [`optimization::Optimum`].
//!
//! Conventions
//! -----------
//! - Amounts are in the caller's currency units; metric values are in the
//!   units recorded with each observation.
//! - Diagnostics go through `tracing`; the crate installs no subscriber.
//!
//! Downstream usage
//! ----------------
//! ```no_run
//! use rd_allocation::optimization::prelude::*;
//! use rd_allocation::surface::{Evaluator, Observation, SampleTable};
//!
//! let rows = vec![
//!     Observation::new("A", 0.0, 1, "M", 0.0, ""),
//!     Observation::new("A", 100.0, 1, "M", 10.0, ""),
//!     Observation::new("B", 0.0, 1, "M", 0.0, ""),
//!     Observation::new("B", 100.0, 1, "M", 5.0, ""),
//! ];
//! let evaluator = Evaluator::new(&SampleTable::new(rows)?)?;
//! let request = OptimizationRequest::new("M").with_total_amount(100.0);
//! let optimum = Optimizer::new(&evaluator).optimize(&request, &Strategy::default())?;
//! println!("{:?} -> {:?}", optimum.amounts, optimum.metrics);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Testing notes
//! -------------
//! - Unit tests live next to each module.
//! - `tests/integration_allocation_pipeline.rs` runs every strategy over
//!   shared end-to-end scenarios.

pub mod optimization;
pub mod surface;
