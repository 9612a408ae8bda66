//! surface — response surfaces built from Monte-Carlo tranche outcomes.
//!
//! Purpose
//! -------
//! Consume the sampled evaluation table produced upstream and expose
//! continuous, read-only response surfaces over allocation vectors. This is
//! the evaluation half of the crate; the search half lives in
//! [`crate::optimization`].
//!
//! Key behaviors
//! -------------
//! - Validate the raw sample table once ([`observation::SampleTable`]).
//! - Fit one piecewise-linear interpolator per `(category, metric, sample)`
//!   key ([`interpolator::LinearInterpolator`]) with linear extrapolation.
//! - Evaluate allocations per key or reduced by a [`statistic::Statistic`]
//!   in either aggregation order ([`evaluator::Evaluator`]).
//! - Materialize the corner grid used by the exact optimizer
//!   ([`corners::CornerGrid`]).
//!
//! Invariants & assumptions
//! ------------------------
//! - Category, metric, and sample sets are fixed at construction.
//! - All map-based amounts are finite and non-negative; vector-based solver
//!   evaluations may step slightly outside and are extrapolated.
//! - Setup mistakes (unknown labels, malformed rows) surface as
//!   [`errors::SurfaceError`], never as silent defaults.
//!
//! Testing notes
//! -------------
//! - Unit tests in each submodule cover node exactness, extrapolation,
//!   degenerate single-level categories, both aggregation orders, and
//!   corner enumeration.

pub mod corners;
pub mod errors;
pub mod evaluator;
pub mod interpolator;
pub mod observation;
pub mod statistic;

pub use self::corners::CornerGrid;
pub use self::errors::{SurfaceError, SurfaceResult};
pub use self::evaluator::{Allocation, Evaluation, Evaluator, StatisticSurface, SurfaceKey};
pub use self::interpolator::LinearInterpolator;
pub use self::observation::{Observation, SampleTable};
pub use self::statistic::Statistic;
