//! # bb-optimizer
//!
//! Black-box minimization strategies for BlackBridge.
//!
//! Provides the [`Objective`] contract, a budget-enforcing evaluation tracker,
//! a radial-basis-function surrogate optimizer, CMA-ES with IPOP restarts, and
//! the [`OptimizationDriver`] that picks between them from an
//! [`OptimizerSpec`](bb_types::OptimizerSpec).

mod cmaes;
mod driver;
pub mod linalg;
mod objective;
mod sampling;
mod surrogate;

pub use cmaes::{Cmaes, CmaesSettings, StopReason};
pub use driver::OptimizationDriver;
pub use objective::{compare_values, EvaluationTracker, FnObjective, Objective};
pub use sampling::{latin_hypercube, seeded_rng, standard_normal, BoxBounds};
pub use surrogate::{RbfModel, RbfOptimizer, RbfSettings};
