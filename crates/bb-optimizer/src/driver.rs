//! Selects and runs one of the optimization strategies against an objective.

use tracing::info;

use bb_types::{AlgorithmKind, BbResult, EvaluationResult, OptimizerSpec};

use crate::cmaes::Cmaes;
use crate::objective::{EvaluationTracker, Objective};
use crate::sampling::BoxBounds;
use crate::surrogate::RbfOptimizer;

/// Runs the configured algorithm to completion and reports the best point.
#[derive(Debug, Clone)]
pub struct OptimizationDriver {
    algorithm: AlgorithmKind,
    bounds: BoxBounds,
    x0: Vec<f64>,
    max_evaluations: usize,
    sigma0: f64,
    seed: Option<u64>,
}

impl OptimizationDriver {
    /// Build a driver from a spec. An unsupported algorithm selector or an
    /// inconsistent spec is rejected here, before anything is evaluated.
    pub fn new(spec: &OptimizerSpec) -> BbResult<Self> {
        let algorithm = spec.algorithm()?;
        spec.validate()?;

        Ok(Self {
            algorithm,
            bounds: BoxBounds::new(spec.low_bounds.clone(), spec.up_bounds.clone()),
            x0: spec.initial_point(),
            max_evaluations: spec.max_evaluations,
            sigma0: spec.sigma0(),
            seed: spec.seed,
        })
    }

    pub fn algorithm(&self) -> AlgorithmKind {
        self.algorithm
    }

    /// Execute the selected variant, calling `objective` once per candidate
    /// and never more than `max_evaluations` times.
    pub fn run<O: Objective + ?Sized>(&self, objective: &mut O) -> BbResult<EvaluationResult> {
        info!(
            algorithm = %self.algorithm,
            dim = self.bounds.dim(),
            max_evaluations = self.max_evaluations,
            "Starting optimization"
        );

        let mut tracker = EvaluationTracker::new(objective, self.max_evaluations);
        match self.algorithm {
            AlgorithmKind::Rbfopt => {
                RbfOptimizer::new(self.bounds.clone(), self.x0.clone(), self.seed)
                    .minimize(&mut tracker)?;
            }
            AlgorithmKind::Cmaes => {
                Cmaes::new(self.bounds.clone(), self.x0.clone(), self.sigma0, self.seed)
                    .minimize(&mut tracker)?;
            }
        }

        let result = tracker.into_result()?;
        info!(
            best_value = result.best_value,
            best_vars = ?result.best_vars,
            evaluations = result.evaluations,
            "Optimization finished"
        );
        Ok(result)
    }
}
