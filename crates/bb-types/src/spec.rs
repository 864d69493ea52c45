//! Optimizer run settings and result types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::errors::{ConfigError, OptimizerError};

/// Fixed name of the handshake mailbox inside the configured directory.
pub const HANDSHAKE_FILE_NAME: &str = "DesignVar_Obj.txt";

/// Initial CMA-ES step size when the config does not set `sigma0`.
pub const DEFAULT_SIGMA0: f64 = 0.5;

/// The two supported optimization strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlgorithmKind {
    /// Radial-basis-function surrogate global optimizer.
    Rbfopt,
    /// Covariance matrix adaptation evolution strategy.
    Cmaes,
}

impl AlgorithmKind {
    pub const ALL: [AlgorithmKind; 2] = [AlgorithmKind::Rbfopt, AlgorithmKind::Cmaes];

    /// Name as written in the `algorithm_name` config key.
    pub const fn config_name(self) -> &'static str {
        match self {
            Self::Rbfopt => "RBFopt",
            Self::Cmaes => "CMAES",
        }
    }
}

impl fmt::Display for AlgorithmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.config_name())
    }
}

impl FromStr for AlgorithmKind {
    type Err = OptimizerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.config_name() == s)
            .ok_or_else(|| OptimizerError::UnsupportedAlgorithm {
                name: s.to_string(),
            })
    }
}

/// Everything needed to construct an optimization run.
///
/// The algorithm selector is kept as the raw string from the config file so
/// that an unsupported name is rejected by the driver, not by the loader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerSpec {
    pub algorithm_name: String,
    pub num_design_vars: usize,
    pub low_bounds: Vec<f64>,
    pub up_bounds: Vec<f64>,
    pub max_evaluations: usize,
    /// Starting point; the bound midpoint is used when absent.
    pub initial_value: Option<Vec<f64>>,
    /// Directory holding the handshake file.
    pub handshake_dir: PathBuf,
    /// RNG seed for reproducible runs.
    pub seed: Option<u64>,
    /// CMA-ES initial step size (absolute units).
    pub sigma0: Option<f64>,
}

impl OptimizerSpec {
    pub fn new(algorithm_name: impl Into<String>, low_bounds: Vec<f64>, up_bounds: Vec<f64>) -> Self {
        Self {
            algorithm_name: algorithm_name.into(),
            num_design_vars: low_bounds.len(),
            low_bounds,
            up_bounds,
            max_evaluations: 100,
            initial_value: None,
            handshake_dir: PathBuf::from("."),
            seed: None,
            sigma0: None,
        }
    }

    pub fn with_max_evaluations(mut self, n: usize) -> Self {
        self.max_evaluations = n;
        self
    }

    pub fn with_initial_value(mut self, x0: Vec<f64>) -> Self {
        self.initial_value = Some(x0);
        self
    }

    pub fn with_handshake_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.handshake_dir = dir.into();
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_sigma0(mut self, sigma0: f64) -> Self {
        self.sigma0 = Some(sigma0);
        self
    }

    pub fn algorithm(&self) -> Result<AlgorithmKind, OptimizerError> {
        self.algorithm_name.parse()
    }

    pub fn midpoint(&self) -> Vec<f64> {
        self.low_bounds
            .iter()
            .zip(&self.up_bounds)
            .map(|(lo, up)| (lo + up) / 2.0)
            .collect()
    }

    /// Caller-supplied starting point, or the bound midpoint.
    pub fn initial_point(&self) -> Vec<f64> {
        match &self.initial_value {
            Some(x0) => x0.clone(),
            None => self.midpoint(),
        }
    }

    pub fn sigma0(&self) -> f64 {
        self.sigma0.unwrap_or(DEFAULT_SIGMA0)
    }

    pub fn handshake_path(&self) -> PathBuf {
        self.handshake_dir.join(HANDSHAKE_FILE_NAME)
    }

    /// Check the structural invariants: bound and initial-point lengths equal
    /// N, every lower bound is at most its upper bound, an explicit initial
    /// point lies inside the box, and the budget allows at least one
    /// evaluation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let n = self.num_design_vars;
        if n == 0 {
            return Err(ConfigError::InvalidValue {
                key: "num_design_vars".into(),
                value: "0".into(),
                message: "at least one design variable is required".into(),
            });
        }
        check_len("low_bounds", n, self.low_bounds.len())?;
        check_len("up_bounds", n, self.up_bounds.len())?;
        if let Some(x0) = &self.initial_value {
            check_len("initial_value", n, x0.len())?;
        }

        for (index, (&low, &up)) in self.low_bounds.iter().zip(&self.up_bounds).enumerate() {
            if !low.is_finite() || !up.is_finite() || low > up {
                return Err(ConfigError::InvertedBounds { index, low, up });
            }
        }

        if let Some(x0) = &self.initial_value {
            let outside = x0
                .iter()
                .zip(self.low_bounds.iter().zip(&self.up_bounds))
                .position(|(&x, (&low, &up))| !(low..=up).contains(&x));
            if let Some(index) = outside {
                return Err(ConfigError::InvalidValue {
                    key: "initial_value".into(),
                    value: format!("{:?}", x0),
                    message: format!(
                        "component {} = {} lies outside [{}, {}]",
                        index, x0[index], self.low_bounds[index], self.up_bounds[index]
                    ),
                });
            }
        }

        if self.max_evaluations == 0 {
            return Err(crate::config_error!("max_evaluations must be at least 1"));
        }
        if let Some(sigma0) = self.sigma0 {
            if !(sigma0 > 0.0 && sigma0.is_finite()) {
                return Err(ConfigError::InvalidValue {
                    key: "sigma0".into(),
                    value: sigma0.to_string(),
                    message: "step size must be positive".into(),
                });
            }
        }
        Ok(())
    }
}

fn check_len(key: &str, expected: usize, actual: usize) -> Result<(), ConfigError> {
    if expected == actual {
        Ok(())
    } else {
        Err(ConfigError::LengthMismatch {
            key: key.to_string(),
            expected,
            actual,
        })
    }
}

/// Outcome of a completed optimization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub best_vars: Vec<f64>,
    pub best_value: f64,
    /// Number of objective evaluations actually performed.
    pub evaluations: usize,
}
