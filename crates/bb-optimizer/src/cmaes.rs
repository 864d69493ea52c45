//! Covariance matrix adaptation evolution strategy with IPOP restarts.
//!
//! Every sampled point is repaired into the box before evaluation, so the
//! objective never sees an infeasible candidate. A run that stagnates is
//! restarted from the initial mean with a doubled population.

use rand::rngs::StdRng;
use tracing::{debug, info};

use bb_types::BbResult;

use crate::linalg::{identity, symmetric_eigen, Matrix};
use crate::objective::{compare_values, EvaluationTracker, Objective};
use crate::sampling::{seeded_rng, standard_normal, BoxBounds};

/// Tuning knobs for [`Cmaes`].
#[derive(Debug, Clone, PartialEq)]
pub struct CmaesSettings {
    /// Initial step size in absolute units.
    pub sigma0: f64,
    /// Population of the first run; `4 + ⌊3 ln N⌋` when `None`.
    pub population: Option<usize>,
    /// Additional runs after the first one stagnates.
    pub max_restarts: usize,
    pub tol_x: f64,
    pub tol_fun: f64,
    pub max_condition: f64,
}

impl Default for CmaesSettings {
    fn default() -> Self {
        Self {
            sigma0: bb_types::DEFAULT_SIGMA0,
            population: None,
            max_restarts: 2,
            tol_x: 1e-11,
            tol_fun: 1e-12,
            max_condition: 1e14,
        }
    }
}

/// Why a single CMA-ES run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Evaluation budget spent; no restart follows.
    Budget,
    /// Step size collapsed below `tol_x`.
    TolX,
    /// Best values over the recent history are flat within `tol_fun`.
    TolFun,
    /// Covariance became too ill-conditioned.
    Condition,
    /// The best value did not improve over the stagnation window.
    NoImprovement,
}

/// Strategy parameters derived from dimension and population size.
#[derive(Debug, Clone)]
struct Params {
    weights: Vec<f64>,
    mueff: f64,
    cc: f64,
    cs: f64,
    c1: f64,
    cmu: f64,
    damps: f64,
    chi_n: f64,
    window: usize,
}

impl Params {
    fn new(n: usize, lambda: usize) -> Self {
        let nf = n as f64;
        let mu = (lambda / 2).max(1);
        let raw: Vec<f64> = (1..=mu)
            .map(|i| (mu as f64 + 0.5).ln() - (i as f64).ln())
            .collect();
        let total: f64 = raw.iter().sum();
        let weights: Vec<f64> = raw.iter().map(|w| w / total).collect();
        let mueff = 1.0 / weights.iter().map(|w| w * w).sum::<f64>();

        let cc = (4.0 + mueff / nf) / (nf + 4.0 + 2.0 * mueff / nf);
        let cs = (mueff + 2.0) / (nf + mueff + 5.0);
        let c1 = 2.0 / ((nf + 1.3).powi(2) + mueff);
        let cmu = (1.0 - c1).min(2.0 * (mueff - 2.0 + 1.0 / mueff) / ((nf + 2.0).powi(2) + mueff));
        let damps = 1.0 + 2.0 * (((mueff - 1.0) / (nf + 1.0)).sqrt() - 1.0).max(0.0) + cs;
        let chi_n = nf.sqrt() * (1.0 - 1.0 / (4.0 * nf) + 1.0 / (21.0 * nf * nf));
        let window = 10 + (30.0 * nf / lambda as f64).ceil() as usize;

        Self {
            weights,
            mueff,
            cc,
            cs,
            c1,
            cmu,
            damps,
            chi_n,
            window,
        }
    }
}

/// Evolutionary strategy for rugged, multi-modal objectives.
pub struct Cmaes {
    bounds: BoxBounds,
    x0: Vec<f64>,
    settings: CmaesSettings,
    rng: StdRng,
}

impl Cmaes {
    pub fn new(bounds: BoxBounds, x0: Vec<f64>, sigma0: f64, seed: Option<u64>) -> Self {
        let settings = CmaesSettings {
            sigma0,
            ..CmaesSettings::default()
        };
        Self::with_settings(bounds, x0, seed, settings)
    }

    pub fn with_settings(bounds: BoxBounds, mut x0: Vec<f64>, seed: Option<u64>, settings: CmaesSettings) -> Self {
        bounds.clamp(&mut x0);
        Self {
            bounds,
            x0,
            settings,
            rng: seeded_rng(seed),
        }
    }

    pub fn default_population(n: usize) -> usize {
        4 + (3.0 * (n.max(1) as f64).ln()).floor() as usize
    }

    /// Run up to `1 + max_restarts` times, doubling the population after
    /// each stagnated run. Returns the stop reason of every run performed.
    pub fn minimize<O: Objective + ?Sized>(
        &mut self,
        tracker: &mut EvaluationTracker<'_, O>,
    ) -> BbResult<Vec<StopReason>> {
        let n = self.bounds.dim();
        let base = self
            .settings
            .population
            .unwrap_or_else(|| Self::default_population(n))
            .max(2);
        info!(
            dim = n,
            population = base,
            sigma0 = self.settings.sigma0,
            budget = tracker.remaining(),
            "Starting CMA-ES optimization"
        );

        let mut runs = Vec::new();
        for restart in 0..=self.settings.max_restarts {
            if tracker.is_exhausted() {
                break;
            }
            let lambda = base << restart;
            let reason = self.run_once(tracker, lambda)?;
            info!(
                restart,
                lambda,
                ?reason,
                evaluations = tracker.evaluations(),
                best = ?tracker.best_value(),
                "CMA-ES run ended"
            );
            runs.push(reason);
            if reason == StopReason::Budget {
                break;
            }
        }
        Ok(runs)
    }

    fn run_once<O: Objective + ?Sized>(
        &mut self,
        tracker: &mut EvaluationTracker<'_, O>,
        lambda: usize,
    ) -> BbResult<StopReason> {
        let n = self.bounds.dim();
        let p = Params::new(n, lambda);
        let mu = p.weights.len();
        let sigma_cap = (0..n)
            .map(|i| self.bounds.width(i))
            .fold(0.0_f64, f64::max)
            * 2.0;

        let mut mean = self.x0.clone();
        let mut sigma = self.settings.sigma0;
        let mut c: Matrix = identity(n);
        let mut pc = vec![0.0; n];
        let mut ps = vec![0.0; n];

        let mut history: Vec<f64> = Vec::with_capacity(p.window);
        let mut run_best = f64::INFINITY;
        let mut since_improvement = 0usize;

        let mut generation = 0u32;
        loop {
            let (eigenvalues, b) = symmetric_eigen(&c);
            let d: Vec<f64> = eigenvalues.iter().map(|v| v.max(1e-300).sqrt()).collect();
            let d_max = d.iter().copied().fold(0.0, f64::max);
            let d_min = d.iter().copied().fold(f64::INFINITY, f64::min);
            if (d_max / d_min).powi(2) > self.settings.max_condition {
                return Ok(StopReason::Condition);
            }

            let mut offspring: Vec<(Vec<f64>, f64)> = Vec::with_capacity(lambda);
            for _ in 0..lambda {
                let z: Vec<f64> = (0..n).map(|_| standard_normal(&mut self.rng)).collect();
                let mut x: Vec<f64> = (0..n)
                    .map(|i| mean[i] + sigma * (0..n).map(|k| b[i][k] * d[k] * z[k]).sum::<f64>())
                    .collect();
                self.bounds.clamp(&mut x);
                match tracker.evaluate(&x)? {
                    Some(value) => offspring.push((x, value)),
                    None => return Ok(StopReason::Budget),
                }
            }
            offspring.sort_by(|a, b| compare_values(a.1, b.1));

            // Steps are taken from the repaired points.
            let steps: Vec<Vec<f64>> = offspring[..mu]
                .iter()
                .map(|(x, _)| x.iter().zip(&mean).map(|(xi, mi)| (xi - mi) / sigma).collect())
                .collect();
            let y_w: Vec<f64> = (0..n)
                .map(|i| steps.iter().zip(&p.weights).map(|(y, w)| w * y[i]).sum())
                .collect();
            for (i, m) in mean.iter_mut().enumerate() {
                *m += sigma * y_w[i];
            }
            self.bounds.clamp(&mut mean);

            // C^{-1/2} y_w = B D^{-1} B^T y_w
            let bt_y: Vec<f64> = (0..n)
                .map(|k| (0..n).map(|i| b[i][k] * y_w[i]).sum::<f64>() / d[k])
                .collect();
            let c_inv_sqrt_y: Vec<f64> = (0..n)
                .map(|i| (0..n).map(|k| b[i][k] * bt_y[k]).sum())
                .collect();

            let ps_coeff = (p.cs * (2.0 - p.cs) * p.mueff).sqrt();
            for i in 0..n {
                ps[i] = (1.0 - p.cs) * ps[i] + ps_coeff * c_inv_sqrt_y[i];
            }
            let ps_norm = norm(&ps);
            let decay = 1.0 - (1.0 - p.cs).powf(2.0 * (generation as f64 + 1.0));
            let hsig = ps_norm / decay.sqrt() / p.chi_n < 1.4 + 2.0 / (n as f64 + 1.0);

            let pc_coeff = if hsig { (p.cc * (2.0 - p.cc) * p.mueff).sqrt() } else { 0.0 };
            for i in 0..n {
                pc[i] = (1.0 - p.cc) * pc[i] + pc_coeff * y_w[i];
            }

            let hsig_correction = if hsig { 0.0 } else { p.c1 * p.cc * (2.0 - p.cc) };
            for i in 0..n {
                for j in 0..=i {
                    let rank_mu: f64 = steps
                        .iter()
                        .zip(&p.weights)
                        .map(|(y, w)| w * y[i] * y[j])
                        .sum();
                    let updated = (1.0 - p.c1 - p.cmu + hsig_correction) * c[i][j]
                        + p.c1 * pc[i] * pc[j]
                        + p.cmu * rank_mu;
                    c[i][j] = updated;
                    c[j][i] = updated;
                }
            }

            sigma *= ((p.cs / p.damps) * (ps_norm / p.chi_n - 1.0)).exp();
            if sigma_cap > 0.0 {
                sigma = sigma.min(sigma_cap);
            }

            let generation_best = offspring[0].1;
            let generation_worst = offspring[lambda - 1].1;
            debug!(generation, lambda, sigma, generation_best, "CMA-ES generation");

            if compare_values(generation_best, run_best).is_lt() {
                run_best = generation_best;
                since_improvement = 0;
            } else {
                since_improvement += 1;
            }
            if history.len() == p.window {
                history.remove(0);
            }
            history.push(generation_best);

            let max_axis = (0..n).map(|i| c[i][i].sqrt()).fold(0.0, f64::max);
            if sigma * max_axis < self.settings.tol_x {
                return Ok(StopReason::TolX);
            }
            if history.len() == p.window {
                let (lo, hi) = history
                    .iter()
                    .chain([generation_best, generation_worst].iter())
                    .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
                if hi - lo < self.settings.tol_fun {
                    return Ok(StopReason::TolFun);
                }
            }
            if since_improvement > p.window {
                return Ok(StopReason::NoImprovement);
            }
            generation += 1;
        }
    }
}

fn norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}
