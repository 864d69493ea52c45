//! Radial-basis-function surrogate global optimizer.
//!
//! The objective is modelled with a cubic RBF interpolant (plus a linear
//! polynomial tail) over the unit-scaled box. Each search cycle runs one
//! global exploration step, a sequence of weighted steps trading surrogate
//! value against distance from already-evaluated points, and one pure
//! exploitation step around the incumbent.

use rand::rngs::StdRng;
use rand::Rng;
use rayon::prelude::*;
use tracing::{debug, info};

use bb_types::BbResult;

use crate::linalg::{solve, Matrix};
use crate::objective::{compare_values, EvaluationTracker, Objective};
use crate::sampling::{distance, latin_hypercube, seeded_rng, standard_normal, BoxBounds};

/// Tuning knobs for [`RbfOptimizer`].
#[derive(Debug, Clone, PartialEq)]
pub struct RbfSettings {
    /// Surrogate weights of the weighted steps in one cycle.
    pub cycle_weights: Vec<f64>,
    /// Candidate points scored per step, per design variable.
    pub candidates_per_dim: usize,
    /// Initial perturbation radius, as a fraction of the unit range.
    pub initial_radius: f64,
    pub min_radius: f64,
    pub max_radius: f64,
    /// Consecutive failures (or successes) before the radius is halved (or doubled).
    pub adapt_after: usize,
    /// Candidates closer than this (unit-scaled) to an evaluated point are discarded.
    pub min_separation: f64,
}

impl Default for RbfSettings {
    fn default() -> Self {
        Self {
            cycle_weights: vec![0.3, 0.5, 0.8, 0.95],
            candidates_per_dim: 200,
            initial_radius: 0.2,
            min_radius: 1e-4,
            max_radius: 0.2,
            adapt_after: 3,
            min_separation: 1e-9,
        }
    }
}

/// What a single step of the search cycle is trying to do.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Step {
    Explore,
    Weighted(f64),
    Exploit,
}

/// Cubic RBF interpolant `s(x) = Σ λ_i |x - x_i|³ + c_0 + Σ c_k x_k`.
#[derive(Debug, Clone)]
pub struct RbfModel {
    centers: Vec<Vec<f64>>,
    lambda: Vec<f64>,
    tail: Vec<f64>,
}

impl RbfModel {
    /// Fit the interpolant through `(centers[i], values[i])`. Returns `None`
    /// when the interpolation system is singular (too few or degenerate points).
    pub fn fit(centers: &[Vec<f64>], values: &[f64]) -> Option<Self> {
        let m = centers.len();
        let dim = centers.first()?.len();
        if m < dim + 1 {
            return None;
        }
        let size = m + dim + 1;
        let mut a: Matrix = vec![vec![0.0; size]; size];
        for i in 0..m {
            for j in 0..m {
                a[i][j] = distance(&centers[i], &centers[j]).powi(3);
            }
            a[i][m] = 1.0;
            a[m][i] = 1.0;
            for k in 0..dim {
                a[i][m + 1 + k] = centers[i][k];
                a[m + 1 + k][i] = centers[i][k];
            }
        }
        let mut b = values.to_vec();
        b.resize(size, 0.0);

        let coeffs = solve(a, b)?;
        Some(Self {
            centers: centers.to_vec(),
            lambda: coeffs[..m].to_vec(),
            tail: coeffs[m..].to_vec(),
        })
    }

    pub fn predict(&self, x: &[f64]) -> f64 {
        let radial: f64 = self
            .centers
            .iter()
            .zip(&self.lambda)
            .map(|(c, l)| l * distance(x, c).powi(3))
            .sum();
        let linear: f64 = self.tail[1..].iter().zip(x).map(|(c, v)| c * v).sum();
        radial + self.tail[0] + linear
    }
}

/// Surrogate-model global optimizer for expensive, continuous objectives.
pub struct RbfOptimizer {
    bounds: BoxBounds,
    x0: Vec<f64>,
    settings: RbfSettings,
    rng: StdRng,
    points: Vec<Vec<f64>>,
    values: Vec<f64>,
    radius: f64,
    successes: usize,
    failures: usize,
}

impl RbfOptimizer {
    pub fn new(bounds: BoxBounds, x0: Vec<f64>, seed: Option<u64>) -> Self {
        Self::with_settings(bounds, x0, seed, RbfSettings::default())
    }

    pub fn with_settings(bounds: BoxBounds, x0: Vec<f64>, seed: Option<u64>, settings: RbfSettings) -> Self {
        let radius = settings.initial_radius;
        Self {
            bounds,
            x0,
            settings,
            rng: seeded_rng(seed),
            points: Vec::new(),
            values: Vec::new(),
            radius,
            successes: 0,
            failures: 0,
        }
    }

    /// Spend the tracker's budget minimizing the objective.
    pub fn minimize<O: Objective + ?Sized>(&mut self, tracker: &mut EvaluationTracker<'_, O>) -> BbResult<()> {
        let dim = self.bounds.dim();
        info!(
            dim,
            budget = tracker.remaining(),
            "Starting RBF surrogate optimization"
        );

        let n_init = (2 * dim + 1).min(tracker.remaining());
        let mut design = vec![self.bounds.to_unit(&self.x0)];
        design.extend(latin_hypercube(&mut self.rng, n_init.saturating_sub(1), dim));
        for u in design.into_iter().take(n_init) {
            if !self.sample(tracker, u)? {
                return Ok(());
            }
        }

        let mut cycle = Vec::with_capacity(self.settings.cycle_weights.len() + 2);
        cycle.push(Step::Explore);
        cycle.extend(self.settings.cycle_weights.iter().map(|w| Step::Weighted(*w)));
        cycle.push(Step::Exploit);

        let mut iteration = 0usize;
        while !tracker.is_exhausted() {
            let step = cycle[iteration % cycle.len()];
            iteration += 1;

            let best_before = self.best_value();
            let candidate = self.propose(step);
            debug!(?step, radius = self.radius, "surrogate step");
            if !self.sample(tracker, candidate)? {
                break;
            }
            if step != Step::Explore {
                self.adapt_radius(best_before);
            }
        }

        info!(
            evaluations = tracker.evaluations(),
            best = ?tracker.best_value(),
            "RBF surrogate optimization finished"
        );
        Ok(())
    }

    fn sample<O: Objective + ?Sized>(&mut self, tracker: &mut EvaluationTracker<'_, O>, u: Vec<f64>) -> BbResult<bool> {
        let x = self.bounds.from_unit(&u);
        match tracker.evaluate(&x)? {
            Some(value) => {
                self.points.push(self.bounds.to_unit(&x));
                self.values.push(value);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn best_index(&self) -> Option<usize> {
        (0..self.values.len()).min_by(|&a, &b| compare_values(self.values[a], self.values[b]))
    }

    fn best_value(&self) -> f64 {
        self.best_index()
            .map(|i| self.values[i])
            .unwrap_or(f64::INFINITY)
    }

    /// Halve the radius after repeated failures, double it after repeated
    /// successes. A success must improve the best value by a relative margin.
    fn adapt_radius(&mut self, best_before: f64) {
        let best_after = self.best_value();
        let margin = 1e-3 * best_before.abs().max(1e-12);
        if best_after < best_before - margin {
            self.successes += 1;
            self.failures = 0;
        } else {
            self.failures += 1;
            self.successes = 0;
        }

        if self.failures >= self.settings.adapt_after {
            self.radius = (self.radius / 2.0).max(self.settings.min_radius);
            self.failures = 0;
        } else if self.successes >= self.settings.adapt_after {
            self.radius = (self.radius * 2.0).min(self.settings.max_radius);
            self.successes = 0;
        }
    }

    /// Values fed to the model: entries above the median are clipped to it so
    /// a few huge outliers do not flatten the interpolant elsewhere.
    fn model_values(&self) -> Vec<f64> {
        let mut finite: Vec<f64> = self.values.iter().copied().filter(|v| v.is_finite()).collect();
        if finite.is_empty() {
            return vec![0.0; self.values.len()];
        }
        finite.sort_by(f64::total_cmp);
        let median = finite[finite.len() / 2];
        self.values
            .iter()
            .map(|v| if v.is_finite() { v.min(median) } else { median })
            .collect()
    }

    fn propose(&mut self, step: Step) -> Vec<f64> {
        let dim = self.bounds.dim();
        let count = (self.settings.candidates_per_dim * dim).max(self.settings.candidates_per_dim);
        let incumbent = self.best_index().map(|i| self.points[i].clone());

        let candidates: Vec<Vec<f64>> = match (step, &incumbent) {
            (Step::Explore, _) | (_, None) => self.uniform_candidates(count),
            (Step::Weighted(_), Some(center)) => {
                let mut c = self.uniform_candidates(count / 2);
                c.extend(self.local_candidates(center, count - count / 2));
                c
            }
            (Step::Exploit, Some(center)) => self.local_candidates(center, count),
        };

        let model = match step {
            Step::Explore => None,
            _ => RbfModel::fit(&self.points, &self.model_values()),
        };
        let weight = match (step, &model) {
            (Step::Weighted(w), Some(_)) => w,
            (Step::Exploit, Some(_)) => 1.0,
            _ => 0.0,
        };

        let points = &self.points;
        let min_separation = self.settings.min_separation;
        let scored: Vec<(f64, f64)> = candidates
            .par_iter()
            .map(|c| {
                let nearest = points
                    .iter()
                    .map(|p| distance(c, p))
                    .fold(f64::INFINITY, f64::min);
                let surrogate = model.as_ref().map(|m| m.predict(c)).unwrap_or(0.0);
                (surrogate, nearest)
            })
            .collect();

        let admissible: Vec<usize> = (0..candidates.len())
            .filter(|&i| scored[i].1 > min_separation)
            .collect();
        if admissible.is_empty() {
            return self.uniform_candidates(1).remove(0);
        }

        let (s_min, s_max) = min_max(admissible.iter().map(|&i| scored[i].0));
        let (d_min, d_max) = min_max(admissible.iter().map(|&i| scored[i].1));
        let score = |i: usize| {
            let (s, d) = scored[i];
            let s_norm = if s_max > s_min { (s - s_min) / (s_max - s_min) } else { 0.0 };
            let d_norm = if d_max > d_min { (d_max - d) / (d_max - d_min) } else { 0.0 };
            weight * s_norm + (1.0 - weight) * d_norm
        };

        let chosen = admissible
            .iter()
            .copied()
            .min_by(|&a, &b| score(a).total_cmp(&score(b)))
            .unwrap_or(admissible[0]);
        candidates[chosen].clone()
    }

    fn uniform_candidates(&mut self, count: usize) -> Vec<Vec<f64>> {
        let dim = self.bounds.dim();
        (0..count)
            .map(|_| (0..dim).map(|_| self.rng.random::<f64>()).collect())
            .collect()
    }

    fn local_candidates(&mut self, center: &[f64], count: usize) -> Vec<Vec<f64>> {
        (0..count)
            .map(|_| {
                center
                    .iter()
                    .map(|c| (c + self.radius * standard_normal(&mut self.rng)).clamp(0.0, 1.0))
                    .collect()
            })
            .collect()
    }
}

fn min_max(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objective::FnObjective;

    fn sphere(x: &[f64]) -> f64 {
        (x[0] - 1.0).powi(2) + (x[1] - 1.0).powi(2)
    }

    #[test]
    fn model_interpolates_its_centers() {
        let centers = vec![
            vec![0.0, 0.0],
            vec![1.0, 0.0],
            vec![0.0, 1.0],
            vec![1.0, 1.0],
            vec![0.5, 0.3],
        ];
        let values: Vec<f64> = centers.iter().map(|c| sphere(c)).collect();
        let model = RbfModel::fit(&centers, &values).unwrap();
        for (c, v) in centers.iter().zip(&values) {
            assert!((model.predict(c) - v).abs() < 1e-8);
        }
    }

    #[test]
    fn model_reproduces_linear_functions() {
        let centers = vec![vec![0.0], vec![0.25], vec![0.6], vec![1.0]];
        let values: Vec<f64> = centers.iter().map(|c| 3.0 * c[0] - 1.0).collect();
        let model = RbfModel::fit(&centers, &values).unwrap();
        assert!((model.predict(&[0.8]) - 1.4).abs() < 1e-8);
    }

    #[test]
    fn model_needs_enough_points() {
        let centers = vec![vec![0.0, 0.0], vec![1.0, 1.0]];
        assert!(RbfModel::fit(&centers, &[0.0, 1.0]).is_none());
    }

    #[test]
    fn finds_minimum_of_shifted_sphere() {
        let bounds = BoxBounds::new(vec![0.0, 0.0], vec![3.0, 3.0]);
        let mut objective = FnObjective(sphere);
        let mut tracker = EvaluationTracker::new(&mut objective, 50);
        let mut optimizer = RbfOptimizer::new(bounds, vec![1.5, 1.5], Some(42));
        optimizer.minimize(&mut tracker).unwrap();

        let result = tracker.into_result().unwrap();
        assert_eq!(result.evaluations, 50);
        assert!(result.best_value < 1e-2, "best value {}", result.best_value);
        assert!((result.best_vars[0] - 1.0).abs() < 0.1);
        assert!((result.best_vars[1] - 1.0).abs() < 0.1);
    }

    #[test]
    fn every_evaluation_stays_in_bounds() {
        let bounds = BoxBounds::new(vec![-1.0, 2.0, 0.0], vec![1.0, 5.0, 0.5]);
        let check = bounds.clone();
        let mut objective = FnObjective(move |x: &[f64]| {
            assert!(check.contains(x), "out of bounds: {x:?}");
            x.iter().map(|v| v.sin()).sum()
        });
        let mut tracker = EvaluationTracker::new(&mut objective, 30);
        RbfOptimizer::new(bounds, vec![0.0, 3.5, 0.25], Some(1))
            .minimize(&mut tracker)
            .unwrap();
        assert_eq!(tracker.evaluations(), 30);
    }

    #[test]
    fn tiny_budget_only_runs_initial_design() {
        let bounds = BoxBounds::new(vec![0.0, 0.0], vec![3.0, 3.0]);
        let mut objective = FnObjective(sphere);
        let mut tracker = EvaluationTracker::new(&mut objective, 2);
        RbfOptimizer::new(bounds, vec![1.0, 1.0], Some(5))
            .minimize(&mut tracker)
            .unwrap();
        let result = tracker.into_result().unwrap();
        assert_eq!(result.evaluations, 2);
        assert_eq!(result.best_vars, vec![1.0, 1.0]);
    }
}
