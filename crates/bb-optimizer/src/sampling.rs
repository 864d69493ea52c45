//! Box constraints and random sampling helpers shared by both optimizers.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Componentwise lower/upper limits on the design variables.
#[derive(Debug, Clone, PartialEq)]
pub struct BoxBounds {
    lower: Vec<f64>,
    upper: Vec<f64>,
}

impl BoxBounds {
    /// Bounds must already be validated: equal lengths, `lower <= upper`.
    pub fn new(lower: Vec<f64>, upper: Vec<f64>) -> Self {
        debug_assert_eq!(lower.len(), upper.len());
        Self { lower, upper }
    }

    pub fn dim(&self) -> usize {
        self.lower.len()
    }

    pub fn width(&self, i: usize) -> f64 {
        self.upper[i] - self.lower[i]
    }

    pub fn contains(&self, x: &[f64]) -> bool {
        x.len() == self.dim()
            && x
                .iter()
                .zip(self.lower.iter().zip(&self.upper))
                .all(|(v, (lo, up))| *lo <= *v && *v <= *up)
    }

    /// Repair `x` in place by projecting each component onto its interval.
    pub fn clamp(&self, x: &mut [f64]) {
        for (i, v) in x.iter_mut().enumerate() {
            *v = if v.is_nan() {
                (self.lower[i] + self.upper[i]) / 2.0
            } else {
                v.clamp(self.lower[i], self.upper[i])
            };
        }
    }

    /// Map a point into the unit cube. Fixed (zero-width) variables map to 0.
    pub fn to_unit(&self, x: &[f64]) -> Vec<f64> {
        x.iter()
            .enumerate()
            .map(|(i, v)| {
                let w = self.width(i);
                if w > 0.0 {
                    ((v - self.lower[i]) / w).clamp(0.0, 1.0)
                } else {
                    0.0
                }
            })
            .collect()
    }

    /// Inverse of [`to_unit`](Self::to_unit); the result is always inside the box.
    pub fn from_unit(&self, u: &[f64]) -> Vec<f64> {
        u.iter()
            .enumerate()
            .map(|(i, t)| (self.lower[i] + t * self.width(i)).clamp(self.lower[i], self.upper[i]))
            .collect()
    }
}

/// Seeded generator when a seed is configured, OS entropy otherwise.
pub fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    }
}

/// One draw from N(0, 1) via the Box-Muller transform.
pub fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    // 1 - U(0,1] keeps the logarithm finite.
    let u1: f64 = 1.0 - rng.random::<f64>();
    let u2: f64 = rng.random::<f64>();
    (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}

/// Latin hypercube sample of `n_points` points in `[0, 1]^dim`: every axis
/// is split into `n_points` strata and each stratum is hit exactly once.
pub fn latin_hypercube<R: Rng + ?Sized>(rng: &mut R, n_points: usize, dim: usize) -> Vec<Vec<f64>> {
    let mut points = vec![vec![0.0; dim]; n_points];
    if n_points == 0 {
        return points;
    }
    for axis in 0..dim {
        let mut strata: Vec<usize> = (0..n_points).collect();
        // Fisher-Yates
        for i in (1..n_points).rev() {
            let j = rng.random_range(0..=i);
            strata.swap(i, j);
        }
        for (point, stratum) in points.iter_mut().zip(strata) {
            point[axis] = (stratum as f64 + rng.random::<f64>()) / n_points as f64;
        }
    }
    points
}

/// Euclidean distance.
pub fn distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds() -> BoxBounds {
        BoxBounds::new(vec![0.0, -1.0, 2.0], vec![3.0, 1.0, 2.0])
    }

    #[test]
    fn clamp_projects_into_box() {
        let b = bounds();
        let mut x = vec![4.0, -7.0, f64::NAN];
        b.clamp(&mut x);
        assert_eq!(x, vec![3.0, -1.0, 2.0]);
        assert!(b.contains(&x));
    }

    #[test]
    fn unit_mapping_handles_fixed_variables() {
        let b = bounds();
        let u = b.to_unit(&[1.5, 0.0, 2.0]);
        assert_eq!(u, vec![0.5, 0.5, 0.0]);
        assert_eq!(b.from_unit(&u), vec![1.5, 0.0, 2.0]);
        assert!(b.contains(&b.from_unit(&[1.0, 1.0, 1.0])));
    }

    #[test]
    fn latin_hypercube_hits_every_stratum() {
        let mut rng = seeded_rng(Some(7));
        let n = 8;
        let points = latin_hypercube(&mut rng, n, 3);
        assert_eq!(points.len(), n);
        for axis in 0..3 {
            let mut seen = vec![false; n];
            for p in &points {
                assert!((0.0..=1.0).contains(&p[axis]));
                let stratum = ((p[axis] * n as f64) as usize).min(n - 1);
                seen[stratum] = true;
            }
            assert!(seen.iter().all(|s| *s), "axis {axis} missed a stratum");
        }
    }

    #[test]
    fn standard_normal_has_unit_moments() {
        let mut rng = seeded_rng(Some(11));
        let n = 20_000;
        let draws: Vec<f64> = (0..n).map(|_| standard_normal(&mut rng)).collect();
        let mean = draws.iter().sum::<f64>() / n as f64;
        let var = draws.iter().map(|z| (z - mean).powi(2)).sum::<f64>() / n as f64;
        assert!(mean.abs() < 0.05, "mean {mean}");
        assert!((var - 1.0).abs() < 0.05, "variance {var}");
    }

    #[test]
    fn seeded_rng_is_reproducible() {
        let a: Vec<f64> = {
            let mut rng = seeded_rng(Some(3));
            (0..4).map(|_| rng.random()).collect()
        };
        let b: Vec<f64> = {
            let mut rng = seeded_rng(Some(3));
            (0..4).map(|_| rng.random()).collect()
        };
        assert_eq!(a, b);
    }
}
