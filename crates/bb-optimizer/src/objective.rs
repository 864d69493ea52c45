//! Objective-function contract and budget-aware evaluation tracking.

use bb_types::{BbResult, EvaluationResult, OptimizerError};
use std::cmp::Ordering;
use tracing::debug;

/// A function from a design variable vector to the scalar being minimized.
///
/// Evaluation may block for an unbounded time (the handshake bridge waits on
/// an external process) and may fail fatally; a failed evaluation aborts the
/// whole run.
pub trait Objective {
    fn evaluate(&mut self, x: &[f64]) -> BbResult<f64>;
}

impl<O: Objective + ?Sized> Objective for &mut O {
    fn evaluate(&mut self, x: &[f64]) -> BbResult<f64> {
        (**self).evaluate(x)
    }
}

/// Adapts an infallible closure into an [`Objective`].
pub struct FnObjective<F>(pub F);

impl<F> Objective for FnObjective<F>
where
    F: FnMut(&[f64]) -> f64,
{
    fn evaluate(&mut self, x: &[f64]) -> BbResult<f64> {
        Ok((self.0)(x))
    }
}

/// Total order used to rank objective values: NaN sorts after everything.
pub fn compare_values(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (true, true) => Ordering::Equal,
    }
}

/// Wraps an objective, enforcing the evaluation budget and remembering the
/// best point seen. Both optimizers evaluate exclusively through this.
pub struct EvaluationTracker<'a, O: ?Sized> {
    objective: &'a mut O,
    budget: usize,
    evaluations: usize,
    best: Option<(Vec<f64>, f64)>,
}

impl<'a, O: Objective + ?Sized> EvaluationTracker<'a, O> {
    pub fn new(objective: &'a mut O, budget: usize) -> Self {
        Self {
            objective,
            budget,
            evaluations: 0,
            best: None,
        }
    }

    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    pub fn remaining(&self) -> usize {
        self.budget.saturating_sub(self.evaluations)
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    /// Evaluate `x`, or return `None` without calling the objective once the
    /// budget is spent.
    pub fn evaluate(&mut self, x: &[f64]) -> BbResult<Option<f64>> {
        if self.is_exhausted() {
            return Ok(None);
        }
        let value = self.objective.evaluate(x)?;
        self.evaluations += 1;
        debug!(evaluation = self.evaluations, value, "objective evaluated");

        let improved = match &self.best {
            None => true,
            Some((_, best)) => compare_values(value, *best) == Ordering::Less,
        };
        if improved {
            self.best = Some((x.to_vec(), value));
        }
        Ok(Some(value))
    }

    pub fn best_value(&self) -> Option<f64> {
        self.best.as_ref().map(|(_, v)| *v)
    }

    pub fn into_result(self) -> BbResult<EvaluationResult> {
        let (best_vars, best_value) = self.best.ok_or(OptimizerError::NoEvaluations)?;
        Ok(EvaluationResult {
            best_vars,
            best_value,
            evaluations: self.evaluations,
        })
    }
}
