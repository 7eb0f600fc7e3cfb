// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

//! Geometric backtracking along a slowness-squared update.

use crate::error::{Result, TomoError};

/// Result of one line search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LineSearchOutcome {
    /// A trial reduced the misfit below the reference norm.
    Accepted {
        /// Misfit norm of the accepted trial.
        norm: f64,
        /// Step length of the accepted trial.
        step: f64,
        /// Number of trials evaluated, including the accepted one.
        trials: usize,
    },
    /// Every trial was rejected.
    Exhausted {
        /// Number of trials evaluated.
        trials: usize,
    },
}

/// Backtracking controls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineSearch {
    /// Step length of the first trial.
    pub initial_step: f64,
    /// Largest number of trials; the step halves after each rejection.
    pub max_trials: usize,
}

impl Default for LineSearch {
    fn default() -> Self {
        LineSearch {
            initial_step: 0.5,
            max_trials: 5,
        }
    }
}

impl LineSearch {
    /// Step lengths tried in order.
    pub fn steps(&self) -> impl Iterator<Item = f64> {
        let first = self.initial_step;
        (0..self.max_trials).map(move |k| first * 0.5f64.powi(k as i32))
    }

    /// Search along `dw` from `w`.
    ///
    /// Each trial forms `w1 = (w + step*dw)^2 / w` in `trial` and evaluates
    /// `misfit(trial)`. The first trial whose norm is strictly below
    /// `reference` is accepted and left in `trial`.
    ///
    /// # Errors
    /// Returns [`TomoError::NumericalDegenerate`] if a trial model is not
    /// positive and finite, and propagates errors from `misfit`.
    pub fn search<F>(
        &self,
        w: &[f64],
        dw: &[f64],
        trial: &mut [f64],
        reference: f64,
        mut misfit: F,
    ) -> Result<LineSearchOutcome>
    where
        F: FnMut(&[f64]) -> Result<f64>,
    {
        let mut trials = 0;
        for step in self.steps() {
            trials += 1;
            trial_model(w, dw, step, trial)?;
            let norm = misfit(trial)?;
            if norm / reference < 1.0 {
                return Ok(LineSearchOutcome::Accepted {
                    norm,
                    step,
                    trials,
                });
            }
        }
        Ok(LineSearchOutcome::Exhausted { trials })
    }
}

/// Element-wise `(w + step*dw)^2 / w`.
pub fn trial_model(w: &[f64], dw: &[f64], step: f64, out: &mut [f64]) -> Result<()> {
    for (index, ((&wi, &dwi), o)) in w.iter().zip(dw).zip(out.iter_mut()).enumerate() {
        let u = wi + step * dwi;
        let value = u * u / wi;
        if !value.is_finite() || value <= 0.0 {
            return Err(TomoError::NumericalDegenerate {
                context: "line-search trial model",
                index,
                value,
            });
        }
        *o = value;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_halve_from_one_half() {
        let steps: Vec<f64> = LineSearch::default().steps().collect();
        assert_eq!(steps, vec![0.5, 0.25, 0.125, 0.0625, 0.03125]);
    }

    #[test]
    fn trial_model_formula() {
        let mut out = [0.0; 2];
        trial_model(&[1.0, 4.0], &[2.0, -2.0], 0.5, &mut out).unwrap();
        assert_eq!(out, [4.0, 2.25]);
    }

    #[test]
    fn trial_model_rejects_zero() {
        let mut out = [0.0; 1];
        let result = trial_model(&[1.0], &[-2.0], 0.5, &mut out);
        assert!(matches!(
            result,
            Err(TomoError::NumericalDegenerate { index: 0, .. })
        ));
    }

    #[test]
    fn accepts_first_decrease() {
        let search = LineSearch::default();
        let mut trial = vec![0.0; 1];
        let mut seen = Vec::new();
        let outcome = search
            .search(&[1.0], &[1.0], &mut trial, 1.0, |w1| {
                seen.push(w1[0]);
                // Misfit grows with the model; only small steps reduce it.
                Ok(w1[0] - 0.5)
            })
            .unwrap();
        // w1 = (1 + step)^2: 2.25, 1.5625, 1.265625 (accepted, 0.765625 < 1).
        assert_eq!(seen.len(), 3);
        assert_eq!(
            outcome,
            LineSearchOutcome::Accepted {
                norm: 1.265625 - 0.5,
                step: 0.125,
                trials: 3
            }
        );
        assert_eq!(trial[0], 1.265625);
    }

    #[test]
    fn never_accepts_equal_norm() {
        let search = LineSearch::default();
        let mut trial = vec![0.0; 2];
        let mut calls = 0;
        let outcome = search
            .search(&[1.0, 1.0], &[0.1, 0.1], &mut trial, 2.0, |_| {
                calls += 1;
                Ok(2.0)
            })
            .unwrap();
        assert_eq!(calls, 5);
        assert_eq!(outcome, LineSearchOutcome::Exhausted { trials: 5 });
    }

    #[test]
    fn misfit_error_propagates() {
        let search = LineSearch::default();
        let mut trial = vec![0.0; 1];
        let result = search.search(&[1.0], &[0.0], &mut trial, 1.0, |_| {
            Err(TomoError::Other("forward failed".to_string()))
        });
        assert!(matches!(result, Err(TomoError::Other(_))));
    }
}
