// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

//! Regularization strategies for the per-iteration model update.

use tracing::debug;

use crate::core::Grid;
use crate::error::{Result, TomoError};
use crate::operators::{Gradient2, LinearOperator, Repeat, TriangleSmoothing};
use crate::solver::{solve_reg, CgStep, ConjGrad, SHAPING_TOL};

/// Solves the linearized system `J dw ~ dt` for a model update.
pub trait UpdateSolver {
    /// Overwrite `dw` with the update for residual `dt`.
    ///
    /// # Errors
    /// Returns an error if the buffers do not match the operator or the
    /// update is not finite.
    fn solve(&mut self, op: &dyn LinearOperator, dt: &[f64], dw: &mut [f64]) -> Result<()>;

    /// Release solver state at the end of a run.
    fn finish(&mut self) {}
}

/// The regularization chosen for a run.
#[derive(Debug, Clone)]
pub enum Regularization {
    /// Shaping regularization: the update lies in the range of a triangle
    /// smoother and is found by shaping conjugate gradients.
    Shaping {
        /// Smoothing (shaping) operator over the model.
        smoother: Repeat<TriangleSmoothing>,
        /// Shaping conjugate-gradient solver.
        cg: ConjGrad,
        /// Conjugate-gradient iterations per solve.
        niter: usize,
    },
    /// Explicit penalty `eps ||G dw||^2` on the model gradient.
    GradientPenalty {
        /// Forward-difference gradient over the model.
        gradient: Gradient2,
        /// Penalty weight.
        eps: f64,
        /// Conjugate-direction iterations per solve.
        niter: usize,
        /// Step history, reset for every solve.
        step: CgStep,
        /// Log every inner iteration.
        verb: bool,
    },
}

impl Regularization {
    /// Shaping with per-axis triangle radii `rect`.
    pub fn shaping(grid: &Grid, rect: [usize; 2], eps: f64, niter: usize) -> Self {
        let smoother = TriangleSmoothing::new([grid.nz(), grid.nx()], rect);
        Regularization::Shaping {
            smoother: Repeat::new(smoother, 1),
            cg: ConjGrad::new(eps, SHAPING_TOL),
            niter,
        }
    }

    /// Gradient penalty with weight `eps`.
    pub fn gradient_penalty(grid: &Grid, eps: f64, niter: usize) -> Self {
        Regularization::GradientPenalty {
            gradient: Gradient2::new(grid.nz(), grid.nx()),
            eps,
            niter,
            step: CgStep::new(),
            verb: false,
        }
    }

    /// Enable or disable per-iteration logging of the inner solver.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        match &mut self {
            Regularization::Shaping { cg, .. } => *cg = cg.with_verbose(verbose),
            Regularization::GradientPenalty { verb, .. } => *verb = verbose,
        }
        self
    }

    /// Whether the inner solver logs every iteration.
    pub fn is_verbose(&self) -> bool {
        match self {
            Regularization::Shaping { cg, .. } => cg.verb,
            Regularization::GradientPenalty { verb, .. } => *verb,
        }
    }

    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Regularization::Shaping { .. } => "shaping",
            Regularization::GradientPenalty { .. } => "gradient penalty",
        }
    }
}

impl UpdateSolver for Regularization {
    fn solve(&mut self, op: &dyn LinearOperator, dt: &[f64], dw: &mut [f64]) -> Result<()> {
        if dt.len() != op.ny() || dw.len() != op.nx() {
            return Err(TomoError::ShapeMismatch {
                expected: vec![op.ny(), op.nx()],
                got: vec![dt.len(), dw.len()],
            });
        }
        dw.fill(0.0);

        match self {
            Regularization::Shaping { smoother, cg, niter } => {
                let iters = cg.solve(op, &*smoother, dt, dw, *niter);
                debug!("shaping solve used {} iterations", iters);
            }
            Regularization::GradientPenalty {
                gradient,
                eps,
                niter,
                step,
                verb,
            } => {
                let res = solve_reg(op, &*gradient, *eps, dt, dw, *niter, step, *verb);
                debug!("penalized solve data residual {}", res);
            }
        }

        match dw.iter().position(|v| !v.is_finite()) {
            Some(index) => Err(TomoError::NumericalDegenerate {
                context: "model update",
                index,
                value: dw[index],
            }),
            None => Ok(()),
        }
    }

    fn finish(&mut self) {
        if let Regularization::GradientPenalty { step, .. } = self {
            step.close();
        }
    }
}
