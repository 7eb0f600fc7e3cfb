// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

//! Iterative least-squares solvers for the model update.
//!
//! [`ConjGrad`] solves the shaping-regularized system, [`solve_reg`] the
//! explicitly penalized one using the conjugate-direction [`CgStep`].

use tracing::debug;

use crate::operators::LinearOperator;

/// Inner tolerance used by the shaping solver.
pub const SHAPING_TOL: f64 = 1e-6;

const EPSILON: f64 = 1e-12;

#[inline]
pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[inline]
fn axpy(alpha: f64, x: &[f64], y: &mut [f64]) {
    y.iter_mut().zip(x).for_each(|(yi, xi)| *yi += alpha * xi);
}

/// Conjugate gradients with shaping regularization.
///
/// Solves `J x ~ d` with the model constrained to `x = S p`, where `S` is the
/// shaping operator, minimizing `||J x - d||^2 + eps (||p||^2 - ||x||^2)`.
#[derive(Debug, Clone, Copy)]
pub struct ConjGrad {
    /// Scaling of the shaping term.
    pub eps: f64,
    /// Stop once the step ratio or the relative gradient power drops below this.
    pub tol: f64,
    /// Log every inner iteration at DEBUG level.
    pub verb: bool,
}

impl ConjGrad {
    /// Create a solver with the given scaling and tolerance.
    pub fn new(eps: f64, tol: f64) -> Self {
        ConjGrad {
            eps,
            tol,
            verb: false,
        }
    }

    /// Enable or disable per-iteration logging.
    pub fn with_verbose(mut self, verb: bool) -> Self {
        self.verb = verb;
        self
    }

    /// Run at most `niter` iterations, writing the model into `x`.
    /// Returns the number of iterations that updated the model.
    pub fn solve(
        &self,
        oper: &dyn LinearOperator,
        shape: &dyn LinearOperator,
        dat: &[f64],
        x: &mut [f64],
        niter: usize,
    ) -> usize {
        let (nx, nr) = (oper.nx(), oper.ny());
        let np = shape.nx();
        let eps = self.eps;

        let mut r: Vec<f64> = dat.iter().map(|d| -d).collect();
        let mut p = vec![0.0; np];
        let mut gp = vec![0.0; np];
        let mut gx = vec![0.0; nx];
        let mut gr = vec![0.0; nr];
        let mut sp = vec![0.0; np];
        let mut sx = vec![0.0; nx];
        let mut sr = vec![0.0; nr];
        x.fill(0.0);

        let r0 = dot(&r, &r);
        if r0 == 0.0 {
            debug!("zero residual: r0={}", r0);
            return 0;
        }

        let (mut g0, mut gnp) = (0.0, 0.0);
        let mut done = 0;
        for iter in 0..niter {
            gp.iter_mut().zip(&p).for_each(|(g, v)| *g = eps * v);
            gx.iter_mut().zip(x.iter()).for_each(|(g, v)| *g = -eps * v);
            oper.adjoint(true, &mut gx, &r);
            shape.adjoint(true, &mut gp, &gx);
            shape.forward(false, &gp, &mut gx);
            oper.forward(false, &gx, &mut gr);

            let gn = dot(&gp, &gp);
            if iter == 0 {
                g0 = gn;
                sp.copy_from_slice(&gp);
                sx.copy_from_slice(&gx);
                sr.copy_from_slice(&gr);
            } else {
                let alpha = gn / gnp;
                let dg = gn / g0;
                if alpha < self.tol || dg < self.tol {
                    if self.verb {
                        debug!(
                            "convergence in {} iterations, alpha={}, gd={}",
                            iter, alpha, dg
                        );
                    }
                    break;
                }
                for (s, g) in sp.iter_mut().zip(&gp) {
                    *s = g + alpha * *s;
                }
                for (s, g) in sx.iter_mut().zip(&gx) {
                    *s = g + alpha * *s;
                }
                for (s, g) in sr.iter_mut().zip(&gr) {
                    *s = g + alpha * *s;
                }
            }

            let beta = dot(&sr, &sr) + eps * (dot(&sp, &sp) - dot(&sx, &sx));
            if !(beta > 0.0) {
                debug!("degenerate search direction at iteration {}", iter);
                break;
            }
            if self.verb {
                debug!(
                    "iteration {} res {} mod {} grad {}",
                    iter,
                    dot(&r, &r).sqrt() / r0.sqrt(),
                    dot(&p, &p).sqrt(),
                    (gn / g0).sqrt()
                );
            }

            let alpha = -gn / beta;
            axpy(alpha, &sp, &mut p);
            axpy(alpha, &sx, x);
            axpy(alpha, &sr, &mut r);
            gnp = gn;
            done = iter + 1;
        }
        done
    }
}

/// Conjugate-direction step with plane search.
///
/// Holds the previous step in model (`S`) and residual (`Ss`) space. The
/// history is owned by the caller: [`CgStep::reset`] starts a fresh
/// sequence and [`CgStep::close`] releases the buffers.
#[derive(Debug, Clone, Default)]
pub struct CgStep {
    s: Vec<f64>,
    ss: Vec<f64>,
    fresh: bool,
}

impl CgStep {
    /// Create an empty step state.
    pub fn new() -> Self {
        CgStep {
            s: Vec::new(),
            ss: Vec::new(),
            fresh: true,
        }
    }

    /// Forget the step history; the next step is a steepest-descent step.
    pub fn reset(&mut self) {
        self.fresh = true;
    }

    /// Release the history buffers.
    pub fn close(&mut self) {
        self.s = Vec::new();
        self.ss = Vec::new();
        self.fresh = true;
    }

    /// Whether the history buffers are allocated.
    pub fn is_allocated(&self) -> bool {
        !self.s.is_empty() || !self.ss.is_empty()
    }

    /// Update `x` and the residual `rr` given the gradient `g` and its image
    /// `gg` in residual space.
    pub fn step(&mut self, x: &mut [f64], g: &[f64], rr: &mut [f64], gg: &[f64]) {
        let forget = self.fresh || self.s.len() != x.len() || self.ss.len() != rr.len();
        self.fresh = false;

        let (alfa, beta) = if forget {
            self.s.clear();
            self.s.resize(x.len(), 0.0);
            self.ss.clear();
            self.ss.resize(rr.len(), 0.0);
            let gdg = dot(gg, gg);
            if gdg <= 0.0 {
                return;
            }
            (-dot(gg, rr) / gdg, 0.0)
        } else {
            // Minimize over the plane spanned by the gradient and the last step.
            let gdg = dot(gg, gg);
            let sds = dot(&self.ss, &self.ss);
            let gds = dot(gg, &self.ss);
            if gdg == 0.0 || sds == 0.0 {
                return;
            }
            let mut determ = 1.0 - (gds / gdg) * (gds / sds);
            if determ > EPSILON {
                determ *= gdg * sds;
            } else {
                determ = gdg * sds * EPSILON;
            }
            let gdr = -dot(gg, rr);
            let sdr = -dot(&self.ss, rr);
            (
                (sds * gdr - gds * sdr) / determ,
                (-gds * gdr + gdg * sdr) / determ,
            )
        };

        for (s, gi) in self.s.iter_mut().zip(g) {
            *s = alfa * gi + beta * *s;
        }
        for (s, gi) in self.ss.iter_mut().zip(gg) {
            *s = alfa * gi + beta * *s;
        }
        axpy(1.0, &self.s, x);
        axpy(1.0, &self.ss, rr);
    }
}

/// Regularized least squares `min ||J x - d||^2 + eps ||R x||^2`.
///
/// Iterates the stacked system `[J; sqrt(eps) R] x ~ [d; 0]` with `step`,
/// starting from `x = 0`. The step history is reset before the first
/// iteration. Returns the final data residual norm.
#[allow(clippy::too_many_arguments)]
pub fn solve_reg(
    oper: &dyn LinearOperator,
    reg: &dyn LinearOperator,
    eps: f64,
    dat: &[f64],
    x: &mut [f64],
    niter: usize,
    step: &mut CgStep,
    verb: bool,
) -> f64 {
    let (nx, ny, nreg) = (oper.nx(), oper.ny(), reg.ny());
    let scale = eps.sqrt();

    let mut rr = vec![0.0; ny + nreg];
    for (r, d) in rr.iter_mut().zip(dat) {
        *r = -d;
    }
    let mut gg = vec![0.0; ny + nreg];
    let mut g = vec![0.0; nx];
    let mut tmp = vec![0.0; nx];
    x.fill(0.0);
    step.reset();

    for iter in 0..niter {
        let (rd, rm) = rr.split_at(ny);
        oper.adjoint(false, &mut g, rd);
        if scale > 0.0 {
            reg.adjoint(false, &mut tmp, rm);
            axpy(scale, &tmp, &mut g);
        }

        let (gd, gm) = gg.split_at_mut(ny);
        oper.forward(false, &g, gd);
        if scale > 0.0 {
            reg.forward(false, &g, gm);
            gm.iter_mut().for_each(|v| *v *= scale);
        } else {
            gm.fill(0.0);
        }

        step.step(x, &g, &mut rr, &gg);
        if verb {
            debug!(
                "iteration {} data residual {} model residual {}",
                iter,
                dot(&rr[..ny], &rr[..ny]).sqrt(),
                dot(&rr[ny..], &rr[ny..]).sqrt()
            );
        }
    }

    dot(&rr[..ny], &rr[..ny]).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::{Gradient2, Repeat, TriangleSmoothing};

    /// Small dense test matrix, row-major.
    struct Dense {
        rows: usize,
        cols: usize,
        a: Vec<f64>,
    }

    impl LinearOperator for Dense {
        fn nx(&self) -> usize {
            self.cols
        }

        fn ny(&self) -> usize {
            self.rows
        }

        fn forward(&self, add: bool, x: &[f64], y: &mut [f64]) {
            for i in 0..self.rows {
                let v: f64 = (0..self.cols).map(|j| self.a[i * self.cols + j] * x[j]).sum();
                y[i] = if add { y[i] + v } else { v };
            }
        }

        fn adjoint(&self, add: bool, x: &mut [f64], y: &[f64]) {
            for j in 0..self.cols {
                let v: f64 = (0..self.rows).map(|i| self.a[i * self.cols + j] * y[i]).sum();
                x[j] = if add { x[j] + v } else { v };
            }
        }
    }

    fn system() -> (Dense, Vec<f64>, Vec<f64>) {
        let a = vec![
            4.0, 1.0, 0.0, 0.5, //
            1.0, 3.0, 1.0, 0.0, //
            0.0, 1.0, 5.0, 1.0, //
            0.2, 0.0, 1.0, 2.0, //
            1.0, 1.0, 1.0, 1.0,
        ];
        let op = Dense {
            rows: 5,
            cols: 4,
            a,
        };
        let truth = vec![1.0, -2.0, 0.5, 3.0];
        let mut d = vec![0.0; 5];
        op.forward(false, &truth, &mut d);
        (op, truth, d)
    }

    #[test]
    fn shaping_cg_with_identity_recovers_consistent_solution() {
        let (op, truth, d) = system();
        let shape = Repeat::new(TriangleSmoothing::new([4, 1], [1, 1]), 1);
        let mut x = vec![0.0; 4];
        let iters = ConjGrad::new(0.0, SHAPING_TOL).solve(&op, &shape, &d, &mut x, 20);
        assert!(iters >= 1);
        for (a, b) in x.iter().zip(&truth) {
            assert!((a - b).abs() < 1e-6, "{} vs {}", a, b);
        }
    }

    #[test]
    fn shaping_cg_zero_data_returns_zero() {
        let (op, _, _) = system();
        let shape = TriangleSmoothing::new([4, 1], [1, 1]);
        let mut x = vec![7.0; 4];
        let iters = ConjGrad::new(0.0, SHAPING_TOL).solve(&op, &shape, &[0.0; 5], &mut x, 10);
        assert_eq!(iters, 0);
        assert!(x.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn penalized_solve_without_penalty_recovers_solution() {
        let (op, truth, d) = system();
        let reg = Gradient2::new(4, 1);
        let mut x = vec![0.0; 4];
        let mut step = CgStep::new();
        let res = solve_reg(&op, &reg, 0.0, &d, &mut x, 20, &mut step, false);
        assert!(res < 1e-8);
        for (a, b) in x.iter().zip(&truth) {
            assert!((a - b).abs() < 1e-6, "{} vs {}", a, b);
        }
        assert!(step.is_allocated());
        step.close();
        assert!(!step.is_allocated());
    }

    #[test]
    fn penalty_flattens_solution() {
        let (op, _, d) = system();
        let reg = Gradient2::new(4, 1);
        let roughness = |x: &[f64]| -> f64 {
            let mut gx = vec![0.0; reg.ny()];
            reg.forward(false, x, &mut gx);
            dot(&gx, &gx)
        };

        let mut step = CgStep::new();
        let mut free = vec![0.0; 4];
        solve_reg(&op, &reg, 0.0, &d, &mut free, 20, &mut step, false);
        let mut smooth = vec![0.0; 4];
        solve_reg(&op, &reg, 100.0, &d, &mut smooth, 20, &mut step, true);
        assert!(roughness(&smooth) < roughness(&free));
    }

    #[test]
    fn first_step_is_steepest_descent() {
        let mut step = CgStep::new();
        let mut x = vec![0.0; 2];
        let g = [1.0, 0.0];
        let mut rr = vec![-2.0, 0.0];
        let gg = [1.0, 0.0];
        step.step(&mut x, &g, &mut rr, &gg);
        assert!((x[0] - 2.0).abs() < 1e-14);
        assert!(rr.iter().all(|v| v.abs() < 1e-14));
    }
}
