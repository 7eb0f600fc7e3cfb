// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

//! The outer Gauss-Newton loop of DSR tomography.
//!
//! A run evaluates the initial misfit, then for each outer iteration
//! linearizes around the current model, solves for an update with the chosen
//! [`UpdateSolver`], and backtracks along it until the misfit decreases.
//! Line-search exhaustion stops the loop early and keeps the last accepted
//! model.

use tracing::{debug, info, warn};

use crate::conversion::{
    slowness_squared_to_velocity, validate_slowness_squared, velocity_gradient,
    velocity_to_slowness_squared,
};
use crate::core::{Grid, Mask, ReceiverRecord};
use crate::error::{Result, TomoError};
use crate::fastmarch::{DsrEikonal, EikonalOptions, TraveltimeField, UpwindOrder};
use crate::line_search::{LineSearch, LineSearchOutcome};
use crate::misfit::{norm, residual};
use crate::regularization::{Regularization, UpdateSolver};
use crate::tomography::DsrTomo;
use crate::update_kernels::RootSearch;

/// Run configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct InversionConfig {
    /// The model is velocity (otherwise slowness squared).
    pub velocity: bool,
    /// Restrict fast marching to the offsets covered by the data mask.
    pub limit: bool,
    /// Use shaping regularization instead of the gradient penalty.
    pub shape: bool,
    /// Verbose inner-solver logging.
    pub verb: bool,
    /// Number of outer iterations.
    pub niter: usize,
    /// Number of inner solver iterations.
    pub cgiter: usize,
    /// Near-horizontal rejection threshold of the root search.
    pub thres: f64,
    /// Relative bracket tolerance of the root search.
    pub tol: f64,
    /// Maximum bisection halvings of the root search.
    pub nloop: usize,
    /// Regularization weight.
    pub eps: f64,
    /// Ignore non-causal DSR branches.
    pub causal: bool,
    /// Triangle smoothing radius per model axis (shaping only).
    pub rect: [usize; 2],
}

impl Default for InversionConfig {
    fn default() -> Self {
        InversionConfig {
            velocity: true,
            limit: false,
            shape: false,
            verb: false,
            niter: 5,
            cgiter: 10,
            thres: 5e-5,
            tol: 1e-3,
            nloop: 10,
            eps: 0.0,
            causal: true,
            rect: [1, 1],
        }
    }
}

impl InversionConfig {
    /// Check parameter ranges.
    ///
    /// # Errors
    /// Returns [`TomoError::InvalidParameter`] naming the first bad option.
    pub fn validate(&self) -> Result<()> {
        let bad =
            |name: &'static str, reason: String| Err(TomoError::InvalidParameter { name, reason });
        if self.cgiter == 0 {
            return bad("cgiter", "must be at least 1".to_string());
        }
        if self.nloop == 0 {
            return bad("nloop", "must be at least 1".to_string());
        }
        if !self.tol.is_finite() || self.tol <= 0.0 {
            return bad("tol", format!("{} (must be positive and finite)", self.tol));
        }
        if !self.thres.is_finite() || self.thres < 0.0 {
            return bad("thres", format!("{} (must be non-negative and finite)", self.thres));
        }
        if !self.eps.is_finite() || self.eps < 0.0 {
            return bad("eps", format!("{} (must be non-negative and finite)", self.eps));
        }
        if let Some(axis) = self.rect.iter().position(|&r| r == 0) {
            return bad(
                if axis == 0 { "rect1" } else { "rect2" },
                "must be at least 1".to_string(),
            );
        }
        Ok(())
    }

    /// Eikonal solver options derived from the configuration.
    pub fn eikonal_options(&self) -> EikonalOptions {
        EikonalOptions {
            search: RootSearch {
                thres: self.thres,
                tol: self.tol,
                nloop: self.nloop,
            },
            causal: self.causal,
            limit: self.limit,
        }
    }
}

/// One entry of the iteration log.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IterationRecord {
    /// Outer iteration index (0 is the starting model).
    pub iteration: usize,
    /// Misfit relative to the starting misfit.
    pub rate: f64,
    /// Line-search trials used (0 for the starting model).
    pub trials: usize,
}

/// Append-only record of accepted iterations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IterationLog {
    records: Vec<IterationRecord>,
}

impl IterationLog {
    fn push(&mut self, iteration: usize, rate: f64, trials: usize) {
        self.records.push(IterationRecord {
            iteration,
            rate,
            trials,
        });
    }

    /// All records, oldest first.
    pub fn records(&self) -> &[IterationRecord] {
        &self.records
    }

    /// The most recent record.
    pub fn last(&self) -> Option<&IterationRecord> {
        self.records.last()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InversionStatus {
    /// All outer iterations were accepted.
    Completed,
    /// The misfit reached zero.
    Converged,
    /// No trial of this iteration reduced the misfit.
    LineSearchExhausted {
        /// The failed outer iteration (1-based).
        iteration: usize,
        /// Planned number of outer iterations.
        niter: usize,
        /// Trials evaluated.
        trials: usize,
    },
}

/// Summary of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct InversionReport {
    /// How the run ended.
    pub status: InversionStatus,
    /// Accepted iterations, starting with iteration 0.
    pub log: IterationLog,
    /// Misfit norm of the starting model.
    pub initial_norm: f64,
    /// Misfit norm of the final model.
    pub final_norm: f64,
    /// Final misfit relative to the starting misfit (0 if it started at 0).
    pub rate: f64,
}

/// Receives the per-iteration update in output units, before the line search.
pub trait GradientSink {
    /// Record the frame of outer iteration `iteration` (0-based).
    ///
    /// # Errors
    /// Returns an error if the frame cannot be stored.
    fn emit(&mut self, iteration: usize, frame: &[f64]) -> Result<()>;
}

/// State of one inversion run.
pub struct Inversion {
    config: InversionConfig,
    grid: Grid,
    record: ReceiverRecord,
    data_mask: Option<Mask>,
    eikonal: DsrEikonal,
    tomo: DsrTomo,
    line_search: LineSearch,
    w: Vec<f64>,
    trial: Vec<f64>,
    field: TraveltimeField,
    order: UpwindOrder,
    dt: Vec<f64>,
    dw: Vec<f64>,
    // Line-search trials are evaluated here and swapped in on acceptance.
    trial_field: TraveltimeField,
    trial_order: UpwindOrder,
    trial_dt: Vec<f64>,
}

impl Inversion {
    /// Set up a run from the starting model (in input units), the observed
    /// record and optional masks.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid, a buffer does not
    /// match the grid, or the model is not positive and finite.
    pub fn new(
        config: InversionConfig,
        grid: Grid,
        model: Vec<f64>,
        record: ReceiverRecord,
        data_mask: Option<Mask>,
        model_mask: Option<Mask>,
    ) -> Result<Self> {
        config.validate()?;
        if model.len() != grid.num_cells() {
            return Err(TomoError::ShapeMismatch {
                expected: vec![grid.nz(), grid.nx()],
                got: vec![model.len()],
            });
        }
        if record.len() != grid.record_len() {
            return Err(TomoError::ShapeMismatch {
                expected: vec![grid.nx(), grid.nx()],
                got: vec![record.len()],
            });
        }

        let w = if config.velocity {
            velocity_to_slowness_squared(&model)?
        } else {
            validate_slowness_squared(&model)?;
            model
        };

        let eikonal = DsrEikonal::new(&grid, config.eikonal_options(), data_mask.as_ref())?;
        let tomo = DsrTomo::new(&grid, data_mask.clone(), model_mask)?;
        let field = eikonal.field();
        let order = eikonal.order();
        let nw = grid.num_cells();
        let nt = grid.record_len();

        Ok(Inversion {
            config,
            grid,
            record,
            data_mask,
            eikonal,
            tomo,
            line_search: LineSearch::default(),
            trial: vec![0.0; nw],
            dw: vec![0.0; nw],
            dt: vec![0.0; nt],
            trial_field: field.clone(),
            trial_order: order.clone(),
            trial_dt: vec![0.0; nt],
            w,
            field,
            order,
        })
    }

    /// Build the regularization strategy selected by the configuration.
    pub fn regularization(&self) -> Regularization {
        let c = &self.config;
        let reg = if c.shape {
            Regularization::shaping(&self.grid, c.rect, c.eps, c.cgiter)
        } else {
            Regularization::gradient_penalty(&self.grid, c.eps, c.cgiter)
        };
        reg.with_verbose(c.verb)
    }

    /// The run configuration.
    pub fn config(&self) -> &InversionConfig {
        &self.config
    }

    /// The model grid.
    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// Current slowness-squared model.
    pub fn slowness_squared(&self) -> &[f64] {
        &self.w
    }

    /// Current model in input units.
    ///
    /// # Errors
    /// Returns an error if the model cannot be converted back to velocity.
    pub fn model(&self) -> Result<Vec<f64>> {
        if self.config.velocity {
            slowness_squared_to_velocity(&self.w)
        } else {
            Ok(self.w.clone())
        }
    }

    /// Residual of the current model (observed minus predicted, masked).
    pub fn residual(&self) -> &[f64] {
        &self.dt
    }

    /// Run the outer loop.
    ///
    /// `solver` produces the update of each iteration; `grad` optionally
    /// receives each update in output units before its line search.
    /// [`UpdateSolver::finish`] is called when the loop ends.
    ///
    /// # Errors
    /// Returns an error if a forward solve, a linear solve, a gradient write
    /// or a trial model fails. Line-search exhaustion is not an error.
    pub fn run<S: UpdateSolver + ?Sized>(
        &mut self,
        solver: &mut S,
        grad: Option<&mut dyn GradientSink>,
    ) -> Result<InversionReport> {
        let result = self.iterate(solver, grad);
        solver.finish();
        result
    }

    fn iterate<S: UpdateSolver + ?Sized>(
        &mut self,
        solver: &mut S,
        mut grad: Option<&mut dyn GradientSink>,
    ) -> Result<InversionReport> {
        let niter = self.config.niter;
        let mut log = IterationLog::default();

        let rhsnorm0 = evaluate(
            &self.eikonal,
            &mut self.field,
            &mut self.order,
            &self.record,
            self.data_mask.as_ref(),
            &self.w,
            &mut self.dt,
        )?;
        let mut rhsnorm1 = rhsnorm0;
        log.push(0, 1.0, 0);
        info!("L2 misfit after iteration 0 of {}: {}", niter, 1.0);

        if rhsnorm0 == 0.0 {
            info!("starting model fits the data exactly");
            return Ok(InversionReport {
                status: InversionStatus::Converged,
                log,
                initial_norm: 0.0,
                final_norm: 0.0,
                rate: 0.0,
            });
        }

        let mut dv = if self.config.velocity && grad.is_some() {
            vec![0.0; self.w.len()]
        } else {
            Vec::new()
        };
        let mut status = InversionStatus::Completed;

        for iter in 0..niter {
            self.dw.fill(0.0);
            self.tomo.set(&self.field, &self.w, &self.order)?;
            solver.solve(&self.tomo, &self.dt, &mut self.dw)?;

            if let Some(sink) = grad.as_deref_mut() {
                if self.config.velocity {
                    velocity_gradient(&self.w, &self.dw, &mut dv)?;
                    sink.emit(iter, &dv)?;
                } else {
                    sink.emit(iter, &self.dw)?;
                }
            }

            let eikonal = &self.eikonal;
            let field = &mut self.trial_field;
            let order = &mut self.trial_order;
            let record = &self.record;
            let data_mask = self.data_mask.as_ref();
            let dt = &mut self.trial_dt;
            let outcome = self.line_search.search(
                &self.w,
                &self.dw,
                &mut self.trial,
                rhsnorm1,
                |trial| evaluate(eikonal, field, order, record, data_mask, trial, dt),
            )?;

            match outcome {
                LineSearchOutcome::Accepted { norm, step, trials } => {
                    self.w.copy_from_slice(&self.trial);
                    std::mem::swap(&mut self.field, &mut self.trial_field);
                    std::mem::swap(&mut self.order, &mut self.trial_order);
                    std::mem::swap(&mut self.dt, &mut self.trial_dt);
                    rhsnorm1 = norm;
                    let rate = rhsnorm1 / rhsnorm0;
                    log.push(iter + 1, rate, trials);
                    debug!("accepted step {} after {} trials", step, trials);
                    info!(
                        "L2 misfit after iteration {} of {}: {} (line-search {})",
                        iter + 1,
                        niter,
                        rate,
                        trials
                    );
                    if rhsnorm1 == 0.0 {
                        status = InversionStatus::Converged;
                        break;
                    }
                }
                LineSearchOutcome::Exhausted { trials } => {
                    warn!("Line-search failure at iteration {} of {}.", iter + 1, niter);
                    status = InversionStatus::LineSearchExhausted {
                        iteration: iter + 1,
                        niter,
                        trials,
                    };
                    break;
                }
            }
        }

        Ok(InversionReport {
            status,
            log,
            initial_norm: rhsnorm0,
            final_norm: rhsnorm1,
            rate: rhsnorm1 / rhsnorm0,
        })
    }
}

/// Forward model, mirror and residual for slowness squared `w`; returns the
/// residual norm.
fn evaluate(
    eikonal: &DsrEikonal,
    field: &mut TraveltimeField,
    order: &mut UpwindOrder,
    record: &ReceiverRecord,
    data_mask: Option<&Mask>,
    w: &[f64],
    dt: &mut [f64],
) -> Result<f64> {
    eikonal.forward(w, field, order)?;
    residual(eikonal.grid(), record, field, data_mask, dt)?;
    Ok(norm(dt))
}
