// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

//! Prestack first-arrival traveltime tomography with the double-square-root
//! (DSR) eikonal equation.
//!
//! The forward model solves the DSR equation by fast marching on the
//! extended (depth, source, receiver) grid. Each outer iteration linearizes
//! the surface traveltimes around the current slowness-squared model, solves
//! a regularized least-squares problem for the update (shaping or gradient
//! penalty), and backtracks along it until the data misfit decreases.

#![warn(missing_docs)]

/// Velocity and slowness-squared conversions.
pub mod conversion;
/// Grids, receiver records and masks.
pub mod core;
/// Error types for the library.
pub mod error;
/// Fast-marching solver for the DSR eikonal equation.
pub mod fastmarch;
/// The outer inversion loop.
pub mod inversion;
/// Header plus `.npy` grid files.
pub mod io;
/// Backtracking line search.
pub mod line_search;
/// Logging initialization.
pub mod logger;
/// Data residual and norm.
pub mod misfit;
/// Linear operators: smoothing, repetition, gradient.
pub mod operators;
/// Model-update strategies.
pub mod regularization;
/// Least-squares solvers.
pub mod solver;
/// Linearized DSR tomography operator.
pub mod tomography;
/// Local DSR update kernels used by fast marching.
pub mod update_kernels;

pub use crate::core::{Axis, DsrGrid, Grid, Mask, ReceiverRecord};
pub use crate::error::{Result, TomoError};
pub use crate::fastmarch::{DsrEikonal, EikonalOptions, TraveltimeField, UpwindOrder};
pub use crate::inversion::{
    GradientSink, Inversion, InversionConfig, InversionReport, InversionStatus, IterationLog,
};
pub use crate::operators::LinearOperator;
pub use crate::regularization::{Regularization, UpdateSolver};
pub use crate::tomography::DsrTomo;
