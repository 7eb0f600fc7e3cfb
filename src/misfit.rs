// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use crate::core::{is_active, DsrGrid, Mask, ReceiverRecord};
use crate::error::{Result, TomoError};
use crate::fastmarch::TraveltimeField;

/// Observed minus predicted traveltime per receiver, written into `dt`.
///
/// The prediction for record sample `ir` is the surface value of the
/// corresponding column of the extended field. Masked receivers are zero.
///
/// # Errors
/// Returns [`TomoError::ShapeMismatch`] if `dt` or the record do not match
/// the grid.
pub fn residual(
    grid: &DsrGrid,
    observed: &ReceiverRecord,
    predicted: &TraveltimeField,
    data_mask: Option<&Mask>,
    dt: &mut [f64],
) -> Result<()> {
    let n = grid.record_len();
    if observed.len() != n || dt.len() != n {
        return Err(TomoError::ShapeMismatch {
            expected: vec![grid.nx(), grid.nx()],
            got: vec![observed.len(), dt.len()],
        });
    }

    let t = predicted.times();
    for (ir, (out, &obs)) in dt.iter_mut().zip(observed.times()).enumerate() {
        *out = if is_active(data_mask, ir) {
            obs - t[grid.surface_node(ir)]
        } else {
            0.0
        };
    }
    Ok(())
}

/// Euclidean norm.
pub fn norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}
