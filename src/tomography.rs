// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

//! Linearized DSR tomography: the Fréchet derivative of surface traveltimes
//! with respect to slowness squared.
//!
//! Each accepted node satisfies a local discrete equation in its upwind
//! neighbours. Differentiating it gives
//! `dT = sum_j a_j dT_j + b_s dw(z, s) + b_r dw(z, r)`, which is swept in
//! upwind order (forward) or reverse upwind order (adjoint).

use crate::core::{is_active, DsrGrid, Grid, Mask, Sampling};
use crate::error::{Result, TomoError};
use crate::fastmarch::{TraveltimeField, UpwindOrder};
use crate::operators::LinearOperator;
use crate::update_kernels::{Side, Stencil};

/// Vertical slowness below this value is clamped in the coefficients.
const MIN_BRANCH_SLOWNESS: f64 = 1e-12;

/// Linearized equation of one node.
#[derive(Debug, Clone, Copy)]
struct Row {
    node: usize,
    upwind: [Option<(usize, f64)>; 3],
    source: (usize, f64),
    receiver: (usize, f64),
}

/// The tomography operator `J`: model is slowness squared (`nz * nx`),
/// data is the surface record (`nx * nx`).
#[derive(Debug, Clone)]
pub struct DsrTomo {
    grid: DsrGrid,
    data_mask: Option<Mask>,
    model_mask: Option<Mask>,
    rows: Vec<Row>,
}

impl DsrTomo {
    /// Create the operator for a model grid with optional masks.
    ///
    /// # Errors
    /// Returns [`TomoError::ShapeMismatch`] if a mask does not match the
    /// record (data mask) or the model (model mask).
    pub fn new(grid: &Grid, data_mask: Option<Mask>, model_mask: Option<Mask>) -> Result<Self> {
        let ext = grid.extended();
        if let Some(mask) = &data_mask {
            mask.check_len(&[ext.nx(), ext.nx()])?;
        }
        if let Some(mask) = &model_mask {
            mask.check_len(&[ext.nz(), ext.nx()])?;
        }
        Ok(DsrTomo {
            grid: ext,
            data_mask,
            model_mask,
            rows: Vec::new(),
        })
    }

    /// The extended grid.
    pub fn grid(&self) -> &DsrGrid {
        &self.grid
    }

    /// Number of linearized node equations from the last [`DsrTomo::set`].
    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    /// Linearize around the traveltime `field` of slowness squared `w`.
    ///
    /// `order` must be the upwind order of the fast-marching pass that
    /// produced `field`.
    ///
    /// # Errors
    /// Returns an error if `w` or `field` do not match the grid.
    pub fn set(&mut self, field: &TraveltimeField, w: &[f64], order: &UpwindOrder) -> Result<()> {
        let g = self.grid;
        let (nz, nx) = (g.nz(), g.nx());
        if w.len() != nz * nx {
            return Err(TomoError::ShapeMismatch {
                expected: vec![nz, nx],
                got: vec![w.len()],
            });
        }
        if field.times().len() != g.num_nodes() {
            return Err(TomoError::ShapeMismatch {
                expected: g.shape().to_vec(),
                got: vec![field.times().len()],
            });
        }

        let t = field.times();
        let stencils = field.stencils();
        self.rows.clear();
        self.rows.reserve(order.len());

        for &node in order.as_slice() {
            let st = stencils[node];
            if st.is_empty() {
                continue;
            }
            self.rows.push(linearize(&g, node, st, t, w));
        }
        Ok(())
    }
}

fn neighbour(g: &DsrGrid, [z, s, r]: [usize; 3], axis: usize, side: Side) -> Option<usize> {
    let mut idx = [z, s, r];
    match side {
        Side::None => return None,
        Side::Minus => idx[axis] -= 1,
        Side::Plus => idx[axis] += 1,
    }
    Some(g.nd_to_flat(idx))
}

fn linearize(g: &DsrGrid, node: usize, st: Stencil, t: &[f64], w: &[f64]) -> Row {
    let nd = g.flat_to_nd(node);
    let [z, s, r] = nd;
    let (dz, dx) = (g.dz(), g.dx());
    let cs = z + g.nz() * s;
    let cr = z + g.nz() * r;
    let (ws, wr) = (w[cs], w[cr]);
    let tn = t[node];

    let nz_node = neighbour(g, nd, 0, st.z);
    let ns_node = neighbour(g, nd, 1, st.s);
    let nr_node = neighbour(g, nd, 2, st.r);

    let Some(zn) = nz_node else {
        // One-sided horizontal update: T = T_i + dx sqrt(w_i).
        let mut upwind = [None; 3];
        let (mut bs, mut br) = (0.0, 0.0);
        if let Some(sn) = ns_node {
            upwind[1] = Some((sn, 1.0));
            bs = dx / (2.0 * ws.sqrt().max(MIN_BRANCH_SLOWNESS));
        } else if let Some(rn) = nr_node {
            upwind[2] = Some((rn, 1.0));
            br = dx / (2.0 * wr.sqrt().max(MIN_BRANCH_SLOWNESS));
        }
        return Row {
            node,
            upwind,
            source: (cs, bs),
            receiver: (cr, br),
        };
    };

    // Coupled or vertical update: (T - Tz)/dz = q_s + q_r.
    let branch = |wi: f64, ni: Option<usize>| -> (f64, f64) {
        match ni {
            Some(n) => {
                let p = ((tn - t[n]) / dx).max(0.0);
                let q = (wi - p * p).max(0.0).sqrt().max(MIN_BRANCH_SLOWNESS);
                (p, q)
            }
            None => (0.0, wi.sqrt().max(MIN_BRANCH_SLOWNESS)),
        }
    };
    let (ps, qs) = branch(ws, ns_node);
    let (pr, qr) = branch(wr, nr_node);

    let ks = ps / (dx * qs);
    let kr = pr / (dx * qr);
    let gt = 1.0 / dz + ks + kr;

    Row {
        node,
        upwind: [
            Some((zn, (1.0 / dz) / gt)),
            ns_node.map(|n| (n, ks / gt)),
            nr_node.map(|n| (n, kr / gt)),
        ],
        source: (cs, 0.5 / qs / gt),
        receiver: (cr, 0.5 / qr / gt),
    }
}

impl DsrTomo {
    #[inline]
    fn surface(&self, ir: usize) -> usize {
        let nx = self.grid.nx();
        let (s, r) = (ir % nx, ir / nx);
        self.grid.node(0, s.min(r), s.max(r))
    }
}

impl LinearOperator for DsrTomo {
    fn nx(&self) -> usize {
        self.grid.nz() * self.grid.nx()
    }

    fn ny(&self) -> usize {
        self.grid.record_len()
    }

    fn forward(&self, add: bool, x: &[f64], y: &mut [f64]) {
        debug_assert_eq!(x.len(), self.nx());
        debug_assert_eq!(y.len(), self.ny());
        let mp = self.model_mask.as_ref();
        let dw = |c: usize| if is_active(mp, c) { x[c] } else { 0.0 };

        let mut dt = vec![0.0; self.grid.num_nodes()];
        for row in &self.rows {
            let mut v = row.source.1 * dw(row.source.0) + row.receiver.1 * dw(row.receiver.0);
            for &(n, a) in row.upwind.iter().flatten() {
                v += a * dt[n];
            }
            dt[row.node] = v;
        }

        let dp = self.data_mask.as_ref();
        for (ir, out) in y.iter_mut().enumerate() {
            let v = if is_active(dp, ir) {
                dt[self.surface(ir)]
            } else {
                0.0
            };
            if add {
                *out += v;
            } else {
                *out = v;
            }
        }
    }

    fn adjoint(&self, add: bool, x: &mut [f64], y: &[f64]) {
        debug_assert_eq!(x.len(), self.nx());
        debug_assert_eq!(y.len(), self.ny());
        let dp = self.data_mask.as_ref();

        let mut adj = vec![0.0; self.grid.num_nodes()];
        for (ir, &v) in y.iter().enumerate() {
            if is_active(dp, ir) {
                adj[self.surface(ir)] += v;
            }
        }

        let mut dw = vec![0.0; x.len()];
        for row in self.rows.iter().rev() {
            let g = adj[row.node];
            if g == 0.0 {
                continue;
            }
            for &(n, a) in row.upwind.iter().flatten() {
                adj[n] += a * g;
            }
            dw[row.source.0] += row.source.1 * g;
            dw[row.receiver.0] += row.receiver.1 * g;
        }

        let mp = self.model_mask.as_ref();
        for (c, (out, v)) in x.iter_mut().zip(dw).enumerate() {
            let v = if is_active(mp, c) { v } else { 0.0 };
            if add {
                *out += v;
            } else {
                *out = v;
            }
        }
    }
}
