// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::conversion::validate_slowness_squared;
use crate::core::{DsrGrid, Grid, Mask, Sampling};
use crate::error::{Result, TomoError};
use crate::update_kernels::{update_node, Local, Neighbors, RootSearch, Side, Stencil, Upwind};

/// Options fixed when the eikonal solver is created.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EikonalOptions {
    /// Root search controls for the coupled updates.
    pub search: RootSearch,
    /// Only use the deeper depth neighbour (ignore non-causal DSR branches).
    pub causal: bool,
    /// Restrict the computation to the offsets covered by the data mask.
    pub limit: bool,
}

impl Default for EikonalOptions {
    fn default() -> Self {
        EikonalOptions {
            search: RootSearch::default(),
            causal: true,
            limit: false,
        }
    }
}

/// Fast-marching state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Not reached yet.
    Far,
    /// Holds a tentative value in the heap.
    Trial,
    /// Final value.
    Accepted,
    /// Outside the receiver coverage; never computed.
    Excluded,
}

/// DSR traveltime over the extended (depth, source, receiver) grid, together
/// with the per-node state and upwind stencil of the last fast-marching pass.
#[derive(Debug, Clone)]
pub struct TraveltimeField {
    t: Vec<f64>,
    stencil: Vec<Stencil>,
    state: Vec<NodeState>,
}

impl TraveltimeField {
    /// Allocate a field for the extended grid.
    pub fn new(grid: &DsrGrid) -> Self {
        let n = grid.num_nodes();
        TraveltimeField {
            t: vec![f64::INFINITY; n],
            stencil: vec![Stencil::default(); n],
            state: vec![NodeState::Far; n],
        }
    }

    /// Traveltimes in extended-grid order.
    pub fn times(&self) -> &[f64] {
        &self.t
    }

    /// Upwind stencil of each node (empty for the diagonal and unreached nodes).
    pub fn stencils(&self) -> &[Stencil] {
        &self.stencil
    }

    /// Fast-marching state of each node.
    pub fn states(&self) -> &[NodeState] {
        &self.state
    }

    fn reset(&mut self) {
        self.t.fill(f64::INFINITY);
        self.stencil.fill(Stencil::default());
        self.state.fill(NodeState::Far);
    }

    #[inline]
    fn accepted(&self, node: usize) -> Option<f64> {
        (self.state[node] == NodeState::Accepted).then(|| self.t[node])
    }
}

/// Upwind traversal order: the sequence in which fast marching accepted
/// nodes. Allocated once per run and refilled by every forward solve.
#[derive(Debug, Clone, Default)]
pub struct UpwindOrder {
    nodes: Vec<usize>,
}

impl UpwindOrder {
    /// Allocate an empty order able to hold every node of the grid.
    pub fn new(grid: &DsrGrid) -> Self {
        UpwindOrder {
            nodes: Vec::with_capacity(grid.num_nodes()),
        }
    }

    /// Accepted nodes, earliest first.
    pub fn as_slice(&self) -> &[usize] {
        &self.nodes
    }

    /// Number of accepted nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the order is empty (no solve has run yet).
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Trial {
    t: f64,
    node: usize,
}

impl Eq for Trial {}

impl Ord for Trial {
    // Reversed so that `BinaryHeap` pops the earliest time first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .t
            .total_cmp(&self.t)
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for Trial {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Fast-marching solver for the DSR eikonal equation.
///
/// The traveltime `T(z, s, r)` vanishes on the zero-offset diagonal `s == r`
/// at every depth. Fast marching fills the half domain `r >= s` in order of
/// increasing traveltime; [`DsrEikonal::mirror`] completes the other half by
/// source/receiver reciprocity.
pub struct DsrEikonal {
    grid: DsrGrid,
    options: EikonalOptions,
    max_offset: Option<usize>,
}

impl DsrEikonal {
    /// Create a solver for the model grid.
    ///
    /// When `options.limit` is set and a data mask is given, nodes whose
    /// offset exceeds the largest active offset in the mask are excluded.
    ///
    /// # Errors
    /// Returns an error if the root-search controls are invalid or the data
    /// mask does not match the receiver record.
    pub fn new(grid: &Grid, options: EikonalOptions, data_mask: Option<&Mask>) -> Result<Self> {
        let search = &options.search;
        if !search.tol.is_finite() || search.tol <= 0.0 {
            return Err(TomoError::InvalidParameter {
                name: "tol",
                reason: format!("{} (must be positive and finite)", search.tol),
            });
        }
        if search.nloop == 0 {
            return Err(TomoError::InvalidParameter {
                name: "nloop",
                reason: "must be at least 1".to_string(),
            });
        }
        if !search.thres.is_finite() || search.thres < 0.0 {
            return Err(TomoError::InvalidParameter {
                name: "thres",
                reason: format!("{} (must be non-negative and finite)", search.thres),
            });
        }

        let ext = grid.extended();
        if let Some(mask) = data_mask {
            mask.check_len(&[ext.nx(), ext.nx()])?;
        }

        let max_offset = match (options.limit, data_mask) {
            (true, Some(mask)) => {
                let nx = ext.nx();
                let covered = (0..ext.record_len())
                    .filter(|&ir| mask.is_active(ir))
                    .map(|ir| (ir % nx).abs_diff(ir / nx))
                    .max()
                    .unwrap_or(0);
                Some(covered)
            }
            _ => None,
        };

        Ok(DsrEikonal {
            grid: ext,
            options,
            max_offset,
        })
    }

    /// The extended grid the solver works on.
    pub fn grid(&self) -> &DsrGrid {
        &self.grid
    }

    /// Largest offset computed when receiver coverage limiting is active.
    pub fn max_offset(&self) -> Option<usize> {
        self.max_offset
    }

    /// Allocate a traveltime field for this solver.
    pub fn field(&self) -> TraveltimeField {
        TraveltimeField::new(&self.grid)
    }

    /// Allocate the upwind order buffer for this solver.
    pub fn order(&self) -> UpwindOrder {
        UpwindOrder::new(&self.grid)
    }

    /// Run fast marching for slowness squared `w` on the half domain `r >= s`.
    ///
    /// `field` and `order` are fully overwritten.
    ///
    /// # Errors
    /// Returns an error if `w` has the wrong length or contains a value that
    /// is not positive and finite.
    pub fn fastmarch(
        &self,
        w: &[f64],
        field: &mut TraveltimeField,
        order: &mut UpwindOrder,
    ) -> Result<()> {
        let (nz, nx) = (self.grid.nz(), self.grid.nx());
        if w.len() != nz * nx {
            return Err(TomoError::ShapeMismatch {
                expected: vec![nz, nx],
                got: vec![w.len()],
            });
        }
        validate_slowness_squared(w)?;

        field.reset();
        order.nodes.clear();

        for r in 0..nx {
            for s in 0..=r {
                let excluded = self.max_offset.is_some_and(|h| r - s > h);
                for z in 0..nz {
                    let node = self.grid.node(z, s, r);
                    if s == r {
                        field.t[node] = 0.0;
                        field.state[node] = NodeState::Accepted;
                        order.nodes.push(node);
                    } else if excluded {
                        field.state[node] = NodeState::Excluded;
                    }
                }
            }
        }

        let mut heap = BinaryHeap::new();
        for s in 0..nx {
            for z in 0..nz {
                self.relax_neighbors([z, s, s], w, field, &mut heap);
            }
        }

        while let Some(Trial { t, node }) = heap.pop() {
            if field.state[node] == NodeState::Accepted || t > field.t[node] {
                continue;
            }
            field.state[node] = NodeState::Accepted;
            order.nodes.push(node);
            self.relax_neighbors(self.grid.flat_to_nd(node), w, field, &mut heap);
        }

        Ok(())
    }

    /// Copy the computed half `T(z, s, r), r >= s` onto `T(z, r, s)`.
    pub fn mirror(&self, field: &mut TraveltimeField) {
        let (nz, nx) = (self.grid.nz(), self.grid.nx());
        for r in 0..nx {
            for s in r + 1..nx {
                for z in 0..nz {
                    field.t[self.grid.node(z, s, r)] = field.t[self.grid.node(z, r, s)];
                }
            }
        }
    }

    /// Fast marching followed by the mirror step.
    pub fn forward(
        &self,
        w: &[f64],
        field: &mut TraveltimeField,
        order: &mut UpwindOrder,
    ) -> Result<()> {
        self.fastmarch(w, field, order)?;
        self.mirror(field);
        Ok(())
    }

    fn relax_neighbors(
        &self,
        [z, s, r]: [usize; 3],
        w: &[f64],
        field: &mut TraveltimeField,
        heap: &mut BinaryHeap<Trial>,
    ) {
        let nz = self.grid.nz();
        let nx = self.grid.nx();

        let mut candidates: [Option<[usize; 3]>; 6] = [None; 6];
        if z > 0 {
            candidates[0] = Some([z - 1, s, r]);
        }
        if z + 1 < nz {
            candidates[1] = Some([z + 1, s, r]);
        }
        if s > 0 {
            candidates[2] = Some([z, s - 1, r]);
        }
        if s < r {
            candidates[3] = Some([z, s + 1, r]);
        }
        if r > s {
            candidates[4] = Some([z, s, r - 1]);
        }
        if r + 1 < nx {
            candidates[5] = Some([z, s, r + 1]);
        }

        for idx in candidates.into_iter().flatten() {
            let node = self.grid.nd_to_flat(idx);
            if !matches!(field.state[node], NodeState::Far | NodeState::Trial) {
                continue;
            }
            if let Some((t, stencil)) = self.update(idx, w, field) {
                if t < field.t[node] {
                    field.t[node] = t;
                    field.stencil[node] = stencil;
                    field.state[node] = NodeState::Trial;
                    heap.push(Trial { t, node });
                }
            }
        }
    }

    fn update(
        &self,
        [z, s, r]: [usize; 3],
        w: &[f64],
        field: &TraveltimeField,
    ) -> Option<(f64, Stencil)> {
        let g = &self.grid;
        let nz = g.nz();
        let nx = g.nx();

        let pick = |minus: Option<usize>, plus: Option<usize>| -> Option<Upwind> {
            let lo = minus.and_then(|n| field.accepted(n)).map(|t| Upwind {
                t,
                side: Side::Minus,
            });
            let hi = plus.and_then(|n| field.accepted(n)).map(|t| Upwind {
                t,
                side: Side::Plus,
            });
            match (lo, hi) {
                (Some(a), Some(b)) => Some(if b.t < a.t { b } else { a }),
                (a, b) => a.or(b),
            }
        };

        let deeper = (z + 1 < nz).then(|| g.node(z + 1, s, r));
        let shallower = (z > 0 && !self.options.causal).then(|| g.node(z - 1, s, r));
        let nb = Neighbors {
            z: pick(shallower, deeper),
            s: pick(
                (s > 0).then(|| g.node(z, s - 1, r)),
                (s < r).then(|| g.node(z, s + 1, r)),
            ),
            r: pick(
                (r > s).then(|| g.node(z, s, r - 1)),
                (r + 1 < nx).then(|| g.node(z, s, r + 1)),
            ),
        };

        let local = Local {
            ws: w[z + nz * s],
            wr: w[z + nz * r],
            dz: g.dz(),
            dx: g.dx(),
        };
        update_node(&nb, &local, &self.options.search)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Axis;

    fn grid(nz: usize, nx: usize, dz: f64, dx: f64) -> Grid {
        Grid::new(vec![Axis::new(nz, dz, 0.0), Axis::new(nx, dx, 0.0)]).unwrap()
    }

    fn solve(
        grid: &Grid,
        w: &[f64],
        options: EikonalOptions,
        mask: Option<&Mask>,
    ) -> (DsrEikonal, TraveltimeField, UpwindOrder) {
        let eik = DsrEikonal::new(grid, options, mask).unwrap();
        let mut field = eik.field();
        let mut order = eik.order();
        eik.forward(w, &mut field, &mut order).unwrap();
        (eik, field, order)
    }

    #[test]
    fn homogeneous_traveltime_is_offset_times_slowness() {
        let g = grid(6, 7, 0.5, 0.25);
        let w = vec![0.25; g.num_cells()];
        let (eik, field, _) = solve(&g, &w, EikonalOptions::default(), None);
        let ext = eik.grid();
        for r in 0..7usize {
            for s in 0..7usize {
                for z in 0..6 {
                    let expected = s.abs_diff(r) as f64 * 0.25 * 0.5;
                    let t = field.times()[ext.node(z, s, r)];
                    assert!((t - expected).abs() < 1e-12, "z={} s={} r={} t={}", z, s, r, t);
                }
            }
        }
    }

    #[test]
    fn mirror_makes_field_reciprocal() {
        let g = grid(8, 6, 1.0, 1.0);
        let w: Vec<f64> = (0..g.num_cells())
            .map(|i| {
                let z = i % 8;
                let v = 1.0 + 0.3 * z as f64;
                1.0 / (v * v)
            })
            .collect();
        let (eik, field, _) = solve(&g, &w, EikonalOptions::default(), None);
        let ext = eik.grid();
        for r in 0..6 {
            for s in 0..6 {
                for z in 0..8 {
                    assert_eq!(
                        field.times()[ext.node(z, s, r)],
                        field.times()[ext.node(z, r, s)]
                    );
                }
            }
        }
    }

    #[test]
    fn order_is_causal() {
        let g = grid(8, 6, 1.0, 1.0);
        let w: Vec<f64> = (0..g.num_cells())
            .map(|i| 1.0 / (1.0 + 0.2 * (i % 8) as f64).powi(2))
            .collect();
        let (eik, field, order) = solve(&g, &w, EikonalOptions::default(), None);
        let half_nodes = 8 * 6 * 7 / 2;
        assert_eq!(order.len(), half_nodes);
        let times: Vec<f64> = order.as_slice().iter().map(|&n| field.times()[n]).collect();
        for pair in times.windows(2) {
            assert!(pair[0] <= pair[1], "order not monotone: {:?}", pair);
        }
        for &node in order.as_slice() {
            let [_, s, r] = eik.grid().flat_to_nd(node);
            assert!(r >= s);
            assert_eq!(field.states()[node], NodeState::Accepted);
        }
    }

    #[test]
    fn faster_layer_below_shortens_long_offsets() {
        let g = grid(10, 12, 1.0, 1.0);
        let homogeneous = vec![1.0; g.num_cells()];
        let graded: Vec<f64> = (0..g.num_cells())
            .map(|i| 1.0 / (1.0 + 0.5 * (i % 10) as f64).powi(2))
            .collect();
        let (eik, t_h, _) = solve(&g, &homogeneous, EikonalOptions::default(), None);
        let (_, t_g, _) = solve(&g, &graded, EikonalOptions::default(), None);
        let ext = eik.grid();
        let far = ext.node(0, 0, 11);
        assert!(t_g.times()[far] < t_h.times()[far]);
        assert!(t_g.times().iter().all(|t| t.is_finite() && *t >= 0.0));
    }

    #[test]
    fn non_causal_solve_stays_close_to_causal() {
        let g = grid(8, 8, 1.0, 1.0);
        let w: Vec<f64> = (0..g.num_cells())
            .map(|i| 1.0 / (1.0 + 0.4 * (i % 8) as f64).powi(2))
            .collect();
        let causal = EikonalOptions::default();
        let non_causal = EikonalOptions {
            causal: false,
            ..causal
        };
        let (_, t_c, _) = solve(&g, &w, causal, None);
        let (_, t_n, _) = solve(&g, &w, non_causal, None);
        for (a, b) in t_c.times().iter().zip(t_n.times()) {
            assert!(b.is_finite());
            assert!((a - b).abs() <= 0.05 * a + 1e-9, "causal {} non-causal {}", a, b);
        }
    }

    #[test]
    fn limit_excludes_uncovered_offsets() {
        let g = grid(4, 5, 1.0, 1.0);
        let w = vec![1.0; g.num_cells()];
        let ext = g.extended();
        let mut flags = vec![0; 25];
        for s in 0..5usize {
            for r in 0..5usize {
                if s.abs_diff(r) <= 2 {
                    flags[ext.receiver(s, r)] = 1;
                }
            }
        }
        let mask = Mask::from_flags(&flags);
        let options = EikonalOptions {
            limit: true,
            ..EikonalOptions::default()
        };
        let (eik, field, _) = solve(&g, &w, options, Some(&mask));
        assert_eq!(eik.max_offset(), Some(2));
        assert!((field.times()[ext.node(0, 0, 2)] - 2.0).abs() < 1e-12);
        assert!(field.times()[ext.node(0, 0, 3)].is_infinite());
        assert_eq!(field.states()[ext.node(1, 0, 4)], NodeState::Excluded);
    }

    #[test]
    fn invalid_slowness_is_rejected() {
        let g = grid(4, 4, 1.0, 1.0);
        let eik = DsrEikonal::new(&g, EikonalOptions::default(), None).unwrap();
        let mut field = eik.field();
        let mut order = eik.order();
        let mut w = vec![1.0; 16];
        w[5] = 0.0;
        let result = eik.fastmarch(&w, &mut field, &mut order);
        assert!(matches!(result, Err(TomoError::InvalidSlowness { index: 5, .. })));
    }

    #[test]
    fn invalid_root_search_rejected() {
        let g = grid(4, 4, 1.0, 1.0);
        let mut options = EikonalOptions::default();
        options.search.nloop = 0;
        assert!(matches!(
            DsrEikonal::new(&g, options, None),
            Err(TomoError::InvalidParameter { name: "nloop", .. })
        ));
    }
}
