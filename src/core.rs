// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use crate::error::{Result, TomoError};

/// Largest number of meaningful model axes the inversion accepts.
pub const MAX_MODEL_DIM: usize = 2;

/// Flat/N-dimensional index conversion for grids stored with the first
/// axis varying fastest.
pub trait Sampling<const N: usize> {
    /// Get the number of samples along each axis.
    fn shape(&self) -> [usize; N];

    /// Get the strides for index computation (`strides[0] == 1`).
    fn strides(&self) -> [usize; N];

    /// Get the total number of samples.
    fn num_nodes(&self) -> usize {
        self.shape().iter().product()
    }

    /// Convert a flat index to an N-dimensional index.
    fn flat_to_nd(&self, flat: usize) -> [usize; N] {
        let strides = self.strides();
        let mut idx = [0usize; N];
        let mut remainder = flat;
        for d in (0..N).rev() {
            idx[d] = remainder / strides[d];
            remainder %= strides[d];
        }
        idx
    }

    /// Convert an N-dimensional index to a flat index.
    fn nd_to_flat(&self, idx: [usize; N]) -> usize {
        let strides = self.strides();
        idx.iter().zip(strides.iter()).map(|(i, s)| i * s).sum()
    }
}

/// One regularly sampled axis: count, interval, origin and annotations.
#[derive(Debug, Clone, PartialEq)]
pub struct Axis {
    /// Number of samples.
    pub n: usize,
    /// Sampling interval.
    pub d: f64,
    /// Coordinate of the first sample.
    pub o: f64,
    /// Optional axis label.
    pub label: Option<String>,
    /// Optional axis unit.
    pub unit: Option<String>,
}

impl Axis {
    /// Create an unlabeled axis.
    pub fn new(n: usize, d: f64, o: f64) -> Self {
        Axis {
            n,
            d,
            o,
            label: None,
            unit: None,
        }
    }
}

/// The 2-D model grid: axis 0 is depth, axis 1 is the lateral position of
/// sources and receivers. A 1-D model carries a unit lateral axis.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    axes: [Axis; 2],
    dims: usize,
}

impl Grid {
    /// Create a grid from the meaningful axes of an input file.
    ///
    /// # Errors
    /// Returns an error if there are no axes or more than [`MAX_MODEL_DIM`],
    /// if a count is zero, or if a spacing is not positive and finite.
    pub fn new(axes: Vec<Axis>) -> Result<Self> {
        let dims = axes.len();
        if dims == 0 {
            return Err(TomoError::InvalidGridShape { axis: 0, size: 0 });
        }
        if dims > MAX_MODEL_DIM {
            return Err(TomoError::UnsupportedDimension {
                dims,
                max: MAX_MODEL_DIM,
            });
        }
        for (axis, a) in axes.iter().enumerate() {
            if a.n == 0 {
                return Err(TomoError::InvalidGridShape { axis, size: a.n });
            }
            if !a.d.is_finite() || a.d <= 0.0 {
                return Err(TomoError::InvalidGridSpacing { axis, value: a.d });
            }
        }

        let mut iter = axes.into_iter();
        let first = iter.next().ok_or(TomoError::InvalidGridShape { axis: 0, size: 0 })?;
        let second = iter.next().unwrap_or_else(|| Axis::new(1, 1.0, 0.0));
        Ok(Grid {
            axes: [first, second],
            dims,
        })
    }

    /// Number of axes supplied by the input (1 or 2).
    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Both axes, including the padded lateral axis of a 1-D model.
    pub fn axes(&self) -> &[Axis; 2] {
        &self.axes
    }

    /// Axes as read from the input, without padding.
    pub fn input_axes(&self) -> &[Axis] {
        &self.axes[..self.dims]
    }

    /// Number of depth samples.
    pub fn nz(&self) -> usize {
        self.axes[0].n
    }

    /// Number of lateral samples (source and receiver positions).
    pub fn nx(&self) -> usize {
        self.axes[1].n
    }

    /// Depth sampling interval.
    pub fn dz(&self) -> f64 {
        self.axes[0].d
    }

    /// Lateral sampling interval.
    pub fn dx(&self) -> f64 {
        self.axes[1].d
    }

    /// Number of model cells.
    pub fn num_cells(&self) -> usize {
        self.nz() * self.nx()
    }

    /// Number of receiver record samples (`nx * nx`).
    pub fn record_len(&self) -> usize {
        self.nx() * self.nx()
    }

    /// Flat model index of depth sample `z` at lateral position `x`.
    #[inline]
    pub fn cell(&self, z: usize, x: usize) -> usize {
        z + self.nz() * x
    }

    /// The extended (depth, source, receiver) grid of the DSR traveltime.
    pub fn extended(&self) -> DsrGrid {
        DsrGrid::new(self.nz(), self.nx(), self.dz(), self.dx())
    }
}

impl Sampling<2> for Grid {
    fn shape(&self) -> [usize; 2] {
        [self.nz(), self.nx()]
    }

    fn strides(&self) -> [usize; 2] {
        [1, self.nz()]
    }
}

/// The extended DSR grid: depth, source position, receiver position.
/// The receiver axis duplicates the lateral model axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DsrGrid {
    shape: [usize; 3],
    strides: [usize; 3],
    dz: f64,
    dx: f64,
}

impl DsrGrid {
    /// Create the extended grid for a model of `nz` by `nx` cells.
    pub fn new(nz: usize, nx: usize, dz: f64, dx: f64) -> Self {
        DsrGrid {
            shape: [nz, nx, nx],
            strides: [1, nz, nz * nx],
            dz,
            dx,
        }
    }

    /// Number of depth samples.
    pub fn nz(&self) -> usize {
        self.shape[0]
    }

    /// Number of lateral samples.
    pub fn nx(&self) -> usize {
        self.shape[1]
    }

    /// Depth sampling interval.
    pub fn dz(&self) -> f64 {
        self.dz
    }

    /// Lateral sampling interval (shared by the source and receiver axes).
    pub fn dx(&self) -> f64 {
        self.dx
    }

    /// Flat index of the node at depth `z`, source `s`, receiver `r`.
    #[inline]
    pub fn node(&self, z: usize, s: usize, r: usize) -> usize {
        z + self.strides[1] * s + self.strides[2] * r
    }

    /// Receiver record index of the source/receiver pair.
    #[inline]
    pub fn receiver(&self, s: usize, r: usize) -> usize {
        s + self.nx() * r
    }

    /// Surface node holding the predicted time of record sample `ir`.
    #[inline]
    pub fn surface_node(&self, ir: usize) -> usize {
        ir * self.nz()
    }

    /// Number of source/receiver pairs.
    pub fn record_len(&self) -> usize {
        self.nx() * self.nx()
    }
}

impl Sampling<3> for DsrGrid {
    fn shape(&self) -> [usize; 3] {
        self.shape
    }

    fn strides(&self) -> [usize; 3] {
        self.strides
    }
}

/// Observed first-arrival times, one per source/receiver pair.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceiverRecord {
    times: Vec<f64>,
}

impl ReceiverRecord {
    /// Wrap observed times for the given grid.
    ///
    /// # Errors
    /// Returns an error if the length is not `nx * nx`.
    pub fn new(grid: &Grid, times: Vec<f64>) -> Result<Self> {
        if times.len() != grid.record_len() {
            return Err(TomoError::ShapeMismatch {
                expected: vec![grid.nx(), grid.nx()],
                got: vec![times.len()],
            });
        }
        Ok(ReceiverRecord { times })
    }

    /// Observed times in record order.
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    /// Number of record samples.
    pub fn len(&self) -> usize {
        self.times.len()
    }

    /// Whether the record is empty.
    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }
}

/// Boolean activity mask over receivers or model cells.
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    active: Vec<bool>,
}

impl Mask {
    /// Build a mask from integer flags; only entries equal to 1 are active.
    pub fn from_flags(flags: &[i32]) -> Self {
        Mask {
            active: flags.iter().map(|&f| f == 1).collect(),
        }
    }

    /// A mask with every entry active.
    pub fn all(len: usize) -> Self {
        Mask {
            active: vec![true; len],
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// Whether the mask has no entries.
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Whether entry `i` is active.
    #[inline]
    pub fn is_active(&self, i: usize) -> bool {
        self.active[i]
    }

    pub(crate) fn check_len(&self, expected: &[usize]) -> Result<()> {
        let len: usize = expected.iter().product();
        if self.active.len() != len {
            return Err(TomoError::ShapeMismatch {
                expected: expected.to_vec(),
                got: vec![self.active.len()],
            });
        }
        Ok(())
    }
}

/// Whether entry `i` is active under an optional mask (absent = all active).
#[inline]
pub fn is_active(mask: Option<&Mask>, i: usize) -> bool {
    mask.map_or(true, |m| m.is_active(i))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_2d(nz: usize, nx: usize) -> Grid {
        Grid::new(vec![Axis::new(nz, 0.5, 0.0), Axis::new(nx, 0.25, 1.0)]).unwrap()
    }

    #[test]
    fn flat_nd_roundtrip_model() {
        let grid = grid_2d(12, 8);
        for flat in 0..96 {
            let nd = grid.flat_to_nd(flat);
            assert_eq!(grid.nd_to_flat(nd), flat, "flat={} nd={:?}", flat, nd);
            assert_eq!(grid.cell(nd[0], nd[1]), flat);
        }
    }

    #[test]
    fn flat_nd_roundtrip_extended() {
        let ext = grid_2d(4, 5).extended();
        assert_eq!(ext.num_nodes(), 4 * 5 * 5);
        for flat in 0..ext.num_nodes() {
            let [z, s, r] = ext.flat_to_nd(flat);
            assert_eq!(ext.node(z, s, r), flat);
        }
    }

    #[test]
    fn surface_node_matches_record_layout() {
        let ext = grid_2d(6, 3).extended();
        for r in 0..3 {
            for s in 0..3 {
                let ir = ext.receiver(s, r);
                assert_eq!(ext.surface_node(ir), ext.node(0, s, r));
            }
        }
    }

    #[test]
    fn one_dimensional_model_is_padded() {
        let grid = Grid::new(vec![Axis::new(5, 1.0, 0.0)]).unwrap();
        assert_eq!(grid.dims(), 1);
        assert_eq!(grid.nx(), 1);
        assert_eq!(grid.num_cells(), 5);
        assert_eq!(grid.record_len(), 1);
        assert_eq!(grid.input_axes().len(), 1);
    }

    #[test]
    fn three_axes_rejected() {
        let axes = vec![
            Axis::new(4, 1.0, 0.0),
            Axis::new(4, 1.0, 0.0),
            Axis::new(4, 1.0, 0.0),
        ];
        assert!(matches!(
            Grid::new(axes),
            Err(TomoError::UnsupportedDimension { dims: 3, max: 2 })
        ));
    }

    #[test]
    fn invalid_grid_shape() {
        let result = Grid::new(vec![Axis::new(0, 1.0, 0.0)]);
        assert!(matches!(
            result,
            Err(TomoError::InvalidGridShape { axis: 0, size: 0 })
        ));
    }

    #[test]
    fn invalid_grid_spacing() {
        let result = Grid::new(vec![Axis::new(4, 1.0, 0.0), Axis::new(4, 0.0, 0.0)]);
        assert!(matches!(
            result,
            Err(TomoError::InvalidGridSpacing { axis: 1, .. })
        ));
    }

    #[test]
    fn record_shape_mismatch() {
        let grid = grid_2d(4, 3);
        let result = ReceiverRecord::new(&grid, vec![0.0; 8]);
        assert!(matches!(result, Err(TomoError::ShapeMismatch { .. })));
        assert_eq!(ReceiverRecord::new(&grid, vec![0.0; 9]).unwrap().len(), 9);
    }

    #[test]
    fn mask_flags_only_one_is_active() {
        let mask = Mask::from_flags(&[1, 0, 2, -1, 1]);
        assert!(mask.is_active(0));
        assert!(!mask.is_active(1));
        assert!(!mask.is_active(2));
        assert!(!mask.is_active(3));
        assert!(mask.is_active(4));
        assert!(is_active(None, 3));
        assert!(!is_active(Some(&mask), 1));
    }
}
