// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

//! Matrix-free linear operators on flat model and data vectors.
//!
//! Every operator maps a model vector of length [`LinearOperator::nx`] to a
//! data vector of length [`LinearOperator::ny`]. With `add == false` the
//! output is overwritten, otherwise the result is accumulated into it.

/// A linear operator together with its adjoint.
pub trait LinearOperator {
    /// Length of the model (input) vector.
    fn nx(&self) -> usize;

    /// Length of the data (output) vector.
    fn ny(&self) -> usize;

    /// Apply `y (+)= A x`.
    fn forward(&self, add: bool, x: &[f64], y: &mut [f64]);

    /// Apply `x (+)= A^T y`.
    fn adjoint(&self, add: bool, x: &mut [f64], y: &[f64]);
}

#[inline]
fn check_lengths(nx: usize, ny: usize, x: usize, y: usize) {
    debug_assert_eq!(x, nx, "model vector length");
    debug_assert_eq!(y, ny, "data vector length");
}

#[inline]
fn store(add: bool, out: &mut [f64], values: &[f64]) {
    if add {
        out.iter_mut().zip(values).for_each(|(o, v)| *o += v);
    } else {
        out.copy_from_slice(values);
    }
}

/// Separable triangle smoothing over a 2-D model grid.
///
/// Along each axis the filter of radius `rect` has weights
/// `(rect - |k|) / rect^2` for `|k| < rect`; samples outside the grid are zero.
/// The weights are symmetric so the operator is its own adjoint, and radius 1
/// reduces to the identity.
#[derive(Debug, Clone)]
pub struct TriangleSmoothing {
    shape: [usize; 2],
    weights: [Vec<f64>; 2],
}

impl TriangleSmoothing {
    /// Create the smoother for a grid of `shape` with per-axis radii `rect`.
    /// A radius of zero is treated as one.
    pub fn new(shape: [usize; 2], rect: [usize; 2]) -> Self {
        let weights = rect.map(|r| {
            let r = r.max(1);
            let norm = (r * r) as f64;
            (0..r).map(|k| (r - k) as f64 / norm).collect::<Vec<_>>()
        });
        TriangleSmoothing { shape, weights }
    }

    /// Whether every radius is 1.
    pub fn is_identity(&self) -> bool {
        self.weights.iter().all(|w| w.len() == 1)
    }

    fn smooth(&self, data: &mut [f64]) {
        let [n1, n2] = self.shape;
        let mut line = Vec::new();

        let w = &self.weights[0];
        if w.len() > 1 {
            for i2 in 0..n2 {
                let col = &mut data[i2 * n1..(i2 + 1) * n1];
                line.clear();
                line.extend_from_slice(col);
                convolve(&line, col, w);
            }
        }

        let w = &self.weights[1];
        if w.len() > 1 {
            let mut out = vec![0.0; n2];
            for i1 in 0..n1 {
                line.clear();
                line.extend((0..n2).map(|i2| data[i1 + i2 * n1]));
                convolve(&line, &mut out, w);
                for (i2, &v) in out.iter().enumerate() {
                    data[i1 + i2 * n1] = v;
                }
            }
        }
    }
}

/// Symmetric convolution of `input` with the half-filter `w` (`w[0]` is the
/// centre tap) into `out`, zero outside the input.
fn convolve(input: &[f64], out: &mut [f64], w: &[f64]) {
    let n = input.len();
    for i in 0..n {
        let mut acc = w[0] * input[i];
        for (k, &wk) in w.iter().enumerate().skip(1) {
            if i >= k {
                acc += wk * input[i - k];
            }
            if i + k < n {
                acc += wk * input[i + k];
            }
        }
        out[i] = acc;
    }
}

impl LinearOperator for TriangleSmoothing {
    fn nx(&self) -> usize {
        self.shape[0] * self.shape[1]
    }

    fn ny(&self) -> usize {
        self.nx()
    }

    fn forward(&self, add: bool, x: &[f64], y: &mut [f64]) {
        check_lengths(self.nx(), self.ny(), x.len(), y.len());
        let mut tmp = x.to_vec();
        self.smooth(&mut tmp);
        store(add, y, &tmp);
    }

    fn adjoint(&self, add: bool, x: &mut [f64], y: &[f64]) {
        check_lengths(self.nx(), self.ny(), x.len(), y.len());
        let mut tmp = y.to_vec();
        self.smooth(&mut tmp);
        store(add, x, &tmp);
    }
}

/// Applies an operator independently to consecutive blocks of the input.
#[derive(Debug, Clone)]
pub struct Repeat<Op> {
    op: Op,
    blocks: usize,
}

impl<Op: LinearOperator> Repeat<Op> {
    /// Repeat `op` over `blocks` consecutive blocks.
    pub fn new(op: Op, blocks: usize) -> Self {
        Repeat { op, blocks }
    }
}

impl<Op: LinearOperator> LinearOperator for Repeat<Op> {
    fn nx(&self) -> usize {
        self.op.nx() * self.blocks
    }

    fn ny(&self) -> usize {
        self.op.ny() * self.blocks
    }

    fn forward(&self, add: bool, x: &[f64], y: &mut [f64]) {
        check_lengths(self.nx(), self.ny(), x.len(), y.len());
        let (m, n) = (self.op.nx(), self.op.ny());
        for (xb, yb) in x.chunks_exact(m).zip(y.chunks_exact_mut(n)) {
            self.op.forward(add, xb, yb);
        }
    }

    fn adjoint(&self, add: bool, x: &mut [f64], y: &[f64]) {
        check_lengths(self.nx(), self.ny(), x.len(), y.len());
        let (m, n) = (self.op.nx(), self.op.ny());
        for (xb, yb) in x.chunks_exact_mut(m).zip(y.chunks_exact(n)) {
            self.op.adjoint(add, xb, yb);
        }
    }
}

/// Forward-difference gradient of a 2-D model.
///
/// Output sample `2j` holds the difference along the first axis at cell `j`
/// and `2j + 1` the difference along the second axis. The last sample on
/// each axis has a zero difference.
#[derive(Debug, Clone, Copy)]
pub struct Gradient2 {
    n1: usize,
    n2: usize,
}

impl Gradient2 {
    /// Gradient over a grid of `n1` by `n2` cells.
    pub fn new(n1: usize, n2: usize) -> Self {
        Gradient2 { n1, n2 }
    }
}

impl LinearOperator for Gradient2 {
    fn nx(&self) -> usize {
        self.n1 * self.n2
    }

    fn ny(&self) -> usize {
        2 * self.n1 * self.n2
    }

    fn forward(&self, add: bool, x: &[f64], y: &mut [f64]) {
        check_lengths(self.nx(), self.ny(), x.len(), y.len());
        if !add {
            y.fill(0.0);
        }
        let n1 = self.n1;
        for i2 in 0..self.n2 {
            for i1 in 0..n1 {
                let j = i1 + i2 * n1;
                if i1 + 1 < n1 {
                    y[2 * j] += x[j + 1] - x[j];
                }
                if i2 + 1 < self.n2 {
                    y[2 * j + 1] += x[j + n1] - x[j];
                }
            }
        }
    }

    fn adjoint(&self, add: bool, x: &mut [f64], y: &[f64]) {
        check_lengths(self.nx(), self.ny(), x.len(), y.len());
        if !add {
            x.fill(0.0);
        }
        let n1 = self.n1;
        for i2 in 0..self.n2 {
            for i1 in 0..n1 {
                let j = i1 + i2 * n1;
                if i1 + 1 < n1 {
                    x[j + 1] += y[2 * j];
                    x[j] -= y[2 * j];
                }
                if i2 + 1 < self.n2 {
                    x[j + n1] += y[2 * j + 1];
                    x[j] -= y[2 * j + 1];
                }
            }
        }
    }
}

/// Deterministic dot-product test: returns `(<A x, y>, <x, A^T y>)`.
#[cfg(test)]
pub(crate) fn dot_test<Op: LinearOperator + ?Sized>(op: &Op) -> (f64, f64) {
    let x: Vec<f64> = (0..op.nx()).map(|i| (0.37 * i as f64 + 0.1).sin()).collect();
    let y: Vec<f64> = (0..op.ny()).map(|i| (1.13 * i as f64 + 0.7).cos()).collect();
    let mut ax = vec![0.0; op.ny()];
    let mut aty = vec![0.0; op.nx()];
    op.forward(false, &x, &mut ax);
    op.adjoint(false, &mut aty, &y);
    let lhs = ax.iter().zip(&y).map(|(a, b)| a * b).sum();
    let rhs = x.iter().zip(&aty).map(|(a, b)| a * b).sum();
    (lhs, rhs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_adjoint<Op: LinearOperator>(op: &Op) {
        let (lhs, rhs) = dot_test(op);
        assert!(
            (lhs - rhs).abs() <= 1e-10 * (1.0 + lhs.abs()),
            "dot test failed: {} vs {}",
            lhs,
            rhs
        );
    }

    #[test]
    fn unit_radius_is_identity() {
        let op = TriangleSmoothing::new([4, 3], [1, 1]);
        assert!(op.is_identity());
        let x: Vec<f64> = (0..12).map(|i| i as f64).collect();
        let mut y = vec![0.0; 12];
        op.forward(false, &x, &mut y);
        assert_eq!(x, y);
    }

    #[test]
    fn triangle_weights_sum_to_one_in_interior() {
        let op = TriangleSmoothing::new([9, 1], [3, 1]);
        let mut x = vec![0.0; 9];
        x[4] = 1.0;
        let mut y = vec![0.0; 9];
        op.forward(false, &x, &mut y);
        let expected = [0.0, 0.0, 1.0 / 9.0, 2.0 / 9.0, 3.0 / 9.0, 2.0 / 9.0, 1.0 / 9.0, 0.0, 0.0];
        for (a, b) in y.iter().zip(&expected) {
            assert!((a - b).abs() < 1e-14);
        }
        assert!((y.iter().sum::<f64>() - 1.0).abs() < 1e-14);
    }

    #[test]
    fn triangle_smoothing_is_self_adjoint() {
        assert_adjoint(&TriangleSmoothing::new([7, 5], [3, 2]));
        assert_adjoint(&TriangleSmoothing::new([6, 6], [4, 4]));
    }

    #[test]
    fn add_accumulates() {
        let op = TriangleSmoothing::new([5, 2], [2, 1]);
        let x = vec![1.0; 10];
        let mut y = vec![1.0; 10];
        op.forward(true, &x, &mut y);
        let mut fresh = vec![0.0; 10];
        op.forward(false, &x, &mut fresh);
        for (a, b) in y.iter().zip(&fresh) {
            assert!((a - (b + 1.0)).abs() < 1e-14);
        }
    }

    #[test]
    fn repeat_applies_each_block() {
        let op = Repeat::new(TriangleSmoothing::new([5, 1], [2, 1]), 3);
        assert_eq!(op.nx(), 15);
        assert_adjoint(&op);

        let mut x = vec![0.0; 15];
        x[7] = 1.0;
        let mut y = vec![0.0; 15];
        op.forward(false, &x, &mut y);
        assert!(y[..5].iter().all(|&v| v == 0.0));
        assert!(y[10..].iter().all(|&v| v == 0.0));
        assert!((y[7] - 0.5).abs() < 1e-14);
    }

    #[test]
    fn gradient_of_ramp() {
        let (n1, n2) = (4, 3);
        let op = Gradient2::new(n1, n2);
        let x: Vec<f64> = (0..n1 * n2)
            .map(|j| 2.0 * (j % n1) as f64 + 5.0 * (j / n1) as f64)
            .collect();
        let mut y = vec![0.0; op.ny()];
        op.forward(false, &x, &mut y);
        for i2 in 0..n2 {
            for i1 in 0..n1 {
                let j = i1 + i2 * n1;
                let d1 = if i1 + 1 < n1 { 2.0 } else { 0.0 };
                let d2 = if i2 + 1 < n2 { 5.0 } else { 0.0 };
                assert_eq!(y[2 * j], d1);
                assert_eq!(y[2 * j + 1], d2);
            }
        }
    }

    #[test]
    fn gradient_adjoint() {
        assert_adjoint(&Gradient2::new(5, 4));
        assert_adjoint(&Gradient2::new(5, 1));
    }
}
