// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

//! Unit conversions between velocity and slowness squared.

use crate::error::{Result, TomoError};

/// Convert velocity to slowness squared (element-wise `1/v^2`).
pub fn velocity_to_slowness_squared(velocity: &[f64]) -> Result<Vec<f64>> {
    let mut w = Vec::with_capacity(velocity.len());
    for (index, &v) in velocity.iter().enumerate() {
        if !v.is_finite() || v <= 0.0 {
            return Err(TomoError::InvalidVelocity { index, value: v });
        }
        w.push(1.0 / v * 1.0 / v);
    }
    Ok(w)
}

/// Convert slowness squared to velocity (element-wise `1/sqrt(w)`).
pub fn slowness_squared_to_velocity(w: &[f64]) -> Result<Vec<f64>> {
    let mut v = Vec::with_capacity(w.len());
    for (index, &value) in w.iter().enumerate() {
        if !value.is_finite() || value <= 0.0 {
            return Err(TomoError::InvalidSlowness { index, value });
        }
        v.push(1.0 / value.sqrt());
    }
    Ok(v)
}

/// Check that every slowness-squared value is positive and finite.
pub fn validate_slowness_squared(w: &[f64]) -> Result<()> {
    match w.iter().position(|&v| !v.is_finite() || v <= 0.0) {
        Some(index) => Err(TomoError::InvalidSlowness {
            index,
            value: w[index],
        }),
        None => Ok(()),
    }
}

/// Map a slowness-squared update `dw` at model `w` into velocity space.
///
/// Differentiating `v = 1/sqrt(w)` over the step gives
/// `dv = -dw / (2 sqrt(w) (w + dw/2))`.
pub fn velocity_gradient(w: &[f64], dw: &[f64], dv: &mut [f64]) -> Result<()> {
    for (index, ((&wi, &dwi), out)) in w.iter().zip(dw).zip(dv.iter_mut()).enumerate() {
        let denom = 2.0 * wi.sqrt() * (wi + dwi / 2.0);
        let value = -dwi / denom;
        if !value.is_finite() {
            return Err(TomoError::NumericalDegenerate {
                context: "velocity-space gradient",
                index,
                value,
            });
        }
        *out = value;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn velocity_to_slowness_squared_valid() {
        let w = velocity_to_slowness_squared(&[1.0, 2.0, 4.0, 0.5]).unwrap();
        assert!((w[0] - 1.0).abs() < 1e-12);
        assert!((w[1] - 0.25).abs() < 1e-12);
        assert!((w[2] - 0.0625).abs() < 1e-12);
        assert!((w[3] - 4.0).abs() < 1e-12);
    }

    #[test]
    fn velocity_to_slowness_squared_invalid() {
        let result = velocity_to_slowness_squared(&[1.0, 0.0, 2.0]);
        assert!(matches!(
            result,
            Err(TomoError::InvalidVelocity { index: 1, .. })
        ));
        let result = velocity_to_slowness_squared(&[1.0, 2.0, f64::NAN]);
        assert!(matches!(
            result,
            Err(TomoError::InvalidVelocity { index: 2, .. })
        ));
    }

    #[test]
    fn round_trip_reproduces_velocity() {
        let v: Vec<f64> = (0..50).map(|i| 0.3 + 0.17 * i as f64).collect();
        let w = velocity_to_slowness_squared(&v).unwrap();
        let back = slowness_squared_to_velocity(&w).unwrap();
        for (a, b) in v.iter().zip(&back) {
            assert!((a - b).abs() <= 4.0 * f64::EPSILON * a, "{} vs {}", a, b);
        }
    }

    #[test]
    fn velocity_gradient_matches_finite_step() {
        let w = [0.25, 1.0];
        let dw = [1e-6, -2e-6];
        let mut dv = [0.0; 2];
        velocity_gradient(&w, &dw, &mut dv).unwrap();
        for i in 0..2 {
            let exact = 1.0 / (w[i] + dw[i]).sqrt() - 1.0 / w[i].sqrt();
            assert!((dv[i] - exact).abs() < 1e-9, "{} vs {}", dv[i], exact);
        }
    }

    #[test]
    fn velocity_gradient_degenerate_denominator() {
        let w = [1.0];
        let dw = [-2.0];
        let mut dv = [0.0];
        let result = velocity_gradient(&w, &dw, &mut dv);
        assert!(matches!(
            result,
            Err(TomoError::NumericalDegenerate { index: 0, .. })
        ));
    }

    #[test]
    fn validate_rejects_zero() {
        assert!(validate_slowness_squared(&[1.0, 0.5]).is_ok());
        assert!(matches!(
            validate_slowness_squared(&[1.0, 0.0]),
            Err(TomoError::InvalidSlowness { index: 1, .. })
        ));
    }
}
