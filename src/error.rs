// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::fmt;

/// Errors that can occur during inversion setup, I/O, or execution.
#[derive(Debug)]
pub enum TomoError {
    /// A required sampling key (e.g. `d1`) is absent from an input header.
    MissingSampling {
        /// The header key that was looked up.
        key: String,
    },
    /// The model has more meaningful axes than the inversion supports.
    UnsupportedDimension {
        /// Number of axes found in the input.
        dims: usize,
        /// Largest supported number of axes.
        max: usize,
    },
    /// A required input (e.g. the receiver record) was not supplied.
    MissingInput(String),
    /// Axis sample count is invalid (zero).
    InvalidGridShape {
        /// The axis index.
        axis: usize,
        /// The size provided.
        size: usize,
    },
    /// Axis sampling interval is not positive and finite.
    InvalidGridSpacing {
        /// The axis index.
        axis: usize,
        /// The spacing provided.
        value: f64,
    },
    /// Velocity value is not positive and finite.
    InvalidVelocity {
        /// The flat index of the invalid value.
        index: usize,
        /// The invalid value.
        value: f64,
    },
    /// Slowness-squared value is not positive and finite.
    InvalidSlowness {
        /// The flat index of the invalid value.
        index: usize,
        /// The invalid value.
        value: f64,
    },
    /// A configuration parameter is out of range.
    InvalidParameter {
        /// Parameter name as exposed on the command line.
        name: &'static str,
        /// Explanation of why it's invalid.
        reason: String,
    },
    /// Array shape does not match expected shape.
    ShapeMismatch {
        /// The expected shape.
        expected: Vec<usize>,
        /// The actual shape encountered.
        got: Vec<usize>,
    },
    /// A computed model quantity became non-finite or non-positive.
    NumericalDegenerate {
        /// Which computation produced the value.
        context: &'static str,
        /// The flat model index of the value.
        index: usize,
        /// The offending value.
        value: f64,
    },
    /// Unsupported data type in file.
    UnsupportedDtype(String),
    /// Malformed header file.
    Header(String),
    /// I/O error occurred.
    IoError(std::io::Error),
    /// Other error with a descriptive message.
    Other(String),
}

impl fmt::Display for TomoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TomoError::MissingSampling { key } => write!(f, "No {}= in input", key),
            TomoError::UnsupportedDimension { dims, max } => {
                write!(
                    f,
                    "unsupported dimension: input has {} axes (only works for {}D now)",
                    dims, max
                )
            }
            TomoError::MissingInput(name) => write!(f, "Need {}=", name),
            TomoError::InvalidGridShape { axis, size } => {
                write!(
                    f,
                    "invalid grid shape: axis {} has size {} (must be >= 1)",
                    axis, size
                )
            }
            TomoError::InvalidGridSpacing { axis, value } => {
                write!(
                    f,
                    "invalid grid spacing on axis {}: {} (must be positive and finite)",
                    axis, value
                )
            }
            TomoError::InvalidVelocity { index, value } => {
                write!(
                    f,
                    "invalid velocity at index {}: {} (must be positive and finite)",
                    index, value
                )
            }
            TomoError::InvalidSlowness { index, value } => {
                write!(
                    f,
                    "invalid slowness-squared at index {}: {} (must be positive and finite)",
                    index, value
                )
            }
            TomoError::InvalidParameter { name, reason } => {
                write!(f, "invalid parameter {}: {}", name, reason)
            }
            TomoError::ShapeMismatch { expected, got } => {
                write!(f, "shape mismatch: expected {:?}, got {:?}", expected, got)
            }
            TomoError::NumericalDegenerate {
                context,
                index,
                value,
            } => {
                write!(
                    f,
                    "numerically degenerate {} at index {}: {}",
                    context, index, value
                )
            }
            TomoError::UnsupportedDtype(dtype) => {
                write!(f, "unsupported dtype: {}", dtype)
            }
            TomoError::Header(msg) => write!(f, "header error: {}", msg),
            TomoError::IoError(e) => write!(f, "I/O error: {}", e),
            TomoError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for TomoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TomoError::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TomoError {
    fn from(e: std::io::Error) -> Self {
        TomoError::IoError(e)
    }
}

/// Convenience type alias for Results with TomoError.
pub type Result<T> = std::result::Result<T, TomoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_missing_sampling() {
        let e = TomoError::MissingSampling {
            key: "d1".to_string(),
        };
        assert_eq!(e.to_string(), "No d1= in input");
    }

    #[test]
    fn display_unsupported_dimension() {
        let e = TomoError::UnsupportedDimension { dims: 3, max: 2 };
        assert_eq!(
            e.to_string(),
            "unsupported dimension: input has 3 axes (only works for 2D now)"
        );
    }

    #[test]
    fn display_missing_input() {
        let e = TomoError::MissingInput("reco".to_string());
        assert_eq!(e.to_string(), "Need reco=");
    }

    #[test]
    fn display_invalid_grid_spacing() {
        let e = TomoError::InvalidGridSpacing {
            axis: 1,
            value: -1.0,
        };
        assert_eq!(
            e.to_string(),
            "invalid grid spacing on axis 1: -1 (must be positive and finite)"
        );
    }

    #[test]
    fn display_numerically_degenerate() {
        let e = TomoError::NumericalDegenerate {
            context: "line-search trial model",
            index: 7,
            value: f64::NAN,
        };
        let msg = e.to_string();
        assert!(msg.contains("line-search trial model"));
        assert!(msg.contains("index 7"));
    }

    #[test]
    fn display_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let e = TomoError::IoError(io_err);
        assert!(e.to_string().contains("file not found"));
    }

    #[test]
    fn from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "test");
        let e: TomoError = io_err.into();
        assert!(matches!(e, TomoError::IoError(_)));
        assert!(std::error::Error::source(&e).is_some());
    }
}
