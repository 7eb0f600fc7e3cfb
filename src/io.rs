// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

//! Self-describing grid files.
//!
//! A grid file is a text header of `key=value` tokens (`n1=100 d1=0.01
//! o1=0 label1="Depth"`) whose `in=` entry names a `.npy` payload. A relative
//! payload path is resolved against the header's directory. Axis 1 varies
//! fastest, so the payload's numpy shape lists the header axes in reverse.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use ndarray::{ArrayD, IxDyn};
use ndarray_npy::ReadNpyError;

use crate::core::{Axis, Grid, Mask, ReceiverRecord};
use crate::error::{Result, TomoError};
use crate::inversion::GradientSink;

/// Largest axis number looked up in a header.
pub const MAX_AXES: usize = 9;

/// Parsed header parameters. Later occurrences of a key override earlier ones.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Header {
    params: Vec<(String, String)>,
    dir: PathBuf,
}

impl Header {
    /// Parse header text.
    ///
    /// Tokens are separated by whitespace; double quotes group a value that
    /// contains spaces. Tokens without `=` are ignored.
    ///
    /// # Errors
    /// Returns [`TomoError::Header`] on an unterminated quote or an empty key.
    pub fn parse(text: &str) -> Result<Self> {
        let mut header = Header::default();
        for token in tokenize(text)? {
            let Some((key, value)) = token.split_once('=') else {
                continue;
            };
            if key.is_empty() {
                return Err(TomoError::Header(format!("empty key in token '{}'", token)));
            }
            header.set(key, value.trim_matches('"'));
        }
        Ok(header)
    }

    /// Read and parse a header file.
    pub fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let mut header = Header::parse(&text)?;
        header.dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(header)
    }

    /// Value of `key`, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Parsed value of `key`, if present.
    ///
    /// # Errors
    /// Returns [`TomoError::Header`] if the value does not parse.
    pub fn get_parsed<T: FromStr>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key) {
            None => Ok(None),
            Some(v) => v
                .parse()
                .map(Some)
                .map_err(|_| TomoError::Header(format!("cannot parse {}={}", key, v))),
        }
    }

    /// Set or override `key`.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.params.retain(|(k, _)| k != key);
        self.params.push((key.to_string(), value.into()));
    }

    /// Sample counts of every axis, missing axes counting as 1, and the
    /// number of meaningful axes (the last one with more than one sample).
    pub fn dims(&self) -> Result<(Vec<usize>, usize)> {
        let mut n = Vec::with_capacity(MAX_AXES);
        let mut dim = 1;
        for i in 1..=MAX_AXES {
            let ni = self.get_parsed::<usize>(&format!("n{}", i))?.unwrap_or(1);
            if ni > 1 {
                dim = i;
            }
            n.push(ni);
        }
        Ok((n, dim))
    }

    /// The meaningful axes. Sampling `d#` is required, origin `o#`
    /// defaults to 0.
    ///
    /// # Errors
    /// Returns [`TomoError::MissingSampling`] if a `d#` is absent.
    pub fn axes(&self) -> Result<Vec<Axis>> {
        let (n, dim) = self.dims()?;
        (1..=dim)
            .map(|i| {
                let key = format!("d{}", i);
                let d = self
                    .get_parsed::<f64>(&key)?
                    .ok_or(TomoError::MissingSampling { key })?;
                let o = self.get_parsed::<f64>(&format!("o{}", i))?.unwrap_or(0.0);
                Ok(Axis {
                    n: n[i - 1],
                    d,
                    o,
                    label: self.get(&format!("label{}", i)).map(str::to_string),
                    unit: self.get(&format!("unit{}", i)).map(str::to_string),
                })
            })
            .collect()
    }

    /// Set `n#`, `d#`, `o#` and annotations for each axis, starting at axis 1.
    pub fn set_axes(&mut self, axes: &[Axis]) {
        for (i, a) in axes.iter().enumerate() {
            let k = i + 1;
            self.set(&format!("n{}", k), a.n.to_string());
            self.set(&format!("d{}", k), a.d.to_string());
            self.set(&format!("o{}", k), a.o.to_string());
            if let Some(label) = &a.label {
                self.set(&format!("label{}", k), label.clone());
            }
            if let Some(unit) = &a.unit {
                self.set(&format!("unit{}", k), unit.clone());
            }
        }
    }

    /// Path of the payload named by `in=`.
    ///
    /// # Errors
    /// Returns [`TomoError::Header`] if there is no `in=` entry.
    pub fn payload(&self) -> Result<PathBuf> {
        let name = self
            .get("in")
            .ok_or_else(|| TomoError::Header("No in= in header".to_string()))?;
        let path = PathBuf::from(name);
        Ok(if path.is_relative() {
            self.dir.join(path)
        } else {
            path
        })
    }

    /// Header text, one `key=value` per line.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for (k, v) in &self.params {
            if v.is_empty() || v.contains(char::is_whitespace) {
                let _ = writeln!(out, "\t{}=\"{}\"", k, v);
            } else {
                let _ = writeln!(out, "\t{}={}", k, v);
            }
        }
        out
    }
}

fn tokenize(text: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for c in text.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                current.push(c);
            }
            c if c.is_whitespace() && !quoted => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if quoted {
        return Err(TomoError::Header("unterminated quote".to_string()));
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    Ok(tokens)
}

/// Drop unit axes so that `[1, 5]` and `[5]` compare equal.
fn squeeze(shape: &[usize]) -> Vec<usize> {
    shape.iter().copied().filter(|&n| n != 1).collect()
}

/// Load a float payload, promoting f32 to f64, and check its numpy shape
/// against `expected` (header axis order).
pub fn load_npy_f64(path: &Path, expected: &[usize]) -> Result<Vec<f64>> {
    let arr: ArrayD<f64> = match ndarray_npy::read_npy(path) {
        Ok(a) => a,
        Err(ReadNpyError::WrongDescriptor(_)) => {
            let arr32: ArrayD<f32> = ndarray_npy::read_npy(path).map_err(npy_error)?;
            arr32.mapv(|v| v as f64)
        }
        Err(e) => return Err(npy_error(e)),
    };
    check_shape(arr.shape(), expected)?;
    Ok(arr.as_standard_layout().to_owned().into_raw_vec())
}

/// Load an integer payload (i32, or i64 narrowed to activity flags).
pub fn load_npy_flags(path: &Path, expected: &[usize]) -> Result<Vec<i32>> {
    let arr: ArrayD<i32> = match ndarray_npy::read_npy(path) {
        Ok(a) => a,
        Err(ReadNpyError::WrongDescriptor(_)) => {
            let arr64: ArrayD<i64> = ndarray_npy::read_npy(path).map_err(npy_error)?;
            arr64.mapv(|v| i32::from(v == 1))
        }
        Err(e) => return Err(npy_error(e)),
    };
    check_shape(arr.shape(), expected)?;
    Ok(arr.as_standard_layout().to_owned().into_raw_vec())
}

/// Missing or unreadable files stay I/O errors; an element type that matches
/// neither accepted dtype is reported as such.
fn npy_error(e: ReadNpyError) -> TomoError {
    match e {
        ReadNpyError::Io(e) => TomoError::IoError(e),
        ReadNpyError::WrongDescriptor(descr) => TomoError::UnsupportedDtype(format!("{}", descr)),
        other => TomoError::Other(format!("npy read error: {}", other)),
    }
}

fn check_shape(npy: &[usize], expected: &[usize]) -> Result<()> {
    let reversed: Vec<usize> = expected.iter().rev().copied().collect();
    if squeeze(npy) != squeeze(&reversed) {
        return Err(TomoError::ShapeMismatch {
            expected: reversed,
            got: npy.to_vec(),
        });
    }
    Ok(())
}

/// Write `data` with header axis shape `shape` as a `.npy` payload.
pub fn save_npy(path: &Path, shape: &[usize], data: &[f64]) -> Result<()> {
    let reversed: Vec<usize> = shape.iter().rev().copied().collect();
    let arr = ArrayD::from_shape_vec(IxDyn(&reversed), data.to_vec())
        .map_err(|e| TomoError::Other(format!("shape error: {}", e)))?;
    ndarray_npy::write_npy(path, &arr)
        .map_err(|e| TomoError::Other(format!("npy write error: {}", e)))?;
    Ok(())
}

/// A model read from a grid file.
#[derive(Debug, Clone)]
pub struct ModelFile {
    /// The model grid.
    pub grid: Grid,
    /// Samples, axis 1 fastest.
    pub data: Vec<f64>,
    /// The header the model was read from.
    pub header: Header,
}

/// Read the starting model.
///
/// # Errors
/// Returns [`TomoError::MissingSampling`] for a missing `d#`,
/// [`TomoError::UnsupportedDimension`] for more than two meaningful axes, or
/// an I/O or shape error for the payload.
pub fn load_model(path: &Path) -> Result<ModelFile> {
    let header = Header::read(path)?;
    let axes = header.axes()?;
    let shape: Vec<usize> = axes.iter().map(|a| a.n).collect();
    let grid = Grid::new(axes)?;
    let data = load_npy_f64(&header.payload()?, &shape)?;
    Ok(ModelFile { grid, data, header })
}

/// Read the observed record for `grid` (`nx * nx` samples).
pub fn load_record(path: &Path, grid: &Grid) -> Result<ReceiverRecord> {
    let header = Header::read(path)?;
    let data = load_npy_f64(&header.payload()?, &[grid.nx(), grid.nx()])?;
    ReceiverRecord::new(grid, data)
}

/// Read an integer mask with header axis shape `shape`; entries equal to 1
/// are active.
pub fn load_mask(path: &Path, shape: &[usize]) -> Result<Mask> {
    let header = Header::read(path)?;
    let flags = load_npy_flags(&header.payload()?, shape)?;
    Ok(Mask::from_flags(&flags))
}

fn payload_path(header_path: &Path) -> (PathBuf, String) {
    let stem = header_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "out".to_string());
    let name = format!("{}.npy", stem);
    let dir = header_path.parent().map(Path::to_path_buf).unwrap_or_default();
    (dir.join(&name), name)
}

fn write_grid_file(path: &Path, mut header: Header, axes: &[Axis], data: &[f64]) -> Result<()> {
    let (payload, name) = payload_path(path);
    let shape: Vec<usize> = axes.iter().map(|a| a.n).collect();
    save_npy(&payload, &shape, data)?;
    header.set_axes(axes);
    header.set("esize", "8");
    header.set("data_format", "native_double");
    header.set("in", name);
    std::fs::write(path, header.to_text())?;
    Ok(())
}

/// Write a model on `grid` as header plus `<stem>.npy` next to it.
///
/// Parameters of `template` (e.g. the input header) are carried over; axes,
/// element size and payload are replaced.
pub fn write_model(
    path: &Path,
    grid: &Grid,
    data: &[f64],
    template: Option<&Header>,
) -> Result<()> {
    if data.len() != grid.num_cells() {
        return Err(TomoError::ShapeMismatch {
            expected: vec![grid.nz(), grid.nx()],
            got: vec![data.len()],
        });
    }
    let mut header = template.cloned().unwrap_or_default();
    header.params.retain(|(k, _)| k != "in");
    write_grid_file(path, header, grid.input_axes(), data)
}

/// Collects one model-sized frame per outer iteration and writes them as a
/// three-axis grid file with `n3 = niter`. Frames that are never emitted
/// stay zero.
#[derive(Debug)]
pub struct GradientWriter {
    path: PathBuf,
    axes: [Axis; 2],
    niter: usize,
    frames: Vec<f64>,
}

impl GradientWriter {
    /// Prepare a writer for `niter` frames on `grid`.
    pub fn new(path: &Path, grid: &Grid, niter: usize) -> Self {
        GradientWriter {
            path: path.to_path_buf(),
            axes: grid.axes().clone(),
            niter,
            frames: vec![0.0; grid.num_cells() * niter],
        }
    }

    /// Frame of iteration `iteration`.
    pub fn frame(&self, iteration: usize) -> &[f64] {
        let nw = self.frames.len() / self.niter.max(1);
        &self.frames[iteration * nw..(iteration + 1) * nw]
    }

    /// Write the collected frames.
    pub fn finish(self) -> Result<()> {
        let mut axes = self.axes.to_vec();
        axes.push(Axis::new(self.niter, 1.0, 0.0));
        write_grid_file(&self.path, Header::default(), &axes, &self.frames)
    }
}

impl GradientSink for GradientWriter {
    fn emit(&mut self, iteration: usize, frame: &[f64]) -> Result<()> {
        let nw = self.axes[0].n * self.axes[1].n;
        if frame.len() != nw {
            return Err(TomoError::ShapeMismatch {
                expected: vec![self.axes[0].n, self.axes[1].n],
                got: vec![frame.len()],
            });
        }
        if iteration >= self.niter {
            return Err(TomoError::Other(format!(
                "gradient frame {} outside of {} iterations",
                iteration, self.niter
            )));
        }
        self.frames[iteration * nw..(iteration + 1) * nw].copy_from_slice(frame);
        Ok(())
    }
}
