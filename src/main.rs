// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use tracing::{info, warn};

use dsr_tomo::io::{self, GradientWriter};
use dsr_tomo::logger::{init_logger_with_level, level_for};
use dsr_tomo::{GradientSink, Inversion, InversionConfig, InversionStatus, TomoError};

#[derive(Parser)]
#[command(
    name = "dsr-tomo",
    about = "Prestack first-arrival traveltime tomography (DSR eikonal)"
)]
struct Cli {
    /// Starting model header (velocity or slowness squared)
    #[arg(long)]
    input: PathBuf,

    /// Output model header
    #[arg(long)]
    output: PathBuf,

    /// Observed first-arrival record header
    #[arg(long)]
    reco: Option<PathBuf>,

    /// Data mask header (receivers with value 1 are used)
    #[arg(long)]
    mask: Option<PathBuf>,

    /// Model mask header (cells with value 1 are updated)
    #[arg(long)]
    prec: Option<PathBuf>,

    /// Optional per-iteration gradient output header
    #[arg(long)]
    grad: Option<PathBuf>,

    /// Input is velocity (otherwise slowness squared)
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    velocity: bool,

    /// Restrict the forward model to the offsets covered by the data mask
    #[arg(long, default_value_t = false, action = ArgAction::Set)]
    limit: bool,

    /// Use shaping regularization
    #[arg(long, default_value_t = false, action = ArgAction::Set)]
    shape: bool,

    /// Verbose logging
    #[arg(long, default_value_t = false, action = ArgAction::Set)]
    verb: bool,

    /// Number of outer iterations
    #[arg(long, default_value_t = 5)]
    niter: usize,

    /// Number of inner solver iterations
    #[arg(long, default_value_t = 10)]
    cgiter: usize,

    /// Near-horizontal threshold of the root search
    #[arg(long, default_value_t = 5e-5)]
    thres: f64,

    /// Bisection tolerance of the root search
    #[arg(long, default_value_t = 1e-3)]
    tol: f64,

    /// Maximum bisection halvings
    #[arg(long, default_value_t = 10)]
    nloop: usize,

    /// Regularization parameter
    #[arg(long, default_value_t = 0.0)]
    eps: f64,

    /// Ignore non-causal DSR branches
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    causal: bool,

    /// Smoothing radius on the first axis (shaping only)
    #[arg(long, default_value_t = 1)]
    rect1: usize,

    /// Smoothing radius on the second axis (shaping only)
    #[arg(long, default_value_t = 1)]
    rect2: usize,
}

impl Cli {
    fn config(&self) -> InversionConfig {
        InversionConfig {
            velocity: self.velocity,
            limit: self.limit,
            shape: self.shape,
            verb: self.verb,
            niter: self.niter,
            cgiter: self.cgiter,
            thres: self.thres,
            tol: self.tol,
            nloop: self.nloop,
            eps: self.eps,
            causal: self.causal,
            rect: [self.rect1, self.rect2],
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logger_with_level(level_for(cli.verb));
    run(&cli)
}

fn run(cli: &Cli) -> Result<()> {
    let config = cli.config();
    config.validate()?;
    let reco = cli
        .reco
        .as_ref()
        .ok_or_else(|| TomoError::MissingInput("reco".to_string()))?;

    let model = io::load_model(&cli.input)
        .with_context(|| format!("reading model {}", cli.input.display()))?;
    let grid = model.grid.clone();
    let record = io::load_record(reco, &grid)
        .with_context(|| format!("reading record {}", reco.display()))?;

    let data_mask = cli
        .mask
        .as_ref()
        .map(|path| {
            io::load_mask(path, &[grid.nx(), grid.nx()])
                .with_context(|| format!("reading data mask {}", path.display()))
        })
        .transpose()?;
    let model_mask = cli
        .prec
        .as_ref()
        .map(|path| {
            io::load_mask(path, &[grid.nz(), grid.nx()])
                .with_context(|| format!("reading model mask {}", path.display()))
        })
        .transpose()?;

    let mut inversion = Inversion::new(
        config,
        grid.clone(),
        model.data,
        record,
        data_mask,
        model_mask,
    )?;
    let mut solver = inversion.regularization();
    info!(
        "{}x{} model, {} regularization, {} iterations",
        grid.nz(),
        grid.nx(),
        solver.name(),
        cli.niter
    );

    let mut gradient = cli
        .grad
        .as_ref()
        .map(|path| GradientWriter::new(path, &grid, cli.niter));
    let report = inversion.run(
        &mut solver,
        gradient.as_mut().map(|g| g as &mut dyn GradientSink),
    )?;

    if let InversionStatus::LineSearchExhausted { iteration, niter, .. } = report.status {
        warn!(
            "stopped at iteration {} of {}; writing the last accepted model",
            iteration, niter
        );
    }

    let out = inversion.model()?;
    io::write_model(&cli.output, &grid, &out, Some(&model.header))
        .with_context(|| format!("writing model {}", cli.output.display()))?;
    if let Some(writer) = gradient {
        writer.finish().context("writing gradient frames")?;
    }

    info!("final misfit ratio {}", report.rate);
    Ok(())
}
