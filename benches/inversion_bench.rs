// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use dsr_tomo::conversion::velocity_to_slowness_squared;
use dsr_tomo::{
    Axis, DsrEikonal, DsrTomo, EikonalOptions, Grid, Inversion, InversionConfig, ReceiverRecord,
};

fn make_grid(nz: usize, nx: usize) -> Grid {
    Grid::new(vec![Axis::new(nz, 0.05, 0.0), Axis::new(nx, 0.05, 0.0)]).unwrap()
}

/// v(z) = 1.5 + 2 z.
fn graded_slowness_squared(grid: &Grid) -> Vec<f64> {
    let mut v = vec![0.0; grid.num_cells()];
    for x in 0..grid.nx() {
        for z in 0..grid.nz() {
            v[grid.cell(z, x)] = 1.5 + 2.0 * z as f64 * grid.dz();
        }
    }
    velocity_to_slowness_squared(&v).unwrap()
}

fn make_record(grid: &Grid, w: &[f64]) -> ReceiverRecord {
    let eik = DsrEikonal::new(grid, EikonalOptions::default(), None).unwrap();
    let mut field = eik.field();
    let mut order = eik.order();
    eik.forward(w, &mut field, &mut order).unwrap();
    let ext = grid.extended();
    let times = (0..ext.record_len())
        .map(|ir| field.times()[ext.surface_node(ir)])
        .collect();
    ReceiverRecord::new(grid, times).unwrap()
}

/// Forward fast marching on graded models of increasing width.
fn bench_fastmarch(c: &mut Criterion) {
    let mut group = c.benchmark_group("fastmarch");
    for &nx in &[16, 32, 48] {
        let grid = make_grid(32, nx);
        let w = graded_slowness_squared(&grid);
        let eik = DsrEikonal::new(&grid, EikonalOptions::default(), None).unwrap();
        group.bench_function(format!("32x{}", nx), |b| {
            b.iter_with_setup(
                || (eik.field(), eik.order()),
                |(mut field, mut order)| {
                    eik.forward(&w, &mut field, &mut order).unwrap();
                    black_box(field)
                },
            );
        });
    }
    group.finish();
}

/// Linearization plus one forward/adjoint pair of the tomography operator.
fn bench_linearize(c: &mut Criterion) {
    use dsr_tomo::LinearOperator;

    let grid = make_grid(32, 32);
    let w = graded_slowness_squared(&grid);
    let eik = DsrEikonal::new(&grid, EikonalOptions::default(), None).unwrap();
    let mut field = eik.field();
    let mut order = eik.order();
    eik.forward(&w, &mut field, &mut order).unwrap();
    let mut tomo = DsrTomo::new(&grid, None, None).unwrap();
    let dw = vec![1e-3; tomo.nx()];
    let mut dt = vec![0.0; tomo.ny()];
    let mut back = vec![0.0; tomo.nx()];

    c.bench_function("tomo_32x32", |b| {
        b.iter(|| {
            tomo.set(&field, &w, &order).unwrap();
            tomo.forward(false, &dw, &mut dt);
            tomo.adjoint(false, &mut back, &dt);
            black_box(&back);
        });
    });
}

/// One outer iteration with each regularization.
fn bench_outer_iteration(c: &mut Criterion) {
    let grid = make_grid(24, 24);
    let truth = graded_slowness_squared(&grid);
    let record = make_record(&grid, &truth);
    let start = vec![1.0 / 4.0; grid.num_cells()];

    let mut group = c.benchmark_group("outer_iteration_24x24");
    for &shape in &[false, true] {
        let config = InversionConfig {
            velocity: false,
            shape,
            niter: 1,
            eps: 0.1,
            rect: [3, 3],
            ..InversionConfig::default()
        };
        let name = if shape { "shaping" } else { "gradient_penalty" };
        group.bench_function(name, |b| {
            b.iter_with_setup(
                || {
                    Inversion::new(
                        config.clone(),
                        grid.clone(),
                        start.clone(),
                        record.clone(),
                        None,
                        None,
                    )
                    .unwrap()
                },
                |mut inv| {
                    let mut solver = inv.regularization();
                    black_box(inv.run(&mut solver, None).unwrap())
                },
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_fastmarch, bench_linearize, bench_outer_iteration);
criterion_main!(benches);
