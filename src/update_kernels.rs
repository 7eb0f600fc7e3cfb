// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

/// Controls for the bisection root search of the coupled DSR update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RootSearch {
    /// Relative threshold below which a branch counts as horizontal
    /// (`q^2 < thres * w`).
    pub thres: f64,
    /// Bracket width, relative to its upper end, at which bisection stops.
    pub tol: f64,
    /// Maximum number of bisection halvings.
    pub nloop: usize,
}

impl Default for RootSearch {
    fn default() -> Self {
        RootSearch {
            thres: 5e-5,
            tol: 1e-3,
            nloop: 10,
        }
    }
}

/// Which upwind neighbour along one axis a node update used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Side {
    /// The axis did not take part in the update.
    #[default]
    None,
    /// The neighbour at the lower index.
    Minus,
    /// The neighbour at the higher index.
    Plus,
}

impl Side {
    /// Whether the axis took part in the update.
    pub fn is_used(self) -> bool {
        self != Side::None
    }
}

/// Upwind stencil recorded for an accepted node: one [`Side`] per axis
/// of the extended (depth, source, receiver) grid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stencil {
    /// Depth axis.
    pub z: Side,
    /// Source axis.
    pub s: Side,
    /// Receiver axis.
    pub r: Side,
}

impl Stencil {
    /// Whether any axis took part (false for the zero-offset diagonal).
    pub fn is_empty(&self) -> bool {
        !(self.z.is_used() || self.s.is_used() || self.r.is_used())
    }
}

/// Upwind neighbour along one axis: its traveltime and which side it lies on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Upwind {
    /// Accepted traveltime of the neighbour.
    pub t: f64,
    /// Side of the neighbour relative to the node.
    pub side: Side,
}

/// Accepted upwind neighbours available to a node update.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Neighbors {
    /// Depth neighbour.
    pub z: Option<Upwind>,
    /// Source-axis neighbour.
    pub s: Option<Upwind>,
    /// Receiver-axis neighbour.
    pub r: Option<Upwind>,
}

/// Local cell geometry of a node: slowness squared under the source and the
/// receiver, and the grid spacing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Local {
    /// Slowness squared at the source position.
    pub ws: f64,
    /// Slowness squared at the receiver position.
    pub wr: f64,
    /// Depth spacing.
    pub dz: f64,
    /// Lateral spacing.
    pub dx: f64,
}

/// Horizontal propagation along one branch: `t + h * sqrt(w)`.
#[inline]
pub fn horizontal(t: f64, w: f64, h: f64) -> f64 {
    t + h * w.sqrt()
}

/// Vertical propagation of both branches from the deeper level.
#[inline]
pub fn vertical(tz: f64, ws: f64, wr: f64, dz: f64) -> f64 {
    tz + dz * (ws.sqrt() + wr.sqrt())
}

/// Vertical slowness of one branch at trial time `t`.
///
/// With an upwind neighbour `ti` the branch is `sqrt(w - ((t - ti)/dx)^2)`,
/// otherwise the branch is vertical and contributes `sqrt(w)`.
#[inline]
pub fn branch(w: f64, ti: Option<f64>, t: f64, dx: f64) -> f64 {
    match ti {
        Some(ti) => {
            let p = (t - ti) / dx;
            (w - p * p).max(0.0).sqrt()
        }
        None => w.sqrt(),
    }
}

/// Discrete DSR equation at trial time `t`; increasing in `t` on the bracket.
#[inline]
fn dsr_residual(tz: f64, ts: Option<f64>, tr: Option<f64>, local: &Local, t: f64) -> f64 {
    (t - tz) / local.dz - branch(local.ws, ts, t, local.dx) - branch(local.wr, tr, t, local.dx)
}

/// Solve the coupled update that uses the depth neighbour together with one
/// or both lateral neighbours.
///
/// The root of `(t - tz)/dz = q_s(t) + q_r(t)` is bracketed between the
/// largest neighbour time and the earliest time at which a used branch turns
/// horizontal, then refined by bisection and a final linear interpolation.
/// Returns `None` if there is no root in the bracket or if a used branch is
/// within `thres` of horizontal at the root.
pub fn dsr_root(
    tz: f64,
    ts: Option<f64>,
    tr: Option<f64>,
    local: &Local,
    search: &RootSearch,
) -> Option<f64> {
    if ts.is_none() && tr.is_none() {
        return None;
    }

    let mut lo = tz;
    let mut hi = f64::INFINITY;
    if let Some(ts) = ts {
        lo = lo.max(ts);
        hi = hi.min(horizontal(ts, local.ws, local.dx));
    }
    if let Some(tr) = tr {
        lo = lo.max(tr);
        hi = hi.min(horizontal(tr, local.wr, local.dx));
    }
    if hi < lo {
        return None;
    }

    let mut g_lo = dsr_residual(tz, ts, tr, local, lo);
    let mut g_hi = dsr_residual(tz, ts, tr, local, hi);
    if g_lo > 0.0 || g_hi < 0.0 {
        return None;
    }

    for _ in 0..search.nloop {
        if hi - lo <= search.tol * hi.abs() {
            break;
        }
        let mid = 0.5 * (lo + hi);
        let g_mid = dsr_residual(tz, ts, tr, local, mid);
        if g_mid > 0.0 {
            hi = mid;
            g_hi = g_mid;
        } else {
            lo = mid;
            g_lo = g_mid;
        }
    }

    let t = if g_hi > g_lo {
        lo - g_lo * (hi - lo) / (g_hi - g_lo)
    } else {
        0.5 * (lo + hi)
    };

    // Near-horizontal branches are left to the one-sided updates.
    if let Some(ts) = ts {
        let q = branch(local.ws, Some(ts), t, local.dx);
        if q * q < search.thres * local.ws {
            return None;
        }
    }
    if let Some(tr) = tr {
        let q = branch(local.wr, Some(tr), t, local.dx);
        if q * q < search.thres * local.wr {
            return None;
        }
    }

    Some(t)
}

/// Compute the smallest valid traveltime for a node from its accepted
/// upwind neighbours, together with the stencil that produced it.
///
/// Candidates are the one-sided horizontal updates along the source and
/// receiver axes, the vertical update from the deeper level, and the coupled
/// depth-plus-lateral updates solved by [`dsr_root`].
pub fn update_node(nb: &Neighbors, local: &Local, search: &RootSearch) -> Option<(f64, Stencil)> {
    let mut best: Option<(f64, Stencil)> = None;
    let mut consider = |t: f64, stencil: Stencil| {
        if t.is_finite() && best.map_or(true, |(b, _)| t < b) {
            best = Some((t, stencil));
        }
    };

    let side = |u: Option<Upwind>| u.map_or(Side::None, |u| u.side);
    let ts = nb.s.map(|u| u.t);
    let tr = nb.r.map(|u| u.t);

    if let Some(s) = nb.s {
        consider(
            horizontal(s.t, local.ws, local.dx),
            Stencil {
                s: s.side,
                ..Stencil::default()
            },
        );
    }
    if let Some(r) = nb.r {
        consider(
            horizontal(r.t, local.wr, local.dx),
            Stencil {
                r: r.side,
                ..Stencil::default()
            },
        );
    }

    if let Some(z) = nb.z {
        consider(
            vertical(z.t, local.ws, local.wr, local.dz),
            Stencil {
                z: z.side,
                ..Stencil::default()
            },
        );

        let coupled = [(ts, None), (None, tr), (ts, tr)];
        for (cs, cr) in coupled {
            if cs.is_none() && cr.is_none() {
                continue;
            }
            if let Some(t) = dsr_root(z.t, cs, cr, local, search) {
                let stencil = Stencil {
                    z: z.side,
                    s: if cs.is_some() { side(nb.s) } else { Side::None },
                    r: if cr.is_some() { side(nb.r) } else { Side::None },
                };
                consider(t, stencil);
            }
        }
    }

    best
}
