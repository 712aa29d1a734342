//! Dynamic cross-correlation of atomic fluctuations over one window of frames.
//!
//! For a window of `n` frames, with `Δ[t,a]` the displacement of atom `a` from its mean
//! position over the window:
//!
//! `C[i,k] = (1/n) Σ_t Δ[t,i] · Δ[t,k]`, and `DCCM[i,k] = C[i,k] / (√(C[i,i]+ε) √(C[k,k]+ε))`.
//!
//! Everything runs in `f32`, matching the stored format.

use std::ops::Range;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    TrajectorySource,
    error::{DccmError, Result},
};

/// Added to each variance before the square root, so atoms that don't move don't divide by zero.
pub const EPSILON: f32 = 1e-10;

/// How windows are scheduled. Both produce bit-identical matrices.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Serial,
    /// Windows are computed concurrently on the rayon thread pool.
    #[default]
    Parallel,
}

/// A dense, row-major, symmetric `n × n` correlation matrix.
#[derive(Clone, Debug, PartialEq)]
pub struct CorrMatrix {
    pub n: usize,
    pub data: Vec<f32>,
}

impl CorrMatrix {
    pub fn zeros(n: usize) -> Self {
        Self {
            n,
            data: vec![0.; n * n],
        }
    }

    pub fn get(&self, i: usize, k: usize) -> f32 {
        self.data[i * self.n + k]
    }

    pub fn set(&mut self, i: usize, k: usize, val: f32) {
        self.data[i * self.n + k] = val;
    }

    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.n..(i + 1) * self.n]
    }

    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }
}

/// Displacements from the window mean, atom-major: atom `a` owns `3n` contiguous values,
/// `[x0, y0, z0, x1, y1, z1, ...]` over the window's frames.
fn fluctuations<T: TrajectorySource + ?Sized>(src: &T, frames: Range<usize>) -> Vec<f32> {
    let n_atoms = src.atom_count();
    let n = frames.len();
    let inv_n = 1. / n as f32;

    let mut mean = vec![[0f32; 3]; n_atoms];
    for t in frames.clone() {
        for (m, p) in mean.iter_mut().zip(src.coordinates(t)) {
            m[0] += p.x;
            m[1] += p.y;
            m[2] += p.z;
        }
    }
    for m in &mut mean {
        for c in m.iter_mut() {
            *c *= inv_n;
        }
    }

    let stride = 3 * n;
    let mut out = vec![0f32; n_atoms * stride];
    for (t_local, t) in frames.enumerate() {
        for (a, p) in src.coordinates(t).iter().enumerate() {
            let j = a * stride + 3 * t_local;
            out[j] = p.x - mean[a][0];
            out[j + 1] = p.y - mean[a][1];
            out[j + 2] = p.z - mean[a][2];
        }
    }

    out
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Computes the DCCM for the frames in `frames`, which must be non-empty and in bounds.
pub fn dccm_for_window<T: TrajectorySource + ?Sized>(src: &T, frames: Range<usize>) -> CorrMatrix {
    let n_atoms = src.atom_count();
    let n = frames.len();
    let stride = 3 * n;
    let inv_n = 1. / n as f32;

    let fluct = fluctuations(src, frames);
    let atom = |a: usize| &fluct[a * stride..(a + 1) * stride];

    // Raw covariance; upper triangle only, then mirrored.
    let mut cov = CorrMatrix::zeros(n_atoms);
    for i in 0..n_atoms {
        for k in i..n_atoms {
            let c = dot(atom(i), atom(k)) * inv_n;
            cov.set(i, k, c);
            cov.set(k, i, c);
        }
    }

    let norm: Vec<f32> = (0..n_atoms)
        .map(|i| (cov.get(i, i) + EPSILON).sqrt())
        .collect();

    for i in 0..n_atoms {
        for k in 0..n_atoms {
            let idx = i * n_atoms + k;
            cov.data[idx] /= norm[i] * norm[k];
        }
    }

    cov
}

/// DCCMs for every window, in window order. A non-finite matrix in any window fails the whole set.
pub fn dccm_for_windows<T: TrajectorySource + ?Sized>(
    src: &T,
    windows: &[Range<usize>],
    backend: Backend,
) -> Result<Vec<CorrMatrix>> {
    let compute = |(i, r): (usize, &Range<usize>)| {
        let m = dccm_for_window(src, r.clone());
        if m.is_finite() {
            debug!("Window {i}: frames {}..{}", r.start, r.end);
            Ok(m)
        } else {
            Err(DccmError::NonFinite { window: i })
        }
    };

    match backend {
        Backend::Serial => windows.iter().enumerate().map(compute).collect(),
        // `collect` on an indexed parallel iterator keeps window order.
        Backend::Parallel => windows.par_iter().enumerate().map(compute).collect(),
    }
}
