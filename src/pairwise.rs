//! Pairwise relative rotations from a common-line matrix.
//!
//! Any third image k closes a triangle with images i and j on the sphere of
//! projection directions. The three common lines of the triangle determine
//! the dihedral angle between the planes of i and j; each k therefore casts a
//! vote for that angle. Votes are smoothed into a histogram, the peak is
//! taken as the consensus, and only the votes near the peak contribute to the
//! final rotation
//!
//! For a Cn molecule each pair has n common lines, and a triangle only votes
//! for the right angle when its three lines belong to compatible group
//! elements. Every combination of the candidate lines of (i, k) and (j, k)
//! is therefore tried; the compatible ones agree, the rest spread out.
//!
//! ```text
//! Rij = proj_SO3( mean_k  Rz(a)·Rx(α_k)·Rz(−b) ),   a = cl(i,j), b = cl(j,i)
//! ```
//!
//! The result equals `Rᵢᵗ·Rⱼ` up to J-conjugation.

use std::f64::consts::TAU;

use nalgebra::Matrix3;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::correlation::CommonLineMatrix;
use crate::geometry::{euler_zxz, project_to_orthogonal};
use crate::pairs::pair_list;

/// Histogram tics over [0°, 180°].
const N_TICS: usize = 60;
/// Gaussian smoothing of the angle histogram (degrees).
const SIGMA_DEG: f64 = 3.0;
/// Votes farther than this from the histogram peak are discarded (degrees).
const PEAK_WIDTH_DEG: f64 = 6.0;
/// Triangles whose Gram determinant falls below this are degenerate.
const MIN_TRIANGLE_COND: f64 = 1e-5;

/// Relative rotations for every pair, in canonical pair order.
#[derive(Debug, Clone)]
pub struct RelativeRotations {
    pub rijs: Vec<Matrix3<f64>>,
    /// Votes kept per pair after peak selection.
    pub n_votes: Vec<usize>,
}

/// Dihedral angle (degrees) between images i and j implied by a third
/// image k, or `None` when the triangle is degenerate.
///
/// `ij = [l_ij, l_ji]`, `ik = [l_ik, l_ki]`, `jk = [l_jk, l_kj]`.
fn triangle_angle(ij: [usize; 2], ik: [usize; 2], jk: [usize; 2], step: f64) -> Option<f64> {
    let angle = |l: usize| l as f64 * step;
    let phi_i = angle(ik[0]) - angle(ij[0]);
    let phi_j = angle(jk[0]) - angle(ij[1]);
    let phi_k = angle(jk[1]) - angle(ik[1]);

    let a = phi_k.cos();
    let b = phi_j.cos();
    let c = phi_i.cos();
    let cond = 1.0 + 2.0 * a * b * c - (a * a + b * b + c * c);
    if cond <= MIN_TRIANGLE_COND {
        return None;
    }
    let c_alpha = (a - c * b) / (phi_i.sin() * phi_j.sin());
    if !c_alpha.is_finite() {
        return None;
    }
    Some(c_alpha.clamp(-1.0, 1.0).acos().to_degrees())
}

/// Peak of the Gaussian-smoothed histogram of `angles` (degrees).
fn histogram_peak(angles: &[f64]) -> f64 {
    let denom = 2.0 * SIGMA_DEG * SIGMA_DEG;
    let mut best = (f64::NEG_INFINITY, 0.0);
    for t in 0..N_TICS {
        let x = 180.0 * t as f64 / (N_TICS - 1) as f64;
        let score: f64 = angles.iter().map(|a| (-(a - x).powi(2) / denom).exp()).sum();
        if score > best.0 {
            best = (score, x);
        }
    }
    best.1
}

/// Relative rotation of one pair, with the number of votes used.
pub fn vote_pair(
    clmatrix: &CommonLineMatrix,
    i: usize,
    j: usize,
    n_theta: usize,
) -> (Matrix3<f64>, usize) {
    let step = TAU / n_theta as f64;
    let (Some(lij), Some(lji)) = (clmatrix.get(i, j), clmatrix.get(j, i)) else {
        return (Matrix3::zeros(), 0);
    };
    let ij = [lij, lji];
    let mut angles = Vec::new();
    for k in (0..clmatrix.n_images()).filter(|&k| k != i && k != j) {
        for ik in clmatrix.line_candidates(i, k) {
            for jk in clmatrix.line_candidates(j, k) {
                angles.extend(triangle_angle(ij, ik, jk, step));
            }
        }
    }
    if angles.is_empty() {
        return (Matrix3::zeros(), 0);
    }
    let peak = histogram_peak(&angles);
    let a = lij as f64 * step;
    let b = lji as f64 * step;
    let good: Vec<Matrix3<f64>> = angles
        .iter()
        .filter(|alpha| (*alpha - peak).abs() < PEAK_WIDTH_DEG)
        .map(|alpha| euler_zxz(-b, alpha.to_radians(), a))
        .collect();
    if good.is_empty() {
        return (Matrix3::zeros(), 0);
    }
    let mean = good.iter().fold(Matrix3::zeros(), |acc, r| acc + r) / good.len() as f64;
    match project_to_orthogonal(&mean) {
        Some(r) => (r, good.len()),
        None => (Matrix3::zeros(), 0),
    }
}

/// Relative rotations `Rij ≈ Rᵢᵗ·Rⱼ` (up to J) for all pairs i < j.
///
/// A pair with no usable third image gets a zero matrix and a warning.
pub fn relative_rotations(clmatrix: &CommonLineMatrix, n_theta: usize) -> RelativeRotations {
    let n_images = clmatrix.n_images();
    info!("Estimating relative rotations by voting over {} images", n_images);
    let results: Vec<(Matrix3<f64>, usize)> = pair_list(n_images)
        .into_par_iter()
        .map(|(i, j)| {
            let (rij, n) = vote_pair(clmatrix, i, j, n_theta);
            debug!("pair ({}, {}): {} votes", i, j, n);
            (rij, n)
        })
        .collect();

    let n_empty = results.iter().filter(|(_, n)| *n == 0).count();
    if n_empty > 0 {
        warn!(
            "{} of {} pairs had no consistent third image; their relative rotation is zero",
            n_empty,
            results.len()
        );
    }
    let (rijs, n_votes) = results.into_iter().unzip();
    RelativeRotations { rijs, n_votes }
}
