//! Shared synthetic data for the integration tests.
//!
//! Molecules are small sets of point atoms replicated under the Cn group;
//! their polar Fourier transforms are evaluated analytically, so common lines
//! are exact up to the angular discretization.

#![allow(dead_code)]

use cn_abinitio::geometry::{canonical_common_lines, complete_third_row, rot_z, symmetry_generator};
use cn_abinitio::groundtruth;
use cn_abinitio::PolarStack;
use nalgebra::{Matrix3, Vector3};
use rand::rngs::StdRng;
use rand::RngExt;
use rand_distr::{Distribution, StandardNormal};

pub const N_THETA: usize = 360;
pub const N_R: usize = 32;
/// Radial frequency step of the synthetic transforms.
pub const R_STEP: f64 = 0.2;

/// `n_atoms` random atoms with radius in [0.4, 1], replicated under Cn.
pub fn cn_molecule(n_symm: usize, n_atoms: usize, rng: &mut StdRng) -> Vec<Vector3<f64>> {
    let g = symmetry_generator(n_symm);
    let mut points = Vec::with_capacity(n_symm * n_atoms);
    while points.len() < n_symm * n_atoms {
        let p = Vector3::new(
            rng.random::<f64>() * 2.0 - 1.0,
            rng.random::<f64>() * 2.0 - 1.0,
            rng.random::<f64>() * 2.0 - 1.0,
        );
        if !(0.4..=1.0).contains(&p.norm()) {
            continue;
        }
        let mut q = p;
        for _ in 0..n_symm {
            points.push(q);
            q = g * q;
        }
    }
    points
}

/// A random unit vector whose angle to the symmetry axis keeps
/// |cos β| in [0.35, 0.9], away from top views and the equator.
pub fn random_axis(rng: &mut StdRng) -> Vector3<f64> {
    loop {
        let v: Vector3<f64> = Vector3::new(
            StandardNormal.sample(rng),
            StandardNormal.sample(rng),
            StandardNormal.sample(rng),
        );
        let n = v.norm();
        if n == 0.0 {
            continue;
        }
        let v = v / n;
        if (0.35..=0.9).contains(&v.z.abs()) {
            return v;
        }
    }
}

/// Random views `Rz(α)·complete_third_row(v)`.
///
/// With `inplane_step_deg`, α is a random multiple of the step; otherwise
/// it is uniform.
pub fn random_views(n: usize, inplane_step_deg: Option<f64>, rng: &mut StdRng) -> Vec<Matrix3<f64>> {
    (0..n)
        .map(|_| {
            let v = random_axis(rng);
            let alpha = match inplane_step_deg {
                Some(step) => {
                    let n_steps = (360.0 / step).round() as usize;
                    (rng.random_range(0..n_steps) as f64 * step).to_radians()
                }
                None => rng.random::<f64>() * std::f64::consts::TAU,
            };
            rot_z(alpha) * complete_third_row(&v)
        })
        .collect()
}

pub fn polar_stack(points: &[Vector3<f64>], views: &[Matrix3<f64>]) -> PolarStack {
    PolarStack::from_point_density(points, views, N_THETA, N_R, R_STEP)
        .expect("synthetic stack should be well formed")
}

pub fn third_row(r: &Matrix3<f64>) -> Vector3<f64> {
    r.row(2).transpose()
}

/// Fraction of `viis` and `vijs` whose axes lie within `tol_deg` of the
/// truth.
pub fn detection_rates(
    viis: &[Matrix3<f64>],
    vijs: &[Matrix3<f64>],
    views: &[Matrix3<f64>],
    tol_deg: f64,
) -> (f64, f64) {
    let rates = groundtruth::detection_rates(viis, vijs, views, tol_deg);
    (rates.viis, rates.vijs)
}

fn circular_diff(a: usize, b: usize, n: usize) -> usize {
    let d = a.abs_diff(b) % n;
    d.min(n - d)
}

/// Whether a detected line pair describes the same geometric line as
/// `truth`, within `tol` angular steps, in either folding.
pub fn lines_match(found: [usize; 2], truth: [usize; 2], n_theta: usize, tol: usize) -> bool {
    let half = n_theta / 2;
    let direct = circular_diff(found[0], truth[0], n_theta) <= tol
        && circular_diff(found[1], truth[1], n_theta) <= tol;
    let folded = circular_diff(found[0] + half, truth[0], n_theta) <= tol
        && circular_diff(found[1] + half, truth[1], n_theta) <= tol;
    direct || folded
}

/// The n true common-line pairs between two views of a Cn molecule.
pub fn true_common_lines(
    ri: &Matrix3<f64>,
    rj: &Matrix3<f64>,
    n_symm: usize,
    n_theta: usize,
) -> Vec<[usize; 2]> {
    (0..n_symm)
        .map(|s| {
            let gs = rot_z(std::f64::consts::TAU * s as f64 / n_symm as f64);
            canonical_common_lines(&(ri.transpose() * gs * rj), n_theta)
        })
        .collect()
}
