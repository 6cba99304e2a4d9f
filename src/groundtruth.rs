//! Line matrices derived from known rotations, and detection rates of
//! estimates against them.
//!
//! Used in place of correlation when ground-truth rotations are available,
//! to isolate the downstream solvers from detection errors. The output
//! follows the exact conventions of [`crate::correlation`].
//!
//! Common lines cannot tell a rotation from its J-conjugate: `J·R·J` moves
//! both line directions by π, which the canonical fold absorbs. Simulated
//! J-conjugation therefore leaves the line indices unchanged; the handedness
//! of the rotations rebuilt from them stays ambiguous either way.

use std::f64::consts::FRAC_PI_2;

use nalgebra::{Matrix3, Vector3};
use rand::distr::{Distribution, StandardUniform};
use rand::rngs::StdRng;

use crate::correlation::{CommonLineMatrix, SelfCommonLines};
use crate::geometry::{
    canonical_common_lines, j_conjugate, leading_singular_triplet, matrix_power,
    symmetry_generator,
};
use crate::pairs::ImagePairs;

fn coin(rng: &mut StdRng) -> bool {
    StandardUniform.sample(rng)
}

/// Common-line matrix of every pair, with all n lines per pair.
///
/// The candidates of pair (i, j) are the lines of `Rᵢᵗ·gˢ·Rⱼ` for
/// s = 0, …, n−1, identity element first. With `simulate_j`, each pair's
/// relative rotations are J-conjugated with probability 1/2.
pub fn gt_common_lines(
    rotations: &[Matrix3<f64>],
    n_symm: usize,
    n_theta: usize,
    simulate_j: bool,
    rng: &mut StdRng,
) -> CommonLineMatrix {
    let g = symmetry_generator(n_symm);
    let mut clmatrix = CommonLineMatrix::new(rotations.len());
    for (i, j) in ImagePairs::new(rotations.len()) {
        let conj = simulate_j && coin(rng);
        let pairs = (0..n_symm)
            .map(|s| {
                let rij = rotations[i].transpose() * matrix_power(&g, s) * rotations[j];
                let rij = if conj { j_conjugate(&rij) } else { rij };
                canonical_common_lines(&rij, n_theta)
            })
            .collect();
        clmatrix.set_pair_candidates(i, j, pairs);
    }
    clmatrix
}

/// Self-common-lines of `Rᵢᵗ·g·Rᵢ` for every image.
///
/// With `simulate_j`, each self-relative rotation is J-conjugated with
/// probability 1/2; with `simulate_transpose`, it is then transposed with
/// probability 1/2, reproducing the g / g⁻¹ ambiguity of detection. The
/// second index is reported as the conjugate partner, matching
/// [`crate::correlation::self_common_lines`].
pub fn gt_self_common_lines(
    rotations: &[Matrix3<f64>],
    n_symm: usize,
    n_theta: usize,
    simulate_j: bool,
    simulate_transpose: bool,
    rng: &mut StdRng,
) -> SelfCommonLines {
    let g = symmetry_generator(n_symm);
    let half = n_theta / 2;
    let lines = rotations
        .iter()
        .map(|r| {
            let mut rii = r.transpose() * g * r;
            if simulate_j && coin(rng) {
                rii = j_conjugate(&rii);
            }
            if simulate_transpose && coin(rng) {
                rii = rii.transpose();
            }
            let [l0, l1] = canonical_common_lines(&rii, n_theta);
            [l0, (l1 + half) % n_theta]
        })
        .collect::<Vec<_>>();
    let n = lines.len();
    SelfCommonLines {
        lines,
        scores: vec![1.0; n],
        shifts: vec![0; n],
    }
}

// ── Detection rates ─────────────────────────────────────────────────────────

/// Fraction of outer-product estimates whose axes lie within the angular
/// tolerance of the truth.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionRates {
    pub viis: f64,
    pub vijs: f64,
}

fn axis_angle(a: &Vector3<f64>, b: &Vector3<f64>) -> f64 {
    a.dot(b).abs().min(1.0).acos()
}

/// Worst axis error (radians) of `est` as an estimate of `a·bᵗ`, up to
/// J-conjugation.
///
/// The leading singular vectors of `est` are compared with the unit vectors
/// `a` and `b`. An estimate of the wrong sign, or with no dominant axis,
/// scores π/2.
pub fn outer_product_axis_error(est: &Matrix3<f64>, a: &Vector3<f64>, b: &Vector3<f64>) -> f64 {
    [*est, j_conjugate(est)]
        .iter()
        .filter(|m| a.dot(&(*m * b)) > 0.0)
        .filter_map(leading_singular_triplet)
        .filter(|(sigma, _, _)| *sigma > f64::EPSILON)
        .map(|(_, u, w)| axis_angle(&u, a).max(axis_angle(&w, b)))
        .fold(FRAC_PI_2, f64::min)
}

/// Detection rates of `viis` and `vijs` (canonical pair order) against the
/// third rows of `rotations`, counting an estimate as detected when its
/// axis error is below `tol_deg`.
pub fn detection_rates(
    viis: &[Matrix3<f64>],
    vijs: &[Matrix3<f64>],
    rotations: &[Matrix3<f64>],
    tol_deg: f64,
) -> DetectionRates {
    let tol = tol_deg.to_radians();
    let vs: Vec<Vector3<f64>> = rotations.iter().map(|r| r.row(2).transpose()).collect();
    let ok_ii = viis
        .iter()
        .zip(&vs)
        .filter(|(vii, v)| outer_product_axis_error(vii, v, v) < tol)
        .count();
    let ok_ij = ImagePairs::new(vs.len())
        .zip(vijs)
        .filter(|((i, j), vij)| outer_product_axis_error(vij, &vs[*i], &vs[*j]) < tol)
        .count();
    let rate = |ok: usize, total: usize| {
        if total == 0 {
            0.0
        } else {
            ok as f64 / total as f64
        }
    };
    DetectionRates {
        viis: rate(ok_ii, viis.len()),
        vijs: rate(ok_ij, vijs.len()),
    }
}
