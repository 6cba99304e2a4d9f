//! Candidate rotations for the voting path.
//!
//! A candidate is a rotation modulo in-plane rotation: only its third row
//! (the symmetry axis in the image frame) matters, and it is completed to a
//! full rotation with [`complete_third_row`]. The in-plane part between two
//! images is searched separately over a bank of rotations about +Z.

use nalgebra::{Matrix3, Vector3};
use rand::rngs::StdRng;
use rand_distr::{Distribution, StandardNormal};

use crate::geometry::{complete_third_row, rot_z};

/// Candidate rotations (`Ris_tilde`) plus the in-plane bank (`R_theta_ijs`).
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateSet {
    /// Candidate rotations, one per sphere point.
    pub rotations: Vec<Matrix3<f64>>,
    /// In-plane rotations Rz(θ) for θ = 0, res, 2·res, … < 360°.
    pub inplane: Vec<Matrix3<f64>>,
    /// In-plane resolution in degrees.
    pub inplane_res_deg: f64,
}

impl CandidateSet {
    /// Generate `n_points` candidates at in-plane resolution
    /// `inplane_res_deg`.
    ///
    /// When ground-truth rotations are supplied their third rows come first
    /// and only the remainder is drawn at random, so the set holds
    /// `max(n_points, gt.len())` candidates.
    pub fn generate(
        n_points: usize,
        inplane_res_deg: f64,
        gt: Option<&[Matrix3<f64>]>,
        rng: &mut StdRng,
    ) -> Self {
        let rotations = candidate_third_rows(n_points, gt, rng)
            .iter()
            .map(complete_third_row)
            .collect();
        Self {
            rotations,
            inplane: inplane_rotations(inplane_res_deg),
            inplane_res_deg,
        }
    }

    pub fn len(&self) -> usize {
        self.rotations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rotations.is_empty()
    }

    /// Which candidates view the molecule within `tol_deg` of its equator.
    pub fn equator_flags(&self, tol_deg: f64) -> Vec<bool> {
        let tol = tol_deg.to_radians();
        self.rotations
            .iter()
            .map(|r| is_equatorial(r, tol))
            .collect()
    }
}

/// Unit third rows: ground truth first, then standard-normal draws
/// normalized onto the sphere.
pub fn candidate_third_rows(
    n_points: usize,
    gt: Option<&[Matrix3<f64>]>,
    rng: &mut StdRng,
) -> Vec<Vector3<f64>> {
    let mut rows: Vec<Vector3<f64>> = gt
        .unwrap_or_default()
        .iter()
        .map(|r| r.row(2).transpose())
        .collect();
    while rows.len() < n_points {
        let v: Vector3<f64> = Vector3::new(
            StandardNormal.sample(rng),
            StandardNormal.sample(rng),
            StandardNormal.sample(rng),
        );
        let norm = v.norm();
        if norm > 0.0 {
            rows.push(v / norm);
        }
    }
    rows
}

/// In-plane rotations Rz(θ), θ = 0, res, 2·res, … strictly below 360°.
pub fn inplane_rotations(res_deg: f64) -> Vec<Matrix3<f64>> {
    let n = (360.0 / res_deg - 1e-9).ceil().max(1.0) as usize;
    (0..n)
        .map(|k| rot_z((k as f64 * res_deg).to_radians()))
        .collect()
}

/// `|acos(R[2,2]) − π/2| < tol`: the viewing direction lies near the
/// equator of the symmetry axis.
#[inline]
pub fn is_equatorial(r: &Matrix3<f64>, tol_rad: f64) -> bool {
    (r[(2, 2)].clamp(-1.0, 1.0).acos() - std::f64::consts::FRAC_PI_2).abs() < tol_rad
}
