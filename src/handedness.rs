//! Local handedness synchronization for C3 and C4.
//!
//! `Rii`, `Rjj` and `Rij` are each estimated only up to J-conjugation, and
//! `Rii` also up to transposition (g versus g⁻¹). For each pair the eight
//! combinations are tried; with consistent choices
//!
//! ```text
//! C3:  (Rij + Rii·Rij·Rjj + Riiᵗ·Rij·Rjjᵗ) / 3 = Rᵢᵗ·(Σ gˢ / 3)·Rⱼ = vᵢ·vⱼᵗ
//! C4:  (Rij + Rii·Rij·Rjj) / 2                  = Rᵢᵗ·(I + g²)/2·Rⱼ
//! ```
//!
//! is rank one, so the option closest to singular values (1, 0, 0) wins.

use nalgebra::Matrix3;
use tracing::info;

use crate::error::EstimationError;
use crate::geometry::{j_conjugate, matrix_power, mean_matrix, rank1_distance};
use crate::pairs::{n_choose_2, ImagePairs};

/// Synchronized outer-product estimates plus the winner histogram.
#[derive(Debug, Clone, PartialEq)]
pub struct HandednessSync {
    pub viis: Vec<Matrix3<f64>>,
    pub vijs: Vec<Matrix3<f64>>,
    /// How often each of the eight options won.
    pub histogram: [usize; 8],
}

/// `vii = mean_{s<n} Riiˢ`.
pub fn vii_from_self_rotation(rii: &Matrix3<f64>, n_symm: usize) -> Matrix3<f64> {
    let powers: Vec<Matrix3<f64>> = (0..n_symm).map(|s| matrix_power(rii, s)).collect();
    mean_matrix(powers.iter())
}

/// The eight candidate `vij` matrices for one pair.
///
/// Options 0–3 use `Rii` as is, 4–7 its transpose; within each group the
/// (Rii, Rjj) J-conjugation pattern is (none, i, j, both).
pub fn pair_options(
    rii: &Matrix3<f64>,
    rjj: &Matrix3<f64>,
    rij: &Matrix3<f64>,
    n_symm: usize,
) -> [Matrix3<f64>; 8] {
    let rii_j = j_conjugate(rii);
    let rjj_j = j_conjugate(rjj);
    let pairs = [(rii, rjj), (&rii_j, rjj), (rii, &rjj_j), (&rii_j, &rjj_j)];
    let mut opts = [Matrix3::zeros(); 8];
    for (k, (a, b)) in pairs.iter().enumerate() {
        let a_t = a.transpose();
        let b_t = b.transpose();
        if n_symm == 3 {
            opts[k] = (rij + *a * rij * *b + a_t * rij * b_t) / 3.0;
            opts[k + 4] = (rij + a_t * rij * *b + *a * rij * b_t) / 3.0;
        } else {
            opts[k] = (rij + *a * rij * *b) / 2.0;
            opts[k + 4] = (rij + a_t * rij * *b) / 2.0;
        }
    }
    opts
}

/// Synchronize handedness across all pairs.
///
/// `rijs` must hold C(N,2) entries in canonical pair order.
pub fn local_handedness_sync(
    riis: &[Matrix3<f64>],
    rijs: &[Matrix3<f64>],
    n_symm: usize,
) -> Result<HandednessSync, EstimationError> {
    if !matches!(n_symm, 3 | 4) {
        return Err(EstimationError::UnsupportedSymmetry {
            n_symm,
            path: "handedness synchronization",
        });
    }
    let n_images = riis.len();
    let expected = n_choose_2(n_images);
    if rijs.len() != expected {
        return Err(EstimationError::PairCountMismatch {
            n_images,
            expected,
            got: rijs.len(),
        });
    }

    let viis = riis
        .iter()
        .map(|rii| vii_from_self_rotation(rii, n_symm))
        .collect();

    let mut vijs = Vec::with_capacity(expected);
    let mut histogram = [0usize; 8];
    for ((i, j), rij) in ImagePairs::new(n_images).zip(rijs) {
        let opts = pair_options(&riis[i], &riis[j], rij, n_symm);
        let mut best = (f64::INFINITY, 0usize);
        for (k, opt) in opts.iter().enumerate() {
            let score = rank1_distance(opt);
            if score < best.0 {
                best = (score, k);
            }
        }
        histogram[best.1] += 1;
        vijs.push(opts[best.1]);
    }
    info!("Local handedness histogram: {:?}", histogram);

    Ok(HandednessSync {
        viis,
        vijs,
        histogram,
    })
}
