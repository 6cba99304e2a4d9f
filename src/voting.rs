//! Candidate voting for general Cn (n ≥ 5).
//!
//! Every image pair is matched against every pair of candidate rotations and
//! every in-plane rotation between them. A match is scored by how well the
//! images agree along all n common lines that the candidate geometry
//! predicts, weighted by how well each image agrees with its own predicted
//! self-common-lines. The best match gives `vᵢ·vⱼᵗ` directly, since for any
//! candidate `R̃` the mean `Σ_s R̃ᵢᵗ·gˢ·Rθ·R̃ⱼ / n` is the outer product of
//! the two candidate third rows.

use nalgebra::Matrix3;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::cache::{self_line_indices, LineIndexCache};
use crate::config::SymmetryConfig;
use crate::correlation::{pairwise_grid, self_grid, ShiftPhaseBank};
use crate::error::EstimationError;
use crate::geometry::{generator_powers, mean_matrix, rank1_distance};
use crate::pairs::pair_list;
use crate::polar::{PolarStack, RayBank};

/// Winning candidate assignment for one image pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairChoice {
    pub i: usize,
    pub j: usize,
    /// Index of the candidate chosen for image i.
    pub cand_i: usize,
    /// Index of the candidate chosen for image j.
    pub cand_j: usize,
    /// Index into the in-plane bank.
    pub inplane: usize,
    /// Combined pairwise × self score of the winner.
    pub score: f64,
}

/// Output of [`estimate_cn`].
#[derive(Debug, Clone)]
pub struct VotingOutput {
    pub viis: Vec<Matrix3<f64>>,
    pub vijs: Vec<Matrix3<f64>>,
    /// Per-pair winners, in canonical pair order.
    pub choices: Vec<PairChoice>,
    /// Self-common-line score of every (image, candidate).
    pub self_scores: Vec<Vec<f64>>,
}

/// Self-common-line likelihood of every candidate for one image.
///
/// Mean over the candidate's ⌊(n−1)/2⌋ self-common-line pairs of the best
/// score over shifts. Equatorial candidates score zero.
fn self_scores_for_image(
    shifted: &RayBank,
    rays: &RayBank,
    scls: &[[usize; 2]],
    n_pairs: usize,
    equator: &[bool],
) -> Vec<f64> {
    let grid = self_grid(shifted, rays);
    equator
        .iter()
        .enumerate()
        .map(|(c, &is_eq)| {
            if is_eq {
                return 0.0;
            }
            if n_pairs == 0 {
                return 1.0;
            }
            let lines = &scls[c * n_pairs..(c + 1) * n_pairs];
            lines
                .iter()
                .map(|&[l1, l2]| grid.max_over_shifts(l1, l2))
                .sum::<f64>()
                / n_pairs as f64
        })
        .collect()
}

/// Best (candidate i, candidate j, in-plane) for one image pair.
#[allow(clippy::too_many_arguments)]
fn best_match(
    i: usize,
    j: usize,
    shifted_i: &RayBank,
    rays_j: &RayBank,
    cache: &LineIndexCache,
    n_symm: usize,
    n_kept: usize,
    self_i: &[f64],
    self_j: &[f64],
) -> PairChoice {
    let grid = pairwise_grid(shifted_i, rays_j);
    let m = cache.n_candidates();
    let group = n_kept / n_symm;
    let mut best = PairChoice {
        i,
        j,
        cand_i: 0,
        cand_j: 0,
        inplane: 0,
        score: f64::NEG_INFINITY,
    };
    for ci in 0..m {
        for cj in 0..m {
            let lines = cache.pair_lines(ci, cj);
            let mut best_t = (f64::NEG_INFINITY, 0usize);
            for t in 0..group {
                let mut sum = 0.0;
                for s in 0..n_symm {
                    let [l1, l2] = lines[s * group + t];
                    sum += grid.get(l1 as usize, l2 as usize);
                }
                let mean = sum / n_symm as f64;
                if mean > best_t.0 {
                    best_t = (mean, t);
                }
            }
            let score = best_t.0 * self_i[ci] * self_j[cj];
            if score > best.score {
                best.cand_i = ci;
                best.cand_j = cj;
                best.inplane = best_t.1;
                best.score = score;
            }
        }
    }
    best
}

/// Estimate `viis` and `vijs` for a Cn molecule by candidate voting.
///
/// The cache must have been built for the images' angular sampling. When the
/// number of in-plane rotations is not a multiple of n the excess is dropped.
pub fn estimate_cn(
    stack: &PolarStack,
    cache: &LineIndexCache,
    config: &SymmetryConfig,
) -> Result<VotingOutput, EstimationError> {
    config.validate()?;
    let n_theta = stack.n_theta();
    if n_theta % 2 == 1 {
        return Err(EstimationError::OddNTheta(n_theta));
    }
    cache.validate_for(n_theta)?;
    let n_symm = config.n_symm;
    let n_images = stack.len();
    let candidates = cache.candidate_rotations();
    let inplane = cache.inplane_rotations();
    let m = candidates.len();

    let n_inplane = inplane.len();
    let n_kept = (n_inplane / n_symm) * n_symm;
    if n_kept == 0 {
        return Err(EstimationError::InvalidConfig(format!(
            "{} in-plane rotations cannot be split into {} symmetric groups",
            n_inplane, n_symm
        )));
    }
    if n_kept < n_inplane {
        warn!(
            "number of in-plane rotations ({}) must be divisible by n_symm ({}); keeping {}",
            n_inplane, n_symm, n_kept
        );
    }

    let bank = ShiftPhaseBank::new(stack.n_r(), config.max_shift_1d(), config.shift_step);
    info!(
        "Candidate voting: C{}, {} images, {} candidates, {} in-plane rotations, {} shifts",
        n_symm,
        n_images,
        m,
        n_kept,
        bank.len()
    );

    // Step 1: self-common-line likelihood per image and candidate.
    let n_pairs = n_symm.saturating_sub(1) / 2;
    let scls = self_line_indices(&candidates, n_symm, n_theta);
    let tol = config.equator_tol_deg.to_radians();
    let equator: Vec<bool> = candidates
        .iter()
        .map(|r| crate::candidates::is_equatorial(r, tol))
        .collect();
    let rays: Vec<RayBank> = (0..n_images)
        .into_par_iter()
        .map(|i| stack.normalized_rays(i))
        .collect();
    let shifted: Vec<RayBank> = (0..n_images)
        .into_par_iter()
        .map(|i| bank.shifted_half_rays(stack.image(i)))
        .collect();
    let self_scores: Vec<Vec<f64>> = (0..n_images)
        .into_par_iter()
        .map(|i| self_scores_for_image(&shifted[i], &rays[i], &scls, n_pairs, &equator))
        .collect();

    // Step 2: pairwise likelihood combined with the self likelihoods.
    info!("Computing pairwise likelihood");
    let choices: Vec<PairChoice> = pair_list(n_images)
        .into_par_iter()
        .map(|(i, j)| {
            let choice = best_match(
                i,
                j,
                &shifted[i],
                &rays[j],
                cache,
                n_symm,
                n_kept,
                &self_scores[i],
                &self_scores[j],
            );
            debug!(
                "pair ({}, {}): candidates ({}, {}), in-plane {}, score {:.4}",
                i, j, choice.cand_i, choice.cand_j, choice.inplane, choice.score
            );
            choice
        })
        .collect();

    // Step 3: reduce into viis / vijs in pair order.
    let powers = generator_powers(n_symm);
    let mut viis = vec![Matrix3::zeros(); n_images];
    let mut best_norm = vec![f64::INFINITY; n_images];
    let mut vijs = Vec::with_capacity(choices.len());
    for choice in &choices {
        let ri = &candidates[choice.cand_i];
        let rj = &candidates[choice.cand_j];
        let rtheta = &inplane[choice.inplane];

        for (img, r) in [(choice.i, ri), (choice.j, rj)] {
            let terms: Vec<Matrix3<f64>> = powers.iter().map(|g| r.transpose() * g * r).collect();
            let vii = mean_matrix(terms.iter());
            let dist = rank1_distance(&vii);
            if dist < best_norm[img] {
                best_norm[img] = dist;
                viis[img] = vii;
            }
        }

        let terms: Vec<Matrix3<f64>> = powers
            .iter()
            .map(|g| ri.transpose() * g * rtheta * rj)
            .collect();
        vijs.push(mean_matrix(terms.iter()));
    }

    Ok(VotingOutput {
        viis,
        vijs,
        choices,
        self_scores,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidates::CandidateSet;
    use crate::geometry::{complete_third_row, rot_z};
    use nalgebra::Vector3;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_theta_mismatch_is_fatal() {
        let cands = CandidateSet::generate(4, 72.0, None, &mut StdRng::seed_from_u64(0));
        let cache = LineIndexCache::build(&cands, 36).unwrap();
        let stack = PolarStack::from_point_density(
            &[Vector3::new(0.2, 0.1, 0.3)],
            &[Matrix3::identity(), rot_z(0.5)],
            72,
            8,
            0.25,
        )
        .unwrap();
        let config = SymmetryConfig::new(5, 72, 8);
        assert_eq!(
            estimate_cn(&stack, &cache, &config).unwrap_err(),
            EstimationError::CacheThetaMismatch {
                cache: 36,
                images: 72
            }
        );
    }

    #[test]
    fn test_too_few_inplane_rotations() {
        // 180° resolution gives two in-plane rotations, fewer than n = 5.
        let cands = CandidateSet::generate(3, 180.0, None, &mut StdRng::seed_from_u64(0));
        let cache = LineIndexCache::build(&cands, 36).unwrap();
        let rots = vec![
            complete_third_row(&Vector3::new(0.3, 0.2, 0.9).normalize()),
            complete_third_row(&Vector3::new(-0.3, 0.5, 0.6).normalize()),
        ];
        let stack =
            PolarStack::from_point_density(&[Vector3::new(0.2, 0.1, 0.3)], &rots, 36, 8, 0.25)
                .unwrap();
        let config = SymmetryConfig::new(5, 36, 8);
        assert!(matches!(
            estimate_cn(&stack, &cache, &config),
            Err(EstimationError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_outputs_are_rank1_outer_products() {
        let n_theta = 72;
        let rots = vec![
            complete_third_row(&Vector3::new(0.3, 0.2, 0.9).normalize()),
            rot_z(0.3) * complete_third_row(&Vector3::new(-0.3, 0.5, 0.6).normalize()),
            rot_z(1.1) * complete_third_row(&Vector3::new(0.6, -0.4, -0.5).normalize()),
        ];
        let points = vec![Vector3::new(0.4, 0.1, 0.3), Vector3::new(-0.2, 0.5, -0.1)];
        let stack = PolarStack::from_point_density(&points, &rots, n_theta, 8, 0.25).unwrap();
        let cands = CandidateSet::generate(6, 72.0, Some(&rots), &mut StdRng::seed_from_u64(2));
        let cache = LineIndexCache::build(&cands, n_theta).unwrap();
        let config = SymmetryConfig {
            max_shift: 0.0,
            ..SymmetryConfig::new(5, n_theta, 8)
        };
        let out = estimate_cn(&stack, &cache, &config).unwrap();
        assert_eq!(out.vijs.len(), 3);
        assert_eq!(out.choices.len(), 3);
        assert_eq!(out.self_scores.len(), 3);
        for v in out.viis.iter().chain(out.vijs.iter()) {
            assert!(rank1_distance(v) < 1e-9);
        }
    }
}
