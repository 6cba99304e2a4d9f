//! Cache construction and creation on disk.

use std::path::{Path, PathBuf};

use nalgebra::Matrix3;
use rand::rngs::StdRng;
use rayon::prelude::*;
use tracing::info;

use super::{to_rows, CacheHeader, LineIndexCache, CACHE_MAGIC, CACHE_VERSION};
use crate::candidates::CandidateSet;
use crate::error::EstimationError;
use crate::geometry::{canonical_common_lines, generator_powers};

impl LineIndexCache {
    /// Compute the canonical common-line pair of `R̃ᵢᵗ·Rθ·R̃ⱼ` for every
    /// candidate pair and in-plane rotation.
    pub fn build(candidates: &CandidateSet, n_theta: usize) -> Result<Self, EstimationError> {
        if n_theta % 2 == 1 {
            return Err(EstimationError::OddNTheta(n_theta));
        }
        if n_theta == 0 || n_theta > u16::MAX as usize {
            return Err(EstimationError::InvalidConfig(format!(
                "n_theta must lie in 1..={} for a line-index cache, got {}",
                u16::MAX,
                n_theta
            )));
        }
        let m = candidates.rotations.len();
        let k = candidates.inplane.len();
        info!(
            "Building line-index cache: {} candidates, {} in-plane rotations, n_theta={}",
            m, k, n_theta
        );

        let mut cijs_inds = vec![[0u16; 2]; m * m * k];
        if m > 0 && k > 0 {
            cijs_inds
                .par_chunks_mut(m * k)
                .enumerate()
                .for_each(|(i, row)| {
                    let ri_t = candidates.rotations[i].transpose();
                    for (j, rj) in candidates.rotations.iter().enumerate() {
                        for (t, rtheta) in candidates.inplane.iter().enumerate() {
                            let r = ri_t * rtheta * rj;
                            let [l1, l2] = canonical_common_lines(&r, n_theta);
                            row[j * k + t] = [l1 as u16, l2 as u16];
                        }
                    }
                });
        }

        Ok(Self {
            header: CacheHeader {
                magic: CACHE_MAGIC,
                version: CACHE_VERSION,
                n_candidates: m as u32,
                n_theta: n_theta as u32,
                n_inplane: k as u32,
                inplane_res_deg: candidates.inplane_res_deg,
            },
            cijs_inds,
            candidates: candidates.rotations.iter().map(to_rows).collect(),
            inplane: candidates.inplane.iter().map(to_rows).collect(),
            n_theta: n_theta as u32,
        })
    }
}

/// Canonical self-common-line pairs of every candidate under `gˢ`,
/// s = 1..=⌊(n−1)/2⌋.
///
/// The result is row-major over (candidate, s). Powers above ⌊(n−1)/2⌋
/// repeat the same lines transposed and are skipped.
pub fn self_line_indices(
    candidates: &[Matrix3<f64>],
    n_symm: usize,
    n_theta: usize,
) -> Vec<[usize; 2]> {
    let n_pairs = n_symm.saturating_sub(1) / 2;
    let powers = generator_powers(n_symm);
    let mut out = Vec::with_capacity(candidates.len() * n_pairs);
    for r in candidates {
        for gs in powers.iter().skip(1).take(n_pairs) {
            let rii = r.transpose() * gs * r;
            out.push(canonical_common_lines(&rii, n_theta));
        }
    }
    out
}

/// Deterministic cache file name for a candidate count, sampling and
/// in-plane resolution.
pub fn cache_file_name(n_points: usize, n_theta: usize, inplane_res_deg: f64) -> String {
    format!(
        "cn_cache_points{}_ntheta{}_res{}.rkyv",
        n_points, n_theta, inplane_res_deg
    )
}

/// Generate candidates, build the cache and save it under `base_dir`.
///
/// The file is named after the number of candidates actually generated,
/// which exceeds `n_points` when more ground-truth rotations are supplied.
/// Returns the file path and the cache that was written.
pub fn create_cache(
    base_dir: &Path,
    n_points: usize,
    n_theta: usize,
    inplane_res_deg: f64,
    gt: Option<&[Matrix3<f64>]>,
    rng: &mut StdRng,
) -> anyhow::Result<(PathBuf, LineIndexCache)> {
    info!("Creating line-index cache in {}", base_dir.display());
    let candidates = CandidateSet::generate(n_points, inplane_res_deg, gt, rng);
    let cache = LineIndexCache::build(&candidates, n_theta)?;
    let path = base_dir.join(cache_file_name(candidates.len(), n_theta, inplane_res_deg));
    cache.save_to_file(&path)?;
    Ok((path, cache))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{complete_third_row, rot_z};
    use nalgebra::Vector3;
    use rand::SeedableRng;

    #[test]
    fn test_cache_entries_match_direct_computation() {
        let cands = CandidateSet::generate(5, 45.0, None, &mut StdRng::seed_from_u64(1));
        let cache = LineIndexCache::build(&cands, 72).unwrap();
        assert_eq!(cache.cijs_inds.len(), 5 * 5 * 8);
        for i in 0..5 {
            for j in 0..5 {
                for t in 0..8 {
                    let r = cands.rotations[i].transpose() * cands.inplane[t] * cands.rotations[j];
                    let [l1, l2] = canonical_common_lines(&r, 72);
                    assert_eq!(cache.get(i, j, t), [l1 as u16, l2 as u16]);
                    assert!(l1 < 36);
                }
                assert_eq!(cache.pair_lines(i, j).len(), 8);
            }
        }
    }

    #[test]
    fn test_odd_theta_rejected() {
        let cands = CandidateSet::generate(2, 90.0, None, &mut StdRng::seed_from_u64(1));
        assert_eq!(
            LineIndexCache::build(&cands, 35).unwrap_err(),
            EstimationError::OddNTheta(35)
        );
    }

    #[test]
    fn test_self_line_indices_layout() {
        let rots = vec![
            complete_third_row(&Vector3::new(0.3, 0.4, 0.5).normalize()),
            rot_z(0.2) * complete_third_row(&Vector3::new(-0.6, 0.2, 0.3).normalize()),
        ];
        // C5 and C6 have two self-common-line pairs, C3 and C4 one, C2 none.
        assert_eq!(self_line_indices(&rots, 5, 360).len(), 4);
        assert_eq!(self_line_indices(&rots, 6, 360).len(), 4);
        assert_eq!(self_line_indices(&rots, 3, 360).len(), 2);
        assert_eq!(self_line_indices(&rots, 2, 360).len(), 0);
        for pair in self_line_indices(&rots, 7, 360) {
            assert!(pair[0] < 180 && pair[1] < 360);
        }
    }

    #[test]
    fn test_created_file_named_after_candidate_count() {
        let dir = tempfile::tempdir().unwrap();
        let gt = vec![
            complete_third_row(&Vector3::new(0.3, 0.4, 0.5).normalize()),
            complete_third_row(&Vector3::new(-0.6, 0.2, 0.3).normalize()),
            complete_third_row(&Vector3::new(0.1, -0.7, 0.4).normalize()),
        ];
        let mut rng = StdRng::seed_from_u64(9);
        let (path, cache) = create_cache(dir.path(), 2, 36, 90.0, Some(&gt), &mut rng).unwrap();
        assert_eq!(cache.n_candidates(), 3);
        assert_eq!(
            path.file_name().and_then(|s| s.to_str()),
            Some("cn_cache_points3_ntheta36_res90.rkyv")
        );
        assert!(path.exists());
    }

    #[test]
    fn test_file_name() {
        assert_eq!(
            cache_file_name(1000, 360, 1.0),
            "cn_cache_points1000_ntheta360_res1.rkyv"
        );
        assert_eq!(
            cache_file_name(50, 360, 0.5),
            "cn_cache_points50_ntheta360_res0.5.rkyv"
        );
    }
}
