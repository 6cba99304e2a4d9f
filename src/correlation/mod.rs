//! Ray correlation between and within polar Fourier images.
//!
//! All correlations use normalized rays (DC removed, unit norm). Only the
//! first `n_theta/2` rays of the reference image are shifted; they are
//! compared against every ray of the partner, so each geometric line is
//! tested once per orientation.
//!
//! Two views of a Cn molecule share n common lines, one per group element.
//! [`common_lines`] keeps the n strongest separated peaks of each pair; the
//! strongest is the pair's common line proper.
//!
//! - [`common_lines`]: best common line for every image pair
//! - [`self_common_lines`]: best self-common-line pair per image (C3/C4)
//! - [`pairwise_grid`] / [`self_grid`]: full score grids used by the
//!   candidate voting path

pub mod shift;

pub use shift::ShiftPhaseBank;

use rayon::prelude::*;
use tracing::{debug, info};

use crate::config::SymmetryConfig;
use crate::error::EstimationError;
use crate::pairs::pair_list;
use crate::polar::{PolarStack, RayBank};
use crate::Complex64;

/// `Re Σ a·conj(b)`
#[inline]
fn corr_conj(a: &[Complex64], b: &[Complex64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x.re * y.re + x.im * y.im).sum()
}

/// `Re Σ a·b`
#[inline]
fn corr_plain(a: &[Complex64], b: &[Complex64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x.re * y.re - x.im * y.im).sum()
}

/// Peaks closer than this (degrees, in both lines) are the same peak.
const PEAK_EXCLUSION_DEG: f64 = 5.0;

fn check_even(n_theta: usize) -> Result<(), EstimationError> {
    if n_theta % 2 == 1 {
        return Err(EstimationError::OddNTheta(n_theta));
    }
    Ok(())
}

fn circular_diff(a: usize, b: usize, n: usize) -> usize {
    let d = a.abs_diff(b) % n;
    d.min(n - d)
}

/// Angular distance in bins between two line pairs, taking the fold
/// `(l1, l2) ~ (l1 + n/2, l2 + n/2)` into account.
fn line_pair_distance(a: [usize; 2], b: [usize; 2], n_theta: usize) -> usize {
    let half = n_theta / 2;
    let direct = circular_diff(a[0], b[0], n_theta).max(circular_diff(a[1], b[1], n_theta));
    let folded = circular_diff(a[0] + half, b[0], n_theta)
        .max(circular_diff(a[1] + half, b[1], n_theta));
    direct.min(folded)
}

fn peak_exclusion_bins(n_theta: usize) -> usize {
    ((PEAK_EXCLUSION_DEG * n_theta as f64 / 360.0).round() as usize).max(1)
}

// ── Common-line matrix ──────────────────────────────────────────────────────

/// N×N common-line indices plus the winning score and shift per pair.
///
/// Entry (i, j) is the angular index in image i of its common line with
/// image j. The diagonal is undefined. Each pair may also carry further
/// candidate line pairs (the other common lines of a symmetric molecule).
#[derive(Debug, Clone, PartialEq)]
pub struct CommonLineMatrix {
    n_images: usize,
    lines: Vec<Option<usize>>,
    scores: Vec<f64>,
    shifts: Vec<usize>,
    /// Candidates of pair (lo, hi) at `lo·N + hi`, as `[l_lo, l_hi]`.
    candidates: Vec<Vec<[usize; 2]>>,
}

impl CommonLineMatrix {
    /// An N×N matrix with every entry undefined.
    pub fn new(n_images: usize) -> Self {
        Self {
            n_images,
            lines: vec![None; n_images * n_images],
            scores: vec![0.0; n_images * n_images],
            shifts: vec![0; n_images * n_images],
            candidates: vec![Vec::new(); n_images * n_images],
        }
    }

    pub fn n_images(&self) -> usize {
        self.n_images
    }

    /// Index of the common line with image j, in image i.
    #[inline]
    pub fn get(&self, i: usize, j: usize) -> Option<usize> {
        self.lines[i * self.n_images + j]
    }

    /// Record the line pair `[l_i, l_j]` for images i and j as their only
    /// candidate.
    pub fn set_pair(&mut self, i: usize, j: usize, pair: [usize; 2]) {
        self.set_pair_candidates(i, j, vec![pair]);
    }

    /// Record several candidate line pairs `[l_i, l_j]`, strongest first.
    /// The first one becomes entry (i, j) / (j, i). An empty list leaves the
    /// pair undefined.
    pub fn set_pair_candidates(&mut self, i: usize, j: usize, pairs: Vec<[usize; 2]>) {
        let Some(&[li, lj]) = pairs.first() else {
            return;
        };
        self.lines[i * self.n_images + j] = Some(li);
        self.lines[j * self.n_images + i] = Some(lj);
        let (lo, hi, oriented) = if i < j {
            (i, j, pairs)
        } else {
            (j, i, pairs.into_iter().map(|[a, b]| [b, a]).collect())
        };
        self.candidates[lo * self.n_images + hi] = oriented;
    }

    /// Candidate line pairs of images i and j as `[l_i, l_j]`, strongest
    /// first. Empty for an undefined pair.
    pub fn line_candidates(&self, i: usize, j: usize) -> impl Iterator<Item = [usize; 2]> + '_ {
        let swap = i > j;
        let (lo, hi) = if swap { (j, i) } else { (i, j) };
        self.candidates[lo * self.n_images + hi]
            .iter()
            .map(move |&[a, b]| if swap { [b, a] } else { [a, b] })
    }

    /// Winning correlation score of pair (i, j).
    pub fn score(&self, i: usize, j: usize) -> f64 {
        self.scores[i * self.n_images + j]
    }

    /// Index into the [`ShiftPhaseBank`] of the winning shift of pair (i, j).
    pub fn shift_index(&self, i: usize, j: usize) -> usize {
        self.shifts[i * self.n_images + j]
    }

    fn set_stats(&mut self, i: usize, j: usize, score: f64, shift: usize) {
        for idx in [i * self.n_images + j, j * self.n_images + i] {
            self.scores[idx] = score;
            self.shifts[idx] = shift;
        }
    }
}

/// Self-common-line pair per image plus the winning score and shift.
///
/// `lines[i] = [l0, l1]` with `l0 < n_theta/2`; ray `l0` matches the
/// *conjugate* of ray `l1`.
#[derive(Debug, Clone, PartialEq)]
pub struct SelfCommonLines {
    pub lines: Vec<[usize; 2]>,
    pub scores: Vec<f64>,
    pub shifts: Vec<usize>,
}

impl SelfCommonLines {
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Best-scoring common lines for every image pair.
///
/// For each pair the search runs over every shift, every ray of the first
/// half of image i and every ray of image j. The `config.n_symm` strongest
/// peaks at least 5° apart are kept as candidates; the strongest one sets
/// the matrix entry, its score and its shift.
pub fn common_lines(
    stack: &PolarStack,
    config: &SymmetryConfig,
) -> Result<CommonLineMatrix, EstimationError> {
    let n_theta = stack.n_theta();
    check_even(n_theta)?;
    let bank = ShiftPhaseBank::new(stack.n_r(), config.max_shift_1d(), config.shift_step);
    let n_images = stack.len();
    let n_peaks = config.n_symm.max(1);
    let exclusion = peak_exclusion_bins(n_theta);
    info!(
        "Detecting common lines: {} images, {} shifts, {} peaks per pair",
        n_images,
        bank.len(),
        n_peaks
    );

    let rays: Vec<RayBank> = (0..n_images)
        .into_par_iter()
        .map(|i| stack.normalized_rays(i))
        .collect();
    let shifted: Vec<RayBank> = (0..n_images)
        .into_par_iter()
        .map(|i| bank.shifted_half_rays(stack.image(i)))
        .collect();

    let results: Vec<(usize, usize, Vec<[usize; 2]>, f64, usize)> = pair_list(n_images)
        .into_par_iter()
        .map(|(i, j)| {
            let grid = pairwise_grid(&shifted[i], &rays[j]);
            let peaks = grid.peaks(n_peaks, exclusion);
            let (score, shift) = match peaks.first() {
                Some(&([l1, l2], score)) => (score, grid.shift_index(l1, l2)),
                None => (f64::NEG_INFINITY, 0),
            };
            debug!("common lines ({}, {}): {:?} best score {:.4}", i, j, peaks, score);
            (i, j, peaks.into_iter().map(|(pair, _)| pair).collect(), score, shift)
        })
        .collect();

    let mut clmatrix = CommonLineMatrix::new(n_images);
    for (i, j, pairs, score, shift) in results {
        clmatrix.set_pair_candidates(i, j, pairs);
        clmatrix.set_stats(i, j, score, shift);
    }
    Ok(clmatrix)
}

/// Whether the unsigned angle between rays `l1` and `l2` lies strictly
/// inside `bounds` (radians).
fn allowed_self_pair(l1: usize, l2: usize, n_theta: usize, bounds: (f64, f64)) -> bool {
    let diff = (l1 as f64 - l2 as f64) * std::f64::consts::TAU / n_theta as f64;
    let unsigned = diff.cos().clamp(-1.0, 1.0).acos();
    bounds.0 < unsigned && unsigned < bounds.1
}

/// Best self-common-line pair per image for C3 and C4 molecules.
///
/// The two self-common-lines of a Cn image are conjugate-equal, so rays are
/// correlated without conjugation. Pairs whose unsigned angular separation
/// falls outside [`SymmetryConfig::self_line_bounds_rad`] are never
/// considered; antipodal rays would otherwise always win.
pub fn self_common_lines(
    stack: &PolarStack,
    config: &SymmetryConfig,
) -> Result<SelfCommonLines, EstimationError> {
    let n_theta = stack.n_theta();
    check_even(n_theta)?;
    if !matches!(config.n_symm, 3 | 4) {
        return Err(EstimationError::UnsupportedSymmetry {
            n_symm: config.n_symm,
            path: "self-common-line",
        });
    }
    let bounds = config.self_line_bounds_rad()?;
    let half = n_theta / 2;
    let bank = ShiftPhaseBank::new(stack.n_r(), config.max_shift_1d(), config.shift_step);
    info!(
        "Detecting self common lines: {} images, C{}",
        stack.len(),
        config.n_symm
    );

    let mask: Vec<bool> = (0..half)
        .flat_map(|l1| (0..n_theta).map(move |l2| allowed_self_pair(l1, l2, n_theta, bounds)))
        .collect();

    let results: Vec<([usize; 2], f64, usize)> = (0..stack.len())
        .into_par_iter()
        .map(|i| {
            let rays = stack.normalized_rays(i);
            let shifted = bank.shifted_half_rays(stack.image(i));
            let mut best = (f64::NEG_INFINITY, 0usize, 0usize, 0usize);
            for s in 0..bank.len() {
                for l1 in 0..half {
                    let a = shifted.ray(s * half + l1);
                    for l2 in 0..n_theta {
                        if !mask[l1 * n_theta + l2] {
                            continue;
                        }
                        let c = corr_plain(a, rays.ray(l2));
                        if c > best.0 {
                            best = (c, s, l1, l2);
                        }
                    }
                }
            }
            ([best.2, best.3], best.0, best.1)
        })
        .collect();

    let mut out = SelfCommonLines {
        lines: Vec::with_capacity(results.len()),
        scores: Vec::with_capacity(results.len()),
        shifts: Vec::with_capacity(results.len()),
    };
    for (pair, score, shift) in results {
        out.lines.push(pair);
        out.scores.push(score);
        out.shifts.push(shift);
    }
    Ok(out)
}

// ── Correlation grids ───────────────────────────────────────────────────────

/// `(n_theta/2) × n_theta` pairwise scores, maximized over shifts.
#[derive(Debug, Clone)]
pub struct PairwiseGrid {
    n_theta: usize,
    data: Vec<f64>,
    shifts: Vec<usize>,
}

impl PairwiseGrid {
    #[inline]
    pub fn get(&self, l1: usize, l2: usize) -> f64 {
        self.data[l1 * self.n_theta + l2]
    }

    /// Index of the shift that produced `get(l1, l2)`.
    pub fn shift_index(&self, l1: usize, l2: usize) -> usize {
        self.shifts[l1 * self.n_theta + l2]
    }

    /// Up to `count` local maxima, strongest first. Each peak suppresses
    /// every line pair within `exclusion` bins of it (fold included).
    pub fn peaks(&self, count: usize, exclusion: usize) -> Vec<([usize; 2], f64)> {
        let half = self.n_theta / 2;
        let mut found: Vec<([usize; 2], f64)> = Vec::with_capacity(count);
        while found.len() < count {
            let mut best: Option<([usize; 2], f64)> = None;
            for l1 in 0..half {
                for l2 in 0..self.n_theta {
                    let score = self.get(l1, l2);
                    if best.is_some_and(|(_, b)| score <= b) {
                        continue;
                    }
                    let pair = [l1, l2];
                    if found
                        .iter()
                        .any(|(p, _)| line_pair_distance(*p, pair, self.n_theta) <= exclusion)
                    {
                        continue;
                    }
                    best = Some((pair, score));
                }
            }
            match best {
                Some(peak) => found.push(peak),
                None => break,
            }
        }
        found
    }
}

/// Pairwise grid between the shifted half-rays of image i and all rays of
/// image j.
pub fn pairwise_grid(shifted_i: &RayBank, rays_j: &RayBank) -> PairwiseGrid {
    let n_theta = rays_j.len();
    let half = n_theta / 2;
    let n_shifts = shifted_i.len() / half.max(1);
    let mut data = vec![f64::NEG_INFINITY; half * n_theta];
    let mut shifts = vec![0usize; half * n_theta];
    for s in 0..n_shifts {
        for l1 in 0..half {
            let a = shifted_i.ray(s * half + l1);
            let row = l1 * n_theta..(l1 + 1) * n_theta;
            for (l2, (best, shift)) in data[row.clone()]
                .iter_mut()
                .zip(&mut shifts[row])
                .enumerate()
            {
                let c = corr_conj(a, rays_j.ray(l2));
                if c > *best {
                    *best = c;
                    *shift = s;
                }
            }
        }
    }
    PairwiseGrid {
        n_theta,
        data,
        shifts,
    }
}

/// `n_shifts × (n_theta/2) × n_theta` self-correlation scores of one image.
#[derive(Debug, Clone)]
pub struct SelfGrid {
    n_shifts: usize,
    half: usize,
    n_theta: usize,
    data: Vec<f64>,
}

impl SelfGrid {
    pub fn n_shifts(&self) -> usize {
        self.n_shifts
    }

    #[inline]
    pub fn get(&self, shift: usize, l1: usize, l2: usize) -> f64 {
        self.data[(shift * self.half + l1) * self.n_theta + l2]
    }

    /// Best score over shifts for the line pair `(l1, l2)`.
    pub fn max_over_shifts(&self, l1: usize, l2: usize) -> f64 {
        (0..self.n_shifts)
            .map(|s| self.get(s, l1, l2))
            .fold(f64::NEG_INFINITY, f64::max)
    }
}

/// Self grid of an image: shifted half-rays against the image's own rays,
/// with conjugation (the line pairs it is indexed with are equal rays).
pub fn self_grid(shifted: &RayBank, rays: &RayBank) -> SelfGrid {
    let n_theta = rays.len();
    let half = n_theta / 2;
    let n_shifts = shifted.len() / half.max(1);
    let mut data = Vec::with_capacity(shifted.len() * n_theta);
    for idx in 0..shifted.len() {
        let a = shifted.ray(idx);
        data.extend((0..n_theta).map(|l2| corr_conj(a, rays.ray(l2))));
    }
    SelfGrid {
        n_shifts,
        half,
        n_theta,
        data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{canonical_common_lines, complete_third_row, rot_z};
    use nalgebra::{DMatrix, Matrix3, Vector3};

    /// Twelve atoms: enough structure that the correlation ridge around
    /// each common line is narrower than a degree or two.
    fn molecule() -> Vec<Vector3<f64>> {
        vec![
            Vector3::new(0.61, -0.22, 0.35),
            Vector3::new(-0.18, 0.74, -0.41),
            Vector3::new(0.05, -0.57, -0.68),
            Vector3::new(-0.52, -0.31, 0.27),
            Vector3::new(0.33, 0.48, 0.52),
            Vector3::new(-0.71, 0.12, -0.23),
            Vector3::new(0.44, -0.63, 0.08),
            Vector3::new(0.17, 0.29, -0.83),
            Vector3::new(-0.36, -0.72, -0.19),
            Vector3::new(0.79, 0.21, -0.34),
            Vector3::new(-0.09, 0.55, 0.66),
            Vector3::new(-0.62, 0.44, 0.31),
        ]
    }

    fn views() -> Vec<Matrix3<f64>> {
        vec![
            rot_z(0.4) * complete_third_row(&Vector3::new(0.3, 0.5, 0.6).normalize()),
            rot_z(-1.1) * complete_third_row(&Vector3::new(-0.7, 0.2, 0.45).normalize()),
            rot_z(2.3) * complete_third_row(&Vector3::new(0.1, -0.8, -0.5).normalize()),
        ]
    }

    fn circ_diff(a: usize, b: usize, n: usize) -> usize {
        let d = a.abs_diff(b) % n;
        d.min(n - d)
    }

    #[test]
    fn test_odd_n_theta_rejected() {
        let stack = PolarStack::new(vec![DMatrix::zeros(7, 4), DMatrix::zeros(7, 4)]).unwrap();
        let config = SymmetryConfig::new(3, 7, 4);
        assert_eq!(
            common_lines(&stack, &config).unwrap_err(),
            EstimationError::OddNTheta(7)
        );
        assert_eq!(
            self_common_lines(&stack, &config).unwrap_err(),
            EstimationError::OddNTheta(7)
        );
    }

    #[test]
    fn test_self_lines_reject_other_orders() {
        let stack = PolarStack::new(vec![DMatrix::zeros(8, 4)]).unwrap();
        let config = SymmetryConfig::new(5, 8, 4);
        assert!(matches!(
            self_common_lines(&stack, &config),
            Err(EstimationError::UnsupportedSymmetry { n_symm: 5, .. })
        ));
    }

    #[test]
    fn test_common_lines_asymmetric_molecule() {
        let n_theta = 360;
        let rots = views();
        let stack = PolarStack::from_point_density(&molecule(), &rots, n_theta, 32, 0.2).unwrap();
        let config = SymmetryConfig {
            max_shift: 0.0,
            ..SymmetryConfig::new(1, n_theta, 32)
        };
        let clmatrix = common_lines(&stack, &config).unwrap();
        for (i, j) in pair_list(rots.len()) {
            let truth = canonical_common_lines(&(rots[i].transpose() * rots[j]), n_theta);
            let found = [clmatrix.get(i, j).unwrap(), clmatrix.get(j, i).unwrap()];
            let direct = circ_diff(found[0], truth[0], n_theta) <= 2
                && circ_diff(found[1], truth[1], n_theta) <= 2;
            let folded = circ_diff(found[0] + n_theta / 2, truth[0], n_theta) <= 2
                && circ_diff(found[1] + n_theta / 2, truth[1], n_theta) <= 2;
            assert!(direct || folded, "pair ({i},{j}): found {found:?}, truth {truth:?}");
            assert!(clmatrix.score(i, j) > 0.8);
            assert_eq!(clmatrix.shift_index(i, j), 0);
        }
        assert_eq!(clmatrix.get(1, 1), None);
    }

    #[test]
    fn test_grid_peak_matches_common_line() {
        let n_theta = 240;
        let rots = views();
        let stack = PolarStack::from_point_density(&molecule(), &rots, n_theta, 32, 0.2).unwrap();
        let bank = ShiftPhaseBank::new(32, 2.0, 1.0);
        let shifted = bank.shifted_half_rays(stack.image(0));
        let rays = stack.normalized_rays(1);
        let grid = pairwise_grid(&shifted, &rays);
        let truth = canonical_common_lines(&(rots[0].transpose() * rots[1]), n_theta);
        assert!(grid.get(truth[0], truth[1]) > 0.7);

        // The self grid of an image against itself peaks on the diagonal at zero shift.
        let self_rays = stack.normalized_rays(0);
        let sgrid = self_grid(&shifted, &self_rays);
        assert_eq!(sgrid.n_shifts(), bank.len());
        let zero_shift = bank.len() / 2;
        assert!((sgrid.get(zero_shift, 5, 5) - 1.0).abs() < 1e-9);
        assert!(sgrid.max_over_shifts(5, 5) >= sgrid.get(zero_shift, 5, 5));
    }

    #[test]
    fn test_common_lines_keep_one_candidate_per_group_element() {
        let n_theta = 360;
        let rots = views();
        let stack = PolarStack::from_point_density(&molecule(), &rots, n_theta, 32, 0.2).unwrap();
        let config = SymmetryConfig {
            max_shift: 0.0,
            ..SymmetryConfig::new(3, n_theta, 32)
        };
        let clmatrix = common_lines(&stack, &config).unwrap();
        for (i, j) in pair_list(rots.len()) {
            let fwd: Vec<[usize; 2]> = clmatrix.line_candidates(i, j).collect();
            let back: Vec<[usize; 2]> = clmatrix.line_candidates(j, i).collect();
            assert_eq!(fwd.len(), 3);
            assert_eq!(fwd[0], [clmatrix.get(i, j).unwrap(), clmatrix.get(j, i).unwrap()]);
            for (f, b) in fwd.iter().zip(&back) {
                assert_eq!(*f, [b[1], b[0]]);
            }
            for a in 0..3 {
                for b in a + 1..3 {
                    assert!(line_pair_distance(fwd[a], fwd[b], n_theta) > peak_exclusion_bins(n_theta));
                }
            }
        }
        assert_eq!(clmatrix.line_candidates(1, 1).count(), 0);
    }

    #[test]
    fn test_grid_peaks_suppress_neighbours_across_the_fold() {
        // 8 rays: l1 in 0..4, l2 in 0..8.
        let n_theta = 8;
        let mut data = vec![0.0; 4 * n_theta];
        data[2] = 1.0;
        // Folded neighbour of (0, 2) is (4, 6) ~ (3, 5) at distance 1.
        data[3 * n_theta + 5] = 0.9;
        data[2 * n_theta + 7] = 0.8;
        let grid = PairwiseGrid {
            n_theta,
            data,
            shifts: vec![0; 4 * n_theta],
        };
        let peaks = grid.peaks(2, 1);
        assert_eq!(peaks.len(), 2);
        assert_eq!(peaks[0], ([0, 2], 1.0));
        assert_eq!(peaks[1], ([2, 7], 0.8));
        assert_eq!(line_pair_distance([0, 2], [3, 5], n_theta), 1);
        assert_eq!(grid.peaks(0, 1).len(), 0);
    }

    #[test]
    fn test_allowed_self_pair() {
        let bounds = ((60.0f64).to_radians(), (165.0f64).to_radians());
        assert!(!allowed_self_pair(0, 180, 360, bounds));
        assert!(!allowed_self_pair(10, 40, 360, bounds));
        assert!(allowed_self_pair(10, 100, 360, bounds));
        assert!(allowed_self_pair(100, 10, 360, bounds));
        assert!(!allowed_self_pair(0, 0, 360, bounds));
    }
}
