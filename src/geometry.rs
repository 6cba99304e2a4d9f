//! Rotation and common-line geometry shared by every component.
//!
//! # Conventions
//!
//! A rotation `R` maps image coordinates to molecule coordinates: its first
//! two columns span the image plane and its third column is the viewing
//! direction. The symmetry axis of the molecule is +Z, so the third *row* of
//! `R` is the symmetry axis expressed in the image frame (the vector `vᵢ`
//! whose outer products the pipeline estimates).
//!
//! For a relative rotation `Rij = Riᵗ·Rj`, the common line between the two
//! images has in-plane coordinates
//!
//! ```text
//! image i:  c1 = (−Rij[1,2],  Rij[0,2])
//! image j:  c2 = ( Rij[2,1], −Rij[2,0])
//! ```
//!
//! and both describe the *same* 3D ray.

use std::f64::consts::TAU;

use nalgebra::{Matrix3, Vector3};

/// The reflection `J = diag(1, 1, −1)`.
#[inline]
pub fn j_matrix() -> Matrix3<f64> {
    Matrix3::from_diagonal(&Vector3::new(1.0, 1.0, -1.0))
}

/// Rotation by `theta` radians about +Z.
#[inline]
pub fn rot_z(theta: f64) -> Matrix3<f64> {
    let (s, c) = theta.sin_cos();
    Matrix3::new(c, -s, 0.0, s, c, 0.0, 0.0, 0.0, 1.0)
}

/// Rotation by `theta` radians about +X.
#[inline]
pub fn rot_x(theta: f64) -> Matrix3<f64> {
    let (s, c) = theta.sin_cos();
    Matrix3::new(1.0, 0.0, 0.0, 0.0, c, -s, 0.0, s, c)
}

/// Generator `g` of the cyclic group Cn: rotation by 2π/n about the symmetry axis.
pub fn symmetry_generator(n_symm: usize) -> Matrix3<f64> {
    rot_z(TAU / n_symm as f64)
}

/// All powers `g⁰, g¹, …, gⁿ⁻¹` of the Cn generator.
pub fn generator_powers(n_symm: usize) -> Vec<Matrix3<f64>> {
    (0..n_symm)
        .map(|s| rot_z(TAU * s as f64 / n_symm as f64))
        .collect()
}

/// `J·M·J`: negates the entries coupling the third axis with the first two.
#[inline]
pub fn j_conjugate(m: &Matrix3<f64>) -> Matrix3<f64> {
    let mut out = *m;
    out[(0, 2)] = -out[(0, 2)];
    out[(1, 2)] = -out[(1, 2)];
    out[(2, 0)] = -out[(2, 0)];
    out[(2, 1)] = -out[(2, 1)];
    out
}

/// `M^s` by repeated multiplication (`M⁰ = I`).
pub fn matrix_power(m: &Matrix3<f64>, s: usize) -> Matrix3<f64> {
    let mut out = Matrix3::identity();
    for _ in 0..s {
        out *= m;
    }
    out
}

/// ZXZ Euler angles to rotation: `Rz(ang3)·Rx(ang2)·Rz(ang1)`.
///
/// A rotation built this way with `ang2 ∈ (0, π)` has its common line with
/// itself-under-the-rotation at angle `ang3` in the first frame and `−ang1`
/// in the second.
pub fn euler_zxz(ang1: f64, ang2: f64, ang3: f64) -> Matrix3<f64> {
    rot_z(ang3) * rot_x(ang2) * rot_z(ang1)
}

/// Complete a unit third row into a rotation matrix using a fixed in-plane
/// convention.
///
/// The first row is horizontal (zero Z component); the second row is chosen
/// to make the matrix a proper rotation.
pub fn complete_third_row(r3: &Vector3<f64>) -> Matrix3<f64> {
    if (r3 - Vector3::z()).norm() < 1e-5 {
        return Matrix3::identity();
    }
    let t = (r3.x * r3.x + r3.y * r3.y).sqrt();
    if t < 1e-12 {
        // South pole: flip the second axis to keep det = +1.
        return Matrix3::from_diagonal(&Vector3::new(1.0, -1.0, -1.0));
    }
    let r1 = Vector3::new(r3.y / t, -r3.x / t, 0.0);
    let mut r2 = Vector3::new(r3.x * r3.z / t, r3.y * r3.z / t, -t);
    let det = r1.cross(&r2).dot(r3);
    if det < 0.0 {
        r2 = -r2;
    }
    Matrix3::from_rows(&[r1.transpose(), r2.transpose(), r3.transpose()])
}

/// Convert an in-plane direction `(x, y)` to the nearest angular ray index.
#[inline]
pub fn line_angle_to_index(x: f64, y: f64, n_theta: usize) -> usize {
    let theta = y.atan2(x).rem_euclid(TAU);
    let ind = (theta * n_theta as f64 / TAU).round() as usize;
    ind % n_theta
}

/// Angular indices of the common line implied by relative rotation `r`, in
/// image i and image j respectively, before canonicalization.
pub fn common_line_indices(r: &Matrix3<f64>, n_theta: usize) -> [usize; 2] {
    let l1 = line_angle_to_index(-r[(1, 2)], r[(0, 2)], n_theta);
    let l2 = line_angle_to_index(r[(2, 1)], -r[(2, 0)], n_theta);
    [l1, l2]
}

/// Fold a line pair so the first index lies in the stored half-range
/// `[0, n_theta/2)`, moving the partner to its antipode.
#[inline]
pub fn fold_line_pair(pair: [usize; 2], n_theta: usize) -> [usize; 2] {
    let half = n_theta / 2;
    if pair[0] >= half {
        [pair[0] - half, (pair[1] + half) % n_theta]
    } else {
        pair
    }
}

/// Canonical (folded) common-line pair implied by relative rotation `r`.
#[inline]
pub fn canonical_common_lines(r: &Matrix3<f64>, n_theta: usize) -> [usize; 2] {
    fold_line_pair(common_line_indices(r, n_theta), n_theta)
}

/// Singular values of `m`, sorted descending.
pub fn singular_values(m: &Matrix3<f64>) -> [f64; 3] {
    let sv = m.singular_values();
    let mut out = [sv[0], sv[1], sv[2]];
    out.sort_unstable_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    out
}

/// Rank-1 proximity score: L2 distance of the singular values from (1, 0, 0).
pub fn rank1_distance(m: &Matrix3<f64>) -> f64 {
    let s = singular_values(m);
    ((s[0] - 1.0).powi(2) + s[1].powi(2) + s[2].powi(2)).sqrt()
}

/// Largest singular value of `m` with its left and right singular vectors.
///
/// Returns `None` if the SVD does not produce both factors.
pub fn leading_singular_triplet(m: &Matrix3<f64>) -> Option<(f64, Vector3<f64>, Vector3<f64>)> {
    let svd = m.svd(true, true);
    let k = svd.singular_values.imax();
    let sigma = svd.singular_values[k];
    let u = svd.u?.column(k).into_owned();
    let w = svd.v_t?.row(k).transpose();
    Some((sigma, u, w))
}

/// Closest orthogonal matrix `U·Vᵗ` (polar factor) of `m`.
///
/// Returns `None` if the SVD does not produce both factors.
pub fn project_to_orthogonal(m: &Matrix3<f64>) -> Option<Matrix3<f64>> {
    let svd = m.svd(true, true);
    Some(svd.u? * svd.v_t?)
}

/// Arithmetic mean of a non-empty set of matrices (zero for an empty set).
pub fn mean_matrix<'a, I>(mats: I) -> Matrix3<f64>
where
    I: IntoIterator<Item = &'a Matrix3<f64>>,
{
    let mut sum = Matrix3::zeros();
    let mut n = 0usize;
    for m in mats {
        sum += m;
        n += 1;
    }
    if n > 0 {
        sum / n as f64
    } else {
        sum
    }
}

/// Angle (radians) of the relative rotation `aᵗ·b`.
pub fn rotation_angle_between(a: &Matrix3<f64>, b: &Matrix3<f64>) -> f64 {
    let r = a.transpose() * b;
    ((r.trace() - 1.0) / 2.0).clamp(-1.0, 1.0).acos()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn assert_rotation(r: &Matrix3<f64>) {
        let should_be_identity = r.transpose() * r;
        assert!((should_be_identity - Matrix3::identity()).norm() < 1e-12);
        assert!((r.determinant() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_complete_third_row_is_rotation() {
        let rows = [
            Vector3::new(0.3, -0.4, 0.866).normalize(),
            Vector3::new(-0.9, 0.1, -0.2).normalize(),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 0.0, 1.0),
            Vector3::new(0.0, 0.0, -1.0),
        ];
        for r3 in rows {
            let r = complete_third_row(&r3);
            assert_rotation(&r);
            let third = r.row(2).transpose();
            assert!((third - r3).norm() < 1e-12, "third row mismatch for {r3:?}");
        }
    }

    #[test]
    fn test_euler_zxz_self_common_lines() {
        // A ZXZ rotation with ang2 in (0, π) has its common lines at ang3 and −ang1.
        let n_theta = 360;
        let r = euler_zxz(-(200.0f64).to_radians(), 1.1, (40.0f64).to_radians());
        let [l1, l2] = common_line_indices(&r, n_theta);
        assert_eq!(l1, 40);
        assert_eq!(l2, 200);
    }

    #[test]
    fn test_common_lines_are_same_ray() {
        let ri = complete_third_row(&Vector3::new(0.2, 0.5, 0.7).normalize()) * rot_z(0.3);
        let rj = rot_z(1.2) * complete_third_row(&Vector3::new(-0.6, 0.1, 0.4).normalize());
        let rij = ri.transpose() * rj;
        let c1 = Vector3::new(-rij[(1, 2)], rij[(0, 2)], 0.0);
        let c2 = Vector3::new(rij[(2, 1)], -rij[(2, 0)], 0.0);
        // Both in-plane directions map to the same molecule-frame vector.
        assert!((ri * c1 - rj * c2).norm() < 1e-12);
    }

    #[test]
    fn test_fold_line_pair() {
        assert_eq!(fold_line_pair([10, 300], 360), [10, 300]);
        assert_eq!(fold_line_pair([190, 300], 360), [10, 120]);
        assert_eq!(fold_line_pair([180, 0], 360), [0, 180]);
    }

    #[test]
    fn test_line_angle_to_index_wraps() {
        assert_eq!(line_angle_to_index(1.0, 0.0, 360), 0);
        assert_eq!(line_angle_to_index(0.0, 1.0, 360), 90);
        assert_eq!(line_angle_to_index(1.0, -1e-9, 360), 0);
        assert_eq!(line_angle_to_index(-1.0, 0.0, 8), 4);
    }

    #[test]
    fn test_generator_powers_average_is_rank1() {
        for n in 2..8 {
            let mean = mean_matrix(generator_powers(n).iter());
            let expected = Matrix3::from_diagonal(&Vector3::new(0.0, 0.0, 1.0));
            assert!((mean - expected).norm() < 1e-12, "n={n}");
            assert!(rank1_distance(&mean) < 1e-12);
        }
    }

    #[test]
    fn test_j_conjugate_matches_definition() {
        let m = euler_zxz(0.1, 0.7, -2.0);
        let j = j_matrix();
        assert!((j_conjugate(&m) - j * m * j).norm() < 1e-15);
        assert!((j_conjugate(&rot_x(0.4)) - rot_x(-0.4)).norm() < 1e-15);
    }

    #[test]
    fn test_matrix_power_of_generator() {
        let g = symmetry_generator(4);
        assert!((matrix_power(&g, 4) - Matrix3::identity()).norm() < 1e-12);
        assert!((matrix_power(&g, 2) - rot_z(PI)).norm() < 1e-12);
    }

    #[test]
    fn test_project_to_orthogonal() {
        let r = euler_zxz(0.3, 1.0, -0.5);
        let noisy = r + Matrix3::repeat(1e-3);
        let p = project_to_orthogonal(&noisy).unwrap();
        assert_rotation(&p);
        assert!(rotation_angle_between(&r, &p) < 1e-2);
    }

    #[test]
    fn test_leading_singular_triplet_of_outer_product() {
        let a = Vector3::new(0.3, -0.4, 0.5).normalize();
        let b = Vector3::new(-0.8, 0.1, 0.2).normalize();
        let (sigma, u, w) = leading_singular_triplet(&(2.0 * a * b.transpose())).unwrap();
        assert!((sigma - 2.0).abs() < 1e-12);
        assert!((u.dot(&a).abs() - 1.0).abs() < 1e-12);
        assert!((w.dot(&b).abs() - 1.0).abs() < 1e-12);
        // The sign ambiguity is shared between the two vectors.
        assert!(u.dot(&a) * w.dot(&b) > 0.0);
    }
}
