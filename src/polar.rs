//! Polar Fourier image stacks and normalized ray banks.

use std::f64::consts::TAU;

use nalgebra::{DMatrix, Matrix3, Vector3};

use crate::error::EstimationError;
use crate::Complex64;

/// N polar-Fourier-transformed images sharing one `n_theta × n_r` shape.
///
/// Row `l` of an image is the ray at angle `2π·l/n_theta`; column `k` is the
/// k-th radial sample (column 0 is the DC term). For a real-valued image ray
/// `l + n_theta/2` is the complex conjugate of ray `l`.
#[derive(Debug, Clone)]
pub struct PolarStack {
    images: Vec<DMatrix<Complex64>>,
    n_theta: usize,
    n_r: usize,
}

impl PolarStack {
    /// Build a stack, checking that it is non-empty and every image has the
    /// shape of the first one.
    pub fn new(images: Vec<DMatrix<Complex64>>) -> Result<Self, EstimationError> {
        let first = images.first().ok_or(EstimationError::EmptyStack)?;
        let (n_theta, n_r) = first.shape();
        for (index, img) in images.iter().enumerate() {
            let (rows, cols) = img.shape();
            if rows != n_theta || cols != n_r {
                return Err(EstimationError::ShapeMismatch {
                    index,
                    rows,
                    cols,
                    n_theta,
                    n_r,
                });
            }
        }
        Ok(Self {
            images,
            n_theta,
            n_r,
        })
    }

    /// Analytic polar Fourier transform of a unit-weight point density viewed
    /// from each of `rotations`.
    ///
    /// Radial sample `k` sits at frequency `k·r_step`. Each rotation maps
    /// image coordinates to molecule coordinates, so the ray at angle θ
    /// samples the 3D transform along `cos θ·R[:,0] + sin θ·R[:,1]`.
    pub fn from_point_density(
        points: &[Vector3<f64>],
        rotations: &[Matrix3<f64>],
        n_theta: usize,
        n_r: usize,
        r_step: f64,
    ) -> Result<Self, EstimationError> {
        let images = rotations
            .iter()
            .map(|rot| {
                let axis_x = rot.column(0).into_owned();
                let axis_y = rot.column(1).into_owned();
                DMatrix::from_fn(n_theta, n_r, |l, k| {
                    let theta = TAU * l as f64 / n_theta as f64;
                    let dir = axis_x * theta.cos() + axis_y * theta.sin();
                    let r = k as f64 * r_step;
                    points
                        .iter()
                        .map(|p| Complex64::from_polar(1.0, -TAU * r * dir.dot(p)))
                        .sum()
                })
            })
            .collect();
        Self::new(images)
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn n_theta(&self) -> usize {
        self.n_theta
    }

    pub fn n_r(&self) -> usize {
        self.n_r
    }

    pub fn image(&self, index: usize) -> &DMatrix<Complex64> {
        &self.images[index]
    }

    /// All rays of image `index` with the DC term removed and unit L2 norm.
    pub fn normalized_rays(&self, index: usize) -> RayBank {
        RayBank::from_image(&self.images[index])
    }
}

/// Contiguous bank of rays, each `n_r` long.
#[derive(Debug, Clone)]
pub struct RayBank {
    n_rays: usize,
    n_r: usize,
    data: Vec<Complex64>,
}

impl RayBank {
    /// Every row of `image` as a normalized ray.
    pub fn from_image(image: &DMatrix<Complex64>) -> Self {
        let (n_theta, n_r) = image.shape();
        let mut data = Vec::with_capacity(n_theta * n_r);
        for l in 0..n_theta {
            data.extend(image.row(l).iter().copied());
        }
        let mut bank = Self {
            n_rays: n_theta,
            n_r,
            data,
        };
        bank.normalize();
        bank
    }

    /// Wrap raw rays (row-major) without touching them.
    pub(crate) fn from_raw(n_rays: usize, n_r: usize, data: Vec<Complex64>) -> Self {
        debug_assert_eq!(data.len(), n_rays * n_r);
        Self { n_rays, n_r, data }
    }

    /// Zero the DC term of every ray and scale to unit norm. All-zero rays
    /// stay zero.
    pub(crate) fn normalize(&mut self) {
        for ray in self.data.chunks_exact_mut(self.n_r) {
            normalize_ray(ray);
        }
    }

    pub fn len(&self) -> usize {
        self.n_rays
    }

    pub fn is_empty(&self) -> bool {
        self.n_rays == 0
    }

    pub fn n_r(&self) -> usize {
        self.n_r
    }

    #[inline]
    pub fn ray(&self, index: usize) -> &[Complex64] {
        &self.data[index * self.n_r..(index + 1) * self.n_r]
    }
}

fn normalize_ray(ray: &mut [Complex64]) {
    if let Some(dc) = ray.first_mut() {
        *dc = Complex64::new(0.0, 0.0);
    }
    let norm = ray.iter().map(|c| c.norm_sqr()).sum::<f64>().sqrt();
    if norm > 0.0 {
        for c in ray.iter_mut() {
            *c /= norm;
        }
    }
}
