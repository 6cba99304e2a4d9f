//! Run configuration shared by both estimation paths.
//!
//! A single [`SymmetryConfig`] value is handed to each component's entry
//! point; nothing is read from process-wide state.

use std::path::PathBuf;

use crate::error::EstimationError;

/// Parameters controlling relative viewing direction estimation.
#[derive(Debug, Clone)]
pub struct SymmetryConfig {
    /// Order n of the cyclic symmetry group Cn. Default 3.
    pub n_symm: usize,
    /// Number of angular rays per polar Fourier image (must be even). Default 360.
    pub n_theta: usize,
    /// Number of radial samples per ray. Default 45.
    pub n_r: usize,
    /// Maximum 2D translation (pixels) absorbed by the shift search. Default 15.
    pub max_shift: f64,
    /// Step of the 1D shift search (pixels). Default 1.
    pub shift_step: f64,
    /// Derive line matrices from ground-truth rotations instead of
    /// correlating images. Default false.
    pub use_ground_truth: bool,
    /// When deriving line matrices from ground truth, J-conjugate each
    /// relative and self-relative rotation with probability 1/2 to mimic the
    /// handedness ambiguity of detection. Default true.
    pub simulate_j: bool,
    /// When deriving self-common-lines from ground truth, transpose each
    /// self-relative rotation with probability 1/2 to mimic the detection
    /// ambiguity. Default true.
    pub simulate_transpose: bool,
    /// Allowed open interval (degrees) of the unsigned angle between the two
    /// self-common-lines. None = (60, 165) for C3 and (90, 160) for C4.
    pub self_line_bounds_deg: Option<(f64, f64)>,
    /// Candidates whose viewing direction lies within this many degrees of
    /// the equator get a zero self-common-line score. Default 10.
    pub equator_tol_deg: f64,
    /// Axis error (degrees) below which an estimate counts as detected when
    /// ground truth is supplied. Default 10.
    pub angle_tol_err_deg: f64,
    /// Candidate viewing directions for a freshly built cache. Default 1000.
    pub n_points_sphere: usize,
    /// In-plane rotation resolution (degrees) for a freshly built cache. Default 1.
    pub inplane_rot_res_deg: f64,
    /// Line-index cache to load for the general path. None = build one in
    /// `cache_dir` with `n_points_sphere` / `inplane_rot_res_deg`.
    pub cache_file: Option<PathBuf>,
    /// Directory receiving freshly built caches. Default ".".
    pub cache_dir: PathBuf,
    /// Seed for candidate generation and J / transpose simulation. Default 0.
    pub seed: u64,
}

impl Default for SymmetryConfig {
    fn default() -> Self {
        Self {
            n_symm: 3,
            n_theta: 360,
            n_r: 45,
            max_shift: 15.0,
            shift_step: 1.0,
            use_ground_truth: false,
            simulate_j: true,
            simulate_transpose: true,
            self_line_bounds_deg: None,
            equator_tol_deg: 10.0,
            angle_tol_err_deg: 10.0,
            n_points_sphere: 1000,
            inplane_rot_res_deg: 1.0,
            cache_file: None,
            cache_dir: PathBuf::from("."),
            seed: 0,
        }
    }
}

impl SymmetryConfig {
    /// Create a configuration for symmetry order `n_symm` with image sampling
    /// `n_theta` × `n_r`; everything else keeps its default.
    pub fn new(n_symm: usize, n_theta: usize, n_r: usize) -> Self {
        Self {
            n_symm,
            n_theta,
            n_r,
            ..Default::default()
        }
    }

    /// Check value ranges that do not depend on the selected path.
    pub fn validate(&self) -> Result<(), EstimationError> {
        if self.n_theta % 2 == 1 {
            return Err(EstimationError::OddNTheta(self.n_theta));
        }
        if self.n_theta == 0 || self.n_r == 0 {
            return Err(EstimationError::InvalidConfig(format!(
                "n_theta and n_r must be positive (got {} and {})",
                self.n_theta, self.n_r
            )));
        }
        if self.n_symm < 2 {
            return Err(EstimationError::InvalidConfig(format!(
                "symmetry order must be at least 2, got {}",
                self.n_symm
            )));
        }
        if self.max_shift < 0.0 || !self.max_shift.is_finite() {
            return Err(EstimationError::InvalidConfig(format!(
                "max_shift must be a non-negative number, got {}",
                self.max_shift
            )));
        }
        if self.max_shift > 0.0 && self.shift_step <= 0.0 {
            return Err(EstimationError::InvalidConfig(format!(
                "shift_step must be positive when max_shift > 0, got {}",
                self.shift_step
            )));
        }
        if !(self.angle_tol_err_deg > 0.0 && self.angle_tol_err_deg <= 90.0) {
            return Err(EstimationError::InvalidConfig(format!(
                "angle_tol_err_deg must lie in (0, 90] degrees, got {}",
                self.angle_tol_err_deg
            )));
        }
        if self.inplane_rot_res_deg <= 0.0 || self.inplane_rot_res_deg > 360.0 {
            return Err(EstimationError::InvalidConfig(format!(
                "in-plane resolution must lie in (0, 360] degrees, got {}",
                self.inplane_rot_res_deg
            )));
        }
        Ok(())
    }

    /// Largest 1D shift searched along a common line.
    ///
    /// A 2D shift of up to `max_shift` in each axis projects onto a line as at
    /// most `2·√2·max_shift`, rounded up.
    pub fn max_shift_1d(&self) -> f64 {
        (2.0 * std::f64::consts::SQRT_2 * self.max_shift).ceil()
    }

    /// Open interval (radians) of allowed unsigned self-common-line angles.
    ///
    /// Antipodal rays are perfectly correlated by construction, so angles
    /// close to 180° must be excluded.
    pub fn self_line_bounds_rad(&self) -> Result<(f64, f64), EstimationError> {
        let (lo, hi) = match (self.self_line_bounds_deg, self.n_symm) {
            (Some(bounds), _) => bounds,
            (None, 3) => (60.0, 165.0),
            (None, 4) => (90.0, 160.0),
            (None, n) => {
                return Err(EstimationError::UnsupportedSymmetry {
                    n_symm: n,
                    path: "self-common-line",
                })
            }
        };
        Ok((lo.to_radians(), hi.to_radians()))
    }
}
