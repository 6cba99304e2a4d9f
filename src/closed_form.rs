//! Closed-form self-relative rotations for C3 and C4.
//!
//! For a C3 or C4 molecule, the rotation `Rii = Rᵢᵗ·g·Rᵢ` is fully
//! determined by the two self-common-lines of image i. With `Rii` written as
//! ZXZ Euler angles `Rz(a)·Rx(γ)·Rz(−b)`, the lines fix `a` and `b`, and the
//! known rotation angle of `g` (its trace) fixes `γ`:
//!
//! ```text
//! c = cos((l1 − l0)·2π/n_theta)
//! C3:  cos γ = c / (1 − c)          valid for c ≤ 1/2
//! C4:  cos γ = (1 + c) / (1 − c)    valid for c ≤ 0
//! ```
//!
//! Discretization can push `c` past its bound; such values are clamped and
//! counted rather than rejected.

use std::f64::consts::{PI, TAU};

use nalgebra::Matrix3;
use tracing::{info, warn};

use crate::error::EstimationError;
use crate::geometry::euler_zxz;

/// Clamp statistics from one run of [`estimate_self_relative_rotations`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClampDiagnostics {
    /// Number of images whose cosine exceeded the bound.
    pub n_clamped: usize,
    /// Largest cosine seen above the bound, if any.
    pub max_violation: Option<f64>,
}

/// Self-relative rotations plus the intermediate tilt angles.
#[derive(Debug, Clone)]
pub struct SelfRelativeRotations {
    pub riis: Vec<Matrix3<f64>>,
    /// γ per image, radians in [0, π].
    pub gammas: Vec<f64>,
    pub diagnostics: ClampDiagnostics,
}

/// Upper bound on the self-common-line cosine for C3 / C4.
fn cos_bound(n_symm: usize) -> Result<f64, EstimationError> {
    match n_symm {
        3 => Ok(0.5),
        4 => Ok(0.0),
        n => Err(EstimationError::UnsupportedSymmetry {
            n_symm: n,
            path: "closed-form",
        }),
    }
}

/// `cos γ` from the (already clamped) self-common-line cosine.
pub fn cos_gamma(cos_diff: f64, n_symm: usize) -> Result<f64, EstimationError> {
    let c = cos_diff;
    match n_symm {
        3 => Ok(c / (1.0 - c)),
        4 => Ok((1.0 + c) / (1.0 - c)),
        n => Err(EstimationError::UnsupportedSymmetry {
            n_symm: n,
            path: "closed-form",
        }),
    }
}

/// Estimate `Rii` for every image from its self-common-line pair.
///
/// Each `lines[i] = [l0, l1]` follows the self-common-line convention: ray
/// `l0` equals the conjugate of ray `l1`. The partner ray actually shared with
/// the rotated image is therefore `l1 + n_theta/2`, which is where the extra
/// π in the third Euler angle comes from.
pub fn estimate_self_relative_rotations(
    lines: &[[usize; 2]],
    n_symm: usize,
    n_theta: usize,
) -> Result<SelfRelativeRotations, EstimationError> {
    let bound = cos_bound(n_symm)?;
    if n_theta % 2 == 1 {
        return Err(EstimationError::OddNTheta(n_theta));
    }
    info!("Estimating {} self-relative rotations (C{})", lines.len(), n_symm);

    let step = TAU / n_theta as f64;
    let mut diagnostics = ClampDiagnostics::default();
    let mut riis = Vec::with_capacity(lines.len());
    let mut gammas = Vec::with_capacity(lines.len());

    for &[l0, l1] in lines {
        let mut c = ((l1 as f64 - l0 as f64) * step).cos();
        if c > bound {
            diagnostics.n_clamped += 1;
            diagnostics.max_violation = Some(diagnostics.max_violation.map_or(c, |m| m.max(c)));
            c = bound;
        }
        let gamma = cos_gamma(c, n_symm)?.clamp(-1.0, 1.0).acos();
        let a = l0 as f64 * step;
        let b = l1 as f64 * step + PI;
        riis.push(euler_zxz(-b, gamma, a));
        gammas.push(gamma);
    }

    if let Some(max) = diagnostics.max_violation {
        warn!(
            "self-common-line cosine should be <= {}: {} estimates exceeded it (max {:.4}); clamped",
            bound, diagnostics.n_clamped, max
        );
    }

    Ok(SelfRelativeRotations {
        riis,
        gammas,
        diagnostics,
    })
}
