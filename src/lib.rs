//! # cn-abinitio
//!
//! Relative viewing direction estimation for cryo-EM projection images of
//! molecules with **cyclic Cn symmetry**.
//!
//! Given N polar-Fourier-transformed projection images, the crate estimates
//! for every image the outer product `vᵢ·vᵢᵗ` and for every pair of images
//! `vᵢ·vⱼᵗ`, where `vᵢ` is the molecule's symmetry axis expressed in image
//! i's frame. These rank-1 matrices are the input of the global
//! synchronization step that recovers the viewing directions themselves.
//!
//! ## Features
//!
//! - **Closed-form C3 / C4**: self-relative rotations directly from the
//!   self-common-lines, pairwise rotations by triangle voting, local
//!   handedness synchronization
//! - **General Cn**: likelihood voting over candidate rotations, using a
//!   precomputed common-line index cache
//! - **Persistent cache**: the O(M²·K) line-index table serializes with
//!   [rkyv](https://docs.rs/rkyv) behind a versioned, validated header
//! - **Parallel**: per-pair correlation and voting run on
//!   [rayon](https://docs.rs/rayon)
//!
//! ## Example
//!
//! ```no_run
//! use cn_abinitio::{estimate_relative_viewing_directions, PolarStack, SymmetryConfig};
//! use nalgebra::{Matrix3, Vector3};
//!
//! // A C3 point molecule seen from two directions.
//! let g = cn_abinitio::geometry::symmetry_generator(3);
//! let p = Vector3::new(0.5, 0.1, 0.3);
//! let points = vec![p, g * p, g * g * p];
//! let views = vec![
//!     cn_abinitio::geometry::complete_third_row(&Vector3::new(0.3, 0.4, 0.6).normalize()),
//!     cn_abinitio::geometry::complete_third_row(&Vector3::new(-0.5, 0.2, 0.5).normalize()),
//! ];
//! let stack = PolarStack::from_point_density(&points, &views, 360, 32, 0.2).unwrap();
//!
//! let config = SymmetryConfig {
//!     max_shift: 0.0,
//!     ..SymmetryConfig::new(3, 360, 32)
//! };
//! let estimate = estimate_relative_viewing_directions(&stack, None, &config).unwrap();
//! println!("v0·v0ᵗ ≈ {}", estimate.directions.viis[0]);
//! let _: &Matrix3<f64> = &estimate.directions.vijs[0];
//! ```
//!
//! ## Algorithm overview
//!
//! 1. **Line detection**: correlate normalized rays between images (common
//!    lines) and within each image (self-common-lines), searching over 1D
//!    shifts
//! 2. **C3 / C4**: recover `Rᵢᵗ·g·Rᵢ` in closed form, `Rᵢᵗ·Rⱼ` by voting
//!    over third images, then pick the consistent J-conjugation / transpose
//!    combination for each pair by its rank-1 score
//! 3. **Cn, n ≥ 5**: score every pair of candidate rotations and every
//!    in-plane rotation against the n predicted common lines and the
//!    self-common-lines; the winner gives `vᵢ·vⱼᵗ` directly
//!

pub mod cache;
pub mod candidates;
pub mod closed_form;
pub mod config;
pub mod correlation;
mod error;
pub mod estimator;
pub mod geometry;
pub mod groundtruth;
pub mod handedness;
pub mod pairs;
pub mod pairwise;
pub mod polar;
pub mod voting;

pub use cache::LineIndexCache;
pub use candidates::CandidateSet;
pub use config::SymmetryConfig;
pub use correlation::{CommonLineMatrix, SelfCommonLines, ShiftPhaseBank};
pub use error::EstimationError;
pub use estimator::{
    estimate_relative_viewing_directions, ClosedFormPath, Estimate, EstimationDiagnostics,
    EstimationPath, GeneralPath, RelativeViewingDirections, ViewingDirectionEstimator,
};
pub use groundtruth::DetectionRates;
pub use polar::PolarStack;

// Commonly used types
pub type Complex64 = num_complex::Complex<f64>;
