//! Precondition failures reported by the estimation pipeline.
//!
//! Every variant is fatal: the pipeline aborts before producing any output.
//! Numerical domain violations that can be recovered (e.g. self-common-line
//! cosines slightly outside their theoretical bound) are *not* errors; they
//! are clamped and reported through `tracing::warn!` and the solver
//! diagnostics instead.

use thiserror::Error;

/// Errors raised when the inputs or configuration violate a precondition.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EstimationError {
    /// The angular sampling must be even so that rays θ and θ+π pair up.
    #[error("n_theta must be even, got {0}")]
    OddNTheta(usize),
    /// The requested symmetry order is not handled by the selected path.
    #[error("symmetry order {n_symm} is not supported by the {path} path")]
    UnsupportedSymmetry { n_symm: usize, path: &'static str },
    /// A loaded line-index cache was built for a different angular sampling.
    #[error(
        "cache was built for n_theta={cache}, but the images have n_theta={images}; \
         either create a new cache or resample the images"
    )]
    CacheThetaMismatch { cache: usize, images: usize },
    /// No images were supplied.
    #[error("the polar Fourier image stack is empty")]
    EmptyStack,
    /// An image does not share the stack's (n_theta, n_r) shape.
    #[error("image {index} has shape {rows}x{cols}, expected {n_theta}x{n_r}")]
    ShapeMismatch {
        index: usize,
        rows: usize,
        cols: usize,
        n_theta: usize,
        n_r: usize,
    },
    /// The number of pairwise entries is not C(N,2).
    #[error("expected {expected} pairwise rotations for {n_images} images, got {got}")]
    PairCountMismatch {
        n_images: usize,
        expected: usize,
        got: usize,
    },
    /// Ground-truth-driven line detection was requested without rotations.
    #[error("ground-truth line detection requested but no ground-truth rotations were supplied")]
    MissingGroundTruth,
    /// Ground-truth rotations do not match the number of images.
    #[error("got {rotations} ground-truth rotations for {images} images")]
    GroundTruthCountMismatch { rotations: usize, images: usize },
    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A cache file is structurally inconsistent or from another format version.
    #[error("invalid line-index cache: {0}")]
    InvalidCache(String),
}
