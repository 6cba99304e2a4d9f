//! Top-level entry point: pick a path once, then estimate.
//!
//! ```text
//! C3 / C4:  common lines ─┬─ pairwise voting ─── Rijs ─┐
//!                         └─ self lines ─ closed form ─ Riis ─┴─ handedness sync ─ (viis, vijs)
//! Cn, n≥5:  line-index cache + candidates ── candidate voting ── (viis, vijs)
//! ```

use std::path::PathBuf;

use anyhow::Context;
use nalgebra::Matrix3;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

use crate::cache::{create_cache, LineIndexCache};
use crate::closed_form::{estimate_self_relative_rotations, ClampDiagnostics};
use crate::config::SymmetryConfig;
use crate::correlation::{common_lines, self_common_lines, CommonLineMatrix, SelfCommonLines};
use crate::error::EstimationError;
use crate::groundtruth::{detection_rates, gt_common_lines, gt_self_common_lines, DetectionRates};
use crate::handedness::local_handedness_sync;
use crate::pairwise::relative_rotations;
use crate::polar::PolarStack;
use crate::voting::{estimate_cn, PairChoice};

/// Per-image and per-pair outer-product estimates.
#[derive(Debug, Clone, PartialEq)]
pub struct RelativeViewingDirections {
    /// `viis[i] ≈ vᵢ·vᵢᵗ`
    pub viis: Vec<Matrix3<f64>>,
    /// `vijs[c] ≈ vᵢ·vⱼᵗ` for the c-th pair (i < j) in canonical order.
    pub vijs: Vec<Matrix3<f64>>,
}

/// What the C3/C4 path saw along the way.
#[derive(Debug, Clone)]
pub struct ClosedFormDiagnostics {
    pub clmatrix: CommonLineMatrix,
    pub sclmatrix: SelfCommonLines,
    pub riis: Vec<Matrix3<f64>>,
    pub rijs: Vec<Matrix3<f64>>,
    pub clamp: ClampDiagnostics,
    /// Pairs whose relative rotation had no supporting third image.
    pub empty_vote_pairs: usize,
    /// Winners among the eight handedness options.
    pub handedness_histogram: [usize; 8],
}

/// What the general path saw along the way.
#[derive(Debug, Clone)]
pub struct GeneralDiagnostics {
    /// Cache file that was loaded or created.
    pub cache_file: Option<PathBuf>,
    pub choices: Vec<PairChoice>,
}

#[derive(Debug, Clone)]
pub enum EstimationDiagnostics {
    ClosedForm(Box<ClosedFormDiagnostics>),
    General(GeneralDiagnostics),
}

/// Estimates plus path-specific diagnostics.
#[derive(Debug, Clone)]
pub struct Estimate {
    pub directions: RelativeViewingDirections,
    pub diagnostics: EstimationDiagnostics,
    /// Detection rates against the ground-truth rotations, when supplied.
    pub detection: Option<DetectionRates>,
}

impl Estimate {
    fn new(
        directions: RelativeViewingDirections,
        diagnostics: EstimationDiagnostics,
        gt: Option<&[Matrix3<f64>]>,
        config: &SymmetryConfig,
    ) -> Self {
        let detection = gt.map(|rots| {
            let rates = detection_rates(
                &directions.viis,
                &directions.vijs,
                rots,
                config.angle_tol_err_deg,
            );
            info!(
                "Detection within {:.1} deg: viis {:.1}%, vijs {:.1}%",
                config.angle_tol_err_deg,
                100.0 * rates.viis,
                100.0 * rates.vijs
            );
            rates
        });
        Self {
            directions,
            diagnostics,
            detection,
        }
    }
}

/// Something that turns a polar Fourier stack into relative viewing directions.
pub trait ViewingDirectionEstimator {
    /// `gt` holds ground-truth rotations (image → molecule frame), used for
    /// ground-truth line detection or candidate seeding when configured.
    fn estimate(
        &self,
        stack: &PolarStack,
        gt: Option<&[Matrix3<f64>]>,
    ) -> anyhow::Result<Estimate>;
}

fn check_stack(stack: &PolarStack, config: &SymmetryConfig) -> Result<(), EstimationError> {
    if stack.n_theta() % 2 == 1 {
        return Err(EstimationError::OddNTheta(stack.n_theta()));
    }
    if stack.n_theta() != config.n_theta || stack.n_r() != config.n_r {
        return Err(EstimationError::InvalidConfig(format!(
            "configuration expects {}x{} images, stack holds {}x{}",
            config.n_theta,
            config.n_r,
            stack.n_theta(),
            stack.n_r()
        )));
    }
    Ok(())
}

fn check_gt(gt: Option<&[Matrix3<f64>]>, n_images: usize) -> Result<(), EstimationError> {
    if let Some(rots) = gt {
        if rots.len() != n_images {
            return Err(EstimationError::GroundTruthCountMismatch {
                rotations: rots.len(),
                images: n_images,
            });
        }
    }
    Ok(())
}

// ── C3 / C4 ─────────────────────────────────────────────────────────────────

/// Closed-form path for C3 and C4.
#[derive(Debug, Clone)]
pub struct ClosedFormPath {
    pub config: SymmetryConfig,
}

impl ClosedFormPath {
    pub fn new(config: SymmetryConfig) -> Result<Self, EstimationError> {
        config.validate()?;
        if !matches!(config.n_symm, 3 | 4) {
            return Err(EstimationError::UnsupportedSymmetry {
                n_symm: config.n_symm,
                path: "closed-form",
            });
        }
        Ok(Self { config })
    }

    /// Common-line and self-common-line matrices, detected or derived.
    fn line_matrices(
        &self,
        stack: &PolarStack,
        gt: Option<&[Matrix3<f64>]>,
    ) -> Result<(CommonLineMatrix, SelfCommonLines), EstimationError> {
        let config = &self.config;
        if config.use_ground_truth {
            let rots = gt.ok_or(EstimationError::MissingGroundTruth)?;
            info!("Deriving line matrices from ground-truth rotations");
            let mut rng = StdRng::seed_from_u64(config.seed);
            let clmatrix = gt_common_lines(
                rots,
                config.n_symm,
                stack.n_theta(),
                config.simulate_j,
                &mut rng,
            );
            let sclmatrix = gt_self_common_lines(
                rots,
                config.n_symm,
                stack.n_theta(),
                config.simulate_j,
                config.simulate_transpose,
                &mut rng,
            );
            Ok((clmatrix, sclmatrix))
        } else {
            let clmatrix = common_lines(stack, config)?;
            let sclmatrix = self_common_lines(stack, config)?;
            Ok((clmatrix, sclmatrix))
        }
    }
}

impl ViewingDirectionEstimator for ClosedFormPath {
    fn estimate(
        &self,
        stack: &PolarStack,
        gt: Option<&[Matrix3<f64>]>,
    ) -> anyhow::Result<Estimate> {
        let config = &self.config;
        check_stack(stack, config)?;
        check_gt(gt, stack.len())?;
        info!(
            "Estimating relative viewing directions for C{} ({} images)",
            config.n_symm,
            stack.len()
        );

        let (clmatrix, sclmatrix) = self.line_matrices(stack, gt)?;
        let rel = relative_rotations(&clmatrix, stack.n_theta());
        let selfrel =
            estimate_self_relative_rotations(&sclmatrix.lines, config.n_symm, stack.n_theta())?;
        let sync = local_handedness_sync(&selfrel.riis, &rel.rijs, config.n_symm)?;

        let empty_vote_pairs = rel.n_votes.iter().filter(|&&n| n == 0).count();
        Ok(Estimate::new(
            RelativeViewingDirections {
                viis: sync.viis,
                vijs: sync.vijs,
            },
            EstimationDiagnostics::ClosedForm(Box::new(ClosedFormDiagnostics {
                clmatrix,
                sclmatrix,
                riis: selfrel.riis,
                rijs: rel.rijs,
                clamp: selfrel.diagnostics,
                empty_vote_pairs,
                handedness_histogram: sync.histogram,
            })),
            gt,
            config,
        ))
    }
}

// ── General Cn ──────────────────────────────────────────────────────────────

/// Candidate-voting path for n ≥ 5.
#[derive(Debug, Clone)]
pub struct GeneralPath {
    pub config: SymmetryConfig,
    cache: Option<LineIndexCache>,
}

impl GeneralPath {
    pub fn new(config: SymmetryConfig) -> Result<Self, EstimationError> {
        config.validate()?;
        if config.n_symm < 5 {
            return Err(EstimationError::UnsupportedSymmetry {
                n_symm: config.n_symm,
                path: "candidate-voting",
            });
        }
        Ok(Self {
            config,
            cache: None,
        })
    }

    /// Use an already loaded cache instead of reading or creating one.
    pub fn with_cache(mut self, cache: LineIndexCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Loaded cache, or the configured file, or a freshly created one.
    fn obtain_cache(
        &self,
        n_theta: usize,
        gt: Option<&[Matrix3<f64>]>,
    ) -> anyhow::Result<(Option<PathBuf>, LineIndexCache)> {
        let config = &self.config;
        if let Some(cache) = &self.cache {
            return Ok((None, cache.clone()));
        }
        if let Some(path) = &config.cache_file {
            let cache = LineIndexCache::load_from_file(path)?;
            return Ok((Some(path.clone()), cache));
        }
        info!("No line-index cache supplied");
        let mut rng = StdRng::seed_from_u64(config.seed);
        let (path, cache) = create_cache(
            &config.cache_dir,
            config.n_points_sphere,
            n_theta,
            config.inplane_rot_res_deg,
            gt,
            &mut rng,
        )?;
        Ok((Some(path), cache))
    }
}

impl ViewingDirectionEstimator for GeneralPath {
    fn estimate(
        &self,
        stack: &PolarStack,
        gt: Option<&[Matrix3<f64>]>,
    ) -> anyhow::Result<Estimate> {
        let config = &self.config;
        check_stack(stack, config)?;
        check_gt(gt, stack.len())?;
        info!(
            "Estimating relative viewing directions for C{} ({} images)",
            config.n_symm,
            stack.len()
        );
        let (cache_file, cache) = self.obtain_cache(stack.n_theta(), gt)?;
        let out = estimate_cn(stack, &cache, config).with_context(|| match &cache_file {
            Some(path) => format!("candidate voting with cache {}", path.display()),
            None => "candidate voting".to_string(),
        })?;
        Ok(Estimate::new(
            RelativeViewingDirections {
                viis: out.viis,
                vijs: out.vijs,
            },
            EstimationDiagnostics::General(GeneralDiagnostics {
                cache_file,
                choices: out.choices,
            }),
            gt,
            config,
        ))
    }
}

// ── Dispatch ────────────────────────────────────────────────────────────────

/// The path selected for a symmetry order.
#[derive(Debug, Clone)]
pub enum EstimationPath {
    ClosedForm(ClosedFormPath),
    General(GeneralPath),
}

impl EstimationPath {
    /// C3 and C4 use the closed form, n ≥ 5 candidate voting.
    pub fn from_config(config: &SymmetryConfig) -> Result<Self, EstimationError> {
        match config.n_symm {
            3 | 4 => Ok(Self::ClosedForm(ClosedFormPath::new(config.clone())?)),
            n if n >= 5 => Ok(Self::General(GeneralPath::new(config.clone())?)),
            n => Err(EstimationError::UnsupportedSymmetry {
                n_symm: n,
                path: "any",
            }),
        }
    }
}

impl ViewingDirectionEstimator for EstimationPath {
    fn estimate(
        &self,
        stack: &PolarStack,
        gt: Option<&[Matrix3<f64>]>,
    ) -> anyhow::Result<Estimate> {
        match self {
            Self::ClosedForm(path) => path.estimate(stack, gt),
            Self::General(path) => path.estimate(stack, gt),
        }
    }
}

/// Select a path from `config` and run it.
pub fn estimate_relative_viewing_directions(
    stack: &PolarStack,
    gt: Option<&[Matrix3<f64>]>,
    config: &SymmetryConfig,
) -> anyhow::Result<Estimate> {
    EstimationPath::from_config(config)?.estimate(stack, gt)
}
