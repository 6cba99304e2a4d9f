//! Precomputed common-line indices for every candidate pair.
//!
//! For candidates `R̃ᵢ`, `R̃ⱼ` and in-plane rotation `Rθ`, the cache stores
//! the canonical common-line pair of `R̃ᵢᵗ·Rθ·R̃ⱼ`. Building it is
//! O(M²·K), so it is persisted with [rkyv](https://docs.rs/rkyv) and loaded
//! by later runs; a header carries a magic tag, a format version and the
//! array dimensions so that stale or foreign files are rejected.

pub mod build;

pub use build::{cache_file_name, create_cache, self_line_indices};

use std::path::Path;

use anyhow::Context;
use nalgebra::Matrix3;
use rkyv::{Archive, Deserialize, Serialize};
use tracing::info;

use crate::candidates::CandidateSet;
use crate::error::EstimationError;

/// File tag identifying a line-index cache.
pub const CACHE_MAGIC: [u8; 8] = *b"CNLIDXC\0";
/// Current on-disk layout version.
pub const CACHE_VERSION: u32 = 1;

/// Dimensions and identity of a stored cache.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CacheHeader {
    pub magic: [u8; 8],
    pub version: u32,
    /// Number of candidate rotations M.
    pub n_candidates: u32,
    /// Angular sampling the indices were computed for.
    pub n_theta: u32,
    /// Number of in-plane rotations K.
    pub n_inplane: u32,
    /// In-plane resolution in degrees.
    pub inplane_res_deg: f64,
}

/// Common-line index table plus the rotations it was computed from.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LineIndexCache {
    pub header: CacheHeader,
    /// M·M·K canonical line pairs, row-major over (i, j, t).
    pub cijs_inds: Vec<[u16; 2]>,
    /// Candidate rotations, row-major 3×3.
    pub candidates: Vec<[[f64; 3]; 3]>,
    /// In-plane rotations, row-major 3×3.
    pub inplane: Vec<[[f64; 3]; 3]>,
    pub n_theta: u32,
}

pub(crate) fn to_rows(m: &Matrix3<f64>) -> [[f64; 3]; 3] {
    [
        [m[(0, 0)], m[(0, 1)], m[(0, 2)]],
        [m[(1, 0)], m[(1, 1)], m[(1, 2)]],
        [m[(2, 0)], m[(2, 1)], m[(2, 2)]],
    ]
}

fn from_rows(rows: &[[f64; 3]; 3]) -> Matrix3<f64> {
    Matrix3::new(
        rows[0][0], rows[0][1], rows[0][2], rows[1][0], rows[1][1], rows[1][2], rows[2][0],
        rows[2][1], rows[2][2],
    )
}

impl LineIndexCache {
    pub fn n_candidates(&self) -> usize {
        self.candidates.len()
    }

    pub fn n_inplane(&self) -> usize {
        self.inplane.len()
    }

    pub fn n_theta(&self) -> usize {
        self.n_theta as usize
    }

    /// Canonical line pair for candidates `(i, j)` and in-plane index `t`.
    #[inline]
    pub fn get(&self, i: usize, j: usize, t: usize) -> [u16; 2] {
        let m = self.candidates.len();
        let k = self.inplane.len();
        self.cijs_inds[(i * m + j) * k + t]
    }

    /// All K line pairs of candidate pair `(i, j)`.
    #[inline]
    pub fn pair_lines(&self, i: usize, j: usize) -> &[[u16; 2]] {
        let m = self.candidates.len();
        let k = self.inplane.len();
        let start = (i * m + j) * k;
        &self.cijs_inds[start..start + k]
    }

    pub fn candidate_rotations(&self) -> Vec<Matrix3<f64>> {
        self.candidates.iter().map(from_rows).collect()
    }

    pub fn inplane_rotations(&self) -> Vec<Matrix3<f64>> {
        self.inplane.iter().map(from_rows).collect()
    }

    /// The candidate set the cache was built from.
    pub fn candidate_set(&self) -> CandidateSet {
        CandidateSet {
            rotations: self.candidate_rotations(),
            inplane: self.inplane_rotations(),
            inplane_res_deg: self.header.inplane_res_deg,
        }
    }

    /// Check the header against the stored arrays.
    pub fn validate(&self) -> Result<(), EstimationError> {
        let h = &self.header;
        if h.magic != CACHE_MAGIC {
            return Err(EstimationError::InvalidCache("bad magic tag".into()));
        }
        if h.version != CACHE_VERSION {
            return Err(EstimationError::InvalidCache(format!(
                "format version {} (expected {})",
                h.version, CACHE_VERSION
            )));
        }
        let m = self.candidates.len();
        let k = self.inplane.len();
        if h.n_candidates as usize != m || h.n_inplane as usize != k || h.n_theta != self.n_theta {
            return Err(EstimationError::InvalidCache(format!(
                "header says {}x{} candidates/in-plane at n_theta={}, arrays hold {}x{} at n_theta={}",
                h.n_candidates, h.n_inplane, h.n_theta, m, k, self.n_theta
            )));
        }
        if self.cijs_inds.len() != m * m * k {
            return Err(EstimationError::InvalidCache(format!(
                "expected {} line pairs, found {}",
                m * m * k,
                self.cijs_inds.len()
            )));
        }
        let n_theta = self.n_theta as usize;
        let half = n_theta / 2;
        if self
            .cijs_inds
            .iter()
            .any(|p| p[0] as usize >= half || p[1] as usize >= n_theta)
        {
            return Err(EstimationError::InvalidCache(
                "line index out of range".into(),
            ));
        }
        Ok(())
    }

    /// [`validate`](Self::validate), then require the cache's angular
    /// sampling to match the images'.
    pub fn validate_for(&self, n_theta: usize) -> Result<(), EstimationError> {
        self.validate()?;
        if self.n_theta as usize != n_theta {
            return Err(EstimationError::CacheThetaMismatch {
                cache: self.n_theta as usize,
                images: n_theta,
            });
        }
        Ok(())
    }
}

// ── Serialization ───────────────────────────────────────────────────────────

impl LineIndexCache {
    /// Serialize the cache to bytes using rkyv.
    pub fn to_rkyv_bytes(&self) -> anyhow::Result<Vec<u8>> {
        let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map_err(|e| anyhow::anyhow!("rkyv serialization failed: {}", e))?;
        Ok(bytes.to_vec())
    }

    /// Deserialize and validate a cache from rkyv bytes.
    pub fn from_rkyv_bytes(bytes: &[u8]) -> anyhow::Result<Self> {
        let mut aligned = rkyv::util::AlignedVec::<16>::with_capacity(bytes.len());
        aligned.extend_from_slice(bytes);
        let cache = rkyv::from_bytes::<Self, rkyv::rancor::Error>(&aligned)
            .map_err(|e| anyhow::anyhow!("rkyv deserialization failed: {}", e))?;
        cache.validate()?;
        Ok(cache)
    }

    /// Save the cache to a file using rkyv.
    pub fn save_to_file(&self, path: &Path) -> anyhow::Result<()> {
        let bytes = self.to_rkyv_bytes()?;
        std::fs::write(path, &bytes)
            .with_context(|| format!("writing line-index cache {}", path.display()))?;
        info!("Saved line-index cache to {} ({} bytes)", path.display(), bytes.len());
        Ok(())
    }

    /// Load a cache from an rkyv file.
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        info!("Loading line-index cache {}", path.display());
        let bytes = std::fs::read(path)
            .with_context(|| format!("reading line-index cache {}", path.display()))?;
        let cache = Self::from_rkyv_bytes(&bytes)
            .with_context(|| format!("decoding line-index cache {}", path.display()))?;
        info!(
            "Loaded line-index cache: {} candidates, {} in-plane rotations, n_theta={}",
            cache.n_candidates(),
            cache.n_inplane(),
            cache.n_theta
        );
        Ok(cache)
    }
}
