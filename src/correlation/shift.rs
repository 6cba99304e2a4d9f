//! 1D shift search along common lines.
//!
//! A translation of the image by `s` pixels along a ray multiplies radial
//! sample `k` by `exp(−2πi·k·s/(2·n_r − 1))`. Each entry of the bank holds
//! that phase vector for one candidate shift.

use std::f64::consts::TAU;

use crate::config::SymmetryConfig;
use crate::polar::RayBank;
use crate::Complex64;

/// Phase vectors for every candidate 1D shift.
#[derive(Debug, Clone)]
pub struct ShiftPhaseBank {
    shifts: Vec<f64>,
    n_r: usize,
    phases: Vec<Complex64>,
}

impl ShiftPhaseBank {
    /// Shifts from `−max_shift_1d` to `+max_shift_1d` (inclusive) in
    /// `shift_step` increments. A zero maximum yields the single shift 0.
    pub fn new(n_r: usize, max_shift_1d: f64, shift_step: f64) -> Self {
        let n_shifts = if max_shift_1d > 0.0 && shift_step > 0.0 {
            (2.0 * max_shift_1d / shift_step).floor() as usize + 1
        } else {
            1
        };
        let shifts: Vec<f64> = (0..n_shifts)
            .map(|idx| -max_shift_1d + idx as f64 * shift_step)
            .collect();
        let denom = (2 * n_r - 1) as f64;
        let mut phases = Vec::with_capacity(n_shifts * n_r);
        for &s in &shifts {
            phases.extend((0..n_r).map(|k| Complex64::from_polar(1.0, -TAU * k as f64 * s / denom)));
        }
        Self { shifts, n_r, phases }
    }

    pub fn from_config(config: &SymmetryConfig) -> Self {
        Self::new(config.n_r, config.max_shift_1d(), config.shift_step)
    }

    pub fn len(&self) -> usize {
        self.shifts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shifts.is_empty()
    }

    /// Shift value (pixels) of entry `index`.
    pub fn shift(&self, index: usize) -> f64 {
        self.shifts[index]
    }

    pub fn phases(&self, index: usize) -> &[Complex64] {
        &self.phases[index * self.n_r..(index + 1) * self.n_r]
    }

    /// The first `n_theta/2` raw rays of `image`, multiplied by every phase
    /// vector, then DC-removed and normalized.
    ///
    /// Ray `l` under shift `s` is at index `s·(n_theta/2) + l`.
    pub fn shifted_half_rays(&self, image: &nalgebra::DMatrix<Complex64>) -> RayBank {
        let (n_theta, n_r) = image.shape();
        let half = n_theta / 2;
        let mut data = Vec::with_capacity(self.len() * half * n_r);
        for s in 0..self.len() {
            let phase = self.phases(s);
            for l in 0..half {
                data.extend(image.row(l).iter().zip(phase).map(|(v, p)| v * p));
            }
        }
        let mut bank = RayBank::from_raw(self.len() * half, n_r, data);
        bank.normalize();
        bank
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_shift_bank() {
        let bank = ShiftPhaseBank::new(8, 0.0, 1.0);
        assert_eq!(bank.len(), 1);
        assert_eq!(bank.shift(0), 0.0);
        assert!(bank.phases(0).iter().all(|p| (p - Complex64::new(1.0, 0.0)).norm() < 1e-15));
    }

    #[test]
    fn test_shift_range() {
        let bank = ShiftPhaseBank::new(10, 3.0, 1.0);
        assert_eq!(bank.len(), 7);
        assert_eq!(bank.shift(0), -3.0);
        assert_eq!(bank.shift(6), 3.0);
        // Opposite shifts carry conjugate phases.
        for (a, b) in bank.phases(0).iter().zip(bank.phases(6)) {
            assert!((a - b.conj()).norm() < 1e-12);
        }
        // Phase at k=0 is always one.
        assert!((bank.phases(2)[0] - Complex64::new(1.0, 0.0)).norm() < 1e-15);
    }

    #[test]
    fn test_config_bank_uses_projected_shift() {
        let config = SymmetryConfig {
            max_shift: 1.0,
            shift_step: 1.0,
            ..SymmetryConfig::new(3, 8, 4)
        };
        // ceil(2·√2) = 3, so shifts −3..=3.
        assert_eq!(ShiftPhaseBank::from_config(&config).len(), 7);
    }
}
