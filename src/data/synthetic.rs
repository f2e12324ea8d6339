//! Synthetic kernels and soundings for demos and tests.

use nalgebra::DMatrix;
use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;
use serde::{Deserialize, Serialize};

use crate::domain::{KernelModel, LayeredModel, Sounding};
use crate::error::InversionError;
use crate::models::ForwardOperator;

/// Peak sensitivity scale of [`gaussian_kernel`].
const KERNEL_SCALE: f64 = 400.0;

/// Smooth complex kernel with one Gaussian sensitivity peak per pulse moment.
///
/// Peaks move deeper and widen with increasing pulse moment, like the
/// sensitivity of a real loop, and the phase grows with depth.
pub fn gaussian_kernel(n_pulses: usize, n_depths: usize, dz: f64) -> Result<KernelModel, InversionError> {
    if !(dz.is_finite() && dz > 0.0) {
        return Err(InversionError::InvalidConfiguration(format!(
            "depth spacing must be > 0, got {dz}"
        )));
    }
    let depth: Vec<f64> = (0..n_depths).map(|i| i as f64 * dz).collect();

    let mut real = DMatrix::zeros(n_pulses, n_depths);
    let mut imag = DMatrix::zeros(n_pulses, n_depths);
    for q in 0..n_pulses {
        let center = 1.5 + 4.0 * q as f64;
        let width = 2.0 + 0.5 * center;
        for (z, &top) in depth.iter().enumerate() {
            let mid = top + 0.5 * dz;
            let s = KERNEL_SCALE * (-((mid - center) / width).powi(2)).exp() * dz / width;
            let phase = 0.3 * q as f64 * mid / 20.0;
            real[(q, z)] = s * phase.cos();
            imag[(q, z)] = s * phase.sin();
        }
    }

    KernelModel::new(real, imag, depth)
}

/// Equally spaced time gates `first, first + spacing, ...`.
pub fn linear_gates(n: usize, first: f64, spacing: f64) -> Vec<f64> {
    (0..n).map(|k| first + spacing * k as f64).collect()
}

/// Gaussian noise added by [`simulate`].
///
/// The standard deviation of a sample with noiseless amplitude `d` is
/// `sqrt(absolute² + (relative_percent / 100 · d)²)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseModel {
    pub absolute: f64,
    pub relative_percent: f64,
}

impl NoiseModel {
    pub fn absolute(sigma: f64) -> Self {
        Self {
            absolute: sigma,
            relative_percent: 0.0,
        }
    }

    pub fn relative(percent: f64) -> Self {
        Self {
            absolute: 0.0,
            relative_percent: percent,
        }
    }

    fn sigma(&self, amplitude: f64) -> f64 {
        self.absolute.hypot(self.relative_percent / 100.0 * amplitude)
    }
}

/// Forward-model `model` and add seeded Gaussian noise.
///
/// The returned error cube holds the noise standard deviation; samples without
/// noise get `noise_floor`.
pub fn simulate(
    forward: &ForwardOperator<'_>,
    model: &LayeredModel,
    noise: NoiseModel,
    seed: u64,
    noise_floor: f64,
) -> Result<Sounding, InversionError> {
    if !(noise.absolute.is_finite() && noise.absolute >= 0.0)
        || !(noise.relative_percent.is_finite() && noise.relative_percent >= 0.0)
    {
        return Err(InversionError::InvalidConfiguration(
            "noise levels must be finite and >= 0".into(),
        ));
    }

    let clean = forward.response(model)?;
    let error = clean.map(|d| noise.sigma(d));

    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0, 1.0)
        .map_err(|e| InversionError::InvalidConfiguration(format!("noise distribution error: {e}")))?;
    let noisy = clean.zip_map(&error, |d, s| d + s * normal.sample(&mut rng));

    Sounding::new(forward.times().to_vec(), noisy, error, noise_floor)
}
