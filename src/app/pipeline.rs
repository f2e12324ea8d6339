//! Shared inversion pipeline used by the `invert` and `demo` commands.
//!
//! Keeping this in one place avoids duplicating the core workflow:
//! config resolution -> inversion -> residual summary -> exports
//!
//! The commands can then focus on where their kernel and sounding come from.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use tracing::info;

use crate::cli::{ModelArgs, NoiseArgs, SolverArgs};
use crate::data::{NoiseModel, linear_gates, simulate};
use crate::domain::{DEFAULT_NOISE_FLOOR, InversionConfig, InversionResult, KernelModel, LayeredModel, Sounding};
use crate::error::{AppError, InversionError};
use crate::fit::invert;
use crate::models::ForwardOperator;
use crate::report::{PulseResidual, pulse_residuals};

/// All computed outputs of a single inversion run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub config: InversionConfig,
    pub result: InversionResult,
    pub residuals: Vec<PulseResidual>,
}

/// Load the config file (if any) and apply flag overrides on top.
pub fn resolve_config(args: &SolverArgs, default_layers: Option<usize>) -> Result<InversionConfig, AppError> {
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => InversionConfig::default(),
    };

    if let Some(n) = args.layers.or(if args.config.is_none() { default_layers } else { None }) {
        config.n_layers = n;
    }
    if let Some(v) = args.lambda0 {
        config.lambda0 = v;
    }
    if let Some(v) = args.lambda_factor {
        config.lambda_factor = v;
    }
    if let Some(v) = args.lambda_min_ratio {
        config.lambda_min_ratio = v;
    }
    if let Some(v) = args.max_iter {
        config.max_iter = v;
    }
    if let Some(v) = args.chi_square_target {
        config.chi_square_target = v;
    }
    if args.uncertainty {
        config.uncertainty = true;
    }

    config.validate()?;
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<InversionConfig, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open config '{}': {e}", path.display())))?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| AppError::new(2, format!("Invalid config JSON '{}': {e}", path.display())))
}

/// Invert and summarize.
pub fn run_inversion(
    kernel: &KernelModel,
    sounding: &Sounding,
    config: InversionConfig,
) -> Result<RunOutput, AppError> {
    info!(
        pulses = sounding.n_pulses(),
        gates = sounding.n_times(),
        layers = config.n_layers,
        "starting inversion"
    );
    let result = invert(kernel, sounding, &config)?;
    let residuals = pulse_residuals(sounding, &result)?;
    Ok(RunOutput {
        config,
        result,
        residuals,
    })
}

/// Build a layered model from CLI class lists.
pub fn model_from_args(args: &ModelArgs) -> Result<LayeredModel, InversionError> {
    LayeredModel::new(
        args.thickness.clone(),
        args.water_content.clone(),
        args.relaxation_time.clone(),
    )
}

/// Simulate a noisy sounding for `model` on the gates described by `noise`.
pub fn simulate_sounding(
    kernel: &KernelModel,
    model: &LayeredModel,
    noise: &NoiseArgs,
) -> Result<Sounding, InversionError> {
    let times = linear_gates(noise.gates, noise.first_gate, noise.gate_spacing);
    let forward = ForwardOperator::new(kernel, &times, model.n_layers())?;
    let noise_model = NoiseModel {
        absolute: noise.noise_abs,
        relative_percent: noise.noise_rel,
    };
    simulate(&forward, model, noise_model, noise.seed, DEFAULT_NOISE_FLOOR)
}
