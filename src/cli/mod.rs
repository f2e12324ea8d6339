//! Command-line parsing for the MRS block inversion tool.
//!
//! The goal of this module is to keep **argument parsing** separate from the
//! inversion code. Flags here only override fields of `InversionConfig`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "mrs", version, about = "Magnetic resonance sounding block inversion")]
pub struct Cli {
    /// Log level used when `MRS_LOG` is not set (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: tracing::Level,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Invert a measured sounding for a layered water content / T2* model.
    Invert(InvertArgs),
    /// Forward-model a layered model and write a noisy sounding.
    Simulate(SimulateArgs),
    /// Synthetic kernel, simulated sounding and inversion, end to end.
    Demo(DemoArgs),
}

/// Solver options shared by `invert` and `demo`.
#[derive(Debug, Args, Clone, Default)]
pub struct SolverArgs {
    /// JSON file with inversion options; flags below override it.
    #[arg(long, value_name = "JSON")]
    pub config: Option<PathBuf>,

    /// Number of layers (the last one is a half-space).
    #[arg(short = 'n', long)]
    pub layers: Option<usize>,

    /// Initial regularization strength.
    #[arg(long)]
    pub lambda0: Option<f64>,

    /// Multiplier applied to lambda after an accepted step.
    #[arg(long)]
    pub lambda_factor: Option<f64>,

    /// Lambda stops decaying at lambda0 times this ratio.
    #[arg(long)]
    pub lambda_min_ratio: Option<f64>,

    /// Maximum number of iterations.
    #[arg(long)]
    pub max_iter: Option<usize>,

    /// Stop once chi-square falls below this value.
    #[arg(long = "chi2-target")]
    pub chi_square_target: Option<f64>,

    /// Estimate covariance and parameter bounds after the run.
    #[arg(long)]
    pub uncertainty: bool,

    /// Print the solved model table only.
    #[arg(long)]
    pub quiet: bool,

    /// Write the layer columns to CSV.
    #[arg(long, value_name = "CSV")]
    pub export_csv: Option<PathBuf>,

    /// Write the full result to JSON.
    #[arg(long, value_name = "JSON")]
    pub export_json: Option<PathBuf>,

    /// Write a markdown debug bundle into this directory.
    #[arg(long, value_name = "DIR")]
    pub debug_dir: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct InvertArgs {
    /// Kernel JSON (`depth`, `real`, `imag`).
    #[arg(long, value_name = "JSON")]
    pub kernel: PathBuf,

    /// Sounding JSON (`times`, `amplitude`, optional `error`).
    #[arg(long, value_name = "JSON")]
    pub data: PathBuf,

    /// Error used for samples without a positive error.
    #[arg(long, default_value_t = crate::domain::DEFAULT_NOISE_FLOOR)]
    pub noise_floor: f64,

    #[command(flatten)]
    pub solver: SolverArgs,
}

/// Layered model given class by class on the command line.
#[derive(Debug, Args, Clone)]
pub struct ModelArgs {
    /// Layer thicknesses in m (N - 1 values).
    #[arg(long, value_delimiter = ',', default_values_t = [5.0])]
    pub thickness: Vec<f64>,

    /// Water content per layer (N values).
    #[arg(long, value_delimiter = ',', default_values_t = [0.30, 0.10])]
    pub water_content: Vec<f64>,

    /// T2* per layer in s (N values).
    #[arg(long = "t2", value_delimiter = ',', default_values_t = [0.25, 0.05])]
    pub relaxation_time: Vec<f64>,
}

/// Noise and time sampling of a simulated sounding.
#[derive(Debug, Args, Clone)]
pub struct NoiseArgs {
    /// Absolute noise standard deviation.
    #[arg(long, default_value_t = 0.0)]
    pub noise_abs: f64,

    /// Relative noise in percent of each sample.
    #[arg(long, default_value_t = 2.0)]
    pub noise_rel: f64,

    /// Random seed for the noise.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Number of time gates.
    #[arg(long, default_value_t = 20)]
    pub gates: usize,

    /// First time gate in s.
    #[arg(long, default_value_t = 0.005)]
    pub first_gate: f64,

    /// Time gate spacing in s.
    #[arg(long, default_value_t = 0.01)]
    pub gate_spacing: f64,
}

#[derive(Debug, Args)]
pub struct SimulateArgs {
    /// Kernel JSON; a synthetic 10 x 50 kernel is used when omitted.
    #[arg(long, value_name = "JSON")]
    pub kernel: Option<PathBuf>,

    /// Output sounding JSON.
    #[arg(short, long, value_name = "JSON")]
    pub output: PathBuf,

    /// Also write the kernel used (handy with the synthetic kernel).
    #[arg(long, value_name = "JSON")]
    pub kernel_output: Option<PathBuf>,

    #[command(flatten)]
    pub model: ModelArgs,

    #[command(flatten)]
    pub noise: NoiseArgs,
}

#[derive(Debug, Args)]
pub struct DemoArgs {
    #[command(flatten)]
    pub model: ModelArgs,

    #[command(flatten)]
    pub noise: NoiseArgs,

    #[command(flatten)]
    pub solver: SolverArgs,
}
