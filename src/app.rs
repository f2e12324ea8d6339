//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments and installs logging
//! - loads or synthesizes kernel and sounding
//! - runs the inversion
//! - prints reports and writes optional exports

use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use crate::cli::{Cli, Command, DemoArgs, InvertArgs, SimulateArgs, SolverArgs};
use crate::data::gaussian_kernel;
use crate::domain::{KernelModel, Sounding};
use crate::error::AppError;

pub mod pipeline;

/// Environment variable holding a `tracing` filter directive.
pub const LOG_ENV: &str = "MRS_LOG";

/// Synthetic kernel used when no kernel file is given.
const DEMO_PULSES: usize = 10;
const DEMO_DEPTHS: usize = 50;
const DEMO_DZ: f64 = 1.0;

/// Entry point for the `mrs` binary.
pub fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    init_tracing(cli.log_level);

    match cli.command {
        Command::Invert(args) => handle_invert(args),
        Command::Simulate(args) => handle_simulate(args),
        Command::Demo(args) => handle_demo(args),
    }
}

/// `MRS_LOG` wins over `--log-level`; logs go to stderr.
fn init_tracing(level: tracing::Level) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::default().add_directive(LevelFilter::from_level(level).into()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn handle_invert(args: InvertArgs) -> Result<(), AppError> {
    let kernel = crate::io::read_kernel_json(&args.kernel)?;
    let sounding = crate::io::read_sounding_json(&args.data, args.noise_floor)?;
    invert_and_report(&kernel, &sounding, &args.solver, None)
}

fn handle_simulate(args: SimulateArgs) -> Result<(), AppError> {
    let kernel = match &args.kernel {
        Some(path) => crate::io::read_kernel_json(path)?,
        None => gaussian_kernel(DEMO_PULSES, DEMO_DEPTHS, DEMO_DZ)?,
    };
    let model = pipeline::model_from_args(&args.model)?;
    let sounding = pipeline::simulate_sounding(&kernel, &model, &args.noise)?;

    crate::io::write_sounding_json(&args.output, &sounding)?;
    if let Some(path) = &args.kernel_output {
        crate::io::write_kernel_json(path, &kernel)?;
    }
    println!(
        "Wrote {} x {} sounding to {}",
        sounding.n_pulses(),
        sounding.n_times(),
        args.output.display()
    );
    Ok(())
}

fn handle_demo(args: DemoArgs) -> Result<(), AppError> {
    let kernel = gaussian_kernel(DEMO_PULSES, DEMO_DEPTHS, DEMO_DZ)?;
    let truth = pipeline::model_from_args(&args.model)?;
    let sounding = pipeline::simulate_sounding(&kernel, &truth, &args.noise)?;

    println!("True model:");
    println!("  thickness     : {}", crate::report::fmt_vec(&truth.thickness));
    println!("  water content : {}", crate::report::fmt_vec(&truth.water_content));
    println!("  T2*           : {}", crate::report::fmt_vec(&truth.relaxation_time));
    println!();

    invert_and_report(&kernel, &sounding, &args.solver, Some(truth.n_layers()))
}

fn invert_and_report(
    kernel: &KernelModel,
    sounding: &Sounding,
    solver: &SolverArgs,
    default_layers: Option<usize>,
) -> Result<(), AppError> {
    let config = pipeline::resolve_config(solver, default_layers)?;
    let run = pipeline::run_inversion(kernel, sounding, config)?;

    if solver.quiet {
        println!("{}", crate::report::format_layer_table(&run.result));
    } else {
        println!(
            "{}",
            crate::report::format_run_summary(&run.result, &run.config, &run.residuals)
        );
    }

    // Optional exports.
    if let Some(path) = &solver.export_csv {
        crate::io::write_model_csv(path, &run.result)?;
    }
    if let Some(path) = &solver.export_json {
        crate::io::write_result_json(path, &run.result, &run.config)?;
    }
    if let Some(dir) = &solver.debug_dir {
        let path = crate::debug::write_debug_bundle(dir, &run.result, &run.config, sounding)?;
        println!("Debug bundle: {}", path.display());
    }

    Ok(())
}
