//! Debug bundle writer for inspecting an inversion run.
//!
//! The bundle is a markdown file with the effective configuration, the
//! iteration history, the final model and (if estimated) the covariance.

use std::fs::{File, create_dir_all};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;

use crate::domain::{InversionConfig, InversionResult, Sounding};
use crate::error::InversionError;
use crate::report::{fmt_vec, format_layer_table, param_label, pulse_residuals};

/// Write a bundle into `dir` and return its path.
pub fn write_debug_bundle(
    dir: &Path,
    result: &InversionResult,
    config: &InversionConfig,
    sounding: &Sounding,
) -> Result<PathBuf, InversionError> {
    create_dir_all(dir)
        .map_err(|e| InversionError::io(format!("failed to create debug dir '{}'", dir.display()), e))?;

    let ts = Local::now().format("%Y%m%d_%H%M%S");
    let path = dir.join(format!("mrs_debug_n{}_{ts}.md", config.n_layers));

    let text = render_debug_bundle(result, config, sounding)?;
    let mut file = File::create(&path)
        .map_err(|e| InversionError::io(format!("failed to create debug file '{}'", path.display()), e))?;
    file.write_all(text.as_bytes())
        .map_err(|e| InversionError::io("failed to write debug file", e))?;

    Ok(path)
}

/// Markdown body of the debug bundle.
pub fn render_debug_bundle(
    result: &InversionResult,
    config: &InversionConfig,
    sounding: &Sounding,
) -> Result<String, InversionError> {
    let mut out = String::new();
    let n = config.n_layers;

    out.push_str("# mrs debug bundle\n");
    out.push_str(&format!("- generated: {}\n", Local::now().to_rfc3339()));
    out.push_str(&format!(
        "- data: {} pulse moments x {} time gates\n",
        sounding.n_pulses(),
        sounding.n_times()
    ));
    out.push_str(&format!("- status: {:?}\n", result.status));
    out.push_str(&format!("- iterations: {}\n", result.iterations));
    out.push_str(&format!("- chi2: {:.6}\n", result.chi_square));
    out.push_str(&format!("- lambda: {:.6}\n", result.lambda));

    let config_json = serde_json::to_string_pretty(config)
        .map_err(|e| InversionError::Format(format!("failed to serialize config: {e}")))?;
    out.push_str(&format!("\n## Configuration\n```json\n{config_json}\n```\n"));

    out.push_str("\n## Iterations\n");
    out.push_str("| iter | chi2 | lambda | retries | params |\n");
    out.push_str("| - | - | - | - | - |\n");
    for record in &result.history {
        out.push_str(&format!(
            "| {} | {:.6} | {:.4} | {} | {} |\n",
            record.iteration,
            record.chi_square,
            record.lambda,
            record.retries,
            fmt_vec(&record.params)
        ));
    }

    out.push_str(&format!("\n## Model\n```text\n{}```\n", format_layer_table(result)));

    out.push_str("\n## Misfit per pulse moment\n");
    out.push_str("| q | rms |\n");
    out.push_str("| - | - |\n");
    for r in pulse_residuals(sounding, result)? {
        out.push_str(&format!("| {} | {:.4} |\n", r.pulse + 1, r.rms));
    }

    if let Some(u) = &result.uncertainty {
        out.push_str("\n## Covariance\n");
        out.push_str("| param | value | std | lower | upper |\n");
        out.push_str("| - | - | - | - | - |\n");
        let params = result.params();
        for (i, sigma) in u.covariance.standard_deviations().iter().enumerate() {
            out.push_str(&format!(
                "| {} | {:.6} | {:.6} | {:.6} | {:.6} |\n",
                param_label(n, i),
                params[i],
                sigma,
                u.bounds.lower[i],
                u.bounds.upper[i]
            ));
        }
    }

    Ok(out)
}
