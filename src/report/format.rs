//! Formatted terminal output.
//!
//! We keep formatting code in one place so:
//! - the inversion code stays free of presentation concerns
//! - output changes are localized

use crate::domain::{InversionConfig, InversionResult, ParamClass, param_class};
use crate::report::PulseResidual;

/// Format the full run summary (run diagnostics + layer table).
pub fn format_run_summary(result: &InversionResult, config: &InversionConfig, residuals: &[PulseResidual]) -> String {
    let mut out = String::new();

    out.push_str("=== mrs - MRS block inversion ===\n");
    out.push_str(&format!(
        "Layers: {} | lambda0={} | chi2 target={}\n",
        config.n_layers, config.lambda0, config.chi_square_target
    ));
    out.push_str(&format!(
        "Status: {:?} after {} iteration(s) | chi2={:.4} | lambda={:.4}\n",
        result.status, result.iterations, result.chi_square, result.lambda
    ));

    out.push('\n');
    out.push_str(&format_layer_table(result));

    if !residuals.is_empty() {
        out.push_str("\nWeighted RMS per pulse moment:\n");
        for r in residuals {
            out.push_str(&format!("  q{:<3} {:>8.3}\n", r.pulse + 1, r.rms));
        }
    }

    if let Some(u) = &result.uncertainty {
        out.push_str("\nScaled model covariance:\n");
        out.push_str(&format_matrix(&u.covariance.scaled, result.model.n_layers()));
    }
    out.push('\n');

    out
}

/// Layer table: top depth, water content and T2*, with bounds if available.
pub fn format_layer_table(result: &InversionResult) -> String {
    let mut out = String::new();
    let rows = result.layer_rows();
    let with_bounds = rows.iter().any(|r| r.bounds.is_some());

    let header = if with_bounds {
        format!(
            "{:>5} {:>20} {:>24} {:>24}",
            "layer", "top [m]", "water content", "T2* [s]"
        )
    } else {
        format!("{:>5} {:>10} {:>14} {:>10}", "layer", "top [m]", "water content", "T2* [s]")
    };
    out.push_str(&header);
    out.push('\n');
    out.push_str(&"-".repeat(header.len()));
    out.push('\n');

    for (i, row) in rows.iter().enumerate() {
        let line = match &row.bounds {
            Some(b) => format!(
                "{:>5} {:>20} {:>24} {:>24}",
                i + 1,
                with_range(row.depth, b.depth, 2),
                with_range(row.water_content, b.water_content, 3),
                with_range(row.relaxation_time, b.relaxation_time, 3),
            ),
            None => format!(
                "{:>5} {:>10.2} {:>14.3} {:>10.3}",
                i + 1,
                row.depth,
                row.water_content,
                row.relaxation_time
            ),
        };
        out.push_str(line.trim_end());
        out.push('\n');
    }

    out
}

fn with_range(value: f64, (lo, hi): (f64, f64), precision: usize) -> String {
    format!("{value:.precision$} [{lo:.precision$}, {hi:.precision$}]")
}

fn format_matrix(m: &nalgebra::DMatrix<f64>, n_layers: usize) -> String {
    let mut out = String::new();
    for i in 0..m.nrows() {
        out.push_str(&format!("  {:>4}", param_label(n_layers, i)));
        for j in 0..m.ncols() {
            out.push_str(&format!(" {:>6.2}", m[(i, j)]));
        }
        out.push('\n');
    }
    out
}

/// Short parameter label, e.g. `d1`, `w2`, `t3`.
pub fn param_label(n_layers: usize, index: usize) -> String {
    let class = param_class(n_layers, index);
    let k = index - class.offset(n_layers) + 1;
    let prefix = match class {
        ParamClass::Thickness => 'd',
        ParamClass::WaterContent => 'w',
        ParamClass::RelaxationTime => 't',
    };
    format!("{prefix}{k}")
}

pub fn fmt_vec(v: &[f64]) -> String {
    let parts: Vec<String> = v.iter().map(|x| format!("{x:.6}")).collect();
    format!("[{}]", parts.join(", "))
}
