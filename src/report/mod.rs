//! Reporting utilities: per-pulse misfit and formatted terminal output.

pub mod format;

pub use format::*;

use crate::domain::{InversionResult, Sounding};
use crate::error::InversionError;

/// Weighted RMS misfit of one pulse moment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PulseResidual {
    pub pulse: usize,
    pub rms: f64,
}

/// `sqrt(mean_t(((d - f) / err)²))` per pulse moment.
pub fn pulse_residuals(sounding: &Sounding, result: &InversionResult) -> Result<Vec<PulseResidual>, InversionError> {
    let response = &result.response;
    if response.shape() != sounding.amplitude().shape() {
        return Err(InversionError::DimensionMismatch(format!(
            "response is {:?} but sounding is {:?}",
            response.shape(),
            sounding.amplitude().shape()
        )));
    }

    let weighted = (sounding.amplitude() - response).component_div(sounding.error());
    Ok(weighted
        .row_iter()
        .enumerate()
        .map(|(pulse, row)| PulseResidual {
            pulse,
            rms: (row.norm_squared() / row.len() as f64).sqrt(),
        })
        .collect())
}
