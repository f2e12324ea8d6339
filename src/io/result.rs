//! Portable JSON representation of an inversion result.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::{
    InversionConfig, InversionResult, InversionStatus, IterationRecord, LayeredModel, UncertaintyBounds,
};
use crate::error::InversionError;
use crate::io::ingest::{matrix_to_rows, write_json};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultFile {
    pub tool: String,
    pub config: InversionConfig,
    pub model: LayeredModel,
    pub status: InversionStatus,
    pub chi_square: f64,
    pub iterations: usize,
    pub lambda: f64,
    pub history: Vec<IterationRecord>,
    /// Predicted amplitudes, one row per pulse moment.
    pub response: Vec<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uncertainty: Option<UncertaintyFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UncertaintyFile {
    pub variances: Vec<f64>,
    pub scaled_covariance: Vec<Vec<f64>>,
    pub bounds: UncertaintyBounds,
}

impl ResultFile {
    pub fn new(result: &InversionResult, config: &InversionConfig) -> Self {
        Self {
            tool: "mrs".to_string(),
            config: config.clone(),
            model: result.model.clone(),
            status: result.status,
            chi_square: result.chi_square,
            iterations: result.iterations,
            lambda: result.lambda,
            history: result.history.clone(),
            response: matrix_to_rows(&result.response),
            uncertainty: result.uncertainty.as_ref().map(|u| UncertaintyFile {
                variances: u.covariance.variances.clone(),
                scaled_covariance: matrix_to_rows(&u.covariance.scaled),
                bounds: u.bounds.clone(),
            }),
        }
    }
}

pub fn write_result_json(path: &Path, result: &InversionResult, config: &InversionConfig) -> Result<(), InversionError> {
    write_json(path, &ResultFile::new(result, config), "result")
}

pub fn read_result_json(path: &Path) -> Result<ResultFile, InversionError> {
    let file = std::fs::File::open(path)
        .map_err(|e| InversionError::io(format!("failed to open result file '{}'", path.display()), e))?;
    serde_json::from_reader(std::io::BufReader::new(file))
        .map_err(|e| InversionError::Format(format!("invalid result JSON: {e}")))
}
