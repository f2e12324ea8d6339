//! JSON ingest for kernels and soundings.
//!
//! Interchange layout (matrices are row-major, one row per pulse moment):
//!
//! ```text
//! kernel:   { "depth": [..Z], "real": [[..Z] ..Q], "imag": [[..Z] ..Q] }
//! sounding: { "times": [..T], "amplitude": [[..T] ..Q], "error": [[..T] ..Q] }
//! ```
//!
//! `error` may be omitted; every sample then gets the noise floor. Shape
//! checks are done here for ragged rows and by the domain constructors for
//! everything else.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::domain::{KernelModel, Sounding};
use crate::error::InversionError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelFile {
    pub depth: Vec<f64>,
    pub real: Vec<Vec<f64>>,
    pub imag: Vec<Vec<f64>>,
}

impl KernelFile {
    pub fn into_model(self) -> Result<KernelModel, InversionError> {
        let real = rows_to_matrix(&self.real, "kernel real part")?;
        let imag = rows_to_matrix(&self.imag, "kernel imaginary part")?;
        KernelModel::new(real, imag, self.depth)
    }
}

impl From<&KernelModel> for KernelFile {
    fn from(kernel: &KernelModel) -> Self {
        Self {
            depth: kernel.depth().to_vec(),
            real: matrix_to_rows(kernel.real()),
            imag: matrix_to_rows(kernel.imag()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoundingFile {
    pub times: Vec<f64>,
    pub amplitude: Vec<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Vec<Vec<f64>>>,
}

impl SoundingFile {
    pub fn into_sounding(self, noise_floor: f64) -> Result<Sounding, InversionError> {
        let amplitude = rows_to_matrix(&self.amplitude, "amplitude")?;
        let error = match &self.error {
            Some(rows) => rows_to_matrix(rows, "error")?,
            // Zeros are replaced by the floor.
            None => DMatrix::zeros(amplitude.nrows(), amplitude.ncols()),
        };
        Sounding::new(self.times, amplitude, error, noise_floor)
    }
}

impl From<&Sounding> for SoundingFile {
    fn from(sounding: &Sounding) -> Self {
        Self {
            times: sounding.times().to_vec(),
            amplitude: matrix_to_rows(sounding.amplitude()),
            error: Some(matrix_to_rows(sounding.error())),
        }
    }
}

pub fn parse_kernel_json<R: Read>(reader: R) -> Result<KernelModel, InversionError> {
    let file: KernelFile =
        serde_json::from_reader(reader).map_err(|e| InversionError::Format(format!("invalid kernel JSON: {e}")))?;
    file.into_model()
}

pub fn parse_sounding_json<R: Read>(reader: R, noise_floor: f64) -> Result<Sounding, InversionError> {
    let file: SoundingFile = serde_json::from_reader(reader)
        .map_err(|e| InversionError::Format(format!("invalid sounding JSON: {e}")))?;
    file.into_sounding(noise_floor)
}

pub fn read_kernel_json(path: &Path) -> Result<KernelModel, InversionError> {
    parse_kernel_json(open(path, "kernel")?)
}

pub fn read_sounding_json(path: &Path, noise_floor: f64) -> Result<Sounding, InversionError> {
    parse_sounding_json(open(path, "sounding")?, noise_floor)
}

pub fn write_kernel_json(path: &Path, kernel: &KernelModel) -> Result<(), InversionError> {
    write_json(path, &KernelFile::from(kernel), "kernel")
}

pub fn write_sounding_json(path: &Path, sounding: &Sounding) -> Result<(), InversionError> {
    write_json(path, &SoundingFile::from(sounding), "sounding")
}

fn open(path: &Path, what: &str) -> Result<BufReader<File>, InversionError> {
    let file = File::open(path)
        .map_err(|e| InversionError::io(format!("failed to open {what} file '{}'", path.display()), e))?;
    Ok(BufReader::new(file))
}

pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T, what: &str) -> Result<(), InversionError> {
    let file = File::create(path)
        .map_err(|e| InversionError::io(format!("failed to create {what} file '{}'", path.display()), e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)
        .map_err(|e| InversionError::io(format!("failed to write {what} JSON"), e))?;
    writer
        .flush()
        .map_err(|e| InversionError::io(format!("failed to write {what} JSON"), e))
}

/// Row-major nested vectors to a matrix. Ragged rows are a dimension mismatch.
pub fn rows_to_matrix(rows: &[Vec<f64>], label: &str) -> Result<DMatrix<f64>, InversionError> {
    let ncols = rows.first().map_or(0, Vec::len);
    if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != ncols) {
        return Err(InversionError::DimensionMismatch(format!(
            "{label} row {i} has {} entries, expected {ncols}",
            row.len()
        )));
    }
    Ok(DMatrix::from_fn(rows.len(), ncols, |r, c| rows[r][c]))
}

pub fn matrix_to_rows(m: &DMatrix<f64>) -> Vec<Vec<f64>> {
    m.row_iter().map(|row| row.iter().copied().collect()).collect()
}
