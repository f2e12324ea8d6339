//! Shared domain types.
//!
//! Kernels and soundings are plain data holders: their constructors validate
//! shapes and values once, so the forward operator and the solver can index
//! them without re-checking.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::error::InversionError;

/// Noise floor substituted for non-positive error entries when none is given.
pub const DEFAULT_NOISE_FLOOR: f64 = 1.0;

/// The three parameter classes of a layered model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamClass {
    Thickness,
    WaterContent,
    RelaxationTime,
}

impl ParamClass {
    pub const ALL: [ParamClass; 3] = [
        ParamClass::Thickness,
        ParamClass::WaterContent,
        ParamClass::RelaxationTime,
    ];

    /// Human-readable label for terminal output.
    pub fn display_name(self) -> &'static str {
        match self {
            ParamClass::Thickness => "thickness",
            ParamClass::WaterContent => "water content",
            ParamClass::RelaxationTime => "T2*",
        }
    }

    /// Number of parameters of this class in an `n_layers` model.
    pub fn count(self, n_layers: usize) -> usize {
        match self {
            ParamClass::Thickness => n_layers.saturating_sub(1),
            ParamClass::WaterContent | ParamClass::RelaxationTime => n_layers,
        }
    }

    /// Offset of this class inside the flattened parameter vector.
    pub fn offset(self, n_layers: usize) -> usize {
        match self {
            ParamClass::Thickness => 0,
            ParamClass::WaterContent => n_layers.saturating_sub(1),
            ParamClass::RelaxationTime => (2 * n_layers).saturating_sub(1),
        }
    }
}

/// Length of the flattened parameter vector: `3N - 1`.
pub fn param_count(n_layers: usize) -> usize {
    (3 * n_layers).saturating_sub(1)
}

/// Class of the parameter at `index` in an `n_layers` model.
pub fn param_class(n_layers: usize, index: usize) -> ParamClass {
    if index < ParamClass::WaterContent.offset(n_layers) {
        ParamClass::Thickness
    } else if index < ParamClass::RelaxationTime.offset(n_layers) {
        ParamClass::WaterContent
    } else {
        ParamClass::RelaxationTime
    }
}

/// One value per parameter class.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassTriple {
    pub thickness: f64,
    pub water_content: f64,
    pub relaxation_time: f64,
}

impl ClassTriple {
    pub const fn new(thickness: f64, water_content: f64, relaxation_time: f64) -> Self {
        Self {
            thickness,
            water_content,
            relaxation_time,
        }
    }

    pub fn get(&self, class: ParamClass) -> f64 {
        match class {
            ParamClass::Thickness => self.thickness,
            ParamClass::WaterContent => self.water_content,
            ParamClass::RelaxationTime => self.relaxation_time,
        }
    }

    /// Broadcast to a full parameter vector for `n_layers` layers.
    pub fn broadcast(&self, n_layers: usize) -> Vec<f64> {
        (0..param_count(n_layers))
            .map(|i| self.get(param_class(n_layers, i)))
            .collect()
    }
}

/// Complex sensitivity kernel sampled over pulse moments (rows) and depth
/// (columns).
#[derive(Debug, Clone)]
pub struct KernelModel {
    real: DMatrix<f64>,
    imag: DMatrix<f64>,
    depth: Vec<f64>,
}

impl KernelModel {
    pub fn new(real: DMatrix<f64>, imag: DMatrix<f64>, depth: Vec<f64>) -> Result<Self, InversionError> {
        if real.shape() != imag.shape() {
            return Err(InversionError::DimensionMismatch(format!(
                "kernel real part is {:?} but imaginary part is {:?}",
                real.shape(),
                imag.shape()
            )));
        }
        if real.nrows() == 0 || real.ncols() == 0 {
            return Err(InversionError::DimensionMismatch(
                "kernel must have at least one pulse moment and one depth sample".into(),
            ));
        }
        if depth.len() != real.ncols() {
            return Err(InversionError::DimensionMismatch(format!(
                "kernel has {} depth columns but {} depth samples",
                real.ncols(),
                depth.len()
            )));
        }
        if depth.iter().any(|z| !z.is_finite()) || depth.windows(2).any(|w| w[1] <= w[0]) {
            return Err(InversionError::InvalidConfiguration(
                "depth samples must be finite and strictly increasing".into(),
            ));
        }
        if real.iter().chain(imag.iter()).any(|v| !v.is_finite()) {
            return Err(InversionError::InvalidConfiguration(
                "kernel contains non-finite values".into(),
            ));
        }
        Ok(Self { real, imag, depth })
    }

    pub fn real(&self) -> &DMatrix<f64> {
        &self.real
    }

    pub fn imag(&self) -> &DMatrix<f64> {
        &self.imag
    }

    pub fn depth(&self) -> &[f64] {
        &self.depth
    }

    /// Number of pulse moments (Q).
    pub fn n_pulses(&self) -> usize {
        self.real.nrows()
    }

    /// Number of depth samples (Z).
    pub fn n_depths(&self) -> usize {
        self.real.ncols()
    }
}

/// Measured decay cube with per-sample standard deviations.
#[derive(Debug, Clone)]
pub struct Sounding {
    times: Vec<f64>,
    amplitude: DMatrix<f64>,
    error: DMatrix<f64>,
}

impl Sounding {
    /// Build a sounding. Error entries that are not strictly positive (or not
    /// finite) are replaced by `noise_floor`.
    pub fn new(
        times: Vec<f64>,
        amplitude: DMatrix<f64>,
        mut error: DMatrix<f64>,
        noise_floor: f64,
    ) -> Result<Self, InversionError> {
        if !(noise_floor.is_finite() && noise_floor > 0.0) {
            return Err(InversionError::InvalidConfiguration(format!(
                "noise floor must be finite and > 0, got {noise_floor}"
            )));
        }
        if amplitude.shape() != error.shape() {
            return Err(InversionError::DimensionMismatch(format!(
                "amplitude is {:?} but error is {:?}",
                amplitude.shape(),
                error.shape()
            )));
        }
        if amplitude.nrows() == 0 || amplitude.ncols() == 0 {
            return Err(InversionError::DimensionMismatch(
                "sounding must have at least one pulse moment and one time gate".into(),
            ));
        }
        if times.len() != amplitude.ncols() {
            return Err(InversionError::DimensionMismatch(format!(
                "sounding has {} time columns but {} time gates",
                amplitude.ncols(),
                times.len()
            )));
        }
        if times.iter().any(|t| !(t.is_finite() && *t > 0.0)) || times.windows(2).any(|w| w[1] <= w[0]) {
            return Err(InversionError::InvalidConfiguration(
                "time gates must be positive and strictly increasing".into(),
            ));
        }
        if amplitude.iter().any(|v| !v.is_finite()) {
            return Err(InversionError::InvalidConfiguration(
                "amplitude contains non-finite values".into(),
            ));
        }

        for e in error.iter_mut() {
            if !(e.is_finite() && *e > 0.0) {
                *e = noise_floor;
            }
        }

        Ok(Self {
            times,
            amplitude,
            error,
        })
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn amplitude(&self) -> &DMatrix<f64> {
        &self.amplitude
    }

    pub fn error(&self) -> &DMatrix<f64> {
        &self.error
    }

    pub fn n_pulses(&self) -> usize {
        self.amplitude.nrows()
    }

    pub fn n_times(&self) -> usize {
        self.amplitude.ncols()
    }
}

/// Block model: `N` layers, the last one a half-space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayeredModel {
    pub thickness: Vec<f64>,
    pub water_content: Vec<f64>,
    pub relaxation_time: Vec<f64>,
}

impl LayeredModel {
    pub fn new(
        thickness: Vec<f64>,
        water_content: Vec<f64>,
        relaxation_time: Vec<f64>,
    ) -> Result<Self, InversionError> {
        let n = water_content.len();
        if n == 0 {
            return Err(InversionError::DimensionMismatch("model needs at least one layer".into()));
        }
        if relaxation_time.len() != n || thickness.len() + 1 != n {
            return Err(InversionError::DimensionMismatch(format!(
                "model has {} thicknesses, {} water contents and {} T2* values",
                thickness.len(),
                n,
                relaxation_time.len()
            )));
        }
        Ok(Self {
            thickness,
            water_content,
            relaxation_time,
        })
    }

    /// Split a flattened `(thickness, water content, T2*)` vector.
    pub fn from_params(n_layers: usize, params: &[f64]) -> Result<Self, InversionError> {
        if n_layers == 0 {
            return Err(InversionError::DimensionMismatch("model needs at least one layer".into()));
        }
        if params.len() != param_count(n_layers) {
            return Err(InversionError::DimensionMismatch(format!(
                "{n_layers} layers need {} parameters, got {}",
                param_count(n_layers),
                params.len()
            )));
        }
        let wc = ParamClass::WaterContent.offset(n_layers);
        let t2 = ParamClass::RelaxationTime.offset(n_layers);
        Ok(Self {
            thickness: params[..wc].to_vec(),
            water_content: params[wc..t2].to_vec(),
            relaxation_time: params[t2..].to_vec(),
        })
    }

    pub fn to_params(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(param_count(self.n_layers()));
        out.extend_from_slice(&self.thickness);
        out.extend_from_slice(&self.water_content);
        out.extend_from_slice(&self.relaxation_time);
        out
    }

    pub fn n_layers(&self) -> usize {
        self.water_content.len()
    }

    /// Depth of each layer top (`0` for the first layer).
    pub fn layer_tops(&self) -> Vec<f64> {
        let mut tops = Vec::with_capacity(self.n_layers());
        let mut z = 0.0;
        tops.push(z);
        for &h in &self.thickness {
            z += h;
            tops.push(z);
        }
        tops
    }
}

/// Terminal state of a successful run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InversionStatus {
    Converged,
    MaxIterReached,
}

/// One accepted Marquardt step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: usize,
    pub chi_square: f64,
    /// Regularization strength after the step was accepted.
    pub lambda: f64,
    /// Rejected trial steps before this one was accepted.
    pub retries: usize,
    pub params: Vec<f64>,
}

/// Model covariance in physical parameter space.
#[derive(Debug, Clone)]
pub struct ModelCovariance {
    pub matrix: DMatrix<f64>,
    pub variances: Vec<f64>,
    /// Correlation matrix `cov_ij / sqrt(var_i var_j)`.
    pub scaled: DMatrix<f64>,
}

impl ModelCovariance {
    pub fn standard_deviations(&self) -> Vec<f64> {
        self.variances.iter().map(|v| v.max(0.0).sqrt()).collect()
    }
}

/// Local-linear bounds derived from the covariance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UncertaintyBounds {
    /// Per-parameter lower bound, same order as the parameter vector.
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
    /// Layer-top depth bounds, one entry per layer.
    pub depth_lower: Vec<f64>,
    pub depth_upper: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct Uncertainty {
    pub covariance: ModelCovariance,
    pub bounds: UncertaintyBounds,
}

/// Output of a completed inversion.
#[derive(Debug, Clone)]
pub struct InversionResult {
    pub model: LayeredModel,
    pub chi_square: f64,
    pub iterations: usize,
    pub status: InversionStatus,
    /// Regularization strength at termination.
    pub lambda: f64,
    pub history: Vec<IterationRecord>,
    /// Forward response of `model` (Q x T).
    pub response: DMatrix<f64>,
    pub uncertainty: Option<Uncertainty>,
}

impl InversionResult {
    pub fn converged(&self) -> bool {
        self.status == InversionStatus::Converged
    }

    pub fn params(&self) -> Vec<f64> {
        self.model.to_params()
    }

    /// One row per layer: `depth, water content, T2*` plus optional bounds.
    pub fn layer_rows(&self) -> Vec<LayerRow> {
        let n = self.model.n_layers();
        let tops = self.model.layer_tops();
        let wc_off = ParamClass::WaterContent.offset(n);
        let t2_off = ParamClass::RelaxationTime.offset(n);

        (0..n)
            .map(|i| LayerRow {
                depth: tops[i],
                water_content: self.model.water_content[i],
                relaxation_time: self.model.relaxation_time[i],
                bounds: self.uncertainty.as_ref().map(|u| {
                    let b = &u.bounds;
                    LayerRowBounds {
                        depth: (b.depth_lower[i], b.depth_upper[i]),
                        water_content: (b.lower[wc_off + i], b.upper[wc_off + i]),
                        relaxation_time: (b.lower[t2_off + i], b.upper[t2_off + i]),
                    }
                }),
            })
            .collect()
    }
}

/// A result row as persisted by the column writer.
#[derive(Debug, Clone, Serialize)]
pub struct LayerRow {
    pub depth: f64,
    pub water_content: f64,
    pub relaxation_time: f64,
    pub bounds: Option<LayerRowBounds>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LayerRowBounds {
    pub depth: (f64, f64),
    pub water_content: (f64, f64),
    pub relaxation_time: (f64, f64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameter_layout_is_thickness_then_wc_then_t2() {
        assert_eq!(param_count(1), 2);
        assert_eq!(param_count(3), 8);
        assert_eq!(param_class(3, 0), ParamClass::Thickness);
        assert_eq!(param_class(3, 1), ParamClass::Thickness);
        assert_eq!(param_class(3, 2), ParamClass::WaterContent);
        assert_eq!(param_class(3, 5), ParamClass::RelaxationTime);
        assert_eq!(param_class(1, 0), ParamClass::WaterContent);
    }

    #[test]
    fn model_round_trips_through_param_vector() {
        let m = LayeredModel::new(vec![5.0, 7.0], vec![0.1, 0.2, 0.3], vec![0.05, 0.1, 0.2]).unwrap();
        let back = LayeredModel::from_params(3, &m.to_params()).unwrap();
        assert_eq!(m, back);
        assert_eq!(m.layer_tops(), vec![0.0, 5.0, 12.0]);
    }

    #[test]
    fn model_rejects_inconsistent_lengths() {
        let err = LayeredModel::new(vec![5.0], vec![0.1, 0.2], vec![0.1]).unwrap_err();
        assert!(matches!(err, InversionError::DimensionMismatch(_)));
        let err = LayeredModel::from_params(2, &[1.0, 2.0]).unwrap_err();
        assert!(matches!(err, InversionError::DimensionMismatch(_)));
    }

    #[test]
    fn kernel_validates_shapes() {
        let real = DMatrix::<f64>::zeros(2, 3);
        let imag = DMatrix::<f64>::zeros(2, 4);
        assert!(KernelModel::new(real.clone(), imag, vec![0.0, 1.0, 2.0]).is_err());

        let imag = DMatrix::<f64>::zeros(2, 3);
        let err = KernelModel::new(real.clone(), imag.clone(), vec![0.0, 1.0]).unwrap_err();
        assert!(matches!(err, InversionError::DimensionMismatch(_)));

        let err = KernelModel::new(real.clone(), imag.clone(), vec![0.0, 2.0, 1.0]).unwrap_err();
        assert!(matches!(err, InversionError::InvalidConfiguration(_)));

        let k = KernelModel::new(real, imag, vec![0.0, 1.0, 2.0]).unwrap();
        assert_eq!((k.n_pulses(), k.n_depths()), (2, 3));
    }

    #[test]
    fn sounding_replaces_non_positive_errors_with_floor() {
        let amp = DMatrix::from_row_slice(1, 3, &[10.0, 5.0, 2.0]);
        let err = DMatrix::from_row_slice(1, 3, &[0.5, 0.0, -1.0]);
        let s = Sounding::new(vec![0.01, 0.02, 0.03], amp, err, 0.7).unwrap();
        assert_eq!(s.error()[(0, 0)], 0.5);
        assert_eq!(s.error()[(0, 1)], 0.7);
        assert_eq!(s.error()[(0, 2)], 0.7);
        assert!(s.error().iter().all(|e| *e > 0.0));
    }

    #[test]
    fn sounding_rejects_time_gate_mismatch() {
        let amp = DMatrix::<f64>::zeros(2, 3);
        let err = DMatrix::<f64>::from_element(2, 3, 1.0);
        let e = Sounding::new(vec![0.01, 0.02], amp, err, 1.0).unwrap_err();
        assert!(matches!(e, InversionError::DimensionMismatch(_)));
    }

    #[test]
    fn layer_rows_use_layer_tops() {
        let model = LayeredModel::new(vec![4.0], vec![0.2, 0.1], vec![0.2, 0.05]).unwrap();
        let result = InversionResult {
            model,
            chi_square: 1.0,
            iterations: 3,
            status: InversionStatus::Converged,
            lambda: 10.0,
            history: Vec::new(),
            response: DMatrix::zeros(1, 1),
            uncertainty: None,
        };
        let rows = result.layer_rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].depth, 4.0);
        assert_eq!(rows[1].relaxation_time, 0.05);
        assert!(rows[0].bounds.is_none());
    }
}
