//! Inversion options.
//!
//! Every recognized option lives in [`InversionConfig`] with its default, so a
//! run is fully described by one value that can be validated before the first
//! forward evaluation. JSON config files deserialize into the same struct;
//! missing fields take the defaults below.

use serde::{Deserialize, Serialize};

use crate::domain::types::{ClassTriple, ParamClass, param_class, param_count};
use crate::error::InversionError;

pub const DEFAULT_LOWER_BOUND: ClassTriple = ClassTriple::new(0.1, 0.0, 0.02);
pub const DEFAULT_UPPER_BOUND: ClassTriple = ClassTriple::new(100.0, 0.45, 1.0);
pub const DEFAULT_START: ClassTriple = ClassTriple::new(10.0, 0.3, 0.2);
pub const DEFAULT_LAMBDA0: f64 = 100.0;

/// Parameter bounds: one `(lower, upper)` pair per class, broadcast to every
/// layer, unless full per-parameter vectors are given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoundsSpec {
    pub lower: ClassTriple,
    pub upper: ClassTriple,
    /// Per-parameter lower bounds (length `3N - 1`); overrides `lower`.
    pub explicit_lower: Option<Vec<f64>>,
    /// Per-parameter upper bounds (length `3N - 1`); overrides `upper`.
    pub explicit_upper: Option<Vec<f64>>,
}

impl Default for BoundsSpec {
    fn default() -> Self {
        Self {
            lower: DEFAULT_LOWER_BOUND,
            upper: DEFAULT_UPPER_BOUND,
            explicit_lower: None,
            explicit_upper: None,
        }
    }
}

impl BoundsSpec {
    /// Expand to per-parameter `(lower, upper)` vectors for `n_layers` layers.
    pub fn resolve(&self, n_layers: usize) -> Result<(Vec<f64>, Vec<f64>), InversionError> {
        let lower = expand(self.explicit_lower.as_deref(), &self.lower, n_layers, "lower")?;
        let upper = expand(self.explicit_upper.as_deref(), &self.upper, n_layers, "upper")?;

        for (i, (&lo, &hi)) in lower.iter().zip(upper.iter()).enumerate() {
            let class = param_class(n_layers, i);
            if !(lo.is_finite() && hi.is_finite()) {
                return Err(InversionError::InvalidConfiguration(format!(
                    "{} bound #{i} is not finite",
                    class.display_name()
                )));
            }
            let physical_ok = match class {
                ParamClass::Thickness | ParamClass::WaterContent => lo >= 0.0,
                ParamClass::RelaxationTime => lo > 0.0,
            };
            if !physical_ok {
                return Err(InversionError::InvalidConfiguration(format!(
                    "{} lower bound #{i} must be {}, got {lo}",
                    class.display_name(),
                    if class == ParamClass::RelaxationTime { "> 0" } else { ">= 0" }
                )));
            }
        }

        Ok((lower, upper))
    }
}

fn expand(
    explicit: Option<&[f64]>,
    triple: &ClassTriple,
    n_layers: usize,
    label: &str,
) -> Result<Vec<f64>, InversionError> {
    match explicit {
        Some(values) => {
            if values.len() != param_count(n_layers) {
                return Err(InversionError::InvalidConfiguration(format!(
                    "explicit {label} bounds have {} entries, {n_layers} layers need {}",
                    values.len(),
                    param_count(n_layers)
                )));
            }
            Ok(values.to_vec())
        }
        None => Ok(triple.broadcast(n_layers)),
    }
}

/// Starting model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartModel {
    /// Same value per class in every layer.
    Homogeneous(ClassTriple),
    /// Full parameter vector of length `3N - 1`.
    Explicit(Vec<f64>),
}

impl Default for StartModel {
    fn default() -> Self {
        StartModel::Homogeneous(DEFAULT_START)
    }
}

impl StartModel {
    pub fn params(&self, n_layers: usize) -> Result<Vec<f64>, InversionError> {
        let params = match self {
            StartModel::Homogeneous(values) => values.broadcast(n_layers),
            StartModel::Explicit(values) => {
                if values.len() != param_count(n_layers) {
                    return Err(InversionError::InvalidConfiguration(format!(
                        "start vector has {} entries, {n_layers} layers need {}",
                        values.len(),
                        param_count(n_layers)
                    )));
                }
                values.clone()
            }
        };
        if params.iter().any(|v| !v.is_finite()) {
            return Err(InversionError::InvalidConfiguration(
                "start vector contains non-finite values".into(),
            ));
        }
        Ok(params)
    }
}

/// Options of a regularized block inversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InversionConfig {
    /// Number of layers `N` (the last one a half-space).
    pub n_layers: usize,
    pub bounds: BoundsSpec,
    pub start: StartModel,
    /// Initial regularization strength.
    pub lambda0: f64,
    /// Multiplier applied to lambda after an accepted step.
    pub lambda_factor: f64,
    /// Lambda never decays below `lambda0 * lambda_min_ratio`. The stop rules
    /// apply only once lambda has settled there.
    pub lambda_min_ratio: f64,
    /// Multiplier applied to the damping after a rejected trial step.
    pub lambda_increase: f64,
    /// Rejected trial steps allowed per iteration.
    pub max_damping_retries: usize,
    pub max_iter: usize,
    /// Stop once chi-square falls below this value.
    pub chi_square_target: f64,
    /// Stop once the relative chi-square improvement of a step falls below this value.
    pub min_relative_improvement: f64,
    /// Relative finite-difference step for the Jacobian.
    pub jacobian_step: f64,
    /// Estimate the model covariance and parameter bounds after the run.
    pub uncertainty: bool,
}

impl Default for InversionConfig {
    fn default() -> Self {
        Self {
            n_layers: 3,
            bounds: BoundsSpec::default(),
            start: StartModel::default(),
            lambda0: DEFAULT_LAMBDA0,
            lambda_factor: 0.5,
            lambda_min_ratio: 0.01,
            lambda_increase: 2.0,
            max_damping_retries: 10,
            max_iter: 30,
            chi_square_target: 1.0,
            min_relative_improvement: 1e-3,
            jacobian_step: 1e-6,
            uncertainty: false,
        }
    }
}

impl InversionConfig {
    /// Smallest lambda the decay reaches.
    pub fn lambda_floor(&self) -> f64 {
        self.lambda0 * self.lambda_min_ratio
    }

    pub fn with_layers(n_layers: usize) -> Self {
        Self {
            n_layers,
            ..Self::default()
        }
    }

    /// Check scalar options. Bounds and start vector are checked when resolved.
    pub fn validate(&self) -> Result<(), InversionError> {
        if self.n_layers == 0 {
            return Err(InversionError::InvalidConfiguration("n_layers must be >= 1".into()));
        }
        if !(self.lambda0.is_finite() && self.lambda0 > 0.0) {
            return Err(InversionError::InvalidConfiguration(format!(
                "lambda0 must be finite and > 0, got {}",
                self.lambda0
            )));
        }
        if !(self.lambda_factor.is_finite() && self.lambda_factor > 0.0 && self.lambda_factor <= 1.0) {
            return Err(InversionError::InvalidConfiguration(format!(
                "lambda_factor must be in (0, 1], got {}",
                self.lambda_factor
            )));
        }
        if !(self.lambda_min_ratio.is_finite() && self.lambda_min_ratio > 0.0 && self.lambda_min_ratio <= 1.0) {
            return Err(InversionError::InvalidConfiguration(format!(
                "lambda_min_ratio must be in (0, 1], got {}",
                self.lambda_min_ratio
            )));
        }
        if !(self.lambda_increase.is_finite() && self.lambda_increase > 1.0) {
            return Err(InversionError::InvalidConfiguration(format!(
                "lambda_increase must be > 1, got {}",
                self.lambda_increase
            )));
        }
        if !(self.chi_square_target.is_finite() && self.chi_square_target >= 0.0) {
            return Err(InversionError::InvalidConfiguration(
                "chi_square_target must be finite and >= 0".into(),
            ));
        }
        if !(self.min_relative_improvement.is_finite() && self.min_relative_improvement >= 0.0) {
            return Err(InversionError::InvalidConfiguration(
                "min_relative_improvement must be finite and >= 0".into(),
            ));
        }
        if !(self.jacobian_step.is_finite() && self.jacobian_step > 0.0 && self.jacobian_step < 0.1) {
            return Err(InversionError::InvalidConfiguration(format!(
                "jacobian_step must be in (0, 0.1), got {}",
                self.jacobian_step
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_options() {
        let c = InversionConfig::default();
        assert_eq!(c.bounds.lower, ClassTriple::new(0.1, 0.0, 0.02));
        assert_eq!(c.bounds.upper, ClassTriple::new(100.0, 0.45, 1.0));
        assert_eq!(c.start, StartModel::Homogeneous(ClassTriple::new(10.0, 0.3, 0.2)));
        assert_eq!(c.lambda0, 100.0);
        assert!(!c.uncertainty);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let c: InversionConfig = serde_json::from_str(r#"{"n_layers": 2, "lambda0": 10.0}"#).unwrap();
        assert_eq!(c.n_layers, 2);
        assert_eq!(c.lambda0, 10.0);
        assert_eq!(c.max_iter, InversionConfig::default().max_iter);
        assert_eq!(c.bounds, BoundsSpec::default());

        let c: InversionConfig =
            serde_json::from_str(r#"{"start": {"explicit": [5.0, 0.2, 0.1, 0.2, 0.1]}}"#).unwrap();
        assert_eq!(c.start, StartModel::Explicit(vec![5.0, 0.2, 0.1, 0.2, 0.1]));
    }

    #[test]
    fn start_vector_length_is_checked() {
        let start = StartModel::Explicit(vec![1.0, 2.0]);
        let err = start.params(2).unwrap_err();
        assert!(matches!(err, InversionError::InvalidConfiguration(_)));
        assert_eq!(StartModel::default().params(2).unwrap(), vec![10.0, 0.3, 0.3, 0.2, 0.2]);
    }

    #[test]
    fn bounds_broadcast_and_explicit_override() {
        let spec = BoundsSpec::default();
        let (lo, hi) = spec.resolve(2).unwrap();
        assert_eq!(lo, vec![0.1, 0.0, 0.0, 0.02, 0.02]);
        assert_eq!(hi, vec![100.0, 0.45, 0.45, 1.0, 1.0]);

        let spec = BoundsSpec {
            explicit_lower: Some(vec![1.0, 0.1, 0.05, 0.01, 0.01]),
            ..BoundsSpec::default()
        };
        let (lo, _) = spec.resolve(2).unwrap();
        assert_eq!(lo[0], 1.0);

        let spec = BoundsSpec {
            explicit_upper: Some(vec![1.0]),
            ..BoundsSpec::default()
        };
        assert!(matches!(spec.resolve(2), Err(InversionError::InvalidConfiguration(_))));
    }

    #[test]
    fn non_positive_t2_lower_bound_is_rejected() {
        let spec = BoundsSpec {
            lower: ClassTriple::new(0.1, 0.0, 0.0),
            ..BoundsSpec::default()
        };
        assert!(matches!(spec.resolve(1), Err(InversionError::InvalidConfiguration(_))));
    }

    #[test]
    fn scalar_options_are_validated() {
        let mut c = InversionConfig::default();
        c.lambda0 = 0.0;
        assert!(c.validate().is_err());

        let mut c = InversionConfig::default();
        c.n_layers = 0;
        assert!(c.validate().is_err());

        let mut c = InversionConfig::default();
        c.lambda_factor = 1.5;
        assert!(c.validate().is_err());

        let mut c = InversionConfig::default();
        c.lambda_min_ratio = 0.0;
        assert!(c.validate().is_err());
        c.lambda_min_ratio = 1.0;
        assert!(c.validate().is_ok());
    }

    #[test]
    fn lambda_floor_scales_with_lambda0() {
        let c = InversionConfig {
            lambda0: 1e4,
            ..InversionConfig::default()
        };
        assert!((c.lambda_floor() - 100.0).abs() < 1e-9);
        assert!(c.lambda_floor() > InversionConfig::default().lambda_floor());
    }
}
