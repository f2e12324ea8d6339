//! Bounded parameter transform.
//!
//! Each physical parameter `x ∈ [a, b]` is optimized as an unconstrained
//! `u ∈ ℝ` through the logistic-log mapping
//!
//! - `u(x) = ln((x - a) / (b - x))`
//! - `x(u) = a + (b - a) · σ(u)`, with `σ` the logistic function
//! - `dx/du = (x - a)(b - x) / (b - a)`
//!
//! Numerical notes:
//! - `σ(u)` is evaluated with the sign-split form so that large `|u|` never
//!   overflows `exp`.
//! - Values on (or outside) a bound are pulled inside by `EDGE_MARGIN · (b - a)`
//!   before taking the logit, otherwise start values sitting on a bound would map
//!   to `±∞`.

use crate::domain::BoundsSpec;
use crate::error::InversionError;

/// Relative margin used to pull boundary values inside the open interval.
const EDGE_MARGIN: f64 = 1e-9;

/// Logistic function, stable for any finite `u`.
fn logistic(u: f64) -> f64 {
    if u >= 0.0 {
        1.0 / (1.0 + (-u).exp())
    } else {
        let e = u.exp();
        e / (1.0 + e)
    }
}

/// Map a physical value in `[a, b]` to unconstrained space.
pub fn bounded_logit(x: f64, a: f64, b: f64) -> f64 {
    let margin = EDGE_MARGIN * (b - a);
    let x = x.clamp(a + margin, b - margin);
    ((x - a) / (b - x)).ln()
}

/// Map an unconstrained value back into `[a, b]`.
pub fn bounded_logistic(u: f64, a: f64, b: f64) -> f64 {
    (a + (b - a) * logistic(u)).clamp(a, b)
}

/// `dx/du` at physical value `x`.
pub fn bounded_derivative(x: f64, a: f64, b: f64) -> f64 {
    ((x - a) * (b - x) / (b - a)).max(0.0)
}

/// Element-wise transform over a full parameter vector.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterTransform {
    lower: Vec<f64>,
    upper: Vec<f64>,
}

impl ParameterTransform {
    pub fn new(lower: Vec<f64>, upper: Vec<f64>) -> Result<Self, InversionError> {
        if lower.len() != upper.len() {
            return Err(InversionError::InvalidConfiguration(format!(
                "{} lower bounds but {} upper bounds",
                lower.len(),
                upper.len()
            )));
        }
        for (i, (&lo, &hi)) in lower.iter().zip(upper.iter()).enumerate() {
            if !(lo.is_finite() && hi.is_finite()) || lo >= hi {
                return Err(InversionError::InvalidConfiguration(format!(
                    "bounds #{i} must be finite with lower < upper, got [{lo}, {hi}]"
                )));
            }
        }
        Ok(Self { lower, upper })
    }

    /// Resolve a bounds spec for `n_layers` layers.
    pub fn from_spec(spec: &BoundsSpec, n_layers: usize) -> Result<Self, InversionError> {
        let (lower, upper) = spec.resolve(n_layers)?;
        Self::new(lower, upper)
    }

    pub fn upper(&self) -> &[f64] {
        &self.upper
    }

    pub fn to_unconstrained(&self, physical: &[f64]) -> Vec<f64> {
        physical
            .iter()
            .zip(self.lower.iter().zip(self.upper.iter()))
            .map(|(&x, (&a, &b))| bounded_logit(x, a, b))
            .collect()
    }

    pub fn to_physical(&self, unconstrained: &[f64]) -> Vec<f64> {
        unconstrained
            .iter()
            .zip(self.lower.iter().zip(self.upper.iter()))
            .map(|(&u, (&a, &b))| bounded_logistic(u, a, b))
            .collect()
    }

    /// `dx/du` for every parameter, evaluated at a physical vector.
    pub fn derivative(&self, physical: &[f64]) -> Vec<f64> {
        physical
            .iter()
            .zip(self.lower.iter().zip(self.upper.iter()))
            .map(|(&x, (&a, &b))| bounded_derivative(x, a, b))
            .collect()
    }

    /// True if every entry lies in `[lower, upper]`.
    pub fn contains(&self, physical: &[f64]) -> bool {
        physical.len() == self.lower.len()
            && physical
                .iter()
                .zip(self.lower.iter().zip(self.upper.iter()))
                .all(|(&x, (&a, &b))| x >= a && x <= b)
    }
}
