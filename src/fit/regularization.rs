//! Smoothness constraints between adjacent layers.
//!
//! The roughness operator `C` holds first-order differences inside each
//! parameter class: `u[k+1] - u[k]` for neighbouring thicknesses, water contents
//! and relaxation times. It acts on the unconstrained vector, so it penalizes
//! contrasts in transformed (log-like) space rather than absolute jumps.

use nalgebra::{DMatrix, DVector};

use crate::domain::{ParamClass, param_count};

/// First-order difference operator for an `n_layers` model.
///
/// Shape is `(rows, 3N - 1)` with `rows = (N - 2) + 2 (N - 1)`; a single layer
/// has no neighbours and yields an empty operator.
pub fn roughness_operator(n_layers: usize) -> DMatrix<f64> {
    let cols = param_count(n_layers);
    let rows: usize = ParamClass::ALL
        .iter()
        .map(|c| c.count(n_layers).saturating_sub(1))
        .sum();

    let mut c = DMatrix::zeros(rows, cols);
    let mut row = 0;
    for class in ParamClass::ALL {
        let offset = class.offset(n_layers);
        for k in 1..class.count(n_layers) {
            c[(row, offset + k - 1)] = -1.0;
            c[(row, offset + k)] = 1.0;
            row += 1;
        }
    }
    c
}

/// Roughness operator with a precomputed `CᵀC`.
#[derive(Debug, Clone)]
pub struct Regularization {
    operator: DMatrix<f64>,
    gram: DMatrix<f64>,
}

impl Regularization {
    pub fn new(n_layers: usize) -> Self {
        let operator = roughness_operator(n_layers);
        let gram = operator.tr_mul(&operator);
        Self { operator, gram }
    }

    /// `CᵀC`.
    pub fn gram(&self) -> &DMatrix<f64> {
        &self.gram
    }

    /// `‖C u‖`, the roughness of an unconstrained vector.
    pub fn roughness(&self, u: &DVector<f64>) -> f64 {
        (&self.operator * u).norm()
    }
}
