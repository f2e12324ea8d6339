//! Finite-difference Jacobian of the error-weighted response.
//!
//! Derivatives are taken in physical space (where the forward operator is
//! smooth and the step has a physical scale) and chained to unconstrained
//! space through `dx/du`. Each column costs one forward evaluation and is
//! independent of the others, so columns are computed in parallel.

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;

use crate::error::InversionError;
use crate::math::ParameterTransform;
use crate::models::ForwardOperator;

/// Smallest absolute scale used for the relative step.
const MIN_STEP_SCALE: f64 = 1e-3;

/// Flatten `prediction / error` column-major into a vector.
pub fn weighted(prediction: &DMatrix<f64>, error: &DMatrix<f64>) -> DVector<f64> {
    let w = prediction.component_div(error);
    DVector::from_column_slice(w.as_slice())
}

/// `∂(f/err)/∂u` at the physical point `params`.
///
/// `base` is the weighted response at `params`. Rows follow the column-major
/// flattening of [`weighted`].
pub fn weighted_jacobian(
    forward: &ForwardOperator<'_>,
    transform: &ParameterTransform,
    error: &DMatrix<f64>,
    params: &[f64],
    base: &DVector<f64>,
    relative_step: f64,
) -> Result<DMatrix<f64>, InversionError> {
    let dxdu = transform.derivative(params);
    let upper = transform.upper();

    let columns = (0..params.len())
        .into_par_iter()
        .map(|j| -> Result<DVector<f64>, InversionError> {
            let mut h = relative_step * params[j].abs().max(MIN_STEP_SCALE);
            if params[j] + h > upper[j] {
                h = -h;
            }
            let mut shifted = params.to_vec();
            shifted[j] += h;
            let f = weighted(&forward.response_params(&shifted)?, error);
            let scale = dxdu[j] / h;
            Ok((f - base) * scale)
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(DMatrix::from_columns(&columns))
}
