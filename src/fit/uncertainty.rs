//! Linearized model uncertainty at the final model.
//!
//! The unconstrained covariance is `chi2 · (JᵀJ + λ CᵀC)⁻¹`, evaluated with
//! the Jacobian at the final model and the final regularization strength. It is
//! mapped to physical space with `D = diag(dx/du)` as `D cov_u D`. Bounds are
//! symmetric `x ± σ`; layer-top depths use the variance of the cumulative
//! thickness sum.

use nalgebra::{DMatrix, DVector};

use crate::domain::{InversionResult, ModelCovariance, ParamClass, Uncertainty, UncertaintyBounds};
use crate::error::InversionError;
use crate::fit::Regularization;
use crate::math::{ParameterTransform, invert_symmetric, normal_matrix};

/// Covariance and bounds for a finished run.
///
/// `jacobian` must be the weighted Jacobian w.r.t. the unconstrained
/// parameters at `result.params()`.
pub fn estimate(
    result: &InversionResult,
    jacobian: &DMatrix<f64>,
    regularization: &Regularization,
    transform: &ParameterTransform,
) -> Result<Uncertainty, InversionError> {
    let params = result.params();
    let n = params.len();
    if jacobian.ncols() != n || regularization.gram().ncols() != n {
        return Err(InversionError::DimensionMismatch(format!(
            "Jacobian has {} columns, model has {n} parameters",
            jacobian.ncols()
        )));
    }

    let system = normal_matrix(jacobian) + regularization.gram() * result.lambda;
    let Some(inverse) = invert_symmetric(&system) else {
        return Err(InversionError::SingularSystem {
            iteration: result.iterations,
            message: "normal matrix is not invertible at the final model".into(),
            last_params: Some(params),
        });
    };

    let scale = DMatrix::from_diagonal(&DVector::from_vec(transform.derivative(&params)));
    let physical = &scale * (inverse * result.chi_square) * &scale;
    let matrix = (&physical + physical.transpose()) * 0.5;

    let covariance = model_covariance(matrix);
    let bounds = bounds(&params, &covariance, result.model.n_layers());
    Ok(Uncertainty { covariance, bounds })
}

fn model_covariance(matrix: DMatrix<f64>) -> ModelCovariance {
    let n = matrix.nrows();
    let variances: Vec<f64> = (0..n).map(|i| matrix[(i, i)].max(0.0)).collect();
    let scaled = DMatrix::from_fn(n, n, |i, j| {
        if i == j {
            return 1.0;
        }
        let denom = (variances[i] * variances[j]).sqrt();
        if denom > 0.0 {
            (matrix[(i, j)] / denom).clamp(-1.0, 1.0)
        } else {
            0.0
        }
    });
    ModelCovariance {
        matrix,
        variances,
        scaled,
    }
}

fn bounds(params: &[f64], covariance: &ModelCovariance, n_layers: usize) -> UncertaintyBounds {
    let sigma = covariance.standard_deviations();
    let lower = params.iter().zip(&sigma).map(|(x, s)| x - s).collect();
    let upper = params.iter().zip(&sigma).map(|(x, s)| x + s).collect();

    let thk = ParamClass::Thickness.offset(n_layers);
    let mut depth_lower = Vec::with_capacity(n_layers);
    let mut depth_upper = Vec::with_capacity(n_layers);
    let mut top = 0.0;
    for k in 0..n_layers {
        if k > 0 {
            top += params[thk + k - 1];
        }
        let mut var = 0.0;
        for i in 0..k {
            for j in 0..k {
                var += covariance.matrix[(thk + i, thk + j)];
            }
        }
        let s = var.max(0.0).sqrt();
        depth_lower.push(top - s);
        depth_upper.push(top + s);
    }

    UncertaintyBounds {
        lower,
        upper,
        depth_lower,
        depth_upper,
    }
}
