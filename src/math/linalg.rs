//! Dense solves for the damped normal equations.
//!
//! The systems solved here are small (`3N - 1` unknowns) and symmetric:
//!
//! ```text
//! (JᵀJ + λ (CᵀC + I)) Δu = Jᵀr − λ CᵀC u
//! ```
//!
//! We try a Cholesky factorization first, since the damped matrix is positive
//! definite for any `λ > 0`. If that fails (rounding on a nearly singular
//! matrix), we fall back to an SVD solve with progressively looser tolerances.
//! A `None` return means the system is numerically singular.

use nalgebra::{DMatrix, DVector};

/// Solve a symmetric positive (semi-)definite system.
pub fn solve_symmetric(a: &DMatrix<f64>, b: &DVector<f64>) -> Option<DVector<f64>> {
    if a.iter().any(|v| !v.is_finite()) || b.iter().any(|v| !v.is_finite()) {
        return None;
    }

    if let Some(chol) = a.clone().cholesky() {
        let x = chol.solve(b);
        if x.iter().all(|v| v.is_finite()) {
            return Some(x);
        }
    }

    let svd = a.clone().svd(true, true);
    let sigma_max = svd.singular_values.max();
    if !(sigma_max.is_finite() && sigma_max > 0.0) {
        return None;
    }
    for &rel_tol in &[1e-12, 1e-10, 1e-8] {
        if let Ok(x) = svd.solve(b, rel_tol * sigma_max) {
            if x.iter().all(|v| v.is_finite()) {
                return Some(x);
            }
        }
    }

    None
}

/// Invert a symmetric positive definite matrix.
///
/// Unlike [`solve_symmetric`] there is no pseudo-inverse fallback: a matrix
/// that is not invertible yields `None`.
pub fn invert_symmetric(a: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    if a.iter().any(|v| !v.is_finite()) {
        return None;
    }

    let inverse = match a.clone().cholesky() {
        Some(chol) => chol.inverse(),
        None => a.clone().try_inverse()?,
    };

    if inverse.iter().all(|v| v.is_finite()) {
        // Symmetrize away rounding asymmetry.
        Some((&inverse + inverse.transpose()) * 0.5)
    } else {
        None
    }
}

/// `JᵀJ` for a (rows = samples, cols = parameters) Jacobian.
pub fn normal_matrix(jacobian: &DMatrix<f64>) -> DMatrix<f64> {
    jacobian.tr_mul(jacobian)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solves_spd_system() {
        let a = DMatrix::from_row_slice(2, 2, &[4.0, 1.0, 1.0, 3.0]);
        let b = DVector::from_row_slice(&[1.0, 2.0]);
        let x = solve_symmetric(&a, &b).unwrap();
        let r = &a * &x - &b;
        assert!(r.norm() < 1e-12);
    }

    #[test]
    fn rejects_non_finite_system() {
        let a = DMatrix::from_row_slice(2, 2, &[f64::NAN, 0.0, 0.0, 1.0]);
        let b = DVector::from_row_slice(&[1.0, 1.0]);
        assert!(solve_symmetric(&a, &b).is_none());
        assert!(solve_symmetric(&DMatrix::zeros(2, 2), &b).is_none());
    }

    #[test]
    fn inverse_of_singular_matrix_is_none() {
        let a = DMatrix::<f64>::zeros(3, 3);
        assert!(invert_symmetric(&a).is_none());

        let a = DMatrix::from_row_slice(2, 2, &[2.0, 0.0, 0.0, 0.5]);
        let inv = invert_symmetric(&a).unwrap();
        assert!((inv[(0, 0)] - 0.5).abs() < 1e-12);
        assert!((inv[(1, 1)] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn normal_matrix_is_jtj() {
        let j = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0]);
        let n = normal_matrix(&j);
        assert_eq!(n, DMatrix::from_row_slice(2, 2, &[3.0, 3.0, 3.0, 5.0]));
    }
}
