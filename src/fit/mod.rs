//! Inversion orchestration.
//!
//! Responsibilities:
//!
//! - roughness constraints between adjacent layers
//! - finite-difference Jacobian (parallel over parameters)
//! - damped, regularized Marquardt iteration with bound transforms
//! - linearized covariance at the final model

pub mod inversion;
pub mod jacobian;
pub mod regularization;
pub mod uncertainty;

pub use inversion::*;
pub use jacobian::*;
pub use regularization::*;
pub use uncertainty::*;
