//! Error types.
//!
//! The library reports failures as [`InversionError`]; the `mrs` binary folds
//! them into [`AppError`], which only knows a message and a process exit code.

use thiserror::Error;

/// Failure kinds surfaced by the inversion core and its io layer.
#[derive(Debug, Error)]
pub enum InversionError {
    /// Shapes or lengths of kernel, sounding or model disagree.
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// Malformed options, bounds or start vector. Raised before iterating.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The damped normal equations (or the final covariance matrix) could not
    /// be solved.
    #[error("Singular system at iteration {iteration}: {message}")]
    SingularSystem {
        iteration: usize,
        message: String,
        /// Last accepted physical parameter vector, if any.
        last_params: Option<Vec<f64>>,
    },

    /// Chi-square became NaN or infinite.
    #[error("Numerical divergence at iteration {iteration}: chi-square = {chi_square}")]
    NumericalDivergence {
        iteration: usize,
        chi_square: f64,
        last_params: Option<Vec<f64>>,
    },

    #[error("I/O error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Format error: {0}")]
    Format(String),
}

impl InversionError {
    pub(crate) fn io(context: impl Into<String>, source: impl Into<std::io::Error>) -> Self {
        InversionError::Io {
            context: context.into(),
            source: source.into(),
        }
    }

    /// Short tag naming the failure kind.
    pub fn kind(&self) -> &'static str {
        match self {
            InversionError::DimensionMismatch(_) => "DimensionMismatch",
            InversionError::InvalidConfiguration(_) => "InvalidConfiguration",
            InversionError::SingularSystem { .. } => "SingularSystem",
            InversionError::NumericalDivergence { .. } => "NumericalDivergence",
            InversionError::Io { .. } => "Io",
            InversionError::Format(_) => "Format",
        }
    }

    /// Last valid parameter vector carried by a failed run.
    pub fn last_params(&self) -> Option<&[f64]> {
        match self {
            InversionError::SingularSystem { last_params, .. }
            | InversionError::NumericalDivergence { last_params, .. } => last_params.as_deref(),
            _ => None,
        }
    }

    /// Iteration count reached by a failed run.
    pub fn iteration(&self) -> Option<usize> {
        match self {
            InversionError::SingularSystem { iteration, .. }
            | InversionError::NumericalDivergence { iteration, .. } => Some(*iteration),
            _ => None,
        }
    }
}

/// Binary-level error: a message plus the process exit code.
#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl From<InversionError> for AppError {
    fn from(err: InversionError) -> Self {
        let exit_code = match err {
            InversionError::InvalidConfiguration(_)
            | InversionError::Io { .. }
            | InversionError::Format(_) => 2,
            InversionError::DimensionMismatch(_) => 3,
            InversionError::SingularSystem { .. } | InversionError::NumericalDivergence { .. } => 4,
        };
        let mut message = err.to_string();
        let mut cause = std::error::Error::source(&err);
        while let Some(inner) = cause {
            message.push_str(&format!(": {inner}"));
            cause = std::error::Error::source(inner);
        }
        if let Some(params) = err.last_params() {
            let parts: Vec<String> = params.iter().map(|v| format!("{v:.6}")).collect();
            message.push_str(&format!("\nLast valid parameters: [{}]", parts.join(", ")));
        }
        AppError::new(exit_code, message)
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}
