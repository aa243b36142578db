use crate::fitter::report::FitStage;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FitError {
    #[error("expected {expected} parameters but {found} were given")]
    InvalidParameterCount { expected: usize, found: usize },
    #[error("covariance matrix must be {expected}x{expected}, got {rows}x{cols}")]
    CovarianceShape {
        expected: usize,
        rows: usize,
        cols: usize,
    },
    #[error("a sub-model named '{0}' is already part of the composite model")]
    DuplicateModelName(String),
    #[error("background polynomial order {0} is not supported, only linear (1) is available")]
    UnsupportedBackgroundOrder(usize),
    #[error("background uncertainty window [{a}, {b}] is not strictly ordered")]
    DegenerateBackgroundWindow { a: f64, b: f64 },
    #[error("{stage} optimization failed: {reason}")]
    OptimizationFailure { stage: FitStage, reason: String },
    #[error("optimization was cancelled")]
    Cancelled,
    #[error("no samples between {lower} and {upper} keV")]
    EmptyWindow { lower: f64, upper: f64 },
    #[error("invalid spectrum: {0}")]
    InvalidSpectrum(String),
    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not parse configuration: {0}")]
    Config(#[from] serde_yaml::Error),
    #[error("could not serialize report: {0}")]
    Json(#[from] serde_json::Error),
}

impl FitError {
    pub(crate) fn optimization(stage: FitStage, reason: impl Into<String>) -> Self {
        FitError::OptimizationFailure {
            stage,
            reason: reason.into(),
        }
    }
}
