#![warn(clippy::all, rust_2018_idioms)]

//! Peak fitting and net-area uncertainty for gamma-ray spectra.
//!
//! A [`Roi`] windows a [`Spectrum`] around one seed energy, fits a linear
//! background plus one or two Gaussians to it (basin hopping followed by a
//! bounded Levenberg-Marquardt refinement) and reports the net peak area with
//! a delta-method uncertainty. [`SpectrumAnalysis`] manages many ROIs on one
//! spectrum and fits them in parallel.

pub mod analysis;
pub mod config;
pub mod error;
pub mod fitter;
pub mod peak_finder;
pub mod spectrum;

pub use analysis::SpectrumAnalysis;
pub use config::AnalysisConfig;
pub use error::FitError;
pub use fitter::composite::CompositeModel;
pub use fitter::models::{Model, ModelShape};
pub use fitter::optimizer::cancel::CancelToken;
pub use fitter::report::{FitReport, FitStage, FitStatus};
pub use fitter::roi::{Roi, RoiState};
pub use fitter::uncertainty::UncertaintyPropagator;
pub use spectrum::Spectrum;
