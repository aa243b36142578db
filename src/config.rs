use std::path::Path;

use crate::error::FitError;
use crate::fitter::common::Calibration;
use crate::fitter::fit_settings::{ModelSelectionPolicy, OptimizerSettings, RoiSettings};
use crate::peak_finder::PeakFindingSettings;

/// Everything tunable about an analysis run. Missing keys take their defaults,
/// so an empty file is a valid configuration.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub roi: RoiSettings,
    pub optimizer: OptimizerSettings,
    pub model_policy: ModelSelectionPolicy,
    pub peak_finding: PeakFindingSettings,
    /// Applied to one-column spectra without a calibration header.
    pub calibration: Calibration,
    /// Energy distance within which `pop_peak` matches an ROI.
    pub peak_tolerance: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            roi: RoiSettings::default(),
            optimizer: OptimizerSettings::default(),
            model_policy: ModelSelectionPolicy::default(),
            peak_finding: PeakFindingSettings::default(),
            calibration: Calibration::default(),
            peak_tolerance: 1.0,
        }
    }
}

impl AnalysisConfig {
    pub fn from_yaml_str(contents: &str) -> Result<Self, FitError> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(contents)?)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, FitError> {
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_yaml_str(&contents)?;
        log::info!("Loaded analysis configuration from {}", path.display());
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String, FitError> {
        Ok(serde_yaml::to_string(self)?)
    }
}
