use std::fmt;

use super::common::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub enum FitStage {
    Global,
    Local,
    Uncertainty,
}

impl fmt::Display for FitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FitStage::Global => write!(f, "global"),
            FitStage::Local => write!(f, "local"),
            FitStage::Uncertainty => write!(f, "uncertainty"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FitStatus {
    Success,
    /// `popt` holds the pre-fit parameters and `pcov` the identity.
    Failed { stage: FitStage, reason: String },
}

impl FitStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, FitStatus::Success)
    }
}

/// Fitted quantities of one Gaussian component.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PeakSummary {
    pub name: String,
    pub amplitude: Value,
    pub centroid: Value,
    pub sigma: Value,
    pub fwhm: Value,
}

/// Area bookkeeping for one peak sub-model.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PeakArea {
    pub name: String,
    pub area: f64,
    /// `None` when the uncertainty could not be propagated.
    pub uncertainty: Option<f64>,
    pub background_area: f64,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct FitReport {
    pub status: FitStatus,
    pub centroid: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub parameter_names: Vec<String>,
    pub popt: Vec<f64>,
    pub perr: Vec<f64>,
    pub pcov: Vec<Vec<f64>>,
    pub r_squared: f64,
    pub net_area: f64,
    pub net_area_uncertainty: Option<f64>,
    pub background_area: f64,
    pub scaling_factor: Option<f64>,
    pub peak_areas: Vec<PeakArea>,
    pub peaks: Vec<PeakSummary>,
    pub energies: Vec<f64>,
    pub counts: Vec<f64>,
    pub y_hat: Vec<f64>,
    pub warnings: Vec<String>,
    pub low_confidence: bool,
}

impl FitReport {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// `1 - SS_res / SS_tot`. Constant data gives 1 for a perfect fit and 0 otherwise.
pub fn r_squared(y: &[f64], y_hat: &[f64]) -> f64 {
    if y.is_empty() {
        return 0.0;
    }
    let mean = y.iter().sum::<f64>() / y.len() as f64;
    let ss_tot: f64 = y.iter().map(|v| (v - mean).powi(2)).sum();
    let ss_res: f64 = y.iter().zip(y_hat).map(|(v, f)| (v - f).powi(2)).sum();

    if ss_tot > 0.0 {
        1.0 - ss_res / ss_tot
    } else if ss_res > 0.0 {
        0.0
    } else {
        1.0
    }
}

impl fmt::Display for FitReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== ROI {:.3} keV [{:.3}, {:.3}] ===", self.centroid, self.lower_bound, self.upper_bound)?;
        match &self.status {
            FitStatus::Success => writeln!(f, "status: success")?,
            FitStatus::Failed { stage, reason } => {
                writeln!(f, "status: FAILED in {stage} stage: {reason}")?;
                writeln!(f, "(parameters below are the pre-fit values)")?;
            }
        }
        if self.low_confidence {
            writeln!(f, "warning: low confidence fit")?;
        }

        writeln!(f, "optimal parameters:")?;
        for ((name, p), e) in self.parameter_names.iter().zip(&self.popt).zip(&self.perr) {
            writeln!(f, "  {name:<14} {p:>14.6} ± {e:.6}")?;
        }

        writeln!(f, "covariance:")?;
        for row in &self.pcov {
            let cells: Vec<String> = row.iter().map(|v| format!("{v:>12.4e}")).collect();
            writeln!(f, "  {}", cells.join(" "))?;
        }

        writeln!(f, "R²: {:.6}", self.r_squared)?;
        match self.net_area_uncertainty {
            Some(sigma) => writeln!(f, "net area: {:.2} ± {sigma:.2}", self.net_area)?,
            None => writeln!(f, "net area: {:.2} ± n/a", self.net_area)?,
        }
        writeln!(f, "background area: {:.2}", self.background_area)?;
        if let Some(scaling) = self.scaling_factor {
            writeln!(f, "peak/background ratio: {:.4}", scaling - 1.0)?;
        }

        for peak in &self.peak_areas {
            let sigma = peak
                .uncertainty
                .map_or_else(|| "n/a".to_owned(), |s| format!("{s:.2}"));
            writeln!(
                f,
                "  {}: area {:.2} ± {sigma}, background {:.2}",
                peak.name, peak.area, peak.background_area
            )?;
        }
        for peak in &self.peaks {
            writeln!(
                f,
                "  {}: centroid {:.3}, sigma {:.3}, fwhm {:.3}",
                peak.name, peak.centroid, peak.sigma, peak.fwhm
            )?;
        }
        for warning in &self.warnings {
            writeln!(f, "warning: {warning}")?;
        }
        Ok(())
    }
}
