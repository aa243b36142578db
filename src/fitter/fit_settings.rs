use crate::fitter::composite::PeakSeed;

/// Tunables of the two-stage optimizer.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct OptimizerSettings {
    /// Metropolis temperature of the basin-hopping acceptance test.
    pub temperature: f64,
    /// Half-width of the uniform random displacement applied to every parameter.
    pub step_size: f64,
    /// Number of basin-hopping iterations.
    pub max_iterations: usize,
    /// Wall-clock budget for the global stage. The best point found so far is
    /// kept when it runs out.
    pub time_budget_secs: Option<f64>,
    /// Adjust `step_size` every this many hops from the acceptance rate (0 disables).
    pub adapt_interval: usize,
    pub seed: u64,

    pub lm_max_iterations: usize,
    /// Relative reduction of the cost below which the local solver stops.
    pub lm_ftol: f64,
    /// Relative step length below which the local solver stops.
    pub lm_xtol: f64,
    pub lm_initial_lambda: f64,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            step_size: 0.3,
            max_iterations: 100,
            time_budget_secs: None,
            adapt_interval: 50,
            seed: 42,

            lm_max_iterations: 200,
            lm_ftol: 1e-10,
            lm_xtol: 1e-10,
            lm_initial_lambda: 1e-3,
        }
    }
}

/// Which peak models an ROI may choose between when neighbours are present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct ModelSelectionPolicy {
    pub single_peak: bool,
    pub double_peak: bool,
}

impl Default for ModelSelectionPolicy {
    fn default() -> Self {
        Self {
            single_peak: true,
            double_peak: true,
        }
    }
}

impl ModelSelectionPolicy {
    /// Number of Gaussian peaks to fit given how many known peaks share the window.
    pub fn peaks_for(&self, peaks_in_window: usize) -> usize {
        if (peaks_in_window > 1 && self.double_peak) || !self.single_peak {
            2
        } else {
            1
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct RoiSettings {
    /// Distance (keV) from the centroid to the outer edge of each background region.
    pub bg_outer_offset: f64,
    /// Distance (keV) from the centroid to the inner edge of each background region.
    pub bg_inner_offset: f64,
    /// Extra keV added outside the detected curvature edges by `find_roi`.
    pub tail_buffer: f64,
    /// Savitzky-Golay window length in samples (odd).
    pub smoothing_window: usize,
    pub smoothing_order: usize,
    /// Second-derivative value that marks the edge of a peak.
    pub curvature_threshold: f64,
    pub background_order: usize,
    pub peak_seed: PeakSeed,
    /// Fits with R² below this are flagged as low confidence.
    pub min_r_squared: f64,
}

impl Default for RoiSettings {
    fn default() -> Self {
        Self {
            bg_outer_offset: 12.0,
            bg_inner_offset: 1.0,
            tail_buffer: 4.0,
            smoothing_window: 11,
            smoothing_order: 3,
            curvature_threshold: 0.0,
            background_order: 1,
            peak_seed: PeakSeed::default(),
            min_r_squared: 0.5,
        }
    }
}
