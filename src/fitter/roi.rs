use std::sync::Arc;

use compute::predict::PolynomialRegressor;
use nalgebra::DMatrix;

use super::common::Value;
use super::composite::CompositeModel;
use super::fit_settings::{ModelSelectionPolicy, OptimizerSettings, RoiSettings};
use super::models::gaussian::{self, FWHM_FACTOR};
use super::optimizer::cancel::CancelToken;
use super::optimizer::{CurveProblem, basin_hopping, levenberg_marquardt};
use super::report::{FitReport, FitStage, FitStatus, PeakArea, PeakSummary, r_squared};
use super::smoothing::savgol_second_derivative;
use super::uncertainty::UncertaintyPropagator;
use crate::error::FitError;
use crate::spectrum::{Spectrum, Window};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub enum RoiState {
    /// The current bounds select no samples.
    Created,
    Windowed,
    BoundaryEstimated,
    Fitted,
}

/// A region of interest around one seed peak.
///
/// The background bounds are `[left lower, left upper, right lower, right upper]`;
/// the outer two delimit the fitting window.
#[derive(Debug, Clone)]
pub struct Roi {
    spectrum: Arc<Spectrum>,
    centroid: f64,
    bg_bounds: [f64; 4],
    settings: RoiSettings,
    optimizer: OptimizerSettings,
    policy: ModelSelectionPolicy,
    n_peaks: usize,
    window: Window,
    composite: CompositeModel,
    fit_result: Option<FitReport>,
    state: RoiState,
}

impl Roi {
    pub fn new(spectrum: Arc<Spectrum>, centroid: f64) -> Result<Self, FitError> {
        Self::with_settings(
            spectrum,
            centroid,
            RoiSettings::default(),
            OptimizerSettings::default(),
        )
    }

    pub fn with_settings(
        spectrum: Arc<Spectrum>,
        centroid: f64,
        settings: RoiSettings,
        optimizer: OptimizerSettings,
    ) -> Result<Self, FitError> {
        let (outer, inner) = (settings.bg_outer_offset, settings.bg_inner_offset);
        let mut roi = Roi {
            spectrum,
            centroid,
            bg_bounds: [
                centroid - outer,
                centroid - inner,
                centroid + inner,
                centroid + outer,
            ],
            settings,
            optimizer,
            policy: ModelSelectionPolicy::default(),
            n_peaks: 1,
            window: Window::default(),
            composite: CompositeModel::new(),
            fit_result: None,
            state: RoiState::Created,
        };
        roi.refresh()?;
        Ok(roi)
    }

    pub fn centroid(&self) -> f64 {
        self.centroid
    }

    pub fn lower_bound(&self) -> f64 {
        self.bg_bounds[0]
    }

    pub fn upper_bound(&self) -> f64 {
        self.bg_bounds[3]
    }

    pub fn bg_bounds(&self) -> [f64; 4] {
        self.bg_bounds
    }

    pub fn state(&self) -> RoiState {
        self.state
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    pub fn composite(&self) -> &CompositeModel {
        &self.composite
    }

    pub fn n_peaks(&self) -> usize {
        self.n_peaks
    }

    pub fn policy(&self) -> ModelSelectionPolicy {
        self.policy
    }

    pub fn fit_result(&self) -> Option<&FitReport> {
        self.fit_result.as_ref()
    }

    pub fn settings(&self) -> &RoiSettings {
        &self.settings
    }

    pub fn optimizer_settings(&self) -> &OptimizerSettings {
        &self.optimizer
    }

    pub fn set_optimizer_settings(&mut self, optimizer: OptimizerSettings) {
        self.optimizer = optimizer;
    }

    pub fn set_lower_bound(&mut self, lower_bound: f64) -> Result<(), FitError> {
        self.bg_bounds[0] = lower_bound;
        self.refresh()
    }

    pub fn set_upper_bound(&mut self, upper_bound: f64) -> Result<(), FitError> {
        self.bg_bounds[3] = upper_bound;
        self.refresh()
    }

    pub fn set_bg_bounds(&mut self, bg_bounds: [f64; 4]) -> Result<(), FitError> {
        self.bg_bounds = bg_bounds;
        self.refresh()
    }

    /// Re-selects the window from the full spectrum and rebuilds the model.
    /// Any previous fit result is dropped.
    fn refresh(&mut self) -> Result<(), FitError> {
        self.fit_result = None;
        match self.spectrum.window(self.lower_bound(), self.upper_bound()) {
            Ok(window) => {
                self.window = window;
                self.state = RoiState::Windowed;
                self.rebuild_model()
            }
            Err(e) => {
                log::warn!("ROI at {:.3} keV: {e}", self.centroid);
                self.window = Window::default();
                self.state = RoiState::Created;
                Err(e)
            }
        }
    }

    fn rebuild_model(&mut self) -> Result<(), FitError> {
        let centers = vec![self.centroid; self.n_peaks];
        let mut composite = CompositeModel::build_seeded(
            self.settings.background_order,
            self.n_peaks,
            &centers,
            self.settings.peak_seed,
        )?;
        let (slope, intercept) = self.seed_background();
        composite.set_background(slope, intercept)?;
        self.composite = composite;
        Ok(())
    }

    /// Straight line through the background sub-regions of the window, or the
    /// window mean when they hold too few samples.
    fn seed_background(&self) -> (f64, f64) {
        let [_, left_upper, right_lower, _] = self.bg_bounds;
        let (x, y): (Vec<f64>, Vec<f64>) = self
            .window
            .energies
            .iter()
            .zip(&self.window.counts)
            .filter(|&(&e, _)| e <= left_upper || e >= right_lower)
            .map(|(&e, &c)| (e - self.centroid, c))
            .unzip();

        let mean = || {
            let counts = &self.window.counts;
            counts.iter().sum::<f64>() / counts.len().max(1) as f64
        };

        if x.len() < 2 {
            return (0.0, mean());
        }

        let mut regressor = PolynomialRegressor::new(1);
        regressor.fit(&x, &y);
        match regressor.coef[..] {
            [c0, c1] if c0.is_finite() && c1.is_finite() => (c1, c0 - c1 * self.centroid),
            _ => {
                log::debug!("background regression failed, seeding with the window mean");
                (0.0, mean())
            }
        }
    }

    /// Sets the window from the curvature of the smoothed spectrum.
    ///
    /// Walks outward from the centroid through the Savitzky-Golay second
    /// derivative until it exceeds the threshold on each side, then pads both
    /// edges by the tail buffer.
    pub fn find_roi(&mut self) -> Result<(f64, f64), FitError> {
        let spectrum = Arc::clone(&self.spectrum);
        let energies = spectrum.energies();
        let Some(center) = spectrum.nearest_index(self.centroid) else {
            return Err(FitError::EmptyWindow {
                lower: self.lower_bound(),
                upper: self.upper_bound(),
            });
        };

        let d2 = savgol_second_derivative(
            spectrum.counts(),
            self.settings.smoothing_window,
            self.settings.smoothing_order,
        );
        let threshold = self.settings.curvature_threshold;
        let left = (0..center).rev().find(|&i| d2[i] > threshold).unwrap_or(0);
        let right = (center + 1..d2.len())
            .find(|&i| d2[i] > threshold)
            .unwrap_or(d2.len() - 1);

        let tail = self.settings.tail_buffer;
        let (left_edge, right_edge) = (energies[left], energies[right]);
        let (lower, upper) = (left_edge - tail, right_edge + tail);
        log::info!(
            "ROI at {:.3} keV: curvature edges {left_edge:.3}..{right_edge:.3}, window [{lower:.3}, {upper:.3}]",
            self.centroid
        );

        self.bg_bounds = [lower, left_edge, right_edge, upper];
        self.refresh()?;
        self.state = RoiState::BoundaryEstimated;
        Ok((lower, upper))
    }

    /// Chooses one or two Gaussians from how many known peaks sit strictly
    /// inside the window. Returns the number of peaks now modelled.
    pub fn check_neighboring_peaks(
        &mut self,
        all_peak_locations: &[f64],
        policy: ModelSelectionPolicy,
    ) -> Result<usize, FitError> {
        let (lower, upper) = (self.lower_bound(), self.upper_bound());
        let inside = all_peak_locations
            .iter()
            .filter(|&&e| lower < e && e < upper)
            .count();
        let n_peaks = policy.peaks_for(inside);
        self.policy = policy;

        if n_peaks != self.n_peaks {
            log::info!(
                "ROI at {:.3} keV: {inside} known peaks in window, switching to {n_peaks} peak model",
                self.centroid
            );
            self.n_peaks = n_peaks;
            self.fit_result = None;
            if !self.window.is_empty() {
                self.rebuild_model()?;
            }
        }
        Ok(n_peaks)
    }

    pub fn fit(&mut self) -> Result<&FitReport, FitError> {
        self.run_fit(None)
    }

    pub fn fit_with_cancel(&mut self, cancel: &CancelToken) -> Result<&FitReport, FitError> {
        self.run_fit(Some(cancel))
    }

    /// Global then local optimization. Only an empty window is returned as an
    /// error; optimizer failures end up in the report status.
    fn run_fit(&mut self, cancel: Option<&CancelToken>) -> Result<&FitReport, FitError> {
        if self.window.is_empty() {
            return Err(FitError::EmptyWindow {
                lower: self.lower_bound(),
                upper: self.upper_bound(),
            });
        }

        log::info!(
            "Fitting ROI at {:.3} keV: {} samples, {} peak(s)",
            self.centroid,
            self.window.len(),
            self.n_peaks
        );

        let initial = self.composite.params().to_vec();
        let (popt, pcov, status) = match self.optimize(&initial, cancel) {
            Ok((popt, pcov)) => (popt, pcov, FitStatus::Success),
            Err((stage, err)) => {
                log::error!(
                    "Fit of ROI at {:.3} keV failed in {stage} stage: {err}",
                    self.centroid
                );
                let reason = match err {
                    FitError::Cancelled => "cancelled".to_owned(),
                    FitError::OptimizationFailure { reason, .. } => reason,
                    other => other.to_string(),
                };
                let n = initial.len();
                (initial, DMatrix::identity(n, n), FitStatus::Failed { stage, reason })
            }
        };

        self.composite.set_params(&popt)?;
        let report = self.assemble_report(&popt, &pcov, status);
        self.state = RoiState::Fitted;
        Ok(self.fit_result.insert(report))
    }

    fn optimize(
        &self,
        initial: &[f64],
        cancel: Option<&CancelToken>,
    ) -> Result<(Vec<f64>, DMatrix<f64>), (FitStage, FitError)> {
        let (x, y) = (&self.window.energies, &self.window.counts);

        let global = CurveProblem::unweighted(&self.composite, x, y);
        let hopped = basin_hopping::minimize(&global, initial, &self.optimizer, cancel)
            .map_err(|e| (FitStage::Global, e))?;
        log::debug!(
            "global stage: {} hops, {} accepted, cost {:.6e}",
            hopped.hops,
            hopped.accepted,
            hopped.cost
        );

        let local = CurveProblem::poisson_weighted(&self.composite, x, y);
        let solution = levenberg_marquardt::minimize(
            &local,
            &hopped.params,
            &self.optimizer,
            FitStage::Local,
            cancel,
        )
        .map_err(|e| (FitStage::Local, e))?;
        if !solution.converged {
            let reason = format!("did not converge in {} iterations", solution.iterations);
            return Err((FitStage::Local, FitError::optimization(FitStage::Local, reason)));
        }

        let pcov = levenberg_marquardt::covariance(&local, &solution.params)
            .map_err(|e| (FitStage::Local, e))?;
        Ok((solution.params, pcov))
    }

    fn assemble_report(&self, popt: &[f64], pcov: &DMatrix<f64>, status: FitStatus) -> FitReport {
        let composite = &self.composite;
        let (lower, upper) = (self.lower_bound(), self.upper_bound());
        let mut warnings = Vec::new();

        let perr: Vec<f64> = (0..popt.len())
            .map(|i| pcov[(i, i)].max(0.0).sqrt())
            .collect();
        let y_hat: Vec<f64> = self
            .window
            .energies
            .iter()
            .map(|&x| composite.evaluate(x))
            .collect();
        let r2 = r_squared(&self.window.counts, &y_hat);

        let (net_area, areas) = composite.net_area();
        let (background_area, background_areas) = composite.background_area(None);

        let variance = match composite.net_area_uncertainty(lower, upper, pcov) {
            Ok(variance) => Some(variance),
            Err(e) => {
                log::warn!("ROI at {:.3} keV: area uncertainty unavailable: {e}", self.centroid);
                warnings.push(format!("area uncertainty unavailable: {e}"));
                None
            }
        };
        let net_area_uncertainty = variance.as_ref().map(|v| {
            UncertaintyPropagator::reported_sigma(
                v.total_variance,
                net_area,
                v.scaling_factor,
                background_area,
            )
        });

        let peak_areas = composite
            .peaks()
            .enumerate()
            .map(|(i, sub)| PeakArea {
                name: sub.model.name.clone(),
                area: areas[i],
                uncertainty: variance.as_ref().map(|v| {
                    UncertaintyPropagator::reported_sigma(
                        v.peak_variances[i],
                        areas[i],
                        v.scaling_factor,
                        background_areas[i],
                    )
                }),
                background_area: background_areas[i],
            })
            .collect();

        let peaks = peak_summaries(composite, popt, &perr);

        let parameter_names = composite
            .sub_models()
            .iter()
            .flat_map(|sub| {
                sub.model
                    .shape()
                    .parameter_names()
                    .iter()
                    .map(move |p| format!("{}.{p}", sub.model.name))
            })
            .collect();

        if r2 < self.settings.min_r_squared {
            warnings.push(format!(
                "R² {r2:.4} is below {:.4}",
                self.settings.min_r_squared
            ));
        }
        let low_confidence = !status.is_success()
            || r2 < self.settings.min_r_squared
            || net_area_uncertainty.is_none_or(|sigma| net_area <= sigma);

        FitReport {
            status,
            centroid: self.centroid,
            lower_bound: lower,
            upper_bound: upper,
            parameter_names,
            popt: popt.to_vec(),
            perr,
            pcov: pcov
                .row_iter()
                .map(|row| row.iter().copied().collect())
                .collect(),
            r_squared: r2,
            net_area,
            net_area_uncertainty,
            background_area,
            scaling_factor: variance.map(|v| v.scaling_factor),
            peak_areas,
            peaks,
            energies: self.window.energies.clone(),
            counts: self.window.counts.clone(),
            y_hat,
            warnings,
            low_confidence,
        }
    }

    /// Curve of each sub-model over the window at the current parameters.
    pub fn component_curves(&self) -> Vec<(String, Vec<f64>)> {
        self.composite.component_curves(&self.window.energies)
    }
}

/// One summary per Gaussian component of every peak sub-model. Components of a
/// multi-Gaussian sub-model are suffixed with their index.
fn peak_summaries(composite: &CompositeModel, popt: &[f64], perr: &[f64]) -> Vec<PeakSummary> {
    let mut peaks = Vec::new();
    for sub in composite.peaks() {
        let values = popt[sub.range.clone()].chunks_exact(gaussian::N_PARAMS);
        let errors = perr[sub.range.clone()].chunks_exact(gaussian::N_PARAMS);
        let components = values.len();

        for (j, (p, e)) in values.zip(errors).enumerate() {
            let name = if components == 1 {
                sub.model.name.clone()
            } else {
                format!("{}[{j}]", sub.model.name)
            };
            peaks.push(PeakSummary {
                name,
                amplitude: Value::new(p[0], e[0]),
                centroid: Value::new(p[1], e[1]),
                sigma: Value::new(p[2].abs(), e[2]),
                fwhm: Value::new(FWHM_FACTOR * p[2].abs(), FWHM_FACTOR * e[2]),
            });
        }
    }
    peaks
}
