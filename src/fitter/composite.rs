use std::ops::Range;

use nalgebra::DMatrix;

use super::models::{Model, ModelShape, check_len};
use super::uncertainty::{NetAreaVariance, UncertaintyPropagator};
use crate::error::FitError;

pub const BACKGROUND_NAME: &str = "linear_bg";

/// Seed values for peaks created by [`CompositeModel::build`].
#[derive(Debug, Clone, Copy, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct PeakSeed {
    pub amplitude: f64,
    pub sigma: f64,
}

impl Default for PeakSeed {
    fn default() -> Self {
        PeakSeed {
            amplitude: 100.0,
            sigma: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub enum SubModelKind {
    Background,
    Peak,
}

impl From<ModelShape> for SubModelKind {
    fn from(shape: ModelShape) -> Self {
        if shape.is_peak() {
            SubModelKind::Peak
        } else {
            SubModelKind::Background
        }
    }
}

/// One entry of the parameter index map.
#[derive(Debug, Clone, PartialEq)]
pub struct SubModel {
    pub model: Model,
    pub kind: SubModelKind,
    pub range: Range<usize>,
}

impl SubModel {
    fn slice<'a>(&self, flat: &'a [f64]) -> &'a [f64] {
        &flat[self.range.clone()]
    }
}

/// Background and peak models summed into one function of a flat parameter vector.
///
/// Sub-models occupy contiguous, non-overlapping ranges of the flat vector in
/// insertion order, and those ranges always cover it exactly.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompositeModel {
    sub_models: Vec<SubModel>,
    params: Vec<f64>,
    lower_bounds: Vec<f64>,
    upper_bounds: Vec<f64>,
}

impl CompositeModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Linear background first, then `n_peaks` Gaussians named `gauss_0`, `gauss_1`, ...
    pub fn build(
        background_order: usize,
        n_peaks: usize,
        peak_centers: &[f64],
    ) -> Result<Self, FitError> {
        Self::build_seeded(background_order, n_peaks, peak_centers, PeakSeed::default())
    }

    pub fn build_seeded(
        background_order: usize,
        n_peaks: usize,
        peak_centers: &[f64],
        seed: PeakSeed,
    ) -> Result<Self, FitError> {
        if background_order != 1 {
            return Err(FitError::UnsupportedBackgroundOrder(background_order));
        }
        check_len(n_peaks, peak_centers.len())?;

        let mut composite = CompositeModel::new();
        composite.add(Model::linear(BACKGROUND_NAME, 0.0, 1.0))?;
        for (i, &center) in peak_centers.iter().enumerate() {
            composite.add(Model::gaussian(
                &format!("gauss_{i}"),
                seed.amplitude,
                center,
                seed.sigma,
            ))?;
        }
        Ok(composite)
    }

    /// Appends a sub-model, rejecting names already in use.
    pub fn add(&mut self, model: Model) -> Result<(), FitError> {
        if self.sub_models.iter().any(|s| s.model.name == model.name) {
            return Err(FitError::DuplicateModelName(model.name));
        }

        let start = self.params.len();
        let range = start..start + model.n_params();
        self.params.extend_from_slice(model.params());
        self.lower_bounds.extend_from_slice(model.lower_bounds());
        self.upper_bounds.extend_from_slice(model.upper_bounds());

        log::debug!("Model added: {} at {:?}", model.name, range);
        self.sub_models.push(SubModel {
            kind: model.shape().into(),
            model,
            range,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn params(&self) -> &[f64] {
        &self.params
    }

    pub fn lower_bounds(&self) -> &[f64] {
        &self.lower_bounds
    }

    pub fn upper_bounds(&self) -> &[f64] {
        &self.upper_bounds
    }

    pub fn sub_models(&self) -> &[SubModel] {
        &self.sub_models
    }

    pub fn index_of(&self, name: &str) -> Option<Range<usize>> {
        self.sub_models
            .iter()
            .find(|s| s.model.name == name)
            .map(|s| s.range.clone())
    }

    pub fn background(&self) -> Option<&SubModel> {
        self.sub_models
            .iter()
            .find(|s| s.kind == SubModelKind::Background)
    }

    pub fn peaks(&self) -> impl Iterator<Item = &SubModel> {
        self.sub_models
            .iter()
            .filter(|s| s.kind == SubModelKind::Peak)
    }

    pub fn set_params(&mut self, params: &[f64]) -> Result<(), FitError> {
        check_len(self.len(), params.len())?;
        self.params.copy_from_slice(params);
        for sub in &mut self.sub_models {
            sub.model.set_params(&params[sub.range.clone()])?;
        }
        Ok(())
    }

    /// Sets the linear background parameters, if the composite has a background.
    pub fn set_background(&mut self, slope: f64, intercept: f64) -> Result<(), FitError> {
        let Some(range) = self.background().map(|s| s.range.clone()) else {
            return Ok(());
        };
        let mut params = self.params.clone();
        params[range].copy_from_slice(&[slope, intercept]);
        self.set_params(&params)
    }

    pub fn evaluate_at(&self, x: f64, flat_params: &[f64]) -> Result<f64, FitError> {
        check_len(self.len(), flat_params.len())?;
        Ok(self.sum_at(x, flat_params))
    }

    pub fn evaluate_many(&self, x: &[f64], flat_params: &[f64]) -> Result<Vec<f64>, FitError> {
        check_len(self.len(), flat_params.len())?;
        Ok(x.iter().map(|&xi| self.sum_at(xi, flat_params)).collect())
    }

    pub fn evaluate(&self, x: f64) -> f64 {
        self.sum_at(x, &self.params)
    }

    fn sum_at(&self, x: f64, flat_params: &[f64]) -> f64 {
        self.sub_models
            .iter()
            .map(|s| s.model.shape().evaluate(s.slice(flat_params), x))
            .sum()
    }

    /// d(model)/d(params) at every `x`, one row per point.
    pub fn jacobian_at(&self, x: &[f64], flat_params: &[f64]) -> Result<DMatrix<f64>, FitError> {
        check_len(self.len(), flat_params.len())?;
        let mut jacobian = DMatrix::zeros(x.len(), self.len());
        let mut row = vec![0.0; self.len()];

        for (i, &xi) in x.iter().enumerate() {
            for sub in &self.sub_models {
                sub.model
                    .shape()
                    .gradient(sub.slice(flat_params), xi, &mut row[sub.range.clone()]);
            }
            for (j, &value) in row.iter().enumerate() {
                jacobian[(i, j)] = value;
            }
        }
        Ok(jacobian)
    }

    /// Curve of every sub-model at the current parameters, in insertion order.
    pub fn component_curves(&self, x: &[f64]) -> Vec<(String, Vec<f64>)> {
        self.sub_models
            .iter()
            .map(|s| (s.model.name.clone(), s.model.evaluate_many(x)))
            .collect()
    }

    pub fn peak_centroids(&self) -> Vec<f64> {
        self.peaks().flat_map(|s| s.model.centroids()).collect()
    }

    pub fn peak_sigmas(&self) -> Vec<f64> {
        self.peaks().flat_map(|s| s.model.sigmas()).collect()
    }

    pub fn peak_amplitudes(&self) -> Vec<f64> {
        self.peaks()
            .flat_map(|s| s.model.shape().amplitudes(s.model.params()))
            .collect()
    }

    pub fn peak_fwhms(&self) -> Vec<f64> {
        self.peaks().flat_map(|s| s.model.fwhms()).collect()
    }

    /// Total and per-peak-sub-model area with the background excluded.
    pub fn net_area(&self) -> (f64, Vec<f64>) {
        let areas: Vec<f64> = self.peaks().filter_map(|s| s.model.area()).collect();
        (areas.iter().sum(), areas)
    }

    /// Background counts under each peak.
    ///
    /// Without `bounds` each peak integrates the background over its own
    /// centroid ± 3 sigma; with `bounds` every peak uses the same window.
    pub fn background_area(&self, bounds: Option<(f64, f64)>) -> (f64, Vec<f64>) {
        let Some(background) = self.background() else {
            return (0.0, vec![0.0; self.peaks().count()]);
        };

        let areas: Vec<f64> = self
            .peaks()
            .map(|peak| {
                let (a, b) = match bounds {
                    Some(window) => window,
                    None => peak_window(peak, 3.0),
                };
                background.model.integral(a, b)
            })
            .collect();

        (areas.iter().sum(), areas)
    }

    pub fn net_area_uncertainty(
        &self,
        lbound: f64,
        ubound: f64,
        covariance: &DMatrix<f64>,
    ) -> Result<NetAreaVariance, FitError> {
        UncertaintyPropagator::default().propagate(self, (lbound, ubound), covariance)
    }
}

/// Span of a peak sub-model's components at `n_sigma`, merged when it has several.
pub(crate) fn peak_window(peak: &SubModel, n_sigma: f64) -> (f64, f64) {
    let centroids = peak.model.centroids();
    let sigmas = peak.model.sigmas();
    centroids.iter().zip(&sigmas).fold(
        (f64::INFINITY, f64::NEG_INFINITY),
        |(lo, hi), (&c, &s)| (lo.min(c - n_sigma * s), hi.max(c + n_sigma * s)),
    )
}
