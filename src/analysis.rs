use std::sync::Arc;

use indicatif::ProgressBar;
use rayon::prelude::*;

use crate::config::AnalysisConfig;
use crate::error::FitError;
use crate::fitter::optimizer::cancel::CancelToken;
use crate::fitter::report::FitReport;
use crate::fitter::roi::Roi;
use crate::peak_finder::PeakFindingSettings;
use crate::spectrum::Spectrum;

/// The set of ROIs placed on one spectrum, kept ordered by centroid.
#[derive(Debug, Clone)]
pub struct SpectrumAnalysis {
    spectrum: Arc<Spectrum>,
    config: AnalysisConfig,
    rois: Vec<Roi>,
}

impl SpectrumAnalysis {
    pub fn new(spectrum: Spectrum, config: AnalysisConfig) -> Self {
        Self::from_shared(Arc::new(spectrum), config)
    }

    pub fn from_shared(spectrum: Arc<Spectrum>, config: AnalysisConfig) -> Self {
        Self {
            spectrum,
            config,
            rois: Vec::new(),
        }
    }

    pub fn spectrum(&self) -> &Spectrum {
        &self.spectrum
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn rois(&self) -> &[Roi] {
        &self.rois
    }

    pub fn rois_mut(&mut self) -> &mut [Roi] {
        &mut self.rois
    }

    pub fn peak_locations(&self) -> Vec<f64> {
        self.rois.iter().map(Roi::centroid).collect()
    }

    /// Places a new ROI with default background regions around `energy`.
    /// Returns its index.
    pub fn add_peak(&mut self, energy: f64) -> Result<usize, FitError> {
        let roi = Roi::with_settings(
            Arc::clone(&self.spectrum),
            energy,
            self.config.roi.clone(),
            self.config.optimizer.clone(),
        )?;
        let index = self.rois.partition_point(|r| r.centroid() < energy);
        self.rois.insert(index, roi);
        log::info!("Added peak at {energy:.3} keV");
        Ok(index)
    }

    fn nearest(&self, energy: f64) -> Option<usize> {
        self.rois
            .iter()
            .enumerate()
            .map(|(i, roi)| (i, (roi.centroid() - energy).abs()))
            .filter(|&(_, distance)| distance <= self.config.peak_tolerance)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(i, _)| i)
    }

    /// Removes the ROI closest to `energy` if it is within the peak tolerance.
    pub fn pop_peak(&mut self, energy: f64) -> Option<Roi> {
        let index = self.nearest(energy)?;
        let roi = self.rois.remove(index);
        log::info!("Removed peak at {:.3} keV", roi.centroid());
        Some(roi)
    }

    pub fn clear_peaks(&mut self) {
        self.rois.clear();
    }

    /// Adds an ROI for every candidate the peak finder reports, skipping
    /// energies already covered by an ROI. Returns the energies added.
    pub fn auto_peaks(&mut self, settings: &PeakFindingSettings) -> Vec<f64> {
        let candidates = settings.find_peaks(&self.spectrum);
        log::info!("Peak finder proposed {} candidates", candidates.len());

        let mut added = Vec::new();
        for energy in candidates {
            if self.nearest(energy).is_some() {
                continue;
            }
            match self.add_peak(energy) {
                Ok(_) => added.push(energy),
                Err(e) => log::warn!("Skipping candidate at {energy:.3} keV: {e}"),
            }
        }
        added
    }

    /// Runs boundary estimation on every ROI. Returns how many succeeded.
    pub fn auto_roi(&mut self) -> usize {
        self.rois
            .iter_mut()
            .filter_map(|roi| match roi.find_roi() {
                Ok(_) => Some(()),
                Err(e) => {
                    log::warn!("Could not estimate ROI at {:.3} keV: {e}", roi.centroid());
                    None
                }
            })
            .count()
    }

    /// Re-runs model selection on every ROI against the current peak set.
    pub fn check_neighbors(&mut self) -> Result<(), FitError> {
        let locations = self.peak_locations();
        let policy = self.config.model_policy;
        for roi in &mut self.rois {
            roi.check_neighboring_peaks(&locations, policy)?;
        }
        Ok(())
    }

    /// Fits the ROI nearest `energy`, adding one there first if none is close.
    pub fn fit_peak(&mut self, energy: f64) -> Result<&FitReport, FitError> {
        let index = match self.nearest(energy) {
            Some(index) => index,
            None => self.add_peak(energy)?,
        };
        let locations = self.peak_locations();
        let roi = &mut self.rois[index];
        roi.check_neighboring_peaks(&locations, self.config.model_policy)?;
        roi.fit()
    }

    /// Fits every ROI in parallel. Results come back in ROI order.
    pub fn fit_all(
        &mut self,
        cancel: Option<&CancelToken>,
        progress: Option<&ProgressBar>,
    ) -> Vec<Result<FitReport, FitError>> {
        if let Err(e) = self.check_neighbors() {
            log::warn!("Model selection failed: {e}");
        }

        self.rois
            .par_iter_mut()
            .map(|roi| {
                let result = match cancel {
                    Some(token) => roi.fit_with_cancel(token).cloned(),
                    None => roi.fit().cloned(),
                };
                if let Some(pb) = progress {
                    pb.inc(1);
                }
                result
            })
            .collect()
    }

    /// Reports of every ROI fitted so far.
    pub fn reports(&self) -> Vec<&FitReport> {
        self.rois.iter().filter_map(Roi::fit_result).collect()
    }
}
