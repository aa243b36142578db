use find_peaks::PeakFinder;

use crate::spectrum::Spectrum;

/// Filters handed to the `find_peaks` crate. Each bound only applies when its
/// `enable_*` flag is set; the distances and plateau sizes are in samples.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct PeakFindingSettings {
    pub min_height: f64,
    pub max_height: f64,
    pub min_prominence: f64,
    pub max_prominence: f64,
    pub min_difference: f64,
    pub max_difference: f64,
    pub min_plateau_size: usize,
    pub max_plateau_size: usize,
    pub min_distance: usize,
    pub max_distance: usize,

    pub enable_min_height: bool,
    pub enable_max_height: bool,
    pub enable_min_prominence: bool,
    pub enable_max_prominence: bool,
    pub enable_min_difference: bool,
    pub enable_max_difference: bool,
    pub enable_min_plateau_size: bool,
    pub enable_max_plateau_size: bool,
    pub enable_min_distance: bool,
    pub enable_max_distance: bool,

    /// Only the lowest-energy candidates are kept when more are found.
    pub max_peaks: usize,
}

impl Default for PeakFindingSettings {
    fn default() -> Self {
        PeakFindingSettings {
            min_height: 0.0,
            max_height: 0.0,
            min_prominence: 0.0,
            max_prominence: 0.0,
            min_difference: 1.0,
            max_difference: 1.0,
            min_plateau_size: 1,
            max_plateau_size: 1,
            min_distance: 1,
            max_distance: 1,

            enable_min_height: false,
            enable_max_height: false,
            enable_min_prominence: false,
            enable_max_prominence: false,
            enable_min_difference: false,
            enable_max_difference: false,
            enable_min_plateau_size: false,
            enable_max_plateau_size: false,
            enable_min_distance: false,
            enable_max_distance: false,

            max_peaks: 40,
        }
    }
}

impl PeakFindingSettings {
    /// Candidate peak energies in `spectrum`, in increasing order.
    pub fn find_peaks(&self, spectrum: &Spectrum) -> Vec<f64> {
        let counts = spectrum.counts();
        if counts.is_empty() {
            return Vec::new();
        }
        let mut peak_finder = PeakFinder::new(counts);

        if self.enable_min_height {
            peak_finder.with_min_height(self.min_height);
        }

        if self.enable_max_height {
            peak_finder.with_max_height(self.max_height);
        }

        if self.enable_min_prominence {
            peak_finder.with_min_prominence(self.min_prominence);
        }

        if self.enable_max_prominence {
            peak_finder.with_max_prominence(self.max_prominence);
        }

        if self.enable_min_difference {
            peak_finder.with_min_difference(self.min_difference);
        }

        if self.enable_max_difference {
            peak_finder.with_max_difference(self.max_difference);
        }

        if self.enable_min_plateau_size {
            peak_finder.with_min_plateau_size(self.min_plateau_size);
        }

        if self.enable_max_plateau_size {
            peak_finder.with_max_plateau_size(self.max_plateau_size);
        }

        if self.enable_min_distance {
            peak_finder.with_min_distance(self.min_distance);
        }

        if self.enable_max_distance {
            peak_finder.with_max_distance(self.max_distance);
        }

        let mut positions: Vec<usize> = peak_finder
            .find_peaks()
            .iter()
            .map(|peak| peak.middle_position())
            .collect();
        positions.sort_unstable();
        positions.dedup();

        if positions.len() > self.max_peaks {
            log::info!(
                "Peak finder returned {} candidates, keeping the first {}",
                positions.len(),
                self.max_peaks
            );
            positions.truncate(self.max_peaks);
        }

        let energies = spectrum.energies();
        positions.into_iter().map(|i| energies[i]).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_peak_spectrum() -> Spectrum {
        let energies: Vec<f64> = (0..400).map(|i| 100.0 + 0.5 * f64::from(i)).collect();
        let counts = energies
            .iter()
            .map(|&e| {
                20.0 + 120.0 * (-(e - 150.0_f64).powi(2) / 8.0).exp()
                    + 300.0 * (-(e - 250.0_f64).powi(2) / 8.0).exp()
            })
            .collect();
        Spectrum::new(energies, counts).unwrap()
    }

    #[test]
    fn test_finds_both_peaks() {
        let settings = PeakFindingSettings {
            enable_min_prominence: true,
            min_prominence: 50.0,
            ..PeakFindingSettings::default()
        };
        let peaks = settings.find_peaks(&two_peak_spectrum());
        assert_eq!(peaks, vec![150.0, 250.0]);
    }

    #[test]
    fn test_cap_keeps_lowest_energies() {
        let settings = PeakFindingSettings {
            enable_min_prominence: true,
            min_prominence: 50.0,
            max_peaks: 1,
            ..PeakFindingSettings::default()
        };
        // the taller peak at 250 keV is dropped
        assert_eq!(settings.find_peaks(&two_peak_spectrum()), vec![150.0]);
    }

    #[test]
    fn test_flat_spectrum_has_no_peaks() {
        let spectrum = Spectrum::new(vec![1.0, 2.0, 3.0, 4.0], vec![5.0; 4]).unwrap();
        assert!(PeakFindingSettings::default().find_peaks(&spectrum).is_empty());
    }
}
