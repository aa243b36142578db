use std::path::Path;

use crate::error::FitError;
use crate::fitter::common::Calibration;

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct SpectrumMetadata {
    pub calibration: Calibration,
    /// Seconds.
    pub live_time: Option<f64>,
    /// Seconds.
    pub real_time: Option<f64>,
}

impl SpectrumMetadata {
    pub fn dead_time_fraction(&self) -> Option<f64> {
        match (self.live_time, self.real_time) {
            (Some(live), Some(real)) if real > 0.0 => Some(1.0 - live / real),
            _ => None,
        }
    }
}

/// Counts against energy, energies strictly increasing.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Spectrum {
    energies: Vec<f64>,
    counts: Vec<f64>,
    pub metadata: SpectrumMetadata,
}

/// Samples of a spectrum copied out for one region of interest.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Window {
    pub energies: Vec<f64>,
    pub counts: Vec<f64>,
}

impl Window {
    pub fn len(&self) -> usize {
        self.energies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.energies.is_empty()
    }
}

impl Spectrum {
    pub fn new(energies: Vec<f64>, counts: Vec<f64>) -> Result<Self, FitError> {
        if energies.len() != counts.len() {
            return Err(FitError::InvalidSpectrum(format!(
                "{} energies but {} counts",
                energies.len(),
                counts.len()
            )));
        }
        if let Some(bad) = energies.iter().chain(&counts).find(|v| !v.is_finite()) {
            return Err(FitError::InvalidSpectrum(format!("non-finite sample {bad}")));
        }
        if let Some(i) = energies.windows(2).position(|w| w[1] <= w[0]) {
            return Err(FitError::InvalidSpectrum(format!(
                "energy {} at sample {} does not increase",
                energies[i + 1],
                i + 1
            )));
        }

        Ok(Spectrum {
            energies,
            counts,
            metadata: SpectrumMetadata::default(),
        })
    }

    /// Counts indexed by channel, placed on the energy axis by `calibration`.
    pub fn from_channel_counts(counts: Vec<f64>, calibration: Calibration) -> Result<Self, FitError> {
        let max_channel = counts.len().saturating_sub(1) as f64;
        if !calibration.is_increasing_over(max_channel) {
            return Err(FitError::InvalidSpectrum(
                "energy calibration is not increasing over the channel range".to_owned(),
            ));
        }

        let energies = (0..counts.len())
            .map(|ch| calibration.calibrate(ch as f64))
            .collect();
        let mut spectrum = Spectrum::new(energies, counts)?;
        spectrum.metadata.calibration = calibration;
        Ok(spectrum)
    }

    pub fn with_metadata(mut self, metadata: SpectrumMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn energies(&self) -> &[f64] {
        &self.energies
    }

    pub fn counts(&self) -> &[f64] {
        &self.counts
    }

    pub fn len(&self) -> usize {
        self.energies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.energies.is_empty()
    }

    pub fn energy_range(&self) -> Option<(f64, f64)> {
        Some((*self.energies.first()?, *self.energies.last()?))
    }

    /// Index of the sample closest in energy to `energy`.
    pub fn nearest_index(&self, energy: f64) -> Option<usize> {
        if self.is_empty() {
            return None;
        }
        let i = self.energies.partition_point(|&e| e < energy);
        if i == 0 {
            return Some(0);
        }
        if i == self.len() {
            return Some(self.len() - 1);
        }
        if (self.energies[i] - energy) < (energy - self.energies[i - 1]) {
            Some(i)
        } else {
            Some(i - 1)
        }
    }

    /// Samples with `lower < energy < upper`. NaN bounds select nothing.
    pub fn window(&self, lower: f64, upper: f64) -> Result<Window, FitError> {
        let start = self.energies.partition_point(|&e| e <= lower);
        let end = self.energies.partition_point(|&e| e < upper);
        if !(lower < upper) || start >= end {
            return Err(FitError::EmptyWindow { lower, upper });
        }

        Ok(Window {
            energies: self.energies[start..end].to_vec(),
            counts: self.counts[start..end].to_vec(),
        })
    }

    /// Reads a text spectrum, see [`Spectrum::parse_text`].
    pub fn load_text(path: &Path, calibration: Calibration) -> Result<Self, FitError> {
        let contents = std::fs::read_to_string(path)?;
        let spectrum = Self::parse_text(&contents, calibration)?;
        log::info!(
            "Loaded {} samples from {}",
            spectrum.len(),
            path.display()
        );
        Ok(spectrum)
    }

    /// Parses whitespace or comma separated text.
    ///
    /// Two columns are `energy count`; one column is a count per channel and is
    /// calibrated with `calibration`, or with a `# calibration: a b c` header
    /// line when present. `# live_time:` and `# real_time:` headers fill the
    /// metadata; other `#` lines are ignored.
    pub fn parse_text(contents: &str, calibration: Calibration) -> Result<Self, FitError> {
        let mut metadata = SpectrumMetadata {
            calibration,
            ..SpectrumMetadata::default()
        };
        let mut energies = Vec::new();
        let mut counts = Vec::new();
        let mut columns = None;

        for (line_no, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(comment) = line.strip_prefix('#') {
                parse_header(comment, &mut metadata, line_no)?;
                continue;
            }

            let fields = line
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|s| !s.is_empty())
                .map(|s| parse_number(s, line_no))
                .collect::<Result<Vec<f64>, FitError>>()?;

            let n = *columns.get_or_insert(fields.len());
            if fields.len() != n {
                return Err(FitError::InvalidSpectrum(format!(
                    "line {}: expected {n} columns, found {}",
                    line_no + 1,
                    fields.len()
                )));
            }
            match fields.as_slice() {
                [count] => counts.push(*count),
                [energy, count] => {
                    energies.push(*energy);
                    counts.push(*count);
                }
                _ => {
                    return Err(FitError::InvalidSpectrum(format!(
                        "line {}: expected 1 or 2 columns, found {n}",
                        line_no + 1
                    )));
                }
            }
        }

        let spectrum = if columns == Some(2) {
            Spectrum::new(energies, counts)?
        } else {
            Spectrum::from_channel_counts(counts, metadata.calibration.clone())?
        };
        Ok(spectrum.with_metadata(metadata))
    }
}

fn parse_number(field: &str, line_no: usize) -> Result<f64, FitError> {
    field.parse::<f64>().map_err(|e| {
        FitError::InvalidSpectrum(format!("line {}: '{field}': {e}", line_no + 1))
    })
}

fn parse_header(
    comment: &str,
    metadata: &mut SpectrumMetadata,
    line_no: usize,
) -> Result<(), FitError> {
    let Some((key, value)) = comment.split_once(':') else {
        return Ok(());
    };
    match key.trim() {
        "live_time" => metadata.live_time = Some(parse_number(value.trim(), line_no)?),
        "real_time" => metadata.real_time = Some(parse_number(value.trim(), line_no)?),
        "calibration" => {
            let coefficients = value
                .split_whitespace()
                .map(|s| parse_number(s, line_no))
                .collect::<Result<Vec<f64>, FitError>>()?;
            let [a, b, c] = coefficients[..] else {
                return Err(FitError::InvalidSpectrum(format!(
                    "line {}: calibration needs 3 coefficients",
                    line_no + 1
                )));
            };
            metadata.calibration = Calibration::from_coefficients(a, b, c);
        }
        _ => {}
    }
    Ok(())
}
