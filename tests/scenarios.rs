use std::sync::Arc;

use approx::{assert_abs_diff_eq, assert_relative_eq};

use gammafit::fitter::fit_settings::ModelSelectionPolicy;
use gammafit::fitter::models::gaussian::FWHM_FACTOR;
use gammafit::{CompositeModel, FitError, Model, Roi, RoiState, Spectrum};

/// Noise-free spectrum on 950..=1050 keV in 0.5 keV steps.
fn synthetic(background: f64, peaks: &[(f64, f64, f64)]) -> Arc<Spectrum> {
    let energies: Vec<f64> = (0..=200).map(|i| 950.0 + 0.5 * f64::from(i)).collect();
    let counts = energies
        .iter()
        .map(|&e| {
            background
                + peaks
                    .iter()
                    .map(|&(amp, mu, sigma)| {
                        amp * (-(e - mu).powi(2) / (2.0 * sigma * sigma)).exp()
                    })
                    .sum::<f64>()
        })
        .collect();
    Arc::new(Spectrum::new(energies, counts).unwrap())
}

#[test]
fn test_single_peak_on_flat_background() {
    let spectrum = synthetic(100.0, &[(500.0, 1000.0, 3.0)]);
    let mut roi = Roi::new(spectrum, 1000.0).unwrap();
    let report = roi.fit().unwrap();

    assert!(report.is_success(), "{report}");
    let popt = &report.popt;
    assert_abs_diff_eq!(popt[0], 0.0, epsilon = 0.01);
    assert_relative_eq!(popt[1], 100.0, max_relative = 0.01);
    assert_relative_eq!(popt[2], 500.0, max_relative = 0.01);
    assert_relative_eq!(popt[3], 1000.0, max_relative = 0.01);
    assert_relative_eq!(popt[4], 3.0, max_relative = 0.01);
    assert!(report.r_squared > 0.999, "R² {}", report.r_squared);

    let expected_area = 500.0 * 3.0 * (2.0 * std::f64::consts::PI).sqrt();
    assert_relative_eq!(report.net_area, expected_area, max_relative = 0.01);
    assert_relative_eq!(report.peaks[0].fwhm.value, FWHM_FACTOR * 3.0, max_relative = 0.01);
    assert!(report.net_area_uncertainty.is_some_and(|s| s > 0.0));
    assert!(!report.low_confidence);
    assert_eq!(roi.state(), RoiState::Fitted);
}

#[test]
fn test_doublet_selects_two_peaks_and_separates_them() {
    let spectrum = synthetic(50.0, &[(400.0, 998.0, 1.5), (250.0, 1002.0, 1.5)]);
    let mut roi = Roi::new(spectrum, 1000.0).unwrap();

    let n_peaks = roi
        .check_neighboring_peaks(&[998.0, 1002.0], ModelSelectionPolicy::default())
        .unwrap();
    assert_eq!(n_peaks, 2);
    assert_eq!(roi.composite().len(), 2 + 3 * 2);

    let report = roi.fit().unwrap();
    assert!(report.is_success(), "{report}");

    let mut peaks: Vec<(f64, f64)> = report
        .peaks
        .iter()
        .map(|p| (p.centroid.value, p.amplitude.value))
        .collect();
    peaks.sort_by(|a, b| a.0.total_cmp(&b.0));

    assert_abs_diff_eq!(peaks[0].0, 998.0, epsilon = 0.1);
    assert_abs_diff_eq!(peaks[1].0, 1002.0, epsilon = 0.1);
    assert_relative_eq!(peaks[0].1, 400.0, max_relative = 0.05);
    assert_relative_eq!(peaks[1].1, 250.0, max_relative = 0.05);
    assert_eq!(report.peak_areas.len(), 2);
}

#[test]
fn test_crossed_bounds_never_reach_the_optimizer() {
    let spectrum = synthetic(100.0, &[(500.0, 1000.0, 3.0)]);
    assert!(matches!(
        spectrum.window(1010.0, 990.0),
        Err(FitError::EmptyWindow { .. })
    ));

    let mut roi = Roi::new(Arc::clone(&spectrum), 1000.0).unwrap();
    roi.set_upper_bound(980.0).unwrap_err();
    assert_eq!(roi.state(), RoiState::Created);

    let err = roi.fit().unwrap_err();
    assert!(matches!(err, FitError::EmptyWindow { lower, upper } if lower == 988.0 && upper == 980.0));
    assert!(roi.fit_result().is_none());

    // an ROI placed entirely outside the spectrum cannot be created
    assert!(matches!(
        Roi::new(spectrum, 5000.0),
        Err(FitError::EmptyWindow { .. })
    ));
}

#[test]
fn test_background_only_is_flagged() {
    let spectrum = synthetic(100.0, &[]);
    let mut roi = Roi::new(spectrum, 1000.0).unwrap();
    let report = roi.fit().unwrap();

    assert!(!report.is_success() || report.low_confidence, "{report}");
    if report.is_success() {
        assert_abs_diff_eq!(report.net_area, 0.0, epsilon = 1.0);
        assert_abs_diff_eq!(report.popt[1], 100.0, epsilon = 0.1);
    }
    assert!(report.popt.iter().all(|p| p.is_finite()));
}

#[test]
fn test_find_roi_then_fit() {
    let spectrum = synthetic(100.0, &[(500.0, 1000.0, 3.0)]);
    let mut roi = Roi::new(spectrum, 1000.0).unwrap();

    let bounds = roi.find_roi().unwrap();
    assert_eq!(roi.find_roi().unwrap(), bounds);

    let report = roi.fit().unwrap();
    assert!(report.is_success(), "{report}");
    assert_relative_eq!(report.popt[3], 1000.0, max_relative = 0.01);

    // moving a bound throws the old result away
    roi.set_lower_bound(bounds.0 - 2.0).unwrap();
    assert!(roi.fit_result().is_none());
    assert_eq!(roi.state(), RoiState::Windowed);
}

#[test]
fn test_gaussian_area_matches_wide_integral() {
    for &(amp, mu, sigma) in &[(1.0, 0.0, 1.0), (500.0, 1000.0, 3.0), (12.5, 661.7, 0.4)] {
        let model = Model::gaussian("g", amp, mu, sigma);
        let area = model.area().unwrap();
        let integral = model.integral(mu - 50.0 * sigma, mu + 50.0 * sigma);
        assert_relative_eq!(area, integral, max_relative = 1e-9);
        assert_eq!(model.fwhms(), vec![FWHM_FACTOR * sigma]);
    }
}

#[test]
fn test_linear_integral_closed_form() {
    for &(m, c, a, b) in &[(0.0, 100.0, 990.0, 1010.0), (-0.3, 7.0, -2.0, 5.5), (2.0, 0.0, 0.0, 1.0)] {
        let model = Model::linear("bg", m, c);
        assert_eq!(model.integral(a, b), m * (b * b - a * a) / 2.0 + c * (b - a));
    }
}

#[test]
fn test_composite_is_sum_of_sub_models() {
    for k in 0..4 {
        let centers: Vec<f64> = (0..k).map(|i| 1000.0 + 3.0 * f64::from(i)).collect();
        let composite = CompositeModel::build(1, centers.len(), &centers).unwrap();
        assert_eq!(composite.len(), 2 + 3 * centers.len());

        let params: Vec<f64> = (0..composite.len()).map(|i| 0.5 + f64::from(i as u32)).collect();
        for x in [995.0, 1000.0, 1004.5] {
            let expected: f64 = composite
                .sub_models()
                .iter()
                .map(|sub| sub.model.shape().evaluate(&params[sub.range.clone()], x))
                .sum();
            assert_relative_eq!(
                composite.evaluate_at(x, &params).unwrap(),
                expected,
                max_relative = 1e-12
            );
        }
    }
}
