use nalgebra::DMatrix;

/// Second derivative of `y` (per sample squared) from a Savitzky-Golay filter.
///
/// A polynomial of `order` is least-squares fitted over `window` samples around
/// every point. Near the ends the window is pinned to the edge and the fitted
/// polynomial is differentiated at the point's offset inside it. A window wider
/// than the data is shrunk to the largest odd length that fits.
pub fn savgol_second_derivative(y: &[f64], window: usize, order: usize) -> Vec<f64> {
    let n = y.len();
    let window = effective_window(window, n);
    if window < order + 1 || order < 2 {
        return vec![0.0; n];
    }

    let half = window / 2;
    // Row k of `projection` maps the window samples to polynomial coefficient k.
    let Some(projection) = projection(window, order) else {
        return vec![0.0; n];
    };

    (0..n)
        .map(|i| {
            let start = i.saturating_sub(half).min(n - window);
            let t = i as f64 - (start + half) as f64;
            let samples = &y[start..start + window];

            let coeff = |k: usize| -> f64 {
                samples
                    .iter()
                    .enumerate()
                    .map(|(j, v)| projection[(k, j)] * v)
                    .sum()
            };

            (2..=order)
                .map(|k| (k * (k - 1)) as f64 * coeff(k) * t.powi(k as i32 - 2))
                .sum()
        })
        .collect()
}

fn effective_window(window: usize, n: usize) -> usize {
    let w = window.min(n);
    if w % 2 == 0 { w.saturating_sub(1) } else { w }
}

/// Pseudo-inverse of the Vandermonde matrix of offsets `-half..=half`.
fn projection(window: usize, order: usize) -> Option<DMatrix<f64>> {
    let half = (window / 2) as f64;
    let vandermonde = DMatrix::from_fn(window, order + 1, |r, c| {
        (r as f64 - half).powi(c as i32)
    });
    vandermonde.pseudo_inverse(1e-12).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_exact_on_cubic() {
        // y = x^3 - 2x^2, y'' = 6x - 4
        let y: Vec<f64> = (0..30)
            .map(|i| {
                let x = f64::from(i);
                x.powi(3) - 2.0 * x * x
            })
            .collect();
        let d2 = savgol_second_derivative(&y, 11, 3);
        for (i, v) in d2.iter().enumerate() {
            assert_relative_eq!(*v, 6.0 * i as f64 - 4.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_gaussian_curvature_sign() {
        let y: Vec<f64> = (0..101)
            .map(|i| 100.0 * (-(f64::from(i) - 50.0).powi(2) / (2.0 * 25.0)).exp())
            .collect();
        let d2 = savgol_second_derivative(&y, 11, 3);
        assert!(d2[50] < 0.0);
        assert!(d2[35] > 0.0);
        assert!(d2[65] > 0.0);
    }

    #[test]
    fn test_short_input() {
        assert_eq!(savgol_second_derivative(&[1.0, 2.0], 11, 3), vec![0.0, 0.0]);
        assert!(savgol_second_derivative(&[], 11, 3).is_empty());
        // shrinks to a 5-point window
        let d2 = savgol_second_derivative(&[0.0, 1.0, 4.0, 9.0, 16.0, 25.0], 11, 3);
        assert_eq!(d2.len(), 6);
        for v in d2 {
            assert_relative_eq!(v, 2.0, epsilon = 1e-9);
        }
    }
}
