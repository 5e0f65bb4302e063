//! First-degree least-squares fit.

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum FitError {
    #[error("Least squares needs at least 2 numeric points, got {0}")]
    TooFewPoints(usize),

    #[error("x values are all equal; the slope is undefined")]
    ZeroVariance,

    #[error("x has {x} values but y has {y}")]
    LengthMismatch { x: usize, y: usize },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
}

impl LinearFit {
    pub fn predict(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }
}

/// Pairs where both coordinates are present.
pub fn paired_points(x: &[f64], y: &[f64]) -> Result<Vec<(f64, f64)>, FitError> {
    if x.len() != y.len() {
        return Err(FitError::LengthMismatch {
            x: x.len(),
            y: y.len(),
        });
    }
    Ok(x.iter()
        .zip(y)
        .filter(|(a, b)| a.is_finite() && b.is_finite())
        .map(|(a, b)| (*a, *b))
        .collect())
}

/// Fit `y = slope * x + intercept`, ignoring missing values.
pub fn least_squares(x: &[f64], y: &[f64]) -> Result<LinearFit, FitError> {
    let points = paired_points(x, y)?;
    if points.len() < 2 {
        return Err(FitError::TooFewPoints(points.len()));
    }

    let n = points.len() as f64;
    let mean_x = points.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = points.iter().map(|p| p.1).sum::<f64>() / n;

    let sxx: f64 = points.iter().map(|p| (p.0 - mean_x).powi(2)).sum();
    let sxy: f64 = points.iter().map(|p| (p.0 - mean_x) * (p.1 - mean_y)).sum();
    let syy: f64 = points.iter().map(|p| (p.1 - mean_y).powi(2)).sum();

    // sxx scales with the square of the unit; compare the values themselves.
    let first_x = points[0].0;
    if points.iter().all(|p| p.0 == first_x) || !(sxx > 0.0) {
        return Err(FitError::ZeroVariance);
    }

    let slope = sxy / sxx;
    let intercept = mean_y - slope * mean_x;
    // Constant y is fitted exactly by a flat line.
    let r_squared = if syy == 0.0 { 1.0 } else { (sxy * sxy) / (sxx * syy) };

    Ok(LinearFit {
        slope,
        intercept,
        r_squared,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_line_is_recovered() {
        let x = [1.0, 2.0, 3.0, 4.0];
        let y: Vec<f64> = x.iter().map(|v| 2.0 * v + 1.0).collect();
        let fit = least_squares(&x, &y).unwrap();
        assert!((fit.slope - 2.0).abs() < 1e-12);
        assert!((fit.intercept - 1.0).abs() < 1e-12);
        assert!((fit.r_squared - 1.0).abs() < 1e-12);
        assert!((fit.predict(10.0) - 21.0).abs() < 1e-9);
    }

    #[test]
    fn noisy_points_have_r_squared_below_one() {
        let fit = least_squares(&[0.0, 1.0, 2.0, 3.0], &[0.1, 0.9, 2.2, 2.8]).unwrap();
        assert!(fit.r_squared < 1.0 && fit.r_squared > 0.95);
    }

    #[test]
    fn missing_values_are_skipped() {
        let fit = least_squares(&[1.0, f64::NAN, 3.0], &[3.0, 100.0, 7.0]).unwrap();
        assert!((fit.slope - 2.0).abs() < 1e-12);
    }

    #[test]
    fn small_unit_data_is_fitted() {
        // Capacitances in farads.
        let x = [1e-9, 2e-9, 3e-9, 4e-9];
        let y: Vec<f64> = x.iter().map(|v| 5.0 * v).collect();
        let fit = least_squares(&x, &y).unwrap();
        assert!((fit.slope - 5.0).abs() < 1e-9);
        assert!(fit.intercept.abs() < 1e-20);
        assert!((fit.r_squared - 1.0).abs() < 1e-9);

        // Wavelengths in metres against a large offset.
        let fit = least_squares(&[500e-9, 600e-9, 700e-9], &[1.0, 2.0, 3.0]).unwrap();
        assert!((fit.slope - 1e7).abs() < 1e-3);
    }

    #[test]
    fn degenerate_inputs_are_errors() {
        assert_eq!(least_squares(&[1.0], &[2.0]), Err(FitError::TooFewPoints(1)));
        assert_eq!(
            least_squares(&[2.0, 2.0, 2.0], &[1.0, 2.0, 3.0]),
            Err(FitError::ZeroVariance)
        );
        assert!(matches!(
            least_squares(&[1.0, 2.0], &[1.0]),
            Err(FitError::LengthMismatch { .. })
        ));
    }
}
