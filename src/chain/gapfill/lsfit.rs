//! Ordinary least-squares line fit and residual variance, the numerical
//! core `GapFiller` uses for its spread fit, interior gap fits and the
//! quality metric `OptionChain::parity_rate_quality` reports.
//!
//! Grounded on `OptionChain::Util::fitLeastSquaresLine` /
//! `computeVarianceAlongFittedLine`.

/// Slope and intercept of the line minimizing squared vertical distance
/// to `points`. Returns `None` for fewer than two points or a degenerate
/// (zero-variance x) input.
pub fn fit_least_squares_line(points: &[(f64, f64)]) -> Option<(f64, f64)> {
    let n = points.len() as f64;
    if points.len() < 2 {
        return None;
    }
    let sum_x: f64 = points.iter().map(|(x, _)| x).sum();
    let sum_y: f64 = points.iter().map(|(_, y)| y).sum();
    let sum_xy: f64 = points.iter().map(|(x, y)| x * y).sum();
    let sum_xx: f64 = points.iter().map(|(x, _)| x * x).sum();

    let denominator = n * sum_xx - sum_x * sum_x;
    if denominator.abs() < f64::EPSILON {
        return None;
    }
    let slope = (n * sum_xy - sum_x * sum_y) / denominator;
    let intercept = (sum_y - slope * sum_x) / n;
    Some((slope, intercept))
}

/// Mean squared residual of `points` against the line `y = slope * x +
/// intercept`.
pub fn compute_variance_along_fitted_line(points: &[(f64, f64)], slope: f64, intercept: f64) -> f64 {
    if points.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = points
        .iter()
        .map(|(x, y)| {
            let fitted = slope * x + intercept;
            (y - fitted).powi(2)
        })
        .sum();
    sum_sq / points.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fits_an_exact_line() {
        let points = vec![(0.0, 1.0), (1.0, 3.0), (2.0, 5.0), (3.0, 7.0)];
        let (slope, intercept) = fit_least_squares_line(&points).unwrap();
        assert!((slope - 2.0).abs() < 1e-9);
        assert!((intercept - 1.0).abs() < 1e-9);
        assert!(compute_variance_along_fitted_line(&points, slope, intercept) < 1e-12);
    }

    #[test]
    fn too_few_points_returns_none() {
        assert!(fit_least_squares_line(&[(1.0, 1.0)]).is_none());
    }

    #[test]
    fn degenerate_vertical_input_returns_none() {
        assert!(fit_least_squares_line(&[(1.0, 1.0), (1.0, 2.0)]).is_none());
    }
}
