use nalgebra::{DMatrix, SymmetricEigen};
use once_cell::sync::Lazy;

/// Largest number of Gauss-Legendre points (per direction) handed out by [gauss_rule]
pub const MAX_GAUSS_POINTS: usize = 32;

static GAUSS_RULES: Lazy<Vec<(Vec<f64>, Vec<f64>)>> = Lazy::new(|| {
    (0..=MAX_GAUSS_POINTS)
        .map(|n| {
            if n == 0 {
                (Vec::new(), Vec::new())
            } else {
                gauss_quadrature_points(n)
            }
        })
        .collect()
});

/// Get a cached set of `n` Gauss-Legendre points and weights over `(-1, 1)`
///
/// `n` is clamped to the range `1..=MAX_GAUSS_POINTS`
///
/// ```
/// use hp_fem_2d::integration::glq::*;
///
/// let (points, weights) = gauss_rule(4);
/// assert_eq!(points.len(), 4);
/// assert!((weights.iter().sum::<f64>() - 2.0).abs() < 1e-12);
/// ```
pub fn gauss_rule(n: usize) -> (&'static [f64], &'static [f64]) {
    let (points, weights) = &GAUSS_RULES[n.clamp(1, MAX_GAUSS_POINTS)];
    (points, weights)
}

/// Number of Gauss-Legendre points needed to exactly integrate a 1D polynomial of degree `degree`
pub fn points_for_degree(degree: usize) -> usize {
    (degree / 2 + 1).clamp(1, MAX_GAUSS_POINTS)
}

/// Get a set of n Gauss-Legendre-Quadrature Integration points and weights
///
/// ```
/// use hp_fem_2d::integration::glq::*;
///
/// // generate 10 GLQ points and weights over the range `(-1, 1)`
/// let (points, weights) = gauss_quadrature_points(10);
/// assert_eq!(points.len(), 10);
/// assert_eq!(weights.len(), 10);
/// assert!(points.iter().sum::<f64>().abs() < 1e-12);
/// ```
// https://en.wikipedia.org/wiki/Gaussian_quadrature#Gauss%E2%80%93Legendre_quadrature
// https://www.mathworks.com/matlabcentral/mlc-downloads/downloads/submissions/23972/versions/22/previews/chebfun/examples/quad/html/GaussQuad.html
pub fn gauss_quadrature_points(n: usize) -> (Vec<f64>, Vec<f64>) {
    assert!(n > 0, "Cannot generate a Gauss-Legendre rule with zero points!");

    let betas: Vec<f64> = (1..n)
        .map(|i| 0.5 / (1.0 - (2.0 * i as f64).powi(-2)).sqrt())
        .collect();

    let polymat: DMatrix<f64> = DMatrix::from_fn(n, n, |r, c| {
        if r == c + 1 {
            betas[r - 1]
        } else if c == r + 1 {
            betas[c - 1]
        } else {
            0.0
        }
    });

    let eigen_decomp = SymmetricEigen::new(polymat);

    let mut xw: Vec<(f64, f64)> = eigen_decomp
        .eigenvalues
        .iter()
        .cloned()
        .zip(
            eigen_decomp
                .eigenvectors
                .row(0)
                .iter()
                .map(|weight| (*weight).powi(2) * 2.0),
        )
        .collect();

    xw.sort_by(|a, b| a.0.total_cmp(&b.0));

    xw.drain(0..).unzip()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_rules_match_closed_forms() {
        let (points, weights) = gauss_quadrature_points(2);
        let x = 1.0 / 3.0_f64.sqrt();
        assert!((points[0] + x).abs() < 1e-12 && (points[1] - x).abs() < 1e-12);
        assert!(weights.iter().all(|w| (w - 1.0).abs() < 1e-12));

        let (points, weights) = gauss_quadrature_points(3);
        let x = (3.0_f64 / 5.0).sqrt();
        assert!((points[0] + x).abs() < 1e-12 && points[1].abs() < 1e-12 && (points[2] - x).abs() < 1e-12);
        assert!((weights[0] - 5.0 / 9.0).abs() < 1e-12);
        assert!((weights[1] - 8.0 / 9.0).abs() < 1e-12);
    }

    #[test]
    fn points_are_symmetric() {
        let (points, weights) = gauss_quadrature_points(20);
        for i in 0..10 {
            assert!((points[i] + points[19 - i]).abs() < 1e-12);
            assert!((weights[i] - weights[19 - i]).abs() < 1e-12);
        }
        assert!(points.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn cached_rules_integrate_exactly() {
        for degree in 0..40 {
            let (points, weights) = gauss_rule(points_for_degree(degree));
            let integral: f64 = points
                .iter()
                .zip(weights.iter())
                .map(|(x, w)| x.powi(degree as i32) * w)
                .sum();
            let expected = if degree % 2 == 0 {
                2.0 / (degree as f64 + 1.0)
            } else {
                0.0
            };
            assert!(
                (integral - expected).abs() < 1e-12,
                "x^{} integrated to {} (expected {})",
                degree,
                integral,
                expected
            );
        }
    }

    #[test]
    fn rule_size_is_clamped() {
        assert_eq!(gauss_rule(0).0.len(), 1);
        assert_eq!(gauss_rule(1000).0.len(), MAX_GAUSS_POINTS);
    }
}
