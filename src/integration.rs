/// Gauss-Legendre points and weights
pub mod glq;

use crate::domain::mesh::{h_refinement::HRef, region::Region, Shape};
use glq::{gauss_rule, points_for_degree};

/// A 2D quadrature rule over a reference domain (the square `[-1, 1]^2` or the triangle `(-1, -1), (1, -1), (-1, 1)`)
#[derive(Debug, Clone)]
pub struct QuadRule {
    pub points: Vec<[f64; 2]>,
    pub weights: Vec<f64>,
}

impl QuadRule {
    /// Tensor product Gauss-Legendre rule with `n` points per direction
    ///
    /// Triangular rules are produced by collapsing the square onto the triangle (Duffy transformation)
    pub fn gauss(shape: Shape, n: usize) -> Self {
        let (pts, wts) = gauss_rule(n);
        let mut points = Vec::with_capacity(pts.len().pow(2));
        let mut weights = Vec::with_capacity(pts.len().pow(2));

        for (a, wa) in pts.iter().zip(wts.iter()) {
            for (b, wb) in pts.iter().zip(wts.iter()) {
                match shape {
                    Shape::Quad => {
                        points.push([*a, *b]);
                        weights.push(wa * wb);
                    }
                    Shape::Tri => {
                        points.push([(1.0 + a) * (1.0 - b) / 2.0 - 1.0, *b]);
                        weights.push(wa * wb * (1.0 - b) / 2.0);
                    }
                }
            }
        }

        Self { points, weights }
    }

    /// A rule which exactly integrates polynomials of degree `degree` (in each variable) over a reference domain
    pub fn for_degree(shape: Shape, degree: usize) -> Self {
        match shape {
            Shape::Quad => Self::gauss(shape, points_for_degree(degree)),
            // the collapsed map adds one degree in the second variable
            Shape::Tri => Self::gauss(shape, points_for_degree(degree + 1)),
        }
    }

    /// A rule composed of [QuadRule::for_degree] rules over the four isotropic sub-cells of a reference domain
    ///
    /// Functions which are polynomial on each sub-cell (such as reference solutions) are integrated exactly.
    pub fn composite(shape: Shape, degree: usize) -> Self {
        let sub_rule = Self::for_degree(shape, degree);
        let mut points = Vec::with_capacity(sub_rule.len() * 4);
        let mut weights = Vec::with_capacity(sub_rule.len() * 4);

        for sub_cell in Region::reference(shape).split(HRef::Iso) {
            let mapped = sub_rule.mapped(&sub_cell);
            points.extend(mapped.points);
            weights.extend(mapped.weights);
        }

        Self { points, weights }
    }

    /// Map the rule onto a Region (expressed in this rule's reference coordinates)
    pub fn mapped(&self, region: &Region) -> Self {
        let scale = region.jacobian().det().abs();
        Self {
            points: self.points.iter().map(|p| region.to_parent(*p)).collect(),
            weights: self.weights.iter().map(|w| w * scale).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Integrate a function over the rule's domain
    pub fn integrate<F>(&self, integrand: F) -> f64
    where
        F: Fn([f64; 2]) -> f64,
    {
        self.points
            .iter()
            .zip(self.weights.iter())
            .map(|(p, w)| integrand(*p) * w)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ∫∫_T x^i y^j over the reference triangle, computed with the substitution s = x + 1, t = y + 1
    fn tri_monomial(i: i32, j: i32) -> f64 {
        let rule = QuadRule::gauss(Shape::Tri, 20);
        rule.integrate(|[x, y]| x.powi(i) * y.powi(j))
    }

    #[test]
    fn quad_rules_are_exact() {
        let rule = QuadRule::for_degree(Shape::Quad, 6);
        let integral = rule.integrate(|[x, y]| x.powi(6) * y.powi(4) + x * y.powi(5));
        assert!((integral - (2.0 / 7.0) * (2.0 / 5.0)).abs() < 1e-13);
        assert!((rule.weights.iter().sum::<f64>() - 4.0).abs() < 1e-13);
    }

    #[test]
    fn tri_rules_are_exact() {
        let rule = QuadRule::for_degree(Shape::Tri, 5);
        assert!((rule.weights.iter().sum::<f64>() - 2.0).abs() < 1e-13);

        // ∫∫ x dx dy = -2/3 (centroid at (-1/3, -1/3))
        assert!((rule.integrate(|[x, _]| x) + 2.0 / 3.0).abs() < 1e-13);

        for (i, j) in [(2, 3), (5, 0), (1, 4), (0, 5)] {
            assert!((rule.integrate(|[x, y]| x.powi(i) * y.powi(j)) - tri_monomial(i, j)).abs() < 1e-12);
        }

        assert!(rule.points.iter().all(|[x, y]| *x >= -1.0 && *y >= -1.0 && x + y <= 0.0));
    }

    #[test]
    fn composite_rules_integrate_piecewise_functions() {
        for shape in [Shape::Quad, Shape::Tri] {
            let rule = QuadRule::composite(shape, 4);
            assert_eq!(rule.len(), 4 * QuadRule::for_degree(shape, 4).len());

            // |x| is a polynomial on each sub-cell of the square (but not of the triangle)
            if shape == Shape::Quad {
                assert!((rule.integrate(|[x, _]| x.abs()) - 2.0).abs() < 1e-13);
            }
            assert!((rule.weights.iter().sum::<f64>() - Region::reference(shape).area()).abs() < 1e-13);
        }
    }

    #[test]
    fn mapped_rules() {
        let sub = Region::Rect {
            u: [0.0, 1.0],
            v: [-1.0, 0.0],
        };
        let rule = QuadRule::for_degree(Shape::Quad, 3).mapped(&sub);
        assert!((rule.integrate(|[x, y]| x * y) + 0.25).abs() < 1e-14);
    }
}
