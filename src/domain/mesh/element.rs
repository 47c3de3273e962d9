use super::geometry::{Point, M2D};
use json::{object, JsonValue};
use smallvec::SmallVec;

/// The shape of a reference domain
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Shape {
    Tri,
    Quad,
}

impl Shape {
    pub fn num_vertices(&self) -> usize {
        match self {
            Self::Tri => 3,
            Self::Quad => 4,
        }
    }

    /// Index used for per-shape lookup tables
    pub fn index(&self) -> usize {
        match self {
            Self::Tri => 0,
            Self::Quad => 1,
        }
    }

    /// Number of polynomials of order `p` on this shape (the full local space, vertex + edge + bubble functions)
    pub fn num_poly(&self, p: u8) -> usize {
        let p = p as usize;
        match self {
            Self::Tri => (p + 1) * (p + 2) / 2,
            Self::Quad => (p + 1) * (p + 1),
        }
    }
}

/// The `Element`s are the basic geometric unit of the Mesh in Real Space.
///
/// Each level-0 Elem has one associated `Element` which defines the map between its reference domain and Real Space.
/// All of the Elem's descendants share the same `Element`; they only cover a sub-[Region](super::region::Region) of its reference domain.
///
/// Quadrilateral Elements are bilinear with their vertices ordered as follows:
/// ```text
///     2 *---------* 3
///       |         |
///       |         |
///     0 *---------* 1
/// ```
/// Triangular Elements are affine with counter-clockwise vertices.
#[derive(Debug)]
pub struct Element {
    pub id: usize,
    pub shape: Shape,
    pub points: SmallVec<[Point; 4]>,
}

impl Element {
    pub fn new(id: usize, points: SmallVec<[Point; 4]>) -> Self {
        let shape = match points.len() {
            3 => Shape::Tri,
            4 => Shape::Quad,
            n => panic!("Elements must have 3 or 4 points; got {}!", n),
        };

        Self { id, shape, points }
    }

    /// Map a point from the reference domain into Real Space
    pub fn map(&self, [xi, eta]: [f64; 2]) -> Point {
        let p = &self.points;
        match self.shape {
            Shape::Tri => {
                let (a, b) = ((xi + 1.0) / 2.0, (eta + 1.0) / 2.0);
                Point::new(
                    p[0].x + a * (p[1].x - p[0].x) + b * (p[2].x - p[0].x),
                    p[0].y + a * (p[1].y - p[0].y) + b * (p[2].y - p[0].y),
                )
            }
            Shape::Quad => {
                let n = bilinear_weights(xi, eta);
                Point::new(
                    n.iter().zip(p.iter()).map(|(n, p)| n * p.x).sum(),
                    n.iter().zip(p.iter()).map(|(n, p)| n * p.y).sum(),
                )
            }
        }
    }

    /// Jacobian of the map from the reference domain into Real Space: `[[dx/dξ, dx/dη], [dy/dξ, dy/dη]]`
    pub fn jacobian(&self, [xi, eta]: [f64; 2]) -> M2D {
        let p = &self.points;
        match self.shape {
            Shape::Tri => M2D::from(
                [(p[1].x - p[0].x) / 2.0, (p[2].x - p[0].x) / 2.0],
                [(p[1].y - p[0].y) / 2.0, (p[2].y - p[0].y) / 2.0],
            ),
            Shape::Quad => {
                let d_xi = [-(1.0 - eta), 1.0 - eta, -(1.0 + eta), 1.0 + eta].map(|d| d / 4.0);
                let d_eta = [-(1.0 - xi), -(1.0 + xi), 1.0 - xi, 1.0 + xi].map(|d| d / 4.0);

                let dot = |w: &[f64; 4], f: fn(&Point) -> f64| -> f64 {
                    w.iter().zip(p.iter()).map(|(w, p)| w * f(p)).sum()
                };

                M2D::from(
                    [dot(&d_xi, |p| p.x), dot(&d_eta, |p| p.x)],
                    [dot(&d_xi, |p| p.y), dot(&d_eta, |p| p.y)],
                )
            }
        }
    }

    /// Does this Element have a constant Jacobian (triangles and parallelograms)
    pub fn is_affine(&self) -> bool {
        match self.shape {
            Shape::Tri => true,
            Shape::Quad => {
                let p = &self.points;
                ((p[0].x + p[3].x) - (p[1].x + p[2].x)).abs() < 1e-12
                    && ((p[0].y + p[3].y) - (p[1].y + p[2].y)).abs() < 1e-12
            }
        }
    }

    /// Extra polynomial degree needed to integrate over this Element's geometry
    pub fn order_increase(&self) -> usize {
        if self.is_affine() {
            0
        } else {
            2
        }
    }

    /// Produce a Json Object that describes this Element
    #[cfg(feature = "json_export")]
    pub fn to_json(&self) -> JsonValue {
        object! {
            "id": self.id,
            "shape": match self.shape {
                Shape::Tri => "triangle",
                Shape::Quad => "quadrilateral",
            },
            "points": JsonValue::from(self.points.iter().map(|p| JsonValue::from(*p)).collect::<Vec<_>>()),
        }
    }
}

fn bilinear_weights(xi: f64, eta: f64) -> [f64; 4] {
    [
        (1.0 - xi) * (1.0 - eta) / 4.0,
        (1.0 + xi) * (1.0 - eta) / 4.0,
        (1.0 - xi) * (1.0 + eta) / 4.0,
        (1.0 + xi) * (1.0 + eta) / 4.0,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    #[test]
    fn bilinear_map() {
        let element = Element::new(
            0,
            smallvec![
                Point::new(0.0, 0.0),
                Point::new(2.0, 0.0),
                Point::new(0.0, 1.0),
                Point::new(2.0, 1.0),
            ],
        );

        let center = element.map([0.0, 0.0]);
        assert!((center.x - 1.0).abs() < 1e-14 && (center.y - 0.5).abs() < 1e-14);

        let jac = element.jacobian([0.3, -0.2]);
        assert!((jac.det() - 0.25).abs() < 1e-14);
        assert!(element.is_affine());
        assert_eq!(element.order_increase(), 0);
    }

    #[test]
    fn distorted_quad_is_not_affine() {
        let element = Element::new(
            0,
            smallvec![
                Point::new(0.0, 0.0),
                Point::new(1.0, 0.0),
                Point::new(0.0, 1.0),
                Point::new(2.0, 2.0),
            ],
        );
        assert!(!element.is_affine());
        assert!(element.jacobian([-1.0, -1.0]).det() > 0.0);
    }

    #[test]
    fn affine_triangle() {
        let element = Element::new(
            0,
            smallvec![
                Point::new(0.0, 0.0),
                Point::new(1.0, 0.0),
                Point::new(0.0, 1.0),
            ],
        );
        let corner = element.map([1.0, -1.0]);
        assert!((corner.x - 1.0).abs() < 1e-14 && corner.y.abs() < 1e-14);
        assert!((element.jacobian([0.0, 0.0]).det() - 0.25).abs() < 1e-14);
    }

    #[test]
    fn polynomial_space_sizes() {
        assert_eq!(Shape::Quad.num_poly(1), 4);
        assert_eq!(Shape::Quad.num_poly(3), 16);
        assert_eq!(Shape::Tri.num_poly(1), 3);
        assert_eq!(Shape::Tri.num_poly(3), 10);
    }
}
