use super::{geometry::M2D, h_refinement::HRef, Shape};
use smallvec::{smallvec, SmallVec};

const REGION_TOLERANCE: f64 = 1e-12;

/// The portion of a coordinate system covered by an Elem
///
/// Each Elem stores the Region it covers within the reference domain of its level-0 ancestor (its base [Element](super::Element)).
/// Regions are also used to describe sons relative to the reference domain of their parent (see [Region::reference] and [Region::split]).
///
/// Every Region has its own reference coordinate system:
/// * `Rect`: the square `[-1, 1] x [-1, 1]`
/// * `Tri`: the triangle with vertices `(-1, -1)`, `(1, -1)`, and `(-1, 1)`
///
/// The map from a Region's reference coordinates to its parent coordinate system is affine.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Region {
    Rect { u: [f64; 2], v: [f64; 2] },
    Tri([[f64; 2]; 3]),
}

impl Region {
    /// The Region covering an entire reference domain
    pub const fn reference(shape: Shape) -> Self {
        match shape {
            Shape::Quad => Self::Rect {
                u: [-1.0, 1.0],
                v: [-1.0, 1.0],
            },
            Shape::Tri => Self::Tri([[-1.0, -1.0], [1.0, -1.0], [-1.0, 1.0]]),
        }
    }

    pub fn shape(&self) -> Shape {
        match self {
            Self::Rect { .. } => Shape::Quad,
            Self::Tri(_) => Shape::Tri,
        }
    }

    /// Map a point from this Region's reference coordinates into its parent coordinate system
    pub fn to_parent(&self, [xi, eta]: [f64; 2]) -> [f64; 2] {
        match self {
            Self::Rect { u, v } => [
                u[0] + (xi + 1.0) * (u[1] - u[0]) / 2.0,
                v[0] + (eta + 1.0) * (v[1] - v[0]) / 2.0,
            ],
            Self::Tri([p0, p1, p2]) => {
                let (a, b) = ((xi + 1.0) / 2.0, (eta + 1.0) / 2.0);
                [
                    p0[0] + a * (p1[0] - p0[0]) + b * (p2[0] - p0[0]),
                    p0[1] + a * (p1[1] - p0[1]) + b * (p2[1] - p0[1]),
                ]
            }
        }
    }

    /// Map a point from the parent coordinate system into this Region's reference coordinates
    pub fn from_parent(&self, [x, y]: [f64; 2]) -> [f64; 2] {
        match self {
            Self::Rect { u, v } => [
                2.0 * (x - u[0]) / (u[1] - u[0]) - 1.0,
                2.0 * (y - v[0]) / (v[1] - v[0]) - 1.0,
            ],
            Self::Tri([p0, ..]) => {
                let inv = self.jacobian().inverse();
                let local = inv * super::geometry::V2D::from([x - p0[0], y - p0[1]]);
                [local[0] - 1.0, local[1] - 1.0]
            }
        }
    }

    /// Jacobian of [Region::to_parent] (constant over the Region)
    pub fn jacobian(&self) -> M2D {
        match self {
            Self::Rect { u, v } => M2D::from([(u[1] - u[0]) / 2.0, 0.0], [0.0, (v[1] - v[0]) / 2.0]),
            Self::Tri([p0, p1, p2]) => M2D::from(
                [(p1[0] - p0[0]) / 2.0, (p2[0] - p0[0]) / 2.0],
                [(p1[1] - p0[1]) / 2.0, (p2[1] - p0[1]) / 2.0],
            ),
        }
    }

    /// Area of the Region in its parent coordinate system
    pub fn area(&self) -> f64 {
        match self {
            Self::Rect { u, v } => (u[1] - u[0]) * (v[1] - v[0]),
            Self::Tri(_) => self.jacobian().det().abs() * 2.0,
        }
    }

    /// Length of the Region's shortest side
    pub fn min_side_length(&self) -> f64 {
        match self {
            Self::Rect { u, v } => (u[1] - u[0]).min(v[1] - v[0]),
            Self::Tri(pts) => (0..3)
                .map(|i| {
                    let (a, b) = (pts[i], pts[(i + 1) % 3]);
                    ((b[0] - a[0]).powi(2) + (b[1] - a[1]).powi(2)).sqrt()
                })
                .fold(f64::INFINITY, f64::min),
        }
    }

    /// Center of mass of the Region in its parent coordinate system
    pub fn centroid(&self) -> [f64; 2] {
        match self {
            Self::Rect { u, v } => [(u[0] + u[1]) / 2.0, (v[0] + v[1]) / 2.0],
            Self::Tri([p0, p1, p2]) => [
                (p0[0] + p1[0] + p2[0]) / 3.0,
                (p0[1] + p1[1] + p2[1]) / 3.0,
            ],
        }
    }

    /// Does this Region contain a point (expressed in the parent coordinate system)
    pub fn contains_point(&self, point: [f64; 2]) -> bool {
        match self {
            Self::Rect { u, v } => {
                point[0] >= u[0] - REGION_TOLERANCE
                    && point[0] <= u[1] + REGION_TOLERANCE
                    && point[1] >= v[0] - REGION_TOLERANCE
                    && point[1] <= v[1] + REGION_TOLERANCE
            }
            Self::Tri(_) => {
                let [xi, eta] = self.from_parent(point);
                xi >= -1.0 - REGION_TOLERANCE
                    && eta >= -1.0 - REGION_TOLERANCE
                    && xi + eta <= REGION_TOLERANCE
            }
        }
    }

    /// Does this Region fully contain another Region (both expressed in the same parent coordinate system)
    pub fn contains(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Rect { u, v }, Self::Rect { u: ou, v: ov }) => {
                ou[0] >= u[0] - REGION_TOLERANCE
                    && ou[1] <= u[1] + REGION_TOLERANCE
                    && ov[0] >= v[0] - REGION_TOLERANCE
                    && ov[1] <= v[1] + REGION_TOLERANCE
            }
            (Self::Tri(_), Self::Tri(pts)) => pts.iter().all(|p| self.contains_point(*p)),
            _ => false,
        }
    }

    /// The overlap of two Regions (expressed in the same parent coordinate system)
    ///
    /// Triangular Regions produced by repeated [Region::split]s are either nested or disjoint.
    /// Rectangular Regions can also overlap partially, in which case the overlapping rectangle is returned.
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        match (self, other) {
            (Self::Rect { u, v }, Self::Rect { u: ou, v: ov }) => {
                let iu = [u[0].max(ou[0]), u[1].min(ou[1])];
                let iv = [v[0].max(ov[0]), v[1].min(ov[1])];
                if iu[1] - iu[0] > REGION_TOLERANCE && iv[1] - iv[0] > REGION_TOLERANCE {
                    Some(Self::Rect { u: iu, v: iv })
                } else {
                    None
                }
            }
            (Self::Tri(_), Self::Tri(_)) => {
                if self.contains(other) {
                    Some(*other)
                } else if other.contains(self) {
                    Some(*self)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// Express a Region (given in this Region's parent coordinate system) in this Region's reference coordinates
    pub fn relative(&self, other: &Self) -> Self {
        match other {
            Self::Rect { u, v } => {
                let lo = self.from_parent([u[0], v[0]]);
                let hi = self.from_parent([u[1], v[1]]);
                Self::Rect {
                    u: [lo[0], hi[0]],
                    v: [lo[1], hi[1]],
                }
            }
            Self::Tri(pts) => Self::Tri(pts.map(|p| self.from_parent(p))),
        }
    }

    /// Produce the son Regions resulting from an h-refinement (see [HRef] for son ordering)
    ///
    /// Panics if the refinement is anisotropic and the Region is triangular
    pub fn split(&self, refinement: HRef) -> SmallVec<[Self; 4]> {
        match (self, refinement) {
            (Self::Rect { u, v }, _) => {
                let um = (u[0] + u[1]) / 2.0;
                let vm = (v[0] + v[1]) / 2.0;
                match refinement {
                    HRef::Iso => smallvec![
                        Self::Rect { u: [u[0], um], v: [v[0], vm] },
                        Self::Rect { u: [um, u[1]], v: [v[0], vm] },
                        Self::Rect { u: [u[0], um], v: [vm, v[1]] },
                        Self::Rect { u: [um, u[1]], v: [vm, v[1]] },
                    ],
                    HRef::AnisoH => smallvec![
                        Self::Rect { u: *u, v: [v[0], vm] },
                        Self::Rect { u: *u, v: [vm, v[1]] },
                    ],
                    HRef::AnisoV => smallvec![
                        Self::Rect { u: [u[0], um], v: *v },
                        Self::Rect { u: [um, u[1]], v: *v },
                    ],
                }
            }
            (Self::Tri([p0, p1, p2]), HRef::Iso) => {
                let mid = |a: &[f64; 2], b: &[f64; 2]| [(a[0] + b[0]) / 2.0, (a[1] + b[1]) / 2.0];
                let (m0, m1, m2) = (mid(p0, p1), mid(p1, p2), mid(p2, p0));
                smallvec![
                    Self::Tri([*p0, m0, m2]),
                    Self::Tri([m0, *p1, m1]),
                    Self::Tri([m2, m1, *p2]),
                    Self::Tri([m1, m2, m0]),
                ]
            }
            (Self::Tri(_), _) => panic!(
                "Triangular Regions cannot be split anisotropically ({:?})!",
                refinement
            ),
        }
    }
}
