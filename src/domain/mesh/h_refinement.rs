use super::Shape;
use thiserror::Error;

/// Description of an h-Refinement
///
/// Quadrilateral Elems support all three variants; triangular Elems can only be refined isotropically
///
/// Son ordering for quadrilaterals:
/// ```text
///         Iso                 AnisoH              AnisoV
///    *-----*-----*       *-----------*       *-----*-----*
///    |  2  |  3  |       |     1     |       |     |     |
///    *-----*-----*       *-----------*       |  0  |  1  |
///    |  0  |  1  |       |     0     |       |     |     |
///    *-----*-----*       *-----------*       *-----*-----*
/// ```
///
/// Son ordering for triangles (son 3 is the inverted center triangle):
/// ```text
///    *
///    | \
///    | 2 \
///    *-----*
///    | \ 3 | \
///    | 0 \ | 1 \
///    *-----*-----*
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HRef {
    /// isotropic (4 sons)
    Iso,
    /// anisotropic; horizontal cut producing a bottom and a top son
    AnisoH,
    /// anisotropic; vertical cut producing a left and a right son
    AnisoV,
}

impl HRef {
    /// Number of son Elems produced by this refinement
    pub fn num_sons(&self) -> usize {
        match self {
            Self::Iso => 4,
            Self::AnisoH | Self::AnisoV => 2,
        }
    }

    /// Is this refinement supported on an Elem of the given shape
    pub fn valid_for(&self, shape: Shape) -> bool {
        matches!((self, shape), (Self::Iso, _) | (_, Shape::Quad))
    }

    /// Combine two refinement requests on the same Elem into one that satisfies both
    ///
    /// Opposing anisotropic refinements produce an isotropic refinement
    pub fn merged_with(self, other: Self) -> Self {
        if self == other {
            self
        } else {
            Self::Iso
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Iso => "Iso",
            Self::AnisoH => "AnisoH",
            Self::AnisoV => "AnisoV",
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HRefError {
    #[error("Elem {0} does not exist; cannot apply h-refinement!")]
    ElemDoesntExist(usize),
    #[error("Elem {0} is not active; cannot apply h-refinement!")]
    ElemNotActive(usize),
    #[error("Elem {0} was refined more than once in the same batch!")]
    DoubleRefinement(usize),
    #[error("Elem {0} is a triangle; anisotropic h-refinements are only supported on quadrilaterals!")]
    AnisoOnTriangle(usize),
    #[error("Elem {0} has reached the minimum region size; cannot apply h-refinement!")]
    MinimumSizeExceeded(usize),
    #[error("Elem {0} has no sons; cannot be unrefined!")]
    NoSons(usize),
    #[error("Elem {0} has sons which are not active; cannot be unrefined!")]
    SonsNotActive(usize),
}
