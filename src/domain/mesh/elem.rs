use super::{
    element::{Element, Shape},
    geometry::{Point, M2D},
    h_refinement::HRef,
    region::Region,
};
use json::{array, object, JsonValue};
use smallvec::SmallVec;
use std::sync::Arc;

/// Pairs of local Node indices describing the sides of a quadrilateral Elem (S, N, W, E)
pub const QUAD_SIDES: [[usize; 2]; 4] = [[0, 1], [2, 3], [0, 2], [1, 3]];
/// Pairs of local Node indices describing the sides of a triangular Elem
pub const TRI_SIDES: [[usize; 2]; 3] = [[0, 1], [1, 2], [2, 0]];

/// `Elem`s are the basic unit of the refinement forest of a `Mesh`
///
/// `Elem`s are responsible for keeping track of:
/// * Connections to their `Node`s and `Edge`s
/// * Connections to their parent `Elem` and to their sons (if h-refined)
/// * The [Region] they cover within the reference domain of their base [`Element`]
///
/// Polynomial orders are not stored here; they belong to the [Space](crate::domain::space::Space)s defined over the Mesh.
///
/// ## Layout
/// The indices of `Node`s and `Edge`s from the perspective of a quadrilateral `Elem`:
///
/// ```text
///               N
///         2 --------- 3
///         |     1     |
///         |           |
///      W  |2         3|  E
///         |           |
///         |     0     |
///         0 --------- 1
///               S
/// ```
///
/// and of a triangular `Elem`:
///
/// ```text
///         2
///         | \
///         |   \
///       2 |     \ 1
///         |       \
///         |         \
///         0 --------- 1
///               0
/// ```
#[derive(Debug, Clone)]
pub struct Elem {
    pub id: usize,
    pub shape: Shape,
    pub nodes: SmallVec<[usize; 4]>,
    pub edges: SmallVec<[usize; 4]>,
    pub element: Arc<Element>,
    pub region: Region,
    /// Number of h-refinements separating this Elem from its base Elem
    pub level: u8,
    parent: Option<usize>,
    sons: Option<(HRef, SmallVec<[usize; 4]>)>,
    active: bool,
}

impl Elem {
    /// Construct a level-0 Elem covering the entire reference domain of its `Element`
    pub fn new(
        id: usize,
        nodes: SmallVec<[usize; 4]>,
        edges: SmallVec<[usize; 4]>,
        element: Arc<Element>,
    ) -> Self {
        let shape = element.shape;
        assert_eq!(nodes.len(), shape.num_vertices());
        assert_eq!(edges.len(), shape.num_vertices());

        Self {
            id,
            shape,
            nodes,
            edges,
            region: Region::reference(shape),
            element,
            level: 0,
            parent: None,
            sons: None,
            active: true,
        }
    }

    /// Construct a son of this Elem
    pub(crate) fn son(
        &self,
        id: usize,
        nodes: SmallVec<[usize; 4]>,
        edges: SmallVec<[usize; 4]>,
        region: Region,
    ) -> Self {
        Self {
            id,
            shape: self.shape,
            nodes,
            edges,
            element: self.element.clone(),
            region,
            level: self.level + 1,
            parent: Some(self.id),
            sons: None,
            active: true,
        }
    }

    /// Local Node index pairs describing each side
    pub fn side_defs(&self) -> &'static [[usize; 2]] {
        match self.shape {
            Shape::Tri => &TRI_SIDES,
            Shape::Quad => &QUAD_SIDES,
        }
    }

    /// Global Node ids at either end of a side
    pub fn side_nodes(&self, side: usize) -> [usize; 2] {
        let [a, b] = self.side_defs()[side];
        [self.nodes[a], self.nodes[b]]
    }

    pub fn parent_id(&self) -> Option<usize> {
        self.parent
    }

    /// The ids of this Elem's sons (if it has been h-refined)
    pub fn son_ids(&self) -> Option<&[usize]> {
        self.sons.as_ref().map(|(_, ids)| ids.as_slice())
    }

    /// The h-refinement that produced this Elem's sons
    pub fn refinement(&self) -> Option<HRef> {
        self.sons.as_ref().map(|(href, _)| *href)
    }

    pub fn has_sons(&self) -> bool {
        self.sons.is_some()
    }

    /// Is this Elem a leaf of the refinement forest
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Was this Elem removed from the Mesh by an unrefinement
    pub fn is_retired(&self) -> bool {
        !self.active && self.sons.is_none()
    }

    pub(crate) fn set_sons(&mut self, refinement: HRef, son_ids: SmallVec<[usize; 4]>) {
        assert!(self.active, "Elem {} is not active; cannot set sons!", self.id);
        self.sons = Some((refinement, son_ids));
        self.active = false;
    }

    pub(crate) fn take_sons(&mut self) -> Option<SmallVec<[usize; 4]>> {
        let sons = self.sons.take().map(|(_, ids)| ids);
        if sons.is_some() {
            self.active = true;
        }
        sons
    }

    pub(crate) fn retire(&mut self) {
        assert!(
            self.active && self.sons.is_none(),
            "Only active Elems can be retired (Elem {})!",
            self.id
        );
        self.active = false;
    }

    /// Map a point from this Elem's reference domain into the reference domain of its base Element
    pub fn to_base(&self, xi: [f64; 2]) -> [f64; 2] {
        self.region.to_parent(xi)
    }

    /// Map a point from the reference domain of the base Element into this Elem's reference domain
    pub fn from_base(&self, base_xi: [f64; 2]) -> [f64; 2] {
        self.region.from_parent(base_xi)
    }

    /// Map a point from this Elem's reference domain into Real Space
    pub fn map_to_real(&self, xi: [f64; 2]) -> Point {
        self.element.map(self.to_base(xi))
    }

    /// Jacobian of the map from this Elem's reference domain into Real Space
    pub fn jacobian(&self, xi: [f64; 2]) -> M2D {
        self.element.jacobian(self.to_base(xi)) * self.region.jacobian()
    }

    /// Produce a Json Object that describes this Elem
    #[cfg(feature = "json_export")]
    pub fn to_json(&self) -> JsonValue {
        object! {
            "id": self.id,
            "element": self.element.id,
            "level": self.level,
            "active": self.active,
            "nodes": JsonValue::from(self.nodes.to_vec()),
            "edges": JsonValue::from(self.edges.to_vec()),
            "parent": self.parent,
            "refinement": self.refinement().map(|r| r.as_str()),
            "sons": match self.son_ids() {
                Some(ids) => JsonValue::from(ids.to_vec()),
                None => array![],
            },
        }
    }
}
