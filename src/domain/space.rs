use super::mesh::{Mesh, Shape};
use json::{object, JsonValue};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Maximum Polynomial order. p-Refinements will fail when an Elem's order would exceed this value.
pub const MAX_POLYNOMIAL_ORDER: u8 = 10;

/// Classification of a boundary marker
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BcType {
    /// Dirichlet; Edges with this marker carry no unknowns
    Essential,
    /// Neumann or Newton
    Natural,
}

/// Callback used to classify boundary markers
pub type BcClassifier = Arc<dyn Fn(u32) -> BcType + Send + Sync>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PRefError {
    #[error("Elem {0} does not exist in the Space; cannot set its order!")]
    ElemDoesntExist(usize),
    #[error("Polynomial orders must be at least 1 (got {1} for Elem {0})!")]
    OrderTooLow(usize, u8),
    #[error("Polynomial order {1} for Elem {0} exceeds the maximum ({max})!", max = MAX_POLYNOMIAL_ORDER)]
    ExceededMaxExpansion(usize, u8),
}

/// An H1 finite element space over one Mesh
///
/// Every active Elem of the Mesh carries an isotropic polynomial order. Orders of inactive Elems are kept so that sons
/// (and unrefined parents) can inherit them. Degrees of freedom are counted with [Space::assign_dofs].
#[derive(Clone)]
pub struct Space {
    mesh_idx: usize,
    orders: Vec<u8>,
    bc: BcClassifier,
    first_dof: usize,
    num_dofs: usize,
}

impl Space {
    /// Create a Space with a uniform order over the active Elems of a Mesh (all boundaries are natural)
    pub fn new(mesh_idx: usize, mesh: &Mesh, order: u8) -> Result<Self, PRefError> {
        let mut space = Self {
            mesh_idx,
            orders: vec![0; mesh.elems.len()],
            bc: Arc::new(|_| BcType::Natural),
            first_dof: 0,
            num_dofs: 0,
        };
        space.set_uniform_order(mesh, order)?;
        Ok(space)
    }

    /// Set the boundary condition classification callback
    pub fn with_bc<F>(mut self, classifier: F) -> Self
    where
        F: Fn(u32) -> BcType + Send + Sync + 'static,
    {
        self.bc = Arc::new(classifier);
        self
    }

    /// Index of the Mesh (within its [Domain](super::Domain)) this Space is defined over
    pub fn mesh_index(&self) -> usize {
        self.mesh_idx
    }

    pub fn bc_type(&self, marker: u32) -> BcType {
        (self.bc)(marker)
    }

    /// Polynomial order of an Elem (`0` if none was ever assigned)
    pub fn order(&self, elem_id: usize) -> u8 {
        self.orders.get(elem_id).copied().unwrap_or(0)
    }

    pub fn set_order(&mut self, elem_id: usize, order: u8) -> Result<(), PRefError> {
        check_order(elem_id, order)?;
        match self.orders.get_mut(elem_id) {
            Some(o) => {
                *o = order;
                Ok(())
            }
            None => Err(PRefError::ElemDoesntExist(elem_id)),
        }
    }

    /// Set the order of every active Elem
    pub fn set_uniform_order(&mut self, mesh: &Mesh, order: u8) -> Result<(), PRefError> {
        self.sync_with(mesh);
        for elem in mesh.active_elems() {
            self.set_order(elem.id, order)?;
        }
        Ok(())
    }

    /// Make sure every active Elem of the Mesh has an order; new Elems inherit the order of their nearest ancestor
    pub fn sync_with(&mut self, mesh: &Mesh) {
        self.orders.resize(mesh.elems.len(), 0);
        for elem in mesh.active_elems() {
            if self.orders[elem.id] == 0 {
                self.orders[elem.id] = mesh
                    .ancestor_elems(elem.id, false)
                    .iter()
                    .map(|anc| self.orders[*anc])
                    .find(|o| *o > 0)
                    .unwrap_or(1);
            }
        }
    }

    /// The largest order among the active Elems of the Mesh
    pub fn max_order(&self, mesh: &Mesh) -> u8 {
        mesh.active_elems()
            .map(|elem| self.order(elem.id))
            .max()
            .unwrap_or(0)
    }

    /// Count the unknowns of this Space, numbering them from `first`
    ///
    /// * one per vertex which is neither hanging nor on an essential boundary
    /// * `p - 1` per unconstrained, non-essential Edge (`p` is the minimum order of the active Elems on either side)
    /// * `(p - 1)^2` (quadrilaterals) or `(p - 1)(p - 2) / 2` (triangles) bubble functions per active Elem
    pub fn assign_dofs(&mut self, mesh: &Mesh, first: usize) -> usize {
        self.sync_with(mesh);

        let hanging = mesh.hanging_nodes();
        let mut vertices = BTreeSet::new();
        let mut essential = BTreeSet::new();
        let mut num_dofs = 0;

        for elem in mesh.active_elems() {
            vertices.extend(elem.nodes.iter().copied());
            num_dofs += num_bubble_fns(elem.shape, self.orders[elem.id]);
        }

        for edge in mesh.edges.iter().filter(|edge| edge.is_used()) {
            if edge
                .marker
                .map_or(false, |m| self.bc_type(m) == BcType::Essential)
            {
                essential.extend(edge.nodes);
            } else if !mesh.edge_is_constrained(edge.id) {
                let p = edge
                    .active_elems()
                    .iter()
                    .map(|id| self.orders[*id])
                    .min()
                    .unwrap_or(1);
                num_dofs += p.saturating_sub(1) as usize;
            }
        }

        num_dofs += vertices
            .iter()
            .filter(|node| !hanging.contains(*node) && !essential.contains(*node))
            .count();

        self.first_dof = first;
        self.num_dofs = num_dofs;
        num_dofs
    }

    /// Unknowns counted by the last call to [Space::assign_dofs]
    pub fn num_dofs(&self) -> usize {
        self.num_dofs
    }

    /// The range of global unknown indices owned by this Space
    pub fn dof_range(&self) -> std::ops::Range<usize> {
        self.first_dof..self.first_dof + self.num_dofs
    }

    /// Produce a Json Object describing the orders of the active Elems
    #[cfg(feature = "json_export")]
    pub fn to_json(&self, mesh: &Mesh) -> JsonValue {
        let mut orders = JsonValue::new_object();
        for elem in mesh.active_elems() {
            orders[elem.id.to_string()] = self.order(elem.id).into();
        }
        object! {
            "mesh": self.mesh_idx,
            "first_dof": self.first_dof,
            "num_dofs": self.num_dofs,
            "orders": orders,
        }
    }
}

impl fmt::Debug for Space {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Space")
            .field("mesh_idx", &self.mesh_idx)
            .field("orders", &self.orders)
            .field("first_dof", &self.first_dof)
            .field("num_dofs", &self.num_dofs)
            .finish()
    }
}

fn check_order(elem_id: usize, order: u8) -> Result<(), PRefError> {
    if order < 1 {
        Err(PRefError::OrderTooLow(elem_id, order))
    } else if order > MAX_POLYNOMIAL_ORDER {
        Err(PRefError::ExceededMaxExpansion(elem_id, order))
    } else {
        Ok(())
    }
}

/// Number of bubble (interior) functions of order `p` on a shape
pub fn num_bubble_fns(shape: Shape, p: u8) -> usize {
    let p = p as usize;
    match shape {
        Shape::Quad => p.saturating_sub(1).pow(2),
        Shape::Tri => p.saturating_sub(1) * p.saturating_sub(2) / 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::mesh::h_refinement::HRef;

    fn square(n: usize) -> Mesh {
        Mesh::rectangle([0.0, 1.0], [0.0, 1.0], n, n).unwrap()
    }

    #[test]
    fn uniform_order_dof_count() {
        let mesh = square(2);
        let mut space = Space::new(0, &mesh, 3).unwrap();

        // 9 vertices, 12 edges * 2, 4 bubbles * 4
        assert_eq!(space.assign_dofs(&mesh, 0), 9 + 24 + 16);
        assert_eq!(space.dof_range(), 0..49);
    }

    #[test]
    fn essential_boundaries() {
        let mesh = square(2);
        let mut space = Space::new(0, &mesh, 2)
            .unwrap()
            .with_bc(|_| BcType::Essential);

        // 1 interior vertex, 4 interior edges, 4 bubbles
        assert_eq!(space.assign_dofs(&mesh, 10), 1 + 4 + 4);
        assert_eq!(space.dof_range(), 10..19);
    }

    #[test]
    fn hanging_nodes_are_constrained() {
        let mut mesh = Mesh::rectangle([0.0, 2.0], [0.0, 1.0], 2, 1).unwrap();
        mesh.refine_element(1, HRef::Iso).unwrap();

        let mut space = Space::new(0, &mesh, 1).unwrap();
        // 6 original vertices + 4 midpoints + 1 center (one midpoint hangs)
        assert_eq!(space.assign_dofs(&mesh, 0), 10);

        space.set_uniform_order(&mesh, 2).unwrap();
        // 10 vertices, 4 + 12 used edges (2 of them constrained), 5 bubbles
        assert_eq!(space.assign_dofs(&mesh, 0), 10 + 14 + 5);
    }

    #[test]
    fn edge_order_is_the_minimum() {
        let mesh = Mesh::rectangle([0.0, 2.0], [0.0, 1.0], 2, 1).unwrap();
        let mut space = Space::new(0, &mesh, 2).unwrap();
        space.set_order(1, 4).unwrap();

        // 6 vertices; edges: 3 with p=2, 3 with p=4, shared p=2; bubbles 1 + 9
        assert_eq!(space.assign_dofs(&mesh, 0), 6 + (3 + 9 + 1) + 10);
    }

    #[test]
    fn triangle_bubbles() {
        assert_eq!(num_bubble_fns(Shape::Tri, 1), 0);
        assert_eq!(num_bubble_fns(Shape::Tri, 2), 0);
        assert_eq!(num_bubble_fns(Shape::Tri, 3), 1);
        assert_eq!(num_bubble_fns(Shape::Tri, 5), 6);
        assert_eq!(num_bubble_fns(Shape::Quad, 3), 4);
    }

    #[test]
    fn sons_inherit_orders() {
        let mut mesh = square(1);
        let mut space = Space::new(0, &mesh, 4).unwrap();
        let sons = mesh.refine_element(0, HRef::AnisoV).unwrap();
        space.sync_with(&mesh);

        assert!(sons.iter().all(|sid| space.order(*sid) == 4));
    }

    #[test]
    fn order_limits() {
        let mesh = square(1);
        let mut space = Space::new(0, &mesh, 1).unwrap();

        assert_eq!(space.set_order(0, 0), Err(PRefError::OrderTooLow(0, 0)));
        assert_eq!(
            space.set_order(0, MAX_POLYNOMIAL_ORDER + 1),
            Err(PRefError::ExceededMaxExpansion(0, MAX_POLYNOMIAL_ORDER + 1))
        );
        assert_eq!(space.set_order(5, 2), Err(PRefError::ElemDoesntExist(5)));
        assert!(Space::new(0, &mesh, 11).is_err());
    }
}
