/// A line between two Nodes
pub mod edge;
/// A node of the refinement forest
pub mod elem;
/// A Finite Element in Real Space
pub mod element;
/// Points, vectors and matrices in 2D
pub mod geometry;
/// Structures and Errors used to describe h-refinement
pub mod h_refinement;
/// A Point in Real Space
pub mod node;
/// Sub-regions of reference domains
pub mod region;

pub use element::{Element, Shape};

use edge::Edge;
use elem::Elem;
use geometry::Point;
use h_refinement::{HRef, HRefError};
use node::Node;
use region::Region;

use super::IdTracker;

use json::{object, JsonValue};
use log::{debug, warn};
use smallvec::{smallvec, SmallVec};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::BufWriter;
use std::sync::Arc;
use thiserror::Error;

/// Minimum side length of an Elem's Region (in the reference coordinates of its base Element). h-Refinements will fail for Elems smaller than this.
pub const MIN_REGION_SIZE: f64 = 6.1035e-5; // 15 refinement layers

/// Boundary markers assigned by [Mesh::rectangle] (bottom, right, top, left)
pub const RECTANGLE_MARKERS: [u32; 4] = [1, 2, 3, 4];

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MeshError {
    #[error("Cell {0} has {1} nodes; cells must have 3 or 4 nodes!")]
    BadCell(usize, usize),
    #[error("Cell {cell} references node {node}, which does not exist!")]
    NodeDoesntExist { cell: usize, node: usize },
    #[error("Cell {0} is inverted or degenerate (nodes must be counter-clockwise)!")]
    InvertedCell(usize),
    #[error("The edge between nodes {0:?} is shared by more than two cells!")]
    NonManifoldEdge([usize; 2]),
    #[error("A boundary marker was given for nodes {0:?}, which do not form a boundary edge!")]
    NotABoundaryEdge([usize; 2]),
    #[error("Rectangle meshes need at least one cell in each direction!")]
    EmptyRectangle,
}

/// Information used to define the geometric structure and refinement state of one solution component's discretization.
///
/// The Mesh is a forest: every level-0 `Elem` covers one `Element` and can be h-refined into sons recursively.
/// Only active (leaf) `Elem`s carry degrees of freedom. Elem ids are never reused; unrefined sons are retired.
#[derive(Debug, Clone)]
pub struct Mesh {
    pub elements: Vec<Arc<Element>>,
    pub elems: Vec<Elem>,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    edge_map: BTreeMap<[usize; 2], usize>,
    num_active: usize,
}

impl Mesh {
    /// Construct a Mesh from a list of points, a list of cells, and a list of boundary markers
    ///
    /// * Quadrilateral cells list their nodes in the order (SW, SE, NW, NE) (see [Element])
    /// * Triangular cells list their nodes counter-clockwise
    /// * Boundary edges which are not listed in `boundary_markers` receive the marker `0`
    ///
    /// ```text
    ///     3               4               5
    /// 1.0 *---------------*---------------*
    ///     |               |             / |
    ///     |       0       |     1     /   |
    ///     |               |         /  2  |
    /// 0.0 *---------------*---------------*
    ///  y  0               1               2
    ///  x 0.0             1.0             2.0
    /// ```
    /// ```
    /// use hp_fem_2d::domain::mesh::Mesh;
    ///
    /// let mesh = Mesh::from_cells(
    ///     &[[0.0, 0.0], [1.0, 0.0], [2.0, 0.0], [0.0, 1.0], [1.0, 1.0], [2.0, 1.0]],
    ///     &[vec![0, 1, 3, 4], vec![1, 5, 4], vec![1, 2, 5]],
    ///     &[([0, 1], 7)],
    /// ).unwrap();
    ///
    /// assert_eq!(mesh.num_active_elems(), 3);
    /// assert_eq!(mesh.edges.len(), 8);
    /// ```
    pub fn from_cells(
        points: &[[f64; 2]],
        cells: &[Vec<usize>],
        boundary_markers: &[([usize; 2], u32)],
    ) -> Result<Self, MeshError> {
        let nodes: Vec<Node> = points
            .iter()
            .enumerate()
            .map(|(id, p)| Node::new(id, Point::from(*p)))
            .collect();

        let mut elements = Vec::with_capacity(cells.len());
        for (cell_id, cell) in cells.iter().enumerate() {
            if cell.len() != 3 && cell.len() != 4 {
                return Err(MeshError::BadCell(cell_id, cell.len()));
            }
            if let Some(node) = cell.iter().find(|n| **n >= nodes.len()) {
                return Err(MeshError::NodeDoesntExist {
                    cell: cell_id,
                    node: *node,
                });
            }

            let element = Element::new(
                cell_id,
                cell.iter().map(|n| nodes[*n].coords).collect(),
            );
            let corners: &[[f64; 2]] = match element.shape {
                Shape::Tri => &[[-1.0, -1.0], [1.0, -1.0], [-1.0, 1.0]],
                Shape::Quad => &[[-1.0, -1.0], [1.0, -1.0], [-1.0, 1.0], [1.0, 1.0]],
            };
            if corners.iter().any(|c| element.jacobian(*c).det() <= 0.0) {
                return Err(MeshError::InvertedCell(cell_id));
            }

            elements.push(Arc::new(element));
        }

        // {[node_id_0, node_id_1] => adjacent cells}
        let mut edge_cells: BTreeMap<[usize; 2], SmallVec<[usize; 2]>> = BTreeMap::new();
        for (element, cell) in elements.iter().zip(cells.iter()) {
            for [a, b] in side_defs(element.shape) {
                let key = edge_key(cell[*a], cell[*b]);
                let adjacent = edge_cells.entry(key).or_default();
                if adjacent.len() == 2 {
                    return Err(MeshError::NonManifoldEdge(key));
                }
                adjacent.push(element.id);
            }
        }

        let mut markers: BTreeMap<[usize; 2], u32> = BTreeMap::new();
        for ([a, b], marker) in boundary_markers {
            let key = edge_key(*a, *b);
            match edge_cells.get(&key) {
                Some(adjacent) if adjacent.len() == 1 => {
                    markers.insert(key, *marker);
                }
                _ => return Err(MeshError::NotABoundaryEdge(key)),
            }
        }

        let mut edges = Vec::with_capacity(edge_cells.len());
        let mut edge_map = BTreeMap::new();
        for (edge_id, (key, adjacent)) in edge_cells.iter().enumerate() {
            let marker = if adjacent.len() == 1 {
                Some(markers.get(key).copied().unwrap_or(0))
            } else {
                None
            };
            edges.push(Edge::new(edge_id, *key, marker, 0));
            edge_map.insert(*key, edge_id);
        }

        let mut elems = Vec::with_capacity(elements.len());
        for (element, cell) in elements.iter().zip(cells.iter()) {
            let node_ids: SmallVec<[usize; 4]> = cell.iter().copied().collect();
            let edge_ids: SmallVec<[usize; 4]> = side_defs(element.shape)
                .iter()
                .map(|[a, b]| edge_map[&edge_key(cell[*a], cell[*b])])
                .collect();

            for edge_id in edge_ids.iter() {
                edges[*edge_id].connect_elem(element.id);
            }

            elems.push(Elem::new(element.id, node_ids, edge_ids, element.clone()));
        }

        Ok(Self {
            num_active: elems.len(),
            elements,
            elems,
            nodes,
            edges,
            edge_map,
        })
    }

    /// Construct a structured Mesh of `nx` by `ny` quadrilaterals over a rectangle
    ///
    /// The boundary edges are marked according to [RECTANGLE_MARKERS]
    pub fn rectangle(x: [f64; 2], y: [f64; 2], nx: usize, ny: usize) -> Result<Self, MeshError> {
        let (points, boundary) = rectangle_grid(x, y, nx, ny)?;
        let cells: Vec<Vec<usize>> = (0..ny)
            .flat_map(|j| (0..nx).map(move |i| grid_cell(i, j, nx)))
            .map(|c| c.to_vec())
            .collect();

        Self::from_cells(&points, &cells, &boundary)
    }

    /// Construct a structured Mesh of `2 * nx * ny` triangles over a rectangle (each grid cell is cut along its diagonal)
    pub fn rectangle_tris(
        x: [f64; 2],
        y: [f64; 2],
        nx: usize,
        ny: usize,
    ) -> Result<Self, MeshError> {
        let (points, boundary) = rectangle_grid(x, y, nx, ny)?;
        let cells: Vec<Vec<usize>> = (0..ny)
            .flat_map(|j| (0..nx).map(move |i| grid_cell(i, j, nx)))
            .flat_map(|[sw, se, nw, ne]| [vec![sw, se, ne], vec![sw, ne, nw]])
            .collect();

        Self::from_cells(&points, &cells, &boundary)
    }

    /// Print the mesh to a JSON file specified by path.
    #[cfg(feature = "json_export")]
    pub fn export_to_json(&self, path: impl AsRef<str>) -> std::io::Result<()> {
        let f = File::create(path.as_ref())?;
        let mut w = BufWriter::new(&f);

        self.to_json().write_pretty(&mut w, 4)?;

        Ok(())
    }

    /// Produce a Json Object that describes this Mesh
    #[cfg(feature = "json_export")]
    pub fn to_json(&self) -> JsonValue {
        object! {
            "Elements": JsonValue::from(self.elements.iter().map(|element| element.to_json()).collect::<Vec<_>>()),
            "Elems": JsonValue::from(self.elems.iter().map(|elem| elem.to_json()).collect::<Vec<_>>()),
            "Nodes": JsonValue::from(self.nodes.iter().map(|node| node.to_json()).collect::<Vec<_>>()),
            "Edges": JsonValue::from(self.edges.iter().map(|edge| edge.to_json()).collect::<Vec<_>>()),
        }
    }

    // ----------------------------------------------------------------------------------------------------
    // General Data Retrieval
    // ----------------------------------------------------------------------------------------------------

    /// Iterate over all active (leaf) `Elem`s
    pub fn active_elems(&self) -> impl Iterator<Item = &Elem> + '_ {
        self.elems.iter().filter(|elem| elem.is_active())
    }

    pub fn num_active_elems(&self) -> usize {
        self.num_active
    }

    pub fn is_active(&self, elem_id: usize) -> bool {
        elem_id < self.elems.len() && self.elems[elem_id].is_active()
    }

    /// Do two Meshes share the same set of base `Element`s (i.e. were they refined from a common master Mesh)
    pub fn shares_base_with(&self, other: &Self) -> bool {
        self.elements.len() == other.elements.len()
            && self
                .elements
                .iter()
                .zip(other.elements.iter())
                .all(|(a, b)| Arc::ptr_eq(a, b) || a.points == b.points)
    }

    /// Get the two [Point]s composing an [`Edge`]
    pub fn edge_points(&self, edge_id: usize) -> [&Point; 2] {
        assert!(edge_id < self.edges.len());
        self.edges[edge_id]
            .nodes
            .map(|node_id| &self.nodes[node_id].coords)
    }

    /// Get a list of an [`Elem`]s ancestors's IDs (nearest first)
    pub fn ancestor_elems(&self, elem_id: usize, include_starting_elem: bool) -> Vec<usize> {
        assert!(elem_id < self.elems.len());
        let mut ancestors = Vec::new();
        if include_starting_elem {
            ancestors.push(elem_id);
        }
        let mut current = elem_id;
        while let Some(parent_id) = self.elems[current].parent_id() {
            ancestors.push(parent_id);
            current = parent_id;
        }
        ancestors
    }

    /// Find the active `Elem` containing a point, given in the reference coordinates of a base `Element`
    pub fn locate(&self, base_id: usize, base_xi: [f64; 2]) -> usize {
        assert!(base_id < self.elements.len());
        let mut current = base_id;
        while let Some(son_ids) = self.elems[current].son_ids() {
            current = son_ids
                .iter()
                .copied()
                .find(|sid| self.elems[*sid].region.contains_point(base_xi))
                .unwrap_or_else(|| {
                    panic!(
                        "Point {:?} is not within any son of Elem {}; cannot locate!",
                        base_xi, current
                    )
                });
        }
        current
    }

    /// Find the smallest `Elem` whose region contains `region` (given in the reference coordinates of a base `Element`)
    pub fn find_containing(&self, base_id: usize, region: &Region) -> usize {
        assert!(base_id < self.elements.len());
        let mut current = base_id;
        while let Some(next) = self.elems[current].son_ids().and_then(|son_ids| {
            son_ids
                .iter()
                .copied()
                .find(|sid| self.elems[*sid].region.contains(region))
        }) {
            current = next;
        }
        current
    }

    /// Active `Elem`s sharing (part of) a side with an active `Elem`
    pub fn neighbors(&self, elem_id: usize) -> Vec<usize> {
        assert!(self.is_active(elem_id));
        let mut neighbors = BTreeSet::new();

        for edge_id in self.elems[elem_id].edges.iter() {
            let mut edge_ids = self.descendant_edges(*edge_id, true);
            let mut ancestor = self.edges[*edge_id].parent_id();
            while let Some(anc) = ancestor {
                edge_ids.push(anc);
                ancestor = self.edges[anc].parent_id();
            }

            for eid in edge_ids {
                neighbors.extend(
                    self.edges[eid]
                        .active_elems()
                        .iter()
                        .filter(|id| **id != elem_id),
                );
            }
        }

        neighbors.into_iter().collect()
    }

    /// Get a list of an [`Edge`]s descendant's IDs
    pub fn descendant_edges(&self, edge_id: usize, include_starting_edge: bool) -> Vec<usize> {
        let mut descendants = Vec::new();
        self.rec_descendant_edges(edge_id, include_starting_edge, &mut descendants);
        descendants
    }

    fn rec_descendant_edges(&self, edge_id: usize, include: bool, desc: &mut Vec<usize>) {
        if include {
            desc.push(edge_id);
        }
        if let Some(child_edge_ids) = self.edges[edge_id].child_ids() {
            for cei in child_edge_ids {
                self.rec_descendant_edges(cei, true, desc);
            }
        }
    }

    // ----------------------------------------------------------------------------------------------------
    // Hanging node state
    // ----------------------------------------------------------------------------------------------------

    /// Depth of the deepest descendant of an Edge which is used by an active Elem (`None` if no descendant is used)
    fn used_depth(&self, edge_id: usize) -> Option<u8> {
        self.edges[edge_id].child_ids().and_then(|children| {
            children
                .iter()
                .filter_map(|child_id| match self.used_depth(*child_id) {
                    Some(depth) => Some(depth + 1),
                    None if self.edges[*child_id].is_used() => Some(1),
                    None => None,
                })
                .max()
        })
    }

    /// Number of hanging node levels along one side of an active `Elem`
    ///
    /// A side is regular (0) if the neighbor across it is no finer than the `Elem` itself.
    pub fn side_irregularity(&self, elem_id: usize, side: usize) -> u8 {
        self.used_depth(self.elems[elem_id].edges[side])
            .unwrap_or(0)
    }

    /// The largest irregularity among the sides of an active `Elem`
    pub fn max_irregularity(&self, elem_id: usize) -> u8 {
        (0..self.elems[elem_id].edges.len())
            .map(|side| self.side_irregularity(elem_id, side))
            .max()
            .unwrap_or(0)
    }

    /// Does an active `Elem` have hanging nodes along any of its sides
    pub fn has_hanging_nodes(&self, elem_id: usize) -> bool {
        self.max_irregularity(elem_id) > 0
    }

    /// Is this Edge (or one of its ancestors) used as a full side by an active Elem
    pub fn edge_is_covered(&self, edge_id: usize) -> bool {
        let mut current = Some(edge_id);
        while let Some(eid) = current {
            if self.edges[eid].is_used() {
                return true;
            }
            current = self.edges[eid].parent_id();
        }
        false
    }

    /// Is this Edge constrained by a larger Edge (one of its ancestors is used as a full side by an active Elem)
    pub fn edge_is_constrained(&self, edge_id: usize) -> bool {
        self.edges[edge_id]
            .parent_id()
            .map_or(false, |parent_id| self.edge_is_covered(parent_id))
    }

    /// The set of Nodes which are vertices of active Elems and lie in the interior of a side of another active Elem
    pub fn hanging_nodes(&self) -> BTreeSet<usize> {
        self.edges
            .iter()
            .filter_map(|edge| {
                edge.child_node_id().filter(|_| {
                    self.edge_is_covered(edge.id) && self.used_depth(edge.id).is_some()
                })
            })
            .collect()
    }

    // ----------------------------------------------------------------------------------------------------
    // h-refinement methods
    // ----------------------------------------------------------------------------------------------------

    /// Determine if this Elem can be h-refined
    /// * returns an `Err` if the Mesh doesn't have `elem_id`, if it isn't active, if it is too small, or if the refinement isn't supported by its shape
    pub fn check_h_refinement(&self, elem_id: usize, refinement: HRef) -> Result<(), HRefError> {
        if elem_id >= self.elems.len() {
            return Err(HRefError::ElemDoesntExist(elem_id));
        }
        let elem = &self.elems[elem_id];
        if !elem.is_active() {
            Err(HRefError::ElemNotActive(elem_id))
        } else if !refinement.valid_for(elem.shape) {
            Err(HRefError::AnisoOnTriangle(elem_id))
        } else if elem.region.min_side_length() / 2.0 < MIN_REGION_SIZE {
            Err(HRefError::MinimumSizeExceeded(elem_id))
        } else {
            Ok(())
        }
    }

    /// Apply an [HRef] to all active [Elem]s in the Mesh
    pub fn global_h_refinement(&mut self, refinement: HRef) -> Result<Vec<usize>, HRefError> {
        let refinements = self
            .active_elems()
            .map(|elem| (elem.id, refinement))
            .collect();
        self.execute_h_refinements(refinements)
    }

    /// Isotropically refine every active [Elem] (used to build reference Meshes)
    pub fn refine_all(&mut self) -> Result<Vec<usize>, HRefError> {
        self.global_h_refinement(HRef::Iso)
    }

    /// Execute a series of [HRef]s on [Elem]s specified by their id
    ///
    /// All refinements are validated before any are applied. Returns the ids of the new son Elems.
    pub fn execute_h_refinements(
        &mut self,
        refinements: Vec<(usize, HRef)>,
    ) -> Result<Vec<usize>, HRefError> {
        let mut refinements_map: BTreeMap<usize, HRef> = BTreeMap::new();
        for (elem_id, h_ref) in refinements {
            self.check_h_refinement(elem_id, h_ref)?;
            if refinements_map.insert(elem_id, h_ref).is_some() {
                return Err(HRefError::DoubleRefinement(elem_id));
            }
        }

        let mut new_elems = Vec::new();
        for (elem_id, refinement) in refinements_map {
            new_elems.extend(self.refine_element(elem_id, refinement)?);
        }
        Ok(new_elems)
    }

    /// h-refine one active `Elem`, returning the ids of its sons (ordered as described in [HRef])
    pub fn refine_element(
        &mut self,
        elem_id: usize,
        refinement: HRef,
    ) -> Result<SmallVec<[usize; 4]>, HRefError> {
        self.check_h_refinement(elem_id, refinement)?;

        let elem = &self.elems[elem_id];
        let n = elem.nodes.clone();
        let side_edges = elem.edges.clone();
        let shape = elem.shape;

        let son_nodes: SmallVec<[SmallVec<[usize; 4]>; 4]> = match (shape, refinement) {
            (Shape::Quad, HRef::Iso) => {
                let [m_s, m_n, m_w, m_e] = [0, 1, 2, 3].map(|side| self.split_edge(side_edges[side]));
                let center = self.new_node(self.elems[elem_id].map_to_real([0.0, 0.0]));
                smallvec![
                    smallvec![n[0], m_s, m_w, center],
                    smallvec![m_s, n[1], center, m_e],
                    smallvec![m_w, center, n[2], m_n],
                    smallvec![center, m_e, m_n, n[3]],
                ]
            }
            (Shape::Quad, HRef::AnisoH) => {
                let m_w = self.split_edge(side_edges[2]);
                let m_e = self.split_edge(side_edges[3]);
                smallvec![
                    smallvec![n[0], n[1], m_w, m_e],
                    smallvec![m_w, m_e, n[2], n[3]],
                ]
            }
            (Shape::Quad, HRef::AnisoV) => {
                let m_s = self.split_edge(side_edges[0]);
                let m_n = self.split_edge(side_edges[1]);
                smallvec![
                    smallvec![n[0], m_s, n[2], m_n],
                    smallvec![m_s, n[1], m_n, n[3]],
                ]
            }
            (Shape::Tri, HRef::Iso) => {
                let [m0, m1, m2] = [0, 1, 2].map(|side| self.split_edge(side_edges[side]));
                smallvec![
                    smallvec![n[0], m0, m2],
                    smallvec![m0, n[1], m1],
                    smallvec![m2, m1, n[2]],
                    smallvec![m1, m2, m0],
                ]
            }
            (Shape::Tri, _) => unreachable!(),
        };

        let regions = self.elems[elem_id].region.split(refinement);
        let son_level = self.elems[elem_id].level + 1;

        for edge_id in side_edges.iter() {
            self.edges[*edge_id].disconnect_elem(elem_id);
        }

        let mut elem_ids = IdTracker::new(self.elems.len());
        let mut son_ids: SmallVec<[usize; 4]> = SmallVec::new();
        for (nodes, region) in son_nodes.into_iter().zip(regions) {
            let son_id = elem_ids.next_id();
            let edges: SmallVec<[usize; 4]> = side_defs(shape)
                .iter()
                .map(|[a, b]| self.edge_between(nodes[*a], nodes[*b], son_level))
                .collect();

            for edge_id in edges.iter() {
                self.edges[*edge_id].connect_elem(son_id);
            }

            let son = self.elems[elem_id].son(son_id, nodes, edges, region);
            self.elems.push(son);
            son_ids.push(son_id);
        }

        self.elems[elem_id].set_sons(refinement, son_ids.clone());
        self.num_active += son_ids.len() - 1;

        debug!(
            "h-refined Elem {} ({:?}) into {:?}",
            elem_id, refinement, son_ids
        );

        Ok(son_ids)
    }

    /// Merge the sons of an `Elem` back into their parent
    ///
    /// All of the sons must be active. They are retired; their ids will not become active again.
    pub fn unrefine_element(&mut self, elem_id: usize) -> Result<(), HRefError> {
        if elem_id >= self.elems.len() {
            return Err(HRefError::ElemDoesntExist(elem_id));
        }
        let son_ids: SmallVec<[usize; 4]> = match self.elems[elem_id].son_ids() {
            Some(ids) => ids.iter().copied().collect(),
            None => return Err(HRefError::NoSons(elem_id)),
        };
        if son_ids.iter().any(|sid| !self.elems[*sid].is_active()) {
            return Err(HRefError::SonsNotActive(elem_id));
        }

        for sid in son_ids.iter() {
            for edge_id in self.elems[*sid].edges.clone() {
                self.edges[edge_id].disconnect_elem(*sid);
            }
            self.elems[*sid].retire();
        }

        self.elems[elem_id].take_sons();
        for edge_id in self.elems[elem_id].edges.clone() {
            self.edges[edge_id].connect_elem(elem_id);
        }
        self.num_active -= son_ids.len() - 1;

        debug!("unrefined Elem {} (retired {:?})", elem_id, son_ids);

        Ok(())
    }

    /// Isotropically refine active Elems until no side has more than `level` levels of hanging nodes
    ///
    /// Returns the number of forced refinements. Total regularity (`level == 0`) is not supported; it is raised to `1`.
    pub fn regularize(&mut self, level: u8) -> usize {
        let level = if level < 1 {
            warn!("Total regularization is not supported; using a maximum irregularity of 1");
            1
        } else {
            level
        };

        let mut num_forced = 0;
        loop {
            let irregular: Vec<usize> = self
                .active_elems()
                .filter(|elem| self.max_irregularity(elem.id) > level)
                .map(|elem| elem.id)
                .collect();

            if irregular.is_empty() {
                break;
            }

            let mut progress = false;
            for elem_id in irregular {
                match self.refine_element(elem_id, HRef::Iso) {
                    Ok(_) => {
                        debug!("regularization refined Elem {}", elem_id);
                        num_forced += 1;
                        progress = true;
                    }
                    Err(err) => warn!("could not regularize Elem {}: {}", elem_id, err),
                }
            }

            if !progress {
                break;
            }
        }

        num_forced
    }

    // ----------------------------------------------------------------------------------------------------
    // h-refinement helpers
    // ----------------------------------------------------------------------------------------------------

    fn new_node(&mut self, coords: Point) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node::new(id, coords));
        id
    }

    // split an Edge (if it hasn't been split yet), returning the id of the Node at its center
    fn split_edge(&mut self, edge_id: usize) -> usize {
        if let Some(node_id) = self.edges[edge_id].child_node_id() {
            return node_id;
        }

        let [p0, p1] = self.edge_points(edge_id);
        let midpoint = Point::between(p0, p1);
        let node_id = self.new_node(midpoint);

        let new_ids = IdTracker::new(self.edges.len()).next_two_ids();
        let children = self.edges[edge_id].split(new_ids, node_id);
        for child in children {
            self.edge_map.insert(edge_key(child.nodes[0], child.nodes[1]), child.id);
            self.edges.push(child);
        }

        node_id
    }

    // get the Edge between two Nodes, creating an interior Edge if none exists
    fn edge_between(&mut self, a: usize, b: usize, level: u8) -> usize {
        let key = edge_key(a, b);
        match self.edge_map.get(&key) {
            Some(edge_id) => *edge_id,
            None => {
                let edge_id = self.edges.len();
                self.edges.push(Edge::new(edge_id, key, None, level));
                self.edge_map.insert(key, edge_id);
                edge_id
            }
        }
    }
}

fn edge_key(a: usize, b: usize) -> [usize; 2] {
    if a < b {
        [a, b]
    } else {
        [b, a]
    }
}

fn side_defs(shape: Shape) -> &'static [[usize; 2]] {
    match shape {
        Shape::Tri => &elem::TRI_SIDES,
        Shape::Quad => &elem::QUAD_SIDES,
    }
}

fn grid_cell(i: usize, j: usize, nx: usize) -> [usize; 4] {
    let sw = j * (nx + 1) + i;
    [sw, sw + 1, sw + nx + 1, sw + nx + 2]
}

#[allow(clippy::type_complexity)]
fn rectangle_grid(
    [x0, x1]: [f64; 2],
    [y0, y1]: [f64; 2],
    nx: usize,
    ny: usize,
) -> Result<(Vec<[f64; 2]>, Vec<([usize; 2], u32)>), MeshError> {
    if nx == 0 || ny == 0 {
        return Err(MeshError::EmptyRectangle);
    }

    let points = (0..=ny)
        .flat_map(|j| {
            (0..=nx).map(move |i| {
                [
                    x0 + (x1 - x0) * i as f64 / nx as f64,
                    y0 + (y1 - y0) * j as f64 / ny as f64,
                ]
            })
        })
        .collect();

    let node = |i: usize, j: usize| j * (nx + 1) + i;
    let [bottom, right, top, left] = RECTANGLE_MARKERS;

    let mut boundary = Vec::with_capacity(2 * (nx + ny));
    for i in 0..nx {
        boundary.push(([node(i, 0), node(i + 1, 0)], bottom));
        boundary.push(([node(i, ny), node(i + 1, ny)], top));
    }
    for j in 0..ny {
        boundary.push(([node(nx, j), node(nx, j + 1)], right));
        boundary.push(([node(0, j), node(0, j + 1)], left));
    }

    Ok((points, boundary))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_in_a_row() -> Mesh {
        Mesh::rectangle([0.0, 3.0], [0.0, 1.0], 3, 1).unwrap()
    }

    #[test]
    fn rectangle_construction() {
        let mesh = Mesh::rectangle([0.0, 2.0], [0.0, 1.0], 2, 2).unwrap();

        assert_eq!(mesh.num_active_elems(), 4);
        assert_eq!(mesh.nodes.len(), 9);
        assert_eq!(mesh.edges.len(), 12);
        assert_eq!(mesh.edges.iter().filter(|e| e.is_boundary()).count(), 8);

        let markers: BTreeSet<u32> = mesh.edges.iter().filter_map(|e| e.marker).collect();
        assert_eq!(markers, RECTANGLE_MARKERS.into_iter().collect());

        for elem in mesh.active_elems() {
            assert_eq!(elem.edges.len(), 4);
            for edge_id in elem.edges.iter() {
                assert!(mesh.edges[*edge_id].active_elems().contains(&elem.id));
            }
        }
    }

    #[test]
    fn triangle_construction() {
        let mesh = Mesh::rectangle_tris([0.0, 1.0], [0.0, 1.0], 2, 1).unwrap();
        assert_eq!(mesh.num_active_elems(), 4);
        assert!(mesh.active_elems().all(|elem| elem.shape == Shape::Tri));
        assert_eq!(mesh.edges.len(), 9);
    }

    #[test]
    fn bad_cells() {
        let points = [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [1.0, 1.0]];
        assert_eq!(
            Mesh::from_cells(&points, &[vec![0, 1]], &[]).unwrap_err(),
            MeshError::BadCell(0, 2)
        );
        assert_eq!(
            Mesh::from_cells(&points, &[vec![0, 1, 9]], &[]).unwrap_err(),
            MeshError::NodeDoesntExist { cell: 0, node: 9 }
        );
        assert_eq!(
            Mesh::from_cells(&points, &[vec![0, 2, 1]], &[]).unwrap_err(),
            MeshError::InvertedCell(0)
        );
        assert_eq!(
            Mesh::from_cells(&points, &[vec![0, 1, 3], vec![0, 3, 2]], &[([0, 3], 1)]).unwrap_err(),
            MeshError::NotABoundaryEdge([0, 3])
        );
        assert_eq!(
            Mesh::rectangle([0.0, 1.0], [0.0, 1.0], 0, 1).unwrap_err(),
            MeshError::EmptyRectangle
        );
    }

    #[test]
    fn iso_refinement() {
        let mut mesh = three_in_a_row();
        let sons = mesh.refine_element(1, HRef::Iso).unwrap();

        assert_eq!(sons.as_slice(), &[3, 4, 5, 6]);
        assert_eq!(mesh.num_active_elems(), 6);
        assert!(!mesh.elems[1].is_active());
        // 4 midpoints and 1 center
        assert_eq!(mesh.nodes.len(), 8 + 5);
        // 4 split edges (8 children) and 4 interior edges
        assert_eq!(mesh.edges.len(), 10 + 12);

        // the neighbors now have hanging nodes
        assert_eq!(mesh.side_irregularity(0, 3), 1);
        assert_eq!(mesh.side_irregularity(2, 2), 1);
        assert!(!mesh.has_hanging_nodes(3));
        assert_eq!(mesh.hanging_nodes().len(), 2);

        let sw = &mesh.elems[3];
        let corner = sw.map_to_real([1.0, 1.0]);
        assert!((corner.x - 1.5).abs() < 1e-14 && (corner.y - 0.5).abs() < 1e-14);
    }

    #[test]
    fn anisotropic_refinement() {
        let mut mesh = three_in_a_row();
        let h_sons = mesh.refine_element(0, HRef::AnisoH).unwrap();
        let v_sons = mesh.refine_element(2, HRef::AnisoV).unwrap();

        assert_eq!(h_sons.len(), 2);
        assert_eq!(v_sons.len(), 2);
        assert_eq!(mesh.num_active_elems(), 5);
        assert_eq!(
            mesh.elems[h_sons[1]].region,
            Region::Rect {
                u: [-1.0, 1.0],
                v: [0.0, 1.0]
            }
        );

        // the middle Elem sees one hanging node on its west side, none on its east side
        assert_eq!(mesh.side_irregularity(1, 2), 1);
        assert_eq!(mesh.side_irregularity(1, 3), 0);
        let mut expected = vec![v_sons[0], h_sons[0], h_sons[1]];
        expected.sort_unstable();
        assert_eq!(mesh.neighbors(1), expected);
    }

    #[test]
    fn shared_midpoints_are_reused() {
        let mut mesh = three_in_a_row();
        mesh.refine_element(0, HRef::Iso).unwrap();
        let num_nodes = mesh.nodes.len();
        mesh.refine_element(1, HRef::Iso).unwrap();

        // the midpoint of the shared edge already exists
        assert_eq!(mesh.nodes.len(), num_nodes + 4);
        assert!(mesh.hanging_nodes().len() == 1);
        assert!(!mesh.has_hanging_nodes(mesh.elems[0].son_ids().unwrap()[1]));
    }

    #[test]
    fn triangle_refinement() {
        let mut mesh = Mesh::rectangle_tris([0.0, 1.0], [0.0, 1.0], 1, 1).unwrap();
        let sons = mesh.refine_element(0, HRef::Iso).unwrap();

        assert_eq!(sons.len(), 4);
        assert_eq!(mesh.num_active_elems(), 5);
        for sid in sons.iter() {
            assert!(mesh.elems[*sid].jacobian([-0.5, -0.5]).det() > 0.0);
        }
        assert_eq!(
            mesh.refine_element(1, HRef::AnisoH).unwrap_err(),
            HRefError::AnisoOnTriangle(1)
        );
    }

    #[test]
    fn refinement_errors() {
        let mut mesh = three_in_a_row();
        assert_eq!(
            mesh.refine_element(7, HRef::Iso).unwrap_err(),
            HRefError::ElemDoesntExist(7)
        );
        mesh.refine_element(0, HRef::Iso).unwrap();
        assert_eq!(
            mesh.refine_element(0, HRef::Iso).unwrap_err(),
            HRefError::ElemNotActive(0)
        );
        assert_eq!(
            mesh.execute_h_refinements(vec![(1, HRef::Iso), (1, HRef::AnisoH)])
                .unwrap_err(),
            HRefError::DoubleRefinement(1)
        );
        // nothing was applied
        assert!(mesh.is_active(1));
    }

    #[test]
    fn minimum_size() {
        let mut mesh = Mesh::rectangle([0.0, 1.0], [0.0, 1.0], 1, 1).unwrap();
        let mut current = 0;
        let mut depth = 0;
        loop {
            match mesh.refine_element(current, HRef::AnisoV) {
                Ok(sons) => {
                    current = sons[0];
                    depth += 1;
                }
                Err(err) => {
                    assert_eq!(err, HRefError::MinimumSizeExceeded(current));
                    break;
                }
            }
        }
        assert_eq!(depth, 15);
    }

    #[test]
    fn unrefinement() {
        let mut mesh = three_in_a_row();
        let sons = mesh.refine_element(1, HRef::Iso).unwrap();
        mesh.refine_element(sons[0], HRef::AnisoH).unwrap();

        assert_eq!(
            mesh.unrefine_element(1).unwrap_err(),
            HRefError::SonsNotActive(1)
        );
        assert_eq!(mesh.unrefine_element(0).unwrap_err(), HRefError::NoSons(0));

        mesh.unrefine_element(sons[0]).unwrap();
        mesh.unrefine_element(1).unwrap();

        assert_eq!(mesh.num_active_elems(), 3);
        assert!(mesh.is_active(1));
        assert!(sons.iter().all(|sid| mesh.elems[*sid].is_retired()));
        assert!(!mesh.has_hanging_nodes(0));
        assert!(mesh.hanging_nodes().is_empty());

        // refining again produces new ids
        let new_sons = mesh.refine_element(1, HRef::Iso).unwrap();
        assert!(new_sons.iter().all(|sid| !sons.contains(sid)));
    }

    #[test]
    fn regularization_propagates() {
        let mut mesh = three_in_a_row();
        let sons = mesh.refine_element(1, HRef::Iso).unwrap();
        // south-west son touches Elem 0
        mesh.refine_element(sons[0], HRef::Iso).unwrap();

        assert_eq!(mesh.side_irregularity(0, 3), 2);

        let num_forced = mesh.regularize(1);
        assert!(num_forced >= 1);
        assert!(mesh.elems[0].has_sons());
        assert!(mesh.active_elems().all(|elem| mesh.max_irregularity(elem.id) <= 1));

        // already regular
        assert_eq!(mesh.regularize(1), 0);
    }

    #[test]
    fn total_regularity_is_raised_to_one() {
        let mut mesh = three_in_a_row();
        mesh.refine_element(1, HRef::Iso).unwrap();
        assert_eq!(mesh.regularize(0), 0);
    }

    #[test]
    fn point_location() {
        let mut mesh = three_in_a_row();
        let sons = mesh.refine_element(1, HRef::Iso).unwrap();

        assert_eq!(mesh.locate(1, [0.5, 0.5]), sons[3]);
        assert_eq!(mesh.locate(1, [-0.5, 0.5]), sons[2]);
        assert_eq!(mesh.locate(0, [0.5, 0.5]), 0);

        let quarter = Region::Rect {
            u: [0.0, 0.5],
            v: [-1.0, -0.5],
        };
        assert_eq!(mesh.find_containing(1, &quarter), sons[1]);
        assert_eq!(mesh.find_containing(1, &Region::reference(Shape::Quad)), 1);
    }

    #[cfg(feature = "json_export")]
    #[test]
    fn json_export() {
        let mut mesh = three_in_a_row();
        mesh.refine_element(1, HRef::AnisoV).unwrap();
        let json = mesh.to_json();

        assert_eq!(json["Elems"].len(), 5);
        assert_eq!(json["Elems"][1]["refinement"], "AnisoV");
        assert_eq!(json["Elements"].len(), 3);
    }
}
