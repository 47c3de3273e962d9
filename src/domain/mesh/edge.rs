use json::{array, object, JsonValue};
use smallvec::SmallVec;

/// Edges describe a straight line between two `Node`s
///
/// Edges form binary trees: splitting an Edge creates a Node at its center and two child Edges.
/// Child Edges are kept (and reused) when the Elems that caused the split are unrefined.
///
/// Edges keep track of the active `Elem`s which use them as a full side.
/// A used Edge with used descendants has hanging Nodes on it.
///
/// ```text
///     nodes[0]     child_node     nodes[1]
///        *-------------*-------------*
///            child 0       child 1
/// ```
#[derive(Debug, Clone)]
pub struct Edge {
    pub id: usize,
    pub nodes: [usize; 2],
    /// Boundary marker (`None` for interior edges)
    pub marker: Option<u32>,
    /// Number of splits separating this Edge from its level-0 ancestor
    pub level: u8,
    children: Option<[usize; 2]>,
    parent: Option<usize>,
    child_node: Option<usize>,
    active_elems: SmallVec<[usize; 2]>,
}

impl Edge {
    pub fn new(id: usize, nodes: [usize; 2], marker: Option<u32>, level: u8) -> Self {
        Self {
            id,
            nodes,
            marker,
            level,
            children: None,
            parent: None,
            child_node: None,
            active_elems: SmallVec::new(),
        }
    }

    /// Produce two child Edges from this Edge, connected through a new Node along its center
    pub(crate) fn split(&mut self, new_ids: [usize; 2], new_node_id: usize) -> [Self; 2] {
        assert!(
            self.children.is_none(),
            "Edge {} has already been split; cannot split again!",
            self.id
        );

        self.children = Some(new_ids);
        self.child_node = Some(new_node_id);

        let child = |id: usize, nodes: [usize; 2]| Self {
            id,
            nodes,
            marker: self.marker,
            level: self.level + 1,
            children: None,
            parent: Some(self.id),
            child_node: None,
            active_elems: SmallVec::new(),
        };

        [
            child(new_ids[0], [self.nodes[0], new_node_id]),
            child(new_ids[1], [new_node_id, self.nodes[1]]),
        ]
    }

    /// Id of the Parent Edge if this Edge has a parent
    pub fn parent_id(&self) -> Option<usize> {
        self.parent
    }

    /// The ids of the two child Edges if this Edge has been split
    pub fn child_ids(&self) -> Option<[usize; 2]> {
        self.children
    }

    /// Returns the Node sitting on the center of this Edge if it has been split
    pub fn child_node_id(&self) -> Option<usize> {
        self.child_node
    }

    /// Is this Edge on the boundary of the Mesh
    pub fn is_boundary(&self) -> bool {
        self.marker.is_some()
    }

    /// Active Elems which use this Edge as one of their sides
    pub fn active_elems(&self) -> &[usize] {
        &self.active_elems
    }

    pub fn is_used(&self) -> bool {
        !self.active_elems.is_empty()
    }

    pub(crate) fn connect_elem(&mut self, elem_id: usize) {
        assert!(
            self.active_elems.len() < 2 && !self.active_elems.contains(&elem_id),
            "Edge {} cannot be connected to Elem {} (already connected to {:?})!",
            self.id,
            elem_id,
            self.active_elems,
        );
        self.active_elems.push(elem_id);
    }

    pub(crate) fn disconnect_elem(&mut self, elem_id: usize) {
        match self.active_elems.iter().position(|id| *id == elem_id) {
            Some(idx) => {
                self.active_elems.remove(idx);
            }
            None => panic!(
                "Elem {} isn't connected to Edge {}; cannot disconnect!",
                elem_id, self.id
            ),
        }
    }

    /// Get the id of the other active `Elem` connected to this Edge (if any)
    pub fn other_active_elem_id(&self, elem_id: usize) -> Option<usize> {
        self.active_elems.iter().copied().find(|id| *id != elem_id)
    }

    /// Produce a Json Object that describes this Edge
    #[cfg(feature = "json_export")]
    pub fn to_json(&self) -> JsonValue {
        object! {
            "id": self.id,
            "nodes": array![self.nodes[0], self.nodes[1]],
            "marker": self.marker,
            "level": self.level,
            "parent": self.parent,
            "children": match self.children {
                Some(child_ids) => array![child_ids[0], child_ids[1]],
                None => array![],
            },
            "active_elems": JsonValue::from(self.active_elems.to_vec()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_edges() {
        let mut edge = Edge::new(0, [3, 7], Some(2), 0);
        let [c0, c1] = edge.split([1, 2], 9);

        assert_eq!(edge.child_ids(), Some([1, 2]));
        assert_eq!(edge.child_node_id(), Some(9));
        assert_eq!(c0.nodes, [3, 9]);
        assert_eq!(c1.nodes, [9, 7]);
        assert_eq!(c0.marker, Some(2));
        assert_eq!(c1.level, 1);
        assert_eq!(c1.parent_id(), Some(0));
    }

    #[test]
    #[should_panic]
    fn double_split() {
        let mut edge = Edge::new(0, [3, 7], None, 0);
        edge.split([1, 2], 9);
        edge.split([3, 4], 10);
    }

    #[test]
    fn connections() {
        let mut edge = Edge::new(0, [0, 1], None, 0);
        edge.connect_elem(4);
        edge.connect_elem(5);
        assert_eq!(edge.other_active_elem_id(4), Some(5));

        edge.disconnect_elem(5);
        assert_eq!(edge.other_active_elem_id(4), None);
        assert!(edge.is_used());
    }

    #[test]
    #[should_panic]
    fn three_connections() {
        let mut edge = Edge::new(0, [0, 1], None, 0);
        edge.connect_elem(4);
        edge.connect_elem(5);
        edge.connect_elem(6);
    }
}
