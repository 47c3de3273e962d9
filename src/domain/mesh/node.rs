use super::geometry::Point;
use json::{array, object, JsonValue};

/// A point in 2D space.
/// Pairs of Nodes describe Edges and groups of 3 or 4 Nodes describe Elems.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: usize,
    pub coords: Point,
}

impl Node {
    pub fn new(id: usize, coords: Point) -> Self {
        Self { id, coords }
    }

    /// Produce a Json Object that describes this Node
    #[cfg(feature = "json_export")]
    pub fn to_json(&self) -> JsonValue {
        object! {
            "id": self.id,
            "coords": array![self.coords.x, self.coords.y],
        }
    }
}
