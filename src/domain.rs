/// Functions defined over the Elems of a Mesh
pub mod fields;
/// The geometric structure and refinement state of a Domain
pub mod mesh;
/// Polynomial orders and unknown counting
pub mod space;

use mesh::{h_refinement::HRefError, Mesh};
use space::{PRefError, Space, MAX_POLYNOMIAL_ORDER};

use json::{object, JsonValue};
use log::debug;
use std::fs::File;
use std::io::BufWriter;

/// High level description of a (possibly multi-component) FEM discretization
///
/// Each solution component has one [Space]. Spaces refer to their [Mesh] by index, so several components can share one Mesh
/// ("single-mesh" mode) or each live on their own Mesh ("multi-mesh" mode). In multi-mesh mode, all Meshes must be refinements of
/// the same master Mesh.
#[derive(Debug, Clone)]
pub struct Domain {
    pub meshes: Vec<Mesh>,
    pub spaces: Vec<Space>,
}

impl Domain {
    /// Construct a Domain from a set of Meshes (without any Spaces)
    pub fn new(meshes: Vec<Mesh>) -> Self {
        Self {
            meshes,
            spaces: Vec::new(),
        }
    }

    /// Construct a Domain with `num_components` Spaces of uniform order sharing one Mesh
    pub fn single_mesh(mesh: Mesh, num_components: usize, order: u8) -> Result<Self, PRefError> {
        let mut domain = Self::new(vec![mesh]);
        for _ in 0..num_components {
            domain.add_space(0, order)?;
        }
        Ok(domain)
    }

    /// Add a Space of uniform order over one of the Meshes, returning its component index
    pub fn add_space(&mut self, mesh_idx: usize, order: u8) -> Result<usize, PRefError> {
        assert!(
            mesh_idx < self.meshes.len(),
            "Mesh {} does not exist; cannot add Space!",
            mesh_idx
        );
        let space = Space::new(mesh_idx, &self.meshes[mesh_idx], order)?;
        self.spaces.push(space);
        Ok(self.spaces.len() - 1)
    }

    pub fn num_components(&self) -> usize {
        self.spaces.len()
    }

    /// The Mesh a solution component is defined over
    pub fn mesh_of(&self, component: usize) -> &Mesh {
        &self.meshes[self.spaces[component].mesh_index()]
    }

    /// Components whose Spaces are defined over a Mesh
    pub fn components_on_mesh(&self, mesh_idx: usize) -> Vec<usize> {
        self.spaces
            .iter()
            .enumerate()
            .filter(|(_, space)| space.mesh_index() == mesh_idx)
            .map(|(comp, _)| comp)
            .collect()
    }

    /// Bring the orders of every Space on a Mesh up to date with its refinement state
    pub fn sync_spaces(&mut self, mesh_idx: usize) {
        let mesh = &self.meshes[mesh_idx];
        for space in self
            .spaces
            .iter_mut()
            .filter(|space| space.mesh_index() == mesh_idx)
        {
            space.sync_with(mesh);
        }
    }

    /// Count the unknowns of every Space, numbering them consecutively. Returns the total.
    pub fn assign_dofs(&mut self) -> usize {
        let mut next = 0;
        for space in self.spaces.iter_mut() {
            next += space.assign_dofs(&self.meshes[space.mesh_index()], next);
        }
        next
    }

    /// Total number of unknowns counted by the last call to [Domain::assign_dofs]
    pub fn num_dofs(&self) -> usize {
        self.spaces.iter().map(|space| space.num_dofs()).sum()
    }

    /// Total number of active Elems over all Meshes
    pub fn num_active_elems(&self) -> usize {
        self.meshes.iter().map(|mesh| mesh.num_active_elems()).sum()
    }

    /// Construct the reference ("fine") Domain: every Mesh is refined once isotropically and every order is raised by `order_increase`
    ///
    /// Elem ids of this Domain remain valid (as inactive parents) in the reference Domain.
    pub fn reference(&self, order_increase: u8) -> Result<Self, HRefError> {
        let mut meshes = self.meshes.clone();
        for mesh in meshes.iter_mut() {
            mesh.refine_all()?;
        }

        let spaces = self
            .spaces
            .iter()
            .map(|space| {
                let mesh = &meshes[space.mesh_index()];
                let mut ref_space = space.clone();
                ref_space.sync_with(mesh);
                for elem in mesh.active_elems() {
                    let order = ref_space
                        .order(elem.id)
                        .saturating_add(order_increase)
                        .min(MAX_POLYNOMIAL_ORDER);
                    // orders were already valid, so raising them (with the cap) can't fail
                    let _ = ref_space.set_order(elem.id, order);
                }
                ref_space
            })
            .collect();

        let mut reference = Self { meshes, spaces };
        let ndof = reference.assign_dofs();
        debug!("reference Domain built with {} unknowns", ndof);

        Ok(reference)
    }

    /// Print the Meshes and Space orders to a JSON file specified by path.
    #[cfg(feature = "json_export")]
    pub fn export_to_json(&self, path: impl AsRef<str>) -> std::io::Result<()> {
        let f = File::create(path.as_ref())?;
        let mut w = BufWriter::new(&f);

        let domain_object = object! {
            "Meshes": JsonValue::from(self.meshes.iter().map(|mesh| mesh.to_json()).collect::<Vec<_>>()),
            "Spaces": JsonValue::from(self.spaces.iter().map(|space| space.to_json(&self.meshes[space.mesh_index()])).collect::<Vec<_>>()),
        };

        domain_object.write_pretty(&mut w, 4)?;

        Ok(())
    }
}

struct IdTracker {
    next_id: usize,
}

impl IdTracker {
    pub fn new(start: usize) -> Self {
        Self { next_id: start }
    }

    pub fn next_id(&mut self) -> usize {
        self.next_id += 1;
        self.next_id - 1
    }

    pub fn next_two_ids(&mut self) -> [usize; 2] {
        let ids = [self.next_id, self.next_id + 1];
        self.next_id += 2;
        ids
    }
}
