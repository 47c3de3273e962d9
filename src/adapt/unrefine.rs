use super::{AdaptError, ErrorRecord, HpAdapt};
use crate::domain::{mesh::Mesh, Domain};
use crate::Scalar;

use log::{debug, info};
use smallvec::SmallVec;
use std::collections::BTreeSet;

impl<T: Scalar + 'static> HpAdapt<T> {
    /// Coarsen the parts of the Domain whose errors are negligible
    ///
    /// Walks the element errors from the smallest upwards (relative to the largest element error `max`):
    /// * a parent whose sons are all active and free of hanging nodes is merged back when the summed error of its sons
    ///   is below `threshold * max` in every component sharing the Mesh (it receives the largest order of its sons)
    /// * every other active element with an error below `threshold / 4 * max` loses one polynomial order (down to `1`)
    ///
    /// Returns the number of merges and order decrements. Consumes the element errors like [HpAdapt::adapt].
    pub fn unrefine(&mut self, domain: &mut Domain, threshold: f64) -> Result<usize, AdaptError> {
        let record = self.take_errors(domain)?;
        let max_error = record.max_error();

        let mut num_merged = 0;
        for mesh_idx in 0..domain.meshes.len() {
            let components = domain.components_on_mesh(mesh_idx);
            if components.is_empty() {
                continue;
            }

            for (parent_id, _) in merge_candidates(&domain.meshes[mesh_idx], &record, &components) {
                let mesh = &domain.meshes[mesh_idx];
                let sons: SmallVec<[usize; 4]> = match mesh.elems[parent_id].son_ids() {
                    Some(ids) => ids.iter().copied().collect(),
                    None => continue,
                };

                // earlier merges may have changed the neighborhood
                let mergeable = sons
                    .iter()
                    .all(|son| mesh.is_active(*son) && !mesh.has_hanging_nodes(*son));
                let negligible = components.iter().all(|comp| {
                    summed_error(&record, *comp, &sons).map_or(false, |err| err < threshold * max_error)
                });
                if !mergeable || !negligible {
                    continue;
                }

                let orders: SmallVec<[(usize, u8); 2]> = components
                    .iter()
                    .map(|comp| {
                        let max_son_order = sons
                            .iter()
                            .map(|son| domain.spaces[*comp].order(*son))
                            .max()
                            .unwrap_or(1);
                        (*comp, max_son_order)
                    })
                    .collect();

                domain.meshes[mesh_idx].unrefine_element(parent_id)?;
                domain.sync_spaces(mesh_idx);
                for (comp, order) in orders {
                    domain.spaces[comp].set_order(parent_id, order)?;
                }

                debug!("merged the sons {:?} of Elem {} on Mesh {}", sons, parent_id, mesh_idx);
                num_merged += 1;
            }
        }

        let mut num_decreased = 0;
        for (comp, elem_id) in record.sorted.iter().rev() {
            if !domain.mesh_of(*comp).is_active(*elem_id) {
                continue;
            }
            let err = record.elem_errors[&(*comp, *elem_id)];
            if err >= threshold / 4.0 * max_error {
                break;
            }

            let order = domain.spaces[*comp].order(*elem_id);
            if order > 1 {
                domain.spaces[*comp].set_order(*elem_id, order - 1)?;
                debug!("decreased the order of Elem {} of component {} to {}", elem_id, comp, order - 1);
                num_decreased += 1;
            }
        }

        let ndofs = domain.assign_dofs();
        info!(
            "unrefinement: {} merges, {} order decrements; {} unknowns",
            num_merged, num_decreased, ndofs
        );

        Ok(num_merged + num_decreased)
    }
}

// parents of active Elems, ordered by the summed error of their sons (smallest first)
fn merge_candidates(mesh: &Mesh, record: &ErrorRecord, components: &[usize]) -> Vec<(usize, f64)> {
    let parents: BTreeSet<usize> = mesh
        .active_elems()
        .filter_map(|elem| elem.parent_id())
        .collect();

    let mut candidates: Vec<(usize, f64)> = parents
        .into_iter()
        .filter_map(|parent_id| {
            let sons = mesh.elems[parent_id].son_ids()?;
            components
                .iter()
                .map(|comp| summed_error(record, *comp, sons))
                .sum::<Option<f64>>()
                .map(|err| (parent_id, err))
        })
        .collect();

    candidates.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
    candidates
}

// `None` if one of the sons had no error (it wasn't active when the errors were computed)
fn summed_error(record: &ErrorRecord, component: usize, sons: &[usize]) -> Option<f64> {
    sons.iter().map(|son| record.error(component, *son)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        fields::{ExactSolution, Solution},
        mesh::h_refinement::HRef,
    };
    use std::sync::Arc;

    // a bump in the top-right corner of the unit square
    fn corner_bump(x: f64, y: f64) -> (f64, [f64; 2]) {
        let e = (-30.0 * ((x - 0.8).powi(2) + (y - 0.8).powi(2))).exp();
        (e, [-60.0 * (x - 0.8) * e, -60.0 * (y - 0.8) * e])
    }

    fn calc_errors(hp: &mut HpAdapt<f64>, domain: &Domain) {
        let reference = domain.reference(1).unwrap();
        let exact = ExactSolution::new(Arc::new(reference.meshes[0].clone()), 6, corner_bump);
        let sln: Solution<f64> = Solution::project(domain, 0, &exact);
        let rsln: Solution<f64> = Solution::project(&reference, 0, &exact);
        hp.calc_error(domain, &sln, &rsln).unwrap();
    }

    fn square_domain(order: u8) -> Domain {
        Domain::single_mesh(Mesh::rectangle([0.0, 1.0], [0.0, 1.0], 2, 2).unwrap(), 1, order).unwrap()
    }

    #[test]
    fn unrefine_requires_errors() {
        let mut domain = square_domain(1);
        let mut hp = HpAdapt::<f64>::new(1);
        assert!(matches!(hp.unrefine(&mut domain, 0.5), Err(AdaptError::ErrorsNotComputed)));

        calc_errors(&mut hp, &domain);
        hp.unrefine(&mut domain, 0.5).unwrap();
        assert!(matches!(hp.unrefine(&mut domain, 0.5), Err(AdaptError::ErrorsNotComputed)));
    }

    #[test]
    fn merges_over_refined_elements() {
        let mut domain = square_domain(2);
        domain.meshes[0].refine_element(0, HRef::Iso).unwrap();
        domain.sync_spaces(0);
        domain.assign_dofs();
        assert_eq!(domain.num_active_elems(), 7);

        let mut hp = HpAdapt::<f64>::new(1);
        calc_errors(&mut hp, &domain);
        let ops = hp.unrefine(&mut domain, 0.5).unwrap();

        assert!(ops >= 1);
        assert_eq!(domain.num_active_elems(), 4);
        assert!(domain.meshes[0].is_active(0));
        assert_eq!(domain.spaces[0].order(0), 2);
        assert_eq!(domain.num_dofs(), domain.spaces[0].num_dofs());
    }

    #[test]
    fn keeps_significant_refinements() {
        let mut domain = square_domain(1);
        domain.meshes[0].refine_element(3, HRef::Iso).unwrap();
        domain.sync_spaces(0);

        let mut hp = HpAdapt::<f64>::new(1);
        calc_errors(&mut hp, &domain);
        hp.unrefine(&mut domain, 0.5).unwrap();

        // the sons around the bump hold the largest error
        assert!(!domain.meshes[0].is_active(3));
        assert_eq!(domain.num_active_elems(), 7);
    }

    #[test]
    fn decreases_orders_of_small_errors() {
        let mut domain = square_domain(3);
        let mut hp = HpAdapt::<f64>::new(1);
        calc_errors(&mut hp, &domain);

        let ops = hp.unrefine(&mut domain, 1.0).unwrap();
        assert!(ops >= 1);
        assert_eq!(domain.num_active_elems(), 4);

        // the largest error is never below a fraction of itself
        assert_eq!(domain.spaces[0].order(3), 3);
        assert_eq!(domain.spaces[0].order(0), 2);
    }
}
