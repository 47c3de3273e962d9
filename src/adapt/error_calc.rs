use super::forms::{ErrorForm, Func, Geom};
use crate::domain::{
    fields::{MeshFunction, Sample},
    mesh::{elem::Elem, region::Region, Mesh},
};
use crate::integration::QuadRule;
use crate::Scalar;

use smallvec::SmallVec;

/// A leaf of the union of several Meshes: a Region (in base Element coordinates) and the active Elem of each Mesh covering it
pub type UnionLeaf = (Region, SmallVec<[usize; 4]>);

/// Traverse the union of several refinements of one master Mesh over a Region of a base Element
///
/// Returns the coarsest partition of `region` on which every Mesh has a single active Elem.
pub fn union_leaves(meshes: &[&Mesh], base_id: usize, region: Region) -> Vec<UnionLeaf> {
    let mut leaves = Vec::new();
    collect_leaves(meshes, base_id, region, &mut leaves);
    leaves
}

fn collect_leaves(meshes: &[&Mesh], base_id: usize, region: Region, leaves: &mut Vec<UnionLeaf>) {
    let containing: SmallVec<[usize; 4]> = meshes
        .iter()
        .map(|mesh| mesh.find_containing(base_id, &region))
        .collect();

    let split_by = meshes
        .iter()
        .zip(containing.iter())
        .find(|(mesh, elem_id)| !mesh.elems[**elem_id].is_active());

    match split_by {
        None => leaves.push((region, containing)),
        Some((mesh, elem_id)) => {
            for son_id in mesh.elems[*elem_id].son_ids().unwrap_or(&[]) {
                if let Some(sub_region) = region.intersect(&mesh.elems[*son_id].region) {
                    collect_leaves(meshes, base_id, sub_region, leaves);
                }
            }
        }
    }
}

/// `B(u_i - ur_i, u_j - ur_j)` over an Elem, where `u` are coarse and `ur` are reference solutions
pub fn eval_error<T: Scalar>(
    form: &dyn ErrorForm<T>,
    sln_i: &dyn MeshFunction<T>,
    sln_j: &dyn MeshFunction<T>,
    rsln_i: &dyn MeshFunction<T>,
    rsln_j: &dyn MeshFunction<T>,
    elem: &Elem,
) -> T {
    integrate(form, &[sln_i, rsln_i], &[sln_j, rsln_j], elem)
}

/// `B(ur_i, ur_j)` over an Elem, where `ur` are reference solutions
pub fn eval_norm<T: Scalar>(
    form: &dyn ErrorForm<T>,
    rsln_i: &dyn MeshFunction<T>,
    rsln_j: &dyn MeshFunction<T>,
    elem: &Elem,
) -> T {
    integrate(form, &[rsln_i], &[rsln_j], elem)
}

// `u` and `v` are either a single function or a difference of two functions
fn integrate<T: Scalar>(
    form: &dyn ErrorForm<T>,
    u: &[&dyn MeshFunction<T>],
    v: &[&dyn MeshFunction<T>],
    elem: &Elem,
) -> T {
    let functions: SmallVec<[&dyn MeshFunction<T>; 4]> = u.iter().chain(v.iter()).copied().collect();
    let meshes: SmallVec<[&Mesh; 4]> = functions.iter().map(|f| f.mesh()).collect();
    let element = &elem.element;

    let mut total = T::from_real(0.0);
    for (region, elem_ids) in union_leaves(&meshes, element.id, elem.region) {
        let order = |fns: std::ops::Range<usize>| {
            fns.map(|k| functions[k].order(elem_ids[k]) as usize)
                .max()
                .unwrap_or(0)
        };
        let degree = order(0..u.len())
            + order(u.len()..functions.len())
            + element.order_increase()
            + form.order_increase();

        let rule = QuadRule::for_degree(elem.shape, degree).mapped(&region);
        let n = rule.len();

        let mut weights = Vec::with_capacity(n);
        let mut geom = Geom {
            x: Vec::with_capacity(n),
            y: Vec::with_capacity(n),
            elem_id: elem.id,
        };
        let (mut u_samples, mut v_samples) = (Func::with_capacity(n), Func::with_capacity(n));

        for (base_xi, w) in rule.points.iter().zip(rule.weights.iter()) {
            weights.push(w * element.jacobian(*base_xi).det().abs());

            let point = element.map(*base_xi);
            geom.x.push(point.x);
            geom.y.push(point.y);

            let mut samples = functions
                .iter()
                .zip(elem_ids.iter())
                .map(|(f, id)| f.eval(*id, *base_xi));

            u_samples.push(difference(samples.by_ref().take(u.len())));
            v_samples.push(difference(samples));
        }

        total += form.value(&weights, &u_samples, &v_samples, &geom);
    }

    total
}

fn difference<T: Scalar>(mut samples: impl Iterator<Item = Sample<T>>) -> Sample<T> {
    let mut diff = match samples.next() {
        Some(first) => first,
        None => return Sample::new(T::from_real(0.0), [T::from_real(0.0); 2]),
    };
    for s in samples {
        diff.val -= s.val;
        diff.dx -= s.dx;
        diff.dy -= s.dy;
    }
    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapt::forms::{int_u_v, H1Form};
    use crate::domain::{
        fields::{ExactSolution, Solution},
        mesh::h_refinement::HRef,
        Domain,
    };
    use std::sync::Arc;

    #[test]
    fn union_of_anisotropic_refinements() {
        let mut horizontal = Mesh::rectangle([0.0, 1.0], [0.0, 1.0], 1, 1).unwrap();
        let mut vertical = horizontal.clone();
        horizontal.refine_element(0, HRef::AnisoH).unwrap();
        vertical.refine_element(0, HRef::AnisoV).unwrap();

        let leaves = union_leaves(&[&horizontal, &vertical], 0, horizontal.elems[0].region);
        assert_eq!(leaves.len(), 4);

        let area: f64 = leaves.iter().map(|(region, _)| region.area()).sum();
        assert!((area - 4.0).abs() < 1e-14);

        // every leaf is covered by one son of each Mesh
        for (_, ids) in leaves.iter() {
            assert!(horizontal.elems[ids[0]].is_active());
            assert!(vertical.elems[ids[1]].is_active());
        }
    }

    #[test]
    fn union_within_an_active_elem() {
        let coarse = Mesh::rectangle_tris([0.0, 1.0], [0.0, 1.0], 1, 1).unwrap();
        let mut fine = coarse.clone();
        fine.refine_all().unwrap();
        fine.refine_element(fine.elems[0].son_ids().unwrap()[3], HRef::Iso).unwrap();

        let leaves = union_leaves(&[&coarse, &fine], 0, coarse.elems[0].region);
        assert_eq!(leaves.len(), 7);
        assert!(leaves.iter().all(|(_, ids)| ids[0] == 0));
    }

    #[test]
    fn norms_and_errors() {
        let mesh = Mesh::rectangle([0.0, 2.0], [0.0, 1.0], 1, 1).unwrap();
        let domain = Domain::single_mesh(mesh, 1, 1).unwrap();
        let reference = domain.reference(1).unwrap();

        let f = |x: f64, y: f64| (x * y, [y, x]);
        let exact = ExactSolution::new(Arc::new(reference.meshes[0].clone()), 2, f);
        let sln: Solution<f64> = Solution::project(&domain, 0, &exact);
        let rsln: Solution<f64> = Solution::project(&reference, 0, &exact);

        let elem = &domain.meshes[0].elems[0];

        // ∫∫ (xy)^2 + y^2 + x^2 over [0, 2] x [0, 1]
        let expected = 8.0 / 9.0 + 2.0 / 3.0 + 8.0 / 3.0;
        let norm = eval_norm::<f64>(&H1Form, &rsln, &rsln, elem);
        assert!((norm - expected).abs() < 1e-10);

        // xy is bilinear, so the coarse projection is exact
        let err = eval_error::<f64>(&H1Form, &sln, &sln, &rsln, &rsln, elem);
        assert!(err.abs() < 1e-12);

        let mass = |w: &[f64], u: &Func<f64>, v: &Func<f64>, _: &Geom| int_u_v(w, u, v);
        let mass_norm = eval_norm::<f64>(&mass, &exact, &exact, elem);
        assert!((mass_norm - 8.0 / 9.0).abs() < 1e-12);
    }
}
