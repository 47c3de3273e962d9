use super::{
    mesh::{elem::Elem, geometry::M2D, region::Region, Mesh, Shape},
    Domain,
};
use crate::basis::{OrthoBasis, ProjectionCache};
use crate::Scalar;

use rayon::prelude::*;
use std::sync::Arc;

/// The value and (Real Space) gradient of a function at a point
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sample<T> {
    pub val: T,
    pub dx: T,
    pub dy: T,
}

impl<T: Scalar> Sample<T> {
    pub fn new(val: T, [dx, dy]: [T; 2]) -> Self {
        Self { val, dx, dy }
    }

    pub fn grad(&self) -> [T; 2] {
        [self.dx, self.dy]
    }
}

/// A (piecewise) smooth function defined over the active Elems of a Mesh
///
/// Points are given in the reference coordinates of the base Element of the Elem, so the same point can be used to evaluate
/// functions defined over different refinements of one master Mesh.
pub trait MeshFunction<T: Scalar>: Send + Sync {
    /// The Mesh this function is defined over
    fn mesh(&self) -> &Mesh;

    /// Polynomial order of the function over an active Elem (used to select quadrature rules)
    fn order(&self, elem_id: usize) -> u8;

    /// Evaluate the function over an active Elem
    fn eval(&self, elem_id: usize, base_xi: [f64; 2]) -> Sample<T>;

    /// Evaluate the function at a point of a base Element, locating the active Elem which contains it
    fn eval_at(&self, base_id: usize, base_xi: [f64; 2]) -> Sample<T> {
        let elem_id = self.mesh().locate(base_id, base_xi);
        self.eval(elem_id, base_xi)
    }
}

/// A finite element function over one component of a [Domain]
///
/// Each active Elem carries the coefficients of the function in the H1-orthonormal basis ([OrthoBasis]) of its
/// reference domain, truncated to the Elem's polynomial order. The Solution keeps its own snapshot of the Mesh, so the
/// Domain can be refined while the Solution is still in use (as a reference solution, for example).
#[derive(Clone)]
pub struct Solution<T> {
    mesh: Arc<Mesh>,
    orders: Vec<u8>,
    coeffs: Vec<Vec<T>>,
    tables: [Option<Arc<OrthoBasis>>; 2],
}

impl<T: Scalar> Solution<T> {
    /// H1-project a function onto one component of a Domain (Elem by Elem, in each Elem's reference coordinates)
    pub fn project<F>(domain: &Domain, component: usize, function: &F) -> Self
    where
        F: MeshFunction<T> + ?Sized,
    {
        Self::project_with_cache(&ProjectionCache::shared(), domain, component, function)
    }

    /// [Solution::project] using a specific [ProjectionCache]
    pub fn project_with_cache<F>(
        cache: &ProjectionCache,
        domain: &Domain,
        component: usize,
        function: &F,
    ) -> Self
    where
        F: MeshFunction<T> + ?Sized,
    {
        let mesh = Arc::new(domain.mesh_of(component).clone());
        let space = &domain.spaces[component];
        let tables = shape_tables(cache, &mesh);

        let projected: Vec<(usize, u8, Vec<T>)> = mesh
            .active_elems()
            .collect::<Vec<_>>()
            .into_par_iter()
            .map(|elem| {
                let order = space.order(elem.id).min(cache.max_order());
                let table = cache.get(elem.shape, order);
                let (values, grads) =
                    sample_on_cell(&table, elem, &Region::reference(elem.shape), function);
                (elem.id, order, table.coefficients(table.num_fns(order), &values, &grads))
            })
            .collect();

        let mut orders = vec![0; mesh.elems.len()];
        let mut coeffs = vec![Vec::new(); mesh.elems.len()];
        for (elem_id, order, elem_coeffs) in projected {
            orders[elem_id] = order;
            coeffs[elem_id] = elem_coeffs;
        }

        Self {
            mesh,
            orders,
            coeffs,
            tables,
        }
    }

    /// The coefficients of the function over an active Elem
    pub fn coefficients(&self, elem_id: usize) -> &[T] {
        &self.coeffs[elem_id]
    }
}

impl<T: Scalar> MeshFunction<T> for Solution<T> {
    fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    fn order(&self, elem_id: usize) -> u8 {
        self.orders[elem_id]
    }

    fn eval(&self, elem_id: usize, base_xi: [f64; 2]) -> Sample<T> {
        let elem = &self.mesh.elems[elem_id];
        assert!(
            elem.is_active(),
            "Solutions can only be evaluated over active Elems (Elem {} is not active)!",
            elem_id
        );

        let xi = elem.from_base(base_xi);
        let coeffs = &self.coeffs[elem_id];
        let fns = match &self.tables[elem.shape.index()] {
            Some(table) => table.eval(coeffs.len(), xi),
            None => Vec::new(),
        };

        let mut val = T::from_real(0.0);
        let mut grad_ref = [T::from_real(0.0); 2];
        for (c, (f, [fx, fy])) in coeffs.iter().zip(fns) {
            val += *c * T::from_real(f);
            grad_ref[0] += *c * T::from_real(fx);
            grad_ref[1] += *c * T::from_real(fy);
        }

        let jac_inv_t = elem.jacobian(xi).inverse().transpose();
        Sample::new(val, transform(&jac_inv_t, grad_ref))
    }
}

/// An analytic function `(x, y) -> (u, [du/dx, du/dy])` over a Mesh
///
/// The order is used as a quadrature hint when the function takes part in an integral.
#[derive(Clone)]
pub struct ExactSolution<F> {
    mesh: Arc<Mesh>,
    order: u8,
    function: F,
}

impl<F> ExactSolution<F> {
    pub fn new(mesh: Arc<Mesh>, order: u8, function: F) -> Self {
        Self {
            mesh,
            order,
            function,
        }
    }
}

impl<T, F> MeshFunction<T> for ExactSolution<F>
where
    T: Scalar,
    F: Fn(f64, f64) -> (T, [T; 2]) + Send + Sync,
{
    fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    fn order(&self, _: usize) -> u8 {
        self.order
    }

    fn eval(&self, elem_id: usize, base_xi: [f64; 2]) -> Sample<T> {
        let point = self.mesh.elems[elem_id].element.map(base_xi);
        let (val, grad) = (self.function)(point.x, point.y);
        Sample::new(val, grad)
    }
}

/// Sample a function at the points of a table's rule mapped onto a cell of an Elem
///
/// `cell` is expressed in the Elem's reference coordinates. Gradients are returned with respect to the cell's own
/// reference coordinates.
pub(crate) fn sample_on_cell<T, F>(
    table: &OrthoBasis,
    elem: &Elem,
    cell: &Region,
    function: &F,
) -> (Vec<T>, Vec<[T; 2]>)
where
    T: Scalar,
    F: MeshFunction<T> + ?Sized,
{
    let cell_jac = cell.jacobian();
    table
        .rule()
        .points
        .iter()
        .map(|cell_xi| {
            let xi = cell.to_parent(*cell_xi);
            let sample = function.eval_at(elem.element.id, elem.to_base(xi));
            let jac_t = (elem.jacobian(xi) * cell_jac).transpose();
            (sample.val, transform(&jac_t, sample.grad()))
        })
        .unzip()
}

/// Apply a (real) 2x2 matrix to a vector of scalars
pub(crate) fn transform<T: Scalar>(m: &M2D, [a, b]: [T; 2]) -> [T; 2] {
    [
        a * T::from_real(m.u[0]) + b * T::from_real(m.u[1]),
        a * T::from_real(m.v[0]) + b * T::from_real(m.v[1]),
    ]
}

fn shape_tables(cache: &ProjectionCache, mesh: &Mesh) -> [Option<Arc<OrthoBasis>>; 2] {
    let mut tables = [None, None];
    for shape in [Shape::Tri, Shape::Quad] {
        if mesh.active_elems().any(|elem| elem.shape == shape) {
            tables[shape.index()] = Some(cache.get(shape, cache.max_order()));
        }
    }
    tables
}
