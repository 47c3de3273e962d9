use super::legendre::{eval_prototypes, prototype_indices};
use crate::domain::mesh::Shape;
use crate::domain::space::MAX_POLYNOMIAL_ORDER;
use crate::integration::QuadRule;
use crate::Scalar;

use log::debug;
use nalgebra::{DMatrix, DVector};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::sync::Arc;

static SHARED_CACHE: Lazy<Arc<ProjectionCache>> = Lazy::new(|| Arc::new(ProjectionCache::new()));

/// An H1-orthonormal polynomial basis over a reference domain
///
/// The functions are orthonormal with respect to the reference H1 product
/// ```text
///     (f, g) = ∫∫ f g + ∇f · ∇g
/// ```
/// and hierarchical: the first `shape.num_poly(p)` functions span all polynomials of order `p` on the shape.
/// This lets the H1 projection error of a function onto the space of order `p` be computed as
/// `||f||^2 - Σ_{k < num_fns(p)} |(f, φ_k)|^2`.
///
/// The functions are sampled at the points of a composite [QuadRule] (see [OrthoBasis::rule]) which integrates
/// piecewise polynomials over the four isotropic sub-cells of the reference domain exactly.
#[derive(Debug, Clone)]
pub struct OrthoBasis {
    shape: Shape,
    max_order: u8,
    indices: Vec<[u8; 2]>,
    // row k: coefficients of φ_k with respect to the prototype polynomials (lower triangular)
    coeffs: DMatrix<f64>,
    rule: QuadRule,
    // per function: [values | d/dx | d/dy] at the rule's points
    samples: Vec<Vec<f64>>,
}

impl OrthoBasis {
    /// Orthonormalize the prototype polynomials up to `max_order` (modified Gram–Schmidt, applied twice for stability)
    pub fn build(shape: Shape, max_order: u8) -> Self {
        assert!(
            max_order <= MAX_POLYNOMIAL_ORDER,
            "Projection tables cannot exceed order {} (requested {})!",
            MAX_POLYNOMIAL_ORDER,
            max_order
        );

        let indices = prototype_indices(shape, max_order);
        let n = indices.len();
        let rule = QuadRule::composite(shape, 2 * max_order as usize + 2);
        let nq = rule.len();

        let weights: Vec<f64> = rule.weights.iter().cycle().take(3 * nq).copied().collect();
        let h1 = |a: &[f64], b: &[f64]| -> f64 {
            weights
                .iter()
                .zip(a.iter().zip(b.iter()))
                .map(|(w, (a, b))| w * a * b)
                .sum()
        };

        let mut prototypes = vec![vec![0.0; 3 * nq]; n];
        for (q, point) in rule.points.iter().enumerate() {
            for (k, (value, [dx, dy])) in eval_prototypes(&indices, *point).into_iter().enumerate() {
                prototypes[k][q] = value;
                prototypes[k][nq + q] = dx;
                prototypes[k][2 * nq + q] = dy;
            }
        }

        let mut samples: Vec<Vec<f64>> = Vec::with_capacity(n);
        let mut coeff_rows: Vec<Vec<f64>> = Vec::with_capacity(n);

        for (k, mut fn_samples) in prototypes.into_iter().enumerate() {
            let mut fn_coeffs = vec![0.0; n];
            fn_coeffs[k] = 1.0;

            for _ in 0..2 {
                for j in 0..k {
                    let proj = h1(&fn_samples, &samples[j]);
                    fn_samples
                        .iter_mut()
                        .zip(samples[j].iter())
                        .for_each(|(s, sj)| *s -= proj * sj);
                    fn_coeffs
                        .iter_mut()
                        .zip(coeff_rows[j].iter())
                        .for_each(|(c, cj)| *c -= proj * cj);
                }
            }

            let norm = h1(&fn_samples, &fn_samples).sqrt();
            assert!(
                norm > 1e-10,
                "Prototype polynomial {:?} is linearly dependent on its predecessors!",
                indices[k]
            );

            fn_samples.iter_mut().for_each(|s| *s /= norm);
            fn_coeffs.iter_mut().for_each(|c| *c /= norm);

            samples.push(fn_samples);
            coeff_rows.push(fn_coeffs);
        }

        Self {
            shape,
            max_order,
            coeffs: DMatrix::from_fn(n, n, |r, c| coeff_rows[r][c]),
            indices,
            rule,
            samples,
        }
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn max_order(&self) -> u8 {
        self.max_order
    }

    /// Number of orthonormal functions spanning the space of order `order`
    pub fn num_fns(&self, order: u8) -> usize {
        assert!(
            order <= self.max_order,
            "Order {} exceeds the maximum of this projection table ({})!",
            order,
            self.max_order
        );
        self.shape.num_poly(order)
    }

    /// The rule this table is sampled on
    pub fn rule(&self) -> &QuadRule {
        &self.rule
    }

    /// Value of function `k` at point `q` of [OrthoBasis::rule]
    #[inline]
    pub fn value(&self, k: usize, q: usize) -> f64 {
        self.samples[k][q]
    }

    /// Gradient of function `k` at point `q` of [OrthoBasis::rule]
    #[inline]
    pub fn grad(&self, k: usize, q: usize) -> [f64; 2] {
        let nq = self.rule.len();
        [self.samples[k][nq + q], self.samples[k][2 * nq + q]]
    }

    /// Values and gradients of the first `n` functions at an arbitrary point of the reference domain
    pub fn eval(&self, n: usize, xi: [f64; 2]) -> Vec<(f64, [f64; 2])> {
        assert!(n <= self.indices.len());
        let prototypes = eval_prototypes(&self.indices[..n], xi);

        let values = DVector::from_iterator(n, prototypes.iter().map(|(v, _)| *v));
        let dx = DVector::from_iterator(n, prototypes.iter().map(|(_, g)| g[0]));
        let dy = DVector::from_iterator(n, prototypes.iter().map(|(_, g)| g[1]));

        let c = self.coeffs.slice((0, 0), (n, n));
        let (values, dx, dy) = (&c * &values, &c * &dx, &c * &dy);

        (0..n).map(|k| (values[k], [dx[k], dy[k]])).collect()
    }

    /// H1 inner products `(f, φ_k)` for `k < n`, given samples of `f` (values and gradients) at the points of [OrthoBasis::rule]
    pub fn coefficients<T: Scalar>(&self, n: usize, values: &[T], grads: &[[T; 2]]) -> Vec<T> {
        assert_eq!(values.len(), self.rule.len());
        assert_eq!(grads.len(), self.rule.len());

        (0..n)
            .map(|k| {
                self.rule
                    .weights
                    .iter()
                    .enumerate()
                    .fold(T::from_real(0.0), |acc, (q, w)| {
                        let [gx, gy] = self.grad(k, q);
                        acc + (values[q] * T::from_real(self.value(k, q))
                            + grads[q][0] * T::from_real(gx)
                            + grads[q][1] * T::from_real(gy))
                            * T::from_real(*w)
                    })
            })
            .collect()
    }

    /// Reference H1 norm (squared) of a function sampled at the points of [OrthoBasis::rule]
    pub fn norm_squared<T: Scalar>(&self, values: &[T], grads: &[[T; 2]]) -> f64 {
        self.rule
            .weights
            .iter()
            .zip(values.iter().zip(grads.iter()))
            .map(|(w, (v, [gx, gy]))| {
                w * (v.modulus_squared() + gx.modulus_squared() + gy.modulus_squared())
            })
            .sum()
    }
}

/// Process-wide cache of [OrthoBasis] tables (one per reference shape)
///
/// Tables are built lazily on the first request for a shape; concurrent first requests build the table only once.
/// Once built, tables are immutable and shared through `Arc`s, so [ProjectionCache::free] never invalidates a table
/// which is still in use.
#[derive(Debug)]
pub struct ProjectionCache {
    max_order: u8,
    tables: [RwLock<Option<Arc<OrthoBasis>>>; 2],
}

impl ProjectionCache {
    /// An empty cache whose tables span orders up to [MAX_POLYNOMIAL_ORDER]
    pub fn new() -> Self {
        Self::with_max_order(MAX_POLYNOMIAL_ORDER)
    }

    /// An empty cache with a lower maximum order (tables are cheaper to build)
    pub fn with_max_order(max_order: u8) -> Self {
        assert!(max_order <= MAX_POLYNOMIAL_ORDER);
        Self {
            max_order,
            tables: [RwLock::new(None), RwLock::new(None)],
        }
    }

    /// The lazily initialized process-wide cache
    pub fn shared() -> Arc<Self> {
        SHARED_CACHE.clone()
    }

    pub fn max_order(&self) -> u8 {
        self.max_order
    }

    /// Build the tables for both shapes (if they haven't been built already)
    pub fn build(&self) {
        for shape in [Shape::Tri, Shape::Quad] {
            self.table(shape);
        }
    }

    /// Get the table for a shape, building it if necessary
    ///
    /// Panics if `order` exceeds the cache's maximum order
    pub fn get(&self, shape: Shape, order: u8) -> Arc<OrthoBasis> {
        assert!(
            order <= self.max_order,
            "Projection tables were built up to order {}; order {} was requested!",
            self.max_order,
            order
        );
        self.table(shape)
    }

    pub fn is_built(&self, shape: Shape) -> bool {
        self.tables[shape.index()].read().is_some()
    }

    /// Release all tables
    pub fn free(&self) {
        for table in self.tables.iter() {
            *table.write() = None;
        }
        debug!("projection tables released");
    }

    fn table(&self, shape: Shape) -> Arc<OrthoBasis> {
        {
            let table = self.tables[shape.index()].read();
            if let Some(table) = table.as_ref() {
                return table.clone();
            }
        }

        let mut table = self.tables[shape.index()].write();
        table
            .get_or_insert_with(|| {
                debug!(
                    "building {:?} projection table up to order {}",
                    shape, self.max_order
                );
                Arc::new(OrthoBasis::build(shape, self.max_order))
            })
            .clone()
    }
}

impl Default for ProjectionCache {
    fn default() -> Self {
        Self::new()
    }
}
