use crate::domain::fields::Sample;
use crate::Scalar;

/// Values and Real Space derivatives of a function at the points of a quadrature rule
#[derive(Clone, Debug, Default)]
pub struct Func<T> {
    pub val: Vec<T>,
    pub dx: Vec<T>,
    pub dy: Vec<T>,
}

impl<T: Scalar> Func<T> {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            val: Vec::with_capacity(n),
            dx: Vec::with_capacity(n),
            dy: Vec::with_capacity(n),
        }
    }

    pub fn push(&mut self, sample: Sample<T>) {
        self.val.push(sample.val);
        self.dx.push(sample.dx);
        self.dy.push(sample.dy);
    }

    pub fn len(&self) -> usize {
        self.val.len()
    }

    pub fn is_empty(&self) -> bool {
        self.val.is_empty()
    }
}

/// Real Space coordinates of the quadrature points, and the (coarse) Elem being integrated over
#[derive(Clone, Debug, Default)]
pub struct Geom {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub elem_id: usize,
}

/// A bilinear form `B(u, v)` used to measure errors and norms
///
/// `weights` already include the Real Space area element, so `Σ weights[q] u.val[q] conj(v.val[q])` is the L2 product
/// of `u` and `v` over the integration region.
pub trait ErrorForm<T: Scalar>: Send + Sync {
    fn value(&self, weights: &[f64], u: &Func<T>, v: &Func<T>, geom: &Geom) -> T;

    /// Additional quadrature degree required by the form (e.g. for non-polynomial coefficients)
    fn order_increase(&self) -> usize {
        0
    }
}

impl<T, F> ErrorForm<T> for F
where
    T: Scalar,
    F: Fn(&[f64], &Func<T>, &Func<T>, &Geom) -> T + Send + Sync,
{
    fn value(&self, weights: &[f64], u: &Func<T>, v: &Func<T>, geom: &Geom) -> T {
        self(weights, u, v, geom)
    }
}

/// The H1 product `∫ u v* + ∇u · ∇v*` (used on the diagonal when no other form is supplied)
#[derive(Clone, Copy, Debug, Default)]
pub struct H1Form;

impl<T: Scalar> ErrorForm<T> for H1Form {
    fn value(&self, weights: &[f64], u: &Func<T>, v: &Func<T>, _: &Geom) -> T {
        int_u_v(weights, u, v) + int_grad_u_grad_v(weights, u, v)
    }
}

fn weighted_sum<T, I>(weights: &[f64], terms: I) -> T
where
    T: Scalar,
    I: Iterator<Item = T>,
{
    weights
        .iter()
        .zip(terms)
        .fold(T::from_real(0.0), |acc, (w, term)| acc + term * T::from_real(*w))
}

/// `∫ u v*`
pub fn int_u_v<T: Scalar>(weights: &[f64], u: &Func<T>, v: &Func<T>) -> T {
    weighted_sum(
        weights,
        u.val.iter().zip(v.val.iter()).map(|(u, v)| *u * v.conjugate()),
    )
}

/// `∫ ∇u · ∇v*`
pub fn int_grad_u_grad_v<T: Scalar>(weights: &[f64], u: &Func<T>, v: &Func<T>) -> T {
    int_a_dudx_dvdx_b_dudy_dvdy(1.0, 1.0, weights, u, v)
}

/// `∫ a du/dx dv*/dx + b du/dy dv*/dy`
pub fn int_a_dudx_dvdx_b_dudy_dvdy<T: Scalar>(
    a: f64,
    b: f64,
    weights: &[f64],
    u: &Func<T>,
    v: &Func<T>,
) -> T {
    let (a, b) = (T::from_real(a), T::from_real(b));
    weighted_sum(
        weights,
        (0..u.len()).map(|q| a * u.dx[q] * v.dx[q].conjugate() + b * u.dy[q] * v.dy[q].conjugate()),
    )
}

/// `∫ a du/dx dv*/dy + b du/dy dv*/dx`
pub fn int_a_dudx_dvdy_b_dudy_dvdx<T: Scalar>(
    a: f64,
    b: f64,
    weights: &[f64],
    u: &Func<T>,
    v: &Func<T>,
) -> T {
    let (a, b) = (T::from_real(a), T::from_real(b));
    weighted_sum(
        weights,
        (0..u.len()).map(|q| a * u.dx[q] * v.dy[q].conjugate() + b * u.dy[q] * v.dx[q].conjugate()),
    )
}
