use crate::domain::mesh::Shape;
use smallvec::SmallVec;

/// Values and first derivatives of the Legendre polynomials `L_0 ..= L_n` at `x`
///
/// Computed with the three-term recurrence:
/// ```text
///     (k + 1) L_{k+1}(x) = (2k + 1) x L_k(x) - k L_{k-1}(x)
///     L'_{k+1}(x) = L'_{k-1}(x) + (2k + 1) L_k(x)
/// ```
pub fn legendre(n: usize, x: f64) -> (SmallVec<[f64; 12]>, SmallVec<[f64; 12]>) {
    let mut values = SmallVec::with_capacity(n + 1);
    let mut derivs = SmallVec::with_capacity(n + 1);

    values.push(1.0);
    derivs.push(0.0);
    if n > 0 {
        values.push(x);
        derivs.push(1.0);
    }

    for k in 1..n {
        let k_ = k as f64;
        values.push(((2.0 * k_ + 1.0) * x * values[k] - k_ * values[k - 1]) / (k_ + 1.0));
        derivs.push(derivs[k - 1] + (2.0 * k_ + 1.0) * values[k]);
    }

    (values, derivs)
}

/// Exponent pairs `[i, j]` of the prototype polynomials `L_i(x) L_j(y)` spanning the space of order `p` on a shape
///
/// * Quadrilaterals: `Q_p`, all pairs with `max(i, j) <= p`
/// * Triangles: `P_p`, all pairs with `i + j <= p`
///
/// The pairs are sorted hierarchically: the first `shape.num_poly(q)` entries span the space of order `q` for every `q <= p`.
pub fn prototype_indices(shape: Shape, p: u8) -> Vec<[u8; 2]> {
    let mut indices = Vec::with_capacity(shape.num_poly(p));

    for q in 0..=p {
        match shape {
            Shape::Quad => {
                for i in 0..=q {
                    indices.push([i, q]);
                }
                for j in (0..q).rev() {
                    indices.push([q, j]);
                }
            }
            Shape::Tri => {
                for i in 0..=q {
                    indices.push([i, q - i]);
                }
            }
        }
    }

    indices
}

/// Values and gradients of the first `indices.len()` prototype polynomials at a point
pub fn eval_prototypes(indices: &[[u8; 2]], [x, y]: [f64; 2]) -> Vec<(f64, [f64; 2])> {
    let max_deg = indices
        .iter()
        .map(|[i, j]| (*i).max(*j))
        .max()
        .unwrap_or(0) as usize;

    let (lx, dlx) = legendre(max_deg, x);
    let (ly, dly) = legendre(max_deg, y);

    indices
        .iter()
        .map(|[i, j]| {
            let (i, j) = (*i as usize, *j as usize);
            (lx[i] * ly[j], [dlx[i] * ly[j], lx[i] * dly[j]])
        })
        .collect()
}
