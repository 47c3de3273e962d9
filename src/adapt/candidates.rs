use crate::basis::{OrthoBasis, ProjectionCache};
use crate::domain::{
    fields::{sample_on_cell, MeshFunction},
    mesh::{elem::Elem, h_refinement::HRef, region::Region, Shape},
};
use crate::Scalar;

use log::trace;
use smallvec::SmallVec;
use std::cmp::Ordering;

/// Number of orders above the current one tried by pure p-refinement candidates
pub const P_CANDIDATE_SPAN: u8 = 3;

/// Number of orders tried for each son of a split candidate
const SON_ORDER_SPAN: u8 = 2;

// errors below this fraction of the Elem's norm are round-off
const EXACT_TOLERANCE: f64 = 1e-12;
// lower bound of the unknowns a candidate is charged for
const DOF_EPSILON: f64 = 1.0;

/// The refinement chosen for one Elem
///
/// Son orders are listed in the son ordering of the corresponding [HRef].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Refinement {
    None,
    P(u8),
    Iso([u8; 4]),
    AnisoH([u8; 2]),
    AnisoV([u8; 2]),
}

impl Refinement {
    /// The h-refinement carried out by this Refinement (if any)
    pub fn h_refinement(&self) -> Option<HRef> {
        match self {
            Self::None | Self::P(_) => None,
            Self::Iso(_) => Some(HRef::Iso),
            Self::AnisoH(_) => Some(HRef::AnisoH),
            Self::AnisoV(_) => Some(HRef::AnisoV),
        }
    }

    /// Orders of the sons (empty if the Elem is not split)
    pub fn son_orders(&self) -> &[u8] {
        match self {
            Self::None | Self::P(_) => &[],
            Self::Iso(orders) => orders,
            Self::AnisoH(orders) | Self::AnisoV(orders) => orders,
        }
    }

    /// Tie-break rank; lower ranks are preferred between equally scored candidates
    fn rank(&self) -> u8 {
        match self {
            Self::None | Self::P(_) => 0,
            Self::Iso(_) => 1,
            Self::AnisoH(_) => 2,
            Self::AnisoV(_) => 3,
        }
    }
}

/// Filters applied to the candidate set
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CandidateOptions {
    /// Cap on every candidate order
    pub max_order: u8,
    /// Don't consider anisotropic splits
    pub iso_only: bool,
    /// Don't consider pure p-refinements; split candidates keep the current order on every son
    pub h_only: bool,
}

impl Default for CandidateOptions {
    fn default() -> Self {
        Self {
            max_order: crate::domain::space::MAX_POLYNOMIAL_ORDER,
            iso_only: false,
            h_only: false,
        }
    }
}

/// A scored refinement candidate
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Candidate {
    pub refinement: Refinement,
    /// Squared projection error of the reference solution onto the candidate space
    pub error: f64,
    /// Size of the candidate's local space
    pub dofs: usize,
    /// Orders of magnitude of error removed per added unknown
    pub score: f64,
}

/// Projection errors of the reference solution over one cell (the Elem itself or a son) for increasing orders
struct CellErrors {
    // cumulative |c_k|^2
    captured: Vec<f64>,
    norm: f64,
}

impl CellErrors {
    fn new<T, R>(table: &OrthoBasis, elem: &Elem, cell: &Region, max_order: u8, rsln: &R) -> Self
    where
        T: Scalar,
        R: MeshFunction<T> + ?Sized,
    {
        let (values, grads) = sample_on_cell(table, elem, cell, rsln);
        let coeffs = table.coefficients(table.num_fns(max_order), &values, &grads);

        let captured = coeffs
            .iter()
            .scan(0.0, |acc, c| {
                *acc += c.modulus_squared();
                Some(*acc)
            })
            .collect();

        Self {
            captured,
            norm: table.norm_squared(&values, &grads),
        }
    }

    fn error(&self, shape: Shape, order: u8) -> f64 {
        let n = shape.num_poly(order).min(self.captured.len());
        (self.norm - self.captured[n - 1]).max(0.0)
    }
}

/// Score every refinement candidate of an Elem against a reference solution
///
/// Candidates are returned best first. The reference solution is projected (in the reference H1 product) onto:
/// * the Elem itself at orders `order + 1 ..= order + P_CANDIDATE_SPAN` (pure p-refinement)
/// * the four isotropic sons, each with an order in `max(1, (order + 1) / 2) ..= + 2`
/// * the two sons of either anisotropic split (quadrilaterals only)
///
/// Son errors are weighted by their share of the Elem's reference area. Candidates are scored by the error they remove
/// per added unknown, `(current_error - error) / max(dofs - current_dofs, 1)`; ties go to fewer unknowns, then to
/// p-refinement, then to isotropic splits, then to horizontal splits.
pub fn analyze<T, R>(
    cache: &ProjectionCache,
    elem: &Elem,
    order: u8,
    rsln: &R,
    options: &CandidateOptions,
) -> Vec<Candidate>
where
    T: Scalar,
    R: MeshFunction<T> + ?Sized,
{
    let max_order = options.max_order.clamp(1, cache.max_order());
    let table = cache.get(elem.shape, max_order);
    let shape = elem.shape;
    let whole = Region::reference(shape);

    let current_order = order.clamp(1, table.max_order());
    let parent = CellErrors::new(&table, elem, &whole, table.max_order(), rsln);
    if parent.norm <= 0.0 {
        return vec![Candidate {
            refinement: Refinement::None,
            error: 0.0,
            dofs: shape.num_poly(current_order),
            score: 0.0,
        }];
    }

    let floored = |error: f64| if error < EXACT_TOLERANCE * parent.norm { 0.0 } else { error };

    let current_dofs = shape.num_poly(current_order);
    let current_error = floored(parent.error(shape, current_order));
    let score =
        |error: f64, dofs: usize| (current_error - error) / (dofs as f64 - current_dofs as f64).max(DOF_EPSILON);

    let mut candidates = vec![Candidate {
        refinement: Refinement::None,
        error: current_error,
        dofs: current_dofs,
        score: 0.0,
    }];

    // pure p-refinements
    if !options.h_only {
        for p in (current_order + 1)..=(current_order.saturating_add(P_CANDIDATE_SPAN)).min(max_order) {
            let error = floored(parent.error(shape, p));
            let dofs = shape.num_poly(p);
            candidates.push(Candidate {
                refinement: Refinement::P(p),
                error,
                dofs,
                score: score(error, dofs),
            });
        }
    }

    // splits
    let son_orders: Vec<u8> = if options.h_only {
        vec![current_order.min(max_order)]
    } else {
        let lo = ((current_order + 1) / 2).clamp(1, max_order);
        (lo..=lo.saturating_add(SON_ORDER_SPAN).min(max_order)).collect()
    };
    let highest_son_order = son_orders.iter().copied().max().unwrap_or(1);

    let mut splits = vec![HRef::Iso];
    if shape == Shape::Quad && !options.iso_only {
        splits.extend([HRef::AnisoH, HRef::AnisoV]);
    }

    for href in splits {
        let sons: SmallVec<[(f64, CellErrors); 4]> = whole
            .split(href)
            .iter()
            .map(|son| {
                (
                    son.area() / whole.area(),
                    CellErrors::new(&table, elem, son, highest_son_order, rsln),
                )
            })
            .collect();

        for orders in son_order_combinations(&son_orders, sons.len()) {
            let error = floored(
                sons.iter()
                    .zip(orders.iter())
                    .map(|((share, son), p)| share * son.error(shape, *p))
                    .sum(),
            );
            let dofs: usize = orders.iter().map(|p| shape.num_poly(*p)).sum();

            let refinement = match href {
                HRef::Iso => Refinement::Iso([orders[0], orders[1], orders[2], orders[3]]),
                HRef::AnisoH => Refinement::AnisoH([orders[0], orders[1]]),
                HRef::AnisoV => Refinement::AnisoV([orders[0], orders[1]]),
            };

            candidates.push(Candidate {
                refinement,
                error,
                dofs,
                score: score(error, dofs),
            });
        }
    }

    candidates.sort_by(compare_candidates);

    if log::log_enabled!(log::Level::Trace) {
        for c in candidates.iter().take(5) {
            trace!(
                "Elem {}: {:?} (error {:.3e}, dofs {}, score {:.4})",
                elem.id,
                c.refinement,
                c.error,
                c.dofs,
                c.score
            );
        }
    }

    candidates
}

/// The locally optimal refinement of an Elem with respect to a reference solution (see [analyze])
///
/// Returns [Refinement::None] when no candidate reduces the projection error.
pub fn get_optimal_refinement<T, R>(
    cache: &ProjectionCache,
    elem: &Elem,
    order: u8,
    rsln: &R,
    options: &CandidateOptions,
) -> Refinement
where
    T: Scalar,
    R: MeshFunction<T> + ?Sized,
{
    analyze(cache, elem, order, rsln, options)
        .into_iter()
        .find(|candidate| candidate.score > 0.0)
        .map_or(Refinement::None, |candidate| candidate.refinement)
}

fn compare_candidates(a: &Candidate, b: &Candidate) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then(a.dofs.cmp(&b.dofs))
        .then(a.refinement.rank().cmp(&b.refinement.rank()))
}

fn son_order_combinations(orders: &[u8], num_sons: usize) -> Vec<SmallVec<[u8; 4]>> {
    let mut combinations: Vec<SmallVec<[u8; 4]>> = vec![SmallVec::new()];
    for _ in 0..num_sons {
        combinations = combinations
            .into_iter()
            .flat_map(|partial| {
                orders.iter().map(move |p| {
                    let mut next = partial.clone();
                    next.push(*p);
                    next
                })
            })
            .collect();
    }
    combinations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{fields::ExactSolution, mesh::Mesh};
    use approx::assert_relative_eq;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn unit_square() -> Arc<Mesh> {
        Arc::new(Mesh::rectangle([0.0, 1.0], [0.0, 1.0], 1, 1).unwrap())
    }

    fn cache() -> Arc<ProjectionCache> {
        ProjectionCache::shared()
    }

    #[test]
    fn cubic_needs_cubic_candidates() {
        let mesh = unit_square();
        let exact = ExactSolution::new(mesh.clone(), 3, |x: f64, y: f64| {
            (
                x.powi(3) - 2.0 * x * y * y + y,
                [3.0 * x * x - 2.0 * y * y, 1.0 - 4.0 * x * y],
            )
        });

        let candidates = analyze::<f64, _>(&cache(), &mesh.elems[0], 1, &exact, &CandidateOptions::default());
        let chosen =
            get_optimal_refinement::<f64, _>(&cache(), &mesh.elems[0], 1, &exact, &CandidateOptions::default());
        assert_ne!(chosen, Refinement::None);
        assert_eq!(chosen, candidates[0].refinement);

        // only cubic candidates represent the solution exactly
        let min_error = candidates.iter().map(|c| c.error).fold(f64::INFINITY, f64::min);
        assert_eq!(min_error, 0.0);
        for c in candidates.iter().filter(|c| c.error == min_error) {
            match c.refinement {
                Refinement::P(p) => assert!(p >= 3),
                other => assert!(other.son_orders().iter().all(|p| *p >= 3), "{:?}", other),
            }
        }

        // from a quadratic, the cubic p-refinement removes the whole error with the fewest unknowns
        let from_quadratic =
            get_optimal_refinement::<f64, _>(&cache(), &mesh.elems[0], 2, &exact, &CandidateOptions::default());
        assert_eq!(from_quadratic, Refinement::P(3));
    }

    #[test]
    fn scores_are_error_reduction_per_unknown() {
        let mesh = unit_square();
        let exact = ExactSolution::new(mesh.clone(), 6, |x: f64, y: f64| {
            ((x + 2.0 * y).sin(), [(x + 2.0 * y).cos(), 2.0 * (x + 2.0 * y).cos()])
        });

        let candidates = analyze::<f64, _>(&cache(), &mesh.elems[0], 2, &exact, &CandidateOptions::default());
        let none = candidates.iter().find(|c| c.refinement == Refinement::None).unwrap();
        assert_eq!(none.dofs, 9);
        assert_eq!(none.score, 0.0);
        assert!(none.error > 0.0);

        for c in candidates.iter() {
            let added = (c.dofs as f64 - none.dofs as f64).max(1.0);
            assert_relative_eq!(c.score, (none.error - c.error) / added, max_relative = 1e-12, epsilon = 1e-300);
        }

        // fewer sons than unknowns removed still divide by one
        let coarse = candidates
            .iter()
            .find(|c| c.refinement == Refinement::AnisoH([1, 1]))
            .unwrap();
        assert_eq!(coarse.dofs, 8);
        assert_relative_eq!(coarse.score, none.error - coarse.error, max_relative = 1e-12, epsilon = 1e-300);
    }

    #[test]
    fn exact_representations_are_not_refined() {
        let mesh = unit_square();
        let exact = ExactSolution::new(mesh.clone(), 2, |x: f64, y: f64| {
            (x * x * y + 1.0, [2.0 * x * y, x * x])
        });

        let candidates = analyze::<f64, _>(&cache(), &mesh.elems[0], 2, &exact, &CandidateOptions::default());
        let none = candidates
            .iter()
            .find(|c| c.refinement == Refinement::None)
            .unwrap();
        assert!(none.error < 1e-25);
        assert!(candidates.iter().all(|c| c.score <= 1e-12));

        assert_eq!(
            get_optimal_refinement::<f64, _>(&cache(), &mesh.elems[0], 2, &exact, &CandidateOptions::default()),
            Refinement::None
        );
    }

    #[test]
    fn candidate_filters() {
        let mesh = unit_square();
        // a steep layer along x = 0
        let exact = ExactSolution::new(mesh.clone(), 6, |x: f64, _: f64| {
            ((-20.0 * x).exp(), [-20.0 * (-20.0 * x).exp(), 0.0])
        });

        let all = analyze::<f64, _>(&cache(), &mesh.elems[0], 2, &exact, &CandidateOptions::default());
        assert!(all.iter().any(|c| matches!(c.refinement, Refinement::AnisoV(_))));
        assert!(all.iter().any(|c| matches!(c.refinement, Refinement::P(_))));
        assert!(all.windows(2).all(|w| compare_candidates(&w[0], &w[1]) != Ordering::Greater));

        let iso_only = CandidateOptions {
            iso_only: true,
            ..Default::default()
        };
        let filtered = analyze::<f64, _>(&cache(), &mesh.elems[0], 2, &exact, &iso_only);
        assert!(filtered
            .iter()
            .all(|c| !matches!(c.refinement, Refinement::AnisoH(_) | Refinement::AnisoV(_))));

        let h_only = CandidateOptions {
            h_only: true,
            max_order: 4,
            ..Default::default()
        };
        let filtered = analyze::<f64, _>(&cache(), &mesh.elems[0], 2, &exact, &h_only);
        assert!(filtered.iter().all(|c| !matches!(c.refinement, Refinement::P(_))));
        assert!(filtered
            .iter()
            .all(|c| c.refinement.son_orders().iter().all(|p| *p == 2)));

        let capped = CandidateOptions {
            max_order: 3,
            ..Default::default()
        };
        for c in analyze::<f64, _>(&cache(), &mesh.elems[0], 2, &exact, &capped) {
            match c.refinement {
                Refinement::P(p) => assert!(p <= 3),
                other => assert!(other.son_orders().iter().all(|p| *p <= 3)),
            }
        }
    }

    #[test]
    fn triangles_only_split_isotropically() {
        let mesh = Arc::new(Mesh::rectangle_tris([0.0, 1.0], [0.0, 1.0], 1, 1).unwrap());
        let exact = ExactSolution::new(mesh.clone(), 5, |x: f64, y: f64| {
            ((x * y).sin(), [y * (x * y).cos(), x * (x * y).cos()])
        });

        let candidates = analyze::<f64, _>(&cache(), &mesh.elems[1], 1, &exact, &CandidateOptions::default());
        assert!(candidates
            .iter()
            .all(|c| !matches!(c.refinement, Refinement::AnisoH(_) | Refinement::AnisoV(_))));
        assert!(candidates.iter().any(|c| matches!(c.refinement, Refinement::Iso(_))));
    }

    #[test]
    fn son_combinations() {
        let combos = son_order_combinations(&[1, 2, 3], 2);
        assert_eq!(combos.len(), 9);
        assert_eq!(combos[0].as_slice(), &[1, 1]);
        assert_eq!(combos[5].as_slice(), &[2, 3]);
        assert_eq!(son_order_combinations(&[2], 4), vec![SmallVec::<[u8; 4]>::from_slice(&[2, 2, 2, 2])]);
    }

    #[test]
    fn tie_breaks() {
        let candidate = |refinement, dofs, score| Candidate {
            refinement,
            error: 1.0,
            dofs,
            score,
        };
        let mut candidates = vec![
            candidate(Refinement::AnisoV([2, 2]), 18, 0.5),
            candidate(Refinement::AnisoH([2, 2]), 18, 0.5),
            candidate(Refinement::Iso([1, 1, 1, 2]), 18, 0.5),
            candidate(Refinement::P(3), 16, 0.5),
            candidate(Refinement::P(2), 9, 0.1),
        ];
        candidates.sort_by(compare_candidates);

        let order: Vec<Refinement> = candidates.iter().map(|c| c.refinement).collect();
        assert_eq!(
            order,
            vec![
                Refinement::P(3),
                Refinement::Iso([1, 1, 1, 2]),
                Refinement::AnisoH([2, 2]),
                Refinement::AnisoV([2, 2]),
                Refinement::P(2),
            ]
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        // a polynomial of order p projected onto its own space (no split) has no error
        #[test]
        fn projection_idempotence(
            coeffs in proptest::collection::vec(-10.0f64..10.0, 16),
            p in 1u8..=3,
        ) {
            let mesh = unit_square();
            let poly = move |x: f64, y: f64| {
                let (mut val, mut dx, mut dy) = (0.0, 0.0, 0.0);
                for i in 0..=p as i32 {
                    for j in 0..=p as i32 {
                        let c = coeffs[(i * 4 + j) as usize];
                        val += c * x.powi(i) * y.powi(j);
                        if i > 0 {
                            dx += c * i as f64 * x.powi(i - 1) * y.powi(j);
                        }
                        if j > 0 {
                            dy += c * j as f64 * x.powi(i) * y.powi(j - 1);
                        }
                    }
                }
                (val, [dx, dy])
            };
            let exact = ExactSolution::new(mesh.clone(), p, poly);

            let candidates = analyze::<f64, _>(&cache(), &mesh.elems[0], p, &exact, &CandidateOptions::default());
            let none = candidates.iter().find(|c| c.refinement == Refinement::None).unwrap();
            let norm: f64 = CellErrors::new::<f64, _>(
                &cache().get(Shape::Quad, 10),
                &mesh.elems[0],
                &Region::reference(Shape::Quad),
                10,
                &exact,
            ).norm;

            prop_assert!(none.error <= 1e-12 * norm.max(1.0));
        }
    }
}
