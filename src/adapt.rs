/// Per-Elem refinement candidates and their scoring
pub mod candidates;
/// Error and norm integrals over the union of several Meshes
pub mod error_calc;
/// Bilinear forms used to measure errors
pub mod forms;
/// Coarsening
pub mod unrefine;

use crate::basis::ProjectionCache;
use crate::domain::{
    fields::MeshFunction,
    mesh::h_refinement::{HRef, HRefError},
    space::{PRefError, MAX_POLYNOMIAL_ORDER},
    Domain,
};
use crate::Scalar;
use candidates::{get_optimal_refinement, CandidateOptions, Refinement};
use error_calc::{eval_error, eval_norm};
use forms::{ErrorForm, H1Form};

use log::{debug, info, warn};
use rayon::prelude::*;
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Consecutive element errors closer than this (relatively) are treated as equal by [Strategy::Quantile]
const SYMMETRY_TOLERANCE: f64 = 1e-3;

#[derive(Debug, Error)]
pub enum AdaptError {
    #[error("Element errors have not been computed (or were already used); call calc_error first!")]
    ErrorsNotComputed,
    #[error("Expected {expected} solution components; got {found}!")]
    ComponentMismatch { expected: usize, found: usize },
    #[error("Component {0} is out of range ({1} components)!")]
    ComponentOutOfRange(usize, usize),
    #[error("The Mesh of component {0} is not a refinement of the Domain's master Mesh!")]
    MeshesDontShareBase(usize),
    #[error("The Domain was modified after the element errors were computed!")]
    StaleErrors,
    #[error(transparent)]
    HRef(#[from] HRefError),
    #[error(transparent)]
    PRef(#[from] PRefError),
}

/// How elements are selected for refinement
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strategy {
    /// Refine the largest errors until `sqrt(threshold)` of the total error (or `to_be_processed`) has been processed
    Quantile,
    /// Refine every element whose error exceeds `threshold` times the largest error
    RelativeToMax,
    /// Refine every element whose error exceeds `threshold`
    Absolute,
}

impl Strategy {
    /// Parse the integer strategy codes (`0`, `1`, `2`)
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Quantile),
            1 => Some(Self::RelativeToMax),
            2 => Some(Self::Absolute),
            _ => None,
        }
    }
}

/// Which kinds of refinement are allowed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdaptType {
    Hp,
    HOnly,
    POnly,
}

impl AdaptType {
    /// Parse the integer adaptivity codes (`0` = hp, `1` = h, `2` = p)
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Hp),
            1 => Some(Self::HOnly),
            2 => Some(Self::POnly),
            _ => None,
        }
    }
}

/// Parameters of one adaptivity pass (see [HpAdapt::adapt])
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AdaptParams {
    pub threshold: f64,
    pub strategy: Strategy,
    pub adapt_type: AdaptType,
    /// Never split quadrilaterals anisotropically
    pub iso_only: bool,
    /// Maximum hanging node irregularity (`None`: arbitrary irregularity)
    pub regularize: Option<u8>,
    pub max_order: u8,
    /// Give every component sharing a Mesh the same order on all of its active elements after a pass (always done when
    /// the Domain has a single Mesh)
    pub same_orders: bool,
    /// Amount of (squared, relative) error processed by [Strategy::Quantile]; `0.0` uses `sqrt(threshold)` of the total
    pub to_be_processed: f64,
}

impl Default for AdaptParams {
    fn default() -> Self {
        Self {
            threshold: 0.3,
            strategy: Strategy::Quantile,
            adapt_type: AdaptType::Hp,
            iso_only: false,
            regularize: None,
            max_order: MAX_POLYNOMIAL_ORDER,
            same_orders: false,
            to_be_processed: 0.0,
        }
    }
}

impl AdaptParams {
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_adapt_type(mut self, adapt_type: AdaptType) -> Self {
        self.adapt_type = adapt_type;
        self
    }

    pub fn with_iso_only(mut self, iso_only: bool) -> Self {
        self.iso_only = iso_only;
        self
    }

    pub fn with_regularization(mut self, level: u8) -> Self {
        self.regularize = Some(level);
        self
    }

    pub fn with_max_order(mut self, max_order: u8) -> Self {
        self.max_order = max_order;
        self
    }

    pub fn with_same_orders(mut self, same_orders: bool) -> Self {
        self.same_orders = same_orders;
        self
    }

    pub fn with_to_be_processed(mut self, to_be_processed: f64) -> Self {
        self.to_be_processed = to_be_processed;
        self
    }
}

/// Element errors of one pass
#[derive(Clone, Debug)]
struct ErrorRecord {
    // (component, elem id) => squared error relative to the total norm
    elem_errors: BTreeMap<(usize, usize), f64>,
    // descending error
    sorted: Vec<(usize, usize)>,
    // Σ elem_errors
    total: f64,
    relative_error: f64,
    // number of Elems in each Mesh when the errors were computed
    mesh_sizes: Vec<usize>,
}

impl ErrorRecord {
    fn error(&self, component: usize, elem_id: usize) -> Option<f64> {
        self.elem_errors.get(&(component, elem_id)).copied()
    }

    fn max_error(&self) -> f64 {
        self.sorted
            .first()
            .and_then(|key| self.elem_errors.get(key))
            .copied()
            .unwrap_or(0.0)
    }
}

/// Projection-based hp-adaptivity over the components of a [Domain]
///
/// One pass consists of:
/// 1. [HpAdapt::calc_error_n] (or [HpAdapt::calc_error] / [HpAdapt::calc_error_2]): element errors between coarse and reference solutions
/// 2. [HpAdapt::adapt]: refinement of the elements with the largest errors (or [HpAdapt::unrefine] to coarsen)
///
/// Errors are measured with one [ErrorForm] per pair of components (the H1 product on the diagonal by default).
pub struct HpAdapt<T: Scalar> {
    num_components: usize,
    forms: Vec<Vec<Option<Arc<dyn ErrorForm<T>>>>>,
    cache: Arc<ProjectionCache>,
    errors: Option<ErrorRecord>,
    have_errors: bool,
    rslns: Vec<Arc<dyn MeshFunction<T>>>,
}

impl<T: Scalar + 'static> HpAdapt<T> {
    /// Adaptivity over `num_components` components, using the process-wide [ProjectionCache]
    pub fn new(num_components: usize) -> Self {
        Self::with_cache(num_components, ProjectionCache::shared())
    }

    pub fn with_cache(num_components: usize, cache: Arc<ProjectionCache>) -> Self {
        let forms = (0..num_components)
            .map(|i| {
                (0..num_components)
                    .map(|j| {
                        if i == j {
                            Some(Arc::new(H1Form) as Arc<dyn ErrorForm<T>>)
                        } else {
                            None
                        }
                    })
                    .collect()
            })
            .collect();

        Self {
            num_components,
            forms,
            cache,
            errors: None,
            have_errors: false,
            rslns: Vec::new(),
        }
    }

    pub fn num_components(&self) -> usize {
        self.num_components
    }

    /// Measure the errors of components `i` and `j` with a problem-specific form
    pub fn set_error_form<F>(&mut self, i: usize, j: usize, form: F) -> Result<(), AdaptError>
    where
        F: ErrorForm<T> + 'static,
    {
        self.check_component(i)?;
        self.check_component(j)?;
        self.forms[i][j] = Some(Arc::new(form));
        Ok(())
    }

    /// Stop measuring errors between components `i` and `j`
    pub fn clear_error_form(&mut self, i: usize, j: usize) -> Result<(), AdaptError> {
        self.check_component(i)?;
        self.check_component(j)?;
        self.forms[i][j] = None;
        Ok(())
    }

    /// [HpAdapt::calc_error_n] for a single component
    pub fn calc_error<S, R>(&mut self, domain: &Domain, sln: &S, rsln: &R) -> Result<f64, AdaptError>
    where
        S: MeshFunction<T> + Clone + 'static,
        R: MeshFunction<T> + Clone + 'static,
    {
        self.calc_error_n(domain, vec![Arc::new(sln.clone())], vec![Arc::new(rsln.clone())])
    }

    /// [HpAdapt::calc_error_n] for two components
    pub fn calc_error_2<S1, S2, R1, R2>(
        &mut self,
        domain: &Domain,
        sln1: &S1,
        sln2: &S2,
        rsln1: &R1,
        rsln2: &R2,
    ) -> Result<f64, AdaptError>
    where
        S1: MeshFunction<T> + Clone + 'static,
        S2: MeshFunction<T> + Clone + 'static,
        R1: MeshFunction<T> + Clone + 'static,
        R2: MeshFunction<T> + Clone + 'static,
    {
        self.calc_error_n(
            domain,
            vec![Arc::new(sln1.clone()), Arc::new(sln2.clone())],
            vec![Arc::new(rsln1.clone()), Arc::new(rsln2.clone())],
        )
    }

    /// Compute the element errors of every component and return the total relative error `sqrt(Σ error / Σ norm)`
    ///
    /// `slns` are the coarse solutions (over the Domain's current Meshes) and `rslns` the reference solutions (over
    /// refinements of them), index-aligned with the Domain's Spaces. The error of the form `(i, j)` over an element of
    /// component `i` is attributed to component `i`. Element errors are stored relative to the total norm of the
    /// reference solutions.
    pub fn calc_error_n(
        &mut self,
        domain: &Domain,
        slns: Vec<Arc<dyn MeshFunction<T>>>,
        rslns: Vec<Arc<dyn MeshFunction<T>>>,
    ) -> Result<f64, AdaptError> {
        self.check_solutions(domain, &slns, &rslns)?;

        let mut raw_errors = BTreeMap::new();
        let mut total_error = 0.0;
        let mut total_norm = 0.0;

        for i in 0..self.num_components {
            let forms: Vec<(usize, &Arc<dyn ErrorForm<T>>)> = self.forms[i]
                .iter()
                .enumerate()
                .filter_map(|(j, form)| form.as_ref().map(|f| (j, f)))
                .collect();

            let elem_results: Vec<(usize, f64, f64)> = domain
                .mesh_of(i)
                .active_elems()
                .collect::<Vec<_>>()
                .into_par_iter()
                .map(|elem| {
                    let mut err = 0.0;
                    let mut norm = 0.0;
                    for (j, form) in forms.iter() {
                        err += eval_error(
                            form.as_ref(),
                            slns[i].as_ref(),
                            slns[*j].as_ref(),
                            rslns[i].as_ref(),
                            rslns[*j].as_ref(),
                            elem,
                        )
                        .modulus();
                        norm += eval_norm(form.as_ref(), rslns[i].as_ref(), rslns[*j].as_ref(), elem).modulus();
                    }
                    (elem.id, err, norm)
                })
                .collect();

            for (elem_id, err, norm) in elem_results {
                raw_errors.insert((i, elem_id), err);
                total_error += err;
                total_norm += norm;
            }
        }

        let scale = if total_norm > 0.0 {
            total_norm
        } else {
            warn!("reference solutions have a vanishing norm; element errors are not normalized");
            1.0
        };

        let elem_errors: BTreeMap<(usize, usize), f64> = raw_errors
            .into_iter()
            .map(|(key, err)| (key, err / scale))
            .collect();

        let mut sorted: Vec<(usize, usize)> = elem_errors.keys().copied().collect();
        sorted.sort_by(|a, b| elem_errors[b].total_cmp(&elem_errors[a]).then(a.cmp(b)));

        let relative_error = (total_error / scale).sqrt();
        info!(
            "element errors computed over {} elements; relative error {:.4e}",
            sorted.len(),
            relative_error
        );

        self.errors = Some(ErrorRecord {
            total: total_error / scale,
            elem_errors,
            sorted,
            relative_error,
            mesh_sizes: domain.meshes.iter().map(|mesh| mesh.elems.len()).collect(),
        });
        self.have_errors = true;
        self.rslns = rslns;

        Ok(relative_error)
    }

    /// Refine the elements selected by `params.strategy`, each with its locally optimal refinement
    ///
    /// Returns `Ok(false)` if no element was selected. Consumes the element errors: [HpAdapt::calc_error_n] must be called
    /// again before the next pass.
    pub fn adapt(&mut self, domain: &mut Domain, params: &AdaptParams) -> Result<bool, AdaptError> {
        let record = self.take_errors(domain)?;
        let max_order = self.clamp_max_order(params.max_order);

        let selected = select_elements(&record, params);
        if selected.is_empty() {
            info!("no elements selected for refinement");
            return Ok(false);
        }

        let options = CandidateOptions {
            max_order,
            iso_only: params.iso_only,
            h_only: params.adapt_type == AdaptType::HOnly,
        };

        let shared_domain: &Domain = domain;
        let decisions: Vec<(usize, usize, Refinement)> = selected
            .par_iter()
            .map(|(comp, elem_id)| {
                let elem = &shared_domain.mesh_of(*comp).elems[*elem_id];
                let order = shared_domain.spaces[*comp].order(*elem_id);
                let refinement = match params.adapt_type {
                    AdaptType::POnly if order < max_order => Refinement::P(order + 1),
                    AdaptType::POnly => Refinement::None,
                    _ => get_optimal_refinement(
                        &self.cache,
                        elem,
                        order,
                        self.rslns[*comp].as_ref(),
                        &options,
                    ),
                };
                (*comp, *elem_id, refinement)
            })
            .collect();

        let (num_h, num_p) = commit_refinements(domain, decisions)?;

        if let Some(level) = params.regularize {
            for mesh_idx in 0..domain.meshes.len() {
                let forced = domain.meshes[mesh_idx].regularize(level);
                if forced > 0 {
                    debug!("regularization forced {} refinements on Mesh {}", forced, mesh_idx);
                    domain.sync_spaces(mesh_idx);
                }
            }
        }

        if params.same_orders || domain.meshes.len() == 1 {
            let raised = equalize_orders(domain)?;
            if raised > 0 {
                debug!("raised {} element orders to match the other components on their Mesh", raised);
            }
        }

        let ndofs = domain.assign_dofs();
        info!(
            "{} elements selected: {} h-refinements, {} p-refinements; {} unknowns",
            selected.len(),
            num_h,
            num_p,
            ndofs
        );

        Ok(true)
    }

    /// Squared relative error of an element from the last call to [HpAdapt::calc_error_n]
    pub fn element_error(&self, component: usize, elem_id: usize) -> Option<f64> {
        self.errors
            .as_ref()
            .and_then(|record| record.error(component, elem_id))
    }

    /// `(component, elem id)` pairs sorted by descending error
    pub fn sorted_elements(&self) -> &[(usize, usize)] {
        self.errors
            .as_ref()
            .map_or(&[], |record| record.sorted.as_slice())
    }

    /// Number of active elements over all components when the errors were computed
    pub fn total_active_elements(&self) -> usize {
        self.errors.as_ref().map_or(0, |record| record.sorted.len())
    }

    /// The relative error returned by the last call to [HpAdapt::calc_error_n]
    pub fn total_error(&self) -> Option<f64> {
        self.errors.as_ref().map(|record| record.relative_error)
    }

    /// Are there element errors which haven't been used by [HpAdapt::adapt] or [HpAdapt::unrefine]
    pub fn have_errors(&self) -> bool {
        self.have_errors
    }

    pub fn cache(&self) -> &Arc<ProjectionCache> {
        &self.cache
    }

    fn check_component(&self, component: usize) -> Result<(), AdaptError> {
        if component < self.num_components {
            Ok(())
        } else {
            Err(AdaptError::ComponentOutOfRange(component, self.num_components))
        }
    }

    fn check_solutions(
        &self,
        domain: &Domain,
        slns: &[Arc<dyn MeshFunction<T>>],
        rslns: &[Arc<dyn MeshFunction<T>>],
    ) -> Result<(), AdaptError> {
        for found in [domain.num_components(), slns.len(), rslns.len()] {
            if found != self.num_components {
                return Err(AdaptError::ComponentMismatch {
                    expected: self.num_components,
                    found,
                });
            }
        }

        let master = domain.mesh_of(0);
        for comp in 0..self.num_components {
            let shares_base = domain.mesh_of(comp).shares_base_with(master)
                && slns[comp].mesh().shares_base_with(master)
                && rslns[comp].mesh().shares_base_with(master);
            if !shares_base {
                return Err(AdaptError::MeshesDontShareBase(comp));
            }
        }

        Ok(())
    }

    // consume the element errors, making sure they still describe the Domain
    fn take_errors(&mut self, domain: &Domain) -> Result<ErrorRecord, AdaptError> {
        if !self.have_errors {
            return Err(AdaptError::ErrorsNotComputed);
        }
        let record = self.errors.clone().ok_or(AdaptError::ErrorsNotComputed)?;
        let sizes: Vec<usize> = domain.meshes.iter().map(|mesh| mesh.elems.len()).collect();
        if sizes != record.mesh_sizes || domain.num_components() != self.num_components {
            return Err(AdaptError::StaleErrors);
        }
        self.have_errors = false;
        Ok(record)
    }

    fn clamp_max_order(&self, requested: u8) -> u8 {
        let limit = self.cache.max_order();
        if requested > limit {
            warn!("max_order {} exceeds the projection tables' maximum; using {}", requested, limit);
            limit
        } else if requested < 1 {
            warn!("max_order must be at least 1; using 1");
            1
        } else {
            requested
        }
    }
}

/// Choose the `(component, elem id)` pairs to refine
fn select_elements(record: &ErrorRecord, params: &AdaptParams) -> Vec<(usize, usize)> {
    let budget = if params.to_be_processed > 0.0 {
        params.to_be_processed
    } else {
        params.threshold.sqrt() * record.total
    };
    let max_error = record.max_error();

    let mut selected = Vec::new();
    let mut processed = 0.0;
    let mut previous: Option<f64> = None;

    for key in record.sorted.iter() {
        let err = record.elem_errors[key];
        let stop = match params.strategy {
            Strategy::Quantile => {
                // keep going while errors are equal (symmetric meshes stay symmetric)
                processed > budget
                    && previous.map_or(true, |prev| {
                        prev <= 0.0 || ((err - prev) / prev).abs() > SYMMETRY_TOLERANCE
                    })
            }
            Strategy::RelativeToMax => err < params.threshold * max_error,
            Strategy::Absolute => err < params.threshold,
        };
        if stop {
            break;
        }

        selected.push(*key);
        processed += err;
        previous = Some(err);
    }

    selected
}

/// Apply refinement decisions to the Domain's Meshes and Spaces. Returns the number of h- and p-refinements.
///
/// Components sharing a Mesh may request different refinements of one element: any split wins over a p-refinement,
/// an isotropic split wins over anisotropic ones, and two different anisotropic splits become an isotropic one.
fn commit_refinements(
    domain: &mut Domain,
    decisions: Vec<(usize, usize, Refinement)>,
) -> Result<(usize, usize), AdaptError> {
    // mesh => elem => [(component, refinement)]
    let mut per_mesh: BTreeMap<usize, BTreeMap<usize, SmallVec<[(usize, Refinement); 2]>>> = BTreeMap::new();
    for (comp, elem_id, refinement) in decisions {
        if refinement != Refinement::None {
            per_mesh
                .entry(domain.spaces[comp].mesh_index())
                .or_default()
                .entry(elem_id)
                .or_default()
                .push((comp, refinement));
        }
    }

    let (mut num_h, mut num_p) = (0, 0);

    for (mesh_idx, elem_decisions) in per_mesh {
        let mut h_refs = Vec::new();
        let mut p_refs: Vec<(usize, usize, u8)> = Vec::new();
        // (component, elem) => per-son orders
        let mut son_orders: Vec<(usize, usize, SmallVec<[u8; 4]>)> = Vec::new();

        for (elem_id, requests) in elem_decisions {
            let split = requests
                .iter()
                .filter_map(|(_, r)| r.h_refinement())
                .reduce(|a, b| a.merged_with(b));

            match split {
                Some(href) => {
                    if let Err(err) = domain.meshes[mesh_idx].check_h_refinement(elem_id, href) {
                        warn!("skipping refinement of Elem {}: {}", elem_id, err);
                        continue;
                    }
                    h_refs.push((elem_id, href));
                    for (comp, refinement) in requests.iter() {
                        son_orders.push((*comp, elem_id, orders_for_split(refinement, href)));
                    }
                }
                None => {
                    for (comp, refinement) in requests.iter() {
                        if let Refinement::P(p) = refinement {
                            p_refs.push((*comp, elem_id, *p));
                        }
                    }
                }
            }
        }

        num_h += h_refs.len();
        domain.meshes[mesh_idx].execute_h_refinements(h_refs)?;
        domain.sync_spaces(mesh_idx);

        for (comp, elem_id, p) in p_refs {
            domain.spaces[comp].set_order(elem_id, p)?;
            debug!("p-refined Elem {} of component {} to order {}", elem_id, comp, p);
            num_p += 1;
        }

        for (comp, elem_id, orders) in son_orders {
            let sons: SmallVec<[usize; 4]> = domain.meshes[mesh_idx].elems[elem_id]
                .son_ids()
                .map(|ids| ids.iter().copied().collect())
                .unwrap_or_default();
            for (son_id, p) in sons.iter().zip(orders.iter()) {
                domain.spaces[comp].set_order(*son_id, *p)?;
            }
        }
    }

    Ok((num_h, num_p))
}

/// Give every active element the largest order any component sharing its Mesh has there. Returns the number of raised
/// orders.
fn equalize_orders(domain: &mut Domain) -> Result<usize, AdaptError> {
    let mut raised = 0;
    for mesh_idx in 0..domain.meshes.len() {
        let components = domain.components_on_mesh(mesh_idx);
        if components.len() < 2 {
            continue;
        }

        let active: Vec<usize> = domain.meshes[mesh_idx].active_elems().map(|elem| elem.id).collect();
        for elem_id in active {
            let max = components
                .iter()
                .map(|comp| domain.spaces[*comp].order(elem_id))
                .max()
                .unwrap_or(1);
            for comp in components.iter() {
                if domain.spaces[*comp].order(elem_id) < max {
                    domain.spaces[*comp].set_order(elem_id, max)?;
                    raised += 1;
                }
            }
        }
    }
    Ok(raised)
}

// son orders for a component whose own decision may differ from the split that is carried out
fn orders_for_split(refinement: &Refinement, href: HRef) -> SmallVec<[u8; 4]> {
    let num_sons = href.num_sons();
    match (refinement.h_refinement(), refinement) {
        (Some(own), _) if own == href => refinement.son_orders().iter().copied().collect(),
        (_, Refinement::P(p)) => SmallVec::from_elem(*p, num_sons),
        _ => {
            let max = refinement.son_orders().iter().copied().max().unwrap_or(1);
            SmallVec::from_elem(max, num_sons)
        }
    }
}
