//! Projection-based hp-adaptivity for 2D finite element discretizations.
//!
//! A [Domain](domain::Domain) holds one or more refinement-forest Meshes and one H1 Space per solution component.
//! Given coarse and reference (once-refined) [Solution](domain::fields::Solution)s, an [HpAdapt](adapt::HpAdapt)
//! computes element-wise errors in an energy norm, decides the locally optimal refinement of each selected element by
//! projecting the reference solution onto candidate polynomial spaces, and applies the winning refinements to the Domain.
//!
//! ```
//! use hp_fem_2d::{adapt::{AdaptParams, HpAdapt}, domain::{fields::{ExactSolution, Solution}, mesh::Mesh, Domain}};
//! use std::sync::Arc;
//!
//! let mut domain = Domain::single_mesh(Mesh::rectangle([0.0, 1.0], [0.0, 1.0], 2, 2).unwrap(), 1, 1).unwrap();
//! let exact = |x: f64, y: f64| ((x * y).powi(2), [2.0 * x * y * y, 2.0 * x * x * y]);
//!
//! let reference = domain.reference(1).unwrap();
//! let coarse: Solution<f64> = Solution::project(&domain, 0, &ExactSolution::new(Arc::new(domain.meshes[0].clone()), 4, exact));
//! let fine: Solution<f64> = Solution::project(&reference, 0, &ExactSolution::new(Arc::new(reference.meshes[0].clone()), 4, exact));
//!
//! let mut hp = HpAdapt::<f64>::new(domain.num_components());
//! let err = hp.calc_error(&domain, &coarse, &fine).unwrap();
//! assert!(err > 0.0);
//!
//! assert!(hp.adapt(&mut domain, &AdaptParams::default()).unwrap());
//! ```

/// Orthonormal polynomial bases used to project reference solutions
pub mod basis;
/// Meshes, Spaces and the functions defined over them
pub mod domain;
/// Numerical integration over reference domains
pub mod integration;
/// Error estimation and hp-refinement selection
pub mod adapt;

pub use adapt::{AdaptError, AdaptParams, AdaptType, HpAdapt, Strategy};
pub use basis::{OrthoBasis, ProjectionCache};
pub use domain::{mesh::Mesh, space::Space, Domain};

/// The field over which solutions (and error forms) are defined: `f64` or `num_complex::Complex64`
pub trait Scalar: nalgebra::ComplexField<RealField = f64> + Copy + Send + Sync {}

impl<T> Scalar for T where T: nalgebra::ComplexField<RealField = f64> + Copy + Send + Sync {}
