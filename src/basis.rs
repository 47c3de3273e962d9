/// Legendre polynomials and the prototype (non-orthogonal) polynomial sets they span
pub mod legendre;
/// H1-orthonormal polynomial bases and their process-wide cache
pub mod ortho;

pub use ortho::{OrthoBasis, ProjectionCache};
