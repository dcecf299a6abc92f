//! Linear-algebra kernels for the network coupling engine.
//!
//! Provides the sparse coupling matrices (triplet storage, plain or
//! dual-valued entries) and a restartable GMRES solver driven by a matrix-free
//! operator, as needed for the Schur-complement solve over coupling DOFs.
//!
//! Failures in this crate are numerical, not structural, and are therefore
//! reported as signed step codes (negative = non-recoverable, positive =
//! recoverable), never as panics or error values — the outer integrator
//! decides whether to retry.

pub mod gmres;
pub mod sparse;

pub use gmres::{GMRES_NOT_CONVERGED, Gmres, Orthogonalization};
pub use sparse::SparseMat;
