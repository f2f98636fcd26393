//! Capability traits shared by the multigrid engine and the operator backends.

pub mod traits;
pub mod wrappers;

pub use traits::{BackendKind, DiagonalScale, LevelSolver, Operator, Vector};
