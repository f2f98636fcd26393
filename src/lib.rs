//! structmg: multigrid V-cycles over distributed structured grids
//!
//! This crate provides a recursive multigrid cycle engine over a hierarchy of
//! levels, and the structured-grid communication layer underneath it: box
//! geometry, a scalable box manager, communication patterns derived from
//! stencils, compiled pack/unpack plans and split-phase exchanges. Ranks talk
//! through the [`parallel::Comm`] trait, backed by threads in one process or
//! by MPI (feature `mpi`).

pub mod parallel;

pub mod config;
pub mod core;
pub mod error;
pub mod matrix;
pub mod multigrid;
pub mod preconditioner;
pub mod solver;
pub mod structured;
pub mod utils;

// Re-exports for convenience
pub use crate::config::*;
pub use crate::core::*;
pub use crate::error::*;
pub use crate::matrix::*;
pub use crate::multigrid::*;
pub use crate::preconditioner::*;
pub use crate::solver::*;

// Re-export SolveStats at the crate root for convenience
pub use utils::convergence::SolveStats;
