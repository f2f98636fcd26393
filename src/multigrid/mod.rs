//! Multigrid levels and the recursive cycle that chains them.

pub mod hierarchy;
pub mod level;

pub use hierarchy::Hierarchy;
pub use level::{BoxedOperator, BoxedSolver, OneLevel, SmootherSide};
