//! Smoothers for multigrid levels.
//!
//! Smoothers implement [`LevelSolver`](crate::core::LevelSolver) and are
//! registered on a level with
//! [`OneLevel::set_smoother`](crate::multigrid::OneLevel::set_smoother).

pub mod jacobi;

pub use jacobi::Jacobi;
