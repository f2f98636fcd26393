//! Matrix module: operator backends driven by the multigrid engine.

pub mod dense;
pub mod sparse;

pub use sparse::{CsrMatrix, Transposed};
