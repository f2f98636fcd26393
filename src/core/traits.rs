//! Core linear-algebra capabilities consumed by the multigrid engine.
//!
//! The engine never looks inside a matrix or a vector: it only calls through
//! these three contracts, so any numerical backend that implements them can be
//! driven by a [`Hierarchy`](crate::multigrid::Hierarchy).

use crate::error::MgError;

/// Numerical backend an operator belongs to.
///
/// Levels keep a set of accepted kinds and reject any other operator at setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Compressed sparse row matrix.
    Csr,
    /// Transposed view of a CSR matrix.
    CsrTranspose,
    /// Dense faer matrix.
    Dense,
    /// Constant-coefficient structured stencil operator.
    Struct,
}

/// Vector capability.
pub trait Vector: Clone {
    /// Copy the values of `self` into `dest` (same layout).
    fn copy_to(&self, dest: &mut Self);
    /// New vector with the same layout and all values zero.
    fn clone_layout(&self) -> Self;
    /// Set every entry to `value`.
    fn set_constant_value(&mut self, value: f64);
    /// Euclidean norm over all ranks holding a piece of the vector.
    fn norm2(&self) -> Result<f64, MgError>;
    /// Number of locally stored entries.
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Operators that can apply a damped inverse of their diagonal.
pub trait DiagonalScale<V>: Operator<V> {
    /// `x += omega * D^-1 * r`. Rows with a zero diagonal are left unchanged.
    fn diagonal_scale(&self, omega: f64, r: &V, x: &mut V) -> Result<(), MgError>;
}

/// Matrix capability: affine apply `result = alpha * M * x + beta * y`.
pub trait Operator<V> {
    /// Compute `result = alpha * M * x + beta * y`. A missing `y` is treated
    /// as zero and `beta` is ignored.
    fn apply(&self, alpha: f64, x: &V, beta: f64, y: Option<&V>, result: &mut V) -> Result<(), MgError>;

    /// Compute `result = alpha * M * x + beta * result`, i.e. `apply` with
    /// `y` aliasing `result`.
    fn apply_in_place(&self, alpha: f64, x: &V, beta: f64, result: &mut V) -> Result<(), MgError>
    where
        V: Clone,
    {
        let y = result.clone();
        self.apply(alpha, x, beta, Some(&y), result)
    }

    /// A zero vector conforming to the operator's range.
    fn create_vector(&self) -> V;

    /// Backend this operator belongs to.
    fn backend(&self) -> BackendKind;
}

/// Smoother / solver capability: improve `sol` in place for `rhs`.
pub trait LevelSolver<V> {
    fn solve(&mut self, rhs: &V, sol: &mut V) -> Result<(), MgError>;
}
