//! Capability implementations for plain Rust containers.
//!
//! This module implements [`Vector`] for `Vec<f64>` so that the multigrid
//! engine can run directly on local dense vectors, and forwards the
//! [`Operator`] and [`LevelSolver`] capabilities through `Arc` and `Box` so an
//! operator can be shared between a level and the smoothers built on top of it.
//!
//! # Features
//! - With the `rayon` feature, norms and constant fills use parallel iterators.

use std::sync::Arc;

use crate::core::traits::{BackendKind, DiagonalScale, LevelSolver, Operator, Vector};
use crate::error::MgError;

impl Vector for Vec<f64> {
    fn copy_to(&self, dest: &mut Self) {
        dest.clear();
        dest.extend_from_slice(self);
    }

    fn clone_layout(&self) -> Self {
        vec![0.0; self.len()]
    }

    fn set_constant_value(&mut self, value: f64) {
        #[cfg(feature = "rayon")]
        {
            use rayon::prelude::*;
            self.par_iter_mut().for_each(|v| *v = value);
        }
        #[cfg(not(feature = "rayon"))]
        {
            self.iter_mut().for_each(|v| *v = value);
        }
    }

    fn norm2(&self) -> Result<f64, MgError> {
        #[cfg(feature = "rayon")]
        {
            use rayon::prelude::*;
            Ok(self.par_iter().map(|v| v * v).sum::<f64>().sqrt())
        }
        #[cfg(not(feature = "rayon"))]
        {
            Ok(self.iter().map(|v| v * v).sum::<f64>().sqrt())
        }
    }

    fn len(&self) -> usize {
        Vec::len(self)
    }
}

/// Shared operators forward to the wrapped operator.
impl<V, M: Operator<V> + ?Sized> Operator<V> for Arc<M> {
    fn apply(&self, alpha: f64, x: &V, beta: f64, y: Option<&V>, result: &mut V) -> Result<(), MgError> {
        (**self).apply(alpha, x, beta, y, result)
    }

    fn create_vector(&self) -> V {
        (**self).create_vector()
    }

    fn backend(&self) -> BackendKind {
        (**self).backend()
    }
}

impl<V, M: DiagonalScale<V> + ?Sized> DiagonalScale<V> for Arc<M> {
    fn diagonal_scale(&self, omega: f64, r: &V, x: &mut V) -> Result<(), MgError> {
        (**self).diagonal_scale(omega, r, x)
    }
}

impl<V, S: LevelSolver<V> + ?Sized> LevelSolver<V> for Box<S> {
    fn solve(&mut self, rhs: &V, sol: &mut V) -> Result<(), MgError> {
        (**self).solve(rhs, sol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_layout_is_zero() {
        let v = vec![1.0, 2.0, 3.0];
        let z = v.clone_layout();
        assert_eq!(z, vec![0.0; 3]);
    }

    #[test]
    fn copy_and_fill() {
        let v = vec![3.0, 4.0];
        let mut w = vec![0.0; 2];
        v.copy_to(&mut w);
        assert_eq!(w, v);
        assert!((w.norm2().unwrap() - 5.0).abs() < 1e-14);
        w.set_constant_value(-1.0);
        assert_eq!(w, vec![-1.0, -1.0]);
    }
}
