// Damped Jacobi smoother

use crate::core::traits::{DiagonalScale, LevelSolver, Vector};
use crate::error::MgError;

/// Damped Jacobi: `x ← x + ω D⁻¹ (b − A x)`, repeated `sweeps` times.
pub struct Jacobi<M, V> {
    op: M,
    omega: f64,
    sweeps: usize,
    work: Option<V>,
}

impl<M, V> Jacobi<M, V> {
    /// Usually `M` is an `Arc` of the level operator, shared with the level.
    pub fn new(op: M, omega: f64, sweeps: usize) -> Self {
        Jacobi { op, omega, sweeps, work: None }
    }

    pub fn omega(&self) -> f64 {
        self.omega
    }

    pub fn sweeps(&self) -> usize {
        self.sweeps
    }
}

impl<M, V> LevelSolver<V> for Jacobi<M, V>
where
    M: DiagonalScale<V>,
    V: Vector,
{
    fn solve(&mut self, rhs: &V, sol: &mut V) -> Result<(), MgError> {
        let r = self.work.get_or_insert_with(|| self.op.create_vector());
        for _ in 0..self.sweeps {
            self.op.apply(-1.0, sol, 1.0, Some(rhs), r)?;
            self.op.diagonal_scale(self.omega, r, sol)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::CsrMatrix;
    use std::sync::Arc;

    #[test]
    fn diagonal_system_in_one_sweep() {
        let a = Arc::new(CsrMatrix::from_triplets(2, 2, &[(0, 0, 2.0), (1, 1, 4.0)]).unwrap());
        let mut s = Jacobi::new(a, 1.0, 1);
        let mut x = vec![0.0, 0.0];
        s.solve(&vec![2.0, 2.0], &mut x).unwrap();
        assert_eq!(x, vec![1.0, 0.5]);
    }

    #[test]
    fn damped_sweeps_reduce_the_residual() {
        let n = 10;
        let mut t = Vec::new();
        for i in 0..n {
            t.push((i, i, 2.0));
            if i > 0 {
                t.push((i, i - 1, -1.0));
                t.push((i - 1, i, -1.0));
            }
        }
        let a = Arc::new(CsrMatrix::from_triplets(n, n, &t).unwrap());
        let b = vec![1.0; n];
        let mut x = vec![0.0; n];
        let residual = |x: &Vec<f64>| {
            let mut r = vec![0.0; n];
            crate::core::Operator::apply(&*a, -1.0, x, 1.0, Some(&b), &mut r).unwrap();
            r.norm2().unwrap()
        };
        let r0 = residual(&x);
        Jacobi::new(a.clone(), 2.0 / 3.0, 5).solve(&b, &mut x).unwrap();
        assert!(residual(&x) < r0);
    }
}
