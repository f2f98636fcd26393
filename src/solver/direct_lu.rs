//! Direct dense coarse-level solver using Faer's full-pivoting LU.
//!
//! Coarse levels of a hierarchy are small, so the coarse operator is
//! factored once as a dense matrix and every coarse solve is a pair of
//! triangular solves.
//!
//! # References
//! - Faer documentation: https://github.com/sarah-ek/faer-rs
//! - Golub & Van Loan, Matrix Computations

use faer::linalg::solvers::{FullPivLu, SolveCore};
use faer::{Conj, Mat, MatMut};

use crate::core::traits::LevelSolver;
use crate::error::MgError;
use crate::matrix::CsrMatrix;

/// LU factorization (full pivoting) of a square dense matrix.
pub struct LuSolver {
    n: usize,
    factor: FullPivLu<f64>,
}

impl LuSolver {
    /// Factor `a`.
    pub fn new(a: &Mat<f64>) -> Result<Self, MgError> {
        if a.nrows() != a.ncols() {
            return Err(MgError::DimensionMismatch { expected: a.nrows(), found: a.ncols() });
        }
        if a.nrows() == 0 {
            return Err(MgError::FactorError("empty matrix".to_string()));
        }
        Ok(LuSolver {
            n: a.nrows(),
            factor: FullPivLu::new(a.as_ref()),
        })
    }

    /// Factor the dense form of a sparse matrix.
    pub fn from_csr(a: &CsrMatrix) -> Result<Self, MgError> {
        LuSolver::new(&a.to_dense())
    }

    pub fn dim(&self) -> usize {
        self.n
    }

    /// Overwrite `x` (holding the right-hand side) with the solution.
    pub fn solve_in_place(&self, x: &mut [f64]) -> Result<(), MgError> {
        if x.len() != self.n {
            return Err(MgError::DimensionMismatch { expected: self.n, found: x.len() });
        }
        let x_mat = MatMut::from_column_major_slice_mut(x, self.n, 1);
        self.factor.solve_in_place_with_conj(Conj::No, x_mat);
        if x.iter().any(|v| !v.is_finite()) {
            return Err(MgError::SolveError("singular coarse matrix".to_string()));
        }
        Ok(())
    }
}

impl LevelSolver<Vec<f64>> for LuSolver {
    fn solve(&mut self, rhs: &Vec<f64>, sol: &mut Vec<f64>) -> Result<(), MgError> {
        sol.clone_from(rhs);
        self.solve_in_place(sol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lu_solver_solves_dense_system() {
        // 3x3 system: [[2,1,1],[1,3,2],[1,0,0]] x = [4,5,6]
        // True solution: [6,15,-23]
        let a = Mat::from_fn(3, 3, |i, j| match (i, j) {
            (0, 0) => 2.0, (0, 1) => 1.0, (0, 2) => 1.0,
            (1, 0) => 1.0, (1, 1) => 3.0, (1, 2) => 2.0,
            (2, 0) => 1.0,
            _ => 0.0,
        });
        let mut solver = LuSolver::new(&a).unwrap();
        let mut x = vec![0.0; 3];
        solver.solve(&vec![4.0, 5.0, 6.0], &mut x).unwrap();
        let expected = [6.0, 15.0, -23.0];
        for (xi, ei) in x.iter().zip(expected.iter()) {
            assert!((xi - ei).abs() < 1e-10, "xi = {}, expected = {}", xi, ei);
        }
    }

    #[test]
    fn rejects_rectangular_and_wrong_lengths() {
        assert!(LuSolver::new(&Mat::<f64>::zeros(2, 3)).is_err());
        let lu = LuSolver::new(&Mat::<f64>::identity(2, 2)).unwrap();
        assert!(lu.solve_in_place(&mut [1.0]).is_err());
    }
}
