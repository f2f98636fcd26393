//! Dense operator backend on top of Faer.
//!
//! `faer::Mat<f64>` implements [`Operator`] over `Vec<f64>`, reporting
//! [`BackendKind::Dense`]. Dense operators are convenient for transfer
//! operators and small coarse levels.

use crate::core::traits::{BackendKind, DiagonalScale, Operator};
use crate::error::MgError;
use faer::Mat;

impl Operator<Vec<f64>> for Mat<f64> {
    fn apply(
        &self,
        alpha: f64,
        x: &Vec<f64>,
        beta: f64,
        y: Option<&Vec<f64>>,
        result: &mut Vec<f64>,
    ) -> Result<(), MgError> {
        if x.len() != self.ncols() {
            return Err(MgError::DimensionMismatch { expected: self.ncols(), found: x.len() });
        }
        if let Some(y) = y {
            if y.len() != self.nrows() {
                return Err(MgError::DimensionMismatch { expected: self.nrows(), found: y.len() });
            }
        }
        result.resize(self.nrows(), 0.0);
        for i in 0..self.nrows() {
            let mut acc = 0.0;
            for j in 0..self.ncols() {
                acc += self[(i, j)] * x[j];
            }
            result[i] = match y {
                Some(y) => alpha * acc + beta * y[i],
                None => alpha * acc,
            };
        }
        Ok(())
    }

    fn create_vector(&self) -> Vec<f64> {
        vec![0.0; self.nrows()]
    }

    fn backend(&self) -> BackendKind {
        BackendKind::Dense
    }
}

impl DiagonalScale<Vec<f64>> for Mat<f64> {
    fn diagonal_scale(&self, omega: f64, r: &Vec<f64>, x: &mut Vec<f64>) -> Result<(), MgError> {
        let n = self.nrows().min(self.ncols());
        if r.len() != n || x.len() != n {
            return Err(MgError::DimensionMismatch { expected: n, found: r.len().min(x.len()) });
        }
        for i in 0..n {
            let d = self[(i, i)];
            if d != 0.0 {
                x[i] += omega * r[i] / d;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::mat;

    #[test]
    fn affine_apply() {
        let a = mat![[2.0, 0.0], [1.0, 1.0]];
        let x = vec![1.0, 2.0];
        let y = vec![10.0, 20.0];
        let mut r = vec![0.0; 2];
        a.apply(-1.0, &x, 1.0, Some(&y), &mut r).unwrap();
        assert_eq!(r, vec![8.0, 17.0]);
        a.apply(1.0, &x, 5.0, None, &mut r).unwrap();
        assert_eq!(r, vec![2.0, 3.0]);
    }

    #[test]
    fn rejects_wrong_length() {
        let a = Mat::<f64>::identity(3, 3);
        let mut r = vec![0.0; 3];
        let err = a.apply(1.0, &vec![1.0; 2], 0.0, None, &mut r).unwrap_err();
        assert!(matches!(err, MgError::DimensionMismatch { expected: 3, found: 2 }));
    }
}
