// Sparse operator backend: CSR storage and a transposed view

use std::sync::Arc;

use faer::Mat;
use faer::sparse::{SparseRowMat, SymbolicSparseRowMat};

use crate::core::traits::{BackendKind, DiagonalScale, Operator};
use crate::error::MgError;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Compressed sparse row matrix over `f64`.
#[derive(Debug, Clone)]
pub struct CsrMatrix {
    nrows: usize,
    ncols: usize,
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
    values: Vec<f64>,
}

impl CsrMatrix {
    /// Build a CSR from raw row-ptr, col-idx, and values.
    pub fn from_csr(
        nrows: usize,
        ncols: usize,
        row_ptr: Vec<usize>,
        col_idx: Vec<usize>,
        values: Vec<f64>,
    ) -> Result<Self, MgError> {
        if row_ptr.len() != nrows + 1 {
            return Err(MgError::DimensionMismatch { expected: nrows + 1, found: row_ptr.len() });
        }
        if row_ptr[0] != 0 {
            return Err(MgError::DimensionMismatch { expected: 0, found: row_ptr[0] });
        }
        // Row offsets must be non-decreasing.
        if let Some(w) = row_ptr.windows(2).find(|w| w[1] < w[0]) {
            return Err(MgError::DimensionMismatch { expected: w[0], found: w[1] });
        }
        let nnz = row_ptr[nrows];
        if col_idx.len() != nnz || values.len() != nnz {
            return Err(MgError::DimensionMismatch { expected: nnz, found: col_idx.len().min(values.len()) });
        }
        if let Some(&bad) = col_idx.iter().find(|&&j| j >= ncols) {
            return Err(MgError::DimensionMismatch { expected: ncols, found: bad + 1 });
        }
        Ok(Self { nrows, ncols, row_ptr, col_idx, values })
    }

    /// Build from `(row, col, value)` triplets; duplicates are summed.
    pub fn from_triplets(nrows: usize, ncols: usize, triplets: &[(usize, usize, f64)]) -> Result<Self, MgError> {
        let mut sorted = triplets.to_vec();
        sorted.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
        let mut row_ptr = vec![0usize; nrows + 1];
        let mut col_idx = Vec::with_capacity(sorted.len());
        let mut values: Vec<f64> = Vec::with_capacity(sorted.len());
        let mut last: Option<(usize, usize)> = None;
        for &(i, j, v) in &sorted {
            if i >= nrows {
                return Err(MgError::DimensionMismatch { expected: nrows, found: i + 1 });
            }
            if last == Some((i, j)) {
                if let Some(slot) = values.last_mut() {
                    *slot += v;
                }
                continue;
            }
            col_idx.push(j);
            values.push(v);
            row_ptr[i + 1] += 1;
            last = Some((i, j));
        }
        for i in 0..nrows {
            row_ptr[i + 1] += row_ptr[i];
        }
        Self::from_csr(nrows, ncols, row_ptr, col_idx, values)
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Iterate `(col, value)` pairs of row `i`.
    pub fn row(&self, i: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let range = self.row_ptr[i]..self.row_ptr[i + 1];
        self.col_idx[range.clone()].iter().copied().zip(self.values[range].iter().copied())
    }

    /// Diagonal entries (zero where absent).
    pub fn diagonal(&self) -> Vec<f64> {
        (0..self.nrows.min(self.ncols))
            .map(|i| self.row(i).filter(|&(j, _)| j == i).map(|(_, v)| v).sum())
            .collect()
    }

    /// Dense copy through Faer's sparse row matrix.
    pub fn to_dense(&self) -> Mat<f64> {
        let symbolic = SymbolicSparseRowMat::new_checked(
            self.nrows,
            self.ncols,
            self.row_ptr.clone(),
            None,
            self.col_idx.clone(),
        );
        SparseRowMat::new(symbolic, self.values.clone()).to_dense()
    }

    fn row_dot(&self, i: usize, x: &[f64]) -> f64 {
        self.row(i).map(|(j, v)| v * x[j]).sum()
    }

    fn check_apply(&self, x_len: usize, y_len: Option<usize>, rows: usize, cols: usize) -> Result<(), MgError> {
        if x_len != cols {
            return Err(MgError::DimensionMismatch { expected: cols, found: x_len });
        }
        match y_len {
            Some(n) if n != rows => Err(MgError::DimensionMismatch { expected: rows, found: n }),
            _ => Ok(()),
        }
    }
}

impl Operator<Vec<f64>> for CsrMatrix {
    fn apply(
        &self,
        alpha: f64,
        x: &Vec<f64>,
        beta: f64,
        y: Option<&Vec<f64>>,
        result: &mut Vec<f64>,
    ) -> Result<(), MgError> {
        self.check_apply(x.len(), y.map(|y| y.len()), self.nrows, self.ncols)?;
        result.resize(self.nrows, 0.0);
        let kernel = |i: usize, out: &mut f64| {
            let ax = self.row_dot(i, x);
            *out = match y {
                Some(y) => alpha * ax + beta * y[i],
                None => alpha * ax,
            };
        };
        #[cfg(feature = "rayon")]
        result.par_iter_mut().enumerate().for_each(|(i, out)| kernel(i, out));
        #[cfg(not(feature = "rayon"))]
        result.iter_mut().enumerate().for_each(|(i, out)| kernel(i, out));
        Ok(())
    }

    fn create_vector(&self) -> Vec<f64> {
        vec![0.0; self.nrows]
    }

    fn backend(&self) -> BackendKind {
        BackendKind::Csr
    }
}

impl DiagonalScale<Vec<f64>> for CsrMatrix {
    fn diagonal_scale(&self, omega: f64, r: &Vec<f64>, x: &mut Vec<f64>) -> Result<(), MgError> {
        self.check_apply(r.len(), Some(x.len()), self.nrows, self.nrows)?;
        let diag = self.diagonal();
        for ((xi, ri), d) in x.iter_mut().zip(r).zip(diag) {
            if d != 0.0 {
                *xi += omega * ri / d;
            }
        }
        Ok(())
    }
}

/// Transposed view of a shared CSR matrix: applies `Mᵀ` without forming it.
#[derive(Debug, Clone)]
pub struct Transposed {
    inner: Arc<CsrMatrix>,
}

impl Transposed {
    pub fn new(inner: Arc<CsrMatrix>) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &CsrMatrix {
        &self.inner
    }
}

impl Operator<Vec<f64>> for Transposed {
    fn apply(
        &self,
        alpha: f64,
        x: &Vec<f64>,
        beta: f64,
        y: Option<&Vec<f64>>,
        result: &mut Vec<f64>,
    ) -> Result<(), MgError> {
        let m = &self.inner;
        m.check_apply(x.len(), y.map(|y| y.len()), m.ncols, m.nrows)?;
        // Scatter form: rows of M become columns of Mᵀ.
        let mut acc = vec![0.0; m.ncols];
        for i in 0..m.nrows {
            let xi = x[i];
            if xi == 0.0 {
                continue;
            }
            for (j, v) in m.row(i) {
                acc[j] += v * xi;
            }
        }
        result.resize(m.ncols, 0.0);
        for (j, out) in result.iter_mut().enumerate() {
            *out = match y {
                Some(y) => alpha * acc[j] + beta * y[j],
                None => alpha * acc[j],
            };
        }
        Ok(())
    }

    fn create_vector(&self) -> Vec<f64> {
        vec![0.0; self.inner.ncols]
    }

    fn backend(&self) -> BackendKind {
        BackendKind::CsrTranspose
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_apply() {
        // 3×3 identity in CSR: row_ptr=[0,1,2,3], col_idx=[0,1,2], vals=[1,1,1]
        let m = CsrMatrix::from_csr(3, 3, vec![0, 1, 2, 3], vec![0, 1, 2], vec![1.0, 1.0, 1.0]).unwrap();
        let x = vec![2.0, 3.0, 5.0];
        let mut y = vec![0.0; 3];
        m.apply(1.0, &x, 0.0, None, &mut y).unwrap();
        assert_eq!(y, x);
    }

    #[test]
    fn simple_pattern_and_transpose() {
        // 2×3 matrix [[1,2,0],[0,3,4]]
        let m = Arc::new(
            CsrMatrix::from_csr(2, 3, vec![0, 2, 4], vec![0, 1, 1, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap(),
        );
        let mut y = vec![0.0; 2];
        m.apply(1.0, &vec![1.0, 1.0, 1.0], 0.0, None, &mut y).unwrap();
        assert_eq!(y, vec![3.0, 7.0]);

        let t = Transposed::new(m.clone());
        let mut z = vec![0.0; 3];
        t.apply(2.0, &vec![1.0, 1.0], 1.0, Some(&vec![1.0, 1.0, 1.0]), &mut z).unwrap();
        assert_eq!(z, vec![3.0, 11.0, 9.0]);
        assert_eq!(t.backend(), BackendKind::CsrTranspose);
    }

    #[test]
    fn triplets_sum_duplicates() {
        let m = CsrMatrix::from_triplets(2, 2, &[(0, 0, 1.0), (1, 1, 2.0), (0, 0, 3.0)]).unwrap();
        assert_eq!(m.nnz(), 2);
        assert_eq!(m.diagonal(), vec![4.0, 2.0]);
        let d = m.to_dense();
        assert_eq!(d[(0, 0)], 4.0);
        assert_eq!(d[(1, 0)], 0.0);
    }

    #[test]
    fn damped_diagonal_scaling() {
        let m = CsrMatrix::from_triplets(3, 3, &[(0, 0, 2.0), (1, 1, 4.0), (0, 1, 1.0)]).unwrap();
        let mut x = vec![1.0, 1.0, 1.0];
        m.diagonal_scale(0.5, &vec![4.0, 8.0, 3.0], &mut x).unwrap();
        assert_eq!(x, vec![2.0, 2.0, 1.0]);
    }

    #[test]
    fn rejects_out_of_range_columns() {
        assert!(CsrMatrix::from_csr(1, 2, vec![0, 1], vec![2], vec![1.0]).is_err());
    }

    #[test]
    fn rejects_malformed_row_offsets() {
        // Decreasing offsets would slice row 1 as 2..1.
        let err = CsrMatrix::from_csr(2, 2, vec![0, 2, 1], vec![0], vec![1.0]).unwrap_err();
        assert!(matches!(err, MgError::DimensionMismatch { expected: 2, found: 1 }));
        // Offsets that do not start at zero.
        let err = CsrMatrix::from_csr(1, 2, vec![1, 1], vec![], vec![]).unwrap_err();
        assert!(matches!(err, MgError::DimensionMismatch { expected: 0, found: 1 }));
        // Last offset disagrees with the stored entries.
        assert!(CsrMatrix::from_csr(2, 2, vec![0, 1, 3], vec![0, 1], vec![1.0, 1.0]).is_err());
    }
}
