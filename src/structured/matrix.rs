//! Constant-coefficient stencil operators on struct grids.
//!
//! `apply` follows the compute package protocol: the owned values of `x` are
//! copied into a ghost-padded scratch array, the ghost exchange is started,
//! the independent boxes are computed, the exchange is finalized and the
//! dependent boxes are computed. Ghost points that no box owns (outside a
//! non-periodic domain) read as zero.

use std::sync::Arc;

use log::debug;

use super::boxes::{BoxArray, BoxArrayArray, GridBox};
use super::comm_pkg::DataSpace;
use super::compute_pkg::{ComputeInfo, ComputePkg};
use super::grid::StructGrid;
use super::index::MAX_DIM;
use super::stencil::StructStencil;
use super::vector::{StructVector, for_each_point};
use crate::core::traits::{BackendKind, DiagonalScale, Operator, Vector};
use crate::error::MgError;
use crate::parallel::Comm;

const APPLY_TAG: i32 = 202;

pub struct StructMatrix<C: Comm> {
    grid: Arc<StructGrid<C>>,
    stencil: StructStencil,
    coeffs: Vec<f64>,
    compute: ComputePkg<C>,
    template: StructVector<f64, C>,
}

impl<C: Comm> StructMatrix<C> {
    /// `coeffs[k]` multiplies the value at `stencil.offsets()[k]`.
    pub fn new(grid: Arc<StructGrid<C>>, stencil: StructStencil, coeffs: Vec<f64>) -> Result<Self, MgError> {
        if coeffs.len() != stencil.len() {
            return Err(MgError::DimensionMismatch { expected: stencil.len(), found: coeffs.len() });
        }
        if stencil.ndim() != grid.ndim() {
            return Err(MgError::DimensionMismatch { expected: grid.ndim(), found: stencil.ndim() });
        }
        let reach = stencil.reach();
        let info = ComputeInfo::from_stencil(&grid, &stencil)?;
        let padded: Vec<GridBox> = grid
            .boxes()
            .iter()
            .map(|b| if b.is_empty() { *b } else { b.grow_by_array(&reach) })
            .collect();
        let compute = ComputePkg::new(info, DataSpace::new(BoxArray::from(padded), 1), Arc::clone(&grid))?;
        let template = StructVector::new(Arc::clone(&grid), reach)?;
        debug!(
            "rank {}: struct matrix with {} stencil entries on {} boxes",
            grid.comm().rank(),
            stencil.len(),
            grid.boxes().len()
        );
        Ok(StructMatrix { grid, stencil, coeffs, compute, template })
    }

    /// Standard `2 * ndim + 1` point negative Laplacian.
    pub fn laplacian(grid: Arc<StructGrid<C>>) -> Result<Self, MgError> {
        let ndim = grid.ndim();
        let stencil = StructStencil::star(ndim)?;
        let mut coeffs = vec![-1.0; stencil.len()];
        coeffs[0] = 2.0 * ndim as f64;
        StructMatrix::new(grid, stencil, coeffs)
    }

    pub fn grid(&self) -> &Arc<StructGrid<C>> {
        &self.grid
    }

    pub fn stencil(&self) -> &StructStencil {
        &self.stencil
    }

    pub fn coeffs(&self) -> &[f64] {
        &self.coeffs
    }

    pub fn num_ghost(&self) -> [i32; 2 * MAX_DIM] {
        self.stencil.reach()
    }

    /// Coefficient of the zero offset, or zero when the stencil has none.
    pub fn diagonal(&self) -> f64 {
        self.stencil.diag_entry().map_or(0.0, |k| self.coeffs[k])
    }

    fn check_vector(&self, v: &StructVector<f64, C>) -> Result<(), MgError> {
        if Arc::ptr_eq(v.grid(), &self.grid) {
            Ok(())
        } else {
            Err(MgError::Unsupported("struct vector lives on a different grid"))
        }
    }

    /// `result = alpha * (A * scratch) + beta * y` on the points of `regions`.
    fn compute_boxes(
        &self,
        regions: &BoxArrayArray,
        scratch: &[f64],
        alpha: f64,
        beta: f64,
        y: Option<&StructVector<f64, C>>,
        result: &mut StructVector<f64, C>,
    ) {
        let space = self.compute.data_space();
        for (i, boxes) in regions.iter() {
            let (Some(sbox), Some(rbox)) = (space.data_box(i).copied(), result.data_space().data_box(i).copied()) else {
                continue;
            };
            let sstart = space.start(i);
            let rstart = result.data_space().start(i);
            let ybox = y.and_then(|y| y.data_space().data_box(i).copied().map(|b| (b, y.data_space().start(i), y.data())));
            let [dx, dy, _] = sbox.sizes();
            let offsets: Vec<isize> = self
                .stencil
                .offsets()
                .iter()
                .map(|o| o[0] as isize + dx as isize * (o[1] as isize + dy as isize * o[2] as isize))
                .collect();
            let out = result.data_mut();
            for region in boxes {
                for_each_point(region, &sbox, sstart, |p, so| {
                    let ax: f64 = offsets
                        .iter()
                        .zip(&self.coeffs)
                        .map(|(off, c)| c * scratch[(so as isize + off) as usize])
                        .sum();
                    let yv = match ybox {
                        Some((b, start, data)) => beta * data[start + b.index_rank(&p)],
                        None => 0.0,
                    };
                    out[rstart + rbox.index_rank(&p)] = alpha * ax + yv;
                });
            }
        }
    }
}

impl<C: Comm> Operator<StructVector<f64, C>> for StructMatrix<C> {
    fn apply(
        &self,
        alpha: f64,
        x: &StructVector<f64, C>,
        beta: f64,
        y: Option<&StructVector<f64, C>>,
        result: &mut StructVector<f64, C>,
    ) -> Result<(), MgError> {
        self.check_vector(x)?;
        self.check_vector(result)?;
        if let Some(y) = y {
            self.check_vector(y)?;
        }
        let space = self.compute.data_space();
        let mut scratch = vec![0.0; space.len()];
        x.for_each_owned(|i, p, o| {
            if let Some(b) = space.data_box(i) {
                scratch[space.start(i) + b.index_rank(&p)] = x.data()[o];
            }
        });

        let handle = self.compute.initialize_indt_computations(&scratch, APPLY_TAG)?;
        self.compute_boxes(self.compute.indt_boxes(), &scratch, alpha, beta, y, result);
        ComputePkg::finalize_indt_computations(handle, &mut scratch)?;
        self.compute_boxes(self.compute.dept_boxes(), &scratch, alpha, beta, y, result);
        Ok(())
    }

    fn create_vector(&self) -> StructVector<f64, C> {
        self.template.clone_layout()
    }

    fn backend(&self) -> BackendKind {
        BackendKind::Struct
    }
}

impl<C: Comm> DiagonalScale<StructVector<f64, C>> for StructMatrix<C> {
    fn diagonal_scale(&self, omega: f64, r: &StructVector<f64, C>, x: &mut StructVector<f64, C>) -> Result<(), MgError> {
        self.check_vector(r)?;
        self.check_vector(x)?;
        let d = self.diagonal();
        if d == 0.0 {
            return Ok(());
        }
        x.axpy(omega / d, r)
    }
}
