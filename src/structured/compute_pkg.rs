//! Splitting a grid's boxes for communication/computation overlap.
//!
//! A stencil computation on box `b` only needs ghost values near the faces
//! of `b`. The points whose stencil stays inside `b` form the independent
//! box; the rest of `b` is covered by dependent boxes. A consumer starts the
//! ghost exchange, works on the independent boxes, finalizes, then works on
//! the dependent boxes:
//!
//! ```text
//! let handle = pkg.initialize_indt_computations(&data, tag)?;
//! for (i, boxes) in pkg.indt_boxes().iter() { /* local-only work */ }
//! ComputePkg::finalize_indt_computations(handle, &mut data)?;
//! for (i, boxes) in pkg.dept_boxes().iter() { /* work reading ghosts */ }
//! ```

use std::sync::Arc;

use super::boxes::{BoxArray, BoxArrayArray};
use super::comm_handle::CommHandle;
use super::comm_info::CommInfo;
use super::comm_pkg::{CommAction, CommPkg, CommValue, DataSpace};
use super::grid::StructGrid;
use super::index::{Index, MAX_DIM};
use super::stencil::StructStencil;
use crate::error::MgError;
use crate::parallel::Comm;

/// Ghost exchange plus the independent/dependent split of every local box.
#[derive(Debug, Clone)]
pub struct ComputeInfo {
    comm_info: CommInfo,
    indt_boxes: BoxArrayArray,
    dept_boxes: BoxArrayArray,
    stride: Index,
}

impl ComputeInfo {
    pub fn from_stencil<C: Comm>(grid: &StructGrid<C>, stencil: &StructStencil) -> Result<Self, MgError> {
        let comm_info = CommInfo::from_stencil(grid, stencil)?;
        let reach = stencil.reach();
        let shrink = reach.map(|r| -r);
        let n = grid.boxes().len();
        let mut indt_boxes = BoxArrayArray::with_len(n);
        let mut dept_boxes = BoxArrayArray::with_len(n);
        for (i, b) in grid.boxes().iter().enumerate() {
            if b.is_empty() {
                continue;
            }
            let indt = b.grow_by_array(&shrink);
            if indt.is_empty() {
                dept_boxes.array_mut(i).append(*b);
            } else {
                dept_boxes.array_mut(i).append_array(&b.subtract(&indt));
                indt_boxes.array_mut(i).append(indt);
            }
        }
        Ok(ComputeInfo {
            comm_info,
            indt_boxes,
            dept_boxes,
            stride: Index::splat(1, MAX_DIM),
        })
    }

    /// Restrict the computation to the lattice `origin + stride * k`.
    pub fn project(&mut self, origin: &Index, stride: &Index) {
        for boxes in [&mut self.indt_boxes, &mut self.dept_boxes] {
            for i in 0..boxes.len() {
                let projected: Vec<_> = boxes
                    .array(i)
                    .iter()
                    .map(|b| b.project(origin, stride))
                    .filter(|b| !b.is_empty())
                    .collect();
                *boxes.array_mut(i) = BoxArray::from(projected);
            }
        }
        self.comm_info.project(origin, stride);
        self.stride = *stride;
    }

    pub fn comm_info(&self) -> &CommInfo {
        &self.comm_info
    }

    pub fn indt_boxes(&self) -> &BoxArrayArray {
        &self.indt_boxes
    }

    pub fn dept_boxes(&self) -> &BoxArrayArray {
        &self.dept_boxes
    }
}

/// A compiled [`ComputeInfo`]: the ghost exchange against a concrete data
/// layout plus the box partition.
pub struct ComputePkg<C: Comm> {
    comm_pkg: CommPkg,
    indt_boxes: BoxArrayArray,
    dept_boxes: BoxArrayArray,
    stride: Index,
    grid: Arc<StructGrid<C>>,
    data_space: DataSpace,
}

impl<C: Comm> ComputePkg<C> {
    /// `data_space` must hold one ghost-padded box per grid box, wide enough
    /// for the stencil the info was built from.
    pub fn new(info: ComputeInfo, data_space: DataSpace, grid: Arc<StructGrid<C>>) -> Result<Self, MgError> {
        if data_space.boxes().len() != grid.boxes().len() {
            return Err(MgError::DimensionMismatch {
                expected: grid.boxes().len(),
                found: data_space.boxes().len(),
            });
        }
        let comm_pkg = CommPkg::new(&info.comm_info, &data_space, &data_space, None, false, grid.comm())?;
        Ok(ComputePkg {
            comm_pkg,
            indt_boxes: info.indt_boxes,
            dept_boxes: info.dept_boxes,
            stride: info.stride,
            grid,
            data_space,
        })
    }

    /// Start filling the ghost layers of `data`.
    pub fn initialize_indt_computations<'p, T: CommValue>(&'p self, data: &[T], tag: i32) -> Result<CommHandle<'p, T, C>, MgError> {
        CommHandle::initialize(&self.comm_pkg, self.grid.comm(), &[data], CommAction::Set, tag)
    }

    /// Wait for the ghost values started by
    /// [`initialize_indt_computations`](Self::initialize_indt_computations).
    pub fn finalize_indt_computations<T: CommValue>(handle: CommHandle<'_, T, C>, data: &mut [T]) -> Result<(), MgError> {
        handle.finalize(&mut [data])
    }

    pub fn comm_pkg(&self) -> &CommPkg {
        &self.comm_pkg
    }

    pub fn indt_boxes(&self) -> &BoxArrayArray {
        &self.indt_boxes
    }

    pub fn dept_boxes(&self) -> &BoxArrayArray {
        &self.dept_boxes
    }

    pub fn stride(&self) -> Index {
        self.stride
    }

    pub fn grid(&self) -> &Arc<StructGrid<C>> {
        &self.grid
    }

    pub fn data_space(&self) -> &DataSpace {
        &self.data_space
    }

    pub fn num_values(&self) -> usize {
        self.data_space.num_values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parallel::ThreadComm;
    use crate::structured::GridBox;

    fn grid_2d() -> StructGrid<ThreadComm> {
        let mut g = StructGrid::new(ThreadComm::serial(), 2).unwrap();
        g.set_extents(Index::new(0, 0, 0), Index::new(5, 3, 0)).unwrap();
        g.set_extents(Index::new(6, 0, 0), Index::new(6, 3, 0)).unwrap();
        g.assemble().unwrap();
        g
    }

    #[test]
    fn split_covers_every_box() {
        let g = grid_2d();
        let info = ComputeInfo::from_stencil(&g, &StructStencil::star(2).unwrap()).unwrap();
        assert_eq!(info.indt_boxes().array(0).as_slice(), &[GridBox::from_bounds(&[1, 1], &[4, 2]).unwrap()]);
        assert_eq!(info.dept_boxes().array(0).volume(), 24 - 8);
        // A one-wide box has no interior.
        assert!(info.indt_boxes().array(1).is_empty());
        assert_eq!(info.dept_boxes().array(1).volume(), 4);
        for (i, b) in g.boxes().iter().enumerate() {
            let mut cover = info.indt_boxes().array(i).clone();
            cover.append_array(info.dept_boxes().array(i));
            assert_eq!(cover.volume(), b.volume());
        }
    }

    #[test]
    fn projection_keeps_only_lattice_points() {
        let g = grid_2d();
        let mut info = ComputeInfo::from_stencil(&g, &StructStencil::star(2).unwrap()).unwrap();
        let stride = Index::new(2, 1, 1);
        info.project(&Index::ZERO, &stride);
        let count = |i: usize| -> usize {
            let indt: usize = info.indt_boxes().array(i).iter().map(|b| b.stride_volume(&stride)).sum();
            let dept: usize = info.dept_boxes().array(i).iter().map(|b| b.stride_volume(&stride)).sum();
            indt + dept
        };
        assert_eq!(count(0), 12);
        assert_eq!(count(1), 4);
        assert_eq!(info.comm_info().send_stride(), stride);
    }

    #[test]
    fn ghost_exchange_through_the_package() {
        let g = Arc::new(grid_2d());
        let stencil = StructStencil::star(2).unwrap();
        let info = ComputeInfo::from_stencil(&g, &stencil).unwrap();
        let padded: Vec<_> = g.boxes().iter().map(|b| b.grow_by_array(&stencil.reach())).collect();
        let space = DataSpace::new(BoxArray::from(padded), 1);
        let pkg = ComputePkg::new(info, space.clone(), g.clone()).unwrap();

        let mut data = vec![0i64; space.len()];
        // Box 1 holds x = 6; its stored block is x in 5..=7, y in -1..=4.
        let b1 = *space.data_box(1).unwrap();
        for y in 0..=3 {
            data[space.start(1) + b1.index_rank(&Index::new(6, y, 0))] = 10 + y as i64;
        }
        let handle = pkg.initialize_indt_computations(&data, 7).unwrap();
        ComputePkg::finalize_indt_computations(handle, &mut data).unwrap();
        let b0 = *space.data_box(0).unwrap();
        for y in 0..=3 {
            assert_eq!(data[space.start(0) + b0.index_rank(&Index::new(6, y, 0))], 10 + y as i64);
        }
    }
}
