//! Ghost-padded vectors over a struct grid.

use std::sync::Arc;

use num_traits::Zero;

use super::boxes::{BoxArray, GridBox};
use super::comm_handle::CommHandle;
use super::comm_info::CommInfo;
use super::comm_pkg::{CommAction, CommPkg, CommValue, DataSpace};
use super::grid::StructGrid;
use super::index::{Index, MAX_DIM};
use crate::core::traits::Vector;
use crate::error::MgError;
use crate::parallel::Comm;

const GHOST_TAG: i32 = 201;

/// Visit every point of `region` in x-fastest order, passing the point and
/// its offset in a block of layout `data_box` starting at `start`.
pub(crate) fn for_each_point(region: &GridBox, data_box: &GridBox, start: usize, mut f: impl FnMut(Index, usize)) {
    if region.is_empty() {
        return;
    }
    let [nx, ny, nz] = region.sizes();
    let [dx, dy, _] = data_box.sizes();
    let base = start + data_box.index_rank(&region.imin());
    let lo = region.imin();
    for k in 0..nz {
        for j in 0..ny {
            let row = base + dx * (j + dy * k);
            for i in 0..nx {
                let p = Index::new(lo[0] + i as i32, lo[1] + j as i32, lo[2] + k as i32);
                f(p, row + i);
            }
        }
    }
}

/// One value per grid point, stored box by box with `num_ghost` extra layers
/// around every box.
#[derive(Clone)]
pub struct StructVector<T: CommValue, C: Comm> {
    grid: Arc<StructGrid<C>>,
    num_ghost: [i32; 2 * MAX_DIM],
    space: Arc<DataSpace>,
    ghost_pkg: Arc<CommPkg>,
    data: Vec<T>,
}

impl<T: CommValue, C: Comm> StructVector<T, C> {
    /// Zero vector on an assembled grid.
    pub fn new(grid: Arc<StructGrid<C>>, num_ghost: [i32; 2 * MAX_DIM]) -> Result<Self, MgError> {
        if !grid.is_assembled() {
            return Err(MgError::NotAssembled("struct grid"));
        }
        let padded: Vec<GridBox> = grid
            .boxes()
            .iter()
            .map(|b| if b.is_empty() { *b } else { b.grow_by_array(&num_ghost) })
            .collect();
        let space = DataSpace::new(BoxArray::from(padded), 1);
        let info = CommInfo::from_num_ghost(&grid, &num_ghost)?;
        let ghost_pkg = CommPkg::new(&info, &space, &space, None, false, grid.comm())?;
        let data = vec![T::zero(); space.len()];
        Ok(StructVector {
            grid,
            num_ghost,
            space: Arc::new(space),
            ghost_pkg: Arc::new(ghost_pkg),
            data,
        })
    }

    pub fn grid(&self) -> &Arc<StructGrid<C>> {
        &self.grid
    }

    pub fn num_ghost(&self) -> [i32; 2 * MAX_DIM] {
        self.num_ghost
    }

    pub fn data_space(&self) -> &DataSpace {
        &self.space
    }

    /// Raw storage, including ghost layers.
    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    fn same_layout(&self, other: &Self) -> Result<(), MgError> {
        if Arc::ptr_eq(&self.space, &other.space) || self.space == other.space {
            Ok(())
        } else {
            Err(MgError::DimensionMismatch {
                expected: self.data.len(),
                found: other.data.len(),
            })
        }
    }

    /// Storage offset of an owned point.
    fn locate(&self, idx: &Index) -> Option<usize> {
        let i = self.grid.boxes().iter().position(|b| b.contains_index(idx))?;
        let data_box = self.space.data_box(i)?;
        Some(self.space.start(i) + data_box.index_rank(idx))
    }

    /// Value at an owned point; `None` when no local box contains `idx`.
    pub fn get_value(&self, idx: &Index) -> Option<T> {
        self.locate(idx).map(|o| self.data[o])
    }

    pub fn set_value(&mut self, idx: &Index, value: T) -> Result<(), MgError> {
        let o = self
            .locate(idx)
            .ok_or(MgError::Unsupported("set_value outside the local boxes"))?;
        self.data[o] = value;
        Ok(())
    }

    /// Set every owned point; ghost layers are left alone.
    pub fn set_constant_values(&mut self, value: T) {
        for (i, b) in self.grid.boxes().iter().enumerate() {
            let Some(data_box) = self.space.data_box(i) else { continue };
            let data = &mut self.data;
            for_each_point(b, data_box, self.space.start(i), |_, o| data[o] = value);
        }
    }

    /// Write `values` (x-fastest over `bx`) into the owned points of `bx`.
    pub fn set_box_values(&mut self, bx: &GridBox, values: &[T], action: CommAction) -> Result<(), MgError> {
        if values.len() != bx.volume() {
            return Err(MgError::DimensionMismatch { expected: bx.volume(), found: values.len() });
        }
        for (i, b) in self.grid.boxes().iter().enumerate() {
            let Some(data_box) = self.space.data_box(i) else { continue };
            let region = b.intersect(bx);
            let data = &mut self.data;
            for_each_point(&region, data_box, self.space.start(i), |p, o| {
                let v = values[bx.index_rank(&p)];
                match action {
                    CommAction::Set => data[o] = v,
                    CommAction::Add => data[o] += v,
                }
            });
        }
        Ok(())
    }

    /// Owned values of `bx`, x-fastest; points not owned here read as zero.
    pub fn get_box_values(&self, bx: &GridBox) -> Vec<T> {
        let mut out = vec![T::zero(); bx.volume()];
        for (i, b) in self.grid.boxes().iter().enumerate() {
            let Some(data_box) = self.space.data_box(i) else { continue };
            let region = b.intersect(bx);
            for_each_point(&region, data_box, self.space.start(i), |p, o| out[bx.index_rank(&p)] = self.data[o]);
        }
        out
    }

    /// Fill the ghost layers from the owners of the ghost points.
    /// Collective over the grid's communicator.
    pub fn update_ghosts(&mut self) -> Result<(), MgError> {
        let pkg = Arc::clone(&self.ghost_pkg);
        let handle = CommHandle::initialize(&pkg, self.grid.comm(), &[&self.data[..]], CommAction::Set, GHOST_TAG)?;
        handle.finalize(&mut [&mut self.data[..]])
    }

    pub fn copy_from(&mut self, other: &Self) -> Result<(), MgError> {
        self.same_layout(other)?;
        self.data.copy_from_slice(&other.data);
        Ok(())
    }

    /// Visit every owned point with its storage offset.
    pub(crate) fn for_each_owned(&self, mut f: impl FnMut(usize, Index, usize)) {
        for (i, b) in self.grid.boxes().iter().enumerate() {
            if let Some(data_box) = self.space.data_box(i) {
                for_each_point(b, data_box, self.space.start(i), |p, o| f(i, p, o));
            }
        }
    }
}

impl<C: Comm> StructVector<f64, C> {
    /// Global inner product over owned points.
    pub fn inner_prod(&self, other: &Self) -> Result<f64, MgError> {
        self.same_layout(other)?;
        let mut local = 0.0;
        self.for_each_owned(|_, _, o| local += self.data[o] * other.data[o]);
        self.grid.comm().all_reduce(local)
    }

    /// `self += alpha * x` on owned points.
    pub fn axpy(&mut self, alpha: f64, x: &Self) -> Result<(), MgError> {
        self.same_layout(x)?;
        let space = Arc::clone(&self.space);
        for (i, b) in self.grid.boxes().iter().enumerate() {
            let Some(data_box) = space.data_box(i) else { continue };
            let data = &mut self.data;
            for_each_point(b, data_box, space.start(i), |_, o| data[o] += alpha * x.data[o]);
        }
        Ok(())
    }
}

impl<C: Comm> Vector for StructVector<f64, C> {
    fn copy_to(&self, dest: &mut Self) {
        if dest.same_layout(self).is_ok() {
            dest.data.copy_from_slice(&self.data);
        } else {
            *dest = self.clone();
        }
    }

    fn clone_layout(&self) -> Self {
        StructVector {
            grid: Arc::clone(&self.grid),
            num_ghost: self.num_ghost,
            space: Arc::clone(&self.space),
            ghost_pkg: Arc::clone(&self.ghost_pkg),
            data: vec![0.0; self.data.len()],
        }
    }

    fn set_constant_value(&mut self, value: f64) {
        self.set_constant_values(value);
    }

    fn norm2(&self) -> Result<f64, MgError> {
        self.inner_prod(self).map(f64::sqrt)
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parallel::ThreadComm;
    use approx::assert_abs_diff_eq;

    fn line(comm: ThreadComm, lo: i32, hi: i32) -> Arc<StructGrid<ThreadComm>> {
        let mut g = StructGrid::new(comm, 1).unwrap();
        g.set_extents(Index::new(lo, 0, 0), Index::new(hi, 0, 0)).unwrap();
        g.assemble().unwrap();
        Arc::new(g)
    }

    #[test]
    fn values_by_index_and_box() {
        let g = line(ThreadComm::serial(), 0, 4);
        let mut v = StructVector::<f64, _>::new(g, [1, 1, 0, 0, 0, 0]).unwrap();
        assert_eq!(v.data().len(), 7);
        v.set_constant_values(2.0);
        assert_eq!(v.data()[0], 0.0);
        v.set_value(&Index::new(3, 0, 0), 5.0).unwrap();
        assert_eq!(v.get_value(&Index::new(3, 0, 0)), Some(5.0));
        assert_eq!(v.get_value(&Index::new(9, 0, 0)), None);
        assert!(v.set_value(&Index::new(-1, 0, 0), 1.0).is_err());

        let bx = GridBox::from_bounds(&[3], &[6]).unwrap();
        v.set_box_values(&bx, &[1.0, 1.0, 1.0, 1.0], CommAction::Add).unwrap();
        assert_eq!(v.get_box_values(&bx), vec![6.0, 3.0, 0.0, 0.0]);
        assert!(v.set_box_values(&bx, &[1.0], CommAction::Set).is_err());
    }

    #[test]
    fn periodic_ghosts_wrap() {
        let mut g = StructGrid::new(ThreadComm::serial(), 1).unwrap();
        g.set_extents(Index::new(0, 0, 0), Index::new(3, 0, 0)).unwrap();
        g.set_periodic(Index::new(4, 0, 0)).unwrap();
        g.assemble().unwrap();
        let mut v = StructVector::<i32, _>::new(Arc::new(g), [1, 1, 0, 0, 0, 0]).unwrap();
        v.set_box_values(&GridBox::from_bounds(&[0], &[3]).unwrap(), &[1, 2, 3, 4], CommAction::Set)
            .unwrap();
        v.update_ghosts().unwrap();
        assert_eq!(v.data(), &[4, 1, 2, 3, 4, 1]);
    }

    #[test]
    fn distributed_ghosts_and_norm() {
        let out = ThreadComm::run(2, |comm| {
            let r = comm.rank() as i32;
            let g = line(comm, 4 * r, 4 * r + 3);
            let mut v = StructVector::<f64, _>::new(g, [1, 1, 0, 0, 0, 0]).unwrap();
            v.set_constant_values(r as f64 + 1.0);
            v.update_ghosts().unwrap();
            let w = v.clone();
            let mut z = v.clone_layout();
            z.axpy(2.0, &w).unwrap();
            (v.data().to_vec(), v.norm2().unwrap(), z.inner_prod(&w).unwrap())
        });
        assert_eq!(out[0].0, vec![0.0, 1.0, 1.0, 1.0, 1.0, 2.0]);
        assert_eq!(out[1].0, vec![1.0, 2.0, 2.0, 2.0, 2.0, 0.0]);
        for (_, norm, ip) in &out {
            assert_abs_diff_eq!(*norm, 20f64.sqrt(), epsilon = 1e-12);
            assert_abs_diff_eq!(*ip, 40.0, epsilon = 1e-12);
        }
    }
}
