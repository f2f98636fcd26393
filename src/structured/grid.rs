//! The local piece of a distributed structured index space.

use log::debug;

use super::box_manager::BoxManager;
use super::boxes::{BoxArray, GridBox};
use super::index::{Index, MAX_DIM};
use crate::error::MgError;
use crate::parallel::{Comm, ReduceOp};

/// Neighbour search distance used when gathering box manager entries.
pub const DEFAULT_MAX_DISTANCE: i32 = 8;

/// Boxes owned by this rank plus the global information derived from all
/// ranks' boxes at [`StructGrid::assemble`]. Local box `i` has id `i`.
///
/// Grids are shared between vectors, matrices and communication packages as
/// `Arc<StructGrid<C>>` once assembled.
pub struct StructGrid<C: Comm> {
    comm: C,
    ndim: usize,
    boxes: BoxArray,
    periodic: Index,
    max_distance: i32,
    num_ghost: [i32; 2 * MAX_DIM],
    local_size: usize,
    global_size: usize,
    bounding_box: GridBox,
    pshifts: Vec<Index>,
    boxman: Option<BoxManager<C>>,
}

impl<C: Comm> StructGrid<C> {
    pub fn new(comm: C, ndim: usize) -> Result<Self, MgError> {
        if ndim == 0 || ndim > MAX_DIM {
            return Err(MgError::InvalidDimension(ndim));
        }
        Ok(StructGrid {
            comm,
            ndim,
            boxes: BoxArray::new(),
            periodic: Index::ZERO,
            max_distance: DEFAULT_MAX_DISTANCE,
            num_ghost: [0; 2 * MAX_DIM],
            local_size: 0,
            global_size: 0,
            bounding_box: GridBox::empty(ndim),
            pshifts: Vec::new(),
            boxman: None,
        })
    }

    fn ensure_open(&self) -> Result<(), MgError> {
        if self.boxman.is_some() {
            Err(MgError::AlreadyAssembled("struct grid"))
        } else {
            Ok(())
        }
    }

    /// Add a local box.
    pub fn set_extents(&mut self, imin: Index, imax: Index) -> Result<(), MgError> {
        self.ensure_open()?;
        self.boxes.append(GridBox::new(imin, imax, self.ndim)?);
        Ok(())
    }

    /// Period per axis; zero means not periodic.
    pub fn set_periodic(&mut self, periodic: Index) -> Result<(), MgError> {
        self.ensure_open()?;
        self.periodic = periodic;
        Ok(())
    }

    pub fn set_max_distance(&mut self, max_distance: i32) -> Result<(), MgError> {
        self.ensure_open()?;
        self.max_distance = max_distance;
        Ok(())
    }

    pub fn set_num_ghost(&mut self, num_ghost: [i32; 2 * MAX_DIM]) -> Result<(), MgError> {
        self.ensure_open()?;
        self.num_ghost = num_ghost;
        Ok(())
    }

    /// Collective: global sizes, bounding box, periodic shifts and the box manager.
    pub fn assemble(&mut self) -> Result<(), MgError> {
        if self.boxman.is_some() {
            return Ok(());
        }
        let ndim = self.ndim;
        self.local_size = self.boxes.volume();
        let mut size = [self.local_size as i64];
        self.comm.all_reduce_i64(&mut size, ReduceOp::Sum)?;
        self.global_size = size[0] as usize;

        let mut lo = [i64::MAX; MAX_DIM];
        let mut hi = [i64::MIN; MAX_DIM];
        if let Some(bb) = self.boxes.bounding_box() {
            for d in 0..ndim {
                lo[d] = bb.imin()[d] as i64;
                hi[d] = bb.imax()[d] as i64;
            }
        }
        self.comm.all_reduce_i64(&mut lo, ReduceOp::Min)?;
        self.comm.all_reduce_i64(&mut hi, ReduceOp::Max)?;
        self.bounding_box = if self.global_size == 0 {
            GridBox::empty(ndim)
        } else {
            let mut imin = Index::ZERO;
            let mut imax = Index::ZERO;
            for d in 0..ndim {
                imin[d] = lo[d] as i32;
                imax[d] = hi[d] as i32;
            }
            GridBox::new(imin, imax, ndim)?
        };

        self.pshifts = periodic_shifts(&self.periodic, ndim);

        let mut bm = BoxManager::new(self.boxes.len(), 0, ndim, self.bounding_box, self.comm.clone())?;
        bm.set_num_ghost(self.num_ghost);
        let rank = self.comm.rank();
        for (id, b) in self.boxes.iter().enumerate() {
            bm.add_entry(b.imin(), b.imax(), rank, id, &[])?;
            if b.is_empty() {
                continue;
            }
            let region = b.grow_by_value(self.max_distance);
            bm.gather_entries(region.imin(), region.imax())?;
            for s in &self.pshifts {
                let image = region.shift_pos(s);
                bm.gather_entries(image.imin(), image.imax())?;
            }
        }
        bm.assemble()?;
        debug!(
            "rank {rank}: struct grid assembled, {} local / {} global points, {} periodic images",
            self.local_size,
            self.global_size,
            self.pshifts.len()
        );
        self.boxman = Some(bm);
        Ok(())
    }

    /// Grid of the lattice points `origin + stride * k`, in coarse indices.
    /// Empty coarse boxes are kept so box ids stay aligned with the fine grid.
    pub fn coarsen(&self, origin: &Index, stride: &Index) -> Result<StructGrid<C>, MgError> {
        let mut coarse = StructGrid::new(self.comm.clone(), self.ndim)?;
        for b in self.boxes.iter() {
            let c = b.coarsen(origin, stride);
            coarse.boxes.append(c);
        }
        let mut periodic = Index::ZERO;
        for d in 0..self.ndim {
            if self.periodic[d] > 0 {
                periodic[d] = self.periodic[d] / stride[d];
            }
        }
        coarse.periodic = periodic;
        coarse.max_distance = self.max_distance;
        coarse.num_ghost = self.num_ghost;
        coarse.assemble()?;
        Ok(coarse)
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    pub fn ndim(&self) -> usize {
        self.ndim
    }

    pub fn boxes(&self) -> &BoxArray {
        &self.boxes
    }

    pub fn periodic(&self) -> Index {
        self.periodic
    }

    pub fn max_distance(&self) -> i32 {
        self.max_distance
    }

    pub fn num_ghost(&self) -> [i32; 2 * MAX_DIM] {
        self.num_ghost
    }

    pub fn local_size(&self) -> usize {
        self.local_size
    }

    pub fn global_size(&self) -> usize {
        self.global_size
    }

    pub fn bounding_box(&self) -> &GridBox {
        &self.bounding_box
    }

    /// Non-zero periodic image shifts.
    pub fn pshifts(&self) -> &[Index] {
        &self.pshifts
    }

    pub fn is_assembled(&self) -> bool {
        self.boxman.is_some()
    }

    pub fn box_manager(&self) -> Result<&BoxManager<C>, MgError> {
        self.boxman.as_ref().ok_or(MgError::NotAssembled("struct grid"))
    }
}

/// All non-zero combinations of `{-1, 0, 1} * periodic[d]` over periodic axes.
fn periodic_shifts(periodic: &Index, ndim: usize) -> Vec<Index> {
    let mut shifts = vec![Index::ZERO];
    for d in 0..ndim {
        if periodic[d] <= 0 {
            continue;
        }
        let mut next = Vec::with_capacity(shifts.len() * 3);
        for s in &shifts {
            for k in [-1, 0, 1] {
                let mut t = *s;
                t[d] = k * periodic[d];
                next.push(t);
            }
        }
        shifts = next;
    }
    shifts.retain(|s| *s != Index::ZERO);
    shifts
}
