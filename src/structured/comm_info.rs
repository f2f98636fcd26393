//! Symbolic communication patterns: which sub-boxes go from which local box
//! to which remote box.
//!
//! Every region is recorded on both sides of the exchange. A receiver finds
//! its regions by intersecting the ghost slabs of its boxes with neighbour
//! boxes (and their periodic images); a sender finds the same regions by
//! intersecting its boxes (shifted by every periodic image) with the ghost
//! slabs of nearby boxes. Neither side negotiates with the other: both sort
//! their lists by `(peer, sender box, receiver box, region in receiver
//! coordinates)`, so the k-th region a rank sends to a peer is the k-th
//! region that peer receives from it.

use std::sync::Arc;

use super::box_manager::BoxManager;
use super::boxes::{BoxArray, BoxArrayArray, GridBox};
use super::grid::StructGrid;
use super::index::{Index, MAX_DIM};
use super::stencil::{CommStencil, StructStencil};
use crate::error::MgError;
use crate::parallel::Comm;

/// One region of an exchange as seen by one side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommRegion {
    /// Local box whose data is read (send) or written (receive).
    pub local_box: usize,
    pub proc: usize,
    /// Box id on `proc`.
    pub remote_box: usize,
    /// Region in local data coordinates.
    pub region: GridBox,
    /// The same region in the receiver's coordinates.
    pub recv_region: GridBox,
    /// Index into the transform table, for sends only.
    pub transform: Option<usize>,
}

impl CommRegion {
    fn send_key(&self) -> (usize, usize, usize, GridBox) {
        (self.proc, self.local_box, self.remote_box, self.recv_region)
    }

    fn recv_key(&self) -> (usize, usize, usize, GridBox) {
        (self.proc, self.remote_box, self.local_box, self.recv_region)
    }
}

/// Coordinate transform of a send region: receiver axis `d` walks sender
/// axis `coords[d]` in direction `dirs[d]` (`1` or `-1`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transform {
    pub coords: [usize; MAX_DIM],
    pub dirs: [i32; MAX_DIM],
}

impl Transform {
    pub const IDENTITY: Transform = Transform { coords: [0, 1, 2], dirs: [1, 1, 1] };
}

#[derive(Debug, Clone)]
pub struct CommInfo {
    ndim: usize,
    sends: Vec<CommRegion>,
    recvs: Vec<CommRegion>,
    transforms: Vec<Transform>,
    send_stride: Index,
    recv_stride: Index,
    boxes_match: bool,
}

impl CommInfo {
    /// Build from explicit region lists; both lists are put in canonical order.
    pub fn from_regions(ndim: usize, mut sends: Vec<CommRegion>, mut recvs: Vec<CommRegion>, boxes_match: bool) -> Self {
        sends.sort_by_key(CommRegion::send_key);
        recvs.sort_by_key(CommRegion::recv_key);
        CommInfo {
            ndim,
            sends,
            recvs,
            transforms: Vec::new(),
            send_stride: Index::splat(1, MAX_DIM),
            recv_stride: Index::splat(1, MAX_DIM),
            boxes_match,
        }
    }

    /// Ghost exchange needed to apply `stencil` on every box of `grid`.
    pub fn from_stencil<C: Comm>(grid: &StructGrid<C>, stencil: &StructStencil) -> Result<Self, MgError> {
        Self::from_comm_stencil(grid, &CommStencil::from_stencil(stencil))
    }

    /// Ghost exchange filling `num_ghost` layers (`[lo0, hi0, lo1, ...]`).
    pub fn from_num_ghost<C: Comm>(grid: &StructGrid<C>, num_ghost: &[i32; 2 * MAX_DIM]) -> Result<Self, MgError> {
        Self::from_comm_stencil(grid, &CommStencil::from_num_ghost(grid.ndim(), num_ghost))
    }

    /// The stencil may not reach further than the grid's
    /// [`max_distance`](StructGrid::max_distance): boxes beyond it were never
    /// gathered into the box manager.
    pub fn from_comm_stencil<C: Comm>(grid: &StructGrid<C>, cs: &CommStencil) -> Result<Self, MgError> {
        let bm = grid.box_manager()?;
        let rank = grid.comm().rank();
        let dirs = cs.directions();
        let mut shifts = vec![Index::ZERO];
        shifts.extend_from_slice(grid.pshifts());
        let reach = cs.max_reach();
        let widest = reach.as_slice()[..grid.ndim()].iter().copied().max().unwrap_or(0);
        if widest > grid.max_distance() {
            return Err(MgError::InvalidArgument(format!(
                "communication reach {widest} exceeds the grid's max distance {}",
                grid.max_distance()
            )));
        }

        let mut sends = Vec::new();
        let mut recvs = Vec::new();
        for (i, b) in grid.boxes().iter().enumerate() {
            if b.is_empty() {
                continue;
            }
            // Ghost slabs of `b` filled by neighbour boxes seen at `n + s`.
            for dir in &dirs {
                let slab = cs.slab(b, dir);
                if slab.is_empty() {
                    continue;
                }
                for s in &shifts {
                    for e in bm.intersect_box(&slab.shift_neg(s))? {
                        if e.proc() == rank && e.id() == i && *s == Index::ZERO {
                            continue;
                        }
                        let region = slab.intersect(&e.grid_box().shift_pos(s));
                        if region.is_empty() {
                            continue;
                        }
                        recvs.push(CommRegion {
                            local_box: i,
                            proc: e.proc(),
                            remote_box: e.id(),
                            region,
                            recv_region: region,
                            transform: None,
                        });
                    }
                }
            }
            // Parts of `b + s` that fall into nearby boxes' ghost slabs.
            for s in &shifts {
                let image = b.shift_pos(s);
                for e in bm.intersect_box(&image.grow_by_index(&reach))? {
                    if e.proc() == rank && e.id() == i && *s == Index::ZERO {
                        continue;
                    }
                    for dir in &dirs {
                        let region = cs.slab(e.grid_box(), dir).intersect(&image);
                        if region.is_empty() {
                            continue;
                        }
                        sends.push(CommRegion {
                            local_box: i,
                            proc: e.proc(),
                            remote_box: e.id(),
                            region: region.shift_neg(s),
                            recv_region: region,
                            transform: None,
                        });
                    }
                }
            }
        }
        Ok(Self::from_regions(grid.ndim(), sends, recvs, true))
    }

    /// Redistribution from the boxes of `from` to the boxes of `to` over the
    /// same index space. Collective over both grids' communicator.
    pub fn from_grids<C: Comm>(from: &StructGrid<C>, to: &StructGrid<C>) -> Result<Self, MgError> {
        if from.ndim() != to.ndim() {
            return Err(MgError::DimensionMismatch { expected: from.ndim(), found: to.ndim() });
        }
        let rank = from.comm().rank();
        // Directories of each grid's boxes around the other grid's local boxes.
        let to_dir = directory(to, from.boxes())?;
        let from_dir = directory(from, to.boxes())?;

        let mut sends = Vec::new();
        for (i, b) in from.boxes().iter().enumerate().filter(|(_, b)| !b.is_empty()) {
            for e in to_dir.intersect_box(b)? {
                let region = b.intersect(e.grid_box());
                sends.push(CommRegion {
                    local_box: i,
                    proc: e.proc(),
                    remote_box: e.id(),
                    region,
                    recv_region: region,
                    transform: None,
                });
            }
        }
        let mut recvs = Vec::new();
        for (j, b) in to.boxes().iter().enumerate().filter(|(_, b)| !b.is_empty()) {
            for e in from_dir.intersect_box(b)? {
                let region = b.intersect(e.grid_box());
                recvs.push(CommRegion {
                    local_box: j,
                    proc: e.proc(),
                    remote_box: e.id(),
                    region,
                    recv_region: region,
                    transform: None,
                });
            }
        }
        log::debug!("rank {rank}: redistribution with {} sends and {} receives", sends.len(), recvs.len());
        Ok(Self::from_regions(from.ndim(), sends, recvs, false))
    }

    /// Register the transform table and attach a transform to every send region.
    pub fn set_transforms(&mut self, transforms: Vec<Transform>, send_transforms: &[Option<usize>]) -> Result<(), MgError> {
        if send_transforms.len() != self.sends.len() {
            return Err(MgError::DimensionMismatch { expected: self.sends.len(), found: send_transforms.len() });
        }
        if let Some(bad) = send_transforms.iter().flatten().find(|&&t| t >= transforms.len()) {
            return Err(MgError::DimensionMismatch { expected: transforms.len(), found: bad + 1 });
        }
        for (region, t) in self.sends.iter_mut().zip(send_transforms) {
            region.transform = *t;
        }
        self.transforms = transforms;
        Ok(())
    }

    /// Snap send regions onto the lattice `origin + stride * k`.
    pub fn project_send(&mut self, origin: &Index, stride: &Index) {
        for r in &mut self.sends {
            let shift = r.recv_region.imin() - r.region.imin();
            r.region = r.region.project(origin, stride);
            r.recv_region = r.region.shift_pos(&shift);
        }
        self.sends.retain(|r| !r.region.is_empty());
        self.send_stride = *stride;
    }

    /// Snap receive regions onto the lattice `origin + stride * k`.
    pub fn project_recv(&mut self, origin: &Index, stride: &Index) {
        for r in &mut self.recvs {
            r.region = r.region.project(origin, stride);
            r.recv_region = r.region;
        }
        self.recvs.retain(|r| !r.region.is_empty());
        self.recv_stride = *stride;
    }

    /// Project both sides.
    pub fn project(&mut self, origin: &Index, stride: &Index) {
        self.project_send(origin, stride);
        self.project_recv(origin, stride);
    }

    pub fn ndim(&self) -> usize {
        self.ndim
    }

    pub fn sends(&self) -> &[CommRegion] {
        &self.sends
    }

    pub fn recvs(&self) -> &[CommRegion] {
        &self.recvs
    }

    pub fn transforms(&self) -> &[Transform] {
        &self.transforms
    }

    pub fn send_stride(&self) -> Index {
        self.send_stride
    }

    pub fn recv_stride(&self) -> Index {
        self.recv_stride
    }

    pub fn boxes_match(&self) -> bool {
        self.boxes_match
    }

    /// Send regions grouped per local box.
    pub fn send_boxes(&self, num_local_boxes: usize) -> BoxArrayArray {
        group(&self.sends, num_local_boxes)
    }

    /// Receive regions grouped per local box.
    pub fn recv_boxes(&self, num_local_boxes: usize) -> BoxArrayArray {
        group(&self.recvs, num_local_boxes)
    }
}

fn group(regions: &[CommRegion], n: usize) -> BoxArrayArray {
    let mut out = BoxArrayArray::with_len(n);
    for r in regions.iter().filter(|r| r.local_box < n) {
        out.array_mut(r.local_box).append(r.region);
    }
    out
}

/// Box manager of `grid`'s boxes gathered around `regions`.
fn directory<C: Comm>(grid: &StructGrid<C>, regions: &BoxArray) -> Result<BoxManager<C>, MgError> {
    let src = grid.box_manager()?;
    let mut bm = BoxManager::new(grid.boxes().len(), 0, grid.ndim(), *src.bounding_box(), grid.comm().clone())?;
    if let Some(ap) = src.assumed_partition() {
        bm.set_assumed_partition(Arc::clone(ap));
    }
    let rank = grid.comm().rank();
    for (id, b) in grid.boxes().iter().enumerate() {
        bm.add_entry(b.imin(), b.imax(), rank, id, &[])?;
    }
    for r in regions.iter().filter(|r| !r.is_empty()) {
        bm.gather_entries(r.imin(), r.imax())?;
    }
    bm.assemble()?;
    Ok(bm)
}
