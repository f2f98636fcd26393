//! Stencils: the offsets a computation reads, and the ghost directions an
//! exchange must fill.

use super::boxes::GridBox;
use super::index::{Index, MAX_DIM};
use crate::error::MgError;

/// Relative offsets of a structured stencil.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructStencil {
    ndim: usize,
    offsets: Vec<Index>,
}

impl StructStencil {
    pub fn new(ndim: usize, offsets: Vec<Index>) -> Result<Self, MgError> {
        if ndim == 0 || ndim > MAX_DIM {
            return Err(MgError::InvalidDimension(ndim));
        }
        if let Some(bad) = offsets.iter().find(|o| (ndim..MAX_DIM).any(|d| o[d] != 0)) {
            return Err(MgError::DimensionMismatch {
                expected: ndim,
                found: (0..MAX_DIM).rposition(|d| bad[d] != 0).map_or(0, |d| d + 1),
            });
        }
        Ok(StructStencil { ndim, offsets })
    }

    /// The `2 * ndim + 1` point star: centre first, then `-e_d`, `+e_d` per axis.
    pub fn star(ndim: usize) -> Result<Self, MgError> {
        let mut offsets = vec![Index::ZERO];
        for d in 0..ndim.min(MAX_DIM) {
            let mut lo = Index::ZERO;
            lo[d] = -1;
            let mut hi = Index::ZERO;
            hi[d] = 1;
            offsets.push(lo);
            offsets.push(hi);
        }
        StructStencil::new(ndim, offsets)
    }

    pub fn ndim(&self) -> usize {
        self.ndim
    }

    pub fn offsets(&self) -> &[Index] {
        &self.offsets
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Position of the zero offset, if present.
    pub fn diag_entry(&self) -> Option<usize> {
        self.offsets.iter().position(|o| *o == Index::ZERO)
    }

    /// Per-side reach `[lo0, hi0, lo1, hi1, lo2, hi2]`.
    pub fn reach(&self) -> [i32; 2 * MAX_DIM] {
        let mut r = [0; 2 * MAX_DIM];
        for o in &self.offsets {
            for d in 0..self.ndim {
                r[2 * d] = r[2 * d].max(-o[d]);
                r[2 * d + 1] = r[2 * d + 1].max(o[d]);
            }
        }
        r
    }
}

const NUM_DIRS: usize = 27;

fn dir_slot(dir: &Index) -> usize {
    ((dir[0] + 1) + 3 * (dir[1] + 1) + 9 * (dir[2] + 1)) as usize
}

/// Ghost directions (each axis one of -1, 0, +1) and per-axis growth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommStencil {
    ndim: usize,
    data: [bool; NUM_DIRS],
    mgrow: Index,
    pgrow: Index,
}

impl CommStencil {
    fn empty(ndim: usize) -> Self {
        CommStencil {
            ndim,
            data: [false; NUM_DIRS],
            mgrow: Index::ZERO,
            pgrow: Index::ZERO,
        }
    }

    /// Directions needed to evaluate `stencil` on every point of a box.
    ///
    /// An offset with sign pattern `s` makes every pattern obtained by zeroing
    /// some components of `s` necessary as well.
    pub fn from_stencil(stencil: &StructStencil) -> Self {
        let ndim = stencil.ndim();
        let mut cs = CommStencil::empty(ndim);
        for o in stencil.offsets() {
            let sign = Index([o[0].signum(), o[1].signum(), o[2].signum()]);
            for d in 0..ndim {
                cs.mgrow[d] = cs.mgrow[d].max(-o[d]);
                cs.pgrow[d] = cs.pgrow[d].max(o[d]);
            }
            for mask in 1..(1usize << ndim) {
                let mut dir = Index::ZERO;
                for d in 0..ndim {
                    if mask & (1 << d) != 0 {
                        dir[d] = sign[d];
                    }
                }
                if dir != Index::ZERO {
                    cs.data[dir_slot(&dir)] = true;
                }
            }
        }
        cs
    }

    /// Every direction whose sides all have a positive ghost width.
    pub fn from_num_ghost(ndim: usize, num_ghost: &[i32; 2 * MAX_DIM]) -> Self {
        let mut cs = CommStencil::empty(ndim);
        for d in 0..ndim {
            cs.mgrow[d] = num_ghost[2 * d];
            cs.pgrow[d] = num_ghost[2 * d + 1];
        }
        for dir in all_directions(ndim) {
            let ok = (0..ndim).all(|d| match dir[d] {
                -1 => cs.mgrow[d] > 0,
                1 => cs.pgrow[d] > 0,
                _ => true,
            });
            if ok {
                cs.data[dir_slot(&dir)] = true;
            }
        }
        cs
    }

    pub fn ndim(&self) -> usize {
        self.ndim
    }

    pub fn mgrow(&self) -> Index {
        self.mgrow
    }

    pub fn pgrow(&self) -> Index {
        self.pgrow
    }

    pub fn has_direction(&self, dir: &Index) -> bool {
        self.data[dir_slot(dir)]
    }

    /// Active directions in a fixed order.
    pub fn directions(&self) -> Vec<Index> {
        all_directions(self.ndim).into_iter().filter(|d| self.has_direction(d)).collect()
    }

    /// Ghost slab of `bx` in direction `dir`.
    pub fn slab(&self, bx: &GridBox, dir: &Index) -> GridBox {
        let mut imin = bx.imin();
        let mut imax = bx.imax();
        for d in 0..self.ndim {
            match dir[d] {
                -1 => {
                    imax[d] = bx.imin()[d] - 1;
                    imin[d] = bx.imin()[d] - self.mgrow[d];
                }
                1 => {
                    imin[d] = bx.imax()[d] + 1;
                    imax[d] = bx.imax()[d] + self.pgrow[d];
                }
                _ => {}
            }
        }
        GridBox::new(imin, imax, self.ndim).unwrap_or_else(|_| GridBox::empty(self.ndim))
    }

    /// Largest growth on either side, per axis.
    pub fn max_reach(&self) -> Index {
        let mut r = Index::ZERO;
        for d in 0..self.ndim {
            r[d] = self.mgrow[d].max(self.pgrow[d]);
        }
        r
    }
}

/// Non-zero sign patterns of `ndim` axes, x-fastest.
fn all_directions(ndim: usize) -> Vec<Index> {
    let span = |d: usize| if d < ndim { -1..=1 } else { 0..=0 };
    let mut dirs = Vec::new();
    for k in span(2) {
        for j in span(1) {
            for i in span(0) {
                let dir = Index([i, j, k]);
                if dir != Index::ZERO {
                    dirs.push(dir);
                }
            }
        }
    }
    dirs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_reach_and_directions() {
        let s = StructStencil::star(2).unwrap();
        assert_eq!(s.len(), 5);
        assert_eq!(s.diag_entry(), Some(0));
        assert_eq!(s.reach(), [1, 1, 1, 1, 0, 0]);
        let cs = CommStencil::from_stencil(&s);
        // Faces only: no corner is read by a star.
        assert_eq!(cs.directions().len(), 4);
        assert!(!cs.has_direction(&Index::new(1, 1, 0)));
    }

    #[test]
    fn diagonal_offset_needs_faces_too() {
        let s = StructStencil::new(2, vec![Index::ZERO, Index::new(1, 1, 0)]).unwrap();
        let cs = CommStencil::from_stencil(&s);
        let dirs = cs.directions();
        assert_eq!(dirs, vec![Index::new(1, 0, 0), Index::new(0, 1, 0), Index::new(1, 1, 0)]);
    }

    #[test]
    fn ghost_slabs() {
        let cs = CommStencil::from_num_ghost(2, &[2, 1, 0, 1, 0, 0]);
        // y has no minus ghosts, so (., -1) directions are excluded.
        assert_eq!(cs.directions().len(), 5);
        let bx = GridBox::from_bounds(&[0, 0], &[3, 3]).unwrap();
        assert_eq!(cs.slab(&bx, &Index::new(-1, 0, 0)), GridBox::from_bounds(&[-2, 0], &[-1, 3]).unwrap());
        assert_eq!(cs.slab(&bx, &Index::new(1, 1, 0)), GridBox::from_bounds(&[4, 4], &[4, 4]).unwrap());
    }

    #[test]
    fn rejects_offsets_beyond_ndim() {
        assert!(StructStencil::new(1, vec![Index::new(0, 1, 0)]).is_err());
    }
}
