//! Axis-aligned integer boxes and ordered box collections.
//!
//! A [`GridBox`] is `(imin, imax, ndim)` with inclusive bounds. It is empty as
//! soon as `imax[d] < imin[d]` on any active axis, and empty boxes have zero
//! volume. Boxes that are combined must share `ndim`.
//!
//! Linear offsets inside a box are x-fastest: the rank of `(i, j, k)` in a box
//! of extents `(nx, ny, nz)` is `(i - imin) + nx * ((j - jmin) + ny * (k - kmin))`.

use super::index::{Index, MAX_DIM};
use crate::error::MgError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridBox {
    imin: Index,
    imax: Index,
    ndim: usize,
}

fn ceil_div(a: i32, b: i32) -> i32 {
    -((-a).div_euclid(b))
}

impl GridBox {
    /// Build a box; `ndim` must be in `1..=MAX_DIM`. Unused axes are zeroed.
    pub fn new(imin: Index, imax: Index, ndim: usize) -> Result<Self, MgError> {
        if ndim == 0 || ndim > MAX_DIM {
            return Err(MgError::InvalidDimension(ndim));
        }
        let mut b = GridBox { imin, imax, ndim };
        for d in ndim..MAX_DIM {
            b.imin[d] = 0;
            b.imax[d] = 0;
        }
        Ok(b)
    }

    /// Build from bound slices; `ndim` is the slice length.
    pub fn from_bounds(imin: &[i32], imax: &[i32]) -> Result<Self, MgError> {
        if imin.len() != imax.len() {
            return Err(MgError::DimensionMismatch { expected: imin.len(), found: imax.len() });
        }
        GridBox::new(Index::from_slice(imin), Index::from_slice(imax), imin.len())
    }

    /// The canonical empty box of a dimension.
    pub fn empty(ndim: usize) -> Self {
        GridBox {
            imin: Index::splat(0, ndim),
            imax: Index::splat(-1, ndim),
            ndim,
        }
    }

    pub fn imin(&self) -> Index {
        self.imin
    }

    pub fn imax(&self) -> Index {
        self.imax
    }

    pub fn ndim(&self) -> usize {
        self.ndim
    }

    pub fn is_empty(&self) -> bool {
        (0..self.ndim).any(|d| self.imax[d] < self.imin[d])
    }

    /// Extent along axis `d`, zero when the box is inverted on that axis.
    pub fn size_d(&self, d: usize) -> usize {
        if d >= self.ndim {
            return 1;
        }
        (self.imax[d] - self.imin[d] + 1).max(0) as usize
    }

    pub fn sizes(&self) -> [usize; MAX_DIM] {
        [self.size_d(0), self.size_d(1), self.size_d(2)]
    }

    pub fn volume(&self) -> usize {
        if self.is_empty() {
            return 0;
        }
        (0..self.ndim).map(|d| self.size_d(d)).product()
    }

    /// Overlap of two boxes; empty when they are disjoint on some axis.
    pub fn intersect(&self, other: &GridBox) -> GridBox {
        debug_assert_eq!(self.ndim, other.ndim);
        let mut out = *self;
        for d in 0..self.ndim {
            out.imin[d] = self.imin[d].max(other.imin[d]);
            out.imax[d] = self.imax[d].min(other.imax[d]);
        }
        out
    }

    pub fn overlaps(&self, other: &GridBox) -> bool {
        !self.intersect(other).is_empty()
    }

    pub fn contains_index(&self, idx: &Index) -> bool {
        (0..self.ndim).all(|d| self.imin[d] <= idx[d] && idx[d] <= self.imax[d])
    }

    pub fn contains_box(&self, other: &GridBox) -> bool {
        other.is_empty() || (self.contains_index(&other.imin) && self.contains_index(&other.imax))
    }

    pub fn grow_by_value(&self, n: i32) -> GridBox {
        self.grow_by_index(&Index::splat(n, self.ndim))
    }

    /// Grow both sides of axis `d` by `n[d]`.
    pub fn grow_by_index(&self, n: &Index) -> GridBox {
        let mut out = *self;
        for d in 0..self.ndim {
            out.imin[d] -= n[d];
            out.imax[d] += n[d];
        }
        out
    }

    /// Grow by per-side widths laid out `[lo0, hi0, lo1, hi1, lo2, hi2]`.
    pub fn grow_by_array(&self, widths: &[i32; 2 * MAX_DIM]) -> GridBox {
        let mut out = *self;
        for d in 0..self.ndim {
            out.imin[d] -= widths[2 * d];
            out.imax[d] += widths[2 * d + 1];
        }
        out
    }

    pub fn shift_pos(&self, shift: &Index) -> GridBox {
        let mut out = *self;
        for d in 0..self.ndim {
            out.imin[d] += shift[d];
            out.imax[d] += shift[d];
        }
        out
    }

    pub fn shift_neg(&self, shift: &Index) -> GridBox {
        self.shift_pos(&-*shift)
    }

    /// Linear x-fastest offset of `idx` inside this box.
    pub fn index_rank(&self, idx: &Index) -> usize {
        let mut rank = 0usize;
        let mut stride = 1usize;
        for d in 0..self.ndim {
            rank += (idx[d] - self.imin[d]) as usize * stride;
            stride *= self.size_d(d);
        }
        rank
    }

    /// Inverse of [`GridBox::index_rank`].
    pub fn rank_index(&self, mut rank: usize) -> Index {
        let mut idx = self.imin;
        for d in 0..self.ndim {
            let n = self.size_d(d).max(1);
            idx[d] += (rank % n) as i32;
            rank /= n;
        }
        idx
    }

    /// Number of points of the box on a lattice of the given stride anchored at `imin`.
    pub fn stride_volume(&self, stride: &Index) -> usize {
        if self.is_empty() {
            return 0;
        }
        (0..self.ndim)
            .map(|d| (self.size_d(d) - 1) / stride[d].max(1) as usize + 1)
            .product()
    }

    /// Coarse-index box of the lattice points `origin + stride * k` inside this box.
    pub fn coarsen(&self, origin: &Index, stride: &Index) -> GridBox {
        let mut out = *self;
        for d in 0..self.ndim {
            out.imin[d] = ceil_div(self.imin[d] - origin[d], stride[d]);
            out.imax[d] = (self.imax[d] - origin[d]).div_euclid(stride[d]);
        }
        out
    }

    /// Fine-index bounds of a coarse-index box.
    pub fn refine(&self, origin: &Index, stride: &Index) -> GridBox {
        GridBox {
            imin: self.imin.map_to_fine(origin, stride, self.ndim),
            imax: self.imax.map_to_fine(origin, stride, self.ndim),
            ndim: self.ndim,
        }
    }

    /// Shrink the box onto the lattice `origin + stride * k`.
    pub fn project(&self, origin: &Index, stride: &Index) -> GridBox {
        self.coarsen(origin, stride).refine(origin, stride)
    }

    /// `self \ other` as a set of disjoint boxes.
    pub fn subtract(&self, other: &GridBox) -> BoxArray {
        let overlap = self.intersect(other);
        if overlap.is_empty() {
            return if self.is_empty() {
                BoxArray::new()
            } else {
                BoxArray::from(vec![*self])
            };
        }
        let mut rest = *self;
        let mut pieces = Vec::new();
        for d in 0..self.ndim {
            if rest.imin[d] < overlap.imin[d] {
                let mut piece = rest;
                piece.imax[d] = overlap.imin[d] - 1;
                pieces.push(piece);
                rest.imin[d] = overlap.imin[d];
            }
            if rest.imax[d] > overlap.imax[d] {
                let mut piece = rest;
                piece.imin[d] = overlap.imax[d] + 1;
                pieces.push(piece);
                rest.imax[d] = overlap.imax[d];
            }
        }
        BoxArray::from(pieces)
    }

    /// Merge with a face-adjacent box of identical cross-section.
    fn coalesce(&self, other: &GridBox) -> Option<GridBox> {
        for d in 0..self.ndim {
            let same_rest = (0..self.ndim)
                .filter(|&e| e != d)
                .all(|e| self.imin[e] == other.imin[e] && self.imax[e] == other.imax[e]);
            if !same_rest {
                continue;
            }
            if self.imax[d] + 1 == other.imin[d] || other.imax[d] + 1 == self.imin[d] {
                let mut merged = *self;
                merged.imin[d] = self.imin[d].min(other.imin[d]);
                merged.imax[d] = self.imax[d].max(other.imax[d]);
                return Some(merged);
            }
        }
        None
    }
}

/// Ordered sequence of boxes; position is identity.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BoxArray {
    boxes: Vec<GridBox>,
}

impl From<Vec<GridBox>> for BoxArray {
    fn from(boxes: Vec<GridBox>) -> Self {
        BoxArray { boxes }
    }
}

impl BoxArray {
    pub fn new() -> Self {
        BoxArray { boxes: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    pub fn get(&self, i: usize) -> Option<&GridBox> {
        self.boxes.get(i)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, GridBox> {
        self.boxes.iter()
    }

    pub fn as_slice(&self) -> &[GridBox] {
        &self.boxes
    }

    pub fn append(&mut self, b: GridBox) {
        self.boxes.push(b);
    }

    pub fn append_array(&mut self, other: &BoxArray) {
        self.boxes.extend_from_slice(&other.boxes);
    }

    pub fn delete(&mut self, i: usize) -> Option<GridBox> {
        (i < self.boxes.len()).then(|| self.boxes.remove(i))
    }

    /// Remove every listed position, keeping the order of the survivors.
    pub fn delete_multiple(&mut self, indices: &[usize]) {
        let mut k = 0;
        self.boxes.retain(|_| {
            let keep = !indices.contains(&k);
            k += 1;
            keep
        });
    }

    /// Total number of points (boxes are not checked for overlap).
    pub fn volume(&self) -> usize {
        self.boxes.iter().map(GridBox::volume).sum()
    }

    /// Smallest box containing every non-empty box.
    pub fn bounding_box(&self) -> Option<GridBox> {
        let mut it = self.boxes.iter().filter(|b| !b.is_empty());
        let first = *it.next()?;
        Some(it.fold(first, |mut acc, b| {
            for d in 0..acc.ndim {
                acc.imin[d] = acc.imin[d].min(b.imin[d]);
                acc.imax[d] = acc.imax[d].max(b.imax[d]);
            }
            acc
        }))
    }

    /// Replace every box by its pieces outside `other`.
    pub fn subtract_box(&mut self, other: &GridBox) {
        self.boxes = self.boxes.iter().flat_map(|b| b.subtract(other).boxes).collect();
    }

    pub fn subtract_box_array(&mut self, others: &BoxArray) {
        for o in others.iter() {
            self.subtract_box(o);
        }
    }

    /// A disjoint cover of the same point set, with face-adjacent pieces of
    /// equal cross-section merged greedily.
    pub fn union(&self) -> BoxArray {
        let mut disjoint: Vec<GridBox> = Vec::new();
        for b in self.boxes.iter().filter(|b| !b.is_empty()) {
            let mut pieces = BoxArray::from(vec![*b]);
            for kept in &disjoint {
                pieces.subtract_box(kept);
            }
            disjoint.extend(pieces.boxes);
        }
        'merge: loop {
            for i in 0..disjoint.len() {
                for j in (i + 1)..disjoint.len() {
                    if let Some(merged) = disjoint[i].coalesce(&disjoint[j]) {
                        disjoint[i] = merged;
                        disjoint.remove(j);
                        continue 'merge;
                    }
                }
            }
            break;
        }
        BoxArray::from(disjoint)
    }
}

impl<'a> IntoIterator for &'a BoxArray {
    type Item = &'a GridBox;
    type IntoIter = std::slice::Iter<'a, GridBox>;
    fn into_iter(self) -> Self::IntoIter {
        self.boxes.iter()
    }
}

/// One [`BoxArray`] per owning entity, each tagged with an id.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BoxArrayArray {
    arrays: Vec<BoxArray>,
    ids: Vec<usize>,
}

impl BoxArrayArray {
    /// `n` empty arrays with ids `0..n`.
    pub fn with_len(n: usize) -> Self {
        BoxArrayArray {
            arrays: vec![BoxArray::new(); n],
            ids: (0..n).collect(),
        }
    }

    pub fn push(&mut self, id: usize, array: BoxArray) {
        self.ids.push(id);
        self.arrays.push(array);
    }

    pub fn len(&self) -> usize {
        self.arrays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arrays.is_empty()
    }

    pub fn array(&self, i: usize) -> &BoxArray {
        &self.arrays[i]
    }

    pub fn array_mut(&mut self, i: usize) -> &mut BoxArray {
        &mut self.arrays[i]
    }

    pub fn id(&self, i: usize) -> usize {
        self.ids[i]
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &BoxArray)> {
        self.ids.iter().copied().zip(self.arrays.iter())
    }
}
