//! Communication-free geometric partition of a global bounding box.
//!
//! The bounding box is cut into exactly `nprocs` pieces. Each prime factor of
//! `nprocs` (largest first) multiplies the division count of the axis whose
//! pieces are currently the longest, so pieces stay close to cubic. Rank `r`
//! is responsible for piece `r`, numbered x-fastest. Any rank can evaluate the
//! mapping locally; the box manager uses it as a rendezvous directory.

use super::boxes::GridBox;
use super::index::{Index, MAX_DIM};
use crate::error::MgError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssumedPartition {
    bounding_box: GridBox,
    divisions: [usize; MAX_DIM],
    nprocs: usize,
}

fn prime_factors(mut n: usize) -> Vec<usize> {
    let mut factors = Vec::new();
    let mut p = 2;
    while p * p <= n {
        while n % p == 0 {
            factors.push(p);
            n /= p;
        }
        p += 1;
    }
    if n > 1 {
        factors.push(n);
    }
    factors.reverse();
    factors
}

impl AssumedPartition {
    pub fn new(bounding_box: GridBox, nprocs: usize) -> Result<Self, MgError> {
        if bounding_box.is_empty() {
            return Err(MgError::Unsupported("assumed partition of an empty bounding box"));
        }
        if nprocs == 0 {
            return Err(MgError::Unsupported("assumed partition over zero ranks"));
        }
        let ndim = bounding_box.ndim();
        let mut divisions = [1usize; MAX_DIM];
        for f in prime_factors(nprocs) {
            // Longest piece extent wins; ties go to the lowest axis.
            let mut best = 0;
            for d in 1..ndim {
                let lhs = bounding_box.size_d(d) * divisions[best];
                let rhs = bounding_box.size_d(best) * divisions[d];
                if lhs > rhs {
                    best = d;
                }
            }
            divisions[best] *= f;
        }
        Ok(AssumedPartition { bounding_box, divisions, nprocs })
    }

    pub fn bounding_box(&self) -> &GridBox {
        &self.bounding_box
    }

    pub fn divisions(&self) -> [usize; MAX_DIM] {
        self.divisions
    }

    pub fn nprocs(&self) -> usize {
        self.nprocs
    }

    /// First index of piece `k` along axis `d`.
    fn piece_lo(&self, d: usize, k: usize) -> i32 {
        let extent = self.bounding_box.size_d(d);
        self.bounding_box.imin()[d] + (k * extent / self.divisions[d]) as i32
    }

    /// Piece along axis `d` holding coordinate `x` (clamped onto the box).
    fn piece_of(&self, d: usize, x: i32) -> usize {
        let n = self.divisions[d];
        let lo = self.bounding_box.imin()[d];
        let hi = self.bounding_box.imax()[d];
        let x = x.clamp(lo, hi);
        let extent = self.bounding_box.size_d(d);
        let mut k = ((x - lo) as usize * n / extent).min(n - 1);
        while k + 1 < n && self.piece_lo(d, k + 1) <= x {
            k += 1;
        }
        while k > 0 && self.piece_lo(d, k) > x {
            k -= 1;
        }
        k
    }

    /// Region assigned to `rank`; may be empty when an axis has more pieces
    /// than points.
    pub fn region(&self, rank: usize) -> GridBox {
        let ndim = self.bounding_box.ndim();
        let mut rest = rank;
        let mut imin = Index::ZERO;
        let mut imax = Index::ZERO;
        for d in 0..ndim {
            let k = rest % self.divisions[d];
            rest /= self.divisions[d];
            imin[d] = self.piece_lo(d, k);
            imax[d] = if k + 1 == self.divisions[d] {
                self.bounding_box.imax()[d]
            } else {
                self.piece_lo(d, k + 1) - 1
            };
        }
        GridBox::new(imin, imax, ndim).unwrap_or_else(|_| GridBox::empty(ndim))
    }

    /// Ranks whose regions intersect `query`, ascending. The query is clipped
    /// to the bounding box first.
    pub fn ranks_for_box(&self, query: &GridBox) -> Vec<usize> {
        let clipped = query.intersect(&self.bounding_box);
        if clipped.is_empty() {
            return Vec::new();
        }
        let ndim = self.bounding_box.ndim();
        let mut ranges = [(0usize, 0usize); MAX_DIM];
        for (d, range) in ranges.iter_mut().enumerate().take(ndim) {
            *range = (self.piece_of(d, clipped.imin()[d]), self.piece_of(d, clipped.imax()[d]));
        }
        let mut ranks = Vec::new();
        for k2 in ranges[2].0..=ranges[2].1 {
            for k1 in ranges[1].0..=ranges[1].1 {
                for k0 in ranges[0].0..=ranges[0].1 {
                    ranks.push(k0 + self.divisions[0] * (k1 + self.divisions[1] * k2));
                }
            }
        }
        ranks
    }

    /// Rank responsible for a single point.
    pub fn rank_of(&self, idx: &Index) -> usize {
        let ndim = self.bounding_box.ndim();
        let mut rank = 0;
        let mut stride = 1;
        for d in 0..ndim {
            rank += self.piece_of(d, idx[d]) * stride;
            stride *= self.divisions[d];
        }
        rank
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factors_descending() {
        assert_eq!(prime_factors(12), vec![3, 2, 2]);
        assert_eq!(prime_factors(7), vec![7]);
        assert!(prime_factors(1).is_empty());
    }

    #[test]
    fn regions_tile_the_box() {
        let bbox = GridBox::from_bounds(&[0, 0], &[9, 4]).unwrap();
        for nprocs in 1..=12 {
            let ap = AssumedPartition::new(bbox, nprocs).unwrap();
            let d = ap.divisions();
            assert_eq!(d[0] * d[1] * d[2], nprocs);
            let total: usize = (0..nprocs).map(|r| ap.region(r).volume()).sum();
            assert_eq!(total, bbox.volume());
            for r in 0..nprocs {
                let region = ap.region(r);
                if !region.is_empty() {
                    assert_eq!(ap.rank_of(&region.imin()), r);
                    assert_eq!(ap.rank_of(&region.imax()), r);
                }
            }
        }
    }

    #[test]
    fn ranks_for_box_matches_regions() {
        let bbox = GridBox::from_bounds(&[0, 0, 0], &[7, 7, 7]).unwrap();
        let ap = AssumedPartition::new(bbox, 8).unwrap();
        assert_eq!(ap.divisions(), [2, 2, 2]);
        let q = GridBox::from_bounds(&[3, 0, 0], &[4, 1, 1]).unwrap();
        assert_eq!(ap.ranks_for_box(&q), vec![0, 1]);
        let all = GridBox::from_bounds(&[-5, -5, -5], &[20, 20, 20]).unwrap();
        assert_eq!(ap.ranks_for_box(&all), (0..8).collect::<Vec<_>>());
        let outside = GridBox::from_bounds(&[10, 0, 0], &[12, 1, 1]).unwrap();
        assert!(ap.ranks_for_box(&outside).is_empty());
    }
}
