// Integer index tuples of a structured index space

use std::ops::{Add, Neg, Sub};

/// Largest supported number of space dimensions.
pub const MAX_DIM: usize = 3;

/// A point in index space. Axes beyond a box's `ndim` are kept at zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Index(pub [i32; MAX_DIM]);

impl Index {
    pub const ZERO: Index = Index([0; MAX_DIM]);

    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Index([x, y, z])
    }

    /// Copy up to `MAX_DIM` leading values; missing axes are zero.
    pub fn from_slice(values: &[i32]) -> Self {
        let mut idx = [0; MAX_DIM];
        for (d, v) in values.iter().take(MAX_DIM).enumerate() {
            idx[d] = *v;
        }
        Index(idx)
    }

    /// Same value on the first `ndim` axes, zero elsewhere.
    pub fn splat(value: i32, ndim: usize) -> Self {
        let mut idx = [0; MAX_DIM];
        idx.iter_mut().take(ndim).for_each(|v| *v = value);
        Index(idx)
    }

    pub fn as_slice(&self) -> &[i32] {
        &self.0
    }

    /// Fine index to the coarse lattice `origin + stride * k`.
    pub fn map_to_coarse(&self, origin: &Index, stride: &Index, ndim: usize) -> Index {
        let mut c = *self;
        for d in 0..ndim {
            c.0[d] = (self.0[d] - origin.0[d]).div_euclid(stride.0[d]);
        }
        c
    }

    /// Coarse index back to its fine-lattice point.
    pub fn map_to_fine(&self, origin: &Index, stride: &Index, ndim: usize) -> Index {
        let mut f = *self;
        for d in 0..ndim {
            f.0[d] = self.0[d] * stride.0[d] + origin.0[d];
        }
        f
    }
}

impl std::ops::Index<usize> for Index {
    type Output = i32;
    fn index(&self, d: usize) -> &i32 {
        &self.0[d]
    }
}

impl std::ops::IndexMut<usize> for Index {
    fn index_mut(&mut self, d: usize) -> &mut i32 {
        &mut self.0[d]
    }
}

impl Add for Index {
    type Output = Index;
    fn add(self, rhs: Index) -> Index {
        Index([self.0[0] + rhs.0[0], self.0[1] + rhs.0[1], self.0[2] + rhs.0[2]])
    }
}

impl Sub for Index {
    type Output = Index;
    fn sub(self, rhs: Index) -> Index {
        Index([self.0[0] - rhs.0[0], self.0[1] - rhs.0[1], self.0[2] - rhs.0[2]])
    }
}

impl Neg for Index {
    type Output = Index;
    fn neg(self) -> Index {
        Index([-self.0[0], -self.0[1], -self.0[2]])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coarse_fine_mapping() {
        let origin = Index::new(1, 0, 0);
        let stride = Index::new(2, 2, 1);
        let fine = Index::new(7, 4, 0);
        let coarse = fine.map_to_coarse(&origin, &stride, 2);
        assert_eq!(coarse, Index::new(3, 2, 0));
        assert_eq!(coarse.map_to_fine(&origin, &stride, 2), fine);
        // Negative indices floor toward minus infinity.
        assert_eq!(Index::new(-1, 0, 0).map_to_coarse(&Index::ZERO, &stride, 1)[0], -1);
    }

    #[test]
    fn arithmetic() {
        let a = Index::new(1, 2, 3);
        assert_eq!(a + a - a, a);
        assert_eq!(-a, Index::new(-1, -2, -3));
        assert_eq!(Index::splat(4, 2), Index::new(4, 4, 0));
        assert_eq!(Index::from_slice(&[5]), Index::new(5, 0, 0));
    }
}
