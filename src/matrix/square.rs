use ndarray::Array2;
use rayon::prelude::*;

/// Dense square matrix with swap-with-last row removal.
///
/// The value block is one row-major allocation of `rank * rank` elements made
/// at construction; live rows are addressed through a slot table so removing
/// a row never reallocates or compacts. Column `n-1` is copied into the
/// removed column and the last row's slot is adopted, which keeps the live
/// `n x n` prefix contiguous in column space while row storage stays wherever
/// it was first laid out.
#[derive(Clone, Debug)]
pub struct SquareMatrix<T> {
    stride: usize,
    n: usize,
    data: Vec<T>,
    slots: Vec<usize>,
}

impl<T: Copy + Send + Sync> SquareMatrix<T> {
    pub fn new(rank: usize, fill: T) -> Self {
        SquareMatrix {
            stride: rank,
            n: rank,
            data: vec![fill; rank * rank],
            slots: (0..rank).collect(),
        }
    }

    /// Number of live rows (and columns).
    #[inline]
    pub fn n(&self) -> usize {
        self.n
    }

    /// Full storage width of a row slot. Fixed for the life of the matrix.
    #[inline]
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// A live row, full stride. Only the first `n()` columns are meaningful.
    #[inline]
    pub fn row(&self, r: usize) -> &[T] {
        let start = self.slots[r] * self.stride;
        &self.data[start..start + self.stride]
    }

    #[inline]
    pub fn row_mut(&mut self, r: usize) -> &mut [T] {
        let start = self.slots[r] * self.stride;
        &mut self.data[start..start + self.stride]
    }

    #[inline]
    pub fn get(&self, r: usize, c: usize) -> T {
        self.data[self.slots[r] * self.stride + c]
    }

    #[inline]
    pub fn set(&mut self, r: usize, c: usize, value: T) {
        self.data[self.slots[r] * self.stride + c] = value;
    }

    /// Writes `value` at `(r, c)` and `(c, r)`.
    #[inline]
    pub fn set_symmetric(&mut self, r: usize, c: usize, value: T) {
        self.set(r, c, value);
        self.set(c, r, value);
    }

    /// Swap-with-last removal: every row's column `r` is overwritten with its
    /// column `n-1`, then row `r` adopts the last row's slot.
    pub fn remove_row(&mut self, r: usize) {
        let last = self.n - 1;
        self.data.par_chunks_mut(self.stride).for_each(|row| {
            row[r] = row[last];
        });
        self.slots[r] = self.slots[last];
        self.n = last;
    }

    /// Swap-with-last on the slot table only; columns are untouched. Used for
    /// the sorted auxiliary matrices, whose columns are positions rather than
    /// row indices.
    pub fn remove_row_slot(&mut self, r: usize) {
        let last = self.n - 1;
        self.slots[r] = self.slots[last];
        self.n = last;
    }

    /// Every physical row slot, live or dead, as a parallel iterator. Dead
    /// slots hold stale data that callers must be able to process blindly.
    pub fn par_physical_rows_mut(&mut self) -> impl IndexedParallelIterator<Item = &mut [T]> {
        self.data.par_chunks_mut(self.stride)
    }
}

impl SquareMatrix<f64> {
    pub fn from_dense(dense: &Array2<f64>) -> Self {
        let rank = dense.nrows();
        let mut mat = SquareMatrix::new(rank, 0.0);
        for r in 0..rank {
            let row = mat.row_mut(r);
            for c in 0..rank {
                row[c] = dense[[r, c]];
            }
        }
        mat
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn from_dense_round_trip() {
        let d = arr2(&[[0.0, 1.0, 2.0], [1.0, 0.0, 3.0], [2.0, 3.0, 0.0]]);
        let m = SquareMatrix::from_dense(&d);
        assert_eq!(m.n(), 3);
        for r in 0..3 {
            for c in 0..3 {
                assert_eq!(m.get(r, c), d[[r, c]]);
            }
        }
    }

    #[test]
    fn remove_row_swaps_with_last() {
        // 4x4 with distinct entries so the swap is visible.
        let mut m = SquareMatrix::new(4, 0.0);
        for r in 0..4 {
            for c in 0..4 {
                m.set(r, c, (10 * r + c) as f64);
            }
        }
        m.remove_row(1);
        assert_eq!(m.n(), 3);
        // Row 1 is now the old row 3; its column 1 holds old (3,3).
        assert_eq!(m.get(1, 0), 30.0);
        assert_eq!(m.get(1, 1), 33.0);
        assert_eq!(m.get(1, 2), 32.0);
        // Surviving rows had column 3 copied into column 1.
        assert_eq!(m.get(0, 1), 3.0);
        assert_eq!(m.get(2, 1), 23.0);
    }

    #[test]
    fn remove_row_preserves_symmetry() {
        let d = arr2(&[
            [0.0, 3.0, 5.0, 6.0],
            [3.0, 0.0, 6.0, 7.0],
            [5.0, 6.0, 0.0, 7.0],
            [6.0, 7.0, 7.0, 0.0],
        ]);
        let mut m = SquareMatrix::from_dense(&d);
        m.remove_row(1);
        for r in 0..3 {
            for c in 0..3 {
                assert_eq!(m.get(r, c), m.get(c, r), "asymmetry at ({r},{c})");
            }
        }
    }

    #[test]
    fn remove_row_slot_leaves_columns_alone() {
        let mut m = SquareMatrix::new(3, 0.0);
        for r in 0..3 {
            for c in 0..3 {
                m.set(r, c, (10 * r + c) as f64);
            }
        }
        m.remove_row_slot(0);
        assert_eq!(m.n(), 2);
        assert_eq!(m.row(0)[..3], [20.0, 21.0, 22.0]);
        assert_eq!(m.row(1)[..3], [10.0, 11.0, 12.0]);
    }

    #[test]
    fn set_symmetric_writes_both_triangles() {
        let mut m = SquareMatrix::new(3, 0.0);
        m.set_symmetric(0, 2, 4.5);
        assert_eq!(m.get(0, 2), 4.5);
        assert_eq!(m.get(2, 0), 4.5);
    }
}
