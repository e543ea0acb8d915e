use std::ops::Range;

use crate::error::{Error, Result};

// Region — Rectangular window into a 2-D matrix
//
// A Region is the geometry half of a sub-matrix: a row range and a column
// range inside some matrix. It owns nothing. Pairing a Region with a
// storage buffer (see `view.rs`) produces a view, and that pairing is the
// only place bounds are checked.
//
// ADDRESSING:
//
//   Storage is dense row-major with row stride == storage columns, so the
//   element (r, c) of a region lives at
//
//       (row_offset + r) * stride + col_offset + c
//
//   Narrowing a region only adjusts offsets and extents; strides never change.

/// Row/column window into a matrix of known size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Region {
    pub row_offset: usize,
    pub num_rows: usize,
    pub col_offset: usize,
    pub num_cols: usize,
}

impl Region {
    pub fn new(row_offset: usize, num_rows: usize, col_offset: usize, num_cols: usize) -> Self {
        Region {
            row_offset,
            num_rows,
            col_offset,
            num_cols,
        }
    }

    /// The region covering an entire `num_rows` x `num_cols` matrix.
    pub fn whole(num_rows: usize, num_cols: usize) -> Self {
        Region::new(0, num_rows, 0, num_cols)
    }

    /// The zero-sized region.
    pub fn empty() -> Self {
        Region::default()
    }

    pub fn dims(&self) -> (usize, usize) {
        (self.num_rows, self.num_cols)
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows == 0 || self.num_cols == 0
    }

    pub fn row_end(&self) -> usize {
        self.row_offset + self.num_rows
    }

    pub fn col_end(&self) -> usize {
        self.col_offset + self.num_cols
    }

    pub fn col_range(&self) -> Range<usize> {
        self.col_offset..self.col_end()
    }

    pub fn row_range(&self) -> Range<usize> {
        self.row_offset..self.row_end()
    }

    /// Whether this region lies inside a `rows` x `cols` matrix.
    pub fn fits_in(&self, rows: usize, cols: usize) -> bool {
        self.row_end() <= rows && self.col_end() <= cols
    }

    pub fn check_fits(&self, rows: usize, cols: usize) -> Result<()> {
        if self.fits_in(rows, cols) {
            Ok(())
        } else {
            Err(Error::RegionOutOfBounds {
                row_offset: self.row_offset,
                num_rows: self.num_rows,
                col_offset: self.col_offset,
                num_cols: self.num_cols,
                rows,
                cols,
            })
        }
    }

    /// Whether this region covers every element of a `rows` x `cols` matrix.
    pub fn is_whole(&self, rows: usize, cols: usize) -> bool {
        self.row_offset == 0 && self.col_offset == 0 && self.num_rows == rows && self.num_cols == cols
    }

    /// Whether this region spans all rows of a matrix with `rows` rows.
    pub fn is_full_row_range(&self, rows: usize) -> bool {
        self.row_offset == 0 && self.num_rows == rows
    }

    /// Sub-region of rows `[start, start + len)`, relative to this region.
    pub fn narrow_rows(&self, start: usize, len: usize) -> Result<Region> {
        if start + len > self.num_rows {
            return Err(Error::msg(format!(
                "narrow rows out of bounds: start {start}, len {len}, rows {}",
                self.num_rows
            )));
        }
        Ok(Region::new(
            self.row_offset + start,
            len,
            self.col_offset,
            self.num_cols,
        ))
    }

    /// Sub-region of columns `[start, start + len)`, relative to this region.
    pub fn narrow_cols(&self, start: usize, len: usize) -> Result<Region> {
        if start + len > self.num_cols {
            return Err(Error::msg(format!(
                "narrow cols out of bounds: start {start}, len {len}, cols {}",
                self.num_cols
            )));
        }
        Ok(Region::new(
            self.row_offset,
            self.num_rows,
            self.col_offset + start,
            len,
        ))
    }

    /// Flat storage offset of element `(row, col)` of this region.
    pub fn storage_offset(&self, stride: usize, row: usize, col: usize) -> usize {
        (self.row_offset + row) * stride + self.col_offset + col
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whole_region() {
        let r = Region::whole(10, 5);
        assert!(r.is_whole(10, 5));
        assert!(r.is_full_row_range(10));
        assert_eq!(r.col_range(), 0..5);
    }

    #[test]
    fn test_narrow_cols_keeps_rows() {
        let r = Region::whole(10, 5).narrow_cols(2, 2).unwrap();
        assert_eq!(r, Region::new(0, 10, 2, 2));
        assert!(r.is_full_row_range(10));
        assert!(!r.is_whole(10, 5));
    }

    #[test]
    fn test_narrow_rows_is_partial() {
        let r = Region::whole(10, 5).narrow_rows(3, 4).unwrap();
        assert!(!r.is_full_row_range(10));
        assert_eq!(r.row_range(), 3..7);
        assert!(Region::whole(10, 5).narrow_rows(8, 4).is_err());
    }

    #[test]
    fn test_storage_offset() {
        // [4, 6] narrowed to rows 1.., cols 2.. : element (1, 1) → row 2, col 3
        let r = Region::new(1, 3, 2, 4);
        assert_eq!(r.storage_offset(6, 1, 1), 2 * 6 + 3);
    }

    #[test]
    fn test_check_fits() {
        assert!(Region::new(0, 10, 4, 2).check_fits(10, 5).is_err());
        assert!(Region::new(0, 10, 3, 2).check_fits(10, 5).is_ok());
    }
}
