//! # heron-cpu
//!
//! Dense row-major f32 backend for heron.
//!
//! Every primitive works on a [`Region`] of a `Vec<f32>`; GEMM and the
//! element-wise ops split destination rows across the rayon thread pool.
//! Each call returns only after all rows are written, so commands observe
//! strictly sequential semantics.

use rand::Rng;
use rayon::prelude::*;

use heron_core::backend::{
    Backend, BackendDevice, BackendStorage, MatrixTranspose, ResizeKind, UnaryOp,
};
use heron_core::error::{Error, Result};
use heron_core::region::Region;
use heron_core::view::{MatrixMut, MatrixRef};

/// The (only) CPU device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuDevice;

impl BackendDevice for CpuDevice {
    fn name(&self) -> String {
        "cpu".to_string()
    }
}

/// A dense row-major matrix buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct CpuStorage {
    num_rows: usize,
    num_cols: usize,
    data: Vec<f32>,
}

impl CpuStorage {
    pub fn data(&self) -> &[f32] {
        &self.data
    }
}

impl BackendStorage for CpuStorage {
    fn num_rows(&self) -> usize {
        self.num_rows
    }

    fn num_cols(&self) -> usize {
        self.num_cols
    }
}

/// Dense CPU backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuBackend;

fn check_same_dims(expected: (usize, usize), got: (usize, usize)) -> Result<()> {
    if expected != got {
        return Err(Error::ShapeMismatch { expected, got });
    }
    Ok(())
}

fn row_slice<'s>(storage: &'s CpuStorage, region: Region, row: usize) -> &'s [f32] {
    let start = region.storage_offset(storage.num_cols, row, 0);
    &storage.data[start..start + region.num_cols]
}

fn row_slice_mut<'s>(storage: &'s mut CpuStorage, region: Region, row: usize) -> &'s mut [f32] {
    let start = region.storage_offset(storage.num_cols, row, 0);
    let cols = region.num_cols;
    &mut storage.data[start..start + cols]
}

fn check_row(row: usize, num_rows: usize) -> Result<()> {
    if row >= num_rows {
        return Err(Error::msg(format!(
            "row {row} out of range for a view with {num_rows} rows"
        )));
    }
    Ok(())
}

/// Apply `f(row_index, row)` to every row of a destination view, in parallel.
fn par_rows_mut<F>(dst: &mut MatrixMut<'_, CpuBackend>, f: F)
where
    F: Fn(usize, &mut [f32]) + Sync + Send,
{
    let region = dst.region();
    if region.is_empty() {
        return;
    }
    let stride = dst.storage().num_cols;
    let cols = region.col_range();
    dst.storage_mut()
        .data
        .par_chunks_mut(stride)
        .skip(region.row_offset)
        .take(region.num_rows)
        .enumerate()
        .for_each(|(r, row)| f(r, &mut row[cols.clone()]));
}

/// Materialize `op(m)` as a dense row-major buffer with its logical dims.
fn dense(m: &MatrixRef<'_, CpuBackend>, trans: MatrixTranspose) -> (Vec<f32>, usize, usize) {
    let (rows, cols) = m.dims();
    let storage = m.storage();
    let region = m.region();
    match trans {
        MatrixTranspose::NoTrans => {
            let mut out = Vec::with_capacity(rows * cols);
            for r in 0..rows {
                out.extend_from_slice(row_slice(storage, region, r));
            }
            (out, rows, cols)
        }
        MatrixTranspose::Trans => {
            let mut out = vec![0.0f32; rows * cols];
            for r in 0..rows {
                for (c, &v) in row_slice(storage, region, r).iter().enumerate() {
                    out[c * rows + r] = v;
                }
            }
            (out, cols, rows)
        }
    }
}

impl Backend for CpuBackend {
    type Device = CpuDevice;
    type Storage = CpuStorage;

    fn alloc(
        num_rows: usize,
        num_cols: usize,
        _kind: ResizeKind,
        _device: &CpuDevice,
    ) -> Result<CpuStorage> {
        // Undefined storage is zero-filled too; the checker guarantees it is
        // written before it is read.
        Ok(CpuStorage {
            num_rows,
            num_cols,
            data: vec![0.0; num_rows * num_cols],
        })
    }

    fn from_f32_slice(
        data: &[f32],
        num_rows: usize,
        num_cols: usize,
        _device: &CpuDevice,
    ) -> Result<CpuStorage> {
        if data.len() != num_rows * num_cols {
            return Err(Error::msg(format!(
                "element count mismatch: {num_rows}x{num_cols} requires {} elements, got {}",
                num_rows * num_cols,
                data.len()
            )));
        }
        Ok(CpuStorage {
            num_rows,
            num_cols,
            data: data.to_vec(),
        })
    }

    fn rand_uniform(
        num_rows: usize,
        num_cols: usize,
        low: f32,
        high: f32,
        _device: &CpuDevice,
    ) -> Result<CpuStorage> {
        let mut rng = rand::thread_rng();
        let data = (0..num_rows * num_cols)
            .map(|_| rng.gen_range(low..high))
            .collect();
        Ok(CpuStorage {
            num_rows,
            num_cols,
            data,
        })
    }

    fn to_f32_vec(src: &MatrixRef<'_, Self>) -> Result<Vec<f32>> {
        Ok(dense(src, MatrixTranspose::NoTrans).0)
    }

    fn copy(dst: &mut MatrixMut<'_, Self>, src: &MatrixRef<'_, Self>) -> Result<()> {
        check_same_dims(dst.dims(), src.dims())?;
        let (s, region) = (src.storage(), src.region());
        par_rows_mut(dst, |r, row| row.copy_from_slice(row_slice(s, region, r)));
        Ok(())
    }

    fn add(dst: &mut MatrixMut<'_, Self>, src: &MatrixRef<'_, Self>, alpha: f32) -> Result<()> {
        check_same_dims(dst.dims(), src.dims())?;
        let (s, region) = (src.storage(), src.region());
        par_rows_mut(dst, |r, row| {
            for (d, &x) in row.iter_mut().zip(row_slice(s, region, r)) {
                *d += alpha * x;
            }
        });
        Ok(())
    }

    fn set_zero(dst: &mut MatrixMut<'_, Self>) -> Result<()> {
        par_rows_mut(dst, |_, row| row.fill(0.0));
        Ok(())
    }

    fn copy_rows(
        dst: &mut MatrixMut<'_, Self>,
        src: &MatrixRef<'_, Self>,
        indexes: &[Option<usize>],
    ) -> Result<()> {
        if indexes.len() != dst.num_rows() || dst.num_cols() != src.num_cols() {
            return Err(Error::ShapeMismatch {
                expected: dst.dims(),
                got: (indexes.len(), src.num_cols()),
            });
        }
        for &i in indexes.iter().flatten() {
            check_row(i, src.num_rows())?;
        }
        let (s, region) = (src.storage(), src.region());
        par_rows_mut(dst, |r, row| match indexes[r] {
            Some(i) => row.copy_from_slice(row_slice(s, region, i)),
            None => row.fill(0.0),
        });
        Ok(())
    }

    fn add_rows(
        dst: &mut MatrixMut<'_, Self>,
        src: &MatrixRef<'_, Self>,
        alpha: f32,
        indexes: &[Option<usize>],
    ) -> Result<()> {
        if indexes.len() != dst.num_rows() || dst.num_cols() != src.num_cols() {
            return Err(Error::ShapeMismatch {
                expected: dst.dims(),
                got: (indexes.len(), src.num_cols()),
            });
        }
        for &i in indexes.iter().flatten() {
            check_row(i, src.num_rows())?;
        }
        let (s, region) = (src.storage(), src.region());
        par_rows_mut(dst, |r, row| {
            if let Some(i) = indexes[r] {
                for (d, &x) in row.iter_mut().zip(row_slice(s, region, i)) {
                    *d += alpha * x;
                }
            }
        });
        Ok(())
    }

    fn copy_row(
        dst: &mut MatrixMut<'_, Self>,
        dst_row: usize,
        src: &MatrixRef<'_, Self>,
        src_row: usize,
    ) -> Result<()> {
        check_row(dst_row, dst.num_rows())?;
        check_row(src_row, src.num_rows())?;
        if dst.num_cols() != src.num_cols() {
            return Err(Error::ShapeMismatch {
                expected: (1, dst.num_cols()),
                got: (1, src.num_cols()),
            });
        }
        let region = dst.region();
        row_slice_mut(dst.storage_mut(), region, dst_row)
            .copy_from_slice(row_slice(src.storage(), src.region(), src_row));
        Ok(())
    }

    fn add_row(
        dst: &mut MatrixMut<'_, Self>,
        dst_row: usize,
        src: &MatrixRef<'_, Self>,
        src_row: usize,
        alpha: f32,
    ) -> Result<()> {
        check_row(dst_row, dst.num_rows())?;
        check_row(src_row, src.num_rows())?;
        if dst.num_cols() != src.num_cols() {
            return Err(Error::ShapeMismatch {
                expected: (1, dst.num_cols()),
                got: (1, src.num_cols()),
            });
        }
        let region = dst.region();
        let from = row_slice(src.storage(), src.region(), src_row);
        for (d, &x) in row_slice_mut(dst.storage_mut(), region, dst_row)
            .iter_mut()
            .zip(from)
        {
            *d += alpha * x;
        }
        Ok(())
    }

    fn zero_row(dst: &mut MatrixMut<'_, Self>, row: usize) -> Result<()> {
        check_row(row, dst.num_rows())?;
        let region = dst.region();
        row_slice_mut(dst.storage_mut(), region, row).fill(0.0);
        Ok(())
    }

    fn add_row_ranges(
        dst: &mut MatrixMut<'_, Self>,
        src: &MatrixRef<'_, Self>,
        ranges: &[(usize, usize)],
    ) -> Result<()> {
        if ranges.len() != dst.num_rows() || dst.num_cols() != src.num_cols() {
            return Err(Error::ShapeMismatch {
                expected: dst.dims(),
                got: (ranges.len(), src.num_cols()),
            });
        }
        for &(start, end) in ranges {
            if start > end || end > src.num_rows() {
                return Err(Error::msg(format!(
                    "row range {start}:{end} out of range for {} source rows",
                    src.num_rows()
                )));
            }
        }
        let (s, region) = (src.storage(), src.region());
        par_rows_mut(dst, |r, row| {
            let (start, end) = ranges[r];
            for i in start..end {
                for (d, &x) in row.iter_mut().zip(row_slice(s, region, i)) {
                    *d += x;
                }
            }
        });
        Ok(())
    }

    fn gemm(
        dst: &mut MatrixMut<'_, Self>,
        a: &MatrixRef<'_, Self>,
        trans_a: MatrixTranspose,
        b: &MatrixRef<'_, Self>,
        trans_b: MatrixTranspose,
        alpha: f32,
        beta: f32,
    ) -> Result<()> {
        let (a_data, m, k) = dense(a, trans_a);
        let (b_data, k2, n) = dense(b, trans_b);
        if k != k2 {
            return Err(Error::msg(format!(
                "gemm shape mismatch: [{m}x{k}] @ [{k2}x{n}], inner dims must match"
            )));
        }
        check_same_dims(dst.dims(), (m, n))?;
        par_rows_mut(dst, |i, row| {
            let a_row = &a_data[i * k..(i + 1) * k];
            for (j, d) in row.iter_mut().enumerate() {
                let mut acc = 0.0f32;
                for (p, &av) in a_row.iter().enumerate() {
                    acc += av * b_data[p * n + j];
                }
                *d = if beta == 0.0 {
                    alpha * acc
                } else {
                    beta * *d + alpha * acc
                };
            }
        });
        Ok(())
    }

    fn add_vec_to_rows(
        dst: &mut MatrixMut<'_, Self>,
        vec: &MatrixRef<'_, Self>,
        alpha: f32,
    ) -> Result<()> {
        check_same_dims((1, dst.num_cols()), vec.dims())?;
        let v = row_slice(vec.storage(), vec.region(), 0);
        par_rows_mut(dst, |_, row| {
            for (d, &x) in row.iter_mut().zip(v) {
                *d += alpha * x;
            }
        });
        Ok(())
    }

    fn sum_rows(
        dst: &mut MatrixMut<'_, Self>,
        src: &MatrixRef<'_, Self>,
        alpha: f32,
        beta: f32,
    ) -> Result<()> {
        check_same_dims((1, src.num_cols()), dst.dims())?;
        let mut sums = vec![0.0f32; src.num_cols()];
        for r in 0..src.num_rows() {
            for (s, &x) in sums.iter_mut().zip(row_slice(src.storage(), src.region(), r)) {
                *s += x;
            }
        }
        let region = dst.region();
        for (d, s) in row_slice_mut(dst.storage_mut(), region, 0)
            .iter_mut()
            .zip(sums)
        {
            *d = beta * *d + alpha * s;
        }
        Ok(())
    }

    fn unary_op(
        op: UnaryOp,
        dst: &mut MatrixMut<'_, Self>,
        src: &MatrixRef<'_, Self>,
    ) -> Result<()> {
        check_same_dims(dst.dims(), src.dims())?;
        let (s, region) = (src.storage(), src.region());
        par_rows_mut(dst, |r, row| {
            for (d, &x) in row.iter_mut().zip(row_slice(s, region, r)) {
                *d = op.apply(x);
            }
        });
        Ok(())
    }

    fn unary_backward(
        op: UnaryOp,
        dst: &mut MatrixMut<'_, Self>,
        out_value: &MatrixRef<'_, Self>,
        out_deriv: &MatrixRef<'_, Self>,
        beta: f32,
    ) -> Result<()> {
        check_same_dims(dst.dims(), out_value.dims())?;
        check_same_dims(dst.dims(), out_deriv.dims())?;
        let (vs, vr) = (out_value.storage(), out_value.region());
        let (ds, dr) = (out_deriv.storage(), out_deriv.region());
        par_rows_mut(dst, |r, row| {
            let values = row_slice(vs, vr, r);
            let derivs = row_slice(ds, dr, r);
            for ((d, &y), &g) in row.iter_mut().zip(values).zip(derivs) {
                let grad = op.derivative_from_output(y) * g;
                *d = if beta == 0.0 { grad } else { beta * *d + grad };
            }
        });
        Ok(())
    }
}

/// Shorthand for building a CPU matrix in tests and demos.
pub fn cpu_matrix(data: &[f32], num_rows: usize, num_cols: usize) -> Result<CpuStorage> {
    CpuBackend::from_f32_slice(data, num_rows, num_cols, &CpuDevice)
}
