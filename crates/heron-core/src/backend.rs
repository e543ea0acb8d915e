use std::fmt;

use crate::error::Result;
use crate::view::{MatrixMut, MatrixRef};

// Backend — Numeric storage and the primitives commands dispatch to
//
// Every command of a computation that touches data ends in one of the
// primitives below (copy, add, row gather/scatter, range sums) or in a
// component, which itself is written purely in terms of these primitives.
// The executor never looks inside a storage buffer.
//
// SYNCHRONY:
//
// A backend may parallelize internally (the CPU backend splits rows over
// rayon) or enqueue work on a device, but each call must be complete, or
// ordered before any later call touching the same storage, when it returns.
//
// VIEWS:
//
// All primitives take `MatrixRef`/`MatrixMut` views, which were bounds
// checked when they were built. A primitive still checks that the shapes of
// its operands agree and returns `Error::ShapeMismatch` otherwise.

/// Identifies a compute device (e.g. "cpu").
pub trait BackendDevice: Clone + fmt::Debug + Send + Sync + 'static {
    /// A human-readable name for this device.
    fn name(&self) -> String;
}

/// One matrix buffer owned by a backend.
pub trait BackendStorage: Clone + fmt::Debug + Send + Sync + 'static {
    fn num_rows(&self) -> usize;

    fn num_cols(&self) -> usize;

    fn dims(&self) -> (usize, usize) {
        (self.num_rows(), self.num_cols())
    }

    fn is_empty(&self) -> bool {
        self.num_rows() == 0 || self.num_cols() == 0
    }
}

/// How freshly allocated storage is initialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeKind {
    Zeroed,
    /// Contents are unspecified; callers must write before reading.
    Undefined,
}

/// Element-wise nonlinearities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Relu,
    Sigmoid,
    Tanh,
}

impl UnaryOp {
    pub fn name(&self) -> &'static str {
        match self {
            UnaryOp::Relu => "relu",
            UnaryOp::Sigmoid => "sigmoid",
            UnaryOp::Tanh => "tanh",
        }
    }

    pub fn apply(&self, x: f32) -> f32 {
        match self {
            UnaryOp::Relu => x.max(0.0),
            UnaryOp::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            UnaryOp::Tanh => x.tanh(),
        }
    }

    /// Derivative expressed in terms of the op's output `y = f(x)`.
    pub fn derivative_from_output(&self, y: f32) -> f32 {
        match self {
            UnaryOp::Relu => {
                if y > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            UnaryOp::Sigmoid => y * (1.0 - y),
            UnaryOp::Tanh => 1.0 - y * y,
        }
    }
}

/// Whether a GEMM operand is used as-is or transposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixTranspose {
    NoTrans,
    Trans,
}

/// The compute backend interface.
///
/// All operations write into an existing destination view; nothing here
/// allocates except `alloc`, `from_f32_slice` and `rand_uniform`.
pub trait Backend: Clone + Send + Sync + fmt::Debug + 'static {
    /// The device type for this backend.
    type Device: BackendDevice;
    /// The storage type for this backend.
    type Storage: BackendStorage;

    //  Creation

    /// Allocate a `num_rows` x `num_cols` buffer.
    fn alloc(
        num_rows: usize,
        num_cols: usize,
        kind: ResizeKind,
        device: &Self::Device,
    ) -> Result<Self::Storage>;

    /// Create storage from row-major data.
    fn from_f32_slice(
        data: &[f32],
        num_rows: usize,
        num_cols: usize,
        device: &Self::Device,
    ) -> Result<Self::Storage>;

    /// Create storage with values drawn uniformly from `[low, high)`.
    fn rand_uniform(
        num_rows: usize,
        num_cols: usize,
        low: f32,
        high: f32,
        device: &Self::Device,
    ) -> Result<Self::Storage>;

    /// Copy a view's contents to the host, row-major.
    fn to_f32_vec(src: &MatrixRef<'_, Self>) -> Result<Vec<f32>>;

    /// Sum of all elements of a view.
    fn sum(src: &MatrixRef<'_, Self>) -> Result<f64> {
        Ok(Self::to_f32_vec(src)?.iter().map(|&x| x as f64).sum())
    }

    //  Whole-view data movement

    /// `dst = src`.
    fn copy(dst: &mut MatrixMut<'_, Self>, src: &MatrixRef<'_, Self>) -> Result<()>;

    /// `dst += alpha * src`.
    fn add(dst: &mut MatrixMut<'_, Self>, src: &MatrixRef<'_, Self>, alpha: f32) -> Result<()>;

    /// `dst = 0`.
    fn set_zero(dst: &mut MatrixMut<'_, Self>) -> Result<()>;

    //  Row gather

    /// `dst[r] = src[indexes[r]]`, or zero where the index is absent.
    fn copy_rows(
        dst: &mut MatrixMut<'_, Self>,
        src: &MatrixRef<'_, Self>,
        indexes: &[Option<usize>],
    ) -> Result<()>;

    /// `dst[r] += alpha * src[indexes[r]]`; absent indexes leave the row alone.
    fn add_rows(
        dst: &mut MatrixMut<'_, Self>,
        src: &MatrixRef<'_, Self>,
        alpha: f32,
        indexes: &[Option<usize>],
    ) -> Result<()>;

    //  Single rows (multi-source / multi-destination commands)

    fn copy_row(
        dst: &mut MatrixMut<'_, Self>,
        dst_row: usize,
        src: &MatrixRef<'_, Self>,
        src_row: usize,
    ) -> Result<()>;

    fn add_row(
        dst: &mut MatrixMut<'_, Self>,
        dst_row: usize,
        src: &MatrixRef<'_, Self>,
        src_row: usize,
        alpha: f32,
    ) -> Result<()>;

    fn zero_row(dst: &mut MatrixMut<'_, Self>, row: usize) -> Result<()>;

    //  Range sums

    /// `dst[r] += sum(src[start..end])` for each `(start, end)` in `ranges`.
    fn add_row_ranges(
        dst: &mut MatrixMut<'_, Self>,
        src: &MatrixRef<'_, Self>,
        ranges: &[(usize, usize)],
    ) -> Result<()>;

    //  Dense algebra used by components

    /// `dst = beta * dst + alpha * op(a) * op(b)`.
    #[allow(clippy::too_many_arguments)]
    fn gemm(
        dst: &mut MatrixMut<'_, Self>,
        a: &MatrixRef<'_, Self>,
        trans_a: MatrixTranspose,
        b: &MatrixRef<'_, Self>,
        trans_b: MatrixTranspose,
        alpha: f32,
        beta: f32,
    ) -> Result<()>;

    /// `dst[r] += alpha * vec[0]` for every row `r`; `vec` is a single row.
    fn add_vec_to_rows(
        dst: &mut MatrixMut<'_, Self>,
        vec: &MatrixRef<'_, Self>,
        alpha: f32,
    ) -> Result<()>;

    /// `dst[0] = beta * dst[0] + alpha * sum_r src[r]`; `dst` is a single row.
    fn sum_rows(
        dst: &mut MatrixMut<'_, Self>,
        src: &MatrixRef<'_, Self>,
        alpha: f32,
        beta: f32,
    ) -> Result<()>;

    /// `dst = op(src)` element-wise.
    fn unary_op(op: UnaryOp, dst: &mut MatrixMut<'_, Self>, src: &MatrixRef<'_, Self>)
        -> Result<()>;

    /// `dst = beta * dst + op'(out_value) * out_deriv` element-wise.
    fn unary_backward(
        op: UnaryOp,
        dst: &mut MatrixMut<'_, Self>,
        out_value: &MatrixRef<'_, Self>,
        out_deriv: &MatrixRef<'_, Self>,
        beta: f32,
    ) -> Result<()>;
}
