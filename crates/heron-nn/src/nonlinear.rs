// Nonlinear components — Element-wise activations with running statistics
//
// Thin components over the backend's `unary_op` / `unary_backward`. They are
// simple, may run in place (forward and backward), and derive their
// backward pass from the forward output alone.
//
// RUNNING STATISTICS:
//
//   StoreStats accumulates, per dimension, the sum of the forward output and
//   the number of rows seen. `mean_value()` gives the average activation,
//   which is what diagnostics report for each nonlinearity.

use heron_core::backend::{Backend, UnaryOp};
use heron_core::error::{Error, Result};
use heron_core::view::{MatrixMut, MatrixRef};

use crate::component::{Component, ComponentProperties, PrecomputedIndexes};

/// Element-wise nonlinearity (ReLU, Sigmoid or Tanh) of fixed dimension.
#[derive(Debug, Clone)]
pub struct NonlinearComponent<B: Backend> {
    op: UnaryOp,
    dim: usize,
    value_sum: Vec<f64>,
    count: f64,
    _backend: std::marker::PhantomData<B>,
}

impl<B: Backend> NonlinearComponent<B> {
    pub fn new(op: UnaryOp, dim: usize) -> Self {
        NonlinearComponent {
            op,
            dim,
            value_sum: vec![0.0; dim],
            count: 0.0,
            _backend: std::marker::PhantomData,
        }
    }

    pub fn relu(dim: usize) -> Self {
        Self::new(UnaryOp::Relu, dim)
    }

    pub fn sigmoid(dim: usize) -> Self {
        Self::new(UnaryOp::Sigmoid, dim)
    }

    pub fn tanh(dim: usize) -> Self {
        Self::new(UnaryOp::Tanh, dim)
    }

    pub fn op(&self) -> UnaryOp {
        self.op
    }

    /// Number of output rows accumulated by `store_stats`.
    pub fn count(&self) -> f64 {
        self.count
    }

    pub fn value_sum(&self) -> &[f64] {
        &self.value_sum
    }

    /// Average output per dimension, or `None` before any statistics.
    pub fn mean_value(&self) -> Option<Vec<f64>> {
        if self.count == 0.0 {
            return None;
        }
        Some(self.value_sum.iter().map(|s| s / self.count).collect())
    }
}

impl<B: Backend> Component<B> for NonlinearComponent<B> {
    fn type_name(&self) -> &'static str {
        match self.op {
            UnaryOp::Relu => "RectifiedLinearComponent",
            UnaryOp::Sigmoid => "SigmoidComponent",
            UnaryOp::Tanh => "TanhComponent",
        }
    }

    fn input_dim(&self) -> usize {
        self.dim
    }

    fn output_dim(&self) -> usize {
        self.dim
    }

    fn properties(&self) -> ComponentProperties {
        ComponentProperties::SIMPLE
            | ComponentProperties::PROPAGATE_IN_PLACE
            | ComponentProperties::BACKPROP_IN_PLACE
            | ComponentProperties::BACKPROP_NEEDS_OUTPUT
            | ComponentProperties::STORES_STATS
    }

    fn propagate(
        &self,
        _indexes: Option<&PrecomputedIndexes>,
        input: &MatrixRef<'_, B>,
        output: &mut MatrixMut<'_, B>,
    ) -> Result<()> {
        B::unary_op(self.op, output, input)
    }

    fn backprop(
        &self,
        _indexes: Option<&PrecomputedIndexes>,
        _in_value: Option<&MatrixRef<'_, B>>,
        out_value: Option<&MatrixRef<'_, B>>,
        out_deriv: &MatrixRef<'_, B>,
        in_deriv: &mut MatrixMut<'_, B>,
    ) -> Result<()> {
        let out_value = out_value.ok_or_else(|| {
            Error::msg(format!("{} backprop requires the output value", self.op.name()))
        })?;
        B::unary_backward(self.op, in_deriv, out_value, out_deriv, 0.0)
    }

    fn store_stats(&mut self, out_value: &MatrixRef<'_, B>) -> Result<()> {
        if out_value.num_cols() != self.dim {
            return Err(Error::ShapeMismatch {
                expected: (out_value.num_rows(), self.dim),
                got: out_value.dims(),
            });
        }
        let data = out_value.to_f32_vec()?;
        for row in data.chunks(self.dim) {
            for (s, &v) in self.value_sum.iter_mut().zip(row) {
                *s += v as f64;
            }
        }
        self.count += out_value.num_rows() as f64;
        Ok(())
    }

    fn box_clone(&self) -> Box<dyn Component<B>> {
        Box::new(self.clone())
    }

    fn info(&self) -> String {
        format!("{}, dim={}, count={}", self.type_name(), self.dim, self.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heron_core::backend::{Backend, ResizeKind};
    use heron_cpu::{cpu_matrix, CpuBackend, CpuDevice};

    #[test]
    fn test_relu_propagate_and_stats() {
        let mut relu = NonlinearComponent::<CpuBackend>::relu(2);
        let x = cpu_matrix(&[-1.0, 2.0, 3.0, -4.0], 2, 2).unwrap();
        let mut y = CpuBackend::alloc(2, 2, ResizeKind::Undefined, &CpuDevice).unwrap();
        relu.propagate(None, &MatrixRef::whole(&x), &mut MatrixMut::whole(&mut y))
            .unwrap();
        assert_eq!(y.data(), &[0.0, 2.0, 3.0, 0.0]);

        assert!(relu.mean_value().is_none());
        relu.store_stats(&MatrixRef::whole(&y)).unwrap();
        assert_eq!(relu.count(), 2.0);
        assert_eq!(relu.info(), "RectifiedLinearComponent, dim=2, count=2");
        assert_eq!(relu.mean_value().unwrap(), vec![1.5, 1.0]);
    }

    #[test]
    fn test_sigmoid_backprop_needs_output() {
        let sig = NonlinearComponent::<CpuBackend>::sigmoid(1);
        let g = cpu_matrix(&[1.0], 1, 1).unwrap();
        let mut d = CpuBackend::alloc(1, 1, ResizeKind::Zeroed, &CpuDevice).unwrap();
        let err = sig.backprop(
            None,
            None,
            None,
            &MatrixRef::whole(&g),
            &mut MatrixMut::whole(&mut d),
        );
        assert!(err.is_err());

        let y = cpu_matrix(&[0.5], 1, 1).unwrap();
        sig.backprop(
            None,
            None,
            Some(&MatrixRef::whole(&y)),
            &MatrixRef::whole(&g),
            &mut MatrixMut::whole(&mut d),
        )
        .unwrap();
        assert_eq!(d.data(), &[0.25]);
    }
}
