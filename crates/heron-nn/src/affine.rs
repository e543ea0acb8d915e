// Affine — Fully-connected component: y = x W^T + b
//
// PARAMETER SHAPES:
//
//   weight: [output_dim, input_dim]
//   bias:   [1, output_dim]          — added to every row
//
// BACKPROP:
//
//   in_deriv = out_deriv @ W
//
// UPDATE:
//
//   Derivatives flowing backwards are derivatives of an objective to be
//   maximized, so the update adds them:
//
//   W += lr * out_deriv^T @ in_value
//   b += lr * sum_rows(out_deriv)

use heron_core::backend::{Backend, BackendStorage, MatrixTranspose};
use heron_core::error::{Error, Result};
use heron_core::view::{MatrixMut, MatrixRef};

use crate::component::{Component, ComponentProperties, PrecomputedIndexes};

/// A fully-connected component with a learnable weight and bias.
#[derive(Debug, Clone)]
pub struct AffineComponent<B: Backend> {
    /// Weight matrix: [output_dim, input_dim]
    weight: B::Storage,
    /// Bias row: [1, output_dim]
    bias: B::Storage,
    learning_rate: f32,
}

impl<B: Backend> AffineComponent<B> {
    /// Create an affine component with uniform U(-k, k) initialization,
    /// k = sqrt(1 / input_dim).
    pub fn new(
        input_dim: usize,
        output_dim: usize,
        learning_rate: f32,
        device: &B::Device,
    ) -> Result<Self> {
        let k = (1.0 / input_dim as f32).sqrt();
        let weight = B::rand_uniform(output_dim, input_dim, -k, k, device)?;
        let bias = B::rand_uniform(1, output_dim, -k, k, device)?;
        Ok(AffineComponent {
            weight,
            bias,
            learning_rate,
        })
    }

    /// Create an affine component from existing parameters.
    pub fn from_storage(weight: B::Storage, bias: B::Storage, learning_rate: f32) -> Result<Self> {
        if bias.num_rows() != 1 || bias.num_cols() != weight.num_rows() {
            return Err(Error::ShapeMismatch {
                expected: (1, weight.num_rows()),
                got: bias.dims(),
            });
        }
        Ok(AffineComponent {
            weight,
            bias,
            learning_rate,
        })
    }

    pub fn weight(&self) -> &B::Storage {
        &self.weight
    }

    pub fn bias(&self) -> &B::Storage {
        &self.bias
    }

    pub fn learning_rate(&self) -> f32 {
        self.learning_rate
    }
}

impl<B: Backend> Component<B> for AffineComponent<B> {
    fn type_name(&self) -> &'static str {
        "AffineComponent"
    }

    fn input_dim(&self) -> usize {
        self.weight.num_cols()
    }

    fn output_dim(&self) -> usize {
        self.weight.num_rows()
    }

    fn properties(&self) -> ComponentProperties {
        ComponentProperties::SIMPLE
            | ComponentProperties::UPDATABLE
            | ComponentProperties::BACKPROP_NEEDS_INPUT
    }

    fn propagate(
        &self,
        _indexes: Option<&PrecomputedIndexes>,
        input: &MatrixRef<'_, B>,
        output: &mut MatrixMut<'_, B>,
    ) -> Result<()> {
        B::gemm(
            output,
            input,
            MatrixTranspose::NoTrans,
            &MatrixRef::whole(&self.weight),
            MatrixTranspose::Trans,
            1.0,
            0.0,
        )?;
        B::add_vec_to_rows(output, &MatrixRef::whole(&self.bias), 1.0)
    }

    fn backprop(
        &self,
        _indexes: Option<&PrecomputedIndexes>,
        _in_value: Option<&MatrixRef<'_, B>>,
        _out_value: Option<&MatrixRef<'_, B>>,
        out_deriv: &MatrixRef<'_, B>,
        in_deriv: &mut MatrixMut<'_, B>,
    ) -> Result<()> {
        B::gemm(
            in_deriv,
            out_deriv,
            MatrixTranspose::NoTrans,
            &MatrixRef::whole(&self.weight),
            MatrixTranspose::NoTrans,
            1.0,
            0.0,
        )
    }

    fn update(
        &mut self,
        _indexes: Option<&PrecomputedIndexes>,
        in_value: Option<&MatrixRef<'_, B>>,
        out_deriv: &MatrixRef<'_, B>,
    ) -> Result<()> {
        let in_value = in_value
            .ok_or_else(|| Error::msg("AffineComponent::update requires the input value"))?;
        let lr = self.learning_rate;
        B::gemm(
            &mut MatrixMut::whole(&mut self.weight),
            out_deriv,
            MatrixTranspose::Trans,
            in_value,
            MatrixTranspose::NoTrans,
            lr,
            1.0,
        )?;
        B::sum_rows(&mut MatrixMut::whole(&mut self.bias), out_deriv, lr, 1.0)
    }

    fn box_clone(&self) -> Box<dyn Component<B>> {
        Box::new(self.clone())
    }

    fn info(&self) -> String {
        format!(
            "{}, input-dim={}, output-dim={}, learning-rate={}",
            self.type_name(),
            self.input_dim(),
            self.output_dim(),
            self.learning_rate
        )
    }
}
