// RowSelect — Non-simple component driven by precomputed indexes
//
// Output row i is input row rows[i], where `rows` comes from the command's
// precomputed indexes. The number of output rows is therefore decided by the
// index list, not by the input, which is what makes the component non-simple.
//
// Several output rows may select the same input row, so backprop accumulates:
//
//   in_deriv[rows[i]] += out_deriv[i]
//
// and the component declares BACKPROP_ADDS (the caller zeroes in_deriv).

use heron_core::backend::Backend;
use heron_core::error::{Error, Result};
use heron_core::view::{MatrixMut, MatrixRef};

use crate::component::{Component, ComponentProperties, PrecomputedIndexes};

/// Selects (and possibly repeats) input rows by precomputed index.
#[derive(Debug, Clone)]
pub struct RowSelectComponent<B: Backend> {
    dim: usize,
    _backend: std::marker::PhantomData<B>,
}

impl<B: Backend> RowSelectComponent<B> {
    pub fn new(dim: usize) -> Self {
        RowSelectComponent {
            dim,
            _backend: std::marker::PhantomData,
        }
    }
}

fn require_indexes<'i>(
    indexes: Option<&'i PrecomputedIndexes>,
    num_rows: usize,
) -> Result<&'i PrecomputedIndexes> {
    let indexes = indexes
        .ok_or_else(|| Error::msg("RowSelectComponent requires precomputed indexes"))?;
    if indexes.rows.len() != num_rows {
        return Err(Error::msg(format!(
            "RowSelectComponent: {} precomputed rows for {} output rows",
            indexes.rows.len(),
            num_rows
        )));
    }
    Ok(indexes)
}

impl<B: Backend> Component<B> for RowSelectComponent<B> {
    fn type_name(&self) -> &'static str {
        "RowSelectComponent"
    }

    fn input_dim(&self) -> usize {
        self.dim
    }

    fn output_dim(&self) -> usize {
        self.dim
    }

    fn properties(&self) -> ComponentProperties {
        ComponentProperties::BACKPROP_ADDS
    }

    fn propagate(
        &self,
        indexes: Option<&PrecomputedIndexes>,
        input: &MatrixRef<'_, B>,
        output: &mut MatrixMut<'_, B>,
    ) -> Result<()> {
        let indexes = require_indexes(indexes, output.num_rows())?;
        let rows: Vec<Option<usize>> = indexes.rows.iter().map(|&r| Some(r)).collect();
        B::copy_rows(output, input, &rows)
    }

    fn backprop(
        &self,
        indexes: Option<&PrecomputedIndexes>,
        _in_value: Option<&MatrixRef<'_, B>>,
        _out_value: Option<&MatrixRef<'_, B>>,
        out_deriv: &MatrixRef<'_, B>,
        in_deriv: &mut MatrixMut<'_, B>,
    ) -> Result<()> {
        let indexes = require_indexes(indexes, out_deriv.num_rows())?;
        for (i, &r) in indexes.rows.iter().enumerate() {
            B::add_row(in_deriv, r, out_deriv, i, 1.0)?;
        }
        Ok(())
    }

    fn box_clone(&self) -> Box<dyn Component<B>> {
        Box::new(self.clone())
    }
}
