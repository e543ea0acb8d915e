// Component trait — The per-module primitive a computation dispatches to
//
// A computation never contains arithmetic of its own beyond copies, adds
// and row shuffles. Everything else happens inside components: a Propagate
// command hands one sub-matrix to `propagate()`, a Backprop command hands up
// to four to `backprop()`.
//
// CAPABILITIES:
//
// The checker and the access analysis cannot look inside a component, so a
// component describes itself with a `ComponentProperties` bit set:
//
//   SIMPLE                 one output row per input row, no precomputed indexes
//   UPDATABLE              has parameters; a Backprop on it has a side effect
//   PROPAGATE_IN_PLACE     input and output may be the same sub-matrix
//   PROPAGATE_ADDS         propagate adds to the output instead of overwriting
//   BACKPROP_IN_PLACE      out-deriv and in-deriv may be the same sub-matrix
//   BACKPROP_ADDS          backprop adds to the in-deriv instead of overwriting
//   STORES_STATS           StoreStats is meaningful
//   BACKPROP_NEEDS_INPUT   backprop reads the forward input
//   BACKPROP_NEEDS_OUTPUT  backprop reads the forward output
//
// MODEL UPDATE:
//
// `backprop()` takes `&self`: it only produces the input derivative. The
// parameter change of an updatable component is a separate `update()` call
// on the copy of the network being updated, so the network used for the
// computation itself stays immutable.

use bitflags::bitflags;

use heron_core::backend::Backend;
use heron_core::error::Result;
use heron_core::view::{MatrixMut, MatrixRef};

bitflags! {
    /// Capability bits a component declares about itself.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ComponentProperties: u32 {
        const SIMPLE = 0x001;
        const UPDATABLE = 0x002;
        const PROPAGATE_IN_PLACE = 0x004;
        const PROPAGATE_ADDS = 0x008;
        const BACKPROP_ADDS = 0x010;
        const STORES_STATS = 0x020;
        const BACKPROP_IN_PLACE = 0x040;
        const BACKPROP_NEEDS_INPUT = 0x080;
        const BACKPROP_NEEDS_OUTPUT = 0x100;
    }
}

/// Per-command index data for non-simple components, e.g. which input row
/// each output row is taken from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PrecomputedIndexes {
    pub rows: Vec<usize>,
}

impl PrecomputedIndexes {
    pub fn new(rows: Vec<usize>) -> Self {
        PrecomputedIndexes { rows }
    }
}

/// The interface every network component implements.
///
/// # Example
/// ```ignore
/// let relu = NonlinearComponent::<CpuBackend>::new(UnaryOp::Relu, 4);
/// relu.propagate(None, &input_view, &mut output_view)?;
/// ```
pub trait Component<B: Backend>: Send + Sync {
    /// Short type name, used when printing computations.
    fn type_name(&self) -> &'static str;

    fn input_dim(&self) -> usize;

    fn output_dim(&self) -> usize;

    fn properties(&self) -> ComponentProperties;

    /// Forward computation. `output` is overwritten unless the component
    /// declares `PROPAGATE_ADDS`.
    fn propagate(
        &self,
        indexes: Option<&PrecomputedIndexes>,
        input: &MatrixRef<'_, B>,
        output: &mut MatrixMut<'_, B>,
    ) -> Result<()>;

    /// Backward computation of the input derivative. `in_deriv` is
    /// overwritten unless the component declares `BACKPROP_ADDS`.
    fn backprop(
        &self,
        indexes: Option<&PrecomputedIndexes>,
        in_value: Option<&MatrixRef<'_, B>>,
        out_value: Option<&MatrixRef<'_, B>>,
        out_deriv: &MatrixRef<'_, B>,
        in_deriv: &mut MatrixMut<'_, B>,
    ) -> Result<()>;

    /// Accumulate statistics about the forward output. Default: nothing.
    fn store_stats(&mut self, _out_value: &MatrixRef<'_, B>) -> Result<()> {
        Ok(())
    }

    /// Apply the parameter change implied by one backprop. Default: nothing.
    fn update(
        &mut self,
        _indexes: Option<&PrecomputedIndexes>,
        _in_value: Option<&MatrixRef<'_, B>>,
        _out_deriv: &MatrixRef<'_, B>,
    ) -> Result<()> {
        Ok(())
    }

    /// A boxed deep copy.
    fn box_clone(&self) -> Box<dyn Component<B>>;

    /// One-line description for diagnostics.
    fn info(&self) -> String {
        format!(
            "{}, input-dim={}, output-dim={}",
            self.type_name(),
            self.input_dim(),
            self.output_dim()
        )
    }
}

impl<B: Backend> Clone for Box<dyn Component<B>> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}
