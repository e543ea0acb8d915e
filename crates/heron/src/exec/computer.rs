// Computer — Command interpreter for one computation
//
// Owns one storage slot per matrix of the computation. Resize commands fill
// and empty the slots; every other command borrows views of them.
//
// STATES:
//
//   Created ──accept_input*──► forward() ──► ForwardDone ──► backward() ──► BackwardDone
//                                              get_output      get_input_deriv
//
// Anything else is a usage error. `accept_output_deriv` is valid before
// `backward()`.
//
// ALIASING:
//
// A command may read a sub-matrix of the matrix it writes (in-place
// propagate or backprop, or two disjoint views of one matrix). The written
// matrix is taken out of its slot for the duration of the command, and reads
// of it go through a copy taken before the command runs. Reads therefore
// always see the values from before the command.

use tracing::debug;

use heron_core::backend::{Backend, BackendStorage, ResizeKind};
use heron_core::bail;
use heron_core::error::{Error, Result};
use heron_core::view::{MatrixMut, MatrixRef};
use heron_nn::{ComponentProperties, Nnet, PrecomputedIndexes};

use heron_ir::{
    Command, CommandType, Computation, ComputationPrinter, ComputationRequest, EMPTY_SUBMATRIX,
};

// Configuration

/// Executor options.
#[derive(Debug, Clone, Default)]
pub struct ComputeConfig {
    /// Log every command's statement and the sum of what it wrote.
    pub debug: bool,
}

impl ComputeConfig {
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

/// Where an `NnetComputer` is in its call sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputerState {
    Created,
    ForwardDone,
    BackwardDone,
}

// Executor

pub struct NnetComputer<'a, B: Backend> {
    config: ComputeConfig,
    computation: &'a Computation,
    nnet: &'a Nnet<B>,
    request: &'a ComputationRequest,
    nnet_to_update: Option<&'a mut Nnet<B>>,
    device: B::Device,
    /// Indexed by matrix; `None` while unallocated.
    matrices: Vec<Option<B::Storage>>,
    forward_end: usize,
    state: ComputerState,
    printer: Option<ComputationPrinter<'a, B>>,
}

impl<'a, B: Backend> NnetComputer<'a, B> {
    /// `nnet_to_update` receives parameter updates and statistics; without it
    /// the computation must not contain updatable backprops.
    pub fn new(
        config: ComputeConfig,
        computation: &'a Computation,
        nnet: &'a Nnet<B>,
        request: &'a ComputationRequest,
        nnet_to_update: Option<&'a mut Nnet<B>>,
        device: B::Device,
    ) -> Result<Self> {
        let forward_end = computation
            .forward_computation_end()
            .ok_or_else(|| Error::ordering(None, "computation has no phase marker"))?;
        if forward_end >= computation.commands().len() {
            return Err(Error::ordering(
                Some(forward_end),
                "phase marker position is past the last command",
            ));
        }
        let printer = config
            .debug
            .then(|| ComputationPrinter::new(computation, nnet));
        Ok(NnetComputer {
            config,
            computation,
            nnet,
            request,
            nnet_to_update,
            device,
            matrices: vec![None; computation.num_matrices()],
            forward_end,
            state: ComputerState::Created,
            printer,
        })
    }

    pub fn state(&self) -> ComputerState {
        self.state
    }

    //  Inputs

    /// Hand over the value of a named input. The buffer must have one row
    /// per requested index and the width of the bound matrix.
    pub fn accept_input(&mut self, name: &str, storage: B::Storage) -> Result<()> {
        self.expect_state(&[ComputerState::Created], "accept_input")?;
        let spec = self
            .request
            .index_for_input(name)
            .and_then(|i| self.request.inputs().get(i))
            .ok_or_else(|| Error::usage(format!("'{name}' is not an input of the request")))?;
        let matrix = self.bound_matrix(name, false)?;
        self.place(matrix, spec.num_rows(), storage)
    }

    /// Hand over the derivative of the objective w.r.t. a named output.
    pub fn accept_output_deriv(&mut self, name: &str, storage: B::Storage) -> Result<()> {
        self.expect_state(
            &[ComputerState::Created, ComputerState::ForwardDone],
            "accept_output_deriv",
        )?;
        let spec = self
            .request
            .index_for_output(name)
            .and_then(|i| self.request.outputs().get(i))
            .ok_or_else(|| Error::usage(format!("'{name}' is not an output of the request")))?;
        if !spec.has_deriv {
            return Err(Error::usage(format!(
                "no derivative was requested for output '{name}'"
            )));
        }
        let matrix = self.bound_matrix(name, true)?;
        self.place(matrix, spec.num_rows(), storage)
    }

    fn place(&mut self, matrix: usize, num_rows: usize, storage: B::Storage) -> Result<()> {
        let info = *self.computation.matrix(matrix)?;
        let expected = (num_rows, info.num_cols);
        if storage.dims() != expected || info.num_rows != num_rows {
            return Err(Error::ShapeMismatch {
                expected: (info.num_rows, info.num_cols),
                got: storage.dims(),
            });
        }
        let slot = self
            .matrices
            .get_mut(matrix)
            .ok_or_else(|| Error::msg(format!("matrix m{matrix} out of range")))?;
        *slot = Some(storage);
        Ok(())
    }

    /// The value (or derivative) matrix bound to node `name`.
    fn bound_matrix(&self, name: &str, deriv: bool) -> Result<usize> {
        let node = self
            .nnet
            .node_index(name)
            .ok_or_else(|| Error::usage(format!("the network has no node named '{name}'")))?;
        let binding = self
            .computation
            .binding(node)
            .ok_or_else(|| Error::usage(format!("node '{name}' is not bound to a matrix")))?;
        if deriv {
            binding.deriv_matrix.ok_or_else(|| {
                Error::usage(format!("node '{name}' has no derivative matrix"))
            })
        } else {
            Ok(binding.value_matrix)
        }
    }

    //  Phases

    /// Run every command up to and including the phase marker.
    pub fn forward(&mut self) -> Result<()> {
        self.expect_state(&[ComputerState::Created], "forward")?;
        for spec in self.request.inputs() {
            let m = self.bound_matrix(&spec.name, false)?;
            if !matches!(self.matrices.get(m), Some(Some(_))) {
                return Err(Error::usage(format!(
                    "input '{}' was not supplied before forward()",
                    spec.name
                )));
            }
        }
        debug!(commands = self.forward_end + 1, "forward");
        for i in 0..=self.forward_end {
            self.execute(i)?;
        }
        self.state = ComputerState::ForwardDone;
        Ok(())
    }

    /// Run the commands after the phase marker.
    pub fn backward(&mut self) -> Result<()> {
        self.expect_state(&[ComputerState::ForwardDone], "backward")?;
        if self.nnet_to_update.is_none() {
            if let Some(i) = self.first_updating_backprop()? {
                return Err(Error::usage(format!(
                    "command {i} updates a component but no network to update was supplied"
                )));
            }
        }
        for spec in self.request.outputs().iter().filter(|s| s.has_deriv) {
            let m = self.bound_matrix(&spec.name, true)?;
            if !matches!(self.matrices.get(m), Some(Some(_))) {
                return Err(Error::usage(format!(
                    "derivative of output '{}' was not supplied before backward()",
                    spec.name
                )));
            }
        }
        let total = self.computation.commands().len();
        debug!(commands = total - self.forward_end - 1, "backward");
        for i in self.forward_end + 1..total {
            self.execute(i)?;
        }
        self.state = ComputerState::BackwardDone;
        Ok(())
    }

    fn first_updating_backprop(&self) -> Result<Option<usize>> {
        for (i, command) in self.computation.commands().iter().enumerate() {
            if let Command::Backprop { component, .. } = *command {
                let props = self.nnet.component(component)?.properties();
                if props.contains(ComponentProperties::UPDATABLE) {
                    return Ok(Some(i));
                }
            }
        }
        Ok(None)
    }

    //  Outputs

    /// The value of a named output; valid once `forward()` has run.
    pub fn get_output(&self, name: &str) -> Result<MatrixRef<'_, B>> {
        self.expect_state(
            &[ComputerState::ForwardDone, ComputerState::BackwardDone],
            "get_output",
        )?;
        if self.request.index_for_output(name).is_none() {
            return Err(Error::usage(format!("'{name}' is not an output of the request")));
        }
        let m = self.bound_matrix(name, false)?;
        Ok(MatrixRef::whole(storage_of(&self.matrices, m)?))
    }

    /// The derivative w.r.t. a named input; valid once `backward()` has run.
    pub fn get_input_deriv(&self, name: &str) -> Result<MatrixRef<'_, B>> {
        self.expect_state(&[ComputerState::BackwardDone], "get_input_deriv")?;
        let spec = self
            .request
            .index_for_input(name)
            .and_then(|i| self.request.inputs().get(i))
            .ok_or_else(|| Error::usage(format!("'{name}' is not an input of the request")))?;
        if !spec.has_deriv {
            return Err(Error::usage(format!(
                "no derivative was requested for input '{name}'"
            )));
        }
        let m = self.bound_matrix(name, true)?;
        Ok(MatrixRef::whole(storage_of(&self.matrices, m)?))
    }

    fn expect_state(&self, allowed: &[ComputerState], call: &str) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(Error::usage(format!(
                "{call}() called in state {:?}",
                self.state
            )))
        }
    }

    //  Dispatch

    fn execute(&mut self, index: usize) -> Result<()> {
        let computation = self.computation;
        let nnet = self.nnet;
        let Some(command) = computation.commands().get(index) else {
            bail!("no command {index}")
        };
        debug!(command = index, kind = ?command.command_type(), "execute");

        match *command {
            Command::ResizeMatrixZeroed { matrix } => self.resize(matrix, ResizeKind::Zeroed)?,
            Command::ResizeMatrixUndefined { matrix } => {
                self.resize(matrix, ResizeKind::Undefined)?
            }
            Command::ResizeMatrixEmpty { matrix } => {
                let slot = self
                    .matrices
                    .get_mut(matrix)
                    .ok_or_else(|| Error::malformed(index, format!("no matrix m{matrix}")))?;
                *slot = None;
            }
            Command::Propagate {
                component,
                precomputed,
                input,
                output,
            } => {
                let comp = nnet.component(component)?;
                let indexes = precomputed_of(computation, index, precomputed)?;
                self.with_views(output, &[input], |out, reads| {
                    comp.propagate(indexes, required(reads, 0, "input")?, out)
                })?;
            }
            Command::StoreStats { component, value } => {
                // Statistics accumulate in the update target, and only when
                // the request asks for them.
                let wanted = self.request.store_component_stats();
                if let (true, Some(target)) = (wanted, self.nnet_to_update.as_deref_mut()) {
                    let view = view_of(computation, &self.matrices, value)?
                        .ok_or_else(|| Error::malformed(index, "StoreStats of the empty matrix"))?;
                    target.component_mut(component)?.store_stats(&view)?;
                }
            }
            Command::Backprop {
                component,
                precomputed,
                in_value,
                out_value,
                out_deriv,
                in_deriv,
                ..
            } => {
                let comp = nnet.component(component)?;
                let indexes = precomputed_of(computation, index, precomputed)?;
                // Update first: an in-place backprop overwrites out_deriv.
                if comp.properties().contains(ComponentProperties::UPDATABLE) {
                    if let Some(target) = self.nnet_to_update.as_deref_mut() {
                        let in_value = view_of(computation, &self.matrices, in_value)?;
                        let out_deriv = view_of(computation, &self.matrices, out_deriv)?
                            .ok_or_else(|| Error::malformed(index, "backprop without out-deriv"))?;
                        target.component_mut(component)?.update(
                            indexes,
                            in_value.as_ref(),
                            &out_deriv,
                        )?;
                    }
                }
                if in_deriv != EMPTY_SUBMATRIX {
                    self.with_views(in_deriv, &[in_value, out_value, out_deriv], |d, reads| {
                        comp.backprop(
                            indexes,
                            reads[0].as_ref(),
                            reads[1].as_ref(),
                            required(reads, 2, "out-deriv")?,
                            d,
                        )
                    })?;
                }
            }
            Command::MatrixCopy { dst, src } => {
                self.with_views(dst, &[src], |d, reads| {
                    B::copy(d, required(reads, 0, "source")?)
                })?;
            }
            Command::MatrixAdd { dst, src } => {
                self.with_views(dst, &[src], |d, reads| {
                    B::add(d, required(reads, 0, "source")?, 1.0)
                })?;
            }
            Command::CopyRows { dst, src, indexes } => {
                let rows = index_table(computation.indexes(indexes), index, "indexes")?;
                self.with_views(dst, &[src], |d, reads| {
                    B::copy_rows(d, required(reads, 0, "source")?, rows)
                })?;
            }
            Command::AddRows { dst, src, indexes } => {
                let rows = index_table(computation.indexes(indexes), index, "indexes")?;
                self.with_views(dst, &[src], |d, reads| {
                    B::add_rows(d, required(reads, 0, "source")?, 1.0, rows)
                })?;
            }
            Command::CopyRowsMulti { dst, indexes_multi }
            | Command::AddRowsMulti { dst, indexes_multi } => {
                let copy = command.command_type() == CommandType::CopyRowsMulti;
                let pairs =
                    index_table(computation.indexes_multi(indexes_multi), index, "indexes_multi")?;
                let mut sources: Vec<usize> = pairs.iter().flatten().map(|&(s, _)| s).collect();
                sources.sort_unstable();
                sources.dedup();
                self.with_views(dst, &sources, |d, reads| {
                    for (r, pair) in pairs.iter().enumerate() {
                        match *pair {
                            Some((s, row)) => {
                                let k = sources.binary_search(&s).map_err(|_| {
                                    Error::malformed(index, format!("unresolved sub-matrix {s}"))
                                })?;
                                let src = required(reads, k, "source")?;
                                if copy {
                                    B::copy_row(d, r, src, row)?;
                                } else {
                                    B::add_row(d, r, src, row, 1.0)?;
                                }
                            }
                            None if copy => B::zero_row(d, r)?,
                            None => {}
                        }
                    }
                    Ok(())
                })?;
            }
            Command::CopyToRowsMulti { src, indexes_multi }
            | Command::AddToRowsMulti { src, indexes_multi } => {
                let copy = command.command_type() == CommandType::CopyToRowsMulti;
                let pairs =
                    index_table(computation.indexes_multi(indexes_multi), index, "indexes_multi")?;
                // Every row reads the source as it was before the command,
                // even when an earlier row wrote into it.
                let src_info = *computation.submatrix(src)?;
                let aliased = pairs.iter().flatten().any(|&(s, _)| {
                    computation
                        .submatrix(s)
                        .map_or(false, |d| d.matrix_index == src_info.matrix_index)
                });
                let snapshot: Option<B::Storage> = if aliased {
                    Some(storage_of(&self.matrices, src_info.matrix_index)?.clone())
                } else {
                    None
                };
                for (r, pair) in pairs.iter().enumerate() {
                    let Some((s, row)) = *pair else { continue };
                    match &snapshot {
                        Some(snap) => {
                            let src_view = MatrixRef::new(snap, src_info.region)?;
                            self.with_views(s, &[], |d, _| {
                                scatter_row(copy, d, row, &src_view, r)
                            })?;
                        }
                        None => self.with_views(s, &[src], |d, reads| {
                            scatter_row(copy, d, row, required(reads, 0, "source")?, r)
                        })?,
                    }
                }
            }
            Command::AddRowRanges {
                dst,
                src,
                indexes_ranges,
            } => {
                let ranges = index_table(
                    computation.indexes_ranges(indexes_ranges),
                    index,
                    "indexes_ranges",
                )?;
                self.with_views(dst, &[src], |d, reads| {
                    B::add_row_ranges(d, required(reads, 0, "source")?, ranges)
                })?;
            }
            Command::NoOperation | Command::NoOperationMarker => {}
        }

        if self.config.debug {
            self.log_command(index, command)?;
        }
        Ok(())
    }

    fn resize(&mut self, matrix: usize, kind: ResizeKind) -> Result<()> {
        let info = *self.computation.matrix(matrix)?;
        let storage = B::alloc(info.num_rows, info.num_cols, kind, &self.device)?;
        if let Some(slot) = self.matrices.get_mut(matrix) {
            *slot = Some(storage);
        }
        Ok(())
    }

    /// Run `f` on a mutable view of sub-matrix `dst` and read-only views of
    /// `reads` (`None` for the empty sub-matrix). Reads of `dst`'s own matrix
    /// see its contents from before `f` runs.
    fn with_views<F>(&mut self, dst: usize, reads: &[usize], f: F) -> Result<()>
    where
        F: FnOnce(&mut MatrixMut<'_, B>, &[Option<MatrixRef<'_, B>>]) -> Result<()>,
    {
        let computation = self.computation;
        let info = *computation.submatrix(dst)?;
        let m = info.matrix_index;
        let slot = self
            .matrices
            .get_mut(m)
            .ok_or_else(|| Error::msg(format!("matrix m{m} out of range")))?;
        let mut storage = slot
            .take()
            .ok_or_else(|| Error::lifecycle(m, "written while not allocated"))?;

        let result = (|| {
            let aliased = reads.iter().any(|&s| {
                s != EMPTY_SUBMATRIX
                    && computation
                        .submatrix(s)
                        .map_or(false, |r| r.matrix_index == m)
            });
            let snapshot = aliased.then(|| storage.clone());
            let mut views = Vec::with_capacity(reads.len());
            for &s in reads {
                let view = match (&snapshot, computation.submatrix(s)) {
                    (Some(snap), Ok(r)) if s != EMPTY_SUBMATRIX && r.matrix_index == m => {
                        Some(MatrixRef::new(snap, r.region)?)
                    }
                    _ => view_of(computation, &self.matrices, s)?,
                };
                views.push(view);
            }
            let mut out = MatrixMut::new(&mut storage, info.region)?;
            f(&mut out, &views)
        })();

        if let Some(slot) = self.matrices.get_mut(m) {
            *slot = Some(storage);
        }
        result
    }

    fn log_command(&self, index: usize, command: &Command) -> Result<()> {
        let Some(printer) = &self.printer else {
            return Ok(());
        };
        let statement = printer.command_string(command);
        match written_submatrix(command) {
            Some(s) => {
                let sum = match view_of(self.computation, &self.matrices, s)? {
                    Some(view) => B::sum(&view)?,
                    None => 0.0,
                };
                debug!(command = index, sum, "{statement}");
            }
            None => debug!(command = index, "{statement}"),
        }
        Ok(())
    }
}

//  Helpers over the storage table; free functions so they borrow only the
//  fields they touch.

fn storage_of<S>(matrices: &[Option<S>], m: usize) -> Result<&S> {
    matrices
        .get(m)
        .and_then(Option::as_ref)
        .ok_or_else(|| Error::lifecycle(m, "read while not allocated"))
}

fn view_of<'m, B: Backend>(
    computation: &Computation,
    matrices: &'m [Option<B::Storage>],
    s: usize,
) -> Result<Option<MatrixRef<'m, B>>> {
    if s == EMPTY_SUBMATRIX {
        return Ok(None);
    }
    let info = computation.submatrix(s)?;
    let storage = storage_of(matrices, info.matrix_index)?;
    MatrixRef::new(storage, info.region).map(Some)
}

fn required<'r, 'v, B: Backend>(
    views: &'r [Option<MatrixRef<'v, B>>],
    k: usize,
    what: &str,
) -> Result<&'r MatrixRef<'v, B>> {
    views
        .get(k)
        .and_then(Option::as_ref)
        .ok_or_else(|| Error::msg(format!("missing {what} operand")))
}

fn scatter_row<B: Backend>(
    copy: bool,
    dst: &mut MatrixMut<'_, B>,
    dst_row: usize,
    src: &MatrixRef<'_, B>,
    src_row: usize,
) -> Result<()> {
    if copy {
        B::copy_row(dst, dst_row, src, src_row)
    } else {
        B::add_row(dst, dst_row, src, src_row, 1.0)
    }
}

fn index_table<T>(table: Option<T>, command: usize, what: &str) -> Result<T> {
    table.ok_or_else(|| Error::malformed(command, format!("{what} table out of range")))
}

fn precomputed_of(
    computation: &Computation,
    command: usize,
    index: Option<usize>,
) -> Result<Option<&PrecomputedIndexes>> {
    match index {
        None => Ok(None),
        Some(p) => computation
            .precomputed_indexes(p)
            .map(Some)
            .ok_or_else(|| {
                Error::malformed(command, format!("precomputed-indexes index {p} out of range"))
            }),
    }
}

/// The single sub-matrix a command writes, if it has one.
fn written_submatrix(command: &Command) -> Option<usize> {
    match *command {
        Command::Propagate { output, .. } => Some(output),
        Command::Backprop { in_deriv, .. } if in_deriv != EMPTY_SUBMATRIX => Some(in_deriv),
        Command::MatrixCopy { dst, .. }
        | Command::MatrixAdd { dst, .. }
        | Command::AddRows { dst, .. }
        | Command::CopyRows { dst, .. }
        | Command::AddRowsMulti { dst, .. }
        | Command::CopyRowsMulti { dst, .. }
        | Command::AddRowRanges { dst, .. } => Some(dst),
        _ => None,
    }
}
