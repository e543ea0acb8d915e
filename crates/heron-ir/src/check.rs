// Checker — Structural and temporal validation of a computation
//
// A fixed sequence of passes; the first violation aborts the check:
//
//   1. indexes     every operand resolves; widths agree with the component;
//                  row counts agree; in-place use only where supported;
//                  no duplicate targets in to-rows-multi commands;
//                  the request matches the input/output bindings
//   2. (analysis)  variables, command attributes, access histories
//   3. order       exactly one phase marker, at the recorded position;
//                  no propagate / store-stats after it, no backprop before
//   4. lifecycle   allocation before first use, deallocation after last;
//                  inputs are never allocated, outputs never deallocated
//   5. undefined   every variable is used, and first written unless its
//                  matrix is an input
//   6. rewrite     (optional) no write to a variable after a pure read
//
// The rewrite pass only holds for IR straight out of the planner. Optimizers
// that reuse buffers (in-place propagate / backprop) break it on purpose, so
// it must be disabled for optimized IR.
//
// A computation is produced by trusted code, so every failure here is a bug
// in that code. Messages name the command, matrix or variable involved.

use tracing::{debug, info};

use heron_core::backend::Backend;
use heron_core::error::{Error, Result};
use heron_nn::{ComponentProperties, Nnet, NodeKind};

use crate::analyze::{AccessType, Analyzer};
use crate::computation::{Command, CommandType, Computation, SubMatrixInfo, EMPTY_SUBMATRIX};
use crate::request::ComputationRequest;

/// Options for `ComputationChecker`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckComputationConfig {
    /// Run the rewrite pass; only valid before optimization.
    pub check_rewrite: bool,
}

impl Default for CheckComputationConfig {
    fn default() -> Self {
        CheckComputationConfig {
            check_rewrite: true,
        }
    }
}

impl CheckComputationConfig {
    pub fn with_rewrite_check(mut self, check: bool) -> Self {
        self.check_rewrite = check;
        self
    }
}

pub struct ComputationChecker<'a, B: Backend> {
    config: CheckComputationConfig,
    nnet: &'a Nnet<B>,
    request: &'a ComputationRequest,
    computation: &'a Computation,
    analyzer: Option<Analyzer>,
}

impl<'a, B: Backend> ComputationChecker<'a, B> {
    pub fn new(
        config: CheckComputationConfig,
        nnet: &'a Nnet<B>,
        request: &'a ComputationRequest,
        computation: &'a Computation,
    ) -> Self {
        ComputationChecker {
            config,
            nnet,
            request,
            computation,
            analyzer: None,
        }
    }

    /// Run every pass. The analyses are rebuilt on each call.
    pub fn check(&mut self) -> Result<()> {
        self.analyzer = None;
        self.check_indexes()?;
        debug!("index pass ok");
        self.check_request()?;
        debug!("request pass ok");

        let analyzer = Analyzer::new(self.nnet, self.computation)?;
        self.check_order()?;
        debug!("order pass ok");
        self.check_matrix_accesses(&analyzer)?;
        debug!("lifecycle pass ok");
        self.check_undefined(&analyzer)?;
        debug!("undefined-read pass ok");
        if self.config.check_rewrite {
            self.check_rewrite(&analyzer)?;
            debug!("rewrite pass ok");
        }

        info!(
            commands = self.computation.commands().len(),
            matrices = self.computation.num_matrices() - 1,
            variables = analyzer.variables.num_variables(),
            "computation checked"
        );
        self.analyzer = Some(analyzer);
        Ok(())
    }

    /// The analyses of the last successful `check()`.
    pub fn analyzer(&self) -> Option<&Analyzer> {
        self.analyzer.as_ref()
    }

    //  Pass 1: indexes

    fn check_indexes(&self) -> Result<()> {
        let c = self.computation;
        let num_components = self.nnet.num_components();
        for (index, command) in c.commands().iter().enumerate() {
            let err = |msg: String| Error::malformed(index, msg);
            let submat = |s: usize, what: &str| submatrix_operand(c, index, s, what);
            let optional = |s: usize, what: &str| -> Result<Option<SubMatrixInfo>> {
                if s == EMPTY_SUBMATRIX {
                    Ok(None)
                } else {
                    submat(s, what).map(Some)
                }
            };
            let check_precomputed = |p: Option<usize>, props: ComponentProperties| -> Result<()> {
                if let Some(p) = p {
                    if p >= c.num_precomputed_indexes() {
                        return Err(err(format!("precomputed-indexes index {p} out of range")));
                    }
                    if props.contains(ComponentProperties::SIMPLE) {
                        return Err(err("precomputed indexes given for a simple component".into()));
                    }
                }
                Ok(())
            };

            match *command {
                Command::ResizeMatrixZeroed { matrix }
                | Command::ResizeMatrixUndefined { matrix }
                | Command::ResizeMatrixEmpty { matrix } => {
                    if matrix == 0 || matrix >= c.num_matrices() {
                        return Err(err(format!("matrix index {matrix} out of range")));
                    }
                }
                Command::Propagate {
                    component,
                    precomputed,
                    input,
                    output,
                } => {
                    if component >= num_components {
                        return Err(err(format!("component index {component} out of range")));
                    }
                    let comp = self.nnet.component(component)?;
                    let props = comp.properties();
                    check_precomputed(precomputed, props)?;
                    let in_info = submat(input, "input")?;
                    let out_info = submat(output, "output")?;
                    if in_info.num_cols() != comp.input_dim() {
                        return Err(err(format!(
                            "input-dim mismatch: sub-matrix has {} columns, {} expects {}",
                            in_info.num_cols(),
                            comp.type_name(),
                            comp.input_dim()
                        )));
                    }
                    if out_info.num_cols() != comp.output_dim() {
                        return Err(err(format!(
                            "output-dim mismatch: sub-matrix has {} columns, {} produces {}",
                            out_info.num_cols(),
                            comp.type_name(),
                            comp.output_dim()
                        )));
                    }
                    if props.contains(ComponentProperties::SIMPLE)
                        && in_info.num_rows() != out_info.num_rows()
                    {
                        return Err(err("num-rows mismatch for simple component".into()));
                    }
                    if input == output && !props.contains(ComponentProperties::PROPAGATE_IN_PLACE) {
                        return Err(err(format!(
                            "in-place propagation not supported by {}",
                            comp.type_name()
                        )));
                    }
                }
                Command::StoreStats { component, value } => {
                    if component >= num_components {
                        return Err(err(format!("component index {component} out of range")));
                    }
                    let comp = self.nnet.component(component)?;
                    if !comp.properties().contains(ComponentProperties::STORES_STATS) {
                        return Err(err(format!(
                            "StoreStats on {}, which stores no statistics",
                            comp.type_name()
                        )));
                    }
                    if submat(value, "value")?.num_cols() != comp.output_dim() {
                        return Err(err("dimension mismatch in StoreStats".into()));
                    }
                }
                Command::Backprop {
                    node,
                    component,
                    precomputed,
                    in_value,
                    out_value,
                    out_deriv,
                    in_deriv,
                } => {
                    if component >= num_components {
                        return Err(err(format!("component index {component} out of range")));
                    }
                    match self.nnet.node(node) {
                        None => return Err(err(format!("node index {node} out of range"))),
                        Some(n) if n.kind != NodeKind::Component(component) => {
                            return Err(err(format!(
                                "node '{}' is not a node of component {component}",
                                n.name
                            )))
                        }
                        Some(_) => {}
                    }
                    let comp = self.nnet.component(component)?;
                    let props = comp.properties();
                    check_precomputed(precomputed, props)?;
                    let in_value_info = optional(in_value, "in-value")?;
                    let out_value_info = optional(out_value, "out-value")?;
                    let out_deriv_info = submat(out_deriv, "out-deriv")?;
                    let in_deriv_info = optional(in_deriv, "in-deriv")?;

                    if props.contains(ComponentProperties::BACKPROP_NEEDS_INPUT)
                        && in_value_info.is_none()
                    {
                        return Err(err("backprop input value needed but not supplied".into()));
                    }
                    if props.contains(ComponentProperties::BACKPROP_NEEDS_OUTPUT)
                        && out_value_info.is_none()
                    {
                        return Err(err("backprop output value needed but not supplied".into()));
                    }
                    if in_deriv_info.is_none() && !props.contains(ComponentProperties::UPDATABLE) {
                        return Err(err("backprop is done but has no effect".into()));
                    }
                    if out_deriv == in_deriv && !props.contains(ComponentProperties::BACKPROP_IN_PLACE)
                    {
                        return Err(err(format!(
                            "in-place backprop not supported by {}",
                            comp.type_name()
                        )));
                    }
                    let (input_dim, output_dim) = (comp.input_dim(), comp.output_dim());
                    let widths = [
                        (in_value_info, input_dim, "in-value"),
                        (out_value_info, output_dim, "out-value"),
                        (Some(out_deriv_info), output_dim, "out-deriv"),
                        (in_deriv_info, input_dim, "in-deriv"),
                    ];
                    for (info, dim, what) in widths {
                        if let Some(info) = info {
                            if info.num_cols() != dim {
                                return Err(err(format!(
                                    "{what} has {} columns, expected {dim}",
                                    info.num_cols()
                                )));
                            }
                        }
                    }
                    if let (Some(a), Some(b)) = (in_value_info, in_deriv_info) {
                        if a.num_rows() != b.num_rows() {
                            return Err(err("num-rows mismatch between in-value and in-deriv".into()));
                        }
                    }
                    if let Some(a) = out_value_info {
                        if a.num_rows() != out_deriv_info.num_rows() {
                            return Err(err(
                                "num-rows mismatch between out-value and out-deriv".into()
                            ));
                        }
                    }
                    if let Some(b) = in_deriv_info {
                        if props.contains(ComponentProperties::SIMPLE)
                            && b.num_rows() != out_deriv_info.num_rows()
                        {
                            return Err(err(
                                "num-rows mismatch between out-deriv and in-deriv".into()
                            ));
                        }
                    }
                }
                Command::MatrixCopy { dst, src } | Command::MatrixAdd { dst, src } => {
                    let d = submat(dst, "destination")?;
                    let s = submat(src, "source")?;
                    if d.region.dims() != s.region.dims() {
                        return Err(err(format!(
                            "dimension mismatch in copy/add: {:?} vs {:?}",
                            d.region.dims(),
                            s.region.dims()
                        )));
                    }
                    if dst == src {
                        return Err(err("adding or copying a sub-matrix to itself".into()));
                    }
                }
                Command::AddRows { dst, src, indexes } | Command::CopyRows { dst, src, indexes } => {
                    let d = submat(dst, "destination")?;
                    let s = submat(src, "source")?;
                    let rows = c
                        .indexes(indexes)
                        .ok_or_else(|| err(format!("indexes table {indexes} out of range")))?;
                    if rows.len() != d.num_rows() {
                        return Err(err(format!(
                            "{} indexes for a destination of {} rows",
                            rows.len(),
                            d.num_rows()
                        )));
                    }
                    if d.num_cols() != s.num_cols() {
                        return Err(err("dimension mismatch in add-rows/copy-rows".into()));
                    }
                    if let Some(r) = rows.iter().flatten().find(|&&r| r >= s.num_rows()) {
                        return Err(err(format!(
                            "row index {r} out of range for a source of {} rows",
                            s.num_rows()
                        )));
                    }
                    if dst == src {
                        return Err(err("copying rows of a sub-matrix to itself".into()));
                    }
                }
                Command::AddRowsMulti { dst: this, indexes_multi }
                | Command::CopyRowsMulti { dst: this, indexes_multi }
                | Command::AddToRowsMulti { src: this, indexes_multi }
                | Command::CopyToRowsMulti { src: this, indexes_multi } => {
                    let info = submat(this, "matrix")?;
                    let pairs = c.indexes_multi(indexes_multi).ok_or_else(|| {
                        err(format!("indexes_multi table {indexes_multi} out of range"))
                    })?;
                    if pairs.len() != info.num_rows() {
                        return Err(err(format!(
                            "{} pairs for a sub-matrix of {} rows",
                            pairs.len(),
                            info.num_rows()
                        )));
                    }
                    for &(s, row) in pairs.iter().flatten() {
                        let other = submat(s, "indexes_multi")?;
                        if row >= other.num_rows() {
                            return Err(err(format!("row {row} out of range in sub-matrix {s}")));
                        }
                        if s == this {
                            return Err(err("multi-row command refers to itself".into()));
                        }
                        if other.num_cols() != info.num_cols() {
                            return Err(err(format!(
                                "sub-matrix {s} has {} columns, expected {}",
                                other.num_cols(),
                                info.num_cols()
                            )));
                        }
                    }
                    if matches!(
                        command.command_type(),
                        CommandType::AddToRowsMulti | CommandType::CopyToRowsMulti
                    ) {
                        let mut targets: Vec<(usize, usize)> =
                            pairs.iter().flatten().copied().collect();
                        targets.sort_unstable();
                        if let Some(w) = targets.windows(2).find(|w| w[0] == w[1]) {
                            return Err(err(format!(
                                "duplicate destination ({}, {}) in to-rows-multi command",
                                w[0].0, w[0].1
                            )));
                        }
                    }
                }
                Command::AddRowRanges {
                    dst,
                    src,
                    indexes_ranges,
                } => {
                    let d = submat(dst, "destination")?;
                    let s = submat(src, "source")?;
                    let ranges = c.indexes_ranges(indexes_ranges).ok_or_else(|| {
                        err(format!("indexes_ranges table {indexes_ranges} out of range"))
                    })?;
                    if ranges.len() != d.num_rows() {
                        return Err(err("num-rows mismatch in add-row-ranges".into()));
                    }
                    if d.num_cols() != s.num_cols() {
                        return Err(err("dimension mismatch in add-row-ranges".into()));
                    }
                    if let Some(&(start, end)) =
                        ranges.iter().find(|&&(start, end)| end < start || end > s.num_rows())
                    {
                        return Err(err(format!(
                            "row range {start}:{end} out of range for a source of {} rows",
                            s.num_rows()
                        )));
                    }
                    if dst == src {
                        return Err(err("summing row ranges of a sub-matrix into itself".into()));
                    }
                }
                Command::NoOperation | Command::NoOperationMarker => {}
            }
        }
        Ok(())
    }

    /// Each request input/output must name a bound node of the right kind
    /// whose value matrix has one row per index, with a derivative matrix
    /// when a derivative is requested. Every bound matrix must exist.
    fn check_request(&self) -> Result<()> {
        let c = self.computation;
        let bad = |msg: String| Error::MalformedIr { command: None, msg };
        for (&node, binding) in c.input_output_info() {
            for m in std::iter::once(binding.value_matrix).chain(binding.deriv_matrix) {
                if m == 0 || m >= c.num_matrices() {
                    return Err(bad(format!("node {node} is bound to invalid matrix {m}")));
                }
            }
        }
        let sides = [
            (self.request.inputs(), true),
            (self.request.outputs(), false),
        ];
        for (specs, is_input) in sides {
            for spec in specs {
                let node = self
                    .nnet
                    .node_index(&spec.name)
                    .ok_or_else(|| bad(format!("no node named '{}'", spec.name)))?;
                let kind_ok = if is_input {
                    self.nnet.is_input_node(node)
                } else {
                    self.nnet.is_output_node(node)
                };
                if !kind_ok {
                    return Err(bad(format!(
                        "'{}' is not an {} node",
                        spec.name,
                        if is_input { "input" } else { "output" }
                    )));
                }
                let binding = c
                    .binding(node)
                    .ok_or_else(|| bad(format!("'{}' has no matrix binding", spec.name)))?;
                let rows = c.matrix(binding.value_matrix)?.num_rows;
                if rows != spec.num_rows() {
                    return Err(bad(format!(
                        "'{}' requests {} rows but m{} has {rows}",
                        spec.name,
                        spec.num_rows(),
                        binding.value_matrix
                    )));
                }
                if spec.has_deriv && binding.deriv_matrix.is_none() {
                    return Err(bad(format!(
                        "a derivative is requested for '{}' but none is bound",
                        spec.name
                    )));
                }
            }
        }
        Ok(())
    }

    //  Pass 3: order

    fn check_order(&self) -> Result<()> {
        let commands = self.computation.commands();
        let markers: Vec<usize> = commands
            .iter()
            .enumerate()
            .filter(|(_, cmd)| cmd.command_type() == CommandType::NoOperationMarker)
            .map(|(i, _)| i)
            .collect();
        let marker = match markers.as_slice() {
            [] => return Err(Error::ordering(None, "no phase marker found")),
            [m] => *m,
            [_, second, ..] => {
                return Err(Error::ordering(
                    Some(*second),
                    format!("found {} phase markers, at commands {markers:?}", markers.len()),
                ))
            }
        };
        if self.computation.forward_computation_end() != Some(marker) {
            return Err(Error::ordering(
                Some(marker),
                format!(
                    "phase marker is at command {marker} but the recorded end of the forward \
                     computation is {:?}",
                    self.computation.forward_computation_end()
                ),
            ));
        }
        for (i, command) in commands.iter().enumerate() {
            match command.command_type() {
                CommandType::Backprop if i < marker => {
                    return Err(Error::ordering(Some(i), "backprop occurs before the phase marker"))
                }
                CommandType::Propagate if i > marker => {
                    return Err(Error::ordering(Some(i), "propagate occurs after the phase marker"))
                }
                CommandType::StoreStats if i > marker => {
                    return Err(Error::ordering(
                        Some(i),
                        "store-stats occurs after the phase marker",
                    ))
                }
                _ => {}
            }
        }
        Ok(())
    }

    //  Pass 4: lifecycle

    fn check_matrix_accesses(&self, analyzer: &Analyzer) -> Result<()> {
        for (m, acc) in analyzer.matrix_accesses.iter().enumerate().skip(1) {
            if acc.is_input {
                if let Some(c) = acc.allocate_command {
                    return Err(Error::lifecycle(
                        m,
                        format!("input matrix is allocated by command {c}"),
                    ));
                }
            } else {
                let alloc = acc
                    .allocate_command
                    .ok_or_else(|| Error::lifecycle(m, "matrix is never allocated"))?;
                match acc.accesses.first() {
                    None => return Err(Error::lifecycle(m, "matrix is never accessed")),
                    Some(&first) if first < alloc => {
                        return Err(Error::lifecycle(
                            m,
                            format!(
                                "accessed at command {first} before it is allocated at command {alloc}"
                            ),
                        ))
                    }
                    Some(_) => {}
                }
            }
            if acc.is_output {
                if let Some(c) = acc.deallocate_command {
                    return Err(Error::lifecycle(
                        m,
                        format!("output matrix is deallocated by command {c}"),
                    ));
                }
            } else {
                let dealloc = acc
                    .deallocate_command
                    .ok_or_else(|| Error::lifecycle(m, "matrix is never deallocated"))?;
                match acc.accesses.last() {
                    None => return Err(Error::lifecycle(m, "matrix is never accessed")),
                    Some(&last) if last >= dealloc => {
                        return Err(Error::lifecycle(
                            m,
                            format!(
                                "accessed at command {last} after it is deallocated at command {dealloc}"
                            ),
                        ))
                    }
                    Some(_) => {}
                }
                if let Some(alloc) = acc.allocate_command {
                    if dealloc < alloc {
                        return Err(Error::lifecycle(
                            m,
                            format!("deallocated at command {dealloc} before allocation at {alloc}"),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    //  Pass 5: undefined reads

    fn check_undefined(&self, analyzer: &Analyzer) -> Result<()> {
        for (v, acc) in analyzer.variable_accesses.iter().enumerate() {
            let matrix = analyzer.variables.matrix_for_variable(v)?;
            let undefined = |msg: &str| Error::Undefined {
                variable: v,
                matrix,
                msg: msg.to_string(),
            };
            let first = acc
                .accesses
                .first()
                .ok_or_else(|| undefined("is never used"))?;
            let is_input = analyzer
                .matrix_accesses
                .get(matrix)
                .map_or(false, |m| m.is_input);
            if first.access_type != AccessType::Write && !is_input {
                return Err(undefined(&format!(
                    "is read at command {} before it is written to",
                    first.command
                )));
            }
        }
        Ok(())
    }

    //  Pass 6: rewrite

    fn check_rewrite(&self, analyzer: &Analyzer) -> Result<()> {
        for (v, acc) in analyzer.variable_accesses.iter().enumerate() {
            let matrix = analyzer.variables.matrix_for_variable(v)?;
            if acc.accesses.is_empty() {
                return Err(Error::Undefined {
                    variable: v,
                    matrix,
                    msg: "is never used".into(),
                });
            }
            let Some(first_read) = acc
                .accesses
                .iter()
                .position(|a| a.access_type == AccessType::Read)
            else {
                continue;
            };
            if acc.accesses[first_read + 1..]
                .iter()
                .any(|a| a.access_type != AccessType::Read)
            {
                return Err(Error::Rewrite {
                    variable: v,
                    matrix,
                });
            }
        }
        Ok(())
    }
}

/// Resolve a required sub-matrix operand of command `command`. The empty
/// sentinel is rejected here; optional operands test for it first.
fn submatrix_operand(
    c: &Computation,
    command: usize,
    s: usize,
    what: &str,
) -> Result<SubMatrixInfo> {
    if s == EMPTY_SUBMATRIX || s >= c.num_submatrices() {
        return Err(Error::malformed(
            command,
            format!("{what} sub-matrix index {s} out of range"),
        ));
    }
    c.submatrix(s)
        .copied()
        .map_err(|e| Error::malformed(command, e.to_string()))
}

/// Convenience wrapper: build a checker and run it once.
pub fn check_computation<B: Backend>(
    config: CheckComputationConfig,
    nnet: &Nnet<B>,
    request: &ComputationRequest,
    computation: &Computation,
) -> Result<()> {
    ComputationChecker::new(config, nnet, request, computation).check()
}
