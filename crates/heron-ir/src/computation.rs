// Computation — The matrix-level IR of one forward/backward pass
//
// A computation is plain data produced by an upstream planner:
//
//   matrices       allocation units, each (num_rows, num_cols)
//   submatrices    rectangular views (matrix, Region) into a matrix
//   index tables   row maps used by the gather / scatter commands
//   commands       a linear list, with one phase marker splitting the
//                  forward commands from the backward commands
//   io bindings    network node -> (value matrix, optional deriv matrix)
//
// SENTINEL:
//
// Matrix 0 and sub-matrix 0 are the empty (0 x 0) entries, inserted by
// `Computation::new()` before anything else. Sub-matrix 0 is the "absent"
// operand (e.g. a backprop without an input value). Every lookup goes
// through `matrix()` / `submatrix()`, which refuse the sentinel.
//
// INDEX TABLES:
//
//   indexes          Vec<Option<usize>>             row -> source row
//   indexes_multi    Vec<Option<(usize, usize)>>    row -> (sub-matrix, row)
//   indexes_ranges   Vec<(usize, usize)>            row -> [start, end)
//
// `None` means "no source row". Ranges have no absent form: an empty range
// repeats a valid index, e.g. (3, 3).

use std::collections::BTreeMap;

use heron_core::error::{Error, Result};
use heron_core::region::Region;
use heron_nn::PrecomputedIndexes;

/// Index of the reserved empty sub-matrix, used for absent operands.
pub const EMPTY_SUBMATRIX: usize = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatrixInfo {
    pub num_rows: usize,
    pub num_cols: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubMatrixInfo {
    pub matrix_index: usize,
    pub region: Region,
}

impl SubMatrixInfo {
    pub fn num_rows(&self) -> usize {
        self.region.num_rows
    }

    pub fn num_cols(&self) -> usize {
        self.region.num_cols
    }
}

/// The matrices holding a network node's value and derivative.
///
/// For an input node the value is supplied by the caller and the derivative
/// (if requested) is produced; for an output node it is the other way round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoBinding {
    pub value_matrix: usize,
    pub deriv_matrix: Option<usize>,
}

/// One operation. Sub-matrix operands are indexes into `submatrices`;
/// `EMPTY_SUBMATRIX` marks an absent optional operand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Allocate matrix storage, set to zero.
    ResizeMatrixZeroed { matrix: usize },
    /// Allocate matrix storage with unspecified contents.
    ResizeMatrixUndefined { matrix: usize },
    /// Free matrix storage.
    ResizeMatrixEmpty { matrix: usize },
    Propagate {
        component: usize,
        precomputed: Option<usize>,
        input: usize,
        output: usize,
    },
    StoreStats { component: usize, value: usize },
    Backprop {
        node: usize,
        component: usize,
        precomputed: Option<usize>,
        in_value: usize,
        out_value: usize,
        out_deriv: usize,
        in_deriv: usize,
    },
    /// `dst = src`
    MatrixCopy { dst: usize, src: usize },
    /// `dst += src`
    MatrixAdd { dst: usize, src: usize },
    /// `dst[r] += src[indexes[r]]`
    AddRows { dst: usize, src: usize, indexes: usize },
    /// `dst[r] = src[indexes[r]]`, zero where absent
    CopyRows { dst: usize, src: usize, indexes: usize },
    /// `dst[r] += (sub-matrix, row)` from `indexes_multi`
    AddRowsMulti { dst: usize, indexes_multi: usize },
    /// `dst[r] = (sub-matrix, row)` from `indexes_multi`, zero where absent
    CopyRowsMulti { dst: usize, indexes_multi: usize },
    /// `(sub-matrix, row) += src[r]`
    AddToRowsMulti { src: usize, indexes_multi: usize },
    /// `(sub-matrix, row) = src[r]`
    CopyToRowsMulti { src: usize, indexes_multi: usize },
    /// `dst[r] += sum(src[start..end])`
    AddRowRanges {
        dst: usize,
        src: usize,
        indexes_ranges: usize,
    },
    NoOperation,
    /// The phase marker: forward commands precede it, backward commands
    /// follow it.
    NoOperationMarker,
}

/// Fieldless opcode of a `Command`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CommandType {
    ResizeMatrixZeroed,
    ResizeMatrixUndefined,
    ResizeMatrixEmpty,
    Propagate,
    StoreStats,
    Backprop,
    MatrixCopy,
    MatrixAdd,
    AddRows,
    CopyRows,
    AddRowsMulti,
    CopyRowsMulti,
    AddToRowsMulti,
    CopyToRowsMulti,
    AddRowRanges,
    NoOperation,
    NoOperationMarker,
}

impl Command {
    pub fn command_type(&self) -> CommandType {
        match self {
            Command::ResizeMatrixZeroed { .. } => CommandType::ResizeMatrixZeroed,
            Command::ResizeMatrixUndefined { .. } => CommandType::ResizeMatrixUndefined,
            Command::ResizeMatrixEmpty { .. } => CommandType::ResizeMatrixEmpty,
            Command::Propagate { .. } => CommandType::Propagate,
            Command::StoreStats { .. } => CommandType::StoreStats,
            Command::Backprop { .. } => CommandType::Backprop,
            Command::MatrixCopy { .. } => CommandType::MatrixCopy,
            Command::MatrixAdd { .. } => CommandType::MatrixAdd,
            Command::AddRows { .. } => CommandType::AddRows,
            Command::CopyRows { .. } => CommandType::CopyRows,
            Command::AddRowsMulti { .. } => CommandType::AddRowsMulti,
            Command::CopyRowsMulti { .. } => CommandType::CopyRowsMulti,
            Command::AddToRowsMulti { .. } => CommandType::AddToRowsMulti,
            Command::CopyToRowsMulti { .. } => CommandType::CopyToRowsMulti,
            Command::AddRowRanges { .. } => CommandType::AddRowRanges,
            Command::NoOperation => CommandType::NoOperation,
            Command::NoOperationMarker => CommandType::NoOperationMarker,
        }
    }

    /// The matrix allocated or freed by a resize command.
    pub fn resized_matrix(&self) -> Option<usize> {
        match *self {
            Command::ResizeMatrixZeroed { matrix }
            | Command::ResizeMatrixUndefined { matrix }
            | Command::ResizeMatrixEmpty { matrix } => Some(matrix),
            _ => None,
        }
    }

    /// The `indexes_multi` table a multi-row command refers to.
    pub fn indexes_multi(&self) -> Option<usize> {
        match *self {
            Command::AddRowsMulti { indexes_multi, .. }
            | Command::CopyRowsMulti { indexes_multi, .. }
            | Command::AddToRowsMulti { indexes_multi, .. }
            | Command::CopyToRowsMulti { indexes_multi, .. } => Some(indexes_multi),
            _ => None,
        }
    }
}

/// The IR of one computation. See the module docs for the layout.
#[derive(Debug, Clone, PartialEq)]
pub struct Computation {
    matrices: Vec<MatrixInfo>,
    submatrices: Vec<SubMatrixInfo>,
    component_precomputed_indexes: Vec<PrecomputedIndexes>,
    indexes: Vec<Vec<Option<usize>>>,
    indexes_multi: Vec<Vec<Option<(usize, usize)>>>,
    indexes_ranges: Vec<Vec<(usize, usize)>>,
    input_output_info: BTreeMap<usize, IoBinding>,
    commands: Vec<Command>,
    forward_computation_end: Option<usize>,
}

impl Default for Computation {
    fn default() -> Self {
        Self::new()
    }
}

impl Computation {
    /// An empty computation holding only the sentinel matrix and sub-matrix.
    pub fn new() -> Self {
        Computation {
            matrices: vec![MatrixInfo {
                num_rows: 0,
                num_cols: 0,
            }],
            submatrices: vec![SubMatrixInfo {
                matrix_index: 0,
                region: Region::empty(),
            }],
            component_precomputed_indexes: Vec::new(),
            indexes: Vec::new(),
            indexes_multi: Vec::new(),
            indexes_ranges: Vec::new(),
            input_output_info: BTreeMap::new(),
            commands: Vec::new(),
            forward_computation_end: None,
        }
    }

    //  Construction

    /// Append a matrix and its whole-matrix view; returns the view's index.
    pub fn new_matrix(&mut self, num_rows: usize, num_cols: usize) -> Result<usize> {
        if num_rows == 0 || num_cols == 0 {
            return Err(Error::msg(format!(
                "cannot create an empty {num_rows}x{num_cols} matrix"
            )));
        }
        let matrix_index = self.matrices.len();
        self.matrices.push(MatrixInfo { num_rows, num_cols });
        self.submatrices.push(SubMatrixInfo {
            matrix_index,
            region: Region::whole(num_rows, num_cols),
        });
        Ok(self.submatrices.len() - 1)
    }

    /// Append a view of `matrix`; the region must be non-empty and in bounds.
    pub fn new_submatrix(
        &mut self,
        matrix: usize,
        row_offset: usize,
        num_rows: usize,
        col_offset: usize,
        num_cols: usize,
    ) -> Result<usize> {
        let info = *self.matrix(matrix)?;
        let region = Region::new(row_offset, num_rows, col_offset, num_cols);
        if region.is_empty() {
            return Err(Error::msg(format!(
                "empty sub-matrix of m{matrix} requested"
            )));
        }
        region.check_fits(info.num_rows, info.num_cols)?;
        self.submatrices.push(SubMatrixInfo {
            matrix_index: matrix,
            region,
        });
        Ok(self.submatrices.len() - 1)
    }

    /// All rows of `matrix`, columns `[col_offset, col_offset + num_cols)`.
    pub fn new_column_submatrix(
        &mut self,
        matrix: usize,
        col_offset: usize,
        num_cols: usize,
    ) -> Result<usize> {
        let num_rows = self.matrix(matrix)?.num_rows;
        self.new_submatrix(matrix, 0, num_rows, col_offset, num_cols)
    }

    pub fn add_precomputed_indexes(&mut self, indexes: PrecomputedIndexes) -> usize {
        self.component_precomputed_indexes.push(indexes);
        self.component_precomputed_indexes.len() - 1
    }

    pub fn add_indexes(&mut self, indexes: Vec<Option<usize>>) -> usize {
        self.indexes.push(indexes);
        self.indexes.len() - 1
    }

    pub fn add_indexes_multi(&mut self, pairs: Vec<Option<(usize, usize)>>) -> usize {
        self.indexes_multi.push(pairs);
        self.indexes_multi.len() - 1
    }

    pub fn add_indexes_ranges(&mut self, ranges: Vec<(usize, usize)>) -> usize {
        self.indexes_ranges.push(ranges);
        self.indexes_ranges.len() - 1
    }

    /// Append a command; returns its index. Operands are not validated here,
    /// that is the checker's job.
    pub fn add_command(&mut self, command: Command) -> usize {
        self.commands.push(command);
        self.commands.len() - 1
    }

    /// Append the phase marker and record its position.
    pub fn add_phase_marker(&mut self) -> usize {
        let c = self.add_command(Command::NoOperationMarker);
        self.forward_computation_end = Some(c);
        c
    }

    /// Override the recorded phase-marker position.
    pub fn set_forward_computation_end(&mut self, command: Option<usize>) {
        self.forward_computation_end = command;
    }

    /// Record which matrices hold a network node's value and derivative.
    pub fn bind_input_output(
        &mut self,
        node: usize,
        value_matrix: usize,
        deriv_matrix: Option<usize>,
    ) -> Result<()> {
        if self.input_output_info.contains_key(&node) {
            return Err(Error::msg(format!("node {node} is bound twice")));
        }
        self.input_output_info.insert(
            node,
            IoBinding {
                value_matrix,
                deriv_matrix,
            },
        );
        Ok(())
    }

    //  Lookup

    /// Number of matrices, including the sentinel.
    pub fn num_matrices(&self) -> usize {
        self.matrices.len()
    }

    /// Number of sub-matrices, including the sentinel.
    pub fn num_submatrices(&self) -> usize {
        self.submatrices.len()
    }

    pub fn matrix(&self, index: usize) -> Result<&MatrixInfo> {
        if index == 0 {
            return Err(Error::MalformedIr {
                command: None,
                msg: "the empty matrix m0 cannot be used as storage".into(),
            });
        }
        self.matrices.get(index).ok_or_else(|| Error::MalformedIr {
            command: None,
            msg: format!(
                "matrix index {index} out of range ({} matrices)",
                self.matrices.len()
            ),
        })
    }

    pub fn submatrix(&self, index: usize) -> Result<&SubMatrixInfo> {
        if index == EMPTY_SUBMATRIX {
            return Err(Error::MalformedIr {
                command: None,
                msg: "the empty sub-matrix cannot be accessed".into(),
            });
        }
        self.submatrices.get(index).ok_or_else(|| Error::MalformedIr {
            command: None,
            msg: format!(
                "sub-matrix index {index} out of range ({} sub-matrices)",
                self.submatrices.len()
            ),
        })
    }

    /// All matrices, index 0 being the sentinel.
    pub fn matrices(&self) -> &[MatrixInfo] {
        &self.matrices
    }

    /// All sub-matrices, index 0 being the sentinel.
    pub fn submatrices(&self) -> &[SubMatrixInfo] {
        &self.submatrices
    }

    pub fn precomputed_indexes(&self, index: usize) -> Option<&PrecomputedIndexes> {
        self.component_precomputed_indexes.get(index)
    }

    pub fn num_precomputed_indexes(&self) -> usize {
        self.component_precomputed_indexes.len()
    }

    pub fn indexes(&self, index: usize) -> Option<&[Option<usize>]> {
        self.indexes.get(index).map(Vec::as_slice)
    }

    pub fn indexes_multi(&self, index: usize) -> Option<&[Option<(usize, usize)>]> {
        self.indexes_multi.get(index).map(Vec::as_slice)
    }

    pub fn indexes_ranges(&self, index: usize) -> Option<&[(usize, usize)]> {
        self.indexes_ranges.get(index).map(Vec::as_slice)
    }

    pub fn input_output_info(&self) -> &BTreeMap<usize, IoBinding> {
        &self.input_output_info
    }

    pub fn binding(&self, node: usize) -> Option<&IoBinding> {
        self.input_output_info.get(&node)
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn forward_computation_end(&self) -> Option<usize> {
        self.forward_computation_end
    }

    /// True if `submatrix` views all of its matrix.
    pub fn is_whole_matrix(&self, submatrix: usize) -> bool {
        let Ok(s) = self.submatrix(submatrix) else {
            return false;
        };
        match self.matrix(s.matrix_index) {
            Ok(m) => s.region.is_whole(m.num_rows, m.num_cols),
            Err(_) => false,
        }
    }

    /// For each matrix, the sub-matrices that view it (empty for m0).
    pub fn submatrix_lists(&self) -> Vec<Vec<usize>> {
        let mut lists = vec![Vec::new(); self.matrices.len()];
        for (s, info) in self.submatrices.iter().enumerate().skip(1) {
            if let Some(list) = lists.get_mut(info.matrix_index) {
                list.push(s);
            }
        }
        lists
    }
}
