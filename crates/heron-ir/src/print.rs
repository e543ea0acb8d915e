// Printer — Human-readable rendering of a computation
//
// Output looks like:
//
//   matrix m1(10, 5), m2(10, 3)
//   input.value -> m1
//   output.value -> m2
//   # begin forward commands
//   m2 = undefined(10,3)
//   affine1.Propagate(NULL, m1(0:9, 0:1), &m2)
//   # begin backward commands
//   [no-op/marker]
//   ...
//
// Whole-matrix views print as `m<k>`; other views as `m<k>(r0:r1, c0:c1)`
// with inclusive ends. Absent rows in index tables print as -1. The format
// is for people and log files; nothing parses it. It never fails, even on
// malformed IR, so it can be used to report checker errors.

use std::fmt::Write as _;

use heron_core::backend::Backend;
use heron_nn::Nnet;

use crate::computation::{Command, Computation, EMPTY_SUBMATRIX};

/// Renders the commands of one computation. Sub-matrix strings are built
/// once, so rendering single commands (e.g. for per-command debug logging)
/// is cheap.
pub struct ComputationPrinter<'a, B: Backend> {
    computation: &'a Computation,
    nnet: &'a Nnet<B>,
    submatrix_strings: Vec<String>,
}

impl<'a, B: Backend> ComputationPrinter<'a, B> {
    pub fn new(computation: &'a Computation, nnet: &'a Nnet<B>) -> Self {
        let submatrix_strings = (0..computation.num_submatrices())
            .map(|s| submatrix_string(computation, s))
            .collect();
        ComputationPrinter {
            computation,
            nnet,
            submatrix_strings,
        }
    }

    fn submat(&self, s: usize) -> String {
        match self.submatrix_strings.get(s) {
            Some(text) => text.clone(),
            None => format!("<invalid sub-matrix {s}>"),
        }
    }

    fn component_name(&self, c: usize) -> String {
        self.nnet
            .component_name(c)
            .map_or_else(|| format!("<component {c}>"), str::to_string)
    }

    fn precomputed(&self, p: Option<usize>) -> String {
        match p {
            None => "NULL".to_string(),
            Some(p) => format!("precomputed_indexes[{p}]"),
        }
    }

    fn dims(&self, matrix: usize) -> (usize, usize) {
        self.computation
            .matrices()
            .get(matrix)
            .map_or((0, 0), |m| (m.num_rows, m.num_cols))
    }

    fn indexes_string(&self, table: usize) -> String {
        match self.computation.indexes(table) {
            Some(rows) => {
                let items: Vec<String> = rows
                    .iter()
                    .map(|r| r.map_or_else(|| "-1".to_string(), |r| r.to_string()))
                    .collect();
                format!("[{}]", items.join(","))
            }
            None => format!("<invalid indexes {table}>"),
        }
    }

    fn indexes_multi_string(&self, table: usize) -> String {
        let Some(pairs) = self.computation.indexes_multi(table) else {
            return format!("<invalid indexes_multi {table}>");
        };
        let items: Vec<String> = pairs
            .iter()
            .map(|pair| match *pair {
                None => "-1".to_string(),
                Some((s, row)) => self.row_of_submatrix(s, row),
            })
            .collect();
        format!("[{}]", items.join(","))
    }

    fn row_of_submatrix(&self, s: usize, row: usize) -> String {
        let Ok(info) = self.computation.submatrix(s) else {
            return format!("<invalid sub-matrix {s}>");
        };
        let m = info.matrix_index;
        let (_, num_cols) = self.dims(m);
        let r = &info.region;
        let row = r.row_offset + row;
        if r.col_offset == 0 && r.num_cols == num_cols {
            format!("m{m}({row},:)")
        } else {
            format!("m{m}({row},{}:{})", r.col_offset, r.col_end().saturating_sub(1))
        }
    }

    fn indexes_ranges_string(&self, table: usize) -> String {
        match self.computation.indexes_ranges(table) {
            Some(ranges) => {
                let items: Vec<String> = ranges
                    .iter()
                    .map(|&(start, end)| format!("{start}:{}", end as i64 - 1))
                    .collect();
                format!("[{}]", items.join(","))
            }
            None => format!("<invalid indexes_ranges {table}>"),
        }
    }

    /// The statement for one command, without a trailing newline.
    pub fn command_string(&self, command: &Command) -> String {
        match *command {
            Command::ResizeMatrixZeroed { matrix } => {
                let (r, c) = self.dims(matrix);
                format!("m{matrix} = zeros({r},{c})")
            }
            Command::ResizeMatrixUndefined { matrix } => {
                let (r, c) = self.dims(matrix);
                format!("m{matrix} = undefined({r},{c})")
            }
            Command::ResizeMatrixEmpty { matrix } => format!("m{matrix} = []"),
            Command::Propagate {
                component,
                precomputed,
                input,
                output,
            } => format!(
                "{}.Propagate({}, {}, &{})",
                self.component_name(component),
                self.precomputed(precomputed),
                self.submat(input),
                self.submat(output)
            ),
            Command::StoreStats { component, value } => format!(
                "{}.StoreStats({})",
                self.component_name(component),
                self.submat(value)
            ),
            Command::Backprop {
                component,
                precomputed,
                in_value,
                out_value,
                out_deriv,
                in_deriv,
                ..
            } => format!(
                "{}.Backprop({}, {}, {}, {}, &{})",
                self.component_name(component),
                self.precomputed(precomputed),
                self.submat(in_value),
                self.submat(out_value),
                self.submat(out_deriv),
                self.submat(in_deriv)
            ),
            Command::MatrixCopy { dst, src } => {
                format!("{} = {}", self.submat(dst), self.submat(src))
            }
            Command::MatrixAdd { dst, src } => {
                format!("{} += {}", self.submat(dst), self.submat(src))
            }
            Command::AddRows { dst, src, indexes } => format!(
                "{}.AddRows({}, {})",
                self.submat(dst),
                self.submat(src),
                self.indexes_string(indexes)
            ),
            Command::CopyRows { dst, src, indexes } => format!(
                "{}.CopyRows({}, {})",
                self.submat(dst),
                self.submat(src),
                self.indexes_string(indexes)
            ),
            Command::AddRowsMulti { dst, indexes_multi } => format!(
                "{}.AddRowsMulti({})",
                self.submat(dst),
                self.indexes_multi_string(indexes_multi)
            ),
            Command::CopyRowsMulti { dst, indexes_multi } => format!(
                "{}.CopyRowsMulti({})",
                self.submat(dst),
                self.indexes_multi_string(indexes_multi)
            ),
            Command::AddToRowsMulti { src, indexes_multi } => format!(
                "{}.AddToRowsMulti({})",
                self.submat(src),
                self.indexes_multi_string(indexes_multi)
            ),
            Command::CopyToRowsMulti { src, indexes_multi } => format!(
                "{}.CopyToRowsMulti({})",
                self.submat(src),
                self.indexes_multi_string(indexes_multi)
            ),
            Command::AddRowRanges {
                dst,
                src,
                indexes_ranges,
            } => format!(
                "{}.AddRowRanges({}, {})",
                self.submat(dst),
                self.submat(src),
                self.indexes_ranges_string(indexes_ranges)
            ),
            Command::NoOperation => "[no-op]".to_string(),
            Command::NoOperationMarker => "[no-op/marker]".to_string(),
        }
    }

    /// The whole computation: matrices, bindings, then every command.
    pub fn render(&self) -> String {
        let c = self.computation;
        let mut out = String::new();
        let decls: Vec<String> = c
            .matrices()
            .iter()
            .enumerate()
            .skip(1)
            .map(|(m, info)| format!("m{m}({}, {})", info.num_rows, info.num_cols))
            .collect();
        let _ = writeln!(out, "matrix {}", decls.join(", "));
        for (&node, binding) in c.input_output_info() {
            let name = self
                .nnet
                .node_name(node)
                .map_or_else(|| format!("<node {node}>"), str::to_string);
            let _ = writeln!(out, "{name}.value -> m{}", binding.value_matrix);
            if let Some(deriv) = binding.deriv_matrix {
                let _ = writeln!(out, "{name}.deriv -> m{deriv}");
            }
        }
        out.push_str("# begin forward commands\n");
        for (i, command) in c.commands().iter().enumerate() {
            if c.forward_computation_end().map_or(false, |end| i == end) {
                out.push_str("# begin backward commands\n");
            }
            out.push_str(&self.command_string(command));
            out.push('\n');
        }
        out
    }
}

fn submatrix_string(computation: &Computation, s: usize) -> String {
    if s == EMPTY_SUBMATRIX {
        return "[]".to_string();
    }
    let Ok(info) = computation.submatrix(s) else {
        return format!("<invalid sub-matrix {s}>");
    };
    let m = info.matrix_index;
    if computation.is_whole_matrix(s) {
        format!("m{m}")
    } else {
        let r = &info.region;
        format!(
            "m{m}({}:{}, {}:{})",
            r.row_offset,
            r.row_end().saturating_sub(1),
            r.col_offset,
            r.col_end().saturating_sub(1)
        )
    }
}

impl Computation {
    /// Render this computation for people, resolving names through `nnet`.
    pub fn display<B: Backend>(&self, nnet: &Nnet<B>) -> String {
        ComputationPrinter::new(self, nnet).render()
    }
}
