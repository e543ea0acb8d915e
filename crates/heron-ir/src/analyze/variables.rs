// Variables — Column-interval partition of every matrix
//
// Dependency tracking at whole-matrix granularity would make two commands
// that touch disjoint column ranges of one matrix look like they conflict.
// Instead each matrix is cut at every column boundary any of its views
// uses ("split points"), and each resulting interval is a variable:
//
//   matrix m1 (10 x 5), views m1, m1(0:9, 2:3)
//   split points  [0, 2, 4, 5]
//   variables     v0 = [0,2)  v1 = [2,4)  v2 = [4,5)
//
// Variables are numbered consecutively across matrices in matrix order;
// the sentinel m0 owns none. Split points always contain 0 and num_cols, so
// the variables of a matrix partition its columns exactly.
//
// Rows are not split. A write through a view that misses some rows leaves
// the other rows of the variable untouched, so it is recorded as a
// read-write (see `record_access`).

use std::ops::Range;

use heron_core::error::{Error, Result};

use crate::analyze::attributes::CommandAttributes;
use crate::computation::{Computation, EMPTY_SUBMATRIX};

/// How a command touches a sub-matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessType {
    Read,
    Write,
    ReadWrite,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputationVariables {
    /// Per matrix: sorted, deduplicated column boundaries.
    split_points: Vec<Vec<usize>>,
    /// Variables of matrix m are `matrix_to_variable[m]..matrix_to_variable[m + 1]`.
    matrix_to_variable: Vec<usize>,
    /// Per sub-matrix: the variables it covers.
    variable_ranges: Vec<Range<usize>>,
    /// Per sub-matrix: whether it spans every row of its matrix.
    full_row_range: Vec<bool>,
    variable_to_matrix: Vec<usize>,
}

impl ComputationVariables {
    pub fn new(computation: &Computation) -> Result<Self> {
        let split_points = compute_split_points(computation)?;

        let mut matrix_to_variable = Vec::with_capacity(split_points.len() + 1);
        let mut variable_to_matrix = Vec::new();
        matrix_to_variable.push(0);
        for (m, split) in split_points.iter().enumerate() {
            let num_variables = split.len().saturating_sub(1);
            variable_to_matrix.extend(std::iter::repeat(m).take(num_variables));
            matrix_to_variable.push(variable_to_matrix.len());
        }

        let num_submatrices = computation.num_submatrices();
        let mut variable_ranges = vec![0..0; num_submatrices];
        let mut full_row_range = vec![false; num_submatrices];
        for s in 1..num_submatrices {
            let info = computation.submatrix(s)?;
            let m = info.matrix_index;
            let split = &split_points[m];
            let cols = info.region.col_range();
            let start = split.binary_search(&cols.start).map_err(|_| misaligned(s, cols.start))?;
            let end = split.binary_search(&cols.end).map_err(|_| misaligned(s, cols.end))?;
            if end <= start {
                return Err(Error::MalformedIr {
                    command: None,
                    msg: format!("sub-matrix {s} covers no columns"),
                });
            }
            let offset = matrix_to_variable[m];
            variable_ranges[s] = offset + start..offset + end;
            full_row_range[s] = info
                .region
                .is_full_row_range(computation.matrix(m)?.num_rows);
        }

        Ok(ComputationVariables {
            split_points,
            matrix_to_variable,
            variable_ranges,
            full_row_range,
            variable_to_matrix,
        })
    }

    pub fn num_variables(&self) -> usize {
        self.variable_to_matrix.len()
    }

    pub fn split_points(&self, matrix: usize) -> &[usize] {
        self.split_points.get(matrix).map_or(&[], Vec::as_slice)
    }

    /// The matrix variable `v` belongs to.
    pub fn matrix_for_variable(&self, variable: usize) -> Result<usize> {
        self.variable_to_matrix
            .get(variable)
            .copied()
            .ok_or_else(|| Error::msg(format!("variable {variable} out of range")))
    }

    /// The half-open column interval of variable `v` within its matrix.
    pub fn variable_columns(&self, variable: usize) -> Result<Range<usize>> {
        let m = self.matrix_for_variable(variable)?;
        let k = variable - self.matrix_to_variable[m];
        let split = &self.split_points[m];
        Ok(split[k]..split[k + 1])
    }

    /// Variables covered by a sub-matrix; empty for the sentinel.
    pub fn variables_for_submatrix(&self, submatrix: usize) -> Range<usize> {
        self.variable_ranges.get(submatrix).cloned().unwrap_or(0..0)
    }

    pub fn variables_for_matrix(&self, matrix: usize) -> Range<usize> {
        match (
            self.matrix_to_variable.get(matrix),
            self.matrix_to_variable.get(matrix + 1),
        ) {
            (Some(&start), Some(&end)) => start..end,
            _ => 0..0,
        }
    }

    pub fn is_full_row_range(&self, submatrix: usize) -> bool {
        self.full_row_range.get(submatrix).copied().unwrap_or(false)
    }

    /// Add the variables of `submatrix` to the read and/or written sets of
    /// `attr`. A write through a view that misses some rows becomes a
    /// read-write.
    pub fn record_access(&self, submatrix: usize, access: AccessType, attr: &mut CommandAttributes) {
        if submatrix == EMPTY_SUBMATRIX {
            return;
        }
        let vars = self.variables_for_submatrix(submatrix);
        match access {
            AccessType::Read => attr.variables_read.extend(vars),
            AccessType::Write => {
                attr.variables_written.extend(vars.clone());
                if !self.is_full_row_range(submatrix) {
                    attr.variables_read.extend(vars);
                }
            }
            AccessType::ReadWrite => {
                attr.variables_written.extend(vars.clone());
                attr.variables_read.extend(vars);
            }
        }
    }
}

fn misaligned(submatrix: usize, col: usize) -> Error {
    Error::MalformedIr {
        command: None,
        msg: format!("sub-matrix {submatrix}: column {col} is not a split point"),
    }
}

fn compute_split_points(computation: &Computation) -> Result<Vec<Vec<usize>>> {
    let mut split_points: Vec<Vec<usize>> = computation
        .matrices()
        .iter()
        .enumerate()
        .map(|(m, info)| {
            if m == 0 {
                Vec::new()
            } else {
                vec![0, info.num_cols]
            }
        })
        .collect();
    for s in 1..computation.num_submatrices() {
        let info = computation.submatrix(s)?;
        let m = info.matrix_index;
        let num_cols = computation
            .matrix(m)
            .map_err(|_| Error::MalformedIr {
                command: None,
                msg: format!("sub-matrix {s} refers to invalid matrix {m}"),
            })?
            .num_cols;
        if info.region.col_end() > num_cols {
            return Err(Error::MalformedIr {
                command: None,
                msg: format!("sub-matrix {s} exceeds the columns of m{m}"),
            });
        }
        split_points[m].push(info.region.col_offset);
        split_points[m].push(info.region.col_end());
    }
    for split in split_points.iter_mut() {
        split.sort_unstable();
        split.dedup();
    }
    Ok(split_points)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sliced() -> (Computation, usize, usize, usize) {
        let mut c = Computation::new();
        let whole = c.new_matrix(10, 5).unwrap();
        let cols_2_4 = c.new_column_submatrix(1, 2, 2).unwrap();
        let top_rows = c.new_submatrix(1, 0, 3, 0, 5).unwrap();
        (c, whole, cols_2_4, top_rows)
    }

    #[test]
    fn test_split_points_and_variables() {
        let (c, whole, cols, _) = sliced();
        let vars = ComputationVariables::new(&c).unwrap();
        assert_eq!(vars.split_points(1), &[0, 2, 4, 5]);
        assert_eq!(vars.num_variables(), 3);
        assert_eq!(vars.variables_for_submatrix(whole), 0..3);
        assert_eq!(vars.variables_for_submatrix(cols), 1..2);
        assert_eq!(vars.variable_columns(0).unwrap(), 0..2);
        assert_eq!(vars.variable_columns(2).unwrap(), 4..5);
        assert_eq!(vars.matrix_for_variable(2).unwrap(), 1);
        assert_eq!(vars.variables_for_submatrix(EMPTY_SUBMATRIX), 0..0);
    }

    #[test]
    fn test_variables_numbered_across_matrices() {
        let mut c = Computation::new();
        c.new_matrix(4, 3).unwrap();
        c.new_matrix(4, 6).unwrap();
        c.new_column_submatrix(2, 0, 3).unwrap();
        let vars = ComputationVariables::new(&c).unwrap();
        assert_eq!(vars.variables_for_matrix(1), 0..1);
        assert_eq!(vars.variables_for_matrix(2), 1..3);
        assert_eq!(vars.variables_for_matrix(0), 0..0);
    }

    #[test]
    fn test_partial_row_write_is_read_write() {
        let (c, whole, _, top_rows) = sliced();
        let vars = ComputationVariables::new(&c).unwrap();
        assert!(vars.is_full_row_range(whole));
        assert!(!vars.is_full_row_range(top_rows));

        let mut attr = CommandAttributes::default();
        vars.record_access(top_rows, AccessType::Write, &mut attr);
        assert_eq!(attr.variables_written, vec![0, 1, 2]);
        assert_eq!(attr.variables_read, vec![0, 1, 2]);

        let mut attr = CommandAttributes::default();
        vars.record_access(whole, AccessType::Write, &mut attr);
        assert!(attr.variables_read.is_empty());
    }
}
