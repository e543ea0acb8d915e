// Accesses — Per-variable and per-matrix access histories
//
// Inverts the per-command read/write sets:
//
//   VariableAccesses   for each variable, (command, Read|Write|ReadWrite)
//                      in command order
//   MatrixAccesses     for each matrix, the allocating and freeing commands,
//                      the sorted commands touching any of its variables,
//                      and whether it is an input and/or output
//
// INPUT / OUTPUT FLAGS:
//
// Derivatives flow against values. An input node's value matrix is an input
// of the computation and its derivative matrix (if any) an output; an output
// node's value matrix is an output and its derivative matrix an input.

use heron_core::backend::Backend;
use heron_core::error::{Error, Result};
use heron_nn::Nnet;

use crate::analyze::attributes::CommandAttributes;
use crate::analyze::variables::{AccessType, ComputationVariables};
use crate::computation::{Command, Computation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Access {
    pub command: usize,
    pub access_type: AccessType,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariableAccesses {
    pub accesses: Vec<Access>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatrixAccesses {
    pub allocate_command: Option<usize>,
    pub deallocate_command: Option<usize>,
    /// Sorted, unique.
    pub accesses: Vec<usize>,
    pub is_input: bool,
    pub is_output: bool,
}

pub fn compute_variable_accesses(
    variables: &ComputationVariables,
    attributes: &[CommandAttributes],
) -> Vec<VariableAccesses> {
    let mut result = vec![VariableAccesses::default(); variables.num_variables()];
    for (c, attr) in attributes.iter().enumerate() {
        let mut all: Vec<usize> = attr
            .variables_read
            .iter()
            .chain(&attr.variables_written)
            .copied()
            .collect();
        all.sort_unstable();
        all.dedup();
        for v in all {
            let read = attr.variables_read.binary_search(&v).is_ok();
            let written = attr.variables_written.binary_search(&v).is_ok();
            let access_type = match (read, written) {
                (true, true) => AccessType::ReadWrite,
                (true, false) => AccessType::Read,
                _ => AccessType::Write,
            };
            if let Some(entry) = result.get_mut(v) {
                entry.accesses.push(Access {
                    command: c,
                    access_type,
                });
            }
        }
    }
    result
}

pub fn compute_matrix_accesses<B: Backend>(
    nnet: &Nnet<B>,
    computation: &Computation,
    variables: &ComputationVariables,
    attributes: &[CommandAttributes],
) -> Result<Vec<MatrixAccesses>> {
    let num_matrices = computation.num_matrices();
    let mut result = vec![MatrixAccesses::default(); num_matrices];

    for (c, attr) in attributes.iter().enumerate() {
        for &v in attr.variables_read.iter().chain(&attr.variables_written) {
            let m = variables.matrix_for_variable(v)?;
            let list = &mut result[m].accesses;
            if list.last() != Some(&c) {
                list.push(c);
            }
        }
        let command = computation
            .commands()
            .get(c)
            .ok_or_else(|| Error::msg(format!("attributes for unknown command {c}")))?;
        match *command {
            Command::ResizeMatrixZeroed { matrix } | Command::ResizeMatrixUndefined { matrix } => {
                let entry = entry_for(&mut result, matrix, c)?;
                if let Some(first) = entry.allocate_command {
                    return Err(Error::lifecycle(
                        matrix,
                        format!("allocated twice (commands {first} and {c})"),
                    ));
                }
                entry.allocate_command = Some(c);
            }
            Command::ResizeMatrixEmpty { matrix } => {
                let entry = entry_for(&mut result, matrix, c)?;
                if let Some(first) = entry.deallocate_command {
                    return Err(Error::lifecycle(
                        matrix,
                        format!("deallocated twice (commands {first} and {c})"),
                    ));
                }
                entry.deallocate_command = Some(c);
            }
            _ => {}
        }
    }

    for (&node, binding) in computation.input_output_info() {
        let (value_flag, deriv_flag) = if nnet.is_input_node(node) {
            (Flag::Input, Flag::Output)
        } else if nnet.is_output_node(node) {
            (Flag::Output, Flag::Input)
        } else {
            return Err(Error::MalformedIr {
                command: None,
                msg: format!("bound node {node} is neither an input nor an output node"),
            });
        };
        mark(&mut result, binding.value_matrix, value_flag)?;
        if let Some(deriv) = binding.deriv_matrix {
            mark(&mut result, deriv, deriv_flag)?;
        }
    }
    Ok(result)
}

#[derive(Clone, Copy)]
enum Flag {
    Input,
    Output,
}

fn entry_for(
    result: &mut [MatrixAccesses],
    matrix: usize,
    command: usize,
) -> Result<&mut MatrixAccesses> {
    if matrix == 0 {
        return Err(Error::malformed(command, "resize of the empty matrix m0"));
    }
    result
        .get_mut(matrix)
        .ok_or_else(|| Error::malformed(command, format!("matrix index {matrix} out of range")))
}

fn mark(result: &mut [MatrixAccesses], matrix: usize, flag: Flag) -> Result<()> {
    let entry = match result.get_mut(matrix) {
        Some(e) if matrix != 0 => e,
        _ => {
            return Err(Error::MalformedIr {
                command: None,
                msg: format!("input/output binding names invalid matrix {matrix}"),
            })
        }
    };
    let (already, name) = match flag {
        Flag::Input => (std::mem::replace(&mut entry.is_input, true), "input"),
        Flag::Output => (std::mem::replace(&mut entry.is_output, true), "output"),
    };
    if already {
        return Err(Error::MalformedIr {
            command: None,
            msg: format!("matrix m{matrix} is marked as {name} more than once"),
        });
    }
    Ok(())
}
