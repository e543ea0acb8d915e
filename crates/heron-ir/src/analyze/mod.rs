// Analysis — Variables, command attributes and access histories
//
//   Computation ──► ComputationVariables ──► CommandAttributes ──► VariableAccesses
//                                                              └─► MatrixAccesses
//
// Everything here is derived from one `Computation` and is only valid for
// that computation; rebuild it whenever the IR changes. None of it drives
// execution, it exists to verify the IR.

pub mod accesses;
pub mod attributes;
pub mod variables;

use heron_core::backend::Backend;
use heron_core::error::Result;
use heron_nn::Nnet;

use crate::computation::Computation;

pub use accesses::{
    compute_matrix_accesses, compute_variable_accesses, Access, MatrixAccesses, VariableAccesses,
};
pub use attributes::{access_rules, compute_command_attributes, CommandAttributes};
pub use variables::{AccessType, ComputationVariables};

/// All analyses of one computation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Analyzer {
    pub variables: ComputationVariables,
    pub command_attributes: Vec<CommandAttributes>,
    pub variable_accesses: Vec<VariableAccesses>,
    pub matrix_accesses: Vec<MatrixAccesses>,
}

impl Analyzer {
    pub fn new<B: Backend>(nnet: &Nnet<B>, computation: &Computation) -> Result<Self> {
        let variables = ComputationVariables::new(computation)?;
        let command_attributes = compute_command_attributes(nnet, computation, &variables)?;
        let variable_accesses = compute_variable_accesses(&variables, &command_attributes);
        let matrix_accesses =
            compute_matrix_accesses(nnet, computation, &variables, &command_attributes)?;
        Ok(Analyzer {
            variables,
            command_attributes,
            variable_accesses,
            matrix_accesses,
        })
    }
}
