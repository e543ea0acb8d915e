//! # heron-ir
//!
//! The matrix-level computation IR and everything that verifies it.
//!
//! 1. **Computation** — matrices, sub-matrix views, index tables, commands
//! 2. **ComputationRequest** — named inputs/outputs and what to compute
//! 3. **Analyzer** — variables, per-command read/write sets, access histories
//! 4. **ComputationChecker** — index, order, lifecycle, undefined-read and
//!    rewrite passes
//! 5. **ComputationPrinter** — human-readable rendering for logs and errors
//!
//! Execution lives in the `heron` crate; nothing here touches matrix data.

pub mod analyze;
pub mod check;
pub mod computation;
pub mod print;
pub mod request;

pub use analyze::{
    AccessType, Analyzer, CommandAttributes, ComputationVariables, MatrixAccesses,
    VariableAccesses,
};
pub use check::{check_computation, CheckComputationConfig, ComputationChecker};
pub use computation::{
    Command, CommandType, Computation, IoBinding, MatrixInfo, SubMatrixInfo, EMPTY_SUBMATRIX,
};
pub use print::ComputationPrinter;
pub use request::{ComputationRequest, Index, IoSpecification};
