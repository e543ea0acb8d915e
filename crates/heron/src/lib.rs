//! # Heron
//!
//! Verified execution of matrix-level neural network computations.
//!
//! A planner lowers a network evaluation to a flat list of commands over
//! matrices and sub-matrix views. Heron checks that list before anything runs
//! and then interprets it against a numeric backend.
//!
//! ## Usage
//!
//! ```rust
//! use heron::prelude::*;
//! ```
//!
//! ## Architecture
//!
//! | Crate | Purpose |
//! |-------|----------|
//! | `heron-core` | Error taxonomy, Region, matrix views, Backend trait |
//! | `heron-cpu` | Dense row-major f32 backend with rayon parallelism |
//! | `heron-nn` | Component trait, capability flags, concrete components, Nnet |
//! | `heron-ir` | Computation IR, request, printer, analyses, checker |
//!
//! ## Modules
//!
//! - [`exec`] — `NnetComputer`, the command interpreter

/// Re-export core types.
pub use heron_core::{
    backend::{Backend, BackendDevice, BackendStorage, ResizeKind, UnaryOp},
    Error, MatrixMut, MatrixRef, Region, Result,
};

/// Re-export CPU backend.
pub use heron_cpu::{cpu_matrix, CpuBackend, CpuDevice, CpuStorage};

/// Re-export components and the network.
pub mod nn {
    pub use heron_nn::*;
}

/// Re-export the IR, analyses and checker.
pub mod ir {
    pub use heron_ir::*;
}

/// Executor — runs checked computations on a backend.
pub mod exec;

/// Prelude: import this for the most common types.
pub mod prelude {
    pub use crate::exec::{ComputeConfig, ComputerState, NnetComputer};
    pub use crate::ir::{
        check_computation, Analyzer, CheckComputationConfig, Command, Computation,
        ComputationChecker, ComputationRequest, Index, IoSpecification, EMPTY_SUBMATRIX,
    };
    pub use crate::nn::{
        AffineComponent, Component, ComponentProperties, Nnet, NonlinearComponent,
        PrecomputedIndexes, RowSelectComponent,
    };
    pub use crate::{
        cpu_matrix, Backend, BackendStorage, CpuBackend, CpuDevice, CpuStorage, Error, MatrixRef,
        Result,
    };
}
