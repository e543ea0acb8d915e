//! # heron-nn
//!
//! Components and the network table that computations are checked and run
//! against.
//!
//! 1. **Component trait** — propagate / backprop / store-stats / update
//! 2. **ComponentProperties** — the capability bits the checker consults
//! 3. **AffineComponent** — fully connected, updatable
//! 4. **NonlinearComponent** — ReLU, Sigmoid, Tanh; in-place capable
//! 5. **RowSelectComponent** — row gather driven by precomputed indexes
//! 6. **Nnet** — named components plus input/output/component nodes
//!
//! Components are generic over `Backend`, so one network definition runs on
//! any backend.

pub mod affine;
pub mod component;
pub mod nnet;
pub mod nonlinear;
pub mod row_select;

pub use affine::AffineComponent;
pub use component::{Component, ComponentProperties, PrecomputedIndexes};
pub use nnet::{NetworkNode, Nnet, NodeKind};
pub use nonlinear::NonlinearComponent;
pub use row_select::RowSelectComponent;
