//! # heron-core
//!
//! Core types shared by every heron crate.
//!
//! This crate provides:
//! - [`Error`] / [`Result`] — the fatal error taxonomy of checker and executor
//! - [`Region`] — rectangular window geometry of a sub-matrix
//! - [`MatrixRef`] / [`MatrixMut`] — bounds-checked, non-owning views
//! - [`Backend`] trait — numeric storage and the primitives commands use

pub mod backend;
pub mod error;
pub mod region;
pub mod view;

pub use backend::{Backend, BackendDevice, BackendStorage, MatrixTranspose, ResizeKind, UnaryOp};
pub use error::{Error, Result};
pub use region::Region;
pub use view::{MatrixMut, MatrixRef};
