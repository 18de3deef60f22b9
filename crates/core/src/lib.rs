#![deny(unused)]
//! Core types, configuration, and error definitions for Codemode.
//!
//! This crate provides the building blocks shared by the sandbox pool, the
//! remote dispatcher and the HTTP gateway.

pub mod config;
pub mod error;
pub mod fs_policy;
pub mod selection;
pub mod types;

pub use error::{Error, Result};
pub use selection::{FirstSelection, RandomSelection, SelectionStrategy};
pub use types::*;
