//! Core type definitions for Codemode.
//!
//! Request and result shapes shared by the sandbox pool, the remote
//! dispatcher and the HTTP gateway.

pub mod execution;

pub use execution::*;
