#![deny(unused)]
//! HTTP gateway for Codemode.
//!
//! Exposes code execution, workspace file access and remote dispatch as a
//! JSON API in front of the sandbox pool.

pub mod api;
pub mod handlers;
pub mod server;

pub use api::{ApiError, ErrorResponse};
pub use server::{AppState, GatewayConfig, GatewayServer};
