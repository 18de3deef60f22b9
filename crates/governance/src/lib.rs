#![deny(unused)]
//! Observability for Codemode.
//!
//! This crate provides:
//! - Structured logging and distributed tracing
//! - Prometheus metrics recorder and HTTP request metrics

pub mod metrics;
pub mod tracing_layer;

pub use metrics::{detached_metrics_handle, setup_metrics_recorder, track_request};
pub use tracing_layer::{configure_tracing, shutdown_tracing};
