//! Middleware for observability.
//!
//! This module provides request logging with latency tracking for the
//! admin control-plane HTTP surface.

pub mod logging;

pub use logging::request_logging_simple;
