//! signalplane — trade-signal replication core.
//!
//! Exposes every module as a library so the three binaries (`signal-gateway`,
//! `execution-guard`, `trust-loop`) and the admin control-plane server can
//! share one build of the Signal Log, Subscription Registry, and their
//! collaborators.

pub mod admin;
pub mod auth;
pub mod config;
pub mod error;
pub mod fanout;
pub mod gateway;
pub mod guard;
pub mod host;
pub mod log;
pub mod metrics;
pub mod middleware;
pub mod quote;
pub mod registry;
pub mod signal;
pub mod sink;
pub mod trust;
pub mod wallet;
