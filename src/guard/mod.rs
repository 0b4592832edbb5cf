//! ExecutionGuard (§4.5): the receiver-side admission pipeline. The hardest
//! single component — runs in adversary-controlled process space and must
//! fail closed on any uncertainty.

pub mod full_sync;
pub mod pipeline;
pub mod sequence_file;
pub mod session;

pub use full_sync::SyncRequest;
pub use pipeline::{ExecutionGuard, GuardOutcome, LocalState};
