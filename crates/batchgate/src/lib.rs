//! Top-level facade crate for batchgate.
//!
//! Re-exports the core types and the gateway library so users can depend on a
//! single crate, and lifts the pipeline entry points to the root.

pub mod core {
    pub use batchgate_core::*;
}

pub mod gateway {
    pub use batchgate_gateway::*;
}

pub use batchgate_core::{BatchGateError, ClientCode, Result, TokenBucket};
pub use batchgate_gateway::batching::{forward_fn, BatchForward, BatcherConfig, MicroBatcher};
pub use batchgate_gateway::policy::{Gatekeeper, TenantPolicy};
pub use batchgate_gateway::AdmissionPipeline;
