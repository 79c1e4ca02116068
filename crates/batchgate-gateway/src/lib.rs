//! batchgate gateway library entry.
//!
//! Wires per-tenant admission control, micro-batching and the target
//! registry behind an axum HTTP surface. It is consumed by the binary
//! (`main.rs`) and by integration tests.

pub mod app_state;
pub mod backend;
pub mod batching;
pub mod config;
pub mod dispatch;
pub mod obs;
pub mod ops;
pub mod pipeline;
pub mod policy;
pub mod router;
pub mod transport;

pub use pipeline::{AdmissionPipeline, PipelineStats};
