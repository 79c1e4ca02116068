//! Micro-batching: bounded queue, latency window, batch dispatch.
//!
//! The batcher only knows its forward collaborator; admission and tenancy
//! live in `policy`.

pub mod forward;
pub mod micro_batcher;

pub use forward::{forward_fn, BatchForward, FnForward};
pub use micro_batcher::{
    BatcherConfig, BatcherState, BatcherStats, MicroBatcher, MAX_BATCH, MAX_LATENCY, MAX_QUEUE,
};
