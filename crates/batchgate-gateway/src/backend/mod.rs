//! Built-in forward backends.
//!
//! Real model backends are external collaborators implementing
//! [`BatchForward`]; the gateway binary ships only the echo backend.

pub mod echo;

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::batching::BatchForward;
use crate::config::schema::{BackendKind, BackendSection};

pub use echo::EchoForward;

pub fn build_forward(cfg: &BackendSection) -> Arc<dyn BatchForward<Value, Value>> {
    match cfg.kind {
        BackendKind::Echo => Arc::new(EchoForward::new(Duration::from_millis(cfg.latency_ms))),
    }
}
