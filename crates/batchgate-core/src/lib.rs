//! batchgate core: runtime-agnostic primitives shared by the gateway.
//!
//! This crate defines the error taxonomy returned to callers and the token
//! bucket used for per-tenant admission. It carries no async runtime so the
//! limiter can be embedded anywhere.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here
//! (`#![deny(clippy::panic, clippy::unwrap_used, clippy::expect_used)]`).
//! All fallible paths surface as `BatchGateError`/`Result`.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod limiter;

/// Shared result type.
pub use error::{BatchGateError, ClientCode, Result};
pub use limiter::TokenBucket;
