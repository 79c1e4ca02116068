//! Admission policy layer (tenant policies, rate limiting).
//!
//! Maps tenants to token buckets and rejects over-limit traffic before it
//! reaches the batch queue.

pub mod gatekeeper;

pub use gatekeeper::{Gatekeeper, GatekeeperStats, Submitter, TenantPolicy, TenantSnapshot};
