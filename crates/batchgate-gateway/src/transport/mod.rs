//! Transport layer (HTTP/JSON).
//!
//! Decodes request bodies once, hands them to the target registry and maps
//! every error through a single `ApiError`.

pub mod http;

pub use http::ApiError;
