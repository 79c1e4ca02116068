//! Client code mapping is part of the public contract.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use batchgate_core::{BatchGateError, ClientCode};

#[test]
fn taxonomy_maps_to_stable_codes() {
    let cases = [
        (BatchGateError::RateLimited, "RATE_LIMITED"),
        (BatchGateError::QueueFull, "QUEUE_FULL"),
        (BatchGateError::Timeout, "TIMEOUT"),
        (BatchGateError::Backend("boom".into()), "BACKEND_ERROR"),
        (BatchGateError::BadRequest("x".into()), "BAD_REQUEST"),
        (BatchGateError::NotFound("x".into()), "NOT_FOUND"),
        (BatchGateError::Closed, "UNAVAILABLE"),
        (BatchGateError::UnsupportedVersion, "UNSUPPORTED_VERSION"),
        (BatchGateError::Internal("x".into()), "INTERNAL"),
    ];
    for (err, code) in cases {
        assert_eq!(err.client_code().as_str(), code, "err={err}");
    }
}

#[test]
fn rejections_are_admission_time_only() {
    assert!(BatchGateError::RateLimited.is_rejection());
    assert!(BatchGateError::QueueFull.is_rejection());
    assert!(BatchGateError::Closed.is_rejection());
    assert!(!BatchGateError::Timeout.is_rejection());
    assert!(!BatchGateError::Backend("x".into()).is_rejection());
}

#[test]
fn into_backend_keeps_backend_and_wraps_others() {
    let e = BatchGateError::Backend("oom".into()).into_backend();
    assert_eq!(e, BatchGateError::Backend("oom".into()));

    let e = BatchGateError::Internal("socket reset".into()).into_backend();
    assert_eq!(e.client_code(), ClientCode::BackendError);
    assert!(e.to_string().contains("socket reset"));
}
