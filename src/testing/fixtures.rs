//! Canned failures for classification and controller tests.
//!
//! Each fixture mirrors a failure a browser/API test runner commonly
//! reports, so tests read like the situations they model.

use crate::failure::Failure;

/// A registered transient type: the browser timed out waiting.
#[must_use]
pub fn transient_failure() -> Failure {
    Failure::new("TimeoutException")
        .with_message("Timeout 30000ms exceeded waiting for selector \"#submit\"")
}

/// An unregistered type whose message names a network fault.
#[must_use]
pub fn network_failure() -> Failure {
    Failure::new("RuntimeException").with_message("connect ECONNREFUSED: Connection refused")
}

/// A verification failure that must never be retried.
#[must_use]
pub fn assertion_failure() -> Failure {
    Failure::new("RuntimeException").with_message("AssertionError: expected 200 but got 404")
}

/// A failure nothing recognizes.
#[must_use]
pub fn unknown_failure() -> Failure {
    Failure::new("NullPointerException").with_message("value was null")
}
