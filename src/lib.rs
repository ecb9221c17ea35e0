//! rerun-guard - Test Rerun Orchestration
//!
//! Decides whether a failed test is worth re-running, how long to wait
//! before doing so, and keeps track of what happened across the rounds of a
//! rerun session.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`classifier`] - Retriable/non-retriable failure classification
//! - [`backoff`] - Delay strategies between attempts
//! - [`controller`] - Per-test retry counters, histories and decisions
//! - [`metrics`] - Round, scenario, failure-type and delay statistics
//! - [`progress`] - Live progress reporting with listener callbacks
//! - [`round_lock`] - Cross-process round ownership lock file
//! - [`rounds`] - Per-round results of the rerun process
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Custom error types and handling
//! - [`testing`] - Testing infrastructure (mocks, fixtures)
//!
//! # Example
//!
//! ```rust,ignore
//! use rerun_guard::{Failure, RetryController};
//!
//! let controller = RetryController::from_env();
//! let failure = Failure::new("RuntimeException").with_message("Connection refused");
//!
//! if controller.should_retry_test("login.feature:12", Some(&failure)) {
//!     let attempt = controller.record_retry("login.feature:12") + 1;
//!     std::thread::sleep(controller.calculate_delay(attempt));
//!     // re-run the test
//! }
//! ```

pub mod backoff;
pub mod classifier;
pub mod config;
pub mod controller;
pub mod error;
pub mod failure;
pub mod metrics;
pub mod progress;
pub mod round_lock;
pub mod rounds;
pub mod testing;

// Re-export commonly used types
pub use error::{RerunError, Result};
pub use failure::Failure;

// Re-export decision types
pub use backoff::{BackoffKind, BackoffStrategy, ExponentialBackoff, FixedDelay};
pub use classifier::{Classification, ExceptionRegistry, FailureClassifier};
pub use config::{ConfigOverrides, EnvSettings, RetryConfig, SettingsSource};
pub use controller::{RetryAttempt, RetryController, RetryHistory, RetryStatistics};

// Re-export reporting types
pub use metrics::{DelayStatistics, MetricsCollector, RetryMetrics, RoundMetrics, ScenarioMetrics};
pub use progress::{
    ProgressInfo, ProgressListener, ProgressReporter, RerunStatisticsSource, RoundProgress,
    SessionProgress,
};
pub use round_lock::{RoundLockFile, RoundOwnership};
pub use rounds::{RerunStatistics, RoundLedger, RoundResult};
