//! Retry controller: per-test retry counters, retry history, and the
//! decision of whether a failed test should run again.
//!
//! # Architecture
//!
//! ```text
//! SettingsSource ──initialize──> RetryConfig ─┬─> FailureClassifier
//!                                             └─> BackoffStrategy
//!
//! should_retry_test(test_id, failure)
//!     ├── retries disabled?         -> false
//!     ├── retry_count >= max?       -> false
//!     └── classifier.is_retriable() -> decision
//! ```
//!
//! One controller is built per run by the session bootstrap and shared by
//! reference (or `Arc`) with every test thread. Counters and histories are
//! sharded maps, so contention is per test id; there is no lock around the
//! whole structure. The controller computes delays but never sleeps.
//!
//! # Example
//!
//! ```
//! use rerun_guard::config::RetryConfig;
//! use rerun_guard::controller::RetryController;
//! use rerun_guard::failure::Failure;
//!
//! let controller = RetryController::with_config(RetryConfig::default());
//! let failure = Failure::new("Error").with_message("connection refused");
//!
//! assert!(controller.should_retry_test("login", Some(&failure)));
//! controller.record_retry("login");
//! assert_eq!(controller.retry_count("login"), 1);
//! ```

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::backoff::BackoffStrategy;
use crate::classifier::{FailureClassifier, FailureMatcher};
use crate::config::{EnvSettings, RetryConfig, SettingsSource};
use crate::failure::Failure;

// ============================================================================
// Retry History
// ============================================================================

/// One recorded execution of a test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryAttempt {
    /// 1-indexed attempt number.
    pub attempt_number: u32,
    /// Whether the attempt passed.
    pub success: bool,
    /// Wall time of the attempt in milliseconds.
    pub duration_ms: u64,
}

impl RetryAttempt {
    /// Create an attempt record.
    #[must_use]
    pub fn new(attempt_number: u32, success: bool, duration_ms: u64) -> Self {
        Self {
            attempt_number,
            success,
            duration_ms,
        }
    }
}

/// Ordered attempts of a single test within a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryHistory {
    attempts: Vec<RetryAttempt>,
}

impl RetryHistory {
    /// Create an empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an attempt.
    pub fn add_attempt(&mut self, attempt: RetryAttempt) {
        self.attempts.push(attempt);
    }

    /// Number of attempts recorded.
    #[must_use]
    pub fn attempt_count(&self) -> usize {
        self.attempts.len()
    }

    /// Whether the most recent attempt passed. False when empty.
    #[must_use]
    pub fn is_success_on_last_attempt(&self) -> bool {
        self.last_attempt().is_some_and(|a| a.success)
    }

    /// The most recent attempt.
    #[must_use]
    pub fn last_attempt(&self) -> Option<&RetryAttempt> {
        self.attempts.last()
    }

    /// All attempts in recording order.
    #[must_use]
    pub fn attempts(&self) -> &[RetryAttempt] {
        &self.attempts
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Aggregate view over every retry history of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryStatistics {
    /// Distinct tests that were retried or have a recorded history.
    pub unique_tests: usize,
    /// Attempts beyond the first, summed over tests with more than one attempt.
    pub total_retry_attempts: usize,
    /// Retried tests whose last attempt passed.
    pub succeeded_on_retry: usize,
    /// Retried tests whose last attempt failed.
    pub still_failing: usize,
}

impl RetryStatistics {
    /// `succeeded_on_retry * 100 / total_retry_attempts`, 0 when nothing was retried.
    #[must_use]
    pub fn retry_success_rate(&self) -> f64 {
        if self.total_retry_attempts == 0 {
            return 0.0;
        }
        self.succeeded_on_retry as f64 * 100.0 / self.total_retry_attempts as f64
    }
}

impl std::fmt::Display for RetryStatistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} tests, {} retry attempts ({} succeeded on retry, {} still failing, {:.2}% retry success rate)",
            self.unique_tests,
            self.total_retry_attempts,
            self.succeeded_on_retry,
            self.still_failing,
            self.retry_success_rate()
        )
    }
}

// ============================================================================
// Retry Controller
// ============================================================================

/// Where the controller's configuration comes from.
enum ConfigOrigin {
    Settings(Box<dyn SettingsSource + Send + Sync>),
    Fixed(RetryConfig),
}

impl ConfigOrigin {
    fn load(&self) -> RetryConfig {
        match self {
            Self::Settings(source) => RetryConfig::from_settings(source.as_ref()),
            Self::Fixed(config) => config.clone(),
        }
    }
}

/// Configuration-derived parts, built once per initialization.
struct Initialized {
    config: RetryConfig,
    classifier: FailureClassifier,
    backoff: Box<dyn BackoffStrategy>,
}

/// Coordinates retry decisions for one test run.
pub struct RetryController {
    origin: ConfigOrigin,
    custom_matchers: Vec<(String, FailureMatcher)>,
    state: RwLock<Option<Arc<Initialized>>>,
    retry_counters: DashMap<String, AtomicU32>,
    retry_histories: DashMap<String, RetryHistory>,
}

impl std::fmt::Debug for RetryController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryController")
            .field("initialized", &self.is_initialized())
            .field("tracked_tests", &self.retry_counters.len())
            .finish_non_exhaustive()
    }
}

impl RetryController {
    /// Create a controller that loads its configuration from `settings`.
    pub fn new(settings: impl SettingsSource + Send + Sync + 'static) -> Self {
        Self::from_origin(ConfigOrigin::Settings(Box::new(settings)))
    }

    /// Create a controller configured from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(EnvSettings)
    }

    /// Create a controller with an already resolved configuration.
    #[must_use]
    pub fn with_config(config: RetryConfig) -> Self {
        Self::from_origin(ConfigOrigin::Fixed(config))
    }

    fn from_origin(origin: ConfigOrigin) -> Self {
        Self {
            origin,
            custom_matchers: Vec::new(),
            state: RwLock::new(None),
            retry_counters: DashMap::new(),
            retry_histories: DashMap::new(),
        }
    }

    /// Add a retriable exception kind recognized by a custom predicate.
    ///
    /// Applied on every (re)initialization.
    #[must_use]
    pub fn with_exception_matcher<F>(mut self, tag: impl Into<String>, matcher: F) -> Self
    where
        F: Fn(&Failure) -> bool + Send + Sync + 'static,
    {
        self.custom_matchers.push((tag.into(), Arc::new(matcher)));
        self
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Load configuration once. Later calls are no-ops until [`reset`].
    ///
    /// [`reset`]: RetryController::reset
    pub fn initialize(&self) {
        self.ensure_initialized();
    }

    /// Whether configuration has been loaded.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.state.read().is_some()
    }

    fn ensure_initialized(&self) -> Arc<Initialized> {
        if let Some(state) = self.state.read().as_ref() {
            return Arc::clone(state);
        }

        let mut guard = self.state.write();
        if let Some(state) = guard.as_ref() {
            return Arc::clone(state);
        }

        let config = self.origin.load();
        let mut classifier = FailureClassifier::from_config(&config);
        for (tag, matcher) in &self.custom_matchers {
            classifier
                .registry_mut()
                .register_shared(tag.clone(), Arc::clone(matcher));
        }
        let backoff = config.backoff();

        info!(
            "Retry controller initialized - max retries: {}, base delay: {}ms, multiplier: {}, max delay: {}ms, strategy: {}",
            config.max_retries,
            config.base_delay_ms,
            config.backoff_multiplier,
            config.max_delay_ms,
            backoff.name()
        );

        let state = Arc::new(Initialized {
            config,
            classifier,
            backoff,
        });
        *guard = Some(Arc::clone(&state));
        state
    }

    /// Clear all counters and histories and mark the controller uninitialized.
    ///
    /// The next query reloads configuration. Safe to call repeatedly.
    pub fn reset(&self) {
        self.retry_counters.clear();
        self.retry_histories.clear();
        *self.state.write() = None;
        info!("Retry controller reset - all retry counters and histories cleared");
    }

    // =========================================================================
    // Decisions
    // =========================================================================

    /// Whether `test_id` should run again after failing with `failure`.
    ///
    /// Pure decision; call [`record_retry`] when the retry is actually scheduled.
    ///
    /// [`record_retry`]: RetryController::record_retry
    pub fn should_retry_test(&self, test_id: &str, failure: Option<&Failure>) -> bool {
        let state = self.ensure_initialized();
        let max_retries = state.config.max_retries;

        if max_retries == 0 {
            return false;
        }

        let current = self.retry_count(test_id);
        if current >= max_retries {
            debug!("Test {} has reached max retries ({})", test_id, max_retries);
            return false;
        }

        let classification = state.classifier.classify(failure);
        if !classification.is_retriable() {
            debug!(
                "Test {} failure is not retriable: {} ({})",
                test_id,
                failure.map_or("none", |f| f.kind.as_str()),
                classification
            );
            return false;
        }

        true
    }

    /// Whether `failure` alone is retriable, ignoring counters.
    pub fn is_retriable_failure(&self, failure: Option<&Failure>) -> bool {
        self.ensure_initialized().classifier.is_retriable(failure)
    }

    /// Delay to wait before `attempt` (1-indexed). The caller does the waiting.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        self.ensure_initialized().backoff.calculate_delay(attempt)
    }

    // =========================================================================
    // Recording
    // =========================================================================

    /// Atomically increment the retry counter for `test_id`, returning the new count.
    pub fn record_retry(&self, test_id: &str) -> u32 {
        let count = match self.retry_counters.get(test_id) {
            Some(counter) => counter.fetch_add(1, Ordering::SeqCst) + 1,
            None => {
                self.retry_counters
                    .entry(test_id.to_string())
                    .or_insert_with(|| AtomicU32::new(0))
                    .fetch_add(1, Ordering::SeqCst)
                    + 1
            }
        };
        info!("Recorded retry for test {} - count: {}", test_id, count);
        count
    }

    /// Append an attempt to the history of `test_id`.
    pub fn record_retry_attempt(
        &self,
        test_id: &str,
        attempt_number: u32,
        success: bool,
        duration_ms: u64,
    ) {
        self.retry_histories
            .entry(test_id.to_string())
            .or_default()
            .add_attempt(RetryAttempt::new(attempt_number, success, duration_ms));
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Current retry count for `test_id`.
    #[must_use]
    pub fn retry_count(&self, test_id: &str) -> u32 {
        self.retry_counters
            .get(test_id)
            .map_or(0, |c| c.load(Ordering::SeqCst))
    }

    /// Snapshot of the history of `test_id`.
    #[must_use]
    pub fn retry_history(&self, test_id: &str) -> Option<RetryHistory> {
        self.retry_histories.get(test_id).map(|h| h.value().clone())
    }

    /// Whether retrying is enabled at all.
    pub fn is_retry_enabled(&self) -> bool {
        self.ensure_initialized().config.is_retry_enabled()
    }

    /// The active configuration.
    pub fn config(&self) -> RetryConfig {
        self.ensure_initialized().config.clone()
    }

    /// Name of the active backoff strategy.
    pub fn strategy_name(&self) -> &'static str {
        self.ensure_initialized().backoff.name()
    }

    /// Aggregate statistics over all recorded histories.
    #[must_use]
    pub fn statistics(&self) -> RetryStatistics {
        let mut stats = RetryStatistics::default();

        for entry in self.retry_histories.iter() {
            let history = entry.value();
            if history.attempt_count() > 1 {
                stats.total_retry_attempts += history.attempt_count() - 1;
                if history.is_success_on_last_attempt() {
                    stats.succeeded_on_retry += 1;
                } else {
                    stats.still_failing += 1;
                }
            }
        }

        let mut tests: HashSet<String> = self
            .retry_counters
            .iter()
            .map(|e| e.key().clone())
            .collect();
        tests.extend(self.retry_histories.iter().map(|e| e.key().clone()));
        stats.unique_tests = tests.len();

        stats
    }
}
