//! Rerun session metrics: rounds, scenario retries, failure types and delays.
//!
//! One collector is created per rerun session. All state sits behind a
//! single mutex, so every read-side projection sees a consistent snapshot
//! and no record is ever partially visible to a reader.
//!
//! # Example
//!
//! ```
//! use rerun_guard::metrics::MetricsCollector;
//!
//! let metrics = MetricsCollector::new();
//! metrics.start_session();
//! metrics.record_round_start(1, 3);
//! metrics.record_round_end(1, 0, 5000, 10, 0, 2);
//! metrics.end_session();
//!
//! let overall = metrics.overall_metrics();
//! assert_eq!(overall.successful_rounds, 1);
//! ```

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Write as _;
use tracing::{debug, info};

/// How many unresolved scenarios the formatted summary lists.
const SUMMARY_TOP_SCENARIOS: usize = 10;

// ============================================================================
// Record Types
// ============================================================================

/// Outcome of one round of the rerun process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundMetrics {
    /// Round number (1-indexed).
    pub round: u32,
    /// Rounds planned for the session.
    pub max_rounds: u32,
    /// When the round started.
    pub start_time: DateTime<Utc>,
    /// When the round ended, once finalized.
    pub end_time: Option<DateTime<Utc>>,
    /// Process exit code, once finalized.
    pub exit_code: Option<i32>,
    /// Tests that passed.
    pub passed: u32,
    /// Tests that failed.
    pub failed: u32,
    /// Tests that passed only after a retry.
    pub retried_passed: u32,
}

impl RoundMetrics {
    fn started(round: u32, max_rounds: u32) -> Self {
        Self {
            round,
            max_rounds,
            start_time: Utc::now(),
            end_time: None,
            exit_code: None,
            passed: 0,
            failed: 0,
            retried_passed: 0,
        }
    }

    fn finalize(
        &mut self,
        exit_code: i32,
        duration_ms: u64,
        passed: u32,
        failed: u32,
        retried_passed: u32,
    ) {
        let millis = i64::try_from(duration_ms).unwrap_or(i64::MAX);
        self.end_time = Some(
            self.start_time
                .checked_add_signed(chrono::Duration::milliseconds(millis))
                .unwrap_or(self.start_time),
        );
        self.exit_code = Some(exit_code);
        self.passed = passed;
        self.failed = failed;
        self.retried_passed = retried_passed;
    }

    /// Round duration in milliseconds; 0 while the round is open.
    #[must_use]
    pub fn duration_ms(&self) -> u64 {
        self.end_time.map_or(0, |end| {
            u64::try_from((end - self.start_time).num_milliseconds()).unwrap_or(0)
        })
    }

    /// Whether the round finished with exit code 0.
    #[must_use]
    pub fn is_successful(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// A single execution of a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptMetrics {
    /// Attempt number (1-indexed).
    pub attempt: u32,
    /// Duration in milliseconds.
    pub duration_ms: u64,
    /// Whether the attempt passed.
    pub success: bool,
}

/// Why a scenario attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureInfo {
    /// Attempt number (1-indexed).
    pub attempt: u32,
    /// Error type tag.
    pub error_type: String,
    /// Error message.
    pub error_message: String,
}

/// Everything recorded about one scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioMetrics {
    /// Scenario identifier.
    pub scenario_id: String,
    /// Attempts in recording order.
    pub attempts: Vec<AttemptMetrics>,
    /// Failures in recording order.
    pub failures: Vec<FailureInfo>,
    max_attempt: u32,
    ultimately_successful: bool,
}

impl ScenarioMetrics {
    fn new(scenario_id: &str) -> Self {
        Self {
            scenario_id: scenario_id.to_string(),
            attempts: Vec::new(),
            failures: Vec::new(),
            max_attempt: 0,
            ultimately_successful: false,
        }
    }

    fn record_attempt(&mut self, attempt: u32, duration_ms: u64, success: bool) {
        self.attempts.push(AttemptMetrics {
            attempt,
            duration_ms,
            success,
        });
        self.max_attempt = self.max_attempt.max(attempt);
        if success {
            self.ultimately_successful = true;
        }
    }

    fn record_failure(&mut self, attempt: u32, error_type: &str, error_message: &str) {
        self.failures.push(FailureInfo {
            attempt,
            error_type: error_type.to_string(),
            error_message: error_message.to_string(),
        });
    }

    /// Highest attempt number minus one, never negative.
    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.max_attempt.saturating_sub(1)
    }

    /// Highest attempt number seen.
    #[must_use]
    pub fn total_attempts(&self) -> u32 {
        self.max_attempt
    }

    /// Whether any attempt succeeded.
    #[must_use]
    pub fn is_ultimately_successful(&self) -> bool {
        self.ultimately_successful
    }

    /// Sum of attempt durations.
    #[must_use]
    pub fn total_duration_ms(&self) -> u64 {
        self.attempts.iter().map(|a| a.duration_ms).sum()
    }

    /// Most frequent failure type, ties broken by name.
    #[must_use]
    pub fn most_common_error_type(&self) -> Option<&str> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for failure in &self.failures {
            *counts.entry(failure.error_type.as_str()).or_insert(0) += 1;
        }
        counts
            .into_iter()
            .max_by(|(a_type, a), (b_type, b)| a.cmp(b).then_with(|| b_type.cmp(a_type)))
            .map(|(error_type, _)| error_type)
    }
}

// ============================================================================
// Projections
// ============================================================================

/// Session-wide totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryMetrics {
    /// Rounds started.
    pub total_rounds: u32,
    /// Rounds that ended with exit code 0.
    pub successful_rounds: u32,
    /// Rounds that ended with a non-zero exit code.
    pub failed_rounds: u32,
    /// Scenario retry attempts recorded.
    pub total_retries: u32,
    /// Scenario retry attempts that passed.
    pub successful_retries: u32,
    /// Scenario retry attempts that failed.
    pub failed_retries: u32,
    /// Distinct scenarios with any record.
    pub unique_scenarios: usize,
    /// Session wall time in milliseconds.
    pub total_duration_ms: u64,
}

impl RetryMetrics {
    /// Percentage of rounds that succeeded.
    #[must_use]
    pub fn round_success_rate(&self) -> f64 {
        percentage(self.successful_rounds as usize, self.total_rounds as usize)
    }

    /// Percentage of retries that succeeded.
    #[must_use]
    pub fn retry_success_rate(&self) -> f64 {
        percentage(self.successful_retries as usize, self.total_retries as usize)
    }

    /// Round success rate with two decimals, e.g. `66.67%`.
    #[must_use]
    pub fn formatted_round_success_rate(&self) -> String {
        format!("{:.2}%", self.round_success_rate())
    }

    /// Retry success rate with two decimals.
    #[must_use]
    pub fn formatted_retry_success_rate(&self) -> String {
        format!("{:.2}%", self.retry_success_rate())
    }
}

/// Retry delay statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayStatistics {
    /// Number of delays recorded.
    pub count: usize,
    /// Shortest delay.
    pub min_ms: u64,
    /// Longest delay.
    pub max_ms: u64,
    /// Integer mean delay.
    pub avg_ms: u64,
    /// Sum of delays.
    pub total_ms: u64,
}

impl DelayStatistics {
    fn from_measurements(delays: &[u64]) -> Self {
        if delays.is_empty() {
            return Self::default();
        }
        let total_ms: u64 = delays.iter().sum();
        Self {
            count: delays.len(),
            min_ms: delays.iter().copied().min().unwrap_or(0),
            max_ms: delays.iter().copied().max().unwrap_or(0),
            avg_ms: total_ms / delays.len() as u64,
            total_ms,
        }
    }

    /// One-line summary.
    #[must_use]
    pub fn formatted_summary(&self) -> String {
        format!(
            "DelayStats{{count={}, min={}ms, max={}ms, avg={}ms, total={}ms}}",
            self.count, self.min_ms, self.max_ms, self.avg_ms, self.total_ms
        )
    }
}

fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

// ============================================================================
// Collector
// ============================================================================

#[derive(Debug, Default)]
struct MetricsState {
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    scenarios: HashMap<String, ScenarioMetrics>,
    rounds: Vec<RoundMetrics>,
    total_rounds: u32,
    successful_rounds: u32,
    failed_rounds: u32,
    total_retries: u32,
    successful_retries: u32,
    failed_retries: u32,
    exception_type_counts: HashMap<String, usize>,
    delays_ms: Vec<u64>,
}

impl MetricsState {
    fn overall(&self) -> RetryMetrics {
        let total_duration_ms = self.started_at.map_or(0, |start| {
            let end = self.ended_at.unwrap_or_else(Utc::now);
            u64::try_from((end - start).num_milliseconds()).unwrap_or(0)
        });

        RetryMetrics {
            total_rounds: self.total_rounds,
            successful_rounds: self.successful_rounds,
            failed_rounds: self.failed_rounds,
            total_retries: self.total_retries,
            successful_retries: self.successful_retries,
            failed_retries: self.failed_retries,
            unique_scenarios: self.scenarios.len(),
            total_duration_ms,
        }
    }
}

/// Aggregates statistics over one rerun session.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    state: Mutex<MetricsState>,
}

impl MetricsCollector {
    /// Create an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Session boundaries
    // =========================================================================

    /// Clear all prior state and timestamp the session start.
    pub fn start_session(&self) {
        let mut state = self.state.lock();
        *state = MetricsState {
            started_at: Some(Utc::now()),
            ..MetricsState::default()
        };
        info!("Starting retry metrics collection session");
    }

    /// Timestamp the session end.
    pub fn end_session(&self) {
        self.state.lock().ended_at = Some(Utc::now());
        info!("Ending retry metrics collection session");
    }

    // =========================================================================
    // Rounds
    // =========================================================================

    /// Open the metrics record for `round`.
    ///
    /// Restarting a round that is already tracked resets its record in place.
    pub fn record_round_start(&self, round: u32, max_rounds: u32) {
        let mut state = self.state.lock();
        match state.rounds.iter_mut().find(|r| r.round == round) {
            Some(existing) => *existing = RoundMetrics::started(round, max_rounds),
            None => {
                state.rounds.push(RoundMetrics::started(round, max_rounds));
                state.total_rounds += 1;
            }
        }
        debug!("Recording round {} start", round);
    }

    /// Finalize the metrics record for `round`.
    ///
    /// A round that was never started is created on the spot, backdated by
    /// `duration_ms`.
    pub fn record_round_end(
        &self,
        round: u32,
        exit_code: i32,
        duration_ms: u64,
        passed: u32,
        failed: u32,
        retried_passed: u32,
    ) {
        let mut state = self.state.lock();

        let index = match state.rounds.iter().position(|r| r.round == round) {
            Some(index) => index,
            None => {
                let mut metrics = RoundMetrics::started(round, round);
                let millis = i64::try_from(duration_ms).unwrap_or(i64::MAX);
                if let Some(start) = metrics
                    .start_time
                    .checked_sub_signed(chrono::Duration::milliseconds(millis))
                {
                    metrics.start_time = start;
                }
                state.rounds.push(metrics);
                state.total_rounds += 1;
                state.rounds.len() - 1
            }
        };

        state.rounds[index].finalize(exit_code, duration_ms, passed, failed, retried_passed);
        if exit_code == 0 {
            state.successful_rounds += 1;
        } else {
            state.failed_rounds += 1;
        }

        info!(
            "Round {} completed - duration: {}ms, passed: {}, failed: {}, retried passed: {}",
            round, duration_ms, passed, failed, retried_passed
        );
    }

    // =========================================================================
    // Scenarios
    // =========================================================================

    /// Record one retry attempt of a scenario.
    pub fn record_scenario_retry(
        &self,
        scenario_id: &str,
        attempt: u32,
        duration_ms: u64,
        success: bool,
    ) {
        let mut state = self.state.lock();
        state
            .scenarios
            .entry(scenario_id.to_string())
            .or_insert_with(|| ScenarioMetrics::new(scenario_id))
            .record_attempt(attempt, duration_ms, success);

        state.total_retries += 1;
        if success {
            state.successful_retries += 1;
        } else {
            state.failed_retries += 1;
        }

        debug!(
            "Scenario {} attempt {} {} - duration: {}ms",
            scenario_id,
            attempt,
            if success { "success" } else { "failure" },
            duration_ms
        );
    }

    /// Record why a scenario attempt failed.
    pub fn record_scenario_failure(
        &self,
        scenario_id: &str,
        attempt: u32,
        error_type: &str,
        error_message: &str,
    ) {
        let mut state = self.state.lock();
        state
            .scenarios
            .entry(scenario_id.to_string())
            .or_insert_with(|| ScenarioMetrics::new(scenario_id))
            .record_failure(attempt, error_type, error_message);
        *state
            .exception_type_counts
            .entry(error_type.to_string())
            .or_insert(0) += 1;

        debug!(
            "Scenario {} attempt {} failure - type: {}, message: {}",
            scenario_id, attempt, error_type, error_message
        );
    }

    /// Record a delay waited before a retry.
    pub fn record_retry_delay(&self, delay_ms: u64) {
        self.state.lock().delays_ms.push(delay_ms);
        debug!("Recorded retry delay: {}ms", delay_ms);
    }

    // =========================================================================
    // Projections
    // =========================================================================

    /// Session totals.
    #[must_use]
    pub fn overall_metrics(&self) -> RetryMetrics {
        self.state.lock().overall()
    }

    /// Failure counts per error type.
    #[must_use]
    pub fn exception_type_counts(&self) -> HashMap<String, usize> {
        self.state.lock().exception_type_counts.clone()
    }

    /// Share of failures per error type, in percent. Empty when none recorded.
    #[must_use]
    pub fn exception_type_percentages(&self) -> HashMap<String, f64> {
        let state = self.state.lock();
        let total: usize = state.exception_type_counts.values().sum();
        state
            .exception_type_counts
            .iter()
            .map(|(error_type, count)| (error_type.clone(), percentage(*count, total)))
            .collect()
    }

    /// Min/max/avg/total over recorded retry delays.
    #[must_use]
    pub fn delay_statistics(&self) -> DelayStatistics {
        DelayStatistics::from_measurements(&self.state.lock().delays_ms)
    }

    /// Snapshot of every scenario record.
    #[must_use]
    pub fn scenario_metrics(&self) -> HashMap<String, ScenarioMetrics> {
        self.state.lock().scenarios.clone()
    }

    /// Snapshot of every round record, in start order.
    #[must_use]
    pub fn round_metrics(&self) -> Vec<RoundMetrics> {
        self.state.lock().rounds.clone()
    }

    /// Human-readable session report.
    #[must_use]
    pub fn formatted_summary(&self) -> String {
        let state = self.state.lock();
        let metrics = state.overall();

        let mut out = String::new();
        let _ = writeln!(out);
        let _ = writeln!(out, "========================================");
        let _ = writeln!(out, "         Retry Metrics Summary");
        let _ = writeln!(out, "========================================");
        let _ = writeln!(out, "Total rounds:        {}", metrics.total_rounds);
        let _ = writeln!(out, "Successful rounds:   {}", metrics.successful_rounds);
        let _ = writeln!(out, "Failed rounds:       {}", metrics.failed_rounds);
        let _ = writeln!(out, "Round success rate:  {}", metrics.formatted_round_success_rate());
        let _ = writeln!(out, "Total retries:       {}", metrics.total_retries);
        let _ = writeln!(out, "Successful retries:  {}", metrics.successful_retries);
        let _ = writeln!(out, "Failed retries:      {}", metrics.failed_retries);
        let _ = writeln!(out, "Retry success rate:  {}", metrics.formatted_retry_success_rate());
        let _ = writeln!(out, "Scenarios involved:  {}", metrics.unique_scenarios);
        let _ = writeln!(out, "Total duration:      {} ms", metrics.total_duration_ms);
        let _ = writeln!(out, "========================================");

        let mut unresolved: Vec<&ScenarioMetrics> = state
            .scenarios
            .values()
            .filter(|s| !s.is_ultimately_successful())
            .collect();
        unresolved.sort_by(|a, b| {
            b.retry_count()
                .cmp(&a.retry_count())
                .then_with(|| a.scenario_id.cmp(&b.scenario_id))
        });

        if !unresolved.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "Failed scenarios (by retry count):");
            for scenario in unresolved.iter().take(SUMMARY_TOP_SCENARIOS) {
                let _ = writeln!(
                    out,
                    "  - {}: retried {} times",
                    scenario.scenario_id,
                    scenario.retry_count()
                );
            }
        }

        out
    }
}
