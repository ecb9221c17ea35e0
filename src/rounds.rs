//! Per-round outcomes of the rerun process and their aggregate.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

use crate::progress::RerunStatisticsSource;

/// Outcome of one rerun round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundResult {
    /// Round number (1-indexed).
    pub round_number: u32,
    /// Scenarios that passed in the round.
    pub success_count: u32,
    /// Scenarios that failed in the round.
    pub failure_count: u32,
    /// Round wall time in milliseconds.
    pub duration_ms: u64,
}

impl RoundResult {
    #[must_use]
    pub fn new(round_number: u32, success_count: u32, failure_count: u32, duration_ms: u64) -> Self {
        Self {
            round_number,
            success_count,
            failure_count,
            duration_ms,
        }
    }

    /// Scenarios executed in the round.
    #[must_use]
    pub fn total_count(&self) -> u32 {
        self.success_count.saturating_add(self.failure_count)
    }
}

impl fmt::Display for RoundResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RoundResult{{round={}, success={}, failure={}, duration={}ms}}",
            self.round_number, self.success_count, self.failure_count, self.duration_ms
        )
    }
}

/// Aggregate over every recorded round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RerunStatistics {
    /// Rounds recorded.
    pub total_count: u32,
    /// Scenario passes summed across rounds.
    pub success_count: u32,
    /// Scenario failures summed across rounds.
    pub failure_count: u32,
    /// Passes as a percentage of executed scenarios.
    pub success_rate: f64,
}

/// Records round results as the rerun process executes them.
#[derive(Debug, Default)]
pub struct RoundLedger {
    results: Mutex<Vec<RoundResult>>,
    running: AtomicBool,
}

impl RoundLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the rerun process as running.
    pub fn begin(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    /// Mark the rerun process as stopped.
    pub fn finish(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Append a finished round.
    pub fn record(&self, result: RoundResult) {
        info!("{}", result);
        self.results.lock().push(result);
    }

    /// Recorded rounds, in order.
    #[must_use]
    pub fn results(&self) -> Vec<RoundResult> {
        self.results.lock().clone()
    }

    /// Most recent round.
    #[must_use]
    pub fn last(&self) -> Option<RoundResult> {
        self.results.lock().last().copied()
    }

    /// Drop all rounds and stop.
    pub fn clear(&self) {
        self.results.lock().clear();
        self.finish();
    }
}

impl RerunStatisticsSource for RoundLedger {
    fn statistics(&self) -> RerunStatistics {
        let results = self.results.lock();
        let success_count = results
            .iter()
            .fold(0u32, |acc, r| acc.saturating_add(r.success_count));
        let failure_count = results
            .iter()
            .fold(0u32, |acc, r| acc.saturating_add(r.failure_count));
        let executed = f64::from(success_count) + f64::from(failure_count);

        RerunStatistics {
            total_count: u32::try_from(results.len()).unwrap_or(u32::MAX),
            success_count,
            failure_count,
            success_rate: if executed == 0.0 {
                0.0
            } else {
                f64::from(success_count) * 100.0 / executed
            },
        }
    }

    fn is_rerun_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_result_totals_and_display() {
        let result = RoundResult::new(2, 8, 2, 1500);
        assert_eq!(result.total_count(), 10);
        assert_eq!(
            result.to_string(),
            "RoundResult{round=2, success=8, failure=2, duration=1500ms}"
        );
    }

    #[test]
    fn test_empty_ledger_statistics() {
        let ledger = RoundLedger::new();
        assert_eq!(ledger.statistics(), RerunStatistics::default());
        assert!(!ledger.is_rerun_running());
        assert!(ledger.last().is_none());
    }

    #[test]
    fn test_statistics_sum_across_rounds() {
        let ledger = RoundLedger::new();
        ledger.record(RoundResult::new(1, 6, 4, 1000));
        ledger.record(RoundResult::new(2, 3, 1, 400));
        ledger.record(RoundResult::new(3, 1, 0, 100));

        let stats = ledger.statistics();
        assert_eq!(stats.total_count, 3);
        assert_eq!(stats.success_count, 10);
        assert_eq!(stats.failure_count, 5);
        assert!((stats.success_rate - 66.666).abs() < 0.01);
        assert_eq!(ledger.last().unwrap().round_number, 3);
    }

    #[test]
    fn test_counts_saturate_instead_of_overflowing() {
        let huge = RoundResult::new(1, u32::MAX, u32::MAX, 0);
        assert_eq!(huge.total_count(), u32::MAX);

        let ledger = RoundLedger::new();
        ledger.record(huge);
        ledger.record(RoundResult::new(2, 5, 5, 0));

        let stats = ledger.statistics();
        assert_eq!(stats.success_count, u32::MAX);
        assert_eq!(stats.failure_count, u32::MAX);
        assert!((stats.success_rate - 50.0).abs() < 0.001);
    }

    #[test]
    fn test_running_flag_and_clear() {
        let ledger = RoundLedger::new();
        ledger.begin();
        ledger.record(RoundResult::new(1, 1, 0, 10));
        assert!(ledger.is_rerun_running());

        ledger.clear();
        assert!(!ledger.is_rerun_running());
        assert!(ledger.results().is_empty());
    }
}
