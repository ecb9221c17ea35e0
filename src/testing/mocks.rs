//! Test doubles for the progress reporter's collaborators.
//!
//! These record or fake what the reporter talks to, enabling deterministic
//! unit tests of reporting without a real rerun process.

use anyhow::{bail, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::progress::{
    ProgressInfo, ProgressListener, RerunStatisticsSource, RoundProgress, SessionProgress,
};
use crate::rounds::RerunStatistics;

/// Listener that records every notification it receives.
///
/// # Example
///
/// ```rust,ignore
/// let listener = Arc::new(RecordingListener::new());
/// reporter.set_progress_listener(listener.clone());
///
/// reporter.record_scenario_result(true);
/// assert_eq!(listener.progress_updates().len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct RecordingListener {
    progress: Mutex<Vec<ProgressInfo>>,
    rounds: Mutex<Vec<RoundProgress>>,
    sessions: Mutex<Vec<SessionProgress>>,
    fail: bool,
}

impl RecordingListener {
    /// Create a listener that accepts every notification.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a listener that records, then returns an error.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Progress updates received so far.
    pub fn progress_updates(&self) -> Vec<ProgressInfo> {
        self.progress.lock().clone()
    }

    /// Round completions received so far.
    pub fn round_completions(&self) -> Vec<RoundProgress> {
        self.rounds.lock().clone()
    }

    /// Session completions received so far.
    pub fn session_completions(&self) -> Vec<SessionProgress> {
        self.sessions.lock().clone()
    }

    fn outcome(&self, what: &str) -> Result<()> {
        if self.fail {
            bail!("listener rejected {}", what);
        }
        Ok(())
    }
}

impl ProgressListener for RecordingListener {
    fn on_progress_update(&self, progress: &ProgressInfo) -> Result<()> {
        self.progress.lock().push(progress.clone());
        self.outcome("progress update")
    }

    fn on_round_complete(&self, round: &RoundProgress) -> Result<()> {
        self.rounds.lock().push(round.clone());
        self.outcome("round completion")
    }

    fn on_session_complete(&self, session: &SessionProgress) -> Result<()> {
        self.sessions.lock().push(session.clone());
        self.outcome("session completion")
    }
}

/// Statistics source returning canned values.
///
/// # Example
///
/// ```rust,ignore
/// let source = MockStatisticsSource::new()
///     .with_statistics(RerunStatistics { total_count: 2, ..Default::default() })
///     .with_running(true);
/// ```
#[derive(Debug, Default)]
pub struct MockStatisticsSource {
    statistics: RerunStatistics,
    running: AtomicBool,
    calls: AtomicU32,
}

impl MockStatisticsSource {
    /// Create a source reporting empty statistics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the statistics to return.
    #[must_use]
    pub fn with_statistics(mut self, statistics: RerunStatistics) -> Self {
        self.statistics = statistics;
        self
    }

    /// Set whether a rerun is reported as running.
    #[must_use]
    pub fn with_running(self, running: bool) -> Self {
        self.running.store(running, Ordering::SeqCst);
        self
    }

    /// Flip the running flag.
    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    /// How many times statistics were requested.
    pub fn statistics_calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RerunStatisticsSource for MockStatisticsSource {
    fn statistics(&self) -> RerunStatistics {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.statistics
    }

    fn is_rerun_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
