//! Live progress reporting for a multi-round rerun session.
//!
//! The reporter tracks the current round and scenario counters, pushes
//! snapshots to an optional [`ProgressListener`], and runs one periodic
//! tick task that logs a progress line. Several OS processes may hold a
//! reporter for the same logical session (a parent runner and a spawned
//! rerun process), so the periodic line is only emitted by the process
//! named in the round lock file.
//!
//! # Lifecycle
//!
//! ```text
//! Idle ──start_session──> SessionActive ──start_round──> RoundActive
//!                              ^                            │  ^
//!                              │                  end_round │  │ start_round
//!                              │                            v  │
//!                         start_session <── SessionEnded <── end_session
//! ```
//!
//! Every `start_session`/`start_round` fully stops the previous tick task
//! before spawning the next, so two periodic loops never run at once.

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::round_lock::{RoundLockFile, RoundOwnership};
use crate::rounds::RerunStatistics;

/// Default period of the progress tick.
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(10);

/// Cells in the textual progress bar.
const PROGRESS_BAR_WIDTH: usize = 20;

/// How long `end_session` waits for the tick task before aborting it.
const SESSION_STOP_TIMEOUT: Duration = Duration::from_secs(1);

/// How long re-arming waits for the previous tick task before aborting it.
const REARM_STOP_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================================================
// Snapshots
// ============================================================================

/// Point-in-time view of session progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressInfo {
    /// Round in progress; 0 before the first round.
    pub current_round: u32,
    /// Rounds planned for the session.
    pub max_rounds: u32,
    /// Scenarios scheduled in the current round.
    pub total_scenarios: u32,
    /// Scenarios finished in the current round.
    pub completed_scenarios: u32,
    /// Scenarios passed in the current round.
    pub passed_scenarios: u32,
    /// Scenarios failed in the current round.
    pub failed_scenarios: u32,
    /// Milliseconds since the session started.
    pub elapsed_ms: u64,
    /// Overall progress, 0 to 100.
    pub overall_progress: f64,
    /// Whether the rerun process is executing.
    pub is_running: bool,
}

impl ProgressInfo {
    /// Overall progress with two decimals, e.g. `41.67%`.
    #[must_use]
    pub fn formatted_progress(&self) -> String {
        format!("{:.2}%", self.overall_progress)
    }

    /// `current/max`, e.g. `2/3`.
    #[must_use]
    pub fn round_description(&self) -> String {
        format!("{}/{}", self.current_round, self.max_rounds)
    }
}

/// Reported when a round ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundProgress {
    /// Round that ended.
    pub round: u32,
    /// Rounds planned for the session.
    pub max_rounds: u32,
    /// Scenarios that passed.
    pub passed: u32,
    /// Scenarios that failed.
    pub failed: u32,
    /// Scenarios that passed after a retry.
    pub retried_passed: u32,
    /// Round wall time in milliseconds.
    pub duration_ms: u64,
    /// Scenario completion within the round, 0 to 100.
    pub progress: f64,
}

impl RoundProgress {
    #[must_use]
    pub fn formatted_progress(&self) -> String {
        format!("{:.2}%", self.progress)
    }
}

/// Reported when the session ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionProgress {
    /// Rounds planned for the session.
    pub max_rounds: u32,
    /// Rounds executed by the rerun process.
    pub total_rounds: u32,
    /// Scenario passes across all rounds.
    pub success_count: u32,
    /// Scenario failures across all rounds.
    pub failure_count: u32,
    /// Passes as a percentage of executed scenarios.
    pub success_rate: f64,
    /// Session wall time in milliseconds.
    pub total_duration_ms: u64,
    /// Scenarios scheduled in the last round.
    pub total_scenarios: u32,
    /// Scenarios passed in the last round.
    pub passed_scenarios: u32,
    /// Scenarios failed in the last round.
    pub failed_scenarios: u32,
}

impl SessionProgress {
    #[must_use]
    pub fn formatted_success_rate(&self) -> String {
        format!("{:.2}%", self.success_rate)
    }
}

// ============================================================================
// Collaborators
// ============================================================================

/// Receives progress notifications.
///
/// Errors are logged and otherwise ignored; a failing listener never stops
/// reporting.
pub trait ProgressListener: Send + Sync {
    fn on_progress_update(&self, _progress: &ProgressInfo) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_round_complete(&self, _round: &RoundProgress) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_session_complete(&self, _session: &SessionProgress) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Supplies aggregate statistics of the process executing reruns.
pub trait RerunStatisticsSource: Send + Sync {
    /// Aggregate over all executed rounds.
    fn statistics(&self) -> RerunStatistics;

    /// Whether a rerun is currently executing.
    fn is_rerun_running(&self) -> bool;
}

// ============================================================================
// Shared State
// ============================================================================

#[derive(Default)]
struct Counters {
    current_round: AtomicU32,
    max_rounds: AtomicU32,
    total_scenarios: AtomicU32,
    completed_scenarios: AtomicU32,
    passed_scenarios: AtomicU32,
    failed_scenarios: AtomicU32,
}

/// State read by both the reporter and its tick task.
struct Shared {
    counters: Counters,
    reporting: AtomicBool,
    session_start: Mutex<Option<DateTime<Utc>>>,
    listener: RwLock<Option<Arc<dyn ProgressListener>>>,
    source: Arc<dyn RerunStatisticsSource>,
}

impl Shared {
    fn elapsed_ms(&self) -> u64 {
        self.session_start.lock().map_or(0, |start| {
            u64::try_from((Utc::now() - start).num_milliseconds()).unwrap_or(0)
        })
    }

    fn overall_progress(&self) -> f64 {
        let c = &self.counters;
        let max = c.max_rounds.load(Ordering::SeqCst);
        if max == 0 {
            return 0.0;
        }
        let round_progress = f64::from(c.current_round.load(Ordering::SeqCst)) * 100.0 / f64::from(max);

        let total = c.total_scenarios.load(Ordering::SeqCst);
        if total > 0 {
            let scenario_progress =
                f64::from(c.completed_scenarios.load(Ordering::SeqCst)) * 100.0 / f64::from(total);
            (round_progress + scenario_progress) / 2.0
        } else {
            round_progress
        }
    }

    fn round_progress(&self) -> f64 {
        let total = self.counters.total_scenarios.load(Ordering::SeqCst);
        if total == 0 {
            return 0.0;
        }
        f64::from(self.counters.completed_scenarios.load(Ordering::SeqCst)) * 100.0
            / f64::from(total)
    }

    fn progress_info(&self) -> ProgressInfo {
        let c = &self.counters;
        ProgressInfo {
            current_round: c.current_round.load(Ordering::SeqCst),
            max_rounds: c.max_rounds.load(Ordering::SeqCst),
            total_scenarios: c.total_scenarios.load(Ordering::SeqCst),
            completed_scenarios: c.completed_scenarios.load(Ordering::SeqCst),
            passed_scenarios: c.passed_scenarios.load(Ordering::SeqCst),
            failed_scenarios: c.failed_scenarios.load(Ordering::SeqCst),
            elapsed_ms: self.elapsed_ms(),
            overall_progress: self.overall_progress(),
            is_running: self.source.is_rerun_running(),
        }
    }

    fn listener(&self) -> Option<Arc<dyn ProgressListener>> {
        self.listener.read().clone()
    }

    fn notify_progress_update(&self, progress: &ProgressInfo) {
        if let Some(listener) = self.listener() {
            if let Err(e) = listener.on_progress_update(progress) {
                warn!("Error notifying progress update: {}", e);
            }
        }
    }

    fn notify_round_complete(&self, round: &RoundProgress) {
        if let Some(listener) = self.listener() {
            if let Err(e) = listener.on_round_complete(round) {
                warn!("Error notifying round complete: {}", e);
            }
        }
    }

    fn notify_session_complete(&self, session: &SessionProgress) {
        if let Some(listener) = self.listener() {
            if let Err(e) = listener.on_session_complete(session) {
                warn!("Error notifying session complete: {}", e);
            }
        }
    }

    async fn periodic_tick(&self, lock: &RoundLockFile, process_id: u32) {
        if !self.reporting.load(Ordering::SeqCst) {
            return;
        }

        let reader = lock.clone();
        let owner = match tokio::task::spawn_blocking(move || reader.read()).await {
            Ok(owner) => owner,
            Err(e) => {
                warn!("Round lock read task failed: {}", e);
                None
            }
        };

        match owner {
            Some(owner) if owner.is_owned_by(process_id) => {
                let progress = self.progress_info();
                log_progress(&progress);
                self.notify_progress_update(&progress);
            }
            owner => {
                debug!(
                    "Skipping progress report - not current process owner, pid={}, owner={:?}",
                    process_id,
                    owner.map(|o| o.process_id)
                );
            }
        }
    }
}

// ============================================================================
// Tick Task
// ============================================================================

/// Handle on the running periodic task.
struct Ticker {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl Ticker {
    fn spawn(shared: Arc<Shared>, lock: RoundLockFile, process_id: u32, period: Duration) -> Self {
        let (stop, mut stopped) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            loop {
                tokio::select! {
                    _ = &mut stopped => break,
                    _ = interval.tick() => shared.periodic_tick(&lock, process_id).await,
                }
            }
        });

        Self { stop, handle }
    }

    async fn shutdown(mut self, wait: Duration) {
        let _ = self.stop.send(());
        if tokio::time::timeout(wait, &mut self.handle).await.is_err() {
            warn!("Progress tick task did not stop within {:?}, aborting", wait);
            self.handle.abort();
        }
    }
}

// ============================================================================
// Reporter
// ============================================================================

/// Tracks and reports progress of a rerun session.
pub struct ProgressReporter {
    shared: Arc<Shared>,
    lock: RoundLockFile,
    process_id: u32,
    interval: Duration,
    ticker: Mutex<Option<Ticker>>,
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("lock", &self.lock)
            .field("process_id", &self.process_id)
            .field("interval", &self.interval)
            .field("progress", &self.shared.progress_info())
            .finish()
    }
}

impl ProgressReporter {
    /// Reporter pulling final statistics from `source`.
    pub fn new(source: Arc<dyn RerunStatisticsSource>) -> Self {
        Self {
            shared: Arc::new(Shared {
                counters: Counters::default(),
                reporting: AtomicBool::new(false),
                session_start: Mutex::new(None),
                listener: RwLock::new(None),
                source,
            }),
            lock: RoundLockFile::default(),
            process_id: std::process::id(),
            interval: DEFAULT_REPORT_INTERVAL,
            ticker: Mutex::new(None),
        }
    }

    /// Set the tick period.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the round lock location.
    #[must_use]
    pub fn with_lock_path(mut self, path: impl AsRef<Path>) -> Self {
        self.lock = RoundLockFile::new(path);
        self
    }

    /// Report as a different process id.
    #[must_use]
    pub fn with_process_id(mut self, process_id: u32) -> Self {
        self.process_id = process_id;
        self
    }

    /// Install or replace the listener.
    pub fn set_progress_listener(&self, listener: Arc<dyn ProgressListener>) {
        *self.shared.listener.write() = Some(listener);
    }

    /// Remove the listener.
    pub fn clear_progress_listener(&self) {
        *self.shared.listener.write() = None;
    }

    /// Process id this reporter claims rounds as.
    #[must_use]
    pub fn process_id(&self) -> u32 {
        self.process_id
    }

    /// The round lock file.
    #[must_use]
    pub fn lock_file(&self) -> &RoundLockFile {
        &self.lock
    }

    /// Whether a periodic tick task is running.
    #[must_use]
    pub fn has_active_timer(&self) -> bool {
        self.ticker
            .lock()
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }

    /// Whether a session is being reported.
    #[must_use]
    pub fn is_reporting(&self) -> bool {
        self.shared.reporting.load(Ordering::SeqCst)
    }

    /// Whether the lock names this process as owner.
    #[must_use]
    pub fn is_current_process_owner(&self) -> bool {
        self.lock
            .read()
            .is_some_and(|owner| owner.is_owned_by(self.process_id))
    }

    /// Current progress snapshot.
    #[must_use]
    pub fn progress_info(&self) -> ProgressInfo {
        self.shared.progress_info()
    }

    fn claim_round(&self, round: u32) {
        let ownership = RoundOwnership::claim(self.process_id, round);
        if let Err(e) = self.lock.write(&ownership) {
            warn!("Failed to write round lock file: {}", e);
        }
    }

    async fn stop_ticker(&self, wait: Duration) {
        let ticker = self.ticker.lock().take();
        if let Some(ticker) = ticker {
            ticker.shutdown(wait).await;
        }
    }

    fn start_ticker(&self) {
        let ticker = Ticker::spawn(
            Arc::clone(&self.shared),
            self.lock.clone(),
            self.process_id,
            self.interval,
        );
        *self.ticker.lock() = Some(ticker);
    }

    // =========================================================================
    // Session and round boundaries
    // =========================================================================

    /// Begin a session: reset counters, claim round 0 and start ticking.
    pub async fn start_session(&self, max_rounds: u32) {
        self.stop_ticker(REARM_STOP_TIMEOUT).await;

        let c = &self.shared.counters;
        *self.shared.session_start.lock() = Some(Utc::now());
        c.current_round.store(0, Ordering::SeqCst);
        c.max_rounds.store(max_rounds, Ordering::SeqCst);
        c.total_scenarios.store(0, Ordering::SeqCst);
        c.completed_scenarios.store(0, Ordering::SeqCst);
        c.passed_scenarios.store(0, Ordering::SeqCst);
        c.failed_scenarios.store(0, Ordering::SeqCst);
        self.shared.reporting.store(true, Ordering::SeqCst);

        self.claim_round(0);
        self.start_ticker();

        info!("Starting retry progress reporting, max rounds: {}", max_rounds);
        self.shared.notify_progress_update(&self.shared.progress_info());
    }

    /// Enter `round`: reset round counters, claim the round and re-arm the tick.
    ///
    /// A previously configured round limit is kept; `max_rounds` only applies
    /// when none is set.
    pub async fn start_round(&self, round: u32, max_rounds: u32) {
        {
            let mut start = self.shared.session_start.lock();
            if start.is_none() {
                *start = Some(Utc::now());
            }
        }

        let c = &self.shared.counters;
        c.current_round.store(round, Ordering::SeqCst);
        if c.max_rounds.load(Ordering::SeqCst) == 0 {
            c.max_rounds.store(max_rounds, Ordering::SeqCst);
        }
        c.completed_scenarios.store(0, Ordering::SeqCst);
        c.passed_scenarios.store(0, Ordering::SeqCst);
        c.failed_scenarios.store(0, Ordering::SeqCst);

        self.stop_ticker(REARM_STOP_TIMEOUT).await;
        self.shared.reporting.store(true, Ordering::SeqCst);
        self.claim_round(round);
        self.start_ticker();

        info!(
            "Starting retry round {}/{}",
            round,
            c.max_rounds.load(Ordering::SeqCst)
        );
        self.shared.notify_progress_update(&self.shared.progress_info());
    }

    /// Close `round` and notify the listener.
    pub fn end_round(
        &self,
        round: u32,
        passed: u32,
        failed: u32,
        retried_passed: u32,
        duration_ms: u64,
    ) {
        let c = &self.shared.counters;
        c.passed_scenarios.store(passed, Ordering::SeqCst);
        c.failed_scenarios.store(failed, Ordering::SeqCst);

        let round_progress = RoundProgress {
            round,
            max_rounds: c.max_rounds.load(Ordering::SeqCst),
            passed,
            failed,
            retried_passed,
            duration_ms,
            progress: self.shared.round_progress(),
        };
        self.shared.notify_round_complete(&round_progress);

        info!(
            "Round {} completed - passed: {}, failed: {}, retried passed: {}, duration: {}ms",
            round, passed, failed, retried_passed, duration_ms
        );
    }

    /// Stop ticking, release the lock and report final statistics.
    ///
    /// Safe to call repeatedly or without an active session; the listener
    /// only hears about sessions that were started.
    pub async fn end_session(&self) {
        self.stop_ticker(SESSION_STOP_TIMEOUT).await;
        self.shared.reporting.store(false, Ordering::SeqCst);

        if let Err(e) = self.lock.remove() {
            warn!("Failed to delete round lock file: {}", e);
        }

        let total_duration_ms = self.shared.elapsed_ms();
        let Some(_) = self.shared.session_start.lock().take() else {
            debug!("end_session called without an active session");
            return;
        };

        info!("Ending retry progress reporting");

        let stats = self.shared.source.statistics();
        let c = &self.shared.counters;
        let session = SessionProgress {
            max_rounds: c.max_rounds.load(Ordering::SeqCst),
            total_rounds: stats.total_count,
            success_count: stats.success_count,
            failure_count: stats.failure_count,
            success_rate: stats.success_rate,
            total_duration_ms,
            total_scenarios: c.total_scenarios.load(Ordering::SeqCst),
            passed_scenarios: c.passed_scenarios.load(Ordering::SeqCst),
            failed_scenarios: c.failed_scenarios.load(Ordering::SeqCst),
        };
        self.shared.notify_session_complete(&session);
    }

    // =========================================================================
    // Scenario updates
    // =========================================================================

    /// Overwrite scenario counters and notify immediately.
    pub fn update_scenario_progress(&self, completed: u32, total: u32, passed: u32, failed: u32) {
        let c = &self.shared.counters;
        c.completed_scenarios.store(completed, Ordering::SeqCst);
        c.total_scenarios.store(total, Ordering::SeqCst);
        c.passed_scenarios.store(passed, Ordering::SeqCst);
        c.failed_scenarios.store(failed, Ordering::SeqCst);

        self.shared.notify_progress_update(&self.shared.progress_info());
    }

    /// Count one finished scenario and notify immediately.
    pub fn record_scenario_result(&self, passed: bool) {
        let c = &self.shared.counters;
        if passed {
            c.passed_scenarios.fetch_add(1, Ordering::SeqCst);
        } else {
            c.failed_scenarios.fetch_add(1, Ordering::SeqCst);
        }
        c.completed_scenarios.fetch_add(1, Ordering::SeqCst);

        self.shared.notify_progress_update(&self.shared.progress_info());
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        if let Some(ticker) = self.ticker.get_mut().take() {
            ticker.handle.abort();
        }
    }
}

// ============================================================================
// Formatting
// ============================================================================

fn log_progress(progress: &ProgressInfo) {
    let status = if progress.is_running { "RUNNING" } else { "PAUSED" };
    info!(
        "[Progress] {} {} | Round: {} | Scenarios: {}/{} | Passed: {} | Failed: {} | Elapsed: {}",
        status,
        progress_bar(progress.overall_progress),
        progress.round_description(),
        progress.completed_scenarios,
        progress.total_scenarios,
        progress.passed_scenarios,
        progress.failed_scenarios,
        format_duration(progress.elapsed_ms)
    );
}

/// Text bar such as `[██████████░░░░░░░░░░] 50.0%`.
#[must_use]
pub fn progress_bar(progress: f64) -> String {
    let clamped = progress.clamp(0.0, 100.0);
    let filled = ((clamped * PROGRESS_BAR_WIDTH as f64 / 100.0) as usize).min(PROGRESS_BAR_WIDTH);
    format!(
        "[{}{}] {:.1}%",
        "█".repeat(filled),
        "░".repeat(PROGRESS_BAR_WIDTH - filled),
        progress
    )
}

/// `Xm Ys` above a minute, `Ys` below.
#[must_use]
pub fn format_duration(ms: u64) -> String {
    let seconds = ms / 1000;
    let minutes = seconds / 60;
    let seconds = seconds % 60;
    if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rounds::{RoundLedger, RoundResult};
    use crate::testing::RecordingListener;
    use tempfile::TempDir;

    const FAST: Duration = Duration::from_millis(20);

    fn reporter(temp_dir: &TempDir, ledger: Arc<RoundLedger>) -> ProgressReporter {
        ProgressReporter::new(ledger)
            .with_lock_path(temp_dir.path().join("target").join("reporter-round.lock"))
            .with_process_id(4242)
    }

    fn setup() -> (ProgressReporter, Arc<RecordingListener>, Arc<RoundLedger>, TempDir) {
        let temp_dir = TempDir::new().expect("create temp dir");
        let ledger = Arc::new(RoundLedger::new());
        let reporter = reporter(&temp_dir, Arc::clone(&ledger));
        let listener = Arc::new(RecordingListener::new());
        reporter.set_progress_listener(listener.clone());
        (reporter, listener, ledger, temp_dir)
    }

    // -------------------------------------------------------------------------
    // Formatting tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_progress_bar() {
        assert_eq!(progress_bar(0.0), format!("[{}] 0.0%", "░".repeat(20)));
        assert_eq!(
            progress_bar(50.0),
            format!("[{}{}] 50.0%", "█".repeat(10), "░".repeat(10))
        );
        assert_eq!(progress_bar(100.0), format!("[{}] 100.0%", "█".repeat(20)));
        assert!(progress_bar(104.0).starts_with(&format!("[{}]", "█".repeat(20))));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "0s");
        assert_eq!(format_duration(59_999), "59s");
        assert_eq!(format_duration(65_000), "1m 5s");
    }

    #[test]
    fn test_snapshot_formatting() {
        let info = ProgressInfo {
            current_round: 2,
            max_rounds: 3,
            total_scenarios: 0,
            completed_scenarios: 0,
            passed_scenarios: 0,
            failed_scenarios: 0,
            elapsed_ms: 0,
            overall_progress: 200.0 / 3.0,
            is_running: false,
        };
        assert_eq!(info.formatted_progress(), "66.67%");
        assert_eq!(info.round_description(), "2/3");
    }

    // -------------------------------------------------------------------------
    // Progress computation tests
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_overall_progress_averages_round_and_scenarios() {
        let (reporter, _listener, _ledger, _temp_dir) = setup();
        reporter.start_session(4).await;
        reporter.start_round(1, 4).await;
        assert_eq!(reporter.progress_info().overall_progress, 25.0);

        reporter.update_scenario_progress(5, 10, 4, 1);
        // (25% + 50%) / 2
        assert_eq!(reporter.progress_info().overall_progress, 37.5);
        reporter.end_session().await;
    }

    #[tokio::test]
    async fn test_zero_max_rounds_reports_no_progress() {
        let (reporter, _listener, _ledger, _temp_dir) = setup();
        reporter.start_session(0).await;
        reporter.update_scenario_progress(5, 10, 5, 0);
        assert_eq!(reporter.progress_info().overall_progress, 0.0);
        reporter.end_session().await;
    }

    #[tokio::test]
    async fn test_start_round_keeps_configured_max_rounds() {
        let (reporter, _listener, _ledger, _temp_dir) = setup();
        reporter.start_session(3).await;
        reporter.start_round(2, 9).await;
        assert_eq!(reporter.progress_info().max_rounds, 3);
        reporter.end_session().await;

        let (fresh, _listener, _ledger, _temp_dir) = setup();
        fresh.start_round(1, 5).await;
        assert_eq!(fresh.progress_info().max_rounds, 5);
        fresh.end_session().await;
    }

    #[tokio::test]
    async fn test_start_round_resets_round_counters() {
        let (reporter, _listener, _ledger, _temp_dir) = setup();
        reporter.start_session(2).await;
        reporter.update_scenario_progress(3, 6, 2, 1);
        reporter.start_round(2, 2).await;

        let info = reporter.progress_info();
        assert_eq!(info.current_round, 2);
        assert_eq!(info.completed_scenarios, 0);
        assert_eq!(info.passed_scenarios, 0);
        assert_eq!(info.failed_scenarios, 0);
        assert_eq!(info.total_scenarios, 6);
        reporter.end_session().await;
    }

    // -------------------------------------------------------------------------
    // Notification tests
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_scenario_updates_notify_immediately() {
        let (reporter, listener, _ledger, _temp_dir) = setup();
        reporter.start_session(1).await;
        assert_eq!(listener.progress_updates().len(), 1);

        reporter.update_scenario_progress(0, 3, 0, 0);
        reporter.record_scenario_result(true);
        reporter.record_scenario_result(false);

        let updates = listener.progress_updates();
        assert_eq!(updates.len(), 4);
        let last = updates.last().unwrap();
        assert_eq!(last.completed_scenarios, 2);
        assert_eq!(last.passed_scenarios, 1);
        assert_eq!(last.failed_scenarios, 1);
        reporter.end_session().await;
    }

    #[tokio::test]
    async fn test_end_round_reports_round_progress() {
        let (reporter, listener, _ledger, _temp_dir) = setup();
        reporter.start_session(2).await;
        reporter.start_round(1, 2).await;
        reporter.update_scenario_progress(4, 8, 3, 1);
        reporter.end_round(1, 6, 2, 1, 1500);

        let rounds = listener.round_completions();
        assert_eq!(rounds.len(), 1);
        assert_eq!(rounds[0].round, 1);
        assert_eq!(rounds[0].max_rounds, 2);
        assert_eq!(rounds[0].retried_passed, 1);
        assert_eq!(rounds[0].duration_ms, 1500);
        assert_eq!(rounds[0].formatted_progress(), "50.00%");
        assert_eq!(reporter.progress_info().passed_scenarios, 6);
        reporter.end_session().await;
    }

    #[tokio::test]
    async fn test_end_session_reports_rerun_statistics() {
        let (reporter, listener, ledger, _temp_dir) = setup();
        reporter.start_session(2).await;
        ledger.record(RoundResult::new(1, 8, 2, 100));
        ledger.record(RoundResult::new(2, 2, 0, 50));
        reporter.end_session().await;

        let sessions = listener.session_completions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].max_rounds, 2);
        assert_eq!(sessions[0].total_rounds, 2);
        assert_eq!(sessions[0].success_count, 10);
        assert_eq!(sessions[0].failure_count, 2);
        assert_eq!(sessions[0].formatted_success_rate(), "83.33%");
    }

    #[tokio::test]
    async fn test_end_session_is_idempotent() {
        let (reporter, listener, _ledger, _temp_dir) = setup();
        reporter.end_session().await;
        assert!(listener.session_completions().is_empty());

        reporter.start_session(1).await;
        reporter.end_session().await;
        reporter.end_session().await;
        assert_eq!(listener.session_completions().len(), 1);
        assert!(!reporter.is_reporting());
    }

    #[tokio::test]
    async fn test_failing_listener_does_not_stop_reporting() {
        let (reporter, _listener, _ledger, _temp_dir) = setup();
        let failing = Arc::new(RecordingListener::failing());
        reporter.set_progress_listener(failing.clone());

        reporter.start_session(1).await;
        reporter.record_scenario_result(true);
        reporter.end_round(1, 1, 0, 0, 10);
        reporter.end_session().await;

        assert_eq!(failing.progress_updates().len(), 2);
        assert_eq!(failing.round_completions().len(), 1);
        assert_eq!(failing.session_completions().len(), 1);
    }

    // -------------------------------------------------------------------------
    // Lock and timer tests
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_session_claims_and_releases_lock() {
        let (reporter, _listener, _ledger, _temp_dir) = setup();
        reporter.start_session(3).await;

        let owner = reporter.lock_file().read().expect("lock written");
        assert_eq!(owner.process_id, 4242);
        assert_eq!(owner.round, 0);
        assert!(reporter.is_current_process_owner());

        reporter.start_round(2, 3).await;
        assert_eq!(reporter.lock_file().read().unwrap().round, 2);

        reporter.end_session().await;
        assert!(!reporter.lock_file().exists());
        assert!(!reporter.is_current_process_owner());
    }

    #[tokio::test]
    async fn test_end_session_leaves_no_lock_artifacts() {
        let (reporter, _listener, _ledger, temp_dir) = setup();
        reporter.start_session(2).await;
        reporter.end_session().await;

        let leftovers: Vec<_> = std::fs::read_dir(temp_dir.path().join("target"))
            .expect("lock directory exists")
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert!(leftovers.is_empty(), "left behind: {leftovers:?}");
    }

    #[tokio::test]
    async fn test_owner_emits_periodic_updates() {
        let (reporter, listener, _ledger, _temp_dir) = setup();
        let reporter = reporter.with_interval(FAST);
        reporter.set_progress_listener(listener.clone());

        reporter.start_session(2).await;
        assert!(reporter.has_active_timer());
        tokio::time::sleep(FAST * 8).await;
        reporter.end_session().await;

        // One immediate update plus at least two ticks.
        assert!(listener.progress_updates().len() >= 3);
        assert!(!reporter.has_active_timer());
    }

    #[tokio::test]
    async fn test_non_owner_skips_periodic_updates() {
        let (reporter, listener, _ledger, _temp_dir) = setup();
        let reporter = reporter.with_interval(FAST);
        reporter.set_progress_listener(listener.clone());

        reporter.start_session(2).await;
        reporter
            .lock_file()
            .write(&RoundOwnership::claim(1, 0))
            .unwrap();
        tokio::time::sleep(FAST * 6).await;

        assert_eq!(listener.progress_updates().len(), 1);
        reporter.end_session().await;
    }

    #[tokio::test]
    async fn test_unreadable_lock_means_no_owner() {
        let (reporter, listener, _ledger, _temp_dir) = setup();
        let reporter = reporter.with_interval(FAST);
        reporter.set_progress_listener(listener.clone());

        reporter.start_session(2).await;
        std::fs::write(reporter.lock_file().path(), "garbage").unwrap();
        tokio::time::sleep(FAST * 6).await;

        assert!(!reporter.is_current_process_owner());
        assert_eq!(listener.progress_updates().len(), 1);
        reporter.end_session().await;
    }

    #[tokio::test]
    async fn test_rearm_keeps_single_timer() {
        let (reporter, _listener, _ledger, _temp_dir) = setup();
        let reporter = reporter.with_interval(FAST);

        reporter.start_session(3).await;
        reporter.start_round(1, 3).await;
        reporter.start_round(2, 3).await;
        assert!(reporter.has_active_timer());

        reporter.end_session().await;
        assert!(!reporter.has_active_timer());
    }
}
