//! Testing infrastructure for rerun-guard.
//!
//! This module provides test doubles and failure fixtures so the controller
//! and reporter can be exercised without a real test runner.
//!
//! # Example
//!
//! ```rust,ignore
//! use rerun_guard::testing::{MockStatisticsSource, RecordingListener};
//!
//! let source = Arc::new(MockStatisticsSource::new().with_running(true));
//! let reporter = ProgressReporter::new(source);
//! reporter.set_progress_listener(Arc::new(RecordingListener::new()));
//! ```

pub mod fixtures;
pub mod mocks;

// Re-export commonly used types
pub use fixtures::*;
pub use mocks::*;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::FailureClassifier;
    use crate::progress::{ProgressListener, ProgressReporter, RerunStatisticsSource};
    use crate::rounds::RerunStatistics;
    use std::sync::Arc;

    // =========================================================================
    // Recording Listener Tests
    // =========================================================================

    #[test]
    fn test_recording_listener_records_in_order() {
        let listener = RecordingListener::new();
        let reporter = ProgressReporter::new(Arc::new(MockStatisticsSource::new()));
        let mut info = reporter.progress_info();

        listener.on_progress_update(&info).unwrap();
        info.current_round = 2;
        listener.on_progress_update(&info).unwrap();

        let updates = listener.progress_updates();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[1].current_round, 2);
        assert!(listener.round_completions().is_empty());
    }

    #[test]
    fn test_failing_listener_still_records() {
        let listener = RecordingListener::failing();
        let reporter = ProgressReporter::new(Arc::new(MockStatisticsSource::new()));
        let result = listener.on_progress_update(&reporter.progress_info());
        assert!(result.is_err());
        assert_eq!(listener.progress_updates().len(), 1);
    }

    // =========================================================================
    // Mock Statistics Source Tests
    // =========================================================================

    #[test]
    fn test_mock_statistics_source() {
        let stats = RerunStatistics {
            total_count: 3,
            success_count: 9,
            failure_count: 1,
            success_rate: 90.0,
        };
        let source = MockStatisticsSource::new()
            .with_statistics(stats)
            .with_running(true);

        assert!(source.is_rerun_running());
        assert_eq!(source.statistics(), stats);
        assert_eq!(source.statistics_calls(), 1);

        source.set_running(false);
        assert!(!source.is_rerun_running());
    }

    #[tokio::test]
    async fn test_running_flag_reaches_progress_info() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let source = Arc::new(MockStatisticsSource::new().with_running(true));
        let reporter = ProgressReporter::new(source.clone())
            .with_lock_path(temp_dir.path().join("round.lock"));

        reporter.start_session(1).await;
        assert!(reporter.progress_info().is_running);
        source.set_running(false);
        assert!(!reporter.progress_info().is_running);
        reporter.end_session().await;
        assert_eq!(source.statistics_calls(), 1);
    }

    // =========================================================================
    // Fixture Tests
    // =========================================================================

    #[test]
    fn test_fixture_failures_classify_as_expected() {
        let classifier = FailureClassifier::default();
        assert!(classifier.is_retriable(Some(&transient_failure())));
        assert!(classifier.is_retriable(Some(&network_failure())));
        assert!(!classifier.is_retriable(Some(&assertion_failure())));
        assert!(!classifier.is_retriable(Some(&unknown_failure())));
    }
}
