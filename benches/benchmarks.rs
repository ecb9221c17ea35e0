//! Benchmark suite for rerun-guard hot paths.
//!
//! This module provides performance benchmarks for:
//! - Failure classification (called once per failed test)
//! - Backoff delay calculation
//! - Concurrent retry bookkeeping in the controller
//! - Metrics recording
//!
//! # Running Benchmarks
//!
//! ```bash
//! # Run all benchmarks
//! cargo bench
//!
//! # Save baseline for comparison
//! cargo bench -- --save-baseline main
//!
//! # Compare against baseline
//! cargo bench -- --baseline main
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::time::Duration;

use rerun_guard::backoff::{BackoffStrategy, ExponentialBackoff, FixedDelay};
use rerun_guard::{Failure, FailureClassifier, MetricsCollector, RetryConfig, RetryController};

// ============================================================================
// Classification Benchmarks
// ============================================================================

/// Benchmark each classification path.
///
/// Type matches return before any message scan; unrecognized failures scan
/// both pattern lists in full.
fn bench_classification(c: &mut Criterion) {
    let mut group = c.benchmark_group("classification");
    let classifier = FailureClassifier::default();

    let cases = [
        ("type_match", Failure::new("TimeoutException").with_message("waited 30s")),
        (
            "retriable_pattern",
            Failure::new("RuntimeException").with_message("net::ERR_CONNECTION_RESET at page.goto"),
        ),
        (
            "non_retriable_pattern",
            Failure::new("RuntimeException").with_message("AssertionError: expected 200 but got 404"),
        ),
        (
            "unrecognized",
            Failure::new("NullPointerException").with_message("x".repeat(512)),
        ),
    ];

    for (name, failure) in &cases {
        group.bench_with_input(BenchmarkId::new("classify", name), failure, |b, failure| {
            b.iter(|| black_box(classifier.is_retriable(Some(black_box(failure)))));
        });
    }

    group.finish();
}

// ============================================================================
// Backoff Benchmarks
// ============================================================================

fn bench_backoff(c: &mut Criterion) {
    let mut group = c.benchmark_group("backoff");

    let exponential = ExponentialBackoff::new(
        Duration::from_millis(1000),
        Duration::from_millis(30_000),
        2.0,
    );
    let fixed = FixedDelay::new(Duration::from_millis(500));

    group.bench_function("exponential_1_to_10", |b| {
        b.iter(|| {
            for attempt in 1..=10 {
                black_box(exponential.calculate_delay(black_box(attempt)));
            }
        });
    });

    group.bench_function("fixed_1_to_10", |b| {
        b.iter(|| {
            for attempt in 1..=10 {
                black_box(fixed.calculate_delay(black_box(attempt)));
            }
        });
    });

    group.finish();
}

// ============================================================================
// Controller Benchmarks
// ============================================================================

/// Benchmark retry bookkeeping under concurrent callers.
fn bench_controller_contention(c: &mut Criterion) {
    let mut group = c.benchmark_group("controller_contention");

    for threads in [1usize, 4, 8] {
        group.throughput(Throughput::Elements((threads * 100) as u64));
        group.bench_with_input(BenchmarkId::new("record_retry", threads), &threads, |b, &threads| {
            b.iter(|| {
                let controller = RetryController::with_config(RetryConfig::default());
                std::thread::scope(|s| {
                    for t in 0..threads {
                        let controller = &controller;
                        s.spawn(move || {
                            for i in 0..100 {
                                let id = format!("scenario-{}", (t * 7 + i) % 16);
                                controller.record_retry(&id);
                                controller.record_retry_attempt(&id, 2, i % 2 == 0, 10);
                            }
                        });
                    }
                });
                black_box(controller.statistics())
            });
        });
    }

    group.finish();
}

// ============================================================================
// Metrics Benchmarks
// ============================================================================

fn bench_metrics(c: &mut Criterion) {
    let mut group = c.benchmark_group("metrics");

    group.bench_function("record_and_summarize_100_scenarios", |b| {
        b.iter(|| {
            let metrics = MetricsCollector::new();
            metrics.start_session();
            metrics.record_round_start(1, 2);
            for i in 0..100u32 {
                let id = format!("scenario-{}", i);
                metrics.record_scenario_retry(&id, 2, 50, i % 3 == 0);
                metrics.record_scenario_failure(&id, 1, "TimeoutException", "waited 30s");
                metrics.record_retry_delay(u64::from(i) * 10);
            }
            metrics.record_round_end(1, 1, 5000, 33, 67, 33);
            metrics.end_session();
            black_box(metrics.formatted_summary())
        });
    });

    group.finish();
}

criterion_group!(decision_benches, bench_classification, bench_backoff);

criterion_group!(bookkeeping_benches, bench_controller_contention, bench_metrics);

criterion_main!(decision_benches, bookkeeping_benches);
