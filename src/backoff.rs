//! Backoff strategies mapping an attempt number to a wait before re-execution.
//!
//! Attempt numbers are 1-indexed. Attempt 1 is the original execution and
//! never waits; every strategy returns a zero delay for it.
//!
//! # Example
//!
//! ```
//! use rerun_guard::backoff::{BackoffStrategy, ExponentialBackoff};
//! use std::time::Duration;
//!
//! let backoff = ExponentialBackoff::new(
//!     Duration::from_millis(1000),
//!     Duration::from_millis(30_000),
//!     2.0,
//! );
//! assert_eq!(backoff.calculate_delay(1), Duration::ZERO);
//! assert_eq!(backoff.calculate_delay(3), Duration::from_millis(2000));
//! assert_eq!(backoff.calculate_delay(7), Duration::from_millis(30_000));
//! ```

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use crate::error::RerunError;

/// Computes how long to wait before a given attempt.
///
/// Implementations are pure and hold no mutable state, so one instance can be
/// shared across every test thread.
pub trait BackoffStrategy: Send + Sync + std::fmt::Debug {
    /// Delay before `attempt` (1-indexed).
    fn calculate_delay(&self, attempt: u32) -> Duration;

    /// Stable strategy name for logs and reports.
    fn name(&self) -> &'static str;
}

// ============================================================================
// Fixed Delay
// ============================================================================

/// Waits the same amount before every retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedDelay {
    delay: Duration,
}

impl FixedDelay {
    /// Create a fixed-delay strategy.
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// The configured delay.
    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl BackoffStrategy for FixedDelay {
    fn calculate_delay(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        debug!(
            "FixedDelay attempt {} - delay {}ms",
            attempt,
            self.delay.as_millis()
        );
        self.delay
    }

    fn name(&self) -> &'static str {
        "FixedDelay"
    }
}

// ============================================================================
// Exponential Backoff
// ============================================================================

/// `min(base * multiplier^(attempt - 1), max)` for attempts after the first.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
    multiplier: f64,
}

impl ExponentialBackoff {
    /// Create an exponential strategy. All three parameters are required.
    #[must_use]
    pub fn new(base: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            base,
            max,
            multiplier,
        }
    }

    /// Base delay.
    #[must_use]
    pub fn base(&self) -> Duration {
        self.base
    }

    /// Delay cap.
    #[must_use]
    pub fn max(&self) -> Duration {
        self.max
    }

    /// Growth factor per attempt.
    #[must_use]
    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }
}

impl BackoffStrategy for ExponentialBackoff {
    fn calculate_delay(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }

        let exponent = f64::from(attempt - 1);
        let raw_ms = self.base.as_millis() as f64 * self.multiplier.powf(exponent);
        let max_ms = self.max.as_millis() as u64;

        // Truncate toward zero like an integer cast; saturate on overflow.
        let capped_ms = if raw_ms.is_finite() && raw_ms < max_ms as f64 {
            (raw_ms as u64).min(max_ms)
        } else {
            max_ms
        };

        debug!(
            "ExponentialBackoff attempt {} - base {}ms, multiplier {}, raw {:.0}ms, capped {}ms",
            attempt,
            self.base.as_millis(),
            self.multiplier,
            raw_ms,
            capped_ms
        );

        Duration::from_millis(capped_ms)
    }

    fn name(&self) -> &'static str {
        "ExponentialBackoff"
    }
}

// ============================================================================
// Strategy Selection
// ============================================================================

/// Which strategy a configuration asks for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    /// [`FixedDelay`] using the base delay.
    Fixed,
    /// [`ExponentialBackoff`] using base delay, multiplier and cap.
    #[default]
    Exponential,
}

impl BackoffKind {
    /// Construct the strategy from configuration values.
    #[must_use]
    pub fn build(
        self,
        base: Duration,
        max: Duration,
        multiplier: f64,
    ) -> Box<dyn BackoffStrategy> {
        match self {
            Self::Fixed => Box::new(FixedDelay::new(base)),
            Self::Exponential => Box::new(ExponentialBackoff::new(base, max, multiplier)),
        }
    }
}

impl FromStr for BackoffKind {
    type Err = RerunError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fixed" => Ok(Self::Fixed),
            "exponential" | "exponential_backoff" => Ok(Self::Exponential),
            other => Err(RerunError::UnknownStrategy {
                name: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for BackoffKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fixed => write!(f, "fixed"),
            Self::Exponential => write!(f, "exponential"),
        }
    }
}
