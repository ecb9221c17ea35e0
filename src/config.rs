//! Retry configuration and the settings sources it is loaded from.
//!
//! Configuration never fails to load. Malformed values are logged and the
//! documented default is used in their place, so a controller built from
//! any source is always usable.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use crate::backoff::{BackoffKind, BackoffStrategy};
use crate::error::{RerunError, Result};

/// Default maximum retries per test.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Default base delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;

/// Default exponential multiplier.
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Default delay cap in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

/// Setting keys understood by [`RetryConfig::from_settings`].
pub mod keys {
    /// Max retries; takes precedence over [`MAX_RETRIES`].
    pub const RERUN_FAILING_TESTS_COUNT: &str = "RERUN_FAILING_TESTS_COUNT";
    /// Max retries.
    pub const MAX_RETRIES: &str = "RERUN_MAX_RETRIES";
    /// Base delay in milliseconds.
    pub const WAIT_TIME_MS: &str = "RERUN_WAIT_TIME_MS";
    /// Backoff multiplier.
    pub const DELAY_MULTIPLIER: &str = "RERUN_DELAY_MULTIPLIER";
    /// Delay cap in milliseconds.
    pub const DELAY_MAX_MS: &str = "RERUN_DELAY_MAX_MS";
    /// `fixed` or `exponential`.
    pub const BACKOFF_STRATEGY: &str = "RERUN_BACKOFF_STRATEGY";
    /// Comma-separated extra retriable exception type tags.
    pub const RETRY_EXCEPTIONS: &str = "RERUN_RETRY_EXCEPTIONS";
    /// Comma-separated extra retriable message substrings.
    pub const RETRY_PATTERNS: &str = "RERUN_RETRY_PATTERNS";
    /// Comma-separated extra non-retriable message substrings.
    pub const NON_RETRIABLE_PATTERNS: &str = "RERUN_NON_RETRIABLE_PATTERNS";

    /// Every key, in lookup order.
    pub const ALL: &[&str] = &[
        RERUN_FAILING_TESTS_COUNT,
        MAX_RETRIES,
        WAIT_TIME_MS,
        DELAY_MULTIPLIER,
        DELAY_MAX_MS,
        BACKOFF_STRATEGY,
        RETRY_EXCEPTIONS,
        RETRY_PATTERNS,
        NON_RETRIABLE_PATTERNS,
    ];
}

/// Exception type tags that are retriable out of the box.
pub const DEFAULT_RETRIABLE_EXCEPTION_TYPES: &[&str] = &[
    "PlaywrightException",
    "TimeoutException",
    "SocketException",
    "IOException",
];

/// Transient network and UI-timing signals.
pub const DEFAULT_RETRIABLE_PATTERNS: &[&str] = &[
    "timeout",
    "not found",
    "connection refused",
    "socket closed",
    "stale element",
    "unable to locate",
    "no such element",
    "frame detached",
    "target closed",
    "execution context was destroyed",
    "node is detached",
    "element is detached",
    "navigation failed",
    "net::",
    "err_connection",
    "websocket",
    "dialog",
    "evaluation failed",
    "download error",
];

/// Assertion and verification failures. These are never retried.
pub const DEFAULT_NON_RETRIABLE_PATTERNS: &[&str] = &[
    "assertion failed",
    "verification failed",
    "test failed",
    "assertionerror",
    "expect(",
];

// ============================================================================
// Settings Sources
// ============================================================================

/// A flat key/value lookup that configuration is read from.
pub trait SettingsSource {
    /// Value for `key`, if set.
    fn get(&self, key: &str) -> Option<String>;
}

/// Reads settings from the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSettings;

impl SettingsSource for EnvSettings {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl SettingsSource for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

impl SettingsSource for BTreeMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        BTreeMap::get(self, key).cloned()
    }
}

impl<S: SettingsSource + ?Sized> SettingsSource for &S {
    fn get(&self, key: &str) -> Option<String> {
        (**self).get(key)
    }
}

/// Parse a single setting. `Ok(None)` when unset or blank.
pub fn parse_setting<T>(source: &dyn SettingsSource, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match source.get(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| RerunError::invalid_setting(key, raw, e.to_string())),
        _ => Ok(None),
    }
}

/// Parse a setting, logging and discarding a malformed value.
fn setting_or_warn<T>(source: &dyn SettingsSource, key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match parse_setting(source, key) {
        Ok(value) => value,
        Err(e) => {
            warn!("{}, using default", e);
            None
        }
    }
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty())
}

// ============================================================================
// Retry Configuration
// ============================================================================

/// Immutable retry settings for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum retries per test. 0 disables retrying.
    pub max_retries: u32,
    /// Base delay in milliseconds.
    pub base_delay_ms: u64,
    /// Exponential growth factor.
    pub backoff_multiplier: f64,
    /// Delay cap in milliseconds.
    pub max_delay_ms: u64,
    /// Which backoff strategy to build.
    pub strategy: BackoffKind,
    /// Exception type tags that are always retriable.
    pub retriable_exception_types: BTreeSet<String>,
    /// Lower-cased message substrings that make a failure retriable.
    pub retriable_patterns: BTreeSet<String>,
    /// Lower-cased message substrings that make a failure non-retriable.
    pub non_retriable_patterns: BTreeSet<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            strategy: BackoffKind::default(),
            retriable_exception_types: DEFAULT_RETRIABLE_EXCEPTION_TYPES
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            retriable_patterns: DEFAULT_RETRIABLE_PATTERNS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            non_retriable_patterns: DEFAULT_NON_RETRIABLE_PATTERNS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }
}

/// Values read from a config file. Absent fields keep the defaults and the
/// lists are added to the default sets.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ConfigOverrides {
    /// Maximum retries per test.
    pub max_retries: Option<u32>,
    /// Base delay in milliseconds.
    pub base_delay_ms: Option<u64>,
    /// Exponential growth factor.
    pub backoff_multiplier: Option<f64>,
    /// Delay cap in milliseconds.
    pub max_delay_ms: Option<u64>,
    /// Backoff strategy.
    pub strategy: Option<BackoffKind>,
    /// Extra retriable exception type tags.
    pub retriable_exception_types: Vec<String>,
    /// Extra retriable message substrings.
    pub retriable_patterns: Vec<String>,
    /// Extra non-retriable message substrings.
    pub non_retriable_patterns: Vec<String>,
}

impl RetryConfig {
    /// Build a configuration from a settings source, on top of the defaults.
    ///
    /// Malformed values are logged and ignored.
    pub fn from_settings(source: &dyn SettingsSource) -> Self {
        let mut config = Self::default();

        let max_retries = setting_or_warn::<u32>(source, keys::RERUN_FAILING_TESTS_COUNT)
            .or_else(|| setting_or_warn::<u32>(source, keys::MAX_RETRIES));
        match max_retries {
            Some(max) => config.max_retries = max,
            None => info!(
                "No retry count configured, using default: {}",
                DEFAULT_MAX_RETRIES
            ),
        }

        if let Some(base) = setting_or_warn(source, keys::WAIT_TIME_MS) {
            config.base_delay_ms = base;
        }
        if let Some(multiplier) = setting_or_warn(source, keys::DELAY_MULTIPLIER) {
            config.backoff_multiplier = multiplier;
        }
        if let Some(max) = setting_or_warn(source, keys::DELAY_MAX_MS) {
            config.max_delay_ms = max;
        }
        if let Some(kind) = setting_or_warn(source, keys::BACKOFF_STRATEGY) {
            config.strategy = kind;
        }

        if let Some(raw) = source.get(keys::RETRY_EXCEPTIONS) {
            for tag in split_list(&raw) {
                info!("Added custom retriable exception: {}", tag);
                config.retriable_exception_types.insert(tag.to_string());
            }
        }
        if let Some(raw) = source.get(keys::RETRY_PATTERNS) {
            for pattern in split_list(&raw) {
                info!("Added custom retriable pattern: {}", pattern);
                config.retriable_patterns.insert(pattern.to_lowercase());
            }
        }
        if let Some(raw) = source.get(keys::NON_RETRIABLE_PATTERNS) {
            for pattern in split_list(&raw) {
                info!("Added custom non-retriable pattern: {}", pattern);
                config.non_retriable_patterns.insert(pattern.to_lowercase());
            }
        }

        config.validated()
    }

    /// Load overrides from a `.json` or `.toml` file on top of the defaults.
    ///
    /// A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let overrides: ConfigOverrides = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&content)?,
            Some("json") => serde_json::from_str(&content)?,
            other => {
                return Err(RerunError::config_with_path(
                    format!("unsupported config format: {}", other.unwrap_or("<none>")),
                    path.to_path_buf(),
                ))
            }
        };

        Ok(Self::default().merged(overrides).normalized().validated())
    }

    /// Apply file overrides. Scalars replace, lists extend the current sets.
    #[must_use]
    pub fn merged(mut self, overrides: ConfigOverrides) -> Self {
        if let Some(max) = overrides.max_retries {
            self.max_retries = max;
        }
        if let Some(base) = overrides.base_delay_ms {
            self.base_delay_ms = base;
        }
        if let Some(multiplier) = overrides.backoff_multiplier {
            self.backoff_multiplier = multiplier;
        }
        if let Some(max) = overrides.max_delay_ms {
            self.max_delay_ms = max;
        }
        if let Some(kind) = overrides.strategy {
            self.strategy = kind;
        }
        self.retriable_exception_types
            .extend(overrides.retriable_exception_types);
        self.retriable_patterns
            .extend(overrides.retriable_patterns.iter().map(|p| p.to_lowercase()));
        self.non_retriable_patterns
            .extend(overrides.non_retriable_patterns.iter().map(|p| p.to_lowercase()));
        self
    }

    /// Lower-case every pattern.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.retriable_patterns = self
            .retriable_patterns
            .iter()
            .map(|p| p.to_lowercase())
            .collect();
        self.non_retriable_patterns = self
            .non_retriable_patterns
            .iter()
            .map(|p| p.to_lowercase())
            .collect();
        self
    }

    /// Replace out-of-range numeric values, logging each correction.
    #[must_use]
    pub fn validated(mut self) -> Self {
        if self.base_delay_ms == 0 {
            warn!(
                "Base delay must be positive, using default: {}ms",
                DEFAULT_BASE_DELAY_MS
            );
            self.base_delay_ms = DEFAULT_BASE_DELAY_MS;
        }
        if !(self.backoff_multiplier.is_finite() && self.backoff_multiplier > 0.0) {
            warn!(
                "Backoff multiplier must be positive, using default: {}",
                DEFAULT_BACKOFF_MULTIPLIER
            );
            self.backoff_multiplier = DEFAULT_BACKOFF_MULTIPLIER;
        }
        if self.max_delay_ms < self.base_delay_ms {
            warn!(
                "Max delay {}ms is below base delay {}ms, raising it",
                self.max_delay_ms, self.base_delay_ms
            );
            self.max_delay_ms = self.base_delay_ms;
        }
        self
    }

    /// Base delay as a duration.
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Delay cap as a duration.
    #[must_use]
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Build the configured backoff strategy.
    #[must_use]
    pub fn backoff(&self) -> Box<dyn BackoffStrategy> {
        self.strategy
            .build(self.base_delay(), self.max_delay(), self.backoff_multiplier)
    }

    /// True when retrying is enabled at all.
    #[must_use]
    pub fn is_retry_enabled(&self) -> bool {
        self.max_retries > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn settings(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.base_delay_ms, 1000);
        assert_eq!(config.backoff_multiplier, 2.0);
        assert_eq!(config.max_delay_ms, 30_000);
        assert_eq!(config.strategy, BackoffKind::Exponential);
        assert!(config.retriable_exception_types.contains("IOException"));
        assert!(config.retriable_patterns.contains("connection refused"));
        assert!(config.non_retriable_patterns.contains("assertionerror"));
    }

    #[test]
    fn test_default_patterns_are_lowercase() {
        let config = RetryConfig::default();
        for p in config
            .retriable_patterns
            .iter()
            .chain(&config.non_retriable_patterns)
        {
            assert_eq!(p, &p.to_lowercase());
        }
    }

    #[test]
    fn test_from_empty_settings_uses_defaults() {
        let config = RetryConfig::from_settings(&HashMap::<String, String>::new());
        assert_eq!(config, RetryConfig::default());
    }

    #[test]
    fn test_from_settings_overrides() {
        let source = settings(&[
            (keys::MAX_RETRIES, "4"),
            (keys::WAIT_TIME_MS, "250"),
            (keys::DELAY_MULTIPLIER, "1.5"),
            (keys::DELAY_MAX_MS, "5000"),
            (keys::BACKOFF_STRATEGY, "fixed"),
        ]);
        let config = RetryConfig::from_settings(&source);
        assert_eq!(config.max_retries, 4);
        assert_eq!(config.base_delay_ms, 250);
        assert_eq!(config.backoff_multiplier, 1.5);
        assert_eq!(config.max_delay_ms, 5000);
        assert_eq!(config.strategy, BackoffKind::Fixed);
    }

    #[test]
    fn test_failing_tests_count_takes_precedence() {
        let source = settings(&[
            (keys::RERUN_FAILING_TESTS_COUNT, "5"),
            (keys::MAX_RETRIES, "1"),
        ]);
        assert_eq!(RetryConfig::from_settings(&source).max_retries, 5);
    }

    #[test]
    fn test_malformed_count_falls_through_to_next_key() {
        let source = settings(&[
            (keys::RERUN_FAILING_TESTS_COUNT, "many"),
            (keys::MAX_RETRIES, "3"),
        ]);
        assert_eq!(RetryConfig::from_settings(&source).max_retries, 3);
    }

    #[test]
    fn test_malformed_values_fall_back_to_defaults() {
        let source = settings(&[
            (keys::MAX_RETRIES, "two"),
            (keys::WAIT_TIME_MS, "-5"),
            (keys::DELAY_MULTIPLIER, "fast"),
            (keys::BACKOFF_STRATEGY, "linear"),
        ]);
        let config = RetryConfig::from_settings(&source);
        assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(config.base_delay_ms, DEFAULT_BASE_DELAY_MS);
        assert_eq!(config.backoff_multiplier, DEFAULT_BACKOFF_MULTIPLIER);
        assert_eq!(config.strategy, BackoffKind::Exponential);
    }

    #[test]
    fn test_parse_setting_reports_key() {
        let source = settings(&[(keys::WAIT_TIME_MS, "soon")]);
        let err = parse_setting::<u64>(&source, keys::WAIT_TIME_MS).unwrap_err();
        assert!(matches!(err, RerunError::InvalidSetting { ref key, .. } if key == keys::WAIT_TIME_MS));
        assert!(parse_setting::<u64>(&source, keys::DELAY_MAX_MS)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_custom_lists_are_merged_and_lowercased() {
        let source = settings(&[
            (keys::RETRY_EXCEPTIONS, "GatewayException, ,FlakyDbException"),
            (keys::RETRY_PATTERNS, "Service Unavailable,HTTP 503"),
            (keys::NON_RETRIABLE_PATTERNS, "Schema Mismatch"),
        ]);
        let config = RetryConfig::from_settings(&source);
        assert!(config.retriable_exception_types.contains("GatewayException"));
        assert!(config.retriable_exception_types.contains("FlakyDbException"));
        assert!(config.retriable_exception_types.contains("IOException"));
        assert!(config.retriable_patterns.contains("service unavailable"));
        assert!(config.retriable_patterns.contains("http 503"));
        assert!(config.non_retriable_patterns.contains("schema mismatch"));
    }

    #[test]
    fn test_validation_corrects_out_of_range() {
        let config = RetryConfig {
            base_delay_ms: 0,
            backoff_multiplier: -1.0,
            max_delay_ms: 10,
            ..RetryConfig::default()
        }
        .validated();
        assert_eq!(config.base_delay_ms, DEFAULT_BASE_DELAY_MS);
        assert_eq!(config.backoff_multiplier, DEFAULT_BACKOFF_MULTIPLIER);
        assert_eq!(config.max_delay_ms, DEFAULT_BASE_DELAY_MS);
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let temp = TempDir::new().unwrap();
        let config = RetryConfig::load(&temp.path().join("nope.toml")).unwrap();
        assert_eq!(config, RetryConfig::default());
    }

    #[test]
    fn test_load_toml_partial_overrides() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("retry.toml");
        std::fs::write(
            &path,
            "max_retries = 3\nstrategy = \"fixed\"\nretriable_patterns = [\"Gateway Timeout\"]\n",
        )
        .unwrap();

        let config = RetryConfig::load(&path).unwrap();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.strategy, BackoffKind::Fixed);
        assert_eq!(config.base_delay_ms, DEFAULT_BASE_DELAY_MS);
        assert!(config.retriable_patterns.contains("gateway timeout"));
        assert!(config.retriable_patterns.contains("connection refused"));
    }

    #[test]
    fn test_load_file_patterns_keep_default_deny_list() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("retry.toml");
        std::fs::write(
            &path,
            "non_retriable_patterns = [\"Schema Mismatch\"]\nretriable_exception_types = [\"GridNodeLost\"]\n",
        )
        .unwrap();

        let config = RetryConfig::load(&path).unwrap();
        assert!(config.non_retriable_patterns.contains("schema mismatch"));
        for pattern in DEFAULT_NON_RETRIABLE_PATTERNS {
            assert!(config.non_retriable_patterns.contains(*pattern));
        }
        assert!(config.retriable_exception_types.contains("GridNodeLost"));
        assert!(config.retriable_exception_types.contains("IOException"));

        let classifier = crate::FailureClassifier::from_config(&config);
        let failure = crate::Failure::new("RuntimeException")
            .with_message("AssertionError: expected 200 but got timeout");
        assert!(!classifier.is_retriable(Some(&failure)));
    }

    #[test]
    fn test_load_json() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("retry.json");
        std::fs::write(&path, r#"{"max_retries": 0, "max_delay_ms": 9000}"#).unwrap();

        let config = RetryConfig::load(&path).unwrap();
        assert_eq!(config.max_retries, 0);
        assert!(!config.is_retry_enabled());
        assert_eq!(config.max_delay_ms, 9000);
    }

    #[test]
    fn test_load_rejects_unknown_extension() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("retry.yaml");
        std::fs::write(&path, "max_retries: 1").unwrap();
        assert!(RetryConfig::load(&path).unwrap_err().is_config_error());
    }

    #[test]
    fn test_backoff_from_config() {
        let config = RetryConfig::default();
        let backoff = config.backoff();
        assert_eq!(backoff.name(), "ExponentialBackoff");
        assert_eq!(backoff.calculate_delay(3), Duration::from_millis(2000));
    }
}
