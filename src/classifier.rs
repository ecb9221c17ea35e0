//! Failure classification: is a failed test worth re-running?
//!
//! # Decision order
//!
//! ```text
//! Failure ──> no failure?            ──> not retriable
//!         ──> registered type match? ──> retriable
//!         ──> deny-list substring?   ──> not retriable
//!         ──> allow-list substring?  ──> retriable
//!         ──> otherwise              ──> not retriable
//! ```
//!
//! A registered exception type short-circuits before any message pattern is
//! consulted, so an assertion message carried by a retriable type is still
//! retried. Within message matching the deny-list always wins.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

use crate::config::RetryConfig;
use crate::failure::Failure;

/// Predicate deciding whether a failure belongs to a registered kind.
pub type FailureMatcher = Arc<dyn Fn(&Failure) -> bool + Send + Sync>;

// ============================================================================
// Exception Registry
// ============================================================================

/// Registry of retriable exception kinds, keyed by tag.
///
/// Tags registered by name match a failure whose kind, or any ancestor, has
/// that name. Custom matchers can recognize failures by any other property.
#[derive(Clone, Default)]
pub struct ExceptionRegistry {
    matchers: BTreeMap<String, FailureMatcher>,
}

impl std::fmt::Debug for ExceptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExceptionRegistry")
            .field("tags", &self.matchers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ExceptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with one name matcher per tag.
    pub fn from_tags<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut registry = Self::new();
        for tag in tags {
            registry.register(tag);
        }
        registry
    }

    /// Register a tag matched by kind or ancestor name.
    pub fn register(&mut self, tag: impl Into<String>) {
        let tag = tag.into();
        let name = tag.clone();
        self.matchers
            .insert(tag, Arc::new(move |failure: &Failure| failure.is_kind(&name)));
    }

    /// Register a tag with a custom predicate, replacing any existing one.
    pub fn register_matcher<F>(&mut self, tag: impl Into<String>, matcher: F)
    where
        F: Fn(&Failure) -> bool + Send + Sync + 'static,
    {
        self.matchers.insert(tag.into(), Arc::new(matcher));
    }

    /// Register an already shared predicate under `tag`.
    pub fn register_shared(&mut self, tag: impl Into<String>, matcher: FailureMatcher) {
        self.matchers.insert(tag.into(), matcher);
    }

    /// First registered tag matching the failure.
    #[must_use]
    pub fn find_match(&self, failure: &Failure) -> Option<&str> {
        self.matchers
            .iter()
            .find(|(_, matcher)| matcher(failure))
            .map(|(tag, _)| tag.as_str())
    }

    /// True when `tag` is registered.
    #[must_use]
    pub fn contains(&self, tag: &str) -> bool {
        self.matchers.contains_key(tag)
    }

    /// Number of registered tags.
    #[must_use]
    pub fn len(&self) -> usize {
        self.matchers.len()
    }

    /// True when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }
}

// ============================================================================
// Classification
// ============================================================================

/// Why a failure was, or was not, judged retriable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// No failure cause was supplied.
    NoCause,
    /// The failure's type is registered as retriable.
    RetriableType(String),
    /// The message contains a deny-list substring.
    NonRetriablePattern(String),
    /// The message contains an allow-list substring.
    RetriablePattern(String),
    /// Nothing matched.
    Unrecognized,
}

impl Classification {
    /// Whether this outcome permits a retry.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::RetriableType(_) | Self::RetriablePattern(_))
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoCause => write!(f, "no failure cause"),
            Self::RetriableType(tag) => write!(f, "retriable exception type {}", tag),
            Self::NonRetriablePattern(p) => write!(f, "non-retriable pattern {:?}", p),
            Self::RetriablePattern(p) => write!(f, "retriable pattern {:?}", p),
            Self::Unrecognized => write!(f, "unrecognized failure"),
        }
    }
}

/// Decides whether failures are eligible for retry.
#[derive(Debug, Clone)]
pub struct FailureClassifier {
    registry: ExceptionRegistry,
    retriable_patterns: BTreeSet<String>,
    non_retriable_patterns: BTreeSet<String>,
}

impl FailureClassifier {
    /// Create a classifier from explicit parts. Patterns are lower-cased.
    pub fn new<I, J>(registry: ExceptionRegistry, retriable: I, non_retriable: J) -> Self
    where
        I: IntoIterator<Item = String>,
        J: IntoIterator<Item = String>,
    {
        Self {
            registry,
            retriable_patterns: retriable.into_iter().map(|p| p.to_lowercase()).collect(),
            non_retriable_patterns: non_retriable
                .into_iter()
                .map(|p| p.to_lowercase())
                .collect(),
        }
    }

    /// Build a classifier from a retry configuration.
    #[must_use]
    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            ExceptionRegistry::from_tags(config.retriable_exception_types.iter().cloned()),
            config.retriable_patterns.iter().cloned(),
            config.non_retriable_patterns.iter().cloned(),
        )
    }

    /// Mutable access to the exception registry for custom matchers.
    pub fn registry_mut(&mut self) -> &mut ExceptionRegistry {
        &mut self.registry
    }

    /// The exception registry.
    #[must_use]
    pub fn registry(&self) -> &ExceptionRegistry {
        &self.registry
    }

    /// Classify a failure, explaining the outcome.
    #[must_use]
    pub fn classify(&self, failure: Option<&Failure>) -> Classification {
        let Some(failure) = failure else {
            return Classification::NoCause;
        };

        if let Some(tag) = self.registry.find_match(failure) {
            debug!("Found retriable exception: {} ({})", failure.kind, tag);
            return Classification::RetriableType(tag.to_string());
        }

        if let Some(message) = failure.normalized_message() {
            if let Some(pattern) = self
                .non_retriable_patterns
                .iter()
                .find(|p| message.contains(p.as_str()))
            {
                debug!("Failure contains non-retriable pattern: {}", pattern);
                return Classification::NonRetriablePattern(pattern.clone());
            }

            if let Some(pattern) = self
                .retriable_patterns
                .iter()
                .find(|p| message.contains(p.as_str()))
            {
                debug!("Failure contains retriable pattern: {}", pattern);
                return Classification::RetriablePattern(pattern.clone());
            }
        }

        Classification::Unrecognized
    }

    /// Whether a failure is eligible for retry.
    #[must_use]
    pub fn is_retriable(&self, failure: Option<&Failure>) -> bool {
        self.classify(failure).is_retriable()
    }
}

impl Default for FailureClassifier {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
