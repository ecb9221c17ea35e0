//! The failure value handed over by the test runner.
//!
//! A failure carries a concrete type tag (e.g. `TimeoutException`), the tags
//! of the types it derives from, and an optional message. Type hierarchy is
//! expressed through `ancestors` so that a `SocketTimeoutException` whose
//! ancestors include `IOException` is treated as an `IOException` too.

use serde::{Deserialize, Serialize};

/// A failed test's cause, as reported by the runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    /// Concrete type tag of the failure.
    pub kind: String,
    /// Tags of the types this failure is a subtype of.
    #[serde(default)]
    pub ancestors: Vec<String>,
    /// Failure message, if any.
    #[serde(default)]
    pub message: Option<String>,
}

impl Failure {
    /// Create a failure with the given type tag and no message.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ancestors: Vec::new(),
            message: None,
        }
    }

    /// Build a failure from any error value.
    ///
    /// The kind is the unqualified type name of `E`; the message is its
    /// `Display` output.
    pub fn from_error<E: std::error::Error>(err: &E) -> Self {
        Self::new(short_type_name::<E>()).with_message(err.to_string())
    }

    /// Attach a message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Declare a supertype tag.
    #[must_use]
    pub fn with_ancestor(mut self, ancestor: impl Into<String>) -> Self {
        self.ancestors.push(ancestor.into());
        self
    }

    /// True when the failure's kind or any of its ancestors equals `tag`.
    #[must_use]
    pub fn is_kind(&self, tag: &str) -> bool {
        self.kind == tag || self.ancestors.iter().any(|a| a == tag)
    }

    /// Lower-cased message, if present.
    #[must_use]
    pub fn normalized_message(&self) -> Option<String> {
        self.message.as_deref().map(str::to_lowercase)
    }

    /// Short label for logs: `Kind: message`.
    #[must_use]
    pub fn summary(&self) -> String {
        match &self.message {
            Some(msg) => format!("{}: {}", self.kind, msg),
            None => self.kind.clone(),
        }
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.summary())
    }
}

/// Unqualified, generic-free name of a type (`std::io::Error` -> `Error`).
fn short_type_name<T: ?Sized>() -> String {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}
