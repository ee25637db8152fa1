// Copyright 2025 Cowboy AI, LLC.

use crate::decision::ForcedException;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A forced exception in the form a transport binding raises it.
///
/// When `cause` is set it takes priority over `code`: the binding raises
/// the named cause (carrying `cause_message`) and the status is implied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InjectedFault {
    /// Exception name
    pub name: String,
    /// Status code, possibly empty when a cause is given
    pub code: String,
    /// Status description
    pub description: Option<String>,
    /// Cause to raise in place of a plain status
    pub cause: Option<String>,
    /// Message for the cause
    pub cause_message: Option<String>,
    /// Latency to add before failing
    pub sleep_ms: Option<u64>,
}

impl InjectedFault {
    /// Default message for a synthesized cause.
    pub const DEFAULT_CAUSE_MESSAGE: &'static str = "Filibuster generated exception.";

    /// Materialize a forced exception.
    ///
    /// # Panics
    ///
    /// Panics when the exception carries neither a code nor a cause: a
    /// fault that cannot be raised must not silently become no fault.
    pub fn from_forced_exception(exception: &ForcedException) -> Self {
        let non_empty = |key: &str| {
            exception
                .metadata_str(key)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        let code = exception.metadata_str("code").unwrap_or_default().to_string();
        let cause = non_empty("cause");
        if cause.is_none() && code.is_empty() {
            panic!(
                "No code or cause provided for injection of {}",
                exception.name
            );
        }

        Self {
            name: exception.name.clone(),
            code,
            description: exception.metadata_str("description").map(str::to_string),
            cause,
            cause_message: non_empty("cause_message"),
            sleep_ms: exception.sleep_ms(),
        }
    }

    /// Whether a cause, rather than a code, is raised.
    pub fn raises_cause(&self) -> bool {
        self.cause.is_some()
    }

    /// Message to raise the cause with.
    pub fn cause_message_or_default(&self) -> &str {
        self.cause_message
            .as_deref()
            .unwrap_or(Self::DEFAULT_CAUSE_MESSAGE)
    }
}

impl fmt::Display for InjectedFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.cause, &self.description) {
            (Some(cause), _) => write!(f, "{}: {cause}: {}", self.name, self.cause_message_or_default()),
            (None, Some(description)) => write!(f, "{} {}: {description}", self.name, self.code),
            (None, None) => write!(f, "{} {}", self.name, self.code),
        }
    }
}

impl std::error::Error for InjectedFault {}
