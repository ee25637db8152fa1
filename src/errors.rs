// Copyright 2025 Cowboy AI, LLC.

//! Error types for the instrumentation layer

use thiserror::Error;

/// Recoverable errors raised while talking to a fault decision source or
/// loading harness inputs.
///
/// Contract violations inside the bookkeeping itself (popping an empty
/// execution index, reading a transformer result before `transform`, a
/// forced exception with neither code nor cause) are not represented here:
/// they panic.
#[derive(Debug, Error)]
pub enum FilibusterError {
    /// JSON (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The decision source could not be reached
    #[error("Transport error calling {endpoint}: {message}")]
    Transport {
        /// Endpoint that was being called
        endpoint: String,
        /// Underlying failure
        message: String,
    },

    /// The decision source answered with a non-200 status
    #[error("Unexpected status {status} from {endpoint}")]
    UnexpectedStatus {
        /// Endpoint that was being called
        endpoint: String,
        /// HTTP status code
        status: u16,
    },

    /// The decision source answered with a body we cannot interpret
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// The counterexample file is unreadable or malformed
    #[error("Counterexample error: {0}")]
    Counterexample(String),

    /// The analysis configuration is malformed
    #[error("Analysis configuration error: {0}")]
    AnalysisConfiguration(String),

    /// A transformer could not interpret its payload or accumulator
    #[error("Transformer error: {0}")]
    Transformer(String),

    /// The test execution report could not be written
    #[error("Report error: {0}")]
    Report(String),

    /// Filesystem failure
    #[error("I/O error: {0}")]
    Io(String),
}

/// Result type for instrumentation operations
pub type FilibusterResult<T> = Result<T, FilibusterError>;

impl From<serde_json::Error> for FilibusterError {
    fn from(err: serde_json::Error) -> Self {
        FilibusterError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for FilibusterError {
    fn from(err: std::io::Error) -> Self {
        FilibusterError::Io(err.to_string())
    }
}

impl FilibusterError {
    /// Build a transport error for an endpoint
    pub fn transport(endpoint: impl Into<String>, message: impl ToString) -> Self {
        FilibusterError::Transport {
            endpoint: endpoint.into(),
            message: message.to_string(),
        }
    }

    /// True for failures of the decision-source round trip, which callers
    /// treat as "no fault".
    pub fn is_decision_failure(&self) -> bool {
        matches!(
            self,
            FilibusterError::Transport { .. }
                | FilibusterError::UnexpectedStatus { .. }
                | FilibusterError::MalformedResponse(_)
                | FilibusterError::Serialization(_)
        )
    }
}
