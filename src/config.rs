// Copyright 2025 Cowboy AI, LLC.

//! Harness configuration

use crate::errors::FilibusterResult;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Which components of an execution index key are digested.
///
/// A component that is not digested is embedded as raw text between square
/// brackets, which makes keys readable at the cost of length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeiDigestConfig {
    /// Test scope metadata
    pub metadata: bool,
    /// Originating service name
    pub source: bool,
    /// Module and method signature
    pub signature: bool,
    /// Callsite file and line
    pub synchronous: bool,
    /// Argument type and canonical text
    pub asynchronous: bool,
}

impl Default for DeiDigestConfig {
    fn default() -> Self {
        Self {
            metadata: true,
            source: true,
            signature: true,
            synchronous: true,
            asynchronous: true,
        }
    }
}

impl DeiDigestConfig {
    /// Every component as raw text
    pub fn raw() -> Self {
        Self {
            metadata: false,
            source: false,
            signature: false,
            synchronous: false,
            asynchronous: false,
        }
    }
}

/// Configuration for one harness run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilibusterConfig {
    /// Host of the remote decision source
    pub host: String,

    /// Port of the remote decision source
    pub port: u16,

    /// Upper bound on concurrently dispatched decision-source requests
    pub max_concurrent_requests: usize,

    /// Request timeout for the remote decision source in milliseconds
    pub request_timeout_ms: u64,

    /// Whether instrumentors talk to the decision source at all
    pub communication_enabled: bool,

    /// Counterexample file enabling replay mode
    pub counterexample_file: Option<PathBuf>,

    /// Key component digest toggles
    pub dei_digest: DeiDigestConfig,

    /// Suppress redundant-RPC warnings for RPCs served from cache
    pub avoid_redundant_injections: bool,

    /// Directory test execution reports are written under
    pub report_directory: PathBuf,
}

impl Default for FilibusterConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5005,
            max_concurrent_requests: 200,
            request_timeout_ms: 60_000,
            communication_enabled: true,
            counterexample_file: None,
            dei_digest: DeiDigestConfig::default(),
            avoid_redundant_injections: false,
            report_directory: PathBuf::from("/tmp/filibuster"),
        }
    }
}

impl FilibusterConfig {
    /// Load configuration from a JSON file; missing fields take defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> FilibusterResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Base URI of the remote decision source, with a trailing slash
    pub fn base_uri(&self) -> String {
        format!("http://{}:{}/", self.host, self.port)
    }

    /// Replay faults from a counterexample file
    pub fn with_counterexample_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.counterexample_file = Some(path.into());
        self
    }
}
