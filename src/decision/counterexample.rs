// Copyright 2025 Cowboy AI, LLC.

//! Deterministic replay of a captured failing execution.
//!
//! ```json
//! {"TestExecution": "{\"failures\": [{\"execution_index\": \"[[...]]\", \"forced_exception\": {...}}]}"}
//! ```
//!
//! The inner document may also be embedded as an object rather than a string.

use super::{FaultInstruction, TestExecution};
use crate::dei::DistributedExecutionIndex;
use crate::errors::{FilibusterError, FilibusterResult};
use serde_json::{json, Map, Value};
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone)]
struct Failure {
    execution_index: String,
    parsed: Option<DistributedExecutionIndex>,
    record: Value,
}

/// Faults of a captured execution, keyed by execution index.
#[derive(Debug, Clone, Default)]
pub struct Counterexample {
    failures: Vec<Failure>,
}

impl Counterexample {
    /// Read a counterexample file.
    pub fn load(path: impl AsRef<Path>) -> FilibusterResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            FilibusterError::Counterexample(format!("cannot read {}: {e}", path.display()))
        })?;
        let document: Value = serde_json::from_str(&text)
            .map_err(|e| FilibusterError::Counterexample(format!("{}: {e}", path.display())))?;
        let counterexample = Self::from_json(&document)?;
        info!(
            path = %path.display(),
            failures = counterexample.failures.len(),
            "counterexample loaded"
        );
        Ok(counterexample)
    }

    /// Parse the outer document.
    pub fn from_json(document: &Value) -> FilibusterResult<Self> {
        let execution = match document.get("TestExecution") {
            Some(Value::String(inner)) => serde_json::from_str(inner)
                .map_err(|e| FilibusterError::Counterexample(format!("TestExecution: {e}")))?,
            Some(inner @ Value::Object(_)) => inner.clone(),
            _ => {
                return Err(FilibusterError::Counterexample(
                    "missing TestExecution".into(),
                ))
            }
        };

        let entries = execution
            .get("failures")
            .and_then(Value::as_array)
            .ok_or_else(|| FilibusterError::Counterexample("missing failures array".into()))?;

        let mut failures = Vec::with_capacity(entries.len());
        for entry in entries {
            let execution_index = entry
                .get("execution_index")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    FilibusterError::Counterexample(format!("failure without execution_index: {entry}"))
                })?
                .to_string();
            failures.push(Failure {
                parsed: execution_index.parse().ok(),
                execution_index,
                record: entry.clone(),
            });
        }
        Ok(Self { failures })
    }

    /// Capture the faults of an execution.
    pub fn from_test_execution(execution: &TestExecution) -> Self {
        let failures = execution
            .faults()
            .map(|(dei, fault)| {
                let mut record = match fault.to_object() {
                    Value::Object(map) => map,
                    _ => Map::new(),
                };
                record.insert("execution_index".into(), Value::from(dei.to_string()));
                Failure {
                    execution_index: dei.to_string(),
                    parsed: Some(dei.clone()),
                    record: Value::Object(record),
                }
            })
            .collect();
        Self { failures }
    }

    /// The outer document, with the execution embedded as a string.
    pub fn to_json(&self) -> Value {
        let records: Vec<Value> = self.failures.iter().map(|f| f.record.clone()).collect();
        json!({ "TestExecution": json!({ "failures": records }).to_string() })
    }

    /// Write the counterexample to a file.
    pub fn write(&self, path: impl AsRef<Path>) -> FilibusterResult<()> {
        let text = serde_json::to_string_pretty(&self.to_json())?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Number of recorded failures.
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    /// Whether no failures are recorded.
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    fn find(&self, execution_index: &str) -> Option<&Failure> {
        if let Some(found) = self.failures.iter().find(|f| f.execution_index == execution_index) {
            return Some(found);
        }
        // Indexes written by other tools may differ only in whitespace.
        let parsed: DistributedExecutionIndex = execution_index.parse().ok()?;
        self.failures
            .iter()
            .find(|f| f.parsed.as_ref() == Some(&parsed))
    }

    /// The raw failure record for an index, if one was captured.
    pub fn should_fail_request_with(&self, execution_index: &str) -> Option<&Value> {
        self.find(execution_index).map(|f| &f.record)
    }

    /// The failure record, or `{"execution_index": ...}` when none was captured.
    pub fn lookup(&self, execution_index: &str) -> Value {
        self.should_fail_request_with(execution_index)
            .cloned()
            .unwrap_or_else(|| json!({ "execution_index": execution_index }))
    }

    /// The fault to inject at an index.
    pub fn fault_for(&self, execution_index: &str) -> FilibusterResult<Option<FaultInstruction>> {
        match self.should_fail_request_with(execution_index) {
            Some(record) => FaultInstruction::from_object(record),
            None => Ok(None),
        }
    }
}
