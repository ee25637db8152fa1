// Copyright 2025 Cowboy AI, LLC.

//! Fault decision sources.
//!
//! A decision source is told about every instrumented invocation and
//! answers with either nothing or fault instructions. Two transports
//! implement [`DecisionSource`]: the in-process [`FaultCore`] via
//! [`CoreDecisionSource`], and a remote control plane via
//! [`HttpDecisionSource`]. A [`Counterexample`] bypasses both.

mod analysis;
mod fault_core;
mod counterexample;
mod http;
mod test_execution;

pub use self::analysis::{AnalysisConfiguration, AnalysisRule};
pub use self::fault_core::{CoreDecisionSource, CoreHandle, FaultCore};
pub use self::counterexample::Counterexample;
pub use self::http::HttpDecisionSource;
pub use self::test_execution::TestExecution;

use crate::errors::FilibusterResult;
use crate::transformers::TransformerKind;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An exception the client must synthesize instead of performing the call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForcedException {
    /// Exception name
    pub name: String,
    /// `code`, `description`, `cause`, `cause_message`, `sleep`, `abort`, `defer`, ...
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ForcedException {
    /// String metadata field, if present and a string.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// Boolean metadata field, accepting `true`/`false` and their string forms.
    pub fn metadata_bool(&self, key: &str) -> Option<bool> {
        match self.metadata.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Latency to add before failing, in milliseconds.
    pub fn sleep_ms(&self) -> Option<u64> {
        match self.metadata.get("sleep")? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

/// A plausible-but-wrong value to return in place of the real response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ByzantineFault {
    /// Payload type tag
    #[serde(rename = "type")]
    pub fault_type: String,
    /// Replacement value
    #[serde(default)]
    pub value: Value,
}

/// A transformer mutation to apply to the real response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformerFault {
    /// Transformer to run
    #[serde(rename = "type")]
    pub transformer: TransformerKind,
    /// Serialized accumulator; `null` starts the enumeration.
    #[serde(default)]
    pub accumulator: Value,
}

/// Fault instructions for one invocation, serialized externally tagged:
/// `{"forced_exception": {...}}` and so on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultInstruction {
    /// Fail the call with an exception
    ForcedException(ForcedException),
    /// Latency or error injection described by metadata
    FailureMetadata(Value),
    /// Replace the response with a literal value
    ByzantineFault(ByzantineFault),
    /// Replace the response with a transformer mutation
    TransformerFault(TransformerFault),
}

impl FaultInstruction {
    /// Wire name of this instruction's kind.
    pub fn kind(&self) -> &'static str {
        match self {
            FaultInstruction::ForcedException(_) => "forced_exception",
            FaultInstruction::FailureMetadata(_) => "failure_metadata",
            FaultInstruction::ByzantineFault(_) => "byzantine_fault",
            FaultInstruction::TransformerFault(_) => "transformer_fault",
        }
    }

    /// Pick the instruction out of a JSON object carrying one of the four
    /// keys; the first present in the order above wins.
    pub fn from_object(object: &Value) -> FilibusterResult<Option<Self>> {
        for key in [
            "forced_exception",
            "failure_metadata",
            "byzantine_fault",
            "transformer_fault",
        ] {
            if let Some(inner) = object.get(key) {
                let mut wrapper = Map::new();
                wrapper.insert(key.to_string(), inner.clone());
                return Ok(Some(serde_json::from_value(Value::Object(wrapper))?));
            }
        }
        Ok(None)
    }

    /// `{"<kind>": {...}}`
    pub fn to_object(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Answer to `PUT /filibuster/create`.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateResponse {
    /// Id assigned to the invocation
    pub generated_id: i64,
    /// Fault to inject, if any
    pub fault: Option<FaultInstruction>,
}

impl CreateResponse {
    /// Parse the wire body; a missing `generated_id` is malformed.
    pub fn from_json(body: &Value) -> FilibusterResult<Self> {
        let generated_id = body
            .get("generated_id")
            .and_then(Value::as_i64)
            .ok_or_else(|| {
                crate::errors::FilibusterError::MalformedResponse(format!(
                    "missing generated_id in {body}"
                ))
            })?;
        Ok(Self {
            generated_id,
            fault: FaultInstruction::from_object(body)?,
        })
    }

    /// Render the wire body.
    pub fn to_json(&self) -> Value {
        let mut body = match &self.fault {
            Some(fault) => fault.to_object(),
            None => Value::Object(Map::new()),
        };
        if let Value::Object(map) = &mut body {
            map.insert("generated_id".into(), Value::from(self.generated_id));
        }
        body
    }
}

/// Answer to `POST /filibuster/update`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateResponse {
    /// Rewritten execution index, if the decision source wants one
    #[serde(default)]
    pub execution_index: Option<String>,
}

/// Something that decides, per invocation, whether to inject a fault.
pub trait DecisionSource: Send + Sync {
    /// Short name used in log lines.
    fn name(&self) -> &'static str;

    /// Whether this is the first request from `service` in the current test
    /// execution, which resets its clocks and indexes.
    fn is_new_test_execution(&self, service: &str) -> FilibusterResult<bool>;

    /// Register an invocation record.
    fn create_invocation(&self, payload: &Value) -> FilibusterResult<CreateResponse>;

    /// Report a completion or a request receipt.
    fn update_invocation(&self, payload: &Value, is_update: bool)
        -> FilibusterResult<UpdateResponse>;
}
