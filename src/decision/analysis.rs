// Copyright 2025 Cowboy AI, LLC.

//! Analysis configuration: which faults to try on which RPCs.
//!
//! ```json
//! {
//!   "java.grpc": {
//!     "pattern": "(.*Service/.*)",
//!     "exceptions": [{"name": "io.grpc.StatusRuntimeException", "metadata": {"code": "UNAVAILABLE"}}],
//!     "errors": [{"service_name": "hello", "types": [{"return_value": {"status_code": "503"}}]}],
//!     "transformers": [{"type": "StringTransformer"}]
//!   }
//! }
//! ```

use super::{ForcedException, FaultInstruction, TransformerFault};
use crate::errors::{FilibusterError, FilibusterResult};
use crate::transformers::TransformerKind;
use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use serde_json::Value;

fn case_insensitive(pattern: &str) -> FilibusterResult<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| FilibusterError::AnalysisConfiguration(format!("bad pattern {pattern}: {e}")))
}

#[derive(Debug, Deserialize)]
struct RawError {
    service_name: String,
    #[serde(default)]
    types: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RawTransformer {
    #[serde(rename = "type")]
    transformer: TransformerKind,
}

#[derive(Debug, Deserialize)]
struct RawRule {
    pattern: Option<String>,
    #[serde(default)]
    exceptions: Vec<ForcedException>,
    #[serde(default)]
    errors: Vec<RawError>,
    #[serde(default)]
    transformers: Vec<RawTransformer>,
}

#[derive(Debug, Clone)]
struct ErrorRule {
    service_pattern: Regex,
    faults: Vec<FaultInstruction>,
}

/// One named rule of an analysis configuration.
#[derive(Debug, Clone)]
pub struct AnalysisRule {
    name: String,
    pattern: Regex,
    exceptions: Vec<ForcedException>,
    errors: Vec<ErrorRule>,
    transformers: Vec<TransformerKind>,
}

impl AnalysisRule {
    /// Rule name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Case-insensitive search of the rule pattern in a method name.
    pub fn is_pattern_match(&self, method: &str) -> bool {
        self.pattern.is_match(method)
    }

    fn faults_for(&self, module: &str, method: &str) -> Vec<FaultInstruction> {
        if !self.is_pattern_match(method) {
            return Vec::new();
        }

        let mut faults: Vec<FaultInstruction> = self
            .exceptions
            .iter()
            .cloned()
            .map(FaultInstruction::ForcedException)
            .collect();

        for error in &self.errors {
            if error.service_pattern.is_match(module) {
                faults.extend(error.faults.iter().cloned());
            }
        }

        faults.extend(self.transformers.iter().map(|kind| {
            FaultInstruction::TransformerFault(TransformerFault {
                transformer: *kind,
                accumulator: Value::Null,
            })
        }));
        faults
    }
}

/// Every rule of an analysis file, in file order.
#[derive(Debug, Clone, Default)]
pub struct AnalysisConfiguration {
    rules: Vec<AnalysisRule>,
}

impl AnalysisConfiguration {
    /// Parse `{name: {pattern, exceptions, errors, transformers}}`.
    ///
    /// A rule without a pattern matches every method. Error `types` entries
    /// that are already fault objects are taken as-is; anything else becomes
    /// `failure_metadata`.
    pub fn from_json(document: &Value) -> FilibusterResult<Self> {
        let object = document.as_object().ok_or_else(|| {
            FilibusterError::AnalysisConfiguration("analysis file must be a JSON object".into())
        })?;

        let mut rules = Vec::with_capacity(object.len());
        for (name, body) in object {
            let raw: RawRule = serde_json::from_value(body.clone()).map_err(|e| {
                FilibusterError::AnalysisConfiguration(format!("rule {name}: {e}"))
            })?;

            let mut errors = Vec::with_capacity(raw.errors.len());
            for error in raw.errors {
                let mut faults = Vec::with_capacity(error.types.len());
                for fault_type in error.types {
                    let fault = match FaultInstruction::from_object(&fault_type)? {
                        Some(fault) => fault,
                        None => FaultInstruction::FailureMetadata(fault_type),
                    };
                    faults.push(fault);
                }
                errors.push(ErrorRule {
                    service_pattern: case_insensitive(&error.service_name)?,
                    faults,
                });
            }

            rules.push(AnalysisRule {
                name: name.clone(),
                pattern: case_insensitive(raw.pattern.as_deref().unwrap_or(".*"))?,
                exceptions: raw.exceptions,
                errors,
                transformers: raw.transformers.into_iter().map(|t| t.transformer).collect(),
            });
        }
        Ok(Self { rules })
    }

    /// Rules in file order.
    pub fn rules(&self) -> &[AnalysisRule] {
        &self.rules
    }

    /// Faults to try for an invocation of `method` on `module`.
    pub fn faults_for(&self, module: &str, method: &str) -> Vec<FaultInstruction> {
        self.rules
            .iter()
            .flat_map(|rule| rule.faults_for(module, method))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn config() -> AnalysisConfiguration {
        AnalysisConfiguration::from_json(&json!({
            "grpc": {
                "pattern": "(.*Service/.*)",
                "exceptions": [
                    {"name": "io.grpc.StatusRuntimeException", "metadata": {"code": "UNAVAILABLE"}},
                    {"name": "io.grpc.StatusRuntimeException", "metadata": {"code": "DEADLINE_EXCEEDED"}}
                ],
                "errors": [
                    {"service_name": "HELLO", "types": [{"return_value": {"status_code": "503"}}]}
                ]
            },
            "mutations": {
                "pattern": "echo",
                "transformers": [{"type": "StringTransformer"}]
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_pattern_is_case_insensitive_search() {
        let config = config();
        assert_eq!(config.rules().len(), 2);
        let faults = config.faults_for("other", "world.worldservice/Get");
        assert_eq!(faults.len(), 2);
        assert!(faults.iter().all(|f| f.kind() == "forced_exception"));
    }

    #[test]
    fn test_error_rules_match_module() {
        let faults = config().faults_for("hello-service", "HelloService/Hello");
        assert_eq!(faults.len(), 3);
        assert_eq!(
            faults[2],
            FaultInstruction::FailureMetadata(json!({"return_value": {"status_code": "503"}}))
        );
    }

    #[test]
    fn test_transformer_rules() {
        let faults = config().faults_for("svc", "EchoString");
        assert_eq!(
            faults,
            vec![FaultInstruction::TransformerFault(TransformerFault {
                transformer: TransformerKind::String,
                accumulator: Value::Null,
            })]
        );
    }

    #[test]
    fn test_no_match() {
        assert!(config().faults_for("svc", "Unrelated").is_empty());
    }

    #[test]
    fn test_malformed_configuration() {
        assert!(AnalysisConfiguration::from_json(&json!([])).is_err());
        assert!(AnalysisConfiguration::from_json(&json!({"r": {"pattern": "("}})).is_err());
        assert!(AnalysisConfiguration::from_json(&json!({"r": {"exceptions": [{}]}})).is_err());
    }
}
