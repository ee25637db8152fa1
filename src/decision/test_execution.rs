// Copyright 2025 Cowboy AI, LLC.

//! Record of one test execution

use super::FaultInstruction;
use crate::dei::DistributedExecutionIndex;
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashSet;
use tracing::info;

/// RPCs seen and faults injected during one execution of a test.
///
/// A *partial* execution carries only the faults to inject; a *concrete*
/// execution is the realized trace, seeded with the faults of the partial
/// execution that drove it.
#[derive(Debug, Clone, Default)]
pub struct TestExecution {
    generated_id: i64,
    executed_rpcs: IndexMap<DistributedExecutionIndex, Value>,
    faults_to_inject: IndexMap<DistributedExecutionIndex, FaultInstruction>,
    failed_rpcs: IndexMap<DistributedExecutionIndex, Value>,
    first_request_seen_by_service: HashSet<String>,
}

impl PartialEq for TestExecution {
    fn eq(&self, other: &Self) -> bool {
        self.executed_rpcs == other.executed_rpcs && self.faults_to_inject == other.faults_to_inject
    }
}

impl TestExecution {
    /// Empty execution.
    pub fn new() -> Self {
        Self::default()
    }

    /// Concrete execution seeded with a partial execution's faults.
    pub fn from_partial(partial: &TestExecution) -> Self {
        Self {
            faults_to_inject: partial.faults_to_inject.clone(),
            ..Self::default()
        }
    }

    /// Partial execution carrying this execution's faults.
    pub fn to_partial(&self) -> Self {
        Self {
            faults_to_inject: self.faults_to_inject.clone(),
            ..Self::default()
        }
    }

    /// Same faults at the same indexes.
    pub fn same_faults(&self, other: &TestExecution) -> bool {
        self.faults_to_inject == other.faults_to_inject
    }

    /// Record an invocation; returns its generated id.
    pub fn add_request(&mut self, dei: DistributedExecutionIndex, payload: &Value) -> i64 {
        let mut cleaned = payload.clone();
        if let Value::Object(map) = &mut cleaned {
            map.remove("instrumentation_type");
        }
        self.executed_rpcs.insert(dei, cleaned);
        self.generated_id += 1;
        self.generated_id
    }

    /// Record a completion; completions carrying an exception are failures.
    pub fn add_response(&mut self, dei: DistributedExecutionIndex, payload: &Value) {
        if payload.get("exception").is_some() {
            self.failed_rpcs.insert(dei, payload.clone());
        }
    }

    /// Schedule a fault, replacing any fault already set for the index.
    pub fn add_fault(&mut self, dei: DistributedExecutionIndex, fault: FaultInstruction) {
        self.faults_to_inject.insert(dei, fault);
    }

    /// Fault scheduled for an index.
    pub fn fault_for(&self, dei: &DistributedExecutionIndex) -> Option<&FaultInstruction> {
        self.faults_to_inject.get(dei)
    }

    /// Scheduled faults in insertion order.
    pub fn faults(&self) -> impl Iterator<Item = (&DistributedExecutionIndex, &FaultInstruction)> {
        self.faults_to_inject.iter()
    }

    /// Executed RPC payloads in execution order.
    pub fn executed_rpcs(&self) -> impl Iterator<Item = (&DistributedExecutionIndex, &Value)> {
        self.executed_rpcs.iter()
    }

    /// Completions that carried an exception.
    pub fn failed_rpcs(&self) -> impl Iterator<Item = (&DistributedExecutionIndex, &Value)> {
        self.failed_rpcs.iter()
    }

    /// Whether a first request from the service was registered.
    pub fn has_seen_first_request_from_service(&self, service: &str) -> bool {
        self.first_request_seen_by_service.contains(service)
    }

    /// Register the first request from a service.
    pub fn register_first_request_from_service(&mut self, service: &str) {
        self.first_request_seen_by_service.insert(service.to_string());
    }

    /// Whether any fault is scheduled.
    pub fn was_fault_injected(&self) -> bool {
        !self.faults_to_inject.is_empty()
    }

    /// Whether a fault hit an RPC to a module containing `service`.
    pub fn was_fault_injected_on_service(&self, service: &str) -> bool {
        self.was_fault_injected_matching("module", service, None)
    }

    /// Whether a fault hit `service/method`.
    pub fn was_fault_injected_on_method(&self, service: &str, method: &str) -> bool {
        self.was_fault_injected_matching("method", &format!("{service}/{method}"), None)
    }

    /// Whether a fault hit `service/method` with arguments containing `contains`.
    pub fn was_fault_injected_on_method_where_request_contains(
        &self,
        service: &str,
        method: &str,
        contains: &str,
    ) -> bool {
        self.was_fault_injected_matching("method", &format!("{service}/{method}"), Some(contains))
    }

    /// Whether a fault hit an RPC whose canonical arguments equal `serialized`.
    pub fn was_fault_injected_on_request(&self, serialized: &str) -> bool {
        self.executed_rpcs.iter().any(|(dei, payload)| {
            arguments_text(payload) == Some(serialized) && self.faults_to_inject.contains_key(dei)
        })
    }

    fn was_fault_injected_matching(&self, field: &str, needle: &str, contains: Option<&str>) -> bool {
        self.executed_rpcs.iter().any(|(dei, payload)| {
            let field_matches = payload
                .get(field)
                .and_then(Value::as_str)
                .is_some_and(|v| v.contains(needle));
            let arguments_match = match contains {
                Some(c) => arguments_text(payload).is_some_and(|a| a.contains(c)),
                None => true,
            };
            field_matches && arguments_match && self.faults_to_inject.contains_key(dei)
        })
    }

    /// Log the executed RPCs and injected faults.
    pub fn log_rpcs(&self) {
        for (dei, payload) in &self.executed_rpcs {
            info!(execution_index = %dei, payload = %payload, "RPC executed");
        }
        if self.faults_to_inject.is_empty() {
            info!("no faults injected");
        }
        for (dei, fault) in &self.faults_to_inject {
            let request = self.executed_rpcs.get(dei).cloned().unwrap_or_else(|| {
                serde_json::json!({"error": "no request information found"})
            });
            info!(execution_index = %dei, fault = %fault.to_object(), request = %request, "fault injected");
        }
    }
}

fn arguments_text(payload: &Value) -> Option<&str> {
    payload.get("args")?.get("toString")?.as_str()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dei::ExecutionKey;
    use serde_json::json;

    fn dei(name: &str) -> DistributedExecutionIndex {
        let mut dei = DistributedExecutionIndex::new();
        dei.push(ExecutionKey::from_rendered(name));
        dei
    }

    fn unavailable() -> FaultInstruction {
        FaultInstruction::FailureMetadata(json!({"return_value": {"status_code": "503"}}))
    }

    #[test]
    fn test_generated_ids_increment() {
        let mut execution = TestExecution::new();
        assert_eq!(execution.add_request(dei("a"), &json!({})), 1);
        assert_eq!(execution.add_request(dei("b"), &json!({})), 2);
    }

    #[test]
    fn test_instrumentation_type_is_stripped() {
        let mut execution = TestExecution::new();
        execution.add_request(dei("a"), &json!({"instrumentation_type": "invocation", "method": "m"}));
        let (_, payload) = execution.executed_rpcs().next().unwrap();
        assert_eq!(payload, &json!({"method": "m"}));
    }

    #[test]
    fn test_fault_matchers() {
        let mut execution = TestExecution::new();
        execution.add_fault(dei("a"), unavailable());
        execution.add_request(
            dei("a"),
            &json!({"module": "hello.World", "method": "hello.World/Hello", "args": {"toString": "name=x"}}),
        );
        execution.add_request(dei("b"), &json!({"module": "other", "method": "other/Get"}));

        assert!(execution.was_fault_injected());
        assert!(execution.was_fault_injected_on_service("hello"));
        assert!(!execution.was_fault_injected_on_service("other"));
        assert!(execution.was_fault_injected_on_method("hello.World", "Hello"));
        assert!(execution.was_fault_injected_on_method_where_request_contains("hello.World", "Hello", "x"));
        assert!(!execution.was_fault_injected_on_method_where_request_contains("hello.World", "Hello", "y"));
        assert!(execution.was_fault_injected_on_request("name=x"));
    }

    #[test]
    fn test_partial_and_equality() {
        let mut concrete = TestExecution::new();
        concrete.add_fault(dei("a"), unavailable());
        concrete.add_request(dei("a"), &json!({}));

        let partial = concrete.to_partial();
        assert!(partial.same_faults(&concrete));
        assert_ne!(partial, concrete);

        let reseeded = TestExecution::from_partial(&partial);
        assert_eq!(reseeded, partial);
    }

    #[test]
    fn test_failed_rpcs_recorded() {
        let mut execution = TestExecution::new();
        execution.add_response(dei("a"), &json!({"return_value": {}}));
        execution.add_response(dei("b"), &json!({"exception": {"name": "x"}}));
        assert_eq!(execution.failed_rpcs().count(), 1);
    }
}
