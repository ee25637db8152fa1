// Copyright 2025 Cowboy AI, LLC.

//! Anti-pattern detectors run over a finished test execution.
//!
//! Each analyzer sees the RPCs of one execution in invocation order and
//! collects [`AnalyzerWarning`]s, keyed by the execution index of the RPC
//! that triggered them.

use crate::dei::DistributedExecutionIndex;
use crate::errors::{FilibusterError, FilibusterResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// Minimum shared substring length for the data-flow analyzers.
pub const LCS_THRESHOLD: usize = 10;

/// A finding attached to one RPC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzerWarning {
    /// Serialized execution index of the RPC
    pub execution_index: String,
    /// Analyzer name
    pub name: String,
    /// What was observed
    pub description: String,
    /// What to change
    pub recommendation: String,
    /// Why it matters
    pub impact: String,
    /// Analyzer-specific detail, usually the method
    pub details: String,
}

/// One RPC as seen by an analyzer.
#[derive(Debug, Clone, Copy)]
pub struct RpcRecord<'a> {
    /// Position in invocation order
    pub position: usize,
    /// Execution index
    pub execution_index: &'a DistributedExecutionIndex,
    /// Invocation payload
    pub invocation: &'a Value,
    /// Fault injected, as `{"<kind>": {...}}`
    pub fault: Option<&'a Value>,
    /// Completion payload, absent if the call never completed
    pub response: Option<&'a Value>,
    /// Whether the response was served from a cache
    pub cached: bool,
}

impl RpcRecord<'_> {
    fn method(&self) -> &str {
        self.invocation.get("method").and_then(Value::as_str).unwrap_or_default()
    }

    fn module(&self) -> &str {
        self.invocation.get("module").and_then(Value::as_str).unwrap_or_default()
    }

    fn args(&self) -> &Value {
        self.invocation.get("args").unwrap_or(&Value::Null)
    }

    fn args_text(&self) -> &str {
        self.args().get("toString").and_then(Value::as_str).unwrap_or_default()
    }
}

/// Detects one anti-pattern.
pub trait ReportAnalyzer {
    /// Name used in warnings
    fn name(&self) -> &'static str;

    /// Inspect the next RPC.
    fn rpc(&mut self, test_passed: bool, rpc: &RpcRecord<'_>) -> FilibusterResult<()>;

    /// Collected warnings, draining them.
    fn take_warnings(&mut self) -> Vec<AnalyzerWarning>;

    /// Whether warnings are reported for a test with this outcome.
    fn report_when(&self, _test_passed: bool) -> bool {
        true
    }
}

/// The built-in analyzers.
pub fn default_analyzers(avoid_redundant_injections: bool) -> Vec<Box<dyn ReportAnalyzer>> {
    vec![
        Box::new(RedundantRpcAnalyzer::new(avoid_redundant_injections)),
        Box::new(UnimplementedFailuresAnalyzer::default()),
        Box::new(ResponseBecomesRequestAnalyzer::default()),
        Box::new(MultipleInvocationsForIndividualMutationsAnalyzer::default()),
    ]
}

/// Longest common substring, by characters; the earliest in `a` wins ties.
pub fn longest_common_substring(a: &str, b: &str) -> String {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut previous = vec![0usize; b.len() + 1];
    let (mut best_len, mut best_end) = (0, 0);

    for i in 1..=a.len() {
        let mut current = vec![0usize; b.len() + 1];
        for j in 1..=b.len() {
            if a[i - 1] == b[j - 1] {
                current[j] = previous[j - 1] + 1;
                if current[j] > best_len {
                    best_len = current[j];
                    best_end = i;
                }
            }
        }
        previous = current;
    }
    a[best_end - best_len..best_end].iter().collect()
}

fn warning(
    name: &str,
    rpc: &RpcRecord<'_>,
    description: String,
    recommendation: &str,
    impact: &str,
) -> AnalyzerWarning {
    AnalyzerWarning {
        execution_index: rpc.execution_index.to_string(),
        name: name.to_string(),
        description,
        recommendation: recommendation.to_string(),
        impact: impact.to_string(),
        details: rpc.method().to_string(),
    }
}

/// Flags an RPC repeating an earlier one: same callsite signature, same
/// arguments, same response.
#[derive(Debug, Default)]
pub struct RedundantRpcAnalyzer {
    avoid_redundant_injections: bool,
    seen: HashSet<String>,
    warnings: Vec<AnalyzerWarning>,
}

impl RedundantRpcAnalyzer {
    /// With `avoid_redundant_injections`, repeats served from a cache are
    /// not flagged.
    pub fn new(avoid_redundant_injections: bool) -> Self {
        Self {
            avoid_redundant_injections,
            ..Self::default()
        }
    }
}

impl ReportAnalyzer for RedundantRpcAnalyzer {
    fn name(&self) -> &'static str {
        "RedundantRPC"
    }

    fn rpc(&mut self, _test_passed: bool, rpc: &RpcRecord<'_>) -> FilibusterResult<()> {
        let Some(response) = rpc.response else {
            return Ok(());
        };
        let outcome = ["return_value", "exception", "byzantine_fault", "transformer_fault"]
            .iter()
            .find_map(|key| response.get(*key))
            .ok_or_else(|| {
                FilibusterError::Report(format!(
                    "response at {} carries no outcome",
                    rpc.execution_index
                ))
            })?;

        let key = format!(
            "{}{}{}",
            rpc.execution_index
                .projection_last_key_with_only_metadata_and_signature()
                .unwrap_or_default(),
            rpc.args_text(),
            outcome
        );

        if !self.seen.insert(key) && !(self.avoid_redundant_injections && rpc.cached) {
            self.warnings.push(warning(
                self.name(),
                rpc,
                format!(
                    "An RPC to {} repeats an earlier RPC with the same arguments and the same response.",
                    rpc.method()
                ),
                "Reuse the earlier response instead of issuing the RPC again.",
                "Redundant RPCs add latency and multiply the faults explored for one logical call.",
            ));
        }
        Ok(())
    }

    fn take_warnings(&mut self) -> Vec<AnalyzerWarning> {
        std::mem::take(&mut self.warnings)
    }
}

/// Flags `UNIMPLEMENTED` failures that were not injected, in tests that
/// still passed.
#[derive(Debug, Default)]
pub struct UnimplementedFailuresAnalyzer {
    warnings: Vec<AnalyzerWarning>,
}

impl ReportAnalyzer for UnimplementedFailuresAnalyzer {
    fn name(&self) -> &'static str {
        "UnimplementedFailures"
    }

    fn rpc(&mut self, _test_passed: bool, rpc: &RpcRecord<'_>) -> FilibusterResult<()> {
        let code = rpc
            .response
            .and_then(|r| r.pointer("/exception/metadata/code"))
            .and_then(Value::as_str);
        if code != Some("UNIMPLEMENTED") {
            return Ok(());
        }

        let injected = rpc
            .fault
            .and_then(|f| f.pointer("/forced_exception/metadata/code"))
            .and_then(Value::as_str)
            == code;
        if !injected {
            self.warnings.push(warning(
                self.name(),
                rpc,
                format!("The RPC to {} failed as UNIMPLEMENTED and the test still passed.", rpc.method()),
                "Implement the method, or make the test assert on this failure.",
                "The test passes without exercising the functionality it targets.",
            ));
        }
        Ok(())
    }

    fn take_warnings(&mut self) -> Vec<AnalyzerWarning> {
        std::mem::take(&mut self.warnings)
    }

    fn report_when(&self, test_passed: bool) -> bool {
        test_passed
    }
}

/// Flags a request carrying a large part of the response of the RPC
/// directly before it, to the same module.
#[derive(Debug, Default)]
pub struct ResponseBecomesRequestAnalyzer {
    previous: Vec<(usize, Value, Option<Value>)>,
    warnings: Vec<AnalyzerWarning>,
}

impl ReportAnalyzer for ResponseBecomesRequestAnalyzer {
    fn name(&self) -> &'static str {
        "ResponseBecomesRequest"
    }

    fn rpc(&mut self, _test_passed: bool, rpc: &RpcRecord<'_>) -> FilibusterResult<()> {
        for (position, invocation, response) in &self.previous {
            let Some(return_value) = response.as_ref().and_then(|r| r.get("return_value")) else {
                continue;
            };
            let same_module =
                invocation.get("module").and_then(Value::as_str).unwrap_or_default() == rpc.module();
            if position + 1 != rpc.position || !same_module {
                continue;
            }
            let shared = longest_common_substring(rpc.args_text(), &return_value.to_string());
            if shared.chars().count() >= LCS_THRESHOLD {
                let previous_method =
                    invocation.get("method").and_then(Value::as_str).unwrap_or_default();
                self.warnings.push(warning(
                    "ResponseBecomesRequest",
                    rpc,
                    format!(
                        "The following string ({shared}) used in a request to {} was found in a previous response from {previous_method}",
                        rpc.method()
                    ),
                    "Have the service that produced the value pass it on, or combine the two RPCs.",
                    "Round-tripping a response through the caller couples the two RPCs and doubles the failure surface.",
                ));
            }
        }
        self.previous
            .push((rpc.position, rpc.invocation.clone(), rpc.response.cloned()));
        Ok(())
    }

    fn take_warnings(&mut self) -> Vec<AnalyzerWarning> {
        std::mem::take(&mut self.warnings)
    }
}

/// Flags back-to-back RPCs to the same method whose different arguments
/// share a long substring, typically one item mutated per call.
#[derive(Debug, Default)]
pub struct MultipleInvocationsForIndividualMutationsAnalyzer {
    previous: Vec<(usize, Value)>,
    warnings: Vec<AnalyzerWarning>,
}

impl ReportAnalyzer for MultipleInvocationsForIndividualMutationsAnalyzer {
    fn name(&self) -> &'static str {
        "MultipleInvocationsForIndividualMutations"
    }

    fn rpc(&mut self, _test_passed: bool, rpc: &RpcRecord<'_>) -> FilibusterResult<()> {
        for (position, invocation) in &self.previous {
            let previous_method = invocation.get("method").and_then(Value::as_str).unwrap_or_default();
            let previous_args = invocation.get("args").unwrap_or(&Value::Null);
            if position + 1 != rpc.position
                || previous_method != rpc.method()
                || previous_args == rpc.args()
            {
                continue;
            }
            let previous_text = previous_args.get("toString").and_then(Value::as_str).unwrap_or_default();
            let shared = longest_common_substring(rpc.args_text(), previous_text);
            if shared.chars().count() >= LCS_THRESHOLD {
                self.warnings.push(warning(
                    "MultipleInvocationsForIndividualMutations",
                    rpc,
                    format!(
                        "The following string ({shared}) was used in a request to {previous_method} and used again to the same method in this test execution."
                    ),
                    "Batch the mutations into a single RPC.",
                    "Each extra RPC is another call that can fail part way through the sequence.",
                ));
            }
        }
        self.previous.push((rpc.position, rpc.invocation.clone()));
        Ok(())
    }

    fn take_warnings(&mut self) -> Vec<AnalyzerWarning> {
        std::mem::take(&mut self.warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dei::ExecutionKey;
    use serde_json::json;
    use test_case::test_case;

    #[test_case("abcdef", "zcdez" => "cde" ; "middle")]
    #[test_case("abc", "xyz" => "" ; "disjoint")]
    #[test_case("", "abc" => "" ; "empty")]
    #[test_case("hello world", "hello world" => "hello world" ; "identical")]
    fn test_longest_common_substring(a: &str, b: &str) -> String {
        longest_common_substring(a, b)
    }

    fn dei(name: &str) -> DistributedExecutionIndex {
        let mut dei = DistributedExecutionIndex::new();
        dei.push(ExecutionKey::from_rendered(name));
        dei
    }

    fn invocation(module: &str, method: &str, args: &str) -> Value {
        json!({"module": module, "method": method, "args": {"class": "Req", "toString": args}})
    }

    #[test]
    fn test_unimplemented_only_when_not_injected() {
        let index = dei("a");
        let inv = invocation("Svc", "Svc/Get", "x");
        let response = json!({"exception": {"name": "e", "metadata": {"code": "UNIMPLEMENTED"}}});
        let injected = json!({"forced_exception": {"name": "e", "metadata": {"code": "UNIMPLEMENTED"}}});

        let mut analyzer = UnimplementedFailuresAnalyzer::default();
        let rpc = RpcRecord {
            position: 0,
            execution_index: &index,
            invocation: &inv,
            fault: Some(&injected),
            response: Some(&response),
            cached: false,
        };
        analyzer.rpc(true, &rpc).unwrap();
        assert!(analyzer.take_warnings().is_empty());

        analyzer.rpc(true, &RpcRecord { fault: None, ..rpc }).unwrap();
        let warnings = analyzer.take_warnings();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].details, "Svc/Get");
        assert!(analyzer.report_when(true));
        assert!(!analyzer.report_when(false));
    }

    #[test]
    fn test_response_becomes_request_needs_adjacent_same_module() {
        let (first, second) = (dei("a"), dei("b"));
        let inv1 = invocation("Users", "Users/Find", "name");
        let resp1 = json!({"return_value": {"__class__": "User", "value": "user-0123456789"}});
        let inv2 = invocation("Users", "Users/Delete", "id=user-0123456789");

        let mut analyzer = ResponseBecomesRequestAnalyzer::default();
        analyzer
            .rpc(true, &RpcRecord { position: 0, execution_index: &first, invocation: &inv1, fault: None, response: Some(&resp1), cached: false })
            .unwrap();
        analyzer
            .rpc(true, &RpcRecord { position: 1, execution_index: &second, invocation: &inv2, fault: None, response: None, cached: false })
            .unwrap();
        let warnings = analyzer.take_warnings();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].execution_index, second.to_string());
        assert!(warnings[0].description.contains("user-0123456789"));

        let inv3 = invocation("Orders", "Orders/Delete", "id=user-0123456789");
        analyzer
            .rpc(true, &RpcRecord { position: 2, execution_index: &second, invocation: &inv3, fault: None, response: None, cached: false })
            .unwrap();
        assert!(analyzer.take_warnings().is_empty());
    }

    #[test]
    fn test_multiple_invocations_for_individual_mutations() {
        let index = dei("a");
        let inv1 = invocation("Cart", "Cart/Add", "cart=abcdefghij,item=1");
        let inv2 = invocation("Cart", "Cart/Add", "cart=abcdefghij,item=2");

        let mut analyzer = MultipleInvocationsForIndividualMutationsAnalyzer::default();
        for (position, inv) in [&inv1, &inv2].into_iter().enumerate() {
            analyzer
                .rpc(true, &RpcRecord { position, execution_index: &index, invocation: inv, fault: None, response: None, cached: false })
                .unwrap();
        }
        assert_eq!(analyzer.take_warnings().len(), 1);

        analyzer
            .rpc(true, &RpcRecord { position: 2, execution_index: &index, invocation: &inv2, fault: None, response: None, cached: false })
            .unwrap();
        assert!(analyzer.take_warnings().is_empty());
    }

    #[test]
    fn test_redundant_rpc_respects_cache() {
        let index = dei("a");
        let inv = invocation("Svc", "Svc/Get", "x");
        let response = json!({"return_value": {"value": 1}});
        let rpc = RpcRecord { position: 0, execution_index: &index, invocation: &inv, fault: None, response: Some(&response), cached: true };

        let mut strict = RedundantRpcAnalyzer::new(false);
        strict.rpc(true, &rpc).unwrap();
        strict.rpc(true, &RpcRecord { position: 1, ..rpc }).unwrap();
        assert_eq!(strict.take_warnings().len(), 1);

        let mut lenient = RedundantRpcAnalyzer::new(true);
        lenient.rpc(true, &rpc).unwrap();
        lenient.rpc(true, &RpcRecord { position: 1, ..rpc }).unwrap();
        assert!(lenient.take_warnings().is_empty());
    }

    #[test]
    fn test_redundant_rpc_rejects_response_without_outcome() {
        let index = dei("a");
        let inv = invocation("Svc", "Svc/Get", "x");
        let response = json!({"generated_id": 1});
        let mut analyzer = RedundantRpcAnalyzer::new(false);
        let err = analyzer
            .rpc(true, &RpcRecord { position: 0, execution_index: &index, invocation: &inv, fault: None, response: Some(&response), cached: false })
            .unwrap_err();
        assert!(matches!(err, FilibusterError::Report(_)));
    }
}
