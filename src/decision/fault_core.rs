// Copyright 2025 Cowboy AI, LLC.

//! In-process fault decision engine.
//!
//! The core explores the fault space one test execution at a time. Every
//! invocation it sees is matched against the analysis configuration; each
//! candidate fault becomes a partial execution (the faults of the current
//! execution plus the new one) queued for a later iteration, unless an
//! identical one was already explored or scheduled.

use super::{
    AnalysisConfiguration, CreateResponse, DecisionSource, FaultInstruction, TestExecution,
    TransformerFault, UpdateResponse,
};
use crate::config::FilibusterConfig;
use crate::dei::DistributedExecutionIndex;
use crate::errors::{FilibusterError, FilibusterResult};
use crate::report::{MaterializedReport, TestExecutionReport};
use crate::transformers::TransformerKind;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Shared handle to a core.
pub type CoreHandle = Arc<Mutex<FaultCore>>;

static CURRENT: RwLock<Option<CoreHandle>> = parking_lot::const_rwlock(None);

fn execution_index_of(payload: &Value) -> FilibusterResult<DistributedExecutionIndex> {
    payload
        .get("execution_index")
        .and_then(Value::as_str)
        .ok_or_else(|| FilibusterError::MalformedResponse(format!("missing execution_index in {payload}")))?
        .parse()
}

/// Explores fault combinations across test executions.
#[derive(Debug)]
pub struct FaultCore {
    unexplored: VecDeque<TestExecution>,
    explored: Vec<TestExecution>,
    current_partial: Option<TestExecution>,
    current_concrete: Option<TestExecution>,
    analysis: Option<AnalysisConfiguration>,
    report: TestExecutionReport,
    avoid_redundant_injections: bool,
    report_directory: PathBuf,
}

impl Default for FaultCore {
    fn default() -> Self {
        Self::new()
    }
}

impl FaultCore {
    /// A core about to run its first, fault-free execution.
    pub fn new() -> Self {
        Self {
            unexplored: VecDeque::new(),
            explored: Vec::new(),
            current_partial: None,
            current_concrete: Some(TestExecution::new()),
            analysis: None,
            report: TestExecutionReport::new(),
            avoid_redundant_injections: false,
            report_directory: FilibusterConfig::default().report_directory,
        }
    }

    /// Take report settings from `config`.
    pub fn configured(mut self, config: &FilibusterConfig) -> Self {
        self.avoid_redundant_injections = config.avoid_redundant_injections;
        self.report_directory = config.report_directory.clone();
        self.report = TestExecutionReport::new()
            .avoiding_redundant_injections(self.avoid_redundant_injections);
        self
    }

    /// A core driven by an analysis configuration.
    pub fn with_analysis(analysis: AnalysisConfiguration) -> Self {
        Self {
            analysis: Some(analysis),
            ..Self::new()
        }
    }

    /// Make `core` the process-wide current core, replacing any other.
    pub fn install(core: FaultCore) -> CoreHandle {
        let handle = Arc::new(Mutex::new(core));
        let mut current = CURRENT.write();
        if current.is_some() {
            warn!("replacing an installed fault core");
        }
        *current = Some(Arc::clone(&handle));
        handle
    }

    /// Remove the current core.
    pub fn teardown() -> Option<CoreHandle> {
        CURRENT.write().take()
    }

    /// The current core, if one is installed.
    pub fn current() -> Option<CoreHandle> {
        CURRENT.read().clone()
    }

    /// Whether a core is installed.
    pub fn has_current() -> bool {
        Self::current().is_some()
    }

    /// Load an analysis file.
    pub fn analysis_file(&mut self, document: &Value) -> FilibusterResult<()> {
        let analysis = AnalysisConfiguration::from_json(document)?;
        info!(rules = analysis.rules().len(), "analysis configuration loaded");
        self.analysis = Some(analysis);
        Ok(())
    }

    /// Register an outgoing invocation and return the fault to inject, if the
    /// current execution carries one for this index.
    pub fn begin_invocation(&mut self, payload: &Value) -> FilibusterResult<CreateResponse> {
        let dei = execution_index_of(payload)?;

        let Some(concrete) = self.current_concrete.as_mut() else {
            warn!(execution_index = %dei, "invocation outside of a test execution");
            return Ok(CreateResponse {
                generated_id: -1,
                fault: None,
            });
        };
        let generated_id = concrete.add_request(dei.clone(), payload);
        self.report.record_invocation(dei.clone(), payload.clone());

        let candidates = match &self.analysis {
            Some(analysis) => {
                let module = payload.get("module").and_then(Value::as_str).unwrap_or_default();
                let method = payload.get("method").and_then(Value::as_str).unwrap_or_default();
                analysis.faults_for(module, method)
            }
            None => Vec::new(),
        };
        for fault in candidates {
            self.schedule(&dei, fault);
        }

        let fault = self
            .current_partial
            .as_ref()
            .and_then(|partial| partial.fault_for(&dei))
            .cloned();
        if let Some(fault) = &fault {
            debug!(execution_index = %dei, kind = fault.kind(), "injecting fault");
        }

        Ok(CreateResponse { generated_id, fault })
    }

    /// Record a completion. A transformer fault that reports more mutations
    /// schedules the next one.
    pub fn end_invocation(&mut self, payload: &Value) -> FilibusterResult<UpdateResponse> {
        let dei = execution_index_of(payload)?;
        debug!(execution_index = %dei, "end invocation");

        if let Some(concrete) = self.current_concrete.as_mut() {
            concrete.add_response(dei.clone(), payload);
        }
        let kind = payload.get("instrumentation_type").and_then(Value::as_str);
        if kind == Some("invocation_complete") {
            self.report.record_invocation_complete(dei.clone(), payload.clone());
        }

        if let Some(next) = next_transformer_fault(payload) {
            self.schedule(&dei, FaultInstruction::TransformerFault(next));
        }

        Ok(UpdateResponse {
            execution_index: Some(dei.to_string()),
        })
    }

    fn schedule(&mut self, dei: &DistributedExecutionIndex, fault: FaultInstruction) {
        let Some(concrete) = self.current_concrete.as_ref() else {
            return;
        };
        let mut partial = concrete.to_partial();
        partial.add_fault(dei.clone(), fault);

        let explored = self.explored.iter().any(|e| e.same_faults(&partial));
        let scheduled = self.unexplored.iter().any(|e| e.same_faults(&partial));
        let current = self
            .current_partial
            .as_ref()
            .is_some_and(|e| e.same_faults(&partial));

        if !explored && !scheduled && !current {
            self.unexplored.push_back(partial);
        }
    }

    /// True exactly once per service per test execution.
    pub fn is_new_test_execution(&mut self, service: &str) -> bool {
        info!(service, "is_new_test_execution called");
        match self.current_concrete.as_mut() {
            Some(concrete) if !concrete.has_seen_first_request_from_service(service) => {
                concrete.register_first_request_from_service(service);
                true
            }
            _ => false,
        }
    }

    /// Whether an execution is in progress.
    pub fn has_next_iteration(&self, iteration: u32) -> bool {
        info!(iteration, "has_next_iteration called");
        self.current_concrete.is_some()
    }

    /// Log the RPCs of the execution that just finished.
    pub fn complete_iteration(&self, iteration: u32) {
        info!(iteration, "complete_iteration called");
        if let Some(concrete) = &self.current_concrete {
            concrete.log_rpcs();
        }
    }

    /// Retire the current execution and start the next scheduled one, if any.
    pub fn teardowns_completed(&mut self, iteration: u32) {
        info!(
            iteration,
            remaining = self.unexplored.len(),
            "teardowns_completed called"
        );
        let Some(concrete) = self.current_concrete.take() else {
            return;
        };
        if let Some(partial) = self.current_partial.take() {
            self.explored.push(partial);
        }
        self.explored.push(concrete);

        self.report =
            TestExecutionReport::new().avoiding_redundant_injections(self.avoid_redundant_injections);
        if let Some(next) = self.unexplored.pop_front() {
            self.report
                .set_faults_injected(next.faults().map(|(dei, fault)| (dei.clone(), fault.to_object())));
            self.current_concrete = Some(TestExecution::from_partial(&next));
            self.current_partial = Some(next);
        }
    }

    /// The report of the execution in progress.
    pub fn report(&self) -> &TestExecutionReport {
        &self.report
    }

    /// Mark an RPC of the current execution as answered from a cache.
    pub fn record_cached_rpc(&mut self, execution_index: DistributedExecutionIndex) {
        self.report.record_cached_rpc(execution_index);
    }

    /// Write the report of the execution in progress under the configured
    /// report directory.
    pub fn write_report(
        &mut self,
        iteration: u32,
        exception_occurred: bool,
    ) -> anyhow::Result<MaterializedReport> {
        self.report
            .write_report(&self.report_directory, iteration, exception_occurred)
    }

    /// The execution in progress.
    pub fn current_test_execution(&self) -> Option<&TestExecution> {
        self.current_concrete.as_ref()
    }

    /// Number of scheduled, not yet run, executions.
    pub fn unexplored_count(&self) -> usize {
        self.unexplored.len()
    }

    /// Number of retired executions, partial and concrete.
    pub fn explored_count(&self) -> usize {
        self.explored.len()
    }

    /// Whether the current execution injects any fault.
    pub fn was_fault_injected(&self) -> bool {
        self.current_concrete
            .as_ref()
            .is_some_and(TestExecution::was_fault_injected)
    }

    /// Whether the current execution faults an RPC to `service`.
    pub fn was_fault_injected_on_service(&self, service: &str) -> bool {
        self.current_concrete
            .as_ref()
            .is_some_and(|e| e.was_fault_injected_on_service(service))
    }

    /// Whether the current execution faults `service/method`.
    pub fn was_fault_injected_on_method(&self, service: &str, method: &str) -> bool {
        self.current_concrete
            .as_ref()
            .is_some_and(|e| e.was_fault_injected_on_method(service, method))
    }

    /// Whether the current execution faults a request with these arguments.
    pub fn was_fault_injected_on_request(&self, serialized: &str) -> bool {
        self.current_concrete
            .as_ref()
            .is_some_and(|e| e.was_fault_injected_on_request(serialized))
    }
}

fn next_transformer_fault(payload: &Value) -> Option<TransformerFault> {
    let reported = payload.get("transformer_fault")?;
    if !reported.get("has_next").and_then(Value::as_bool).unwrap_or(false) {
        return None;
    }
    let transformer: TransformerKind =
        serde_json::from_value(reported.get("type")?.clone()).ok()?;
    Some(TransformerFault {
        transformer,
        accumulator: reported.get("accumulator").cloned().unwrap_or(Value::Null),
    })
}

/// Decision source backed by a [`FaultCore`].
#[derive(Debug, Clone, Default)]
pub struct CoreDecisionSource {
    handle: Option<CoreHandle>,
}

impl CoreDecisionSource {
    /// Resolve the process-wide installed core on every call.
    pub fn installed() -> Self {
        Self { handle: None }
    }

    /// Use a specific core.
    pub fn new(handle: CoreHandle) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    fn core(&self) -> CoreHandle {
        match &self.handle {
            Some(handle) => Arc::clone(handle),
            None => match FaultCore::current() {
                Some(handle) => handle,
                None => panic!("No current fault core instance; install one before instrumenting calls"),
            },
        }
    }
}

impl DecisionSource for CoreDecisionSource {
    fn name(&self) -> &'static str {
        "core"
    }

    fn is_new_test_execution(&self, service: &str) -> FilibusterResult<bool> {
        Ok(self.core().lock().is_new_test_execution(service))
    }

    fn create_invocation(&self, payload: &Value) -> FilibusterResult<CreateResponse> {
        self.core().lock().begin_invocation(payload)
    }

    fn update_invocation(&self, payload: &Value, _is_update: bool) -> FilibusterResult<UpdateResponse> {
        self.core().lock().end_invocation(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dei::ExecutionKey;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn dei(name: &str) -> String {
        let mut dei = DistributedExecutionIndex::new();
        dei.push(ExecutionKey::from_rendered(name));
        dei.to_string()
    }

    fn invocation(name: &str, method: &str) -> Value {
        json!({
            "instrumentation_type": "invocation",
            "module": "hello",
            "method": method,
            "execution_index": dei(name),
        })
    }

    fn analysis() -> AnalysisConfiguration {
        AnalysisConfiguration::from_json(&json!({
            "grpc": {
                "pattern": "Hello",
                "exceptions": [
                    {"name": "io.grpc.StatusRuntimeException", "metadata": {"code": "UNAVAILABLE"}}
                ]
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_first_execution_injects_nothing_and_schedules() {
        let mut core = FaultCore::with_analysis(analysis());
        let response = core.begin_invocation(&invocation("a", "Hello")).unwrap();
        assert_eq!(response.generated_id, 1);
        assert!(response.fault.is_none());
        assert_eq!(core.unexplored_count(), 1);

        core.begin_invocation(&invocation("a", "Hello")).unwrap();
        assert_eq!(core.unexplored_count(), 1, "duplicate schedule is ignored");
    }

    #[test]
    fn test_second_execution_injects_scheduled_fault() {
        let mut core = FaultCore::with_analysis(analysis());
        core.begin_invocation(&invocation("a", "HelloService/Hello")).unwrap();
        core.teardowns_completed(1);
        assert!(core.has_next_iteration(2));
        assert_eq!(core.explored_count(), 1);

        let response = core.begin_invocation(&invocation("a", "HelloService/Hello")).unwrap();
        assert_eq!(response.fault.as_ref().map(FaultInstruction::kind), Some("forced_exception"));
        assert!(core.was_fault_injected());
        assert!(core.was_fault_injected_on_service("hello"));
        assert!(core.was_fault_injected_on_method("HelloService", "Hello"));

        core.teardowns_completed(2);
        assert!(!core.has_next_iteration(3));
    }

    #[test]
    fn test_new_test_execution_once_per_service() {
        let mut core = FaultCore::new();
        assert!(core.is_new_test_execution("a"));
        assert!(!core.is_new_test_execution("a"));
        assert!(core.is_new_test_execution("b"));
        core.teardowns_completed(1);
        assert!(!core.is_new_test_execution("a"), "no execution in progress");
    }

    #[test]
    fn test_transformer_continuation_is_scheduled() {
        let mut core = FaultCore::new();
        let mut payload = json!({
            "execution_index": dei("a"),
            "transformer_fault": {"type": "StringTransformer", "accumulator": {"referenceValue": "ab", "context": 1}, "has_next": true}
        });
        core.end_invocation(&payload).unwrap();
        assert_eq!(core.unexplored_count(), 1);

        payload["transformer_fault"]["has_next"] = json!(false);
        core.end_invocation(&payload).unwrap();
        assert_eq!(core.unexplored_count(), 1);
    }

    #[test]
    fn test_end_invocation_echoes_index() {
        let mut core = FaultCore::new();
        let response = core.end_invocation(&json!({"execution_index": dei("a")})).unwrap();
        assert_eq!(response.execution_index, Some(dei("a")));
        assert!(core.end_invocation(&json!({})).is_err());
    }

    #[test]
    fn test_core_source_with_explicit_handle() {
        let handle = Arc::new(Mutex::new(FaultCore::new()));
        let source = CoreDecisionSource::new(Arc::clone(&handle));
        assert!(source.is_new_test_execution("svc").unwrap());
        let response = source.create_invocation(&invocation("a", "m")).unwrap();
        assert_eq!(response.generated_id, 1);
        assert_eq!(handle.lock().current_test_execution().unwrap().executed_rpcs().count(), 1);
    }

    #[test]
    fn test_report_follows_executions() {
        let directory = tempfile::tempdir().unwrap();
        let config = FilibusterConfig {
            report_directory: directory.path().to_path_buf(),
            ..FilibusterConfig::default()
        };
        let mut core = FaultCore::with_analysis(analysis()).configured(&config);
        core.begin_invocation(&invocation("a", "Hello")).unwrap();
        core.end_invocation(&json!({
            "instrumentation_type": "invocation_complete",
            "execution_index": dei("a"),
            "return_value": {"__class__": "HelloReply"},
        }))
        .unwrap();
        core.end_invocation(&json!({"instrumentation_type": "request_received", "execution_index": dei("a")}))
            .unwrap();
        let rpc = core.report().rpcs().next().unwrap();
        assert_eq!(rpc.response.unwrap()["return_value"]["__class__"], "HelloReply");
        assert!(rpc.fault.is_none());

        core.teardowns_completed(1);
        assert_eq!(core.report().invocation_count(), 0);
        core.begin_invocation(&invocation("a", "Hello")).unwrap();
        let rpc = core.report().rpcs().next().unwrap();
        assert!(rpc.fault.unwrap().get("forced_exception").is_some());

        let written = core.write_report(2, true).unwrap();
        assert!(!written.passed);
        assert!(written.path.starts_with(directory.path()));
    }
}
