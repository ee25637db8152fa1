// Copyright 2025 Cowboy AI, LLC.

//! Client side of the instrumentation protocol.
//!
//! Around one outbound call a transport binding drives:
//!
//! 1. [`ClientInstrumentor::prepare_for_invocation`]: tick the request's
//!    clock and compute the call's execution index;
//! 2. [`ClientInstrumentor::before_invocation`]: register the invocation and
//!    learn whether to inject a fault;
//! 3. if [`ClientInstrumentor::should_abort`], raise the fault instead of
//!    calling, otherwise call and optionally mutate the response;
//! 4. exactly one `after_invocation_*` to report the outcome.

use super::{Harness, InjectedFault, InvocationPhase};
use crate::context::PropagatedContext;
use crate::decision::{ByzantineFault, FaultInstruction, ForcedException, TransformerFault};
use crate::dei::{Callsite, DistributedExecutionIndex};
use crate::errors::FilibusterResult;
use crate::transformers::TransformerKind;
use crate::vector_clock::VectorClock;
use serde_json::{json, Map, Value};
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Drives one outbound call through the protocol.
#[derive(Debug)]
pub struct ClientInstrumentor {
    harness: Harness,
    callsite: Callsite,
    incoming: PropagatedContext,
    request_id: String,
    outgoing_request_id: String,
    origin_vector_clock: VectorClock,
    vector_clock: VectorClock,
    execution_index: DistributedExecutionIndex,
    preliminary_execution_index: Option<String>,
    rpc_type: Option<String>,
    generated_id: i64,
    fault: Option<FaultInstruction>,
    phase: InvocationPhase,
}

impl ClientInstrumentor {
    pub(super) fn new(harness: Harness, callsite: Callsite, incoming: PropagatedContext) -> Self {
        let origin_vector_clock = incoming
            .origin_vector_clock
            .as_deref()
            .map(VectorClock::parse)
            .unwrap_or_default();
        Self {
            harness,
            request_id: incoming.request_id.clone().unwrap_or_default(),
            outgoing_request_id: Uuid::new_v4().to_string(),
            callsite,
            incoming,
            origin_vector_clock,
            vector_clock: VectorClock::new(),
            execution_index: DistributedExecutionIndex::new(),
            preliminary_execution_index: None,
            rpc_type: None,
            generated_id: -1,
            fault: None,
            phase: InvocationPhase::Created,
        }
    }

    /// Account the call to a different request than the one in context
    /// storage.
    pub fn with_request_id_override(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    /// Attach an execution index computed in an earlier pass.
    pub fn with_preliminary_execution_index(mut self, execution_index: impl Into<String>) -> Self {
        self.preliminary_execution_index = Some(execution_index.into());
        self
    }

    /// Label the transport, e.g. `GRPC` or `HTTP`.
    pub fn with_rpc_type(mut self, rpc_type: impl Into<String>) -> Self {
        self.rpc_type = Some(rpc_type.into());
        self
    }

    /// Calling service
    pub fn service_name(&self) -> &str {
        self.callsite.service_name()
    }

    /// The instrumented callsite
    pub fn callsite(&self) -> &Callsite {
        &self.callsite
    }

    /// Request the call is accounted to
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Fresh request id for the callee
    pub fn outgoing_request_id(&self) -> &str {
        &self.outgoing_request_id
    }

    /// Id assigned by the decision source, `-1` when unregistered
    pub fn generated_id(&self) -> i64 {
        self.generated_id
    }

    /// Protocol phase
    pub fn phase(&self) -> InvocationPhase {
        self.phase
    }

    /// Clock after this call's tick
    pub fn vector_clock(&self) -> &VectorClock {
        &self.vector_clock
    }

    /// Clock of the request as it entered this service
    pub fn origin_vector_clock(&self) -> &VectorClock {
        &self.origin_vector_clock
    }

    /// Execution index of this call
    pub fn execution_index(&self) -> &DistributedExecutionIndex {
        &self.execution_index
    }

    /// Fault decided for this call
    pub fn fault(&self) -> Option<&FaultInstruction> {
        self.fault.as_ref()
    }

    /// The forced exception, if that is the decided fault.
    pub fn forced_exception(&self) -> Option<&ForcedException> {
        match &self.fault {
            Some(FaultInstruction::ForcedException(fe)) => Some(fe),
            _ => None,
        }
    }

    /// The failure metadata, if that is the decided fault.
    pub fn failure_metadata(&self) -> Option<&Value> {
        match &self.fault {
            Some(FaultInstruction::FailureMetadata(metadata)) => Some(metadata),
            _ => None,
        }
    }

    /// The byzantine value, if that is the decided fault.
    pub fn byzantine_fault(&self) -> Option<&ByzantineFault> {
        match &self.fault {
            Some(FaultInstruction::ByzantineFault(fault)) => Some(fault),
            _ => None,
        }
    }

    /// The transformer fault, if that is the decided fault.
    pub fn transformer_fault(&self) -> Option<&TransformerFault> {
        match &self.fault {
            Some(FaultInstruction::TransformerFault(fault)) => Some(fault),
            _ => None,
        }
    }

    fn transition(&mut self, target: InvocationPhase) {
        assert!(
            self.phase.can_transition_to(&target),
            "invalid client instrumentor transition {} -> {}",
            self.phase,
            target
        );
        debug!(from = %self.phase, to = %target, "client instrumentor transition");
        self.phase = target;
    }

    /// Whether the decision source says this service starts a new test
    /// execution. Failures to ask count as no.
    pub fn should_reset_clocks(&self) -> bool {
        if !self.harness.consults_decision_source() {
            return false;
        }
        let service = self.service_name();
        match self.harness.decision_source().is_new_test_execution(service) {
            Ok(reset) => reset,
            Err(e) => {
                error!(service, error = %e, "cannot ask decision source for a new test execution");
                false
            }
        }
    }

    /// Tick the request's clock and compute this call's execution index.
    pub fn prepare_for_invocation(&mut self) {
        self.transition(InvocationPhase::Prepared);

        let state = self.harness.state();
        let service = self.callsite.service_name().to_string();
        let request_id = self.request_id.clone();

        if self.should_reset_clocks() {
            debug!(service = %service, "new test execution, resetting clocks");
            state.clear_service(&service);
        }

        let incoming_index = self.incoming.execution_index.clone();
        state.with_execution_index_slot(&service, &request_id, |slot| {
            if slot.is_none() {
                let index = match incoming_index.as_deref() {
                    Some(serialized) => serialized.parse().unwrap_or_else(|e| {
                        warn!(error = %e, "ignoring unparsable propagated execution index");
                        DistributedExecutionIndex::new()
                    }),
                    None => DistributedExecutionIndex::new(),
                };
                *slot = Some(index);
            }
        });

        let incoming_clock = self.incoming.vector_clock.as_deref().map(VectorClock::parse);
        self.vector_clock = state.with_vector_clock(&service, &request_id, |clock| {
            if let Some(incoming) = &incoming_clock {
                *clock = incoming.merge(clock);
            }
            clock.tick(&service);
            clock.clone()
        });

        self.advance_execution_index();
        debug!(
            service = %service,
            request_id = %request_id,
            vclock = %self.vector_clock,
            execution_index = %self.execution_index,
            "prepared for invocation"
        );
    }

    /// Recompute the execution index for a corrected callsite, before the
    /// decision source is consulted.
    pub fn update_callsite(&mut self, callsite: Callsite) {
        assert_eq!(
            self.phase,
            InvocationPhase::Prepared,
            "update_callsite() must follow prepare_for_invocation()"
        );
        self.callsite = callsite;
        self.advance_execution_index();
    }

    fn advance_execution_index(&mut self) {
        let digest = self.harness.config().dei_digest;
        let callsite = &self.callsite;
        self.execution_index = self.harness.state().with_execution_index(
            callsite.service_name(),
            &self.request_id,
            |index| {
                index.push_callsite(callsite, &digest);
                let snapshot = index.clone();
                index.pop();
                snapshot
            },
        );
    }

    fn invocation_payload(&self) -> Value {
        let mut payload = json!({
            "instrumentation_type": "invocation",
            "source_service_name": self.callsite.service_name(),
            "module": self.callsite.class_or_module(),
            "method": self.callsite.method(),
            "args": self.callsite.arguments().to_json(),
            "kwargs": {},
            "callsite_file": self.callsite.file(),
            "callsite_line": self.callsite.line(),
            "full_traceback": "",
            "metadata": { "rpc_type": self.rpc_type.as_deref().unwrap_or_default() },
            "vclock": self.vector_clock.to_json(),
            "origin_vclock": self.origin_vector_clock.to_json(),
            "execution_index": self.execution_index.to_string(),
        });
        if let (Some(preliminary), Value::Object(map)) =
            (&self.preliminary_execution_index, &mut payload)
        {
            map.insert("preliminary_execution_index".into(), Value::from(preliminary.as_str()));
        }
        payload
    }

    /// Register the invocation and learn its fault.
    ///
    /// A replayed counterexample answers without any network call. Failing
    /// to reach the decision source leaves the call unfaulted.
    pub fn before_invocation(&mut self) {
        self.transition(InvocationPhase::BeforeInvoked);
        let payload = self.invocation_payload();
        let execution_index = self.execution_index.to_string();

        if let Some(counterexample) = self.harness.counterexample() {
            self.fault = counterexample.fault_for(&execution_index).unwrap_or_else(|e| {
                error!(execution_index = %execution_index, error = %e, "unreadable counterexample entry");
                None
            });
        } else if self.harness.config().communication_enabled {
            match self.harness.decision_source().create_invocation(&payload) {
                Ok(response) => {
                    self.generated_id = response.generated_id;
                    self.fault = response.fault;
                }
                Err(e) => {
                    error!(
                        decision_source = self.harness.decision_source().name(),
                        execution_index = %execution_index,
                        error = %e,
                        "cannot register invocation, proceeding without a fault"
                    );
                }
            }
        }

        debug!(
            execution_index = %execution_index,
            generated_id = self.generated_id,
            fault = self.fault.as_ref().map(FaultInstruction::kind),
            "before invocation"
        );
    }

    /// Whether the real call must not be made.
    pub fn should_abort(&self) -> bool {
        match &self.fault {
            Some(FaultInstruction::ForcedException(fe)) => {
                fe.metadata_bool("abort") != Some(false) && fe.metadata_bool("defer") != Some(true)
            }
            Some(FaultInstruction::FailureMetadata(metadata)) => {
                metadata.get("abort").and_then(Value::as_bool).unwrap_or(true)
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Latency to inject, from the forced exception or failure metadata.
    pub fn forced_sleep_ms(&self) -> Option<u64> {
        match &self.fault {
            Some(FaultInstruction::ForcedException(fe)) => fe.sleep_ms(),
            Some(FaultInstruction::FailureMetadata(metadata)) => {
                metadata.get("sleep").and_then(Value::as_u64)
            }
            _ => None,
        }
    }

    /// Metadata to attach to the outbound call.
    pub fn outgoing_context(&self) -> PropagatedContext {
        PropagatedContext {
            request_id: Some(self.outgoing_request_id.clone()),
            generated_id: (self.generated_id > -1).then_some(self.generated_id),
            vector_clock: Some(self.vector_clock.to_string()),
            origin_vector_clock: Some(self.origin_vector_clock.to_string()),
            execution_index: Some(self.execution_index.to_string()),
            forced_sleep_ms: self
                .forced_exception()
                .map(|fe| fe.sleep_ms().unwrap_or(0)),
        }
    }

    /// Materialize the forced exception and report it as the outcome.
    ///
    /// # Panics
    ///
    /// Panics when the forced exception has neither code nor cause.
    pub fn injected_fault(&mut self) -> Option<InjectedFault> {
        let fault = InjectedFault::from_forced_exception(self.forced_exception()?);

        let mut additional = Map::new();
        additional.insert("code".into(), Value::from(fault.code.as_str()));
        additional.insert(
            "description".into(),
            fault.description.clone().map(Value::from).unwrap_or(Value::Null),
        );
        self.after_invocation_with_exception(&fault.name, fault.cause.as_deref(), additional);
        Some(fault)
    }

    /// Replay the transformer fault on the real response and report the
    /// mutated value, which is returned. Without a transformer fault the
    /// response is left alone.
    pub fn apply_transformer_fault(&mut self, reference: &Value) -> FilibusterResult<Option<Value>> {
        let Some(fault) = self.transformer_fault().cloned() else {
            return Ok(None);
        };

        let mut transformer = self.harness.registry().create(fault.transformer)?;
        let accumulator = if fault.accumulator.is_null() {
            transformer.initial_accumulator_json(reference)?
        } else {
            fault.accumulator
        };
        transformer.transform_json(reference, &accumulator)?;

        let value = transformer.result_json()?;
        let has_next = transformer.has_next_mutation();
        let next = if has_next {
            transformer.next_accumulator_json()?
        } else {
            accumulator
        };
        self.after_invocation_with_transformer_fault(&value, &next, fault.transformer, has_next);
        Ok(Some(value))
    }

    fn completion_payload(&self) -> Map<String, Value> {
        let mut payload = Map::new();
        payload.insert("instrumentation_type".into(), Value::from("invocation_complete"));
        payload.insert("generated_id".into(), Value::from(self.generated_id));
        payload.insert("execution_index".into(), Value::from(self.execution_index.to_string()));
        payload.insert("vclock".into(), self.vector_clock.to_json());
        payload.insert("module".into(), Value::from(self.callsite.class_or_module()));
        payload.insert("method".into(), Value::from(self.callsite.method()));
        if let Some(preliminary) = &self.preliminary_execution_index {
            payload.insert("preliminary_execution_index".into(), Value::from(preliminary.as_str()));
        }
        payload
    }

    fn report(&mut self, phase: InvocationPhase, payload: Map<String, Value>) {
        self.transition(phase);
        if self.generated_id < 0 || !self.harness.consults_decision_source() {
            debug!(generated_id = self.generated_id, "skipping completion report");
            return;
        }
        let payload = Value::Object(payload);
        if let Err(e) = self.harness.decision_source().update_invocation(&payload, false) {
            error!(
                decision_source = self.harness.decision_source().name(),
                execution_index = %self.execution_index,
                error = %e,
                "cannot report invocation completion"
            );
        }
    }

    /// Report a failed call. Null values in `additional` are dropped.
    pub fn after_invocation_with_exception(
        &mut self,
        name: &str,
        cause: Option<&str>,
        additional: Map<String, Value>,
    ) {
        let mut metadata = Map::new();
        if let Some(fe) = self.forced_exception() {
            for key in ["sleep", "abort"] {
                if let Some(value) = fe.metadata.get(key) {
                    metadata.insert(key.into(), value.clone());
                }
            }
        }
        if let Some(cause) = cause {
            metadata.insert("cause".into(), Value::from(cause));
        }
        metadata.extend(additional.into_iter().filter(|(_, v)| !v.is_null()));

        let mut payload = self.completion_payload();
        payload.insert("exception".into(), json!({ "name": name, "metadata": metadata }));
        self.report(InvocationPhase::CompletedException, payload);
    }

    /// Report a response replaced by a literal value.
    pub fn after_invocation_with_byzantine_fault(&mut self, fault_type: &str, value: &Value) {
        let mut payload = self.completion_payload();
        payload.insert(
            "byzantine_fault".into(),
            json!({ "type": fault_type, "value": value }),
        );
        self.report(InvocationPhase::CompletedByzantine, payload);
    }

    /// Report a response replaced by a transformer mutation; `accumulator`
    /// is the one the next mutation starts from.
    pub fn after_invocation_with_transformer_fault(
        &mut self,
        value: &Value,
        accumulator: &Value,
        transformer: TransformerKind,
        has_next: bool,
    ) {
        let mut payload = self.completion_payload();
        payload.insert(
            "transformer_fault".into(),
            json!({
                "value": value,
                "accumulator": accumulator,
                "type": transformer,
                "has_next": has_next,
            }),
        );
        self.report(InvocationPhase::CompletedTransformed, payload);
    }

    /// Report a real response of type `class_name`.
    pub fn after_invocation_complete(
        &mut self,
        class_name: &str,
        properties: Map<String, Value>,
        return_value: Option<&Value>,
    ) {
        let mut reported = Map::new();
        reported.insert("__class__".into(), Value::from(class_name));
        reported.insert("value".into(), return_value.cloned().unwrap_or(Value::Null));
        reported.extend(properties);

        let mut payload = self.completion_payload();
        payload.insert("return_value".into(), Value::Object(reported));
        self.report(InvocationPhase::CompletedOk, payload);
    }
}
