// Copyright 2025 Cowboy AI, LLC.

//! The instrumentation protocol.
//!
//! A [`Harness`] is built once per test run. It owns the per-request clock
//! and index store, the decision source, the loaded counterexample (if
//! replaying) and the transformer registry. Transport bindings ask it for a
//! [`ClientInstrumentor`] around every outbound call and a
//! [`ServerInstrumentor`] around every inbound one.

mod client;
mod fault;
mod phase;
mod server;

pub use self::client::ClientInstrumentor;
pub use self::fault::InjectedFault;
pub use self::phase::InvocationPhase;
pub use self::server::ServerInstrumentor;

use crate::config::FilibusterConfig;
use crate::context::{ContextStorage, PropagatedContext};
use crate::decision::{CoreDecisionSource, Counterexample, DecisionSource, HttpDecisionSource};
use crate::dei::Callsite;
use crate::errors::FilibusterResult;
use crate::state::InstrumentationState;
use crate::transformers::TransformerRegistry;
use std::sync::Arc;
use tracing::info;

#[derive(Debug)]
struct HarnessInner {
    config: FilibusterConfig,
    state: Arc<InstrumentationState>,
    decision_source: Arc<dyn DecisionSource>,
    counterexample: Option<Arc<Counterexample>>,
    registry: Arc<TransformerRegistry>,
}

impl std::fmt::Debug for dyn DecisionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DecisionSource({})", self.name())
    }
}

/// Everything one test run shares between its instrumentors.
#[derive(Debug, Clone)]
pub struct Harness {
    inner: Arc<HarnessInner>,
}

impl Harness {
    /// Build a harness over a decision source, loading the counterexample
    /// named by the configuration, if any.
    pub fn new(
        config: FilibusterConfig,
        decision_source: Arc<dyn DecisionSource>,
    ) -> FilibusterResult<Self> {
        let counterexample = config
            .counterexample_file
            .as_ref()
            .map(Counterexample::load)
            .transpose()?
            .map(Arc::new);

        info!(
            decision_source = decision_source.name(),
            communication_enabled = config.communication_enabled,
            "harness created"
        );

        Ok(Self {
            inner: Arc::new(HarnessInner {
                config,
                state: Arc::new(InstrumentationState::new()),
                decision_source,
                counterexample,
                registry: Arc::new(TransformerRegistry::new()),
            }),
        })
    }

    /// A harness talking to the remote control plane.
    pub fn with_http(config: FilibusterConfig) -> FilibusterResult<Self> {
        let source = HttpDecisionSource::new(&config)?;
        Self::new(config, Arc::new(source))
    }

    /// A harness consulting the installed in-process core.
    pub fn with_core(config: FilibusterConfig) -> FilibusterResult<Self> {
        Self::new(config, Arc::new(CoreDecisionSource::installed()))
    }

    /// Replace the transformer registry. Instrumentors already handed out
    /// keep the old one.
    pub fn with_registry(self, registry: TransformerRegistry) -> Self {
        let inner = &self.inner;
        Self {
            inner: Arc::new(HarnessInner {
                config: inner.config.clone(),
                state: Arc::clone(&inner.state),
                decision_source: Arc::clone(&inner.decision_source),
                counterexample: inner.counterexample.clone(),
                registry: Arc::new(registry),
            }),
        }
    }

    /// The configuration.
    pub fn config(&self) -> &FilibusterConfig {
        &self.inner.config
    }

    /// The per-request clock and index store.
    pub fn state(&self) -> &InstrumentationState {
        &self.inner.state
    }

    /// The decision source.
    pub fn decision_source(&self) -> &dyn DecisionSource {
        self.inner.decision_source.as_ref()
    }

    /// The counterexample being replayed.
    pub fn counterexample(&self) -> Option<&Counterexample> {
        self.inner.counterexample.as_deref()
    }

    /// The transformer registry.
    pub fn registry(&self) -> &TransformerRegistry {
        &self.inner.registry
    }

    /// Whether the decision source is consulted: communication is enabled
    /// and no counterexample is being replayed.
    pub fn consults_decision_source(&self) -> bool {
        self.inner.config.communication_enabled && self.inner.counterexample.is_none()
    }

    /// Instrument an outbound call made from `callsite` while serving the
    /// request whose context is in `storage`.
    pub fn client(&self, callsite: Callsite, storage: &dyn ContextStorage) -> ClientInstrumentor {
        ClientInstrumentor::new(self.clone(), callsite, storage.snapshot())
    }

    /// Instrument an inbound call carrying `context`.
    pub fn server(
        &self,
        service_name: impl Into<String>,
        context: PropagatedContext,
    ) -> ServerInstrumentor {
        ServerInstrumentor::new(self.clone(), service_name.into(), context)
    }

    /// Forget all per-request state, at the end of a test run.
    pub fn teardown(&self) {
        info!("harness teardown");
        self.inner.state.clear_all();
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub mod testing {
    //! A scripted decision source recording every call.

    use crate::decision::{CreateResponse, DecisionSource, FaultInstruction, UpdateResponse};
    use crate::errors::{FilibusterError, FilibusterResult};
    use parking_lot::Mutex;
    use serde_json::Value;

    /// Answers from fixed fields; generated ids count the creates.
    #[derive(Debug, Default)]
    pub struct ScriptedSource {
        /// Answer to every new-test-execution question
        pub new_execution: bool,
        /// Fault handed to every invocation
        pub fault: Option<FaultInstruction>,
        /// Fail every call as a transport error
        pub unreachable: bool,
        /// Execution index returned from updates
        pub rewrite: Option<String>,
        /// Create payloads received
        pub created: Mutex<Vec<Value>>,
        /// Update payloads received, with their is-update flag
        pub updated: Mutex<Vec<(Value, bool)>>,
        /// Services asked about
        pub resets_asked: Mutex<Vec<String>>,
    }

    impl DecisionSource for ScriptedSource {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn is_new_test_execution(&self, service: &str) -> FilibusterResult<bool> {
            self.resets_asked.lock().push(service.to_string());
            if self.unreachable {
                return Err(FilibusterError::transport("new-test-execution", "refused"));
            }
            Ok(self.new_execution)
        }

        fn create_invocation(&self, payload: &Value) -> FilibusterResult<CreateResponse> {
            self.created.lock().push(payload.clone());
            if self.unreachable {
                return Err(FilibusterError::transport("create", "refused"));
            }
            Ok(CreateResponse {
                generated_id: self.created.lock().len() as i64,
                fault: self.fault.clone(),
            })
        }

        fn update_invocation(&self, payload: &Value, is_update: bool) -> FilibusterResult<UpdateResponse> {
            self.updated.lock().push((payload.clone(), is_update));
            if self.unreachable {
                return Err(FilibusterError::transport("update", "refused"));
            }
            Ok(UpdateResponse {
                execution_index: self.rewrite.clone(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedSource;
    use super::*;
    use std::io::Write;

    #[test]
    fn test_counterexample_loaded_from_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"TestExecution": {{"failures": []}}}}"#).unwrap();

        let config = FilibusterConfig::default().with_counterexample_file(file.path());
        let harness = Harness::new(config, Arc::new(ScriptedSource::default())).unwrap();
        assert!(harness.counterexample().is_some());
        assert!(!harness.consults_decision_source());
    }

    #[test]
    fn test_missing_counterexample_is_an_error() {
        let config = FilibusterConfig::default().with_counterexample_file("/nonexistent/ce.json");
        assert!(Harness::new(config, Arc::new(ScriptedSource::default())).is_err());
    }

    #[test]
    fn test_communication_toggle() {
        let config = FilibusterConfig {
            communication_enabled: false,
            ..FilibusterConfig::default()
        };
        let harness = Harness::new(config, Arc::new(ScriptedSource::default())).unwrap();
        assert!(!harness.consults_decision_source());
        assert_eq!(harness.decision_source().name(), "scripted");
    }
}
