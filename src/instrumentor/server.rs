// Copyright 2025 Cowboy AI, LLC.

//! Server side of the instrumentation protocol.

use super::Harness;
use crate::context::{ContextStorage, PropagatedContext};
use crate::vector_clock::VectorClock;
use serde_json::json;
use tracing::{debug, error, info};

/// Receives the causal metadata of one inbound call.
#[derive(Debug)]
pub struct ServerInstrumentor {
    harness: Harness,
    service_name: String,
    context: PropagatedContext,
}

impl ServerInstrumentor {
    pub(super) fn new(harness: Harness, service_name: String, context: PropagatedContext) -> Self {
        Self {
            harness,
            service_name,
            context,
        }
    }

    /// Receiving service
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Generated id of the caller's invocation
    pub fn generated_id(&self) -> Option<i64> {
        self.context.generated_id
    }

    /// Execution index, after any rewrite by the decision source
    pub fn execution_index(&self) -> Option<&str> {
        self.context.execution_index.as_deref()
    }

    /// Latency the caller asked this side to inject.
    pub fn forced_sleep_ms(&self) -> Option<u64> {
        self.context.forced_sleep_ms.filter(|ms| *ms > 0)
    }

    /// Store the inbound metadata for the request handler and tell the
    /// decision source the request arrived. The decision source may rewrite
    /// the execution index; the rewritten one is what the handler sees.
    pub fn before_invocation(&mut self, storage: &dyn ContextStorage) {
        let normalize = |clock: &Option<String>| {
            clock
                .as_deref()
                .map(VectorClock::parse)
                .unwrap_or_default()
                .to_string()
        };

        storage.set_request_id(self.context.request_id.clone());
        storage.set_vector_clock(Some(normalize(&self.context.vector_clock)));
        storage.set_origin_vector_clock(Some(normalize(&self.context.origin_vector_clock)));
        storage.set_distributed_execution_index(self.context.execution_index.clone());

        let Some(execution_index) = self.context.execution_index.clone() else {
            debug!(service = %self.service_name, "inbound call without execution index");
            return;
        };
        if !self.harness.consults_decision_source() {
            return;
        }

        let payload = json!({
            "instrumentation_type": "request_received",
            "generated_id": self.context.generated_id,
            "target_service_name": self.service_name,
            "execution_index": execution_index,
        });
        match self.harness.decision_source().update_invocation(&payload, false) {
            Ok(response) => {
                if let Some(rewritten) = response.execution_index {
                    if rewritten != execution_index {
                        info!(from = %execution_index, to = %rewritten, "rewriting execution index");
                    }
                    storage.set_distributed_execution_index(Some(rewritten.clone()));
                    self.context.execution_index = Some(rewritten);
                }
            }
            Err(e) => {
                error!(
                    decision_source = self.harness.decision_source().name(),
                    service = %self.service_name,
                    error = %e,
                    "cannot report request receipt"
                );
            }
        }
    }
}
