// Copyright 2025 Cowboy AI, LLC.

//! Per-service, per-request clocks and execution indexes.
//!
//! Two maps, `service -> request id -> VectorClock` and
//! `service -> request id -> DistributedExecutionIndex`, each behind its own
//! lock. Closures passed to the `with_*` methods run with the lock held, so a
//! read-modify-write on one entry is atomic; they must not block on I/O.

use crate::dei::DistributedExecutionIndex;
use crate::vector_clock::VectorClock;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

type PerRequest<T> = HashMap<String, HashMap<String, T>>;

/// Shared bookkeeping owned by one harness run.
#[derive(Debug, Default)]
pub struct InstrumentationState {
    vector_clocks: Mutex<PerRequest<VectorClock>>,
    execution_indexes: Mutex<PerRequest<DistributedExecutionIndex>>,
}

impl InstrumentationState {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every clock and index recorded for a service.
    pub fn clear_service(&self, service: &str) {
        debug!(service, "clearing per-request state");
        self.vector_clocks.lock().remove(service);
        self.execution_indexes.lock().remove(service);
    }

    /// Drop everything.
    pub fn clear_all(&self) {
        self.vector_clocks.lock().clear();
        self.execution_indexes.lock().clear();
    }

    /// Run `f` on the clock for `(service, request_id)`, creating it empty on
    /// first touch.
    pub fn with_vector_clock<R>(
        &self,
        service: &str,
        request_id: &str,
        f: impl FnOnce(&mut VectorClock) -> R,
    ) -> R {
        let mut clocks = self.vector_clocks.lock();
        let clock = clocks
            .entry(service.to_string())
            .or_default()
            .entry(request_id.to_string())
            .or_default();
        f(clock)
    }

    /// Run `f` on the index for `(service, request_id)`, creating it empty on
    /// first touch.
    pub fn with_execution_index<R>(
        &self,
        service: &str,
        request_id: &str,
        f: impl FnOnce(&mut DistributedExecutionIndex) -> R,
    ) -> R {
        let mut indexes = self.execution_indexes.lock();
        let index = indexes
            .entry(service.to_string())
            .or_default()
            .entry(request_id.to_string())
            .or_default();
        f(index)
    }

    /// Run `f` on the index slot for `(service, request_id)` without creating
    /// it; the slot is `None` when absent and whatever `f` leaves in it is
    /// stored.
    pub fn with_execution_index_slot<R>(
        &self,
        service: &str,
        request_id: &str,
        f: impl FnOnce(&mut Option<DistributedExecutionIndex>) -> R,
    ) -> R {
        let mut indexes = self.execution_indexes.lock();
        let per_request = indexes.entry(service.to_string()).or_default();
        let mut slot = per_request.remove(request_id);
        let result = f(&mut slot);
        if let Some(index) = slot {
            per_request.insert(request_id.to_string(), index);
        }
        result
    }

    /// Snapshot of a clock.
    pub fn vector_clock(&self, service: &str, request_id: &str) -> Option<VectorClock> {
        self.vector_clocks
            .lock()
            .get(service)
            .and_then(|m| m.get(request_id))
            .cloned()
    }

    /// Snapshot of an index.
    pub fn execution_index(
        &self,
        service: &str,
        request_id: &str,
    ) -> Option<DistributedExecutionIndex> {
        self.execution_indexes
            .lock()
            .get(service)
            .and_then(|m| m.get(request_id))
            .cloned()
    }
}
