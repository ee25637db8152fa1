// Copyright 2025 Cowboy AI, LLC.

//! Request-scoped context and its propagation across call boundaries.
//!
//! The client side reads the causal metadata of the request it is serving
//! from a [`ContextStorage`]; the transport carries it to the callee as
//! headers; the server side writes it back into the callee's storage.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;

/// Header carrying the request id.
pub const REQUEST_ID_HEADER: &str = "x-filibuster-request-id";
/// Header carrying the generated id assigned by the decision source.
pub const GENERATED_ID_HEADER: &str = "x-filibuster-generated-id";
/// Header carrying the serialized vector clock.
pub const VCLOCK_HEADER: &str = "x-filibuster-vclock";
/// Header carrying the serialized origin vector clock.
pub const ORIGIN_VCLOCK_HEADER: &str = "x-filibuster-origin-vclock";
/// Header carrying the serialized execution index.
pub const EXECUTION_INDEX_HEADER: &str = "x-filibuster-execution-index";
/// Header carrying an injected latency in milliseconds.
pub const FORCED_SLEEP_HEADER: &str = "x-filibuster-forced-sleep";
/// Marks control-plane traffic so it is never itself instrumented.
pub const INSTRUMENTATION_HEADER: &str = "X-Filibuster-Instrumentation";
/// Distinguishes completion updates from receipt notifications.
pub const IS_UPDATE_HEADER: &str = "X-Filibuster-Is-Update";

/// Causal metadata carried with one remote call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropagatedContext {
    /// Request id
    pub request_id: Option<String>,
    /// Generated id of the invocation that produced this call
    pub generated_id: Option<i64>,
    /// Serialized vector clock
    pub vector_clock: Option<String>,
    /// Serialized origin vector clock
    pub origin_vector_clock: Option<String>,
    /// Serialized execution index
    pub execution_index: Option<String>,
    /// Injected latency in milliseconds
    pub forced_sleep_ms: Option<u64>,
}

impl PropagatedContext {
    /// Header pairs for the fields that are set.
    pub fn to_headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = Vec::new();
        if let Some(v) = &self.request_id {
            headers.push((REQUEST_ID_HEADER, v.clone()));
        }
        if let Some(v) = self.generated_id {
            headers.push((GENERATED_ID_HEADER, v.to_string()));
        }
        if let Some(v) = &self.vector_clock {
            headers.push((VCLOCK_HEADER, v.clone()));
        }
        if let Some(v) = &self.origin_vector_clock {
            headers.push((ORIGIN_VCLOCK_HEADER, v.clone()));
        }
        if let Some(v) = &self.execution_index {
            headers.push((EXECUTION_INDEX_HEADER, v.clone()));
        }
        if let Some(v) = self.forced_sleep_ms {
            headers.push((FORCED_SLEEP_HEADER, v.to_string()));
        }
        headers
    }

    /// Collect fields from header pairs; names match case-insensitively and
    /// unparsable numeric headers are ignored.
    pub fn from_headers<'a>(headers: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut context = Self::default();
        for (name, value) in headers {
            let name = name.to_ascii_lowercase();
            match name.as_str() {
                REQUEST_ID_HEADER => context.request_id = Some(value.to_string()),
                GENERATED_ID_HEADER => context.generated_id = value.trim().parse().ok(),
                VCLOCK_HEADER => context.vector_clock = Some(value.to_string()),
                ORIGIN_VCLOCK_HEADER => context.origin_vector_clock = Some(value.to_string()),
                EXECUTION_INDEX_HEADER => context.execution_index = Some(value.to_string()),
                FORCED_SLEEP_HEADER => context.forced_sleep_ms = value.trim().parse().ok(),
                _ => {}
            }
        }
        context
    }
}

/// Where the instrumentation finds the causal metadata of the request
/// currently being served.
pub trait ContextStorage: Send + Sync {
    /// Current request id
    fn request_id(&self) -> Option<String>;
    /// Set the current request id
    fn set_request_id(&self, value: Option<String>);
    /// Current serialized vector clock
    fn vector_clock(&self) -> Option<String>;
    /// Set the current serialized vector clock
    fn set_vector_clock(&self, value: Option<String>);
    /// Current serialized origin vector clock
    fn origin_vector_clock(&self) -> Option<String>;
    /// Set the current serialized origin vector clock
    fn set_origin_vector_clock(&self, value: Option<String>);
    /// Current serialized execution index
    fn distributed_execution_index(&self) -> Option<String>;
    /// Set the current serialized execution index
    fn set_distributed_execution_index(&self, value: Option<String>);

    /// Everything at once.
    fn snapshot(&self) -> PropagatedContext {
        PropagatedContext {
            request_id: self.request_id(),
            generated_id: None,
            vector_clock: self.vector_clock(),
            origin_vector_clock: self.origin_vector_clock(),
            execution_index: self.distributed_execution_index(),
            forced_sleep_ms: None,
        }
    }
}

thread_local! {
    static THREAD_CONTEXT: RefCell<PropagatedContext> = RefCell::new(PropagatedContext::default());
}

/// Storage bound to the current thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadLocalContextStorage;

impl ThreadLocalContextStorage {
    /// Forget everything stored for this thread.
    pub fn clear() {
        THREAD_CONTEXT.with(|c| *c.borrow_mut() = PropagatedContext::default());
    }

    fn read<R>(f: impl FnOnce(&PropagatedContext) -> R) -> R {
        THREAD_CONTEXT.with(|c| f(&c.borrow()))
    }

    fn write(f: impl FnOnce(&mut PropagatedContext)) {
        THREAD_CONTEXT.with(|c| f(&mut c.borrow_mut()))
    }
}

impl ContextStorage for ThreadLocalContextStorage {
    fn request_id(&self) -> Option<String> {
        Self::read(|c| c.request_id.clone())
    }

    fn set_request_id(&self, value: Option<String>) {
        Self::write(|c| c.request_id = value)
    }

    fn vector_clock(&self) -> Option<String> {
        Self::read(|c| c.vector_clock.clone())
    }

    fn set_vector_clock(&self, value: Option<String>) {
        Self::write(|c| c.vector_clock = value)
    }

    fn origin_vector_clock(&self) -> Option<String> {
        Self::read(|c| c.origin_vector_clock.clone())
    }

    fn set_origin_vector_clock(&self, value: Option<String>) {
        Self::write(|c| c.origin_vector_clock = value)
    }

    fn distributed_execution_index(&self) -> Option<String> {
        Self::read(|c| c.execution_index.clone())
    }

    fn set_distributed_execution_index(&self, value: Option<String>) {
        Self::write(|c| c.execution_index = value)
    }
}

/// Storage shared between threads, for callers whose request handling hops
/// across a thread pool.
#[derive(Debug, Default)]
pub struct SharedContextStorage {
    inner: Mutex<PropagatedContext>,
}

impl SharedContextStorage {
    /// Seed the storage with a propagated context.
    pub fn new(context: PropagatedContext) -> Self {
        Self {
            inner: Mutex::new(context),
        }
    }
}

impl ContextStorage for SharedContextStorage {
    fn request_id(&self) -> Option<String> {
        self.inner.lock().request_id.clone()
    }

    fn set_request_id(&self, value: Option<String>) {
        self.inner.lock().request_id = value;
    }

    fn vector_clock(&self) -> Option<String> {
        self.inner.lock().vector_clock.clone()
    }

    fn set_vector_clock(&self, value: Option<String>) {
        self.inner.lock().vector_clock = value;
    }

    fn origin_vector_clock(&self) -> Option<String> {
        self.inner.lock().origin_vector_clock.clone()
    }

    fn set_origin_vector_clock(&self, value: Option<String>) {
        self.inner.lock().origin_vector_clock = value;
    }

    fn distributed_execution_index(&self) -> Option<String> {
        self.inner.lock().execution_index.clone()
    }

    fn set_distributed_execution_index(&self, value: Option<String>) {
        self.inner.lock().execution_index = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_headers_round_trip() {
        let context = PropagatedContext {
            request_id: Some("r-1".into()),
            generated_id: Some(7),
            vector_clock: Some(r#"{"a":1}"#.into()),
            origin_vector_clock: None,
            execution_index: Some(r#"[["k", 1]]"#.into()),
            forced_sleep_ms: Some(250),
        };
        let headers = context.to_headers();
        assert_eq!(headers.len(), 5);

        let parsed = PropagatedContext::from_headers(headers.iter().map(|(k, v)| (*k, v.as_str())));
        assert_eq!(parsed, context);
    }

    #[test]
    fn test_header_names_are_case_insensitive() {
        let parsed = PropagatedContext::from_headers([
            ("X-Filibuster-Request-Id", "abc"),
            ("X-FILIBUSTER-FORCED-SLEEP", "nope"),
            ("content-type", "application/json"),
        ]);
        assert_eq!(parsed.request_id.as_deref(), Some("abc"));
        assert_eq!(parsed.forced_sleep_ms, None);
    }

    #[test]
    fn test_thread_local_storage_is_per_thread() {
        let storage = ThreadLocalContextStorage;
        storage.set_request_id(Some("main".into()));

        let other = std::thread::spawn(|| ThreadLocalContextStorage.request_id())
            .join()
            .unwrap();
        assert_eq!(other, None);
        assert_eq!(storage.request_id().as_deref(), Some("main"));

        ThreadLocalContextStorage::clear();
        assert_eq!(storage.request_id(), None);
    }

    #[test]
    fn test_shared_storage_snapshot() {
        let storage = SharedContextStorage::default();
        storage.set_vector_clock(Some(r#"{"x":2}"#.into()));
        storage.set_distributed_execution_index(Some("[]".into()));
        let snapshot = storage.snapshot();
        assert_eq!(snapshot.vector_clock.as_deref(), Some(r#"{"x":2}"#));
        assert_eq!(snapshot.execution_index.as_deref(), Some("[]"));
        assert_eq!(snapshot.request_id, None);
    }
}
