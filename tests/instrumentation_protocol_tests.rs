// Copyright 2025 Cowboy AI, LLC.

//! End-to-end runs of the instrumentation protocol against the in-process
//! fault core: explore, inject, report, capture and replay.

use filibuster::decision::CoreHandle;
use filibuster::{
    AnalysisConfiguration, Callsite, CallsiteArguments, ContextStorage, CoreDecisionSource,
    Counterexample, FaultCore, FilibusterConfig, Harness, PropagatedContext, SharedContextStorage,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::{json, Map};
use std::sync::Arc;

fn analysis() -> AnalysisConfiguration {
    AnalysisConfiguration::from_json(&json!({
        "grpc": {
            "pattern": "HelloService/Hello",
            "exceptions": [
                {"name": "io.grpc.StatusRuntimeException", "metadata": {"code": "UNAVAILABLE"}},
                {"name": "io.grpc.StatusRuntimeException", "metadata": {"code": "DEADLINE_EXCEEDED"}}
            ]
        }
    }))
    .unwrap()
}

fn hello_callsite() -> Callsite {
    Callsite::new(
        "api",
        "HelloService",
        "HelloService/Hello",
        CallsiteArguments::from_value("HelloRequest", &json!({"name": "Armerian"})),
    )
    .at("api.rs", 42)
}

fn storage() -> SharedContextStorage {
    SharedContextStorage::new(PropagatedContext {
        request_id: Some("request-1".into()),
        ..PropagatedContext::default()
    })
}

/// One test execution making a single instrumented call; returns the name of
/// the injected exception, if any.
fn run_once(harness: &Harness) -> Option<String> {
    let storage = storage();
    let mut client = harness.client(hello_callsite(), &storage);
    client.prepare_for_invocation();
    client.before_invocation();

    let outcome = if client.should_abort() {
        client.injected_fault().map(|fault| format!("{}:{}", fault.name, fault.code))
    } else {
        let context = client.outgoing_context();
        let mut server = harness.server("hello", context);
        server.before_invocation(&SharedContextStorage::default());
        client.after_invocation_complete("HelloReply", Map::new(), Some(&json!("Hello, Armerian!")));
        None
    };
    harness.teardown();
    outcome
}

fn core_harness(handle: &CoreHandle) -> Harness {
    Harness::new(
        FilibusterConfig::default(),
        Arc::new(CoreDecisionSource::new(Arc::clone(handle))),
    )
    .unwrap()
}

#[test]
fn explores_every_configured_fault_then_stops() {
    let handle: CoreHandle = Arc::new(Mutex::new(FaultCore::with_analysis(analysis())));
    let harness = core_harness(&handle);

    let mut outcomes = Vec::new();
    let mut iteration = 1;
    while handle.lock().has_next_iteration(iteration) {
        outcomes.push(run_once(&harness));
        let mut core = handle.lock();
        core.complete_iteration(iteration);
        core.teardowns_completed(iteration);
        iteration += 1;
    }

    assert_eq!(
        outcomes,
        vec![
            None,
            Some("io.grpc.StatusRuntimeException:UNAVAILABLE".to_string()),
            Some("io.grpc.StatusRuntimeException:DEADLINE_EXCEEDED".to_string()),
        ]
    );
    assert_eq!(handle.lock().unexplored_count(), 0);
}

#[test]
fn execution_index_is_stable_across_executions() {
    let handle: CoreHandle = Arc::new(Mutex::new(FaultCore::new()));
    let harness = core_harness(&handle);

    let mut indexes = Vec::new();
    for iteration in 1..=2 {
        let storage = storage();
        let mut client = harness.client(hello_callsite(), &storage);
        client.prepare_for_invocation();
        indexes.push(client.execution_index().to_string());
        assert_eq!(client.vector_clock().get("api"), 1);
        harness.teardown();
        handle.lock().teardowns_completed(iteration);
    }
    assert_eq!(indexes[0], indexes[1]);
}

#[test]
fn server_sees_caller_context() {
    let handle: CoreHandle = Arc::new(Mutex::new(FaultCore::new()));
    let harness = core_harness(&handle);
    let storage = storage();

    let mut client = harness.client(hello_callsite(), &storage);
    client.prepare_for_invocation();
    client.before_invocation();
    assert_eq!(client.generated_id(), 1);

    let headers = client.outgoing_context().to_headers();
    let inbound = PropagatedContext::from_headers(headers.iter().map(|(k, v)| (*k, v.as_str())));
    let server_storage = SharedContextStorage::default();
    let mut server = harness.server("hello", inbound);
    server.before_invocation(&server_storage);

    assert_eq!(server.generated_id(), Some(1));
    assert_eq!(server_storage.vector_clock().as_deref(), Some(r#"{"api":1}"#));
    assert_eq!(
        server_storage.distributed_execution_index(),
        Some(client.execution_index().to_string())
    );
    assert_eq!(server_storage.request_id().as_deref(), Some(client.outgoing_request_id()));
}

#[test]
fn captured_counterexample_replays_without_the_core() {
    let handle: CoreHandle = Arc::new(Mutex::new(FaultCore::with_analysis(analysis())));
    let harness = core_harness(&handle);

    assert_eq!(run_once(&harness), None);
    handle.lock().teardowns_completed(1);
    let injected = run_once(&harness);
    assert!(injected.is_some());

    let file = tempfile::NamedTempFile::new().unwrap();
    {
        let core = handle.lock();
        let execution = core.current_test_execution().unwrap();
        Counterexample::from_test_execution(execution).write(file.path()).unwrap();
    }

    // Nothing is installed and the explicit core is never consulted.
    let replay_core: CoreHandle = Arc::new(Mutex::new(FaultCore::new()));
    let replay = Harness::new(
        FilibusterConfig::default().with_counterexample_file(file.path()),
        Arc::new(CoreDecisionSource::new(Arc::clone(&replay_core))),
    )
    .unwrap();
    assert_eq!(run_once(&replay), injected);
    assert_eq!(
        replay_core.lock().current_test_execution().unwrap().executed_rpcs().count(),
        0
    );
}

#[test]
fn installed_core_drives_a_report() {
    let directory = tempfile::tempdir().unwrap();
    let config = FilibusterConfig {
        report_directory: directory.path().to_path_buf(),
        ..FilibusterConfig::default()
    };
    let installed = FaultCore::install(FaultCore::with_analysis(analysis()).configured(&config));
    let harness = Harness::with_core(config).unwrap();

    assert_eq!(run_once(&harness), None);
    {
        let core = installed.lock();
        let rpc = core.report().rpcs().next().unwrap();
        assert_eq!(rpc.invocation["method"], "HelloService/Hello");
        assert_eq!(rpc.response.unwrap()["return_value"]["__class__"], "HelloReply");
    }

    let written = installed.lock().write_report(1, false).unwrap();
    let script = std::fs::read_to_string(&written.path).unwrap();
    assert!(script.contains("HelloService/Hello"));

    assert!(FaultCore::teardown().is_some());
    assert!(!FaultCore::has_current());
}
