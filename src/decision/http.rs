// Copyright 2025 Cowboy AI, LLC.

//! Remote decision source speaking the `/filibuster/*` control plane.
//!
//! Requests run on a private tokio runtime; at most
//! `max_concurrent_requests` are in flight and the calling thread blocks on
//! each one.

use super::{CreateResponse, DecisionSource, UpdateResponse};
use crate::config::FilibusterConfig;
use crate::context::{INSTRUMENTATION_HEADER, IS_UPDATE_HEADER};
use crate::errors::{FilibusterError, FilibusterResult};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::Semaphore;
use tracing::debug;

const MAX_WORKER_THREADS: usize = 4;

/// [`DecisionSource`] backed by an HTTP server.
pub struct HttpDecisionSource {
    base_uri: String,
    client: Client,
    permits: Arc<Semaphore>,
    runtime: Option<Runtime>,
    handle: Handle,
}

impl std::fmt::Debug for HttpDecisionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpDecisionSource")
            .field("base_uri", &self.base_uri)
            .field("available_permits", &self.permits.available_permits())
            .finish()
    }
}

impl HttpDecisionSource {
    /// Build a source for `config.base_uri()`.
    pub fn new(config: &FilibusterConfig) -> FilibusterResult<Self> {
        let max_concurrent = config.max_concurrent_requests.max(1);
        let runtime = Builder::new_multi_thread()
            .worker_threads(max_concurrent.min(MAX_WORKER_THREADS))
            .thread_name("filibuster-http")
            .enable_all()
            .build()?;
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| FilibusterError::transport(config.base_uri(), e))?;

        Ok(Self {
            base_uri: config.base_uri(),
            client,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
        })
    }

    /// Root of the control plane, with trailing slash.
    pub fn base_uri(&self) -> &str {
        &self.base_uri
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}filibuster/{}", self.base_uri, path)
    }

    fn dispatch<F>(&self, endpoint: &str, request: F) -> FilibusterResult<String>
    where
        F: Future<Output = FilibusterResult<String>> + Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        let owned_endpoint = endpoint.to_string();
        let task = self.handle.spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|e| FilibusterError::transport(owned_endpoint, e))?;
            request.await
        });
        futures::executor::block_on(task).map_err(|e| FilibusterError::transport(endpoint, e))?
    }

    fn call(&self, endpoint: String, request: RequestBuilder) -> FilibusterResult<String> {
        debug!(endpoint = %endpoint, "calling decision source");
        let request = request.header(INSTRUMENTATION_HEADER, "true");
        let task_endpoint = endpoint.clone();
        self.dispatch(&endpoint, async move { send(task_endpoint, request).await })
    }
}

async fn send(endpoint: String, request: RequestBuilder) -> FilibusterResult<String> {
    let response = request
        .send()
        .await
        .map_err(|e| FilibusterError::transport(&endpoint, e))?;
    let status = response.status();
    if status != StatusCode::OK {
        return Err(FilibusterError::UnexpectedStatus {
            endpoint,
            status: status.as_u16(),
        });
    }
    response
        .text()
        .await
        .map_err(|e| FilibusterError::transport(&endpoint, e))
}

fn parse_body(endpoint: &str, body: &str) -> FilibusterResult<Value> {
    serde_json::from_str(body)
        .map_err(|e| FilibusterError::MalformedResponse(format!("{endpoint}: {e}")))
}

impl DecisionSource for HttpDecisionSource {
    fn name(&self) -> &'static str {
        "http"
    }

    fn is_new_test_execution(&self, service: &str) -> FilibusterResult<bool> {
        let endpoint = self.endpoint(&format!("new-test-execution/{service}"));
        let body = self.call(endpoint.clone(), self.client.get(&endpoint))?;
        parse_body(&endpoint, &body)?
            .get("new-test-execution")
            .and_then(Value::as_bool)
            .ok_or_else(|| {
                FilibusterError::MalformedResponse(format!("{endpoint}: missing new-test-execution"))
            })
    }

    fn create_invocation(&self, payload: &Value) -> FilibusterResult<CreateResponse> {
        let endpoint = self.endpoint("create");
        let body = self.call(endpoint.clone(), self.client.put(&endpoint).json(payload))?;
        CreateResponse::from_json(&parse_body(&endpoint, &body)?)
    }

    fn update_invocation(&self, payload: &Value, is_update: bool) -> FilibusterResult<UpdateResponse> {
        let endpoint = self.endpoint("update");
        let request = self
            .client
            .post(&endpoint)
            .header(IS_UPDATE_HEADER, is_update.to_string())
            .json(payload);
        let body = self.call(endpoint, request)?;

        // Acknowledgements are free-form; only a string execution_index matters.
        let execution_index = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.get("execution_index").and_then(Value::as_str).map(str::to_string));
        Ok(UpdateResponse { execution_index })
    }
}

impl Drop for HttpDecisionSource {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
