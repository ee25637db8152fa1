// Copyright 2025 Cowboy AI, LLC.

//! Per-execution record of RPCs, faults and analyzer findings.
//!
//! A report is materialized once, as `analysis.js` in its own directory
//! under the report directory, for the HTML viewer to load.

mod analyzers;

pub use self::analyzers::{
    default_analyzers, longest_common_substring, AnalyzerWarning,
    MultipleInvocationsForIndividualMutationsAnalyzer, RedundantRpcAnalyzer, ReportAnalyzer,
    ResponseBecomesRequestAnalyzer, RpcRecord, UnimplementedFailuresAnalyzer, LCS_THRESHOLD,
};

use crate::dei::DistributedExecutionIndex;
use crate::errors::{FilibusterError, FilibusterResult};
use anyhow::Context;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

/// Where a report was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializedReport {
    /// Iteration number
    pub iteration: u32,
    /// Whether the test passed
    pub passed: bool,
    /// Path of `analysis.js`
    pub path: PathBuf,
    /// Report id
    pub uuid: Uuid,
}

/// Everything observed during one test execution.
#[derive(Debug)]
pub struct TestExecutionReport {
    uuid: Uuid,
    created_at: DateTime<Utc>,
    iteration: u32,
    passed: bool,
    invocations: IndexMap<DistributedExecutionIndex, Value>,
    responses: HashMap<DistributedExecutionIndex, Value>,
    faults_injected: HashMap<DistributedExecutionIndex, Value>,
    cached_rpcs: HashSet<DistributedExecutionIndex>,
    warnings: Vec<AnalyzerWarning>,
    avoid_redundant_injections: bool,
    materialized: Option<MaterializedReport>,
}

impl Default for TestExecutionReport {
    fn default() -> Self {
        Self::new()
    }
}

impl TestExecutionReport {
    /// An empty report with a fresh id.
    pub fn new() -> Self {
        Self {
            uuid: Uuid::new_v4(),
            created_at: Utc::now(),
            iteration: 0,
            passed: false,
            invocations: IndexMap::new(),
            responses: HashMap::new(),
            faults_injected: HashMap::new(),
            cached_rpcs: HashSet::new(),
            warnings: Vec::new(),
            avoid_redundant_injections: false,
            materialized: None,
        }
    }

    /// Do not flag redundant RPCs that were served from a cache.
    pub fn avoiding_redundant_injections(mut self, avoid: bool) -> Self {
        self.avoid_redundant_injections = avoid;
        self
    }

    /// Report id
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Record an invocation, in order.
    pub fn record_invocation(&mut self, execution_index: DistributedExecutionIndex, invocation: Value) {
        self.invocations.insert(execution_index, invocation);
    }

    /// Record the completion of an invocation.
    pub fn record_invocation_complete(
        &mut self,
        execution_index: DistributedExecutionIndex,
        completion: Value,
    ) {
        self.responses.insert(execution_index, completion);
    }

    /// Record the faults injected in this execution, each as `{"<kind>": {...}}`.
    pub fn set_faults_injected(
        &mut self,
        faults: impl IntoIterator<Item = (DistributedExecutionIndex, Value)>,
    ) {
        self.faults_injected.extend(faults);
    }

    /// Mark an RPC as answered from a cache.
    pub fn record_cached_rpc(&mut self, execution_index: DistributedExecutionIndex) {
        self.cached_rpcs.insert(execution_index);
    }

    /// Number of recorded invocations
    pub fn invocation_count(&self) -> usize {
        self.invocations.len()
    }

    /// Warnings found by the last analysis
    pub fn warnings(&self) -> &[AnalyzerWarning] {
        &self.warnings
    }

    /// Where the report was written, once it has been.
    pub fn materialized(&self) -> Option<&MaterializedReport> {
        self.materialized.as_ref()
    }

    /// RPCs in invocation order.
    pub fn rpcs(&self) -> impl Iterator<Item = RpcRecord<'_>> {
        self.invocations
            .iter()
            .enumerate()
            .map(|(position, (dei, invocation))| RpcRecord {
                position,
                execution_index: dei,
                invocation,
                fault: self.faults_injected.get(dei),
                response: self.responses.get(dei),
                cached: self.cached_rpcs.contains(dei),
            })
    }

    /// Run analyzers over the recorded RPCs.
    pub fn analyze(
        &self,
        analyzers: &mut [Box<dyn ReportAnalyzer>],
        test_passed: bool,
    ) -> FilibusterResult<Vec<AnalyzerWarning>> {
        let mut warnings = Vec::new();
        for analyzer in analyzers.iter_mut() {
            for rpc in self.rpcs() {
                analyzer.rpc(test_passed, &rpc).map_err(|e| {
                    FilibusterError::Report(format!("analyzer {} failed: {e}", analyzer.name()))
                })?;
            }
            let found = analyzer.take_warnings();
            if analyzer.report_when(test_passed) {
                warnings.extend(found);
            }
        }
        Ok(warnings)
    }

    /// The report document; runs the built-in analyzers first.
    pub fn to_json(&mut self) -> FilibusterResult<Value> {
        let mut analyzers = default_analyzers(self.avoid_redundant_injections);
        self.warnings = self.analyze(&mut analyzers, self.passed)?;

        let empty = || Value::Object(Map::new());
        let rpcs: Vec<Value> = self
            .rpcs()
            .map(|rpc| {
                let dei = rpc.execution_index.to_string();
                let warnings: Vec<Value> = self
                    .warnings
                    .iter()
                    .filter(|w| w.execution_index == dei)
                    .map(|w| {
                        json!({
                            "dei": w.execution_index,
                            "name": w.name,
                            "recommendation": w.recommendation,
                            "impact": w.impact,
                            "description": w.description,
                            "details": w.details,
                        })
                    })
                    .collect();
                json!({
                    "generated_id": (rpc.position + 1).to_string(),
                    "dei": dei,
                    "request": rpc.invocation,
                    "response": rpc.response.cloned().unwrap_or_else(empty),
                    "fault": rpc.fault.cloned().unwrap_or_else(empty),
                    "warnings": warnings,
                })
            })
            .collect();

        Ok(json!({
            "iteration": self.iteration,
            "status": self.passed,
            "rpcs": rpcs,
            "uuid": self.uuid,
            "created_at": self.created_at.to_rfc3339(),
        }))
    }

    fn to_javascript(&mut self) -> anyhow::Result<String> {
        let document = self.to_json()?;
        Ok(format!("var analysis = {};", serde_json::to_string_pretty(&document)?))
    }

    /// Write `<directory>/filibuster-test-execution-<uuid>/analysis.js`.
    ///
    /// Only the first call writes; later calls return the same location.
    pub fn write_report(
        &mut self,
        directory: impl AsRef<Path>,
        iteration: u32,
        exception_occurred: bool,
    ) -> anyhow::Result<MaterializedReport> {
        if let Some(materialized) = &self.materialized {
            warn!(path = %materialized.path.display(), "test execution report already written");
            return Ok(materialized.clone());
        }
        self.iteration = iteration;
        self.passed = !exception_occurred;

        let report_directory = directory
            .as_ref()
            .join(format!("filibuster-test-execution-{}", self.uuid));
        std::fs::create_dir_all(&report_directory)
            .with_context(|| format!("creating {}", report_directory.display()))?;

        let path = report_directory.join("analysis.js");
        let script = self.to_javascript().context("rendering test execution report")?;
        std::fs::write(&path, script).with_context(|| format!("writing {}", path.display()))?;

        info!(path = %path.display(), iteration, passed = self.passed, "test execution report written");
        let materialized = MaterializedReport {
            iteration,
            passed: self.passed,
            path,
            uuid: self.uuid,
        };
        self.materialized = Some(materialized.clone());
        Ok(materialized)
    }
}
