// Copyright 2025 Cowboy AI, LLC.

//! # Filibuster
//!
//! Service-level fault injection testing for distributed applications.
//!
//! Every RPC a service makes under test is wrapped by an instrumentor that
//! tracks causality and asks a fault decision source whether to fail it:
//! - **Vector clocks**: per-request causal history across services
//! - **Distributed execution index**: a stable name for each RPC, built from
//!   the callsite stack and its invocation counts
//! - **Instrumentors**: the client and server halves of the protocol
//! - **Decision sources**: an in-process fault core or a remote control plane
//! - **Counterexamples**: replay of a recorded failing execution
//! - **Transformers**: enumeration of response mutations
//! - **Reports**: per-execution RPC records with analyzer findings
//!
//! ## Protocol
//!
//! 1. The client instrumentor advances the clock and the execution index and
//!    reports the invocation; the decision source may answer with a fault.
//! 2. The caller either injects the fault or performs the call, forwarding
//!    the propagated context.
//! 3. The server instrumentor stores the inbound context for the handler.
//! 4. The client instrumentor reports how the call completed.

#![warn(missing_docs)]

mod config;
mod context;
mod errors;
mod state;
mod vector_clock;

pub mod decision;
pub mod dei;
pub mod instrumentor;
pub mod report;
pub mod transformers;

pub use config::{DeiDigestConfig, FilibusterConfig};
pub use context::{
    ContextStorage, PropagatedContext, SharedContextStorage, ThreadLocalContextStorage,
    EXECUTION_INDEX_HEADER, FORCED_SLEEP_HEADER, GENERATED_ID_HEADER, INSTRUMENTATION_HEADER,
    IS_UPDATE_HEADER, ORIGIN_VCLOCK_HEADER, REQUEST_ID_HEADER, VCLOCK_HEADER,
};
pub use decision::{
    AnalysisConfiguration, CoreDecisionSource, Counterexample, DecisionSource, FaultCore,
    FaultInstruction, HttpDecisionSource,
};
pub use dei::{Callsite, CallsiteArguments, DistributedExecutionIndex, ExecutionKey};
pub use errors::{FilibusterError, FilibusterResult};
pub use instrumentor::{ClientInstrumentor, Harness, InjectedFault, ServerInstrumentor};
pub use report::{MaterializedReport, TestExecutionReport};
pub use state::InstrumentationState;
pub use transformers::{Transformer, TransformerKind, TransformerRegistry};
pub use vector_clock::{ClockCmp, ServiceName, VectorClock};
