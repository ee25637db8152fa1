// Copyright 2025 Cowboy AI, LLC.

//! Distributed execution indexes.
//!
//! A distributed execution index (DEI) is the stack of callsite
//! fingerprints that led to the current remote call, each paired with an
//! occurrence counter. For deterministic application code the serialized
//! index is byte-identical across executions, which is what lets fault
//! decisions recorded in one execution be replayed in another.

mod callsite;
mod index;
mod key;

pub use callsite::{canonical_json, Callsite, CallsiteArguments};
pub use index::DistributedExecutionIndex;
pub use key::{digest, ExecutionKey, KEY_VERSION};
