// Copyright 2025 Cowboy AI, LLC.

//! Callsite identity

use crate::errors::FilibusterResult;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::panic::Location;

/// Rewrite a JSON value so every object has its keys in lexicographic order.
pub fn canonical_json(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut sorted = Map::new();
            for (k, v) in entries {
                sorted.insert(k.clone(), canonical_json(v));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical_json).collect()),
        other => other.clone(),
    }
}

/// `type_name` output with module paths dropped from every path it names:
/// `alloc::vec::Vec<app::api::Req>` becomes `Vec<Req>`.
fn short_type_name(full: &str) -> String {
    let mut short = String::with_capacity(full.len());
    let mut path = String::new();
    for c in full.chars() {
        if c.is_alphanumeric() || c == '_' || c == ':' {
            path.push(c);
            continue;
        }
        short.push_str(path.rsplit("::").next().unwrap_or_default());
        path.clear();
        short.push(c);
    }
    short.push_str(path.rsplit("::").next().unwrap_or_default());
    short
}

/// Arguments of an instrumented call, reduced to a type label and a
/// canonical text form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallsiteArguments {
    #[serde(rename = "class")]
    type_name: String,
    #[serde(rename = "toString")]
    text: String,
}

impl CallsiteArguments {
    /// Serialize arguments canonically; the label is the Rust type name
    /// without module paths.
    ///
    /// The label feeds the execution index, so callers that need it to hold
    /// across compiler releases should name it with [`Self::with_type_name`]
    /// or build through [`Self::from_value`].
    pub fn new<T: Serialize + ?Sized>(arguments: &T) -> FilibusterResult<Self> {
        let value = serde_json::to_value(arguments)?;
        Ok(Self::from_value(short_type_name(std::any::type_name::<T>()), &value))
    }

    /// Arguments already in JSON form, with an explicit type label.
    pub fn from_value(type_name: impl Into<String>, value: &Value) -> Self {
        Self {
            type_name: type_name.into(),
            text: canonical_json(value).to_string(),
        }
    }

    /// A call without arguments.
    pub fn empty() -> Self {
        Self {
            type_name: String::new(),
            text: String::new(),
        }
    }

    /// Replace the type label.
    pub fn with_type_name(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = type_name.into();
        self
    }

    /// Type label
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Canonical text
    pub fn text(&self) -> &str {
        &self.text
    }

    /// `{"class": ..., "toString": ...}` as sent in invocation records.
    pub fn to_json(&self) -> Value {
        serde_json::json!({ "class": self.type_name, "toString": self.text })
    }
}

/// One instrumented call: who calls what, with which arguments, from where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Callsite {
    service_name: String,
    class_or_module: String,
    method: String,
    arguments: CallsiteArguments,
    file: String,
    line: u32,
    metadata: String,
}

impl Callsite {
    /// Capture a callsite at the caller's source location.
    #[track_caller]
    pub fn new(
        service_name: impl Into<String>,
        class_or_module: impl Into<String>,
        method: impl Into<String>,
        arguments: CallsiteArguments,
    ) -> Self {
        let location = Location::caller();
        Self {
            service_name: service_name.into(),
            class_or_module: class_or_module.into(),
            method: method.into(),
            arguments,
            file: location.file().to_string(),
            line: location.line(),
            metadata: String::new(),
        }
    }

    /// Override the source location.
    pub fn at(mut self, file: impl Into<String>, line: u32) -> Self {
        self.file = file.into();
        self.line = line;
        self
    }

    /// Attach test-scope metadata folded into the key.
    pub fn with_metadata(mut self, metadata: impl Into<String>) -> Self {
        self.metadata = metadata.into();
        self
    }

    /// Originating service
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Destination class or module
    pub fn class_or_module(&self) -> &str {
        &self.class_or_module
    }

    /// Invoked method
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Call arguments
    pub fn arguments(&self) -> &CallsiteArguments {
        &self.arguments
    }

    /// Source file
    pub fn file(&self) -> &str {
        &self.file
    }

    /// Source line
    pub fn line(&self) -> u32 {
        self.line
    }

    /// Test-scope metadata
    pub fn metadata(&self) -> &str {
        &self.metadata
    }

    /// Parameter list rendered into the signature; the wire protocol only
    /// ever carries an empty one.
    pub fn parameter_list(&self) -> &'static str {
        "[]"
    }
}
