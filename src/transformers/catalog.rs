// Copyright 2025 Cowboy AI, LLC.

//! Exception catalogs: the payload is ignored and each mutation is one
//! exception from a fixed list.

use super::indexed::{Indexed, Mutation};
use super::TransformerKind;
use crate::errors::{FilibusterError, FilibusterResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// An exception a database client could raise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbException {
    /// Exception name
    pub name: String,
    /// `cause`, `code`, ...
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl DbException {
    /// An exception without metadata.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Add a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// The Redis command timeout raised by lettuce.
    pub fn redis_command_timeout() -> Self {
        Self::new("io.lettuce.core.RedisCommandTimeoutException")
            .with_metadata("cause", "Command timed out after 100 millisecond(s)")
            .with_metadata("code", "")
    }

    /// `{"name": ..., "metadata": {...}}`
    pub fn to_json(&self) -> Value {
        serde_json::json!({ "name": self.name, "metadata": self.metadata })
    }
}

/// Walks a non-empty list of exceptions.
#[derive(Debug, Clone, Default)]
pub struct DbExceptionCatalog {
    exceptions: Vec<DbException>,
}

impl DbExceptionCatalog {
    /// A catalog; an empty one is rejected.
    pub fn new(exceptions: Vec<DbException>) -> FilibusterResult<Self> {
        if exceptions.is_empty() {
            return Err(FilibusterError::Transformer(
                "no database exceptions registered".into(),
            ));
        }
        Ok(Self { exceptions })
    }

    /// Exceptions in enumeration order.
    pub fn exceptions(&self) -> &[DbException] {
        &self.exceptions
    }
}

impl Mutation for DbExceptionCatalog {
    type Payload = Value;
    type Output = Value;
    const KIND: TransformerKind = TransformerKind::DbException;

    fn count(&self, _reference: &Value) -> usize {
        self.exceptions.len()
    }

    fn mutate(&self, _payload: &Value, index: usize) -> Value {
        self.exceptions[index].to_json()
    }

    fn unmutated(&self, payload: &Value) -> Value {
        payload.clone()
    }
}

/// The single-entry Redis timeout catalog.
#[derive(Debug, Clone, Copy, Default)]
pub struct RedisTimeout;

impl Mutation for RedisTimeout {
    type Payload = Value;
    type Output = Value;
    const KIND: TransformerKind = TransformerKind::RedisTimeoutException;

    fn count(&self, _reference: &Value) -> usize {
        1
    }

    fn mutate(&self, _payload: &Value, _index: usize) -> Value {
        DbException::redis_command_timeout().to_json()
    }

    fn unmutated(&self, payload: &Value) -> Value {
        payload.clone()
    }
}

/// Registered database exceptions, one per execution.
pub type DbExceptionTransformer = Indexed<DbExceptionCatalog>;
/// Redis command timeout.
pub type RedisTimeoutExceptionTransformer = Indexed<RedisTimeout>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transformers::Transformer;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_redis_timeout_single_mutation() {
        let mut transformer = RedisTimeoutExceptionTransformer::default();
        let accumulator = transformer.initial_accumulator(&Value::Null);
        transformer.transform(&Value::Null, accumulator);
        assert!(!transformer.has_next());
        assert_eq!(
            transformer.result(),
            &json!({
                "name": "io.lettuce.core.RedisCommandTimeoutException",
                "metadata": {"cause": "Command timed out after 100 millisecond(s)", "code": ""}
            })
        );
    }

    #[test]
    fn test_db_catalog_walks_every_exception() {
        let catalog = DbExceptionCatalog::new(vec![
            DbException::new("a"),
            DbException::new("b").with_metadata("code", "40001"),
        ])
        .unwrap();
        let mut transformer = DbExceptionTransformer::new(catalog);
        let mut accumulator = transformer.initial_accumulator(&json!("row"));
        let mut names = Vec::new();
        loop {
            transformer.transform(&json!("row"), accumulator);
            names.push(transformer.result()["name"].clone());
            if !transformer.has_next() {
                break;
            }
            accumulator = transformer.next_accumulator();
        }
        assert_eq!(names, vec![json!("a"), json!("b")]);
    }

    #[test]
    fn test_empty_catalog_rejected() {
        assert!(DbExceptionCatalog::new(Vec::new()).is_err());
    }
}
