// Copyright 2025 Cowboy AI, LLC.

//! Byzantine value enumeration.
//!
//! A [`Transformer`] turns a reference payload into one mutated value per
//! [`Accumulator`] state. Feeding each [`Transformer::next_accumulator`]
//! result back into [`Transformer::transform`] walks the transformer's whole
//! mutation space, after which [`Transformer::has_next`] is false. The
//! accumulator serializes, so each step can run in a separate test
//! execution.
//!
//! Instrumentors work with payloads as JSON values: every transformer is also
//! a [`DynTransformer`], and [`TransformerRegistry`] picks one by
//! [`PayloadKind`].

mod bytes;
mod catalog;
mod indexed;
mod json;
mod text;

pub use self::bytes::{
    BitInByteArrTransformer, BitFlip, BooleanAsByteArrTransformer, ByteArrByzantineTransformer,
    ByteArrByzantineValues, NegatedBooleanBytes, NextByte, StringAsByteArrTransformer,
};
pub use self::catalog::{
    DbException, DbExceptionCatalog, DbExceptionTransformer, RedisTimeout,
    RedisTimeoutExceptionTransformer,
};
pub use self::indexed::{Indexed, Mutation};
pub use self::json::{
    FieldCursor, JsonEncoding, JsonObjectAsByteArrTransformer, JsonObjectAsStringTransformer,
    JsonObjectTransformer, JsonBytes, JsonText, FIELD_DELIMITER,
};
pub use self::text::{
    BooleanAsStringTransformer, IntegerAsStringTransformer, NegatedBoolean, NegatedInteger,
    ShiftedChar, StringByzantineTransformer, StringByzantineValues, StringTransformer,
};

use crate::errors::{FilibusterError, FilibusterResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Iteration state threaded through a transformer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accumulator<P, C> {
    /// The unmutated payload of the reference execution
    #[serde(rename = "referenceValue")]
    pub reference_value: P,
    /// Transformer-specific cursor
    pub context: C,
}

impl<P, C> Accumulator<P, C> {
    /// Pair a reference value with a cursor.
    pub fn new(reference_value: P, context: C) -> Self {
        Self {
            reference_value,
            context,
        }
    }
}

/// A finite, restartable enumeration of mutations of a payload.
pub trait Transformer {
    /// Payload type consumed
    type Payload: Clone + Serialize + DeserializeOwned;
    /// Cursor type stored in the accumulator
    type Context: Clone + Serialize + DeserializeOwned;
    /// Mutated value type produced
    type Output: Clone + Serialize;

    /// Wire name of this transformer.
    fn kind(&self) -> TransformerKind;

    /// Accumulator for the first mutation of `reference`.
    fn initial_accumulator(&self, reference: &Self::Payload) -> Accumulator<Self::Payload, Self::Context>;

    /// Produce the mutation selected by `accumulator`.
    fn transform(
        &mut self,
        payload: &Self::Payload,
        accumulator: Accumulator<Self::Payload, Self::Context>,
    ) -> &mut Self;

    /// Whether mutations remain after the last one produced.
    fn has_next(&self) -> bool;

    /// The last mutation produced.
    ///
    /// # Panics
    ///
    /// Panics if called before [`Transformer::transform`].
    fn result(&self) -> &Self::Output;

    /// Accumulator selecting the mutation after the last one produced.
    ///
    /// # Panics
    ///
    /// Panics if called before [`Transformer::transform`].
    fn next_accumulator(&self) -> Accumulator<Self::Payload, Self::Context>;
}

/// Object-safe [`Transformer`] over JSON values.
pub trait DynTransformer: Send {
    /// Wire name
    fn transformer_kind(&self) -> TransformerKind;
    /// Serialized initial accumulator for a reference payload.
    fn initial_accumulator_json(&self, reference: &Value) -> FilibusterResult<Value>;
    /// Run one step from a serialized payload and accumulator.
    fn transform_json(&mut self, payload: &Value, accumulator: &Value) -> FilibusterResult<()>;
    /// Whether mutations remain
    fn has_next_mutation(&self) -> bool;
    /// Serialized last mutation; panics before a transform.
    fn result_json(&self) -> FilibusterResult<Value>;
    /// Serialized next accumulator; panics before a transform.
    fn next_accumulator_json(&self) -> FilibusterResult<Value>;
}

fn decode<T: DeserializeOwned>(what: &str, value: &Value) -> FilibusterResult<T> {
    serde_json::from_value(value.clone())
        .map_err(|e| FilibusterError::Transformer(format!("cannot read {what} from {value}: {e}")))
}

impl<T> DynTransformer for T
where
    T: Transformer + Send,
{
    fn transformer_kind(&self) -> TransformerKind {
        self.kind()
    }

    fn initial_accumulator_json(&self, reference: &Value) -> FilibusterResult<Value> {
        let reference: T::Payload = decode("payload", reference)?;
        Ok(serde_json::to_value(self.initial_accumulator(&reference))?)
    }

    fn transform_json(&mut self, payload: &Value, accumulator: &Value) -> FilibusterResult<()> {
        let payload: T::Payload = decode("payload", payload)?;
        let accumulator: Accumulator<T::Payload, T::Context> = decode("accumulator", accumulator)?;
        self.transform(&payload, accumulator);
        Ok(())
    }

    fn has_next_mutation(&self) -> bool {
        self.has_next()
    }

    fn result_json(&self) -> FilibusterResult<Value> {
        Ok(serde_json::to_value(self.result())?)
    }

    fn next_accumulator_json(&self) -> FilibusterResult<Value> {
        Ok(serde_json::to_value(self.next_accumulator())?)
    }
}

/// Closed set of built-in transformers, named on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransformerKind {
    /// One shifted character per position
    #[serde(rename = "StringTransformer")]
    String,
    /// One byte bump per position
    #[serde(rename = "StringAsByteArrTransformer")]
    StringAsByteArr,
    /// One single-bit flip per bit
    #[serde(rename = "BitInByteArrTransformer")]
    BitInByteArr,
    /// Negated `"true"`/`"false"`
    #[serde(rename = "BooleanAsStringTransformer")]
    BooleanAsString,
    /// Negated `"true"`/`"false"` bytes
    #[serde(rename = "BooleanAsByteArrTransformer")]
    BooleanAsByteArr,
    /// Negated decimal integer
    #[serde(rename = "IntegerAsStringTransformer")]
    IntegerAsString,
    /// `null` and `""`
    #[serde(rename = "StringByzantineTransformer")]
    StringByzantine,
    /// Fixed catalog of byte strings and `null`
    #[serde(rename = "ByteArrByzantineTransformer")]
    ByteArrByzantine,
    /// Redis command timeout
    #[serde(rename = "RedisTimeoutExceptionTransformer")]
    RedisTimeoutException,
    /// Registered database exceptions
    #[serde(rename = "DbExceptionTransformer")]
    DbException,
    /// Field-by-field mutation of a JSON object carried as text
    #[serde(rename = "JsonObjectAsStringTransformer", alias = "JsonObjectTransformer")]
    JsonObjectAsString,
    /// Field-by-field mutation of a JSON object carried as bytes
    #[serde(rename = "JsonObjectAsByteArrTransformer")]
    JsonObjectAsByteArr,
}

impl TransformerKind {
    /// Every built-in kind.
    pub const ALL: [TransformerKind; 12] = [
        TransformerKind::String,
        TransformerKind::StringAsByteArr,
        TransformerKind::BitInByteArr,
        TransformerKind::BooleanAsString,
        TransformerKind::BooleanAsByteArr,
        TransformerKind::IntegerAsString,
        TransformerKind::StringByzantine,
        TransformerKind::ByteArrByzantine,
        TransformerKind::RedisTimeoutException,
        TransformerKind::DbException,
        TransformerKind::JsonObjectAsString,
        TransformerKind::JsonObjectAsByteArr,
    ];

    /// Wire name
    pub fn name(&self) -> &'static str {
        match self {
            TransformerKind::String => "StringTransformer",
            TransformerKind::StringAsByteArr => "StringAsByteArrTransformer",
            TransformerKind::BitInByteArr => "BitInByteArrTransformer",
            TransformerKind::BooleanAsString => "BooleanAsStringTransformer",
            TransformerKind::BooleanAsByteArr => "BooleanAsByteArrTransformer",
            TransformerKind::IntegerAsString => "IntegerAsStringTransformer",
            TransformerKind::StringByzantine => "StringByzantineTransformer",
            TransformerKind::ByteArrByzantine => "ByteArrByzantineTransformer",
            TransformerKind::RedisTimeoutException => "RedisTimeoutExceptionTransformer",
            TransformerKind::DbException => "DbExceptionTransformer",
            TransformerKind::JsonObjectAsString => "JsonObjectAsStringTransformer",
            TransformerKind::JsonObjectAsByteArr => "JsonObjectAsByteArrTransformer",
        }
    }

    /// A fresh transformer of this kind. Database exceptions need a catalog
    /// and are built through [`TransformerRegistry::create`].
    pub fn instantiate(&self) -> Option<Box<dyn DynTransformer>> {
        let transformer: Box<dyn DynTransformer> = match self {
            TransformerKind::String => Box::new(StringTransformer::default()),
            TransformerKind::StringAsByteArr => Box::new(StringAsByteArrTransformer::default()),
            TransformerKind::BitInByteArr => Box::new(BitInByteArrTransformer::default()),
            TransformerKind::BooleanAsString => Box::new(BooleanAsStringTransformer::default()),
            TransformerKind::BooleanAsByteArr => Box::new(BooleanAsByteArrTransformer::default()),
            TransformerKind::IntegerAsString => Box::new(IntegerAsStringTransformer::default()),
            TransformerKind::StringByzantine => Box::new(StringByzantineTransformer::default()),
            TransformerKind::ByteArrByzantine => Box::new(ByteArrByzantineTransformer::default()),
            TransformerKind::RedisTimeoutException => {
                Box::new(RedisTimeoutExceptionTransformer::default())
            }
            TransformerKind::DbException => return None,
            TransformerKind::JsonObjectAsString => Box::new(JsonObjectAsStringTransformer::default()),
            TransformerKind::JsonObjectAsByteArr => {
                Box::new(JsonObjectAsByteArrTransformer::default())
            }
        };
        Some(transformer)
    }
}

impl std::fmt::Display for TransformerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Shape of a payload, as far as transformer selection cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    /// Free text
    Text,
    /// `"true"` or `"false"`
    BooleanText,
    /// A decimal integer in text form
    IntegerText,
    /// Text holding a JSON object
    ObjectText,
    /// Array of byte values
    Bytes,
    /// JSON boolean
    Boolean,
    /// JSON integer
    Integer,
    /// JSON object
    Object,
    /// Anything else: null, floats, other arrays
    Other,
}

impl PayloadKind {
    /// Classify a JSON value.
    pub fn of(value: &Value) -> Self {
        match value {
            Value::String(text) => Self::of_text(text),
            Value::Bool(_) => PayloadKind::Boolean,
            Value::Number(n) if n.is_i64() || n.is_u64() => PayloadKind::Integer,
            Value::Object(_) => PayloadKind::Object,
            Value::Array(items)
                if !items.is_empty()
                    && items.iter().all(|v| v.as_u64().is_some_and(|b| b <= 255)) =>
            {
                PayloadKind::Bytes
            }
            _ => PayloadKind::Other,
        }
    }

    /// Classify text.
    pub fn of_text(text: &str) -> Self {
        if text == "true" || text == "false" {
            PayloadKind::BooleanText
        } else if text.parse::<i64>().is_ok() {
            PayloadKind::IntegerText
        } else if serde_json::from_str::<Value>(text).is_ok_and(|v| v.is_object()) {
            PayloadKind::ObjectText
        } else {
            PayloadKind::Text
        }
    }

    /// Built-in transformer for this shape, if any.
    pub fn default_transformer(&self) -> Option<TransformerKind> {
        match self {
            PayloadKind::Text => Some(TransformerKind::String),
            PayloadKind::BooleanText => Some(TransformerKind::BooleanAsString),
            PayloadKind::IntegerText => Some(TransformerKind::IntegerAsString),
            PayloadKind::ObjectText => Some(TransformerKind::JsonObjectAsString),
            PayloadKind::Bytes => Some(TransformerKind::StringAsByteArr),
            PayloadKind::Boolean | PayloadKind::Integer | PayloadKind::Object | PayloadKind::Other => {
                None
            }
        }
    }
}

/// Maps payload shapes to transformers and owns the database exception
/// catalog.
#[derive(Debug, Clone)]
pub struct TransformerRegistry {
    by_payload: HashMap<PayloadKind, TransformerKind>,
    db_exceptions: Vec<DbException>,
}

impl Default for TransformerRegistry {
    fn default() -> Self {
        let by_payload = [
            PayloadKind::Text,
            PayloadKind::BooleanText,
            PayloadKind::IntegerText,
            PayloadKind::ObjectText,
            PayloadKind::Bytes,
        ]
        .into_iter()
        .filter_map(|kind| kind.default_transformer().map(|t| (kind, t)))
        .collect();
        Self {
            by_payload,
            db_exceptions: Vec::new(),
        }
    }
}

impl TransformerRegistry {
    /// Registry with the built-in mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `transformer` for payloads of shape `payload`.
    pub fn register(&mut self, payload: PayloadKind, transformer: TransformerKind) {
        self.by_payload.insert(payload, transformer);
    }

    /// Add an exception to the database exception catalog.
    pub fn add_db_exception(&mut self, exception: DbException) {
        self.db_exceptions.push(exception);
    }

    /// Transformer registered for a payload shape.
    pub fn kind_for(&self, payload: PayloadKind) -> Option<TransformerKind> {
        self.by_payload.get(&payload).copied()
    }

    /// Transformer registered for the shape of `value`.
    pub fn for_payload(&self, value: &Value) -> FilibusterResult<Box<dyn DynTransformer>> {
        let payload = PayloadKind::of(value);
        let kind = self.kind_for(payload).ok_or_else(|| {
            FilibusterError::Transformer(format!("no transformer registered for {payload:?} payload {value}"))
        })?;
        self.create(kind)
    }

    /// A fresh transformer of the given kind.
    pub fn create(&self, kind: TransformerKind) -> FilibusterResult<Box<dyn DynTransformer>> {
        match kind.instantiate() {
            Some(transformer) => Ok(transformer),
            None => Ok(Box::new(DbExceptionTransformer::new(DbExceptionCatalog::new(
                self.db_exceptions.clone(),
            )?))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_case::test_case;

    #[test_case(json!("hello") => PayloadKind::Text ; "text")]
    #[test_case(json!("true") => PayloadKind::BooleanText ; "boolean text")]
    #[test_case(json!("-42") => PayloadKind::IntegerText ; "integer text")]
    #[test_case(json!("{\"a\": 1}") => PayloadKind::ObjectText ; "object text")]
    #[test_case(json!([104, 105]) => PayloadKind::Bytes ; "bytes")]
    #[test_case(json!([104, 300]) => PayloadKind::Other ; "not bytes")]
    #[test_case(json!(true) => PayloadKind::Boolean ; "boolean")]
    #[test_case(json!(7) => PayloadKind::Integer ; "integer")]
    #[test_case(json!(1.5) => PayloadKind::Other ; "float")]
    #[test_case(json!(null) => PayloadKind::Other ; "null")]
    fn test_payload_kind(value: Value) -> PayloadKind {
        PayloadKind::of(&value)
    }

    #[test]
    fn test_kind_wire_names() {
        for kind in TransformerKind::ALL {
            assert_eq!(serde_json::to_value(kind).unwrap(), json!(kind.name()));
            let back: TransformerKind = serde_json::from_value(json!(kind.name())).unwrap();
            assert_eq!(back, kind);
        }
        let alias: TransformerKind = serde_json::from_value(json!("JsonObjectTransformer")).unwrap();
        assert_eq!(alias, TransformerKind::JsonObjectAsString);
    }

    #[test]
    fn test_registry_selects_by_payload() {
        let registry = TransformerRegistry::new();
        let transformer = registry.for_payload(&json!("abc")).unwrap();
        assert_eq!(transformer.transformer_kind(), TransformerKind::String);
        assert!(registry.for_payload(&json!(null)).is_err());
    }

    #[test]
    fn test_registry_db_exceptions_need_catalog() {
        let mut registry = TransformerRegistry::new();
        assert!(registry.create(TransformerKind::DbException).is_err());
        registry.add_db_exception(DbException::new("java.sql.SQLTransientConnectionException"));
        assert!(registry.create(TransformerKind::DbException).is_ok());
    }

    #[test]
    fn test_dyn_round_trip_through_json() {
        let mut transformer = TransformerKind::String.instantiate().unwrap();
        let reference = json!("ab");
        let mut accumulator = transformer.initial_accumulator_json(&reference).unwrap();
        assert_eq!(accumulator, json!({"referenceValue": "ab", "context": 0}));

        let mut results = Vec::new();
        loop {
            transformer.transform_json(&reference, &accumulator).unwrap();
            results.push(transformer.result_json().unwrap());
            if !transformer.has_next_mutation() {
                break;
            }
            accumulator = transformer.next_accumulator_json().unwrap();
        }
        assert_eq!(results, vec![json!("\u{83}b"), json!("a\u{84}")]);
    }

    #[test]
    fn test_dyn_rejects_wrong_payload() {
        let mut transformer = TransformerKind::String.instantiate().unwrap();
        assert!(transformer.initial_accumulator_json(&json!(3)).is_err());
        assert!(transformer
            .transform_json(&json!("a"), &json!({"referenceValue": "a"}))
            .is_err());
    }
}
