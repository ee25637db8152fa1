// Copyright 2025 Cowboy AI, LLC.

//! Field-by-field mutation of JSON objects.
//!
//! Nested objects are flattened; a leaf is addressed by its keys joined with
//! [`FIELD_DELIMITER`] (a `->` inside a key is written `->-`). String,
//! boolean and integer leaves are mutated by the transformer their shape
//! selects, each leaf walked to exhaustion before the next. Leaves are
//! visited in lexicographic key order at every level, and encoded payloads
//! carry their keys in that order. Mutated leaves keep their JSON type. Null
//! and array leaves are left alone.

use super::{Accumulator, PayloadKind, Transformer, TransformerKind};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::Debug;
use tracing::warn;

/// Joins the keys of a flattened path.
pub const FIELD_DELIMITER: &str = "->";
const ESCAPED_DELIMITER: &str = "->-";

/// Progress on one leaf: its flattened name and the serialized accumulator
/// of the leaf's own transformer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldCursor {
    /// Flattened field name
    pub field: String,
    /// Accumulator of the leaf transformer
    pub accumulator: Value,
}

/// How the object travels: as text or as bytes.
pub trait JsonEncoding: Default + Debug + Clone {
    /// Wire payload type
    type Payload: Clone + Debug + Serialize + DeserializeOwned;
    /// Wire name of the transformer
    const KIND: TransformerKind;
    /// The object carried by a payload, if it is one.
    fn decode(payload: &Self::Payload) -> Option<Map<String, Value>>;
    /// Payload carrying a value.
    fn encode(value: &Value) -> Self::Payload;
}

/// Objects carried as JSON text.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonText;

impl JsonEncoding for JsonText {
    type Payload = String;
    const KIND: TransformerKind = TransformerKind::JsonObjectAsString;

    fn decode(payload: &String) -> Option<Map<String, Value>> {
        match serde_json::from_str(payload).ok()? {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    fn encode(value: &Value) -> String {
        value.to_string()
    }
}

/// Objects carried as UTF-8 JSON bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonBytes;

impl JsonEncoding for JsonBytes {
    type Payload = Vec<u8>;
    const KIND: TransformerKind = TransformerKind::JsonObjectAsByteArr;

    fn decode(payload: &Vec<u8>) -> Option<Map<String, Value>> {
        match serde_json::from_slice(payload).ok()? {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    fn encode(value: &Value) -> Vec<u8> {
        value.to_string().into_bytes()
    }
}

#[derive(Debug)]
struct Leaf {
    field: String,
    path: Vec<String>,
    value: Value,
}

fn leaf_transformer(value: &Value) -> Option<TransformerKind> {
    match value {
        Value::Bool(_) => Some(TransformerKind::BooleanAsString),
        Value::Number(n) if n.is_i64() => Some(TransformerKind::IntegerAsString),
        Value::String(text) => match PayloadKind::of_text(text) {
            PayloadKind::BooleanText => Some(TransformerKind::BooleanAsString),
            PayloadKind::IntegerText => Some(TransformerKind::IntegerAsString),
            _ => Some(TransformerKind::String),
        },
        _ => None,
    }
}

fn leaf_input(value: &Value) -> Value {
    match value {
        Value::String(_) => value.clone(),
        other => Value::String(other.to_string()),
    }
}

fn restore(original: &Value, mutated: Value) -> Value {
    let text = mutated.as_str();
    match original {
        Value::Bool(_) => text
            .and_then(|t| t.parse::<bool>().ok())
            .map(Value::Bool)
            .unwrap_or(mutated),
        Value::Number(_) => text
            .and_then(|t| t.parse::<i64>().ok())
            .map(Value::from)
            .unwrap_or(mutated),
        _ => mutated,
    }
}

fn collect_leaves(object: &Map<String, Value>, path: &mut Vec<String>, out: &mut Vec<Leaf>) {
    for (key, value) in object {
        path.push(key.clone());
        match value {
            Value::Object(nested) => collect_leaves(nested, path, out),
            leaf if leaf_transformer(leaf).is_some() => out.push(Leaf {
                field: path
                    .iter()
                    .map(|k| k.replace(FIELD_DELIMITER, ESCAPED_DELIMITER))
                    .collect::<Vec<_>>()
                    .join(FIELD_DELIMITER),
                path: path.clone(),
                value: leaf.clone(),
            }),
            _ => {}
        }
        path.pop();
    }
}

fn leaves(object: &Map<String, Value>) -> Vec<Leaf> {
    let mut out = Vec::new();
    collect_leaves(object, &mut Vec::new(), &mut out);
    out
}

fn set_path(root: &mut Value, path: &[String], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut current = root;
    for key in parents {
        match current.get_mut(key) {
            Some(next) => current = next,
            None => return,
        }
    }
    if let Value::Object(map) = current {
        map.insert(last.clone(), value);
    }
}

fn cursor_for(leaf: &Leaf) -> Option<FieldCursor> {
    let transformer = leaf_transformer(&leaf.value)?.instantiate()?;
    let accumulator = transformer.initial_accumulator_json(&leaf_input(&leaf.value)).ok()?;
    Some(FieldCursor {
        field: leaf.field.clone(),
        accumulator,
    })
}

/// Composite transformer over the leaves of a JSON object.
#[derive(Debug, Clone)]
pub struct JsonObjectTransformer<E: JsonEncoding> {
    has_next: bool,
    leaf_has_next: bool,
    result: Option<E::Payload>,
    accumulator: Option<Accumulator<E::Payload, Vec<FieldCursor>>>,
}

impl<E: JsonEncoding> Default for JsonObjectTransformer<E> {
    fn default() -> Self {
        Self {
            has_next: true,
            leaf_has_next: false,
            result: None,
            accumulator: None,
        }
    }
}

impl<E: JsonEncoding> JsonObjectTransformer<E> {
    /// Number of leaves that will be mutated.
    pub fn field_count(reference: &E::Payload) -> usize {
        E::decode(reference).map(|o| leaves(&o).len()).unwrap_or(0)
    }

    fn step(&mut self, payload: &E::Payload, context: &mut [FieldCursor]) -> Option<E::Payload> {
        let object = E::decode(payload)?;
        let cursor = context.last_mut()?;
        let leaf = leaves(&object).into_iter().find(|l| l.field == cursor.field)?;
        let mut transformer = leaf_transformer(&leaf.value)?.instantiate()?;

        if let Err(err) = transformer.transform_json(&leaf_input(&leaf.value), &cursor.accumulator) {
            warn!(field = %leaf.field, error = %err, "leaf transformer rejected its accumulator");
            return None;
        }
        let mutated = transformer.result_json().ok()?;
        self.leaf_has_next = transformer.has_next_mutation();
        if self.leaf_has_next {
            cursor.accumulator = transformer.next_accumulator_json().ok()?;
        }

        let mut root = Value::Object(object);
        set_path(&mut root, &leaf.path, restore(&leaf.value, mutated));
        Some(E::encode(&root))
    }
}

impl<E: JsonEncoding> Transformer for JsonObjectTransformer<E> {
    type Payload = E::Payload;
    type Context = Vec<FieldCursor>;
    type Output = E::Payload;

    fn kind(&self) -> TransformerKind {
        E::KIND
    }

    fn initial_accumulator(&self, reference: &E::Payload) -> Accumulator<E::Payload, Vec<FieldCursor>> {
        let context = E::decode(reference)
            .and_then(|object| leaves(&object).first().and_then(cursor_for))
            .into_iter()
            .collect();
        Accumulator::new(reference.clone(), context)
    }

    fn transform(
        &mut self,
        payload: &E::Payload,
        mut accumulator: Accumulator<E::Payload, Vec<FieldCursor>>,
    ) -> &mut Self {
        self.leaf_has_next = false;
        let result = self
            .step(payload, &mut accumulator.context)
            .unwrap_or_else(|| payload.clone());
        self.result = Some(result);

        let fields = Self::field_count(&accumulator.reference_value);
        self.has_next = self.leaf_has_next || accumulator.context.len() < fields;
        self.accumulator = Some(accumulator);
        self
    }

    fn has_next(&self) -> bool {
        self.has_next
    }

    fn result(&self) -> &E::Payload {
        match &self.result {
            Some(result) => result,
            None => panic!("result() called before transform()"),
        }
    }

    fn next_accumulator(&self) -> Accumulator<E::Payload, Vec<FieldCursor>> {
        let Some(accumulator) = &self.accumulator else {
            panic!("next_accumulator() called before transform()");
        };
        let mut next = accumulator.clone();
        if !self.leaf_has_next {
            let following = E::decode(&next.reference_value).and_then(|object| {
                leaves(&object)
                    .get(next.context.len())
                    .and_then(cursor_for)
            });
            next.context.extend(following);
        }
        next
    }
}

/// JSON object carried as text.
pub type JsonObjectAsStringTransformer = JsonObjectTransformer<JsonText>;
/// JSON object carried as bytes.
pub type JsonObjectAsByteArrTransformer = JsonObjectTransformer<JsonBytes>;
