// Copyright 2025 Cowboy AI, LLC.

//! The execution index stack

use super::callsite::Callsite;
use super::key::ExecutionKey;
use crate::config::DeiDigestConfig;
use crate::errors::{FilibusterError, FilibusterResult};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PushRecord {
    Appended,
    Folded { previous: u64 },
}

/// Ordered stack of callsite keys with occurrence counters.
///
/// Occurrence counters are tracked per key for the lifetime of the index,
/// so popping a key and pushing it again (a retry, or a sibling call from
/// the same callsite) yields the next count rather than restarting at one.
/// Pushing the key that is already on top folds into that entry.
///
/// Equality and hashing only consider the ordered `(key, count)` pairs.
#[derive(Debug, Clone, Default)]
pub struct DistributedExecutionIndex {
    callstack: Vec<(ExecutionKey, u64)>,
    counters: HashMap<String, u64>,
    journal: Vec<PushRecord>,
}

impl PartialEq for DistributedExecutionIndex {
    fn eq(&self, other: &Self) -> bool {
        self.callstack == other.callstack
    }
}

impl Eq for DistributedExecutionIndex {}

impl Hash for DistributedExecutionIndex {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.callstack.hash(state);
    }
}

impl DistributedExecutionIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries on the stack.
    pub fn len(&self) -> usize {
        self.callstack.len()
    }

    /// True when nothing has been pushed.
    pub fn is_empty(&self) -> bool {
        self.callstack.is_empty()
    }

    /// Entries from bottom to top.
    pub fn entries(&self) -> impl Iterator<Item = (&str, u64)> {
        self.callstack.iter().map(|(k, c)| (k.as_str(), *c))
    }

    /// Top entry.
    pub fn last(&self) -> Option<(&ExecutionKey, u64)> {
        self.callstack.last().map(|(k, c)| (k, *c))
    }

    /// Push the fingerprint of a callsite.
    pub fn push_callsite(&mut self, callsite: &Callsite, digest_config: &DeiDigestConfig) {
        self.push(ExecutionKey::from_callsite(callsite, digest_config));
    }

    /// Push a key.
    pub fn push(&mut self, key: ExecutionKey) {
        let count = {
            let counter = self.counters.entry(key.as_str().to_string()).or_insert(0);
            *counter += 1;
            *counter
        };

        match self.callstack.last_mut() {
            Some((top, top_count)) if *top == key => {
                let previous = *top_count;
                *top_count = count;
                self.journal.push(PushRecord::Folded { previous });
            }
            _ => {
                self.callstack.push((key, count));
                self.journal.push(PushRecord::Appended);
            }
        }
        debug!(depth = self.callstack.len(), count, "pushed execution index key");
    }

    /// Undo the most recent push.
    ///
    /// # Panics
    ///
    /// Panics when the index is empty: push and pop are always paired by the
    /// instrumentation, so an empty pop is a bookkeeping bug.
    pub fn pop(&mut self) {
        assert!(
            !self.callstack.is_empty(),
            "pop() called on an empty distributed execution index"
        );

        match self.journal.pop() {
            Some(PushRecord::Folded { previous }) => {
                if let Some((_, count)) = self.callstack.last_mut() {
                    *count = previous;
                }
            }
            Some(PushRecord::Appended) | None => {
                self.callstack.pop();
            }
        }
    }

    /// Last key with only its metadata component.
    pub fn projection_last_key_with_only_metadata(&self) -> Option<String> {
        self.last()
            .and_then(|(k, _)| k.only_metadata().map(str::to_string))
    }

    /// Last key with only its metadata and signature components.
    pub fn projection_last_key_with_only_metadata_and_signature(&self) -> Option<String> {
        self.last().and_then(|(k, _)| k.only_metadata_and_signature())
    }

    /// Last key with only its signature component.
    pub fn projection_last_key_with_only_signature(&self) -> Option<String> {
        self.last()
            .and_then(|(k, _)| k.only_signature().map(str::to_string))
    }

    /// Destination module of the last key.
    pub fn projection_last_key_with_only_destination(&self) -> Option<String> {
        self.last()
            .and_then(|(k, _)| k.destination().map(str::to_string))
    }
}

/// `[["k", 1], ["k2", 2]]`, the form remote control planes and recorded
/// counterexamples match on.
impl fmt::Display for DistributedExecutionIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (position, (key, count)) in self.entries().enumerate() {
            if position > 0 {
                f.write_str(", ")?;
            }
            let key = serde_json::to_string(key).map_err(|_| fmt::Error)?;
            write!(f, "[{key}, {count}]")?;
        }
        f.write_str("]")
    }
}

impl FromStr for DistributedExecutionIndex {
    type Err = FilibusterError;

    /// Parse `[["key", n], ...]`; the empty string is the empty index.
    fn from_str(s: &str) -> FilibusterResult<Self> {
        if s.trim().is_empty() {
            return Ok(Self::new());
        }

        let pairs: Vec<(String, u64)> = serde_json::from_str(s)?;
        let mut counters: HashMap<String, u64> = HashMap::new();
        for (key, count) in &pairs {
            let counter = counters.entry(key.clone()).or_insert(0);
            *counter = (*counter).max(*count);
        }

        Ok(Self {
            callstack: pairs
                .into_iter()
                .map(|(key, count)| (ExecutionKey::from_rendered(key), count))
                .collect(),
            counters,
            journal: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dei::CallsiteArguments;
    use pretty_assertions::assert_eq;

    fn key(name: &str) -> ExecutionKey {
        ExecutionKey::from_rendered(name)
    }

    #[test]
    fn test_repeated_push_folds_into_top() {
        let mut dei = DistributedExecutionIndex::new();
        dei.push(key("a"));
        dei.push(key("a"));
        assert_eq!(dei.len(), 1);
        assert_eq!(dei.to_string(), r#"[["a", 2]]"#);
    }

    #[test]
    fn test_push_pop_restores() {
        let mut dei = DistributedExecutionIndex::new();
        dei.push(key("a"));
        let before = dei.clone();

        dei.push(key("b"));
        dei.pop();
        assert_eq!(dei, before);

        dei.push(key("a"));
        dei.pop();
        assert_eq!(dei, before);
    }

    #[test]
    fn test_siblings_get_distinct_counts() {
        let mut dei = DistributedExecutionIndex::new();
        dei.push(key("parent"));

        dei.push(key("child"));
        let first = dei.clone();
        dei.pop();

        dei.push(key("child"));
        let second = dei.clone();
        dei.pop();

        assert_eq!(first.to_string(), r#"[["parent", 1], ["child", 1]]"#);
        assert_eq!(second.to_string(), r#"[["parent", 1], ["child", 2]]"#);
        assert_ne!(first, second);
    }

    #[test]
    fn test_clone_does_not_alias() {
        let mut dei = DistributedExecutionIndex::new();
        dei.push(key("a"));
        let snapshot = dei.clone();
        dei.push(key("b"));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(dei.len(), 2);
    }

    #[test]
    #[should_panic(expected = "empty distributed execution index")]
    fn test_pop_empty_panics() {
        DistributedExecutionIndex::new().pop();
    }

    #[test]
    fn test_parse_round_trip_and_pop() {
        let mut dei: DistributedExecutionIndex = r#"[["a",1],["b",3]]"#.parse().unwrap();
        assert_eq!(dei.to_string(), r#"[["a", 1], ["b", 3]]"#);

        dei.push(key("b"));
        assert_eq!(dei.to_string(), r#"[["a", 1], ["b", 4]]"#);
        dei.pop();
        dei.pop();
        assert_eq!(dei.to_string(), r#"[["a", 1]]"#);
    }

    #[test]
    fn test_text_form_is_spaced_and_escaped() {
        let mut dei = DistributedExecutionIndex::new();
        dei.push(key("fp"));
        dei.push(key("fp"));
        assert_eq!(dei.to_string(), r#"[["fp", 2]]"#);

        let mut dei = DistributedExecutionIndex::new();
        dei.push(key("a"));
        dei.push(key(r#"b"c"#));
        let rendered = dei.to_string();
        assert_eq!(rendered, r#"[["a", 1], ["b\"c", 1]]"#);
        assert_eq!(rendered.parse::<DistributedExecutionIndex>().unwrap(), dei);
    }

    #[test]
    fn test_empty_string_parses_to_empty() {
        let dei: DistributedExecutionIndex = "".parse().unwrap();
        assert!(dei.is_empty());
        assert_eq!(dei.to_string(), "[]");
        assert!("{".parse::<DistributedExecutionIndex>().is_err());
    }

    #[test]
    fn test_destination_projection() {
        let callsite = Callsite::new("api", "world.World", "hello", CallsiteArguments::empty());
        let mut dei = DistributedExecutionIndex::new();
        assert_eq!(dei.projection_last_key_with_only_destination(), None);
        dei.push_callsite(&callsite, &DeiDigestConfig::default());
        assert_eq!(
            dei.projection_last_key_with_only_destination().as_deref(),
            Some("world.World")
        );
        assert!(dei.projection_last_key_with_only_metadata().is_some());
    }
}
