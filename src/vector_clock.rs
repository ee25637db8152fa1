// Copyright 2025 Cowboy AI, LLC.

//! Vector clocks keyed by service name.
//!
//! Each instrumented service owns one counter. The client side ticks its own
//! counter before every outbound call; the server side merges whatever clock
//! arrived with the request. Clocks travel as JSON objects with keys in
//! lexicographic order, so two clocks are equal exactly when their serialized
//! forms are equal.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Name of an instrumented service.
pub type ServiceName = String;

/// Partial order relationship between two vector clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ClockCmp {
    /// All counters are equal.
    Equal,
    /// Self is causally before other (self <= other and self != other).
    Before,
    /// Self is causally after other (self >= other and self != other).
    After,
    /// Neither before nor after: concurrent updates.
    Concurrent,
}

/// Causal counter per service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct VectorClock {
    counters: BTreeMap<ServiceName, u64>,
}

impl VectorClock {
    /// Create an empty vector clock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a vector clock from counters.
    pub fn from_counters<I, S>(counters: I) -> Self
    where
        I: IntoIterator<Item = (S, u64)>,
        S: Into<ServiceName>,
    {
        Self {
            counters: counters.into_iter().map(|(s, c)| (s.into(), c)).collect(),
        }
    }

    /// Lenient parse: anything that is not a JSON object of non-negative
    /// integers yields an empty clock.
    pub fn parse(serialized: &str) -> Self {
        serialized.parse().unwrap_or_default()
    }

    /// Counter for a service (0 if missing).
    pub fn get(&self, service: &str) -> u64 {
        self.counters.get(service).copied().unwrap_or(0)
    }

    /// True when no service has ticked.
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Iterate counters in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.counters.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Raise the service's counter by exactly one, in place.
    pub fn tick(&mut self, service: &str) {
        let entry = self.counters.entry(service.to_string()).or_insert(0);
        *entry = entry.saturating_add(1);
    }

    /// Return a new clock with the service's counter incremented by 1.
    pub fn increment(&self, service: &str) -> Self {
        let mut next = self.clone();
        next.tick(service);
        next
    }

    /// Pointwise maximum over the union of keys.
    pub fn merge(&self, other: &Self) -> Self {
        let mut merged = self.counters.clone();
        for (service, &count) in &other.counters {
            let entry = merged.entry(service.clone()).or_insert(0);
            if count > *entry {
                *entry = count;
            }
        }
        Self { counters: merged }
    }

    /// Merge a sequence of clocks.
    pub fn merge_all<'a>(clocks: impl IntoIterator<Item = &'a VectorClock>) -> Self {
        clocks
            .into_iter()
            .fold(VectorClock::new(), |acc, clock| acc.merge(clock))
    }

    /// True if every counter of `other` is <= the matching counter here.
    pub fn descends(&self, other: &Self) -> bool {
        other
            .counters
            .iter()
            .all(|(service, &count)| count <= self.get(service))
    }

    /// Partial order comparison per vector clock semantics.
    pub fn compare(&self, other: &Self) -> ClockCmp {
        match (other.descends(self), self.descends(other)) {
            (true, true) => ClockCmp::Equal,
            (true, false) => ClockCmp::Before,
            (false, true) => ClockCmp::After,
            (false, false) => ClockCmp::Concurrent,
        }
    }

    /// Some(Ordering) if comparable, None if concurrent.
    pub fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match self.compare(other) {
            ClockCmp::Equal => Some(Ordering::Equal),
            ClockCmp::Before => Some(Ordering::Less),
            ClockCmp::After => Some(Ordering::Greater),
            ClockCmp::Concurrent => None,
        }
    }

    /// True if self causally dominates other (self >= other and !=).
    pub fn dominates(&self, other: &Self) -> bool {
        matches!(self.compare(other), ClockCmp::After)
    }

    /// True if other causally dominates self.
    pub fn is_dominated_by(&self, other: &Self) -> bool {
        other.dominates(self)
    }

    /// JSON object form.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.counters
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::from(*v)))
                .collect(),
        )
    }
}

impl fmt::Display for VectorClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_json().to_string())
    }
}

impl FromStr for VectorClock {
    type Err = serde_json::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_and_get() {
        let vc = VectorClock::new();
        let vc1 = vc.increment("a");
        let vc2 = vc1.increment("a");
        assert_eq!(vc.get("a"), 0);
        assert_eq!(vc1.get("a"), 1);
        assert_eq!(vc2.get("a"), 2);
    }

    #[test]
    fn test_single_tick_serializes() {
        let mut vc = VectorClock::new();
        vc.tick("hello");
        assert_eq!(vc.to_string(), r#"{"hello":1}"#);
    }

    #[test]
    fn test_serialization_orders_keys() {
        let vc = VectorClock::new().increment("zeta").increment("alpha");
        assert_eq!(vc.to_string(), r#"{"alpha":1,"zeta":1}"#);
        assert_eq!(VectorClock::parse(&vc.to_string()), vc);
    }

    #[test]
    fn test_lenient_parse() {
        assert!(VectorClock::parse("").is_empty());
        assert!(VectorClock::parse("not json").is_empty());
        assert!(VectorClock::parse(r#"{"a":-1}"#).is_empty());
        assert!(VectorClock::parse("[1,2]").is_empty());
        assert_eq!(VectorClock::parse(r#"{"a":3}"#).get("a"), 3);
    }

    #[test]
    fn test_merge_and_compare() {
        let a1 = VectorClock::new().increment("a");
        let b1 = VectorClock::new().increment("b");

        let merged = a1.merge(&b1);
        assert_eq!(merged.get("a"), 1);
        assert_eq!(merged.get("b"), 1);

        assert_eq!(a1.compare(&merged), ClockCmp::Before);
        assert_eq!(b1.compare(&merged), ClockCmp::Before);
        assert_eq!(a1.compare(&b1), ClockCmp::Concurrent);
        assert_eq!(merged.compare(&merged), ClockCmp::Equal);
        assert!(merged.dominates(&a1));
    }

    #[test]
    fn test_descends_treats_missing_as_zero() {
        let a = VectorClock::from_counters([("a", 2), ("b", 1)]);
        let b = VectorClock::from_counters([("a", 1)]);
        assert!(a.descends(&b));
        assert!(!b.descends(&a));
        assert!(a.descends(&VectorClock::new()));
        assert!(a.descends(&a));
    }

    #[test]
    fn test_partial_cmp() {
        let a = VectorClock::new().increment("x");
        let b = a.merge(&VectorClock::new().increment("y"));
        assert_eq!(a.partial_cmp(&b), Some(Ordering::Less));
        assert_eq!(b.partial_cmp(&a), Some(Ordering::Greater));

        let c = VectorClock::new().increment("z");
        assert_eq!(a.partial_cmp(&c), None);
    }

    #[test]
    fn test_merge_all() {
        let clocks = [
            VectorClock::from_counters([("a", 3)]),
            VectorClock::from_counters([("a", 1), ("b", 4)]),
        ];
        let merged = VectorClock::merge_all(&clocks);
        assert_eq!(merged, VectorClock::from_counters([("a", 3), ("b", 4)]));
    }
}
