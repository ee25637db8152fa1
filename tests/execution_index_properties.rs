// Copyright 2025 Cowboy AI, LLC.

use filibuster::{
    Callsite, CallsiteArguments, DeiDigestConfig, DistributedExecutionIndex, ExecutionKey,
};
use proptest::prelude::*;
use serde_json::json;

fn keys() -> impl Strategy<Value = Vec<String>> {
    proptest::collection::vec("[a-c]", 0..8)
}

fn build(keys: &[String]) -> DistributedExecutionIndex {
    let mut index = DistributedExecutionIndex::new();
    for key in keys {
        index.push(ExecutionKey::from_rendered(key.as_str()));
    }
    index
}

proptest! {
    #[test]
    fn push_then_pop_restores_callstack(prefix in keys(), key in "[a-d]") {
        let mut index = build(&prefix);
        let before = index.to_string();
        index.push(ExecutionKey::from_rendered(key));
        index.pop();
        prop_assert_eq!(index.to_string(), before);
    }

    #[test]
    fn serialized_index_parses_back(prefix in keys()) {
        let index = build(&prefix);
        let parsed: DistributedExecutionIndex = index.to_string().parse().unwrap();
        prop_assert_eq!(&parsed, &index);
        prop_assert_eq!(parsed.to_string(), index.to_string());
    }

    #[test]
    fn same_pushes_give_same_index(prefix in keys()) {
        prop_assert_eq!(build(&prefix), build(&prefix));
    }

    #[test]
    fn siblings_never_collide(prefix in keys(), key in "[a-d]", repeats in 2usize..6) {
        let mut index = build(&prefix);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..repeats {
            index.push(ExecutionKey::from_rendered(key.as_str()));
            prop_assert!(seen.insert(index.to_string()));
            index.pop();
        }
    }
}

#[test]
fn callsite_keys_are_deterministic_and_argument_sensitive() {
    let digest = DeiDigestConfig::default();
    let call = |name: &str| {
        Callsite::new(
            "api",
            "HelloService",
            "Hello",
            CallsiteArguments::from_value("HelloRequest", &json!({"name": name})),
        )
        .at("api.rs", 7)
    };

    let mut first = DistributedExecutionIndex::new();
    first.push_callsite(&call("a"), &digest);
    let mut second = DistributedExecutionIndex::new();
    second.push_callsite(&call("a"), &digest);
    assert_eq!(first, second);

    let mut other = DistributedExecutionIndex::new();
    other.push_callsite(&call("b"), &digest);
    assert_ne!(first, other);
}
