// Copyright 2025 Cowboy AI, LLC.

//! Execution index keys.
//!
//! A key renders as `V1-<metadata>-<source>-<signature>-<synchronous>-<asynchronous>`.
//! Every component is either the blake3 hex digest of its text or the raw
//! text wrapped in square brackets.

use super::callsite::Callsite;
use crate::config::DeiDigestConfig;
use std::hash::{Hash, Hasher};

/// Version tag leading every key.
pub const KEY_VERSION: &str = "V1";

/// blake3 hex digest of a component's text.
pub fn digest(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

fn component(text: &str, digested: bool) -> String {
    if digested {
        digest(text)
    } else {
        format!("[{text}]")
    }
}

/// Fingerprint of one callsite.
///
/// Equality and hashing use the rendered key only; the destination is kept
/// alongside for projections and is lost when an index is deserialized.
#[derive(Debug, Clone, Eq)]
pub struct ExecutionKey {
    rendered: String,
    destination: Option<String>,
}

impl PartialEq for ExecutionKey {
    fn eq(&self, other: &Self) -> bool {
        self.rendered == other.rendered
    }
}

impl Hash for ExecutionKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rendered.hash(state);
    }
}

impl ExecutionKey {
    /// Build the key for a callsite.
    pub fn from_callsite(callsite: &Callsite, digest_config: &DeiDigestConfig) -> Self {
        let signature = format!(
            "{},{},{}",
            callsite.class_or_module(),
            callsite.method(),
            callsite.parameter_list()
        );
        let synchronous = format!("{},{}", callsite.file(), callsite.line());
        let asynchronous = format!(
            "{},{}",
            callsite.arguments().type_name(),
            callsite.arguments().text()
        );

        let rendered = [
            KEY_VERSION.to_string(),
            component(callsite.metadata(), digest_config.metadata),
            component(callsite.service_name(), digest_config.source),
            component(&signature, digest_config.signature),
            component(&synchronous, digest_config.synchronous),
            component(&asynchronous, digest_config.asynchronous),
        ]
        .join("-");

        Self {
            rendered,
            destination: Some(callsite.class_or_module().to_string()),
        }
    }

    /// Wrap an already rendered key.
    pub fn from_rendered(rendered: impl Into<String>) -> Self {
        Self {
            rendered: rendered.into(),
            destination: None,
        }
    }

    /// Rendered key
    pub fn as_str(&self) -> &str {
        &self.rendered
    }

    /// Destination module, when known
    pub fn destination(&self) -> Option<&str> {
        self.destination.as_deref()
    }

    /// The five components after the version tag, or `None` for a key not
    /// produced by [`ExecutionKey::from_callsite`].
    fn components(&self) -> Option<Vec<&str>> {
        let rest = self.rendered.strip_prefix(KEY_VERSION)?.strip_prefix('-')?;
        let mut parts = Vec::with_capacity(5);
        let mut remaining = rest;
        for index in 0..5 {
            let last = index == 4;
            let end = if remaining.starts_with('[') {
                if last {
                    remaining.ends_with(']').then_some(remaining.len())?
                } else {
                    remaining.find("]-").map(|i| i + 1)?
                }
            } else if last {
                remaining.len()
            } else {
                remaining.find('-')?
            };
            parts.push(&remaining[..end]);
            remaining = if last { "" } else { &remaining[end + 1..] };
        }
        Some(parts)
    }

    /// Metadata component
    pub fn only_metadata(&self) -> Option<&str> {
        self.components().map(|c| c[0])
    }

    /// Metadata and signature components joined with `-`
    pub fn only_metadata_and_signature(&self) -> Option<String> {
        self.components().map(|c| format!("{}-{}", c[0], c[2]))
    }

    /// Signature component
    pub fn only_signature(&self) -> Option<&str> {
        self.components().map(|c| c[2])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dei::CallsiteArguments;
    use pretty_assertions::assert_eq;

    fn callsite() -> Callsite {
        Callsite::new(
            "api_server",
            "cloud.filibuster.examples.Hello",
            "Hello/PartialHello",
            CallsiteArguments::from_value("HelloRequest", &serde_json::json!({"name": "x"})),
        )
        .at("server.rs", 42)
    }

    #[test]
    fn test_raw_key_layout() {
        let key = ExecutionKey::from_callsite(&callsite(), &DeiDigestConfig::raw());
        assert_eq!(
            key.as_str(),
            r#"V1-[]-[api_server]-[cloud.filibuster.examples.Hello,Hello/PartialHello,[]]-[server.rs,42]-[HelloRequest,{"name":"x"}]"#
        );
        assert_eq!(key.destination(), Some("cloud.filibuster.examples.Hello"));
    }

    #[test]
    fn test_digested_key_is_stable() {
        let a = ExecutionKey::from_callsite(&callsite(), &DeiDigestConfig::default());
        let b = ExecutionKey::from_callsite(&callsite(), &DeiDigestConfig::default());
        assert_eq!(a, b);
        assert_eq!(a.as_str().split('-').count(), 6);
        assert_eq!(a.only_signature(), Some(digest("cloud.filibuster.examples.Hello,Hello/PartialHello,[]").as_str()));
    }

    #[test]
    fn test_projections_on_raw_key() {
        let key = ExecutionKey::from_callsite(&callsite(), &DeiDigestConfig::raw());
        assert_eq!(key.only_metadata(), Some("[]"));
        assert_eq!(
            key.only_signature(),
            Some("[cloud.filibuster.examples.Hello,Hello/PartialHello,[]]")
        );
        assert_eq!(
            key.only_metadata_and_signature().as_deref(),
            Some("[]-[cloud.filibuster.examples.Hello,Hello/PartialHello,[]]")
        );
    }

    #[test]
    fn test_projections_survive_reparse() {
        let key = ExecutionKey::from_callsite(&callsite(), &DeiDigestConfig::default());
        let reparsed = ExecutionKey::from_rendered(key.as_str());
        assert_eq!(reparsed, key);
        assert_eq!(reparsed.only_signature(), key.only_signature());
        assert_eq!(reparsed.destination(), None);
    }

    #[test]
    fn test_opaque_key_has_no_projection() {
        let key = ExecutionKey::from_rendered("opaque");
        assert_eq!(key.only_metadata(), None);
    }
}
