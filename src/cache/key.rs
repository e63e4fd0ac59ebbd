//! Deterministic cache key derivation.
//!
//! A fingerprint covers the action, the caller's identity and only the
//! fields of the request that are relevant to the action. Irrelevant fields,
//! null fields and field ordering do not affect the key, so logically
//! equivalent requests collide onto the same cache entry.

use std::collections::BTreeMap;

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::identity::Identity;

/// Which request fields feed the fingerprint for an action.
///
/// Declared once per action instead of ad hoc at call sites; actions without
/// a spec hash every non-null field.
#[derive(Debug, Clone, Copy)]
pub struct KeySpec {
    /// The action this spec applies to
    pub action: &'static str,
    /// The request fields that are semantically relevant to the action
    pub fields: &'static [&'static str],
}

/// Key specifications for the known expensive actions.
const KEY_SPECS: &[KeySpec] = &[
    KeySpec {
        action: "generation",
        fields: &["goal", "experience", "equipment"],
    },
    KeySpec {
        action: "analysis",
        fields: &["period", "metrics"],
    },
    KeySpec {
        action: "nutrition",
        fields: &["meals"],
    },
];

impl KeySpec {
    /// Look up the spec for an action, if one is declared.
    pub fn for_action(action: &str) -> Option<&'static KeySpec> {
        KEY_SPECS.iter().find(|spec| spec.action == action)
    }
}

/// Derive the cache key for an action and request payload.
///
/// The relevant fields are collected into a sorted map, serialized to
/// canonical JSON (serde_json maps are ordered by key) and hashed into a
/// fixed-length digest, so two requests differing only in field order or in
/// fields the action ignores produce the same key. The action and identity
/// stay in plaintext ahead of the digest so entries can be invalidated by
/// substring match on either.
pub fn fingerprint(action: &str, identity: &Identity, data: &Value) -> String {
    let mut relevant: BTreeMap<String, Value> = BTreeMap::new();
    relevant.insert("action".to_string(), Value::String(action.to_string()));
    relevant.insert(
        "identity".to_string(),
        Value::String(identity.as_str().to_string()),
    );

    match KeySpec::for_action(action) {
        Some(spec) => {
            for field in spec.fields {
                if let Some(value) = data.get(field) {
                    if !value.is_null() {
                        relevant.insert((*field).to_string(), value.clone());
                    }
                }
            }
        }
        None => {
            // Unknown action: every non-null field is considered relevant.
            if let Some(map) = data.as_object() {
                for (field, value) in map {
                    if !value.is_null() {
                        relevant.insert(field.clone(), value.clone());
                    }
                }
            }
        }
    }

    // BTreeMap serialization is deterministic; a failure here would require
    // a non-string key, which the map cannot hold.
    let canonical = serde_json::to_string(&relevant).unwrap_or_default();
    format!(
        "{}:{}:{:x}",
        action,
        identity,
        Sha256::digest(canonical.as_bytes())
    )
}
