//! Key and slug helpers shared by the cache, the dispatcher and the vendor façade.

use serde_json::{Map, Value};

use crate::utils::crypto::sha256_hex;

/// Lowercase and keep only `[a-z0-9_-]`
pub fn sanitize_key(key: &str) -> String {
    key.chars()
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_' || *c == '-')
        .collect()
}

/// URL path segment for an event type: lowercase, whitespace to `-`,
/// other symbols dropped, repeated dashes collapsed.
pub fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    for ch in value.trim().chars().flat_map(char::to_lowercase) {
        let mapped = if ch.is_whitespace() || ch == '-' {
            '-'
        } else if ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_' {
            ch
        } else {
            continue;
        };
        if mapped == '-' && slug.ends_with('-') {
            continue;
        }
        slug.push(mapped);
    }
    slug.trim_matches('-').to_string()
}

/// Rebuild a JSON value with object keys in sorted order at every level
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut sorted = Map::new();
            for (k, v) in entries {
                sorted.insert(k.clone(), canonicalize(v));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

pub fn payload_hash(payload: &Value) -> String {
    sha256_hex(canonicalize(payload).to_string().as_bytes())
}

/// Prefix shared by every dispatcher cache entry
pub const DISPATCH_CACHE_NAMESPACE: &str = "event_";

/// `event_<sanitized event type>` without the payload hash
pub fn dispatch_cache_prefix(event_type: &str) -> String {
    format!("{}{}", DISPATCH_CACHE_NAMESPACE, sanitize_key(event_type))
}

/// `event_<sanitized event type>_<sha256 of canonical payload>`
pub fn dispatch_cache_key(event_type: &str, payload: &Value) -> String {
    format!("{}_{}", dispatch_cache_prefix(event_type), payload_hash(payload))
}
