//! # Failure Fingerprinting
//!
//! Produces a stable identity hash for a failure so that repeated
//! occurrences of the same underlying problem collapse to one record even
//! when their messages differ in literal details (timestamps, ids,
//! durations, counters).

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::ErrorCategory;

/// Context keys that participate in fingerprint identity. Everything else
/// in the context map is treated as occurrence detail, not identity.
pub const IDENTITY_CONTEXT_KEYS: [&str; 3] = ["operation", "type", "service"];

// Variable-substring patterns replaced before hashing. Order matters:
// timestamps and UUIDs contain digit runs, and duration literals must win
// over bare integers, so the bare-integer pass runs last.
static NORMALIZERS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    vec![
        (
            // ISO-8601 timestamps, with optional fraction and zone
            Regex::new(
                r"\d{4}-\d{2}-\d{2}[t ]\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:z|[+-]\d{2}:?\d{2})?",
            )
            .unwrap(),
            "<timestamp>",
        ),
        (
            // UUID-shaped tokens
            Regex::new(r"\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b")
                .unwrap(),
            "<uuid>",
        ),
        (
            // Duration literals: 250ms, 30s, 5 minutes, 2h ...
            Regex::new(
                r"\b\d+\s*(?:milliseconds?|ms|seconds?|secs?|s|minutes?|mins?|m|hours?|h)\b",
            )
            .unwrap(),
            "<duration>",
        ),
        (
            // Bare numeric runs
            Regex::new(r"\b\d+\b").unwrap(),
            "<num>",
        ),
    ]
});

/// Fixed-width failure identity: 64 bits of SHA-256, hex encoded.
///
/// Collisions between distinct failures are an accepted, documented risk
/// at this width; there is no detection or rehash mechanism.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Fingerprint {
    fn from(hex: String) -> Self {
        Fingerprint(hex)
    }
}

/// Lowercases, trims, and replaces variable substrings with fixed
/// placeholders so structurally identical messages compare equal.
pub fn normalize_message(message: &str) -> String {
    let mut normalized = message.trim().to_lowercase();
    for (pattern, placeholder) in NORMALIZERS.iter() {
        normalized = pattern.replace_all(&normalized, *placeholder).into_owned();
    }
    normalized
}

/// Computes the stable fingerprint for a classified failure.
///
/// Pure and deterministic: two calls with identical inputs return
/// identical output. The composite key is `(category, normalized message,
/// endpoint, selected context keys)`, joined with an unambiguous
/// separator before hashing.
pub fn fingerprint(
    category: ErrorCategory,
    message: &str,
    endpoint: Option<&str>,
    context: Option<&serde_json::Map<String, serde_json::Value>>,
) -> Fingerprint {
    let mut hasher = Sha256::new();

    hasher.update(category.as_str().as_bytes());
    hasher.update([0x1f]);
    hasher.update(normalize_message(message).as_bytes());
    hasher.update([0x1f]);
    hasher.update(endpoint.unwrap_or("-").as_bytes());

    if let Some(context) = context {
        for key in IDENTITY_CONTEXT_KEYS {
            if let Some(value) = context.get(key) {
                hasher.update([0x1f]);
                hasher.update(key.as_bytes());
                hasher.update(b"=");
                hasher.update(context_value(value).as_bytes());
            }
        }
    }

    let digest = hasher.finalize();
    Fingerprint(hex::encode(&digest[..8]))
}

// Strings hash without their JSON quoting so "fetch" and a raw fetch
// compare equal; everything else uses its compact JSON form.
fn context_value(value: &serde_json::Value) -> String {
    match value.as_str() {
        Some(s) => s.to_string(),
        None => value.to_string(),
    }
}
