//! Content fingerprints ("duphash") used for change detection.
//!
//! A fingerprint is the SHA-256 of the JSON encoding of every field value
//! of a row, visited in lexicographic field-name order, hex encoded and
//! truncated to a fixed width. The store id and the fingerprint column
//! itself never take part. JSON encoding keeps `null`, `""`, `true` and
//! `"true"` apart.

use std::fmt;

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::ids::{Row, FINGERPRINT_FIELD, ID_FIELD};

pub const MIN_WIDTH: usize = 8;
pub const MAX_WIDTH: usize = 64;
pub const DEFAULT_WIDTH: usize = 16;

const SEPARATOR: &[u8] = b"\x1f";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(Box<str>);

impl Fingerprint {
    /// Fingerprint of an outgoing row.
    pub fn of_row(row: &Row, width: usize) -> Self {
        let width = width.clamp(MIN_WIDTH, MAX_WIDTH);
        let mut fields: Vec<(&String, &Value)> = row
            .iter()
            .filter(|(k, _)| k.as_str() != ID_FIELD && k.as_str() != FINGERPRINT_FIELD)
            .collect();
        fields.sort_unstable_by(|a, b| a.0.cmp(b.0));

        let mut hasher = Sha256::new();
        for (_, value) in fields {
            hasher.update(value.to_string().as_bytes());
            hasher.update(SEPARATOR);
        }
        let hex = format!("{:x}", hasher.finalize());
        Self(hex[..width].into())
    }

    /// Fingerprint previously written to the store.
    pub fn from_stored(value: &str) -> Self {
        Self(value.into())
    }

    pub fn of_stored_row(row: &Row) -> Option<Self> {
        row.get(FINGERPRINT_FIELD)
            .and_then(Value::as_str)
            .map(Self::from_stored)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
