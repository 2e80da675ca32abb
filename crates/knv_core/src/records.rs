//! Record model: ids, source references, normalized records, candidate pairs.
//!
//! Records are created at ingest and immutable for the run. `RecordId` is an
//! opaque UUID; the ingester derives it from `(source_name, external_id)` so
//! that re-running the same inputs reproduces the same ids byte-for-byte.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use uuid::Uuid;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::errors::CoreError;

/// Opaque record identifier; primary key within a run.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct RecordId(Uuid);

impl RecordId {
    /// Wrap 16 raw bytes as a RFC-4122 v4-shaped id (variant/version bits set).
    pub fn from_hash_bytes(bytes: [u8; 16]) -> Self {
        RecordId(uuid::Builder::from_random_bytes(bytes).into_uuid())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for RecordId {
    type Err = CoreError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(RecordId).map_err(|_| CoreError::InvalidId)
    }
}

/// `(source_name, external_id)` — the stable identity of a record in its
/// source, unique within a run.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SourceRef {
    pub source_name: String,
    pub external_id: String,
}

impl SourceRef {
    pub fn new(source_name: impl Into<String>, external_id: impl Into<String>) -> Self {
        SourceRef { source_name: source_name.into(), external_id: external_id.into() }
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.source_name, self.external_id)
    }
}

/// True iff a stored attribute value counts as missing.
///
/// Empty strings and whitespace-only strings are the single missing
/// sentinel; adapters stringify nulls to "".
pub fn is_missing(value: &str) -> bool {
    value.trim().is_empty()
}

/// The unit the engine processes. All values in `data` are stringified;
/// comparators reinterpret per the spec's attribute type.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NormalizedRecord {
    pub id: RecordId,
    pub source_name: String,
    pub external_id: String,
    pub entity_type: String,
    pub data: BTreeMap<String, String>,
    pub last_updated: DateTime<Utc>,
}

impl NormalizedRecord {
    /// Non-missing value of a canonical attribute, if any.
    pub fn value(&self, field: &str) -> Option<&str> {
        match self.data.get(field) {
            Some(v) if !is_missing(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn source_ref(&self) -> SourceRef {
        SourceRef::new(self.source_name.clone(), self.external_id.clone())
    }
}

/// Unordered record pair, canonicalized so `a < b`.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CandidatePair {
    pub a: RecordId,
    pub b: RecordId,
}

impl CandidatePair {
    /// Build the canonical pair. Returns `None` for a self-pair.
    pub fn new(x: RecordId, y: RecordId) -> Option<Self> {
        match x.cmp(&y) {
            std::cmp::Ordering::Less => Some(CandidatePair { a: x, b: y }),
            std::cmp::Ordering::Greater => Some(CandidatePair { a: y, b: x }),
            std::cmp::Ordering::Equal => None,
        }
    }
}
