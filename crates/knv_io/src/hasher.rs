//! SHA-256 hashing over canonical JSON bytes, plus the engine's stable
//! identifier derivations: the spec hash, record ids, and kanoniv ids.
//!
//! Deterministic: same canonical structure ⇒ same lowercase 64-hex across
//! OS/arch.

use serde::Serialize;
use sha2::{Digest, Sha256};

use knv_core::records::{RecordId, SourceRef};

use crate::canonical_json::to_canonical_bytes;
use crate::spec_loader::RawSpec;
use crate::IoResult;

/// Compute lowercase 64-hex SHA-256 of raw bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// SHA-256 of the canonical JSON representation; lowercase 64-hex.
pub fn sha256_canonical<T: Serialize>(value: &T) -> IoResult<String> {
    let bytes = to_canonical_bytes(value)?;
    Ok(sha256_hex(&bytes))
}

/// Stable content hash of a parsed spec.
///
/// Canonical serialization (sorted keys, compact, fixed numeric form) of
/// the parsed document, digested. Two specs with the same hash produce
/// identical results for identical inputs; any decision-bearing change
/// changes the hash.
pub fn spec_hash(raw: &RawSpec) -> IoResult<String> {
    sha256_canonical(raw)
}

/// Domain separators for derived identifiers.
const RECORD_ID_TAG: &[u8] = b"knv-record-v1";
const KANONIV_ID_TAG: &[u8] = b"kanoniv-v1";

/// Deterministic record id for a `(source_name, external_id)` pair.
///
/// First 16 digest bytes shaped into a v4-style UUID; the same source
/// record maps to the same id in every run, which incremental resolution
/// relies on.
pub fn record_id_for(source_name: &str, external_id: &str) -> RecordId {
    let mut hasher = Sha256::new();
    hasher.update(RECORD_ID_TAG);
    hasher.update([0x1f]);
    hasher.update(source_name.as_bytes());
    hasher.update([0x1f]);
    hasher.update(external_id.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    RecordId::from_hash_bytes(bytes)
}

/// Stable cluster identity: hash of the sorted member refs, truncated to
/// 32 hex chars. Identical membership ⇒ identical id across runs.
pub fn kanoniv_id_for(members: &[SourceRef]) -> String {
    let mut sorted: Vec<&SourceRef> = members.iter().collect();
    sorted.sort();

    let mut hasher = Sha256::new();
    hasher.update(KANONIV_ID_TAG);
    for member in sorted {
        hasher.update([0x1e]);
        hasher.update(member.source_name.as_bytes());
        hasher.update([0x1f]);
        hasher.update(member.external_id.as_bytes());
    }
    let mut id = hex::encode(hasher.finalize());
    id.truncate(32);
    id
}
