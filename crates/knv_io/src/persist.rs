//! `.knv` result persistence.
//!
//! Version-1 JSON document carrying everything an incremental run needs:
//! clusters, golden records, decisions, telemetry, entity map, the record
//! set, trained FS parameters, the spec hash, and feedback. Round-trip is
//! lossless.

use std::path::Path;

use serde::{Deserialize, Serialize};

use knv_core::result::ReconcileResult;

use crate::canonical_json::{to_canonical_bytes, write_bytes_atomically};
use crate::{IoError, IoResult};

const KNV_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct KnvDocument {
    version: u32,
    #[serde(flatten)]
    result: ReconcileResult,
}

/// Serialize a result to canonical `.knv` bytes.
pub fn result_to_bytes(result: &ReconcileResult) -> IoResult<Vec<u8>> {
    to_canonical_bytes(&KnvDocument { version: KNV_VERSION, result: result.clone() })
}

/// Parse `.knv` bytes; rejects unknown versions.
pub fn result_from_bytes(bytes: &[u8]) -> IoResult<ReconcileResult> {
    let doc: KnvDocument =
        serde_json::from_slice(bytes).map_err(|e| IoError::Persist(e.to_string()))?;
    if doc.version != KNV_VERSION {
        return Err(IoError::Persist(format!(
            "unsupported .knv version {} (expected {KNV_VERSION})",
            doc.version
        )));
    }
    Ok(doc.result)
}

/// Persist a result to a `.knv` file (atomic write).
pub fn save_result(path: &Path, result: &ReconcileResult) -> IoResult<()> {
    let bytes = result_to_bytes(result)?;
    write_bytes_atomically(path, &bytes).map_err(|e| IoError::Path(e.to_string()))
}

/// Load a previously saved result.
pub fn load_result(path: &Path) -> IoResult<ReconcileResult> {
    let bytes = std::fs::read(path)?;
    result_from_bytes(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use knv_core::records::{NormalizedRecord, SourceRef};
    use knv_core::result::{GoldenRecord, Telemetry};
    use std::collections::BTreeMap;

    fn sample_result() -> ReconcileResult {
        let record = NormalizedRecord {
            id: crate::hasher::record_id_for("crm", "1"),
            source_name: "crm".into(),
            external_id: "1".into(),
            entity_type: "person".into(),
            data: BTreeMap::from([("email".to_string(), "a@x.com".to_string())]),
            last_updated: "2024-03-01T10:00:00Z".parse().unwrap(),
        };
        let mut entity_map = BTreeMap::new();
        entity_map.insert(record.id, SourceRef::new("crm", "1"));
        ReconcileResult {
            clusters: vec![vec![record.id]],
            golden_records: vec![GoldenRecord {
                kanoniv_id: "abc123".into(),
                fields: BTreeMap::from([("email".to_string(), "a@x.com".to_string())]),
                provenance: BTreeMap::from([(
                    "email".to_string(),
                    SourceRef::new("crm", "1"),
                )]),
            }],
            decisions: vec![],
            telemetry: Telemetry {
                scoring_method: "weighted_sum".into(),
                merge_threshold: 0.85,
                ..Default::default()
            },
            entity_map,
            records: vec![record],
            trained_fs_params: None,
            spec_hash: "deadbeef".into(),
            feedback: vec![],
        }
    }

    #[test]
    fn knv_round_trip_is_lossless() {
        let result = sample_result();
        let bytes = result_to_bytes(&result).unwrap();
        let loaded = result_from_bytes(&bytes).unwrap();
        assert_eq!(result, loaded);
    }

    #[test]
    fn document_carries_the_version_field() {
        let bytes = result_to_bytes(&sample_result()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["version"], 1);
        assert!(value["clusters"].is_array());
        assert!(value["spec_hash"].is_string());
    }

    #[test]
    fn unknown_version_is_rejected() {
        let bytes = result_to_bytes(&sample_result()).unwrap();
        let text = String::from_utf8(bytes).unwrap().replace("\"version\":1", "\"version\":9");
        let err = result_from_bytes(text.as_bytes()).unwrap_err();
        assert!(matches!(err, IoError::Persist(_)));
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.knv");
        let result = sample_result();
        save_result(&path, &result).unwrap();
        assert_eq!(load_result(&path).unwrap(), result);
    }
}
