//! Record batches and ground-truth labels (JSON).
//!
//! A batch is a JSON array of records: `{id?, source_name, external_id,
//! entity_type, data, last_updated}`. Ids are optional on the way in —
//! absent ids are derived from `(source_name, external_id)` — and always
//! present on the way out. Ground truth accepts the map form
//! `{entity_id: [[source, external_id], ...]}` or the tabular form
//! `[{record_id, source_name, true_entity_id}]`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use knv_core::records::{NormalizedRecord, RecordId, SourceRef};

use crate::hasher::record_id_for;
use crate::{IoError, IoResult};

#[derive(Clone, Debug, Serialize, Deserialize)]
struct RawBatchRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    source_name: String,
    external_id: String,
    entity_type: String,
    #[serde(default)]
    data: BTreeMap<String, String>,
    last_updated: String,
}

/// Parse a record-batch JSON document.
pub fn read_record_batch(text: &str) -> IoResult<Vec<NormalizedRecord>> {
    let raw: Vec<RawBatchRecord> = serde_json::from_str(text)?;
    let mut records = Vec::with_capacity(raw.len());
    for (row, r) in raw.into_iter().enumerate() {
        let id = match &r.id {
            Some(s) => s
                .parse::<RecordId>()
                .map_err(|e| IoError::Batch { row, msg: e.to_string() })?,
            None => record_id_for(&r.source_name, &r.external_id),
        };
        let last_updated: DateTime<Utc> = r
            .last_updated
            .parse::<DateTime<Utc>>()
            .map_err(|_| IoError::Batch {
                row,
                msg: format!("bad last_updated timestamp '{}'", r.last_updated),
            })?;
        records.push(NormalizedRecord {
            id,
            source_name: r.source_name,
            external_id: r.external_id,
            entity_type: r.entity_type,
            data: r.data,
            last_updated,
        });
    }
    Ok(records)
}

/// Serialize records into the batch format (RFC3339 timestamps, ids always
/// present).
pub fn write_record_batch(records: &[NormalizedRecord]) -> IoResult<String> {
    let raw: Vec<RawBatchRecord> = records
        .iter()
        .map(|r| RawBatchRecord {
            id: Some(r.id.to_string()),
            source_name: r.source_name.clone(),
            external_id: r.external_id.clone(),
            entity_type: r.entity_type.clone(),
            data: r.data.clone(),
            last_updated: r.last_updated.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        })
        .collect();
    Ok(serde_json::to_string(&raw)?)
}

/// Parse ground-truth labels into entity clusters of source refs.
/// Members with fewer than two records are dropped.
pub fn parse_ground_truth(text: &str) -> IoResult<BTreeMap<String, Vec<SourceRef>>> {
    let value: Value = serde_json::from_str(text)?;
    let mut clusters: BTreeMap<String, Vec<SourceRef>> = BTreeMap::new();

    match value {
        // {entity_id: [[source, external_id], ...]}
        Value::Object(map) => {
            for (entity_id, members) in map {
                let members: Vec<(String, String)> =
                    serde_json::from_value(members).map_err(|e| IoError::Json(e.to_string()))?;
                clusters.insert(
                    entity_id,
                    members.into_iter().map(|(s, r)| SourceRef::new(s, r)).collect(),
                );
            }
        }
        // [{record_id, source_name, true_entity_id}]
        Value::Array(rows) => {
            #[derive(Deserialize)]
            struct Row {
                record_id: String,
                source_name: String,
                true_entity_id: String,
            }
            for (i, row) in rows.into_iter().enumerate() {
                let row: Row = serde_json::from_value(row)
                    .map_err(|e| IoError::Batch { row: i, msg: e.to_string() })?;
                clusters
                    .entry(row.true_entity_id)
                    .or_default()
                    .push(SourceRef::new(row.source_name, row.record_id));
            }
        }
        _ => {
            return Err(IoError::Invalid(
                "ground truth must be an object of entities or an array of rows".into(),
            ))
        }
    }

    for members in clusters.values_mut() {
        members.sort();
        members.dedup();
    }
    clusters.retain(|_, members| members.len() >= 2);
    Ok(clusters)
}
