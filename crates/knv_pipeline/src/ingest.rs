//! Ingest / normalize: map source rows to canonical records.
//!
//! Column matching is case-insensitive (warehouses love UPPERCASE).
//! Unmapped columns are dropped; empty values stay as the missing
//! sentinel. Per-row failures are dropped with a warning and counted —
//! only a source whose every row fails is fatal.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, TimeZone, Utc};
use tracing::warn;

use knv_core::records::NormalizedRecord;
use knv_core::spec::{SourceSpec, SpecPlan};
use knv_io::hasher::record_id_for;
use knv_io::source::RowSource;

use crate::EngineError;

/// Timestamp used when a source carries no last_updated column. A fixed
/// epoch keeps runs reproducible; real recency comes from the data.
fn epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(0, 0).single().expect("epoch is valid")
}

/// Ingest all sources against the plan. Returns records plus accumulated
/// non-fatal warnings (surfaced as telemetry health flags).
pub fn ingest_sources(
    plan: &SpecPlan,
    sources: &[RowSource],
) -> Result<(Vec<NormalizedRecord>, Vec<String>), EngineError> {
    let mut records = Vec::new();
    let mut warnings = Vec::new();
    let mut seen_refs: BTreeSet<(String, String)> = BTreeSet::new();

    let spec_by_name: BTreeMap<&str, &SourceSpec> =
        plan.sources.iter().map(|s| (s.name.as_str(), s)).collect();

    for source in sources {
        let Some(source_spec) = spec_by_name.get(source.name.as_str()) else {
            return Err(EngineError::Ingest(format!(
                "source '{}' is not declared in the spec (declared: {})",
                source.name,
                plan.source_names().join(", ")
            )));
        };
        ingest_one(
            plan,
            source,
            source_spec,
            &mut records,
            &mut warnings,
            &mut seen_refs,
        )?;
    }

    for declared in plan.source_names() {
        if !sources.iter().any(|s| s.name == declared) {
            warnings.push(format!("spec declares source '{declared}' but none was provided"));
        }
    }

    records.sort_by_key(|r| r.id);
    Ok((records, warnings))
}

fn ingest_one(
    plan: &SpecPlan,
    source: &RowSource,
    source_spec: &SourceSpec,
    records: &mut Vec<NormalizedRecord>,
    warnings: &mut Vec<String>,
    seen_refs: &mut BTreeSet<(String, String)>,
) -> Result<(), EngineError> {
    // Case-insensitive view of the actual columns.
    let columns = source.columns();
    let lower_columns: BTreeMap<String, &str> =
        columns.iter().map(|c| (c.to_lowercase(), *c)).collect();

    // Every declared column must resolve, exactly or case-insensitively.
    let missing: Vec<String> = source_spec
        .attributes
        .values()
        .filter(|col| {
            !columns.contains(col.as_str()) && !lower_columns.contains_key(&col.to_lowercase())
        })
        .cloned()
        .collect();
    if !missing.is_empty() && source.row_count() > 0 {
        return Err(EngineError::SourceSchemaMismatch {
            source_name: source.name.clone(),
            missing,
        });
    }

    // column (as found in the source) -> canonical attribute
    let column_to_canonical: BTreeMap<&str, &str> = source_spec
        .attributes
        .iter()
        .filter_map(|(canonical, col)| {
            let actual = if columns.contains(col.as_str()) {
                col.as_str()
            } else {
                lower_columns.get(&col.to_lowercase()).copied()?
            };
            Some((actual, canonical.as_str()))
        })
        .collect();

    let mut dropped = 0usize;
    let pk_lower = source.primary_key.to_lowercase();

    for (index, row) in source.rows().iter().enumerate() {
        let external_id = row
            .iter()
            .find(|(col, _)| col.to_lowercase() == pk_lower)
            .map(|(_, v)| v.trim().to_string())
            .unwrap_or_default();
        if external_id.is_empty() {
            warn!(source = %source.name, row = index, "row has no primary-key value; dropped");
            dropped += 1;
            continue;
        }

        let source_ref = (source.name.clone(), external_id.clone());
        if !seen_refs.insert(source_ref) {
            warn!(source = %source.name, row = index, external_id = %external_id,
                  "duplicate (source, external_id); row dropped");
            dropped += 1;
            continue;
        }

        let mut data: BTreeMap<String, String> = BTreeMap::new();
        for (column, value) in row {
            if let Some(canonical) = column_to_canonical.get(column.as_str()) {
                data.insert((*canonical).to_string(), value.trim().to_string());
            }
        }

        let last_updated = match data.get("last_updated") {
            Some(raw) if !raw.is_empty() => match raw.parse::<DateTime<Utc>>() {
                Ok(ts) => ts,
                Err(_) => {
                    warn!(source = %source.name, row = index,
                          "unparseable last_updated '{raw}'; using epoch");
                    epoch()
                }
            },
            _ => epoch(),
        };

        records.push(NormalizedRecord {
            id: record_id_for(&source.name, &external_id),
            source_name: source.name.clone(),
            external_id,
            entity_type: plan.entity_type.clone(),
            data,
            last_updated,
        });
    }

    if dropped > 0 {
        if dropped == source.row_count() {
            return Err(EngineError::Ingest(format!(
                "source '{}': every row failed ingest",
                source.name
            )));
        }
        warnings.push(format!("source '{}': {dropped} row(s) dropped during ingest", source.name));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use knv_core::spec::{
        DecisionThresholds, ScoringConfig, SpecPlan, SurvivorshipConfig,
    };
    use std::collections::BTreeMap;

    fn plan() -> SpecPlan {
        SpecPlan {
            entity_type: "person".into(),
            identity_version: "1.0.0".into(),
            sources: vec![SourceSpec {
                name: "crm".into(),
                attributes: BTreeMap::from([
                    ("email".to_string(), "EMAIL_ADDR".to_string()),
                    ("first_name".to_string(), "first".to_string()),
                ]),
            }],
            blocking: vec![],
            rules: vec![],
            decision: DecisionThresholds {
                match_threshold: 0.85,
                review_threshold: 0.6,
                reject_threshold: 0.3,
            },
            scoring: ScoringConfig::WeightedSum,
            survivorship: SurvivorshipConfig::default(),
            skew_limit: 1000,
        }
    }

    fn row(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn columns_match_case_insensitively_and_remap() {
        // Warehouse-style UPPERCASE columns against a lowercase spec.
        let source = RowSource::from_rows(
            "crm",
            "ID",
            vec![row(&[("ID", "1"), ("email_addr", "a@x.com"), ("FIRST", "Ann"), ("junk", "z")])],
        );
        let (records, warnings) = ingest_sources(&plan(), &[source]).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].data.get("email").map(String::as_str), Some("a@x.com"));
        assert_eq!(records[0].data.get("first_name").map(String::as_str), Some("Ann"));
        assert!(!records[0].data.contains_key("junk"), "unmapped columns are dropped");
        assert_eq!(records[0].external_id, "1");
    }

    #[test]
    fn missing_declared_column_is_a_schema_mismatch() {
        let source = RowSource::from_rows("crm", "ID", vec![row(&[("ID", "1"), ("FIRST", "A")])]);
        let err = ingest_sources(&plan(), &[source]).unwrap_err();
        match err {
            EngineError::SourceSchemaMismatch { source_name, missing } => {
                assert_eq!(source_name, "crm");
                assert_eq!(missing, vec!["EMAIL_ADDR".to_string()]);
            }
            other => panic!("expected SourceSchemaMismatch, got {other:?}"),
        }
    }

    #[test]
    fn undeclared_source_is_fatal() {
        let source = RowSource::from_rows("mystery", "ID", vec![row(&[("ID", "1")])]);
        assert!(matches!(
            ingest_sources(&plan(), &[source]),
            Err(EngineError::Ingest(_))
        ));
    }

    #[test]
    fn bad_rows_drop_with_warning_not_failure() {
        let source = RowSource::from_rows(
            "crm",
            "ID",
            vec![
                row(&[("ID", "1"), ("EMAIL_ADDR", "a@x.com"), ("first", "A")]),
                row(&[("ID", ""), ("EMAIL_ADDR", "b@x.com"), ("first", "B")]),
                row(&[("ID", "1"), ("EMAIL_ADDR", "dup@x.com"), ("first", "C")]),
            ],
        );
        let (records, warnings) = ingest_sources(&plan(), &[source]).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("2 row(s) dropped"));
    }

    #[test]
    fn all_rows_failing_is_fatal() {
        let source = RowSource::from_rows(
            "crm",
            "ID",
            vec![row(&[("ID", ""), ("EMAIL_ADDR", "x"), ("first", "A")])],
        );
        assert!(matches!(
            ingest_sources(&plan(), &[source]),
            Err(EngineError::Ingest(_))
        ));
    }

    #[test]
    fn record_ids_are_deterministic_across_ingests() {
        let mk = || {
            RowSource::from_rows(
                "crm",
                "ID",
                vec![row(&[("ID", "1"), ("EMAIL_ADDR", "a@x.com"), ("first", "A")])],
            )
        };
        let (a, _) = ingest_sources(&plan(), &[mk()]).unwrap();
        let (b, _) = ingest_sources(&plan(), &[mk()]).unwrap();
        assert_eq!(a[0].id, b[0].id);
    }
}
