//! Fellegi-Sunter scoring end-to-end: EM training, log2 decisions,
//! parameter reuse on incremental runs.

use std::collections::BTreeMap;

use chrono::{TimeZone, Utc};

use knv_core::records::NormalizedRecord;
use knv_core::result::Decision;
use knv_io::hasher::{record_id_for, spec_hash};
use knv_io::spec_loader::{compile_spec, parse_spec};
use knv_pipeline::{reconcile_incremental, reconcile_records, ReconcileOptions};

const SPEC: &str = r#"
entity: person
identity_version: "1.0.0"
sources:
  - name: crm
    attributes:
      email: email
      first_name: first_name
      last_name: last_name
  - name: billing
    attributes:
      email: email
      first_name: first_name
      last_name: last_name
blocking:
  - fields: [email]
    transform: email
rules:
  - field: email
    comparator: email
    weight: 1.0
  - field: first_name
    comparator: name
    weight: 1.0
  - field: last_name
    comparator: jaro_winkler
    weight: 1.0
decision:
  match: 3.0
  review: 0.5
  reject: -5.0
scoring:
  method: fellegi_sunter
  em:
    max_sample_pairs: 50000
    max_iterations: 50
    tolerance: 0.0001
    initial_lambda: 0.05
    seed_block:
      key: 0
      recall: 0.8
survivorship:
  source_priority: [crm, billing]
  default: source_priority
"#;

fn record(source: &str, ext: &str, fields: &[(&str, &str)]) -> NormalizedRecord {
    let data: BTreeMap<String, String> =
        fields.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    NormalizedRecord {
        id: record_id_for(source, ext),
        source_name: source.to_string(),
        external_id: ext.to_string(),
        entity_type: "person".to_string(),
        data,
        last_updated: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
    }
}

fn dataset() -> Vec<NormalizedRecord> {
    vec![
        // Two true duplicate pairs across systems.
        record("crm", "1", &[("email", "ann@x.com"), ("first_name", "Ann"), ("last_name", "Lee")]),
        record("billing", "2", &[("email", "ann@x.com"), ("first_name", "Ann"), ("last_name", "Lee")]),
        record("crm", "3", &[("email", "bo@y.com"), ("first_name", "Bo"), ("last_name", "Rask")]),
        record("billing", "4", &[("email", "bo@y.com"), ("first_name", "Bo"), ("last_name", "Rask")]),
        // Distinct singles.
        record("crm", "5", &[("email", "cy@z.com"), ("first_name", "Cy"), ("last_name", "Voss")]),
        record("billing", "6", &[("email", "dee@w.com"), ("first_name", "Dee"), ("last_name", "Hart")]),
    ]
}

fn setup() -> (knv_core::spec::SpecPlan, String) {
    let raw = parse_spec(SPEC).unwrap();
    let plan = compile_spec(&raw).unwrap();
    let hash = spec_hash(&raw).unwrap();
    (plan, hash)
}

#[test]
fn trained_model_separates_duplicates_from_singles() {
    let (plan, hash) = setup();
    let result =
        reconcile_records(&plan, &hash, dataset(), ReconcileOptions::default()).unwrap();

    assert_eq!(result.telemetry.scoring_method, "fellegi_sunter");
    assert_eq!(result.cluster_count(), 4, "two pairs plus two singletons");

    let params = result.trained_fs_params.as_ref().expect("params trained");
    assert_eq!(params.rules.len(), 3);
    assert!(params.lambda > 0.0 && params.lambda < 0.5);
    for rule in &params.rules {
        let m_sum: f64 = rule.m.iter().sum();
        assert!((m_sum - 1.0).abs() < 1e-6, "m distribution sums to 1");
        assert!(rule.m[0] > rule.m[3], "matches agree more than they disagree");
    }

    // Both blocked pairs are exact agreements on all three rules.
    for decision in &result.decisions {
        assert_eq!(decision.decision, Decision::Match);
        assert!(decision.total >= 3.0, "log2 total was {}", decision.total);
    }
}

#[test]
fn training_is_deterministic_for_a_fixed_spec() {
    let (plan, hash) = setup();
    let a = reconcile_records(&plan, &hash, dataset(), ReconcileOptions::default()).unwrap();
    let b = reconcile_records(&plan, &hash, dataset(), ReconcileOptions::default()).unwrap();
    assert_eq!(a.trained_fs_params, b.trained_fs_params);
    assert_eq!(a, b);
}

#[test]
fn missing_fields_contribute_zero_under_fs() {
    let (plan, hash) = setup();
    let mut records = dataset();
    // Same email, no names on either side: only the email rule can fire.
    records.push(record("crm", "7", &[("email", "ghost@q.com")]));
    records.push(record("billing", "8", &[("email", "ghost@q.com")]));

    let result = reconcile_records(&plan, &hash, records, ReconcileOptions::default()).unwrap();
    let ghost_pair = result
        .decisions
        .iter()
        .find(|d| {
            d.per_field.iter().filter(|f| f.skipped).count() == 2
        })
        .expect("ghost pair scored");
    for field in &ghost_pair.per_field {
        if field.skipped {
            assert_eq!(field.score, 0.0);
        }
    }
}

#[test]
fn incremental_reuses_stored_parameters() {
    let (plan, hash) = setup();
    let prior =
        reconcile_records(&plan, &hash, dataset(), ReconcileOptions::default()).unwrap();
    let stored = prior.trained_fs_params.clone().expect("params stored");

    let newcomer =
        record("crm", "9", &[("email", "ann@x.com"), ("first_name", "Annie"), ("last_name", "Lee")]);
    let result = reconcile_incremental(
        &plan,
        &hash,
        &prior,
        vec![newcomer],
        ReconcileOptions::default(),
    )
    .unwrap();

    assert_eq!(
        result.trained_fs_params.as_ref(),
        Some(&stored),
        "no retraining unless requested"
    );
    assert!(!result.telemetry.health_flags.iter().any(|f| f == "fs_retrained"));

    let retrained = reconcile_incremental(
        &plan,
        &hash,
        &prior,
        vec![record("crm", "10", &[("email", "ann@x.com")])],
        ReconcileOptions { retrain: true, ..Default::default() },
    )
    .unwrap();
    assert!(retrained.telemetry.health_flags.iter().any(|f| f == "fs_retrained"));
}
