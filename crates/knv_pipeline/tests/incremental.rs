//! Incremental resolution: growth, equivalence with full runs, spec-drift
//! handling, and the changelog over a grown entity.

use std::collections::BTreeMap;

use chrono::{TimeZone, Utc};

use knv_core::records::NormalizedRecord;
use knv_io::hasher::{record_id_for, spec_hash};
use knv_io::persist::{result_from_bytes, result_to_bytes};
use knv_io::spec_loader::{compile_spec, parse_spec};
use knv_pipeline::{reconcile_incremental, reconcile_records, ReconcileOptions};

const SPEC: &str = r#"
entity: person
identity_version: "1.0.0"
sources:
  - name: crm
    attributes:
      email: email
      last_name: last_name
  - name: billing
    attributes:
      email: email
      last_name: last_name
  - name: partners
    attributes:
      email: email
      last_name: last_name
blocking:
  - fields: [email]
    transform: email
rules:
  - field: email
    comparator: email
    weight: 0.9
  - field: last_name
    comparator: jaro_winkler
    weight: 0.4
decision:
  match: 0.85
  review: 0.6
  reject: 0.3
scoring:
  method: weighted_sum
survivorship:
  source_priority: [crm, billing, partners]
  default: source_priority
"#;

fn record(source: &str, ext: &str, day: u32, fields: &[(&str, &str)]) -> NormalizedRecord {
    let data: BTreeMap<String, String> =
        fields.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    NormalizedRecord {
        id: record_id_for(source, ext),
        source_name: source.to_string(),
        external_id: ext.to_string(),
        entity_type: "person".to_string(),
        data,
        last_updated: Utc.with_ymd_and_hms(2024, 3, day, 0, 0, 0).unwrap(),
    }
}

fn setup() -> (knv_core::spec::SpecPlan, String) {
    let raw = parse_spec(SPEC).unwrap();
    let plan = compile_spec(&raw).unwrap();
    let hash = spec_hash(&raw).unwrap();
    (plan, hash)
}

fn base_batch() -> Vec<NormalizedRecord> {
    vec![
        record("crm", "1", 1, &[("email", "grow@x.com"), ("last_name", "Ng")]),
        record("billing", "2", 2, &[("email", "grow@x.com"), ("last_name", "Ng")]),
        record("crm", "3", 1, &[("email", "alone@y.com"), ("last_name", "Solo")]),
    ]
}

// S5: a new record joins an existing cluster; the entity reports grown
// with exactly one new member.
#[test]
fn incremental_grow_extends_prior_cluster() {
    let (plan, hash) = setup();
    let prior =
        reconcile_records(&plan, &hash, base_batch(), ReconcileOptions::default()).unwrap();
    assert_eq!(prior.cluster_count(), 2);

    let newcomer = record("partners", "4", 3, &[("email", "grow@x.com")]);
    let newcomer_id = newcomer.id;
    let grown = reconcile_incremental(
        &plan,
        &hash,
        &prior,
        vec![newcomer],
        ReconcileOptions::default(),
    )
    .unwrap();

    assert_eq!(grown.cluster_count(), 2);
    let cluster = grown.cluster_of(newcomer_id).expect("newcomer clustered");
    assert_eq!(grown.clusters[cluster].len(), 3);

    let log = knv_report::compute_changes(&prior, &grown);
    assert_eq!(log.grown().len(), 1);
    assert_eq!(log.grown()[0].new_records.len(), 1);
    assert_eq!(log.unchanged_count, 1);
    assert!(log.summary().contains("1 grown"));
}

// Invariant: full(R0 ∪ R1) == full(R0) then incremental(R1), for clusters
// and golden records (weighted scoring, no retraining involved).
#[test]
fn incremental_equivalence_with_full_run() {
    let (plan, hash) = setup();
    let batch1 = vec![
        record("partners", "4", 3, &[("email", "grow@x.com"), ("last_name", "Ng")]),
        record("billing", "5", 4, &[("email", "alone@y.com"), ("last_name", "Solo")]),
    ];

    let all: Vec<NormalizedRecord> =
        base_batch().into_iter().chain(batch1.clone()).collect();
    let full = reconcile_records(&plan, &hash, all, ReconcileOptions::default()).unwrap();

    let prior =
        reconcile_records(&plan, &hash, base_batch(), ReconcileOptions::default()).unwrap();
    let incremental =
        reconcile_incremental(&plan, &hash, &prior, batch1, ReconcileOptions::default())
            .unwrap();

    assert_eq!(full.clusters, incremental.clusters);
    assert_eq!(full.golden_records, incremental.golden_records);
    assert_eq!(full.entity_map, incremental.entity_map);
}

// Unchanged clusters keep their kanoniv ids and golden records verbatim.
#[test]
fn unchanged_clusters_reuse_prior_goldens() {
    let (plan, hash) = setup();
    let prior =
        reconcile_records(&plan, &hash, base_batch(), ReconcileOptions::default()).unwrap();
    let newcomer = record("partners", "9", 3, &[("email", "unrelated@z.com")]);
    let next = reconcile_incremental(
        &plan,
        &hash,
        &prior,
        vec![newcomer],
        ReconcileOptions::default(),
    )
    .unwrap();

    for golden in &prior.golden_records {
        assert!(
            next.golden_records.iter().any(|g| g == golden),
            "prior golden {} must survive untouched",
            golden.kanoniv_id
        );
    }
}

// Spec drift warns loudly but does not abort.
#[test]
fn spec_hash_mismatch_is_flagged_not_fatal() {
    let (plan, hash) = setup();
    let prior =
        reconcile_records(&plan, &hash, base_batch(), ReconcileOptions::default()).unwrap();

    let drifted = parse_spec(&SPEC.replace("match: 0.85", "match: 0.9")).unwrap();
    let drifted_plan = compile_spec(&drifted).unwrap();
    let drifted_hash = spec_hash(&drifted).unwrap();

    let result = reconcile_incremental(
        &drifted_plan,
        &drifted_hash,
        &prior,
        vec![record("partners", "4", 3, &[("email", "grow@x.com")])],
        ReconcileOptions::default(),
    )
    .unwrap();

    assert!(result
        .telemetry
        .health_flags
        .iter()
        .any(|f| f == "spec_hash_mismatch"));
}

// A .knv round-trip in the middle of the chain changes nothing.
#[test]
fn incremental_works_across_persistence() {
    let (plan, hash) = setup();
    let prior =
        reconcile_records(&plan, &hash, base_batch(), ReconcileOptions::default()).unwrap();
    let reloaded = result_from_bytes(&result_to_bytes(&prior).unwrap()).unwrap();

    let batch = vec![record("partners", "4", 3, &[("email", "grow@x.com")])];
    let from_live = reconcile_incremental(
        &plan,
        &hash,
        &prior,
        batch.clone(),
        ReconcileOptions::default(),
    )
    .unwrap();
    let from_disk =
        reconcile_incremental(&plan, &hash, &reloaded, batch, ReconcileOptions::default())
            .unwrap();

    assert_eq!(from_live, from_disk);
}

// Re-submitting known records is a no-op with a health note.
#[test]
fn known_records_are_skipped() {
    let (plan, hash) = setup();
    let prior =
        reconcile_records(&plan, &hash, base_batch(), ReconcileOptions::default()).unwrap();
    let result = reconcile_incremental(
        &plan,
        &hash,
        &prior,
        base_batch(),
        ReconcileOptions::default(),
    )
    .unwrap();

    assert_eq!(result.clusters, prior.clusters);
    assert!(result
        .telemetry
        .health_flags
        .iter()
        .any(|f| f.starts_with("records_already_known")));
}
