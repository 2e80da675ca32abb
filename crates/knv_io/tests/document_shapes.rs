//! Wire-shape tests: the `.knv` document and plan JSON keep the field
//! names downstream tooling joins against.

use assert_json_diff::assert_json_include;
use serde_json::json;

use knv_core::records::NormalizedRecord;
use knv_core::result::{ReconcileResult, Telemetry};
use knv_io::hasher::record_id_for;
use knv_io::persist::result_to_bytes;
use knv_io::plan::build_plan;
use knv_io::spec_loader::{compile_spec, parse_spec};

const SPEC: &str = r#"
entity: person
identity_version: "2.1.0"
sources:
  - name: crm
    attributes:
      email: email
blocking:
  - fields: [email]
    transform: email
rules:
  - field: email
    comparator: email
    weight: 0.9
decision:
  match: 0.85
  review: 0.6
  reject: 0.3
scoring:
  method: weighted_sum
survivorship:
  source_priority: [crm]
  default: source_priority
"#;

#[test]
fn knv_document_keeps_its_public_field_names() {
    let record = NormalizedRecord {
        id: record_id_for("crm", "1"),
        source_name: "crm".into(),
        external_id: "1".into(),
        entity_type: "person".into(),
        data: Default::default(),
        last_updated: "2024-03-01T10:00:00Z".parse().unwrap(),
    };
    let result = ReconcileResult {
        clusters: vec![vec![record.id]],
        golden_records: vec![],
        decisions: vec![],
        telemetry: Telemetry::default(),
        entity_map: [(record.id, record.source_ref())].into_iter().collect(),
        records: vec![record],
        trained_fs_params: None,
        spec_hash: "cafe".into(),
        feedback: vec![],
    };

    let value: serde_json::Value =
        serde_json::from_slice(&result_to_bytes(&result).unwrap()).unwrap();
    assert_json_include!(
        actual: value,
        expected: json!({
            "version": 1,
            "spec_hash": "cafe",
            "telemetry": { "pairs_evaluated": 0 },
        })
    );
}

#[test]
fn plan_json_carries_the_documented_sections() {
    let raw = parse_spec(SPEC).unwrap();
    let plan = compile_spec(&raw).unwrap();
    let result = build_plan(&raw, &plan).unwrap();
    let value = serde_json::to_value(&result).unwrap();
    assert_json_include!(
        actual: value,
        expected: json!({
            "entity": "person",
            "blocking_analysis": { "key_count": 1 },
        })
    );
    assert!(value["plan_hash"].as_str().unwrap().len() == 64);
    assert!(value["execution_stages"].is_array());
    assert!(value["match_strategies"].is_array());
}
