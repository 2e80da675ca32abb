//! Identity-spec loading: YAML → `RawSpec` → validated `SpecPlan`.
//!
//! `RawSpec` mirrors the YAML schema faithfully (optionals stay optional so
//! the content hash reflects what the author wrote); `compile_spec` applies
//! defaults and produces the planner-ready `knv_core::SpecPlan`. Semantic
//! validation lives in `validate.rs` and is always run before compilation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use knv_core::spec::{
    BlockingKey, ComparatorKind, DecisionThresholds, EmConfig, KeyTransform, LevelThresholds,
    MatchRule, ScoringConfig, SeedBlock, SourceSpec, SpecPlan, SurvivorshipConfig,
    SurvivorshipStrategy,
};

use crate::validate::validate_spec;
use crate::{IoError, IoResult};

/// Default skew limit when the spec does not set one.
pub const DEFAULT_SKEW_LIMIT: usize = 1000;

// ----------------------------- Raw YAML shape -----------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawEntity {
    Name(String),
    Block { name: String },
}

impl RawEntity {
    pub fn name(&self) -> &str {
        match self {
            RawEntity::Name(s) => s,
            RawEntity::Block { name } => name,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawSource {
    pub name: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawBlockingKey {
    pub fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawThresholds {
    pub exact: f64,
    pub near: f64,
    pub weak: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawRule {
    pub field: String,
    pub comparator: String,
    pub weight: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thresholds: Option<RawThresholds>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawDecision {
    #[serde(rename = "match")]
    pub match_threshold: f64,
    pub review: f64,
    pub reject: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawSeedBlock {
    pub key: usize,
    pub recall: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawEm {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_sample_pairs: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_lambda: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed_block: Option<RawSeedBlock>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawScoring {
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub em: Option<RawEm>,
}

fn default_scoring() -> RawScoring {
    RawScoring { method: "weighted_sum".to_string(), em: None }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawSurvivorship {
    #[serde(default)]
    pub source_priority: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

fn default_survivorship() -> RawSurvivorship {
    RawSurvivorship { source_priority: Vec::new(), default: None, fields: BTreeMap::new() }
}

/// The parsed YAML identity spec, structurally faithful to the document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawSpec {
    pub entity: RawEntity,
    pub identity_version: String,
    #[serde(default)]
    pub sources: Vec<RawSource>,
    #[serde(default)]
    pub blocking: Vec<RawBlockingKey>,
    #[serde(default)]
    pub rules: Vec<RawRule>,
    pub decision: RawDecision,
    #[serde(default = "default_scoring")]
    pub scoring: RawScoring,
    #[serde(default = "default_survivorship")]
    pub survivorship: RawSurvivorship,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skew_limit: Option<usize>,
}

// ----------------------------- Parse & compile -----------------------------

/// Parse raw spec text. Fails only on malformed YAML / wrong shapes;
/// semantic problems are the validator's job.
pub fn parse_spec(text: &str) -> IoResult<RawSpec> {
    serde_yaml::from_str(text).map_err(|e| IoError::SpecParse(e.to_string()))
}

/// Comparator-specific level-threshold defaults. Company similarity is
/// noisier, so its exact band opens at 0.88.
fn default_thresholds(comparator: ComparatorKind) -> LevelThresholds {
    match comparator {
        ComparatorKind::Company => LevelThresholds { exact: 0.88, ..LevelThresholds::default() },
        _ => LevelThresholds::default(),
    }
}

/// Validate, then compile the raw spec into the planner-ready plan.
/// Returns the full issue list on validation failure.
pub fn compile_spec(raw: &RawSpec) -> Result<SpecPlan, Vec<String>> {
    let report = validate_spec(raw);
    if !report.pass {
        return Err(report.error_messages());
    }

    let sources = raw
        .sources
        .iter()
        .map(|s| SourceSpec { name: s.name.clone(), attributes: s.attributes.clone() })
        .collect();

    let blocking = raw
        .blocking
        .iter()
        .map(|k| BlockingKey {
            fields: k.fields.clone(),
            // Validation already proved the transform parses.
            transform: k.transform.as_deref().map(|t| KeyTransform::parse(t).expect("validated")),
        })
        .collect();

    let rules = raw
        .rules
        .iter()
        .map(|r| {
            let comparator: ComparatorKind = r.comparator.parse().expect("validated");
            let thresholds = match &r.thresholds {
                Some(t) => LevelThresholds { exact: t.exact, near: t.near, weak: t.weak },
                None => default_thresholds(comparator),
            };
            MatchRule { field: r.field.clone(), comparator, weight: r.weight, thresholds }
        })
        .collect();

    let decision = DecisionThresholds {
        match_threshold: raw.decision.match_threshold,
        review_threshold: raw.decision.review,
        reject_threshold: raw.decision.reject,
    };

    let scoring = match raw.scoring.method.as_str() {
        "weighted_sum" => ScoringConfig::WeightedSum,
        "fellegi_sunter" => {
            let defaults = EmConfig::default();
            let em = raw.scoring.em.as_ref();
            ScoringConfig::FellegiSunter(EmConfig {
                max_sample_pairs: em
                    .and_then(|e| e.max_sample_pairs)
                    .unwrap_or(defaults.max_sample_pairs),
                max_iterations: em
                    .and_then(|e| e.max_iterations)
                    .unwrap_or(defaults.max_iterations),
                tolerance: em.and_then(|e| e.tolerance).unwrap_or(defaults.tolerance),
                initial_lambda: em
                    .and_then(|e| e.initial_lambda)
                    .unwrap_or(defaults.initial_lambda),
                seed_block: em.and_then(|e| e.seed_block.as_ref()).map(|s| SeedBlock {
                    key_index: s.key,
                    recall: s.recall,
                }),
            })
        }
        other => unreachable!("validated scoring method: {other}"),
    };

    let survivorship = SurvivorshipConfig {
        source_priority: raw.survivorship.source_priority.clone(),
        per_field: raw
            .survivorship
            .fields
            .iter()
            .map(|(field, strategy)| {
                (field.clone(), strategy.parse::<SurvivorshipStrategy>().expect("validated"))
            })
            .collect(),
        default_strategy: raw
            .survivorship
            .default
            .as_deref()
            .map(|s| s.parse().expect("validated"))
            .unwrap_or(SurvivorshipStrategy::NonNull),
    };

    Ok(SpecPlan {
        entity_type: raw.entity.name().to_string(),
        identity_version: raw.identity_version.clone(),
        sources,
        blocking,
        rules,
        decision,
        scoring,
        survivorship,
        skew_limit: raw.skew_limit.unwrap_or(DEFAULT_SKEW_LIMIT),
    })
}

/// Parse + validate + compile in one step; the common entry for callers
/// holding spec text.
pub fn load_spec(text: &str) -> IoResult<(RawSpec, SpecPlan)> {
    let raw = parse_spec(text)?;
    let plan = compile_spec(&raw).map_err(|errors| IoError::Invalid(errors.join("; ")))?;
    Ok((raw, plan))
}

#[cfg(test)]
pub(crate) const SAMPLE_SPEC: &str = r#"
entity: person
identity_version: "1.0.0"
sources:
  - name: crm
    attributes:
      email: EMAIL_ADDR
      first_name: FIRST
      last_name: LAST
      company: COMPANY_NAME
  - name: billing
    attributes:
      email: email
      first_name: first
      last_name: last
      company: company
blocking:
  - fields: [email]
    transform: lowercase
  - fields: [last_name, first_name]
    transform: lowercase
rules:
  - field: email
    comparator: email
    weight: 0.9
  - field: first_name
    comparator: name
    weight: 0.4
  - field: last_name
    comparator: jaro_winkler
    weight: 0.4
  - field: company
    comparator: company
    weight: 0.3
decision:
  match: 0.85
  review: 0.6
  reject: 0.3
scoring:
  method: weighted_sum
survivorship:
  source_priority: [crm, billing]
  default: source_priority
  fields:
    email: most_recent
"#;
