//! Structural & semantic spec validation before any computation.
//! Deterministic outputs; issues are accumulated — never first-fail — and
//! sorted stably so reports are byte-identical across runs.

use std::collections::BTreeSet;

use knv_core::spec::{ComparatorKind, KeyTransform, SurvivorshipStrategy};

use crate::spec_loader::RawSpec;

/// Issue severity. Warnings never fail validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
}

/// Where the issue occurred (kept small & deterministic).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum SpecRef {
    Root,
    Source(String),
    BlockingKey(usize),
    Rule(String),
    Decision,
    Scoring,
    Survivorship,
}

impl std::fmt::Display for SpecRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpecRef::Root => write!(f, "spec"),
            SpecRef::Source(name) => write!(f, "sources[{name}]"),
            SpecRef::BlockingKey(i) => write!(f, "blocking[{i}]"),
            SpecRef::Rule(field) => write!(f, "rules[{field}]"),
            SpecRef::Decision => write!(f, "decision"),
            SpecRef::Scoring => write!(f, "scoring"),
            SpecRef::Survivorship => write!(f, "survivorship"),
        }
    }
}

/// One validation finding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub code: &'static str,
    pub message: String,
    pub where_: SpecRef,
}

/// Deterministic report: pass = (no Error); issue ordering is stable.
#[derive(Clone, Debug, PartialEq)]
pub struct ValidationReport {
    pub pass: bool,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }

    pub fn error_messages(&self) -> Vec<String> {
        self.errors().map(|i| format!("{}: {}", i.where_, i.message)).collect()
    }
}

impl Default for ValidationReport {
    fn default() -> Self {
        ValidationReport { pass: true, issues: Vec::new() }
    }
}

fn issue(severity: Severity, code: &'static str, where_: SpecRef, message: String) -> ValidationIssue {
    ValidationIssue { severity, code, message, where_ }
}

/// Top-level entry point. Every check runs; nothing short-circuits.
pub fn validate_spec(raw: &RawSpec) -> ValidationReport {
    let mut issues: Vec<ValidationIssue> = Vec::new();

    let declared: BTreeSet<&str> = raw
        .sources
        .iter()
        .flat_map(|s| s.attributes.keys().map(String::as_str))
        .collect();

    issues.extend(check_metadata(raw));
    issues.extend(check_sources(raw));
    issues.extend(check_rules(raw, &declared));
    issues.extend(check_blocking(raw, &declared));
    issues.extend(check_decision(raw));
    issues.extend(check_scoring(raw));
    issues.extend(check_survivorship(raw, &declared));

    // Deterministic sort (by code, then location, then message).
    issues.sort_by(|a, b| {
        (a.code, &a.where_, &a.message).cmp(&(b.code, &b.where_, &b.message))
    });

    ValidationReport {
        pass: !issues.iter().any(|i| i.severity == Severity::Error),
        issues,
    }
}

// ------------------------------------------------------------------------------------------------
// Checks
// ------------------------------------------------------------------------------------------------

fn check_metadata(raw: &RawSpec) -> Vec<ValidationIssue> {
    let mut out = Vec::new();
    if raw.entity.name().trim().is_empty() {
        out.push(issue(
            Severity::Error,
            "entity_missing",
            SpecRef::Root,
            "entity name must be non-empty".into(),
        ));
    }
    if !is_semver(&raw.identity_version) {
        out.push(issue(
            Severity::Error,
            "bad_version",
            SpecRef::Root,
            format!(
                "identity_version '{}' is not semver-shaped (MAJOR.MINOR.PATCH)",
                raw.identity_version
            ),
        ));
    }
    out
}

fn check_sources(raw: &RawSpec) -> Vec<ValidationIssue> {
    let mut out = Vec::new();
    if raw.sources.is_empty() {
        out.push(issue(
            Severity::Error,
            "no_sources",
            SpecRef::Root,
            "at least one source must be declared".into(),
        ));
    }
    let mut seen = BTreeSet::new();
    for source in &raw.sources {
        if source.name.trim().is_empty() {
            out.push(issue(
                Severity::Error,
                "source_unnamed",
                SpecRef::Source(source.name.clone()),
                "source name must be non-empty".into(),
            ));
        }
        if !seen.insert(source.name.as_str()) {
            out.push(issue(
                Severity::Error,
                "source_duplicated",
                SpecRef::Source(source.name.clone()),
                format!("source '{}' is declared more than once", source.name),
            ));
        }
        if source.attributes.is_empty() {
            out.push(issue(
                Severity::Warning,
                "source_no_attributes",
                SpecRef::Source(source.name.clone()),
                format!("source '{}' maps no attributes", source.name),
            ));
        }
    }
    out
}

fn check_rules(raw: &RawSpec, declared: &BTreeSet<&str>) -> Vec<ValidationIssue> {
    let mut out = Vec::new();
    if raw.rules.is_empty() {
        out.push(issue(
            Severity::Error,
            "no_rules",
            SpecRef::Root,
            "at least one match rule is required".into(),
        ));
    }
    for rule in &raw.rules {
        if rule.comparator.parse::<ComparatorKind>().is_err() {
            out.push(issue(
                Severity::Error,
                "unknown_comparator",
                SpecRef::Rule(rule.field.clone()),
                format!(
                    "unknown comparator '{}'; known: {}",
                    rule.comparator,
                    ComparatorKind::ALL.map(|k| k.as_str()).join(", ")
                ),
            ));
        }
        if !declared.contains(rule.field.as_str()) {
            out.push(issue(
                Severity::Error,
                "undeclared_rule_field",
                SpecRef::Rule(rule.field.clone()),
                format!("rule field '{}' is not a declared canonical attribute", rule.field),
            ));
        }
        if rule.weight <= 0.0 {
            out.push(issue(
                Severity::Warning,
                "nonpositive_weight",
                SpecRef::Rule(rule.field.clone()),
                format!("rule weight {} contributes nothing", rule.weight),
            ));
        }
        if let Some(t) = &rule.thresholds {
            if !(t.exact >= t.near && t.near >= t.weak) {
                out.push(issue(
                    Severity::Error,
                    "thresholds_not_descending",
                    SpecRef::Rule(rule.field.clone()),
                    format!(
                        "level thresholds must satisfy exact >= near >= weak (got {} / {} / {})",
                        t.exact, t.near, t.weak
                    ),
                ));
            }
        }
    }
    out
}

fn check_blocking(raw: &RawSpec, declared: &BTreeSet<&str>) -> Vec<ValidationIssue> {
    let mut out = Vec::new();
    if raw.blocking.is_empty() {
        out.push(issue(
            Severity::Warning,
            "no_blocking",
            SpecRef::Root,
            "no blocking keys declared: no candidate pairs will be generated".into(),
        ));
    }
    for (i, key) in raw.blocking.iter().enumerate() {
        if key.fields.is_empty() {
            out.push(issue(
                Severity::Error,
                "blocking_key_empty",
                SpecRef::BlockingKey(i),
                "blocking key has no fields".into(),
            ));
        }
        for field in &key.fields {
            if !declared.contains(field.as_str()) {
                out.push(issue(
                    Severity::Error,
                    "undeclared_blocking_field",
                    SpecRef::BlockingKey(i),
                    format!("blocking field '{field}' is not a declared canonical attribute"),
                ));
            }
        }
        if let Some(t) = &key.transform {
            if KeyTransform::parse(t).is_err() {
                out.push(issue(
                    Severity::Error,
                    "unknown_transform",
                    SpecRef::BlockingKey(i),
                    format!("unknown blocking transform '{t}'"),
                ));
            }
        }
    }
    out
}

fn check_decision(raw: &RawSpec) -> Vec<ValidationIssue> {
    let d = &raw.decision;
    if d.reject <= d.review && d.review <= d.match_threshold {
        Vec::new()
    } else {
        vec![issue(
            Severity::Error,
            "thresholds_not_monotone",
            SpecRef::Decision,
            format!(
                "decision thresholds must satisfy reject <= review <= match (got {} / {} / {})",
                d.reject, d.review, d.match_threshold
            ),
        )]
    }
}

fn check_scoring(raw: &RawSpec) -> Vec<ValidationIssue> {
    let mut out = Vec::new();
    match raw.scoring.method.as_str() {
        "weighted_sum" => {
            if raw.scoring.em.is_some() {
                out.push(issue(
                    Severity::Warning,
                    "em_ignored",
                    SpecRef::Scoring,
                    "em block is ignored under weighted_sum scoring".into(),
                ));
            }
        }
        "fellegi_sunter" => {
            if let Some(em) = &raw.scoring.em {
                if em.tolerance.is_some_and(|t| t <= 0.0) {
                    out.push(issue(
                        Severity::Error,
                        "bad_em_tolerance",
                        SpecRef::Scoring,
                        "em.tolerance must be positive".into(),
                    ));
                }
                if em.max_iterations.is_some_and(|n| n == 0) {
                    out.push(issue(
                        Severity::Error,
                        "bad_em_iterations",
                        SpecRef::Scoring,
                        "em.max_iterations must be at least 1".into(),
                    ));
                }
                if em.initial_lambda.is_some_and(|l| !(0.0..=1.0).contains(&l)) {
                    out.push(issue(
                        Severity::Error,
                        "bad_em_lambda",
                        SpecRef::Scoring,
                        "em.initial_lambda must lie in [0, 1]".into(),
                    ));
                }
                if let Some(seed) = &em.seed_block {
                    if seed.key >= raw.blocking.len() {
                        out.push(issue(
                            Severity::Error,
                            "bad_seed_block",
                            SpecRef::Scoring,
                            format!(
                                "em.seed_block.key {} is out of range ({} blocking keys)",
                                seed.key,
                                raw.blocking.len()
                            ),
                        ));
                    }
                    if !(0.0 < seed.recall && seed.recall <= 1.0) {
                        out.push(issue(
                            Severity::Error,
                            "bad_seed_recall",
                            SpecRef::Scoring,
                            "em.seed_block.recall must lie in (0, 1]".into(),
                        ));
                    }
                }
            }
        }
        other => out.push(issue(
            Severity::Error,
            "unknown_scoring",
            SpecRef::Scoring,
            format!("unknown scoring method '{other}' (weighted_sum | fellegi_sunter)"),
        )),
    }
    out
}

fn check_survivorship(raw: &RawSpec, declared: &BTreeSet<&str>) -> Vec<ValidationIssue> {
    let mut out = Vec::new();
    let surv = &raw.survivorship;

    if let Some(default) = &surv.default {
        if default.parse::<SurvivorshipStrategy>().is_err() {
            out.push(issue(
                Severity::Error,
                "unknown_strategy",
                SpecRef::Survivorship,
                format!("unknown default survivorship strategy '{default}'"),
            ));
        }
    }
    for (field, strategy) in &surv.fields {
        if strategy.parse::<SurvivorshipStrategy>().is_err() {
            out.push(issue(
                Severity::Error,
                "unknown_strategy",
                SpecRef::Survivorship,
                format!("unknown survivorship strategy '{strategy}' for field '{field}'"),
            ));
        }
        if !declared.contains(field.as_str()) {
            out.push(issue(
                Severity::Warning,
                "undeclared_survivorship_field",
                SpecRef::Survivorship,
                format!("survivorship names undeclared field '{field}'"),
            ));
        }
    }

    // The priority list must be a permutation of the declared sources.
    if !surv.source_priority.is_empty() {
        let declared_sources: BTreeSet<&str> =
            raw.sources.iter().map(|s| s.name.as_str()).collect();
        let listed: BTreeSet<&str> = surv.source_priority.iter().map(String::as_str).collect();
        if listed.len() != surv.source_priority.len() {
            out.push(issue(
                Severity::Error,
                "priority_duplicates",
                SpecRef::Survivorship,
                "source_priority lists a source more than once".into(),
            ));
        }
        if listed != declared_sources {
            out.push(issue(
                Severity::Error,
                "priority_not_permutation",
                SpecRef::Survivorship,
                format!(
                    "source_priority must be a permutation of declared sources (declared: {}; listed: {})",
                    declared_sources.iter().copied().collect::<Vec<_>>().join(", "),
                    surv.source_priority.join(", ")
                ),
            ));
        }
    }
    out
}

/// MAJOR.MINOR.PATCH with numeric components.
fn is_semver(version: &str) -> bool {
    let parts: Vec<&str> = version.split('.').collect();
    parts.len() == 3
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec_loader::{parse_spec, SAMPLE_SPEC};

    #[test]
    fn sample_spec_passes() {
        let raw = parse_spec(SAMPLE_SPEC).unwrap();
        let report = validate_spec(&raw);
        assert!(report.pass, "issues: {:?}", report.issues);
    }

    #[test]
    fn all_issues_are_enumerated_not_first_fail() {
        let text = SAMPLE_SPEC
            .replace("comparator: email", "comparator: levenshtein")
            .replace("match: 0.85", "match: 0.1")
            .replace("identity_version: \"1.0.0\"", "identity_version: \"one\"");
        let raw = parse_spec(&text).unwrap();
        let report = validate_spec(&raw);
        assert!(!report.pass);
        let codes: Vec<&str> = report.errors().map(|i| i.code).collect();
        assert!(codes.contains(&"unknown_comparator"));
        assert!(codes.contains(&"thresholds_not_monotone"));
        assert!(codes.contains(&"bad_version"));
    }

    #[test]
    fn rule_field_must_be_declared() {
        let text = SAMPLE_SPEC.replace("field: company", "field: ssn");
        let raw = parse_spec(&text).unwrap();
        let report = validate_spec(&raw);
        assert!(report.errors().any(|i| i.code == "undeclared_rule_field"));
    }

    #[test]
    fn priority_must_be_permutation_of_sources() {
        let text = SAMPLE_SPEC.replace("source_priority: [crm, billing]", "source_priority: [crm]");
        let raw = parse_spec(&text).unwrap();
        let report = validate_spec(&raw);
        assert!(report.errors().any(|i| i.code == "priority_not_permutation"));
    }

    #[test]
    fn issue_order_is_stable() {
        let text = SAMPLE_SPEC
            .replace("comparator: email", "comparator: levenshtein")
            .replace("match: 0.85", "match: 0.1");
        let raw = parse_spec(&text).unwrap();
        let a = validate_spec(&raw);
        let b = validate_spec(&raw);
        assert_eq!(a, b);
    }

    #[test]
    fn semver_shapes() {
        assert!(is_semver("1.0.0"));
        assert!(is_semver("0.12.3"));
        assert!(!is_semver("1.0"));
        assert!(!is_semver("v1.0.0"));
        assert!(!is_semver("1.0.x"));
    }
}
