//! Compiled identity-spec plan.
//!
//! `SpecPlan` is the validated, planner-ready form of the YAML identity
//! spec. It is read-only after compilation; workers share it by reference.
//! Parsing and validation live in `knv_io`; this module only defines the
//! domains.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::errors::CoreError;

// Display via as_str for the string-backed enums in this module.
macro_rules! fmt_as_str {
    () => {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.as_str())
        }
    };
}

// ----------------------------- Comparators -----------------------------

/// The fixed comparator set. Modeled as a tagged variant, not trait objects:
/// the set is known at compile time and scoring dispatches on it directly.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ComparatorKind {
    Exact,
    JaroWinkler,
    Email,
    Phone,
    Name,
    Company,
}

impl ComparatorKind {
    pub const ALL: [ComparatorKind; 6] = [
        ComparatorKind::Exact,
        ComparatorKind::JaroWinkler,
        ComparatorKind::Email,
        ComparatorKind::Phone,
        ComparatorKind::Name,
        ComparatorKind::Company,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ComparatorKind::Exact => "exact",
            ComparatorKind::JaroWinkler => "jaro_winkler",
            ComparatorKind::Email => "email",
            ComparatorKind::Phone => "phone",
            ComparatorKind::Name => "name",
            ComparatorKind::Company => "company",
        }
    }
}

impl fmt::Display for ComparatorKind {
    fmt_as_str!();
}

impl FromStr for ComparatorKind {
    type Err = CoreError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| CoreError::UnknownComparator(s.to_string()))
    }
}

// ----------------------------- Agreement levels -----------------------------

/// Discrete agreement levels used by Fellegi-Sunter scoring.
/// Dense index 0..LEVEL_COUNT keys the m/u parameter tables.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum AgreementLevel {
    Exact,
    Near,
    Weak,
    Disagree,
}

pub const LEVEL_COUNT: usize = 4;

impl AgreementLevel {
    pub const ALL: [AgreementLevel; LEVEL_COUNT] = [
        AgreementLevel::Exact,
        AgreementLevel::Near,
        AgreementLevel::Weak,
        AgreementLevel::Disagree,
    ];

    pub fn index(&self) -> usize {
        match self {
            AgreementLevel::Exact => 0,
            AgreementLevel::Near => 1,
            AgreementLevel::Weak => 2,
            AgreementLevel::Disagree => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgreementLevel::Exact => "exact",
            AgreementLevel::Near => "near",
            AgreementLevel::Weak => "weak",
            AgreementLevel::Disagree => "disagree",
        }
    }
}

impl fmt::Display for AgreementLevel {
    fmt_as_str!();
}

// ----------------------------- Blocking -----------------------------

/// Value transform applied to a blocking key component.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum KeyTransform {
    Lowercase,
    FirstChars(usize),
    /// Full email normalization (aliases, plus-tags, gmail dots); yields
    /// no key for non-emails.
    Email,
    /// Substring after `@` (lowercased); yields no key for non-emails.
    EmailDomain,
    DigitsOnly,
}

impl KeyTransform {
    /// Parse the spec-level transform token, e.g. `lowercase`, `first:3`,
    /// `email_domain`, `digits_only`.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        if let Some(n) = s.strip_prefix("first:") {
            let n: usize = n
                .parse()
                .map_err(|_| CoreError::UnknownTransform(s.to_string()))?;
            if n == 0 {
                return Err(CoreError::UnknownTransform(s.to_string()));
            }
            return Ok(KeyTransform::FirstChars(n));
        }
        match s {
            "lowercase" => Ok(KeyTransform::Lowercase),
            "email" => Ok(KeyTransform::Email),
            "email_domain" => Ok(KeyTransform::EmailDomain),
            "digits_only" => Ok(KeyTransform::DigitsOnly),
            other => Err(CoreError::UnknownTransform(other.to_string())),
        }
    }
}

/// One blocking key: the attributes whose transformed values are
/// concatenated into the key value.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BlockingKey {
    pub fields: Vec<String>,
    pub transform: Option<KeyTransform>,
}

// ----------------------------- Rules & thresholds -----------------------------

/// Similarity cutoffs that bin a continuous comparator score into an
/// agreement level. Scores below `weak` disagree.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LevelThresholds {
    pub exact: f64,
    pub near: f64,
    pub weak: f64,
}

impl Default for LevelThresholds {
    fn default() -> Self {
        LevelThresholds { exact: 0.92, near: 0.80, weak: 0.60 }
    }
}

impl LevelThresholds {
    /// Bin a similarity score.
    pub fn bin(&self, score: f64) -> AgreementLevel {
        if score >= self.exact {
            AgreementLevel::Exact
        } else if score >= self.near {
            AgreementLevel::Near
        } else if score >= self.weak {
            AgreementLevel::Weak
        } else {
            AgreementLevel::Disagree
        }
    }
}

/// One per-field comparison rule.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MatchRule {
    pub field: String,
    pub comparator: ComparatorKind,
    pub weight: f64,
    pub thresholds: LevelThresholds,
}

/// Decision thresholds over the total pair score. Under Fellegi-Sunter
/// scoring these are interpreted in the log2 domain.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DecisionThresholds {
    pub match_threshold: f64,
    pub review_threshold: f64,
    pub reject_threshold: f64,
}

impl DecisionThresholds {
    /// Invariant: `reject <= review <= match`.
    pub fn is_monotone(&self) -> bool {
        self.reject_threshold <= self.review_threshold
            && self.review_threshold <= self.match_threshold
    }
}

// ----------------------------- Scoring -----------------------------

/// Seed blocking rule for the prior-probability (lambda) estimate:
/// pairs captured by `blocking[key_index]` are assumed to cover the
/// given recall of all true matches.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SeedBlock {
    pub key_index: usize,
    pub recall: f64,
}

/// Expectation-maximization configuration for Fellegi-Sunter training.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EmConfig {
    /// Random-pair budget for the u-probability estimate (no blocking).
    pub max_sample_pairs: usize,
    pub max_iterations: usize,
    /// Convergence: max absolute m-change across all (rule, level) cells.
    pub tolerance: f64,
    /// Prior P(random pair matches) before any seed-block estimate.
    pub initial_lambda: f64,
    pub seed_block: Option<SeedBlock>,
}

impl Default for EmConfig {
    fn default() -> Self {
        EmConfig {
            max_sample_pairs: 100_000,
            max_iterations: 50,
            tolerance: 1e-4,
            initial_lambda: 0.01,
            seed_block: None,
        }
    }
}

/// Scoring strategy selected by the spec.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ScoringConfig {
    WeightedSum,
    FellegiSunter(EmConfig),
}

impl ScoringConfig {
    pub fn method_name(&self) -> &'static str {
        match self {
            ScoringConfig::WeightedSum => "weighted_sum",
            ScoringConfig::FellegiSunter(_) => "fellegi_sunter",
        }
    }
}

// ----------------------------- Survivorship -----------------------------

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum SurvivorshipStrategy {
    SourcePriority,
    MostRecent,
    Longest,
    Mode,
    NonNull,
}

impl SurvivorshipStrategy {
    pub const ALL: [SurvivorshipStrategy; 5] = [
        SurvivorshipStrategy::SourcePriority,
        SurvivorshipStrategy::MostRecent,
        SurvivorshipStrategy::Longest,
        SurvivorshipStrategy::Mode,
        SurvivorshipStrategy::NonNull,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SurvivorshipStrategy::SourcePriority => "source_priority",
            SurvivorshipStrategy::MostRecent => "most_recent",
            SurvivorshipStrategy::Longest => "longest",
            SurvivorshipStrategy::Mode => "mode",
            SurvivorshipStrategy::NonNull => "non_null",
        }
    }
}

impl fmt::Display for SurvivorshipStrategy {
    fmt_as_str!();
}

impl FromStr for SurvivorshipStrategy {
    type Err = CoreError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| CoreError::UnknownStrategy(s.to_string()))
    }
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SurvivorshipConfig {
    /// Highest-trust source first. Sources not listed rank after listed
    /// ones, in name order.
    pub source_priority: Vec<String>,
    pub per_field: BTreeMap<String, SurvivorshipStrategy>,
    pub default_strategy: SurvivorshipStrategy,
}

impl Default for SurvivorshipConfig {
    fn default() -> Self {
        SurvivorshipConfig {
            source_priority: Vec::new(),
            per_field: BTreeMap::new(),
            default_strategy: SurvivorshipStrategy::NonNull,
        }
    }
}

impl SurvivorshipConfig {
    pub fn strategy_for(&self, field: &str) -> SurvivorshipStrategy {
        self.per_field.get(field).copied().unwrap_or(self.default_strategy)
    }

    /// Rank of a source in the priority order (listed first, then unlisted
    /// alphabetically after). Lower ranks win.
    pub fn source_rank(&self, source: &str) -> (usize, String) {
        match self.source_priority.iter().position(|s| s == source) {
            Some(i) => (i, String::new()),
            None => (self.source_priority.len(), source.to_string()),
        }
    }
}

// ----------------------------- Sources & plan -----------------------------

/// One declared source: canonical attribute -> source column.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SourceSpec {
    pub name: String,
    pub attributes: BTreeMap<String, String>,
}

/// The validated, planner-ready spec. Read-only after compilation.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SpecPlan {
    pub entity_type: String,
    pub identity_version: String,
    pub sources: Vec<SourceSpec>,
    pub blocking: Vec<BlockingKey>,
    pub rules: Vec<MatchRule>,
    pub decision: DecisionThresholds,
    pub scoring: ScoringConfig,
    pub survivorship: SurvivorshipConfig,
    /// Blocking groups larger than this are flagged in telemetry.
    pub skew_limit: usize,
}

impl SpecPlan {
    /// Union of canonical attributes declared across all sources.
    pub fn declared_attributes(&self) -> BTreeSet<&str> {
        self.sources
            .iter()
            .flat_map(|s| s.attributes.keys().map(String::as_str))
            .collect()
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name.as_str()).collect()
    }
}
