//! Execution planning: a structured, human-explainable preview of what a
//! reconcile run will do for a given spec, plus risk flags for common
//! misconfigurations. Purely derived from the compiled plan; running the
//! planner never touches data.

use serde::{Deserialize, Serialize};

use knv_core::spec::{ScoringConfig, SpecPlan};

use crate::hasher::spec_hash;
use crate::spec_loader::RawSpec;
use crate::IoResult;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StageInfo {
    pub name: String,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StrategyInfo {
    pub field: String,
    pub comparator: String,
    pub weight: f64,
    /// Fraction of the total attainable score this rule carries.
    pub weight_share: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SurvivorshipSummary {
    pub field: String,
    pub strategy: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockingAnalysis {
    pub key_count: usize,
    pub keys: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RiskFlag {
    pub code: String,
    pub message: String,
}

/// Structured execution plan for an identity spec.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlanResult {
    pub entity: String,
    pub plan_hash: String,
    pub execution_stages: Vec<StageInfo>,
    pub match_strategies: Vec<StrategyInfo>,
    pub survivorship_summary: Vec<SurvivorshipSummary>,
    pub blocking_analysis: BlockingAnalysis,
    pub risk_flags: Vec<RiskFlag>,
    pub summary: String,
}

/// Build the plan from a validated spec.
pub fn build_plan(raw: &RawSpec, plan: &SpecPlan) -> IoResult<PlanResult> {
    let plan_hash = spec_hash(raw)?;

    let scoring_detail = match &plan.scoring {
        ScoringConfig::WeightedSum => "weighted-sum over rule scores".to_string(),
        ScoringConfig::FellegiSunter(em) => format!(
            "Fellegi-Sunter log2 weights; EM up to {} iterations, {} sampled pairs for u",
            em.max_iterations, em.max_sample_pairs
        ),
    };

    let execution_stages = vec![
        StageInfo {
            name: "ingest".into(),
            detail: format!("{} sources -> canonical attributes", plan.sources.len()),
        },
        StageInfo {
            name: "block".into(),
            detail: format!("{} blocking keys", plan.blocking.len()),
        },
        StageInfo {
            name: "score".into(),
            detail: format!("{} rules, {scoring_detail}", plan.rules.len()),
        },
        StageInfo { name: "cluster".into(), detail: "union-find transitive closure".into() },
        StageInfo {
            name: "survive".into(),
            detail: format!("default strategy {}", plan.survivorship.default_strategy),
        },
    ];

    let total_weight: f64 = plan.rules.iter().map(|r| r.weight.max(0.0)).sum();
    let match_strategies = plan
        .rules
        .iter()
        .map(|r| StrategyInfo {
            field: r.field.clone(),
            comparator: r.comparator.as_str().to_string(),
            weight: r.weight,
            weight_share: if total_weight > 0.0 { r.weight.max(0.0) / total_weight } else { 0.0 },
        })
        .collect::<Vec<_>>();

    let mut survivorship_summary: Vec<SurvivorshipSummary> = plan
        .survivorship
        .per_field
        .iter()
        .map(|(field, strategy)| SurvivorshipSummary {
            field: field.clone(),
            strategy: strategy.as_str().to_string(),
        })
        .collect();
    survivorship_summary.push(SurvivorshipSummary {
        field: "*".into(),
        strategy: plan.survivorship.default_strategy.as_str().to_string(),
    });

    let blocking_analysis = BlockingAnalysis {
        key_count: plan.blocking.len(),
        keys: plan
            .blocking
            .iter()
            .map(|k| {
                let fields = k.fields.join("+");
                match &k.transform {
                    Some(t) => format!("{fields} ({t:?})"),
                    None => fields,
                }
            })
            .collect(),
    };

    let risk_flags = collect_risk_flags(plan, &match_strategies);

    let summary = format!(
        "plan {}: entity '{}', {} sources, {} blocking keys, {} rules ({}), decision match>={} review>={}; {} risk flag(s)",
        &plan_hash[..12],
        plan.entity_type,
        plan.sources.len(),
        plan.blocking.len(),
        plan.rules.len(),
        plan.scoring.method_name(),
        plan.decision.match_threshold,
        plan.decision.review_threshold,
        risk_flags.len(),
    );

    Ok(PlanResult {
        entity: plan.entity_type.clone(),
        plan_hash,
        execution_stages,
        match_strategies,
        survivorship_summary,
        blocking_analysis,
        risk_flags,
        summary,
    })
}

fn collect_risk_flags(plan: &SpecPlan, strategies: &[StrategyInfo]) -> Vec<RiskFlag> {
    let mut flags = Vec::new();

    if plan.blocking.is_empty() {
        flags.push(RiskFlag {
            code: "no_blocking".into(),
            message: "no blocking keys: no candidate pairs will be generated".into(),
        });
    }
    for strategy in strategies {
        if strategy.weight_share > 0.75 {
            flags.push(RiskFlag {
                code: "weight_concentration".into(),
                message: format!(
                    "rule '{}' carries {:.0}% of the attainable score; a single dirty field dominates decisions",
                    strategy.field,
                    strategy.weight_share * 100.0
                ),
            });
        }
    }
    let max_total: f64 = plan.rules.iter().map(|r| r.weight.max(0.0)).sum();
    if matches!(plan.scoring, ScoringConfig::WeightedSum)
        && max_total < plan.decision.match_threshold
    {
        flags.push(RiskFlag {
            code: "unreachable_match".into(),
            message: format!(
                "maximum attainable score {max_total} is below the match threshold {}",
                plan.decision.match_threshold
            ),
        });
    }
    flags
}
