//! Plan evaluator
//!
//! Scores a parsed plan against weighted criteria using an independent
//! backend, and asks the same backend for one corrected rewrite when the
//! score falls short.

use crate::backend::{generate_within, GenerationBackend};
use crate::config::{CriterionWeights, PipelineConfig};
use crate::error::PlanError;
use crate::models::{
    ComplianceFlag, Criterion, CriterionScore, EvaluationResult, Plan, SectionKind, UserProfile,
};
use crate::parser::sections::label_of;
use crate::projection::format_money;
use crate::Result;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct PlanEvaluator {
    backend: Arc<dyn GenerationBackend>,
    weights: CriterionWeights,
    timeout: Duration,
}

impl PlanEvaluator {
    pub fn new(backend: Arc<dyn GenerationBackend>, weights: CriterionWeights, timeout: Duration) -> Self {
        Self {
            backend,
            weights,
            timeout,
        }
    }

    pub fn from_config(backend: Arc<dyn GenerationBackend>, config: &PipelineConfig) -> Self {
        Self::new(backend, config.criterion_weights.clone(), config.evaluation_timeout)
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub async fn evaluate(&self, plan: &Plan, profile: &UserProfile) -> Result<EvaluationResult> {
        let prompt = evaluation_prompt(plan, profile);
        let raw = generate_within(self.backend.as_ref(), &prompt, self.timeout).await?;

        let result = self.parse_verdict(&raw)?;
        info!(
            evaluator = %result.evaluator,
            score = result.score,
            issues = result.key_issues.len(),
            "Plan evaluated"
        );
        Ok(result)
    }

    /// Raw rewrite text; the caller re-parses it
    pub async fn request_improvement(
        &self,
        plan: &Plan,
        profile: &UserProfile,
        evaluation: &EvaluationResult,
    ) -> Result<String> {
        let prompt = improvement_prompt(plan, profile, evaluation);
        info!(score = evaluation.score, "Requesting improved plan");
        generate_within(self.backend.as_ref(), &prompt, self.timeout).await
    }

    /// Parse a JSON verdict into a scored result
    pub fn parse_verdict(&self, raw: &str) -> Result<EvaluationResult> {
        let json = extract_json_object(raw).ok_or_else(|| {
            PlanError::EvaluationUnparsable("no JSON object in evaluator reply".to_string())
        })?;

        let value: Value = serde_json::from_str(json)
            .map_err(|e| PlanError::EvaluationUnparsable(format!("invalid JSON: {}", e)))?;

        let mut breakdown = Vec::with_capacity(Criterion::ALL.len());
        for criterion in Criterion::ALL {
            let key = format!("{}_score", criterion.key());
            let score = value
                .get(&key)
                .and_then(score_value)
                .ok_or_else(|| PlanError::EvaluationUnparsable(format!("missing {}", key)))?;

            let feedback = value
                .get(format!("{}_feedback", criterion.key()))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();

            breakdown.push(CriterionScore {
                criterion,
                score: score.clamp(0.0, 10.0),
                weight: self.weights.weight(criterion),
                feedback,
            });
        }

        let total_weight: f64 = breakdown.iter().map(|c| c.weight).sum();
        let score = if total_weight > 0.0 {
            breakdown.iter().map(|c| c.score * c.weight).sum::<f64>() / total_weight
        } else {
            warn!("Criterion weights sum to zero; using plain mean");
            breakdown.iter().map(|c| c.score).sum::<f64>() / breakdown.len() as f64
        };

        Ok(EvaluationResult {
            score,
            breakdown,
            key_issues: string_list(&value, "key_issues"),
            suggestions: string_list(&value, "improvement_suggestions"),
            evaluator: self.backend.name().to_string(),
            evaluated_at: Utc::now(),
            improved_plan: None,
        })
    }
}

/// Outermost `{...}` span, tolerating prose or code fences around it
pub fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

fn score_value(value: &Value) -> Option<f64> {
    let score: Option<f64> = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    score.filter(|s| s.is_finite())
}

fn string_list(value: &Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

//
// ================= Prompts =================
//

fn profile_block(profile: &UserProfile) -> String {
    let currency = &profile.currency;
    format!(
        "Age: {}, Retirement Age: {}\n\
         Annual Income: {} {}, Annual Expenses: {} {}\n\
         Current Savings: {} {}\n\
         Risk Tolerance: {}\n\
         Goals: {}\n\
         Preferred Markets: {}\n\
         Sharia Compliant: {}",
        profile.age,
        profile.retirement_age,
        currency,
        format_money(profile.annual_income),
        currency,
        format_money(profile.annual_expenses),
        currency,
        format_money(profile.current_savings),
        profile.risk_tolerance,
        profile.goals_or_default().join(", "),
        profile.markets_label(),
        if profile.requires(ComplianceFlag::Sharia) { "Yes" } else { "No" },
    )
}

/// The plan as labeled text, using the same headings the parser reads
pub fn render_plan(plan: &Plan) -> String {
    let currency = &plan.profile.currency;
    let mut out = Vec::new();

    out.push(format!("{}\n{}", label_of(SectionKind::ExecutiveSummary), plan.executive_summary));

    let recs = plan
        .recommendations
        .iter()
        .map(|r| {
            format!(
                "- {} ({}): {:.1}% = {} {}/month, expected return {:.1}%, risk {}/10\n  Rationale: {}",
                r.symbol,
                r.name,
                r.allocation_pct,
                currency,
                format_money(r.monthly_amount),
                r.expected_return * 100.0,
                r.risk_level,
                r.rationale
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    out.push(format!("{}\n{}", label_of(SectionKind::Recommendations), recs));

    let n = &plan.risk_narrative;
    out.push(format!(
        "{}\nRisk Level: {}\nDescription: {}\nSuitability: {}\nAllocation Focus: {}\nTime Factor: {}\nAge Factor: {}",
        label_of(SectionKind::RiskAssessment),
        n.risk_level,
        n.description,
        n.suitability,
        n.allocation_focus,
        n.time_factor,
        n.age_factor
    ));

    let t = &plan.time_horizon;
    out.push(format!(
        "{}\nHorizon Category: {}\nStrategy: {}\nFlexibility: {}\nRetirement Readiness: {}\nMilestones:\n{}",
        label_of(SectionKind::TimeHorizon),
        t.category,
        t.strategy,
        t.flexibility,
        t.retirement_readiness,
        t.milestones
            .iter()
            .map(|m| format!("- {}", m))
            .collect::<Vec<_>>()
            .join("\n")
    ));

    out.push(format!(
        "{}\n{} {} per month (expected blended return {:.1}%, projected wealth {} {})",
        label_of(SectionKind::MonthlySavings),
        currency,
        format_money(plan.monthly_savings_target),
        plan.expected_return * 100.0,
        currency,
        format_money(plan.projected_wealth)
    ));

    out.push(format!(
        "{}\n{}",
        label_of(SectionKind::GoalTimeline),
        plan.goal_timeline
            .iter()
            .map(|(goal, years)| format!("- {}: {} years", goal, years))
            .collect::<Vec<_>>()
            .join("\n")
    ));

    let goals = plan
        .goal_risks
        .iter()
        .map(|g| {
            format!(
                "Goal Name: {}\nPotential Risks:\n{}\nMitigation Strategies:\n{}",
                g.goal,
                g.risks.iter().map(|r| format!("- {}", r)).collect::<Vec<_>>().join("\n"),
                g.mitigations.iter().map(|m| format!("- {}", m)).collect::<Vec<_>>().join("\n")
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    out.push(format!("{}\n{}", label_of(SectionKind::GoalRisks), goals));

    out.push(format!(
        "{}\n{}",
        label_of(SectionKind::AdditionalAdvice),
        plan.advice.iter().map(|a| format!("- {}", a)).collect::<Vec<_>>().join("\n")
    ));

    out.push(format!("{}\n{}", label_of(SectionKind::ComplianceNotes), plan.compliance_notes));

    out.join("\n\n")
}

fn evaluation_prompt(plan: &Plan, profile: &UserProfile) -> String {
    let criteria = Criterion::ALL
        .iter()
        .map(|c| format!("\"{key}_score\": <0-10>,\n    \"{key}_feedback\": \"<detailed feedback>\",", key = c.key()))
        .collect::<Vec<_>>()
        .join("\n    ");

    format!(
        r#"You are a financial planning expert evaluating the quality of financial advice.

USER PROFILE:
{profile}

FINANCIAL PLAN TO EVALUATE:
{plan}

Evaluate this plan on the following criteria (score 0-10 for each):

1. ACCURACY: Are the calculations and financial projections accurate?
2. COMPLETENESS: Does it cover all essential aspects of financial planning?
3. SPECIFICITY: Are the recommendations specific and actionable?
4. RISK_ALIGNMENT: Does it properly align with the user's risk tolerance?
5. MARKET_RELEVANCE: Are the recommendations relevant to the user's preferred market?
6. COMPLIANCE: Does it properly address compliance requirements (Sharia, ESG)?

Respond with ONLY this JSON object:
{{
    {criteria}
    "key_issues": ["<issue1>", "<issue2>"],
    "improvement_suggestions": ["<suggestion1>", "<suggestion2>"]
}}
"#,
        profile = profile_block(profile),
        plan = render_plan(plan),
        criteria = criteria,
    )
}

fn improvement_prompt(plan: &Plan, profile: &UserProfile, evaluation: &EvaluationResult) -> String {
    let breakdown = evaluation
        .breakdown
        .iter()
        .map(|c| format!("- {}: {:.1}/10. {}", c.criterion, c.score, c.feedback))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"You are a senior financial advisor tasked with improving a financial plan.

USER PROFILE:
{profile}

ORIGINAL FINANCIAL PLAN:
{plan}

EVALUATION FEEDBACK (overall {score:.1}/10):
{breakdown}
Key Issues: {issues}
Improvement Suggestions: {suggestions}

Rewrite the plan so it addresses the issues and implements the suggestions.
Keep every section heading exactly as in the original plan and keep the allocation percentages and amounts unchanged.

Provide the improved financial plan:
"#,
        profile = profile_block(profile),
        plan = render_plan(plan),
        score = evaluation.score,
        breakdown = breakdown,
        issues = evaluation.key_issues.join(", "),
        suggestions = evaluation.suggestions.join(", "),
    )
}
