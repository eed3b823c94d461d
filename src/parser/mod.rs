//! Plan parser
//!
//! Turns free-form draft text into a typed `Plan`. Each section is either
//! extracted from its labeled block or synthesized; parsing never fails.
//! Recommendation numbers always come from the allocation, never from text.

pub mod goals;
pub mod sections;
pub mod synthesis;

use crate::config::PipelineConfig;
use crate::models::{
    AllocationWeights, GoalRiskMitigation, Plan, PlanMetadata, PipelineStage, Position,
    QualityMetadata, Recommendation, RiskAssessment, RiskNarrative, SectionKind,
    TimeHorizonNarrative, UserProfile,
};
use crate::projection::{future_value, Projections};
use chrono::Utc;
use goals::{same_goal, GoalKind};
use sections::{collapse, field_value, list_item, meaningful, split_sections, strip_bullet, MIN_CONTENT_CHARS};
use std::collections::BTreeMap;
use synthesis::PlanContext;
use tracing::{debug, info};
use uuid::Uuid;

pub use sections::SECTION_TABLE;

/// Origin of a parsed section
#[derive(Debug, Clone, PartialEq)]
enum Sourced<T> {
    Extracted(T),
    Synthesized(T),
}

impl<T> Sourced<T> {
    fn resolve(extracted: Option<T>, synthesize: impl FnOnce() -> T) -> Self {
        match extracted {
            Some(value) => Sourced::Extracted(value),
            None => Sourced::Synthesized(synthesize()),
        }
    }

    fn is_synthesized(&self) -> bool {
        matches!(self, Sourced::Synthesized(_))
    }

    fn into_inner(self) -> T {
        match self {
            Sourced::Extracted(value) | Sourced::Synthesized(value) => value,
        }
    }
}

/// Records which sections had to be synthesized
#[derive(Default)]
struct Tally {
    synthesized: Vec<SectionKind>,
}

impl Tally {
    fn take<T>(&mut self, kind: SectionKind, sourced: Sourced<T>) -> T {
        if sourced.is_synthesized() {
            self.synthesized.push(kind);
        }
        sourced.into_inner()
    }
}

#[derive(Debug, Clone)]
pub struct ParseOutcome {
    pub plan: Plan,
    pub synthesized: Vec<SectionKind>,
}

impl ParseOutcome {
    pub fn is_degraded(&self) -> bool {
        !self.synthesized.is_empty()
    }
}

pub struct PlanParser {
    projections: Projections,
    threshold: f64,
}

impl PlanParser {
    pub fn new(projections: Projections, threshold: f64) -> Self {
        Self {
            projections,
            threshold,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(Projections::from_config(config), config.improvement_threshold)
    }

    /// Build a plan with every section synthesized
    pub fn synthesize(
        &self,
        profile: &UserProfile,
        risk: &RiskAssessment,
        allocation: &AllocationWeights,
    ) -> ParseOutcome {
        self.parse("", profile, risk, allocation)
    }

    pub fn parse(
        &self,
        raw: &str,
        profile: &UserProfile,
        risk: &RiskAssessment,
        allocation: &AllocationWeights,
    ) -> ParseOutcome {
        let blocks = split_sections(raw);
        let block = |kind: SectionKind| meaningful(blocks.get(&kind));
        debug!(labeled_blocks = blocks.len(), "Split draft into sections");

        let metrics = self.projections.metrics(profile);
        let horizon = risk.time_horizon_years;
        let ctx = PlanContext {
            profile,
            risk,
            allocation,
            metrics: &metrics,
        };
        let mut tally = Tally::default();

        let executive_summary = tally.take(
            SectionKind::ExecutiveSummary,
            Sourced::resolve(block(SectionKind::ExecutiveSummary).map(collapse), || {
                synthesis::executive_summary(&ctx)
            }),
        );

        let rationales = tally.take(
            SectionKind::Recommendations,
            Sourced::resolve(
                block(SectionKind::Recommendations).and_then(|b| extract_rationales(b, allocation)),
                BTreeMap::new,
            ),
        );
        let recommendations = build_recommendations(&ctx, &rationales);

        let risk_narrative = tally.take(
            SectionKind::RiskAssessment,
            Sourced::resolve(
                block(SectionKind::RiskAssessment)
                    .map(|b| extract_risk_narrative(b, synthesis::risk_narrative(profile, risk))),
                || synthesis::risk_narrative(profile, risk),
            ),
        );

        let time_horizon = tally.take(
            SectionKind::TimeHorizon,
            Sourced::resolve(
                block(SectionKind::TimeHorizon)
                    .map(|b| extract_time_horizon(b, synthesis::time_horizon(profile, horizon))),
                || synthesis::time_horizon(profile, horizon),
            ),
        );

        let goal_risks = tally.take(
            SectionKind::GoalRisks,
            Sourced::resolve(
                block(SectionKind::GoalRisks).and_then(extract_goal_risks),
                Vec::new,
            ),
        );
        let goal_risks = merge_goal_risks(goal_risks, profile);

        let advice = tally.take(
            SectionKind::AdditionalAdvice,
            Sourced::resolve(block(SectionKind::AdditionalAdvice).and_then(extract_advice), || {
                synthesis::advice(profile, risk)
            }),
        );

        let compliance_notes = tally.take(
            SectionKind::ComplianceNotes,
            Sourced::resolve(block(SectionKind::ComplianceNotes).map(collapse), || {
                synthesis::compliance_notes(profile, allocation)
            }),
        );

        let goal_timeline: BTreeMap<String, u32> = profile
            .goals_or_default()
            .into_iter()
            .map(|goal| {
                let years = GoalKind::classify(&goal).timeline_years(horizon);
                (goal, years)
            })
            .collect();

        let investable = profile.investable_per_month();
        let projected_wealth = future_value(
            profile.current_savings,
            investable,
            allocation.expected_return,
            horizon,
        );
        let monthly_savings_target = investable + metrics.additional_monthly_needed;

        let synthesized = tally.synthesized;
        info!(
            synthesized = synthesized.len(),
            recommendations = recommendations.len(),
            "Parsed plan"
        );

        let plan = Plan {
            profile: profile.clone(),
            executive_summary,
            recommendations,
            allocation_by_class: allocation.by_asset_class(),
            risk_assessment: risk.clone(),
            risk_narrative,
            time_horizon,
            expected_return: allocation.expected_return,
            projected_wealth,
            monthly_savings_target,
            financial_metrics: metrics.clone(),
            goal_timeline,
            goal_risks,
            advice,
            compliance_notes,
            metadata: PlanMetadata {
                plan_id: Uuid::new_v4(),
                generated_at: Utc::now(),
                degraded: !synthesized.is_empty(),
                synthesized_sections: synthesized.clone(),
                degradations: Vec::new(),
                allocation_method: allocation.method,
                final_stage: PipelineStage::Parsing,
                stage_trace: Vec::new(),
                reasoning_trace: Vec::new(),
                quality: QualityMetadata::not_used(self.threshold, "not evaluated"),
            },
        };

        ParseOutcome { plan, synthesized }
    }
}

//
// ================= Recommendations =================
//

fn build_recommendations(
    ctx: &PlanContext<'_>,
    rationales: &BTreeMap<String, String>,
) -> Vec<Recommendation> {
    let investable = ctx.profile.investable_per_month();

    ctx.allocation
        .positions
        .iter()
        .map(|p| Recommendation {
            symbol: p.symbol.clone(),
            name: p.name.clone(),
            asset_class: p.asset_class,
            allocation_pct: p.weight * 100.0,
            monthly_amount: p.weight * investable,
            expected_return: p.expected_return,
            risk_level: p.risk_level,
            rationale: rationales
                .get(&p.symbol)
                .cloned()
                .unwrap_or_else(|| synthesis::recommendation_rationale(p, ctx)),
        })
        .collect()
}

const NUMERIC_FIELDS: &[&str] = &[
    "allocation",
    "weight",
    "amount",
    "investment amount",
    "monthly amount",
    "monthly investment",
    "expected return",
    "return",
    "risk level",
    "percentage",
];

fn mentions(text: &str, position: &Position) -> bool {
    let by_symbol = text
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|token| token == position.symbol);

    by_symbol
        || (position.name.len() >= 4
            && text.to_lowercase().contains(&position.name.to_lowercase()))
}

/// Rationale text per symbol, keyed by the position each line group names
fn extract_rationales(
    block: &str,
    allocation: &AllocationWeights,
) -> Option<BTreeMap<String, String>> {
    let mut groups: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    let mut current: Option<&str> = None;

    for line in block.lines() {
        let text = strip_bullet(line);
        if text.is_empty() {
            continue;
        }
        if let Some(position) = allocation.positions.iter().find(|p| mentions(text, p)) {
            current = Some(position.symbol.as_str());
        }
        if let Some(symbol) = current {
            groups.entry(symbol).or_default().push(text);
        }
    }

    let rationales: BTreeMap<String, String> = allocation
        .positions
        .iter()
        .filter_map(|p| {
            let lines = groups.get(p.symbol.as_str())?;
            rationale_from(lines, p).map(|r| (p.symbol.clone(), r))
        })
        .collect();

    if rationales.is_empty() {
        None
    } else {
        Some(rationales)
    }
}

fn rationale_from(lines: &[&str], position: &Position) -> Option<String> {
    for line in lines {
        if let Some(value) = field_value(line, &["rationale", "reason", "why"]) {
            return Some(value.to_string());
        }
    }

    let prose: Vec<String> = lines.iter().filter_map(|l| prose_part(l, position)).collect();
    let joined = prose.join(" ");

    if joined.chars().filter(|c| !c.is_whitespace()).count() >= MIN_CONTENT_CHARS {
        Some(joined)
    } else {
        None
    }
}

/// The descriptive part of a line, or `None` for numeric fields
fn prose_part(line: &str, position: &Position) -> Option<String> {
    if let Some((key, _)) = line.split_once(':') {
        let key = key.trim().trim_matches('*').trim().to_lowercase();
        if NUMERIC_FIELDS.iter().any(|f| key == *f) {
            return None;
        }
    }

    let cleaned = line.replace(&position.symbol, "").replace(&position.name, "");
    let cleaned = cleaned.trim_matches(|c: char| {
        c.is_whitespace()
            || c.is_ascii_digit()
            || matches!(c, '-' | ':' | '.' | ')' | '(' | '*' | '|' | ',' | '–' | '—')
    });

    let letters = cleaned.chars().filter(|c| c.is_alphabetic()).count();
    let digits = cleaned.chars().filter(|c| c.is_ascii_digit()).count();

    if letters < 12 || digits * 2 > letters {
        None
    } else {
        Some(cleaned.to_string())
    }
}

//
// ================= Narrative Sections =================
//

fn extract_risk_narrative(block: &str, defaults: RiskNarrative) -> RiskNarrative {
    let mut narrative = defaults;
    let mut found = false;

    for line in block.lines() {
        if let Some(v) = field_value(line, &["risk level"]) {
            narrative.risk_level = v.to_string();
        } else if let Some(v) = field_value(line, &["description"]) {
            narrative.description = v.to_string();
        } else if let Some(v) = field_value(line, &["suitability", "suitable for"]) {
            narrative.suitability = v.to_string();
        } else if let Some(v) = field_value(line, &["allocation focus", "focus"]) {
            narrative.allocation_focus = v.to_string();
        } else if let Some(v) = field_value(line, &["time factor"]) {
            narrative.time_factor = v.to_string();
        } else if let Some(v) = field_value(line, &["age factor"]) {
            narrative.age_factor = v.to_string();
        } else {
            continue;
        }
        found = true;
    }

    if !found {
        narrative.description = collapse(block);
    }
    narrative
}

fn extract_time_horizon(block: &str, defaults: TimeHorizonNarrative) -> TimeHorizonNarrative {
    let mut narrative = defaults;
    let mut found = false;
    let mut milestones: Vec<String> = Vec::new();
    let mut in_milestones = false;

    for line in block.lines() {
        let text = strip_bullet(line);
        let lowered = text.to_lowercase();

        if let Some(v) = field_value(line, &["horizon category", "category"]) {
            narrative.category = v.to_string();
        } else if let Some(v) = field_value(line, &["strategy", "investment strategy"]) {
            narrative.strategy = v.to_string();
        } else if let Some(v) = field_value(line, &["flexibility"]) {
            narrative.flexibility = v.to_string();
        } else if let Some(v) = field_value(line, &["retirement readiness"]) {
            narrative.retirement_readiness = v.to_string();
        } else if lowered.starts_with("milestones") {
            in_milestones = true;
            continue;
        } else {
            let is_year_line = lowered.starts_with("year") && text.contains(':');
            if is_year_line || (in_milestones && list_item(line).is_some()) {
                if !milestones.iter().any(|m| m == text) {
                    milestones.push(text.to_string());
                }
                found = true;
            }
            continue;
        }

        in_milestones = false;
        found = true;
    }

    if !milestones.is_empty() {
        narrative.milestones = milestones;
    }
    if !found {
        narrative.summary = collapse(block);
    }
    narrative
}

#[derive(Clone, Copy)]
enum GoalListMode {
    Risks,
    Mitigations,
}

fn extract_goal_risks(block: &str) -> Option<Vec<GoalRiskMitigation>> {
    let mut goals: Vec<GoalRiskMitigation> = Vec::new();
    let mut current: Option<GoalRiskMitigation> = None;
    let mut mode: Option<GoalListMode> = None;

    for line in block.lines() {
        if let Some(name) = field_value(line, &["goal name", "goal"]) {
            goals.extend(current.take());
            current = Some(GoalRiskMitigation {
                goal: name.to_string(),
                risks: Vec::new(),
                mitigations: Vec::new(),
            });
            mode = None;
            continue;
        }

        let text = strip_bullet(line);
        let lowered = text.to_lowercase();
        let switched = if lowered.starts_with("potential risks") || lowered.starts_with("risks") {
            Some(GoalListMode::Risks)
        } else if lowered.starts_with("mitigation") {
            Some(GoalListMode::Mitigations)
        } else {
            None
        };

        if let Some(new_mode) = switched {
            mode = Some(new_mode);
            continue;
        }

        let (Some(goal), Some(mode), Some(item)) = (current.as_mut(), mode, list_item(line)) else {
            continue;
        };
        match mode {
            GoalListMode::Risks => goal.risks.push(item.to_string()),
            GoalListMode::Mitigations => goal.mitigations.push(item.to_string()),
        }
    }
    goals.extend(current);

    goals.retain(|g| !g.risks.is_empty() || !g.mitigations.is_empty());
    for goal in &mut goals {
        if goal.risks.is_empty() {
            goal.risks = vec!["Market uncertainty".to_string(), "Timeline constraints".to_string()];
        }
        if goal.mitigations.is_empty() {
            goal.mitigations = vec!["Regular monitoring".to_string(), "Flexible strategy".to_string()];
        }
    }

    if goals.is_empty() {
        None
    } else {
        Some(goals)
    }
}

/// Add canned entries for profile goals the draft did not cover
fn merge_goal_risks(
    mut drafted: Vec<GoalRiskMitigation>,
    profile: &UserProfile,
) -> Vec<GoalRiskMitigation> {
    for goal in profile.goals_or_default() {
        if !drafted.iter().any(|d| same_goal(&d.goal, &goal)) {
            drafted.push(GoalKind::classify(&goal).canned(&goal));
        }
    }
    drafted
}

fn extract_advice(block: &str) -> Option<Vec<String>> {
    let bullets: Vec<String> = block
        .lines()
        .filter_map(list_item)
        .filter(|item| item.chars().count() > 10)
        .map(str::to_string)
        .collect();

    if !bullets.is_empty() {
        return Some(bullets);
    }

    let sentences: Vec<String> = collapse(block)
        .split('.')
        .map(str::trim)
        .filter(|s| s.chars().count() > 20)
        .map(|s| format!("{}.", s))
        .collect();

    if sentences.is_empty() {
        None
    } else {
        Some(sentences)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AllocationMethod, AssetClass, Market, RiskTolerance};
    use crate::risk::RiskProfiler;
    use std::collections::BTreeSet;

    fn profile() -> UserProfile {
        UserProfile {
            age: 28,
            retirement_age: 65,
            annual_income: 80_000.0,
            annual_expenses: 50_000.0,
            current_savings: 5_000.0,
            monthly_investable: None,
            risk_tolerance: RiskTolerance::Moderate,
            goals: vec!["Retirement".to_string(), "Buy a house".to_string()],
            compliance: BTreeSet::new(),
            preferred_markets: vec![Market::Uae],
            currency: "AED".to_string(),
            experience: None,
        }
    }

    fn position(symbol: &str, name: &str, class: AssetClass, weight: f64) -> Position {
        Position {
            symbol: symbol.to_string(),
            name: name.to_string(),
            asset_class: class,
            expected_return: 0.07,
            risk_level: 5,
            weight,
        }
    }

    fn allocation() -> AllocationWeights {
        AllocationWeights {
            positions: vec![
                position("UAEETF", "UAE Equity ETF", AssetClass::Equity, 0.5),
                position("SUKUK5Y", "UAE Sukuk 5Y", AssetClass::FixedIncome, 0.3),
                position("EMAAR", "Emaar Properties", AssetClass::RealEstate, 0.2),
            ],
            method: AllocationMethod::MeanVariance,
            fallback_reason: None,
            expected_return: 0.07,
            variance: 0.015,
            within_risk_budget: true,
        }
    }

    fn assert_weights_match(plan: &Plan, allocation: &AllocationWeights) {
        let carried = plan.weights();
        assert_eq!(carried.len(), allocation.positions.len());
        for (symbol, weight) in allocation.weights() {
            assert!((carried[&symbol] - weight).abs() < 1e-12);
        }
    }

    fn parser() -> PlanParser {
        PlanParser::new(Projections::new(0.08, 25), 8.0)
    }

    const DRAFT: &str = "\
Here is your personalized plan.

1. EXECUTIVE SUMMARY
You are well placed to retire comfortably if you keep investing consistently.

2. PORTFOLIO RECOMMENDATIONS
- UAEETF: 45% allocation
  Rationale: Core exposure to the UAE equity market at low cost
- SUKUK5Y (UAE Sukuk 5Y)
  Allocation: 35%
  Provides steady coupon income and dampens equity swings
- EMAAR: 20%

3. RISK ASSESSMENT
Risk Level: Moderate (6.8/10)
Description: Balanced growth with controlled drawdowns
Suitable for: Long-term savers

4. TIME HORIZON ANALYSIS
Horizon Category: Long-term
Milestones:
- Years 1-10: Build the core portfolio
- Years 11-37: Compound and de-risk gradually

5. MONTHLY SAVINGS NEEDED
AED 9,999 per month

7. GOAL RISKS AND MITIGATION
Goal Name: Retirement
Potential Risks:
- Inflation eroding savings
Mitigation Strategies:
- Hold inflation-linked assets

8. ADDITIONAL ADVICE
- Rebalance the portfolio every quarter
- Keep six months of expenses in cash
- ok

9. COMPLIANCE NOTES
This plan is informational and not a solicitation.
";

    #[test]
    fn test_parse_extracts_labeled_sections() {
        let p = profile();
        let risk = RiskProfiler::default().assess(&p);
        let outcome = parser().parse(DRAFT, &p, &risk, &allocation());
        let plan = &outcome.plan;

        assert_eq!(
            plan.executive_summary,
            "You are well placed to retire comfortably if you keep investing consistently."
        );
        assert_eq!(plan.risk_narrative.risk_level, "Moderate (6.8/10)");
        assert_eq!(plan.risk_narrative.suitability, "Long-term savers");
        assert_eq!(plan.time_horizon.category, "Long-term");
        assert_eq!(plan.time_horizon.milestones.len(), 2);
        assert_eq!(plan.advice.len(), 2);
        assert_eq!(
            plan.compliance_notes,
            "This plan is informational and not a solicitation."
        );
        assert!(outcome.synthesized.is_empty());
        assert!(!plan.metadata.degraded);
    }

    #[test]
    fn test_recommendation_numbers_come_from_weights() {
        let p = profile();
        let risk = RiskProfiler::default().assess(&p);
        let plan = parser().parse(DRAFT, &p, &risk, &allocation()).plan;

        // The draft says 45% / 35%; the allocation wins
        assert_eq!(plan.recommendations.len(), 3);
        assert_eq!(plan.recommendations[0].symbol, "UAEETF");
        assert!((plan.recommendations[0].allocation_pct - 50.0).abs() < 1e-9);
        assert!((plan.recommendations[0].monthly_amount - 1_250.0).abs() < 1e-9);
        assert!((plan.recommendations[1].allocation_pct - 30.0).abs() < 1e-9);

        assert_eq!(
            plan.recommendations[0].rationale,
            "Core exposure to the UAE equity market at low cost"
        );
        assert_eq!(
            plan.recommendations[1].rationale,
            "Provides steady coupon income and dampens equity swings"
        );
        // "EMAAR: 20%" carries no prose
        assert!(plan.recommendations[2].rationale.starts_with("Emaar Properties (Real Estate"));
        assert_weights_match(&plan, &allocation());
    }

    #[test]
    fn test_goal_risks_merge_profile_goals() {
        let p = profile();
        let risk = RiskProfiler::default().assess(&p);
        let plan = parser().parse(DRAFT, &p, &risk, &allocation()).plan;

        assert_eq!(plan.goal_risks.len(), 2);
        assert_eq!(plan.goal_risks[0].goal, "Retirement");
        assert_eq!(plan.goal_risks[0].risks, vec!["Inflation eroding savings"]);
        assert_eq!(plan.goal_risks[1].goal, "Buy a house");
        assert_eq!(plan.goal_risks[1].risks.len(), 4);

        assert_eq!(plan.goal_timeline.get("Retirement"), Some(&37));
        assert_eq!(plan.goal_timeline.get("Buy a house"), Some(&10));
    }

    #[test]
    fn test_empty_draft_is_fully_synthesized() {
        let p = profile();
        let risk = RiskProfiler::default().assess(&p);
        let alloc = allocation();
        let outcome = parser().synthesize(&p, &risk, &alloc);

        assert_eq!(outcome.synthesized.len(), 7);
        assert!(outcome.plan.metadata.degraded);
        assert_eq!(outcome.plan.metadata.synthesized_sections, outcome.synthesized);
        assert_weights_match(&outcome.plan, &alloc);
        assert!(!outcome.plan.executive_summary.is_empty());
        assert!(!outcome.plan.advice.is_empty());
    }

    #[test]
    fn test_missing_section_is_synthesized() {
        let p = profile();
        let risk = RiskProfiler::default().assess(&p);
        let draft = "EXECUTIVE SUMMARY\nA concise overview of the plan ahead.\nCOMPLIANCE NOTES\nshort";
        let outcome = parser().parse(draft, &p, &risk, &allocation());

        assert!(!outcome.synthesized.contains(&SectionKind::ExecutiveSummary));
        assert!(outcome.synthesized.contains(&SectionKind::ComplianceNotes));
        assert!(outcome.synthesized.contains(&SectionKind::Recommendations));
        assert!(outcome.is_degraded());
    }

    #[test]
    fn test_advice_falls_back_to_sentences() {
        let advice = extract_advice(
            "Keep investing every month without fail. Review. Increase contributions when your salary rises.",
        )
        .unwrap();
        assert_eq!(advice.len(), 2);
        assert_eq!(advice[0], "Keep investing every month without fail.");
    }

    #[test]
    fn test_goal_with_one_sided_lists_is_filled() {
        let goals = extract_goal_risks(
            "Goal: Education\nRisks:\n- Tuition inflation\n",
        )
        .unwrap();
        assert_eq!(goals[0].goal, "Education");
        assert_eq!(goals[0].mitigations, vec!["Regular monitoring", "Flexible strategy"]);
    }

    #[test]
    fn test_sourced_tally() {
        let mut tally = Tally::default();
        let a = tally.take(SectionKind::ExecutiveSummary, Sourced::resolve(Some(1), || 2));
        let b = tally.take(SectionKind::AdditionalAdvice, Sourced::resolve(None, || 2));
        assert_eq!((a, b), (1, 2));
        assert_eq!(tally.synthesized, vec![SectionKind::AdditionalAdvice]);
    }
}
