//! Plan drafter
//!
//! Builds the draft prompt from the profile, risk assessment, allocation and
//! retrieved context, then makes one bounded call to the drafting backend.

use crate::backend::{generate_within, GenerationBackend};
use crate::config::PipelineConfig;
use crate::models::{AllocationWeights, RiskAssessment, SectionKind, UserProfile};
use crate::parser::SECTION_TABLE;
use crate::projection::{format_money, Projections};
use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub struct PlanDrafter {
    backend: Arc<dyn GenerationBackend>,
    timeout: Duration,
    projections: Projections,
}

impl PlanDrafter {
    pub fn new(backend: Arc<dyn GenerationBackend>, timeout: Duration, projections: Projections) -> Self {
        Self {
            backend,
            timeout,
            projections,
        }
    }

    pub fn from_config(backend: Arc<dyn GenerationBackend>, config: &PipelineConfig) -> Self {
        Self::new(backend, config.draft_timeout, Projections::from_config(config))
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// One generation call; no retries at this level
    pub async fn draft(
        &self,
        profile: &UserProfile,
        risk: &RiskAssessment,
        allocation: &AllocationWeights,
        context: &[String],
    ) -> Result<String> {
        let prompt = self.build_prompt(profile, risk, allocation, context);

        info!(
            backend = self.backend.name(),
            prompt_chars = prompt.len(),
            snippets = context.len(),
            "Drafting plan"
        );

        generate_within(self.backend.as_ref(), &prompt, self.timeout).await
    }

    /// Deterministic: same inputs, same prompt
    pub fn build_prompt(
        &self,
        profile: &UserProfile,
        risk: &RiskAssessment,
        allocation: &AllocationWeights,
        context: &[String],
    ) -> String {
        let metrics = self.projections.metrics(profile);
        let currency = &profile.currency;
        let investable = profile.investable_per_month();

        let goals = profile.goals_or_default().join(", ");
        let compliance = if profile.compliance.is_empty() {
            "None".to_string()
        } else {
            profile
                .compliance
                .iter()
                .map(|c| c.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        };
        let experience = profile
            .experience
            .map(|e| e.to_string())
            .unwrap_or_else(|| "Not stated".to_string());

        let factors = risk
            .factors
            .iter()
            .map(|f| {
                format!(
                    "- {}: {:.2} (weight {:.2}, contribution {:.2})",
                    f.name, f.value, f.weight, f.contribution
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let holdings = allocation
            .positions
            .iter()
            .map(|p| {
                format!(
                    "- {} ({}, {}): {:.1}% = {} {}/month, expected return {:.1}%, risk {}/10",
                    p.symbol,
                    p.name,
                    p.asset_class,
                    p.weight * 100.0,
                    currency,
                    format_money(p.weight * investable),
                    p.expected_return * 100.0,
                    p.risk_level
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let snippets = if context.is_empty() {
            "- No additional market context available".to_string()
        } else {
            context
                .iter()
                .map(|s| format!("- {}", s.replace('\n', " ")))
                .collect::<Vec<_>>()
                .join("\n")
        };

        let structure = SECTION_TABLE
            .iter()
            .enumerate()
            .map(|(i, (label, kind))| format!("{}. {}\n   {}", i + 1, label, section_instructions(*kind)))
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            r#"You are an expert financial advisor. Write a comprehensive, personalized financial plan for the client below.

USER PROFILE:
- Age: {age}
- Retirement Age: {retirement_age}
- Annual Income: {currency} {income}
- Annual Expenses: {currency} {expenses}
- Current Savings: {currency} {savings}
- Risk Tolerance: {tolerance}
- Investment Experience: {experience}
- Investment Goals: {goals}
- Compliance Requirements: {compliance}
- Preferred Markets: {markets}

FINANCIAL ANALYSIS:
- Investment Horizon: {horizon} years
- Monthly Savings Capacity: {currency} {capacity}
- Annual Savings Rate: {rate:.1}%
- Monthly Investment: {currency} {investable}
- Retirement Corpus Needed: {currency} {corpus}
- Projected Accumulation: {currency} {accumulated}
- Additional Monthly Savings Needed: {currency} {additional}

RISK PROFILE:
- Score: {score:.1}/10 ({category})
{factors}

OPTIMIZED ALLOCATION ({method:?}, expected return {expected:.1}%, volatility {volatility:.1}%):
{holdings}

MARKET CONTEXT:
{snippets}

REQUIRED RESPONSE STRUCTURE:
Use exactly these section headings, in this order:
{structure}

Rules:
- Use the allocation percentages and amounts exactly as given
- Do not recommend instruments outside the allocation
- Be specific and reference the client's numbers
"#,
            age = profile.age,
            retirement_age = profile.retirement_age,
            currency = currency,
            income = format_money(profile.annual_income),
            expenses = format_money(profile.annual_expenses),
            savings = format_money(profile.current_savings),
            tolerance = profile.risk_tolerance,
            experience = experience,
            goals = goals,
            compliance = compliance,
            markets = profile.markets_label(),
            horizon = metrics.investment_horizon_years,
            capacity = format_money(metrics.monthly_savings_capacity),
            rate = metrics.savings_rate * 100.0,
            investable = format_money(investable),
            corpus = format_money(metrics.retirement_corpus_needed),
            accumulated = format_money(metrics.projected_accumulation),
            additional = format_money(metrics.additional_monthly_needed),
            score = risk.score,
            category = risk.category,
            factors = factors,
            method = allocation.method,
            expected = allocation.expected_return * 100.0,
            volatility = allocation.volatility() * 100.0,
            holdings = holdings,
            snippets = snippets,
            structure = structure,
        )
    }
}

fn section_instructions(kind: SectionKind) -> &'static str {
    match kind {
        SectionKind::ExecutiveSummary => "Two or three sentences on where the client stands and what the plan achieves.",
        SectionKind::Recommendations => {
            "One entry per holding: symbol, allocation %, monthly amount, expected return, and a line starting with \"Rationale:\"."
        }
        SectionKind::RiskAssessment => {
            "Lines for Risk Level:, Description:, Suitability:, Allocation Focus:, Time Factor:, Age Factor:"
        }
        SectionKind::TimeHorizon => {
            "Lines for Horizon Category:, Strategy:, Flexibility:, Retirement Readiness:, then Milestones: as bullets."
        }
        SectionKind::MonthlySavings => "The monthly amount required to stay on track.",
        SectionKind::GoalTimeline => "Years to reach each goal.",
        SectionKind::GoalRisks => {
            "For each goal: \"Goal Name:\", then \"Potential Risks:\" and \"Mitigation Strategies:\" as bullet lists."
        }
        SectionKind::AdditionalAdvice => "4-6 actionable bullet points.",
        SectionKind::ComplianceNotes => "Screening requirements and regulatory disclaimers.",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ScriptedBackend;
    use crate::error::PlanError;
    use crate::models::{AllocationMethod, AssetClass, Market, Position, RiskTolerance};
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
            goals: vec![],
            compliance: BTreeSet::new(),
            preferred_markets: vec![Market::Uae],
            currency: "AED".to_string(),
            experience: None,
        }
    }

    fn allocation() -> AllocationWeights {
        AllocationWeights {
            positions: vec![
                Position {
                    symbol: "UAEETF".to_string(),
                    name: "UAE Equity ETF".to_string(),
                    asset_class: AssetClass::Equity,
                    expected_return: 0.09,
                    risk_level: 6,
                    weight: 0.6,
                },
                Position {
                    symbol: "SUKUK5Y".to_string(),
                    name: "UAE Sukuk 5Y".to_string(),
                    asset_class: AssetClass::FixedIncome,
                    expected_return: 0.04,
                    risk_level: 3,
                    weight: 0.4,
                },
            ],
            method: AllocationMethod::MeanVariance,
            fallback_reason: None,
            expected_return: 0.07,
            variance: 0.01,
            within_risk_budget: true,
        }
    }

    fn drafter(backend: Arc<dyn GenerationBackend>, timeout: Duration) -> PlanDrafter {
        PlanDrafter::new(backend, timeout, Projections::new(0.08, 25))
    }

    #[test]
    fn test_prompt_lists_sections_in_order() {
        let p = profile();
        let risk = RiskProfiler::default().assess(&p);
        let d = drafter(Arc::new(ScriptedBackend::new("s")), Duration::from_secs(1));
        let prompt = d.build_prompt(&p, &risk, &allocation(), &[]);

        let mut last = 0;
        for (label, _) in SECTION_TABLE {
            let at = prompt.find(label).expect("label present");
            assert!(at >= last, "{} out of order", label);
            last = at;
        }

        assert!(prompt.contains("- UAEETF (UAE Equity ETF, Equity): 60.0% = AED 1,500/month"));
        assert!(prompt.contains("Investment Horizon: 37 years"));
        assert!(prompt.contains("No additional market context"));
    }

    #[test]
    fn test_prompt_is_deterministic() {
        let p = profile();
        let risk = RiskProfiler::default().assess(&p);
        let d = drafter(Arc::new(ScriptedBackend::new("s")), Duration::from_secs(1));
        let context = vec!["UAEETF tracks the UAE index".to_string()];

        assert_eq!(
            d.build_prompt(&p, &risk, &allocation(), &context),
            d.build_prompt(&p, &risk, &allocation(), &context)
        );
    }

    #[tokio::test]
    async fn test_draft_returns_backend_text() {
        let backend = Arc::new(ScriptedBackend::new("drafter").reply("EXECUTIVE SUMMARY\nAll good."));
        let p = profile();
        let risk = RiskProfiler::default().assess(&p);

        let text = drafter(backend.clone(), Duration::from_secs(1))
            .draft(&p, &risk, &allocation(), &[])
            .await
            .unwrap();

        assert!(text.starts_with("EXECUTIVE SUMMARY"));
        assert_eq!(backend.calls().await, 1);
        assert!(backend.prompts().await[0].contains("REQUIRED RESPONSE STRUCTURE"));
    }

    #[tokio::test]
    async fn test_draft_times_out() {
        let backend = Arc::new(ScriptedBackend::new("slow").stall());
        let p = profile();
        let risk = RiskProfiler::default().assess(&p);

        let result = drafter(backend, Duration::from_millis(20))
            .draft(&p, &risk, &allocation(), &[])
            .await;

        assert!(matches!(result, Err(PlanError::GenerationTimeout(_))));
    }
}
