//! Deterministic section synthesis
//!
//! Builds every narrative section from the risk assessment, allocation and
//! profile alone. Used when the draft is missing a section or the draft
//! never arrived.

use crate::models::{
    AllocationWeights, AssetClass, ComplianceFlag, GoalRiskMitigation, Position, RiskAssessment,
    RiskCategory, RiskNarrative, RiskTolerance, TimeHorizonNarrative, UserProfile,
};
use crate::parser::goals::GoalKind;
use crate::projection::{format_money, FinancialMetrics};
use crate::risk;

/// Inputs shared by every synthesis function
pub struct PlanContext<'a> {
    pub profile: &'a UserProfile,
    pub risk: &'a RiskAssessment,
    pub allocation: &'a AllocationWeights,
    pub metrics: &'a FinancialMetrics,
}

pub fn executive_summary(ctx: &PlanContext<'_>) -> String {
    let profile = ctx.profile;
    let currency = &profile.currency;
    let m = ctx.metrics;

    let mut summary = format!(
        "At age {} with {} years until retirement at {}, your risk profile scores {:.1}/10 ({}). \
         The recommended portfolio invests {} {} per month across {} holdings with a blended \
         expected return of {:.1}% and volatility of {:.1}%.",
        profile.age,
        m.investment_horizon_years,
        profile.retirement_age,
        ctx.risk.score,
        ctx.risk.category,
        currency,
        format_money(profile.investable_per_month()),
        ctx.allocation.positions.len(),
        ctx.allocation.expected_return * 100.0,
        ctx.allocation.volatility() * 100.0,
    );

    if m.on_track {
        summary.push_str(&format!(
            " Projected savings of {} {} cover the estimated retirement need of {} {}.",
            currency,
            format_money(m.projected_accumulation),
            currency,
            format_money(m.retirement_corpus_needed),
        ));
    } else {
        summary.push_str(&format!(
            " Reaching the estimated retirement need of {} {} requires an additional {} {} per month.",
            currency,
            format_money(m.retirement_corpus_needed),
            currency,
            format_money(m.additional_monthly_needed),
        ));
    }

    summary
}

pub fn recommendation_rationale(position: &Position, ctx: &PlanContext<'_>) -> String {
    let role = match position.asset_class {
        AssetClass::Equity => "Provides long-term growth",
        AssetClass::FixedIncome => "Stabilizes the portfolio and provides income",
        AssetClass::RealEstate => "Adds real-asset diversification and rental-linked income",
        AssetClass::Commodity => "Hedges against inflation and equity drawdowns",
        AssetClass::Cash => "Keeps a liquidity reserve",
        AssetClass::Other => "Diversifies the core holdings",
    };

    format!(
        "{} ({}, risk {}/10). {} for a {} profile; {:.1}% of the portfolio at an expected {:.1}% annual return.",
        position.name,
        position.asset_class,
        position.risk_level,
        role,
        ctx.risk.category,
        position.weight * 100.0,
        position.expected_return * 100.0,
    )
}

pub fn risk_narrative(profile: &UserProfile, assessment: &RiskAssessment) -> RiskNarrative {
    let (description, suitability, focus) = match assessment.category {
        RiskCategory::Conservative => (
            "Capital preservation focused with minimal volatility",
            "Investors prioritizing stability over growth",
            "Bonds, fixed deposits, and stable value funds",
        ),
        RiskCategory::ModerateConservative => (
            "Stability first with a measured allocation to growth assets",
            "Investors who want modest growth with limited drawdowns",
            "Mostly bonds and sukuk with a minority equity sleeve",
        ),
        RiskCategory::Moderate => (
            "Balanced approach between growth and stability",
            "Long-term investors comfortable with market fluctuations",
            "Mix of stocks, bonds, and alternative investments",
        ),
        RiskCategory::ModerateAggressive => (
            "Growth-oriented with a defensive fixed income sleeve",
            "Investors with long horizons who can tolerate sizeable swings",
            "Equities and real estate with supporting bond exposure",
        ),
        RiskCategory::Aggressive => (
            "Growth-focused with higher volatility tolerance",
            "Young investors with long investment horizons",
            "Growth stocks, emerging markets, and high-yield investments",
        ),
    };

    let horizon = assessment.time_horizon_years;
    let tolerance = if horizon > 15 { "higher" } else { "moderate" };
    let recovery = if profile.age < 40 {
        "ample"
    } else if profile.age < 50 {
        "sufficient"
    } else {
        "limited"
    };

    RiskNarrative {
        risk_level: format!("{} Risk ({:.1}/10)", assessment.category, assessment.score),
        description: description.to_string(),
        suitability: suitability.to_string(),
        allocation_focus: focus.to_string(),
        time_factor: format!(
            "With {} years to invest, {} risk tolerance is appropriate",
            horizon, tolerance
        ),
        age_factor: format!(
            "At age {}, you have {} time to recover from market downturns",
            profile.age, recovery
        ),
    }
}

pub fn time_horizon(profile: &UserProfile, horizon: u32) -> TimeHorizonNarrative {
    let (category, strategy, flexibility) = if horizon >= 25 {
        (
            "Long-term",
            "Growth-focused strategy with equity emphasis",
            "High flexibility to weather market cycles",
        )
    } else if horizon >= 15 {
        (
            "Medium-term",
            "Balanced growth and income strategy",
            "Moderate flexibility with some risk management",
        )
    } else {
        (
            "Short-term",
            "Conservative income-focused strategy",
            "Limited flexibility, capital preservation priority",
        )
    };

    let milestones = if horizon > 15 {
        vec![
            "Years 1-5: Build emergency fund and establish investment routine".to_string(),
            "Years 6-15: Accumulate wealth and optimize portfolio allocation".to_string(),
            format!("Years 16-{}: Maximize growth and prepare for retirement", horizon),
        ]
    } else if horizon > 5 {
        vec![
            "Years 1-5: Build emergency fund and establish investment routine".to_string(),
            format!(
                "Years 6-{}: Consolidate gains and shift toward capital preservation",
                horizon
            ),
        ]
    } else {
        vec![format!(
            "Years 1-{}: Preserve capital and keep funds accessible",
            horizon.max(1)
        )]
    };

    TimeHorizonNarrative {
        horizon_years: horizon,
        category: format!("{} ({} years)", category, horizon),
        strategy: strategy.to_string(),
        flexibility: flexibility.to_string(),
        milestones,
        retirement_readiness: format!(
            "Target retirement at age {} with {} years of wealth accumulation",
            profile.retirement_age, horizon
        ),
        summary: format!("{} horizon of {} years: {}", category, horizon, strategy),
    }
}

pub fn goal_risks(profile: &UserProfile) -> Vec<GoalRiskMitigation> {
    profile
        .goals_or_default()
        .iter()
        .map(|goal| GoalKind::classify(goal).canned(goal))
        .collect()
}

pub fn advice(profile: &UserProfile, assessment: &RiskAssessment) -> Vec<String> {
    let mut lines: Vec<String> = [
        "Review and rebalance your portfolio quarterly to maintain target allocation",
        "Increase monthly investments by 5-10% annually as income grows",
        "Maintain an emergency fund covering 3-6 months of expenses",
        "Consider tax-advantaged accounts for retirement savings",
        "Monitor market conditions and adjust strategy during major economic shifts",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    if profile.requires(ComplianceFlag::Sharia) {
        lines.push("Ensure all investments maintain Sharia compliance through regular screening".to_string());
    }

    if profile.age < 40 {
        lines.push("Take advantage of long investment horizon with growth-focused allocations".to_string());
    } else if profile.age > 50 {
        lines.push("Begin gradual shift towards more conservative investments".to_string());
    }

    match profile.risk_tolerance {
        RiskTolerance::Conservative => lines.push(
            "Focus on capital preservation with stable, income-generating investments".to_string(),
        ),
        RiskTolerance::Aggressive => lines.push(
            "Maximize growth potential while maintaining appropriate diversification".to_string(),
        ),
        RiskTolerance::Moderate => {}
    }

    for line in risk::guidance(assessment.category, profile) {
        if !lines.contains(&line) {
            lines.push(line);
        }
    }

    lines
}

pub fn compliance_notes(profile: &UserProfile, allocation: &AllocationWeights) -> String {
    let mut notes = Vec::new();

    if profile.requires(ComplianceFlag::Sharia) {
        notes.push(
            "All recommended holdings are screened for Sharia compliance; confirm screening status at each review."
                .to_string(),
        );
    }
    if profile.requires(ComplianceFlag::Esg) {
        notes.push("Holdings are restricted to instruments carrying an ESG screen.".to_string());
    }
    if profile.compliance.is_empty() {
        notes.push("No faith-based or ESG screening was requested.".to_string());
    }

    notes.push(format!(
        "Instruments are drawn from {} markets.",
        profile.markets_label()
    ));

    if let Some(reason) = &allocation.fallback_reason {
        notes.push(format!(
            "The allocation was produced by a fallback method ({}); review it before acting.",
            reason
        ));
    }

    notes.push(
        "Figures are projections based on assumed returns and are not guaranteed. \
         This plan is informational and does not replace personalized advice from a licensed adviser."
            .to_string(),
    );

    notes.join(" ")
}
