//! Risk profiler
//!
//! Maps a validated profile to a 0-10 risk score and category.
//! Pure: no I/O, same profile in, same assessment out.

use crate::config::RiskWeights;
use crate::models::{
    ExperienceLevel, RiskAssessment, RiskCategory, RiskFactor, RiskTolerance, UserProfile,
};
use tracing::debug;

pub const FACTOR_AGE: &str = "age";
pub const FACTOR_TIME_HORIZON: &str = "time_horizon";
pub const FACTOR_INCOME_STABILITY: &str = "income_stability";
pub const FACTOR_EXPERIENCE: &str = "experience";
pub const FACTOR_STATED_TOLERANCE: &str = "stated_tolerance";

const MIN_AGE: f64 = 18.0;
const PEAK_RISK_AGE: f64 = 70.0;
const FULL_HORIZON_YEARS: f64 = 40.0;
const TARGET_SAVINGS_RATE: f64 = 0.5;
const TARGET_COVERAGE_MONTHS: f64 = 6.0;

pub struct RiskProfiler {
    weights: RiskWeights,
}

impl RiskProfiler {
    pub fn new(weights: RiskWeights) -> Self {
        Self { weights }
    }

    pub fn assess(&self, profile: &UserProfile) -> RiskAssessment {
        let horizon = profile.time_horizon_years();

        let raw = [
            (FACTOR_AGE, age_factor(profile.age), self.weights.age),
            (
                FACTOR_TIME_HORIZON,
                clamp_unit(horizon as f64 / FULL_HORIZON_YEARS),
                self.weights.time_horizon,
            ),
            (
                FACTOR_INCOME_STABILITY,
                income_stability(profile),
                self.weights.income_stability,
            ),
            (
                FACTOR_EXPERIENCE,
                experience_factor(profile.experience),
                self.weights.experience,
            ),
            (
                FACTOR_STATED_TOLERANCE,
                tolerance_factor(profile.risk_tolerance),
                self.weights.stated_tolerance,
            ),
        ];

        let factors: Vec<RiskFactor> = raw
            .iter()
            .map(|(name, value, weight)| RiskFactor {
                name: name.to_string(),
                value: *value,
                weight: *weight,
                contribution: value * weight,
            })
            .collect();

        let score = 10.0 * factors.iter().map(|f| f.contribution).sum::<f64>();
        let score = score.clamp(0.0, 10.0);
        let category = categorize(score);

        debug!(score, category = %category, horizon, "Risk profile assessed");

        RiskAssessment {
            score,
            category,
            time_horizon_years: horizon,
            factors,
            risk_budget: category.risk_budget(),
        }
    }
}

impl Default for RiskProfiler {
    fn default() -> Self {
        Self::new(RiskWeights::default())
    }
}

/// Score bands
pub fn categorize(score: f64) -> RiskCategory {
    if score < 3.0 {
        RiskCategory::Conservative
    } else if score < 4.5 {
        RiskCategory::ModerateConservative
    } else if score < 7.0 {
        RiskCategory::Moderate
    } else if score < 8.5 {
        RiskCategory::ModerateAggressive
    } else {
        RiskCategory::Aggressive
    }
}

/// Model split and behavioural guidance for a category
pub fn guidance(category: RiskCategory, profile: &UserProfile) -> Vec<String> {
    let (split, focus) = match category {
        RiskCategory::Conservative => (
            "20% Stocks, 70% Bonds, 10% Cash",
            "Focus on capital preservation and steady income",
        ),
        RiskCategory::ModerateConservative => (
            "35% Stocks, 60% Bonds, 5% Cash",
            "Emphasize stability with modest growth potential",
        ),
        RiskCategory::Moderate => (
            "50% Stocks, 45% Bonds, 5% Cash",
            "Balanced approach between growth and stability",
        ),
        RiskCategory::ModerateAggressive => (
            "70% Stocks, 25% Bonds, 5% Cash",
            "Growth-focused with some defensive positions",
        ),
        RiskCategory::Aggressive => (
            "85% Stocks, 10% Bonds, 5% Cash",
            "Maximum growth potential with higher volatility",
        ),
    };

    let mut lines = vec![format!("Model allocation: {}", split), focus.to_string()];

    if profile.risk_tolerance == RiskTolerance::Conservative {
        lines.push("Consider dollar-cost averaging to reduce timing risk".to_string());
        lines.push("Set up automatic investments to avoid emotional decisions".to_string());
    }

    if matches!(profile.experience, Some(ExperienceLevel::Beginner)) {
        lines.push("Start with diversified index funds or ETFs".to_string());
        lines.push("Invest in financial education and learning".to_string());
    }

    lines
}

fn clamp_unit(v: f64) -> f64 {
    if v.is_finite() {
        v.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn age_factor(age: u32) -> f64 {
    clamp_unit((PEAK_RISK_AGE - age as f64) / (PEAK_RISK_AGE - MIN_AGE))
}

fn income_stability(profile: &UserProfile) -> f64 {
    let savings_score = clamp_unit(profile.savings_rate() / TARGET_SAVINGS_RATE);

    let monthly_expenses = profile.annual_expenses / 12.0;
    let coverage_score = if monthly_expenses > 0.0 {
        clamp_unit(profile.current_savings / monthly_expenses / TARGET_COVERAGE_MONTHS)
    } else {
        1.0
    };

    (savings_score + coverage_score) / 2.0
}

fn experience_factor(experience: Option<ExperienceLevel>) -> f64 {
    match experience {
        Some(ExperienceLevel::Beginner) => 0.25,
        Some(ExperienceLevel::Intermediate) | None => 0.5,
        Some(ExperienceLevel::Advanced) => 0.85,
    }
}

fn tolerance_factor(tolerance: RiskTolerance) -> f64 {
    match tolerance {
        RiskTolerance::Conservative => 0.2,
        RiskTolerance::Moderate => 0.5,
        RiskTolerance::Aggressive => 0.85,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Market;
    use std::collections::BTreeSet;

    fn profile(age: u32, retirement_age: u32, tolerance: RiskTolerance) -> UserProfile {
        UserProfile {
            age,
            retirement_age,
            annual_income: 80_000.0,
            annual_expenses: 50_000.0,
            current_savings: 5_000.0,
            monthly_investable: None,
            risk_tolerance: tolerance,
            goals: vec![],
            compliance: BTreeSet::new(),
            preferred_markets: vec![Market::Uae],
            currency: "AED".to_string(),
            experience: None,
        }
    }

    #[test]
    fn test_sample_profile_is_moderate() {
        let assessment = RiskProfiler::default().assess(&profile(28, 65, RiskTolerance::Moderate));

        assert_eq!(assessment.category, RiskCategory::Moderate);
        assert_eq!(assessment.time_horizon_years, 37);
        assert!((assessment.score - 6.78).abs() < 0.01);
        assert_eq!(assessment.factors.len(), 5);
        assert_eq!(assessment.risk_budget, RiskCategory::Moderate.risk_budget());
    }

    #[test]
    fn test_factor_contributions_sum_to_score() {
        let assessment = RiskProfiler::default().assess(&profile(45, 60, RiskTolerance::Aggressive));
        let total: f64 = assessment.factors.iter().map(|f| f.contribution).sum();
        assert!((assessment.score - total * 10.0).abs() < 1e-9);

        let age = assessment.factor(FACTOR_AGE).unwrap();
        assert!((age.value - 25.0 / 52.0).abs() < 1e-9);
    }

    #[test]
    fn test_older_investor_scores_lower() {
        let profiler = RiskProfiler::default();
        let young = profiler.assess(&profile(25, 65, RiskTolerance::Moderate));
        let old = profiler.assess(&profile(60, 65, RiskTolerance::Moderate));
        assert!(young.score > old.score);
    }

    #[test]
    fn test_category_bands() {
        assert_eq!(categorize(0.0), RiskCategory::Conservative);
        assert_eq!(categorize(2.99), RiskCategory::Conservative);
        assert_eq!(categorize(3.0), RiskCategory::ModerateConservative);
        assert_eq!(categorize(4.5), RiskCategory::Moderate);
        assert_eq!(categorize(7.0), RiskCategory::ModerateAggressive);
        assert_eq!(categorize(8.5), RiskCategory::Aggressive);
        assert_eq!(categorize(10.0), RiskCategory::Aggressive);
    }

    #[test]
    fn test_guidance_includes_model_split() {
        let p = profile(28, 65, RiskTolerance::Conservative);
        let lines = guidance(RiskCategory::Conservative, &p);
        assert!(lines[0].contains("70% Bonds"));
        assert!(lines.iter().any(|l| l.contains("dollar-cost")));
    }
}
