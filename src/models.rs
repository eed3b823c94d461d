//! Core data models for the plan pipeline

use crate::error::ValidationError;
use crate::projection::FinancialMetrics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

//
// ================= Enums =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RiskTolerance {
    Conservative,
    Moderate,
    Aggressive,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExperienceLevel {
    Beginner,
    Intermediate,
    Advanced,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Market {
    #[serde(rename = "UAE")]
    Uae,
    #[serde(rename = "US")]
    Us,
    #[serde(rename = "Global")]
    Global,
}

/// Screening requirements an instrument must carry to be eligible
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ComplianceFlag {
    /// Faith-based exclusion screening
    Sharia,
    Esg,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AssetClass {
    Equity,
    FixedIncome,
    RealEstate,
    Commodity,
    Cash,
    Other,
}

impl AssetClass {
    /// Classify free-text catalog categories ("Bond ETF", "REIT ETF", "Banking", ...)
    pub fn from_category(category: &str) -> Self {
        let lowered = category.to_lowercase();
        let has_any = |keywords: &[&str]| keywords.iter().any(|k| lowered.contains(k));

        if has_any(&["reit", "real estate", "property"]) {
            AssetClass::RealEstate
        } else if has_any(&["bond", "sukuk", "treasury", "fixed income"]) {
            AssetClass::FixedIncome
        } else if has_any(&["commodity", "gold", "silver"]) {
            AssetClass::Commodity
        } else if has_any(&["cash", "money market", "deposit"]) {
            AssetClass::Cash
        } else if has_any(&[
            "stock", "equity", "etf", "fund", "banking", "telecom", "share",
        ]) {
            AssetClass::Equity
        } else {
            AssetClass::Other
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RiskCategory {
    #[serde(rename = "Conservative")]
    Conservative,
    #[serde(rename = "Moderate Conservative")]
    ModerateConservative,
    #[serde(rename = "Moderate")]
    Moderate,
    #[serde(rename = "Moderate Aggressive")]
    ModerateAggressive,
    #[serde(rename = "Aggressive")]
    Aggressive,
}

impl RiskCategory {
    /// Maximum acceptable annualized portfolio volatility
    pub fn max_volatility(&self) -> f64 {
        match self {
            RiskCategory::Conservative => 0.08,
            RiskCategory::ModerateConservative => 0.11,
            RiskCategory::Moderate => 0.14,
            RiskCategory::ModerateAggressive => 0.18,
            RiskCategory::Aggressive => 0.22,
        }
    }

    /// Maximum acceptable portfolio variance
    pub fn risk_budget(&self) -> f64 {
        self.max_volatility().powi(2)
    }

    /// Inclusive window on the instrument risk scale (1-10)
    pub fn risk_level_window(&self) -> (u8, u8) {
        match self {
            RiskCategory::Conservative => (1, 4),
            RiskCategory::ModerateConservative => (2, 5),
            RiskCategory::Moderate => (3, 7),
            RiskCategory::ModerateAggressive => (5, 8),
            RiskCategory::Aggressive => (6, 10),
        }
    }
}

//
// ================= Profile =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserProfile {
    pub age: u32,
    pub retirement_age: u32,
    pub annual_income: f64,
    pub annual_expenses: f64,
    pub current_savings: f64,
    /// Explicit monthly budget; savings capacity is used when absent
    #[serde(default)]
    pub monthly_investable: Option<f64>,
    pub risk_tolerance: RiskTolerance,
    #[serde(default)]
    pub goals: Vec<String>,
    #[serde(default)]
    pub compliance: BTreeSet<ComplianceFlag>,
    #[serde(default)]
    pub preferred_markets: Vec<Market>,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub experience: Option<ExperienceLevel>,
}

fn default_currency() -> String {
    "AED".to_string()
}

impl UserProfile {
    /// Check every profile invariant and report all violations at once
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut violations = Vec::new();

        if !(18..=100).contains(&self.age) {
            violations.push("Age must be between 18 and 100".to_string());
        }
        if self.retirement_age <= self.age {
            violations.push("Retirement age must be greater than current age".to_string());
        }
        if self.retirement_age > 100 {
            violations.push("Retirement age must be 100 or less".to_string());
        }

        let monetary = [
            ("annual_income", Some(self.annual_income)),
            ("annual_expenses", Some(self.annual_expenses)),
            ("current_savings", Some(self.current_savings)),
            ("monthly_investable", self.monthly_investable),
        ];
        for (field, value) in monetary {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    violations.push(format!("{} must be a finite, non-negative amount", field));
                }
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::new(violations))
        }
    }

    pub fn time_horizon_years(&self) -> u32 {
        self.retirement_age.saturating_sub(self.age)
    }

    pub fn monthly_savings_capacity(&self) -> f64 {
        (self.annual_income - self.annual_expenses) / 12.0
    }

    pub fn savings_rate(&self) -> f64 {
        if self.annual_income > 0.0 {
            (self.annual_income - self.annual_expenses) / self.annual_income
        } else {
            0.0
        }
    }

    /// Amount committed to the portfolio each month
    pub fn investable_per_month(&self) -> f64 {
        match self.monthly_investable {
            Some(amount) if amount > 0.0 => amount,
            _ => self.monthly_savings_capacity().max(0.0),
        }
    }

    pub fn requires(&self, flag: ComplianceFlag) -> bool {
        self.compliance.contains(&flag)
    }

    /// Named goals, defaulting to retirement when none were given
    pub fn goals_or_default(&self) -> Vec<String> {
        let goals: Vec<String> = self
            .goals
            .iter()
            .map(|g| g.trim().to_string())
            .filter(|g| !g.is_empty())
            .collect();

        if goals.is_empty() {
            vec!["retirement".to_string()]
        } else {
            goals
        }
    }

    pub fn markets_label(&self) -> String {
        if self.preferred_markets.is_empty() {
            "Any".to_string()
        } else {
            self.preferred_markets
                .iter()
                .map(|m| m.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        }
    }
}

//
// ================= Instrument =================
//

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InstrumentMetrics {
    pub volatility: Option<f64>,
    pub max_drawdown: Option<f64>,
    pub dividend_yield: Option<f64>,
    pub sharpe_ratio: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Instrument {
    pub symbol: String,
    pub name: String,
    pub category: String,
    pub market: Market,
    pub currency: String,
    pub expected_return: f64,
    /// Ordinal risk scale, 1 (lowest) to 10
    pub risk_level: u8,
    #[serde(default)]
    pub compliance: BTreeSet<ComplianceFlag>,
    #[serde(default)]
    pub metrics: InstrumentMetrics,
    /// Periodic (daily) returns, oldest first
    #[serde(default)]
    pub historical_returns: Vec<f64>,
    #[serde(default)]
    pub description: String,
}

impl Instrument {
    pub fn asset_class(&self) -> AssetClass {
        AssetClass::from_category(&self.category)
    }

    pub fn satisfies(&self, required: &BTreeSet<ComplianceFlag>) -> bool {
        required.is_subset(&self.compliance)
    }
}

//
// ================= Risk =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskFactor {
    pub name: String,
    /// Normalized to [0, 1]
    pub value: f64,
    pub weight: f64,
    pub contribution: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskAssessment {
    /// 0-10 scale
    pub score: f64,
    pub category: RiskCategory,
    pub time_horizon_years: u32,
    pub factors: Vec<RiskFactor>,
    pub risk_budget: f64,
}

impl RiskAssessment {
    pub fn factor(&self, name: &str) -> Option<&RiskFactor> {
        self.factors.iter().find(|f| f.name == name)
    }
}

//
// ================= Allocation =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AllocationMethod {
    SingleAsset,
    MeanVariance,
    EqualWeight,
    RuleBased,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub symbol: String,
    pub name: String,
    pub asset_class: AssetClass,
    pub expected_return: f64,
    pub risk_level: u8,
    pub weight: f64,
}

/// Target weights, ranked by weight (descending) then symbol
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AllocationWeights {
    pub positions: Vec<Position>,
    pub method: AllocationMethod,
    pub fallback_reason: Option<String>,
    pub expected_return: f64,
    pub variance: f64,
    pub within_risk_budget: bool,
}

impl AllocationWeights {
    pub fn weight(&self, symbol: &str) -> Option<f64> {
        self.positions
            .iter()
            .find(|p| p.symbol == symbol)
            .map(|p| p.weight)
    }

    pub fn weights(&self) -> BTreeMap<String, f64> {
        self.positions
            .iter()
            .map(|p| (p.symbol.clone(), p.weight))
            .collect()
    }

    pub fn total(&self) -> f64 {
        self.positions.iter().map(|p| p.weight).sum()
    }

    pub fn max_weight(&self) -> f64 {
        self.positions.iter().map(|p| p.weight).fold(0.0, f64::max)
    }

    pub fn volatility(&self) -> f64 {
        self.variance.max(0.0).sqrt()
    }

    pub fn is_fallback(&self) -> bool {
        self.fallback_reason.is_some()
    }

    /// Percent allocated per asset class
    pub fn by_asset_class(&self) -> BTreeMap<String, f64> {
        let mut totals = BTreeMap::new();
        for p in &self.positions {
            *totals.entry(p.asset_class.to_string()).or_insert(0.0) += p.weight * 100.0;
        }
        totals
    }
}

//
// ================= Plan =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recommendation {
    pub symbol: String,
    pub name: String,
    pub asset_class: AssetClass,
    pub allocation_pct: f64,
    pub monthly_amount: f64,
    pub expected_return: f64,
    pub risk_level: u8,
    pub rationale: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskNarrative {
    pub risk_level: String,
    pub description: String,
    pub suitability: String,
    pub allocation_focus: String,
    pub time_factor: String,
    pub age_factor: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeHorizonNarrative {
    pub horizon_years: u32,
    pub category: String,
    pub strategy: String,
    pub flexibility: String,
    pub milestones: Vec<String>,
    pub retirement_readiness: String,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GoalRiskMitigation {
    pub goal: String,
    pub risks: Vec<String>,
    pub mitigations: Vec<String>,
}

/// Labeled sections of a generated plan, in template order
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    ExecutiveSummary,
    Recommendations,
    RiskAssessment,
    TimeHorizon,
    MonthlySavings,
    GoalTimeline,
    GoalRisks,
    AdditionalAdvice,
    ComplianceNotes,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineStage {
    Profiling,
    Optimizing,
    Drafting,
    Parsing,
    Evaluating,
    Improving,
    Done,
    Degraded,
}

impl PipelineStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineStage::Done | PipelineStage::Degraded)
    }
}

/// A recoverable failure that was absorbed into the plan
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Degradation {
    CatalogFallback { reason: String },
    OptimizerFallback { reason: String },
    ContextUnavailable { reason: String },
    DraftUnavailable { reason: String },
    EvaluationSkipped { reason: String },
    ImprovementFailed { reason: String },
}

//
// ================= Evaluation =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    Accuracy,
    Completeness,
    Specificity,
    RiskAlignment,
    MarketRelevance,
    Compliance,
}

impl Criterion {
    pub const ALL: [Criterion; 6] = [
        Criterion::Accuracy,
        Criterion::Completeness,
        Criterion::Specificity,
        Criterion::RiskAlignment,
        Criterion::MarketRelevance,
        Criterion::Compliance,
    ];

    /// Key prefix used in the evaluator's JSON verdict
    pub fn key(&self) -> &'static str {
        match self {
            Criterion::Accuracy => "accuracy",
            Criterion::Completeness => "completeness",
            Criterion::Specificity => "specificity",
            Criterion::RiskAlignment => "risk_alignment",
            Criterion::MarketRelevance => "market_relevance",
            Criterion::Compliance => "compliance",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CriterionScore {
    pub criterion: Criterion,
    pub score: f64,
    pub weight: f64,
    pub feedback: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluationResult {
    /// Weighted total, 0-10
    pub score: f64,
    pub breakdown: Vec<CriterionScore>,
    pub key_issues: Vec<String>,
    pub suggestions: Vec<String>,
    pub evaluator: String,
    pub evaluated_at: DateTime<Utc>,
    pub improved_plan: Option<Box<Plan>>,
}

impl EvaluationResult {
    pub fn needs_improvement(&self, threshold: f64) -> bool {
        self.score < threshold
    }

    pub fn with_improved_plan(self, plan: Plan) -> Self {
        Self {
            improved_plan: Some(Box::new(plan)),
            ..self
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityMetadata {
    pub evaluator_used: bool,
    pub evaluator: Option<String>,
    pub score: Option<f64>,
    pub threshold: f64,
    pub improvement_applied: bool,
    pub breakdown: Vec<CriterionScore>,
    pub key_issues: Vec<String>,
    pub reason: String,
}

impl QualityMetadata {
    pub fn not_used(threshold: f64, reason: impl Into<String>) -> Self {
        Self {
            evaluator_used: false,
            evaluator: None,
            score: None,
            threshold,
            improvement_applied: false,
            breakdown: Vec::new(),
            key_issues: Vec::new(),
            reason: reason.into(),
        }
    }

    pub fn from_evaluation(
        evaluation: &EvaluationResult,
        threshold: f64,
        improvement_applied: bool,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            evaluator_used: true,
            evaluator: Some(evaluation.evaluator.clone()),
            score: Some(evaluation.score),
            threshold,
            improvement_applied,
            breakdown: evaluation.breakdown.clone(),
            key_issues: evaluation.key_issues.clone(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanMetadata {
    pub plan_id: Uuid,
    pub generated_at: DateTime<Utc>,
    /// True when one or more sections were synthesized rather than extracted
    pub degraded: bool,
    pub synthesized_sections: Vec<SectionKind>,
    pub degradations: Vec<Degradation>,
    pub allocation_method: AllocationMethod,
    pub final_stage: PipelineStage,
    pub stage_trace: Vec<PipelineStage>,
    pub reasoning_trace: Vec<String>,
    pub quality: QualityMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    pub profile: UserProfile,
    pub executive_summary: String,
    pub recommendations: Vec<Recommendation>,
    /// Percent per asset class
    pub allocation_by_class: BTreeMap<String, f64>,
    pub risk_assessment: RiskAssessment,
    pub risk_narrative: RiskNarrative,
    pub time_horizon: TimeHorizonNarrative,
    pub expected_return: f64,
    pub projected_wealth: f64,
    pub monthly_savings_target: f64,
    pub financial_metrics: FinancialMetrics,
    /// Years until each goal is reachable
    pub goal_timeline: BTreeMap<String, u32>,
    pub goal_risks: Vec<GoalRiskMitigation>,
    pub advice: Vec<String>,
    pub compliance_notes: String,
    pub metadata: PlanMetadata,
}

impl Plan {
    pub fn time_horizon_years(&self) -> u32 {
        self.risk_assessment.time_horizon_years
    }

    /// Weights as carried by the recommendations (percent / 100)
    pub fn weights(&self) -> BTreeMap<String, f64> {
        self.recommendations
            .iter()
            .map(|r| (r.symbol.clone(), r.allocation_pct / 100.0))
            .collect()
    }
}

//
// ================= Display =================
//

impl fmt::Display for RiskTolerance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskTolerance::Conservative => "Conservative",
            RiskTolerance::Moderate => "Moderate",
            RiskTolerance::Aggressive => "Aggressive",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for ExperienceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExperienceLevel::Beginner => "Beginner",
            ExperienceLevel::Intermediate => "Intermediate",
            ExperienceLevel::Advanced => "Advanced",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Market::Uae => "UAE",
            Market::Us => "US",
            Market::Global => "Global",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for ComplianceFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ComplianceFlag::Sharia => "Sharia",
            ComplianceFlag::Esg => "ESG",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AssetClass::Equity => "Equity",
            AssetClass::FixedIncome => "Fixed Income",
            AssetClass::RealEstate => "Real Estate",
            AssetClass::Commodity => "Commodities",
            AssetClass::Cash => "Cash",
            AssetClass::Other => "Other",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for RiskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskCategory::Conservative => "Conservative",
            RiskCategory::ModerateConservative => "Moderate Conservative",
            RiskCategory::Moderate => "Moderate",
            RiskCategory::ModerateAggressive => "Moderate Aggressive",
            RiskCategory::Aggressive => "Aggressive",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Criterion::Accuracy => "Accuracy",
            Criterion::Completeness => "Completeness",
            Criterion::Specificity => "Specificity",
            Criterion::RiskAlignment => "Risk Alignment",
            Criterion::MarketRelevance => "Market Relevance",
            Criterion::Compliance => "Compliance",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn sample_profile() -> UserProfile {
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

    #[test]
    fn test_valid_profile() {
        let profile = sample_profile();
        assert!(profile.validate().is_ok());
        assert_eq!(profile.time_horizon_years(), 37);
        assert_eq!(profile.investable_per_month(), 2_500.0);
        assert_eq!(profile.goals_or_default(), vec!["retirement".to_string()]);
    }

    #[test]
    fn test_validation_collects_all_violations() {
        let mut profile = sample_profile();
        profile.retirement_age = 28;
        profile.current_savings = -1.0;

        let err = profile.validate().unwrap_err();
        assert_eq!(err.violations.len(), 2);
    }

    #[test]
    fn test_asset_class_from_category() {
        assert_eq!(AssetClass::from_category("Bond ETF"), AssetClass::FixedIncome);
        assert_eq!(AssetClass::from_category("REIT ETF"), AssetClass::RealEstate);
        assert_eq!(AssetClass::from_category("Islamic Bond"), AssetClass::FixedIncome);
        assert_eq!(AssetClass::from_category("Commodity ETF"), AssetClass::Commodity);
        assert_eq!(AssetClass::from_category("Technology Stock"), AssetClass::Equity);
        assert_eq!(AssetClass::from_category("Banking"), AssetClass::Equity);
    }

    #[test]
    fn test_profile_deserializes_with_defaults() {
        let json = r#"{
            "age": 40,
            "retirement_age": 60,
            "annual_income": 120000,
            "annual_expenses": 70000,
            "current_savings": 30000,
            "risk_tolerance": "aggressive",
            "compliance": ["sharia"],
            "preferred_markets": ["UAE", "US"]
        }"#;

        let profile: UserProfile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.currency, "AED");
        assert!(profile.requires(ComplianceFlag::Sharia));
        assert_eq!(profile.markets_label(), "UAE, US");
    }
}
