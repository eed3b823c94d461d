//! Pipeline configuration
//!
//! Defaults are production values. `from_env` overrides them from the
//! process environment (after loading `.env`).

use crate::error::PlanError;
use crate::Result;
use std::env;
use std::str::FromStr;
use std::time::Duration;

const WEIGHT_TOLERANCE: f64 = 1e-6;

/// Weights of the normalized risk factors
#[derive(Debug, Clone, PartialEq)]
pub struct RiskWeights {
    pub age: f64,
    pub income_stability: f64,
    pub time_horizon: f64,
    pub experience: f64,
    pub stated_tolerance: f64,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            age: 0.25,
            income_stability: 0.20,
            time_horizon: 0.25,
            experience: 0.15,
            stated_tolerance: 0.15,
        }
    }
}

impl RiskWeights {
    pub fn total(&self) -> f64 {
        self.age + self.income_stability + self.time_horizon + self.experience + self.stated_tolerance
    }
}

/// Weights of the evaluation criteria
#[derive(Debug, Clone, PartialEq)]
pub struct CriterionWeights {
    pub accuracy: f64,
    pub completeness: f64,
    pub specificity: f64,
    pub risk_alignment: f64,
    pub market_relevance: f64,
    pub compliance: f64,
}

impl Default for CriterionWeights {
    fn default() -> Self {
        Self {
            accuracy: 0.25,
            completeness: 0.20,
            specificity: 0.20,
            risk_alignment: 0.15,
            market_relevance: 0.10,
            compliance: 0.10,
        }
    }
}

impl CriterionWeights {
    pub fn weight(&self, criterion: crate::models::Criterion) -> f64 {
        use crate::models::Criterion;
        match criterion {
            Criterion::Accuracy => self.accuracy,
            Criterion::Completeness => self.completeness,
            Criterion::Specificity => self.specificity,
            Criterion::RiskAlignment => self.risk_alignment,
            Criterion::MarketRelevance => self.market_relevance,
            Criterion::Compliance => self.compliance,
        }
    }

    pub fn total(&self) -> f64 {
        self.accuracy
            + self.completeness
            + self.specificity
            + self.risk_alignment
            + self.market_relevance
            + self.compliance
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Bound on a single draft generation call
    pub draft_timeout: Duration,
    /// Bound on a single evaluation or improvement call
    pub evaluation_timeout: Duration,
    /// Plans scoring below this are regenerated once
    pub improvement_threshold: f64,
    /// Per-instrument weight cap
    pub max_weight: f64,
    pub max_candidates: usize,
    /// Snippets requested from the context retriever
    pub context_k: usize,
    pub risk_free_rate: f64,
    /// Variance assumed for instruments without usable history
    pub default_variance: f64,
    /// Growth rate used by the financial projections
    pub assumed_return: f64,
    /// Years of expenses a retirement corpus must cover
    pub retirement_years: u32,
    /// Extra draft attempts after the first failure
    pub generation_retries: u32,
    pub risk_weights: RiskWeights,
    pub criterion_weights: CriterionWeights,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            draft_timeout: Duration::from_secs(120),
            evaluation_timeout: Duration::from_secs(60),
            improvement_threshold: 8.0,
            max_weight: 0.5,
            max_candidates: 8,
            context_k: 5,
            risk_free_rate: 0.02,
            default_variance: 0.09,
            assumed_return: 0.08,
            retirement_years: 25,
            generation_retries: 0,
            risk_weights: RiskWeights::default(),
            criterion_weights: CriterionWeights::default(),
        }
    }
}

impl PipelineConfig {
    /// Defaults overridden by `PLAN_*` environment variables
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let mut config = Self::default();

        if let Some(secs) = env_value::<u64>("PLAN_DRAFT_TIMEOUT_SECS")? {
            config.draft_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_value::<u64>("PLAN_EVAL_TIMEOUT_SECS")? {
            config.evaluation_timeout = Duration::from_secs(secs);
        }
        if let Some(v) = env_value("PLAN_IMPROVEMENT_THRESHOLD")? {
            config.improvement_threshold = v;
        }
        if let Some(v) = env_value("PLAN_MAX_WEIGHT")? {
            config.max_weight = v;
        }
        if let Some(v) = env_value("PLAN_MAX_CANDIDATES")? {
            config.max_candidates = v;
        }
        if let Some(v) = env_value("PLAN_CONTEXT_K")? {
            config.context_k = v;
        }
        if let Some(v) = env_value("PLAN_RISK_FREE_RATE")? {
            config.risk_free_rate = v;
        }
        if let Some(v) = env_value("PLAN_GENERATION_RETRIES")? {
            config.generation_retries = v;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=10.0).contains(&self.improvement_threshold) {
            return Err(PlanError::Config(format!(
                "improvement_threshold must be within 0-10, got {}",
                self.improvement_threshold
            )));
        }
        if !(self.max_weight > 0.0 && self.max_weight <= 1.0) {
            return Err(PlanError::Config(format!(
                "max_weight must be within (0, 1], got {}",
                self.max_weight
            )));
        }
        if self.max_candidates == 0 {
            return Err(PlanError::Config("max_candidates must be positive".to_string()));
        }
        if self.draft_timeout.is_zero() || self.evaluation_timeout.is_zero() {
            return Err(PlanError::Config("timeouts must be positive".to_string()));
        }
        if self.default_variance <= 0.0 {
            return Err(PlanError::Config("default_variance must be positive".to_string()));
        }
        if (self.risk_weights.total() - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(PlanError::Config(format!(
                "risk weights must sum to 1, got {:.4}",
                self.risk_weights.total()
            )));
        }
        if (self.criterion_weights.total() - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(PlanError::Config(format!(
                "criterion weights must sum to 1, got {:.4}",
                self.criterion_weights.total()
            )));
        }
        Ok(())
    }

    /// Minimum number of candidates for the weight cap to be satisfiable
    pub fn min_candidates(&self) -> usize {
        (1.0 / self.max_weight).ceil() as usize
    }
}

fn env_value<T: FromStr>(key: &str) -> Result<Option<T>> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| PlanError::Config(format!("{} has an invalid value: {}", key, raw))),
        Err(_) => Ok(None),
    }
}
