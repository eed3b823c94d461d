//! Deterministic financial projections
//!
//! Savings capacity, retirement corpus and shortfall. These numbers feed the
//! draft prompt and the computed plan sections; they never come from a
//! generative backend.

use crate::config::PipelineConfig;
use crate::models::UserProfile;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinancialMetrics {
    pub monthly_savings_capacity: f64,
    pub savings_rate: f64,
    pub investment_horizon_years: u32,
    pub retirement_corpus_needed: f64,
    pub projected_accumulation: f64,
    pub shortfall: f64,
    pub additional_monthly_needed: f64,
    /// Six months of expenses
    pub emergency_fund_target: f64,
    pub on_track: bool,
}

#[derive(Debug, Clone)]
pub struct Projections {
    annual_return: f64,
    retirement_years: u32,
}

impl Projections {
    pub fn new(annual_return: f64, retirement_years: u32) -> Self {
        Self {
            annual_return,
            retirement_years,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.assumed_return, config.retirement_years)
    }

    pub fn metrics(&self, profile: &UserProfile) -> FinancialMetrics {
        let horizon = profile.time_horizon_years();
        let monthly_capacity = profile.monthly_savings_capacity();

        let corpus = profile.annual_expenses * self.retirement_years as f64;
        let accumulated = future_value(
            profile.current_savings,
            monthly_capacity.max(0.0),
            self.annual_return,
            horizon,
        );

        let shortfall = (corpus - accumulated).max(0.0);
        let additional = if shortfall > 0.0 {
            monthly_payment_needed(shortfall, self.annual_return, horizon)
        } else {
            0.0
        };

        FinancialMetrics {
            monthly_savings_capacity: monthly_capacity,
            savings_rate: profile.savings_rate(),
            investment_horizon_years: horizon,
            retirement_corpus_needed: corpus,
            projected_accumulation: accumulated,
            shortfall,
            additional_monthly_needed: additional,
            emergency_fund_target: profile.annual_expenses / 2.0,
            on_track: shortfall == 0.0,
        }
    }
}

/// Future value of a lump sum plus monthly contributions
pub fn future_value(present: f64, monthly: f64, annual_rate: f64, years: u32) -> f64 {
    if annual_rate <= 0.0 || years == 0 {
        return present + monthly * 12.0 * years as f64;
    }

    let monthly_rate = annual_rate / 12.0;
    let months = (years * 12) as i32;

    let fv_present = present * (1.0 + annual_rate).powi(years as i32);
    let fv_annuity = if monthly > 0.0 {
        monthly * (((1.0 + monthly_rate).powi(months) - 1.0) / monthly_rate)
    } else {
        0.0
    };

    fv_present + fv_annuity
}

/// Monthly contribution that grows to `target` over `years`
pub fn monthly_payment_needed(target: f64, annual_rate: f64, years: u32) -> f64 {
    if years == 0 {
        return target / 12.0;
    }
    if annual_rate <= 0.0 {
        return target / (12.0 * years as f64);
    }

    let monthly_rate = annual_rate / 12.0;
    let months = (years * 12) as i32;
    target * monthly_rate / ((1.0 + monthly_rate).powi(months) - 1.0)
}

/// Whole units with thousands separators ("1,250,000")
pub fn format_money(amount: f64) -> String {
    if !amount.is_finite() {
        return "n/a".to_string();
    }

    let rounded = amount.round();
    let digits = format!("{:.0}", rounded.abs());
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);

    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }

    if rounded < 0.0 {
        format!("-{}", out)
    } else {
        out
    }
}
