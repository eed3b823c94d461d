//! Portfolio optimizer
//!
//! Long-only mean-variance allocation with a per-instrument cap.
//! Solves `min wᵀΣw − λ·μᵀw` on the capped simplex by projected gradient
//! descent, then searches λ for the highest-return portfolio that stays
//! inside the risk budget.

use crate::config::PipelineConfig;
use crate::error::PlanError;
use crate::models::{
    AllocationMethod, AllocationWeights, AssetClass, ComplianceFlag, Instrument, Position,
    RiskAssessment, RiskTolerance, UserProfile,
};
use crate::Result;
use ndarray::{Array1, Array2};
use tracing::{debug, warn};

pub mod covariance;
pub use covariance::CovarianceEstimate;

const MAX_ITERATIONS: usize = 5_000;
const CONVERGENCE: f64 = 1e-12;
const LAMBDA_CEILING: f64 = 1e6;
const BISECTION_STEPS: usize = 40;
const DUST: f64 = 1e-6;

#[derive(Debug, Clone)]
pub struct OptimizationConstraints {
    /// Per-instrument weight cap
    pub max_weight: f64,
    /// Minimum annual expected return
    pub min_return: Option<f64>,
}

impl Default for OptimizationConstraints {
    fn default() -> Self {
        Self {
            max_weight: 0.5,
            min_return: None,
        }
    }
}

/// Mean-variance optimizer
pub struct PortfolioOptimizer {
    default_variance: f64,
    risk_free_rate: f64,
}

impl Default for PortfolioOptimizer {
    fn default() -> Self {
        Self::new(0.09, 0.02)
    }
}

impl PortfolioOptimizer {
    pub fn new(default_variance: f64, risk_free_rate: f64) -> Self {
        Self {
            default_variance,
            risk_free_rate,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.default_variance, config.risk_free_rate)
    }

    /// Weights for `candidates` under `risk_budget` (max variance).
    /// Infeasible programs degrade to equal weight; only an empty candidate
    /// set is an error.
    pub fn optimize(
        &self,
        candidates: &[Instrument],
        risk_budget: f64,
        constraints: &OptimizationConstraints,
    ) -> Result<AllocationWeights> {
        if candidates.is_empty() {
            return Err(PlanError::OptimizationInfeasible(
                "no candidate instruments".to_string(),
            ));
        }

        let mut sorted = candidates.to_vec();
        sorted.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        sorted.dedup_by(|a, b| a.symbol == b.symbol);

        let cov = covariance::estimate(&sorted, self.default_variance);
        let mu = Array1::from(sorted.iter().map(|i| i.expected_return).collect::<Vec<_>>());

        if cov.defaulted_count() > 0 {
            debug!(
                defaulted = cov.defaulted_count(),
                "Covariance uses default variance for instruments without history"
            );
        }

        if sorted.len() == 1 {
            let weights = Array1::from(vec![1.0]);
            return Ok(build(
                &sorted,
                &weights,
                &cov.matrix,
                &mu,
                risk_budget,
                AllocationMethod::SingleAsset,
                None,
            ));
        }

        match self.solve(&cov.matrix, &mu, risk_budget, constraints) {
            Ok(weights) => {
                let weights = tidy(weights, constraints.max_weight);
                Ok(build(
                    &sorted,
                    &weights,
                    &cov.matrix,
                    &mu,
                    risk_budget,
                    AllocationMethod::MeanVariance,
                    None,
                ))
            }
            Err(PlanError::OptimizationInfeasible(reason)) => {
                warn!(reason = %reason, "Optimization infeasible, using equal weights");
                let n = sorted.len();
                let weights = Array1::from_elem(n, 1.0 / n as f64);
                Ok(build(
                    &sorted,
                    &weights,
                    &cov.matrix,
                    &mu,
                    risk_budget,
                    AllocationMethod::EqualWeight,
                    Some(reason),
                ))
            }
            Err(e) => Err(e),
        }
    }

    /// Solve the capped program. Fails with `OptimizationInfeasible` when no
    /// weight vector satisfies the constraints.
    pub fn solve(
        &self,
        cov: &Array2<f64>,
        mu: &Array1<f64>,
        risk_budget: f64,
        constraints: &OptimizationConstraints,
    ) -> Result<Array1<f64>> {
        let n = mu.len();
        let cap = constraints.max_weight;

        if n as f64 * cap < 1.0 - 1e-12 {
            return Err(PlanError::OptimizationInfeasible(format!(
                "{} candidates cannot sum to 1 under a {:.0}% cap",
                n,
                cap * 100.0
            )));
        }

        if let Some(floor) = constraints.min_return {
            let ceiling = max_capped_return(mu, cap);
            if floor > ceiling + 1e-9 {
                return Err(PlanError::OptimizationInfeasible(format!(
                    "return floor {:.2}% exceeds attainable {:.2}%",
                    floor * 100.0,
                    ceiling * 100.0
                )));
            }
        }

        let solver = Solver::new(cov, mu, cap);

        // Walk the frontier: largest λ whose variance fits the budget
        let mut lambda = 0.0;
        let mut weights = solver.minimize(0.0);

        if solver.variance(&weights) <= risk_budget {
            let mut hi = 1.0;
            let mut w_hi = solver.minimize(hi);
            while solver.variance(&w_hi) <= risk_budget && hi < LAMBDA_CEILING {
                lambda = hi;
                weights = w_hi;
                hi *= 2.0;
                w_hi = solver.minimize(hi);
            }

            if solver.variance(&w_hi) <= risk_budget {
                lambda = hi;
                weights = w_hi;
            } else {
                let mut lo = lambda;
                for _ in 0..BISECTION_STEPS {
                    let mid = 0.5 * (lo + hi);
                    let w_mid = solver.minimize(mid);
                    if solver.variance(&w_mid) <= risk_budget {
                        lo = mid;
                        weights = w_mid;
                    } else {
                        hi = mid;
                    }
                }
                lambda = lo;
            }
        } else {
            debug!(
                min_variance = solver.variance(&weights),
                risk_budget, "Minimum-variance portfolio exceeds risk budget"
            );
        }

        // Raise λ until the return floor is met
        if let Some(floor) = constraints.min_return {
            if solver.expected_return(&weights) < floor - 1e-9 {
                let mut lo = lambda;
                let mut hi = if lambda > 0.0 { lambda * 2.0 } else { 1.0 };
                let mut w_hi = solver.minimize(hi);
                while solver.expected_return(&w_hi) < floor - 1e-9 && hi < LAMBDA_CEILING {
                    lo = hi;
                    hi *= 2.0;
                    w_hi = solver.minimize(hi);
                }
                for _ in 0..BISECTION_STEPS {
                    let mid = 0.5 * (lo + hi);
                    let w_mid = solver.minimize(mid);
                    if solver.expected_return(&w_mid) >= floor - 1e-9 {
                        hi = mid;
                        w_hi = w_mid;
                    } else {
                        lo = mid;
                    }
                }
                weights = w_hi;
                lambda = hi;
            }
        }

        debug!(
            lambda,
            variance = solver.variance(&weights),
            expected_return = solver.expected_return(&weights),
            "Mean-variance solution"
        );

        Ok(weights)
    }

    /// (return − risk-free) / volatility
    pub fn sharpe_ratio(&self, allocation: &AllocationWeights) -> f64 {
        let vol = allocation.volatility();
        if vol > 0.0 {
            (allocation.expected_return - self.risk_free_rate) / vol
        } else {
            0.0
        }
    }
}

/// Projected gradient descent for a fixed λ
struct Solver<'a> {
    cov: &'a Array2<f64>,
    mu: &'a Array1<f64>,
    cap: f64,
    step: f64,
}

impl<'a> Solver<'a> {
    fn new(cov: &'a Array2<f64>, mu: &'a Array1<f64>, cap: f64) -> Self {
        // Gershgorin bound on the Hessian 2Σ
        let lipschitz = cov
            .rows()
            .into_iter()
            .map(|row| row.iter().map(|v| v.abs()).sum::<f64>())
            .fold(0.0, f64::max)
            * 2.0;

        Self {
            cov,
            mu,
            cap,
            step: if lipschitz > 0.0 { 1.0 / lipschitz } else { 1.0 },
        }
    }

    fn minimize(&self, lambda: f64) -> Array1<f64> {
        let n = self.mu.len();
        let mut w = project_capped_simplex(&Array1::from_elem(n, 1.0 / n as f64), self.cap);

        for _ in 0..MAX_ITERATIONS {
            let grad = self.cov.dot(&w) * 2.0 - self.mu * lambda;
            let next = project_capped_simplex(&(&w - &(grad * self.step)), self.cap);

            let change = (&next - &w).iter().fold(0.0_f64, |m, d| m.max(d.abs()));
            w = next;
            if change < CONVERGENCE {
                break;
            }
        }

        w
    }

    fn variance(&self, w: &Array1<f64>) -> f64 {
        w.dot(&self.cov.dot(w))
    }

    fn expected_return(&self, w: &Array1<f64>) -> f64 {
        w.dot(self.mu)
    }
}

/// Euclidean projection onto {w : Σw = 1, 0 ≤ w ≤ cap}
pub fn project_capped_simplex(v: &Array1<f64>, cap: f64) -> Array1<f64> {
    let filled = |tau: f64| -> f64 { v.iter().map(|x| (x - tau).clamp(0.0, cap)).sum() };

    let mut lo = v.iter().cloned().fold(f64::INFINITY, f64::min) - cap;
    let mut hi = v.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

    for _ in 0..200 {
        let mid = 0.5 * (lo + hi);
        if filled(mid) > 1.0 {
            lo = mid;
        } else {
            hi = mid;
        }
        if hi - lo < 1e-15 {
            break;
        }
    }

    let tau = 0.5 * (lo + hi);
    v.mapv(|x| (x - tau).clamp(0.0, cap))
}

/// Highest expected return reachable under the cap
fn max_capped_return(mu: &Array1<f64>, cap: f64) -> f64 {
    let mut returns: Vec<f64> = mu.to_vec();
    returns.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));

    let mut remaining = 1.0_f64;
    let mut total = 0.0;
    for r in returns {
        if remaining <= 0.0 {
            break;
        }
        let w = remaining.min(cap);
        total += w * r;
        remaining -= w;
    }
    total
}

/// Zero out dust and hand the residual to positions with headroom
fn tidy(mut weights: Array1<f64>, cap: f64) -> Array1<f64> {
    weights.mapv_inplace(|w| if w < DUST { 0.0 } else { w.min(cap) });

    let mut residual = 1.0 - weights.sum();
    if residual.abs() > 0.0 {
        let mut order: Vec<usize> = (0..weights.len()).filter(|&i| weights[i] > 0.0).collect();
        order.sort_by(|&a, &b| {
            (cap - weights[b])
                .partial_cmp(&(cap - weights[a]))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.cmp(&b))
        });
        for i in order {
            if residual.abs() <= f64::EPSILON {
                break;
            }
            let adjusted = (weights[i] + residual).clamp(0.0, cap);
            residual -= adjusted - weights[i];
            weights[i] = adjusted;
        }
    }

    weights
}

fn build(
    instruments: &[Instrument],
    weights: &Array1<f64>,
    cov: &Array2<f64>,
    mu: &Array1<f64>,
    risk_budget: f64,
    method: AllocationMethod,
    fallback_reason: Option<String>,
) -> AllocationWeights {
    let variance = weights.dot(&cov.dot(weights));
    let expected_return = weights.dot(mu);

    let mut positions: Vec<Position> = instruments
        .iter()
        .zip(weights.iter())
        .filter(|(_, w)| **w > 0.0)
        .map(|(i, w)| Position {
            symbol: i.symbol.clone(),
            name: i.name.clone(),
            asset_class: i.asset_class(),
            expected_return: i.expected_return,
            risk_level: i.risk_level,
            weight: *w,
        })
        .collect();

    rank(&mut positions);

    AllocationWeights {
        positions,
        method,
        fallback_reason,
        expected_return,
        variance,
        within_risk_budget: variance <= risk_budget + 1e-12,
    }
}

/// Weight descending, symbol ascending
fn rank(positions: &mut [Position]) {
    positions.sort_by(|a, b| {
        b.weight
            .partial_cmp(&a.weight)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.symbol.cmp(&b.symbol))
    });
}

//
// ================= Rule-Based Sleeves =================
//

/// (symbol, name, asset class, expected return, volatility, risk level)
type Sleeve = (&'static str, &'static str, AssetClass, f64, f64, u8);

const CONVENTIONAL_SLEEVES: [Sleeve; 3] = [
    ("GLOBAL_EQUITY", "Diversified Global Equity", AssetClass::Equity, 0.08, 0.16, 6),
    ("GLOBAL_BONDS", "Investment-Grade Bonds", AssetClass::FixedIncome, 0.04, 0.05, 3),
    ("GLOBAL_REIT", "Listed Real Estate", AssetClass::RealEstate, 0.07, 0.18, 6),
];

const SHARIA_SLEEVES: [Sleeve; 3] = [
    ("ISLAMIC_EQUITY", "Sharia-Screened Equity", AssetClass::Equity, 0.075, 0.16, 6),
    ("SUKUK", "Sukuk", AssetClass::FixedIncome, 0.04, 0.05, 3),
    ("ISLAMIC_REIT", "Sharia-Compliant Real Estate", AssetClass::RealEstate, 0.065, 0.18, 6),
];

/// Age-based equity/bond/real-estate split over generic sleeves, used when
/// no catalog instruments are available. Sleeves over `max_weight` are cut
/// back and the excess goes to sleeves with headroom; a cap the three
/// sleeves cannot meet degrades to equal weight.
pub fn rule_based_allocation(
    profile: &UserProfile,
    risk: &RiskAssessment,
    max_weight: f64,
    reason: impl Into<String>,
) -> AllocationWeights {
    let age = profile.age as f64;
    let horizon = risk.time_horizon_years;

    let (equity, bonds, reit) = if profile.risk_tolerance == RiskTolerance::Conservative
        || profile.age > 55
        || horizon < 10
    {
        ((100.0 - age).max(20.0), (age + 10.0).min(70.0), 10.0)
    } else if profile.risk_tolerance == RiskTolerance::Aggressive && profile.age < 40 && horizon > 20 {
        ((120.0 - age).min(80.0), (age - 20.0).max(10.0), 20.0)
    } else {
        ((100.0 - age).max(0.0), age, 15.0)
    };

    let total = equity + bonds + reit;
    let sleeves = if profile.requires(ComplianceFlag::Sharia) {
        SHARIA_SLEEVES
    } else {
        CONVENTIONAL_SLEEVES
    };

    let split = Array1::from(vec![equity / total, bonds / total, reit / total]);
    let n = sleeves.len();

    let (weights, method) = if n as f64 * max_weight < 1.0 - 1e-12 {
        warn!(
            cap = max_weight,
            sleeves = n,
            "Sleeves cannot respect the weight cap, using equal weights"
        );
        (Array1::from_elem(n, 1.0 / n as f64), AllocationMethod::EqualWeight)
    } else {
        (tidy(split, max_weight), AllocationMethod::RuleBased)
    };

    let mut positions: Vec<Position> = sleeves
        .iter()
        .zip(weights.iter().copied())
        .filter(|(_, w)| *w > 0.0)
        .map(|(&(symbol, name, asset_class, expected_return, _, risk_level), w)| Position {
            symbol: symbol.to_string(),
            name: name.to_string(),
            asset_class,
            expected_return,
            risk_level,
            weight: w,
        })
        .collect();
    rank(&mut positions);

    let expected_return = sleeves.iter().zip(weights.iter()).map(|(s, w)| s.3 * w).sum::<f64>();
    // uncorrelated sleeves
    let variance = sleeves
        .iter()
        .zip(weights.iter())
        .map(|(s, w)| (s.4 * w).powi(2))
        .sum::<f64>();

    AllocationWeights {
        positions,
        method,
        fallback_reason: Some(reason.into()),
        expected_return,
        variance,
        within_risk_budget: variance <= risk.risk_budget + 1e-12,
    }
}
