//! Covariance estimation
//!
//! Sample covariance over tail-aligned daily return series, annualized.
//! Instruments without enough history keep a diagonal-only default.

use crate::models::Instrument;
use ndarray::{Array1, Array2};

pub const MIN_OBSERVATIONS: usize = 30;
pub const TRADING_DAYS: f64 = 252.0;
/// Added to the diagonal so the matrix stays positive definite
pub const RIDGE: f64 = 1e-8;

#[derive(Debug, Clone)]
pub struct CovarianceEstimate {
    pub matrix: Array2<f64>,
    /// Per instrument: true when estimated from history
    pub from_history: Vec<bool>,
    /// Observations used for the historical block
    pub observations: usize,
}

impl CovarianceEstimate {
    pub fn defaulted_count(&self) -> usize {
        self.from_history.iter().filter(|h| !**h).count()
    }
}

/// Estimate Σ for `instruments` in the given order
pub fn estimate(instruments: &[Instrument], default_variance: f64) -> CovarianceEstimate {
    let n = instruments.len();
    let from_history: Vec<bool> = instruments
        .iter()
        .map(|i| i.historical_returns.len() >= MIN_OBSERVATIONS)
        .collect();

    let observations = instruments
        .iter()
        .zip(&from_history)
        .filter(|(_, h)| **h)
        .map(|(i, _)| i.historical_returns.len())
        .min()
        .unwrap_or(0);

    let mut matrix = Array2::<f64>::zeros((n, n));

    // Tail-aligned, de-meaned series for instruments with history
    let centered: Vec<Option<Array1<f64>>> = instruments
        .iter()
        .zip(&from_history)
        .map(|(instrument, has_history)| {
            if !*has_history {
                return None;
            }
            let series = &instrument.historical_returns;
            let tail = Array1::from(series[series.len() - observations..].to_vec());
            let mean = tail.mean().unwrap_or(0.0);
            Some(tail - mean)
        })
        .collect();

    for i in 0..n {
        for j in i..n {
            let value = match (&centered[i], &centered[j]) {
                (Some(a), Some(b)) => {
                    a.dot(b) / (observations as f64 - 1.0) * TRADING_DAYS
                }
                _ if i == j => fallback_variance(&instruments[i], default_variance),
                _ => 0.0,
            };
            matrix[[i, j]] = value;
            matrix[[j, i]] = value;
        }
    }

    for i in 0..n {
        matrix[[i, i]] += RIDGE;
    }

    CovarianceEstimate {
        matrix,
        from_history,
        observations,
    }
}

/// Reported volatility squared, else the configured default
fn fallback_variance(instrument: &Instrument, default_variance: f64) -> f64 {
    match instrument.metrics.volatility {
        Some(vol) if vol.is_finite() && vol > 0.0 => vol * vol,
        _ => default_variance,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{InstrumentMetrics, Market};
    use std::collections::BTreeSet;

    fn instrument(symbol: &str, volatility: Option<f64>, returns: Vec<f64>) -> Instrument {
        Instrument {
            symbol: symbol.to_string(),
            name: symbol.to_string(),
            category: "ETF".to_string(),
            market: Market::Us,
            currency: "USD".to_string(),
            expected_return: 0.08,
            risk_level: 5,
            compliance: BTreeSet::new(),
            metrics: InstrumentMetrics {
                volatility,
                ..Default::default()
            },
            historical_returns: returns,
            description: String::new(),
        }
    }

    fn alternating(len: usize, amplitude: f64) -> Vec<f64> {
        (0..len)
            .map(|i| if i % 2 == 0 { amplitude } else { -amplitude })
            .collect()
    }

    #[test]
    fn test_missing_history_uses_defaults() {
        let est = estimate(
            &[
                instrument("A", Some(0.2), vec![]),
                instrument("B", None, vec![0.01; 10]),
            ],
            0.09,
        );

        assert!((est.matrix[[0, 0]] - (0.04 + RIDGE)).abs() < 1e-12);
        assert!((est.matrix[[1, 1]] - (0.09 + RIDGE)).abs() < 1e-12);
        assert_eq!(est.matrix[[0, 1]], 0.0);
        assert_eq!(est.defaulted_count(), 2);
    }

    #[test]
    fn test_historical_covariance_is_annualized() {
        let est = estimate(
            &[
                instrument("A", None, alternating(40, 0.01)),
                instrument("B", None, alternating(40, 0.02)),
                instrument("C", Some(0.1), vec![]),
            ],
            0.09,
        );

        // 40 points of +-0.01 around zero mean: sample variance 0.0001 * 40 / 39
        let expected_a = 0.0001 * 40.0 / 39.0 * TRADING_DAYS;
        assert!((est.matrix[[0, 0]] - expected_a - RIDGE).abs() < 1e-12);
        // perfectly correlated series
        assert!((est.matrix[[0, 1]] - 2.0 * expected_a).abs() < 1e-12);
        assert_eq!(est.matrix[[0, 2]], 0.0);
        assert_eq!(est.observations, 40);
    }

    #[test]
    fn test_series_are_tail_aligned() {
        let mut long = vec![5.0; 10];
        long.extend(alternating(30, 0.01));

        let est = estimate(
            &[
                instrument("LONG", None, long),
                instrument("SHORT", None, alternating(30, 0.01)),
            ],
            0.09,
        );

        assert_eq!(est.observations, 30);
        // the 5.0 outliers sit outside the aligned window
        assert!(est.matrix[[0, 0]] < 0.1);
        assert!((est.matrix[[0, 0]] - est.matrix[[1, 1]]).abs() < 1e-12);
    }
}
