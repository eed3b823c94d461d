//! Candidate selection
//!
//! Picks the instruments handed to the optimizer: inside the category's
//! risk window first, ranked by excess return per unit of volatility, then
//! widened until the weight cap becomes satisfiable.

use crate::catalog::InstrumentCatalog;
use crate::models::{Instrument, RiskAssessment, UserProfile};
use crate::Result;
use std::cmp::Ordering;
use tracing::debug;

/// How far selection had to widen beyond the preferred pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Widening {
    None,
    RiskWindow,
    MarketFilter,
}

#[derive(Debug, Clone)]
pub struct Selection {
    pub instruments: Vec<Instrument>,
    pub widening: Widening,
}

pub struct CandidateSelector {
    pub max_candidates: usize,
    pub min_candidates: usize,
    pub risk_free_rate: f64,
    /// Volatility assumed when the catalog reports none
    pub default_volatility: f64,
}

impl CandidateSelector {
    pub async fn select(
        &self,
        catalog: &dyn InstrumentCatalog,
        profile: &UserProfile,
        risk: &RiskAssessment,
    ) -> Result<Selection> {
        let limit = self.max_candidates.max(self.min_candidates);
        let (lo, hi) = risk.category.risk_level_window();

        let pool = catalog
            .query(&profile.preferred_markets, &profile.compliance)
            .await?;

        let (inside, outside): (Vec<Instrument>, Vec<Instrument>) = pool
            .into_iter()
            .partition(|i| (lo..=hi).contains(&i.risk_level));

        let mut chosen = self.ranked(inside);
        chosen.truncate(limit);
        let mut widening = Widening::None;

        if chosen.len() < self.min_candidates {
            widening = Widening::RiskWindow;
            self.fill(&mut chosen, outside);
        }

        if chosen.len() < self.min_candidates && !profile.preferred_markets.is_empty() {
            widening = Widening::MarketFilter;
            let everywhere = catalog.query(&[], &profile.compliance).await?;
            self.fill(&mut chosen, everywhere);
        }

        debug!(
            selected = chosen.len(),
            widening = ?widening,
            window = ?(lo, hi),
            "Candidates selected"
        );

        Ok(Selection {
            instruments: chosen,
            widening,
        })
    }

    /// Top up `chosen` from `extra` until the minimum is met
    fn fill(&self, chosen: &mut Vec<Instrument>, extra: Vec<Instrument>) {
        let fresh: Vec<Instrument> = extra
            .into_iter()
            .filter(|i| !chosen.iter().any(|c| c.symbol == i.symbol))
            .collect();

        let needed = self.min_candidates.saturating_sub(chosen.len());
        chosen.extend(self.ranked(fresh).into_iter().take(needed));
    }

    pub fn score(&self, instrument: &Instrument) -> f64 {
        let vol = instrument
            .metrics
            .volatility
            .filter(|v| *v > 0.0)
            .unwrap_or(self.default_volatility);
        (instrument.expected_return - self.risk_free_rate) / vol
    }

    /// Best score first; ties by symbol
    fn ranked(&self, mut instruments: Vec<Instrument>) -> Vec<Instrument> {
        instruments.sort_by(|a, b| {
            self.score(b)
                .partial_cmp(&self.score(a))
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        instruments
    }
}
