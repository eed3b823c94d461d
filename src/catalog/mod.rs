//! Instrument catalog
//!
//! The pipeline only needs to query instruments by market and compliance
//! flags. `InMemoryCatalog` ships with a seeded UAE/US universe so the
//! pipeline runs offline; a database-backed catalog can replace it.

use crate::models::{ComplianceFlag, Instrument, InstrumentMetrics, Market};
use crate::Result;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

pub mod retriever;
pub use retriever::{ContextRetriever, KeywordRetriever};

/// Read access to the tradable universe
#[async_trait]
pub trait InstrumentCatalog: Send + Sync {
    /// Instruments listed on any of `markets` (all markets when empty) that
    /// carry every flag in `compliance`
    async fn query(
        &self,
        markets: &[Market],
        compliance: &BTreeSet<ComplianceFlag>,
    ) -> Result<Vec<Instrument>>;
}

pub struct InMemoryCatalog {
    instruments: Arc<RwLock<HashMap<String, Instrument>>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self {
            instruments: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn with_instruments(instruments: Vec<Instrument>) -> Self {
        let map = instruments
            .into_iter()
            .map(|i| (i.symbol.clone(), i))
            .collect();
        Self {
            instruments: Arc::new(RwLock::new(map)),
        }
    }

    /// Catalog seeded with the default UAE and US universe
    pub fn seeded() -> Self {
        Self::with_instruments(default_universe())
    }

    pub async fn upsert(&self, instrument: Instrument) {
        let mut instruments = self.instruments.write().await;
        instruments.insert(instrument.symbol.clone(), instrument);
    }

    pub async fn len(&self) -> usize {
        self.instruments.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.instruments.read().await.is_empty()
    }
}

impl Default for InMemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InstrumentCatalog for InMemoryCatalog {
    async fn query(
        &self,
        markets: &[Market],
        compliance: &BTreeSet<ComplianceFlag>,
    ) -> Result<Vec<Instrument>> {
        let instruments = self.instruments.read().await;

        let mut matched: Vec<Instrument> = instruments
            .values()
            .filter(|i| {
                markets.is_empty()
                    || markets.contains(&Market::Global)
                    || markets.contains(&i.market)
            })
            .filter(|i| i.satisfies(compliance))
            .cloned()
            .collect();

        matched.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(matched)
    }
}

//
// ================= Seed Universe =================
//

/// (symbol, name, category, market, currency, risk level, dividend yield %, sharia, esg, description)
type SeedRow = (
    &'static str,
    &'static str,
    &'static str,
    Market,
    &'static str,
    u8,
    f64,
    bool,
    bool,
    &'static str,
);

const SEED: &[SeedRow] = &[
    ("FAB", "First Abu Dhabi Bank", "Banking", Market::Uae, "AED", 6, 4.2, true, false, "Largest bank in UAE"),
    ("ENBD", "Emirates NBD Bank", "Banking", Market::Uae, "AED", 6, 3.8, true, false, "Leading banking group in the region"),
    ("ADCB", "Abu Dhabi Commercial Bank", "Banking", Market::Uae, "AED", 6, 4.5, true, false, "Major commercial bank in UAE"),
    ("EMAAR", "Emaar Properties", "Real Estate", Market::Uae, "AED", 7, 2.5, true, false, "Leading real estate developer"),
    ("ALDAR", "Aldar Properties", "Real Estate", Market::Uae, "AED", 7, 3.1, true, false, "Abu Dhabi-based property developer"),
    ("ETISALAT", "Emirates Telecommunications", "Telecommunications", Market::Uae, "AED", 5, 5.2, true, true, "Leading telecom provider"),
    ("DU", "Emirates Integrated Telecommunications", "Telecommunications", Market::Uae, "AED", 6, 4.8, true, true, "Major telecom operator"),
    ("UAEETF", "UAE Equity ETF", "ETF", Market::Uae, "AED", 6, 2.8, true, false, "Tracks UAE stock market index"),
    ("GULFFUND", "Gulf Equity Fund", "Mutual Fund", Market::Uae, "AED", 7, 2.2, true, false, "Invests in GCC markets"),
    ("UAEGOV5Y", "UAE Government Bond 5Y", "Government Bond", Market::Uae, "AED", 2, 3.5, true, true, "5-year UAE government bond"),
    ("UAEGOV10Y", "UAE Government Bond 10Y", "Government Bond", Market::Uae, "AED", 3, 4.2, true, true, "10-year UAE government bond"),
    ("SUKUK5Y", "UAE Sukuk 5Y", "Islamic Bond", Market::Uae, "AED", 3, 3.8, true, true, "5-year Sharia-compliant bond"),
    ("ISLAMICFUND", "UAE Islamic Equity Fund", "Islamic Fund", Market::Uae, "AED", 6, 2.5, true, false, "Sharia-compliant equity fund"),
    ("GOLD", "Gold Investment", "Commodity", Market::Uae, "USD", 4, 0.0, true, false, "Physical gold investment"),
    ("SILVR", "Silver Investment", "Commodity", Market::Uae, "USD", 5, 0.0, true, false, "Physical silver investment"),
    ("SPY", "SPDR S&P 500 ETF", "ETF", Market::Us, "USD", 6, 1.3, false, false, "Tracks S&P 500 index"),
    ("QQQ", "Invesco QQQ ETF", "ETF", Market::Us, "USD", 8, 0.5, false, false, "Tracks Nasdaq-100 index"),
    ("VTI", "Vanguard Total Stock Market ETF", "ETF", Market::Us, "USD", 7, 1.4, false, false, "Total US stock market"),
    ("VEA", "Vanguard Developed Markets ETF", "ETF", Market::Us, "USD", 7, 2.1, false, true, "International developed markets"),
    ("VWO", "Vanguard Emerging Markets ETF", "ETF", Market::Us, "USD", 8, 2.8, false, false, "Emerging markets"),
    ("TLT", "iShares 20+ Year Treasury Bond ETF", "Bond ETF", Market::Us, "USD", 4, 2.4, false, true, "Long-term US Treasury bonds"),
    ("IEF", "iShares 7-10 Year Treasury Bond ETF", "Bond ETF", Market::Us, "USD", 3, 2.1, false, true, "Intermediate-term Treasury bonds"),
    ("AGG", "iShares Core US Aggregate Bond ETF", "Bond ETF", Market::Us, "USD", 3, 2.2, false, true, "US aggregate bond market"),
    ("AAPL", "Apple Inc.", "Technology Stock", Market::Us, "USD", 7, 0.4, false, false, "Technology giant"),
    ("MSFT", "Microsoft Corporation", "Technology Stock", Market::Us, "USD", 6, 0.7, false, true, "Software and cloud services"),
    ("GOOGL", "Alphabet Inc.", "Technology Stock", Market::Us, "USD", 7, 0.0, false, false, "Search and advertising"),
    ("AMZN", "Amazon.com Inc.", "Consumer Stock", Market::Us, "USD", 8, 0.0, false, false, "E-commerce and cloud"),
    ("TSLA", "Tesla Inc.", "Automotive Stock", Market::Us, "USD", 9, 0.0, false, false, "Electric vehicles"),
    ("VTSAX", "Vanguard Total Stock Market Index Fund", "Mutual Fund", Market::Us, "USD", 7, 1.3, false, false, "Total stock market index fund"),
    ("VTIAX", "Vanguard Total International Stock Index Fund", "Mutual Fund", Market::Us, "USD", 8, 2.2, false, false, "International stock index fund"),
    ("VNQ", "Vanguard Real Estate ETF", "REIT ETF", Market::Us, "USD", 6, 3.5, false, false, "US real estate investment trusts"),
    ("GLD", "SPDR Gold Shares", "Commodity ETF", Market::Us, "USD", 4, 0.0, true, false, "Gold commodity ETF"),
    ("SLV", "iShares Silver Trust", "Commodity ETF", Market::Us, "USD", 5, 0.0, true, false, "Silver commodity ETF"),
];

/// Default tradable universe with modelled return and volatility
pub fn default_universe() -> Vec<Instrument> {
    SEED.iter()
        .map(
            |&(symbol, name, category, market, currency, risk_level, dividend, sharia, esg, description)| {
                let mut compliance = BTreeSet::new();
                if sharia {
                    compliance.insert(ComplianceFlag::Sharia);
                }
                if esg {
                    compliance.insert(ComplianceFlag::Esg);
                }

                let expected_return = modelled_return(risk_level, category, market);
                let volatility = modelled_volatility(risk_level, category);

                Instrument {
                    symbol: symbol.to_string(),
                    name: name.to_string(),
                    category: category.to_string(),
                    market,
                    currency: currency.to_string(),
                    expected_return,
                    risk_level,
                    compliance,
                    metrics: InstrumentMetrics {
                        volatility: Some(volatility),
                        max_drawdown: None,
                        dividend_yield: Some(dividend / 100.0),
                        sharpe_ratio: None,
                    },
                    historical_returns: Vec::new(),
                    description: description.to_string(),
                }
            },
        )
        .collect()
}

fn modelled_return(risk_level: u8, category: &str, market: Market) -> f64 {
    let base = match (market, category) {
        (Market::Uae, "Banking") => 0.08,
        (Market::Uae, "Real Estate") => 0.06,
        (Market::Uae, "Government Bond") => 0.035,
        (Market::Uae, "Islamic Bond") => 0.04,
        (Market::Uae, "ETF") => 0.07,
        (Market::Uae, "Mutual Fund") => 0.08,
        (Market::Uae, "Islamic Fund") => 0.075,
        (Market::Uae, "Commodity") => 0.05,
        (Market::Uae, "Telecommunications") => 0.06,
        (_, "ETF") => 0.10,
        (_, "Technology Stock") => 0.15,
        (_, "Consumer Stock") => 0.12,
        (_, "Automotive Stock") => 0.18,
        (_, "Bond ETF") => 0.035,
        (_, "Mutual Fund") => 0.09,
        (_, "REIT ETF") => 0.08,
        (_, "Commodity ETF") => 0.06,
        (_, c) if c.contains("Stock") => 0.12,
        (_, c) if c.contains("Bond") => 0.035,
        _ => 0.08,
    };

    let base = if market == Market::Uae { base * 0.9 } else { base };
    (base + (risk_level as f64 - 5.0) * 0.015).max(0.01)
}

fn modelled_volatility(risk_level: u8, category: &str) -> f64 {
    let base = 0.08 + (risk_level as f64 - 1.0) * 0.025;

    let multiplier = match category {
        "Government Bond" => 0.25,
        "Islamic Bond" => 0.3,
        "Bond ETF" => 0.35,
        "Banking" => 0.7,
        "ETF" => 0.9,
        "Mutual Fund" => 0.85,
        "Islamic Fund" => 0.8,
        "Technology Stock" => 1.4,
        "Consumer Stock" => 1.2,
        "Automotive Stock" => 1.6,
        "Commodity" => 1.3,
        "Commodity ETF" => 1.2,
        "Telecommunications" => 0.8,
        c if c.contains("Stock") => 1.1,
        _ => 1.0,
    };

    (base * multiplier).max(0.05)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_query_by_market() {
        let catalog = InMemoryCatalog::seeded();
        let uae = catalog.query(&[Market::Uae], &BTreeSet::new()).await.unwrap();

        assert_eq!(uae.len(), 15);
        assert!(uae.iter().all(|i| i.market == Market::Uae));
        // sorted by symbol
        assert_eq!(uae.first().map(|i| i.symbol.as_str()), Some("ADCB"));
    }

    #[tokio::test]
    async fn test_query_requires_all_flags() {
        let catalog = InMemoryCatalog::seeded();
        let sharia: BTreeSet<_> = [ComplianceFlag::Sharia].into_iter().collect();

        let us = catalog.query(&[Market::Us], &sharia).await.unwrap();
        let symbols: Vec<_> = us.iter().map(|i| i.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["GLD", "SLV"]);

        let both: BTreeSet<_> = [ComplianceFlag::Sharia, ComplianceFlag::Esg].into_iter().collect();
        let screened = catalog.query(&[], &both).await.unwrap();
        assert!(screened.iter().all(|i| i.satisfies(&both)));
        assert!(!screened.is_empty());
    }

    #[tokio::test]
    async fn test_empty_market_list_means_any() {
        let catalog = InMemoryCatalog::seeded();
        let all = catalog.query(&[], &BTreeSet::new()).await.unwrap();
        assert_eq!(all.len(), catalog.len().await);
    }

    #[test]
    fn test_modelled_figures() {
        // UAE government bond: 0.035 * 0.9 - 3 * 0.015 floors at 1%
        assert!((modelled_return(2, "Government Bond", Market::Uae) - 0.01).abs() < 1e-12);
        assert!((modelled_return(6, "ETF", Market::Us) - 0.115).abs() < 1e-12);
        assert!((modelled_volatility(3, "Bond ETF") - 0.13 * 0.35).abs() < 1e-12);
    }
}
