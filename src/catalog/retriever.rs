//! Context retrieval for the draft prompt
//!
//! `KeywordRetriever` ranks documents by term overlap with the query.
//! It stands in for a vector store: same contract, no network.

use crate::models::{ComplianceFlag, Instrument, RiskAssessment, UserProfile};
use crate::Result;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;

#[async_trait]
pub trait ContextRetriever: Send + Sync {
    /// Up to `k` snippets relevant to `query`, most relevant first
    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<String>>;
}

/// Terms too common to carry signal
const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "from", "are", "was", "not",
    "user", "profile", "investment", "investments", "years", "year",
];

#[derive(Debug, Clone)]
struct Document {
    text: String,
    terms: HashSet<String>,
}

impl Document {
    fn new(text: String) -> Self {
        let terms = tokenize(&text).into_iter().collect();
        Self { text, terms }
    }
}

pub struct KeywordRetriever {
    documents: Arc<RwLock<Vec<Document>>>,
}

impl KeywordRetriever {
    pub fn new() -> Self {
        Self {
            documents: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn with_documents(texts: Vec<String>) -> Self {
        let docs = texts.into_iter().map(Document::new).collect();
        Self {
            documents: Arc::new(RwLock::new(docs)),
        }
    }

    /// Knowledge base built from instrument fact sheets
    pub fn from_instruments(instruments: &[Instrument]) -> Self {
        Self::with_documents(instruments.iter().map(fact_sheet).collect())
    }

    pub async fn add_document(&self, text: impl Into<String>) {
        let mut documents = self.documents.write().await;
        documents.push(Document::new(text.into()));
    }
}

impl Default for KeywordRetriever {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContextRetriever for KeywordRetriever {
    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<String>> {
        let query_terms: HashSet<String> = tokenize(query).into_iter().collect();
        if query_terms.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let documents = self.documents.read().await;

        let mut scored: Vec<(usize, usize)> = documents
            .iter()
            .enumerate()
            .map(|(idx, doc)| (idx, query_terms.intersection(&doc.terms).count()))
            .filter(|(_, score)| *score > 0)
            .collect();

        // Highest overlap first, insertion order breaks ties
        scored.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(idx, _)| documents[idx].text.clone())
            .collect())
    }
}

/// Retrieval query enriched with the profile's preferences
pub fn profile_query(profile: &UserProfile, risk: &RiskAssessment) -> String {
    let mut parts = vec![
        format!("Risk tolerance: {}", profile.risk_tolerance),
        format!("Risk category: {}", risk.category),
        format!("Investment goals: {}", profile.goals_or_default().join(", ")),
        format!("Preferred market: {}", profile.markets_label()),
        format!("Currency: {}", profile.currency),
    ];

    if profile.requires(ComplianceFlag::Sharia) {
        parts.push("Sharia compliant islamic sukuk".to_string());
    }
    if profile.requires(ComplianceFlag::Esg) {
        parts.push("ESG sustainable".to_string());
    }

    format!("Long-term financial plan. {}", parts.join("; "))
}

fn fact_sheet(instrument: &Instrument) -> String {
    let volatility = instrument
        .metrics
        .volatility
        .map(|v| format!("{:.1}%", v * 100.0))
        .unwrap_or_else(|| "N/A".to_string());

    let screening = if instrument.compliance.is_empty() {
        "none".to_string()
    } else {
        instrument
            .compliance
            .iter()
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    };

    format!(
        "Investment Instrument: {} ({})\nCategory: {}\nMarket: {}\nRisk Level: {}\nExpected Return: {:.1}%\nVolatility: {}\nScreening: {}\nDescription: {}",
        instrument.name,
        instrument.symbol,
        instrument.category,
        instrument.market,
        instrument.risk_level,
        instrument.expected_return * 100.0,
        volatility,
        screening,
        instrument.description,
    )
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 3)
        .map(|t| t.to_lowercase())
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::default_universe;

    #[tokio::test]
    async fn test_ranks_by_overlap() {
        let retriever = KeywordRetriever::with_documents(vec![
            "Gold is a hedge against inflation".to_string(),
            "Sukuk are sharia compliant bonds".to_string(),
            "Sharia compliant sukuk ladder for conservative income".to_string(),
        ]);

        let hits = retriever.retrieve("sharia sukuk income", 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].contains("ladder"));
        assert!(hits[1].starts_with("Sukuk"));
    }

    #[tokio::test]
    async fn test_no_overlap_returns_empty() {
        let retriever = KeywordRetriever::with_documents(vec!["Treasury bonds".to_string()]);
        assert!(retriever.retrieve("cryptocurrency", 5).await.unwrap().is_empty());
        assert!(retriever.retrieve("treasury", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fact_sheets_are_searchable() {
        let retriever = KeywordRetriever::from_instruments(&default_universe());
        let hits = retriever.retrieve("UAE sukuk sharia", 3).await.unwrap();
        assert!(!hits.is_empty());
        assert!(hits[0].contains("SUKUK5Y"));
    }
}
