use financial_plan_pipeline::{
    backend::{gemini, ollama, GeminiBackend, GenerationBackend, OllamaBackend, ScriptedBackend},
    catalog::{default_universe, InMemoryCatalog, KeywordRetriever},
    models::{Market, RiskTolerance, UserProfile},
    Orchestrator, PipelineConfig,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn sample_profile() -> UserProfile {
    UserProfile {
        age: 28,
        retirement_age: 65,
        annual_income: 80_000.0,
        annual_expenses: 50_000.0,
        current_savings: 5_000.0,
        monthly_investable: None,
        risk_tolerance: RiskTolerance::Moderate,
        goals: vec!["Retirement".to_string(), "Buy a home".to_string()],
        compliance: BTreeSet::new(),
        preferred_markets: vec![Market::Uae],
        currency: "AED".to_string(),
        experience: None,
    }
}

fn load_profile() -> Result<UserProfile, Box<dyn std::error::Error>> {
    match std::env::args().nth(1) {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)?;
            info!(path = %path, "Loaded profile");
            Ok(serde_json::from_str(&raw)?)
        }
        None => {
            info!("No profile path given, using the sample profile");
            Ok(sample_profile())
        }
    }
}

fn drafter_backend() -> Result<Arc<dyn GenerationBackend>, Box<dyn std::error::Error>> {
    let base_url = std::env::var("OLLAMA_BASE_URL").ok();
    let model = std::env::var("OLLAMA_MODEL").ok();

    if base_url.is_none() && model.is_none() {
        warn!("OLLAMA_BASE_URL / OLLAMA_MODEL not set - drafting offline, every section will be synthesized");
        return Ok(Arc::new(ScriptedBackend::new("offline")));
    }

    let backend = OllamaBackend::new(
        base_url.unwrap_or_else(|| ollama::DEFAULT_BASE_URL.to_string()),
        model.unwrap_or_else(|| ollama::DEFAULT_MODEL.to_string()),
    )?;
    Ok(Arc::new(backend))
}

fn evaluator_backend() -> Result<Option<Arc<dyn GenerationBackend>>, Box<dyn std::error::Error>> {
    let Ok(api_key) = std::env::var("GEMINI_API_KEY") else {
        warn!("GEMINI_API_KEY not set - plans will not be evaluated");
        return Ok(None);
    };

    let model = std::env::var("GEMINI_MODEL").unwrap_or_else(|_| gemini::DEFAULT_MODEL.to_string());
    Ok(Some(Arc::new(GeminiBackend::new(api_key, model)?)))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Financial plan pipeline starting");

    let config = PipelineConfig::from_env()?;
    let catalog = Arc::new(InMemoryCatalog::seeded());
    let retriever = Arc::new(KeywordRetriever::from_instruments(&default_universe()));

    let mut orchestrator = Orchestrator::new(config, catalog, retriever, drafter_backend()?)?;
    if let Some(evaluator) = evaluator_backend()? {
        orchestrator = orchestrator.with_evaluator(evaluator);
    }

    let profile = load_profile()?;

    match orchestrator.generate_plan(profile).await {
        Ok(plan) => {
            info!(
                plan_id = %plan.metadata.plan_id,
                final_stage = ?plan.metadata.final_stage,
                degraded = plan.metadata.degraded,
                "Plan generated"
            );
            println!("{}", serde_json::to_string_pretty(&plan)?);
            Ok(())
        }
        Err(e) => {
            eprintln!("Plan generation failed: {}", e);
            Err(Box::new(e) as Box<dyn std::error::Error>)
        }
    }
}
