use financial_plan_pipeline::audit::AuditLog;
use financial_plan_pipeline::backend::ScriptedBackend;
use financial_plan_pipeline::catalog::{default_universe, InMemoryCatalog, KeywordRetriever};
use financial_plan_pipeline::evaluator::render_plan;
use financial_plan_pipeline::{
    AllocationMethod, ComplianceFlag, Degradation, Market, Orchestrator, PipelineConfig, PipelineStage, Plan,
    PlanError, RiskCategory, RiskTolerance, UserProfile,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

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

fn verdict(score: f64) -> String {
    format!(
        r#"```json
{{
  "accuracy_score": {s}, "accuracy_feedback": "ok",
  "completeness_score": {s}, "completeness_feedback": "ok",
  "specificity_score": {s}, "specificity_feedback": "ok",
  "risk_alignment_score": {s}, "risk_alignment_feedback": "ok",
  "market_relevance_score": {s}, "market_relevance_feedback": "ok",
  "compliance_score": {s}, "compliance_feedback": "ok",
  "key_issues": ["Advice is generic"],
  "improvement_suggestions": ["Reference the client's savings rate"]
}}
```"#,
        s = score
    )
}

fn build(config: PipelineConfig, drafter: Arc<ScriptedBackend>) -> Orchestrator {
    Orchestrator::new(
        config,
        Arc::new(InMemoryCatalog::seeded()),
        Arc::new(KeywordRetriever::from_instruments(&default_universe())),
        drafter,
    )
    .unwrap()
}

/// A fully synthesized plan for the sample profile, built offline
async fn offline_plan() -> Plan {
    let offline = Arc::new(ScriptedBackend::new("offline"));
    build(PipelineConfig::default(), offline)
        .generate_plan(sample_profile())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_sample_profile_is_moderate_with_37_year_horizon() {
    let plan = offline_plan().await;

    assert_eq!(plan.risk_assessment.category, RiskCategory::Moderate);
    assert_eq!(plan.time_horizon_years(), 37);
    assert_ne!(plan.metadata.allocation_method, AllocationMethod::RuleBased);
    assert!(plan.recommendations.iter().all(|r| r.symbol != "GLOBAL_EQUITY"));
}

#[tokio::test]
async fn test_recommendations_carry_optimizer_weights() {
    let config = PipelineConfig::default();
    let cap = config.max_weight;
    let plan = offline_plan().await;
    let investable = plan.profile.investable_per_month();

    let total: f64 = plan.weights().values().sum();
    assert!((total - 1.0).abs() < 1e-6, "weights sum to {}", total);

    for rec in &plan.recommendations {
        assert!(rec.allocation_pct / 100.0 <= cap + 1e-6, "{} over cap", rec.symbol);
        let expected = rec.allocation_pct / 100.0 * investable;
        assert!((rec.monthly_amount - expected).abs() < 1e-6);
    }
}

#[tokio::test]
async fn test_drafter_stall_yields_degraded_plan() {
    let drafter = Arc::new(ScriptedBackend::new("slow").stall());
    let judge = Arc::new(ScriptedBackend::new("judge").reply(verdict(9.0)));
    let config = PipelineConfig {
        draft_timeout: Duration::from_millis(50),
        ..PipelineConfig::default()
    };

    let plan = build(config, drafter.clone())
        .with_evaluator(judge.clone())
        .generate_plan(sample_profile())
        .await
        .unwrap();

    assert!(plan.metadata.degraded);
    assert_eq!(plan.metadata.final_stage, PipelineStage::Degraded);
    assert_eq!(plan.metadata.synthesized_sections.len(), 7);
    assert!(!plan.metadata.quality.evaluator_used);
    assert!(plan
        .metadata
        .degradations
        .iter()
        .any(|d| matches!(d, Degradation::DraftUnavailable { .. })));
    assert_eq!(drafter.calls().await, 1);
    assert_eq!(judge.calls().await, 0);
}

#[tokio::test]
async fn test_score_at_threshold_keeps_plan() {
    let draft = render_plan(&offline_plan().await);
    let drafter = Arc::new(ScriptedBackend::new("drafter").reply(draft));
    let judge = Arc::new(ScriptedBackend::new("judge").reply(verdict(8.5)));
    let audit_log = Arc::new(AuditLog::new());

    let plan = build(PipelineConfig::default(), drafter)
        .with_evaluator(judge.clone())
        .with_audit_log(audit_log.clone())
        .generate_plan(sample_profile())
        .await
        .unwrap();

    assert_eq!(judge.calls().await, 1);
    assert!(!plan.metadata.degraded);
    assert_eq!(plan.metadata.final_stage, PipelineStage::Done);
    assert!(plan.metadata.quality.evaluator_used);
    assert!(!plan.metadata.quality.improvement_applied);
    assert_eq!(plan.metadata.quality.evaluator.as_deref(), Some("judge"));
    assert!(!plan.metadata.stage_trace.contains(&PipelineStage::Improving));

    let records = audit_log.list_recent(10).await.unwrap();
    assert_eq!(records.len(), 1);
    let evaluation = records[0].evaluation.as_ref().unwrap();
    assert!(evaluation.improved_plan.is_none());
    assert!((evaluation.score - 8.5).abs() < 1e-9);
}

#[tokio::test]
async fn test_score_below_threshold_regenerates_once() {
    let base = offline_plan().await;
    let draft = render_plan(&base);

    let mut rewritten = base.clone();
    rewritten.executive_summary =
        "Revised plan: AED 2,500 a month into the allocation keeps retirement on schedule.".to_string();
    let rewrite = render_plan(&rewritten);

    let drafter = Arc::new(ScriptedBackend::new("drafter").reply(draft));
    let judge = Arc::new(
        ScriptedBackend::new("judge")
            .reply(verdict(6.0))
            .reply(rewrite)
            .reply(verdict(9.0)),
    );
    let orchestrator = build(PipelineConfig::default(), drafter.clone()).with_evaluator(judge.clone());

    let plan = orchestrator.generate_plan(sample_profile()).await.unwrap();

    // One verdict plus one rewrite; the rewrite is not re-scored
    assert_eq!(judge.calls().await, 2);
    assert_eq!(drafter.calls().await, 1);
    assert_eq!(plan.executive_summary, rewritten.executive_summary);
    assert!(plan.metadata.quality.improvement_applied);
    assert_eq!(plan.metadata.final_stage, PipelineStage::Done);
    assert_eq!(
        plan.metadata.stage_trace,
        vec![
            PipelineStage::Profiling,
            PipelineStage::Optimizing,
            PipelineStage::Drafting,
            PipelineStage::Parsing,
            PipelineStage::Evaluating,
            PipelineStage::Improving,
            PipelineStage::Done,
        ]
    );

    let records = orchestrator.audit_log().list_recent(1).await.unwrap();
    let improved = records[0]
        .evaluation
        .as_ref()
        .and_then(|e| e.improved_plan.as_ref())
        .unwrap();
    assert_eq!(improved.executive_summary, plan.executive_summary);
}

#[tokio::test]
async fn test_invalid_profile_fails_before_any_backend_call() {
    let drafter = Arc::new(ScriptedBackend::new("drafter").reply("unused"));
    let judge = Arc::new(ScriptedBackend::new("judge").reply(verdict(9.0)));
    let orchestrator = build(PipelineConfig::default(), drafter.clone()).with_evaluator(judge.clone());

    let mut profile = sample_profile();
    profile.retirement_age = profile.age;

    let result = orchestrator.generate_plan(profile).await;

    assert!(matches!(result, Err(PlanError::Validation(_))));
    assert_eq!(drafter.calls().await, 0);
    assert_eq!(judge.calls().await, 0);
    assert!(orchestrator.audit_log().is_empty().await);
}

#[tokio::test]
async fn test_every_plan_is_audited() {
    let orchestrator = build(PipelineConfig::default(), Arc::new(ScriptedBackend::new("offline")));

    let plan = orchestrator.generate_plan(sample_profile()).await.unwrap();
    let records = orchestrator.audit_log().list_recent(5).await.unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].plan.metadata.plan_id, plan.metadata.plan_id);
    assert!(records[0].evaluation.is_none());
    assert!(orchestrator
        .audit_log()
        .verify_integrity(records[0].audit_id)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_sharia_profile_only_gets_screened_instruments() {
    let mut profile = sample_profile();
    profile.compliance.insert(ComplianceFlag::Sharia);
    profile.preferred_markets = vec![Market::Uae, Market::Us];

    let orchestrator = build(PipelineConfig::default(), Arc::new(ScriptedBackend::new("offline")));
    let plan = orchestrator.generate_plan(profile).await.unwrap();

    let universe = default_universe();
    assert!(!plan.recommendations.is_empty());
    assert_ne!(plan.metadata.allocation_method, AllocationMethod::RuleBased);
    for rec in &plan.recommendations {
        let instrument = universe
            .iter()
            .find(|i| i.symbol == rec.symbol)
            .unwrap_or_else(|| panic!("{} not in the catalog", rec.symbol));
        assert!(
            instrument.compliance.contains(&ComplianceFlag::Sharia),
            "{} is not Sharia-screened",
            rec.symbol
        );
    }
}
