//! Pipeline orchestrator - drives one profile through the plan stages
//!
//! PROFILE → OPTIMIZE → DRAFT → PARSE → EVALUATE → IMPROVE? → COMPLETE
//!
//! Every collaborator failure after validation is absorbed by a
//! deterministic fallback and recorded as a `Degradation`. Only an invalid
//! profile aborts a run.

pub mod candidates;

use crate::audit::{AuditLog, PlanRecord};
use crate::backend::GenerationBackend;
use crate::catalog::retriever::profile_query;
use crate::catalog::{ContextRetriever, InstrumentCatalog};
use crate::config::PipelineConfig;
use crate::drafter::PlanDrafter;
use crate::error::PlanError;
use crate::evaluator::PlanEvaluator;
use crate::models::{
    AllocationMethod, AllocationWeights, Degradation, EvaluationResult, Plan, PipelineStage,
    QualityMetadata, RiskAssessment, UserProfile,
};
use crate::optimizer::{rule_based_allocation, OptimizationConstraints, PortfolioOptimizer};
use crate::parser::{ParseOutcome, PlanParser};
use crate::risk::RiskProfiler;
use crate::Result;
use candidates::{CandidateSelector, Widening};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Forward position of a stage; terminal stages share the last slot
fn stage_order(stage: PipelineStage) -> u8 {
    match stage {
        PipelineStage::Profiling => 0,
        PipelineStage::Optimizing => 1,
        PipelineStage::Drafting => 2,
        PipelineStage::Parsing => 3,
        PipelineStage::Evaluating => 4,
        PipelineStage::Improving => 5,
        PipelineStage::Done | PipelineStage::Degraded => 6,
    }
}

/// Run-local bookkeeping, folded into the plan metadata at the end
#[derive(Default)]
struct RunState {
    stages: Vec<PipelineStage>,
    reasoning: Vec<String>,
    degradations: Vec<Degradation>,
}

impl RunState {
    fn advance(&mut self, stage: PipelineStage) {
        debug_assert!(
            self.stages
                .last()
                .map_or(true, |last| stage_order(*last) < stage_order(stage)),
            "stage {:?} after {:?}",
            stage,
            self.stages.last()
        );
        debug!(stage = ?stage, "Entering stage");
        self.stages.push(stage);
    }

    fn note(&mut self, line: impl Into<String>) {
        self.reasoning.push(line.into());
    }

    fn degrade(&mut self, degradation: Degradation) {
        warn!(degradation = ?degradation, "Falling back");
        self.degradations.push(degradation);
    }

    /// Stamp the run's trace onto the finished plan
    fn finish(self, plan: &mut Plan, stage: PipelineStage, quality: QualityMetadata) {
        let mut stages = self.stages;
        stages.push(stage);

        plan.metadata.final_stage = stage;
        plan.metadata.stage_trace = stages;
        plan.metadata.reasoning_trace = self.reasoning;
        plan.metadata.degradations = self.degradations;
        plan.metadata.degraded = !plan.metadata.synthesized_sections.is_empty();
        plan.metadata.quality = quality;
    }
}

/// Coordinates profiling, optimization, drafting and quality control
pub struct Orchestrator {
    config: PipelineConfig,
    profiler: RiskProfiler,
    optimizer: PortfolioOptimizer,
    selector: CandidateSelector,
    catalog: Arc<dyn InstrumentCatalog>,
    retriever: Arc<dyn ContextRetriever>,
    drafter: PlanDrafter,
    parser: PlanParser,
    evaluator: Option<PlanEvaluator>,
    audit_log: Arc<AuditLog>,
}

impl Orchestrator {
    pub fn new(
        config: PipelineConfig,
        catalog: Arc<dyn InstrumentCatalog>,
        retriever: Arc<dyn ContextRetriever>,
        drafter_backend: Arc<dyn GenerationBackend>,
    ) -> Result<Self> {
        config.validate()?;

        let selector = CandidateSelector {
            max_candidates: config.max_candidates,
            min_candidates: config.min_candidates(),
            risk_free_rate: config.risk_free_rate,
            default_volatility: config.default_variance.sqrt(),
        };

        Ok(Self {
            profiler: RiskProfiler::new(config.risk_weights.clone()),
            optimizer: PortfolioOptimizer::from_config(&config),
            selector,
            catalog,
            retriever,
            drafter: PlanDrafter::from_config(drafter_backend, &config),
            parser: PlanParser::from_config(&config),
            evaluator: None,
            audit_log: Arc::new(AuditLog::new()),
            config,
        })
    }

    /// Score drafts with an independent backend
    pub fn with_evaluator(mut self, backend: Arc<dyn GenerationBackend>) -> Self {
        self.evaluator = Some(PlanEvaluator::from_config(backend, &self.config));
        self
    }

    pub fn with_audit_log(mut self, audit_log: Arc<AuditLog>) -> Self {
        self.audit_log = audit_log;
        self
    }

    pub fn audit_log(&self) -> Arc<AuditLog> {
        self.audit_log.clone()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the full pipeline for one profile
    pub async fn generate_plan(&self, profile: UserProfile) -> Result<Plan> {
        let start_time = Instant::now();
        let mut state = RunState::default();

        profile.validate()?;

        info!(
            age = profile.age,
            retirement_age = profile.retirement_age,
            tolerance = %profile.risk_tolerance,
            markets = %profile.markets_label(),
            "Pipeline: starting plan generation"
        );
        state.note("INPUT: Profile validated");

        // === PROFILE ===
        state.advance(PipelineStage::Profiling);
        let risk = self.profiler.assess(&profile);

        info!(
            score = risk.score,
            category = %risk.category,
            horizon = risk.time_horizon_years,
            "Risk assessed"
        );
        state.note(format!(
            "PROFILE: {} risk ({:.1}/10), {} year horizon",
            risk.category, risk.score, risk.time_horizon_years
        ));

        // === OPTIMIZE ===
        state.advance(PipelineStage::Optimizing);
        let allocation = self.allocate(&profile, &risk, &mut state).await;

        info!(
            method = ?allocation.method,
            positions = allocation.positions.len(),
            expected_return = allocation.expected_return,
            volatility = allocation.volatility(),
            "Allocation ready"
        );
        state.note(format!(
            "OPTIMIZE: {:?} over {} positions, expected return {:.1}%, volatility {:.1}%",
            allocation.method,
            allocation.positions.len(),
            allocation.expected_return * 100.0,
            allocation.volatility() * 100.0
        ));

        // === DRAFT ===
        state.advance(PipelineStage::Drafting);
        let context = self.gather_context(&profile, &risk, &mut state).await;
        let draft = self.draft(&profile, &risk, &allocation, &context).await;

        let threshold = self.config.improvement_threshold;

        let (mut plan, evaluation, final_stage, quality) = match draft {
            Err(e) => {
                state.degrade(Degradation::DraftUnavailable {
                    reason: e.to_string(),
                });
                state.note(format!("DRAFT: Unavailable ({}); synthesizing every section", e));

                state.advance(PipelineStage::Parsing);
                let outcome = self.parser.synthesize(&profile, &risk, &allocation);
                state.note(format!(
                    "PARSE: {} sections synthesized",
                    outcome.synthesized.len()
                ));

                state.degrade(Degradation::EvaluationSkipped {
                    reason: "draft unavailable".to_string(),
                });
                (
                    outcome.plan,
                    None,
                    PipelineStage::Degraded,
                    QualityMetadata::not_used(threshold, "draft unavailable"),
                )
            }
            Ok(text) => {
                state.note(format!("DRAFT: {} characters from {}", text.len(), self.drafter.backend_name()));

                // === PARSE ===
                state.advance(PipelineStage::Parsing);
                let outcome = self.parser.parse(&text, &profile, &risk, &allocation);
                state.note(format!(
                    "PARSE: {} sections synthesized",
                    outcome.synthesized.len()
                ));

                let (plan, evaluation, quality) = self
                    .quality_control(outcome, &profile, &risk, &allocation, &mut state)
                    .await;
                (plan, evaluation, PipelineStage::Done, quality)
            }
        };

        state.note(format!(
            "COMPLETE: {:?} with {} degradation(s)",
            final_stage,
            state.degradations.len()
        ));
        state.finish(&mut plan, final_stage, quality);

        let execution_time_ms = start_time.elapsed().as_millis() as u64;
        // The plan is complete here; a failed audit write is logged, not returned
        let audit_id = match self
            .audit_log
            .record(PlanRecord::new(plan.clone(), evaluation, execution_time_ms))
            .await
        {
            Ok(audit_id) => Some(audit_id),
            Err(e) => {
                warn!(plan_id = %plan.metadata.plan_id, error = %e, "Audit record not written");
                None
            }
        };

        info!(
            plan_id = %plan.metadata.plan_id,
            audit_id = ?audit_id,
            final_stage = ?plan.metadata.final_stage,
            degraded = plan.metadata.degraded,
            execution_time_ms,
            "Pipeline: plan complete"
        );

        Ok(plan)
    }

    /// Score a plan without regenerating it
    pub async fn evaluate_existing(&self, plan: &Plan, profile: &UserProfile) -> Result<EvaluationResult> {
        profile.validate()?;

        let evaluator = self
            .evaluator
            .as_ref()
            .ok_or_else(|| PlanError::Config("no evaluator backend configured".to_string()))?;

        evaluator.evaluate(plan, profile).await
    }

    //
    // ================= Stages =================
    //

    async fn allocate(
        &self,
        profile: &UserProfile,
        risk: &RiskAssessment,
        state: &mut RunState,
    ) -> AllocationWeights {
        let selection = match self.selector.select(self.catalog.as_ref(), profile, risk).await {
            Ok(selection) if !selection.instruments.is_empty() => selection,
            Ok(_) => return self.rule_based(profile, risk, "catalog returned no eligible instruments", state),
            Err(e) => return self.rule_based(profile, risk, &format!("catalog unavailable: {}", e), state),
        };

        if selection.widening != Widening::None {
            debug!(widening = ?selection.widening, "Candidate pool widened");
        }
        state.note(format!(
            "CANDIDATES: {} selected ({:?} widening)",
            selection.instruments.len(),
            selection.widening
        ));

        let constraints = OptimizationConstraints {
            max_weight: self.config.max_weight,
            min_return: None,
        };

        match self
            .optimizer
            .optimize(&selection.instruments, risk.risk_budget, &constraints)
        {
            Ok(allocation) => {
                if allocation.method == AllocationMethod::EqualWeight {
                    state.degrade(Degradation::OptimizerFallback {
                        reason: allocation
                            .fallback_reason
                            .clone()
                            .unwrap_or_else(|| "optimization infeasible".to_string()),
                    });
                }
                allocation
            }
            Err(e) => self.rule_based(profile, risk, &e.to_string(), state),
        }
    }

    fn rule_based(
        &self,
        profile: &UserProfile,
        risk: &RiskAssessment,
        reason: &str,
        state: &mut RunState,
    ) -> AllocationWeights {
        state.degrade(Degradation::CatalogFallback {
            reason: reason.to_string(),
        });
        state.note(format!("CANDIDATES: None usable ({}); using rule-based sleeves", reason));
        rule_based_allocation(profile, risk, self.config.max_weight, reason)
    }

    async fn gather_context(
        &self,
        profile: &UserProfile,
        risk: &RiskAssessment,
        state: &mut RunState,
    ) -> Vec<String> {
        let query = profile_query(profile, risk);

        match self.retriever.retrieve(&query, self.config.context_k).await {
            Ok(snippets) => {
                state.note(format!("CONTEXT: {} snippets retrieved", snippets.len()));
                snippets
            }
            Err(e) => {
                state.degrade(Degradation::ContextUnavailable {
                    reason: e.to_string(),
                });
                state.note("CONTEXT: Retriever unavailable; drafting without context");
                Vec::new()
            }
        }
    }

    /// First attempt plus `generation_retries` more
    async fn draft(
        &self,
        profile: &UserProfile,
        risk: &RiskAssessment,
        allocation: &AllocationWeights,
        context: &[String],
    ) -> Result<String> {
        let attempts = self.config.generation_retries + 1;
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.drafter.draft(profile, risk, allocation, context).await {
                Ok(text) => return Ok(text),
                Err(e) => {
                    warn!(attempt, attempts, error = %e, "Draft attempt failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| PlanError::GenerationError("no draft attempts made".to_string())))
    }

    /// Evaluate the parsed plan and regenerate it at most once
    async fn quality_control(
        &self,
        outcome: ParseOutcome,
        profile: &UserProfile,
        risk: &RiskAssessment,
        allocation: &AllocationWeights,
        state: &mut RunState,
    ) -> (Plan, Option<EvaluationResult>, QualityMetadata) {
        let threshold = self.config.improvement_threshold;

        let Some(evaluator) = &self.evaluator else {
            state.degrade(Degradation::EvaluationSkipped {
                reason: "no evaluator configured".to_string(),
            });
            state.note("EVALUATE: Skipped, no evaluator configured");
            return (
                outcome.plan,
                None,
                QualityMetadata::not_used(threshold, "no evaluator configured"),
            );
        };

        // === EVALUATE ===
        state.advance(PipelineStage::Evaluating);
        let evaluation = match evaluator.evaluate(&outcome.plan, profile).await {
            Ok(evaluation) => evaluation,
            Err(e) => {
                let reason = format!("evaluation failed: {}", e);
                state.degrade(Degradation::EvaluationSkipped {
                    reason: reason.clone(),
                });
                state.note(format!("EVALUATE: Not used ({})", e));
                return (outcome.plan, None, QualityMetadata::not_used(threshold, reason));
            }
        };

        state.note(format!(
            "EVALUATE: Score {:.1} against threshold {:.1} from {}",
            evaluation.score, threshold, evaluation.evaluator
        ));

        if !evaluation.needs_improvement(threshold) {
            let quality = QualityMetadata::from_evaluation(
                &evaluation,
                threshold,
                false,
                format!("score {:.1} meets threshold {:.1}", evaluation.score, threshold),
            );
            return (outcome.plan, Some(evaluation), quality);
        }

        // === IMPROVE ===
        state.advance(PipelineStage::Improving);
        info!(
            score = evaluation.score,
            threshold,
            "Score below threshold - requesting one rewrite"
        );

        let failure = match evaluator
            .request_improvement(&outcome.plan, profile, &evaluation)
            .await
        {
            Ok(text) => {
                let improved = self.parser.parse(&text, profile, risk, allocation);

                if improved.synthesized.len() <= outcome.synthesized.len() {
                    state.note(format!(
                        "IMPROVE: Rewrite accepted ({} sections synthesized)",
                        improved.synthesized.len()
                    ));
                    let quality = QualityMetadata::from_evaluation(
                        &evaluation,
                        threshold,
                        true,
                        format!(
                            "improved after score {:.1} fell below {:.1}",
                            evaluation.score, threshold
                        ),
                    );
                    let evaluation = evaluation.with_improved_plan(improved.plan.clone());
                    return (improved.plan, Some(evaluation), quality);
                }

                format!(
                    "rewrite synthesized {} sections against {} in the original",
                    improved.synthesized.len(),
                    outcome.synthesized.len()
                )
            }
            Err(e) => e.to_string(),
        };

        state.degrade(Degradation::ImprovementFailed {
            reason: failure.clone(),
        });
        state.note(format!("IMPROVE: Keeping original plan ({})", failure));

        let quality = QualityMetadata::from_evaluation(
            &evaluation,
            threshold,
            false,
            format!("improvement failed: {}", failure),
        );
        (outcome.plan, Some(evaluation), quality)
    }
}
