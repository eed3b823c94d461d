//! Error types for the plan generation pipeline

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PlanError>;

#[derive(Error, Debug)]
pub enum PlanError {

    // =============================
    // Caller-visible
    // =============================

    #[error("Invalid profile: {0}")]
    Validation(#[from] ValidationError),

    // =============================
    // Recoverable (absorbed by the pipeline)
    // =============================

    #[error("Optimization infeasible: {0}")]
    OptimizationInfeasible(String),

    #[error("Generation timed out after {0:?}")]
    GenerationTimeout(Duration),

    #[error("Generation error: {0}")]
    GenerationError(String),

    #[error("Evaluation output unparsable: {0}")]
    EvaluationUnparsable(String),

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Retrieval error: {0}")]
    Retrieval(String),

    // =============================
    // Setup
    // =============================

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Audit error: {0}")]
    Audit(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl PlanError {
    /// Whether the pipeline can absorb this error with a deterministic fallback
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            PlanError::Validation(_) | PlanError::Config(_)
        )
    }
}

/// A malformed user profile. Lists every violated rule, not just the first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub violations: Vec<String>,
}

impl ValidationError {
    pub fn new(violations: Vec<String>) -> Self {
        Self { violations }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.violations.join("; "))
    }
}

impl std::error::Error for ValidationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_is_not_recoverable() {
        let err = PlanError::from(ValidationError::new(vec![
            "Retirement age must be greater than current age".to_string(),
        ]));
        assert!(!err.is_recoverable());
        assert!(err.to_string().contains("Retirement age"));
    }

    #[test]
    fn test_generation_errors_are_recoverable() {
        assert!(PlanError::GenerationTimeout(Duration::from_secs(3)).is_recoverable());
        assert!(PlanError::OptimizationInfeasible("caps".into()).is_recoverable());
        assert!(PlanError::EvaluationUnparsable("no json".into()).is_recoverable());
    }
}
