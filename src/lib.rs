//! Financial Plan Pipeline
//!
//! Turns a user's financial profile into a structured investment plan:
//! - Scores risk tolerance from weighted profile factors
//! - Builds a capped mean-variance allocation over catalog instruments
//! - Drafts the narrative with a generative backend and parses it into typed sections
//! - Synthesizes any section the draft is missing, so a plan is always produced
//! - Scores the plan with an independent backend and regenerates it at most once
//! - Records every committed plan in an append-only audit log
//!
//! PIPELINE:
//! PROFILE → OPTIMIZE → DRAFT → PARSE → EVALUATE → IMPROVE? → COMPLETE

pub mod audit;
pub mod backend;
pub mod catalog;
pub mod config;
pub mod drafter;
pub mod error;
pub mod evaluator;
pub mod models;
pub mod optimizer;
pub mod parser;
pub mod pipeline;
pub mod projection;
pub mod risk;

pub use error::{PlanError, Result};

// Re-export common types
pub use config::PipelineConfig;
pub use models::*;
pub use pipeline::Orchestrator;
