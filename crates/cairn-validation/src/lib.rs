//! # cairn-validation
//!
//! Output validation for Cairn stages.
//!
//! This crate provides:
//! - Multi-run consensus over a generator, picking the most representative
//!   output by textual similarity
//! - Critics runner with isolated per-tool failures and weighted quality scores

mod consensus;
mod critics;

pub use consensus::{ConsensusMetadata, ConsensusOutcome, ConsensusResult, ConsensusValidator};
pub use critics::{
    Critic, CriticRegistry, CriticReport, CriticsRunner, QualityScores, CORRECTNESS,
    NEUTRAL_CATEGORY_SCORE, PERFORMANCE, SECURITY, TOOL_ERROR_CATEGORY,
};
