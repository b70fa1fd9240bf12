//! # cairn-metrics
//!
//! Quality metrics for Cairn stage outputs.
//!
//! This crate provides:
//! - Heuristic assessment of a JSON output into completeness, clarity,
//!   determinism and consistency
//! - Summaries over a session's metrics history

mod assessor;
mod summary;

pub use assessor::{assess, HeuristicAssessor};
pub use summary::{MetricsSummary, Trend};
