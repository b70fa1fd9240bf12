//! # cairn-core
//!
//! Core types for the Cairn stage pipeline.
//!
//! Cairn drives a document through six ordered stages. Every stage calls an
//! external, non-deterministic generator, and the engine decides whether the
//! result is accepted, refined, or rejected.
//!
//! ## Core Paradigm
//!
//! - Stages are a closed, ordered set (no string lookups at call time)
//! - Agreement is measured, not assumed: repeated runs are compared
//! - Critics are advisory and can never abort a stage
//! - Context is durable per session and expires on its own

pub mod config;
mod error;
pub mod fail_open;
pub mod similarity;
mod types;

pub use config::{
    CairnConfig, ConsensusConfig, CriticWeights, CriticsConfig, RefinementConfig, StoreConfig,
};
pub use error::{CairnError, Result};
pub use types::*;
