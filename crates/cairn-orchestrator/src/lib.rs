//! # cairn-orchestrator
//!
//! Stage pipeline orchestration for Cairn.
//!
//! This crate provides:
//! - Stage processor contract and an immutable, complete stage registry
//! - Pure state machine for workflow status
//! - Bounded refinement loop
//! - Per-session execution guard
//! - Workflow manager wiring processors, consensus, critics, refinement and
//!   the context store together

mod refinement;
mod sessions;
mod stages;
mod state_machine;
mod workflow;

pub use refinement::{AcceptanceThresholds, RefinementLoop, RefinementOutcome, Refiner};
pub use sessions::{SessionClaim, SessionGuard};
pub use stages::{StageProcessor, StageRegistry, StageRegistryBuilder, StageValidation};
pub use state_machine::{transition, Action, Event};
pub use workflow::{ConsensusSummary, StageSnapshot, WorkflowManager};
