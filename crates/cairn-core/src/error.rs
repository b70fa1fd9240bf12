//! Unified error types for Cairn

use thiserror::Error;

use crate::types::{Stage, WorkflowStatus};

/// Unified error type for all Cairn operations
#[derive(Error, Debug)]
pub enum CairnError {
    // Context errors
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Session already exists: {0}")]
    SessionExists(String),

    #[error("Session is busy: {0}")]
    SessionBusy(String),

    // Stage errors
    #[error("Unknown stage: {0}")]
    UnknownStage(String),

    #[error("No processor registered for stage {0}")]
    MissingProcessor(Stage),

    #[error("Invalid stage transition: {from} -> {to}")]
    InvalidTransition { from: Stage, to: Stage },

    #[error("Stage {stage} failed: {message}")]
    Processor { stage: Stage, message: String },

    // Workflow errors
    #[error("Invalid workflow status transition: {0}")]
    InvalidStatusTransition(String),

    #[error("Workflow is {0}; reset it before executing further stages")]
    WorkflowClosed(WorkflowStatus),

    #[error("Workflow is paused: {0}")]
    WorkflowPaused(String),

    // Consensus errors
    #[error("Consensus not reached: confidence {confidence:.3} below threshold {threshold:.3}")]
    ConsensusFailure { confidence: f64, threshold: f64 },

    #[error("Insufficient successful runs: {successful} of {required} required")]
    InsufficientRuns { successful: usize, required: usize },

    #[error("Generator error: {0}")]
    Generator(String),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(#[source] Box<CairnError>),

    #[error("Validation failed: {0}")]
    ValidationMessage(String),

    // Critic errors
    #[error("Critic '{tool}' failed: {message}")]
    CriticTool { tool: String, message: String },

    // Store errors
    #[error("Store error: {0}")]
    Store(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(String),
}

impl CairnError {
    /// Wrap an unexpected error raised while validating output
    pub fn validation(cause: CairnError) -> Self {
        Self::Validation(Box::new(cause))
    }

    /// Whether this error came out of the consensus validator
    pub fn is_consensus(&self) -> bool {
        matches!(
            self,
            Self::ConsensusFailure { .. } | Self::InsufficientRuns { .. }
        )
    }
}

/// Result type alias using CairnError
pub type Result<T> = std::result::Result<T, CairnError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_transition_message() {
        let err = CairnError::InvalidTransition {
            from: Stage::Ambiguity,
            to: Stage::Planning,
        };
        assert_eq!(
            err.to_string(),
            "Invalid stage transition: ambiguity -> planning"
        );
    }

    #[test]
    fn test_validation_wraps_cause() {
        let err = CairnError::validation(CairnError::Other("boom".to_string()));
        assert!(err.to_string().contains("boom"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_consensus_errors_are_distinguishable() {
        let failure = CairnError::ConsensusFailure {
            confidence: 0.4,
            threshold: 0.8,
        };
        let insufficient = CairnError::InsufficientRuns {
            successful: 1,
            required: 3,
        };
        assert!(failure.is_consensus());
        assert!(insufficient.is_consensus());
        assert!(matches!(failure, CairnError::ConsensusFailure { .. }));
        assert!(!matches!(insufficient, CairnError::ConsensusFailure { .. }));
    }
}
