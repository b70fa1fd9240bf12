//! Key layout for the context store
//!
//! Every record lives under its own key so writes stay single-key:
//! - `cairn:ctx:{session}`            hash, the session context
//! - `cairn:stage:{session}:{stage}`  string, one stage snapshot
//! - `cairn:exec:{session}`           string, the workflow execution
//! - `cairn:metrics:{session}`        sorted set, metrics by timestamp

use cairn_core::Stage;

pub const PREFIX: &str = "cairn";

pub fn context(session_id: &str) -> String {
    format!("{}:ctx:{}", PREFIX, session_id)
}

pub fn stage_result(session_id: &str, stage: Stage) -> String {
    format!("{}:stage:{}:{}", PREFIX, session_id, stage)
}

pub fn execution(session_id: &str) -> String {
    format!("{}:exec:{}", PREFIX, session_id)
}

pub fn metrics(session_id: &str) -> String {
    format!("{}:metrics:{}", PREFIX, session_id)
}

/// Every stage-scoped key for a session
pub fn all_stage_results(session_id: &str) -> Vec<String> {
    Stage::ALL
        .iter()
        .map(|stage| stage_result(session_id, *stage))
        .collect()
}

/// Hash fields of a stored context
pub mod fields {
    pub const SESSION_ID: &str = "session_id";
    pub const STAGE: &str = "stage";
    pub const PREVIOUS_OUTPUT: &str = "previous_output";
    pub const CURRENT_INPUT: &str = "current_input";
    pub const METADATA: &str = "metadata";
    pub const TIMESTAMP: &str = "timestamp";
}
