//! Pure state machine for workflow status
//!
//! This module has NO I/O. The workflow manager feeds it events and carries
//! out the returned actions.
//!
//! - Pure function: transition(status, event) -> (status, actions)
//! - Completed and Failed are terminal and reject every event
//! - Invalid events return `InvalidStatusTransition` (never panic)

use cairn_core::{CairnError, Result, Stage, WorkflowStatus};

/// Events that drive workflow status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A stage finished and its output was committed
    StageSucceeded { stage: Stage, last: bool },
    /// A stage failed anywhere between the transition guard and commit
    StageFailed { stage: Stage, error: String },
    Pause,
    Resume,
}

/// Side effects the caller performs after a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    LogActivity { message: String },
    /// Append the pending stage record to the execution history
    RecordStage { stage: Stage },
    /// Store error details on the execution
    RecordError { stage: Stage, error: String },
    PersistExecution,
}

/// Pure status transition function
///
/// A stage that was already in flight when the workflow was paused may still
/// succeed or fail; the result is recorded without resuming.
pub fn transition(status: WorkflowStatus, event: Event) -> Result<(WorkflowStatus, Vec<Action>)> {
    use WorkflowStatus::*;

    match (status, event) {
        (Running | Paused, Event::StageSucceeded { stage, last }) => {
            let next = if last { Completed } else { status };
            let message = if last {
                format!("Stage {} complete, workflow completed", stage)
            } else {
                format!("Stage {} complete", stage)
            };
            Ok((
                next,
                vec![
                    Action::RecordStage { stage },
                    Action::LogActivity { message },
                    Action::PersistExecution,
                ],
            ))
        }

        (Running | Paused, Event::StageFailed { stage, error }) => Ok((
            Failed,
            vec![
                Action::LogActivity {
                    message: format!("Stage {} failed: {}", stage, error),
                },
                Action::RecordError { stage, error },
                Action::PersistExecution,
            ],
        )),

        (Running, Event::Pause) => Ok((
            Paused,
            vec![
                Action::LogActivity {
                    message: "Workflow paused".to_string(),
                },
                Action::PersistExecution,
            ],
        )),

        (Paused, Event::Resume) => Ok((
            Running,
            vec![
                Action::LogActivity {
                    message: "Workflow resumed".to_string(),
                },
                Action::PersistExecution,
            ],
        )),

        (status, event) => Err(CairnError::InvalidStatusTransition(format!(
            "{} cannot handle {:?}",
            status, event
        ))),
    }
}
