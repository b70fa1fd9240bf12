//! Workflow manager
//!
//! Wires stage processors, consensus, critics, refinement and the context
//! store together for each stage, and drives the six-stage pipeline.
//!
//! Per stage:
//! 1. Claim the session, load the context and the execution record
//! 2. Guard the stage transition
//! 3. Generate (through consensus when enabled)
//! 4. Run critics
//! 5. Refine
//! 6. Compute metrics
//! 7. Commit: advance the context, store the snapshot, record metrics and
//!    append to the execution history
//!
//! Any failure in steps 2-7 marks the execution failed before re-raising.

use async_trait::async_trait;
use cairn_core::fail_open::fail_open_with_retries;
use cairn_core::{
    CairnConfig, CairnError, CriticResult, ExecutionRecord, Metrics, Result, SessionContext,
    Stage, WorkflowExecution, WorkflowStatus,
};
use cairn_metrics::{HeuristicAssessor, MetricsSummary};
use cairn_store::{ContextStore, KvBackend, UpdateOptions};
use cairn_validation::{
    ConsensusMetadata, ConsensusValidator, CriticRegistry, CriticsRunner, QualityScores,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

use crate::refinement::{AcceptanceThresholds, RefinementLoop, Refiner};
use crate::sessions::{ExecutionLocks, SessionGuard};
use crate::stages::{StageProcessor, StageRegistry, StageValidation};
use crate::state_machine::{transition, Action, Event};

/// Attempts for the advisory metrics history write
const METRICS_WRITE_ATTEMPTS: usize = 2;

/// Agreement figures kept with a stage snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusSummary {
    pub confidence: f64,
    pub metadata: ConsensusMetadata,
}

/// Persisted record of one stage execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSnapshot {
    pub stage: Stage,
    pub input: Value,
    pub output: Value,
    pub metrics: Metrics,
    /// Critic findings about `critiqued_output` when set, else about `output`
    #[serde(default)]
    pub critic_results: Vec<CriticResult>,
    pub quality: Option<QualityScores>,
    /// The pre-refinement output the critics reviewed, when refinement
    /// replaced it
    #[serde(default)]
    pub critiqued_output: Option<Value>,
    pub validation: Option<StageValidation>,
    pub consensus: Option<ConsensusSummary>,
    pub refinement_attempts: usize,
    pub refined: bool,
    pub execution_time_ms: u64,
    pub recorded_at: DateTime<Utc>,
}

/// Top-level orchestrator for the stage pipeline
pub struct WorkflowManager<B: KvBackend> {
    store: Arc<ContextStore<B>>,
    registry: StageRegistry,
    config: CairnConfig,
    consensus: Option<ConsensusValidator>,
    critics: CriticsRunner,
    refinement: RefinementLoop,
    assessor: HeuristicAssessor,
    sessions: SessionGuard,
    execution_locks: ExecutionLocks,
}

impl<B: KvBackend> WorkflowManager<B> {
    pub fn new(
        store: Arc<ContextStore<B>>,
        registry: StageRegistry,
        config: CairnConfig,
    ) -> Result<Self> {
        config.validate()?;

        let consensus = (config.consensus.enabled && config.consensus.runs > 1)
            .then(|| ConsensusValidator::new(config.consensus.clone()));

        Ok(Self {
            store,
            registry,
            consensus,
            critics: CriticsRunner::new(config.critics.clone(), CriticRegistry::new()),
            refinement: RefinementLoop::new(config.refinement.max_attempts),
            assessor: HeuristicAssessor::default(),
            sessions: SessionGuard::new(),
            execution_locks: ExecutionLocks::new(),
            config,
        })
    }

    /// Use these critics for the tools listed in the config
    pub fn with_critics(mut self, registry: CriticRegistry) -> Self {
        self.critics = CriticsRunner::new(self.config.critics.clone(), registry);
        self
    }

    pub fn with_assessor(mut self, assessor: HeuristicAssessor) -> Self {
        self.assessor = assessor;
        self
    }

    pub fn with_acceptance_thresholds(mut self, thresholds: AcceptanceThresholds) -> Self {
        self.refinement = self.refinement.with_thresholds(thresholds);
        self
    }

    pub fn store(&self) -> &Arc<ContextStore<B>> {
        &self.store
    }

    pub fn config(&self) -> &CairnConfig {
        &self.config
    }

    pub fn registry(&self) -> &StageRegistry {
        &self.registry
    }

    /// Whether a stage or reset currently holds the session
    pub fn is_running(&self, session_id: &str) -> bool {
        self.sessions.is_claimed(session_id)
    }

    /// Execute one stage for a session
    #[instrument(skip(self, input))]
    pub async fn execute_stage(
        &self,
        session_id: &str,
        stage: Stage,
        input: Value,
    ) -> Result<StageSnapshot> {
        let _claim = self.sessions.claim(session_id)?;

        let context = self
            .store
            .get(session_id)
            .await?
            .ok_or_else(|| CairnError::NotFound(format!("context for session {}", session_id)))?;

        let mut execution = self.load_or_start(session_id).await?;
        match execution.status {
            WorkflowStatus::Running => {}
            WorkflowStatus::Paused => {
                return Err(CairnError::WorkflowPaused(session_id.to_string()))
            }
            status => return Err(CairnError::WorkflowClosed(status)),
        }

        info!(session_id, %stage, "Executing stage");
        let result = self.run_stage(&context, &mut execution, stage, input).await;

        if let Err(e) = &result {
            self.record_failure(&mut execution, stage, e).await;
        }
        result
    }

    /// Run every remaining stage in order, feeding each output forward
    ///
    /// A fresh session starts at the first stage with `initial_input`. A
    /// session with stages already recorded continues after the last one,
    /// using its output as input. Returns early, without error, if the
    /// workflow is paused between stages.
    #[instrument(skip(self, initial_input))]
    pub async fn execute_full_workflow(
        &self,
        session_id: &str,
        initial_input: Value,
    ) -> Result<WorkflowExecution> {
        if self.store.get(session_id).await?.is_none() {
            self.store
                .create(session_id, Some(initial_input.clone()))
                .await?;
        }

        let (mut next, mut input) = match self.store.get_execution(session_id).await? {
            Some(execution) => match execution.current_stage {
                Some(last) => {
                    let input = execution
                        .stage_results
                        .get(&last)
                        .cloned()
                        .unwrap_or(Value::Null);
                    (last.next(), input)
                }
                None => (Some(Stage::first()), initial_input),
            },
            None => (Some(Stage::first()), initial_input),
        };

        while let Some(stage) = next {
            if let Some(execution) = self.store.get_execution(session_id).await? {
                if execution.status == WorkflowStatus::Paused {
                    info!(session_id, next_stage = %stage, "Workflow paused, stopping");
                    return Ok(execution);
                }
            }

            let snapshot = self.execute_stage(session_id, stage, input).await?;
            input = snapshot.output;
            next = stage.next();
        }

        self.store
            .get_execution(session_id)
            .await?
            .ok_or_else(|| CairnError::NotFound(format!("execution for session {}", session_id)))
    }

    /// Pause a running workflow; an in-flight stage still completes
    pub async fn pause(&self, session_id: &str) -> Result<WorkflowExecution> {
        self.toggle(session_id, Event::Pause).await
    }

    pub async fn resume(&self, session_id: &str) -> Result<WorkflowExecution> {
        self.toggle(session_id, Event::Resume).await
    }

    /// Delete every stage snapshot and the execution record
    ///
    /// The context itself is kept; the next execution restarts at the first
    /// stage.
    pub async fn reset(&self, session_id: &str) -> Result<()> {
        let _claim = self.sessions.claim(session_id)?;
        let snapshots = self.store.delete_stage_snapshots(session_id).await?;
        let execution = {
            let _record = self.execution_locks.acquire(session_id).await;
            self.store.delete_execution(session_id).await?
        };
        info!(session_id, snapshots, execution, "Workflow reset");
        Ok(())
    }

    pub async fn get_execution(&self, session_id: &str) -> Result<Option<WorkflowExecution>> {
        self.store.get_execution(session_id).await
    }

    pub async fn stage_snapshot(
        &self,
        session_id: &str,
        stage: Stage,
    ) -> Result<Option<StageSnapshot>> {
        self.store.get_stage_snapshot(session_id, stage).await
    }

    /// Summary of the session's metrics history
    pub async fn metrics_summary(&self, session_id: &str) -> Result<MetricsSummary> {
        let history = self.store.metrics_history(session_id, None).await?;
        Ok(MetricsSummary::from_entries(
            history.iter().map(|entry| (entry.stage, &entry.metrics)),
        ))
    }

    // Stage pipeline

    async fn run_stage(
        &self,
        context: &SessionContext,
        execution: &mut WorkflowExecution,
        stage: Stage,
        input: Value,
    ) -> Result<StageSnapshot> {
        let started = Instant::now();

        guard_transition(execution.current_stage, stage)?;
        let processor = self.registry.get(stage)?.as_ref();

        let (output, consensus) = self.generate(processor, &input, context).await?;

        // Critics see the generated output; refinement may replace it below
        let critics = self.critics.run(context, &output).await;
        let reviewed = critics.as_ref().map(|_| output.clone());

        let (output, refinement_attempts, refined) = if self.config.refinement.is_enabled() {
            let refiner = StageRefiner {
                processor,
                input: &input,
                context,
                assessor: &self.assessor,
            };
            let outcome = self.refinement.run(output, &refiner).await?;
            (outcome.final_output, outcome.attempts, outcome.refined)
        } else {
            (output, 1, false)
        };

        let validation = processor
            .validate(&output, context)
            .await
            .map_err(CairnError::validation)?;
        if let Some(validation) = &validation {
            if !validation.is_valid {
                return Err(CairnError::ValidationMessage(format!(
                    "{} output rejected: {}",
                    stage,
                    validation.errors.join("; ")
                )));
            }
        }

        let base = validation
            .as_ref()
            .and_then(|v| v.metrics.clone())
            .unwrap_or_else(|| self.assessor.assess(&output));
        let metrics = match &critics {
            Some(report) => report.adjust(&base, self.config.critics.influence),
            None => base,
        };

        let critiqued_output = reviewed.filter(|_| refined);
        let (critic_results, quality) = match critics {
            Some(report) => (report.results, Some(report.quality)),
            None => (Vec::new(), None),
        };

        let snapshot = StageSnapshot {
            stage,
            input,
            output,
            metrics,
            critic_results,
            quality,
            critiqued_output,
            validation,
            consensus,
            refinement_attempts,
            refined,
            execution_time_ms: started.elapsed().as_millis() as u64,
            recorded_at: Utc::now(),
        };

        self.commit(&context.session_id, execution, &snapshot).await?;
        Ok(snapshot)
    }

    async fn generate(
        &self,
        processor: &dyn StageProcessor,
        input: &Value,
        context: &SessionContext,
    ) -> Result<(Value, Option<ConsensusSummary>)> {
        match &self.consensus {
            Some(validator) => {
                let result = validator
                    .run(|_| processor.process(input, context))
                    .await;
                let summary = ConsensusSummary {
                    confidence: result.confidence,
                    metadata: result.metadata.clone(),
                };
                let output = result.into_accepted()?;
                Ok((output, Some(summary)))
            }
            None => {
                let output = processor
                    .process(input, context)
                    .await
                    .map_err(|e| processor_error(processor.stage(), e))?;
                Ok((output, None))
            }
        }
    }

    async fn commit(
        &self,
        session_id: &str,
        execution: &mut WorkflowExecution,
        snapshot: &StageSnapshot,
    ) -> Result<()> {
        let stage = snapshot.stage;
        let options = UpdateOptions::default().preserving_history(self.config.store.preserve_history);

        self.store
            .advance_stage(session_id, stage, snapshot.output.clone(), options)
            .await?;
        self.store
            .put_stage_snapshot(session_id, stage, snapshot)
            .await?;

        fail_open_with_retries(
            "stage_metrics",
            || self.store.record_metrics(session_id, stage, &snapshot.metrics),
            METRICS_WRITE_ATTEMPTS,
        )
        .await;

        // A pause issued while the stage ran must survive this write, and a
        // pause racing it must not overwrite the new history entry
        let _record = self.execution_locks.acquire(session_id).await;
        self.refresh_status(execution).await?;

        let record = ExecutionRecord {
            stage,
            timestamp: snapshot.recorded_at,
            duration_ms: snapshot.execution_time_ms,
            result: snapshot.output.clone(),
            metrics: snapshot.metrics.clone(),
        };
        self.apply(
            execution,
            Event::StageSucceeded {
                stage,
                last: stage.is_last(),
            },
            Some(record),
        )
        .await
    }

    // Execution bookkeeping

    async fn load_or_start(&self, session_id: &str) -> Result<WorkflowExecution> {
        let _record = self.execution_locks.acquire(session_id).await;
        match self.store.get_execution(session_id).await? {
            Some(execution) => Ok(execution),
            None => {
                let execution = WorkflowExecution::new(session_id);
                self.store.put_execution(&execution).await?;
                info!(session_id, "Started workflow execution");
                Ok(execution)
            }
        }
    }

    async fn refresh_status(&self, execution: &mut WorkflowExecution) -> Result<()> {
        if let Some(stored) = self.store.get_execution(&execution.session_id).await? {
            execution.status = stored.status;
        }
        Ok(())
    }

    async fn toggle(&self, session_id: &str, event: Event) -> Result<WorkflowExecution> {
        let _record = self.execution_locks.acquire(session_id).await;
        let mut execution = self
            .store
            .get_execution(session_id)
            .await?
            .ok_or_else(|| CairnError::NotFound(format!("execution for session {}", session_id)))?;
        self.apply(&mut execution, event, None).await?;
        Ok(execution)
    }

    /// Run an event through the state machine and carry out its actions
    ///
    /// Callers hold the session's execution lock.
    async fn apply(
        &self,
        execution: &mut WorkflowExecution,
        event: Event,
        mut record: Option<ExecutionRecord>,
    ) -> Result<()> {
        let (status, actions) = transition(execution.status, event)?;
        execution.status = status;

        for action in actions {
            match action {
                Action::LogActivity { message } => {
                    info!(session_id = %execution.session_id, status = %execution.status, "{}", message)
                }
                Action::RecordStage { .. } => {
                    if let Some(record) = record.take() {
                        execution.record_stage(record);
                    }
                }
                Action::RecordError { stage, error } => execution.record_error(stage, error),
                Action::PersistExecution => {
                    execution.updated_at = Utc::now();
                    self.store.put_execution(execution).await?;
                }
            }
        }
        Ok(())
    }

    async fn record_failure(&self, execution: &mut WorkflowExecution, stage: Stage, error: &CairnError) {
        let _record = self.execution_locks.acquire(&execution.session_id).await;
        if let Err(e) = self.refresh_status(execution).await {
            warn!(session_id = %execution.session_id, error = %e, "Could not refresh execution status");
        }

        let event = Event::StageFailed {
            stage,
            error: error.to_string(),
        };
        if let Err(e) = self.apply(execution, event, None).await {
            warn!(
                session_id = %execution.session_id,
                %stage,
                error = %e,
                "Could not record stage failure"
            );
        }
    }
}

/// Check that `target` may run after `last`
///
/// Before any stage has run only the first stage is allowed. After that,
/// the next stage or a restart at the first stage.
fn guard_transition(last: Option<Stage>, target: Stage) -> Result<()> {
    match last {
        None if target.is_first() => Ok(()),
        None => Err(CairnError::InvalidTransition {
            from: Stage::first(),
            to: target,
        }),
        Some(from) if from.can_advance_to(target) => Ok(()),
        Some(from) => Err(CairnError::InvalidTransition { from, to: target }),
    }
}

fn processor_error(stage: Stage, error: CairnError) -> CairnError {
    match error {
        e @ CairnError::Processor { .. } => e,
        other => CairnError::Processor {
            stage,
            message: other.to_string(),
        },
    }
}

/// Refinement hooks backed by a stage processor
struct StageRefiner<'a> {
    processor: &'a dyn StageProcessor,
    input: &'a Value,
    context: &'a SessionContext,
    assessor: &'a HeuristicAssessor,
}

#[async_trait]
impl<'a> Refiner<Value> for StageRefiner<'a> {
    async fn assess(&self, output: &Value) -> Result<Metrics> {
        let validation = self.processor.validate(output, self.context).await?;
        Ok(validation
            .and_then(|v| v.metrics)
            .unwrap_or_else(|| self.assessor.assess(output)))
    }

    async fn refine(&self, attempts: &[Value]) -> Result<Value> {
        self.processor
            .refine(self.input, attempts, self.context)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_transition() {
        assert!(guard_transition(None, Stage::Ambiguity).is_ok());
        assert!(matches!(
            guard_transition(None, Stage::Specification),
            Err(CairnError::InvalidTransition { .. })
        ));

        assert!(guard_transition(Some(Stage::Planning), Stage::Tasking).is_ok());
        assert!(guard_transition(Some(Stage::Planning), Stage::Ambiguity).is_ok());
        assert!(matches!(
            guard_transition(Some(Stage::Planning), Stage::Verification),
            Err(CairnError::InvalidTransition {
                from: Stage::Planning,
                to: Stage::Verification
            })
        ));
        // Repeating a stage is not a forward step
        assert!(guard_transition(Some(Stage::Planning), Stage::Planning).is_err());
        assert!(guard_transition(Some(Stage::Evolution), Stage::Evolution).is_err());
    }

    #[test]
    fn test_processor_error_wrapping() {
        let wrapped = processor_error(Stage::Tasking, CairnError::Other("boom".to_string()));
        assert!(matches!(
            wrapped,
            CairnError::Processor {
                stage: Stage::Tasking,
                ..
            }
        ));

        let kept = processor_error(
            Stage::Tasking,
            CairnError::Processor {
                stage: Stage::Planning,
                message: "x".to_string(),
            },
        );
        assert!(matches!(
            kept,
            CairnError::Processor {
                stage: Stage::Planning,
                ..
            }
        ));
    }
}
