//! Stage processors and the registry that resolves them

use async_trait::async_trait;
use cairn_core::{CairnError, Metrics, Result, SessionContext, Stage};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Outcome of a processor's own output check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageValidation {
    pub is_valid: bool,
    #[serde(default)]
    pub errors: Vec<String>,
    /// Metrics supplied by the processor; heuristics are used when absent
    pub metrics: Option<Metrics>,
}

impl StageValidation {
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
            metrics: None,
        }
    }

    pub fn invalid(errors: Vec<String>) -> Self {
        Self {
            is_valid: false,
            errors,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

/// Trait for a per-stage transform
///
/// Implementations wrap the external generator for one stage. `process` may
/// be called several times concurrently when consensus is enabled.
#[async_trait]
pub trait StageProcessor: Send + Sync {
    fn stage(&self) -> Stage;

    async fn process(&self, input: &Value, context: &SessionContext) -> Result<Value>;

    async fn validate(
        &self,
        _output: &Value,
        _context: &SessionContext,
    ) -> Result<Option<StageValidation>> {
        Ok(None)
    }

    /// Produce a new candidate given every attempt so far (latest last)
    async fn refine(
        &self,
        input: &Value,
        _previous_attempts: &[Value],
        context: &SessionContext,
    ) -> Result<Value> {
        self.process(input, context).await
    }
}

/// One processor per stage, resolved once at construction
#[derive(Clone)]
pub struct StageRegistry {
    processors: BTreeMap<Stage, Arc<dyn StageProcessor>>,
}

impl StageRegistry {
    pub fn builder() -> StageRegistryBuilder {
        StageRegistryBuilder::default()
    }

    pub fn get(&self, stage: Stage) -> Result<&Arc<dyn StageProcessor>> {
        self.processors
            .get(&stage)
            .ok_or(CairnError::MissingProcessor(stage))
    }

    pub fn stages(&self) -> impl Iterator<Item = Stage> + '_ {
        self.processors.keys().copied()
    }
}

impl std::fmt::Debug for StageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageRegistry")
            .field("stages", &self.processors.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Default)]
pub struct StageRegistryBuilder {
    processors: BTreeMap<Stage, Arc<dyn StageProcessor>>,
}

impl StageRegistryBuilder {
    /// Register a processor under the stage it reports
    pub fn register(mut self, processor: Arc<dyn StageProcessor>) -> Result<Self> {
        let stage = processor.stage();
        if self.processors.contains_key(&stage) {
            return Err(CairnError::Config(format!(
                "duplicate processor for stage {}",
                stage
            )));
        }
        self.processors.insert(stage, processor);
        Ok(self)
    }

    /// Register a processor under a string identifier
    ///
    /// The identifier must name a known stage and match the processor's own.
    pub fn register_named(self, id: &str, processor: Arc<dyn StageProcessor>) -> Result<Self> {
        let stage: Stage = id.parse()?;
        if stage != processor.stage() {
            return Err(CairnError::Config(format!(
                "processor for {} registered as {}",
                processor.stage(),
                stage
            )));
        }
        self.register(processor)
    }

    /// Finish the registry; every stage must have a processor
    pub fn build(self) -> Result<StageRegistry> {
        if let Some(missing) = Stage::ALL
            .iter()
            .find(|stage| !self.processors.contains_key(*stage))
        {
            return Err(CairnError::MissingProcessor(*missing));
        }
        Ok(StageRegistry {
            processors: self.processors,
        })
    }
}
