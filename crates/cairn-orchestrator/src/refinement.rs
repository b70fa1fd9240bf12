//! Bounded refinement loop
//!
//! Starting from an initial output, repeatedly assess the latest attempt and
//! ask for a better one until it is acceptable, the attempt budget runs out,
//! the refiner fails, or a new candidate is practically unchanged.

use async_trait::async_trait;
use cairn_core::similarity::value_similarity;
use cairn_core::{CairnError, Metrics, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Candidates at least this similar to the previous attempt end the loop
pub const SIMILARITY_CUTOFF: f64 = 0.95;

/// Minimum metrics for an output to be accepted without refinement
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AcceptanceThresholds {
    pub completeness: f64,
    pub clarity: f64,
    pub consistency: f64,
}

impl Default for AcceptanceThresholds {
    fn default() -> Self {
        Self {
            completeness: 0.7,
            clarity: 0.6,
            consistency: 0.7,
        }
    }
}

impl AcceptanceThresholds {
    pub fn accepts(&self, metrics: &Metrics) -> bool {
        metrics.completeness >= self.completeness
            && metrics.clarity >= self.clarity
            && metrics.consistency >= self.consistency
    }
}

/// Assessment and regeneration hooks driven by the loop
#[async_trait]
pub trait Refiner<T: Send + Sync>: Send + Sync {
    async fn assess(&self, output: &T) -> Result<Metrics>;

    /// Produce a new candidate from every attempt so far (latest last)
    async fn refine(&self, attempts: &[T]) -> Result<T>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinementOutcome<T> {
    pub final_output: T,
    /// Outputs kept, including the initial one
    pub attempts: usize,
    pub refined: bool,
}

#[derive(Debug, Clone)]
pub struct RefinementLoop {
    max_attempts: usize,
    thresholds: AcceptanceThresholds,
}

impl RefinementLoop {
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            thresholds: AcceptanceThresholds::default(),
        }
    }

    pub fn with_thresholds(mut self, thresholds: AcceptanceThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn thresholds(&self) -> &AcceptanceThresholds {
        &self.thresholds
    }

    /// Run the loop; only assessment errors propagate (as `Validation`)
    pub async fn run<T>(&self, initial: T, refiner: &dyn Refiner<T>) -> Result<RefinementOutcome<T>>
    where
        T: Serialize + Clone + Send + Sync,
    {
        let mut attempts = vec![initial];
        let mut refined = false;

        for round in 1..self.max_attempts {
            let Some(current) = attempts.last() else {
                break;
            };

            let metrics = refiner.assess(current).await.map_err(CairnError::validation)?;
            if self.thresholds.accepts(&metrics) {
                debug!(round, "Output accepted");
                break;
            }

            let candidate = match refiner.refine(&attempts).await {
                Ok(candidate) => candidate,
                Err(e) => {
                    warn!(round, error = %e, "Refinement failed, keeping last output");
                    break;
                }
            };

            let similarity = value_similarity(&candidate, current);
            if similarity >= SIMILARITY_CUTOFF {
                debug!(round, similarity, "Refinement converged");
                break;
            }

            debug!(round, similarity, "Refined output");
            attempts.push(candidate);
            refined = true;
        }

        let count = attempts.len();
        let final_output = attempts
            .pop()
            .ok_or_else(|| CairnError::Other("refinement lost its initial output".to_string()))?;

        Ok(RefinementOutcome {
            final_output,
            attempts: count,
            refined,
        })
    }
}
