//! Multi-run consensus over a generator
//!
//! The generator is invoked `runs` times concurrently. Successful outputs are
//! compared pairwise by character-set Jaccard similarity and the output with
//! the highest average similarity to the rest becomes the final result.

use cairn_core::similarity::{average_similarities, centroid, similarity_matrix, text_of};
use cairn_core::{CairnError, ConsensusConfig, Result};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How a consensus round ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusOutcome {
    /// Confidence reached the threshold
    Agreed,
    /// Enough runs succeeded but confidence stayed below the threshold
    Disagreed,
    /// Fewer than `ceil(runs / 2)` runs succeeded
    InsufficientRuns,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusMetadata {
    pub runs: usize,
    pub successful_runs: usize,
    /// Runs that returned an error on every attempt
    pub failed_runs: usize,
    pub timed_out_runs: usize,
    pub required_runs: usize,
    /// Last error of each failed run
    pub errors: Vec<String>,
    /// Index into `results` of the chosen output
    pub winning_index: Option<usize>,
    pub threshold: f64,
    pub average_similarities: Vec<f64>,
    pub duration_ms: u64,
}

/// Result of one consensus round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusResult<T> {
    pub consensus: bool,
    pub confidence: f64,
    pub results: Vec<T>,
    pub final_result: Option<T>,
    pub metadata: ConsensusMetadata,
}

impl<T> ConsensusResult<T> {
    pub fn outcome(&self) -> ConsensusOutcome {
        if self.metadata.successful_runs < self.metadata.required_runs {
            ConsensusOutcome::InsufficientRuns
        } else if self.consensus {
            ConsensusOutcome::Agreed
        } else {
            ConsensusOutcome::Disagreed
        }
    }

    /// The agreed output, or the error describing why there is none
    pub fn into_accepted(self) -> Result<T> {
        match self.outcome() {
            ConsensusOutcome::Agreed => self.final_result.ok_or_else(|| {
                CairnError::Other("consensus agreed without a final result".to_string())
            }),
            ConsensusOutcome::Disagreed => Err(CairnError::ConsensusFailure {
                confidence: self.confidence,
                threshold: self.metadata.threshold,
            }),
            ConsensusOutcome::InsufficientRuns => Err(CairnError::InsufficientRuns {
                successful: self.metadata.successful_runs,
                required: self.metadata.required_runs,
            }),
        }
    }
}

enum SlotOutcome<T> {
    Success(T),
    Failed(String),
    TimedOut,
}

/// Runs a generator several times and scores agreement between the outputs
#[derive(Debug, Clone)]
pub struct ConsensusValidator {
    config: ConsensusConfig,
}

impl ConsensusValidator {
    /// Create a validator; `config` is expected to have passed `validate()`
    pub fn new(config: ConsensusConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    /// Run one consensus round
    ///
    /// `generate` receives the slot index. Each call races its own timeout;
    /// a call that times out is abandoned and never retried, while a call
    /// that errors is retried in place up to `retries` times.
    pub async fn run<T, F, Fut>(&self, generate: F) -> ConsensusResult<T>
    where
        T: Serialize + Clone,
        F: Fn(usize) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let runs = self.config.runs;
        let required = self.config.required_runs();
        let generate = &generate;

        debug!(runs, required, timeout_ms = self.config.timeout_ms, "Starting consensus round");

        let slots = (0..runs).map(|slot| self.run_slot(slot, generate));
        let outcomes = join_all(slots).await;

        let mut results = Vec::new();
        let mut errors = Vec::new();
        let mut timed_out_runs = 0;
        for outcome in outcomes {
            match outcome {
                SlotOutcome::Success(value) => results.push(value),
                SlotOutcome::Failed(error) => errors.push(error),
                SlotOutcome::TimedOut => timed_out_runs += 1,
            }
        }
        let successful = results.len();
        let failed_runs = errors.len();

        let mut metadata = ConsensusMetadata {
            runs,
            successful_runs: successful,
            failed_runs,
            timed_out_runs,
            required_runs: required,
            errors,
            winning_index: None,
            threshold: self.config.threshold,
            average_similarities: Vec::new(),
            duration_ms: 0,
        };

        if successful < required {
            metadata.duration_ms = started.elapsed().as_millis() as u64;
            warn!(
                successful,
                required, failed_runs, timed_out_runs, "Consensus round had too few successful runs"
            );
            return ConsensusResult {
                consensus: false,
                confidence: 0.0,
                results: Vec::new(),
                final_result: None,
                metadata,
            };
        }

        let texts: Vec<String> = results
            .iter()
            .map(|r| text_of(r).unwrap_or_default())
            .collect();
        let averages = average_similarities(&similarity_matrix(&texts));
        let (winner, confidence) = centroid(&averages).unwrap_or((0, 0.0));
        let consensus = confidence >= self.config.threshold;

        metadata.winning_index = Some(winner);
        metadata.average_similarities = averages;
        metadata.duration_ms = started.elapsed().as_millis() as u64;

        info!(
            successful,
            confidence,
            threshold = self.config.threshold,
            consensus,
            winner,
            "Consensus round finished"
        );

        ConsensusResult {
            consensus,
            confidence,
            final_result: results.get(winner).cloned(),
            results,
            metadata,
        }
    }

    async fn run_slot<T, F, Fut>(&self, slot: usize, generate: &F) -> SlotOutcome<T>
    where
        F: Fn(usize) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let timeout = self.config.timeout();
        let mut attempt = 0;
        loop {
            match tokio::time::timeout(timeout, generate(slot)).await {
                Ok(Ok(value)) => return SlotOutcome::Success(value),
                Ok(Err(e)) if attempt < self.config.retries => {
                    attempt += 1;
                    debug!(slot, attempt, error = %e, "Generator call failed, retrying");
                    let backoff = Duration::from_millis(self.config.retry_backoff_ms * attempt as u64);
                    tokio::time::sleep(backoff).await;
                }
                Ok(Err(e)) => {
                    warn!(slot, attempts = attempt + 1, error = %e, "Generator call failed");
                    return SlotOutcome::Failed(e.to_string());
                }
                Err(_) => {
                    warn!(slot, timeout_ms = self.config.timeout_ms, "Generator call timed out");
                    return SlotOutcome::TimedOut;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config(runs: usize, threshold: f64) -> ConsensusConfig {
        ConsensusConfig {
            runs,
            threshold,
            timeout_ms: 1_000,
            retries: 0,
            ..ConsensusConfig::default()
        }
    }

    #[tokio::test]
    async fn test_identical_outputs_agree() {
        let validator = ConsensusValidator::new(config(3, 1.0));
        let result = validator
            .run(|_| async { Ok::<_, CairnError>(json!({"plan": ["a", "b"]})) })
            .await;

        assert!(result.consensus);
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.results.len(), 3);
        assert_eq!(result.outcome(), ConsensusOutcome::Agreed);
        assert_eq!(result.into_accepted().unwrap(), json!({"plan": ["a", "b"]}));
    }

    #[tokio::test]
    async fn test_majority_alpha_wins() {
        let validator = ConsensusValidator::new(config(5, 0.8));
        let result = validator
            .run(|slot| async move {
                Ok::<_, CairnError>(if slot == 4 {
                    "beta".to_string()
                } else {
                    "alpha".to_string()
                })
            })
            .await;

        assert!(result.consensus);
        assert!(result.confidence >= 0.8);
        assert_eq!(result.final_result.as_deref(), Some("alpha"));
        assert_eq!(result.metadata.winning_index, Some(0));
        assert_eq!(result.metadata.average_similarities.len(), 5);
    }

    #[tokio::test]
    async fn test_dissimilar_outputs_disagree() {
        let validator = ConsensusValidator::new(config(3, 0.8));
        let outputs = ["abc", "xyz", "klm"];
        let result = validator
            .run(|slot| async move { Ok::<Value, CairnError>(json!(outputs[slot])) })
            .await;

        assert!(!result.consensus);
        assert!(result.confidence < 0.8);
        assert_eq!(result.outcome(), ConsensusOutcome::Disagreed);
        // A representative is still chosen
        assert_eq!(result.final_result, Some(json!("abc")));
        assert!(matches!(
            result.into_accepted(),
            Err(CairnError::ConsensusFailure { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_timeouts() {
        let mut cfg = config(4, 0.8);
        cfg.retries = 3;
        let validator = ConsensusValidator::new(cfg);
        let calls = AtomicUsize::new(0);

        let result = validator
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok::<_, CairnError>(json!("late"))
                }
            })
            .await;

        assert!(!result.consensus);
        assert_eq!(result.confidence, 0.0);
        assert!(result.final_result.is_none());
        assert!(result.results.is_empty());
        assert_eq!(result.metadata.timed_out_runs, 4);
        assert_eq!(result.metadata.required_runs, 2);
        // Timeouts are never retried
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(result.outcome(), ConsensusOutcome::InsufficientRuns);
        assert!(matches!(
            result.into_accepted(),
            Err(CairnError::InsufficientRuns {
                successful: 0,
                required: 2
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_are_retried_in_slot() {
        let mut cfg = config(3, 0.8);
        cfg.retries = 2;
        let validator = ConsensusValidator::new(cfg);
        let calls = AtomicUsize::new(0);

        let result = validator
            .run(|slot| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    // Slot 0 fails on its first attempt only
                    if slot == 0 && n == 0 {
                        Err(CairnError::Generator("flaky".to_string()))
                    } else {
                        Ok(json!("stable"))
                    }
                }
            })
            .await;

        assert!(result.consensus);
        assert_eq!(result.metadata.successful_runs, 3);
        assert_eq!(result.metadata.failed_runs, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_errors_exhaust_retries() {
        let mut cfg = config(3, 0.8);
        cfg.retries = 1;
        let validator = ConsensusValidator::new(cfg);
        let calls = AtomicUsize::new(0);

        let result = validator
            .run(|slot| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if slot == 0 {
                        Ok(json!("ok"))
                    } else {
                        Err(CairnError::Generator("down".to_string()))
                    }
                }
            })
            .await;

        assert_eq!(result.metadata.successful_runs, 1);
        assert_eq!(result.metadata.failed_runs, 2);
        assert_eq!(result.metadata.errors.len(), 2);
        assert_eq!(result.outcome(), ConsensusOutcome::InsufficientRuns);
        // One call for the good slot plus two attempts for each failing slot
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_minority_is_dropped() {
        let validator = ConsensusValidator::new(config(3, 0.8));
        let result = validator
            .run(|slot| async move {
                if slot == 2 {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                Ok::<_, CairnError>(json!("fast"))
            })
            .await;

        assert!(result.consensus);
        assert_eq!(result.metadata.successful_runs, 2);
        assert_eq!(result.metadata.timed_out_runs, 1);
        assert_eq!(result.results.len(), 2);
    }
}
