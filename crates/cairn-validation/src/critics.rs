//! Critics runner
//!
//! Critics are external reviewers of a stage output. A critic that errors, or
//! a configured id with no registered critic, produces a degraded result
//! instead of failing the batch.

use async_trait::async_trait;
use cairn_core::{
    CairnError, CriticIssue, CriticResult, CriticWeights, CriticsConfig, Metrics, Result,
    SessionContext, Severity,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Score assumed for a category no critic reported on
pub const NEUTRAL_CATEGORY_SCORE: f64 = 0.8;

/// Issue category of a degraded result
pub const TOOL_ERROR_CATEGORY: &str = "tool_error";

pub const CORRECTNESS: &str = "correctness";
pub const SECURITY: &str = "security";
pub const PERFORMANCE: &str = "performance";

/// Trait for an output reviewer
#[async_trait]
pub trait Critic: Send + Sync {
    async fn review(&self, context: &SessionContext, output: &Value) -> Result<CriticResult>;
}

/// Critics by id, fixed once the runner is built
#[derive(Clone, Default)]
pub struct CriticRegistry {
    critics: HashMap<String, Arc<dyn Critic>>,
}

impl CriticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, id: impl Into<String>, critic: Arc<dyn Critic>) -> Self {
        self.critics.insert(id.into(), critic);
        self
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn Critic>> {
        self.critics.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.critics.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.critics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.critics.is_empty()
    }
}

/// Weighted category scores derived from a batch of critic results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityScores {
    pub correctness: f64,
    pub security: f64,
    pub performance: f64,
    pub overall: f64,
}

impl QualityScores {
    pub fn from_results(results: &[CriticResult], weights: &CriticWeights) -> Self {
        let category = |name: &str| {
            let scores: Vec<f64> = results
                .iter()
                .filter_map(|r| r.metrics.get(name).copied())
                .collect();
            if scores.is_empty() {
                NEUTRAL_CATEGORY_SCORE
            } else {
                scores.iter().sum::<f64>() / scores.len() as f64
            }
        };

        let correctness = category(CORRECTNESS);
        let security = category(SECURITY);
        let performance = category(PERFORMANCE);

        let total = weights.total();
        let overall = if total > 0.0 {
            (correctness * weights.correctness
                + security * weights.security
                + performance * weights.performance)
                / total
        } else {
            NEUTRAL_CATEGORY_SCORE
        };

        Self {
            correctness,
            security,
            performance,
            overall,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticReport {
    /// One result per configured tool, in configuration order
    pub results: Vec<CriticResult>,
    pub quality: QualityScores,
}

impl CriticReport {
    /// Pull base metrics toward the overall critic score
    pub fn adjust(&self, base: &Metrics, influence: f64) -> Metrics {
        base.blend(self.quality.overall, influence)
    }

    pub fn degraded_tools(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| r.issues.iter().any(|i| i.category == TOOL_ERROR_CATEGORY))
            .map(|r| r.tool.as_str())
            .collect()
    }
}

/// Runs the configured critics over an output
pub struct CriticsRunner {
    config: CriticsConfig,
    registry: CriticRegistry,
}

impl CriticsRunner {
    pub fn new(config: CriticsConfig, registry: CriticRegistry) -> Self {
        Self { config, registry }
    }

    /// Runner that never reports
    pub fn disabled() -> Self {
        Self::new(
            CriticsConfig {
                enabled: false,
                ..CriticsConfig::default()
            },
            CriticRegistry::new(),
        )
    }

    pub fn config(&self) -> &CriticsConfig {
        &self.config
    }

    pub fn is_active(&self) -> bool {
        self.config.is_active()
    }

    /// Review `output` with every configured tool, in order
    ///
    /// Returns `None` when critics are disabled or none are configured.
    pub async fn run(&self, context: &SessionContext, output: &Value) -> Option<CriticReport> {
        if !self.is_active() {
            return None;
        }

        let mut results = Vec::with_capacity(self.config.tools.len());
        for tool in &self.config.tools {
            let result = match self.registry.get(tool) {
                Some(critic) => match critic.review(context, output).await {
                    Ok(mut result) => {
                        if result.tool.is_empty() {
                            result.tool = tool.clone();
                        }
                        debug!(tool = %tool, score = result.score, issues = result.issues.len(), "Critic finished");
                        result
                    }
                    Err(e) => degraded(tool, e.to_string()),
                },
                None => degraded(tool, "no critic registered under this id".to_string()),
            };
            results.push(result);
        }

        let quality = QualityScores::from_results(&results, &self.config.weights);
        Some(CriticReport { results, quality })
    }
}

fn degraded(tool: &str, message: String) -> CriticResult {
    let error = CairnError::CriticTool {
        tool: tool.to_string(),
        message,
    };
    warn!(tool, error = %error, "Critic degraded");
    CriticResult::new(tool, 0.0).with_issue(CriticIssue::new(
        Severity::Error,
        TOOL_ERROR_CATEGORY,
        error.to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FixedCritic {
        category: &'static str,
        score: f64,
    }

    #[async_trait]
    impl Critic for FixedCritic {
        async fn review(&self, _context: &SessionContext, _output: &Value) -> Result<CriticResult> {
            Ok(CriticResult::new("", self.score).with_metric(self.category, self.score))
        }
    }

    struct BrokenCritic;

    #[async_trait]
    impl Critic for BrokenCritic {
        async fn review(&self, _context: &SessionContext, _output: &Value) -> Result<CriticResult> {
            Err(CairnError::Other("lint binary missing".to_string()))
        }
    }

    fn config(tools: &[&str]) -> CriticsConfig {
        CriticsConfig {
            tools: tools.iter().map(|t| t.to_string()).collect(),
            ..CriticsConfig::default()
        }
    }

    fn registry() -> CriticRegistry {
        CriticRegistry::new()
            .register(
                "lint",
                Arc::new(FixedCritic {
                    category: CORRECTNESS,
                    score: 1.0,
                }),
            )
            .register("broken", Arc::new(BrokenCritic))
    }

    #[tokio::test]
    async fn test_failing_critic_is_isolated() {
        let runner = CriticsRunner::new(config(&["broken", "lint"]), registry());
        let report = runner
            .run(&SessionContext::new("s1"), &json!("output"))
            .await
            .unwrap();

        assert_eq!(report.results.len(), 2);
        let failed = &report.results[0];
        assert_eq!(failed.tool, "broken");
        assert_eq!(failed.score, 0.0);
        assert_eq!(failed.issues[0].severity, Severity::Error);
        assert_eq!(failed.issues[0].category, TOOL_ERROR_CATEGORY);
        assert!(failed.issues[0].message.contains("lint binary missing"));

        assert_eq!(report.results[1].tool, "lint");
        assert_eq!(report.degraded_tools(), vec!["broken"]);
    }

    #[tokio::test]
    async fn test_unregistered_tool_is_degraded() {
        let runner = CriticsRunner::new(config(&["ghost"]), registry());
        let report = runner
            .run(&SessionContext::new("s1"), &json!({}))
            .await
            .unwrap();
        assert_eq!(report.results.len(), 1);
        assert!(report.results[0].has_errors());
        // Nothing reported a category, so every category is neutral
        assert_eq!(report.quality.overall, NEUTRAL_CATEGORY_SCORE);
    }

    #[tokio::test]
    async fn test_disabled_runner() {
        let ctx = SessionContext::new("s1");
        assert!(CriticsRunner::disabled().run(&ctx, &json!(1)).await.is_none());

        let no_tools = CriticsRunner::new(config(&[]), registry());
        assert!(no_tools.run(&ctx, &json!(1)).await.is_none());
    }

    #[tokio::test]
    async fn test_weighted_quality_and_adjustment() {
        let runner = CriticsRunner::new(config(&["lint"]), registry());
        let report = runner
            .run(&SessionContext::new("s1"), &json!("output"))
            .await
            .unwrap();

        assert_eq!(report.quality.correctness, 1.0);
        assert_eq!(report.quality.security, NEUTRAL_CATEGORY_SCORE);
        // 0.5 * 1.0 + 0.3 * 0.8 + 0.2 * 0.8
        assert!((report.quality.overall - 0.9).abs() < 1e-9);

        let adjusted = report.adjust(&Metrics::uniform(0.5), 0.3);
        // 0.7 * 0.5 + 0.3 * 0.9
        assert!((adjusted.clarity - 0.62).abs() < 1e-9);
    }

    #[test]
    fn test_category_mean_over_reporting_critics() {
        let results = vec![
            CriticResult::new("a", 1.0).with_metric(SECURITY, 0.6),
            CriticResult::new("b", 1.0).with_metric(SECURITY, 1.0),
            CriticResult::new("c", 0.0),
        ];
        let quality = QualityScores::from_results(&results, &CriticWeights::default());
        assert!((quality.security - 0.8).abs() < 1e-9);
        assert_eq!(quality.performance, NEUTRAL_CATEGORY_SCORE);
    }
}
