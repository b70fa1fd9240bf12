//! Core type definitions for the Cairn pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::CairnError;

/// Metadata key under which superseded context values are kept
pub const PREVIOUS_VERSIONS_KEY: &str = "previousVersions";

/// Pipeline stages, in execution order
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Ambiguity,
    Specification,
    Planning,
    Tasking,
    Verification,
    Evolution,
}

impl Stage {
    /// Every stage, in pipeline order
    pub const ALL: [Stage; 6] = [
        Stage::Ambiguity,
        Stage::Specification,
        Stage::Planning,
        Stage::Tasking,
        Stage::Verification,
        Stage::Evolution,
    ];

    /// Position of this stage in the pipeline (0-based)
    pub fn index(self) -> usize {
        match self {
            Self::Ambiguity => 0,
            Self::Specification => 1,
            Self::Planning => 2,
            Self::Tasking => 3,
            Self::Verification => 4,
            Self::Evolution => 5,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn first() -> Self {
        Self::Ambiguity
    }

    pub fn is_first(self) -> bool {
        self.index() == 0
    }

    pub fn is_last(self) -> bool {
        self.index() == Self::ALL.len() - 1
    }

    /// The stage after this one, if any
    pub fn next(self) -> Option<Self> {
        Self::from_index(self.index() + 1)
    }

    /// Transition guard: only `current + 1`, or an explicit restart at the first stage.
    pub fn can_advance_to(self, target: Stage) -> bool {
        target.is_first() || target.index() == self.index() + 1
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ambiguity => "ambiguity",
            Self::Specification => "specification",
            Self::Planning => "planning",
            Self::Tasking => "tasking",
            Self::Verification => "verification",
            Self::Evolution => "evolution",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = CairnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ambiguity" => Ok(Self::Ambiguity),
            "specification" | "spec" => Ok(Self::Specification),
            "planning" | "plan" => Ok(Self::Planning),
            "tasking" | "tasks" => Ok(Self::Tasking),
            "verification" | "verify" => Ok(Self::Verification),
            "evolution" => Ok(Self::Evolution),
            _ => Err(CairnError::UnknownStage(s.to_string())),
        }
    }
}

/// Execution status of a full workflow run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    #[default]
    Running,
    Paused,
    Completed,
    Failed,
}

impl WorkflowStatus {
    /// Completed and failed runs accept nothing until reset
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Quality metrics for a stage output, each in `[0, 1]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub completeness: f64,
    pub clarity: f64,
    pub determinism: f64,
    pub consistency: f64,
    pub timestamp: DateTime<Utc>,
}

impl Metrics {
    /// Create metrics, clamping every component into `[0, 1]`
    pub fn new(completeness: f64, clarity: f64, determinism: f64, consistency: f64) -> Self {
        Self {
            completeness: clamp_unit(completeness),
            clarity: clamp_unit(clarity),
            determinism: clamp_unit(determinism),
            consistency: clamp_unit(consistency),
            timestamp: Utc::now(),
        }
    }

    /// Uniform metrics, mostly useful for tests and stubs
    pub fn uniform(value: f64) -> Self {
        Self::new(value, value, value, value)
    }

    /// Per-component arithmetic mean; `None` when there is nothing to average
    pub fn mean<'a>(metrics: impl IntoIterator<Item = &'a Metrics>) -> Option<Metrics> {
        let mut count = 0usize;
        let mut sum = [0.0f64; 4];
        for m in metrics {
            count += 1;
            sum[0] += m.completeness;
            sum[1] += m.clarity;
            sum[2] += m.determinism;
            sum[3] += m.consistency;
        }
        if count == 0 {
            return None;
        }
        let n = count as f64;
        Some(Self::new(sum[0] / n, sum[1] / n, sum[2] / n, sum[3] / n))
    }

    /// Pull every component toward `score` by `influence` (0 keeps self, 1 replaces)
    pub fn blend(&self, score: f64, influence: f64) -> Metrics {
        let w = clamp_unit(influence);
        let mix = |base: f64| (1.0 - w) * base + w * score;
        Self::new(
            mix(self.completeness),
            mix(self.clarity),
            mix(self.determinism),
            mix(self.consistency),
        )
    }

    /// Unweighted mean of the four components
    pub fn average(&self) -> f64 {
        (self.completeness + self.clarity + self.determinism + self.consistency) / 4.0
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Durable per-session record carried from stage to stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    pub session_id: String,
    /// Last successfully advanced-to stage
    pub stage: Stage,
    pub previous_output: Option<Value>,
    pub current_input: Option<Value>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            stage: Stage::first(),
            previous_output: None,
            current_input: None,
            metadata: serde_json::Map::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.current_input = Some(input);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Superseded versions kept in metadata, oldest first
    pub fn previous_versions(&self) -> &[Value] {
        self.metadata
            .get(PREVIOUS_VERSIONS_KEY)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Fold the current values into `metadata.previousVersions`
    pub fn push_version(&mut self) {
        let version = serde_json::json!({
            "stage": self.stage,
            "previousOutput": self.previous_output,
            "currentInput": self.current_input,
            "timestamp": self.timestamp,
        });
        let entry = self
            .metadata
            .entry(PREVIOUS_VERSIONS_KEY.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        match entry {
            Value::Array(versions) => versions.push(version),
            other => *other = Value::Array(vec![version]),
        }
    }
}

/// Where and when a workflow failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub stage: Stage,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

/// One entry of the append-only execution history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub stage: Stage,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    pub result: Value,
    pub metrics: Metrics,
}

/// State of one full-pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub session_id: String,
    pub current_stage: Option<Stage>,
    #[serde(default)]
    pub stage_results: BTreeMap<Stage, Value>,
    pub overall_metrics: Option<Metrics>,
    #[serde(default)]
    pub execution_history: Vec<ExecutionRecord>,
    pub status: WorkflowStatus,
    pub error_info: Option<ErrorInfo>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowExecution {
    pub fn new(session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            current_stage: None,
            stage_results: BTreeMap::new(),
            overall_metrics: None,
            execution_history: Vec::new(),
            status: WorkflowStatus::Running,
            error_info: None,
            started_at: now,
            updated_at: now,
        }
    }

    /// Append a successful stage run and refresh the derived fields
    ///
    /// Overall metrics average the latest run of each stage, so a stage
    /// re-run after a restart is counted once.
    pub fn record_stage(&mut self, record: ExecutionRecord) {
        self.current_stage = Some(record.stage);
        self.stage_results
            .insert(record.stage, record.result.clone());
        self.execution_history.push(record);

        let latest: BTreeMap<Stage, &Metrics> = self
            .execution_history
            .iter()
            .map(|r| (r.stage, &r.metrics))
            .collect();
        self.overall_metrics = Metrics::mean(latest.into_values());
        self.updated_at = Utc::now();
    }

    pub fn record_error(&mut self, stage: Stage, error: impl Into<String>) {
        let now = Utc::now();
        self.error_info = Some(ErrorInfo {
            stage,
            error: error.into(),
            timestamp: now,
        });
        self.updated_at = now;
    }

    pub fn completed_stages(&self) -> Vec<Stage> {
        self.execution_history.iter().map(|r| r.stage).collect()
    }
}

/// Severity of a critic issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// A single finding reported by a critic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticIssue {
    pub severity: Severity,
    pub category: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl CriticIssue {
    pub fn new(severity: Severity, category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity,
            category: category.into(),
            message: message.into(),
            location: None,
            suggestion: None,
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

/// Output of one critic for one stage invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticResult {
    pub tool: String,
    pub score: f64,
    #[serde(default)]
    pub issues: Vec<CriticIssue>,
    /// Per-category scores (correctness, security, performance, ...)
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
}

impl CriticResult {
    pub fn new(tool: impl Into<String>, score: f64) -> Self {
        Self {
            tool: tool.into(),
            score: clamp_unit(score),
            issues: Vec::new(),
            metrics: BTreeMap::new(),
        }
    }

    pub fn with_issue(mut self, issue: CriticIssue) -> Self {
        self.issues.push(issue);
        self
    }

    pub fn with_metric(mut self, category: impl Into<String>, score: f64) -> Self {
        self.metrics.insert(category.into(), clamp_unit(score));
        self
    }

    pub fn has_errors(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stage_order_and_parsing() {
        assert_eq!(Stage::ALL.len(), 6);
        for (i, stage) in Stage::ALL.iter().enumerate() {
            assert_eq!(stage.index(), i);
            assert_eq!(stage.as_str().parse::<Stage>().unwrap(), *stage);
        }
        assert_eq!(Stage::Evolution.next(), None);
        assert!("design".parse::<Stage>().is_err());
    }

    #[test]
    fn test_transition_guard() {
        assert!(Stage::Ambiguity.can_advance_to(Stage::Specification));
        assert!(!Stage::Ambiguity.can_advance_to(Stage::Planning));
        assert!(!Stage::Planning.can_advance_to(Stage::Planning));
        assert!(!Stage::Tasking.can_advance_to(Stage::Specification));
        for stage in Stage::ALL {
            assert!(stage.can_advance_to(Stage::Ambiguity));
        }
    }

    #[test]
    fn test_stage_serializes_lowercase() {
        assert_eq!(serde_json::to_value(Stage::Tasking).unwrap(), json!("tasking"));
        assert_eq!(
            serde_json::to_value(WorkflowStatus::Paused).unwrap(),
            json!("paused")
        );
    }

    #[test]
    fn test_metrics_mean() {
        let a = Metrics::new(1.0, 0.5, 0.0, 1.0);
        let b = Metrics::new(0.0, 0.5, 1.0, 0.5);
        let mean = Metrics::mean([&a, &b]).unwrap();
        assert!((mean.completeness - 0.5).abs() < 1e-9);
        assert!((mean.clarity - 0.5).abs() < 1e-9);
        assert!((mean.determinism - 0.5).abs() < 1e-9);
        assert!((mean.consistency - 0.75).abs() < 1e-9);
        assert!(Metrics::mean(std::iter::empty()).is_none());
    }

    #[test]
    fn test_metrics_clamp_and_blend() {
        let m = Metrics::new(1.5, -0.2, f64::NAN, 0.4);
        assert_eq!(m.completeness, 1.0);
        assert_eq!(m.clarity, 0.0);
        assert_eq!(m.determinism, 0.0);

        let blended = Metrics::uniform(1.0).blend(0.0, 0.25);
        assert!((blended.clarity - 0.75).abs() < 1e-9);
        let untouched = Metrics::uniform(0.6).blend(0.0, 0.0);
        assert!((untouched.consistency - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_push_version() {
        let mut ctx = SessionContext::new("s1").with_input(json!({"idea": "x"}));
        assert!(ctx.previous_versions().is_empty());
        ctx.push_version();
        ctx.push_version();
        assert_eq!(ctx.previous_versions().len(), 2);
        assert_eq!(ctx.previous_versions()[0]["stage"], json!("ambiguity"));
        assert_eq!(ctx.previous_versions()[0]["currentInput"], json!({"idea": "x"}));
    }

    #[test]
    fn test_execution_record_stage() {
        let mut exec = WorkflowExecution::new("s1");
        exec.record_stage(ExecutionRecord {
            stage: Stage::Ambiguity,
            timestamp: Utc::now(),
            duration_ms: 5,
            result: json!("a"),
            metrics: Metrics::uniform(1.0),
        });
        exec.record_stage(ExecutionRecord {
            stage: Stage::Specification,
            timestamp: Utc::now(),
            duration_ms: 5,
            result: json!("b"),
            metrics: Metrics::uniform(0.5),
        });
        assert_eq!(exec.current_stage, Some(Stage::Specification));
        assert_eq!(exec.stage_results.len(), 2);
        let overall = exec.overall_metrics.as_ref().unwrap();
        assert!((overall.clarity - 0.75).abs() < 1e-9);
        assert_eq!(
            exec.completed_stages(),
            vec![Stage::Ambiguity, Stage::Specification]
        );
    }

    #[test]
    fn test_overall_metrics_count_each_stage_once() {
        let record = |stage, score| ExecutionRecord {
            stage,
            timestamp: Utc::now(),
            duration_ms: 1,
            result: json!(null),
            metrics: Metrics::uniform(score),
        };

        let mut exec = WorkflowExecution::new("s1");
        exec.record_stage(record(Stage::Ambiguity, 0.2));
        exec.record_stage(record(Stage::Specification, 1.0));
        // Restart: the second ambiguity run replaces the first in the average
        exec.record_stage(record(Stage::Ambiguity, 0.6));

        assert_eq!(exec.execution_history.len(), 3);
        let overall = exec.overall_metrics.unwrap();
        assert!((overall.completeness - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_critic_result_helpers() {
        let result = CriticResult::new("lint", 0.7)
            .with_metric("correctness", 0.9)
            .with_issue(CriticIssue::new(Severity::Warning, "style", "long line"));
        assert!(!result.has_errors());
        assert_eq!(result.metrics.get("correctness"), Some(&0.9));
    }
}
