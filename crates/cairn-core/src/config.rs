//! Configuration management for Cairn
//!
//! This module provides the configuration surface for the engine: consensus
//! runs, critic selection and weights, refinement bounds, and store TTLs.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::{CairnError, Result};

/// Directory holding repository-level Cairn state
pub const CONFIG_DIR: &str = ".cairn";

/// Config file name inside [`CONFIG_DIR`]
pub const CONFIG_FILE: &str = "config.toml";

/// Repository-level Cairn configuration
///
/// Loaded from `.cairn/config.toml` in the project root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CairnConfig {
    /// Multi-run consensus settings
    #[serde(default)]
    pub consensus: ConsensusConfig,

    /// Critic selection and weighting
    #[serde(default)]
    pub critics: CriticsConfig,

    /// Refinement loop bounds
    #[serde(default)]
    pub refinement: RefinementConfig,

    /// Context store expiry settings
    #[serde(default)]
    pub store: StoreConfig,
}

/// Consensus validator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Wrap stage processors in the consensus validator
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Generator invocations per consensus round (3..=10)
    #[serde(default = "default_runs")]
    pub runs: usize,

    /// Minimum confidence for agreement (0.5..=1.0)
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    /// Per-call timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Extra attempts for a call that returns an error (0..=5)
    #[serde(default = "default_retries")]
    pub retries: usize,

    /// Linear backoff step between retries
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

/// Critics runner configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Critic identifiers, run in this order
    #[serde(default)]
    pub tools: Vec<String>,

    /// How strongly critic quality pulls the base metrics (0..=1)
    #[serde(default = "default_influence")]
    pub influence: f64,

    #[serde(default)]
    pub weights: CriticWeights,
}

/// Weights for the critic quality categories
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticWeights {
    pub correctness: f64,
    pub security: f64,
    pub performance: f64,
}

/// Refinement loop configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinementConfig {
    /// Total attempts including the initial output; 1 disables refinement
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
}

/// Context store expiry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_context_ttl")]
    pub context_ttl_secs: u64,

    #[serde(default = "default_stage_result_ttl")]
    pub stage_result_ttl_secs: u64,

    #[serde(default = "default_execution_ttl")]
    pub execution_ttl_secs: u64,

    #[serde(default = "default_metrics_ttl")]
    pub metrics_ttl_secs: u64,

    /// Fold superseded values into `metadata.previousVersions` on advance
    #[serde(default = "default_true")]
    pub preserve_history: bool,
}

// Default value providers
fn default_true() -> bool {
    true
}

fn default_runs() -> usize {
    5
}

fn default_threshold() -> f64 {
    0.8
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_retries() -> usize {
    3
}

fn default_retry_backoff_ms() -> u64 {
    100
}

fn default_influence() -> f64 {
    0.3
}

fn default_max_attempts() -> usize {
    3
}

fn default_context_ttl() -> u64 {
    24 * 60 * 60
}

fn default_stage_result_ttl() -> u64 {
    7 * 24 * 60 * 60
}

fn default_execution_ttl() -> u64 {
    7 * 24 * 60 * 60
}

fn default_metrics_ttl() -> u64 {
    30 * 24 * 60 * 60
}

impl CairnConfig {
    /// Load configuration from `.cairn/config.toml` or use defaults
    pub fn load_or_default(root: &Path) -> Result<Self> {
        let config_path = root.join(CONFIG_DIR).join(CONFIG_FILE);

        let config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Self::from_toml(&content)?
        } else {
            Self::default()
        };

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| CairnError::Config(format!("Failed to parse config file: {}", e)))
    }

    /// Write default configuration to `.cairn/config.toml`
    pub fn write_default(root: &Path) -> Result<()> {
        let config_dir = root.join(CONFIG_DIR);
        std::fs::create_dir_all(&config_dir)?;

        let config_path = config_dir.join(CONFIG_FILE);
        let content = Self::default().to_toml()?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| CairnError::Config(format!("Failed to serialize config: {}", e)))
    }

    /// Check every option against its allowed range
    pub fn validate(&self) -> Result<()> {
        self.consensus.validate()?;
        self.critics.validate()?;
        self.refinement.validate()?;
        self.store.validate()
    }
}

impl ConsensusConfig {
    pub const MIN_RUNS: usize = 3;
    pub const MAX_RUNS: usize = 10;
    pub const MAX_RETRIES: usize = 5;

    pub fn validate(&self) -> Result<()> {
        if !(Self::MIN_RUNS..=Self::MAX_RUNS).contains(&self.runs) {
            return Err(CairnError::Config(format!(
                "consensus.runs must be within {}..={}, got {}",
                Self::MIN_RUNS,
                Self::MAX_RUNS,
                self.runs
            )));
        }
        if !(0.5..=1.0).contains(&self.threshold) {
            return Err(CairnError::Config(format!(
                "consensus.threshold must be within 0.5..=1.0, got {}",
                self.threshold
            )));
        }
        if self.timeout_ms == 0 {
            return Err(CairnError::Config(
                "consensus.timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.retries > Self::MAX_RETRIES {
            return Err(CairnError::Config(format!(
                "consensus.retries must be within 0..={}, got {}",
                Self::MAX_RETRIES,
                self.retries
            )));
        }
        Ok(())
    }

    /// Minimum successful runs before agreement is scored: `ceil(runs / 2)`
    pub fn required_runs(&self) -> usize {
        self.runs.div_ceil(2)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl CriticsConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.influence) {
            return Err(CairnError::Config(format!(
                "critics.influence must be within 0..=1, got {}",
                self.influence
            )));
        }
        self.weights.validate()
    }

    /// Critics take part only when enabled and at least one tool is listed
    pub fn is_active(&self) -> bool {
        self.enabled && !self.tools.is_empty()
    }
}

impl CriticWeights {
    pub fn validate(&self) -> Result<()> {
        let weights = [self.correctness, self.security, self.performance];
        if weights.iter().any(|w| *w < 0.0 || w.is_nan()) {
            return Err(CairnError::Config(
                "critics.weights must be non-negative".to_string(),
            ));
        }
        if self.total() <= 0.0 {
            return Err(CairnError::Config(
                "critics.weights must not all be zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn total(&self) -> f64 {
        self.correctness + self.security + self.performance
    }
}

impl RefinementConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(CairnError::Config(
                "refinement.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        self.max_attempts > 1
    }
}

impl StoreConfig {
    pub fn validate(&self) -> Result<()> {
        let ttls = [
            ("context_ttl_secs", self.context_ttl_secs),
            ("stage_result_ttl_secs", self.stage_result_ttl_secs),
            ("execution_ttl_secs", self.execution_ttl_secs),
            ("metrics_ttl_secs", self.metrics_ttl_secs),
        ];
        for (name, ttl) in ttls {
            if ttl == 0 {
                return Err(CairnError::Config(format!(
                    "store.{} must be greater than zero",
                    name
                )));
            }
        }
        Ok(())
    }

    pub fn context_ttl(&self) -> Duration {
        Duration::from_secs(self.context_ttl_secs)
    }

    pub fn stage_result_ttl(&self) -> Duration {
        Duration::from_secs(self.stage_result_ttl_secs)
    }

    pub fn execution_ttl(&self) -> Duration {
        Duration::from_secs(self.execution_ttl_secs)
    }

    pub fn metrics_ttl(&self) -> Duration {
        Duration::from_secs(self.metrics_ttl_secs)
    }
}

impl Default for CairnConfig {
    fn default() -> Self {
        Self {
            consensus: ConsensusConfig::default(),
            critics: CriticsConfig::default(),
            refinement: RefinementConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            runs: default_runs(),
            threshold: default_threshold(),
            timeout_ms: default_timeout_ms(),
            retries: default_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl Default for CriticsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tools: Vec::new(),
            influence: default_influence(),
            weights: CriticWeights::default(),
        }
    }
}

impl Default for CriticWeights {
    fn default() -> Self {
        Self {
            correctness: 0.5,
            security: 0.3,
            performance: 0.2,
        }
    }
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            context_ttl_secs: default_context_ttl(),
            stage_result_ttl_secs: default_stage_result_ttl(),
            execution_ttl_secs: default_execution_ttl(),
            metrics_ttl_secs: default_metrics_ttl(),
            preserve_history: true,
        }
    }
}
