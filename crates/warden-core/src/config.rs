//! Configuration for the orchestrator.
//!
//! Every field has a default, so an empty YAML document is a valid
//! configuration. Environment overrides are applied on top of the file.

use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid value for {var}: {value}")]
    Env { var: &'static str, value: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    pub intake: IntakeConfig,
    pub resolution: ResolutionConfig,
    pub reasoning: ReasoningConfig,
    pub retry: RetryConfig,
    pub watchdog: WatchdogConfig,
    pub storage: StorageConfig,
    pub topics: TopicsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakeConfig {
    /// Age after which an `INVESTIGATING` record is presumed abandoned.
    pub staleness_secs: u64,
    /// Token ceiling for the stored evidence bundle. Zero or negative disables truncation.
    pub context_token_budget: i64,
    /// Wall-clock budget handed to the reasoning loop.
    pub stage_timeout_secs: u64,
}

impl IntakeConfig {
    /// `None` when the window does not fit a signed duration.
    pub fn staleness(&self) -> Option<ChronoDuration> {
        seconds(self.staleness_secs)
    }
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            staleness_secs: 600,
            context_token_budget: 6000,
            stage_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolutionConfig {
    pub stage_timeout_secs: u64,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            stage_timeout_secs: 300,
        }
    }
}

/// Limits for one reasoning loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopLimits {
    pub token_budget: u64,
    pub max_steps: u32,
}

impl LoopLimits {
    pub const DIAGNOSIS: Self = Self {
        token_budget: 100_000,
        max_steps: 6,
    };

    pub const PROPOSAL: Self = Self {
        token_budget: 50_000,
        max_steps: 4,
    };
}

/// Loop limits as written in a config file; missing fields keep the
/// stage's defaults.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct LoopLimitsOverride {
    token_budget: Option<u64>,
    max_steps: Option<u32>,
}

impl LoopLimitsOverride {
    fn over(self, base: LoopLimits) -> LoopLimits {
        LoopLimits {
            token_budget: self.token_budget.unwrap_or(base.token_budget),
            max_steps: self.max_steps.unwrap_or(base.max_steps),
        }
    }
}

fn diagnosis_limits<'de, D: Deserializer<'de>>(deserializer: D) -> Result<LoopLimits, D::Error> {
    LoopLimitsOverride::deserialize(deserializer).map(|o| o.over(LoopLimits::DIAGNOSIS))
}

fn proposal_limits<'de, D: Deserializer<'de>>(deserializer: D) -> Result<LoopLimits, D::Error> {
    LoopLimitsOverride::deserialize(deserializer).map(|o| o.over(LoopLimits::PROPOSAL))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasoningConfig {
    /// The deadline directive is injected once less than this much time remains.
    pub deadline_buffer_secs: u64,
    #[serde(deserialize_with = "diagnosis_limits")]
    pub diagnosis: LoopLimits,
    #[serde(deserialize_with = "proposal_limits")]
    pub proposal: LoopLimits,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            deadline_buffer_secs: 90,
            diagnosis: LoopLimits::DIAGNOSIS,
            proposal: LoopLimits::PROPOSAL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            base_delay_ms: 1000,
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub stale_threshold_secs: u64,
    pub retry_threshold_secs: u64,
    pub max_retries: u32,
}

impl WatchdogConfig {
    /// `None` when the threshold does not fit a signed duration.
    pub fn stale_threshold(&self) -> Option<ChronoDuration> {
        seconds(self.stale_threshold_secs)
    }

    pub fn retry_threshold(&self) -> Option<ChronoDuration> {
        seconds(self.retry_threshold_secs)
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            stale_threshold_secs: 600,
            retry_threshold_secs: 300,
            max_retries: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub error_reason_max_bytes: usize,
    pub transcript_max_bytes: usize,
    pub transcript_keep_head: usize,
    pub transcript_keep_tail: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            error_reason_max_bytes: 500,
            transcript_max_bytes: 350_000,
            transcript_keep_head: 1,
            transcript_keep_tail: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicsConfig {
    pub handoff: String,
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            handoff: "incident.diagnosed".to_string(),
        }
    }
}

fn seconds(secs: u64) -> Option<ChronoDuration> {
    i64::try_from(secs).ok().and_then(ChronoDuration::try_seconds)
}

impl WardenConfig {
    /// Parses configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Applies `WARDEN_TOKEN_BUDGET` and `WARDEN_MAX_RETRIES`.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|var| std::env::var(var).ok())
    }

    fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(value) = lookup("WARDEN_TOKEN_BUDGET") {
            self.intake.context_token_budget = value.trim().parse().map_err(|_| ConfigError::Env {
                var: "WARDEN_TOKEN_BUDGET",
                value: value.clone(),
            })?;
        }
        if let Some(value) = lookup("WARDEN_MAX_RETRIES") {
            self.watchdog.max_retries = value.trim().parse().map_err(|_| ConfigError::Env {
                var: "WARDEN_MAX_RETRIES",
                value: value.clone(),
            })?;
        }
        Ok(())
    }

    /// Rejects settings that would make a stage unable to run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
        }
        if self.reasoning.diagnosis.max_steps == 0 || self.reasoning.proposal.max_steps == 0 {
            return Err(ConfigError::Invalid("reasoning max_steps must be at least 1".into()));
        }
        if self.topics.handoff.trim().is_empty() {
            return Err(ConfigError::Invalid("topics.handoff must not be empty".into()));
        }
        for (name, secs) in [
            ("intake.staleness_secs", self.intake.staleness_secs),
            ("watchdog.stale_threshold_secs", self.watchdog.stale_threshold_secs),
            ("watchdog.retry_threshold_secs", self.watchdog.retry_threshold_secs),
        ] {
            if seconds(secs).is_none() {
                return Err(ConfigError::Invalid(format!("{name} is out of range: {secs}")));
            }
        }
        if self.watchdog.retry_threshold_secs > self.watchdog.stale_threshold_secs {
            warn!(
                retry_threshold_secs = self.watchdog.retry_threshold_secs,
                stale_threshold_secs = self.watchdog.stale_threshold_secs,
                "Retry threshold exceeds stale threshold"
            );
        }
        Ok(())
    }
}
