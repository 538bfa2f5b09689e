use crate::bus::DEFAULT_HISTORY_CAPACITY;
use crate::decision::{DecisionSettings, DEFAULT_SPAWN_BUDGET};
use crate::error::Result;
use crate::guideline::GuidelineLoader;
use crate::inspector::{PoolConfig, WorkerSettings};
use crate::signal::DEFAULT_CONTEXT_RADIUS;
use crate::tokens::{
    TokenAccounting, TokenLimit, TokenSettings, DEFAULT_CRITICAL_THRESHOLD,
    DEFAULT_WARNING_THRESHOLD,
};
use crate::types::AgentRole;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE: &str = "prp.yaml";

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// BusConfig / ParserConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

fn default_history_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            history_capacity: default_history_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParserConfig {
    #[serde(default = "default_context_radius")]
    pub context_radius: usize,
}

fn default_context_radius() -> usize {
    DEFAULT_CONTEXT_RADIUS
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            context_radius: default_context_radius(),
        }
    }
}

// ---------------------------------------------------------------------------
// PoolSection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSection {
    #[serde(default = "default_pool_size")]
    pub size: usize,
    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
    #[serde(default = "default_ping_timeout_ms")]
    pub ping_timeout_ms: u64,
    #[serde(default = "default_guideline_cache_capacity")]
    pub guideline_cache_capacity: usize,
    #[serde(default = "default_guideline_cache_ttl_secs")]
    pub guideline_cache_ttl_secs: u64,
    /// Directory of `<code>.md` guidelines. Built-in guidelines when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guideline_dir: Option<PathBuf>,
}

fn default_pool_size() -> usize {
    4
}

fn default_ready_timeout_ms() -> u64 {
    5_000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_shutdown_timeout_ms() -> u64 {
    5_000
}

fn default_ping_timeout_ms() -> u64 {
    1_000
}

fn default_guideline_cache_capacity() -> usize {
    256
}

fn default_guideline_cache_ttl_secs() -> u64 {
    300
}

impl Default for PoolSection {
    fn default() -> Self {
        Self {
            size: default_pool_size(),
            ready_timeout_ms: default_ready_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            ping_timeout_ms: default_ping_timeout_ms(),
            guideline_cache_capacity: default_guideline_cache_capacity(),
            guideline_cache_ttl_secs: default_guideline_cache_ttl_secs(),
            guideline_dir: None,
        }
    }
}

impl PoolSection {
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            size: self.size,
            ready_timeout: Duration::from_millis(self.ready_timeout_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            shutdown_timeout: Duration::from_millis(self.shutdown_timeout_ms),
            worker: WorkerSettings {
                cache_capacity: self.guideline_cache_capacity,
                cache_ttl: Duration::from_secs(self.guideline_cache_ttl_secs),
            },
        }
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub fn loader(&self) -> GuidelineLoader {
        match &self.guideline_dir {
            Some(dir) => GuidelineLoader::Directory(dir.clone()),
            None => GuidelineLoader::Builtin,
        }
    }
}

// ---------------------------------------------------------------------------
// TokensConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokensConfig {
    #[serde(default = "default_warning_threshold")]
    pub warning_threshold: f64,
    #[serde(default = "default_critical_threshold")]
    pub critical_threshold: f64,
    /// Limit applied to any agent without an explicit entry in `limits`.
    #[serde(default = "default_limit")]
    pub default_limit: String,
    /// Per-agent (or per-role) limit strings, e.g. `aqa: 50k#qa-team`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, String>,
    #[serde(default = "default_summary_cache_ttl_ms")]
    pub summary_cache_ttl_ms: u64,
}

fn default_warning_threshold() -> f64 {
    DEFAULT_WARNING_THRESHOLD
}

fn default_critical_threshold() -> f64 {
    DEFAULT_CRITICAL_THRESHOLD
}

fn default_limit() -> String {
    "100k".to_string()
}

fn default_summary_cache_ttl_ms() -> u64 {
    5_000
}

impl Default for TokensConfig {
    fn default() -> Self {
        Self {
            warning_threshold: default_warning_threshold(),
            critical_threshold: default_critical_threshold(),
            default_limit: default_limit(),
            limits: BTreeMap::new(),
            summary_cache_ttl_ms: default_summary_cache_ttl_ms(),
        }
    }
}

impl TokensConfig {
    pub fn settings(&self) -> Result<TokenSettings> {
        let default_limit: TokenLimit = self.default_limit.parse()?;
        Ok(TokenSettings {
            warning_threshold: self.warning_threshold,
            critical_threshold: self.critical_threshold,
            default_limit: default_limit.tokens,
            summary_ttl: Duration::from_millis(self.summary_cache_ttl_ms),
        })
    }

    /// A ledger with thresholds and every configured limit applied.
    pub fn build_ledger(&self) -> Result<TokenAccounting> {
        let mut ledger = TokenAccounting::new(self.settings()?)?;
        for (agent, limit) in &self.limits {
            ledger.set_limit(agent, limit)?;
        }
        Ok(ledger)
    }
}

// ---------------------------------------------------------------------------
// DecisionConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionConfig {
    #[serde(default = "default_spawn_budget")]
    pub spawn_budget_tokens: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub role_budgets: BTreeMap<AgentRole, u64>,
}

fn default_spawn_budget() -> u64 {
    DEFAULT_SPAWN_BUDGET
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            spawn_budget_tokens: default_spawn_budget(),
            role_budgets: BTreeMap::new(),
        }
    }
}

impl DecisionConfig {
    pub fn settings(&self) -> DecisionSettings {
        DecisionSettings {
            spawn_budget: self.spawn_budget_tokens,
            role_budgets: self.role_budgets.iter().map(|(r, b)| (*r, *b)).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub parser: ParserConfig,
    #[serde(default)]
    pub pool: PoolSection,
    #[serde(default)]
    pub tokens: TokensConfig,
    #[serde(default)]
    pub decision: DecisionConfig,
}

impl Config {
    /// Read `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let mut push = |level: WarnLevel, message: String| {
            warnings.push(ConfigWarning { level, message });
        };

        if self.bus.history_capacity == 0 {
            push(
                WarnLevel::Warning,
                "bus.history_capacity is 0; one event will be kept".into(),
            );
        }

        if self.pool.size == 0 {
            push(WarnLevel::Error, "pool.size must be at least 1".into());
        } else if self.pool.size > 64 {
            push(
                WarnLevel::Warning,
                format!("pool.size={} (>64 is unusual)", self.pool.size),
            );
        }
        if self.pool.request_timeout_ms == 0 {
            push(
                WarnLevel::Error,
                "pool.request_timeout_ms must be at least 1".into(),
            );
        }
        if let Some(dir) = &self.pool.guideline_dir {
            if !dir.is_dir() {
                push(
                    WarnLevel::Warning,
                    format!(
                        "pool.guideline_dir '{}' does not exist; workers will fail to start",
                        dir.display()
                    ),
                );
            }
        }

        let (warning, critical) = (self.tokens.warning_threshold, self.tokens.critical_threshold);
        if !(warning > 0.0 && warning < critical && critical <= 100.0) {
            push(
                WarnLevel::Error,
                format!(
                    "token thresholds must satisfy 0 < warning < critical <= 100 (got {warning}/{critical})"
                ),
            );
        }
        if let Err(e) = self.tokens.default_limit.parse::<TokenLimit>() {
            push(WarnLevel::Error, format!("tokens.default_limit: {e}"));
        }
        for (agent, limit) in &self.tokens.limits {
            if let Err(e) = limit.parse::<TokenLimit>() {
                push(WarnLevel::Error, format!("tokens.limits.{agent}: {e}"));
            }
        }

        if self.decision.spawn_budget_tokens == 0 {
            push(
                WarnLevel::Warning,
                "decision.spawn_budget_tokens is 0; spawned agents get no budget".into(),
            );
        }
        for (role, budget) in &self.decision.role_budgets {
            if *budget == 0 {
                push(
                    WarnLevel::Warning,
                    format!("decision.role_budgets.{role} is 0"),
                );
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
