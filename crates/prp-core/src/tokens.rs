//! Per-agent token ledger: usage, limits, reservations, and threshold alerts.
//!
//! Each limit change or reset opens a new *epoch*. Within one epoch the
//! warning and critical alerts are raised at most once per agent; an update
//! that jumps straight past the critical threshold raises only the critical
//! alert and spends the warning with it.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

use crate::cache::BoundedCache;
use crate::error::{PrpError, Result};

pub const DEFAULT_WARNING_THRESHOLD: f64 = 80.0;
pub const DEFAULT_CRITICAL_THRESHOLD: f64 = 90.0;
pub const DEFAULT_LIMIT_TOKENS: u64 = 100_000;

// ---------------------------------------------------------------------------
// TokenLimit
// ---------------------------------------------------------------------------

/// A parsed limit string such as `100k`, `1.5M`, or `250k#team-a`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenLimit {
    pub tokens: u64,
    pub owner: Option<String>,
}

fn limit_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(\d+(?:\.\d+)?)([kmg])?(?:#(.+))?$").unwrap())
}

impl FromStr for TokenLimit {
    type Err = PrpError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: &str| PrpError::validation("token limit", s, reason);

        let caps = limit_re()
            .captures(s.trim())
            .ok_or_else(|| invalid("expected <number>[k|m|g][#owner]"))?;
        let number: f64 = caps[1]
            .parse()
            .map_err(|_| invalid("number out of range"))?;
        let multiplier = match caps.get(2).map(|m| m.as_str().to_ascii_lowercase()) {
            None => 1.0,
            Some(suffix) => match suffix.as_str() {
                "k" => 1e3,
                "m" => 1e6,
                _ => 1e9,
            },
        };
        let tokens = (number * multiplier).round();
        if !tokens.is_finite() || tokens > u64::MAX as f64 {
            return Err(invalid("number out of range"));
        }
        if tokens < 1.0 {
            return Err(invalid("limit must be at least one token"));
        }
        Ok(TokenLimit {
            tokens: tokens as u64,
            owner: caps.get(3).map(|m| m.as_str().to_string()),
        })
    }
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Warning,
    Critical,
}

impl AlertLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertLevel::Warning => "warning",
            AlertLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: String,
    pub level: AlertLevel,
    pub agent_id: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub acknowledged: bool,
}

// ---------------------------------------------------------------------------
// Ledger entries and summary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenLedgerEntry {
    pub agent_id: String,
    pub current_usage: u64,
    pub limit: u64,
    pub percentage: f64,
    pub cost: f64,
    /// Remaining fraction of the limit, 0–1.
    pub efficiency: f64,
    pub operations: u64,
    pub reserved: u64,
    /// Bumped by every limit change or reset.
    pub epoch: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenSummary {
    pub total_usage: u64,
    pub total_cost: f64,
    pub total_operations: u64,
    pub active_alerts: usize,
    /// Highest percentage first.
    pub entries: Vec<TokenLedgerEntry>,
}

#[derive(Debug, Clone)]
struct AgentLedger {
    usage: u64,
    limit: u64,
    owner: Option<String>,
    cost: f64,
    operations: u64,
    reserved: u64,
    epoch: u64,
    warning_raised: bool,
    critical_raised: bool,
}

impl AgentLedger {
    fn new(limit: u64) -> Self {
        Self {
            usage: 0,
            limit,
            owner: None,
            cost: 0.0,
            operations: 0,
            reserved: 0,
            epoch: 0,
            warning_raised: false,
            critical_raised: false,
        }
    }

    fn percentage(&self) -> f64 {
        self.usage as f64 / self.limit as f64 * 100.0
    }

    fn open_epoch(&mut self) {
        self.epoch += 1;
        self.warning_raised = false;
        self.critical_raised = false;
    }

    fn entry(&self, agent_id: &str) -> TokenLedgerEntry {
        TokenLedgerEntry {
            agent_id: agent_id.to_string(),
            current_usage: self.usage,
            limit: self.limit,
            percentage: self.percentage(),
            cost: self.cost,
            efficiency: (1.0 - self.usage as f64 / self.limit as f64).clamp(0.0, 1.0),
            operations: self.operations,
            reserved: self.reserved,
            epoch: self.epoch,
            owner: self.owner.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// TokenAccounting
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TokenSettings {
    pub warning_threshold: f64,
    pub critical_threshold: f64,
    pub default_limit: u64,
    pub summary_ttl: Duration,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            warning_threshold: DEFAULT_WARNING_THRESHOLD,
            critical_threshold: DEFAULT_CRITICAL_THRESHOLD,
            default_limit: DEFAULT_LIMIT_TOKENS,
            summary_ttl: Duration::from_secs(5),
        }
    }
}

pub struct TokenAccounting {
    agents: BTreeMap<String, AgentLedger>,
    alerts: Vec<Alert>,
    settings: TokenSettings,
    summary_cache: BoundedCache<(), TokenSummary>,
}

impl Default for TokenAccounting {
    fn default() -> Self {
        Self::build(TokenSettings::default())
    }
}

impl fmt::Debug for TokenAccounting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenAccounting")
            .field("agents", &self.agents.len())
            .field("alerts", &self.alerts.len())
            .field("settings", &self.settings)
            .finish()
    }
}

impl TokenAccounting {
    pub fn new(settings: TokenSettings) -> Result<Self> {
        let (warning, critical) = (settings.warning_threshold, settings.critical_threshold);
        if !(warning > 0.0 && warning < critical && critical <= 100.0) {
            return Err(PrpError::validation(
                "token thresholds",
                format!("{warning}/{critical}"),
                "need 0 < warning < critical <= 100",
            ));
        }
        if settings.default_limit == 0 {
            return Err(PrpError::validation(
                "default token limit",
                "0",
                "limit must be at least one token",
            ));
        }
        Ok(Self::build(settings))
    }

    fn build(settings: TokenSettings) -> Self {
        let summary_cache = BoundedCache::new(1, settings.summary_ttl);
        Self {
            agents: BTreeMap::new(),
            alerts: Vec::new(),
            settings,
            summary_cache,
        }
    }

    fn ledger_mut(&mut self, agent_id: &str) -> &mut AgentLedger {
        let default_limit = self.settings.default_limit;
        self.agents
            .entry(agent_id.to_string())
            .or_insert_with(|| AgentLedger::new(default_limit))
    }

    fn invalidate(&mut self) {
        self.summary_cache.delete(&());
    }

    /// Add `tokens` to the agent's usage and return any alerts this raised.
    pub fn record_usage(&mut self, agent_id: &str, tokens: u64) -> Vec<Alert> {
        self.record_usage_with_cost(agent_id, tokens, 0.0)
    }

    pub fn record_usage_with_cost(&mut self, agent_id: &str, tokens: u64, cost: f64) -> Vec<Alert> {
        let ledger = self.ledger_mut(agent_id);
        ledger.usage = ledger.usage.saturating_add(tokens);
        ledger.cost += cost.max(0.0);
        ledger.operations += 1;
        tracing::debug!(agent = agent_id, tokens, usage = ledger.usage, "token usage recorded");
        self.invalidate();
        self.check_agent(agent_id)
    }

    /// Parse and apply a limit string. Opens a new alert epoch for the agent.
    pub fn set_limit(&mut self, agent_id: &str, spec: &str) -> Result<TokenLimit> {
        let limit: TokenLimit = spec.parse()?;
        let ledger = self.ledger_mut(agent_id);
        ledger.limit = limit.tokens;
        ledger.owner = limit.owner.clone();
        ledger.open_epoch();
        tracing::info!(agent = agent_id, limit = limit.tokens, "token limit set");
        self.invalidate();
        Ok(limit)
    }

    /// Raise pending threshold alerts for one agent, or for every agent.
    pub fn check_limits(&mut self, agent_id: Option<&str>) -> Vec<Alert> {
        match agent_id {
            Some(id) => self.check_agent(id),
            None => {
                let ids: Vec<String> = self.agents.keys().cloned().collect();
                ids.iter().flat_map(|id| self.check_agent(id)).collect()
            }
        }
    }

    fn check_agent(&mut self, agent_id: &str) -> Vec<Alert> {
        let (warning, critical) = (
            self.settings.warning_threshold,
            self.settings.critical_threshold,
        );
        let Some(ledger) = self.agents.get_mut(agent_id) else {
            return Vec::new();
        };
        let pct = ledger.percentage();
        let limit = ledger.limit;

        // Warning before critical; each at most once per epoch.
        let mut levels = Vec::new();
        if pct >= warning && !ledger.warning_raised {
            ledger.warning_raised = true;
            levels.push(AlertLevel::Warning);
        }
        if pct >= critical && !ledger.critical_raised {
            ledger.critical_raised = true;
            levels.push(AlertLevel::Critical);
        }
        if levels.is_empty() {
            return Vec::new();
        }

        let raised: Vec<Alert> = levels
            .into_iter()
            .map(|level| {
                let alert = Alert {
                    id: uuid::Uuid::new_v4().to_string(),
                    level,
                    agent_id: agent_id.to_string(),
                    message: format!("{agent_id} has used {pct:.1}% of its {limit} token limit"),
                    timestamp: Utc::now(),
                    acknowledged: false,
                };
                match level {
                    AlertLevel::Warning => tracing::warn!(agent = agent_id, "{}", alert.message),
                    AlertLevel::Critical => tracing::error!(agent = agent_id, "{}", alert.message),
                }
                alert
            })
            .collect();
        self.alerts.extend(raised.iter().cloned());
        self.invalidate();
        raised
    }

    /// Zero usage, drop alerts and open a new epoch for one agent or all.
    /// Reservations are untouched.
    pub fn reset(&mut self, agent_id: Option<&str>) {
        match agent_id {
            Some(id) => {
                if let Some(ledger) = self.agents.get_mut(id) {
                    reset_ledger(ledger);
                }
                self.alerts.retain(|a| a.agent_id != id);
            }
            None => {
                self.agents.values_mut().for_each(reset_ledger);
                self.alerts.clear();
            }
        }
        self.invalidate();
    }

    pub fn acknowledge(&mut self, alert_id: &str) -> bool {
        let Some(alert) = self.alerts.iter_mut().find(|a| a.id == alert_id) else {
            return false;
        };
        alert.acknowledged = true;
        self.invalidate();
        true
    }

    pub fn alerts(&self) -> &[Alert] {
        &self.alerts
    }

    pub fn active_alerts(&self) -> Vec<&Alert> {
        self.alerts.iter().filter(|a| !a.acknowledged).collect()
    }

    // -- reservations -------------------------------------------------------

    /// Tokens still spendable: limit minus usage minus outstanding reservations.
    pub fn available(&self, agent_id: &str) -> u64 {
        match self.agents.get(agent_id) {
            Some(l) => l.limit.saturating_sub(l.usage.saturating_add(l.reserved)),
            None => self.settings.default_limit,
        }
    }

    pub fn is_exhausted(&self, agent_id: &str) -> bool {
        self.available(agent_id) == 0
    }

    pub fn reserve(&mut self, agent_id: &str, tokens: u64) {
        let ledger = self.ledger_mut(agent_id);
        ledger.reserved = ledger.reserved.saturating_add(tokens);
        self.invalidate();
    }

    pub fn release(&mut self, agent_id: &str, tokens: u64) {
        if let Some(ledger) = self.agents.get_mut(agent_id) {
            ledger.reserved = ledger.reserved.saturating_sub(tokens);
            self.invalidate();
        }
    }

    // -- queries ------------------------------------------------------------

    pub fn entry(&self, agent_id: &str) -> Option<TokenLedgerEntry> {
        self.agents.get(agent_id).map(|l| l.entry(agent_id))
    }

    pub fn summary(&mut self) -> TokenSummary {
        if let Some(cached) = self.summary_cache.get(&()) {
            return cached.clone();
        }
        let summary = self.compute_summary();
        self.summary_cache.set((), summary.clone());
        summary
    }

    fn compute_summary(&self) -> TokenSummary {
        let mut entries: Vec<TokenLedgerEntry> =
            self.agents.iter().map(|(id, l)| l.entry(id)).collect();
        entries.sort_by(|a, b| b.percentage.total_cmp(&a.percentage));
        TokenSummary {
            total_usage: entries.iter().map(|e| e.current_usage).sum(),
            total_cost: entries.iter().map(|e| e.cost).sum(),
            total_operations: entries.iter().map(|e| e.operations).sum(),
            active_alerts: self.alerts.iter().filter(|a| !a.acknowledged).count(),
            entries,
        }
    }

    pub fn settings(&self) -> &TokenSettings {
        &self.settings
    }
}

fn reset_ledger(ledger: &mut AgentLedger) {
    ledger.usage = 0;
    ledger.cost = 0.0;
    ledger.operations = 0;
    ledger.open_epoch();
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
