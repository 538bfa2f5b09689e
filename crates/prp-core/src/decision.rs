//! Budget-aware decisions on inspected signals.
//!
//! Each PRP moves `idle → evaluating → idle` around every decision. The engine
//! never spawns an agent for an incomplete inspection, a resolved signal, or a
//! role whose token budget is already committed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::error::{PrpError, Result};
use crate::inspector::{PoolOutcome, WorkerResult};
use crate::tokens::{Alert, TokenAccounting};
use crate::types::{AgentRole, EscalationTarget};

pub const DEFAULT_SPAWN_BUDGET: u64 = 10_000;
pub const UNASSIGNED_PRP: &str = "unassigned";

// ---------------------------------------------------------------------------
// DecisionKind / PrpPhase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    SpawnAgent,
    Escalate,
    Defer,
    NoAction,
}

impl DecisionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DecisionKind::SpawnAgent => "spawn_agent",
            DecisionKind::Escalate => "escalate",
            DecisionKind::Defer => "defer",
            DecisionKind::NoAction => "no_action",
        }
    }
}

impl fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrpPhase {
    Idle,
    Evaluating,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrpState {
    pub phase: PrpPhase,
    pub last_decision: Option<DecisionKind>,
    pub decisions: u64,
}

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub id: String,
    pub prp: String,
    pub kind: DecisionKind,
    pub role: Option<AgentRole>,
    pub budget_tokens: u64,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalate_to: Option<EscalationTarget>,
    pub timestamp: DateTime<Utc>,
}

impl Decision {
    /// Body of the `orchestrator_decision` event.
    pub fn payload(&self) -> serde_json::Value {
        json!({
            "currentPrp": self.prp,
            "decision": self.kind,
            "role": self.role.map(AgentRole::as_str).unwrap_or(NO_ROLE),
            "budget": { "tokens": self.budget_tokens },
        })
    }
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Working,
    Error,
    Offline,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: String,
    pub role: AgentRole,
    pub status: AgentStatus,
    pub current_task: Option<String>,
    /// Tokens reserved for the current task.
    pub budget: u64,
    pub tasks_completed: u64,
}

// ---------------------------------------------------------------------------
// DecisionEngine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DecisionSettings {
    pub spawn_budget: u64,
    pub role_budgets: HashMap<AgentRole, u64>,
}

impl Default for DecisionSettings {
    fn default() -> Self {
        Self {
            spawn_budget: DEFAULT_SPAWN_BUDGET,
            role_budgets: HashMap::new(),
        }
    }
}

impl DecisionSettings {
    pub fn budget_for(&self, role: AgentRole) -> u64 {
        self.role_budgets
            .get(&role)
            .copied()
            .unwrap_or(self.spawn_budget)
    }
}

#[derive(Debug, Default)]
pub struct DecisionEngine {
    settings: DecisionSettings,
    agents: BTreeMap<String, Agent>,
    prps: BTreeMap<String, PrpState>,
    history: Vec<Decision>,
}

/// `role` in a decision payload when no role was assigned.
pub const NO_ROLE: &str = "";

/// Ledger key for a role's shared budget.
pub fn ledger_key(role: AgentRole) -> &'static str {
    role.as_str()
}

struct Verdict {
    kind: DecisionKind,
    role: Option<AgentRole>,
    budget: u64,
    reason: String,
    escalate_to: Option<EscalationTarget>,
}

impl Verdict {
    fn no_action(role: Option<AgentRole>, reason: impl Into<String>) -> Self {
        Self {
            kind: DecisionKind::NoAction,
            role,
            budget: 0,
            reason: reason.into(),
            escalate_to: None,
        }
    }
}

impl DecisionEngine {
    pub fn new(settings: DecisionSettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    /// Decide what to do about one pool outcome. Spawn decisions reserve
    /// their budget in `ledger` and register a working [`Agent`].
    pub fn decide(&mut self, outcome: &PoolOutcome, ledger: &mut TokenAccounting) -> Decision {
        let (prp, signal_id) = match outcome {
            PoolOutcome::Completed(r) => (r.prp.clone(), Some(r.signal_id.clone())),
            PoolOutcome::Failed(f) => (
                f.prp.clone().unwrap_or_else(|| UNASSIGNED_PRP.to_string()),
                f.signal_id.clone(),
            ),
        };
        self.enter(&prp);

        let verdict = match outcome {
            PoolOutcome::Failed(f) => {
                Verdict::no_action(None, format!("inspection failed: {} {}", f.code, f.message))
            }
            PoolOutcome::Completed(result) => self.evaluate(result, ledger),
        };

        let agent_id = match (verdict.kind, verdict.role) {
            (DecisionKind::SpawnAgent, Some(role)) => {
                Some(self.spawn(role, verdict.budget, signal_id.clone(), ledger))
            }
            _ => None,
        };

        let decision = Decision {
            id: uuid::Uuid::new_v4().to_string(),
            prp: prp.clone(),
            kind: verdict.kind,
            role: verdict.role,
            budget_tokens: verdict.budget,
            reason: verdict.reason,
            signal_id,
            agent_id,
            escalate_to: verdict.escalate_to,
            timestamp: Utc::now(),
        };
        tracing::info!(
            prp = %decision.prp,
            decision = %decision.kind,
            budget = decision.budget_tokens,
            "{}",
            decision.reason
        );
        self.leave(&prp, decision.kind);
        self.history.push(decision.clone());
        decision
    }

    fn evaluate(&self, result: &WorkerResult, ledger: &TokenAccounting) -> Verdict {
        let role = result.classification.agent_role;
        if !result.success {
            return Verdict::no_action(Some(role), "inspection incomplete");
        }
        if result.signal.is_resolved() {
            return Verdict::no_action(
                Some(role),
                format!("[{}] already resolved", result.signal.code),
            );
        }

        let key = ledger_key(role);
        if ledger.is_exhausted(key) {
            return Verdict {
                kind: DecisionKind::Defer,
                role: Some(role),
                budget: 0,
                reason: format!("{role} token budget exhausted"),
                escalate_to: None,
            };
        }

        let level = result.classification.escalation_level;
        if level >= 2 {
            let target = EscalationTarget::for_level(level);
            return Verdict {
                kind: DecisionKind::Escalate,
                role: Some(role),
                budget: 0,
                reason: format!(
                    "[{}] escalation level {level} needs {}",
                    result.signal.code,
                    target.map(|t| t.as_str()).unwrap_or("review")
                ),
                escalate_to: target,
            };
        }

        let budget = self.settings.budget_for(role).min(ledger.available(key));
        Verdict {
            kind: DecisionKind::SpawnAgent,
            role: Some(role),
            budget,
            reason: format!("spawn {role} for [{}]", result.signal.code),
            escalate_to: None,
        }
    }

    fn spawn(
        &mut self,
        role: AgentRole,
        budget: u64,
        task: Option<String>,
        ledger: &mut TokenAccounting,
    ) -> String {
        ledger.reserve(ledger_key(role), budget);

        // An idle agent of the same role takes the task before a new one is made.
        if let Some(agent) = self
            .agents
            .values_mut()
            .find(|a| a.role == role && a.status == AgentStatus::Idle)
        {
            agent.status = AgentStatus::Working;
            agent.current_task = task;
            agent.budget = budget;
            return agent.id.clone();
        }

        let id = format!("{role}-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
        self.agents.insert(
            id.clone(),
            Agent {
                id: id.clone(),
                role,
                status: AgentStatus::Working,
                current_task: task,
                budget,
                tasks_completed: 0,
            },
        );
        id
    }

    fn enter(&mut self, prp: &str) {
        let state = self.prps.entry(prp.to_string()).or_insert(PrpState {
            phase: PrpPhase::Idle,
            last_decision: None,
            decisions: 0,
        });
        state.phase = PrpPhase::Evaluating;
    }

    fn leave(&mut self, prp: &str, kind: DecisionKind) {
        if let Some(state) = self.prps.get_mut(prp) {
            state.phase = PrpPhase::Idle;
            state.last_decision = Some(kind);
            state.decisions += 1;
        }
    }

    /// A spawned agent finished: release its reservation, charge actual usage
    /// to the role, and return it to idle.
    pub fn report_completion(
        &mut self,
        agent_id: &str,
        tokens_used: u64,
        ledger: &mut TokenAccounting,
    ) -> Result<Vec<Alert>> {
        let agent = self
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| PrpError::validation("agent id", agent_id, "unknown agent"))?;
        let key = ledger_key(agent.role);
        ledger.release(key, agent.budget);
        let alerts = ledger.record_usage(key, tokens_used);

        agent.status = AgentStatus::Idle;
        agent.current_task = None;
        agent.budget = 0;
        agent.tasks_completed += 1;
        tracing::debug!(agent = agent_id, tokens_used, "agent task completed");
        Ok(alerts)
    }

    /// Drop an agent from the registry, releasing whatever it still had
    /// reserved.
    pub fn retire_agent(&mut self, agent_id: &str, ledger: &mut TokenAccounting) -> bool {
        let Some(agent) = self.agents.remove(agent_id) else {
            return false;
        };
        ledger.release(ledger_key(agent.role), agent.budget);
        tracing::debug!(agent = agent_id, tasks = agent.tasks_completed, "agent retired");
        true
    }

    pub fn agent(&self, agent_id: &str) -> Option<&Agent> {
        self.agents.get(agent_id)
    }

    pub fn agents(&self) -> impl Iterator<Item = &Agent> {
        self.agents.values()
    }

    pub fn prp_state(&self, prp: &str) -> Option<&PrpState> {
        self.prps.get(prp)
    }

    pub fn history(&self) -> &[Decision] {
        &self.history
    }

    pub fn counts(&self) -> BTreeMap<DecisionKind, u64> {
        let mut counts = BTreeMap::new();
        for d in &self.history {
            *counts.entry(d.kind).or_insert(0) += 1;
        }
        counts
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
