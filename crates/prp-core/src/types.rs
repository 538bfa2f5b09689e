use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::PrpError;

// ---------------------------------------------------------------------------
// AgentRole
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Developer,
    Aqa,
    QualityControl,
    Orchestrator,
}

impl AgentRole {
    pub fn all() -> &'static [AgentRole] {
        &[
            AgentRole::Developer,
            AgentRole::Aqa,
            AgentRole::QualityControl,
            AgentRole::Orchestrator,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AgentRole::Developer => "developer",
            AgentRole::Aqa => "aqa",
            AgentRole::QualityControl => "quality_control",
            AgentRole::Orchestrator => "orchestrator",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AgentRole {
    type Err = PrpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "developer" => Ok(AgentRole::Developer),
            "aqa" => Ok(AgentRole::Aqa),
            "quality_control" => Ok(AgentRole::QualityControl),
            "orchestrator" => Ok(AgentRole::Orchestrator),
            _ => Err(PrpError::validation(
                "agent role",
                s,
                "must be developer, aqa, quality_control, or orchestrator",
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Category
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    HumanFactor,
    Workflow,
    Testing,
    Quality,
    Orchestration,
    General,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::HumanFactor => "human_factor",
            Category::Workflow => "workflow",
            Category::Testing => "testing",
            Category::Quality => "quality",
            Category::Orchestration => "orchestration",
            Category::General => "general",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Intent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    ImmediateAttention,
    StatusUpdate,
    Informational,
    TestingRelated,
    QualityAssurance,
    General,
}

impl Intent {
    pub fn as_str(self) -> &'static str {
        match self {
            Intent::ImmediateAttention => "immediate_attention",
            Intent::StatusUpdate => "status_update",
            Intent::Informational => "informational",
            Intent::TestingRelated => "testing_related",
            Intent::QualityAssurance => "quality_assurance",
            Intent::General => "general",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// RiskLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Minimal,
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Bucket a 0–10 score at thresholds 2/4/6/8.
    pub fn from_score(score: f64) -> Self {
        if score >= 8.0 {
            RiskLevel::Critical
        } else if score >= 6.0 {
            RiskLevel::High
        } else if score >= 4.0 {
            RiskLevel::Medium
        } else if score >= 2.0 {
            RiskLevel::Low
        } else {
            RiskLevel::Minimal
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Minimal => "minimal",
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// EscalationTarget
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationTarget {
    TeamLead,
    Orchestrator,
    Admin,
}

impl EscalationTarget {
    /// Level 0 has no target; anything above 3 is treated as 3.
    pub fn for_level(level: u8) -> Option<Self> {
        match level {
            0 => None,
            1 => Some(EscalationTarget::TeamLead),
            2 => Some(EscalationTarget::Orchestrator),
            _ => Some(EscalationTarget::Admin),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EscalationTarget::TeamLead => "team_lead",
            EscalationTarget::Orchestrator => "orchestrator",
            EscalationTarget::Admin => "admin",
        }
    }
}

impl fmt::Display for EscalationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
