//! The three-stage inspection pipeline run by every worker:
//! analysis → classification → recommendations.
//!
//! Everything here is pure and deterministic given a request and a clock.

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::OnceLock;

use super::rules::{self, SignalRule};
use crate::signal::Signal;
use crate::types::{AgentRole, Category, EscalationTarget, Intent, RiskLevel};

pub const DEFAULT_PRIORITY: u8 = 5;
pub const MAX_PRIORITY: u8 = 10;

/// Context keys with a reserved meaning; they do not count as "extra" context.
const RESERVED_CONTEXT_KEYS: &[&str] = &["description", "prp"];
const LARGE_CONTEXT_BYTES: usize = 1000;
const MANY_CONTEXT_KEYS: usize = 5;

// ---------------------------------------------------------------------------
// ProcessingRequest
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingRequest {
    pub signal: Signal,
    #[serde(default)]
    pub context: Map<String, Value>,
    #[serde(default = "default_priority")]
    pub priority: u8,
}

fn default_priority() -> u8 {
    DEFAULT_PRIORITY
}

impl ProcessingRequest {
    pub fn new(signal: Signal) -> Self {
        Self {
            signal,
            context: Map::new(),
            priority: DEFAULT_PRIORITY,
        }
    }

    /// Priorities above 10 are clamped.
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.min(MAX_PRIORITY);
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// `context.description` when it is a non-empty string, else the signal's
    /// surrounding text.
    pub fn description(&self) -> Option<&str> {
        let explicit = self
            .context
            .get("description")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty());
        explicit.or_else(|| {
            let ctx = self.signal.context.trim();
            (!ctx.is_empty()).then_some(ctx)
        })
    }

    /// The unit of work this request belongs to.
    pub fn prp(&self) -> String {
        self.context
            .get("prp")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| self.signal.source.clone())
            .unwrap_or_else(|| "unassigned".to_string())
    }
}

// ---------------------------------------------------------------------------
// Output types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub intent: Intent,
    pub urgency: u8,
    pub complexity: u8,
    pub required_actions: Vec<String>,
    pub potential_blockers: Vec<String>,
    pub estimated_effort_hours: f64,
    pub risk_level: RiskLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub category: Category,
    pub subcategory: String,
    pub priority: u8,
    pub agent_role: AgentRole,
    pub escalation_level: u8,
    pub deadline: DateTime<Utc>,
    pub dependencies: Vec<String>,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationKind {
    ImmediateAction,
    Research,
    Escalation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    #[serde(rename = "type")]
    pub kind: RecommendationKind,
    pub priority: u8,
    pub description: String,
    pub estimated_time_minutes: u32,
    pub prerequisites: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<EscalationTarget>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Inspection {
    pub analysis: Analysis,
    pub classification: Classification,
    pub recommendations: Vec<Recommendation>,
}

// ---------------------------------------------------------------------------
// Patterns
// ---------------------------------------------------------------------------

fn blocker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bblock(?:er|ers|ed|ing)?\b").unwrap())
}

fn depends_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)depends on:\s*([^\n.;]+)").unwrap())
}

// ---------------------------------------------------------------------------
// Stage 1: analysis
// ---------------------------------------------------------------------------

fn urgency_adjustment(rule: &SignalRule) -> i32 {
    match rule.intent {
        Intent::ImmediateAttention => i32::from(rule.escalation_weight.clamp(1, 3)),
        Intent::TestingRelated | Intent::QualityAssurance => 1,
        Intent::StatusUpdate => -1,
        Intent::Informational => -2,
        Intent::General => 0,
    }
}

fn required_actions(intent: Intent) -> Vec<String> {
    let actions: &[&str] = match intent {
        Intent::ImmediateAttention => &[
            "acknowledge signal",
            "assess impact",
            "assign responsible agent",
        ],
        Intent::StatusUpdate => &["update progress tracking"],
        Intent::Informational => &["record for context"],
        Intent::TestingRelated => &["review test coverage", "run test suite"],
        Intent::QualityAssurance => &["run quality gates", "review findings"],
        Intent::General => &["triage signal"],
    };
    actions.iter().map(|s| s.to_string()).collect()
}

pub fn analyze(request: &ProcessingRequest, rule: &SignalRule) -> Analysis {
    let intent = rule.intent;

    let urgency =
        (i32::from(request.priority) + urgency_adjustment(rule)).clamp(1, i32::from(MAX_PRIORITY));

    let mut complexity: i32 = 3;
    let context_bytes = serde_json::to_string(&request.context)
        .map(|s| s.len())
        .unwrap_or(0);
    if context_bytes > LARGE_CONTEXT_BYTES {
        complexity += 1;
    }
    let extra_keys = request
        .context
        .keys()
        .filter(|k| !RESERVED_CONTEXT_KEYS.contains(&k.as_str()))
        .count();
    if extra_keys > MANY_CONTEXT_KEYS {
        complexity += 1;
    }
    if intent == Intent::ImmediateAttention {
        complexity += 2;
    }
    let complexity = complexity.clamp(0, 10);

    let mut potential_blockers = Vec::new();
    if request
        .description()
        .is_some_and(|d| blocker_re().is_match(d))
    {
        potential_blockers.push("explicit blocker mentioned".to_string());
    }
    if request.priority > 8 {
        potential_blockers.push("high priority may preempt other work".to_string());
    }

    let mut effort = f64::from(complexity) * 2.0;
    if intent == Intent::ImmediateAttention {
        effort *= 1.5;
    }
    if urgency <= 3 {
        effort *= 0.5;
    }

    let risk_level = RiskLevel::from_score(f64::from(urgency + complexity) / 2.0);

    Analysis {
        intent,
        urgency: urgency as u8,
        complexity: complexity as u8,
        required_actions: required_actions(intent),
        potential_blockers,
        estimated_effort_hours: effort,
        risk_level,
    }
}

// ---------------------------------------------------------------------------
// Stage 2: classification
// ---------------------------------------------------------------------------

fn agent_role(category: Category, urgency: u8) -> AgentRole {
    match category {
        Category::Testing => AgentRole::Aqa,
        Category::Quality => AgentRole::QualityControl,
        Category::HumanFactor if urgency > 7 => AgentRole::Orchestrator,
        Category::Orchestration => AgentRole::Orchestrator,
        _ => AgentRole::Developer,
    }
}

fn escalation_level(risk: RiskLevel, urgency: u8) -> u8 {
    if risk == RiskLevel::Critical {
        3
    } else if risk == RiskLevel::High || urgency > 9 {
        2
    } else if urgency > 7 {
        1
    } else {
        0
    }
}

/// Items listed after `depends on:` in the description, comma separated.
pub fn extract_dependencies(description: &str) -> Vec<String> {
    depends_re()
        .captures_iter(description)
        .filter_map(|caps| caps.get(1))
        .flat_map(|m| m.as_str().split(','))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn classify(
    request: &ProcessingRequest,
    rule: &SignalRule,
    analysis: &Analysis,
    now: DateTime<Utc>,
) -> Classification {
    let urgency = analysis.urgency.max(1);
    let description = request.description();

    let deadline_hours = (24 / i64::from(urgency)).max(1);

    // Confidence in tenths keeps the cap exact.
    let mut tenths = 7u8;
    if request.signal.code.chars().count() == 2 {
        tenths += 1;
    }
    if description.is_some() {
        tenths += 1;
    }
    if urgency > 5 {
        tenths += 1;
    }
    let confidence = f64::from(tenths.min(10)) / 10.0;

    Classification {
        category: rule.category,
        subcategory: rule.subcategory.to_string(),
        priority: urgency,
        agent_role: agent_role(rule.category, urgency),
        escalation_level: escalation_level(analysis.risk_level, urgency),
        deadline: now + Duration::hours(deadline_hours),
        dependencies: description.map(extract_dependencies).unwrap_or_default(),
        confidence,
    }
}

// ---------------------------------------------------------------------------
// Stage 3: recommendations
// ---------------------------------------------------------------------------

pub fn recommend(
    request: &ProcessingRequest,
    analysis: &Analysis,
    classification: &Classification,
) -> Vec<Recommendation> {
    let code = &request.signal.code;
    let complexity = u32::from(analysis.complexity.max(1));
    let first_action = analysis
        .required_actions
        .first()
        .map(String::as_str)
        .unwrap_or("triage signal");

    let mut out = vec![Recommendation {
        kind: RecommendationKind::ImmediateAction,
        priority: analysis.urgency,
        description: format!(
            "Handle [{code}] {}: {first_action}",
            classification.subcategory.replace('_', " ")
        ),
        estimated_time_minutes: complexity * 30,
        prerequisites: classification.dependencies.clone(),
        target: None,
    }];

    if analysis.complexity > 5 {
        out.push(Recommendation {
            kind: RecommendationKind::Research,
            priority: analysis.urgency.saturating_sub(1).max(1),
            description: format!("Research context for [{code}] before acting"),
            estimated_time_minutes: complexity * 15,
            prerequisites: Vec::new(),
            target: None,
        });
    }

    if classification.escalation_level > 1 {
        if let Some(target) = EscalationTarget::for_level(classification.escalation_level) {
            out.push(Recommendation {
                kind: RecommendationKind::Escalation,
                priority: analysis.urgency,
                description: format!("Escalate [{code}] to {target}"),
                estimated_time_minutes: 15,
                prerequisites: Vec::new(),
                target: Some(target),
            });
        }
    }

    out
}

/// Run all three stages for `request`.
pub fn inspect(request: &ProcessingRequest, now: DateTime<Utc>) -> Inspection {
    let rule = rules::rule_for(&request.signal.code);
    let analysis = analyze(request, rule);
    let classification = classify(request, rule, &analysis, now);
    let recommendations = recommend(request, &analysis, &classification);
    Inspection {
        analysis,
        classification,
        recommendations,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(code: &str, context: &str) -> ProcessingRequest {
        ProcessingRequest::new(Signal::new(code, 1, 0, context.to_string()))
    }

    fn kinds(recs: &[Recommendation]) -> Vec<RecommendationKind> {
        recs.iter().map(|r| r.kind).collect()
    }

    #[test]
    fn blocker_signal_escalates_to_orchestrator() {
        let now = Utc::now();
        let req = request("bb", "[bb] waiting on credentials");
        let out = inspect(&req, now);

        assert_eq!(out.analysis.intent, Intent::ImmediateAttention);
        assert_eq!(out.analysis.urgency, 7);
        assert_eq!(out.analysis.complexity, 5);
        assert_eq!(out.analysis.risk_level, RiskLevel::High);
        assert!((out.analysis.estimated_effort_hours - 15.0).abs() < 1e-9);

        assert_eq!(out.classification.category, Category::Workflow);
        assert_eq!(out.classification.agent_role, AgentRole::Developer);
        assert_eq!(out.classification.escalation_level, 2);
        assert_eq!(out.classification.deadline, now + Duration::hours(3));
        assert_eq!(out.classification.confidence, 1.0);

        assert_eq!(
            kinds(&out.recommendations),
            vec![
                RecommendationKind::ImmediateAction,
                RecommendationKind::Escalation
            ]
        );
        assert_eq!(
            out.recommendations[1].target,
            Some(EscalationTarget::Orchestrator)
        );
    }

    #[test]
    fn testing_signal_goes_to_aqa() {
        let out = inspect(&request("tp", "[tp] unit tests ready"), Utc::now());
        assert_eq!(out.analysis.urgency, 6);
        assert_eq!(out.analysis.complexity, 3);
        assert_eq!(out.analysis.risk_level, RiskLevel::Medium);
        assert_eq!(out.classification.agent_role, AgentRole::Aqa);
        assert_eq!(out.classification.escalation_level, 0);
        assert_eq!(
            kinds(&out.recommendations),
            vec![RecommendationKind::ImmediateAction]
        );
        assert_eq!(out.recommendations[0].estimated_time_minutes, 90);
    }

    #[test]
    fn quality_signal_goes_to_quality_control() {
        let out = inspect(&request("cf", "[cf] lint failed"), Utc::now());
        assert_eq!(out.classification.category, Category::Quality);
        assert_eq!(out.classification.agent_role, AgentRole::QualityControl);
    }

    #[test]
    fn urgent_human_factor_goes_to_orchestrator() {
        let out = inspect(&request("AA", "[AA] need approval"), Utc::now());
        assert_eq!(out.analysis.urgency, 8);
        assert_eq!(out.classification.category, Category::HumanFactor);
        assert_eq!(out.classification.agent_role, AgentRole::Orchestrator);

        let calm = inspect(&request("ap", "[ap] preview up"), Utc::now());
        assert_eq!(calm.classification.agent_role, AgentRole::Developer);
    }

    #[test]
    fn low_urgency_halves_effort() {
        let now = Utc::now();
        let out = inspect(&request("rc", "[rc] research notes"), now);
        assert_eq!(out.analysis.intent, Intent::Informational);
        assert_eq!(out.analysis.urgency, 3);
        assert!((out.analysis.estimated_effort_hours - 3.0).abs() < 1e-9);
        assert_eq!(out.analysis.risk_level, RiskLevel::Low);
        assert_eq!(out.classification.deadline, now + Duration::hours(8));
    }

    #[test]
    fn urgency_is_clamped() {
        let now = Utc::now();
        let high = inspect(&request("FF", "[FF] crash").with_priority(10), now);
        assert_eq!(high.analysis.urgency, 10);
        assert_eq!(high.classification.deadline, now + Duration::hours(2));

        let low = inspect(&request("rc", "[rc]").with_priority(0), now);
        assert_eq!(low.analysis.urgency, 1);
        assert_eq!(low.classification.deadline, now + Duration::hours(24));
    }

    #[test]
    fn heavy_context_makes_critical_and_requests_research() {
        let mut req = request("AA", "[AA] production down").with_priority(9);
        for i in 0..6 {
            req = req.with_context(format!("k{i}"), json!("x".repeat(200)));
        }
        let out = inspect(&req, Utc::now());

        assert_eq!(out.analysis.complexity, 7);
        assert_eq!(out.analysis.risk_level, RiskLevel::Critical);
        assert_eq!(out.classification.escalation_level, 3);
        assert_eq!(
            kinds(&out.recommendations),
            vec![
                RecommendationKind::ImmediateAction,
                RecommendationKind::Research,
                RecommendationKind::Escalation
            ]
        );
        assert_eq!(out.recommendations[2].target, Some(EscalationTarget::Admin));
        assert!(out
            .analysis
            .potential_blockers
            .iter()
            .any(|b| b.contains("high priority")));
    }

    #[test]
    fn blocker_terms_and_dependencies_come_from_description() {
        let req = request("dp", "[dp]").with_context(
            "description",
            json!("Blocked until merged. depends on: auth-module, db-schema."),
        );
        let out = inspect(&req, Utc::now());
        assert_eq!(
            out.analysis.potential_blockers,
            vec!["explicit blocker mentioned"]
        );
        assert_eq!(
            out.classification.dependencies,
            vec!["auth-module", "db-schema"]
        );
        assert_eq!(out.recommendations[0].prerequisites.len(), 2);
    }

    #[test]
    fn confidence_without_description_or_urgency() {
        let req = request("dp", "   ");
        let out = inspect(&req, Utc::now());
        assert_eq!(out.analysis.urgency, 4);
        assert!((out.classification.confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn unknown_code_uses_general_rules() {
        let out = inspect(&request("qz", "[qz] odd marker"), Utc::now());
        assert_eq!(out.analysis.intent, Intent::General);
        assert_eq!(out.classification.category, Category::General);
        assert_eq!(out.classification.subcategory, "general");
        assert_eq!(out.classification.agent_role, AgentRole::Developer);
    }

    #[test]
    fn prp_prefers_context_then_source() {
        let mut signal = Signal::new("tp", 1, 0, "[tp]".into());
        signal.source = Some("PRPs/auth.md".into());
        let req = ProcessingRequest::new(signal.clone());
        assert_eq!(req.prp(), "PRPs/auth.md");
        let req = req.with_context("prp", json!("PRPs/other.md"));
        assert_eq!(req.prp(), "PRPs/other.md");
        signal.source = None;
        assert_eq!(ProcessingRequest::new(signal).prp(), "unassigned");
    }
}
