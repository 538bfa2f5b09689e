//! Declarative classification table: signal code → category, subcategory,
//! intent and escalation weight.
//!
//! Lookup is by exact code first, then by the lower-case family. Codes that
//! match neither fall back to [`FALLBACK`].

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::types::{Category, Intent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalRule {
    pub code: &'static str,
    pub category: Category,
    pub subcategory: &'static str,
    pub intent: Intent,
    /// 0–3; scales the urgency boost of attention codes.
    pub escalation_weight: u8,
}

macro_rules! rule {
    ($code:literal, $cat:ident, $sub:literal, $intent:ident, $weight:literal) => {
        SignalRule {
            code: $code,
            category: Category::$cat,
            subcategory: $sub,
            intent: Intent::$intent,
            escalation_weight: $weight,
        }
    };
}

pub const RULES: &[SignalRule] = &[
    // Human factor
    rule!("AA", HumanFactor, "admin_attention", ImmediateAttention, 3),
    rule!("aa", HumanFactor, "admin_attention", ImmediateAttention, 2),
    rule!("At", HumanFactor, "attention_request", ImmediateAttention, 2),
    rule!("af", HumanFactor, "feedback_request", ImmediateAttention, 1),
    rule!("gg", HumanFactor, "goal_clarification", ImmediateAttention, 1),
    rule!("ap", HumanFactor, "preview_ready", StatusUpdate, 0),
    // Workflow
    rule!("Bb", Workflow, "blocker", ImmediateAttention, 2),
    rule!("bb", Workflow, "blocker", ImmediateAttention, 2),
    rule!("FF", Workflow, "fatal_error", ImmediateAttention, 3),
    rule!("ff", Workflow, "goal_not_achievable", ImmediateAttention, 2),
    rule!("ic", Workflow, "incident", ImmediateAttention, 3),
    rule!("dp", Workflow, "development_progress", StatusUpdate, 0),
    rule!("bf", Workflow, "bug_fixed", StatusUpdate, 0),
    rule!("br", Workflow, "blocker_resolved", StatusUpdate, 0),
    rule!("rp", Workflow, "ready_for_preparation", StatusUpdate, 0),
    rule!("rr", Workflow, "research_request", Informational, 0),
    rule!("rc", Workflow, "research_complete", Informational, 0),
    // Testing
    rule!("tp", Testing, "tests_prepared", TestingRelated, 0),
    rule!("tw", Testing, "tests_written", TestingRelated, 0),
    rule!("tr", Testing, "tests_red", TestingRelated, 1),
    rule!("tg", Testing, "tests_green", TestingRelated, 0),
    // Quality
    rule!("cq", Quality, "code_quality", QualityAssurance, 0),
    rule!("cp", Quality, "ci_passed", QualityAssurance, 0),
    rule!("cf", Quality, "ci_failed", QualityAssurance, 1),
    rule!("rv", Quality, "review_passed", QualityAssurance, 0),
    rule!("iv", Quality, "implementation_verified", QualityAssurance, 0),
    rule!("vr", Quality, "validation_required", QualityAssurance, 0),
    // Orchestration
    rule!("oa", Orchestration, "orchestrator_attention", ImmediateAttention, 1),
    rule!("pc", Orchestration, "pre_release_complete", StatusUpdate, 0),
    rule!("ra", Orchestration, "release_approved", StatusUpdate, 0),
    rule!("mg", Orchestration, "merged", StatusUpdate, 0),
    rule!("rl", Orchestration, "released", StatusUpdate, 0),
    rule!("ps", Orchestration, "post_release_status", StatusUpdate, 0),
    rule!("cc", Orchestration, "cleanup_complete", Informational, 0),
    // General
    rule!("no", General, "not_obvious", Informational, 0),
    rule!("pm", General, "post_mortem", Informational, 0),
];

pub const FALLBACK: SignalRule = SignalRule {
    code: "",
    category: Category::General,
    subcategory: "general",
    intent: Intent::General,
    escalation_weight: 0,
};

fn index() -> &'static HashMap<&'static str, &'static SignalRule> {
    static INDEX: OnceLock<HashMap<&'static str, &'static SignalRule>> = OnceLock::new();
    INDEX.get_or_init(|| RULES.iter().map(|r| (r.code, r)).collect())
}

/// Exact code, then lower-case family.
pub fn lookup(code: &str) -> Option<&'static SignalRule> {
    let index = index();
    index
        .get(code)
        .or_else(|| index.get(code.to_lowercase().as_str()))
        .copied()
}

/// Like [`lookup`] but never fails.
pub fn rule_for(code: &str) -> &'static SignalRule {
    lookup(code).unwrap_or(&FALLBACK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::validate_signal;

    #[test]
    fn every_code_is_a_valid_signal_and_unique() {
        let mut seen = std::collections::HashSet::new();
        for rule in RULES {
            assert!(validate_signal(rule.code), "{}", rule.code);
            assert!(seen.insert(rule.code), "duplicate {}", rule.code);
            assert!(rule.escalation_weight <= 3);
        }
    }

    #[test]
    fn exact_match_wins_over_family() {
        assert_eq!(rule_for("FF").subcategory, "fatal_error");
        assert_eq!(rule_for("ff").subcategory, "goal_not_achievable");
        assert_eq!(rule_for("Ff").subcategory, "goal_not_achievable");
    }

    #[test]
    fn mixed_case_attention_codes_are_immediate() {
        assert_eq!(rule_for("At").intent, Intent::ImmediateAttention);
        assert_eq!(rule_for("Bb").intent, Intent::ImmediateAttention);
    }

    #[test]
    fn unknown_code_falls_back_to_general() {
        assert!(lookup("qz").is_none());
        assert_eq!(rule_for("qz").category, Category::General);
        assert_eq!(rule_for("qz").intent, Intent::General);
    }
}
