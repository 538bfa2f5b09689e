//! Signal extraction: `[xy]` markers embedded in free text.
//!
//! A signal code is exactly two ASCII letters. Anything else inside square
//! brackets (`[a]`, `[abc]`, `[a1]`, `[ ]`) is ignored.
//!
//! State is decided per match, first rule wins:
//!
//! ```text
//! line has TODO / FIXME / NEW:      → new
//! line has DONE / RESOLVED / ✅     → resolved
//! code is upper-case   [AA]         → new         (needs attention)
//! code is lower-case   [aa]         → resolved
//! code is title-case   [Aa]         → need_check  (recheck)
//! anything else        [aA]         → unknown
//! ```

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::OnceLock;

pub const DEFAULT_CONTEXT_RADIUS: usize = 40;

// ---------------------------------------------------------------------------
// SignalState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalState {
    New,
    Resolved,
    NeedCheck,
    Unknown,
}

impl SignalState {
    pub fn as_str(self) -> &'static str {
        match self {
            SignalState::New => "new",
            SignalState::Resolved => "resolved",
            SignalState::NeedCheck => "need_check",
            SignalState::Unknown => "unknown",
        }
    }
}

impl fmt::Display for SignalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Signal
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signal {
    pub id: String,
    pub code: String,
    /// 1-based line number within its source.
    pub line: usize,
    /// 0-based character column of the opening bracket.
    pub column: usize,
    pub context: String,
    pub state: SignalState,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl Signal {
    /// Build a signal from the whole source line it sits on. State follows
    /// the same line rules as [`SignalParser::parse`]; the context is the
    /// trimmed line rather than a window.
    pub fn new(code: impl Into<String>, line: usize, column: usize, source_line: String) -> Self {
        let code = code.into();
        let state = classify_state(&code, &source_line);
        let context = source_line.trim().to_string();
        Self::with_state(code, line, column, context, state)
    }

    pub fn with_state(
        code: String,
        line: usize,
        column: usize,
        context: String,
        state: SignalState,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            code,
            line,
            column,
            context,
            state,
            timestamp: Utc::now(),
            source: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.state == SignalState::Resolved
    }
}

// ---------------------------------------------------------------------------
// ParseResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseResult {
    pub signals: Vec<Signal>,
    pub total_count: usize,
    pub by_type: BTreeMap<String, usize>,
}

impl ParseResult {
    fn push(&mut self, signal: Signal) {
        *self.by_type.entry(signal.code.clone()).or_insert(0) += 1;
        self.total_count += 1;
        self.signals.push(signal);
    }

    /// Concatenate signals and sum counts. Line numbers are left as-is.
    pub fn merge(&mut self, other: ParseResult) {
        for (code, n) in other.by_type {
            *self.by_type.entry(code).or_insert(0) += n;
        }
        self.total_count += other.total_count;
        self.signals.extend(other.signals);
    }
}

// ---------------------------------------------------------------------------
// Patterns
// ---------------------------------------------------------------------------

fn bracket_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[([^\[\]\r\n]*)\]").unwrap())
}

fn new_work_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(?:TODO|FIXME)\b|\bNEW:").unwrap())
}

fn done_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(?:DONE|RESOLVED)\b|✅").unwrap())
}

// ---------------------------------------------------------------------------
// Code helpers
// ---------------------------------------------------------------------------

/// True iff `code` is exactly two ASCII letters.
pub fn validate_signal(code: &str) -> bool {
    code.len() == 2 && code.bytes().all(|b| b.is_ascii_alphabetic())
}

/// True iff `code` has no upper-case characters.
pub fn is_resolved_signal(code: &str) -> bool {
    code == code.to_lowercase()
}

fn classify_state(code: &str, line: &str) -> SignalState {
    if new_work_re().is_match(line) {
        return SignalState::New;
    }
    if done_re().is_match(line) {
        return SignalState::Resolved;
    }
    let mut chars = code.chars();
    let (Some(first), Some(second)) = (chars.next(), chars.next()) else {
        return SignalState::Unknown;
    };
    match (first.is_ascii_uppercase(), second.is_ascii_uppercase()) {
        (true, true) => SignalState::New,
        (false, false) => SignalState::Resolved,
        (true, false) => SignalState::NeedCheck,
        (false, true) => SignalState::Unknown,
    }
}

fn context_window(line: &str, start: usize, end: usize, radius: usize) -> String {
    let before: Vec<char> = line[..start].chars().rev().take(radius).collect();
    let before: String = before.into_iter().rev().collect();
    let after: String = line[end..].chars().take(radius).collect();
    format!("{before}{}{after}", &line[start..end])
        .trim()
        .to_string()
}

// ---------------------------------------------------------------------------
// SignalParser
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SignalParser {
    context_radius: usize,
}

impl Default for SignalParser {
    fn default() -> Self {
        Self::new(DEFAULT_CONTEXT_RADIUS)
    }
}

impl SignalParser {
    pub fn new(context_radius: usize) -> Self {
        Self { context_radius }
    }

    pub fn parse(&self, content: &str) -> ParseResult {
        let mut result = ParseResult::default();
        for (idx, line) in content.lines().enumerate() {
            for caps in bracket_re().captures_iter(line) {
                let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
                    continue;
                };
                if !validate_signal(inner.as_str()) {
                    continue;
                }
                let column = line[..whole.start()].chars().count();
                let context =
                    context_window(line, whole.start(), whole.end(), self.context_radius);
                // Markers are matched against the whole line, not the window.
                let state = classify_state(inner.as_str(), line);
                result.push(Signal::with_state(
                    inner.as_str().to_string(),
                    idx + 1,
                    column,
                    context,
                    state,
                ));
            }
        }
        result
    }

    /// Parse several in-memory sources, tagging each signal with its source.
    pub fn parse_sources<S: AsRef<str>>(&self, sources: &[(S, S)]) -> ParseResult {
        let mut merged = ParseResult::default();
        for (source, content) in sources {
            let mut result = self.parse(content.as_ref());
            for signal in &mut result.signals {
                signal.source = Some(source.as_ref().to_string());
            }
            merged.merge(result);
        }
        merged
    }

    /// Parse each file independently and merge. Unreadable files are logged
    /// and skipped.
    pub fn parse_from_files<P: AsRef<Path>>(&self, paths: &[P]) -> ParseResult {
        let mut merged = ParseResult::default();
        for path in paths {
            let path = path.as_ref();
            let content = match std::fs::read_to_string(path) {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(path = %path.display(), "skipping unreadable file: {e}");
                    continue;
                }
            };
            let mut result = self.parse(&content);
            let source = path.display().to_string();
            for signal in &mut result.signals {
                signal.source = Some(source.clone());
            }
            merged.merge(result);
        }
        merged
    }
}

/// Distinct codes in first-appearance order.
pub fn extract_unique_signals(result: &ParseResult) -> Vec<String> {
    let mut seen = Vec::new();
    for signal in &result.signals {
        if !seen.contains(&signal.code) {
            seen.push(signal.code.clone());
        }
    }
    seen
}

/// Occurrences per exact code, recomputed from the signal list.
pub fn count_signals(result: &ParseResult) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for signal in &result.signals {
        *counts.entry(signal.code.clone()).or_insert(0) += 1;
    }
    counts
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn parse(content: &str) -> ParseResult {
        SignalParser::default().parse(content)
    }

    #[test]
    fn constructor_and_parser_agree_on_state() {
        let line = format!("DONE {} [AA] tail", "x".repeat(60));
        let parsed = SignalParser::new(5).parse(&line).signals.remove(0);
        assert!(!parsed.context.contains("DONE"));
        assert_eq!(parsed.state, SignalState::Resolved);

        let built = Signal::new("AA", 1, parsed.column, line.clone());
        assert_eq!(built.state, parsed.state);
        assert_eq!(built.context, line);
    }

    #[test]
    fn counts_two_signals_by_type() {
        let result = parse("This is a test with [tp] and [dp] signals");
        assert_eq!(result.total_count, 2);
        assert_eq!(result.by_type.get("tp"), Some(&1));
        assert_eq!(result.by_type.get("dp"), Some(&1));
        assert_eq!(result.by_type.len(), 2);
    }

    #[test]
    fn malformed_markers_are_dropped() {
        let result = parse("Malformed [a] and [abc] and valid [dd]");
        assert_eq!(result.total_count, 1);
        assert_eq!(result.signals[0].code, "dd");
    }

    #[test]
    fn digits_and_checkboxes_are_not_signals() {
        let result = parse("- [x] done\n- [ ] open\n[a1] [12] [é1]\n[Ab]");
        assert_eq!(result.total_count, 1);
        assert_eq!(result.signals[0].code, "Ab");
    }

    #[test]
    fn counts_always_match_total_and_codes_validate() {
        let samples = [
            "",
            "[aa][bb][aa]",
            "line one [Tp]\nline two [tp] [TP]\n[[gg]] [g]",
            "mixed [ab] [a b] [abc] [Ab] text\n\n[zz]",
        ];
        for content in samples {
            let result = parse(content);
            let summed: usize = count_signals(&result).values().sum();
            assert_eq!(summed, result.total_count, "content: {content:?}");
            assert_eq!(count_signals(&result), result.by_type);
            assert!(result.signals.iter().all(|s| validate_signal(&s.code)));
        }
    }

    #[test]
    fn records_line_and_column() {
        let result = parse("intro\n  see [tp] here\nnothing\nend [dp]");
        assert_eq!(result.signals[0].line, 2);
        assert_eq!(result.signals[0].column, 6);
        assert_eq!(result.signals[1].line, 4);
        assert_eq!(result.signals[1].column, 4);
    }

    #[test]
    fn column_counts_characters_not_bytes() {
        let result = parse("ééé [tp]");
        assert_eq!(result.signals[0].column, 4);
    }

    #[test]
    fn context_window_is_bounded() {
        let long = format!("{} [tp] {}", "a".repeat(200), "b".repeat(200));
        let result = SignalParser::new(10).parse(&long);
        let ctx = &result.signals[0].context;
        assert!(ctx.contains("[tp]"));
        assert!(ctx.chars().count() <= 10 + 4 + 10);
    }

    #[test]
    fn state_follows_case_convention() {
        let result = parse("[AA] [aa] [Aa] [aA]");
        let states: Vec<_> = result.signals.iter().map(|s| s.state).collect();
        assert_eq!(
            states,
            vec![
                SignalState::New,
                SignalState::Resolved,
                SignalState::NeedCheck,
                SignalState::Unknown
            ]
        );
    }

    #[test]
    fn line_markers_override_case() {
        let result = parse("TODO: wire up [tp]\n[FF] DONE\nNEW: [At]");
        assert_eq!(result.signals[0].state, SignalState::New);
        assert_eq!(result.signals[1].state, SignalState::Resolved);
        assert_eq!(result.signals[2].state, SignalState::New);
    }

    #[test]
    fn validate_signal_accepts_only_two_letters() {
        assert!(validate_signal("tp"));
        assert!(validate_signal("At"));
        assert!(!validate_signal("a"));
        assert!(!validate_signal("abc"));
        assert!(!validate_signal("a1"));
        assert!(!validate_signal(""));
        assert!(!validate_signal("éa"));
    }

    #[test]
    fn resolved_signal_iff_lowercase() {
        for code in ["tp", "dp", "zz"] {
            assert!(is_resolved_signal(code));
        }
        for code in ["TP", "Tp", "tP"] {
            assert!(!is_resolved_signal(code));
        }
    }

    #[test]
    fn unique_signals_in_first_appearance_order() {
        let result = parse("[dp] [tp] [dp] [bb] [tp]");
        assert_eq!(extract_unique_signals(&result), vec!["dp", "tp", "bb"]);
    }

    #[test]
    fn parse_from_files_merges_without_renumbering() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.md");
        let b = dir.path().join("b.md");
        std::fs::write(&a, "one [tp]\ntwo [dp]").unwrap();
        std::fs::write(&b, "[tp] first line").unwrap();
        let missing = dir.path().join("missing.md");

        let result = SignalParser::default().parse_from_files(&[a.clone(), missing, b.clone()]);

        assert_eq!(result.total_count, 3);
        assert_eq!(result.by_type.get("tp"), Some(&2));
        assert_eq!(result.signals[2].line, 1, "line numbers stay per-file");
        assert_eq!(
            result.signals[2].source.as_deref(),
            Some(b.display().to_string().as_str())
        );
    }

    #[test]
    fn parse_sources_tags_source() {
        let result = SignalParser::default().parse_sources(&[("PRPs/one.md", "[bb] stuck")]);
        assert_eq!(result.signals[0].source.as_deref(), Some("PRPs/one.md"));
    }
}
