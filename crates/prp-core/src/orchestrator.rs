//! One context object that owns every component and drives the data flow:
//! scan event → parse → pool → worker outcome → decision → events.

use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::bus::{event_types, EventBus, ScannerEvent};
use crate::config::Config;
use crate::decision::{Decision, DecisionEngine, DecisionKind};
use crate::error::{PrpError, Result};
use crate::inspector::{InspectorPool, PoolOutcome, PoolStats, ProcessingRequest};
use crate::signal::{ParseResult, SignalParser};
use crate::tokens::{Alert, TokenAccounting, TokenSummary};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorStatus {
    pub pool: PoolStats,
    pub tokens: TokenSummary,
    pub decisions: BTreeMap<DecisionKind, u64>,
    pub signals_seen: u64,
    pub worker_errors: u64,
    pub handler_failures: u64,
    pub active_alerts: usize,
    pub events_recorded: usize,
}

pub struct Orchestrator {
    bus: EventBus,
    parser: SignalParser,
    pool: InspectorPool,
    ledger: TokenAccounting,
    engine: DecisionEngine,
    ping_timeout: Duration,
    signals_seen: u64,
    worker_errors: u64,
}

impl Orchestrator {
    /// Build every component from `config` and start the worker pool.
    pub async fn start(config: &Config) -> Result<Self> {
        let ledger = config.tokens.build_ledger()?;
        let pool = InspectorPool::start(config.pool.pool_config(), config.pool.loader()).await?;
        Ok(Self::from_parts(
            EventBus::new(config.bus.history_capacity),
            SignalParser::new(config.parser.context_radius),
            pool,
            ledger,
            DecisionEngine::new(config.decision.settings()),
        )
        .with_ping_timeout(config.pool.ping_timeout()))
    }

    pub fn from_parts(
        bus: EventBus,
        parser: SignalParser,
        pool: InspectorPool,
        ledger: TokenAccounting,
        engine: DecisionEngine,
    ) -> Self {
        Self {
            bus,
            parser,
            pool,
            ledger,
            engine,
            ping_timeout: Duration::from_secs(1),
            signals_seen: 0,
            worker_errors: 0,
        }
    }

    pub fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }

    // -- accessors ----------------------------------------------------------

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut EventBus {
        &mut self.bus
    }

    pub fn ledger(&self) -> &TokenAccounting {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut TokenAccounting {
        &mut self.ledger
    }

    pub fn engine(&self) -> &DecisionEngine {
        &self.engine
    }

    pub fn parser(&self) -> &SignalParser {
        &self.parser
    }

    // -- intake -------------------------------------------------------------

    /// Record `event` on the bus and, for `scan_completed` events, submit one
    /// request per signal found in `data.content`. Returns the number of
    /// requests submitted.
    pub async fn handle_scan_event(&mut self, event: ScannerEvent) -> Result<usize> {
        let is_scan = event.event_type == event_types::SCAN_COMPLETED;
        let content = event.data.get("content").and_then(Value::as_str).map(str::to_string);
        let path = event
            .data
            .get("path")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| event.source.clone());
        let priority = event.priority;
        self.bus.emit(event);

        if !is_scan {
            return Ok(0);
        }
        let content = content.ok_or_else(|| {
            PrpError::validation(
                "scan event",
                path.clone().unwrap_or_default(),
                "missing data.content",
            )
        })?;

        let mut parsed = self.parser.parse(&content);
        if let Some(path) = &path {
            for signal in &mut parsed.signals {
                signal.source = Some(path.clone());
            }
        }
        tracing::debug!(
            path = path.as_deref().unwrap_or("-"),
            signals = parsed.total_count,
            "scan parsed"
        );
        self.submit_parsed(parsed, priority).await
    }

    async fn submit_parsed(&mut self, parsed: ParseResult, priority: Option<u8>) -> Result<usize> {
        let mut submitted = 0;
        for signal in parsed.signals {
            self.signals_seen += 1;
            let mut detected = ScannerEvent::new(
                event_types::SIGNAL_DETECTED,
                json!({ "code": signal.code, "state": signal.state }),
            )
            .with_signal(signal.clone());
            if let Some(source) = &signal.source {
                detected = detected.with_source(source.clone());
            }
            self.bus.emit(detected);

            let mut request = ProcessingRequest::new(signal);
            if let Some(p) = priority {
                request = request.with_priority(p);
            }
            self.pool.submit(request).await?;
            submitted += 1;
        }
        Ok(submitted)
    }

    /// Feed `(path, content)` pairs as scan events.
    pub async fn scan_sources<S: AsRef<str>>(&mut self, sources: &[(S, S)]) -> Result<usize> {
        let mut total = 0;
        for (path, content) in sources {
            let event = ScannerEvent::new(
                event_types::SCAN_COMPLETED,
                json!({ "path": path.as_ref(), "content": content.as_ref() }),
            );
            total += self.handle_scan_event(event).await?;
        }
        Ok(total)
    }

    /// Read and scan each file. Unreadable files are logged and skipped.
    pub async fn scan_files<P: AsRef<Path>>(&mut self, paths: &[P]) -> Result<usize> {
        let mut total = 0;
        for path in paths {
            let path = path.as_ref();
            let content = match tokio::fs::read_to_string(path).await {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(path = %path.display(), "skipping unreadable file: {e}");
                    continue;
                }
            };
            let event = ScannerEvent::new(
                event_types::SCAN_COMPLETED,
                json!({ "path": path.display().to_string(), "content": content }),
            );
            total += self.handle_scan_event(event).await?;
        }
        Ok(total)
    }

    // -- outcomes -----------------------------------------------------------

    /// Wait for every submitted request and decide on each outcome in
    /// completion order.
    pub async fn drain(&mut self) -> Vec<Decision> {
        let mut decisions = Vec::new();
        while let Some(outcome) = self.pool.next_outcome().await {
            decisions.push(self.process_outcome(outcome));
        }
        decisions
    }

    /// Handle the next outcome only. `None` when nothing is outstanding.
    pub async fn step(&mut self) -> Option<Decision> {
        let outcome = self.pool.next_outcome().await?;
        Some(self.process_outcome(outcome))
    }

    fn process_outcome(&mut self, outcome: PoolOutcome) -> Decision {
        match &outcome {
            PoolOutcome::Completed(result) => {
                let event = ScannerEvent::new(
                    event_types::WORKER_RESULT,
                    serde_json::to_value(result.as_ref()).unwrap_or_default(),
                )
                .with_signal(result.signal.clone())
                .with_source(format!("worker-{}", result.worker_id));
                self.bus.emit(event);
            }
            PoolOutcome::Failed(failure) => {
                self.worker_errors += 1;
                let err = PrpError::Processing {
                    signal_id: failure.signal_id.clone().unwrap_or_else(|| "-".into()),
                    reason: format!("{}: {}", failure.code, failure.message),
                };
                tracing::warn!("{err}");
                let event = ScannerEvent::new(
                    event_types::WORKER_ERROR,
                    serde_json::to_value(failure).unwrap_or_default(),
                );
                self.bus.emit(event);
            }
        }

        let decision = self.engine.decide(&outcome, &mut self.ledger);
        let event = ScannerEvent::new(event_types::ORCHESTRATOR_DECISION, decision.payload())
            .with_source("orchestrator");
        self.bus.emit(event);
        decision
    }

    // -- usage --------------------------------------------------------------

    /// A spawned agent reported back; alerts raised by its usage are emitted.
    pub fn report_usage(&mut self, agent_id: &str, tokens_used: u64) -> Result<Vec<Alert>> {
        let alerts = self
            .engine
            .report_completion(agent_id, tokens_used, &mut self.ledger)?;
        self.emit_alerts(&alerts);
        Ok(alerts)
    }

    /// The external lifecycle manager destroyed an agent.
    pub fn retire_agent(&mut self, agent_id: &str) -> bool {
        self.engine.retire_agent(agent_id, &mut self.ledger)
    }

    /// Charge usage to a ledger key directly (no agent bookkeeping).
    pub fn record_usage(&mut self, agent_id: &str, tokens: u64) -> Vec<Alert> {
        let alerts = self.ledger.record_usage(agent_id, tokens);
        self.emit_alerts(&alerts);
        alerts
    }

    fn emit_alerts(&mut self, alerts: &[Alert]) {
        for alert in alerts {
            let event = ScannerEvent::new(
                event_types::TOKEN_ALERT,
                serde_json::to_value(alert).unwrap_or_default(),
            )
            .with_source(alert.agent_id.clone());
            self.bus.emit(event);
        }
    }

    // -- lifecycle ----------------------------------------------------------

    /// Health-check the pool. Returns how many workers answered.
    pub async fn ping(&mut self) -> usize {
        self.pool.ping(self.ping_timeout).await
    }

    pub fn status(&mut self) -> OrchestratorStatus {
        let tokens = self.ledger.summary();
        OrchestratorStatus {
            pool: self.pool.stats(),
            active_alerts: tokens.active_alerts,
            tokens,
            decisions: self.engine.counts(),
            signals_seen: self.signals_seen,
            worker_errors: self.worker_errors,
            handler_failures: self.bus.handler_failures(),
            events_recorded: self.bus.history_len(),
        }
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.pool.shutdown().await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::AgentStatus;
    use std::sync::{Arc, Mutex};

    fn config(size: usize) -> Config {
        let mut cfg = Config::default();
        cfg.pool.size = size;
        cfg
    }

    fn capture(orch: &mut Orchestrator, event_type: &str) -> Arc<Mutex<Vec<Value>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        orch.bus_mut().subscribe(event_type, move |e: &ScannerEvent| {
            sink.lock().unwrap().push(e.data.clone());
            Ok(())
        });
        seen
    }

    #[tokio::test]
    async fn scan_to_decision_end_to_end() {
        let mut cfg = config(2);
        cfg.tokens.limits.insert("aqa".into(), "10k".into());
        let mut orch = Orchestrator::start(&cfg).await.unwrap();
        let decisions_seen = capture(&mut orch, event_types::ORCHESTRATOR_DECISION);
        let alerts_seen = capture(&mut orch, event_types::TOKEN_ALERT);
        let results_seen = capture(&mut orch, event_types::WORKER_RESULT);

        let content = "[TP] tests prepared\n[BB] blocked on infra\n[dp] progress noted";
        let submitted = orch
            .scan_sources(&[("PRPs/auth.md", content)])
            .await
            .unwrap();
        assert_eq!(submitted, 3);

        let decisions = orch.drain().await;
        assert_eq!(decisions.len(), 3);
        assert!(decisions.iter().all(|d| d.prp == "PRPs/auth.md"));

        let by_code = |kind: DecisionKind| decisions.iter().filter(|d| d.kind == kind).count();
        assert_eq!(by_code(DecisionKind::SpawnAgent), 1);
        assert_eq!(by_code(DecisionKind::Escalate), 1);
        assert_eq!(by_code(DecisionKind::NoAction), 1);

        assert_eq!(results_seen.lock().unwrap().len(), 3);
        let payloads = decisions_seen.lock().unwrap().clone();
        assert_eq!(payloads.len(), 3);
        assert!(payloads.iter().all(|p| p["currentPrp"] == "PRPs/auth.md"));

        let spawn = decisions
            .iter()
            .find(|d| d.kind == DecisionKind::SpawnAgent)
            .unwrap();
        assert_eq!(spawn.budget_tokens, 10_000);
        let agent_id = spawn.agent_id.clone().unwrap();

        let alerts = orch.report_usage(&agent_id, 8_500).unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts_seen.lock().unwrap().len(), 1);
        assert_eq!(
            orch.engine().agent(&agent_id).unwrap().status,
            AgentStatus::Idle
        );

        let status = orch.status();
        assert_eq!(status.signals_seen, 3);
        assert_eq!(status.worker_errors, 0);
        assert_eq!(status.active_alerts, 1);
        assert_eq!(status.decisions.values().sum::<u64>(), 3);
        assert_eq!(status.pool.completed, 3);

        assert!(orch.retire_agent(&agent_id));
        assert!(orch.engine().agent(&agent_id).is_none());

        orch.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn unavailable_pool_yields_errors_and_no_action() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut cfg = config(2);
        cfg.pool.guideline_dir = Some(dir.path().join("missing"));
        let mut orch = Orchestrator::start(&cfg).await.unwrap();
        let errors_seen = capture(&mut orch, event_types::WORKER_ERROR);

        orch.scan_sources(&[("PRPs/x.md", "[AA] approve please\n[TP] tests")])
            .await
            .unwrap();
        let decisions = orch.drain().await;

        assert_eq!(decisions.len(), 2);
        assert!(decisions.iter().all(|d| d.kind == DecisionKind::NoAction));
        assert!(decisions.iter().all(|d| d.prp == "PRPs/x.md"));
        assert_eq!(errors_seen.lock().unwrap().len(), 2);
        assert_eq!(
            errors_seen.lock().unwrap()[0]["code"],
            "POOL_UNAVAILABLE"
        );
        assert_eq!(orch.status().worker_errors, 2);
    }

    #[tokio::test]
    async fn scan_event_without_content_is_rejected() {
        let mut orch = Orchestrator::start(&config(1)).await.unwrap();
        let event = ScannerEvent::new(event_types::SCAN_COMPLETED, json!({ "path": "a.md" }));
        assert!(matches!(
            orch.handle_scan_event(event).await,
            Err(PrpError::Validation { .. })
        ));

        let other = ScannerEvent::new("heartbeat", json!({}));
        assert_eq!(orch.handle_scan_event(other).await.unwrap(), 0);
        assert_eq!(orch.bus().history_len(), 2);
    }

    #[tokio::test]
    async fn scan_files_skips_unreadable_paths() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("prp.md");
        std::fs::write(&file, "line one\n[cq] quality pass ✅\n").unwrap();
        let missing = dir.path().join("missing.md");

        let mut orch = Orchestrator::start(&config(1)).await.unwrap();
        let n = orch.scan_files(&[missing, file.clone()]).await.unwrap();
        assert_eq!(n, 1);

        let decision = orch.step().await.unwrap();
        assert_eq!(decision.kind, DecisionKind::NoAction);
        assert_eq!(decision.prp, file.display().to_string());
        assert!(orch.step().await.is_none());
        assert_eq!(orch.ping().await, 1);
    }
}
