//! In-process publish/subscribe hub with bounded history.
//!
//! Delivery is synchronous: `emit` runs every matching handler before it
//! returns. A handler that errors or panics is logged and skipped; the rest
//! still receive the event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::signal::Signal;

pub const WILDCARD: &str = "*";
pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

/// Event types emitted by the orchestrator pipeline.
pub mod event_types {
    pub const SCAN_COMPLETED: &str = "scan_completed";
    pub const SIGNAL_DETECTED: &str = "signal_detected";
    pub const WORKER_RESULT: &str = "worker_result";
    pub const WORKER_ERROR: &str = "worker_error";
    pub const ORCHESTRATOR_DECISION: &str = "orchestrator_decision";
    pub const TOKEN_ALERT: &str = "token_alert";
}

// ---------------------------------------------------------------------------
// ScannerEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannerEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<Signal>,
    #[serde(default)]
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
}

impl ScannerEvent {
    pub fn new(event_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            signal: None,
            data,
            timestamp: Utc::now(),
            source: None,
            priority: None,
        }
    }

    pub fn with_signal(mut self, signal: Signal) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }
}

// ---------------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

pub type Handler = Box<dyn Fn(&ScannerEvent) -> anyhow::Result<()> + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    event_type: String,
    handler: Handler,
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

pub struct EventBus {
    subscriptions: Vec<Subscription>,
    history: VecDeque<Arc<ScannerEvent>>,
    capacity: usize,
    next_id: u64,
    handler_failures: u64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriptions", &self.subscriptions.len())
            .field("history", &self.history.len())
            .field("capacity", &self.capacity)
            .field("handler_failures", &self.handler_failures)
            .finish()
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscriptions: Vec::new(),
            history: VecDeque::with_capacity(capacity.min(DEFAULT_HISTORY_CAPACITY)),
            capacity: capacity.max(1),
            next_id: 0,
            handler_failures: 0,
        }
    }

    /// Register `handler` for `event_type` (or [`WILDCARD`] for everything).
    pub fn subscribe<F>(&mut self, event_type: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(&ScannerEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.subscriptions.push(Subscription {
            id,
            event_type: event_type.into(),
            handler: Box::new(handler),
        });
        id
    }

    /// Returns `true` if a subscription was removed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.id != id);
        before != self.subscriptions.len()
    }

    /// Record `event` in history and deliver it to every matching handler in
    /// subscription order. Returns the number of handlers that succeeded.
    pub fn emit(&mut self, event: ScannerEvent) -> usize {
        let event = Arc::new(event);
        if self.history.len() >= self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(Arc::clone(&event));

        // Typed subscribers first, then wildcards; each group in subscription order.
        let typed = self
            .subscriptions
            .iter()
            .filter(|s| s.event_type != WILDCARD && s.event_type == event.event_type);
        let wildcard = self
            .subscriptions
            .iter()
            .filter(|s| s.event_type == WILDCARD);

        let mut delivered = 0;
        for sub in typed.chain(wildcard) {
            match catch_unwind(AssertUnwindSafe(|| (sub.handler)(&event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    self.handler_failures += 1;
                    tracing::warn!(
                        subscription = %sub.id,
                        event_type = %event.event_type,
                        "event handler failed: {e:#}"
                    );
                }
                Err(_) => {
                    self.handler_failures += 1;
                    tracing::error!(
                        subscription = %sub.id,
                        event_type = %event.event_type,
                        "event handler panicked"
                    );
                }
            }
        }
        delivered
    }

    /// The last `n` events, oldest first.
    pub fn recent_events(&self, n: usize) -> Vec<Arc<ScannerEvent>> {
        let skip = self.history.len().saturating_sub(n);
        self.history.iter().skip(skip).cloned().collect()
    }

    /// The last `n` events of `event_type`, oldest first.
    pub fn events_by_type(&self, event_type: &str, n: usize) -> Vec<Arc<ScannerEvent>> {
        let matching: Vec<_> = self
            .history
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect();
        let skip = matching.len().saturating_sub(n);
        matching.into_iter().skip(skip).collect()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn handler_failures(&self) -> u64 {
        self.handler_failures
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    type Recorded = Arc<Mutex<Vec<String>>>;

    fn recorder() -> (
        Recorded,
        impl Fn(&ScannerEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    ) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler = move |e: &ScannerEvent| {
            sink.lock().unwrap().push(format!("{}:{}", e.event_type, e.data));
            Ok(())
        };
        (seen, handler)
    }

    #[test]
    fn wildcard_receives_every_event() {
        let mut bus = EventBus::default();
        let (seen, handler) = recorder();
        bus.subscribe(WILDCARD, handler);

        bus.emit(ScannerEvent::new("scanner", json!(1)));
        bus.emit(ScannerEvent::new("other", json!(2)));
        bus.emit(ScannerEvent::new("scanner", json!(3)));

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["scanner:1", "other:2", "scanner:3"]
        );
    }

    #[test]
    fn typed_subscriber_receives_only_its_type_in_order() {
        let mut bus = EventBus::default();
        let (seen, handler) = recorder();
        bus.subscribe("scanner", handler);

        for i in 0..5 {
            let kind = if i % 2 == 0 { "scanner" } else { "noise" };
            bus.emit(ScannerEvent::new(kind, json!(i)));
        }

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["scanner:0", "scanner:2", "scanner:4"]
        );
    }

    #[test]
    fn typed_handlers_run_before_wildcards() {
        let mut bus = EventBus::default();
        let order = Arc::new(Mutex::new(Vec::new()));
        for (kind, label) in [(WILDCARD, "w1"), ("scanner", "t1"), (WILDCARD, "w2"), ("scanner", "t2")] {
            let sink = Arc::clone(&order);
            bus.subscribe(kind, move |_| {
                sink.lock().unwrap().push(label);
                Ok(())
            });
        }

        assert_eq!(bus.emit(ScannerEvent::new("scanner", json!(null))), 4);
        assert_eq!(*order.lock().unwrap(), vec!["t1", "t2", "w1", "w2"]);
    }

    #[test]
    fn failing_handler_does_not_block_others() {
        let mut bus = EventBus::default();
        bus.subscribe("scanner", |_| anyhow::bail!("boom"));
        bus.subscribe("scanner", |_| panic!("handler panic"));
        let (seen, handler) = recorder();
        bus.subscribe("scanner", handler);

        let delivered = bus.emit(ScannerEvent::new("scanner", json!("x")));

        assert_eq!(delivered, 1);
        assert_eq!(bus.handler_failures(), 2);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let mut bus = EventBus::default();
        let (seen, handler) = recorder();
        let id = bus.subscribe(WILDCARD, handler);

        bus.emit(ScannerEvent::new("a", json!(1)));
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.emit(ScannerEvent::new("a", json!(2)));

        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn history_drops_oldest_on_overflow() {
        let mut bus = EventBus::new(3);
        for i in 0..5 {
            bus.emit(ScannerEvent::new("tick", json!(i)));
        }

        assert_eq!(bus.history_len(), 3);
        let recent: Vec<_> = bus.recent_events(10).iter().map(|e| e.data.clone()).collect();
        assert_eq!(recent, vec![json!(2), json!(3), json!(4)]);
    }

    #[test]
    fn recent_and_typed_queries_return_last_n_oldest_first() {
        let mut bus = EventBus::default();
        bus.emit(ScannerEvent::new("a", json!(1)));
        bus.emit(ScannerEvent::new("b", json!(2)));
        bus.emit(ScannerEvent::new("a", json!(3)));
        bus.emit(ScannerEvent::new("a", json!(4)));

        let last_two: Vec<_> = bus.recent_events(2).iter().map(|e| e.data.clone()).collect();
        assert_eq!(last_two, vec![json!(3), json!(4)]);

        let typed: Vec<_> = bus
            .events_by_type("a", 2)
            .iter()
            .map(|e| e.data.clone())
            .collect();
        assert_eq!(typed, vec![json!(3), json!(4)]);
        assert!(bus.events_by_type("missing", 5).is_empty());
    }

    #[test]
    fn event_serializes_with_type_field() {
        let event = ScannerEvent::new("scan_completed", json!({"path": "a.md"}))
            .with_source("watcher")
            .with_priority(3);
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "scan_completed");
        assert_eq!(value["source"], "watcher");
        assert_eq!(value["priority"], 3);
        assert!(value.get("signal").is_none());
    }
}
