//! Coordinator side of the inspector pool.
//!
//! The pool owns every worker's inbox and a single shared outbox. Dispatch is
//! round-robin over idle, ready workers with at most one request in flight per
//! worker; anything beyond that waits in a FIFO queue.

use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};

use super::analysis::ProcessingRequest;
use super::protocol::{
    CoordinatorMessage, Envelope, WorkerErrorCode, WorkerFailure, WorkerId, WorkerMessage,
    WorkerResult,
};
use super::worker::{self, WorkerSettings};
use crate::error::{PrpError, Result};
use crate::guideline::GuidelineLoader;

// ─── Config ───────────────────────────────────────────────────────────────

/// How often a waiting coordinator checks for workers that died mid-request.
const LIVENESS_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub size: usize,
    pub ready_timeout: Duration,
    /// A worker holding one request longer than this is taken offline.
    pub request_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub worker: WorkerSettings,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 4,
            ready_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(5),
            worker: WorkerSettings {
                cache_capacity: 256,
                cache_ttl: Duration::from_secs(300),
            },
        }
    }
}

// ─── Status ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Starting,
    Idle,
    Working,
    Error,
    Offline,
}

impl WorkerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerStatus::Starting => "starting",
            WorkerStatus::Idle => "idle",
            WorkerStatus::Working => "working",
            WorkerStatus::Error => "error",
            WorkerStatus::Offline => "offline",
        }
    }

    fn is_live(self) -> bool {
        matches!(self, WorkerStatus::Idle | WorkerStatus::Working)
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStats {
    pub id: WorkerId,
    pub status: WorkerStatus,
    pub processed: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub workers: Vec<WorkerStats>,
    pub in_flight: usize,
    pub max_in_flight: usize,
    pub queued: usize,
    pub completed: u64,
    pub failed: u64,
}

impl PoolStats {
    pub fn ready_workers(&self) -> usize {
        self.workers.iter().filter(|w| w.status.is_live()).count()
    }
}

// ─── Outcome ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum PoolOutcome {
    Completed(Box<WorkerResult>),
    Failed(WorkerFailure),
}

impl PoolOutcome {
    pub fn signal_id(&self) -> Option<&str> {
        match self {
            PoolOutcome::Completed(r) => Some(&r.signal_id),
            PoolOutcome::Failed(f) => f.signal_id.as_deref(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, PoolOutcome::Completed(r) if r.success)
    }
}

// ─── Pool ─────────────────────────────────────────────────────────────────

struct WorkerSlot {
    id: WorkerId,
    inbox: mpsc::Sender<Envelope<CoordinatorMessage>>,
    handle: Option<JoinHandle<()>>,
    status: WorkerStatus,
    /// Request currently dispatched to this worker, and when.
    current: Option<(ProcessingRequest, Instant)>,
    processed: u64,
    failed: u64,
}

pub struct InspectorPool {
    workers: Vec<WorkerSlot>,
    outbox: mpsc::Receiver<Envelope<WorkerMessage>>,
    ready: VecDeque<PoolOutcome>,
    pending: VecDeque<ProcessingRequest>,
    next_worker: usize,
    in_flight: usize,
    max_in_flight: usize,
    completed: u64,
    failed: u64,
    request_timeout: Duration,
    shutdown_timeout: Duration,
    closed: bool,
}

impl fmt::Debug for InspectorPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InspectorPool")
            .field("workers", &self.workers.len())
            .field("in_flight", &self.in_flight)
            .field("queued", &self.pending.len())
            .field("closed", &self.closed)
            .finish()
    }
}

impl InspectorPool {
    /// Spawn `config.size` workers, each loading its own guideline store from a
    /// clone of `loader`, and wait up to `ready_timeout` for them to report in.
    ///
    /// Workers that fail to initialise stay excluded from dispatch. A pool with
    /// no ready workers still starts; every request then fails with
    /// `POOL_UNAVAILABLE`.
    pub async fn start(config: PoolConfig, loader: GuidelineLoader) -> Result<Self> {
        if config.size == 0 {
            return Err(PrpError::validation(
                "pool.size",
                "0",
                "pool needs at least one worker",
            ));
        }

        let (out_tx, out_rx) = mpsc::channel(config.size * 4 + 16);
        let workers = (0..config.size)
            .map(|id| {
                let (inbox, handle) =
                    worker::spawn(id, loader.clone(), config.worker, out_tx.clone());
                WorkerSlot {
                    id,
                    inbox,
                    handle: Some(handle),
                    status: WorkerStatus::Starting,
                    current: None,
                    processed: 0,
                    failed: 0,
                }
            })
            .collect();
        // Workers hold the only senders, so the outbox closes when all exit.
        drop(out_tx);

        let mut pool = Self {
            workers,
            outbox: out_rx,
            ready: VecDeque::new(),
            pending: VecDeque::new(),
            next_worker: 0,
            in_flight: 0,
            max_in_flight: 0,
            completed: 0,
            failed: 0,
            request_timeout: config.request_timeout,
            shutdown_timeout: config.shutdown_timeout,
            closed: false,
        };
        pool.await_ready(config.ready_timeout).await;

        let ready = pool.live_workers();
        if ready == 0 {
            tracing::error!("inspector pool started with no ready workers");
        } else {
            tracing::info!(ready, size = config.size, "inspector pool started");
        }
        Ok(pool)
    }

    async fn await_ready(&mut self, ready_timeout: Duration) {
        let deadline = Instant::now() + ready_timeout;
        while self
            .workers
            .iter()
            .any(|w| w.status == WorkerStatus::Starting)
        {
            match timeout_at(deadline, self.outbox.recv()).await {
                Ok(Some(envelope)) => self.handle(envelope),
                Ok(None) => break,
                Err(_) => {
                    for slot in &mut self.workers {
                        if slot.status == WorkerStatus::Starting {
                            tracing::warn!(
                                worker_id = slot.id,
                                code = %WorkerErrorCode::TimeoutError,
                                "worker did not become ready"
                            );
                            slot.status = WorkerStatus::Offline;
                        }
                    }
                    break;
                }
            }
        }
    }

    fn live_workers(&self) -> usize {
        self.workers.iter().filter(|w| w.status.is_live()).count()
    }

    /// Queue a request. Returns `PoolClosed` after shutdown; with no ready
    /// workers the request immediately yields a `POOL_UNAVAILABLE` outcome.
    pub async fn submit(&mut self, request: ProcessingRequest) -> Result<()> {
        if self.closed {
            return Err(PrpError::PoolClosed);
        }
        if self.live_workers() == 0 {
            self.unavailable(request);
            return Ok(());
        }
        self.pending.push_back(request);
        self.dispatch().await;
        Ok(())
    }

    fn unavailable(&mut self, request: ProcessingRequest) {
        tracing::warn!(signal_id = %request.signal.id, "no ready workers for request");
        self.failed += 1;
        self.ready.push_back(PoolOutcome::Failed(WorkerFailure::for_request(
            WorkerErrorCode::PoolUnavailable,
            &request,
            None,
            "no ready workers",
        )));
    }

    /// Hand queued requests to idle workers, round-robin from the last pick.
    async fn dispatch(&mut self) {
        while !self.pending.is_empty() {
            if self.live_workers() == 0 {
                while let Some(request) = self.pending.pop_front() {
                    self.unavailable(request);
                }
                return;
            }
            let Some(index) = self.next_idle() else {
                return;
            };
            let Some(request) = self.pending.pop_front() else {
                return;
            };

            let slot = &mut self.workers[index];
            let envelope = Envelope::new(
                slot.id,
                CoordinatorMessage::Process(Box::new(request.clone())),
            );
            if slot.inbox.send(envelope).await.is_err() {
                tracing::warn!(worker_id = slot.id, "worker inbox closed");
                slot.status = WorkerStatus::Offline;
                self.pending.push_front(request);
                continue;
            }
            slot.status = WorkerStatus::Working;
            slot.current = Some((request, Instant::now()));
            self.next_worker = (index + 1) % self.workers.len();
            self.in_flight += 1;
            self.max_in_flight = self.max_in_flight.max(self.in_flight);
        }
    }

    fn next_idle(&self) -> Option<usize> {
        let n = self.workers.len();
        (0..n)
            .map(|offset| (self.next_worker + offset) % n)
            .find(|&i| self.workers[i].status == WorkerStatus::Idle)
    }

    /// Apply one worker message to coordinator state. Request outcomes land in
    /// the ready queue.
    fn handle(&mut self, envelope: Envelope<WorkerMessage>) {
        let Some(slot) = self.workers.get_mut(envelope.worker_id) else {
            tracing::warn!(worker_id = envelope.worker_id, "message from unknown worker");
            return;
        };

        match envelope.message {
            WorkerMessage::Ready => {
                if slot.status == WorkerStatus::Starting {
                    slot.status = WorkerStatus::Idle;
                }
            }
            WorkerMessage::Pong => {
                if slot.status == WorkerStatus::Offline && slot.current.is_none() {
                    tracing::info!(worker_id = slot.id, "worker back online");
                    slot.status = WorkerStatus::Idle;
                }
            }
            WorkerMessage::ShutdownComplete => {
                slot.status = WorkerStatus::Offline;
            }
            WorkerMessage::Result(result) => {
                if slot.current.take().is_none() {
                    tracing::debug!(worker_id = slot.id, "discarding late result");
                    return;
                }
                slot.processed += 1;
                if slot.status == WorkerStatus::Working {
                    slot.status = WorkerStatus::Idle;
                }
                self.in_flight -= 1;
                self.completed += 1;
                self.ready.push_back(PoolOutcome::Completed(result));
            }
            WorkerMessage::Error(failure) => {
                if failure.code == WorkerErrorCode::InitializationError {
                    tracing::error!(
                        worker_id = slot.id,
                        "worker excluded from pool: {}",
                        failure.message
                    );
                    slot.status = WorkerStatus::Error;
                    return;
                }
                if slot.current.take().is_none() {
                    tracing::debug!(worker_id = slot.id, "discarding late error");
                    return;
                }
                slot.failed += 1;
                if slot.status == WorkerStatus::Working {
                    slot.status = WorkerStatus::Idle;
                }
                self.in_flight -= 1;
                self.failed += 1;
                self.ready.push_back(PoolOutcome::Failed(failure));
            }
        }
    }

    /// Take a worker out of rotation; its in-flight request fails with `code`.
    fn mark_offline(&mut self, index: usize, code: WorkerErrorCode, reason: &str) {
        let slot = &mut self.workers[index];
        tracing::warn!(worker_id = slot.id, code = %code, "{reason}");
        slot.status = WorkerStatus::Offline;
        if let Some((request, _)) = slot.current.take() {
            slot.failed += 1;
            let failure = WorkerFailure::for_request(code, &request, Some(slot.id), reason);
            self.in_flight -= 1;
            self.failed += 1;
            self.ready.push_back(PoolOutcome::Failed(failure));
        }
    }

    /// Next finished request, in completion order. `None` once nothing is
    /// queued or in flight.
    pub async fn next_outcome(&mut self) -> Option<PoolOutcome> {
        loop {
            if let Some(outcome) = self.ready.pop_front() {
                return Some(outcome);
            }
            if self.in_flight == 0 && self.pending.is_empty() {
                return None;
            }
            match timeout_at(self.next_wake(), self.outbox.recv()).await {
                Ok(Some(envelope)) => self.handle(envelope),
                Ok(None) => {
                    for index in 0..self.workers.len() {
                        if self.workers[index].current.is_some() {
                            self.mark_offline(
                                index,
                                WorkerErrorCode::ProcessingError,
                                "worker exited mid-request",
                            );
                        }
                    }
                    while let Some(request) = self.pending.pop_front() {
                        self.unavailable(request);
                    }
                }
                Err(_) => self.reap_stalled(),
            }
            self.dispatch().await;
        }
    }

    /// Earliest request deadline, or the next liveness check if sooner.
    fn next_wake(&self) -> Instant {
        let liveness = Instant::now() + LIVENESS_INTERVAL;
        self.workers
            .iter()
            .filter_map(|w| w.current.as_ref())
            .map(|(_, dispatched)| *dispatched + self.request_timeout)
            .fold(liveness, |a, b| a.min(b))
    }

    /// Fail the request of every busy worker whose task has ended or whose
    /// deadline has passed, and take that worker offline.
    fn reap_stalled(&mut self) {
        let now = Instant::now();
        for index in 0..self.workers.len() {
            let slot = &self.workers[index];
            let Some((_, dispatched)) = slot.current.as_ref() else {
                continue;
            };
            let overdue = now >= *dispatched + self.request_timeout;
            if slot.handle.as_ref().map_or(true, |h| h.is_finished()) {
                self.mark_offline(
                    index,
                    WorkerErrorCode::ProcessingError,
                    "worker exited mid-request",
                );
            } else if overdue {
                self.mark_offline(
                    index,
                    WorkerErrorCode::TimeoutError,
                    "worker did not answer in time",
                );
            }
        }
    }

    /// Barrier: every outcome for everything submitted so far.
    pub async fn wait_for_all(&mut self) -> Vec<PoolOutcome> {
        let mut out = Vec::new();
        while let Some(outcome) = self.next_outcome().await {
            out.push(outcome);
        }
        out
    }

    /// Ping every live worker. Workers silent past `timeout` are marked
    /// offline. Returns how many answered.
    pub async fn ping(&mut self, timeout: Duration) -> usize {
        let mut awaiting = HashSet::new();
        for slot in &self.workers {
            if !slot.status.is_live() {
                continue;
            }
            if slot
                .inbox
                .send(Envelope::new(slot.id, CoordinatorMessage::Ping))
                .await
                .is_ok()
            {
                awaiting.insert(slot.id);
            }
        }
        let pinged = awaiting.len();

        let deadline = Instant::now() + timeout;
        while !awaiting.is_empty() {
            match timeout_at(deadline, self.outbox.recv()).await {
                Ok(Some(envelope)) => {
                    let worker_id = envelope.worker_id;
                    let is_pong = matches!(envelope.message, WorkerMessage::Pong);
                    self.handle(envelope);
                    if is_pong {
                        awaiting.remove(&worker_id);
                    }
                }
                Ok(None) | Err(_) => break,
            }
        }

        let silent: Vec<WorkerId> = awaiting.into_iter().collect();
        for &index in &silent {
            self.mark_offline(index, WorkerErrorCode::TimeoutError, "worker did not answer ping");
        }
        self.dispatch().await;
        pinged - silent.len()
    }

    /// Stop accepting work, ask every worker to shut down, and abort any that
    /// have not confirmed within the shutdown timeout.
    pub async fn shutdown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if !self.pending.is_empty() {
            tracing::warn!(dropped = self.pending.len(), "pool shutting down with queued requests");
            self.pending.clear();
        }

        let mut awaiting = HashSet::new();
        for slot in &self.workers {
            let running = slot.handle.as_ref().is_some_and(|h| !h.is_finished());
            if !running || slot.status == WorkerStatus::Error {
                continue;
            }
            if slot
                .inbox
                .send(Envelope::new(slot.id, CoordinatorMessage::Shutdown))
                .await
                .is_ok()
            {
                awaiting.insert(slot.id);
            }
        }

        let deadline = Instant::now() + self.shutdown_timeout;
        while !awaiting.is_empty() {
            match timeout_at(deadline, self.outbox.recv()).await {
                Ok(Some(envelope)) => {
                    let worker_id = envelope.worker_id;
                    let done = matches!(envelope.message, WorkerMessage::ShutdownComplete);
                    self.handle(envelope);
                    if done {
                        awaiting.remove(&worker_id);
                    }
                }
                Ok(None) | Err(_) => break,
            }
        }

        let mut aborted = 0;
        for slot in &mut self.workers {
            let Some(handle) = slot.handle.take() else {
                continue;
            };
            if awaiting.contains(&slot.id) && !handle.is_finished() {
                tracing::warn!(
                    worker_id = slot.id,
                    code = %WorkerErrorCode::TimeoutError,
                    "aborting worker that did not shut down"
                );
                handle.abort();
                aborted += 1;
            }
            slot.status = WorkerStatus::Offline;
            slot.current = None;
        }
        self.in_flight = 0;

        tracing::info!(aborted, "inspector pool stopped");
        if aborted > 0 {
            return Err(PrpError::Timeout {
                what: format!("shutdown of {aborted} worker(s)"),
                millis: self.shutdown_timeout.as_millis() as u64,
            });
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            workers: self
                .workers
                .iter()
                .map(|w| WorkerStats {
                    id: w.id,
                    status: w.status,
                    processed: w.processed,
                    failed: w.failed,
                })
                .collect(),
            in_flight: self.in_flight,
            max_in_flight: self.max_in_flight,
            queued: self.pending.len(),
            completed: self.completed,
            failed: self.failed,
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guideline::Guideline;
    use crate::signal::Signal;

    fn config(size: usize) -> PoolConfig {
        PoolConfig {
            size,
            ..PoolConfig::default()
        }
    }

    fn request(code: &str) -> ProcessingRequest {
        ProcessingRequest::new(Signal::new(code, 1, 0, format!("[{code}] context")))
    }

    enum Fake {
        /// Takes requests and never answers.
        Silent,
        /// Exits after taking its first request.
        Dies,
    }

    /// Worker 0 misbehaves as `fake`; worker 1 is a real worker.
    async fn pool_with(fake: Fake, request_timeout: Duration) -> InspectorPool {
        let (out_tx, out_rx) = mpsc::channel(16);
        let (fake_inbox, mut fake_rx) = mpsc::channel::<Envelope<CoordinatorMessage>>(8);
        let held = out_tx.clone();
        let fake_handle = tokio::spawn(async move {
            let _outbox = held;
            match fake {
                Fake::Silent => while fake_rx.recv().await.is_some() {},
                Fake::Dies => {
                    fake_rx.recv().await;
                }
            }
        });
        let (real_inbox, real_handle) = worker::spawn(
            1,
            GuidelineLoader::Builtin,
            PoolConfig::default().worker,
            out_tx,
        );

        let slot = |id, inbox, handle| WorkerSlot {
            id,
            inbox,
            handle: Some(handle),
            status: WorkerStatus::Starting,
            current: None,
            processed: 0,
            failed: 0,
        };
        let mut pool = InspectorPool {
            workers: vec![slot(0, fake_inbox, fake_handle), slot(1, real_inbox, real_handle)],
            outbox: out_rx,
            ready: VecDeque::new(),
            pending: VecDeque::new(),
            next_worker: 0,
            in_flight: 0,
            max_in_flight: 0,
            completed: 0,
            failed: 0,
            request_timeout,
            shutdown_timeout: Duration::from_millis(200),
            closed: false,
        };
        pool.workers[0].status = WorkerStatus::Idle;
        pool.await_ready(Duration::from_secs(2)).await;
        pool
    }

    #[tokio::test]
    async fn silent_worker_times_out_and_pool_continues() {
        let mut pool = pool_with(Fake::Silent, Duration::from_millis(150)).await;
        assert_eq!(pool.stats().ready_workers(), 2);

        let stuck = request("tp");
        let stuck_id = stuck.signal.id.clone();
        pool.submit(stuck).await.unwrap();
        pool.submit(request("dp")).await.unwrap();

        let outcomes = tokio::time::timeout(Duration::from_secs(5), pool.wait_for_all())
            .await
            .expect("pool hung on a silent worker");
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes.iter().filter(|o| o.is_success()).count(), 1);
        let failure = outcomes
            .iter()
            .find_map(|o| match o {
                PoolOutcome::Failed(f) => Some(f),
                PoolOutcome::Completed(_) => None,
            })
            .unwrap();
        assert_eq!(failure.code, WorkerErrorCode::TimeoutError);
        assert_eq!(failure.signal_id.as_deref(), Some(stuck_id.as_str()));
        assert_eq!(failure.worker_id, Some(0));
        assert_eq!(pool.stats().workers[0].status, WorkerStatus::Offline);
        assert_eq!(pool.stats().in_flight, 0);

        // Later work goes to the worker that is still alive.
        pool.submit(request("bb")).await.unwrap();
        let outcome = pool.next_outcome().await.unwrap();
        assert!(outcome.is_success());
        assert!(pool.next_outcome().await.is_none());

        let _ = pool.shutdown().await;
    }

    #[tokio::test]
    async fn dead_worker_fails_its_request_without_waiting_for_deadline() {
        let mut pool = pool_with(Fake::Dies, Duration::from_secs(60)).await;

        pool.submit(request("tp")).await.unwrap();
        pool.submit(request("dp")).await.unwrap();

        let outcomes = tokio::time::timeout(Duration::from_secs(5), pool.wait_for_all())
            .await
            .expect("pool hung on a dead worker");
        assert_eq!(outcomes.len(), 2);
        let failures: Vec<_> = outcomes
            .iter()
            .filter_map(|o| match o {
                PoolOutcome::Failed(f) => Some(f.code),
                PoolOutcome::Completed(_) => None,
            })
            .collect();
        assert_eq!(failures, vec![WorkerErrorCode::ProcessingError]);
        assert_eq!(pool.stats().workers[0].status, WorkerStatus::Offline);

        pool.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn every_request_processed_exactly_once_within_concurrency_bound() {
        let mut pool = InspectorPool::start(config(3), GuidelineLoader::Builtin)
            .await
            .unwrap();
        assert_eq!(pool.stats().ready_workers(), 3);

        let codes = ["tp", "dp", "bb", "cf", "AA", "rc", "oa"];
        let mut submitted = HashSet::new();
        for i in 0..20 {
            let req = request(codes[i % codes.len()]);
            submitted.insert(req.signal.id.clone());
            pool.submit(req).await.unwrap();
        }

        let outcomes = pool.wait_for_all().await;
        assert_eq!(outcomes.len(), 20);
        assert!(outcomes.iter().all(PoolOutcome::is_success));
        let seen: HashSet<String> = outcomes
            .iter()
            .filter_map(|o| o.signal_id().map(str::to_string))
            .collect();
        assert_eq!(seen, submitted);

        let stats = pool.stats();
        assert!(stats.max_in_flight <= 3);
        assert!(stats.max_in_flight >= 1);
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.completed, 20);
        assert_eq!(stats.workers.iter().map(|w| w.processed).sum::<u64>(), 20);
        assert!(stats.workers.iter().all(|w| w.processed > 0));

        pool.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn missing_guideline_fails_only_that_request() {
        let loader = GuidelineLoader::Inline(vec![Guideline {
            code: "tp".into(),
            text: "tests prepared".into(),
        }]);
        let mut pool = InspectorPool::start(config(1), loader).await.unwrap();

        let missing = request("zz");
        let missing_id = missing.signal.id.clone();
        pool.submit(missing).await.unwrap();
        pool.submit(request("tp")).await.unwrap();

        let outcomes = pool.wait_for_all().await;
        assert_eq!(outcomes.len(), 2);
        match &outcomes[0] {
            PoolOutcome::Failed(f) => {
                assert_eq!(f.code, WorkerErrorCode::ProcessingError);
                assert_eq!(f.signal_id.as_deref(), Some(missing_id.as_str()));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(outcomes[1].is_success());
        assert_eq!(pool.stats().workers[0].status, WorkerStatus::Idle);
        assert_eq!(pool.stats().workers[0].failed, 1);
    }

    #[tokio::test]
    async fn failed_initialisation_leaves_pool_unavailable() {
        let dir = tempfile::TempDir::new().unwrap();
        let loader = GuidelineLoader::Directory(dir.path().join("nope"));
        let mut pool = InspectorPool::start(config(2), loader).await.unwrap();

        let stats = pool.stats();
        assert!(stats.workers.iter().all(|w| w.status == WorkerStatus::Error));
        assert_eq!(stats.ready_workers(), 0);

        pool.submit(request("tp")).await.unwrap();
        match pool.next_outcome().await {
            Some(PoolOutcome::Failed(f)) => {
                assert_eq!(f.code, WorkerErrorCode::PoolUnavailable);
                assert_eq!(f.worker_id, None);
            }
            other => panic!("expected unavailable, got {other:?}"),
        }
        assert!(pool.next_outcome().await.is_none());
    }

    #[tokio::test]
    async fn ping_counts_responsive_workers() {
        let mut pool = InspectorPool::start(config(2), GuidelineLoader::Builtin)
            .await
            .unwrap();
        assert_eq!(pool.ping(Duration::from_secs(2)).await, 2);
        assert_eq!(pool.stats().ready_workers(), 2);
    }

    #[tokio::test]
    async fn shutdown_closes_the_pool() {
        let mut pool = InspectorPool::start(config(2), GuidelineLoader::Builtin)
            .await
            .unwrap();
        pool.shutdown().await.unwrap();

        assert!(pool.is_closed());
        assert!(pool
            .stats()
            .workers
            .iter()
            .all(|w| w.status == WorkerStatus::Offline));
        assert!(matches!(
            pool.submit(request("tp")).await,
            Err(PrpError::PoolClosed)
        ));
        pool.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn zero_sized_pool_is_rejected() {
        let err = InspectorPool::start(config(0), GuidelineLoader::Builtin)
            .await
            .unwrap_err();
        assert!(matches!(err, PrpError::Validation { .. }));
    }
}
