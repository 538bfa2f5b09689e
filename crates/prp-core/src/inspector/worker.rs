use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::analysis::{inspect, ProcessingRequest};
use super::protocol::{
    CoordinatorMessage, Envelope, WorkerErrorCode, WorkerFailure, WorkerId, WorkerMessage,
    WorkerResult,
};
use crate::guideline::{GuidelineLoader, GuidelineStore};

const INBOX_CAPACITY: usize = 8;

/// Per-worker guideline cache sizing.
#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    pub cache_capacity: usize,
    pub cache_ttl: Duration,
}

// ─── Spawning ─────────────────────────────────────────────────────────────

/// Start one worker task. The worker owns its guideline store for its whole
/// life; the only link back to the coordinator is `outbox`.
pub(crate) fn spawn(
    worker_id: WorkerId,
    loader: GuidelineLoader,
    settings: WorkerSettings,
    outbox: mpsc::Sender<Envelope<WorkerMessage>>,
) -> (mpsc::Sender<Envelope<CoordinatorMessage>>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
    let handle = tokio::spawn(run(worker_id, loader, settings, rx, outbox));
    (tx, handle)
}

async fn run(
    worker_id: WorkerId,
    loader: GuidelineLoader,
    settings: WorkerSettings,
    mut inbox: mpsc::Receiver<Envelope<CoordinatorMessage>>,
    outbox: mpsc::Sender<Envelope<WorkerMessage>>,
) {
    let reply = |message: WorkerMessage| Envelope::new(worker_id, message);

    let mut store =
        match GuidelineStore::open(loader, settings.cache_capacity, settings.cache_ttl) {
            Ok(store) => store,
            Err(e) => {
                tracing::error!(worker_id, "worker failed to load guidelines: {e}");
                let failure = WorkerFailure {
                    code: WorkerErrorCode::InitializationError,
                    message: e.to_string(),
                    signal_id: None,
                    prp: None,
                    worker_id: Some(worker_id),
                };
                let _ = outbox.send(reply(WorkerMessage::Error(failure))).await;
                return;
            }
        };

    tracing::debug!(worker_id, guidelines = store.len(), "worker ready");
    if outbox.send(reply(WorkerMessage::Ready)).await.is_err() {
        return;
    }

    while let Some(envelope) = inbox.recv().await {
        let message = match envelope.message {
            CoordinatorMessage::Process(request) => process(worker_id, &mut store, *request),
            CoordinatorMessage::Ping => WorkerMessage::Pong,
            CoordinatorMessage::Shutdown => {
                store.release();
                let _ = outbox.send(reply(WorkerMessage::ShutdownComplete)).await;
                tracing::debug!(worker_id, "worker stopped");
                return;
            }
        };
        if outbox.send(reply(message)).await.is_err() {
            tracing::debug!(worker_id, "coordinator gone, worker exiting");
            return;
        }
    }
}

// ─── Processing ───────────────────────────────────────────────────────────

fn process(
    worker_id: WorkerId,
    store: &mut GuidelineStore,
    request: ProcessingRequest,
) -> WorkerMessage {
    let started = Instant::now();
    let code = request.signal.code.clone();

    if store.lookup(&code).is_none() {
        tracing::warn!(worker_id, code = %code, "no guideline for signal");
        return WorkerMessage::Error(WorkerFailure::for_request(
            WorkerErrorCode::ProcessingError,
            &request,
            Some(worker_id),
            format!("no guideline for [{code}]"),
        ));
    }

    let inspection = inspect(&request, Utc::now());
    let prp = request.prp();
    tracing::debug!(
        worker_id,
        code = %code,
        role = %inspection.classification.agent_role,
        "signal inspected"
    );

    WorkerMessage::Result(Box::new(WorkerResult {
        signal_id: request.signal.id.clone(),
        signal: request.signal,
        prp,
        classification: inspection.classification,
        recommendations: inspection.recommendations,
        analysis: inspection.analysis,
        processing_time_ms: started.elapsed().as_millis() as u64,
        worker_id,
        success: true,
    }))
}

// ─── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guideline::Guideline;
    use crate::signal::Signal;

    fn settings() -> WorkerSettings {
        WorkerSettings {
            cache_capacity: 64,
            cache_ttl: Duration::from_secs(60),
        }
    }

    async fn recv(
        rx: &mut mpsc::Receiver<Envelope<WorkerMessage>>,
    ) -> Envelope<WorkerMessage> {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("worker replied")
            .expect("channel open")
    }

    #[tokio::test]
    async fn worker_lifecycle_ready_process_ping_shutdown() {
        let (out_tx, mut out_rx) = mpsc::channel(16);
        let (inbox, handle) = spawn(7, GuidelineLoader::Builtin, settings(), out_tx);

        assert_eq!(recv(&mut out_rx).await.message, WorkerMessage::Ready);

        let signal = Signal::new("tp", 1, 0, "[tp] tests".into());
        let request = ProcessingRequest::new(signal.clone());
        inbox
            .send(Envelope::new(7, CoordinatorMessage::Process(Box::new(request))))
            .await
            .unwrap();
        match recv(&mut out_rx).await.message {
            WorkerMessage::Result(result) => {
                assert_eq!(result.signal_id, signal.id);
                assert_eq!(result.worker_id, 7);
                assert!(result.success);
            }
            other => panic!("expected result, got {other:?}"),
        }

        inbox
            .send(Envelope::new(7, CoordinatorMessage::Ping))
            .await
            .unwrap();
        assert_eq!(recv(&mut out_rx).await.message, WorkerMessage::Pong);

        inbox
            .send(Envelope::new(7, CoordinatorMessage::Shutdown))
            .await
            .unwrap();
        assert_eq!(
            recv(&mut out_rx).await.message,
            WorkerMessage::ShutdownComplete
        );
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn missing_guideline_is_a_processing_error() {
        let loader = GuidelineLoader::Inline(vec![Guideline {
            code: "tp".into(),
            text: "tests".into(),
        }]);
        let (out_tx, mut out_rx) = mpsc::channel(16);
        let (inbox, _handle) = spawn(0, loader, settings(), out_tx);
        assert_eq!(recv(&mut out_rx).await.message, WorkerMessage::Ready);

        let request = ProcessingRequest::new(Signal::new("dp", 1, 0, "[dp]".into()));
        inbox
            .send(Envelope::new(0, CoordinatorMessage::Process(Box::new(request))))
            .await
            .unwrap();
        match recv(&mut out_rx).await.message {
            WorkerMessage::Error(f) => {
                assert_eq!(f.code, WorkerErrorCode::ProcessingError);
                assert!(f.signal_id.is_some());
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_load_reports_initialization_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let loader = GuidelineLoader::Directory(dir.path().join("missing"));
        let (out_tx, mut out_rx) = mpsc::channel(16);
        let (_inbox, handle) = spawn(2, loader, settings(), out_tx);

        match recv(&mut out_rx).await.message {
            WorkerMessage::Error(f) => {
                assert_eq!(f.code, WorkerErrorCode::InitializationError);
                assert_eq!(f.worker_id, Some(2));
            }
            other => panic!("expected init error, got {other:?}"),
        }
        handle.await.unwrap();
    }
}
