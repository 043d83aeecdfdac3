//! Bridge controller - the single owner of the live worker.
//!
//! All state changes happen inside [`BridgeController::run`], one event at a
//! time: frontend requests and worker signals are interleaved on one task,
//! so the `Option<WorkerHandle>` needs no locking.
//!
//! # Stale workers
//!
//! Every worker gets a fresh [`WorkerId`]. A signal is only acted on while
//! its id is the live worker's id; anything from a terminated or superseded
//! worker (buffered records, its exit) is discarded.

use std::future::Future;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::codec::{self, InboundMessage, WorkerRecord};
use crate::config::{Launcher, WorkerConfig};
use crate::error::BridgeError;
use crate::relay::{FrontendRequest, FrontendSink, RelayEvent};
use crate::workers::{WorkerEvent, WorkerExit, WorkerHandle, WorkerId, WorkerSignal};

/// Snapshot of the controller, published for health reporting
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BridgeStatus {
    /// Generation of the live worker, if any
    pub worker_id: Option<u64>,

    pub pid: Option<u32>,

    /// Configuration of the live worker
    pub config: Option<WorkerConfig>,

    /// Workers spawned since the bridge started
    pub spawned: u64,
}

/// Orchestrates the worker and relays its messages to the frontend
pub struct BridgeController<S> {
    launcher: Launcher,
    sink: S,

    /// The one live worker, if any
    active: Option<WorkerHandle>,

    /// Id handed to the next spawned worker
    next_id: WorkerId,

    signals_tx: mpsc::UnboundedSender<WorkerSignal>,
    signals_rx: mpsc::UnboundedReceiver<WorkerSignal>,

    status: watch::Sender<BridgeStatus>,
}

impl<S: FrontendSink> BridgeController<S> {
    pub fn new(launcher: Launcher, sink: S) -> Self {
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        let (status, _) = watch::channel(BridgeStatus::default());
        Self {
            launcher,
            sink,
            active: None,
            next_id: WorkerId::new(1),
            signals_tx,
            signals_rx,
            status,
        }
    }

    /// Subscribe to status snapshots.
    pub fn status(&self) -> watch::Receiver<BridgeStatus> {
        self.status.subscribe()
    }

    /// Id of the live worker, if one is running.
    pub fn active_worker(&self) -> Option<WorkerId> {
        self.active.as_ref().map(WorkerHandle::id)
    }

    /// Launch arguments of the live worker.
    pub fn active_args(&self) -> Option<&[String]> {
        self.active.as_ref().map(WorkerHandle::args)
    }

    /// Process the bridge until `requests` closes or `shutdown` resolves,
    /// then terminate the live worker.
    pub async fn run<F>(mut self, mut requests: mpsc::Receiver<FrontendRequest>, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!("Bridge controller started");

        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(request) => self.handle_request(request).await,
                    None => {
                        debug!("Frontend request channel closed");
                        break;
                    }
                },
                Some(signal) = self.signals_rx.recv() => self.handle_signal(signal),
                _ = &mut shutdown => {
                    debug!("Bridge shutdown requested");
                    break;
                }
            }
        }

        self.shutdown().await;
        info!("Bridge controller stopped");
    }

    pub async fn handle_request(&mut self, request: FrontendRequest) {
        match request {
            FrontendRequest::Init(config) => self.on_init_or_reconfigure(config).await,
            FrontendRequest::Unrecognized { notification } => {
                debug!(notification = %notification, "Ignoring unrecognized frontend request");
            }
        }
    }

    /// Replace the live worker with a fresh one for `config`.
    ///
    /// Always restarts, even when `config` equals the running config.
    pub async fn on_init_or_reconfigure(&mut self, config: WorkerConfig) {
        info!(
            camera_index = config.camera_index,
            exercise_type = %config.exercise_type,
            "Init request received"
        );

        // The old worker must release the camera before the new one opens it
        self.terminate_active().await;

        let id = self.next_id;
        self.next_id = id.next();

        match WorkerHandle::start(id, config, &self.launcher, self.signals_tx.clone()) {
            Ok(handle) => {
                let (pid, config) = (handle.pid(), handle.config().clone());
                self.active = Some(handle);
                self.status.send_modify(|status| {
                    status.worker_id = Some(id.get());
                    status.pid = pid;
                    status.config = Some(config);
                    status.spawned += 1;
                });
            }
            Err(err) => self.on_spawn_error(err),
        }
    }

    /// Route one worker signal, dropping it if its worker is not the live one.
    pub fn handle_signal(&mut self, signal: WorkerSignal) {
        if self.active_worker() != Some(signal.worker) {
            debug!(worker = %signal.worker, "Discarding signal from stale worker");
            return;
        }

        match signal.event {
            WorkerEvent::Record(record) => match codec::decode_record(&record) {
                Ok(decoded) => self.on_worker_message(decoded),
                Err(e) => {
                    let err = BridgeError::from(e);
                    warn!(worker = %signal.worker, error = %err, record_len = record.len(), "Dropping malformed worker record");
                }
            },
            WorkerEvent::Diagnostic(line) => {
                debug!(target: "worker_stderr", worker = %signal.worker, "{}", line);
            }
            WorkerEvent::Exited(exit) => self.on_worker_exit(exit),
        }
    }

    /// Relay a decoded worker message to the frontend, payload untouched.
    pub fn on_worker_message(&self, record: WorkerRecord) {
        if let InboundMessage::Error(payload) = &record.message {
            let err = BridgeError::WorkerRuntime(payload.message.clone());
            warn!(error = %err, "Worker reported an error");
        }
        self.sink.deliver(RelayEvent::from(record));
    }

    /// The live worker ended on its own.
    pub fn on_worker_exit(&mut self, exit: WorkerExit) {
        self.active = None;
        self.clear_status();

        // Exits we asked for are never reported
        if exit.requested {
            debug!(exit = %exit, "Worker stopped");
            return;
        }

        let err = BridgeError::WorkerExit(exit);
        warn!(error = %err, "Inference worker stopped unexpectedly");
        self.sink.deliver(RelayEvent::error(err.to_string()));
    }

    pub fn on_spawn_error(&mut self, err: BridgeError) {
        warn!(error = %err, "Failed to start inference worker");
        self.sink.deliver(RelayEvent::error(err.to_string()));
    }

    /// Terminate the live worker; called when the host is going away.
    pub async fn shutdown(&mut self) {
        self.terminate_active().await;
    }

    async fn terminate_active(&mut self) {
        if let Some(mut handle) = self.active.take() {
            handle.terminate().await;
            self.clear_status();
        }
    }

    fn clear_status(&self) {
        self.status.send_modify(|status| {
            status.worker_id = None;
            status.pid = None;
            status.config = None;
        });
    }
}
