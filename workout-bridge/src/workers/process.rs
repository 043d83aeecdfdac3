//! Inference worker process handle
//!
//! This module provides the `WorkerHandle` struct that owns one child
//! process running the inference worker. The worker writes JSON records
//! to stdout and free-form diagnostics to stderr.
//!
//! # Tasks
//!
//! Each worker is served by three tasks:
//! - a stdout reader forwarding every line as `WorkerEvent::Record`
//! - a stderr reader forwarding every line as `WorkerEvent::Diagnostic`
//! - a supervisor that owns the `Child`, kills it on request, and emits
//!   exactly one `WorkerEvent::Exited` once both readers have drained
//!
//! All three send into the same channel, so records keep their stream
//! order and the exit signal always comes after the last record.

use std::fmt;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::codec::line_text;
use crate::config::{Launcher, WorkerConfig};
use crate::error::{BridgeError, BridgeResult};

/// Time allowed for the output readers to reach EOF after the process exits
/// (in milliseconds)
const READER_DRAIN_TIMEOUT_MS: u64 = 500;

/// Longest line accepted from a worker stream (in bytes); a frame is one
/// base64 JPEG, well under this. Longer lines are dropped.
pub const MAX_RECORD_BYTES: usize = 16 * 1024 * 1024;

/// Generation number of a spawned worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct WorkerId(u64);

impl WorkerId {
    pub fn new(generation: u64) -> Self {
        Self(generation)
    }

    pub fn get(self) -> u64 {
        self.0
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Something observed on one worker's process boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// One line from stdout, still undecoded
    Record(String),
    /// One line from stderr
    Diagnostic(String),
    /// The process is gone; always the last event of a worker
    Exited(WorkerExit),
}

/// A worker event tagged with the worker that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSignal {
    pub worker: WorkerId,
    pub event: WorkerEvent,
}

/// How a worker process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerExit {
    /// Exit code, `None` when the process was ended by a signal
    pub code: Option<i32>,

    /// Whether the bridge asked for the termination
    pub requested: bool,
}

impl WorkerExit {
    fn from_status(status: &std::io::Result<ExitStatus>, requested: bool) -> Self {
        Self {
            code: status.as_ref().ok().and_then(ExitStatus::code),
            requested,
        }
    }
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.requested, self.code) {
            (true, _) => write!(f, "exited after termination request"),
            (false, Some(code)) => write!(f, "exited unexpectedly with exit code {}", code),
            (false, None) => write!(f, "exited unexpectedly (terminated by signal)"),
        }
    }
}

/// Handle to one running inference worker.
#[derive(Debug)]
pub struct WorkerHandle {
    /// Generation assigned by the controller
    id: WorkerId,

    /// OS process id, if the platform reported one
    pid: Option<u32>,

    /// Configuration the worker was launched with
    config: WorkerConfig,

    /// Arguments passed to the interpreter
    args: Vec<String>,

    /// Stop request for the supervisor; `None` once terminated
    stop: Option<oneshot::Sender<()>>,

    /// Supervisor task owning the child process
    supervisor: Option<JoinHandle<()>>,

    /// How long `terminate` waits for the process to be reaped
    terminate_grace: Duration,
}

impl WorkerHandle {
    /// Spawn the worker for `config` and start forwarding its output.
    ///
    /// Every signal produced by this worker is sent on `signals` tagged
    /// with `id`.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Spawn` if the worker script does not exist or
    /// the interpreter cannot be launched.
    pub fn start(
        id: WorkerId,
        config: WorkerConfig,
        launcher: &Launcher,
        signals: mpsc::UnboundedSender<WorkerSignal>,
    ) -> BridgeResult<WorkerHandle> {
        let program = launcher.interpreter().display().to_string();

        if !launcher.script().is_file() {
            return Err(BridgeError::Spawn {
                program: launcher.script().display().to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "worker script does not exist",
                ),
            });
        }

        let args = launcher.command_args(&config);
        info!(worker = %id, program = %program, args = ?args, "Starting inference worker");

        let mut child = Command::new(launcher.interpreter())
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true) // Ensure cleanup if the bridge goes away
            .spawn()
            .map_err(|source| BridgeError::Spawn {
                program: program.clone(),
                source,
            })?;

        let pid = child.id();
        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(BridgeError::Spawn {
                program,
                source: std::io::Error::other("worker output pipes were not captured"),
            });
        };

        info!(worker = %id, pid = ?pid, "Inference worker spawned");

        let readers = [
            tokio::spawn(forward_lines(id, stdout, signals.clone(), WorkerEvent::Record, MAX_RECORD_BYTES)),
            tokio::spawn(forward_lines(id, stderr, signals.clone(), WorkerEvent::Diagnostic, MAX_RECORD_BYTES)),
        ];
        let (stop_tx, stop_rx) = oneshot::channel();
        let supervisor = tokio::spawn(supervise(id, child, stop_rx, readers, signals));

        Ok(WorkerHandle {
            id,
            pid,
            config,
            args,
            stop: Some(stop_tx),
            supervisor: Some(supervisor),
            terminate_grace: launcher.terminate_grace(),
        })
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Get the process ID of the worker (if the platform reported one).
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Arguments the interpreter was launched with.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Check if the worker process is still running.
    pub fn is_live(&self) -> bool {
        self.stop.is_some()
            && self
                .supervisor
                .as_ref()
                .is_some_and(|task| !task.is_finished())
    }

    /// Kill the worker and wait for it to be reaped.
    ///
    /// Idempotent: calling this on an already terminated handle does
    /// nothing. If the process is not reaped within the grace period the
    /// supervisor is left to finish in the background.
    pub async fn terminate(&mut self) {
        let Some(stop) = self.stop.take() else {
            return;
        };

        info!(worker = %self.id, pid = ?self.pid, "Terminating inference worker");
        // The supervisor may already be gone if the worker exited on its own
        let _ = stop.send(());

        if let Some(mut supervisor) = self.supervisor.take() {
            match tokio::time::timeout(self.terminate_grace, &mut supervisor).await {
                Ok(Ok(())) => debug!(worker = %self.id, "Worker reaped"),
                Ok(Err(e)) => warn!(worker = %self.id, error = %e, "Worker supervisor failed"),
                Err(_) => warn!(
                    worker = %self.id,
                    grace_ms = self.terminate_grace.as_millis(),
                    "Worker not reaped within grace period"
                ),
            }
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        // Dropping `stop` makes the supervisor kill the child; kill_on_drop
        // covers the case where the supervisor itself is gone.
        if self.stop.is_some() {
            debug!(worker = %self.id, pid = ?self.pid, "Dropping live worker handle");
        }
    }
}

/// Forward every line of `stream` as a signal until EOF.
///
/// A line longer than `max_len` bytes is never buffered whole: it is
/// skipped up to its newline and logged as a dropped record.
async fn forward_lines<R>(
    worker: WorkerId,
    stream: R,
    signals: mpsc::UnboundedSender<WorkerSignal>,
    wrap: fn(String) -> WorkerEvent,
    max_len: usize,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();
    // One extra byte tells an exactly-full line from an oversized one
    let limit = max_len as u64 + 1;

    loop {
        line.clear();
        match (&mut reader).take(limit).read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) if line.len() > max_len && line.last() != Some(&b'\n') => {
                warn!(worker = %worker, max_len, "Dropping oversized worker record");
                if let Err(e) = skip_line(&mut reader).await {
                    warn!(worker = %worker, error = %e, "Failed to read worker output");
                    break;
                }
            }
            Ok(_) => {
                let Some(text) = line_text(&line) else {
                    continue;
                };
                let signal = WorkerSignal {
                    worker,
                    event: wrap(text),
                };
                if signals.send(signal).is_err() {
                    // Controller is gone; nobody is listening
                    break;
                }
            }
            Err(e) => {
                warn!(worker = %worker, error = %e, "Failed to read worker output");
                break;
            }
        }
    }
}

/// Discard input up to and including the next newline (or EOF).
async fn skip_line<R>(reader: &mut R) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let (used, done) = {
            let buf = reader.fill_buf().await?;
            if buf.is_empty() {
                return Ok(());
            }
            match buf.iter().position(|b| *b == b'\n') {
                Some(pos) => (pos + 1, true),
                None => (buf.len(), false),
            }
        };
        reader.consume(used);
        if done {
            return Ok(());
        }
    }
}

/// Own the child until it exits, then report the exit.
async fn supervise(
    worker: WorkerId,
    mut child: Child,
    mut stop: oneshot::Receiver<()>,
    readers: [JoinHandle<()>; 2],
    signals: mpsc::UnboundedSender<WorkerSignal>,
) {
    // A dropped handle counts as a stop request
    let natural_exit = tokio::select! {
        status = child.wait() => Some(status),
        _ = &mut stop => None,
    };

    let (status, requested) = match natural_exit {
        Some(status) => (status, false),
        None => {
            if let Err(e) = child.start_kill() {
                warn!(worker = %worker, error = %e, "Failed to kill worker");
            }
            (child.wait().await, true)
        }
    };

    for mut reader in readers {
        let drain = Duration::from_millis(READER_DRAIN_TIMEOUT_MS);
        if tokio::time::timeout(drain, &mut reader).await.is_err() {
            debug!(worker = %worker, "Worker output still open after exit, detaching reader");
            reader.abort();
        }
    }

    match &status {
        Ok(status) => info!(worker = %worker, status = %status, requested, "Worker process exited"),
        Err(e) => error!(worker = %worker, error = %e, "Failed to wait for worker process"),
    }

    let exit = WorkerExit::from_status(&status, requested);
    let _ = signals.send(WorkerSignal {
        worker,
        event: WorkerEvent::Exited(exit),
    });
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::LaunchSettings;
    use crate::config::Platform;
    use std::path::PathBuf;
    use tempfile::TempDir;

    /// Build a launcher running `body` as a `/bin/sh` script
    fn sh_launcher(dir: &TempDir, body: &str) -> Launcher {
        let script = dir.path().join("worker.sh");
        std::fs::write(&script, body).unwrap();
        let settings = LaunchSettings {
            install_dir: dir.path().to_path_buf(),
            script,
            interpreter: Some(PathBuf::from("/bin/sh")),
            interpreter_args: Vec::new(),
            terminate_grace: Duration::from_secs(5),
        };
        Launcher::resolve(settings, Platform::Unix).unwrap()
    }

    async fn collect_until_exit(rx: &mut mpsc::UnboundedReceiver<WorkerSignal>) -> Vec<WorkerEvent> {
        let mut events = Vec::new();
        loop {
            let signal = tokio::time::timeout(Duration::from_secs(10), rx.recv())
                .await
                .expect("timed out waiting for worker signal")
                .expect("signal channel closed");
            let done = matches!(signal.event, WorkerEvent::Exited(_));
            events.push(signal.event);
            if done {
                return events;
            }
        }
    }

    #[tokio::test]
    async fn test_records_arrive_before_exit() {
        let dir = TempDir::new().unwrap();
        let launcher = sh_launcher(
            &dir,
            "echo first\necho 'to stderr' >&2\necho\necho second\nexit 3\n",
        );
        let (tx, mut rx) = mpsc::unbounded_channel();

        let handle = WorkerHandle::start(WorkerId::new(1), WorkerConfig::default(), &launcher, tx).unwrap();
        assert!(handle.pid().is_some());

        let events = collect_until_exit(&mut rx).await;
        let records: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                WorkerEvent::Record(line) => Some(line.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(records, vec!["first", "second"]);
        assert!(events.contains(&WorkerEvent::Diagnostic("to stderr".to_string())));
        assert_eq!(
            events.last(),
            Some(&WorkerEvent::Exited(WorkerExit {
                code: Some(3),
                requested: false
            }))
        );
    }

    #[tokio::test]
    async fn test_terminate_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let launcher = sh_launcher(&dir, "echo ready\nexec sleep 30\n");
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut handle = WorkerHandle::start(WorkerId::new(7), WorkerConfig::default(), &launcher, tx).unwrap();
        assert!(handle.is_live());

        handle.terminate().await;
        assert!(!handle.is_live());
        handle.terminate().await;

        let events = collect_until_exit(&mut rx).await;
        let Some(WorkerEvent::Exited(exit)) = events.last() else {
            panic!("expected an exit event");
        };
        assert!(exit.requested);
    }

    #[tokio::test]
    async fn test_signals_carry_worker_id() {
        let dir = TempDir::new().unwrap();
        let launcher = sh_launcher(&dir, "echo hello\n");
        let (tx, mut rx) = mpsc::unbounded_channel();

        let _handle = WorkerHandle::start(WorkerId::new(42), WorkerConfig::default(), &launcher, tx).unwrap();
        let signal = rx.recv().await.unwrap();
        assert_eq!(signal.worker, WorkerId::new(42));
        assert_eq!(signal.event, WorkerEvent::Record("hello".to_string()));
    }

    #[tokio::test]
    async fn test_launch_args_follow_config() {
        let dir = TempDir::new().unwrap();
        let launcher = sh_launcher(&dir, "exec sleep 30\n");
        let (tx, _rx) = mpsc::unbounded_channel();

        let mut handle =
            WorkerHandle::start(WorkerId::new(1), WorkerConfig::new(2, "Squat"), &launcher, tx).unwrap();
        assert_eq!(
            &handle.args()[1..],
            &["--camera_index", "2", "--exercise_type", "Squat"]
        );
        handle.terminate().await;
    }

    #[tokio::test]
    async fn test_missing_script_is_spawn_error() {
        let dir = TempDir::new().unwrap();
        let settings = LaunchSettings {
            install_dir: dir.path().to_path_buf(),
            script: dir.path().join("missing.py"),
            interpreter: Some(PathBuf::from("/bin/sh")),
            ..LaunchSettings::default()
        };
        let launcher = Launcher::resolve(settings, Platform::Unix).unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = WorkerHandle::start(WorkerId::new(1), WorkerConfig::default(), &launcher, tx).unwrap_err();
        assert!(matches!(err, BridgeError::Spawn { .. }));
        assert!(err.to_string().contains("missing.py"));
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_spawn_error() {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("worker.sh");
        std::fs::write(&script, "echo never\n").unwrap();
        let settings = LaunchSettings {
            install_dir: dir.path().to_path_buf(),
            script,
            interpreter: Some(PathBuf::from("/nonexistent/venv/bin/python3")),
            ..LaunchSettings::default()
        };
        let launcher = Launcher::resolve(settings, Platform::Unix).unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = WorkerHandle::start(WorkerId::new(1), WorkerConfig::default(), &launcher, tx).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/venv/bin/python3"));
    }

    #[tokio::test]
    async fn test_oversized_line_is_dropped() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let long = "x".repeat(100);
        let input = format!("first\n{}\nsixteen-bytes-ok\n{}", long, "tail-without-newline-too-long");

        forward_lines(WorkerId::new(1), input.as_bytes(), tx, WorkerEvent::Record, 16).await;

        let mut records = Vec::new();
        while let Ok(signal) = rx.try_recv() {
            records.push(signal.event);
        }
        assert_eq!(
            records,
            vec![
                WorkerEvent::Record("first".to_string()),
                WorkerEvent::Record("sixteen-bytes-ok".to_string()),
            ]
        );
    }

    #[test]
    fn test_exit_display() {
        let crashed = WorkerExit { code: Some(1), requested: false };
        assert_eq!(crashed.to_string(), "exited unexpectedly with exit code 1");

        let killed = WorkerExit { code: None, requested: false };
        assert!(killed.to_string().contains("signal"));

        let stopped = WorkerExit { code: None, requested: true };
        assert_eq!(stopped.to_string(), "exited after termination request");
    }

    #[test]
    fn test_worker_id_sequence() {
        let first = WorkerId::new(1);
        assert_eq!(first.next().get(), 2);
        assert_eq!(first.to_string(), "worker-1");
    }
}
