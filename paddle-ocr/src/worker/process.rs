use std::process::Stdio;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::WorkerError;
use crate::image::EncodedImage;

use super::{protocol, LaunchSpec, OcrWorker, WorkerEndpoint, WorkerEvent, WorkerLauncher};

/// Spawns PaddleOCR-json as a child process.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessLauncher;

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn launch(
        &self,
        spec: &LaunchSpec,
        events: mpsc::Sender<WorkerEvent>,
    ) -> Result<Arc<dyn OcrWorker>, WorkerError> {
        Ok(Arc::new(ProcessWorker::spawn(spec, events)?))
    }
}

/// A running engine process.
///
/// The child is owned by a background task that waits for it to exit, so
/// liveness is always known without polling the OS. `terminate` hands that
/// task a shutdown request: SIGTERM (Unix), wait up to `kill_grace`, then kill.
pub struct ProcessWorker {
    // 0 once terminated
    pid: AtomicU32,
    endpoint: watch::Receiver<Option<WorkerEndpoint>>,
    shutdown: CancellationToken,
    exited: CancellationToken,
}

impl ProcessWorker {
    pub fn spawn(
        spec: &LaunchSpec,
        events: mpsc::Sender<WorkerEvent>,
    ) -> Result<Self, WorkerError> {
        let args = protocol::socket_args(&spec.args);
        let mut command = Command::new(&spec.exe_path);
        command
            .args(&args)
            .current_dir(&spec.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(if spec.debug {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| WorkerError::Spawn {
            exe: spec.exe_path.clone(),
            source,
        })?;
        let pid = child.id().unwrap_or_default();

        info!(
            pid,
            exe = %spec.exe_path.display(),
            args = ?args,
            cwd = %spec.cwd.display(),
            "OCR worker spawned"
        );

        let (endpoint_tx, endpoint_rx) = watch::channel(None);
        let shutdown = CancellationToken::new();
        let exited = CancellationToken::new();

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(watch_stdout(
                stdout,
                pid,
                spec.debug,
                endpoint_tx,
                events.clone(),
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, pid, "stderr"));
        }
        tokio::spawn(supervise_exit(
            child,
            spec.kill_grace,
            shutdown.clone(),
            exited.clone(),
            events,
        ));

        Ok(Self {
            pid: AtomicU32::new(pid),
            endpoint: endpoint_rx,
            shutdown,
            exited,
        })
    }

    pub fn endpoint(&self) -> Option<WorkerEndpoint> {
        self.endpoint.borrow().clone()
    }

    pub fn has_exited(&self) -> bool {
        self.exited.is_cancelled()
    }
}

#[async_trait]
impl OcrWorker for ProcessWorker {
    fn pid(&self) -> Option<u32> {
        match self.pid.load(Ordering::Acquire) {
            0 => None,
            pid => Some(pid),
        }
    }

    async fn request(&self, image: &EncodedImage, timeout: Duration) -> Result<Value, WorkerError> {
        if self.exited.is_cancelled() || self.shutdown.is_cancelled() {
            return Err(WorkerError::Exited);
        }
        let endpoint = self.endpoint().ok_or(WorkerError::NotInitialized)?;

        tokio::select! {
            _ = self.exited.cancelled() => Err(WorkerError::Exited),
            reply = tokio::time::timeout(timeout, protocol::round_trip(&endpoint, image)) => {
                reply.map_err(|_| WorkerError::Timeout(timeout))?
            }
        }
    }

    async fn terminate(&self) -> Result<(), WorkerError> {
        let pid = self.pid.swap(0, Ordering::AcqRel);
        if pid != 0 {
            debug!(pid, "Terminating OCR worker");
        }
        self.shutdown.cancel();
        Ok(())
    }
}

impl Drop for ProcessWorker {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Reads stdout for the whole life of the process so the pipe never fills,
/// announcing the endpoint the first time the handshake line shows up.
async fn watch_stdout(
    stdout: impl AsyncRead + Unpin,
    pid: u32,
    forward: bool,
    endpoint: watch::Sender<Option<WorkerEndpoint>>,
    events: mpsc::Sender<WorkerEvent>,
) {
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();
    let mut announced = false;

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                // The engine's console output is not guaranteed to be UTF-8.
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end();
                if forward {
                    debug!(target: "paddle_ocr::worker", pid, "stdout: {}", line);
                }
                if announced {
                    continue;
                }
                if let Some((address, port)) = protocol::parse_init_line(line) {
                    announced = true;
                    let ready = WorkerEndpoint { pid, address, port };
                    endpoint.send_replace(Some(ready.clone()));
                    let _ = events.send(WorkerEvent::Init(ready)).await;
                }
            }
            Err(e) => {
                warn!(pid, error = %e, "Failed to read OCR worker stdout");
                let _ = events
                    .send(WorkerEvent::Error(format!("stdout read failed: {e}")))
                    .await;
                break;
            }
        }
    }
}

async fn forward_lines(stream: impl AsyncRead + Unpin, pid: u32, name: &'static str) {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    while let Ok(n) = reader.read_until(b'\n', &mut buf).await {
        if n == 0 {
            break;
        }
        debug!(target: "paddle_ocr::worker", pid, "{}: {}", name, String::from_utf8_lossy(&buf).trim_end());
        buf.clear();
    }
}

async fn supervise_exit(
    mut child: Child,
    kill_grace: Duration,
    shutdown: CancellationToken,
    exited: CancellationToken,
    events: mpsc::Sender<WorkerEvent>,
) {
    // `Child::wait` closes stdin; the engine must keep it for its whole life.
    let _stdin = child.stdin.take();

    tokio::select! {
        status = child.wait() => {
            exited.cancel();
            let event = match status {
                Ok(status) => {
                    warn!(code = ?status.code(), "OCR worker exited");
                    WorkerEvent::Exit(status.code())
                }
                Err(e) => {
                    error!(error = %e, "Failed to wait on OCR worker");
                    WorkerEvent::Error(format!("wait failed: {e}"))
                }
            };
            let _ = events.send(event).await;
        }
        _ = shutdown.cancelled() => {
            stop_child(&mut child, kill_grace).await;
            exited.cancel();
        }
    }
}

async fn stop_child(child: &mut Child, kill_grace: Duration) {
    request_exit(child);

    match tokio::time::timeout(kill_grace, child.wait()).await {
        Ok(Ok(status)) => debug!(code = ?status.code(), "OCR worker stopped"),
        Ok(Err(e)) => warn!(error = %e, "Failed to wait for OCR worker shutdown"),
        Err(_) => {
            warn!("OCR worker still running after {:?}, killing it", kill_grace);
            if let Err(e) = child.kill().await {
                warn!(error = %e, "Failed to kill OCR worker");
            }
        }
    }
}

#[cfg(unix)]
fn request_exit(child: &mut Child) {
    let Some(pid) = child.id() else {
        return;
    };
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: `pid` is our own child and has not been reaped, since `child.id()` is still Some.
    if unsafe { libc::kill(pid, libc::SIGTERM) } != 0 {
        warn!(pid, error = %std::io::Error::last_os_error(), "Failed to send SIGTERM to OCR worker");
    }
}

#[cfg(not(unix))]
fn request_exit(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        warn!(error = %e, "Failed to stop OCR worker");
    }
}
