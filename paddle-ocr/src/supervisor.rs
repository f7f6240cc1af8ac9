//! Worker lifecycle and request admission
//!
//! ```text
//! Stopped --start()--> Starting --Init--> Ready
//!                      Starting --Exit|Error--> Failed
//!                      Ready    --Exit|Error--> Stopped
//! any     --stop()---> Stopped
//! ```
//!
//! Readiness is published through a `watch` channel so any number of
//! `recognize` calls can read it while the worker's event task updates it.
//! The worker handle and readiness are only written with the attachment lock
//! held, and every event task carries the generation of the worker it
//! belongs to, so a detached worker can never flip the state of its successor.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::OcrConfig;
use crate::error::{OcrError, Result};
use crate::image::{ImageReference, ImageResolver};
use crate::recognition::RecognitionResult;
use crate::worker::{
    LaunchSpec, OcrWorker, ProcessLauncher, WorkerEndpoint, WorkerEvent, WorkerLauncher,
    EVENT_CHANNEL_CAPACITY,
};

/// How long `start` waits for the handshake before returning anyway.
pub const INIT_TIMEOUT: Duration = Duration::from_secs(10);
/// Pause after asking the worker to terminate.
pub const STOP_GRACE: Duration = Duration::from_secs(1);
/// How long `recognize` waits for a worker that is still starting.
pub const READY_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Stopped,
    Starting,
    Ready(WorkerEndpoint),
    Failed(String),
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready(_))
    }

    pub fn pid(&self) -> Option<u32> {
        match self {
            Readiness::Ready(endpoint) => Some(endpoint.pid),
            _ => None,
        }
    }
}

struct Attached {
    generation: u64,
    worker: Arc<dyn OcrWorker>,
    events: JoinHandle<()>,
}

struct Shared {
    readiness: watch::Sender<Readiness>,
    attached: Mutex<Option<Attached>>,
}

impl Shared {
    fn lock_attached(&self) -> MutexGuard<'_, Option<Attached>> {
        self.attached.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies one worker notification. Returns `false` once the worker is gone.
    fn apply(&self, generation: u64, event: WorkerEvent) -> bool {
        let mut attached = self.lock_attached();
        if attached.as_ref().map(|a| a.generation) != Some(generation) {
            debug!(generation, "Ignoring event from a detached OCR worker");
            return false;
        }

        let was_starting = matches!(*self.readiness.borrow(), Readiness::Starting);
        let reason = match event {
            WorkerEvent::Init(endpoint) => {
                info!(
                    pid = endpoint.pid,
                    address = %endpoint.address,
                    port = endpoint.port,
                    "OCR worker ready"
                );
                self.readiness.send_replace(Readiness::Ready(endpoint));
                return true;
            }
            WorkerEvent::Exit(code) => {
                warn!(code = ?code, "OCR worker exited unexpectedly");
                format!("worker exited with code {code:?}")
            }
            WorkerEvent::Error(cause) => {
                error!(cause = %cause, "OCR worker failed");
                format!("worker error: {cause}")
            }
        };

        self.readiness.send_replace(if was_starting {
            Readiness::Failed(reason)
        } else {
            Readiness::Stopped
        });
        // Dropping the handle releases the process; a new `start` is needed to recover.
        attached.take();
        false
    }
}

async fn drive_events(
    shared: Arc<Shared>,
    generation: u64,
    mut events: mpsc::Receiver<WorkerEvent>,
) {
    while let Some(event) = events.recv().await {
        if !shared.apply(generation, event) {
            break;
        }
    }
    debug!(generation, "OCR worker event stream closed");
}

pub struct OcrSupervisor {
    config: OcrConfig,
    launcher: Arc<dyn WorkerLauncher>,
    resolver: ImageResolver,
    shared: Arc<Shared>,
    generation: AtomicU64,
    lifecycle: AsyncMutex<()>,
}

impl OcrSupervisor {
    pub fn new(config: OcrConfig) -> Result<Self> {
        Self::with_launcher(config, Arc::new(ProcessLauncher))
    }

    pub fn with_launcher(config: OcrConfig, launcher: Arc<dyn WorkerLauncher>) -> Result<Self> {
        let resolver = ImageResolver::new(config.cwd.clone())?;
        let (readiness, _) = watch::channel(Readiness::Stopped);

        Ok(Self {
            config,
            launcher,
            resolver,
            shared: Arc::new(Shared {
                readiness,
                attached: Mutex::new(None),
            }),
            generation: AtomicU64::new(0),
            lifecycle: AsyncMutex::new(()),
        })
    }

    pub fn config(&self) -> &OcrConfig {
        &self.config
    }

    /// Start a worker and wait for its handshake, at most [`INIT_TIMEOUT`].
    ///
    /// A missing handshake is logged, not returned: the worker stays attached
    /// and becomes ready whenever it does announce itself. Calling `start`
    /// while a worker is attached stops that worker first. A `stop` issued
    /// during the wait ends it early.
    pub async fn start(&self) -> Result<()> {
        let lifecycle = self.lifecycle.lock().await;

        if self.shared.lock_attached().is_some() {
            info!("OCR worker already attached, restarting it");
            self.shutdown_attached().await;
        }

        match tokio::fs::create_dir_all(&self.config.cwd).await {
            Ok(()) => debug!(cwd = %self.config.cwd.display(), "OCR working directory ready"),
            Err(e) => error!(
                cwd = %self.config.cwd.display(),
                error = %e,
                "Failed to create OCR working directory, continuing"
            ),
        }

        let spec = LaunchSpec::from_config(&self.config, STOP_GRACE);
        if !tokio::fs::try_exists(&spec.exe_path).await.unwrap_or(false) {
            warn!(exe = %spec.exe_path.display(), "OCR worker executable not found");
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let mut ready_rx = self.shared.readiness.subscribe();
        self.shared.readiness.send_replace(Readiness::Starting);

        let worker = match self.launcher.launch(&spec, events_tx).await {
            Ok(worker) => worker,
            Err(e) => {
                error!(error = %e, "Failed to launch OCR worker");
                self.shared
                    .readiness
                    .send_replace(Readiness::Failed(e.to_string()));
                return Err(e.into());
            }
        };

        {
            let mut attached = self.shared.lock_attached();
            let events = tokio::spawn(drive_events(self.shared.clone(), generation, events_rx));
            *attached = Some(Attached {
                generation,
                worker,
                events,
            });
        }
        // The handshake wait must not hold off `stop`; stopping moves the
        // state out of `Starting`, which ends the wait below.
        drop(lifecycle);

        let settled = tokio::time::timeout(
            INIT_TIMEOUT,
            ready_rx.wait_for(|state| !matches!(state, Readiness::Starting)),
        )
        .await;

        match settled {
            Ok(Ok(state)) if state.is_ready() => {
                debug!(pid = ?state.pid(), "OCR worker handshake completed");
            }
            Ok(Ok(state)) if *state == Readiness::Stopped => {
                info!("OCR worker stopped before its handshake");
            }
            Ok(Ok(state)) => warn!(state = ?*state, "OCR worker did not come up"),
            Ok(Err(_)) => warn!("Readiness channel closed during start"),
            Err(_) => warn!(
                "OCR worker did not complete its handshake within {:?}, continuing without it",
                INIT_TIMEOUT
            ),
        }

        Ok(())
    }

    /// Terminate the worker, if any. Never fails; cleanup errors are logged.
    pub async fn stop(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        self.shutdown_attached().await;
    }

    async fn shutdown_attached(&self) {
        let attached = self.shared.lock_attached().take();
        let Some(attached) = attached else {
            self.shared.readiness.send_if_modified(|state| {
                let changed = *state != Readiness::Stopped;
                *state = Readiness::Stopped;
                changed
            });
            return;
        };

        info!(pid = ?attached.worker.pid(), "Stopping OCR worker");
        if let Err(e) = attached.worker.terminate().await {
            warn!(error = %e, "Failed to terminate OCR worker, cleaning up anyway");
        }
        tokio::time::sleep(STOP_GRACE).await;

        attached.events.abort();
        self.shared.readiness.send_replace(Readiness::Stopped);
        info!("OCR worker stopped");
    }

    /// Attached and past the handshake.
    pub fn is_ready(&self) -> bool {
        self.ready_worker().is_some()
    }

    pub fn status(&self) -> Readiness {
        self.shared.readiness.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Readiness> {
        self.shared.readiness.subscribe()
    }

    /// Recognize the text in one image.
    ///
    /// Fails with [`OcrError::NotReady`] before touching the image when no
    /// worker is ready. Every later failure is wrapped in
    /// [`OcrError::RecognitionFailed`].
    pub async fn recognize(&self, reference: &ImageReference) -> Result<String> {
        let worker = self.admit().await?;
        self.run(worker.as_ref(), reference)
            .await
            .map_err(OcrError::into_recognition_failure)
    }

    async fn run(&self, worker: &dyn OcrWorker, reference: &ImageReference) -> Result<String> {
        let image = self.resolver.resolve(reference).await?;
        let value = worker.request(&image, self.config.timeout()).await?;
        Ok(RecognitionResult::from_value(value).into_text())
    }

    async fn admit(&self) -> Result<Arc<dyn OcrWorker>> {
        let mut readiness = self.shared.readiness.subscribe();
        let starting = matches!(*readiness.borrow_and_update(), Readiness::Starting);

        if starting {
            debug!("OCR worker still starting, waiting up to {:?}", READY_GRACE);
            let _ = tokio::time::timeout(
                READY_GRACE,
                readiness.wait_for(|state| !matches!(state, Readiness::Starting)),
            )
            .await;
        }

        self.ready_worker().ok_or(OcrError::NotReady)
    }

    fn ready_worker(&self) -> Option<Arc<dyn OcrWorker>> {
        let attached = self.shared.lock_attached();
        let ready = self.shared.readiness.borrow().is_ready();
        match attached.as_ref() {
            Some(attached) if ready => Some(attached.worker.clone()),
            _ => None,
        }
    }
}

impl Drop for OcrSupervisor {
    fn drop(&mut self) {
        if let Some(attached) = self.shared.lock_attached().take() {
            attached.events.abort();
        }
    }
}
