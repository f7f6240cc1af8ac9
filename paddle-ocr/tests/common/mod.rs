// Common test utilities for integration tests
#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use paddle_ocr::image::EncodedImage;
use paddle_ocr::worker::{LaunchSpec, OcrWorker, WorkerEndpoint, WorkerEvent, WorkerLauncher};
use paddle_ocr::{OcrConfig, WorkerError};

static INIT: Once = Once::new();

/// Initialize tracing subscriber once for tests
pub fn init_test_logger() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

pub const STUB_PID: u32 = 4242;

#[derive(Debug, Clone)]
pub enum StubReply {
    Value(Value),
    EngineError(String),
    /// Never answers; the caller's timeout decides.
    Hang,
}

/// In-process stand-in for the engine. Announces itself after `init_after`
/// (or never) and answers every request with the configured reply.
pub struct StubLauncher {
    init_after: Option<Duration>,
    reply: Mutex<StubReply>,
    fail_launch: bool,
    pub launches: AtomicUsize,
    pub terminations: Arc<AtomicUsize>,
    pub requests: Arc<AtomicUsize>,
    events: Mutex<Option<mpsc::Sender<WorkerEvent>>>,
}

impl StubLauncher {
    pub fn new(init_after: Option<Duration>, reply: StubReply) -> Arc<Self> {
        Self::build(init_after, reply, false)
    }

    /// A launcher whose spawn always fails.
    pub fn failing() -> Arc<Self> {
        Self::build(None, StubReply::Hang, true)
    }

    fn build(init_after: Option<Duration>, reply: StubReply, fail_launch: bool) -> Arc<Self> {
        Arc::new(Self {
            init_after,
            reply: Mutex::new(reply),
            fail_launch,
            launches: AtomicUsize::new(0),
            terminations: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(AtomicUsize::new(0)),
            events: Mutex::new(None),
        })
    }

    pub fn set_reply(&self, reply: StubReply) {
        *self.reply.lock().unwrap() = reply;
    }

    /// Push a notification as if the current worker had sent it.
    pub async fn emit(&self, event: WorkerEvent) {
        let tx = self.events.lock().unwrap().clone().expect("no worker launched");
        tx.send(event).await.expect("supervisor stopped listening");
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn terminations(&self) -> usize {
        self.terminations.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkerLauncher for StubLauncher {
    async fn launch(
        &self,
        spec: &LaunchSpec,
        events: mpsc::Sender<WorkerEvent>,
    ) -> Result<Arc<dyn OcrWorker>, WorkerError> {
        if self.fail_launch {
            return Err(WorkerError::Spawn {
                exe: spec.exe_path.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            });
        }

        self.launches.fetch_add(1, Ordering::SeqCst);
        *self.events.lock().unwrap() = Some(events.clone());

        if let Some(delay) = self.init_after {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = events
                    .send(WorkerEvent::Init(WorkerEndpoint {
                        pid: STUB_PID,
                        address: "127.0.0.1".to_string(),
                        port: 9000,
                    }))
                    .await;
            });
        }

        Ok(Arc::new(StubWorker {
            reply: self.reply.lock().unwrap().clone(),
            terminated: CancellationToken::new(),
            terminations: self.terminations.clone(),
            requests: self.requests.clone(),
        }))
    }
}

struct StubWorker {
    reply: StubReply,
    // Pending and later requests fail once terminated, like a real process.
    terminated: CancellationToken,
    terminations: Arc<AtomicUsize>,
    requests: Arc<AtomicUsize>,
}

#[async_trait]
impl OcrWorker for StubWorker {
    fn pid(&self) -> Option<u32> {
        Some(STUB_PID)
    }

    async fn request(&self, image: &EncodedImage, timeout: Duration) -> Result<Value, WorkerError> {
        assert!(image.as_str().starts_with("data:"));
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.terminated.is_cancelled() {
            return Err(WorkerError::Exited);
        }
        match &self.reply {
            StubReply::Value(value) => Ok(value.clone()),
            StubReply::EngineError(message) => Err(WorkerError::Engine {
                code: 200,
                message: message.clone(),
            }),
            StubReply::Hang => tokio::select! {
                _ = self.terminated.cancelled() => Err(WorkerError::Exited),
                _ = tokio::time::sleep(timeout) => Err(WorkerError::Timeout(timeout)),
            },
        }
    }

    async fn terminate(&self) -> Result<(), WorkerError> {
        self.terminations.fetch_add(1, Ordering::SeqCst);
        self.terminated.cancel();
        Ok(())
    }
}

pub fn test_config(dir: &Path) -> OcrConfig {
    let mut config = OcrConfig::with_base_dir(dir);
    config.exe_path = "PaddleOCR-json".to_string();
    config
}
