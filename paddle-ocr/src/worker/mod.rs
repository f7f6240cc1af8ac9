//! OCR worker processes
//!
//! A worker is one external engine instance. It reports its lifecycle over a
//! bounded channel of [`WorkerEvent`]s and answers recognition requests once
//! it has announced itself with [`WorkerEvent::Init`].
//!
//! The supervisor only talks to the [`OcrWorker`] and [`WorkerLauncher`]
//! traits; [`ProcessLauncher`] is the implementation that spawns a real
//! PaddleOCR-json binary.

mod process;
pub mod protocol;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::config::OcrConfig;
use crate::error::WorkerError;
use crate::image::EncodedImage;

pub use process::{ProcessLauncher, ProcessWorker};

/// Capacity of the notification channel between a worker and its supervisor.
pub const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Where an initialized worker accepts requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerEndpoint {
    pub pid: u32,
    pub address: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// Handshake completed; fires at most once per worker.
    Init(WorkerEndpoint),
    Exit(Option<i32>),
    Error(String),
}

/// How to start a worker.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub exe_path: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub debug: bool,
    /// How long `terminate` waits for a polite exit before killing.
    pub kill_grace: Duration,
}

impl LaunchSpec {
    pub fn from_config(config: &OcrConfig, kill_grace: Duration) -> Self {
        Self {
            exe_path: config.resolve_exe_path(),
            args: config.args.clone(),
            cwd: config.cwd.clone(),
            debug: config.debug,
            kill_grace,
        }
    }
}

#[async_trait]
pub trait OcrWorker: Send + Sync {
    /// OS process id, `None` once terminated.
    fn pid(&self) -> Option<u32>;

    /// One recognition round trip. Returns the engine's structured output.
    async fn request(&self, image: &EncodedImage, timeout: Duration) -> Result<Value, WorkerError>;

    /// Ask the worker to stop. Returns without waiting for the exit.
    async fn terminate(&self) -> Result<(), WorkerError>;
}

#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn launch(
        &self,
        spec: &LaunchSpec,
        events: mpsc::Sender<WorkerEvent>,
    ) -> Result<Arc<dyn OcrWorker>, WorkerError>;
}
