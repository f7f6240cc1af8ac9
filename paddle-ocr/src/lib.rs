//! Supervised PaddleOCR-json worker with a request/response recognition API.
//!
//! - [`image`] turns URLs, paths and inline data into one base64 data URI
//! - [`worker`] spawns the engine process and speaks its socket protocol
//! - [`supervisor`] owns the worker lifecycle and gates requests on readiness
//! - [`service`] is the text-in, text-out command surface
//!
//! ```rust,ignore
//! let supervisor = OcrSupervisor::new(Config::from_env().ocr)?;
//! supervisor.start().await?;
//! let text = supervisor.recognize(&ImageReference::parse("scan.png")).await?;
//! supervisor.stop().await;
//! ```

pub mod config;
pub mod error;
pub mod image;
pub mod recognition;
pub mod service;
pub mod supervisor;
pub mod worker;

pub use config::{Config, OcrConfig};
pub use error::{ImageError, OcrError, Result, WorkerError};
pub use image::{EncodedImage, ImageReference, ImageResolver};
pub use recognition::{RecognitionResult, Region};
pub use service::RecognitionService;
pub use supervisor::{OcrSupervisor, Readiness};
