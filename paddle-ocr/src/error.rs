use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failures while turning an image reference into an encoded data URI.
#[derive(Error, Debug)]
pub enum ImageError {
    #[error("Inline image is not a base64 data URI")]
    MalformedInline,

    #[error("Invalid image URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Image request failed with status {0}")]
    Status(u16),

    #[error("Image request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Image request failed: {0}")]
    Network(#[source] reqwest::Error),

    #[error("Image file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to read image file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures raised by a worker process or its transport.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn {}: {source}", exe.display())]
    Spawn {
        exe: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Worker has not completed its init handshake")]
    NotInitialized,

    #[error("Worker did not answer within {0:?}")]
    Timeout(Duration),

    #[error("Worker process exited")]
    Exited,

    #[error("Worker transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("Malformed worker response: {0}")]
    Protocol(String),

    #[error("OCR engine error {code}: {message}")]
    Engine { code: i64, message: String },
}

#[derive(Error, Debug)]
pub enum OcrError {
    #[error("Failed to start OCR worker: {0}")]
    SpawnFailure(#[source] WorkerError),

    #[error("OCR service not ready")]
    NotReady,

    #[error(transparent)]
    ImageFetch(#[from] ImageError),

    #[error("OCR request timed out after {0:?}")]
    RequestTimeout(Duration),

    #[error("OCR worker exited")]
    ProcessExited,

    #[error("OCR worker error: {0}")]
    ProcessError(String),

    #[error("recognition failed: {0}")]
    RecognitionFailed(#[source] Box<OcrError>),
}

impl From<WorkerError> for OcrError {
    fn from(err: WorkerError) -> Self {
        match err {
            WorkerError::Spawn { .. } => OcrError::SpawnFailure(err),
            WorkerError::Timeout(after) => OcrError::RequestTimeout(after),
            WorkerError::Exited => OcrError::ProcessExited,
            other => OcrError::ProcessError(other.to_string()),
        }
    }
}

impl OcrError {
    /// Wraps a pipeline failure for the boundary, leaving admission errors untouched.
    pub fn into_recognition_failure(self) -> Self {
        match self {
            OcrError::NotReady | OcrError::RecognitionFailed(_) => self,
            other => OcrError::RecognitionFailed(Box::new(other)),
        }
    }

    /// The innermost error, looking through `RecognitionFailed`.
    pub fn cause(&self) -> &OcrError {
        match self {
            OcrError::RecognitionFailed(inner) => inner.cause(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, OcrError>;
