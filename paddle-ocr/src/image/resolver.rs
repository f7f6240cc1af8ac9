use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::{header, Client, StatusCode};
use tracing::debug;
use url::Url;

use crate::error::ImageError;

use super::{mime_from_content_type, mime_from_path, EncodedImage, ImageReference};

/// Connect and response timeout for remote images.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

#[derive(Clone, Debug)]
pub struct ImageResolver {
    client: Client,
    working_dir: PathBuf,
    fetch_timeout: Duration,
}

impl ImageResolver {
    pub fn new(working_dir: impl Into<PathBuf>) -> Result<Self, ImageError> {
        Self::with_timeout(working_dir, FETCH_TIMEOUT)
    }

    pub fn with_timeout(
        working_dir: impl Into<PathBuf>,
        fetch_timeout: Duration,
    ) -> Result<Self, ImageError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(fetch_timeout)
            .timeout(fetch_timeout)
            .build()
            .map_err(ImageError::Network)?;

        Ok(Self {
            client,
            working_dir: working_dir.into(),
            fetch_timeout,
        })
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub async fn resolve(&self, reference: &ImageReference) -> Result<EncodedImage, ImageError> {
        match reference {
            ImageReference::InlineEncoded(uri) => {
                EncodedImage::from_data_uri(uri.as_str()).ok_or(ImageError::MalformedInline)
            }
            ImageReference::RemoteUrl(url) => self.fetch_remote(url).await,
            ImageReference::LocalPath(path) => self.read_local(Path::new(path)).await,
        }
    }

    async fn fetch_remote(&self, raw_url: &str) -> Result<EncodedImage, ImageError> {
        let url = Url::parse(raw_url)?;
        debug!(url = %url, "Fetching remote image");

        // The client timeout drops the connection, so a timed out fetch does not linger.
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        if response.status() != StatusCode::OK {
            return Err(ImageError::Status(response.status().as_u16()));
        }

        let mime = mime_from_content_type(
            response
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
        );
        let bytes = response.bytes().await.map_err(|e| self.classify(e))?;

        debug!(bytes = bytes.len(), mime = %mime, "Remote image fetched");
        Ok(EncodedImage::from_base64(&mime, &STANDARD.encode(&bytes)))
    }

    async fn read_local(&self, path: &Path) -> Result<EncodedImage, ImageError> {
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.working_dir.join(path)
        };

        match tokio::fs::try_exists(&path).await {
            Ok(true) => {}
            Ok(false) => return Err(ImageError::NotFound(path)),
            Err(source) => return Err(ImageError::Read { path, source }),
        }

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|source| ImageError::Read {
                path: path.clone(),
                source,
            })?;

        Ok(EncodedImage::from_base64(
            mime_from_path(&path),
            &STANDARD.encode(bytes),
        ))
    }

    fn classify(&self, err: reqwest::Error) -> ImageError {
        if err.is_timeout() {
            ImageError::Timeout(self.fetch_timeout)
        } else {
            ImageError::Network(err)
        }
    }
}
