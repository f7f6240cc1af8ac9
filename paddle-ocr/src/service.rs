use std::sync::{Arc, OnceLock};

use regex::Regex;
use tracing::{debug, warn};

use crate::error::OcrError;
use crate::image::ImageReference;
use crate::supervisor::OcrSupervisor;

pub const NO_IMAGE: &str = "please provide an image";
pub const NOT_READY: &str = "service not ready";
pub const NO_TEXT: &str = "no text recognized";

fn img_src_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?i)<img\b[^>]*?\bsrc\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
            .expect("img pattern is valid")
    })
}

fn unescape_attr(value: &str) -> String {
    value
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// The `src` of the first `<img>` element in a message.
pub fn first_image_src(content: &str) -> Option<String> {
    let caps = img_src_pattern().captures(content)?;
    let src = caps.get(1).or_else(|| caps.get(2))?.as_str().trim();
    (!src.is_empty()).then(|| unescape_attr(src))
}

/// Pick the image for a command: the explicit URL option wins over an attachment.
pub fn select_image(url: Option<&str>, content: &str) -> Option<ImageReference> {
    url.map(str::trim)
        .filter(|url| !url.is_empty())
        .map(ImageReference::parse)
        .or_else(|| first_image_src(content).map(|src| ImageReference::parse(&src)))
}

/// The "recognize image" command. Always answers with text.
#[derive(Clone)]
pub struct RecognitionService {
    supervisor: Arc<OcrSupervisor>,
}

impl RecognitionService {
    pub fn new(supervisor: Arc<OcrSupervisor>) -> Self {
        Self { supervisor }
    }

    pub async fn handle(&self, url: Option<&str>, content: &str) -> String {
        let Some(reference) = select_image(url, content) else {
            return NO_IMAGE.to_string();
        };
        debug!(reference = ?reference, "Recognition requested");

        match self.supervisor.recognize(&reference).await {
            Ok(text) if text.trim().is_empty() => NO_TEXT.to_string(),
            Ok(text) => text,
            Err(e) => render_error(&e),
        }
    }
}

pub fn render_error(err: &OcrError) -> String {
    match err {
        OcrError::NotReady => NOT_READY.to_string(),
        OcrError::RecognitionFailed(_) => {
            warn!(error = %err, "Recognition failed");
            err.to_string()
        }
        other => {
            warn!(error = %other, "Recognition failed");
            format!("recognition failed: {other}")
        }
    }
}
