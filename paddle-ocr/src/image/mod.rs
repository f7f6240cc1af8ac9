//! Image acquisition
//!
//! Every image handed to the worker travels as a self-describing data URI
//! (`data:<mime>;base64,<payload>`). The boundary classifies the caller's raw
//! string into an [`ImageReference`] once; [`ImageResolver`] then handles each
//! of the three shapes in its own branch:
//!
//! - `InlineEncoded`: already canonical, returned as-is
//! - `RemoteUrl`: fetched over HTTP(S) and encoded with the response content type
//! - `LocalPath`: read from disk, MIME type chosen from the file extension

mod resolver;

use std::fmt;
use std::path::Path;

pub use resolver::{ImageResolver, FETCH_TIMEOUT, USER_AGENT};

const BASE64_MARKER: &str = ";base64,";

/// Fallback MIME type when neither a header nor an extension says otherwise.
pub const DEFAULT_MIME: &str = "image/png";

/// The part after a `data:` scheme, matched case-insensitively.
fn strip_data_scheme(uri: &str) -> Option<&str> {
    let scheme = uri.get(..5)?;
    scheme.eq_ignore_ascii_case("data:").then(|| &uri[5..])
}

fn is_base64_data_uri(uri: &str) -> bool {
    strip_data_scheme(uri).is_some_and(|rest| rest.contains(BASE64_MARKER))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageReference {
    InlineEncoded(String),
    RemoteUrl(String),
    LocalPath(String),
}

impl ImageReference {
    /// Classify a raw reference by its prefix.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        let lower = raw.to_ascii_lowercase();
        if is_base64_data_uri(raw) {
            ImageReference::InlineEncoded(raw.to_string())
        } else if lower.starts_with("http://") || lower.starts_with("https://") {
            ImageReference::RemoteUrl(raw.to_string())
        } else {
            ImageReference::LocalPath(raw.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ImageReference::InlineEncoded(s)
            | ImageReference::RemoteUrl(s)
            | ImageReference::LocalPath(s) => s,
        }
    }
}

/// A base64 data URI, the only image form the worker accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage(String);

impl EncodedImage {
    /// Accepts an existing data URI; `None` if it lacks the base64 marker.
    pub fn from_data_uri(uri: impl Into<String>) -> Option<Self> {
        let uri = uri.into();
        is_base64_data_uri(&uri).then_some(Self(uri))
    }

    pub fn from_base64(mime: &str, payload: &str) -> Self {
        Self(format!("data:{mime}{BASE64_MARKER}{payload}"))
    }

    pub fn mime(&self) -> &str {
        strip_data_scheme(&self.0)
            .and_then(|rest| rest.split_once(BASE64_MARKER))
            .map(|(mime, _)| mime)
            .unwrap_or(DEFAULT_MIME)
    }

    /// The raw base64 payload after the marker.
    pub fn payload(&self) -> &str {
        self.0
            .split_once(BASE64_MARKER)
            .map(|(_, payload)| payload)
            .unwrap_or_default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for EncodedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// MIME type for a local file, by extension.
pub fn mime_from_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        _ => DEFAULT_MIME,
    }
}

/// MIME type from a `Content-Type` header value, dropping parameters.
pub fn mime_from_content_type(header: Option<&str>) -> String {
    header
        .and_then(|value| value.split(';').next())
        .map(str::trim)
        .filter(|mime| !mime.is_empty())
        .unwrap_or(DEFAULT_MIME)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_classifies_by_prefix() {
        assert_eq!(
            ImageReference::parse("data:image/png;base64,AAAA"),
            ImageReference::InlineEncoded("data:image/png;base64,AAAA".to_string())
        );
        assert_eq!(
            ImageReference::parse("https://example.com/a.png"),
            ImageReference::RemoteUrl("https://example.com/a.png".to_string())
        );
        assert_eq!(
            ImageReference::parse("HTTP://example.com/a.png"),
            ImageReference::RemoteUrl("HTTP://example.com/a.png".to_string())
        );
        assert_eq!(
            ImageReference::parse("images/a.png"),
            ImageReference::LocalPath("images/a.png".to_string())
        );
    }

    #[test]
    fn test_data_uri_without_marker_is_a_path() {
        assert!(matches!(
            ImageReference::parse("data:image/png,rawbytes"),
            ImageReference::LocalPath(_)
        ));
    }

    #[test]
    fn test_encoded_image_parts() {
        let image = EncodedImage::from_base64("image/jpeg", "QUJD");
        assert_eq!(image.as_str(), "data:image/jpeg;base64,QUJD");
        assert_eq!(image.mime(), "image/jpeg");
        assert_eq!(image.payload(), "QUJD");
    }

    #[test]
    fn test_data_scheme_is_case_insensitive() {
        let raw = "DATA:image/png;base64,AAAA";
        assert_eq!(
            ImageReference::parse(raw),
            ImageReference::InlineEncoded(raw.to_string())
        );
        let image = EncodedImage::from_data_uri(raw).unwrap();
        assert_eq!(image.as_str(), raw);
        assert_eq!(image.mime(), "image/png");
        assert_eq!(image.payload(), "AAAA");
        assert!(EncodedImage::from_data_uri("Data:image/gif;base64,R0lG").is_some());
    }

    #[test]
    fn test_from_data_uri_requires_marker() {
        assert!(EncodedImage::from_data_uri("data:image/png;base64,AAAA").is_some());
        assert!(EncodedImage::from_data_uri("data:image/png,AAAA").is_none());
        assert!(EncodedImage::from_data_uri("AAAA").is_none());
    }

    #[test]
    fn test_mime_from_path() {
        assert_eq!(mime_from_path(Path::new("a.png")), "image/png");
        assert_eq!(mime_from_path(Path::new("a.JPG")), "image/jpeg");
        assert_eq!(mime_from_path(Path::new("a.jpeg")), "image/jpeg");
        assert_eq!(mime_from_path(Path::new("a.gif")), "image/gif");
        assert_eq!(mime_from_path(Path::new("a.webp")), "image/png");
        assert_eq!(mime_from_path(Path::new("noext")), "image/png");
    }

    #[test]
    fn test_mime_from_content_type() {
        assert_eq!(mime_from_content_type(Some("image/jpeg")), "image/jpeg");
        assert_eq!(
            mime_from_content_type(Some("image/webp; charset=binary")),
            "image/webp"
        );
        assert_eq!(mime_from_content_type(Some("")), "image/png");
        assert_eq!(mime_from_content_type(None), "image/png");
    }
}
