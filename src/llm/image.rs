use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use thiserror::Error;

use crate::config::IMAGE_TIMEOUT_SECS;

const DEFAULT_MIME: &str = "image/jpeg";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub mime_type: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("image download failed: {0}")]
    Http(String),
    #[error("image download returned HTTP {0}")]
    Status(u16),
    #[error("invalid inline image data: {0}")]
    Decode(String),
    #[error("image was empty")]
    Empty,
}

/// Turns a listing's image reference into bytes the model can look at.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn load(&self, reference: &str) -> Result<ImagePayload, ImageError>;
}

/// Downloads `http(s)` references; anything else is taken to be base64 image data.
pub struct HttpImageFetcher {
    http: reqwest::Client,
}

impl HttpImageFetcher {
    pub fn new() -> crate::error::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(IMAGE_TIMEOUT_SECS))
            .build()?;
        Ok(Self { http })
    }

    async fn download(&self, url: &str) -> Result<ImagePayload, ImageError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| ImageError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ImageError::Status(response.status().as_u16()));
        }

        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .filter(|v| v.starts_with("image/"))
            .map(|v| v.split(';').next().unwrap_or(DEFAULT_MIME).trim().to_string())
            .unwrap_or_else(|| DEFAULT_MIME.to_string());

        let data = response
            .bytes()
            .await
            .map_err(|e| ImageError::Http(e.to_string()))?
            .to_vec();
        if data.is_empty() {
            return Err(ImageError::Empty);
        }
        Ok(ImagePayload { mime_type, data })
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn load(&self, reference: &str) -> Result<ImagePayload, ImageError> {
        let reference = reference.trim();
        if reference.starts_with("http://") || reference.starts_with("https://") {
            self.download(reference).await
        } else {
            decode_inline(reference)
        }
    }
}

/// Decodes base64 image data, tolerating a `data:<mime>;base64,` prefix.
pub fn decode_inline(raw: &str) -> Result<ImagePayload, ImageError> {
    let (mime_type, encoded) = match raw.strip_prefix("data:").and_then(|rest| rest.split_once(";base64,")) {
        Some((mime, data)) => (mime.to_string(), data),
        None => (DEFAULT_MIME.to_string(), raw),
    };
    let data = BASE64
        .decode(encoded.trim())
        .map_err(|e| ImageError::Decode(e.to_string()))?;
    if data.is_empty() {
        return Err(ImageError::Empty);
    }
    Ok(ImagePayload { mime_type, data })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_plain_and_data_uri_base64() {
        let plain = decode_inline("aGVsbG8=").unwrap();
        assert_eq!(plain.data, b"hello");
        assert_eq!(plain.mime_type, "image/jpeg");

        let uri = decode_inline("data:image/png;base64,aGVsbG8=").unwrap();
        assert_eq!(uri.data, b"hello");
        assert_eq!(uri.mime_type, "image/png");
    }

    #[test]
    fn rejects_garbage_and_empty() {
        assert!(matches!(decode_inline("not base64!!"), Err(ImageError::Decode(_))));
        assert!(matches!(decode_inline(""), Err(ImageError::Empty)));
    }
}
