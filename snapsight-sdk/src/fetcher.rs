// ABOUTME: Loads image content for inline delivery from the web, local files or memory
// ABOUTME: Enforces timeouts, size limits, content-type and signature checks before encoding

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures_util::StreamExt;
use reqwest::Client;
use std::time::Duration;
use url::Url;

use crate::constants::{limits, timeouts};
use crate::error::SnapError;
use crate::image::{ImageRef, ImageSource};
use crate::message::OutboundMessage;

#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<Vec<u8>, SnapError>;
}

pub struct HttpImageFetcher {
    client: Client,
    max_size: u64,
}

impl HttpImageFetcher {
    pub fn new() -> Result<Self, SnapError> {
        Self::with_timeout(timeouts::IMAGE_DOWNLOAD_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, SnapError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("snapsight/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::limited(3))
            .build()
            .map_err(|e| SnapError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            max_size: limits::MAX_IMAGE_SIZE,
        })
    }

    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = max_size;
        self
    }

    fn validate_content_type(
        &self,
        response: &reqwest::Response,
        url: &Url,
    ) -> Result<(), SnapError> {
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|ct| ct.to_str().ok())
            .unwrap_or("unknown");

        if content_type.starts_with("image/") {
            Ok(())
        } else {
            Err(SnapError::Image(format!(
                "URL does not serve image content (content-type: {}): {}",
                content_type, url
            )))
        }
    }

    async fn download_body_with_limit(
        &self,
        response: reqwest::Response,
        url: &Url,
    ) -> Result<Vec<u8>, SnapError> {
        if let Some(content_length) = response.content_length() {
            if content_length > self.max_size {
                return Err(too_large(content_length, self.max_size, url));
            }
        }

        let mut bytes = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            bytes.extend_from_slice(&chunk?);
            if bytes.len() as u64 > self.max_size {
                return Err(too_large(bytes.len() as u64, self.max_size, url));
            }
        }
        Ok(bytes)
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &Url) -> Result<Vec<u8>, SnapError> {
        log::debug!("Downloading {} for inline delivery", url);
        let response = self.client.get(url.clone()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SnapError::Http {
                status: status.as_u16(),
                message: format!("image download failed: {}", url),
            });
        }

        self.validate_content_type(&response, url)?;
        let bytes = self.download_body_with_limit(response, url).await?;
        if sniff_mime(&bytes).is_none() {
            return Err(SnapError::Image(format!(
                "Content does not appear to be a valid image: {}",
                url
            )));
        }
        Ok(bytes)
    }
}

fn too_large(size: u64, max: u64, url: &Url) -> SnapError {
    SnapError::Image(format!(
        "Image too large: {} bytes (max: {} bytes): {}",
        size, max, url
    ))
}

/// MIME type from the leading bytes of common image formats
pub fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
        Some("image/png")
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some("image/gif")
    } else if bytes.len() >= 12 && bytes.starts_with(b"RIFF") && &bytes[8..12] == b"WEBP" {
        Some("image/webp")
    } else if bytes.starts_with(b"BM") {
        Some("image/bmp")
    } else if bytes.starts_with(b"II*\0") || bytes.starts_with(b"MM\0*") {
        Some("image/tiff")
    } else {
        None
    }
}

/// Build the one-shot inline message for an image.
///
/// Remote images are sent as a data URL with `originalUrl` so results can be matched
/// back; local files and in-memory bytes are sent as bare base64 with `originalName`.
pub async fn inline_message(
    fetcher: &dyn ImageFetcher,
    image: &ImageRef,
) -> Result<OutboundMessage, SnapError> {
    match &image.source {
        ImageSource::Remote(url) => {
            let bytes = fetcher.fetch(url).await?;
            let mime = sniff_mime(&bytes).ok_or_else(|| {
                SnapError::Image(format!("Content does not appear to be a valid image: {}", url))
            })?;
            Ok(OutboundMessage::ImageBase64 {
                data: format!("data:{};base64,{}", mime, STANDARD.encode(&bytes)),
                original_url: Some(url.to_string()),
                original_name: None,
            })
        }
        ImageSource::Local(path) => {
            let size = tokio::fs::metadata(path).await?.len();
            if size > limits::MAX_IMAGE_SIZE {
                return Err(SnapError::Image(format!(
                    "Image too large: {} bytes (max: {} bytes): {}",
                    size,
                    limits::MAX_IMAGE_SIZE,
                    path.display()
                )));
            }
            let bytes = tokio::fs::read(path).await?;
            encode_named(&bytes, image.source.label())
        }
        ImageSource::Bytes { name, data } => {
            if data.len() as u64 > limits::MAX_IMAGE_SIZE {
                return Err(SnapError::Image(format!(
                    "Image too large: {} bytes (max: {} bytes): {}",
                    data.len(),
                    limits::MAX_IMAGE_SIZE,
                    name
                )));
            }
            encode_named(data, name.clone())
        }
    }
}

fn encode_named(bytes: &[u8], name: String) -> Result<OutboundMessage, SnapError> {
    if sniff_mime(bytes).is_none() {
        return Err(SnapError::Image(format!(
            "File does not appear to be a valid image: {}",
            name
        )));
    }
    Ok(OutboundMessage::ImageBase64 {
        data: STANDARD.encode(bytes),
        original_url: None,
        original_name: Some(name),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::mock_api_server;
    use std::path::PathBuf;

    const PNG: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D];

    struct StaticFetcher(Vec<u8>);

    #[async_trait]
    impl ImageFetcher for StaticFetcher {
        async fn fetch(&self, _url: &Url) -> Result<Vec<u8>, SnapError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_sniff_mime() {
        assert_eq!(sniff_mime(PNG), Some("image/png"));
        assert_eq!(sniff_mime(&[0xFF, 0xD8, 0xFF, 0xE0]), Some("image/jpeg"));
        assert_eq!(sniff_mime(b"GIF89a......"), Some("image/gif"));
        assert_eq!(sniff_mime(b"RIFF\0\0\0\0WEBPVP8 "), Some("image/webp"));
        assert_eq!(sniff_mime(b"<html></html>"), None);
        assert_eq!(sniff_mime(&[]), None);
    }

    #[tokio::test]
    async fn test_fetch_valid_image() {
        let mut server = mock_api_server().await;
        let mock = server
            .mock("GET", "/photos/a.png")
            .with_status(200)
            .with_header("content-type", "image/png")
            .with_body(PNG)
            .create_async()
            .await;

        let fetcher = HttpImageFetcher::new().unwrap();
        let url = Url::parse(&format!("{}/photos/a.png", server.url())).unwrap();
        let bytes = fetcher.fetch(&url).await.unwrap();

        assert_eq!(bytes, PNG);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_rejects_non_image_content_type() {
        let mut server = mock_api_server().await;
        server
            .mock("GET", "/page")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body("<html></html>")
            .create_async()
            .await;

        let fetcher = HttpImageFetcher::new().unwrap();
        let url = Url::parse(&format!("{}/page", server.url())).unwrap();
        assert!(matches!(fetcher.fetch(&url).await, Err(SnapError::Image(_))));
    }

    #[tokio::test]
    async fn test_fetch_enforces_size_limit() {
        let mut server = mock_api_server().await;
        let mut body = PNG.to_vec();
        body.resize(4096, 0);
        server
            .mock("GET", "/big.png")
            .with_status(200)
            .with_header("content-type", "image/png")
            .with_body(body)
            .create_async()
            .await;

        let fetcher = HttpImageFetcher::new().unwrap().with_max_size(1024);
        let url = Url::parse(&format!("{}/big.png", server.url())).unwrap();
        let err = fetcher.fetch(&url).await.unwrap_err();
        assert!(err.to_string().contains("too large"));
    }

    #[tokio::test]
    async fn test_fetch_rejects_bad_signature() {
        let mut server = mock_api_server().await;
        server
            .mock("GET", "/fake.png")
            .with_status(200)
            .with_header("content-type", "image/png")
            .with_body("definitely not a png")
            .create_async()
            .await;

        let fetcher = HttpImageFetcher::new().unwrap();
        let url = Url::parse(&format!("{}/fake.png", server.url())).unwrap();
        assert!(matches!(fetcher.fetch(&url).await, Err(SnapError::Image(_))));
    }

    #[tokio::test]
    async fn test_fetch_http_error_status() {
        let mut server = mock_api_server().await;
        server
            .mock("GET", "/gone.png")
            .with_status(404)
            .create_async()
            .await;

        let fetcher = HttpImageFetcher::new().unwrap();
        let url = Url::parse(&format!("{}/gone.png", server.url())).unwrap();
        assert!(matches!(
            fetcher.fetch(&url).await,
            Err(SnapError::Http { status: 404, .. })
        ));
    }

    #[tokio::test]
    async fn test_inline_remote_is_data_url() {
        let image = ImageRef::new(ImageSource::Remote(
            Url::parse("https://cdn.test/a.png?sig=1").unwrap(),
        ));
        let message = inline_message(&StaticFetcher(PNG.to_vec()), &image)
            .await
            .unwrap();

        match message {
            OutboundMessage::ImageBase64 {
                data,
                original_url,
                original_name,
            } => {
                assert!(data.starts_with("data:image/png;base64,"));
                assert_eq!(original_url.as_deref(), Some("https://cdn.test/a.png?sig=1"));
                assert_eq!(original_name, None);
            }
            other => panic!("Expected inline message, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_inline_local_file_is_bare_base64() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lunch.png");
        std::fs::write(&path, PNG).unwrap();

        let image = ImageRef::new(ImageSource::Local(path));
        let message = inline_message(&StaticFetcher(Vec::new()), &image)
            .await
            .unwrap();

        assert_eq!(
            message,
            OutboundMessage::ImageBase64 {
                data: STANDARD.encode(PNG),
                original_url: None,
                original_name: Some("lunch.png".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_inline_rejects_non_image_bytes() {
        let image = ImageRef::new(ImageSource::Bytes {
            name: "notes.txt".to_string(),
            data: b"hello world".to_vec(),
        });
        let result = inline_message(&StaticFetcher(Vec::new()), &image).await;
        assert!(matches!(result, Err(SnapError::Image(_))));
    }

    #[tokio::test]
    async fn test_inline_missing_local_file() {
        let image = ImageRef::new(ImageSource::Local(PathBuf::from(
            "/nonexistent/snapsight/photo.png",
        )));
        let result = inline_message(&StaticFetcher(Vec::new()), &image).await;
        assert!(matches!(result, Err(SnapError::Io(_))));
    }
}
