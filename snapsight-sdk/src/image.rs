// ABOUTME: Image references, observed candidates and session-scoped identity keys
// ABOUTME: Normalizes URLs so the same picture is recognized regardless of query strings or case

use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use url::Url;

/// Where an image's content lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// Reachable by the server; delivered by reference first
    Remote(Url),
    /// A file on this machine; always delivered inline
    Local(PathBuf),
    /// Content already in memory; always delivered inline
    Bytes { name: String, data: Vec<u8> },
}

impl ImageSource {
    /// Human-readable reference used in logs and outbound `originalName`/`originalUrl`
    pub fn label(&self) -> String {
        match self {
            ImageSource::Remote(url) => url.to_string(),
            ImageSource::Local(path) => path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_else(|| path.display().to_string()),
            ImageSource::Bytes { name, .. } => name.clone(),
        }
    }
}

impl fmt::Display for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageSource::Remote(url) => write!(f, "{}", url),
            ImageSource::Local(path) => write!(f, "{}", path.display()),
            ImageSource::Bytes { name, data } => write!(f, "{} ({} bytes)", name, data.len()),
        }
    }
}

/// One image node reported by a content observer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCandidate {
    /// Stable identity of the node inside its root
    pub node: String,
    /// Changes whenever the node's relevant attributes change
    pub fingerprint: String,
    pub source: ImageSource,
}

/// An image the dispatcher has accepted for delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub source: ImageSource,
    pub key: String,
    pub retry_count: u32,
}

impl ImageRef {
    pub fn new(source: ImageSource) -> Self {
        let key = key_for(&source);
        Self {
            source,
            key,
            retry_count: 0,
        }
    }

    pub fn url(&self) -> Option<&Url> {
        match &self.source {
            ImageSource::Remote(url) => Some(url),
            _ => None,
        }
    }
}

pub fn is_http(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https")
}

/// Session identity of a raw image URL: the path only, query stripped, case-folded.
/// Input that does not parse as a URL is used unchanged.
pub fn normalize_key(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(url) => url.path().to_lowercase(),
        Err(_) => raw.to_string(),
    }
}

pub fn key_for(source: &ImageSource) -> String {
    match source {
        ImageSource::Remote(url) => url.path().to_lowercase(),
        ImageSource::Local(path) => local_key(path),
        ImageSource::Bytes { data, .. } => content_key(data),
    }
}

fn local_key(path: &Path) -> String {
    path.to_string_lossy().to_lowercase()
}

fn content_key(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("sha256:{:x}", hasher.finalize())
}

/// Whether a path or URL path ends in a known image extension
pub fn has_image_extension(path: &str) -> bool {
    const IMAGE_EXTENSIONS: [&str; 8] = [
        ".png", ".jpg", ".jpeg", ".gif", ".webp", ".bmp", ".tiff", ".svg",
    ];

    let lowered = path.to_lowercase();
    let path = lowered.split('?').next().unwrap_or(&lowered);
    IMAGE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_query_and_case() {
        assert_eq!(
            normalize_key("https://host/path/img.jpg?x=1"),
            normalize_key("https://host/PATH/img.jpg")
        );
        assert_eq!(normalize_key("https://host/path/img.jpg?x=1"), "/path/img.jpg");
    }

    #[test]
    fn test_normalize_ignores_host_and_fragment() {
        assert_eq!(
            normalize_key("https://cdn-a.example.com/p/1.png#frag"),
            normalize_key("https://cdn-b.example.com/p/1.PNG?sig=abc")
        );
    }

    #[test]
    fn test_normalize_unparseable_passthrough() {
        assert_eq!(normalize_key("relative/Path.png"), "relative/Path.png");
    }

    #[test]
    fn test_remote_image_ref() {
        let image = ImageRef::new(ImageSource::Remote(
            Url::parse("https://host/A.jpg?t=9").unwrap(),
        ));
        assert_eq!(image.key, "/a.jpg");
        assert_eq!(image.retry_count, 0);
        assert!(image.url().is_some());

        assert!(is_http(&Url::parse("http://host/a.png").unwrap()));
        assert!(!is_http(&Url::parse("data:image/png;base64,AAAA").unwrap()));
        assert!(!is_http(&Url::parse("blob:https://host/123").unwrap()));
    }

    #[test]
    fn test_key_for_bytes_is_content_hash() {
        let a = ImageRef::new(ImageSource::Bytes {
            name: "a.jpg".to_string(),
            data: vec![1, 2, 3],
        });
        let b = ImageRef::new(ImageSource::Bytes {
            name: "renamed.jpg".to_string(),
            data: vec![1, 2, 3],
        });
        assert_eq!(a.key, b.key);
        assert!(a.key.starts_with("sha256:"));
    }

    #[test]
    fn test_key_for_local_path_is_case_folded() {
        let upper = ImageRef::new(ImageSource::Local(PathBuf::from("/tmp/Shots/IMG_1.JPG")));
        let lower = ImageRef::new(ImageSource::Local(PathBuf::from("/tmp/shots/img_1.jpg")));
        assert_eq!(upper.key, lower.key);
    }

    #[test]
    fn test_label() {
        let local = ImageSource::Local(PathBuf::from("/tmp/shots/lunch.jpg"));
        assert_eq!(local.label(), "lunch.jpg");
        let remote = ImageSource::Remote(Url::parse("https://x.test/a.png").unwrap());
        assert_eq!(remote.label(), "https://x.test/a.png");
    }

    #[test]
    fn test_image_extension_detection() {
        assert!(has_image_extension("https://example.com/image.png"));
        assert!(has_image_extension("photo.JPG"));
        assert!(has_image_extension("/path/image.jpeg?query=1"));
        assert!(!has_image_extension("notes.pdf"));
        assert!(!has_image_extension("no-extension"));
    }
}
