// ABOUTME: Content observers that watch a root for new or changed image nodes
// ABOUTME: Polls snapshots on a background task and reports diffs as mutation batches

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use url::Url;

use crate::constants::{dispatch, timeouts};
use crate::error::SnapError;
use crate::image::{has_image_extension, ImageCandidate, ImageSource};

static IMG_SRC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<img\b[^>]*?\bsrc\s*=\s*["']([^"']+)["']"#)
        .expect("image source pattern is valid")
});

/// Something that can be listed for image nodes
#[async_trait]
pub trait ContentRoot: Send {
    async fn snapshot(&mut self) -> Result<Vec<ImageCandidate>, SnapError>;

    fn describe(&self) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Added,
    AttributeChanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    pub kind: MutationKind,
    pub candidate: ImageCandidate,
}

/// Remembers the last snapshot by node and reports what changed
#[derive(Debug, Default)]
pub struct SnapshotDiff {
    known: HashMap<String, String>,
}

impl SnapshotDiff {
    pub fn apply(&mut self, snapshot: Vec<ImageCandidate>) -> Vec<Mutation> {
        let mut next = HashMap::with_capacity(snapshot.len());
        let mut mutations = Vec::new();

        for candidate in snapshot {
            let kind = match self.known.get(&candidate.node) {
                None => Some(MutationKind::Added),
                Some(fingerprint) if *fingerprint != candidate.fingerprint => {
                    Some(MutationKind::AttributeChanged)
                }
                Some(_) => None,
            };
            next.insert(candidate.node.clone(), candidate.fingerprint.clone());
            if let Some(kind) = kind {
                mutations.push(Mutation { kind, candidate });
            }
        }

        self.known = next;
        mutations
    }
}

/// Handle to a running observer. Dropping it stops the observer.
pub struct ObserverHandle {
    root: String,
    rx: mpsc::Receiver<Vec<Mutation>>,
    task: JoinHandle<()>,
}

impl ObserverHandle {
    /// Next non-empty batch; `None` once disconnected
    pub async fn next_batch(&mut self) -> Option<Vec<Mutation>> {
        self.rx.recv().await
    }

    pub fn disconnect(&mut self) {
        self.task.abort();
        self.rx.close();
        log::debug!("Stopped observing {}", self.root);
    }

    pub fn root(&self) -> &str {
        &self.root
    }
}

impl Drop for ObserverHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Poll `root` every `interval` on a background task. The first snapshot reports every
/// node as added.
pub fn observe(mut root: Box<dyn ContentRoot>, interval: Duration) -> ObserverHandle {
    let (tx, rx) = mpsc::channel(dispatch::MUTATION_BUFFER);
    let description = root.describe();
    let task_description = description.clone();

    let task = tokio::spawn(async move {
        let mut diff = SnapshotDiff::default();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match root.snapshot().await {
                Ok(snapshot) => {
                    let mutations = diff.apply(snapshot);
                    if mutations.is_empty() {
                        continue;
                    }
                    log::debug!("{}: {} mutation(s)", task_description, mutations.len());
                    if tx.send(mutations).await.is_err() {
                        break;
                    }
                }
                Err(err) => log::warn!("Snapshot of {} failed: {}", task_description, err),
            }
        }
    });

    log::info!("Observing {} every {:?}", description, interval);
    ObserverHandle {
        root: description,
        rx,
        task,
    }
}

/// A web page whose `<img>` elements are watched
pub struct PageRoot {
    client: Client,
    url: Url,
}

impl PageRoot {
    pub fn new(url: Url) -> Result<Self, SnapError> {
        let client = Client::builder()
            .timeout(timeouts::HTTP_REQUEST_TIMEOUT)
            .user_agent(concat!("snapsight/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SnapError::Configuration(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, url })
    }
}

/// Resolved `<img src>` values in document order
pub fn extract_image_sources(html: &str, page: &Url) -> Vec<Url> {
    IMG_SRC
        .captures_iter(html)
        .filter_map(|captures| {
            let raw = captures.get(1)?.as_str().trim().replace("&amp;", "&");
            match page.join(&raw) {
                Ok(url) => Some(url),
                Err(err) => {
                    log::debug!("Skipping image source '{}': {}", raw, err);
                    None
                }
            }
        })
        .collect()
}

#[async_trait]
impl ContentRoot for PageRoot {
    async fn snapshot(&mut self) -> Result<Vec<ImageCandidate>, SnapError> {
        let response = self.client.get(self.url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SnapError::Http {
                status: status.as_u16(),
                message: format!("page fetch failed: {}", self.url),
            });
        }
        let html = response.text().await?;

        Ok(extract_image_sources(&html, &self.url)
            .into_iter()
            .enumerate()
            .map(|(index, url)| ImageCandidate {
                node: format!("img#{}", index),
                fingerprint: url.to_string(),
                source: ImageSource::Remote(url),
            })
            .collect())
    }

    fn describe(&self) -> String {
        self.url.to_string()
    }
}

/// A directory whose image files are watched
pub struct DirectoryRoot {
    path: PathBuf,
}

impl DirectoryRoot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ContentRoot for DirectoryRoot {
    async fn snapshot(&mut self) -> Result<Vec<ImageCandidate>, SnapError> {
        let mut entries = tokio::fs::read_dir(&self.path).await?;
        let mut candidates = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if !has_image_extension(&name) {
                continue;
            }
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata
                .modified()
                .ok()
                .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
                .map(|since| since.as_nanos())
                .unwrap_or_default();

            candidates.push(ImageCandidate {
                node: name,
                fingerprint: format!("{}:{}", metadata.len(), modified),
                source: ImageSource::Local(entry.path()),
            });
        }

        candidates.sort_by(|a, b| a.node.cmp(&b.node));
        Ok(candidates)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::mock_api_server;
    use std::collections::VecDeque;

    fn candidate(node: &str, src: &str) -> ImageCandidate {
        ImageCandidate {
            node: node.to_string(),
            fingerprint: src.to_string(),
            source: ImageSource::Remote(Url::parse(src).unwrap()),
        }
    }

    struct ScriptedRoot {
        snapshots: VecDeque<Result<Vec<ImageCandidate>, SnapError>>,
    }

    #[async_trait]
    impl ContentRoot for ScriptedRoot {
        async fn snapshot(&mut self) -> Result<Vec<ImageCandidate>, SnapError> {
            self.snapshots.pop_front().unwrap_or_else(|| Ok(Vec::new()))
        }

        fn describe(&self) -> String {
            "scripted".to_string()
        }
    }

    #[test]
    fn test_diff_reports_added_and_changed() {
        let mut diff = SnapshotDiff::default();

        let first = diff.apply(vec![candidate("img#0", "https://h/a.jpg")]);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].kind, MutationKind::Added);

        assert!(diff.apply(vec![candidate("img#0", "https://h/a.jpg")]).is_empty());

        let changed = diff.apply(vec![
            candidate("img#0", "https://h/b.jpg"),
            candidate("img#1", "https://h/c.jpg"),
        ]);
        assert_eq!(
            changed.iter().map(|m| m.kind).collect::<Vec<_>>(),
            vec![MutationKind::AttributeChanged, MutationKind::Added]
        );
    }

    #[test]
    fn test_diff_forgets_removed_nodes() {
        let mut diff = SnapshotDiff::default();
        diff.apply(vec![candidate("img#0", "https://h/a.jpg")]);
        diff.apply(Vec::new());

        let again = diff.apply(vec![candidate("img#0", "https://h/a.jpg")]);
        assert_eq!(again[0].kind, MutationKind::Added);
    }

    #[test]
    fn test_extract_image_sources() {
        let page = Url::parse("https://chat.test/room/42").unwrap();
        let html = r#"
            <div class="msg"><IMG class="photo" SRC="/uploads/a.jpg?w=200&amp;h=100"></div>
            <img alt='x' src='https://cdn.test/b.png'>
            <img src="data:image/gif;base64,R0lGOD">
            <image src="ignored.png">
        "#;

        let sources: Vec<String> = extract_image_sources(html, &page)
            .iter()
            .map(Url::to_string)
            .collect();
        assert_eq!(
            sources,
            vec![
                "https://chat.test/uploads/a.jpg?w=200&h=100",
                "https://cdn.test/b.png",
                "data:image/gif;base64,R0lGOD",
            ]
        );
    }

    #[tokio::test]
    async fn test_page_root_snapshot() {
        let mut server = mock_api_server().await;
        server
            .mock("GET", "/chat")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body(r#"<p>hi</p><img src="/img/one.jpg"><img src="/img/two.jpg">"#)
            .create_async()
            .await;

        let url = Url::parse(&format!("{}/chat", server.url())).unwrap();
        let mut root = PageRoot::new(url).unwrap();
        let candidates = root.snapshot().await.unwrap();

        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].node, "img#0");
        assert!(candidates[1].fingerprint.ends_with("/img/two.jpg"));
    }

    #[tokio::test]
    async fn test_page_root_http_error() {
        let mut server = mock_api_server().await;
        server
            .mock("GET", "/missing")
            .with_status(404)
            .create_async()
            .await;

        let url = Url::parse(&format!("{}/missing", server.url())).unwrap();
        let mut root = PageRoot::new(url).unwrap();
        assert!(matches!(
            root.snapshot().await,
            Err(SnapError::Http { status: 404, .. })
        ));
    }

    #[tokio::test]
    async fn test_directory_root_lists_images() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.png"), b"png").unwrap();
        std::fs::write(dir.path().join("a.JPG"), b"jpg").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"text").unwrap();
        std::fs::create_dir(dir.path().join("folder.png")).unwrap();

        let mut root = DirectoryRoot::new(dir.path());
        let candidates = root.snapshot().await.unwrap();

        assert_eq!(
            candidates.iter().map(|c| c.node.as_str()).collect::<Vec<_>>(),
            vec!["a.JPG", "b.png"]
        );
        assert!(candidates[1].fingerprint.starts_with("3:"));
        assert!(matches!(candidates[0].source, ImageSource::Local(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_observer_emits_batches_and_survives_errors() {
        let root = ScriptedRoot {
            snapshots: VecDeque::from(vec![
                Err(SnapError::Network("unreachable".to_string())),
                Ok(vec![candidate("img#0", "https://h/a.jpg")]),
                Ok(vec![candidate("img#0", "https://h/a.jpg")]),
                Ok(vec![
                    candidate("img#0", "https://h/a.jpg"),
                    candidate("img#1", "https://h/b.jpg"),
                ]),
            ]),
        };
        let mut handle = observe(Box::new(root), Duration::from_secs(2));

        let first = handle.next_batch().await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].candidate.node, "img#0");

        let second = handle.next_batch().await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].candidate.node, "img#1");
        assert_eq!(second[0].kind, MutationKind::Added);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_ends_batches() {
        let root = ScriptedRoot {
            snapshots: VecDeque::new(),
        };
        let mut handle = observe(Box::new(root), Duration::from_secs(1));
        assert_eq!(handle.root(), "scripted");

        handle.disconnect();
        assert!(handle.next_batch().await.is_none());
    }
}
