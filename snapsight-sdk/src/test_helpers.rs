// ABOUTME: Test helper utilities for scripting channel connections and mocking the REST backend
// ABOUTME: Provides an in-memory Connector whose per-mode behavior tests control frame by frame

use async_trait::async_trait;
use mockito::{Server, ServerGuard};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use url::Url;

use crate::error::SnapError;
use crate::transport::{Connection, Connector, Frame};

pub async fn mock_api_server() -> ServerGuard {
    Server::new_async().await
}

pub fn mock_user_response() -> serde_json::Value {
    json!({
        "id": 7,
        "email": "tester@example.com",
        "full_name": "Test User",
        "phone": null,
        "device_id": "glasses-01",
        "is_active": true
    })
}

pub fn status_frame(active: bool) -> Frame {
    let message = if active { "ready" } else { "idle" };
    Frame::Text(json!({"type": "status", "active": active, "message": message}).to_string())
}

pub fn result_frame(result: &str, original_url: Option<&str>) -> Frame {
    let mut value = json!({"type": "result", "result": result});
    if let Some(url) = original_url {
        value["originalUrl"] = json!(url);
    }
    Frame::Text(value.to_string())
}

pub fn error_frame(message: &str) -> Frame {
    Frame::Text(json!({"type": "error", "message": message}).to_string())
}

/// How the next connection attempt to a mode behaves
#[derive(Debug, Clone)]
pub enum Script {
    /// Handshake fails
    Refuse,
    /// Handshake succeeds and the peer immediately sends these frames
    Accept(Vec<Frame>),
    /// Handshake never completes
    Hang,
}

enum PeerEvent {
    Frame(Frame),
    Fail(String),
}

#[derive(Default)]
struct MockState {
    scripts: HashMap<String, VecDeque<Script>>,
    peers: HashMap<String, mpsc::UnboundedSender<PeerEvent>>,
    connects: Vec<String>,
    sent: Vec<(String, String)>,
    closes: Vec<(String, u16)>,
    failing_sends: Vec<String>,
}

/// Scripted connector keyed by the last path segment of the channel URL (the mode name).
/// Modes without a queued script refuse connections.
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, mode: &str, script: Script) -> &Self {
        self.lock()
            .scripts
            .entry(mode.to_string())
            .or_default()
            .push_back(script);
        self
    }

    /// Push a frame to the live connection of `mode`
    pub fn push(&self, mode: &str, frame: Frame) {
        if let Some(peer) = self.lock().peers.get(mode) {
            let _ = peer.send(PeerEvent::Frame(frame));
        }
    }

    /// Make the live connection of `mode` fail with a transport error
    pub fn fail(&self, mode: &str, reason: &str) {
        if let Some(peer) = self.lock().peers.get(mode) {
            let _ = peer.send(PeerEvent::Fail(reason.to_string()));
        }
    }

    /// End the stream of the live connection of `mode` without a close frame
    pub fn hang_up(&self, mode: &str) {
        self.lock().peers.remove(mode);
    }

    pub fn fail_sends(&self, mode: &str) {
        self.lock().failing_sends.push(mode.to_string());
    }

    pub fn connects(&self) -> Vec<String> {
        self.lock().connects.clone()
    }

    pub fn connect_count(&self, mode: &str) -> usize {
        self.lock().connects.iter().filter(|m| *m == mode).count()
    }

    pub fn sent(&self, mode: &str) -> Vec<String> {
        self.lock()
            .sent
            .iter()
            .filter(|(m, _)| m == mode)
            .map(|(_, text)| text.clone())
            .collect()
    }

    pub fn sent_json(&self, mode: &str) -> Vec<serde_json::Value> {
        self.sent(mode)
            .iter()
            .map(|text| serde_json::from_str(text).unwrap())
            .collect()
    }

    pub fn closes(&self) -> Vec<(String, u16)> {
        self.lock().closes.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }
}

fn mode_of(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back().map(str::to_string))
        .unwrap_or_default()
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Connection>, SnapError> {
        let mode = mode_of(url);
        let script = {
            let mut state = self.lock();
            state.connects.push(mode.clone());
            state
                .scripts
                .get_mut(&mode)
                .and_then(|queue| queue.pop_front())
                .unwrap_or(Script::Refuse)
        };

        match script {
            Script::Refuse => Err(SnapError::Transport(format!("connection refused: {}", url))),
            Script::Hang => std::future::pending().await,
            Script::Accept(greeting) => {
                let (tx, rx) = mpsc::unbounded_channel();
                for frame in greeting {
                    let _ = tx.send(PeerEvent::Frame(frame));
                }
                self.lock().peers.insert(mode.clone(), tx);
                Ok(Box::new(MockConnection {
                    mode,
                    rx,
                    state: self.state.clone(),
                }))
            }
        }
    }
}

struct MockConnection {
    mode: String,
    rx: mpsc::UnboundedReceiver<PeerEvent>,
    state: Arc<Mutex<MockState>>,
}

#[async_trait]
impl Connection for MockConnection {
    async fn recv(&mut self) -> Option<Result<Frame, SnapError>> {
        match self.rx.recv().await? {
            PeerEvent::Frame(frame) => Some(Ok(frame)),
            PeerEvent::Fail(reason) => Some(Err(SnapError::Transport(reason))),
        }
    }

    async fn send_text(&mut self, text: String) -> Result<(), SnapError> {
        let mut state = self.state.lock().unwrap();
        if state.failing_sends.contains(&self.mode) {
            return Err(SnapError::Transport("broken pipe".to_string()));
        }
        state.sent.push((self.mode.clone(), text));
        Ok(())
    }

    async fn close(&mut self, code: u16, _reason: &str) -> Result<(), SnapError> {
        let mut state = self.state.lock().unwrap();
        state.closes.push((self.mode.clone(), code));
        state.peers.remove(&self.mode);
        Ok(())
    }
}
