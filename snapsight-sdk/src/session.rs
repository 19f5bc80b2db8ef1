// ABOUTME: Session orchestration: probe for the active mode, hold its channel and feed it images
// ABOUTME: A single owner drives channel events, observer batches and the acknowledgement sweep

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use typed_builder::TypedBuilder;
use url::Url;

use crate::channel::{ChannelEvent, ChannelState, CloseCause, ModeChannel, ReconnectPolicy};
use crate::constants::{channel::USER_STOP_CODE, dispatch, probe, urls};
use crate::dispatcher::{Delivery, ImageDispatcher};
use crate::error::SnapError;
use crate::fetcher::{inline_message, HttpImageFetcher, ImageFetcher};
use crate::image::{ImageRef, ImageSource};
use crate::message::{InboundMessage, OutboundMessage};
use crate::mode::Mode;
use crate::observer::{observe, ContentRoot, Mutation, ObserverHandle};
use crate::prober::CapabilityProber;
use crate::transport::{Connector, WsConnector};

#[derive(Debug, Clone, TypedBuilder)]
pub struct SessionConfig {
    #[builder(default = None, setter(strip_option))]
    pub ws_base: Option<String>,

    #[builder(default = Mode::ALL.to_vec())]
    pub modes: Vec<Mode>,

    #[builder(default = probe::TIMEOUT)]
    pub probe_timeout: Duration,

    #[builder(default)]
    pub reconnect: ReconnectPolicy,

    #[builder(default = dispatch::MAX_RETRIES)]
    pub max_retries: u32,

    /// `None` disables the acknowledgement sweep
    #[builder(default = Some(dispatch::ACK_TIMEOUT))]
    pub ack_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Where the last successfully opened mode is remembered between runs
pub trait ModeMemory: Send {
    fn load(&self) -> Option<Mode>;

    fn store(&mut self, mode: Mode) -> Result<(), SnapError>;

    fn clear(&mut self) -> Result<(), SnapError>;
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryModeMemory {
    mode: Option<Mode>,
}

impl InMemoryModeMemory {
    pub fn with_mode(mode: Mode) -> Self {
        Self { mode: Some(mode) }
    }
}

impl ModeMemory for InMemoryModeMemory {
    fn load(&self) -> Option<Mode> {
        self.mode
    }

    fn store(&mut self, mode: Mode) -> Result<(), SnapError> {
        self.mode = Some(mode);
        Ok(())
    }

    fn clear(&mut self) -> Result<(), SnapError> {
        self.mode = None;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    User,
    ModeInactive,
    ReconnectExhausted,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connected {
        mode: Mode,
    },
    Disconnected {
        mode: Mode,
        cause: CloseCause,
        reconnect_in: Option<Duration>,
    },
    Status {
        mode: Mode,
        active: bool,
        message: String,
    },
    Result {
        mode: Mode,
        image: Option<String>,
        text: String,
    },
    ServerError {
        mode: Mode,
        message: String,
    },
    Sent {
        key: String,
        inline: bool,
    },
    Queued {
        key: String,
    },
    DeliveryFailed {
        key: String,
        reason: String,
    },
    Stopped {
        reason: StopReason,
    },
}

enum Wake {
    Channel(Option<ChannelEvent>),
    Batch(Option<Vec<Mutation>>),
    Sweep,
}

pub struct Session {
    ws_base: Url,
    modes: Vec<Mode>,
    probe_timeout: Duration,
    reconnect: ReconnectPolicy,
    ack_timeout: Option<Duration>,
    connector: Arc<dyn Connector>,
    fetcher: Arc<dyn ImageFetcher>,
    memory: Box<dyn ModeMemory>,
    dispatcher: ImageDispatcher,
    channel: Option<ModeChannel>,
    observer: Option<ObserverHandle>,
    events: VecDeque<SessionEvent>,
    stopped: bool,
}

impl Session {
    pub fn new(
        config: SessionConfig,
        connector: Arc<dyn Connector>,
        fetcher: Arc<dyn ImageFetcher>,
        memory: Box<dyn ModeMemory>,
    ) -> Result<Self, SnapError> {
        let ws_base = Url::parse(config.ws_base.as_deref().unwrap_or(urls::WS_BASE))?;
        if !matches!(ws_base.scheme(), "ws" | "wss") {
            return Err(SnapError::Configuration(format!(
                "Channel base URL must use ws:// or wss://: {}",
                ws_base
            )));
        }
        if config.modes.is_empty() {
            return Err(SnapError::Configuration(
                "At least one mode must be configured".to_string(),
            ));
        }

        Ok(Self {
            ws_base,
            modes: config.modes,
            probe_timeout: config.probe_timeout,
            reconnect: config.reconnect,
            ack_timeout: config.ack_timeout,
            connector,
            fetcher,
            memory,
            dispatcher: ImageDispatcher::new(config.max_retries),
            channel: None,
            observer: None,
            events: VecDeque::new(),
            stopped: false,
        })
    }

    /// Session over real WebSocket channels and HTTP image downloads
    pub fn with_websocket(
        config: SessionConfig,
        memory: Box<dyn ModeMemory>,
    ) -> Result<Self, SnapError> {
        let fetcher = HttpImageFetcher::new()?;
        Self::new(
            config,
            Arc::new(WsConnector::new()),
            Arc::new(fetcher),
            memory,
        )
    }

    /// Probe for the active mode and open its channel. The handshake completes inside
    /// `next_event`, which reports `Connected`.
    pub async fn start(&mut self) -> Result<Mode, SnapError> {
        if let Some(channel) = &self.channel {
            if !channel.is_terminated() {
                return Ok(channel.mode());
            }
        }

        let remembered = self.memory.load();
        let prober = CapabilityProber::new(self.connector.clone(), self.ws_base.clone())
            .with_timeout(self.probe_timeout);
        let mode = prober
            .probe(&self.modes, remembered)
            .await
            .ok_or(SnapError::NoActiveMode)?;

        self.channel = Some(ModeChannel::open(
            mode,
            &self.ws_base,
            self.connector.clone(),
            self.reconnect,
        )?);
        self.stopped = false;
        log::info!("Session bound to {} ({})", mode, mode.description());
        Ok(mode)
    }

    /// Watch `root` for images; replaces any previous observer
    pub fn observe(&mut self, root: Box<dyn ContentRoot>, interval: Duration) {
        if let Some(mut previous) = self.observer.take() {
            previous.disconnect();
        }
        self.observer = Some(observe(root, interval));
    }

    /// Inject an image by hand. Returns false when it was already seen in this session.
    pub async fn submit(&mut self, source: ImageSource) -> bool {
        match self.dispatcher.accept(source) {
            Some(image) => {
                self.deliver(image).await;
                true
            }
            None => false,
        }
    }

    /// Drive the session until something happens. Returns `None` once stopped, or
    /// before `start` was called.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        loop {
            if let Some(event) = self.events.pop_front() {
                return Some(event);
            }
            if self.stopped {
                return None;
            }

            let sweep_at = self
                .ack_timeout
                .and_then(|timeout| self.dispatcher.next_expiry(timeout));
            let wake = {
                let channel = self.channel.as_mut()?;
                let observer = self.observer.as_mut();
                tokio::select! {
                    event = channel.next_event() => Wake::Channel(event),
                    batch = next_batch(observer) => Wake::Batch(batch),
                    _ = sleep_until(sweep_at) => Wake::Sweep,
                }
            };

            match wake {
                Wake::Channel(Some(event)) => self.handle_channel_event(event).await,
                Wake::Channel(None) => {
                    self.stopped = true;
                }
                Wake::Batch(Some(mutations)) => {
                    let images = self
                        .dispatcher
                        .observe(mutations.into_iter().map(|m| m.candidate.source));
                    for image in images {
                        self.deliver(image).await;
                    }
                }
                Wake::Batch(None) => {
                    log::debug!("Observer finished");
                    self.observer = None;
                }
                Wake::Sweep => {
                    if let Some(timeout) = self.ack_timeout {
                        let deliveries = self.dispatcher.expire_unacknowledged(
                            self.channel_state(),
                            Instant::now(),
                            timeout,
                        );
                        for delivery in deliveries {
                            self.send_delivery(delivery).await;
                        }
                    }
                }
            }
        }
    }

    /// Stop observing, close the channel with the user-stop code and clear the pending
    /// queue. All three always run; a failure closing the channel is returned afterwards.
    pub async fn stop(&mut self) -> Result<(), SnapError> {
        if let Some(mut observer) = self.observer.take() {
            observer.disconnect();
        }

        let closed = match self.channel.as_mut() {
            Some(channel) => channel.close(USER_STOP_CODE).await,
            None => Ok(()),
        };

        self.dispatcher.clear_pending();
        if !self.stopped {
            self.stopped = true;
            self.events.push_back(SessionEvent::Stopped {
                reason: StopReason::User,
            });
        }
        log::info!("Session stopped");
        closed
    }

    /// Forget every image seen so far
    pub fn reset(&mut self) {
        self.dispatcher.reset();
        self.events.clear();
    }

    pub fn mode(&self) -> Option<Mode> {
        self.channel.as_ref().map(ModeChannel::mode)
    }

    pub fn channel_state(&self) -> ChannelState {
        self.channel
            .as_ref()
            .map(ModeChannel::state)
            .unwrap_or(ChannelState::Closed)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn dispatcher(&self) -> &ImageDispatcher {
        &self.dispatcher
    }

    pub fn memory(&self) -> &dyn ModeMemory {
        self.memory.as_ref()
    }

    async fn handle_channel_event(&mut self, event: ChannelEvent) {
        let Some(mode) = self.mode() else {
            return;
        };

        match event {
            ChannelEvent::Opened => {
                if let Err(err) = self.memory.store(mode) {
                    log::warn!("Could not remember mode {}: {}", mode, err);
                }
                self.events.push_back(SessionEvent::Connected { mode });
                self.flush_pending().await;
            }
            ChannelEvent::Message(message) => self.handle_message(mode, message),
            ChannelEvent::Closed {
                cause,
                reconnect_in,
            } => {
                let requeued = self.dispatcher.requeue_in_flight();
                if requeued > 0 {
                    log::debug!("{} unacknowledged image(s) back in the queue", requeued);
                }
                self.events.push_back(SessionEvent::Disconnected {
                    mode,
                    cause: cause.clone(),
                    reconnect_in,
                });

                if reconnect_in.is_none() && !self.stopped {
                    let reason = match cause {
                        CloseCause::ModeInactive => {
                            if let Err(err) = self.memory.clear() {
                                log::warn!("Could not forget mode {}: {}", mode, err);
                            }
                            StopReason::ModeInactive
                        }
                        CloseCause::UserStop => StopReason::User,
                        _ => StopReason::ReconnectExhausted,
                    };
                    self.halt(reason);
                }
            }
        }
    }

    fn handle_message(&mut self, mode: Mode, message: InboundMessage) {
        let event = match message {
            InboundMessage::Status { active, message } => SessionEvent::Status {
                mode,
                active,
                message,
            },
            InboundMessage::Result { .. } => {
                let reference = message.reference().map(str::to_string);
                let acknowledged = self.dispatcher.acknowledge(reference.as_deref());
                SessionEvent::Result {
                    mode,
                    image: reference.or_else(|| acknowledged.map(|image| image.source.label())),
                    text: message.result_text().unwrap_or_default(),
                }
            }
            InboundMessage::Error { message } => SessionEvent::ServerError { mode, message },
        };
        self.events.push_back(event);
    }

    fn halt(&mut self, reason: StopReason) {
        if let Some(mut observer) = self.observer.take() {
            observer.disconnect();
        }
        self.dispatcher.clear_pending();
        self.stopped = true;
        log::info!("Session halted: {:?}", reason);
        self.events.push_back(SessionEvent::Stopped { reason });
    }

    async fn flush_pending(&mut self) {
        while self.channel_state() == ChannelState::Open {
            let Some(image) = self.dispatcher.pop_pending() else {
                break;
            };
            self.deliver(image).await;
        }
    }

    async fn deliver(&mut self, image: ImageRef) {
        let delivery = self
            .dispatcher
            .dispatch(image, self.channel_state(), Instant::now());
        self.send_delivery(delivery).await;
    }

    async fn send_delivery(&mut self, delivery: Delivery) {
        match delivery {
            Delivery::Queued { key } => {
                self.events.push_back(SessionEvent::Queued { key });
            }
            Delivery::Reference { image, message } => {
                let key = image.key.clone();
                match self.send(&message).await {
                    Ok(()) => self.events.push_back(SessionEvent::Sent { key, inline: false }),
                    Err(err) => {
                        log::warn!("Sending {} failed: {}", key, err);
                        self.dispatcher
                            .requeue(Delivery::Reference { image, message });
                        self.events.push_back(SessionEvent::Queued { key });
                    }
                }
            }
            Delivery::Inline(image) => {
                let key = image.key.clone();
                let message = match inline_message(self.fetcher.as_ref(), &image).await {
                    Ok(message) => message,
                    Err(err) => {
                        log::warn!("Could not load {} for inline delivery: {}", image.source, err);
                        self.events.push_back(SessionEvent::DeliveryFailed {
                            key,
                            reason: err.to_string(),
                        });
                        return;
                    }
                };
                match self.send(&message).await {
                    Ok(()) => self.events.push_back(SessionEvent::Sent { key, inline: true }),
                    Err(err) => {
                        log::warn!("Sending {} inline failed: {}", key, err);
                        self.dispatcher.requeue(Delivery::Inline(image));
                        self.events.push_back(SessionEvent::Queued { key });
                    }
                }
            }
        }
    }

    async fn send(&mut self, message: &OutboundMessage) -> Result<(), SnapError> {
        match self.channel.as_mut() {
            Some(channel) => channel.send(message).await,
            None => Err(SnapError::NoActiveMode),
        }
    }
}

async fn next_batch(observer: Option<&mut ObserverHandle>) -> Option<Vec<Mutation>> {
    match observer {
        Some(observer) => observer.next_batch().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::ImageCandidate;
    use crate::test_helpers::{error_frame, result_frame, status_frame, MockConnector, Script};
    use async_trait::async_trait;
    use serde_json::json;

    const PNG: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D];

    struct StaticFetcher;

    #[async_trait]
    impl ImageFetcher for StaticFetcher {
        async fn fetch(&self, _url: &Url) -> Result<Vec<u8>, SnapError> {
            Ok(PNG.to_vec())
        }
    }

    struct OneShotRoot(Option<Vec<ImageCandidate>>);

    #[async_trait]
    impl ContentRoot for OneShotRoot {
        async fn snapshot(&mut self) -> Result<Vec<ImageCandidate>, SnapError> {
            Ok(self.0.take().unwrap_or_default())
        }

        fn describe(&self) -> String {
            "one-shot".to_string()
        }
    }

    fn remote(raw: &str) -> ImageSource {
        ImageSource::Remote(Url::parse(raw).unwrap())
    }

    fn session(connector: &MockConnector, config: SessionConfig) -> Session {
        Session::new(
            config,
            Arc::new(connector.clone()),
            Arc::new(StaticFetcher),
            Box::new(InMemoryModeMemory::default()),
        )
        .unwrap()
    }

    /// calorie is the only active mode; the channel itself greets with nothing
    fn calorie_backend() -> MockConnector {
        let connector = MockConnector::new();
        connector.script("calorie", Script::Accept(vec![status_frame(true)]));
        connector.script("calorie", Script::Accept(vec![]));
        connector.script("translate", Script::Accept(vec![status_frame(false)]));
        connector
    }

    async fn started(connector: &MockConnector, config: SessionConfig) -> Session {
        let mut session = session(connector, config);
        assert_eq!(session.start().await.unwrap(), Mode::Calorie);
        assert_eq!(
            session.next_event().await,
            Some(SessionEvent::Connected { mode: Mode::Calorie })
        );
        session
    }

    #[test]
    fn test_rejects_bad_configuration() {
        let connector = MockConnector::new();
        let build = |config| {
            Session::new(
                config,
                Arc::new(connector.clone()),
                Arc::new(StaticFetcher),
                Box::new(InMemoryModeMemory::default()),
            )
        };

        assert!(matches!(
            build(SessionConfig::builder().ws_base("http://localhost:8000".to_string()).build()),
            Err(SnapError::Configuration(_))
        ));
        assert!(matches!(
            build(SessionConfig::builder().modes(Vec::new()).build()),
            Err(SnapError::Configuration(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_binds_active_mode_and_remembers_it() {
        let connector = calorie_backend();
        let session = started(&connector, SessionConfig::default()).await;

        assert_eq!(session.mode(), Some(Mode::Calorie));
        assert_eq!(session.channel_state(), ChannelState::Open);
        assert_eq!(session.memory().load(), Some(Mode::Calorie));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_remembered_mode_is_replaced() {
        let connector = calorie_backend();
        let mut session = Session::new(
            SessionConfig::default(),
            Arc::new(connector.clone()),
            Arc::new(StaticFetcher),
            Box::new(InMemoryModeMemory::with_mode(Mode::Translate)),
        )
        .unwrap();

        assert_eq!(session.start().await.unwrap(), Mode::Calorie);
        assert_eq!(
            session.next_event().await,
            Some(SessionEvent::Connected { mode: Mode::Calorie })
        );
        assert_eq!(session.memory().load(), Some(Mode::Calorie));
        assert_eq!(connector.connect_count("translate"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_active_mode_opens_nothing() {
        let connector = MockConnector::new();
        connector.script("translate", Script::Accept(vec![status_frame(false)]));
        let mut session = session(&connector, SessionConfig::default());

        assert!(matches!(session.start().await, Err(SnapError::NoActiveMode)));
        assert_eq!(session.mode(), None);
        assert_eq!(session.next_event().await, None);
        for mode in ["translate", "calorie", "navigate"] {
            assert_eq!(connector.connect_count(mode), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_images_queued_while_connecting_are_sent_once_on_open() {
        let connector = calorie_backend();
        let mut session = session(&connector, SessionConfig::default());
        session.start().await.unwrap();
        assert_eq!(session.channel_state(), ChannelState::Connecting);

        assert!(session.submit(remote("https://h/a.jpg")).await);
        assert!(session.submit(remote("https://h/b.jpg")).await);
        assert!(!session.submit(remote("https://h/A.JPG?v=2")).await);
        assert_eq!(session.dispatcher().pending_len(), 2);

        let mut events = Vec::new();
        for _ in 0..5 {
            events.push(session.next_event().await.unwrap());
        }
        assert_eq!(
            events,
            vec![
                SessionEvent::Queued {
                    key: "/a.jpg".to_string(),
                },
                SessionEvent::Queued {
                    key: "/b.jpg".to_string(),
                },
                SessionEvent::Connected {
                    mode: Mode::Calorie,
                },
                SessionEvent::Sent {
                    key: "/a.jpg".to_string(),
                    inline: false,
                },
                SessionEvent::Sent {
                    key: "/b.jpg".to_string(),
                    inline: false,
                },
            ]
        );
        assert_eq!(session.dispatcher().pending_len(), 0);
        assert_eq!(
            connector.sent_json("calorie"),
            vec![
                json!({"type": "image_url", "url": "https://h/a.jpg", "retry": 0}),
                json!({"type": "image_url", "url": "https://h/b.jpg", "retry": 0}),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_acknowledges_delivery() {
        let connector = calorie_backend();
        let mut session = started(&connector, SessionConfig::default()).await;

        session.submit(remote("https://h/lunch.jpg?s=1")).await;
        assert!(matches!(session.next_event().await, Some(SessionEvent::Sent { .. })));
        assert_eq!(session.dispatcher().in_flight_len(), 1);

        connector.push(
            "calorie",
            result_frame("about 450 kcal", Some("https://h/lunch.jpg?s=1")),
        );
        assert_eq!(
            session.next_event().await,
            Some(SessionEvent::Result {
                mode: Mode::Calorie,
                image: Some("https://h/lunch.jpg?s=1".to_string()),
                text: "about 450 kcal".to_string(),
            })
        );
        assert_eq!(session.dispatcher().in_flight_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unacknowledged_reference_falls_back_to_inline() {
        let connector = calorie_backend();
        let mut session = started(&connector, SessionConfig::default()).await;

        session.submit(remote("https://h/slow.png")).await;
        let mut inline_flags = Vec::new();
        for _ in 0..4 {
            match session.next_event().await {
                Some(SessionEvent::Sent { inline, .. }) => inline_flags.push(inline),
                other => panic!("Expected a send, got {:?}", other),
            }
        }
        assert_eq!(inline_flags, vec![false, false, false, true]);

        let sent = connector.sent_json("calorie");
        let retries: Vec<_> = sent.iter().take(3).map(|m| m["retry"].clone()).collect();
        assert_eq!(retries, vec![json!(0), json!(1), json!(2)]);
        assert_eq!(sent[3]["type"], "image_base64");
        assert_eq!(sent[3]["originalUrl"], "https://h/slow.png");
        assert_eq!(session.dispatcher().in_flight_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inactive_error_stops_session_and_forgets_mode() {
        let connector = calorie_backend();
        let mut session = started(&connector, SessionConfig::default()).await;
        session.observe(Box::new(OneShotRoot(None)), Duration::from_secs(2));

        connector.push("calorie", error_frame("calorie 功能未激活"));
        assert!(matches!(
            session.next_event().await,
            Some(SessionEvent::ServerError { .. })
        ));
        assert!(matches!(
            session.next_event().await,
            Some(SessionEvent::Disconnected {
                cause: CloseCause::ModeInactive,
                reconnect_in: None,
                ..
            })
        ));
        assert_eq!(
            session.next_event().await,
            Some(SessionEvent::Stopped {
                reason: StopReason::ModeInactive
            })
        );
        assert_eq!(session.next_event().await, None);
        assert_eq!(session.memory().load(), None);
        assert!(session.is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_error_keeps_session_running() {
        let connector = calorie_backend();
        let mut session = started(&connector, SessionConfig::default()).await;

        connector.push("calorie", error_frame("分析失败"));
        assert!(matches!(
            session.next_event().await,
            Some(SessionEvent::ServerError { .. })
        ));
        assert_eq!(session.channel_state(), ChannelState::Open);
        assert_eq!(session.memory().load(), Some(Mode::Calorie));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_closes_and_never_reconnects() {
        let connector = calorie_backend();
        connector.script("calorie", Script::Accept(vec![]));
        let mut session = started(&connector, SessionConfig::default()).await;
        session.observe(Box::new(OneShotRoot(None)), Duration::from_secs(2));

        session.stop().await.unwrap();
        assert_eq!(
            session.next_event().await,
            Some(SessionEvent::Stopped {
                reason: StopReason::User
            })
        );
        assert_eq!(session.next_event().await, None);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(session.channel_state(), ChannelState::Closed);
        assert_eq!(connector.connect_count("calorie"), 2);
        assert!(connector.closes().contains(&("calorie".to_string(), 1000)));
        assert_eq!(session.dispatcher().pending_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_resends_unacknowledged_images() {
        let connector = calorie_backend();
        connector.script("calorie", Script::Accept(vec![]));
        let mut session = started(&connector, SessionConfig::default()).await;

        session.submit(remote("https://h/a.jpg")).await;
        assert!(matches!(session.next_event().await, Some(SessionEvent::Sent { .. })));

        connector.fail("calorie", "connection reset");
        assert!(matches!(
            session.next_event().await,
            Some(SessionEvent::Disconnected {
                reconnect_in: Some(_),
                ..
            })
        ));
        assert_eq!(session.dispatcher().pending_len(), 1);

        assert_eq!(
            session.next_event().await,
            Some(SessionEvent::Connected { mode: Mode::Calorie })
        );
        assert_eq!(
            session.next_event().await,
            Some(SessionEvent::Sent {
                key: "/a.jpg".to_string(),
                inline: false,
            })
        );
        let retries: Vec<_> = connector
            .sent_json("calorie")
            .iter()
            .map(|m| m["retry"].clone())
            .collect();
        assert_eq!(retries, vec![json!(0), json!(1)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_observer_batches_are_deduplicated() {
        let connector = calorie_backend();
        let mut session = started(&connector, SessionConfig::default()).await;

        let candidates = vec![
            ImageCandidate {
                node: "img#0".to_string(),
                fingerprint: "https://h/x.jpg?w=1".to_string(),
                source: remote("https://h/x.jpg?w=1"),
            },
            ImageCandidate {
                node: "img#1".to_string(),
                fingerprint: "https://h/X.jpg?w=2".to_string(),
                source: remote("https://h/X.jpg?w=2"),
            },
            ImageCandidate {
                node: "img#2".to_string(),
                fingerprint: "data:image/png;base64,AAAA".to_string(),
                source: remote("data:image/png;base64,AAAA"),
            },
        ];
        session.observe(Box::new(OneShotRoot(Some(candidates))), Duration::from_secs(2));

        assert_eq!(
            session.next_event().await,
            Some(SessionEvent::Sent {
                key: "/x.jpg".to_string(),
                inline: false,
            })
        );
        assert_eq!(connector.sent("calorie").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inline_failure_is_reported_not_fatal() {
        let connector = calorie_backend();
        let mut session = started(&connector, SessionConfig::default()).await;

        session
            .submit(ImageSource::Bytes {
                name: "notes.txt".to_string(),
                data: b"plain text".to_vec(),
            })
            .await;
        assert!(matches!(
            session.next_event().await,
            Some(SessionEvent::DeliveryFailed { .. })
        ));
        assert_eq!(session.channel_state(), ChannelState::Open);
        assert!(!session.is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_forgets_seen_images() {
        let connector = calorie_backend();
        let mut session = started(&connector, SessionConfig::default()).await;

        assert!(session.submit(remote("https://h/a.jpg")).await);
        assert!(!session.submit(remote("https://h/a.jpg")).await);
        session.reset();
        assert!(session.submit(remote("https://h/a.jpg")).await);
    }
}
