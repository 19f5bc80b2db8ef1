// ABOUTME: Mode channel: one duplex connection bound to a mode, with fixed-delay reconnection
// ABOUTME: Splits a pure time-driven state machine from the async driver that owns the socket

use futures_util::future::BoxFuture;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

use crate::constants::channel::{CLOSE_TIMEOUT, RECONNECT_DELAY, USER_STOP_CODE};
use crate::error::SnapError;
use crate::message::{mentions_inactive, InboundMessage, OutboundMessage};
use crate::mode::Mode;
use crate::transport::{Connection, Connector, Frame};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closed,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelState::Connecting => write!(f, "connecting"),
            ChannelState::Open => write!(f, "open"),
            ChannelState::Closed => write!(f, "closed"),
        }
    }
}

/// Why a channel left the Open or Connecting state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseCause {
    /// Closed locally with the user-stop code
    UserStop,
    /// The server reported the bound mode as inactive
    ModeInactive,
    /// Handshake, read or write failure
    Transport(String),
    /// The server sent a close frame
    Remote { code: u16, reason: String },
    /// Closed locally with a code other than the user-stop code
    Local { code: u16 },
}

impl CloseCause {
    /// Terminal causes never lead to a reconnect
    pub fn is_terminal(&self) -> bool {
        match self {
            CloseCause::UserStop | CloseCause::ModeInactive => true,
            CloseCause::Remote { code, .. } => *code == USER_STOP_CODE,
            CloseCause::Transport(_) | CloseCause::Local { .. } => false,
        }
    }

    fn from_close_frame(code: u16, reason: String) -> Self {
        if mentions_inactive(&reason) {
            CloseCause::ModeInactive
        } else {
            CloseCause::Remote { code, reason }
        }
    }
}

impl fmt::Display for CloseCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseCause::UserStop => write!(f, "stopped by user"),
            CloseCause::ModeInactive => write!(f, "mode is not active"),
            CloseCause::Transport(reason) => write!(f, "transport failure: {}", reason),
            CloseCause::Remote { code, reason } if reason.is_empty() => {
                write!(f, "closed by server ({})", code)
            }
            CloseCause::Remote { code, reason } => {
                write!(f, "closed by server ({}: {})", code, reason)
            }
            CloseCause::Local { code } => write!(f, "closed locally ({})", code),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    /// Consecutive failed attempts allowed before giving up; `None` retries forever
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: RECONNECT_DELAY,
            max_attempts: None,
        }
    }
}

/// Connection lifecycle without any I/O. Every transition takes the current instant.
#[derive(Debug, Clone)]
pub struct ChannelMachine {
    state: ChannelState,
    policy: ReconnectPolicy,
    attempts: u32,
    reconnect_at: Option<Instant>,
    terminated: bool,
}

impl ChannelMachine {
    /// A new machine starts in `Connecting`
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            state: ChannelState::Connecting,
            policy,
            attempts: 0,
            reconnect_at: None,
            terminated: false,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn reconnect_deadline(&self) -> Option<Instant> {
        self.reconnect_at
    }

    pub fn on_open(&mut self) {
        self.state = ChannelState::Open;
        self.attempts = 0;
        self.reconnect_at = None;
    }

    /// Record a close and schedule the next attempt. Returns the reconnect delay,
    /// or `None` when the channel is finished.
    pub fn on_close(&mut self, cause: &CloseCause, now: Instant) -> Option<Duration> {
        self.state = ChannelState::Closed;
        self.reconnect_at = None;

        if self.terminated || cause.is_terminal() {
            self.terminated = true;
            return None;
        }

        self.attempts += 1;
        if let Some(max) = self.policy.max_attempts {
            if self.attempts > max {
                self.terminated = true;
                return None;
            }
        }

        match now.checked_add(self.policy.delay) {
            Some(at) => {
                self.reconnect_at = Some(at);
                Some(self.policy.delay)
            }
            None => {
                log::warn!(
                    "Reconnect delay {:?} is out of range; not reconnecting",
                    self.policy.delay
                );
                self.terminated = true;
                None
            }
        }
    }

    /// Apply an inbound message; returns true when it ended the channel
    pub fn on_message(&mut self, message: &InboundMessage, now: Instant) -> bool {
        if message.is_inactive_signal() {
            self.on_close(&CloseCause::ModeInactive, now);
            true
        } else {
            false
        }
    }

    /// Move to `Connecting` once the reconnect deadline has passed
    pub fn poll_reconnect(&mut self, now: Instant) -> bool {
        match self.reconnect_at {
            Some(deadline) if self.state == ChannelState::Closed && now >= deadline => {
                self.state = ChannelState::Connecting;
                self.reconnect_at = None;
                true
            }
            _ => false,
        }
    }

    /// Terminal stop; nothing reconnects afterwards
    pub fn stop(&mut self) {
        self.state = ChannelState::Closed;
        self.reconnect_at = None;
        self.terminated = true;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Opened,
    Message(InboundMessage),
    Closed {
        cause: CloseCause,
        reconnect_in: Option<Duration>,
    },
}

type ConnectFuture = BoxFuture<'static, Result<Box<dyn Connection>, SnapError>>;
type MessageHandler = Box<dyn FnMut(&InboundMessage) + Send>;

/// A live channel bound to one mode. Drive it with [`ModeChannel::next_event`].
pub struct ModeChannel {
    mode: Mode,
    url: Url,
    connector: Arc<dyn Connector>,
    machine: ChannelMachine,
    connection: Option<Box<dyn Connection>>,
    connecting: Option<ConnectFuture>,
    handlers: Vec<MessageHandler>,
    queued: VecDeque<ChannelEvent>,
}

impl ModeChannel {
    /// Start connecting to `<base>/<mode>`. The handshake runs inside `next_event`.
    pub fn open(
        mode: Mode,
        base: &Url,
        connector: Arc<dyn Connector>,
        policy: ReconnectPolicy,
    ) -> Result<Self, SnapError> {
        let url = mode.channel_url(base)?;
        let mut channel = Self {
            mode,
            url,
            connector,
            machine: ChannelMachine::new(policy),
            connection: None,
            connecting: None,
            handlers: Vec::new(),
            queued: VecDeque::new(),
        };
        channel.start_connect();
        Ok(channel)
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn state(&self) -> ChannelState {
        self.machine.state()
    }

    pub fn is_terminated(&self) -> bool {
        self.machine.is_terminated()
    }

    /// Register a handler called for every decoded inbound message, in registration order
    pub fn on_message<F>(&mut self, handler: F)
    where
        F: FnMut(&InboundMessage) + Send + 'static,
    {
        self.handlers.push(Box::new(handler));
    }

    pub async fn send(&mut self, message: &OutboundMessage) -> Result<(), SnapError> {
        if self.machine.state() != ChannelState::Open {
            return Err(SnapError::ChannelClosed(self.mode));
        }
        let text = message.to_json()?;
        let connection = self
            .connection
            .as_mut()
            .ok_or(SnapError::ChannelClosed(self.mode))?;

        log::debug!("[{}] -> {}", self.mode, text);
        if let Err(err) = connection.send_text(text).await {
            log::warn!("[{}] Send failed: {}", self.mode, err);
            self.connection = None;
            let event = self.closed(CloseCause::Transport(err.to_string()));
            self.queued.push_back(event);
            return Err(err);
        }
        Ok(())
    }

    /// Close the current connection. The user-stop code ends the channel for good;
    /// any other code reconnects after the usual delay.
    ///
    /// State is updated even if sending the close frame fails; that error is returned afterwards.
    pub async fn close(&mut self, code: u16) -> Result<(), SnapError> {
        self.connecting = None;
        let connection = self.connection.take();

        let (cause, reason) = if code == USER_STOP_CODE {
            self.machine.stop();
            (CloseCause::UserStop, "User stopped")
        } else {
            (CloseCause::Local { code }, "Client closing")
        };
        let reconnect_in = if cause.is_terminal() {
            None
        } else {
            self.machine.on_close(&cause, Instant::now())
        };
        log::info!("[{}] Channel {}", self.mode, cause);
        self.queued.push_back(ChannelEvent::Closed {
            cause,
            reconnect_in,
        });

        match connection {
            Some(mut connection) => close_with_timeout(connection.as_mut(), code, reason).await,
            None => Ok(()),
        }
    }

    /// Wait for the next channel event. Returns `None` once the channel is finished.
    ///
    /// Cancel-safe: the pending handshake and reconnect deadline live in `self`.
    pub async fn next_event(&mut self) -> Option<ChannelEvent> {
        loop {
            if let Some(event) = self.queued.pop_front() {
                return Some(event);
            }

            match self.machine.state() {
                ChannelState::Connecting => {
                    let result = match self.connecting.as_mut() {
                        Some(pending) => pending.await,
                        None => {
                            self.start_connect();
                            continue;
                        }
                    };
                    self.connecting = None;

                    match result {
                        Ok(connection) => {
                            self.connection = Some(connection);
                            self.machine.on_open();
                            log::info!("[{}] Connected to {}", self.mode, self.url);
                            return Some(ChannelEvent::Opened);
                        }
                        Err(err) => {
                            log::warn!("[{}] Connection failed: {}", self.mode, err);
                            return Some(self.closed(CloseCause::Transport(err.to_string())));
                        }
                    }
                }
                ChannelState::Open => {
                    let frame = match self.connection.as_mut() {
                        Some(connection) => connection.recv().await,
                        None => None,
                    };

                    match frame {
                        Some(Ok(Frame::Text(text))) => {
                            log::debug!("[{}] <- {}", self.mode, text);
                            match InboundMessage::decode(&text) {
                                Ok(message) => {
                                    if let Some(event) = self.deliver(message).await {
                                        return Some(event);
                                    }
                                }
                                Err(err) => {
                                    log::warn!("[{}] Dropping inbound message: {}", self.mode, err);
                                }
                            }
                        }
                        Some(Ok(Frame::Close { code, reason })) => {
                            self.connection = None;
                            let cause = CloseCause::from_close_frame(code, reason);
                            return Some(self.closed(cause));
                        }
                        Some(Err(err)) => {
                            self.connection = None;
                            return Some(self.closed(CloseCause::Transport(err.to_string())));
                        }
                        None => {
                            self.connection = None;
                            return Some(self.closed(CloseCause::Transport(
                                "connection closed without a close frame".to_string(),
                            )));
                        }
                    }
                }
                ChannelState::Closed => {
                    let deadline = match self.machine.reconnect_deadline() {
                        Some(deadline) if !self.machine.is_terminated() => deadline,
                        _ => return None,
                    };
                    tokio::time::sleep_until(deadline).await;
                    if self.machine.poll_reconnect(Instant::now()) {
                        log::info!("[{}] Reconnecting to {}", self.mode, self.url);
                        self.start_connect();
                    }
                }
            }
        }
    }

    async fn deliver(&mut self, message: InboundMessage) -> Option<ChannelEvent> {
        for handler in self.handlers.iter_mut() {
            handler(&message);
        }

        if !self.machine.on_message(&message, Instant::now()) {
            if let InboundMessage::Error { message: text } = &message {
                log::warn!("[{}] Server error: {}", self.mode, text);
            }
            return Some(ChannelEvent::Message(message));
        }

        // Queue before closing so a cancelled close loses nothing
        log::warn!("[{}] Mode reported inactive, closing channel", self.mode);
        self.queued.push_back(ChannelEvent::Message(message));
        self.queued.push_back(ChannelEvent::Closed {
            cause: CloseCause::ModeInactive,
            reconnect_in: None,
        });
        if let Some(mut connection) = self.connection.take() {
            if let Err(err) =
                close_with_timeout(connection.as_mut(), USER_STOP_CODE, "Mode inactive").await
            {
                log::debug!("[{}] Close after inactive signal failed: {}", self.mode, err);
            }
        }
        None
    }

    fn start_connect(&mut self) {
        let connector = self.connector.clone();
        let url = self.url.clone();
        self.connecting = Some(Box::pin(async move { connector.connect(&url).await }));
    }

    fn closed(&mut self, cause: CloseCause) -> ChannelEvent {
        let reconnect_in = self.machine.on_close(&cause, Instant::now());
        match reconnect_in {
            Some(delay) => log::info!(
                "[{}] Channel {}; reconnecting in {:?}",
                self.mode,
                cause,
                delay
            ),
            None => log::info!("[{}] Channel {}", self.mode, cause),
        }
        ChannelEvent::Closed {
            cause,
            reconnect_in,
        }
    }
}

impl fmt::Debug for ModeChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModeChannel")
            .field("mode", &self.mode)
            .field("url", &self.url.as_str())
            .field("state", &self.machine.state())
            .finish()
    }
}

pub(crate) async fn close_with_timeout(
    connection: &mut dyn Connection,
    code: u16,
    reason: &str,
) -> Result<(), SnapError> {
    tokio::time::timeout(CLOSE_TIMEOUT, connection.close(code, reason))
        .await
        .map_err(|_| SnapError::Timeout)?
}
