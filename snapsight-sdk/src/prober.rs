// ABOUTME: Capability prober that discovers which processing mode the server has active
// ABOUTME: Opens short-lived channels to every candidate concurrently and waits for a status message

use futures_util::future::join_all;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use url::Url;

use crate::channel::close_with_timeout;
use crate::constants::{channel::USER_STOP_CODE, probe};
use crate::message::InboundMessage;
use crate::mode::Mode;
use crate::transport::{Connection, Connector, Frame};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResult {
    pub mode: Mode,
    pub active: bool,
}

pub struct CapabilityProber {
    connector: Arc<dyn Connector>,
    base_url: Url,
    timeout: Duration,
}

impl CapabilityProber {
    pub fn new(connector: Arc<dyn Connector>, base_url: Url) -> Self {
        Self {
            connector,
            base_url,
            timeout: probe::TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Probe order: the remembered mode first, then `modes`, without duplicates
    pub fn candidates(modes: &[Mode], remembered: Option<Mode>) -> Vec<Mode> {
        let mut candidates = Vec::with_capacity(modes.len() + 1);
        for mode in remembered.into_iter().chain(modes.iter().copied()) {
            if !candidates.contains(&mode) {
                candidates.push(mode);
            }
        }
        candidates
    }

    /// First candidate reporting active, so a still-active remembered mode wins
    pub async fn probe(&self, modes: &[Mode], remembered: Option<Mode>) -> Option<Mode> {
        let candidates = Self::candidates(modes, remembered);
        let results = self.run(&candidates).await;

        let selected = results.iter().find(|r| r.active).map(|r| r.mode);
        match selected {
            Some(mode) => log::info!("Active mode: {}", mode),
            None => log::info!(
                "No active mode among {}",
                candidates
                    .iter()
                    .map(Mode::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }
        selected
    }

    /// Status of every mode, in the given order
    pub async fn probe_all(&self, modes: &[Mode]) -> Vec<ProbeResult> {
        self.run(&Self::candidates(modes, None)).await
    }

    async fn run(&self, candidates: &[Mode]) -> Vec<ProbeResult> {
        let deadline = Instant::now().checked_add(self.timeout);
        join_all(
            candidates
                .iter()
                .map(|&mode| self.probe_one(mode, deadline)),
        )
        .await
    }

    async fn probe_one(&self, mode: Mode, deadline: Option<Instant>) -> ProbeResult {
        let inactive = ProbeResult {
            mode,
            active: false,
        };

        let url = match mode.channel_url(&self.base_url) {
            Ok(url) => url,
            Err(err) => {
                log::warn!("Cannot probe {}: {}", mode, err);
                return inactive;
            }
        };

        let mut connection = match before(deadline, self.connector.connect(&url)).await {
            Some(Ok(connection)) => connection,
            Some(Err(err)) => {
                log::debug!("Probe of {} failed: {}", mode, err);
                return inactive;
            }
            None => {
                log::debug!("Probe of {} timed out connecting", mode);
                return inactive;
            }
        };

        let active = match before(deadline, await_status(connection.as_mut(), mode)).await {
            Some(active) => active,
            None => {
                log::debug!("Probe of {} timed out waiting for status", mode);
                false
            }
        };

        let closed =
            close_with_timeout(connection.as_mut(), USER_STOP_CODE, "Probe finished").await;
        if let Err(err) = closed {
            log::debug!("Closing probe of {} failed: {}", mode, err);
        }

        ProbeResult { mode, active }
    }
}

/// Run `future` until `deadline`; `None` when it ran out. No deadline means no limit.
async fn before<F: Future>(deadline: Option<Instant>, future: F) -> Option<F::Output> {
    match deadline {
        Some(deadline) => timeout_at(deadline, future).await.ok(),
        None => Some(future.await),
    }
}

async fn await_status(connection: &mut dyn Connection, mode: Mode) -> bool {
    while let Some(frame) = connection.recv().await {
        match frame {
            Ok(Frame::Text(text)) => match InboundMessage::decode(&text) {
                Ok(InboundMessage::Status { active, message }) => {
                    log::debug!("Probe of {}: active={} {}", mode, active, message);
                    return active;
                }
                Ok(_) => log::debug!("Probe of {} ignoring non-status message", mode),
                Err(err) => {
                    log::debug!("Probe of {} got a malformed message: {}", mode, err);
                    return false;
                }
            },
            Ok(Frame::Close { code, .. }) => {
                log::debug!("Probe of {} closed by server ({})", mode, code);
                return false;
            }
            Err(err) => {
                log::debug!("Probe of {} failed: {}", mode, err);
                return false;
            }
        }
    }
    false
}
