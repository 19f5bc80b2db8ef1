// ABOUTME: Image dispatcher that deduplicates observed images and decides how each one is delivered
// ABOUTME: Owns the session seen-set, the pending queue and the in-flight reference deliveries

use std::collections::{HashSet, VecDeque};
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

use crate::channel::ChannelState;
use crate::constants::dispatch;
use crate::image::{is_http, normalize_key, ImageRef, ImageSource};
use crate::message::OutboundMessage;

/// What the caller must do with a dispatched image
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// Send this reference message as is
    Reference {
        image: ImageRef,
        message: OutboundMessage,
    },
    /// Load the image content and send it inline; one-shot
    Inline(ImageRef),
    /// The channel is not open; the image waits in the pending queue
    Queued { key: String },
}

impl Delivery {
    pub fn key(&self) -> &str {
        match self {
            Delivery::Reference { image, .. } | Delivery::Inline(image) => &image.key,
            Delivery::Queued { key } => key,
        }
    }
}

#[derive(Debug)]
pub struct ImageDispatcher {
    seen: HashSet<String>,
    pending: VecDeque<ImageRef>,
    in_flight: VecDeque<(ImageRef, Instant)>,
    max_retries: u32,
}

impl Default for ImageDispatcher {
    fn default() -> Self {
        Self::new(dispatch::MAX_RETRIES)
    }
}

impl ImageDispatcher {
    pub fn new(max_retries: u32) -> Self {
        Self {
            seen: HashSet::new(),
            pending: VecDeque::new(),
            in_flight: VecDeque::new(),
            max_retries,
        }
    }

    /// Accept the images in `batch` that were never seen in this session.
    /// Remote sources that are not http(s) are ignored.
    pub fn observe<I>(&mut self, batch: I) -> Vec<ImageRef>
    where
        I: IntoIterator<Item = ImageSource>,
    {
        batch
            .into_iter()
            .filter_map(|source| self.accept(source))
            .collect()
    }

    pub fn accept(&mut self, source: ImageSource) -> Option<ImageRef> {
        if let ImageSource::Remote(url) = &source {
            if !is_http(url) {
                log::debug!("Ignoring non-http image {}", url.scheme());
                return None;
            }
        }

        let image = ImageRef::new(source);
        if !self.seen.insert(image.key.clone()) {
            return None;
        }
        log::debug!("New image {}", image.key);
        Some(image)
    }

    pub fn dispatch(&mut self, mut image: ImageRef, state: ChannelState, now: Instant) -> Delivery {
        self.forget_in_flight(&image.key);

        if state != ChannelState::Open {
            let key = image.key.clone();
            if !self.is_pending(&key) {
                log::debug!("Channel {}, queuing {}", state, key);
                self.pending.push_back(image);
            }
            return Delivery::Queued { key };
        }

        let url = match image.url().map(Url::to_string) {
            Some(url) => url,
            None => return Delivery::Inline(image),
        };
        if image.retry_count >= self.max_retries {
            log::info!(
                "{} unacknowledged after {} attempts, sending inline",
                image.key,
                image.retry_count
            );
            return Delivery::Inline(image);
        }

        let message = OutboundMessage::ImageUrl {
            url,
            retry: image.retry_count,
        };
        image.retry_count += 1;
        self.in_flight.push_back((image.clone(), now));
        Delivery::Reference { image, message }
    }

    /// Dispatch everything queued while the channel was down, oldest first
    pub fn drain_pending(&mut self, state: ChannelState, now: Instant) -> Vec<Delivery> {
        if state != ChannelState::Open {
            return Vec::new();
        }
        let pending: Vec<ImageRef> = self.pending.drain(..).collect();
        pending
            .into_iter()
            .map(|image| self.dispatch(image, state, now))
            .collect()
    }

    /// Take the oldest queued image
    pub fn pop_pending(&mut self) -> Option<ImageRef> {
        self.pending.pop_front()
    }

    /// Match a result to the reference delivery it answers. Without a reference the oldest
    /// in-flight delivery is acknowledged.
    pub fn acknowledge(&mut self, reference: Option<&str>) -> Option<ImageRef> {
        let index = match reference {
            Some(reference) => {
                let key = normalize_key(reference);
                self.in_flight.iter().position(|(image, _)| image.key == key)?
            }
            None => {
                if self.in_flight.is_empty() {
                    return None;
                }
                0
            }
        };
        self.in_flight.remove(index).map(|(image, _)| image)
    }

    /// Re-dispatch reference deliveries that have waited longer than `ack_timeout`
    pub fn expire_unacknowledged(
        &mut self,
        state: ChannelState,
        now: Instant,
        ack_timeout: Duration,
    ) -> Vec<Delivery> {
        let (expired, waiting): (Vec<_>, Vec<_>) = self
            .in_flight
            .drain(..)
            .partition(|(_, sent_at)| now.saturating_duration_since(*sent_at) >= ack_timeout);
        self.in_flight = waiting.into();

        expired
            .into_iter()
            .map(|(image, _)| {
                log::debug!("No result for {} after {:?}, resending", image.key, ack_timeout);
                self.dispatch(image, state, now)
            })
            .collect()
    }

    /// When the next in-flight delivery expires
    pub fn next_expiry(&self, ack_timeout: Duration) -> Option<Instant> {
        self.in_flight
            .iter()
            .filter_map(|(_, sent_at)| sent_at.checked_add(ack_timeout))
            .min()
    }

    /// Put back a delivery that could not be sent, at the front of the queue.
    /// A failed reference send does not count towards the retry ceiling.
    pub fn requeue(&mut self, delivery: Delivery) {
        let mut image = match delivery {
            Delivery::Reference { image, .. } => image,
            Delivery::Inline(image) => image,
            Delivery::Queued { .. } => return,
        };
        if self.forget_in_flight(&image.key) {
            image.retry_count = image.retry_count.saturating_sub(1);
        }
        if !self.is_pending(&image.key) {
            self.pending.push_front(image);
        }
    }

    /// Move every unacknowledged delivery back to the pending queue. Used when the
    /// connection carrying them is gone; their retry counts are kept.
    pub fn requeue_in_flight(&mut self) -> usize {
        let in_flight: Vec<ImageRef> = self.in_flight.drain(..).map(|(image, _)| image).collect();
        let count = in_flight.len();
        for image in in_flight.into_iter().rev() {
            if !self.is_pending(&image.key) {
                self.pending.push_front(image);
            }
        }
        count
    }

    pub fn clear_pending(&mut self) {
        self.pending.clear();
    }

    /// Forget everything, including which images were already seen
    pub fn reset(&mut self) {
        self.seen.clear();
        self.pending.clear();
        self.in_flight.clear();
    }

    pub fn is_seen(&self, key: &str) -> bool {
        self.seen.contains(key)
    }

    pub fn seen_len(&self) -> usize {
        self.seen.len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    fn is_pending(&self, key: &str) -> bool {
        self.pending.iter().any(|image| image.key == key)
    }

    fn forget_in_flight(&mut self, key: &str) -> bool {
        let before = self.in_flight.len();
        self.in_flight.retain(|(image, _)| image.key != key);
        self.in_flight.len() != before
    }
}
