// ABOUTME: Snapsight SDK for routing page images to a single active processing mode
// ABOUTME: Provides the capability prober, reconnecting mode channels, image dispatch and REST client

pub mod api;
pub mod channel;
pub mod constants;
pub mod dispatcher;
pub mod error;
pub mod fetcher;
pub mod image;
pub mod message;
pub mod mode;
pub mod observer;
pub mod prober;
pub mod retry;
pub mod session;
pub mod storage;
pub mod transport;

#[cfg(test)]
mod test_helpers;

pub use api::{
    ApiClient, ApiClientConfig, RegisterParams, TokenResponse, ToggleResponse, UploadResponse,
    User,
};
pub use channel::{ChannelEvent, ChannelState, CloseCause, ModeChannel, ReconnectPolicy};
pub use dispatcher::{Delivery, ImageDispatcher};
pub use error::SnapError;
pub use fetcher::{HttpImageFetcher, ImageFetcher};
pub use image::{ImageCandidate, ImageRef, ImageSource};
pub use message::{InboundMessage, OutboundMessage};
pub use mode::Mode;
pub use observer::{ContentRoot, DirectoryRoot, ObserverHandle, PageRoot};
pub use prober::{CapabilityProber, ProbeResult};
pub use retry::RetryConfig;
pub use session::{
    InMemoryModeMemory, ModeMemory, Session, SessionConfig, SessionEvent, StopReason,
};
pub use transport::{Connection, Connector, Frame, WsConnector};
