// ABOUTME: Centralized constants for the snapsight SDK
// ABOUTME: Contains channel, probe, dispatch, retry and timeout defaults plus endpoint URLs

/// Mode channel constants
pub mod channel {
    use std::time::Duration;

    /// Fixed delay between a transport failure and the next connection attempt
    pub const RECONNECT_DELAY: Duration = Duration::from_secs(3);

    /// Close code that marks an explicit user stop (never reconnected)
    pub const USER_STOP_CODE: u16 = 1000;

    /// Substrings in a server error that mean the bound mode was switched off
    pub const INACTIVE_PHRASES: &[&str] = &["功能未激活", "not active"];

    /// Upper bound on sending a close frame
    pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);
}

/// Capability probe constants
pub mod probe {
    use std::time::Duration;

    /// Overall deadline for one probe round
    pub const TIMEOUT: Duration = Duration::from_secs(5);
}

/// Image dispatch constants
pub mod dispatch {
    use std::time::Duration;

    /// Reference deliveries per image before falling back to inline content
    pub const MAX_RETRIES: u32 = 3;

    /// How long a reference delivery may stay unacknowledged before it is resent
    pub const ACK_TIMEOUT: Duration = Duration::from_secs(30);

    /// Default poll interval for content observers
    pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

    /// Capacity of the observer mutation channel
    pub const MUTATION_BUFFER: usize = 32;
}

/// Retry configuration constants
pub mod retry {
    use std::time::Duration;

    /// Maximum number of retry attempts
    pub const MAX_RETRIES: u32 = 3;

    /// Initial delay before first retry
    pub const INITIAL_DELAY: Duration = Duration::from_millis(100);

    /// Maximum delay between retries
    pub const MAX_DELAY: Duration = Duration::from_secs(10);

    /// Backoff multiplier for exponential backoff
    pub const BACKOFF_MULTIPLIER: f64 = 2.0;
}

/// HTTP and connection timeouts
pub mod timeouts {
    use std::time::Duration;

    /// Default timeout for REST requests
    pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

    /// Timeout for the WebSocket handshake
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Timeout for downloading an image for inline delivery
    pub const IMAGE_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);
}

/// Backend URLs
pub mod urls {
    /// Base URL of the REST API
    pub const API_BASE: &str = "http://localhost:8000/api/v1";

    /// Base URL of the per-mode WebSocket endpoints
    pub const WS_BASE: &str = "ws://localhost:8000/api/v1/ws";

    /// Path prefix of the image processing routes
    pub const IMAGES_PREFIX: &str = "images";
}

/// Image limits
pub mod limits {
    /// Largest image accepted for inline delivery
    pub const MAX_IMAGE_SIZE: u64 = 10 * 1024 * 1024;
}

/// Error handling constants
pub mod errors {
    /// Server error status code range
    pub const SERVER_ERROR_MIN: u16 = 500;
    pub const SERVER_ERROR_MAX: u16 = 599;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_channel_constants() {
        assert_eq!(channel::RECONNECT_DELAY, Duration::from_secs(3));
        assert_eq!(channel::USER_STOP_CODE, 1000);
        assert!(channel::INACTIVE_PHRASES.contains(&"功能未激活"));
    }

    #[test]
    fn test_dispatch_constants() {
        assert_eq!(dispatch::MAX_RETRIES, 3);
        assert!(dispatch::ACK_TIMEOUT > channel::RECONNECT_DELAY);
    }

    #[test]
    fn test_url_constants() {
        assert!(urls::API_BASE.starts_with("http://"));
        assert!(urls::WS_BASE.starts_with("ws://"));
        assert!(urls::WS_BASE.ends_with("/ws"));
    }

    #[test]
    fn test_error_constants() {
        assert_eq!(errors::SERVER_ERROR_MIN, 500);
        assert_eq!(errors::SERVER_ERROR_MAX, 599);
    }
}
