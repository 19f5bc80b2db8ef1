// ABOUTME: Centralized constants for the snapsight CLI application
// ABOUTME: Contains file locations, environment variable names, timeouts and UI sizes

/// Where configuration and preferences live
pub mod paths {
    /// Project-local config file name
    pub const PROJECT_CONFIG: &str = "snapsight.toml";

    /// Directory name under the XDG config home
    pub const CONFIG_DIR: &str = "snapsight";

    /// Config file name inside the config directory
    pub const CONFIG_FILE: &str = "config.toml";

    /// Hidden directory under the home directory for persisted state
    pub const STATE_DIR: &str = ".snapsight";

    /// Preferences file inside the state directory
    pub const PREFERENCES_FILE: &str = "preferences.json";
}

/// Environment variables that override the config file
pub mod env {
    pub const API_URL: &str = "SNAPSIGHT_API_URL";
    pub const WS_URL: &str = "SNAPSIGHT_WS_URL";
    pub const TOKEN: &str = "SNAPSIGHT_TOKEN";
}

/// Timeout configurations for various operations
pub mod timeouts {
    use std::time::Duration;

    /// How long `send` waits for results before stopping
    pub const SEND_WAIT: Duration = Duration::from_secs(60);

    /// Upper bound for any duration in the config file
    pub const MAX_CONFIG_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

    /// Progress spinner tick interval
    pub const PROGRESS_BAR_TICK_MS: u64 = 80;
}

/// UI and formatting constants
pub mod ui {
    /// Width of the rule drawn around result blocks
    pub const BORDER_LINE_LENGTH: usize = 27;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_paths() {
        assert!(paths::PROJECT_CONFIG.ends_with(".toml"));
        assert!(paths::CONFIG_FILE.ends_with(".toml"));
        assert!(paths::STATE_DIR.starts_with('.'));
    }

    #[test]
    fn test_env_names() {
        for name in [env::API_URL, env::WS_URL, env::TOKEN] {
            assert!(name.starts_with("SNAPSIGHT_"));
        }
    }

    #[test]
    fn test_timeouts() {
        assert_eq!(timeouts::SEND_WAIT, Duration::from_secs(60));
        assert_eq!(timeouts::PROGRESS_BAR_TICK_MS, 80);
        assert!(timeouts::SEND_WAIT < timeouts::MAX_CONFIG_DURATION);
    }
}
