// ABOUTME: Configuration file loading, validation, and hierarchical merging for snapsight
// ABOUTME: Reads TOML from project and XDG locations, then applies SNAPSIGHT_* environment overrides

use anyhow::{anyhow, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use snapsight_sdk::constants as sdk_constants;
use snapsight_sdk::{ApiClientConfig, Mode, ReconnectPolicy, SessionConfig};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::{env, paths, timeouts};

static DURATION_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)(ms|s|m|h)$").expect("duration pattern is valid"));

#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub ws_url: Option<String>,
    #[serde(default)]
    pub images_prefix: Option<String>,
    #[serde(default)]
    pub modes: Option<Vec<Mode>>,
    #[serde(default, deserialize_with = "deserialize_duration")]
    pub probe_timeout: Option<Duration>,
    #[serde(default, deserialize_with = "deserialize_duration")]
    pub reconnect_delay: Option<Duration>,
    #[serde(default, deserialize_with = "deserialize_duration")]
    pub ack_timeout: Option<Duration>,
    #[serde(default, deserialize_with = "deserialize_duration")]
    pub poll_interval: Option<Duration>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub max_reconnects: Option<u32>,
    /// Only ever set from the environment
    #[serde(skip)]
    pub token: Option<String>,
}

impl Config {
    /// Load configuration from standard locations and the process environment
    pub fn load() -> Result<Self> {
        let paths = Self::get_config_paths();
        let config = Self::load_from_paths(&paths.iter().map(|p| p.as_str()).collect::<Vec<_>>())?;
        Ok(config.with_env_overrides(|name| std::env::var(name).ok()))
    }

    /// Load configuration from file paths in order of precedence (highest first)
    pub fn load_from_paths(paths: &[&str]) -> Result<Self> {
        let mut config = Config::default();

        for path in paths.iter().rev() {
            if !Path::new(path).exists() {
                continue;
            }
            let file_config = Self::load_from_file(path)?;
            config = config.merge(file_config);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a single file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Config = toml::from_str(&content).with_context(|| {
            format!(
                "Failed to parse TOML config file: {}",
                path.as_ref().display()
            )
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get standard config file paths in order of precedence (highest first)
    pub fn get_config_paths() -> Vec<String> {
        let mut paths = Vec::new();

        if let Ok(current_dir) = std::env::current_dir() {
            paths.push(
                current_dir
                    .join(paths::PROJECT_CONFIG)
                    .to_string_lossy()
                    .to_string(),
            );
        }

        if let Some(config_home) = std::env::var_os("XDG_CONFIG_HOME") {
            let path = PathBuf::from(config_home)
                .join(paths::CONFIG_DIR)
                .join(paths::CONFIG_FILE);
            paths.push(path.to_string_lossy().to_string());
        }

        if let Some(home_dir) = dirs::home_dir() {
            let path = home_dir
                .join(".config")
                .join(paths::CONFIG_DIR)
                .join(paths::CONFIG_FILE);
            paths.push(path.to_string_lossy().to_string());
        }

        paths
    }

    /// Merge this config with another, giving precedence to the other config
    pub fn merge(self, other: Config) -> Config {
        Config {
            api_url: other.api_url.or(self.api_url),
            ws_url: other.ws_url.or(self.ws_url),
            images_prefix: other.images_prefix.or(self.images_prefix),
            modes: other.modes.or(self.modes),
            probe_timeout: other.probe_timeout.or(self.probe_timeout),
            reconnect_delay: other.reconnect_delay.or(self.reconnect_delay),
            ack_timeout: other.ack_timeout.or(self.ack_timeout),
            poll_interval: other.poll_interval.or(self.poll_interval),
            max_retries: other.max_retries.or(self.max_retries),
            max_reconnects: other.max_reconnects.or(self.max_reconnects),
            token: other.token.or(self.token),
        }
    }

    /// Apply `SNAPSIGHT_*` overrides from `lookup`
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Config
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        if let Some(api_url) = non_empty(env::API_URL) {
            self.api_url = Some(api_url);
        }
        if let Some(ws_url) = non_empty(env::WS_URL) {
            self.ws_url = Some(ws_url);
        }
        if let Some(token) = non_empty(env::TOKEN) {
            self.token = Some(token);
        }
        self
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        if let Some(modes) = &self.modes {
            if modes.is_empty() {
                return Err(anyhow!("`modes` must list at least one mode"));
            }
        }
        for (name, value) in [
            ("probe_timeout", self.probe_timeout),
            ("reconnect_delay", self.reconnect_delay),
            ("ack_timeout", self.ack_timeout),
            ("poll_interval", self.poll_interval),
        ] {
            if let Some(value) = value {
                if value > timeouts::MAX_CONFIG_DURATION {
                    return Err(anyhow!(
                        "`{}` must be at most {}h, got {:?}",
                        name,
                        timeouts::MAX_CONFIG_DURATION.as_secs() / 3600,
                        value
                    ));
                }
            }
        }
        for (name, value) in [("api_url", &self.api_url), ("ws_url", &self.ws_url)] {
            if let Some(value) = value {
                url::Url::parse(value)
                    .with_context(|| format!("Invalid `{}` in config: {}", name, value))?;
            }
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
            .unwrap_or(sdk_constants::dispatch::POLL_INTERVAL)
    }

    /// Session settings with unset keys left at the SDK defaults
    pub fn session_config(&self) -> SessionConfig {
        let defaults = SessionConfig::default();
        SessionConfig {
            ws_base: self.ws_url.clone().or(defaults.ws_base),
            modes: self.modes.clone().unwrap_or(defaults.modes),
            probe_timeout: self.probe_timeout.unwrap_or(defaults.probe_timeout),
            reconnect: ReconnectPolicy {
                delay: self.reconnect_delay.unwrap_or(defaults.reconnect.delay),
                max_attempts: self.max_reconnects.or(defaults.reconnect.max_attempts),
            },
            max_retries: self.max_retries.unwrap_or(defaults.max_retries),
            ack_timeout: self.ack_timeout.or(defaults.ack_timeout),
        }
    }

    /// REST client settings; `images_prefix` falls back to the SDK default
    pub fn api_client_config(&self, token: Option<SecretString>) -> ApiClientConfig {
        ApiClientConfig {
            auth_token: token,
            base_url: self.api_url.clone(),
            timeout: sdk_constants::timeouts::HTTP_REQUEST_TIMEOUT,
            max_retries: sdk_constants::retry::MAX_RETRIES,
            images_prefix: self
                .images_prefix
                .clone()
                .unwrap_or_else(|| sdk_constants::urls::IMAGES_PREFIX.to_string()),
        }
    }
}

/// Parse a duration such as `500ms`, `5s`, `2m` or `1h`
pub fn parse_duration(value: &str) -> Result<Duration> {
    let captures = DURATION_PATTERN.captures(value.trim()).ok_or_else(|| {
        anyhow!(
            "Invalid duration '{}'. Expected a number followed by ms, s, m or h",
            value
        )
    })?;
    let amount: u64 = captures[1]
        .parse()
        .with_context(|| format!("Duration out of range: {}", value))?;
    let secs_per_unit = match &captures[2] {
        "ms" => return Ok(Duration::from_millis(amount)),
        "s" => 1,
        "m" => 60,
        _ => 3600,
    };
    amount
        .checked_mul(secs_per_unit)
        .map(Duration::from_secs)
        .ok_or_else(|| anyhow!("Duration out of range: {}", value))
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let value: Option<String> = Option::deserialize(deserializer)?;
    value
        .map(|raw| parse_duration(&raw).map_err(|e| D::Error::custom(e.to_string())))
        .transpose()
}
