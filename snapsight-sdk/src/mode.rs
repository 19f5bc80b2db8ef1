// ABOUTME: Processing modes offered by the backend and their endpoint naming
// ABOUTME: A mode is the routing key for channel URLs and REST image routes

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;

use crate::error::SnapError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Mode {
    Translate,
    Calorie,
    Navigate,
}

impl Mode {
    /// Every mode in default probe order
    pub const ALL: [Mode; 3] = [Mode::Translate, Mode::Calorie, Mode::Navigate];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Translate => "translate",
            Mode::Calorie => "calorie",
            Mode::Navigate => "navigate",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Mode::Translate => "Image text translation",
            Mode::Calorie => "Food calorie estimation",
            Mode::Navigate => "Navigation and obstacle analysis",
        }
    }

    /// Channel endpoint for this mode: the base URL with the mode appended as a path segment
    pub fn channel_url(&self, base: &Url) -> Result<Url, SnapError> {
        let mut url = base.clone();
        url.path_segments_mut()
            .map_err(|_| {
                SnapError::Configuration(format!("Channel base URL cannot be a base: {}", base))
            })?
            .pop_if_empty()
            .push(self.as_str());
        Ok(url)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = SnapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "translate" => Ok(Mode::Translate),
            "calorie" => Ok(Mode::Calorie),
            "navigate" => Ok(Mode::Navigate),
            _ => Err(SnapError::UnknownMode(s.to_string())),
        }
    }
}

impl TryFrom<String> for Mode {
    type Error = SnapError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
