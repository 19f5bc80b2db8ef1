// ABOUTME: Persisted user preferences, chiefly the last mode that accepted a session
// ABOUTME: Backs the SDK's remembered-mode store with ~/.snapsight/preferences.json

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use snapsight_sdk::{Mode, ModeMemory, SnapError};
use std::path::PathBuf;

use crate::constants::paths;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct UserPreferences {
    #[serde(default)]
    pub last_mode: Option<Mode>,
}

pub struct PreferencesManager {
    config_dir: PathBuf,
}

impl PreferencesManager {
    pub fn new() -> anyhow::Result<Self> {
        let config_dir = Self::get_config_dir()?;
        Ok(Self { config_dir })
    }

    /// Manager rooted at an explicit directory
    pub fn with_dir(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    fn get_config_dir() -> anyhow::Result<PathBuf> {
        let home = dirs::home_dir().ok_or_else(|| anyhow!("Could not determine home directory"))?;
        Ok(home.join(paths::STATE_DIR))
    }

    pub fn preferences_file(&self) -> PathBuf {
        self.config_dir.join(paths::PREFERENCES_FILE)
    }

    pub fn load_preferences(&self) -> anyhow::Result<UserPreferences> {
        let file_path = self.preferences_file();

        if !file_path.exists() {
            return Ok(UserPreferences::default());
        }

        let content = std::fs::read_to_string(&file_path)
            .with_context(|| format!("Failed to read {}", file_path.display()))?;
        let preferences: UserPreferences = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", file_path.display()))?;
        Ok(preferences)
    }

    pub fn save_preferences(&self, preferences: &UserPreferences) -> anyhow::Result<()> {
        if !self.config_dir.exists() {
            std::fs::create_dir_all(&self.config_dir)?;
        }
        let content = serde_json::to_string_pretty(preferences)?;
        std::fs::write(self.preferences_file(), content)?;
        Ok(())
    }

    pub fn update_last_mode(&self, mode: Option<Mode>) -> anyhow::Result<()> {
        let mut preferences = self.load_preferences().unwrap_or_default();
        preferences.last_mode = mode;
        self.save_preferences(&preferences)
    }
}

impl ModeMemory for PreferencesManager {
    fn load(&self) -> Option<Mode> {
        match self.load_preferences() {
            Ok(preferences) => preferences.last_mode,
            Err(e) => {
                log::warn!("Ignoring unreadable preferences: {:#}", e);
                None
            }
        }
    }

    fn store(&mut self, mode: Mode) -> Result<(), SnapError> {
        self.update_last_mode(Some(mode))
            .map_err(|e| SnapError::Storage(format!("{:#}", e)))
    }

    fn clear(&mut self) -> Result<(), SnapError> {
        self.update_last_mode(None)
            .map_err(|e| SnapError::Storage(format!("{:#}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_manager() -> (PreferencesManager, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let manager = PreferencesManager::with_dir(temp_dir.path().join("state"));
        (manager, temp_dir)
    }

    #[test]
    fn test_load_default_preferences() {
        let (manager, _temp) = create_test_manager();
        let preferences = manager.load_preferences().unwrap();
        assert_eq!(preferences.last_mode, None);
    }

    #[test]
    fn test_save_creates_directory_and_round_trips() {
        let (manager, _temp) = create_test_manager();

        manager
            .save_preferences(&UserPreferences {
                last_mode: Some(Mode::Navigate),
            })
            .unwrap();

        let content = std::fs::read_to_string(manager.preferences_file()).unwrap();
        assert!(content.contains("\"last_mode\": \"navigate\""));
        assert_eq!(
            manager.load_preferences().unwrap().last_mode,
            Some(Mode::Navigate)
        );
    }

    #[test]
    fn test_mode_memory_store_and_clear() {
        let (mut manager, _temp) = create_test_manager();
        assert_eq!(ModeMemory::load(&manager), None);

        ModeMemory::store(&mut manager, Mode::Calorie).unwrap();
        assert_eq!(ModeMemory::load(&manager), Some(Mode::Calorie));

        ModeMemory::clear(&mut manager).unwrap();
        assert_eq!(ModeMemory::load(&manager), None);
    }

    #[test]
    fn test_corrupt_preferences_are_forgotten() {
        let (mut manager, _temp) = create_test_manager();
        std::fs::create_dir_all(manager.preferences_file().parent().unwrap()).unwrap();
        std::fs::write(manager.preferences_file(), "{not json").unwrap();

        assert!(manager.load_preferences().is_err());
        assert_eq!(ModeMemory::load(&manager), None);

        ModeMemory::store(&mut manager, Mode::Translate).unwrap();
        assert_eq!(ModeMemory::load(&manager), Some(Mode::Translate));
    }

    #[test]
    fn test_unknown_mode_is_rejected() {
        let (manager, _temp) = create_test_manager();
        std::fs::create_dir_all(manager.preferences_file().parent().unwrap()).unwrap();
        std::fs::write(manager.preferences_file(), r#"{"last_mode": "dance"}"#).unwrap();
        assert!(manager.load_preferences().is_err());
    }
}
