//! Configuration structs with sensible defaults and RON persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const CONFIG_FILE: &str = "gamepad.ron";

/// `<platform config dir>/nebula-gamepad`.
pub fn default_config_dir() -> Result<PathBuf, ConfigError> {
    dirs::config_dir()
        .map(|dir| dir.join("nebula-gamepad"))
        .ok_or(ConfigError::NoConfigDir)
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Gamepad layer settings.
    pub gamepad: GamepadConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Gamepad layer configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GamepadConfig {
    /// Bring up the platform backend at all.
    pub enabled: bool,
    /// Number of registry slots exposed as gamepads.
    pub max_gamepads: usize,
    /// Radial dead zone of the left stick, in stick units.
    pub left_stick_dead_zone: f32,
    /// Radial dead zone of the right stick, in stick units.
    pub right_stick_dead_zone: f32,
    /// Stick magnitude reported as 1.0.
    pub stick_max_magnitude: f32,
    /// Trigger value below which the trigger reads 0.0.
    pub trigger_activation: f32,
    /// Trigger value reported as 1.0.
    pub trigger_max: f32,
    /// Ticks between hot-plug rescans on backends without notifications.
    pub rescan_interval_ticks: u32,
    /// Extra community-format mapping lines loaded after the built-in table.
    pub extra_mappings: Vec<String>,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
    /// Log every raw joystick slot each tick in the probe.
    pub dump_raw_state: bool,
}

// --- Default implementations ---

impl Default for GamepadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_gamepads: 4,
            left_stick_dead_zone: 7849.0 / 32767.0,
            right_stick_dead_zone: 8689.0 / 32767.0,
            stick_max_magnitude: 1.0,
            trigger_activation: 30.0 / 255.0,
            trigger_max: 1.0,
            rescan_interval_ticks: 60,
            extra_mappings: Vec::new(),
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            dump_raw_state: false,
        }
    }
}

// --- Load / Save / Reload ---

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
            let config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `gamepad.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let config_path = config_dir.join(CONFIG_FILE);
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);

        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(&config_path, serialized).map_err(ConfigError::WriteError)?;
        Ok(())
    }

    /// Hot-reload: returns `Some(new_config)` if the file changed, `None` otherwise.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);
        let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
        let new_config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;

        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }
}
