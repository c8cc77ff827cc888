//! Configuration structs with sensible defaults and RON persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// File name of the persisted configuration inside the config directory.
pub const CONFIG_FILE_NAME: &str = "config.ron";

const APP_DIR_NAME: &str = "plaza";

/// Top-level client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Host connection and location streaming.
    pub network: NetworkConfig,
    /// Local self metadata, republished on every join.
    pub profile: ProfileConfig,
    /// Collaborative editor settings.
    pub editor: EditorConfig,
    /// Caller-side reconnection backoff.
    pub reconnect: ReconnectSettings,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// `host:port` of the control channel.
    pub host_address: String,
    /// World to join once transports are ready.
    pub world_uri: String,
    /// Rate at which the local player's location record is published (Hz).
    /// Remote players are interpolated at half this rate.
    pub publish_rate_hz: u32,
    /// Largest control frame accepted from the host, in bytes.
    pub max_frame_size: u32,
}

/// Local player metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProfileConfig {
    /// Free-form nickname shown when no handle is known.
    pub nickname: Option<String>,
    /// Avatar model reference.
    pub avatar_uri: Option<String>,
    /// Identity handle, e.g. `@alice@example.org`.
    pub handle: Option<String>,
}

/// Editor configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EditorConfig {
    /// Milliseconds between document reconciliation cycles.
    pub reconcile_interval_ms: u64,
}

/// Backoff applied by the application when it re-invokes `connect`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconnectSettings {
    /// Delay before the first retry.
    pub initial_delay_ms: u64,
    /// Multiplier applied after every failed attempt.
    pub backoff_multiplier: f64,
    /// Upper bound on the delay.
    pub max_delay_ms: u64,
    /// Attempts before giving up. 0 disables reconnection.
    pub max_attempts: u32,
    /// Jitter factor in `[0, 1]`.
    pub jitter: f64,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log filter override (e.g. `"debug"`, `"info,plaza_net=trace"`).
    pub log_level: String,
}

// --- Default implementations ---

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host_address: "127.0.0.1:7777".to_string(),
            world_uri: "plaza://lobby".to_string(),
            publish_rate_hz: 20,
            max_frame_size: 1_048_576,
        }
    }
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            reconcile_interval_ms: 100,
        }
    }
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            backoff_multiplier: 2.0,
            max_delay_ms: 30_000,
            max_attempts: 20,
            jitter: 0.25,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Resolve `<os config dir>/plaza`.
pub fn default_config_dir() -> Result<PathBuf, ConfigError> {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR_NAME))
        .ok_or(ConfigError::NoConfigDir)
}

// --- Load / Save / Reload ---

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE_NAME);

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
            let config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
            config.validate()?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let config_path = config_dir.join(CONFIG_FILE_NAME);
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
        let config_path = config_dir.join(CONFIG_FILE_NAME);
        let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
        let new_config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
        new_config.validate()?;

        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }

    /// Reject values that would stall the client (zero rates, bad jitter).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.publish_rate_hz < 2 {
            return Err(ConfigError::InvalidValue {
                field: "network.publish_rate_hz",
                reason: format!(
                    "must be at least 2, got {}",
                    self.network.publish_rate_hz
                ),
            });
        }
        if self.editor.reconcile_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "editor.reconcile_interval_ms",
                reason: "must be non-zero".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.reconnect.jitter) {
            return Err(ConfigError::InvalidValue {
                field: "reconnect.jitter",
                reason: format!("must be within [0, 1], got {}", self.reconnect.jitter),
            });
        }
        Ok(())
    }
}
