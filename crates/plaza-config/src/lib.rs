//! Configuration for the Plaza client.
//!
//! Settings persist to disk as a RON file in the OS configuration directory.
//! CLI flags parsed with clap override whatever was loaded, and unknown or
//! missing fields fall back to defaults so older files keep loading.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{
    CONFIG_FILE_NAME, Config, DebugConfig, EditorConfig, NetworkConfig, ProfileConfig,
    ReconnectSettings, default_config_dir,
};
pub use error::ConfigError;
