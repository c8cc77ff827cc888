//! Command-line argument parsing.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Plaza client command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "plaza", about = "Shared-world client and scene editor")]
pub struct CliArgs {
    /// Control channel address (`host:port`).
    #[arg(long)]
    pub host: Option<String>,

    /// World URI to join.
    #[arg(long)]
    pub world: Option<String>,

    /// Nickname announced to other participants.
    #[arg(long)]
    pub nickname: Option<String>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref host) = args.host {
            self.network.host_address = host.clone();
        }
        if let Some(ref world) = args.world {
            self.network.world_uri = world.clone();
        }
        if let Some(ref nickname) = args.nickname {
            self.profile.nickname = Some(nickname.clone());
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}
