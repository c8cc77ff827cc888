//! The Plaza client binary.

use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use clap::Parser;
use plaza_app::{FixedStepLoop, PlatformDirs, Session};
use plaza_config::{CliArgs, Config};
use tracing::{info, warn};

/// How often the config file is checked for edits.
const CONFIG_POLL_INTERVAL: Duration = Duration::from_secs(2);

fn main() -> ExitCode {
    let args = CliArgs::parse();

    let dirs = match PlatformDirs::resolve(args.config.as_deref()) {
        Ok(dirs) => dirs,
        Err(e) => {
            eprintln!("Failed to resolve platform directories: {e}");
            return ExitCode::FAILURE;
        }
    };
    let mut file_config = match Config::load_or_create(&dirs.config_dir) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };
    let mut config = file_config.clone();
    config.apply_cli_overrides(&args);
    plaza_log::init_logging(Some(&dirs.log_dir), cfg!(debug_assertions), Some(&config));
    info!(config_dir = %dirs.config_dir.display(), "starting plaza client");

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("plaza-net")
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(%e, "failed to start network runtime");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    runtime.spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            flag.store(true, Ordering::SeqCst);
        }
    });

    let mut session = Session::new(&config, runtime.handle().clone());
    if let Err(e) = session.connect(&config.network.world_uri, &config.network.host_address) {
        warn!(%e, "initial connection attempt failed");
    }

    let mut fixed = FixedStepLoop::new();
    let mut last_config_poll = Instant::now();
    while !shutdown.load(Ordering::SeqCst) {
        fixed.tick(|dt| session.step(dt));

        if last_config_poll.elapsed() >= CONFIG_POLL_INTERVAL {
            last_config_poll = Instant::now();
            // Compare against the file as loaded, not the CLI-overridden copy.
            match file_config.reload(&dirs.config_dir) {
                Ok(Some(reloaded)) => {
                    file_config = reloaded;
                    let mut config = file_config.clone();
                    config.apply_cli_overrides(&args);
                    session.apply_config(&config);
                }
                Ok(None) => {}
                Err(e) => warn!(%e, "ignoring config reload"),
            }
        }

        std::thread::sleep(fixed.until_next_step());
    }

    session.shutdown();
    info!(steps = fixed.step_count(), "plaza client stopped");
    ExitCode::SUCCESS
}
