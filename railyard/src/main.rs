//! # Railyard Supervisor
//!
//! Boots the control core: configuration, storage, layout, drivers.
//! Commands can be typed on stdin (`locospeed 3 80`, `booster go`,
//! ...); ctrl-c shuts everything down in order.
//!
//! Exit codes: 0 on clean shutdown, 1 on startup failure (unreadable
//! configuration or storage).

use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;

use clap::Parser;
use serde::Deserialize;
use tokio::signal;
use tracing::{error, info, warn};

use railyard_common::config::{ConfigError, ConfigLoader, SharedConfig};
use railyard_common::settings::Settings;
use railyard_control::command::ControlCommand;
use railyard_control::storage::{load_layout, FileStorage};
use railyard_control::Manager;
use railyard_hal::{ControlEventSink, DriverRegistry, RailDriver};

#[derive(Debug, Parser)]
#[command(name = "railyard", about = "Model railway control")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "config/railyard.toml")]
    config: PathBuf,
}

#[derive(Debug, Deserialize)]
struct RailConfig {
    shared: SharedConfig,

    /// Directory holding the layout store.
    #[serde(default = "default_data_dir")]
    data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

impl Default for RailConfig {
    fn default() -> Self {
        Self {
            shared: SharedConfig {
                log_level: Default::default(),
                service_name: "railyard".to_string(),
            },
            data_dir: default_data_dir(),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match RailConfig::load(&args.config) {
        Ok(config) => config,
        Err(ConfigError::FileNotFound) => {
            // First start without a config file is fine; defaults apply.
            RailConfig::default()
        }
        Err(err) => {
            eprintln!("FATAL: {err}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(err) = config.shared.validate() {
        eprintln!("FATAL: {err}");
        return ExitCode::FAILURE;
    }

    tracing_subscriber::fmt()
        .with_env_filter(config.shared.log_level.as_filter())
        .with_target(false)
        .with_thread_ids(true)
        .init();
    info!(service = %config.shared.service_name, "starting railyard");

    let mut storage = match FileStorage::open(&config.data_dir) {
        Ok(storage) => storage,
        Err(err) => {
            error!(%err, dir = %config.data_dir.display(), "unable to open storage");
            return ExitCode::FAILURE;
        }
    };

    let manager = Arc::new(Manager::new(Settings::default()));
    let params = match load_layout(&manager, &mut storage) {
        Ok(params) => params,
        Err(err) => {
            error!(%err, "unable to load layout");
            return ExitCode::FAILURE;
        }
    };
    manager.set_storage(Box::new(storage));

    // A driver that fails to construct is logged but does not abort
    // startup; the layout stays editable without its hardware.
    let registry = DriverRegistry::with_builtin();
    for param in &params {
        let sink = Arc::clone(&manager) as Arc<dyn ControlEventSink>;
        match registry.create_driver(param, sink) {
            Ok(driver) => manager.register_driver(Arc::<dyn RailDriver>::from(driver)),
            Err(err) => {
                error!(name = %param.name, %err, "unable to start driver")
            }
        }
    }

    spawn_console(Arc::clone(&manager));
    info!("ready");

    match signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(err) => error!(%err, "unable to listen for shutdown signal"),
    }

    manager.shutdown();
    info!("bye");
    ExitCode::SUCCESS
}

/// Minimal interactive command loop on stdin. The thread is detached;
/// it ends with the process.
fn spawn_console(manager: Arc<Manager>) {
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match ControlCommand::parse(line) {
                Ok(command) => {
                    if let Err(err) = command.dispatch(&manager) {
                        warn!(%err, "command failed");
                    }
                }
                Err(err) => warn!(%err, "unable to parse command"),
            }
        }
    });
}
