//! # dmagpio Daemon
//!
//! Starts the GPIO engine from a TOML configuration, optionally runs a
//! script, and serves until interrupted.
//!
//! # Usage
//!
//! ```bash
//! # Defaults (simulation backend) when the config file is absent
//! dmagpio
//!
//! # Explicit configuration and a script with two parameters
//! dmagpio --config dmagpio.toml --script blink.txt --param 17 --param 250
//!
//! # Verbose JSON logs
//! dmagpio -v --json
//! ```

#![deny(warnings)]

use clap::Parser;
use dmagpio::Gpio;
use dmagpio_common::config::{ConfigError, ConfigLoader, GpioConfig};
use dmagpio_common::consts::DEFAULT_CONFIG_PATH;
use dmagpio_common::types::ScriptStatus;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Poll period of the main wait loop.
const POLL: Duration = Duration::from_millis(50);

/// dmagpio - software-timed GPIO engine
#[derive(Parser, Debug)]
#[command(name = "dmagpio")]
#[command(author = "RTS007")]
#[command(version)]
#[command(about = "Software-timed GPIO engine: waveforms, edge sampling, notifications and scripts")]
#[command(long_about = None)]
struct Args {
    /// Path to the engine configuration file. Defaults apply if it is absent.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Script file to store and run after start-up
    #[arg(short, long, value_name = "FILE")]
    script: Option<PathBuf>,

    /// Script parameter p0..p9 (repeat for each)
    #[arg(short, long = "param", action = clap::ArgAction::Append, allow_negative_numbers = true)]
    params: Vec<i32>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,
}

fn main() {
    let args = Args::parse();

    let (config, missing) = match GpioConfig::load(&args.config) {
        Ok(config) => (config, false),
        Err(ConfigError::FileNotFound) => (GpioConfig::default(), true),
        Err(e) => {
            setup_tracing(&args, &GpioConfig::default());
            error!("FATAL: {e}");
            std::process::exit(1);
        }
    };
    setup_tracing(&args, &config);

    info!("dmagpio v{} starting...", env!("CARGO_PKG_VERSION"));
    if missing {
        info!("No configuration at {:?}, using defaults", args.config);
    }

    if let Err(e) = run(&args, config) {
        error!("FATAL: {e}");
        std::process::exit(1);
    }
}

fn run(args: &Args, config: GpioConfig) -> Result<(), Box<dyn std::error::Error>> {
    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        flag.store(false, Ordering::SeqCst);
    })?;

    let gpio = Gpio::initialise(config)?;

    match &args.script {
        Some(path) => run_script(&gpio, path, &args.params, &running)?,
        None => {
            info!("Serving; press Ctrl-C to stop");
            while running.load(Ordering::SeqCst) {
                std::thread::sleep(POLL);
            }
        }
    }

    gpio.terminate();
    info!("dmagpio shutdown complete");
    Ok(())
}

/// Store and run the script at `path`, waiting until it stops or a
/// shutdown is requested.
fn run_script(
    gpio: &Gpio,
    path: &Path,
    params: &[i32],
    running: &AtomicBool,
) -> Result<(), Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(path)?;
    let id = gpio.store_script(&text)?;
    info!("Stored script {} from {:?}", id, path);
    gpio.run_script(id, params)?;

    let (mut status, mut params) = loop {
        let (status, params) = gpio.script_status(id)?;
        if !status.is_active() || !running.load(Ordering::SeqCst) {
            break (status, params);
        }
        std::thread::sleep(POLL);
    };

    if status.is_active() {
        gpio.stop_script(id)?;
        info!("Script {} stopped by shutdown request", id);
        (status, params) = gpio.script_status(id)?;
    }
    match status {
        ScriptStatus::Failed => warn!("Script {} failed, params {:?}", id, params),
        _ => info!("Script {} finished {:?}, params {:?}", id, status, params),
    }
    Ok(())
}

/// Setup tracing subscriber from CLI arguments and the configured level.
fn setup_tracing(args: &Args, config: &GpioConfig) {
    let level = if args.verbose {
        Level::DEBUG
    } else {
        config.shared.log_level.into()
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
