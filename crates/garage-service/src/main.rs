//! Garage Service - update loop and command line.
//!
//! Run with: `cargo run -p garage-service`

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use garage_core::{DeviceDescriptor, PlugState, Reading, WeatherSnapshot};
use garage_service::{AppState, Config};
use garage_store::Store;

/// Garage Service - keeps the garage climate history up to date.
#[derive(Parser, Debug)]
#[command(name = "garage-service")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database path (overrides config).
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Sensor address (overrides config and environment).
    #[arg(short, long, global = true)]
    address: Option<String>,

    /// Print results as JSON.
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the update loop in the foreground (default behavior).
    Run,

    /// Take one reading now, outside the schedule. Waits for a running
    /// service to finish its current update first.
    Refresh,

    /// List the devices on the smart-plug account.
    Devices,

    /// Show the current outdoor conditions.
    Weather {
        /// Station id (defaults to the configured station).
        station: Option<String>,
    },

    /// Query or switch a smart plug.
    Plug {
        #[command(subcommand)]
        action: PlugAction,
    },

    /// Inspect the configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum PlugAction {
    /// Show whether the plug is on.
    Status { device: String, model: String },
    /// Switch the plug on.
    On { device: String, model: String },
    /// Switch the plug off.
    Off { device: String, model: String },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Validate the configuration and print the effective settings.
    Check,
    /// Print the default configuration path.
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("garage_service=info".parse()?)
                .add_directive("garage_core=info".parse()?),
        )
        .init();

    let config = load_config(&args)?;
    let json = args.json;

    match args.command {
        Some(Command::Config { action }) => handle_config(action, &config, args.config, json),
        Some(Command::Run) | None => run(config).await,
        Some(Command::Refresh) => {
            let state = open_state(config)?;
            let reading = state.monitor.force_refresh().await?;
            print_reading(&reading, json)
        }
        Some(Command::Devices) => {
            let state = open_state(config)?;
            print_devices(&state.monitor.devices().await, json)
        }
        Some(Command::Weather { station }) => {
            let state = open_state(config)?;
            let snapshot = match station {
                Some(station) => state.monitor.outdoor_weather_at(&station).await,
                None => state.monitor.outdoor_weather().await,
            };
            match snapshot {
                Some(snapshot) => print_weather(&snapshot, json),
                None => anyhow::bail!("outdoor weather unavailable"),
            }
        }
        Some(Command::Plug { action }) => {
            let state = open_state(config)?;
            handle_plug(action, &state, json).await
        }
    }
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default().unwrap_or_else(|e| {
            warn!("Ignoring default configuration: {}", e);
            Config::default()
        }),
    };

    config.apply_env(|name| std::env::var(name).ok());

    if let Some(db_path) = &args.database {
        config.storage.path = db_path.clone();
    }
    if let Some(address) = &args.address {
        config.sensor.address = address.clone();
    }

    Ok(config)
}

fn open_state(config: Config) -> anyhow::Result<std::sync::Arc<AppState>> {
    config.validate()?;
    let store = Store::open(&config.storage.path)
        .with_context(|| format!("opening database {}", config.storage.path.display()))?;
    Ok(AppState::new(store, config)?)
}

async fn run(config: Config) -> anyhow::Result<()> {
    let state = open_state(config)?;

    info!(
        "Monitoring {} ({}) every {} s",
        state.config.sensor.name, state.config.sensor.address, state.config.schedule.interval_secs
    );

    let Some(handle) = state.scheduler.start() else {
        anyhow::bail!("update scheduler is already running");
    };

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    state.scheduler.stop();
    handle.await?;

    let stats = state.scheduler.stats();
    info!(
        "Stopped after {} iterations ({} ok, {} failed, {} panicked)",
        stats.iterations, stats.successes, stats.failures, stats.panics
    );
    Ok(())
}

async fn handle_plug(action: PlugAction, state: &AppState, json: bool) -> anyhow::Result<()> {
    match action {
        PlugAction::Status { device, model } => {
            let plug = state.monitor.plug_status(&device, &model).await;
            print_plug(&device, &plug, json)
        }
        PlugAction::On { device, model } => switch_plug(state, &device, &model, true).await,
        PlugAction::Off { device, model } => switch_plug(state, &device, &model, false).await,
    }
}

async fn switch_plug(state: &AppState, device: &str, model: &str, on: bool) -> anyhow::Result<()> {
    let word = if on { "on" } else { "off" };
    if state.monitor.set_plug_power(device, model, on).await {
        println!("{} switched {}", device, word);
        Ok(())
    } else {
        anyhow::bail!("failed to switch {} {}", device, word)
    }
}

fn handle_config(
    action: ConfigAction,
    config: &Config,
    path: Option<PathBuf>,
    json: bool,
) -> anyhow::Result<()> {
    match action {
        ConfigAction::Path => {
            let path = path.unwrap_or_else(garage_service::default_config_path);
            println!("{}", path.display());
        }
        ConfigAction::Check => {
            config.validate()?;
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                print!("{}", toml::to_string_pretty(config)?);
            }
            eprintln!("Configuration is valid");
        }
    }
    Ok(())
}

fn print_reading(reading: &Reading, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(reading)?);
        return Ok(());
    }

    match (reading.temperature, reading.humidity) {
        (Some(t), Some(h)) => println!(
            "{}: {:.1} °C, {:.1} %, battery {} %",
            reading.device_name, t, h, reading.battery
        ),
        _ => println!("{}: {}", reading.device_name, reading.status),
    }
    if let Some(derived) = reading.derived() {
        println!(
            "  dew point {:.1} °C, absolute humidity {:.1} g/m³, vapour pressure {:.1} hPa",
            derived.dew_point, derived.abs_humidity, derived.steam_pressure
        );
    }
    Ok(())
}

fn print_devices(devices: &[DeviceDescriptor], json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(devices)?);
        return Ok(());
    }

    if devices.is_empty() {
        println!("No devices");
    }
    for device in devices {
        let marker = if device.is_plug() { "plug" } else { "    " };
        println!("{} {:<24} {:<8} {}", marker, device.device, device.sku, device.name);
    }
    Ok(())
}

fn print_plug(device: &str, state: &PlugState, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(state)?);
    } else if !state.available {
        println!("{}: unavailable", device);
    } else {
        println!("{}: {}", device, if state.power_on { "on" } else { "off" });
    }
    Ok(())
}

fn print_weather(snapshot: &WeatherSnapshot, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(snapshot)?);
        return Ok(());
    }

    match snapshot.temperature_c() {
        Some(t) => println!("{}: {:.1} °C", snapshot.station_id, t),
        None => println!("{}: no temperature reported", snapshot.station_id),
    }
    if let Some(h) = snapshot.humidity {
        println!("  humidity {:.0} %", h);
    }
    Ok(())
}
