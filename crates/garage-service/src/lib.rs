//! Background update loop and command line for the garage climate monitor.
//!
//! This crate wires the pieces of `garage-core` into a process:
//! - Loads configuration from TOML with environment overrides
//! - Persists readings to the SQLite store from `garage-store`
//! - Runs the update scheduler until interrupted
//! - Offers one-shot commands for manual refresh, smart plugs and weather
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/garage/monitor.toml`:
//!
//! ```toml
//! [sensor]
//! address = "A4:C1:38:80:4F:47"
//! name = "Govee_H5075_4F47"
//!
//! [sensor.offsets]
//! temperature = -0.3
//!
//! [schedule]
//! interval_secs = 300
//!
//! [cloud]
//! api_key = "..."
//!
//! [weather]
//! station = "KTNMEMPH176"
//! api_key = "..."
//!
//! [storage]
//! path = "~/.local/share/garage/readings.db"
//! ```
//!
//! `GARAGE_SENSOR_ADDRESS`, `GARAGE_SENSOR_NAME`, `GOVEE_API_KEY`, `STATION`
//! and `WEATHER_API_KEY` override the file when set.

pub mod config;
pub mod state;

pub use config::{
    CloudSection, Config, ConfigError, ScheduleSection, SensorSection, StorageConfig,
    ValidationError, WeatherSection, default_config_path,
};
pub use state::{AppState, SqliteReadingStore, StateError};
