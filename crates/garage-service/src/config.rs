//! Service configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use garage_core::sensor::{DEFAULT_ADDRESS, DEFAULT_NAME};
use garage_core::weather::DEFAULT_STATION;
use garage_core::{Offsets, RetryPolicy, SchedulerConfig, SensorConfig};
use serde::{Deserialize, Serialize};

/// Service configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sensor: SensorSection,
    pub schedule: ScheduleSection,
    /// Smart-plug vendor API.
    pub cloud: CloudSection,
    /// Outdoor weather station.
    pub weather: WeatherSection,
    pub storage: StorageConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Apply environment overrides.
    ///
    /// `lookup` is `std::env::var(..).ok()` in the binary; empty values are
    /// ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(address) = var(ENV_SENSOR_ADDRESS) {
            self.sensor.address = address;
        }
        if let Some(name) = var(ENV_SENSOR_NAME) {
            self.sensor.name = name;
        }
        if let Some(key) = var(ENV_GOVEE_API_KEY) {
            self.cloud.api_key = Some(key);
        }
        if let Some(station) = var(ENV_STATION) {
            self.weather.station = station;
        }
        if let Some(key) = var(ENV_WEATHER_API_KEY) {
            self.weather.api_key = Some(key);
        }
    }

    /// Validate the configuration and return every problem found.
    ///
    /// # Example
    ///
    /// ```
    /// use garage_service::Config;
    ///
    /// let config = Config::default();
    /// assert!(config.validate().is_ok());
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.sensor.validate());
        errors.extend(self.schedule.validate());
        errors.extend(self.cloud.validate());
        errors.extend(self.weather.validate());
        errors.extend(self.storage.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }
}

pub const ENV_SENSOR_ADDRESS: &str = "GARAGE_SENSOR_ADDRESS";
pub const ENV_SENSOR_NAME: &str = "GARAGE_SENSOR_NAME";
pub const ENV_GOVEE_API_KEY: &str = "GOVEE_API_KEY";
pub const ENV_STATION: &str = "STATION";
pub const ENV_WEATHER_API_KEY: &str = "WEATHER_API_KEY";

/// The monitored H5075.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorSection {
    /// BLE address, or the peripheral id on macOS.
    pub address: String,
    /// Name readings are stored under.
    pub name: String,
    /// Seconds to scan when the adapter has not seen the sensor yet.
    pub scan_secs: u64,
    /// Upper bound for a single connection attempt, in seconds.
    pub connect_timeout_secs: u64,
    pub offsets: Offsets,
}

impl Default for SensorSection {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            name: DEFAULT_NAME.to_string(),
            scan_secs: 10,
            connect_timeout_secs: 20,
            offsets: Offsets::default(),
        }
    }
}

impl SensorSection {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.address.trim().is_empty() {
            errors.push(ValidationError::new(
                "sensor.address",
                "sensor address cannot be empty",
            ));
        }
        if self.name.trim().is_empty() {
            errors.push(ValidationError::new("sensor.name", "sensor name cannot be empty"));
        }
        if self.scan_secs == 0 {
            errors.push(ValidationError::new(
                "sensor.scan_secs",
                "scan duration must be at least 1 second",
            ));
        }
        if self.connect_timeout_secs == 0 {
            errors.push(ValidationError::new(
                "sensor.connect_timeout_secs",
                "connect timeout must be at least 1 second",
            ));
        }
        if !self.offsets.temperature.is_finite() || self.offsets.temperature.abs() > 10.0 {
            errors.push(ValidationError::new(
                "sensor.offsets.temperature",
                format!(
                    "temperature offset {} is outside -10..=10 °C",
                    self.offsets.temperature
                ),
            ));
        }
        if !self.offsets.humidity.is_finite() || self.offsets.humidity.abs() > 20.0 {
            errors.push(ValidationError::new(
                "sensor.offsets.humidity",
                format!(
                    "humidity offset {} is outside -20..=20 %",
                    self.offsets.humidity
                ),
            ));
        }

        errors
    }

    pub fn sensor_config(&self) -> SensorConfig {
        SensorConfig::new(&self.address, &self.name).offsets(self.offsets)
    }

    pub fn scan_duration(&self) -> Duration {
        Duration::from_secs(self.scan_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Minimum steady-state interval in seconds.
pub const MIN_INTERVAL: u64 = 30;
/// Maximum steady-state interval in seconds (1 hour).
pub const MAX_INTERVAL: u64 = 3600;

/// Timing of the update loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleSection {
    /// Seconds between steady-state updates.
    pub interval_secs: u64,
    pub bootstrap_rounds: u32,
    pub bootstrap_attempts: u32,
    pub bootstrap_retry_secs: u64,
    pub steady_attempts: u32,
    pub steady_retry_secs: u64,
}

impl Default for ScheduleSection {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            bootstrap_rounds: 5,
            bootstrap_attempts: RetryPolicy::BOOTSTRAP_ATTEMPTS,
            bootstrap_retry_secs: RetryPolicy::BOOTSTRAP_INTERVAL.as_secs(),
            steady_attempts: RetryPolicy::STEADY_STATE_ATTEMPTS,
            steady_retry_secs: RetryPolicy::STEADY_STATE_INTERVAL.as_secs(),
        }
    }
}

impl ScheduleSection {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.interval_secs < MIN_INTERVAL {
            errors.push(ValidationError::new(
                "schedule.interval_secs",
                format!(
                    "interval {} is too short (minimum {} seconds)",
                    self.interval_secs, MIN_INTERVAL
                ),
            ));
        } else if self.interval_secs > MAX_INTERVAL {
            errors.push(ValidationError::new(
                "schedule.interval_secs",
                format!(
                    "interval {} is too long (maximum {} seconds / 1 hour)",
                    self.interval_secs, MAX_INTERVAL
                ),
            ));
        }
        if self.bootstrap_rounds == 0 {
            errors.push(ValidationError::new(
                "schedule.bootstrap_rounds",
                "at least one bootstrap round is required",
            ));
        }
        if self.bootstrap_attempts == 0 {
            errors.push(ValidationError::new(
                "schedule.bootstrap_attempts",
                "at least one attempt is required",
            ));
        }
        if self.steady_attempts == 0 {
            errors.push(ValidationError::new(
                "schedule.steady_attempts",
                "at least one attempt is required",
            ));
        }

        errors
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig::default()
            .bootstrap_rounds(self.bootstrap_rounds)
            .bootstrap_policy(RetryPolicy::new(
                self.bootstrap_attempts,
                Duration::from_secs(self.bootstrap_retry_secs),
            ))
            .steady_policy(RetryPolicy::new(
                self.steady_attempts,
                Duration::from_secs(self.steady_retry_secs),
            ))
            .interval(Duration::from_secs(self.interval_secs))
    }

    /// Policy of a one-off update from the command line.
    pub fn steady_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.steady_attempts,
            Duration::from_secs(self.steady_retry_secs),
        )
    }
}

/// Smart-plug vendor API. Plug commands are unavailable without a key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudSection {
    pub api_key: Option<String>,
    /// Override of the vendor API base URL.
    pub base_url: Option<String>,
}

impl CloudSection {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if let Some(key) = &self.api_key
            && key.trim().is_empty()
        {
            errors.push(ValidationError::new(
                "cloud.api_key",
                "API key cannot be empty string (omit it instead)",
            ));
        }
        if let Some(url) = &self.base_url {
            errors.extend(validate_url("cloud.base_url", url));
        }

        errors
    }

    /// The configured key, if any.
    pub fn key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.trim().is_empty())
    }
}

/// Outdoor weather.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherSection {
    /// Personal weather station id.
    pub station: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

impl Default for WeatherSection {
    fn default() -> Self {
        Self {
            station: DEFAULT_STATION.to_string(),
            api_key: None,
            base_url: None,
        }
    }
}

impl WeatherSection {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.station.trim().is_empty() {
            errors.push(ValidationError::new(
                "weather.station",
                "station id cannot be empty",
            ));
        } else if !self.station.chars().all(|c| c.is_ascii_alphanumeric()) {
            errors.push(ValidationError::new(
                "weather.station",
                format!("station id '{}' must be alphanumeric", self.station),
            ));
        }
        if let Some(key) = &self.api_key
            && key.trim().is_empty()
        {
            errors.push(ValidationError::new(
                "weather.api_key",
                "API key cannot be empty string (omit it instead)",
            ));
        }
        if let Some(url) = &self.base_url {
            errors.extend(validate_url("weather.base_url", url));
        }

        errors
    }

    pub fn key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.trim().is_empty())
    }
}

fn validate_url(field: &str, url: &str) -> Option<ValidationError> {
    if url.starts_with("http://") || url.starts_with("https://") {
        None
    } else {
        Some(ValidationError::new(
            field,
            format!("'{}' must start with http:// or https://", url),
        ))
    }
}

/// Storage configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file path.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: garage_store::default_db_path(),
        }
    }
}

impl StorageConfig {
    /// Lock file that serializes sensor access between processes sharing
    /// this database.
    pub fn lock_path(&self) -> PathBuf {
        self.path.with_extension("lock")
    }

    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.path",
                "database path cannot be empty",
            ));
        }

        errors
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    /// The field path (e.g., `sensor.address` or `schedule.interval_secs`).
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("garage")
        .join("monitor.toml")
}
