//! Read-side facade used by the CLI and any hosting layer.
//!
//! Vendor and weather calls go through their own [`TtlCache`] instances and
//! degrade to empty/unavailable values instead of failing.

use std::sync::Arc;
use std::time::Duration;

use garage_types::{DeviceDescriptor, PlugState, Reading, WeatherSnapshot};
use tracing::{info, warn};

use crate::cache::TtlCache;
use crate::error::Result;
use crate::refresh::DEFAULT_LEASE_WAIT;
use crate::sensor::SensorService;
use crate::vendor::PlugClient;
use crate::weather::{DEFAULT_STATION, WeatherSource};

/// How long the vendor device directory is reused.
pub const DEVICE_DIRECTORY_TTL: Duration = Duration::from_secs(1800);
/// How long an outdoor weather snapshot is reused.
pub const WEATHER_TTL: Duration = Duration::from_secs(900);

pub struct GarageMonitor {
    sensor: Arc<SensorService>,
    plugs: Option<Arc<dyn PlugClient>>,
    weather: Option<Arc<dyn WeatherSource>>,
    station: String,
    devices: TtlCache<(), Vec<DeviceDescriptor>>,
    outdoor: TtlCache<String, WeatherSnapshot>,
}

impl std::fmt::Debug for GarageMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GarageMonitor")
            .field("sensor", &self.sensor)
            .field("station", &self.station)
            .field("plugs", &self.plugs.is_some())
            .field("weather", &self.weather.is_some())
            .finish()
    }
}

impl GarageMonitor {
    pub fn new(sensor: Arc<SensorService>) -> Self {
        Self {
            sensor,
            plugs: None,
            weather: None,
            station: DEFAULT_STATION.to_string(),
            devices: TtlCache::new("device directory", DEVICE_DIRECTORY_TTL),
            outdoor: TtlCache::new("outdoor weather", WEATHER_TTL),
        }
    }

    #[must_use]
    pub fn with_plug_client(mut self, client: Arc<dyn PlugClient>) -> Self {
        self.plugs = Some(client);
        self
    }

    #[must_use]
    pub fn with_weather(
        mut self,
        source: Arc<dyn WeatherSource>,
        station: impl Into<String>,
    ) -> Self {
        self.weather = Some(source);
        self.station = station.into();
        self
    }

    pub fn sensor(&self) -> &Arc<SensorService> {
        &self.sensor
    }

    pub fn station(&self) -> &str {
        &self.station
    }

    /// Every device on the vendor account, at most 30 minutes old.
    ///
    /// An empty directory is not cached; it usually means the vendor
    /// throttled the request.
    pub async fn devices(&self) -> Vec<DeviceDescriptor> {
        let Some(client) = self.plugs.clone() else {
            return Vec::new();
        };

        self.devices
            .get_or_refresh((), || async move {
                let devices = client.list_devices().await?;
                Ok::<_, crate::vendor::VendorError>((!devices.is_empty()).then_some(devices))
            })
            .await
            .unwrap_or_default()
    }

    /// Only the devices the vendor classifies as plugs.
    pub async fn plugs(&self) -> Vec<DeviceDescriptor> {
        self.devices()
            .await
            .into_iter()
            .filter(DeviceDescriptor::is_plug)
            .collect()
    }

    /// Power state of one plug; unavailable on any vendor failure.
    pub async fn plug_status(&self, device: &str, model: &str) -> PlugState {
        let Some(client) = &self.plugs else {
            return PlugState::unavailable();
        };

        match client.get_state(device, model).await {
            Ok(state) => state,
            Err(e) => {
                warn!("Could not get state of {}: {}", device, e);
                PlugState::unavailable()
            }
        }
    }

    /// Switch one plug. Returns whether the vendor accepted the command.
    pub async fn set_plug_power(&self, device: &str, model: &str, on: bool) -> bool {
        let Some(client) = &self.plugs else {
            warn!("No plug client configured");
            return false;
        };

        match client.set_power(device, model, on).await {
            Ok(()) => {
                info!("{} ({}) switched {}", device, model, if on { "on" } else { "off" });
                true
            }
            Err(e) => {
                warn!("Could not switch {}: {}", device, e);
                false
            }
        }
    }

    /// Current conditions at the configured station, at most 15 minutes old.
    pub async fn outdoor_weather(&self) -> Option<WeatherSnapshot> {
        let station = self.station.clone();
        self.outdoor_weather_at(&station).await
    }

    /// Current conditions at `station`, cached per station.
    pub async fn outdoor_weather_at(&self, station: &str) -> Option<WeatherSnapshot> {
        let source = self.weather.clone()?;
        let station_id = station.to_string();

        self.outdoor
            .get_or_refresh(station.to_string(), || async move {
                source.fetch(&station_id).await
            })
            .await
    }

    /// Outdoor temperature in °C, if the station reported one.
    pub async fn outdoor_temperature_c(&self) -> Option<f64> {
        self.outdoor_weather().await?.temperature_c()
    }

    pub async fn latest_reading(&self) -> Result<Option<Reading>> {
        self.sensor.latest().await
    }

    /// Manual refresh, waiting at most 30 s for the scheduler.
    pub async fn force_refresh(&self) -> Result<Reading> {
        self.sensor.force_refresh(DEFAULT_LEASE_WAIT).await
    }
}
