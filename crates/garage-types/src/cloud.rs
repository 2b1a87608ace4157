//! Records returned by the smart-plug vendor and the weather provider.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// One device as listed by the smart-plug vendor's directory endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviceDescriptor {
    /// Vendor device identifier (usually a MAC-like string).
    pub device: String,
    /// Product model code, e.g. `H5080`.
    pub sku: String,
    #[cfg_attr(feature = "serde", serde(rename = "deviceName", default))]
    pub name: String,
    #[cfg_attr(feature = "serde", serde(rename = "type", default))]
    pub kind: String,
}

impl DeviceDescriptor {
    /// Whether the vendor classifies this device as a socket/plug.
    pub fn is_plug(&self) -> bool {
        self.kind.ends_with(".socket")
    }
}

/// Power state of a smart plug.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PlugState {
    pub power_on: bool,
    /// False when the state could not be fetched; `power_on` is then false too.
    pub available: bool,
}

impl PlugState {
    pub fn on() -> Self {
        Self {
            power_on: true,
            available: true,
        }
    }

    pub fn off() -> Self {
        Self {
            power_on: false,
            available: true,
        }
    }

    pub fn unavailable() -> Self {
        Self {
            power_on: false,
            available: false,
        }
    }
}

/// Current outdoor conditions from a personal weather station.
///
/// Values are imperial, as the provider reports them.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct WeatherSnapshot {
    pub station_id: String,
    /// Local observation time as reported by the station.
    pub observed_at: Option<String>,
    /// Temperature in °F.
    pub temperature: Option<f64>,
    /// Relative humidity in percent.
    pub humidity: Option<f64>,
    /// Dew point in °F.
    pub dew_point: Option<f64>,
    /// Wind direction in degrees.
    pub wind_dir: Option<f64>,
    /// Wind speed in mph.
    pub wind_speed: Option<f64>,
    pub wind_gust: Option<f64>,
    /// Pressure in inHg.
    pub pressure: Option<f64>,
    /// Precipitation rate in in/h.
    pub precip_rate: Option<f64>,
    /// Precipitation since midnight in inches.
    pub precip_total: Option<f64>,
    pub uv: Option<f64>,
}

impl WeatherSnapshot {
    /// Temperature converted to °C.
    pub fn temperature_c(&self) -> Option<f64> {
        self.temperature.map(|f| (f - 32.0) * 5.0 / 9.0)
    }
}
