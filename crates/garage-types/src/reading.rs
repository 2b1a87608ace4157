//! Persisted sensor readings.

use core::fmt;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::ParseError;
use crate::measurement::{DerivedQuantities, Measurement};

/// Whether a reading came from the sensor or was synthesized after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ReadingStatus {
    Online,
    Offline,
}

impl ReadingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadingStatus::Online => "online",
            ReadingStatus::Offline => "offline",
        }
    }
}

impl fmt::Display for ReadingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReadingStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(ReadingStatus::Online),
            "offline" => Ok(ReadingStatus::Offline),
            other => Err(ParseError::InvalidData(format!(
                "unknown reading status '{other}'"
            ))),
        }
    }
}

/// One row of the reading history.
///
/// Dew point, absolute humidity and vapour pressure are not stored fields:
/// they are computed from temperature and humidity, so they exist exactly
/// when both inputs exist.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Reading {
    pub device_name: String,
    /// Temperature in °C.
    pub temperature: Option<f64>,
    /// Relative humidity in percent.
    pub humidity: Option<f64>,
    /// Battery level in percent. 0 when unknown.
    pub battery: u8,
    pub status: ReadingStatus,
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub captured_at: OffsetDateTime,
}

impl Reading {
    /// A reading freshly taken from the sensor.
    pub fn online(
        device_name: impl Into<String>,
        measurement: Measurement,
        battery: u8,
        captured_at: OffsetDateTime,
    ) -> Self {
        Self {
            device_name: device_name.into(),
            temperature: Some(measurement.temperature),
            humidity: Some(measurement.humidity),
            battery,
            status: ReadingStatus::Online,
            captured_at,
        }
    }

    /// An offline marker that carries the last known values forward.
    ///
    /// With no previous reading, temperature and humidity are absent and the
    /// battery is reported as 0.
    pub fn offline(
        device_name: impl Into<String>,
        previous: Option<&Reading>,
        captured_at: OffsetDateTime,
    ) -> Self {
        let (temperature, humidity, battery) = previous
            .map(|p| (p.temperature, p.humidity, p.battery))
            .unwrap_or((None, None, 0));

        Self {
            device_name: device_name.into(),
            temperature,
            humidity,
            battery,
            status: ReadingStatus::Offline,
            captured_at,
        }
    }

    pub fn is_online(&self) -> bool {
        self.status == ReadingStatus::Online
    }

    /// The underlying measurement, if both values are known.
    pub fn measurement(&self) -> Option<Measurement> {
        Some(Measurement::new(self.temperature?, self.humidity?))
    }

    pub fn derived(&self) -> Option<DerivedQuantities> {
        self.measurement().map(|m| m.derived())
    }

    pub fn dew_point(&self) -> Option<f64> {
        self.derived().map(|d| d.dew_point)
    }

    pub fn abs_humidity(&self) -> Option<f64> {
        self.derived().map(|d| d.abs_humidity)
    }

    pub fn steam_pressure(&self) -> Option<f64> {
        self.derived().map(|d| d.steam_pressure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn at(unix: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(unix).unwrap()
    }

    fn sample() -> Reading {
        Reading::online(
            "Govee_H5075_4F47",
            Measurement::new(21.5, 44.0),
            87,
            at(1_717_243_200),
        )
    }

    #[test]
    fn test_online_reading_has_derived_values() {
        let reading = sample();
        assert!(reading.is_online());
        assert_eq!(reading.dew_point(), Some(8.7));
        assert_eq!(reading.abs_humidity(), Some(8.3));
        assert_eq!(reading.steam_pressure(), Some(11.3));
    }

    #[test]
    fn test_offline_carries_previous_values() {
        let previous = sample();
        let at = at(1_717_243_500);
        let offline = Reading::offline("Govee_H5075_4F47", Some(&previous), at);

        assert_eq!(offline.status, ReadingStatus::Offline);
        assert_eq!(offline.temperature, Some(21.5));
        assert_eq!(offline.humidity, Some(44.0));
        assert_eq!(offline.battery, 87);
        assert_eq!(offline.captured_at, at);
        assert_eq!(offline.derived(), previous.derived());
    }

    #[test]
    fn test_offline_without_history() {
        let offline = Reading::offline("garage", None, at(1_717_200_000));
        assert_eq!(offline.temperature, None);
        assert_eq!(offline.humidity, None);
        assert_eq!(offline.battery, 0);
        assert_eq!(offline.derived(), None);
        assert_eq!(offline.dew_point(), None);
    }

    #[test]
    fn test_partial_values_have_no_derived() {
        let mut reading = sample();
        reading.humidity = None;
        assert!(reading.derived().is_none());
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(ReadingStatus::Online.to_string(), "online");
        assert_eq!(ReadingStatus::Offline.to_string(), "offline");
        assert_eq!("offline".parse::<ReadingStatus>().unwrap(), ReadingStatus::Offline);
        assert!("stale".parse::<ReadingStatus>().is_err());
    }

    #[test]
    fn test_reading_serialization() {
        let json = serde_json::to_string(&sample()).unwrap();
        assert!(json.contains("\"status\":\"online\""));
        assert!(json.contains("\"captured_at\":\"2024-06-01T12:00:00Z\""));

        let back: Reading = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sample());
    }

    proptest! {
        #[test]
        fn derived_present_iff_both_values(
            t in proptest::option::of(-20.0f64..60.0),
            rh in proptest::option::of(0.0f64..100.0),
        ) {
            let mut reading = sample();
            reading.temperature = t;
            reading.humidity = rh;
            prop_assert_eq!(reading.derived().is_some(), t.is_some() && rh.is_some());
        }
    }
}
