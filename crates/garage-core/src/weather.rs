//! Outdoor weather from a personal weather station.
//!
//! [`WeatherSource`] returns the current observation of a station, or `None`
//! when the station reported nothing. It is slow and unreliable, so the
//! monitor only ever calls it through a TTL cache.

use async_trait::async_trait;
use garage_types::WeatherSnapshot;
use serde_json::Value;

/// Default station queried when none is configured.
pub const DEFAULT_STATION: &str = "KTNMEMPH176";

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum WeatherError {
    #[error("Weather provider not reachable: {0}")]
    NotReachable(String),

    #[error("Weather provider returned HTTP {status}")]
    Http { status: u16 },

    #[error("Malformed weather response: {0}")]
    Malformed(String),

    #[error("Weather API key is not configured")]
    MissingApiKey,
}

pub type WeatherResult<T> = std::result::Result<T, WeatherError>;

/// Black-box fetch of current conditions.
#[async_trait]
pub trait WeatherSource: Send + Sync {
    async fn fetch(&self, station_id: &str) -> WeatherResult<Option<WeatherSnapshot>>;
}

/// First observation of a PWS `observations/current` response.
///
/// An empty observation list yields `None`.
pub fn parse_observation(station_id: &str, body: &Value) -> WeatherResult<Option<WeatherSnapshot>> {
    let observations = body
        .get("observations")
        .and_then(Value::as_array)
        .ok_or_else(|| WeatherError::Malformed("missing observations".into()))?;

    let Some(obs) = observations.first() else {
        return Ok(None);
    };

    let num = |path: &str| obs.pointer(path).and_then(Value::as_f64);

    Ok(Some(WeatherSnapshot {
        station_id: obs
            .get("stationID")
            .and_then(Value::as_str)
            .unwrap_or(station_id)
            .to_string(),
        observed_at: obs
            .get("obsTimeLocal")
            .and_then(Value::as_str)
            .map(str::to_string),
        temperature: num("/imperial/temp"),
        humidity: num("/humidity"),
        dew_point: num("/imperial/dewpt"),
        wind_dir: num("/winddir"),
        wind_speed: num("/imperial/windSpeed"),
        wind_gust: num("/imperial/windGust"),
        pressure: num("/imperial/pressure"),
        precip_rate: num("/imperial/precipRate"),
        precip_total: num("/imperial/precipTotal"),
        uv: num("/uv"),
    }))
}

#[cfg(feature = "cloud")]
pub use wunderground::WeatherUndergroundClient;

#[cfg(feature = "cloud")]
mod wunderground {
    use std::time::Duration;

    use async_trait::async_trait;
    use reqwest::Client;
    use tracing::debug;

    use super::*;

    pub const DEFAULT_BASE_URL: &str = "https://api.weather.com/v2/pws/observations/current";

    /// Weather Underground PWS observations client.
    #[derive(Debug, Clone)]
    pub struct WeatherUndergroundClient {
        client: Client,
        base_url: String,
        api_key: String,
    }

    impl WeatherUndergroundClient {
        pub fn new(api_key: impl Into<String>) -> WeatherResult<Self> {
            Self::with_base_url(api_key, DEFAULT_BASE_URL)
        }

        pub fn with_base_url(api_key: impl Into<String>, base_url: &str) -> WeatherResult<Self> {
            let api_key = api_key.into();
            if api_key.trim().is_empty() {
                return Err(WeatherError::MissingApiKey);
            }
            let client = Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .map_err(|e| WeatherError::NotReachable(e.to_string()))?;

            Ok(Self {
                client,
                base_url: base_url.to_string(),
                api_key,
            })
        }
    }

    #[async_trait]
    impl WeatherSource for WeatherUndergroundClient {
        async fn fetch(&self, station_id: &str) -> WeatherResult<Option<WeatherSnapshot>> {
            let response = self
                .client
                .get(&self.base_url)
                .query(&[
                    ("stationId", station_id),
                    ("format", "json"),
                    ("units", "e"),
                    ("apiKey", self.api_key.as_str()),
                ])
                .send()
                .await
                .map_err(|e| WeatherError::NotReachable(e.to_string()))?;

            let status = response.status();
            // The provider answers 204 when the station has nothing current.
            if status == reqwest::StatusCode::NO_CONTENT {
                return Ok(None);
            }
            if !status.is_success() {
                return Err(WeatherError::Http {
                    status: status.as_u16(),
                });
            }

            let body: Value = response
                .json()
                .await
                .map_err(|e| WeatherError::Malformed(e.to_string()))?;
            let snapshot = parse_observation(station_id, &body)?;
            debug!(
                "{}: outdoor {:?} °F",
                station_id,
                snapshot.as_ref().and_then(|s| s.temperature)
            );
            Ok(snapshot)
        }
    }

}
