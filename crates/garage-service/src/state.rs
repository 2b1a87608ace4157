//! Application state: the object graph the binary runs.
//!
//! [`AppState`] wires the SQLite store, the sensor service, the update
//! scheduler and the optional cloud clients together from a [`Config`].
//! Nothing is spawned here; the caller decides whether to start the
//! scheduler.
//!
//! The sensor lease is backed by a lock file next to the database, so a
//! one-shot `refresh` process and a running service never share the radio.

use std::sync::Arc;

use async_trait::async_trait;
use garage_core::{
    AcquisitionConfig, Acquirer, BleTransport, ConnectionLease, GarageMonitor, GoveeClient,
    ReadingStore, SensorService, SensorTransport, UpdateScheduler, VendorError, WeatherError,
    WeatherUndergroundClient,
};
use garage_store::Store;
use garage_types::Reading;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::Config;

/// Errors while assembling the application state.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error(transparent)]
    Store(#[from] garage_store::Error),
    #[error("Smart-plug client: {0}")]
    Vendor(#[from] VendorError),
    #[error("Weather client: {0}")]
    Weather(#[from] WeatherError),
}

/// [`ReadingStore`] backed by the SQLite database.
pub struct SqliteReadingStore {
    store: Mutex<Store>,
}

impl SqliteReadingStore {
    pub fn new(store: Store) -> Self {
        Self {
            store: Mutex::new(store),
        }
    }

    /// Direct access for queries the core does not need.
    pub fn store(&self) -> &Mutex<Store> {
        &self.store
    }
}

impl std::fmt::Debug for SqliteReadingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteReadingStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl ReadingStore for SqliteReadingStore {
    async fn append(&self, reading: Reading) -> garage_core::Result<Reading> {
        let store = self.store.lock().await;
        let id = store
            .insert_reading(&reading)
            .map_err(|e| garage_core::Error::store(e.to_string()))?;
        debug!(id, device = %reading.device_name, "reading stored");
        Ok(reading)
    }

    async fn most_recent(&self, device_name: Option<&str>) -> garage_core::Result<Option<Reading>> {
        let store = self.store.lock().await;
        store
            .latest_reading(device_name)
            .map(|stored| stored.map(Reading::from))
            .map_err(|e| garage_core::Error::store(e.to_string()))
    }
}

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub store: Arc<SqliteReadingStore>,
    pub monitor: Arc<GarageMonitor>,
    pub scheduler: Arc<UpdateScheduler>,
}

impl AppState {
    /// Build the state on the system Bluetooth adapter.
    pub fn new(store: Store, config: Config) -> Result<Arc<Self>, StateError> {
        let transport = BleTransport::new().scan_duration(config.sensor.scan_duration());
        Self::with_transport(store, config, Arc::new(transport))
    }

    /// Build the state on any sensor transport.
    pub fn with_transport(
        store: Store,
        config: Config,
        transport: Arc<dyn SensorTransport>,
    ) -> Result<Arc<Self>, StateError> {
        let store = Arc::new(SqliteReadingStore::new(store));

        let acquirer = Arc::new(Acquirer::new(
            transport,
            AcquisitionConfig::default().connect_timeout(config.sensor.connect_timeout()),
        ));
        let lease = ConnectionLease::new().with_lock_file(config.storage.lock_path());
        debug!("Sensor lease lock file: {}", config.storage.lock_path().display());
        let sensor = Arc::new(
            SensorService::new(acquirer, store.clone(), config.sensor.sensor_config())
                .with_lease(lease)
                .with_refresh_policy(config.schedule.steady_policy()),
        );

        let mut monitor = GarageMonitor::new(sensor.clone());

        match config.cloud.key() {
            Some(key) => {
                let client = match &config.cloud.base_url {
                    Some(url) => GoveeClient::with_base_url(key, url)?,
                    None => GoveeClient::new(key)?,
                };
                info!("Smart-plug API enabled ({})", client.base_url());
                monitor = monitor.with_plug_client(Arc::new(client));
            }
            None => info!("No smart-plug API key configured; plug commands disabled"),
        }

        match config.weather.key() {
            Some(key) => {
                let client = match &config.weather.base_url {
                    Some(url) => WeatherUndergroundClient::with_base_url(key, url)?,
                    None => WeatherUndergroundClient::new(key)?,
                };
                info!("Outdoor weather enabled for station {}", config.weather.station);
                monitor = monitor.with_weather(Arc::new(client), &config.weather.station);
            }
            None => info!("No weather API key configured; outdoor weather disabled"),
        }

        let scheduler = Arc::new(UpdateScheduler::new(
            sensor,
            config.schedule.scheduler_config(),
        ));

        Ok(Arc::new(Self {
            config,
            store,
            monitor: Arc::new(monitor),
            scheduler,
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use garage_core::mock::{MockBehavior, MockTransport};
    use garage_core::{Measurement, ReadingStatus, SchedulerPhase};
    use tempfile::TempDir;

    use super::*;

    fn config_in(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.storage.path = dir.path().join("readings.db");
        config
    }

    fn open(config: &Config) -> (Arc<MockTransport>, Arc<AppState>) {
        let transport = Arc::new(MockTransport::new());
        let store = Store::open(&config.storage.path).unwrap();
        let state = AppState::with_transport(store, config.clone(), transport.clone()).unwrap();
        (transport, state)
    }

    #[tokio::test]
    async fn test_sqlite_store_round_trip() {
        let store = SqliteReadingStore::new(Store::open_in_memory().unwrap());
        assert!(store.most_recent(None).await.unwrap().is_none());

        let at = time::OffsetDateTime::from_unix_timestamp(1_717_243_200).unwrap();
        let reading = Reading::online("garage", Measurement::new(21.5, 44.0), 80, at);
        store.append(reading.clone()).await.unwrap();
        store
            .append(Reading::offline("porch", None, at))
            .await
            .unwrap();

        assert_eq!(store.most_recent(Some("garage")).await.unwrap(), Some(reading));
        let count = store.store().lock().await.count_readings(None).unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_lands_in_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(&dir);
        config.sensor.name = "garage".to_string();
        config.sensor.offsets.temperature = -1.0;
        let (transport, state) = open(&config);
        transport.set_sample(Measurement::new(22.5, 44.0), 77);

        let reading = state
            .monitor
            .sensor()
            .update(state.config.schedule.steady_policy())
            .await
            .unwrap();
        assert_eq!(reading.temperature, Some(21.5));

        let latest = state.monitor.latest_reading().await.unwrap().unwrap();
        assert_eq!(latest, reading);
        assert_eq!(latest.battery, 77);
        assert_eq!(latest.dew_point(), Some(8.7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_update_records_offline_row() {
        let dir = tempfile::tempdir().unwrap();
        let (transport, state) = open(&config_in(&dir));
        transport.set_default(MockBehavior::ConnectError);

        assert!(
            state
                .monitor
                .sensor()
                .update(state.config.schedule.steady_policy())
                .await
                .is_err()
        );

        let latest = state.monitor.latest_reading().await.unwrap().unwrap();
        assert_eq!(latest.status, ReadingStatus::Offline);
        assert_eq!(latest.temperature, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_is_not_started_by_construction() {
        let dir = tempfile::tempdir().unwrap();
        let (transport, state) = open(&config_in(&dir));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.connect_count(), 0);
        assert_eq!(state.scheduler.stats().phase, SchedulerPhase::NotStarted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_state_shares_lease_with_running_service() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(&dir);
        // `run` and a separate `refresh` invocation each build their own state
        let (_, service) = open(&config);
        let (refresh_transport, refresh) = open(&config);
        assert_eq!(
            refresh.monitor.sensor().lease().lock_file(),
            Some(config.storage.lock_path().as_path())
        );

        let held = service
            .monitor
            .sensor()
            .lease()
            .acquire("scheduler")
            .await
            .unwrap();
        let err = refresh
            .monitor
            .sensor()
            .force_refresh(Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            garage_core::Error::LeaseBusy { ref holder, .. } if holder.starts_with("scheduler")
        ));
        assert_eq!(refresh_transport.open_count(), 0);

        drop(held);
        let reading = refresh.monitor.force_refresh().await.unwrap();
        assert_eq!(reading.status, ReadingStatus::Online);
        assert_eq!(refresh_transport.connect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_follows_configured_steady_policy() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(&dir);
        config.schedule.steady_attempts = 1;
        let (transport, state) = open(&config);
        transport.set_default(MockBehavior::ConnectError);

        let err = state.monitor.force_refresh().await.unwrap_err();
        assert!(matches!(err, garage_core::Error::Exhausted { attempts: 1, .. }));
        assert_eq!(transport.connect_count(), 1);
    }

    #[test]
    fn test_cloud_clients_follow_keys() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(&dir);
        config.cloud.api_key = Some("plug-key".to_string());
        config.weather.api_key = Some("weather-key".to_string());
        config.weather.station = "KCASANFR1".to_string();

        let (_, state) = open(&config);
        assert_eq!(state.monitor.station(), "KCASANFR1");
    }
}
