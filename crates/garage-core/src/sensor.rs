//! One monitored sensor: acquisition, persistence and offline fallback tied
//! together behind the connection lease.

use std::sync::Arc;

use garage_types::{Offsets, Reading};
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::acquisition::Acquirer;
use crate::error::Result;
use crate::fallback::OfflineFallback;
use crate::lease::ConnectionLease;
use crate::retry::RetryPolicy;
use crate::store::ReadingStore;

/// Default MAC address of the garage sensor.
pub const DEFAULT_ADDRESS: &str = "A4:C1:38:80:4F:47";
/// Default name readings are stored under.
pub const DEFAULT_NAME: &str = "Govee_H5075_4F47";

/// Identity and calibration of the monitored sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorConfig {
    /// BLE address (or platform peripheral id) to connect to.
    pub address: String,
    /// Device name readings are recorded under.
    pub name: String,
    pub offsets: Offsets,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            name: DEFAULT_NAME.to_string(),
            offsets: Offsets::default(),
        }
    }
}

impl SensorConfig {
    pub fn new(address: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: name.into(),
            offsets: Offsets::default(),
        }
    }

    #[must_use]
    pub fn offsets(mut self, offsets: Offsets) -> Self {
        self.offsets = offsets;
        self
    }
}

/// The sensor as seen by the scheduler and by manual refreshes.
pub struct SensorService {
    pub(crate) acquirer: Arc<Acquirer>,
    pub(crate) store: Arc<dyn ReadingStore>,
    pub(crate) fallback: OfflineFallback,
    pub(crate) lease: ConnectionLease,
    pub(crate) config: SensorConfig,
    /// Retry policy of a manual refresh.
    pub(crate) refresh_policy: RetryPolicy,
}

impl std::fmt::Debug for SensorService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorService")
            .field("config", &self.config)
            .field("acquirer", &self.acquirer)
            .finish_non_exhaustive()
    }
}

impl SensorService {
    pub fn new(
        acquirer: Arc<Acquirer>,
        store: Arc<dyn ReadingStore>,
        config: SensorConfig,
    ) -> Self {
        Self {
            fallback: OfflineFallback::new(Arc::clone(&store)),
            acquirer,
            store,
            lease: ConnectionLease::new(),
            config,
            refresh_policy: RetryPolicy::steady_state(),
        }
    }

    /// Retry policy used by [`force_refresh`](Self::force_refresh).
    #[must_use]
    pub fn with_refresh_policy(mut self, policy: RetryPolicy) -> Self {
        self.refresh_policy = policy;
        self
    }

    /// Use an existing lease, e.g. one shared with a second service on the
    /// same radio or backed by a lock file.
    #[must_use]
    pub fn with_lease(mut self, lease: ConnectionLease) -> Self {
        self.lease = lease;
        self
    }

    pub fn config(&self) -> &SensorConfig {
        &self.config
    }

    pub fn acquirer(&self) -> &Arc<Acquirer> {
        &self.acquirer
    }

    pub fn lease(&self) -> &ConnectionLease {
        &self.lease
    }

    /// Acquire and persist one online reading.
    ///
    /// Does not take the lease and does not fall back; callers do both.
    pub(crate) async fn acquire_reading(&self, policy: RetryPolicy) -> Result<Reading> {
        let sample = self.acquirer.acquire(&self.config.address, policy).await?;
        let measurement = sample.measurement.with_offsets(self.config.offsets);

        let reading = Reading::online(
            self.config.name.as_str(),
            measurement,
            sample.battery,
            OffsetDateTime::now_utc(),
        );
        if let Some(derived) = reading.derived() {
            debug!(
                dew_point = derived.dew_point,
                abs_humidity = derived.abs_humidity,
                steam_pressure = derived.steam_pressure,
                "{}: derived quantities",
                self.config.name
            );
        }
        self.store.append(reading).await
    }

    /// Record an offline reading for this sensor. Never fails.
    pub async fn mark_offline(&self) -> Option<Reading> {
        self.fallback.mark_offline(&self.config.name).await
    }

    /// One acquisition cycle under the lease: an online reading on success,
    /// an offline reading plus the error on failure.
    pub async fn update(&self, policy: RetryPolicy) -> Result<Reading> {
        self.update_with(policy, true).await
    }

    /// Like [`update`](Self::update), but only writes the offline reading
    /// when `record_offline` is set.
    pub(crate) async fn update_with(
        &self,
        policy: RetryPolicy,
        record_offline: bool,
    ) -> Result<Reading> {
        let _lease = self.lease.acquire("scheduler").await?;
        match self.acquire_reading(policy).await {
            Ok(reading) => Ok(reading),
            Err(e) => {
                warn!("{}: update failed: {}", self.config.name, e);
                if record_offline {
                    self.mark_offline().await;
                }
                Err(e)
            }
        }
    }

    /// The most recent stored reading for this sensor.
    pub async fn latest(&self) -> Result<Option<Reading>> {
        self.store.most_recent(Some(&self.config.name)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::AcquisitionConfig;
    use crate::error::Error;
    use crate::mock::{MockBehavior, MockTransport};
    use crate::store::MemoryStore;
    use garage_types::{Measurement, ReadingStatus};

    fn service(transport: &Arc<MockTransport>, store: &Arc<MemoryStore>) -> SensorService {
        let acquirer = Arc::new(Acquirer::new(
            Arc::clone(transport) as _,
            AcquisitionConfig::default(),
        ));
        SensorService::new(acquirer, Arc::clone(store) as _, SensorConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_persists_online_reading() {
        let transport = Arc::new(MockTransport::new());
        let store = Arc::new(MemoryStore::new());
        let sensor = service(&transport, &store);

        let reading = sensor.update(RetryPolicy::steady_state()).await.unwrap();
        assert_eq!(reading.status, ReadingStatus::Online);
        assert_eq!(reading.device_name, DEFAULT_NAME);
        assert_eq!(reading.temperature, Some(21.5));
        assert_eq!(reading.dew_point(), Some(8.7));
        assert_eq!(store.len(), 1);
        assert!(!sensor.lease().is_held());
    }

    #[tokio::test(start_paused = true)]
    async fn test_offsets_are_applied() {
        let transport = Arc::new(MockTransport::new());
        transport.set_sample(Measurement::new(20.0, 50.0), 70);
        let store = Arc::new(MemoryStore::new());
        let acquirer = Arc::new(Acquirer::new(
            transport.clone() as _,
            AcquisitionConfig::default(),
        ));
        let config = SensorConfig::new("A4:C1:38:00:00:01", "bench").offsets(Offsets {
            temperature: -0.5,
            humidity: 2.0,
        });
        let sensor = SensorService::new(acquirer, store.clone() as _, config);

        let reading = sensor.update(RetryPolicy::once()).await.unwrap();
        assert_eq!(reading.temperature, Some(19.5));
        assert_eq!(reading.humidity, Some(52.0));
        assert_eq!(reading.device_name, "bench");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_update_marks_offline_and_propagates() {
        let transport = Arc::new(MockTransport::new());
        let store = Arc::new(MemoryStore::new());
        let sensor = service(&transport, &store);
        sensor.update(RetryPolicy::once()).await.unwrap();

        transport.set_default(MockBehavior::ConnectHang);
        let err = sensor.update(RetryPolicy::steady_state()).await.unwrap_err();
        assert!(matches!(err, Error::Exhausted { attempts: 3, .. }));

        let readings = store.readings();
        assert_eq!(readings.len(), 2);
        let offline = &readings[1];
        assert_eq!(offline.status, ReadingStatus::Offline);
        assert_eq!(offline.temperature, Some(21.5));
        assert_eq!(offline.battery, 80);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_with_skips_offline_when_asked() {
        let transport = Arc::new(MockTransport::new());
        transport.set_default(MockBehavior::ConnectError);
        let store = Arc::new(MemoryStore::new());
        let sensor = service(&transport, &store);

        assert!(sensor.update_with(RetryPolicy::once(), false).await.is_err());
        assert!(store.is_empty());
        assert!(sensor.update_with(RetryPolicy::once(), true).await.is_err());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_failure_surfaces_on_success_path() {
        let transport = Arc::new(MockTransport::new());
        let store = Arc::new(MemoryStore::new());
        store.set_failing(true);
        let sensor = service(&transport, &store);

        let err = sensor.update(RetryPolicy::once()).await.unwrap_err();
        assert!(matches!(err, Error::Store(_)));
        assert!(sensor.latest().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_latest_returns_newest() {
        let transport = Arc::new(MockTransport::new());
        let store = Arc::new(MemoryStore::new());
        let sensor = service(&transport, &store);
        assert!(sensor.latest().await.unwrap().is_none());

        sensor.update(RetryPolicy::once()).await.unwrap();
        transport.set_default(MockBehavior::ConnectError);
        let _ = sensor.update(RetryPolicy::once()).await;

        let latest = sensor.latest().await.unwrap().unwrap();
        assert_eq!(latest.status, ReadingStatus::Offline);
    }
}
