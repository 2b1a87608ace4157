//! Acquisition and reliability layer for a Govee H5075 garage climate monitor.
//!
//! This crate keeps a database of temperature/humidity readings current even
//! though the Bluetooth sensor is only intermittently reachable.
//!
//! # Features
//!
//! - **Acquisition state machine**: connect, request, await notification,
//!   disconnect, with timeouts and linear-backoff retries
//! - **Update scheduler**: bootstrap rounds at start-up, then one update
//!   every five minutes; failures and panics never end the loop
//! - **Offline fallback**: failed cycles record an offline reading that
//!   carries the last known values forward
//! - **Connection lease**: the scheduler and manual refreshes never use the
//!   sensor at the same time
//! - **TTL caches**: the smart-plug device directory (30 min) and the outdoor
//!   weather (15 min) shield rate-limited APIs from hot paths
//! - **Cloud clients** (feature `cloud`): Govee OpenAPI plugs and Weather
//!   Underground PWS observations over `reqwest`
//!
//! # Platform Differences
//!
//! On macOS CoreBluetooth hides MAC addresses; configure the sensor by the
//! peripheral UUID reported during a scan instead. Linux and Windows match
//! the MAC address (`A4:C1:38:80:4F:47`).
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use garage_core::{
//!     AcquisitionConfig, Acquirer, BleTransport, MemoryStore, SchedulerConfig, SensorConfig,
//!     SensorService, UpdateScheduler,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let acquirer = Arc::new(Acquirer::new(
//!         Arc::new(BleTransport::new()),
//!         AcquisitionConfig::default(),
//!     ));
//!     let sensor = Arc::new(SensorService::new(
//!         acquirer,
//!         Arc::new(MemoryStore::new()),
//!         SensorConfig::default(),
//!     ));
//!
//!     let scheduler = Arc::new(UpdateScheduler::new(sensor, SchedulerConfig::default()));
//!     if let Some(handle) = scheduler.start() {
//!         handle.await.ok();
//!     }
//! }
//! ```

pub mod acquisition;
pub mod cache;
pub mod commands;
pub mod error;
pub mod fallback;
pub mod h5075;
pub mod lease;
pub mod mock;
pub mod monitor;
pub mod refresh;
pub mod retry;
pub mod scheduler;
pub mod sensor;
pub mod store;
pub mod transport;
pub mod vendor;
pub mod weather;

pub use garage_types::uuids;

// Core exports
pub use acquisition::{
    AcquisitionAttempt, AcquisitionConfig, AcquisitionState, Acquirer, AttemptOutcome,
};
pub use cache::TtlCache;
pub use error::{Error, Result};
pub use fallback::OfflineFallback;
pub use h5075::{BleTransport, H5075Link};
pub use lease::{ConnectionLease, LeaseGuard};
pub use monitor::{DEVICE_DIRECTORY_TTL, GarageMonitor, WEATHER_TTL};
pub use refresh::DEFAULT_LEASE_WAIT;
pub use retry::{RetryPolicy, with_retry};
pub use scheduler::{SchedulerConfig, SchedulerPhase, SchedulerStats, UpdateScheduler};
pub use sensor::{SensorConfig, SensorService};
pub use store::{MemoryStore, ReadingStore};
pub use transport::{SensorLink, SensorSample, SensorTransport};
pub use vendor::{PlugClient, VendorError};
pub use weather::{WeatherError, WeatherSource};

#[cfg(feature = "cloud")]
pub use vendor::GoveeClient;
#[cfg(feature = "cloud")]
pub use weather::WeatherUndergroundClient;

// Re-export from garage-types
pub use garage_types::{
    DerivedQuantities, DeviceDescriptor, Measurement, Offsets, PlugState, Reading, ReadingStatus,
    WeatherSnapshot,
};
