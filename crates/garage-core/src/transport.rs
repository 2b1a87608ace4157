//! Abstraction over the Bluetooth link to the sensor.
//!
//! The acquisition state machine only talks to these traits, so it can run
//! against real hardware ([`crate::h5075::BleTransport`]) or the scripted
//! [`crate::mock::MockTransport`].

use std::sync::Arc;

use async_trait::async_trait;
use garage_types::Measurement;

use crate::error::Result;

/// What one successful request yields.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorSample {
    pub measurement: Measurement,
    /// Battery level in percent.
    pub battery: u8,
}

/// Factory for per-attempt sensor handles.
pub trait SensorTransport: Send + Sync {
    /// Create a handle for `address`. No I/O happens until [`SensorLink::connect`].
    fn open(&self, address: &str) -> Arc<dyn SensorLink>;
}

/// A single logical connection to the sensor.
///
/// Measurements arrive asynchronously: [`request_measurement_and_battery`]
/// only sends the command, and [`latest`] reports whatever the notification
/// channel has delivered so far.
///
/// [`request_measurement_and_battery`]: SensorLink::request_measurement_and_battery
/// [`latest`]: SensorLink::latest
#[async_trait]
pub trait SensorLink: Send + Sync {
    /// The address this handle targets.
    fn address(&self) -> &str;

    /// Whether the underlying stack reports an active connection.
    async fn is_connected(&self) -> bool;

    /// Connect and subscribe to notifications. Callers bound this with a timeout.
    async fn connect(&self) -> Result<()>;

    /// Send the combined measurement + battery request.
    async fn request_measurement_and_battery(&self) -> Result<()>;

    /// The most recent sample populated by the notification channel.
    async fn latest(&self) -> Option<SensorSample>;

    /// Drop the connection. Safe to call when not connected.
    async fn disconnect(&self) -> Result<()>;
}
