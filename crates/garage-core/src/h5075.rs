//! btleplug-backed transport for the Govee H5075.
//!
//! Each [`H5075Link`] resolves its peripheral on the first adapter, connects,
//! subscribes to the command and device characteristics and keeps the latest
//! decoded notification in memory.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use garage_types::{Measurement, uuids};

use crate::commands::{self, Notification, REQUEST_MEASUREMENT_AND_BATTERY};
use crate::error::{Error, Result};
use crate::transport::{SensorLink, SensorSample, SensorTransport};

/// Delay after subscribing before the first request is accepted reliably.
const SUBSCRIBE_SETTLE: Duration = Duration::from_millis(200);

/// Get the first available Bluetooth adapter.
pub async fn get_adapter() -> Result<Adapter> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;

    adapters.into_iter().next().ok_or(Error::NoAdapter)
}

/// Search the adapter's known peripherals for `address`.
///
/// Matches the MAC address (case and separator insensitive) on Linux/Windows
/// and the peripheral id on macOS, where addresses are hidden.
async fn find_peripheral(adapter: &Adapter, address: &str) -> Result<Option<Peripheral>> {
    let wanted = address.to_lowercase().replace(':', "");

    for peripheral in adapter.peripherals().await? {
        if let Ok(Some(props)) = peripheral.properties().await {
            let found = props.address.to_string().to_lowercase().replace(':', "");
            if found != "000000000000" && found == wanted {
                debug!("Matched peripheral by address: {}", props.address);
                return Ok(Some(peripheral));
            }
        }

        let id = format!("{:?}", peripheral.id()).to_lowercase();
        if id.contains(&address.to_lowercase()) {
            debug!("Matched peripheral by id: {}", id);
            return Ok(Some(peripheral));
        }
    }

    Ok(None)
}

/// Transport that opens [`H5075Link`]s on the system Bluetooth adapter.
#[derive(Debug, Clone)]
pub struct BleTransport {
    scan_duration: Duration,
}

impl Default for BleTransport {
    fn default() -> Self {
        Self {
            scan_duration: Duration::from_secs(10),
        }
    }
}

impl BleTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// How long to scan when the sensor is not already known to the adapter.
    #[must_use]
    pub fn scan_duration(mut self, duration: Duration) -> Self {
        self.scan_duration = duration;
        self
    }
}

impl SensorTransport for BleTransport {
    fn open(&self, address: &str) -> Arc<dyn SensorLink> {
        Arc::new(H5075Link::new(address, self.scan_duration))
    }
}

#[derive(Debug, Default)]
struct NotifiedState {
    measurement: Option<Measurement>,
    battery: Option<u8>,
}

impl NotifiedState {
    fn apply(&mut self, notification: Notification) {
        match notification {
            Notification::MeasurementAndBattery {
                measurement,
                battery,
            } => {
                self.measurement = Some(measurement);
                self.battery = Some(battery);
            }
            Notification::Measurement(measurement) => self.measurement = Some(measurement),
            Notification::Battery(battery) => self.battery = Some(battery),
        }
    }
}

/// One connection to an H5075 over btleplug.
pub struct H5075Link {
    address: String,
    scan_duration: Duration,
    /// Adapter is kept alongside the peripheral for the connection's lifetime.
    peripheral: RwLock<Option<(Adapter, Peripheral)>>,
    state: Arc<Mutex<NotifiedState>>,
    notification_task: Mutex<Option<JoinHandle<()>>>,
}

impl H5075Link {
    pub fn new(address: &str, scan_duration: Duration) -> Self {
        Self {
            address: address.to_string(),
            scan_duration,
            peripheral: RwLock::new(None),
            state: Arc::new(Mutex::new(NotifiedState::default())),
            notification_task: Mutex::new(None),
        }
    }

    async fn resolve(&self) -> Result<(Adapter, Peripheral)> {
        if let Some(found) = self.peripheral.read().await.clone() {
            return Ok(found);
        }

        let adapter = get_adapter().await?;
        let peripheral = match find_peripheral(&adapter, &self.address).await? {
            Some(p) => p,
            None => {
                info!(
                    "Scanning {:?} for {}...",
                    self.scan_duration, self.address
                );
                adapter.start_scan(ScanFilter::default()).await?;
                sleep(self.scan_duration).await;
                adapter.stop_scan().await?;
                find_peripheral(&adapter, &self.address)
                    .await?
                    .ok_or_else(|| Error::DeviceNotFound(self.address.clone()))?
            }
        };

        *self.peripheral.write().await = Some((adapter.clone(), peripheral.clone()));
        Ok((adapter, peripheral))
    }

    async fn connected_peripheral(&self) -> Result<Peripheral> {
        match self.peripheral.read().await.as_ref() {
            Some((_, p)) => Ok(p.clone()),
            None => Err(Error::NotConnected),
        }
    }

    fn find_characteristic(peripheral: &Peripheral, uuid: Uuid) -> Result<Characteristic> {
        let characteristics: BTreeSet<Characteristic> = peripheral.characteristics();
        characteristics
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or_else(|| Error::CharacteristicNotFound(uuid.to_string()))
    }

    fn abort_notifications(&self) {
        let handle = self
            .notification_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

#[async_trait]
impl SensorLink for H5075Link {
    fn address(&self) -> &str {
        &self.address
    }

    async fn is_connected(&self) -> bool {
        if let Ok(peripheral) = self.connected_peripheral().await {
            return peripheral.is_connected().await.unwrap_or(false);
        }

        // A connection left over from an earlier handle is still visible on
        // the adapter; adopt it so disconnect() can tear it down.
        let Ok(adapter) = get_adapter().await else {
            return false;
        };
        match find_peripheral(&adapter, &self.address).await {
            Ok(Some(peripheral)) if peripheral.is_connected().await.unwrap_or(false) => {
                *self.peripheral.write().await = Some((adapter, peripheral));
                true
            }
            _ => false,
        }
    }

    #[tracing::instrument(level = "debug", skip(self), fields(address = %self.address))]
    async fn connect(&self) -> Result<()> {
        let (_, peripheral) = self.resolve().await?;

        info!("Connecting to {}", self.address);
        peripheral.connect().await?;
        peripheral.discover_services().await?;

        let command = Self::find_characteristic(&peripheral, uuids::COMMAND)?;
        let device = Self::find_characteristic(&peripheral, uuids::DEVICE)?;
        peripheral.subscribe(&device).await?;
        peripheral.subscribe(&command).await?;

        let mut stream = peripheral.notifications().await?;
        let state = Arc::clone(&self.state);
        let address = self.address.clone();
        let handle = tokio::spawn(async move {
            while let Some(notification) = stream.next().await {
                if notification.uuid != uuids::COMMAND && notification.uuid != uuids::DEVICE {
                    continue;
                }
                match Notification::parse(&notification.value) {
                    Ok(parsed) => {
                        debug!("{}: notification {:?}", address, parsed);
                        state
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .apply(parsed);
                    }
                    Err(e) => debug!("{}: ignoring notification: {}", address, e),
                }
            }
        });

        self.abort_notifications();
        *self
            .notification_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);

        sleep(SUBSCRIBE_SETTLE).await;
        info!("Connected to {}", self.address);
        Ok(())
    }

    async fn request_measurement_and_battery(&self) -> Result<()> {
        let peripheral = self.connected_peripheral().await?;
        let command = Self::find_characteristic(&peripheral, uuids::COMMAND)?;
        let frame = commands::frame(REQUEST_MEASUREMENT_AND_BATTERY, &[]);

        debug!("{}: >>> {:02x?}", self.address, frame);
        peripheral
            .write(&command, &frame, WriteType::WithResponse)
            .await?;
        Ok(())
    }

    async fn latest(&self) -> Option<SensorSample> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.measurement.map(|measurement| SensorSample {
            measurement,
            battery: state.battery.unwrap_or(0),
        })
    }

    async fn disconnect(&self) -> Result<()> {
        self.abort_notifications();

        let Ok(peripheral) = self.connected_peripheral().await else {
            return Ok(());
        };
        if peripheral.is_connected().await.unwrap_or(false) {
            info!("Disconnecting from {}", self.address);
            peripheral.disconnect().await?;
        }
        Ok(())
    }
}

impl Drop for H5075Link {
    fn drop(&mut self) {
        if let Some(handle) = self
            .notification_task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            warn!(
                "{}: link dropped with live notification task, aborting it",
                self.address
            );
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notified_state_merges_notifications() {
        let mut state = NotifiedState::default();
        state.apply(Notification::Battery(70));
        assert!(state.measurement.is_none());

        state.apply(Notification::Measurement(Measurement::new(18.0, 60.0)));
        assert_eq!(state.measurement, Some(Measurement::new(18.0, 60.0)));
        assert_eq!(state.battery, Some(70));

        state.apply(Notification::MeasurementAndBattery {
            measurement: Measurement::new(21.5, 44.0),
            battery: 80,
        });
        assert_eq!(state.measurement, Some(Measurement::new(21.5, 44.0)));
        assert_eq!(state.battery, Some(80));
    }

    #[tokio::test]
    async fn test_unconnected_link_has_no_sample() {
        let link = H5075Link::new("A4:C1:38:80:4F:47", Duration::from_secs(1));
        assert_eq!(link.address(), "A4:C1:38:80:4F:47");
        assert!(link.latest().await.is_none());
        assert!(matches!(
            link.request_measurement_and_battery().await,
            Err(Error::NotConnected)
        ));
        assert!(link.disconnect().await.is_ok());
    }
}
