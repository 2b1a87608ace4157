//! Hardware integration tests for garage-core
//!
//! These tests require an H5075 in range and should be run with:
//! ```
//! cargo test --package garage-core --test hardware_tests -- --ignored --nocapture
//! ```
//!
//! Set `GARAGE_SENSOR_ADDRESS` to the sensor's MAC address (or its peripheral
//! UUID on macOS). Without it the tests use `A4:C1:38:80:4F:47`.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use garage_core::h5075::get_adapter;
use garage_core::{
    AcquisitionConfig, AcquisitionState, Acquirer, BleTransport, MemoryStore, RetryPolicy,
    SensorConfig, SensorLink, SensorService, SensorTransport,
};
use tokio::time::timeout;

/// Upper bound for a full acquisition including retries.
const BLE_TIMEOUT: Duration = Duration::from_secs(120);

fn sensor_address() -> String {
    env::var("GARAGE_SENSOR_ADDRESS")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "A4:C1:38:80:4F:47".to_string())
}

fn acquirer() -> Arc<Acquirer> {
    Arc::new(Acquirer::new(
        Arc::new(BleTransport::new().scan_duration(Duration::from_secs(15))),
        AcquisitionConfig::default(),
    ))
}

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_adapter_available() {
    let adapter = get_adapter().await;
    assert!(adapter.is_ok(), "no Bluetooth adapter: {:?}", adapter.err());
}

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_single_acquisition() {
    let address = sensor_address();
    let acquirer = acquirer();

    let sample = timeout(BLE_TIMEOUT, acquirer.acquire(&address, RetryPolicy::steady_state()))
        .await
        .expect("acquisition timed out")
        .expect("acquisition failed");

    println!(
        "{}: {:.2} °C, {:.2} %, battery {} %",
        address, sample.measurement.temperature, sample.measurement.humidity, sample.battery
    );
    assert!((-40.0..=100.0).contains(&sample.measurement.temperature));
    assert!((0.0..=100.0).contains(&sample.measurement.humidity));
    assert!(sample.battery <= 100);
    assert_eq!(acquirer.state().await, AcquisitionState::Success);

    for attempt in acquirer.last_attempts().await {
        println!("  attempt {}: {:?}", attempt.index, attempt.outcome);
    }
}

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_link_connects_and_disconnects() {
    let transport = BleTransport::new();
    let link = transport.open(&sensor_address());

    timeout(Duration::from_secs(30), link.connect())
        .await
        .expect("connect timed out")
        .expect("connect failed");
    assert!(link.is_connected().await);

    link.request_measurement_and_battery().await.unwrap();
    tokio::time::sleep(Duration::from_secs(4)).await;
    println!("Latest sample: {:?}", link.latest().await);

    link.disconnect().await.unwrap();
    assert!(!link.is_connected().await);
}

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_force_refresh_against_sensor() {
    let store = Arc::new(MemoryStore::new());
    let sensor = SensorService::new(
        acquirer(),
        store.clone(),
        SensorConfig::new(sensor_address(), "hardware-test"),
    );

    let reading = timeout(BLE_TIMEOUT, sensor.force_refresh(Duration::from_secs(5)))
        .await
        .expect("refresh timed out");

    match reading {
        Ok(reading) => {
            println!("{:?}", reading);
            assert!(reading.derived().is_some());
        }
        Err(e) => {
            println!("Refresh failed: {}", e);
            // the failure still leaves an offline marker behind
            assert_eq!(store.len(), 1);
            assert!(!store.readings()[0].is_online());
        }
    }
}
