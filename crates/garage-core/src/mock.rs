//! Mock transport for testing without BLE hardware.
//!
//! [`MockTransport`] hands out [`MockLink`]s whose behaviour is scripted per
//! attempt, and counts every call so tests can assert on the exact sequence
//! of connects, requests and disconnects.
//!
//! # Features
//!
//! - **Scripted failures**: queue a [`MockBehavior`] per upcoming attempt
//! - **Latency simulation**: delay every connect by a fixed duration
//! - **Stale connections**: keep links "connected" after disconnect
//! - **Hung stacks**: disconnects or connection checks that never return

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use garage_types::Measurement;

use crate::error::{Error, Result};
use crate::transport::{SensorLink, SensorSample, SensorTransport};

/// What a link opened by [`MockTransport`] will do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockBehavior {
    /// Connect, answer the request, disconnect cleanly.
    Respond,
    /// `connect` never completes.
    ConnectHang,
    /// `connect` fails immediately.
    ConnectError,
    /// `connect` succeeds but the request write fails.
    RequestError,
    /// `connect` succeeds but the request write never completes.
    RequestHang,
    /// The request is accepted but no notification ever arrives.
    NoNotification,
    /// `connect` panics.
    PanicOnConnect,
}

#[derive(Debug)]
struct MockShared {
    script: Mutex<VecDeque<MockBehavior>>,
    default: Mutex<MockBehavior>,
    sample: Mutex<SensorSample>,
    open_count: AtomicU32,
    connect_count: AtomicU32,
    request_count: AtomicU32,
    disconnect_count: AtomicU32,
    connect_times: Mutex<Vec<Instant>>,
    /// Simulated connect latency in milliseconds (0 = no delay).
    connect_latency_ms: AtomicU64,
    disconnect_fails: AtomicBool,
    disconnect_hangs: AtomicBool,
    status_hangs: AtomicBool,
    stays_connected: AtomicBool,
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A scripted [`SensorTransport`].
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use garage_core::mock::{MockBehavior, MockTransport};
/// use garage_core::{AcquisitionConfig, Acquirer, RetryPolicy};
///
/// # async fn example() {
/// let transport = Arc::new(MockTransport::new());
/// transport.push(MockBehavior::ConnectError);
///
/// let acquirer = Acquirer::new(transport.clone(), AcquisitionConfig::default());
/// let sample = acquirer.acquire("A4:C1:38:00:00:01", RetryPolicy::steady_state()).await;
/// assert!(sample.is_ok());
/// assert_eq!(transport.connect_count(), 2);
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct MockTransport {
    shared: Arc<MockShared>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// A transport whose links always respond with 21.5 °C, 44 %, battery 80 %.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(MockShared {
                script: Mutex::new(VecDeque::new()),
                default: Mutex::new(MockBehavior::Respond),
                sample: Mutex::new(SensorSample {
                    measurement: Measurement::new(21.5, 44.0),
                    battery: 80,
                }),
                open_count: AtomicU32::new(0),
                connect_count: AtomicU32::new(0),
                request_count: AtomicU32::new(0),
                disconnect_count: AtomicU32::new(0),
                connect_times: Mutex::new(Vec::new()),
                connect_latency_ms: AtomicU64::new(0),
                disconnect_fails: AtomicBool::new(false),
                disconnect_hangs: AtomicBool::new(false),
                status_hangs: AtomicBool::new(false),
                stays_connected: AtomicBool::new(false),
            }),
        }
    }

    /// Queue the behaviour of the next opened link.
    pub fn push(&self, behavior: MockBehavior) {
        lock(&self.shared.script).push_back(behavior);
    }

    /// Behaviour used once the queue is empty.
    pub fn set_default(&self, behavior: MockBehavior) {
        *lock(&self.shared.default) = behavior;
    }

    /// Sample delivered by responding links.
    pub fn set_sample(&self, measurement: Measurement, battery: u8) {
        *lock(&self.shared.sample) = SensorSample {
            measurement,
            battery,
        };
    }

    /// Delay every connect by `latency`.
    pub fn set_connect_latency(&self, latency: Duration) {
        self.shared
            .connect_latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Make every disconnect return an error.
    pub fn set_disconnect_fails(&self, fail: bool) {
        self.shared.disconnect_fails.store(fail, Ordering::Relaxed);
    }

    /// Make every disconnect wait forever.
    pub fn set_disconnect_hangs(&self, hang: bool) {
        self.shared.disconnect_hangs.store(hang, Ordering::Relaxed);
    }

    /// Make every connection check wait forever.
    pub fn set_status_hangs(&self, hang: bool) {
        self.shared.status_hangs.store(hang, Ordering::Relaxed);
    }

    /// Keep links reporting a connection after they were disconnected.
    pub fn set_stays_connected(&self, stays: bool) {
        self.shared.stays_connected.store(stays, Ordering::Relaxed);
    }

    pub fn open_count(&self) -> u32 {
        self.shared.open_count.load(Ordering::Relaxed)
    }

    pub fn connect_count(&self) -> u32 {
        self.shared.connect_count.load(Ordering::Relaxed)
    }

    pub fn request_count(&self) -> u32 {
        self.shared.request_count.load(Ordering::Relaxed)
    }

    pub fn disconnect_count(&self) -> u32 {
        self.shared.disconnect_count.load(Ordering::Relaxed)
    }

    /// When each connect call started.
    pub fn connect_times(&self) -> Vec<Instant> {
        lock(&self.shared.connect_times).clone()
    }
}

impl SensorTransport for MockTransport {
    fn open(&self, address: &str) -> Arc<dyn SensorLink> {
        self.shared.open_count.fetch_add(1, Ordering::Relaxed);
        let behavior = lock(&self.shared.script)
            .pop_front()
            .unwrap_or_else(|| *lock(&self.shared.default));

        Arc::new(MockLink {
            address: address.to_string(),
            behavior,
            shared: Arc::clone(&self.shared),
            connected: AtomicBool::new(false),
            notified: Mutex::new(None),
        })
    }
}

/// A link opened by [`MockTransport`].
#[derive(Debug)]
pub struct MockLink {
    address: String,
    behavior: MockBehavior,
    shared: Arc<MockShared>,
    connected: AtomicBool,
    notified: Mutex<Option<SensorSample>>,
}

impl MockLink {
    pub fn behavior(&self) -> MockBehavior {
        self.behavior
    }
}

#[async_trait]
impl SensorLink for MockLink {
    fn address(&self) -> &str {
        &self.address
    }

    async fn is_connected(&self) -> bool {
        if self.shared.status_hangs.load(Ordering::Relaxed) {
            std::future::pending::<()>().await;
        }
        self.connected.load(Ordering::Relaxed)
    }

    async fn connect(&self) -> Result<()> {
        self.shared.connect_count.fetch_add(1, Ordering::Relaxed);
        lock(&self.shared.connect_times).push(Instant::now());

        let latency = self.shared.connect_latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        match self.behavior {
            MockBehavior::ConnectHang => std::future::pending().await,
            MockBehavior::ConnectError => Err(Error::transport("mock connect refused")),
            MockBehavior::PanicOnConnect => panic!("mock transport panicked during connect"),
            _ => {
                self.connected.store(true, Ordering::Relaxed);
                Ok(())
            }
        }
    }

    async fn request_measurement_and_battery(&self) -> Result<()> {
        self.shared.request_count.fetch_add(1, Ordering::Relaxed);

        if !self.connected.load(Ordering::Relaxed) {
            return Err(Error::NotConnected);
        }
        match self.behavior {
            MockBehavior::RequestError => Err(Error::transport("mock write failed")),
            MockBehavior::RequestHang => std::future::pending().await,
            MockBehavior::NoNotification => Ok(()),
            _ => {
                let sample = *lock(&self.shared.sample);
                *lock(&self.notified) = Some(sample);
                Ok(())
            }
        }
    }

    async fn latest(&self) -> Option<SensorSample> {
        *lock(&self.notified)
    }

    async fn disconnect(&self) -> Result<()> {
        self.shared.disconnect_count.fetch_add(1, Ordering::Relaxed);

        if self.shared.disconnect_hangs.load(Ordering::Relaxed) {
            std::future::pending::<()>().await;
        }
        if self.shared.disconnect_fails.load(Ordering::Relaxed) {
            return Err(Error::transport("mock disconnect failed"));
        }
        if !self.shared.stays_connected.load(Ordering::Relaxed) {
            self.connected.store(false, Ordering::Relaxed);
        }
        Ok(())
    }
}
