//! Acquisition state machine for a single H5075 sensor.
//!
//! One attempt walks `Connecting → Connected → Requesting →
//! AwaitingNotification` and ends in `Success` or `Failed`:
//!
//! 1. A handle left from an earlier attempt that still reports a connection
//!    is disconnected first, followed by a short settle delay.
//! 2. `connect` runs under a timeout. On expiry the connect future is dropped
//!    (cancelling it) and the half-open handle is disconnected before the
//!    attempt is marked failed.
//! 3. The measurement + battery request is sent and the notification given a
//!    fixed settle delay to arrive.
//! 4. With a sample the handle is disconnected and the sample returned;
//!    without one the attempt fails with [`Error::NoMeasurement`].
//!
//! Every transport call is bounded: the request write by `request_timeout`,
//! the connection check and each disconnect by `disconnect_timeout`.
//! Disconnect failures and expiries during cleanup are logged and never fail
//! an attempt on their own. Attempts are retried according to a [`RetryPolicy`]; when all
//! of them fail [`Acquirer::acquire`] returns [`Error::Exhausted`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::retry::{RetryPolicy, with_retry};
use crate::transport::{SensorLink, SensorSample, SensorTransport};

/// Timing of a single acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquisitionConfig {
    /// Upper bound for establishing the connection.
    pub connect_timeout: Duration,
    /// Wait between sending the request and checking for a sample.
    pub notification_settle: Duration,
    /// Wait after tearing down a stale connection before reconnecting.
    pub reconnect_settle: Duration,
    /// Upper bound for writing the measurement request.
    pub request_timeout: Duration,
    /// Upper bound for a disconnect or a connection-state check.
    pub disconnect_timeout: Duration,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(20),
            notification_settle: Duration::from_secs(4),
            reconnect_settle: Duration::from_millis(500),
            request_timeout: Duration::from_secs(5),
            disconnect_timeout: Duration::from_secs(5),
        }
    }
}

impl AcquisitionConfig {
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn notification_settle(mut self, settle: Duration) -> Self {
        self.notification_settle = settle;
        self
    }

    #[must_use]
    pub fn reconnect_settle(mut self, settle: Duration) -> Self {
        self.reconnect_settle = settle;
        self
    }

    /// Longest a single attempt can take: stale check and teardown with its
    /// settle delay, connect, request, notification settle and final
    /// disconnect.
    pub fn max_attempt_duration(&self) -> Duration {
        self.disconnect_timeout * 3
            + self.reconnect_settle
            + self.connect_timeout
            + self.request_timeout
            + self.notification_settle
    }

    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn disconnect_timeout(mut self, timeout: Duration) -> Self {
        self.disconnect_timeout = timeout;
        self
    }
}

/// Where the state machine currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionState {
    Idle,
    Connecting,
    Connected,
    Requesting,
    AwaitingNotification,
    Success,
    Failed,
}

/// How one attempt ended.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Success(SensorSample),
    Timeout,
    NoMeasurement,
    TransportError(String),
}

impl AttemptOutcome {
    fn from_error(err: &Error) -> Self {
        match err {
            Error::Timeout { .. } => AttemptOutcome::Timeout,
            Error::NoMeasurement => AttemptOutcome::NoMeasurement,
            other => AttemptOutcome::TransportError(other.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Success(_))
    }
}

/// Record of one attempt, kept for diagnostics only.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionAttempt {
    pub address: String,
    /// 0-based index within the run.
    pub index: u32,
    pub started_at: Instant,
    /// Latest instant the attempt could have finished.
    pub deadline: Instant,
    pub outcome: AttemptOutcome,
}

/// Drives acquisitions over a [`SensorTransport`].
///
/// The handle of the most recent attempt is retained so the next attempt, or
/// a manual refresh, can tear it down first.
pub struct Acquirer {
    transport: Arc<dyn SensorTransport>,
    config: AcquisitionConfig,
    state: RwLock<AcquisitionState>,
    current: Mutex<Option<Arc<dyn SensorLink>>>,
    attempts: RwLock<Vec<AcquisitionAttempt>>,
}

impl std::fmt::Debug for Acquirer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Acquirer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Acquirer {
    pub fn new(transport: Arc<dyn SensorTransport>, config: AcquisitionConfig) -> Self {
        Self {
            transport,
            config,
            state: RwLock::new(AcquisitionState::Idle),
            current: Mutex::new(None),
            attempts: RwLock::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &AcquisitionConfig {
        &self.config
    }

    pub async fn state(&self) -> AcquisitionState {
        *self.state.read().await
    }

    /// Attempts made by the most recent [`acquire`](Self::acquire) call.
    pub async fn last_attempts(&self) -> Vec<AcquisitionAttempt> {
        self.attempts.read().await.clone()
    }

    async fn set_state(&self, state: AcquisitionState) {
        *self.state.write().await = state;
    }

    /// Obtain one sample from the sensor at `address`.
    #[tracing::instrument(level = "info", skip(self), fields(attempts = policy.attempts))]
    pub async fn acquire(&self, address: &str, policy: RetryPolicy) -> Result<SensorSample> {
        self.attempts.write().await.clear();

        let result = with_retry(&policy, "acquire", move |index| {
            self.attempt(address, index)
        })
        .await;

        match result {
            Ok(sample) => {
                info!(
                    "{}: {:.2} °C, {:.2} %, battery {} %",
                    address,
                    sample.measurement.temperature,
                    sample.measurement.humidity,
                    sample.battery
                );
                Ok(sample)
            }
            Err(last) => {
                warn!("{}: all {} attempts failed: {}", address, policy.attempts, last);
                Err(Error::Exhausted {
                    address: address.to_string(),
                    attempts: policy.attempts,
                    last: Box::new(last),
                })
            }
        }
    }

    /// Disconnect whatever handle is currently held. Errors are logged only.
    pub async fn force_disconnect(&self) {
        let link = self.current.lock().await.take();
        if let Some(link) = link {
            info!("{}: forcing disconnect", link.address());
            self.disconnect_quietly(link.as_ref()).await;
        }
        self.set_state(AcquisitionState::Idle).await;
    }

    async fn attempt(&self, address: &str, index: u32) -> Result<SensorSample> {
        let started_at = Instant::now();
        let deadline = started_at + self.config.max_attempt_duration();

        let result = self.run_attempt(address).await;

        let outcome = match &result {
            Ok(sample) => AttemptOutcome::Success(*sample),
            Err(e) => AttemptOutcome::from_error(e),
        };
        self.set_state(if outcome.is_success() {
            AcquisitionState::Success
        } else {
            AcquisitionState::Failed
        })
        .await;
        self.attempts.write().await.push(AcquisitionAttempt {
            address: address.to_string(),
            index,
            started_at,
            deadline,
            outcome,
        });

        result
    }

    async fn run_attempt(&self, address: &str) -> Result<SensorSample> {
        let stale = self.current.lock().await.take();
        if let Some(stale) = stale
            && self.still_connected(stale.as_ref()).await
        {
            debug!("{}: tearing down stale connection", address);
            self.disconnect_quietly(stale.as_ref()).await;
            sleep(self.config.reconnect_settle).await;
        }

        let link = self.transport.open(address);
        *self.current.lock().await = Some(Arc::clone(&link));

        self.set_state(AcquisitionState::Connecting).await;
        match timeout(self.config.connect_timeout, link.connect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.disconnect_quietly(link.as_ref()).await;
                return Err(e);
            }
            Err(_) => {
                // The connect future has been dropped; clear any half-open state.
                self.disconnect_quietly(link.as_ref()).await;
                return Err(Error::timeout("connect", self.config.connect_timeout));
            }
        }
        self.set_state(AcquisitionState::Connected).await;

        self.set_state(AcquisitionState::Requesting).await;
        let request = timeout(
            self.config.request_timeout,
            link.request_measurement_and_battery(),
        )
        .await
        .unwrap_or_else(|_| Err(Error::timeout("request", self.config.request_timeout)));
        if let Err(e) = request {
            self.disconnect_quietly(link.as_ref()).await;
            return Err(e);
        }

        self.set_state(AcquisitionState::AwaitingNotification).await;
        sleep(self.config.notification_settle).await;

        let sample = link.latest().await;
        self.disconnect_quietly(link.as_ref()).await;
        sample.ok_or(Error::NoMeasurement)
    }

    /// Whether a leftover handle still holds the connection. A check that
    /// does not answer in time counts as connected.
    async fn still_connected(&self, link: &dyn SensorLink) -> bool {
        match timeout(self.config.disconnect_timeout, link.is_connected()).await {
            Ok(connected) => connected,
            Err(_) => {
                warn!(
                    "{}: connection check timed out after {:?}",
                    link.address(),
                    self.config.disconnect_timeout
                );
                true
            }
        }
    }

    async fn disconnect_quietly(&self, link: &dyn SensorLink) {
        match timeout(self.config.disconnect_timeout, link.disconnect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("{}: disconnect failed: {}", link.address(), e),
            Err(_) => warn!(
                "{}: disconnect timed out after {:?}",
                link.address(),
                self.config.disconnect_timeout
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockBehavior, MockTransport};
    use garage_types::Measurement;

    fn acquirer(transport: &Arc<MockTransport>) -> Acquirer {
        Acquirer::new(
            Arc::clone(transport) as Arc<dyn SensorTransport>,
            AcquisitionConfig::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_acquisition() {
        let transport = Arc::new(MockTransport::new());
        transport.set_sample(Measurement::new(21.5, 44.0), 80);
        let acq = acquirer(&transport);

        let start = Instant::now();
        let sample = acq
            .acquire("A4:C1:38:80:4F:47", RetryPolicy::steady_state())
            .await
            .unwrap();

        assert_eq!(sample.measurement, Measurement::new(21.5, 44.0));
        assert_eq!(sample.battery, 80);
        assert_eq!(acq.state().await, AcquisitionState::Success);
        assert_eq!(transport.connect_count(), 1);
        assert_eq!(transport.request_count(), 1);
        assert_eq!(transport.disconnect_count(), 1);
        // connect is instant, then the 4 s notification settle
        assert_eq!(start.elapsed(), Duration::from_secs(4));

        let attempts = acq.last_attempts().await;
        assert_eq!(attempts.len(), 1);
        assert!(attempts[0].outcome.is_success());
        assert_eq!(
            attempts[0].deadline - attempts[0].started_at,
            Duration::from_millis(44_500)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_exhausts_with_linear_backoff() {
        let transport = Arc::new(MockTransport::new());
        transport.set_default(MockBehavior::ConnectHang);
        let acq = acquirer(&transport);

        let policy = RetryPolicy::new(3, Duration::from_secs(2));
        let err = acq.acquire("A4:C1:38:80:4F:47", policy).await.unwrap_err();

        match &err {
            Error::Exhausted { attempts, last, .. } => {
                assert_eq!(*attempts, 3);
                assert!(matches!(**last, Error::Timeout { .. }));
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
        assert_eq!(transport.connect_count(), 3);
        assert_eq!(acq.state().await, AcquisitionState::Failed);

        // attempt starts: t=0, t=20+2, t=22+20+4
        let times = transport.connect_times();
        assert_eq!(times[1] - times[0], Duration::from_secs(22));
        assert_eq!(times[2] - times[1], Duration::from_secs(24));

        let attempts = acq.last_attempts().await;
        assert_eq!(attempts.len(), 3);
        assert!(attempts.iter().all(|a| a.outcome == AttemptOutcome::Timeout));
        assert_eq!(
            attempts.iter().map(|a| a.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        // each timed-out handle is torn down
        assert_eq!(transport.disconnect_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_notification_fails_attempt() {
        let transport = Arc::new(MockTransport::new());
        transport.set_default(MockBehavior::NoNotification);
        let acq = acquirer(&transport);

        let err = acq.acquire("addr", RetryPolicy::once()).await.unwrap_err();
        assert!(matches!(err.root(), Error::NoMeasurement));
        assert_eq!(transport.disconnect_count(), 1);
        assert_eq!(
            acq.last_attempts().await[0].outcome,
            AttemptOutcome::NoMeasurement
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failures() {
        let transport = Arc::new(MockTransport::new());
        transport.push(MockBehavior::ConnectError);
        transport.push(MockBehavior::RequestError);
        let acq = acquirer(&transport);

        let sample = acq.acquire("addr", RetryPolicy::steady_state()).await;
        assert!(sample.is_ok());
        assert_eq!(transport.connect_count(), 3);

        let outcomes: Vec<_> = acq
            .last_attempts()
            .await
            .into_iter()
            .map(|a| a.outcome)
            .collect();
        assert!(matches!(outcomes[0], AttemptOutcome::TransportError(_)));
        assert!(matches!(outcomes[1], AttemptOutcome::TransportError(_)));
        assert!(outcomes[2].is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_failure_is_not_fatal() {
        let transport = Arc::new(MockTransport::new());
        transport.set_disconnect_fails(true);
        let acq = acquirer(&transport);

        assert!(acq.acquire("addr", RetryPolicy::once()).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_disconnect_is_bounded() {
        let transport = Arc::new(MockTransport::new());
        transport.set_disconnect_hangs(true);
        let acq = acquirer(&transport);

        let start = Instant::now();
        let sample = timeout(
            Duration::from_secs(60),
            acq.acquire("addr", RetryPolicy::steady_state()),
        )
        .await
        .expect("acquire must not stall on a hanging disconnect");
        assert!(sample.is_ok());
        // 4 s notification settle + 5 s disconnect timeout
        assert_eq!(start.elapsed(), Duration::from_secs(9));

        // the forced disconnect is bounded as well
        let start = Instant::now();
        acq.force_disconnect().await;
        assert_eq!(start.elapsed(), Duration::from_secs(5));
        assert_eq!(acq.state().await, AcquisitionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_connection_check_counts_as_connected() {
        let transport = Arc::new(MockTransport::new());
        let acq = acquirer(&transport);
        acq.acquire("addr", RetryPolicy::once()).await.unwrap();
        let disconnects = transport.disconnect_count();

        transport.set_status_hangs(true);
        let start = Instant::now();
        acq.acquire("addr", RetryPolicy::once()).await.unwrap();
        // 5 s check timeout, stale teardown, 0.5 s settle, 4 s notification settle
        assert_eq!(start.elapsed(), Duration::from_millis(9500));
        assert_eq!(transport.disconnect_count(), disconnects + 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_request_times_out() {
        let transport = Arc::new(MockTransport::new());
        transport.set_default(MockBehavior::RequestHang);
        let acq = acquirer(&transport);

        let start = Instant::now();
        let err = acq.acquire("addr", RetryPolicy::once()).await.unwrap_err();
        assert!(matches!(err.root(), Error::Timeout { operation, .. } if operation == "request"));
        assert_eq!(start.elapsed(), Duration::from_secs(5));
        assert_eq!(transport.disconnect_count(), 1);
        assert_eq!(acq.last_attempts().await[0].outcome, AttemptOutcome::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_connection_is_torn_down_first() {
        let transport = Arc::new(MockTransport::new());
        transport.set_stays_connected(true);
        let acq = acquirer(&transport);

        acq.acquire("addr", RetryPolicy::once()).await.unwrap();
        let after_first = transport.disconnect_count();

        let start = Instant::now();
        acq.acquire("addr", RetryPolicy::once()).await.unwrap();
        // stale teardown + its settle delay, then the normal attempt
        assert_eq!(transport.disconnect_count(), after_first + 2);
        assert_eq!(start.elapsed(), Duration::from_millis(4500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_disconnect_resets_state() {
        let transport = Arc::new(MockTransport::new());
        let acq = acquirer(&transport);
        acq.acquire("addr", RetryPolicy::once()).await.unwrap();

        acq.force_disconnect().await;
        assert_eq!(acq.state().await, AcquisitionState::Idle);
        assert_eq!(transport.disconnect_count(), 2);

        // nothing left to tear down
        acq.force_disconnect().await;
        assert_eq!(transport.disconnect_count(), 2);
    }
}
