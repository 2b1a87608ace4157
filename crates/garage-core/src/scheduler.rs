//! The perpetual update loop.
//!
//! At start-up the scheduler runs a bootstrap phase of several short
//! acquisition rounds with growing back-off. Then it settles into a steady
//! state: one update per interval, forever. A failed or panicking iteration
//! is logged, an offline reading is recorded and the loop carries on; only
//! [`UpdateScheduler::stop`] ends it.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::retry::RetryPolicy;
use crate::sensor::SensorService;

/// Timing of the bootstrap and steady-state phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Number of bootstrap rounds before entering steady state.
    pub bootstrap_rounds: u32,
    /// Retry policy inside each bootstrap round.
    pub bootstrap_policy: RetryPolicy,
    /// Back-off after the first failed bootstrap round.
    pub bootstrap_backoff: Duration,
    /// Added to the back-off for every further round.
    pub bootstrap_backoff_step: Duration,
    /// Retry policy of every steady-state update.
    pub steady_policy: RetryPolicy,
    /// Pause between steady-state iterations.
    pub interval: Duration,
    /// Extra pause after an iteration that panicked.
    pub cooldown: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            bootstrap_rounds: 5,
            bootstrap_policy: RetryPolicy::bootstrap(),
            bootstrap_backoff: Duration::from_secs(5),
            bootstrap_backoff_step: Duration::from_secs(5),
            steady_policy: RetryPolicy::steady_state(),
            interval: Duration::from_secs(300),
            cooldown: Duration::from_secs(5),
        }
    }
}

impl SchedulerConfig {
    #[must_use]
    pub fn bootstrap_rounds(mut self, rounds: u32) -> Self {
        self.bootstrap_rounds = rounds;
        self
    }

    #[must_use]
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    #[must_use]
    pub fn steady_policy(mut self, policy: RetryPolicy) -> Self {
        self.steady_policy = policy;
        self
    }

    #[must_use]
    pub fn bootstrap_policy(mut self, policy: RetryPolicy) -> Self {
        self.bootstrap_policy = policy;
        self
    }

    /// Back-off after bootstrap round `round` (0-based) failed, or `None`
    /// after the last round.
    pub fn bootstrap_backoff_after(&self, round: u32) -> Option<Duration> {
        if round + 1 >= self.bootstrap_rounds {
            None
        } else {
            Some(self.bootstrap_backoff + self.bootstrap_backoff_step * round)
        }
    }
}

/// Which phase the loop is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPhase {
    NotStarted,
    Bootstrap,
    Steady,
    Stopped,
}

/// Counters readable while the loop runs.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerStats {
    pub phase: SchedulerPhase,
    /// Whether a bootstrap round succeeded. `None` until bootstrap ends.
    pub bootstrapped: Option<bool>,
    /// Steady-state iterations started.
    pub iterations: u64,
    pub successes: u64,
    pub failures: u64,
    /// Iterations (bootstrap included) that panicked.
    pub panics: u64,
    pub last_success: Option<OffsetDateTime>,
    pub last_error: Option<String>,
}

#[derive(Debug)]
struct Counters {
    phase: Mutex<SchedulerPhase>,
    bootstrapped: Mutex<Option<bool>>,
    iterations: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    panics: AtomicU64,
    last_success: Mutex<Option<OffsetDateTime>>,
    last_error: Mutex<Option<String>>,
}

impl Default for Counters {
    fn default() -> Self {
        Self {
            phase: Mutex::new(SchedulerPhase::NotStarted),
            bootstrapped: Mutex::new(None),
            iterations: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            panics: AtomicU64::new(0),
            last_success: Mutex::new(None),
            last_error: Mutex::new(None),
        }
    }
}

fn set<T>(slot: &Mutex<T>, value: T) {
    *slot.lock().unwrap_or_else(PoisonError::into_inner) = value;
}

fn get<T: Clone>(slot: &Mutex<T>) -> T {
    slot.lock().unwrap_or_else(PoisonError::into_inner).clone()
}

/// How one guarded update ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cycle {
    Success,
    Failure,
    Panic,
}

/// Background loop keeping the sensor's readings current.
#[derive(Debug)]
pub struct UpdateScheduler {
    sensor: Arc<SensorService>,
    config: SchedulerConfig,
    counters: Counters,
    started: AtomicBool,
    cancel: CancellationToken,
}

impl UpdateScheduler {
    pub fn new(sensor: Arc<SensorService>, config: SchedulerConfig) -> Self {
        Self {
            sensor,
            config,
            counters: Counters::default(),
            started: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Spawn the loop on the tokio runtime.
    ///
    /// Only the first call spawns anything; later calls log a warning and
    /// return `None`.
    pub fn start(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("Update scheduler already started, ignoring");
            return None;
        }

        let scheduler = Arc::clone(self);
        Some(tokio::spawn(async move { scheduler.run().await }))
    }

    /// Ask the loop to end at its next pause.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::Acquire) && !self.cancel.is_cancelled()
    }

    pub fn stats(&self) -> SchedulerStats {
        let c = &self.counters;
        SchedulerStats {
            phase: get(&c.phase),
            bootstrapped: get(&c.bootstrapped),
            iterations: c.iterations.load(Ordering::Relaxed),
            successes: c.successes.load(Ordering::Relaxed),
            failures: c.failures.load(Ordering::Relaxed),
            panics: c.panics.load(Ordering::Relaxed),
            last_success: get(&c.last_success),
            last_error: get(&c.last_error),
        }
    }

    /// Bootstrap, then steady state until stopped.
    async fn run(&self) {
        info!(
            "Update scheduler started for {} (interval {:?})",
            self.sensor.config().name,
            self.config.interval
        );

        set(&self.counters.phase, SchedulerPhase::Bootstrap);
        let bootstrapped = self.bootstrap().await;
        set(&self.counters.bootstrapped, Some(bootstrapped));

        set(&self.counters.phase, SchedulerPhase::Steady);
        while !self.cancel.is_cancelled() {
            self.iteration().await;
            if !self.pause(self.config.interval).await {
                break;
            }
        }

        set(&self.counters.phase, SchedulerPhase::Stopped);
        info!("Update scheduler stopped");
    }

    /// Returns whether any round produced a reading.
    async fn bootstrap(&self) -> bool {
        for round in 0..self.config.bootstrap_rounds {
            if self.cancel.is_cancelled() {
                return false;
            }
            debug!("Bootstrap round {}/{}", round + 1, self.config.bootstrap_rounds);

            // Only the first failed round leaves an offline marker.
            match self.cycle(self.config.bootstrap_policy, round == 0).await {
                Cycle::Success => {
                    info!("Bootstrap succeeded in round {}", round + 1);
                    return true;
                }
                Cycle::Failure | Cycle::Panic => {}
            }

            if let Some(backoff) = self.config.bootstrap_backoff_after(round)
                && !self.pause(backoff).await
            {
                return false;
            }
        }

        warn!(
            "All {} bootstrap rounds failed, continuing in steady state",
            self.config.bootstrap_rounds
        );
        false
    }

    async fn iteration(&self) {
        let n = self.counters.iterations.fetch_add(1, Ordering::Relaxed) + 1;
        debug!("Update iteration {}", n);

        match self.cycle(self.config.steady_policy, true).await {
            Cycle::Success => {
                self.counters.successes.fetch_add(1, Ordering::Relaxed);
            }
            Cycle::Failure | Cycle::Panic => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// One update with panics caught.
    async fn cycle(&self, policy: RetryPolicy, record_offline: bool) -> Cycle {
        let update = self.sensor.update_with(policy, record_offline);

        match AssertUnwindSafe(update).catch_unwind().await {
            Ok(Ok(_)) => {
                set(&self.counters.last_success, Some(OffsetDateTime::now_utc()));
                Cycle::Success
            }
            Ok(Err(e)) => {
                set(&self.counters.last_error, Some(e.to_string()));
                Cycle::Failure
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!("Update panicked: {}", message);
                self.counters.panics.fetch_add(1, Ordering::Relaxed);
                set(&self.counters.last_error, Some(format!("panic: {message}")));
                if record_offline {
                    self.sensor.mark_offline().await;
                }
                self.pause(self.config.cooldown).await;
                Cycle::Panic
            }
        }
    }

    /// Sleep for `duration`. Returns false if stopped meanwhile.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = sleep(duration) => true,
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
