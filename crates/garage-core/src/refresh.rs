//! Manual refresh outside the scheduler's cadence.

use std::time::Duration;

use garage_types::Reading;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::Result;
use crate::sensor::SensorService;

/// How long a manual refresh waits for the scheduler to release the lease.
pub const DEFAULT_LEASE_WAIT: Duration = Duration::from_secs(30);

/// Pause between the forced disconnect and the new acquisition.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(1);

impl SensorService {
    /// Force a disconnect and take a fresh reading right now.
    ///
    /// Waits up to `lease_wait` for a running scheduler iteration to finish
    /// ([`Error::LeaseBusy`](crate::Error::LeaseBusy) otherwise). On acquisition
    /// failure an offline reading is recorded and the error returned.
    #[tracing::instrument(level = "info", skip(self), fields(device = %self.config.name))]
    pub async fn force_refresh(&self, lease_wait: Duration) -> Result<Reading> {
        let _lease = self.lease.acquire_timeout("manual refresh", lease_wait).await?;

        info!("Manual refresh of {}", self.config.address);
        self.acquirer.force_disconnect().await;
        sleep(RECONNECT_DELAY).await;

        match self.acquire_reading(self.refresh_policy).await {
            Ok(reading) => Ok(reading),
            Err(e) => {
                warn!("Manual refresh failed: {}", e);
                self.mark_offline().await;
                Err(e)
            }
        }
    }
}
