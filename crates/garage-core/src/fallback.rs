//! Offline fallback: what gets recorded when the sensor cannot be read.

use std::sync::Arc;

use garage_types::Reading;
use time::OffsetDateTime;
use tracing::{error, info};

use crate::store::ReadingStore;

/// Records offline readings that carry the last known values forward.
#[derive(Clone)]
pub struct OfflineFallback {
    store: Arc<dyn ReadingStore>,
}

impl std::fmt::Debug for OfflineFallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineFallback").finish_non_exhaustive()
    }
}

impl OfflineFallback {
    pub fn new(store: Arc<dyn ReadingStore>) -> Self {
        Self { store }
    }

    /// Append an offline reading for `device_name`.
    ///
    /// Temperature, humidity and battery come from the device's most recent
    /// reading; without one they are absent and the battery is 0. Store
    /// failures are logged and yield `None`; this never fails.
    pub async fn mark_offline(&self, device_name: &str) -> Option<Reading> {
        let previous = match self.store.most_recent(Some(device_name)).await {
            Ok(previous) => previous,
            Err(e) => {
                error!("{}: could not look up last reading: {}", device_name, e);
                return None;
            }
        };

        let reading = Reading::offline(device_name, previous.as_ref(), OffsetDateTime::now_utc());

        match self.store.append(reading).await {
            Ok(stored) => {
                info!("{}: marked offline", device_name);
                Some(stored)
            }
            Err(e) => {
                error!("{}: could not record offline reading: {}", device_name, e);
                None
            }
        }
    }
}
