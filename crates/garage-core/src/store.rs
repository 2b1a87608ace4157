//! The reading store collaborator.
//!
//! Readings are append-only: the core only ever appends and looks up the most
//! recent reading. garage-store provides the SQLite implementation;
//! [`MemoryStore`] is used in tests and for dry runs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use garage_types::Reading;

use crate::error::{Error, Result};

/// Persistent, append-only reading history.
#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// Persist `reading` and return it as stored.
    async fn append(&self, reading: Reading) -> Result<Reading>;

    /// Latest reading by capture time, optionally restricted to one device.
    async fn most_recent(&self, device_name: Option<&str>) -> Result<Option<Reading>>;
}

/// In-memory [`ReadingStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    readings: Mutex<Vec<Reading>>,
    failing: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with [`Error::Store`].
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    /// Everything appended so far, in insertion order.
    pub fn readings(&self) -> Vec<Reading> {
        self.readings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.readings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::Relaxed) {
            Err(Error::store("memory store unavailable"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ReadingStore for MemoryStore {
    async fn append(&self, reading: Reading) -> Result<Reading> {
        self.check()?;
        self.readings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(reading.clone());
        Ok(reading)
    }

    async fn most_recent(&self, device_name: Option<&str>) -> Result<Option<Reading>> {
        self.check()?;
        let readings = self.readings.lock().unwrap_or_else(PoisonError::into_inner);
        // Later insertions win ties on capture time.
        Ok(readings
            .iter()
            .enumerate()
            .filter(|(_, r)| device_name.is_none_or(|d| r.device_name == d))
            .max_by_key(|(i, r)| (r.captured_at, *i))
            .map(|(_, r)| r.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use garage_types::Measurement;
    use time::{Duration, OffsetDateTime};

    fn reading(device: &str, offset_secs: i64, temp: f64) -> Reading {
        Reading::online(
            device,
            Measurement::new(temp, 50.0),
            90,
            OffsetDateTime::UNIX_EPOCH + Duration::seconds(offset_secs),
        )
    }

    #[tokio::test]
    async fn test_most_recent_by_capture_time() {
        let store = MemoryStore::new();
        store.append(reading("garage", 300, 20.0)).await.unwrap();
        store.append(reading("garage", 100, 19.0)).await.unwrap();
        store.append(reading("porch", 900, 5.0)).await.unwrap();

        let latest = store.most_recent(Some("garage")).await.unwrap().unwrap();
        assert_eq!(latest.temperature, Some(20.0));

        let any = store.most_recent(None).await.unwrap().unwrap();
        assert_eq!(any.device_name, "porch");

        assert!(store.most_recent(Some("attic")).await.unwrap().is_none());
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn test_ties_prefer_latest_insert() {
        let store = MemoryStore::new();
        store.append(reading("garage", 60, 1.0)).await.unwrap();
        store.append(reading("garage", 60, 2.0)).await.unwrap();
        let latest = store.most_recent(Some("garage")).await.unwrap().unwrap();
        assert_eq!(latest.temperature, Some(2.0));
    }

    #[tokio::test]
    async fn test_failing_store() {
        let store = MemoryStore::new();
        store.set_failing(true);
        assert!(matches!(
            store.append(reading("garage", 0, 1.0)).await,
            Err(Error::Store(_))
        ));
        assert!(store.most_recent(None).await.is_err());
        assert!(store.is_empty());
    }
}
