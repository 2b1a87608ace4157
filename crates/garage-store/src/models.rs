//! Data models for stored data.

use serde::{Deserialize, Serialize};

use garage_types::{DerivedQuantities, Reading};

/// A reading stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredReading {
    /// Database row ID.
    pub id: i64,
    #[serde(flatten)]
    pub reading: Reading,
}

impl StoredReading {
    pub fn new(id: i64, reading: Reading) -> Self {
        Self { id, reading }
    }

    /// Dew point, absolute humidity and vapour pressure, recomputed from the
    /// stored temperature and humidity.
    pub fn derived(&self) -> Option<DerivedQuantities> {
        self.reading.derived()
    }

    pub fn into_reading(self) -> Reading {
        self.reading
    }
}

impl From<StoredReading> for Reading {
    fn from(stored: StoredReading) -> Self {
        stored.reading
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use garage_types::{Measurement, ReadingStatus};
    use time::OffsetDateTime;

    #[test]
    fn test_json_is_flat() {
        let reading = Reading::online(
            "garage",
            Measurement::new(21.5, 44.0),
            80,
            OffsetDateTime::from_unix_timestamp(1_717_243_200).unwrap(),
        );
        let stored = StoredReading::new(7, reading);

        let json = serde_json::to_value(&stored).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["device_name"], "garage");
        assert_eq!(json["status"], "online");

        let back: StoredReading = serde_json::from_value(json).unwrap();
        assert_eq!(back, stored);
        assert_eq!(back.derived().unwrap().dew_point, 8.7);
        assert_eq!(Reading::from(back).status, ReadingStatus::Online);
    }
}
