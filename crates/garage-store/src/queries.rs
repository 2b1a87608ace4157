//! Query builder for stored readings.
//!
//! # Example
//!
//! ```
//! use garage_store::{Store, ReadingQuery};
//! use garage_types::ReadingStatus;
//! use time::{OffsetDateTime, Duration};
//!
//! let store = Store::open_in_memory()?;
//! let yesterday = OffsetDateTime::now_utc() - Duration::hours(24);
//!
//! // Offline markers of the last day, newest first
//! let query = ReadingQuery::new()
//!     .device("Govee_H5075_4F47")
//!     .status(ReadingStatus::Offline)
//!     .since(yesterday)
//!     .limit(50);
//!
//! let readings = store.query_readings(&query)?;
//! # Ok::<(), garage_store::Error>(())
//! ```

use garage_types::ReadingStatus;
use time::OffsetDateTime;

/// Fluent query builder for readings.
///
/// By default, queries return results ordered by `captured_at` descending
/// (newest first); readings captured at the same instant come back in
/// reverse insertion order.
#[derive(Debug, Default, Clone)]
pub struct ReadingQuery {
    pub device_name: Option<String>,
    pub status: Option<ReadingStatus>,
    /// Include only readings captured at or after this time.
    pub since: Option<OffsetDateTime>,
    /// Include only readings captured at or before this time.
    pub until: Option<OffsetDateTime>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub newest_first: bool,
}

impl ReadingQuery {
    /// All readings, newest first.
    pub fn new() -> Self {
        Self {
            newest_first: true,
            ..Default::default()
        }
    }

    pub fn device(mut self, device_name: &str) -> Self {
        self.device_name = Some(device_name.to_string());
        self
    }

    pub fn status(mut self, status: ReadingStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn since(mut self, time: OffsetDateTime) -> Self {
        self.since = Some(time);
        self
    }

    pub fn until(mut self, time: OffsetDateTime) -> Self {
        self.until = Some(time);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip the first N results. Without a limit this is ignored.
    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Chronological order.
    pub fn oldest_first(mut self) -> Self {
        self.newest_first = false;
        self
    }

    /// Build the SQL WHERE clause and parameters.
    pub(crate) fn build_where(&self) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref device_name) = self.device_name {
            conditions.push("device_name = ?");
            params.push(Box::new(device_name.clone()));
        }

        if let Some(status) = self.status {
            conditions.push("status = ?");
            params.push(Box::new(status.as_str()));
        }

        if let Some(since) = self.since {
            conditions.push("captured_at >= ?");
            params.push(Box::new(crate::store::to_nanos(since)));
        }

        if let Some(until) = self.until {
            conditions.push("captured_at <= ?");
            params.push(Box::new(crate::store::to_nanos(until)));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    /// Build the full SQL query.
    pub(crate) fn build_sql(&self) -> String {
        let (where_clause, _) = self.build_where();
        let order = if self.newest_first { "DESC" } else { "ASC" };

        let mut sql = format!(
            "SELECT id, device_name, captured_at, temperature, humidity, battery, status \
             FROM readings {} ORDER BY captured_at {}, id {}",
            where_clause, order, order
        );

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
            if let Some(offset) = self.offset {
                sql.push_str(&format!(" OFFSET {}", offset));
            }
        }

        sql
    }
}
