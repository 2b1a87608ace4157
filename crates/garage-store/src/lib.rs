//! Local persistence for garage sensor readings.
//!
//! Readings are appended to a SQLite table and never updated. Each row holds
//! the raw temperature and humidity plus the dew point, absolute humidity and
//! vapour pressure computed from them at insert time.
//!
//! # Example
//!
//! ```no_run
//! use garage_store::{Store, ReadingQuery};
//!
//! let store = Store::open_default()?;
//!
//! let query = ReadingQuery::new()
//!     .device("Govee_H5075_4F47")
//!     .limit(10);
//! let readings = store.query_readings(&query)?;
//! # Ok::<(), garage_store::Error>(())
//! ```

mod error;
mod models;
mod queries;
mod schema;
mod store;

pub use error::{Error, Result};
pub use models::StoredReading;
pub use queries::ReadingQuery;
pub use schema::SCHEMA_VERSION;
pub use store::Store;

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/garage/readings.db`
/// - macOS: `~/Library/Application Support/garage/readings.db`
/// - Windows: `C:\Users\<user>\AppData\Local\garage\readings.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("garage")
        .join("readings.db")
}
