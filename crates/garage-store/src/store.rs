//! Main store implementation.

use std::path::Path;

use rusqlite::Connection;
use time::OffsetDateTime;
use tracing::{debug, info};

use garage_types::{Reading, ReadingStatus};

use crate::error::{Error, Result};
use crate::models::StoredReading;
use crate::queries::ReadingQuery;
use crate::schema;

/// SQLite-based, append-only store for readings.
pub struct Store {
    conn: Connection,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.conn.path())
            .finish()
    }
}

pub(crate) fn to_nanos(time: OffsetDateTime) -> i64 {
    i64::try_from(time.unix_timestamp_nanos()).unwrap_or(i64::MAX)
}

fn from_nanos(nanos: i64) -> Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(nanos))
        .map_err(|e| Error::InvalidTimestamp(format!("{nanos}: {e}")))
}

/// One `readings` row before validation.
struct Row {
    id: i64,
    device_name: String,
    captured_at: i64,
    temperature: Option<f64>,
    humidity: Option<f64>,
    battery: i64,
    status: String,
}

impl Row {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            device_name: row.get(1)?,
            captured_at: row.get(2)?,
            temperature: row.get(3)?,
            humidity: row.get(4)?,
            battery: row.get(5)?,
            status: row.get(6)?,
        })
    }

    fn into_stored(self) -> Result<StoredReading> {
        let status: ReadingStatus = self
            .status
            .parse()
            .map_err(|e| Error::InvalidData(format!("row {}: {}", self.id, e)))?;
        let battery = u8::try_from(self.battery).map_err(|_| {
            Error::InvalidData(format!("row {}: battery {}", self.id, self.battery))
        })?;

        Ok(StoredReading::new(
            self.id,
            Reading {
                device_name: self.device_name,
                temperature: self.temperature,
                humidity: self.humidity,
                battery,
                status,
                captured_at: from_nanos(self.captured_at)?,
            },
        ))
    }
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        info!("Opening database at {}", path.display());
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        schema::initialize(&conn)?;

        Ok(Self { conn })
    }

    /// Open the default database location.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::default_db_path())
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }
}

// Reading operations
impl Store {
    /// Append a reading. Derived columns are computed here from temperature
    /// and humidity.
    pub fn insert_reading(&self, reading: &Reading) -> Result<i64> {
        let derived = reading.derived();

        self.conn.execute(
            "INSERT INTO readings (device_name, captured_at, temperature, humidity,
             battery, status, dew_point, abs_humidity, steam_pressure)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                reading.device_name,
                to_nanos(reading.captured_at),
                reading.temperature,
                reading.humidity,
                reading.battery,
                reading.status.as_str(),
                derived.map(|d| d.dew_point),
                derived.map(|d| d.abs_humidity),
                derived.map(|d| d.steam_pressure),
            ],
        )?;

        let id = self.conn.last_insert_rowid();
        debug!("Stored {} reading {} for {}", reading.status, id, reading.device_name);
        Ok(id)
    }

    /// Query readings with filters.
    pub fn query_readings(&self, query: &ReadingQuery) -> Result<Vec<StoredReading>> {
        let sql = query.build_sql();
        let (_, params) = query.build_where();

        debug!("Executing query: {}", sql);

        let params_ref: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_ref.as_slice(), Row::read)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter().map(Row::into_stored).collect()
    }

    /// The most recent reading, optionally for one device.
    pub fn latest_reading(&self, device_name: Option<&str>) -> Result<Option<StoredReading>> {
        let mut query = ReadingQuery::new().limit(1);
        if let Some(name) = device_name {
            query = query.device(name);
        }
        Ok(self.query_readings(&query)?.pop())
    }

    /// Count readings, optionally for one device.
    pub fn count_readings(&self, device_name: Option<&str>) -> Result<u64> {
        let count: i64 = match device_name {
            Some(name) => self.conn.query_row(
                "SELECT COUNT(*) FROM readings WHERE device_name = ?",
                [name],
                |row| row.get(0),
            )?,
            None => self
                .conn
                .query_row("SELECT COUNT(*) FROM readings", [], |row| row.get(0))?,
        };

        Ok(count as u64)
    }

    /// Names of every device with at least one reading.
    pub fn device_names(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT device_name FROM readings ORDER BY device_name")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(names)
    }
}
