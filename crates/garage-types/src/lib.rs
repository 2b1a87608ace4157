//! Platform-agnostic types for the garage climate monitor.
//!
//! This crate holds the data shared by the acquisition layer
//! (garage-core), persistence (garage-store) and the daemon
//! (garage-service):
//!
//! - H5075 measurement decoding and derived quantities
//! - The persisted [`Reading`] record and its online/offline status
//! - Smart-plug and weather records returned by cloud services
//! - UUID constants for the H5075 GATT characteristics
//!
//! # Example
//!
//! ```
//! use garage_types::{ByteOrder, Measurement};
//!
//! let m = Measurement::from_bytes(&[0x08, 0x66, 0x11, 0x30], ByteOrder::BigEndian).unwrap();
//! assert_eq!(m.temperature, 21.5);
//! assert_eq!(m.derived().dew_point, 8.7);
//! ```

pub mod cloud;
pub mod error;
pub mod measurement;
pub mod reading;
pub mod uuid;

pub use cloud::{DeviceDescriptor, PlugState, WeatherSnapshot};
pub use error::{ParseError, ParseResult};
pub use measurement::{ByteOrder, DerivedQuantities, Measurement, Offsets, celsius_to_fahrenheit};
pub use reading::{Reading, ReadingStatus};
pub use uuid as uuids;
