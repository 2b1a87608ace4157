//! BLE command frames and notifications for the Govee H5075.
//!
//! Every request is a 20-byte frame: the two command bytes, optional
//! parameters, zero padding up to 19 bytes and a trailing XOR checksum over
//! the first 19 bytes. Answers arrive as notifications that echo the two
//! command bytes.

use bytes::Buf;
use garage_types::{ByteOrder, Measurement, ParseError, ParseResult};

/// Length of a request frame, checksum included.
pub const FRAME_LEN: usize = 20;

/// Request current measurement and battery level.
/// Written to the command characteristic; answered on the same characteristic
/// with `[aa 01, temp_hi, temp_lo, hum_hi, hum_lo, battery]`.
pub const REQUEST_MEASUREMENT_AND_BATTERY: [u8; 2] = [0xaa, 0x01];

/// Request current measurement (little-endian answer on the device characteristic).
pub const REQUEST_MEASUREMENT: [u8; 2] = [0xaa, 0x0a];

/// Request battery level.
pub const REQUEST_BATTERY: [u8; 2] = [0xaa, 0x08];

/// Build a request frame for `command` with optional parameters.
///
/// Frames whose payload already fills 20 bytes are sent as-is, without a
/// checksum.
pub fn frame(command: [u8; 2], params: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(FRAME_LEN);
    out.extend_from_slice(&command);
    out.extend_from_slice(params);

    if out.len() < FRAME_LEN {
        out.resize(FRAME_LEN - 1, 0);
        let checksum = out.iter().fold(0u8, |acc, b| acc ^ b);
        out.push(checksum);
    }

    out
}

/// A decoded notification from the sensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Notification {
    /// Answer to [`REQUEST_MEASUREMENT_AND_BATTERY`].
    MeasurementAndBattery {
        measurement: Measurement,
        battery: u8,
    },
    /// Answer to [`REQUEST_MEASUREMENT`].
    Measurement(Measurement),
    /// Answer to [`REQUEST_BATTERY`].
    Battery(u8),
}

impl Notification {
    /// Decode a notification payload.
    #[must_use = "parsing returns a Result that should be handled"]
    pub fn parse(data: &[u8]) -> ParseResult<Self> {
        if data.len() < 2 {
            return Err(ParseError::InsufficientBytes {
                format: "notification",
                expected: 2,
                actual: data.len(),
            });
        }

        let header = [data[0], data[1]];
        let body = &data[2..];

        match header {
            REQUEST_MEASUREMENT_AND_BATTERY => {
                require("measurement and battery", data, 7)?;
                let measurement = Measurement::from_bytes(&body[..4], ByteOrder::BigEndian)?;
                let mut rest = &body[4..];
                Ok(Notification::MeasurementAndBattery {
                    measurement,
                    battery: rest.get_u8(),
                })
            }
            REQUEST_MEASUREMENT => {
                require("measurement", data, 6)?;
                Ok(Notification::Measurement(Measurement::from_bytes(
                    &body[..4],
                    ByteOrder::LittleEndian,
                )?))
            }
            REQUEST_BATTERY => {
                require("battery", data, 3)?;
                Ok(Notification::Battery(body[0]))
            }
            [a, b] => Err(ParseError::UnknownHeader(a, b)),
        }
    }
}

fn require(format: &'static str, data: &[u8], expected: usize) -> ParseResult<()> {
    if data.len() < expected {
        return Err(ParseError::InsufficientBytes {
            format,
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}
