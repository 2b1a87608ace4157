//! Temperature/humidity measurements and the quantities derived from them.

use bytes::Buf;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{ParseError, ParseResult};

/// Relative humidity floor used when computing the dew point.
///
/// The dew point takes the logarithm of the vapour pressure, which is
/// undefined at 0 %RH. Readings at or below this value are evaluated as if
/// they were exactly this value.
pub const DEW_POINT_MIN_HUMIDITY: f64 = 0.1;

/// Byte order of a 4-byte measurement payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Answer to the measurement-and-battery request on the command characteristic.
    BigEndian,
    /// Answer to the plain measurement request on the device characteristic.
    LittleEndian,
}

/// Calibration offsets added to every decoded measurement.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Offsets {
    /// Added to the temperature, in °C.
    pub temperature: f64,
    /// Added to the relative humidity, in percentage points.
    pub humidity: f64,
}

impl Offsets {
    /// Returns true when neither offset changes the measurement.
    pub fn is_zero(&self) -> bool {
        self.temperature == 0.0 && self.humidity == 0.0
    }
}

/// A single temperature/humidity sample.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Measurement {
    /// Temperature in °C.
    pub temperature: f64,
    /// Relative humidity in percent.
    pub humidity: f64,
}

impl Measurement {
    pub fn new(temperature: f64, humidity: f64) -> Self {
        Self {
            temperature,
            humidity,
        }
    }

    /// Decode a measurement payload.
    ///
    /// Two encodings exist:
    ///
    /// - 4 bytes: two signed 16-bit integers (temperature, humidity) in
    ///   hundredths, in the given byte order.
    /// - 3 bytes: a packed big-endian 24-bit value where bit 23 is the
    ///   temperature sign, `raw / 1000` is tenths of °C and `raw % 1000` is
    ///   tenths of %RH. `order` is ignored for this encoding.
    #[must_use = "parsing returns a Result that should be handled"]
    pub fn from_bytes(data: &[u8], order: ByteOrder) -> ParseResult<Self> {
        match data.len() {
            4 => Ok(Self::from_words(data, order)),
            3 => Ok(Self::from_packed(data)),
            n => Err(ParseError::UnsupportedLength(n)),
        }
    }

    fn from_words(mut buf: &[u8], order: ByteOrder) -> Self {
        let (temp_raw, hum_raw) = match order {
            ByteOrder::BigEndian => (buf.get_i16(), buf.get_i16()),
            ByteOrder::LittleEndian => (buf.get_i16_le(), buf.get_i16_le()),
        };
        Self::new(f64::from(temp_raw) / 100.0, f64::from(hum_raw) / 100.0)
    }

    fn from_packed(mut buf: &[u8]) -> Self {
        let mut raw = buf.get_uint(3) as u32;
        let negative = raw & 0x80_0000 != 0;
        if negative {
            raw ^= 0x80_0000;
        }

        let mut temperature = f64::from(raw / 1000) / 10.0;
        if negative {
            temperature = -temperature;
        }
        let humidity = f64::from(raw % 1000) / 10.0;

        Self::new(temperature, humidity)
    }

    /// Apply calibration offsets.
    #[must_use]
    pub fn with_offsets(self, offsets: Offsets) -> Self {
        Self::new(
            self.temperature + offsets.temperature,
            self.humidity + offsets.humidity,
        )
    }

    /// Temperature in °F.
    pub fn temperature_f(&self) -> f64 {
        celsius_to_fahrenheit(self.temperature)
    }

    /// Dew point, absolute humidity and vapour pressure for this sample.
    pub fn derived(&self) -> DerivedQuantities {
        DerivedQuantities::compute(self.temperature, self.humidity)
    }
}

/// Quantities computed from a temperature/humidity pair.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DerivedQuantities {
    /// Dew point in °C, truncated to one decimal.
    pub dew_point: f64,
    /// Absolute humidity in g/m³, rounded to one decimal.
    pub abs_humidity: f64,
    /// Water vapour partial pressure in hPa, truncated to one decimal.
    pub steam_pressure: f64,
}

impl DerivedQuantities {
    /// Magnus-type approximation used by the H5075 companion app.
    ///
    /// Valid for temperatures above -235 °C; the sensor range is far inside that.
    pub fn compute(temperature: f64, humidity: f64) -> Self {
        let es = saturation_pressure(temperature);
        let e = es * humidity / 100.0;

        let abs_humidity = ((216.7 * e) / (273.15 + temperature) * 10.0).round_ties_even() / 10.0;
        let steam_pressure = (e * 10.0).trunc() / 10.0;

        let e_dew = es * humidity.max(DEW_POINT_MIN_HUMIDITY) / 100.0;
        let z3 = 0.434292289 * (e_dew / 6.1).ln();
        let dew_point = ((235.0 * z3) / (7.45 - z3) * 10.0).trunc() / 10.0;

        Self {
            dew_point,
            abs_humidity,
            steam_pressure,
        }
    }

    /// Dew point in °F.
    pub fn dew_point_f(&self) -> f64 {
        celsius_to_fahrenheit(self.dew_point)
    }
}

fn saturation_pressure(temperature: f64) -> f64 {
    let z1 = (7.45 * temperature) / (235.0 + temperature);
    6.1 * (z1 * 2.3025851).exp()
}

/// Convert °C to °F.
pub fn celsius_to_fahrenheit(celsius: f64) -> f64 {
    celsius * 9.0 / 5.0 + 32.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_decode_big_endian_words() {
        // 21.50 °C (0x0866), 44.00 % (0x1130)
        let m = Measurement::from_bytes(&[0x08, 0x66, 0x11, 0x30], ByteOrder::BigEndian).unwrap();
        assert!(close(m.temperature, 21.5));
        assert!(close(m.humidity, 44.0));
    }

    #[test]
    fn test_decode_little_endian_words() {
        let m =
            Measurement::from_bytes(&[0x66, 0x08, 0x30, 0x11], ByteOrder::LittleEndian).unwrap();
        assert!(close(m.temperature, 21.5));
        assert!(close(m.humidity, 44.0));
    }

    #[test]
    fn test_decode_negative_word_temperature() {
        // -5.00 °C = 0xFE0C
        let m = Measurement::from_bytes(&[0xFE, 0x0C, 0x1F, 0x40], ByteOrder::BigEndian).unwrap();
        assert!(close(m.temperature, -5.0));
        assert!(close(m.humidity, 80.0));
    }

    #[test]
    fn test_decode_packed_positive() {
        // raw = 215440 -> 21.5 °C, 44.0 %
        let raw: u32 = 215_440;
        let bytes = [(raw >> 16) as u8, (raw >> 8) as u8, raw as u8];
        let m = Measurement::from_bytes(&bytes, ByteOrder::BigEndian).unwrap();
        assert!(close(m.temperature, 21.5));
        assert!(close(m.humidity, 44.0));
    }

    #[test]
    fn test_decode_packed_negative() {
        // sign bit set, raw = 52800 -> -5.2 °C, 80.0 %
        let raw: u32 = 0x80_0000 | 52_800;
        let bytes = [(raw >> 16) as u8, (raw >> 8) as u8, raw as u8];
        let m = Measurement::from_bytes(&bytes, ByteOrder::LittleEndian).unwrap();
        assert!(close(m.temperature, -5.2));
        assert!(close(m.humidity, 80.0));
    }

    #[test]
    fn test_decode_unsupported_length() {
        let err = Measurement::from_bytes(&[0x01, 0x02], ByteOrder::BigEndian).unwrap_err();
        assert_eq!(err, ParseError::UnsupportedLength(2));
        assert!(Measurement::from_bytes(&[0; 5], ByteOrder::BigEndian).is_err());
    }

    #[test]
    fn test_offsets_are_added() {
        let m = Measurement::new(20.0, 50.0).with_offsets(Offsets {
            temperature: -0.5,
            humidity: 2.0,
        });
        assert!(close(m.temperature, 19.5));
        assert!(close(m.humidity, 52.0));
        assert!(Offsets::default().is_zero());
    }

    #[test]
    fn test_derived_known_values() {
        let d = DerivedQuantities::compute(21.5, 44.0);
        assert!(close(d.dew_point, 8.7));
        assert!(close(d.abs_humidity, 8.3));
        assert!(close(d.steam_pressure, 11.3));

        let d = DerivedQuantities::compute(25.0, 50.0);
        assert!(close(d.dew_point, 13.8));
        assert!(close(d.abs_humidity, 11.5));
        assert!(close(d.steam_pressure, 15.8));

        let d = DerivedQuantities::compute(-5.0, 80.0);
        assert!(close(d.dew_point, -7.8));
        assert!(close(d.abs_humidity, 2.7));
        assert!(close(d.steam_pressure, 3.3));
    }

    #[test]
    fn test_derived_saturated_at_freezing() {
        let d = DerivedQuantities::compute(0.0, 100.0);
        assert!(close(d.dew_point, 0.0));
        assert!(close(d.abs_humidity, 4.8));
        assert!(close(d.steam_pressure, 6.1));
    }

    #[test]
    fn test_derived_zero_humidity_is_finite() {
        let d = DerivedQuantities::compute(20.0, 0.0);
        assert!(d.dew_point.is_finite());
        assert!(close(d.abs_humidity, 0.0));
        assert!(close(d.steam_pressure, 0.0));
    }

    #[test]
    fn test_fahrenheit_conversion() {
        assert!(close(celsius_to_fahrenheit(0.0), 32.0));
        assert!(close(celsius_to_fahrenheit(100.0), 212.0));
        assert!(close(Measurement::new(-40.0, 10.0).temperature_f(), -40.0));
    }

    proptest! {
        #[test]
        fn derived_is_finite_in_sensor_range(t in -40.0f64..80.0, rh in 0.0f64..100.0) {
            let d = DerivedQuantities::compute(t, rh);
            prop_assert!(d.dew_point.is_finite());
            prop_assert!(d.abs_humidity.is_finite());
            prop_assert!(d.steam_pressure.is_finite());
            prop_assert!(d.abs_humidity >= 0.0);
            prop_assert!(d.steam_pressure >= 0.0);
        }

        #[test]
        fn dew_point_never_exceeds_temperature(t in -20.0f64..60.0, rh in 1.0f64..100.0) {
            let d = DerivedQuantities::compute(t, rh);
            prop_assert!(d.dew_point <= t + 0.2);
        }

        #[test]
        fn any_word_payload_decodes(bytes in proptest::array::uniform4(any::<u8>())) {
            prop_assert!(Measurement::from_bytes(&bytes, ByteOrder::BigEndian).is_ok());
            prop_assert!(Measurement::from_bytes(&bytes, ByteOrder::LittleEndian).is_ok());
        }
    }
}
