//! Bluetooth UUIDs for the Govee H5075 thermometer/hygrometer.
//!
//! All three vendor characteristics share the `494e5445-4c4c-495f-524f-434b535f20xx`
//! base and differ only in the last byte.

use uuid::{Uuid, uuid};

/// Address prefix shared by every H5075 unit.
pub const MAC_PREFIX: &str = "A4:C1:38:";

// --- Standard characteristics ---

/// GAP device name characteristic.
pub const DEVICE_NAME: Uuid = uuid!("00002a00-0000-1000-8000-00805f9b34fb");

// --- Vendor characteristics ---

/// Device characteristic. Accepts configuration requests (battery level,
/// offsets, alarms) and notifies their answers.
pub const DEVICE: Uuid = uuid!("494e5445-4c4c-495f-524f-434b535f2011");

/// Command characteristic. The combined measurement-and-battery request is
/// written here and answered by a notification on the same characteristic.
pub const COMMAND: Uuid = uuid!("494e5445-4c4c-495f-524f-434b535f2012");

/// Data characteristic used for bulk history transfer.
pub const DATA: Uuid = uuid!("494e5445-4c4c-495f-524f-434b535f2013");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vendor_characteristics_share_base() {
        let device = DEVICE.to_string();
        let command = COMMAND.to_string();
        let data = DATA.to_string();
        assert_eq!(&device[..34], &command[..34]);
        assert_eq!(&command[..34], &data[..34]);
        assert!(device.ends_with("2011"));
        assert!(command.ends_with("2012"));
        assert!(data.ends_with("2013"));
    }

    #[test]
    fn device_name_is_standard_gap_uuid() {
        assert_eq!(
            DEVICE_NAME.to_string(),
            "00002a00-0000-1000-8000-00805f9b34fb"
        );
    }
}
