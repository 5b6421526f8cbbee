//! GATT identifiers and wire constants of the throughput service

/// 128-bit UUID in its numeric form
pub type Uuid = u128;

/// Throughput test service
pub const SERVICE: Uuid = 0xbbb99e70_fff7_46cf_abc7_2d32c71820f2;
/// Characteristic carrying test data as indications
pub const INDICATIONS: Uuid = 0x6109b631_a643_4a51_83d2_2059700ad49f;
/// Characteristic carrying test data as notifications
pub const NOTIFICATIONS: Uuid = 0x47b73dd6_dee3_4da1_9be0_f5c539a9a4be;
/// Characteristic used to start and stop a transmission
pub const TRANSMISSION_ON: Uuid = 0xbe6b6be1_cd8a_4106_9181_5ffe2bc67718;
/// Characteristic carrying the transmitter's measured throughput
pub const RESULT: Uuid = 0xadf32227_b00f_400c_9eeb_b903a6cc291b;

/// Transmission control value requesting the transmitter to stop
pub const TRANSMISSION_OFF: u8 = 0;
/// Transmission control value announcing a running transmission
pub const TRANSMISSION_STARTED: u8 = 1;

/// Client characteristic configuration: updates disabled
pub const CCCD_DISABLE: u8 = 0;
/// Client characteristic configuration: notifications enabled
pub const CCCD_NOTIFICATION: u8 = 1;
/// Client characteristic configuration: indications enabled
pub const CCCD_INDICATION: u8 = 2;

/// Advertising data type of the complete local name record
pub const AD_COMPLETE_LOCAL_NAME: u8 = 0x09;

/// Name the peripheral advertises and the central looks for
pub const DEVICE_NAME: &str = "Throughput Test";

/// Minimum connection event length handed to the stack
pub const CE_LENGTH_MIN: u16 = 0;
/// Maximum connection event length handed to the stack
pub const CE_LENGTH_MAX: u16 = 0x7fff;

/// Lowest TX power requested from the stack, in 0.1 dBm
pub const TX_POWER_MIN: i16 = -100;

/// Whether an advertising payload carries a complete local name starting with `name`
///
/// Walks the length-type-value records and stops at the first malformed one.
pub fn advertises_name(data: &[u8], name: &[u8]) -> bool {
    let mut rest = data;
    while let [len, ty, tail @ ..] = rest {
        let len = usize::from(*len);
        if len == 0 {
            return false;
        }
        let value = &tail[..tail.len().min(len - 1)];
        if *ty == AD_COMPLETE_LOCAL_NAME && value.starts_with(name) {
            return true;
        }
        rest = tail.get(len - 1..).unwrap_or_default();
    }
    false
}

/// Build advertising data carrying flags and the complete local name
pub fn advertising_data(name: &str) -> Vec<u8> {
    let name = &name.as_bytes()[..name.len().min(29 - 3)];
    let mut data = vec![2, 0x01, 0x06, name.len() as u8 + 1, AD_COMPLETE_LOCAL_NAME];
    data.extend_from_slice(name);
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_match() {
        let data = advertising_data(DEVICE_NAME);
        assert!(advertises_name(&data, DEVICE_NAME.as_bytes()));
        assert!(!advertises_name(&data, b"Other"));
    }

    #[test]
    fn name_prefix() {
        let data = advertising_data("Throughput Test 42");
        assert!(advertises_name(&data, DEVICE_NAME.as_bytes()));
    }

    #[test]
    fn shortened_name_ignored() {
        let mut data = vec![16, 0x08];
        data.extend_from_slice(DEVICE_NAME.as_bytes());
        assert!(!advertises_name(&data, DEVICE_NAME.as_bytes()));
    }

    #[test]
    fn malformed_records() {
        assert!(!advertises_name(&[], b"x"));
        assert!(!advertises_name(&[0, 0x09, b'x'], b"x"));
        assert!(!advertises_name(&[40, 0x09, b'T'], b"Throughput"));
        assert!(advertises_name(&[40, 0x09, b'T'], b"T"));
    }
}
