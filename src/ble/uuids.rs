//! BLE Service and Characteristic UUIDs.
//!
//! The probe uses 16-bit identifiers over the Bluetooth base UUID for both
//! its standard and its custom services.

use uuid::Uuid;

use crate::data::FragmentKind;

/// Bluetooth base UUID (`00000000-0000-1000-8000-00805f9b34fb`).
pub const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_00805f9b34fb;

/// Expand a 16-bit assigned number into a full UUID.
pub const fn uuid_from_u16(short: u16) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | ((short as u128) << 96))
}

/// Recover the 16-bit form of a UUID built on the Bluetooth base UUID.
pub fn uuid_to_u16(uuid: &Uuid) -> Option<u16> {
    let value = uuid.as_u128();
    let short = (value >> 96) as u32;
    if value & !(0xFFFF_FFFFu128 << 96) != BLUETOOTH_BASE_UUID || short > 0xFFFF {
        return None;
    }
    Some(short as u16)
}

// Standard services
/// Standard BLE Device Information Service UUID.
pub const DEVICE_INFO_SERVICE_UUID: Uuid = uuid_from_u16(0x180A);
/// Standard BLE Battery Service UUID.
pub const BATTERY_SERVICE_UUID: Uuid = uuid_from_u16(0x180F);

// Measurement sync service (BRIC custom)
/// Measurement sync service UUID.
pub const MEASUREMENT_SYNC_SERVICE_UUID: Uuid = uuid_from_u16(0x58D0);
/// Primary measurement characteristic UUID (Indicate).
pub const MEASUREMENT_PRIMARY_UUID: Uuid = uuid_from_u16(0x58D1);
/// Measurement metadata characteristic UUID (Indicate).
pub const MEASUREMENT_METADATA_UUID: Uuid = uuid_from_u16(0x58D2);
/// Measurement errors characteristic UUID (Indicate).
pub const MEASUREMENT_ERRORS_UUID: Uuid = uuid_from_u16(0x58D3);
/// Last time characteristic UUID (Read, Write).
pub const LAST_TIME_UUID: Uuid = uuid_from_u16(0x58D4);

// Device control service (BRIC custom)
/// Device control service UUID.
pub const DEVICE_CONTROL_SERVICE_UUID: Uuid = uuid_from_u16(0x58E0);
/// Device control characteristic UUID (Read, Write; ASCII command).
pub const DEVICE_CONTROL_UUID: Uuid = uuid_from_u16(0x58E1);

// Descriptors
/// Client Characteristic Configuration Descriptor UUID.
pub const CCCD_UUID: Uuid = uuid_from_u16(0x2902);
/// CCCD value enabling indications (0x0002, little-endian).
pub const ENABLE_INDICATION_VALUE: [u8; 2] = [0x02, 0x00];

/// Role of a discovered service from this client's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    /// Streams measurements and accepts the last-time write.
    MeasurementSync,
    /// Accepts ASCII control commands.
    DeviceControl,
    /// Standard battery service; recognized but unused.
    Battery,
    /// Standard device information service; recognized but unused.
    DeviceInfo,
    /// Anything else.
    Unknown,
}

impl ServiceKind {
    /// Classify a service UUID.
    pub fn classify(uuid: &Uuid) -> Self {
        match *uuid {
            MEASUREMENT_SYNC_SERVICE_UUID => Self::MeasurementSync,
            DEVICE_CONTROL_SERVICE_UUID => Self::DeviceControl,
            BATTERY_SERVICE_UUID => Self::Battery,
            DEVICE_INFO_SERVICE_UUID => Self::DeviceInfo,
            _ => Self::Unknown,
        }
    }
}

/// Characteristic UUID carrying the given measurement fragment.
pub fn fragment_characteristic(kind: FragmentKind) -> Uuid {
    match kind {
        FragmentKind::Primary => MEASUREMENT_PRIMARY_UUID,
        FragmentKind::Metadata => MEASUREMENT_METADATA_UUID,
        FragmentKind::Errors => MEASUREMENT_ERRORS_UUID,
    }
}

/// Measurement fragment carried by a characteristic, if any.
pub fn fragment_kind(characteristic: &Uuid) -> Option<FragmentKind> {
    match *characteristic {
        MEASUREMENT_PRIMARY_UUID => Some(FragmentKind::Primary),
        MEASUREMENT_METADATA_UUID => Some(FragmentKind::Metadata),
        MEASUREMENT_ERRORS_UUID => Some(FragmentKind::Errors),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_format() {
        assert_eq!(
            MEASUREMENT_SYNC_SERVICE_UUID.to_string(),
            "000058d0-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            CCCD_UUID.to_string(),
            "00002902-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_uuid_to_u16() {
        assert_eq!(uuid_to_u16(&DEVICE_CONTROL_UUID), Some(0x58E1));
        assert_eq!(uuid_to_u16(&BATTERY_SERVICE_UUID), Some(0x180F));
        assert_eq!(uuid_to_u16(&Uuid::from_u128(0x1234)), None);
        assert_eq!(uuid_to_u16(&uuid_from_u16(0xFFFF)), Some(0xFFFF));
    }

    #[test]
    fn test_classify_service() {
        assert_eq!(
            ServiceKind::classify(&MEASUREMENT_SYNC_SERVICE_UUID),
            ServiceKind::MeasurementSync
        );
        assert_eq!(
            ServiceKind::classify(&DEVICE_CONTROL_SERVICE_UUID),
            ServiceKind::DeviceControl
        );
        assert_eq!(
            ServiceKind::classify(&BATTERY_SERVICE_UUID),
            ServiceKind::Battery
        );
        assert_eq!(
            ServiceKind::classify(&uuid_from_u16(0x1800)),
            ServiceKind::Unknown
        );
    }

    #[test]
    fn test_fragment_mapping() {
        for kind in FragmentKind::ALL {
            assert_eq!(fragment_kind(&fragment_characteristic(kind)), Some(kind));
        }
        assert_eq!(fragment_kind(&LAST_TIME_UUID), None);
    }
}
