use uuid::Uuid;

/// Standard client-characteristic-configuration descriptor (`0x2902`).
pub const CLIENT_CHARACTERISTIC_CONFIGURATION: Uuid = bluetooth_base_uuid(0x2902);

/// Descriptor value enabling notifications.
pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];

/// Descriptor value enabling indications.
pub const ENABLE_INDICATION_VALUE: [u8; 2] = [0x02, 0x00];

/// Descriptor value disabling both notifications and indications.
pub const DISABLE_NOTIFICATION_VALUE: [u8; 2] = [0x00, 0x00];

/// GATT status codes reported by connection and attribute callbacks.
pub mod status {
    pub const GATT_SUCCESS: i32 = 0;
    /// Supervision timeout; the peripheral walked out of range.
    pub const CONN_OUT_OF_RANGE: i32 = 8;
    pub const CONN_TERMINATE_LOCAL_HOST: i32 = 22;
    /// Generic stack error, most often a connect timeout or an unknown address.
    pub const CONN_TIMEOUT_OR_NOT_FOUND: i32 = 133;
    pub const GATT_FAILURE: i32 = 257;
}

/// Scan start error codes reported by the scan-failure callback.
pub mod scan_error {
    pub const ALREADY_STARTED: i32 = 1;
    pub const APPLICATION_REGISTRATION_FAILED: i32 = 2;
    pub const INTERNAL_ERROR: i32 = 3;
    pub const FEATURE_UNSUPPORTED: i32 = 4;
    pub const OUT_OF_HARDWARE_RESOURCES: i32 = 5;
    pub const SCANNING_TOO_FREQUENTLY: i32 = 6;
}

/// Expands a 16-bit assigned number onto the Bluetooth base UUID.
#[must_use]
pub const fn bluetooth_base_uuid(short: u16) -> Uuid {
    const BASE: u128 = 0x0000_0000_0000_1000_8000_0080_5f9b_34fb;
    Uuid::from_u128(BASE | ((short as u128) << 96))
}
