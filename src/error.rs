//! Error types for the bric5-ble crate.

use thiserror::Error;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// Device discovery could not be started or failed at the transport level.
    #[error("Scan failed: {reason}")]
    ScanFailed {
        /// Description of why the scan failed.
        reason: String,
    },

    /// Failed to establish or keep a connection to the probe.
    #[error("Connection failed: {reason}")]
    ConnectionFailed {
        /// Description of why the connection failed.
        reason: String,
    },

    /// The advertised device is no longer known to the adapter.
    #[error("Device not found: {identifier}")]
    DeviceNotFound {
        /// The identifier that was searched for.
        identifier: String,
    },

    /// Operation requires a resolved connection but the probe is not connected.
    #[error("Probe not connected")]
    NotConnected,

    /// The session is in a state that does not allow the requested operation.
    #[error("Operation not allowed in state {state}")]
    InvalidState {
        /// The session state at the time of the request.
        state: String,
    },

    /// Service not found on the device.
    #[error("Service not found: {uuid}")]
    ServiceNotFound {
        /// The UUID of the service that was not found.
        uuid: String,
    },

    /// Characteristic not found on the device.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID of the characteristic that was not found.
        uuid: String,
    },

    /// Configuration descriptor not found on a characteristic.
    #[error("Descriptor not found on characteristic {uuid}")]
    DescriptorNotFound {
        /// The UUID of the characteristic missing the descriptor.
        uuid: String,
    },

    /// A characteristic payload is shorter than its fixed layout.
    #[error("Truncated {payload} payload: expected {expected} bytes, got {actual}")]
    TruncatedPayload {
        /// Which payload was being decoded.
        payload: &'static str,
        /// The number of bytes the layout requires.
        expected: usize,
        /// The number of bytes received.
        actual: usize,
    },

    /// The client driver task has stopped.
    #[error("Session closed")]
    SessionClosed,
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncated_payload_message() {
        let err = Error::TruncatedPayload {
            payload: "primary",
            expected: 20,
            actual: 14,
        };
        assert_eq!(
            err.to_string(),
            "Truncated primary payload: expected 20 bytes, got 14"
        );
    }

    #[test]
    fn test_invalid_state_message() {
        let err = Error::InvalidState {
            state: "Streaming".to_string(),
        };
        assert_eq!(err.to_string(), "Operation not allowed in state Streaming");
    }
}
