//! Transport seam between the session state machine and a BLE stack.
//!
//! A transport executes GATT operations and reports every asynchronous
//! outcome (discoveries, connection changes, resolved services, indications)
//! as a [`SessionEvent`](crate::session::SessionEvent) on the channel it was
//! created with. Method results only report whether the operation could be
//! issued or completed.

use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

use crate::error::Result;

/// How a characteristic write is acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WriteMode {
    /// Wait for the device to acknowledge the write.
    #[default]
    WithResponse,
    /// Fire and forget.
    WithoutResponse,
}

/// A characteristic as resolved on the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicInfo {
    /// Characteristic UUID.
    pub uuid: Uuid,
    /// UUIDs of the descriptors attached to it.
    pub descriptors: Vec<Uuid>,
}

impl CharacteristicInfo {
    /// Create a new characteristic description.
    pub fn new(uuid: Uuid, descriptors: Vec<Uuid>) -> Self {
        Self { uuid, descriptors }
    }

    /// Check if a descriptor is present.
    pub fn has_descriptor(&self, descriptor: &Uuid) -> bool {
        self.descriptors.contains(descriptor)
    }
}

/// GATT operations the session needs from a BLE stack.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GattTransport: Send + Sync {
    /// Start LE discovery, reporting `DeviceFound` for each observation and
    /// `ScanDone` once `timeout` expires.
    async fn start_scan(&self, timeout: Duration) -> Result<()>;

    /// Stop an active discovery without reporting `ScanDone`.
    async fn stop_scan(&self) -> Result<()>;

    /// Connect to a previously observed device, reporting `Connected`.
    async fn connect(&self, identifier: &str) -> Result<()>;

    /// Enumerate services, reporting `ServiceFound` for each and then
    /// `ServicesDone`.
    async fn discover_services(&self) -> Result<()>;

    /// Resolve the characteristics of a service, reporting
    /// `ServiceResolved`.
    async fn discover_details(&self, service: Uuid) -> Result<()>;

    /// Write a characteristic descriptor.
    async fn write_descriptor(
        &self,
        service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<()>;

    /// Write a characteristic value.
    async fn write_characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
        mode: WriteMode,
    ) -> Result<()>;

    /// Drop the connection, if any.
    async fn disconnect(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::uuids::{CCCD_UUID, MEASUREMENT_PRIMARY_UUID};

    #[test]
    fn test_has_descriptor() {
        let info = CharacteristicInfo::new(MEASUREMENT_PRIMARY_UUID, vec![CCCD_UUID]);
        assert!(info.has_descriptor(&CCCD_UUID));

        let bare = CharacteristicInfo::new(MEASUREMENT_PRIMARY_UUID, Vec::new());
        assert!(!bare.has_descriptor(&CCCD_UUID));
    }

    #[test]
    fn test_default_write_mode() {
        assert_eq!(WriteMode::default(), WriteMode::WithResponse);
    }
}
