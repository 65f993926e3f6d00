//! Client configuration.

use std::time::Duration;

use crate::ble::filter::{DeviceFilter, DEFAULT_NAME_PREFIX};
use crate::ble::transport::WriteMode;

/// Configuration for a [`BricClient`](crate::BricClient) session.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ClientConfig {
    /// How long a scan runs before giving up.
    pub scan_timeout: Duration,
    /// Advertised name prefix identifying probes.
    pub name_prefix: String,
    /// Capacity of the client event broadcast channel.
    pub event_capacity: usize,
    /// Whether writes request an acknowledgment from the device.
    pub write_with_response: bool,
}

impl ClientConfig {
    /// Default LE scan timeout (8 seconds).
    pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(8);

    /// Default event channel capacity.
    pub const DEFAULT_EVENT_CAPACITY: usize = 64;

    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the scan timeout.
    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    /// Set the advertised name prefix.
    pub fn with_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }

    /// Set the event channel capacity.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Choose whether writes request an acknowledgment.
    pub fn with_write_response(mut self, with_response: bool) -> Self {
        self.write_with_response = with_response;
        self
    }

    /// Build the discovery filter for this configuration.
    pub fn filter(&self) -> DeviceFilter {
        DeviceFilter::new(self.name_prefix.clone())
    }

    /// Write mode used for characteristic writes.
    pub fn write_mode(&self) -> WriteMode {
        if self.write_with_response {
            WriteMode::WithResponse
        } else {
            WriteMode::WithoutResponse
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            scan_timeout: Self::DEFAULT_SCAN_TIMEOUT,
            name_prefix: DEFAULT_NAME_PREFIX.to_string(),
            event_capacity: Self::DEFAULT_EVENT_CAPACITY,
            write_with_response: true,
        }
    }
}
