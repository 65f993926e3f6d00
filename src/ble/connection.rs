//! BLE connection management.
//!
//! Wraps a connected btleplug peripheral: GATT discovery, descriptor and
//! characteristic writes, and the background tasks that forward indications
//! and link loss to the session.

use btleplug::api::{Central, CentralEvent, Characteristic, Peripheral as _, WriteType};
use btleplug::platform::{Adapter, Peripheral};
use futures::stream::StreamExt;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::ble::transport::{CharacteristicInfo, WriteMode};
use crate::ble::uuids::{CCCD_UUID, ENABLE_INDICATION_VALUE};
use crate::error::{Error, Result};
use crate::session::SessionEvent;

impl From<WriteMode> for WriteType {
    fn from(mode: WriteMode) -> Self {
        match mode {
            WriteMode::WithResponse => WriteType::WithResponse,
            WriteMode::WithoutResponse => WriteType::WithoutResponse,
        }
    }
}

/// Liveness flags shared between a connection and its background tasks.
#[derive(Debug, Clone, Default)]
pub struct LinkState {
    listening: Arc<RwLock<bool>>,
    lost: Arc<RwLock<bool>>,
}

impl LinkState {
    /// Fresh state: not listening, link not lost.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the indication listener as running. Returns `false` if it
    /// already was.
    pub fn begin_listening(&self) -> bool {
        let mut listening = self.listening.write();
        if *listening {
            return false;
        }
        *listening = true;
        true
    }

    /// Check if the indication listener should keep running.
    pub fn is_listening(&self) -> bool {
        *self.listening.read()
    }

    /// Ask the indication listener to stop.
    pub fn stop_listening(&self) {
        *self.listening.write() = false;
    }

    /// Record that the device dropped the link. Also stops the listener.
    pub fn mark_lost(&self) {
        *self.lost.write() = true;
        self.stop_listening();
    }

    /// Check if the device dropped the link.
    pub fn is_lost(&self) -> bool {
        *self.lost.read()
    }
}

/// Manages the connection to a single probe.
pub struct ConnectionManager {
    /// The peripheral to manage.
    peripheral: Peripheral,
    /// Session event channel.
    events: mpsc::UnboundedSender<SessionEvent>,
    /// Listener and link liveness.
    link: LinkState,
    /// Handle to the indication listener task.
    listener_handle: RwLock<Option<JoinHandle<()>>>,
    /// Handle to the link loss watcher task.
    watcher_handle: RwLock<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    /// Create a new connection manager for a peripheral.
    pub fn new(peripheral: Peripheral, events: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self {
            peripheral,
            events,
            link: LinkState::new(),
            listener_handle: RwLock::new(None),
            watcher_handle: RwLock::new(None),
        }
    }

    /// Get the peripheral.
    pub fn peripheral(&self) -> &Peripheral {
        &self.peripheral
    }

    /// Check if the device dropped the link since it was connected.
    pub fn is_link_lost(&self) -> bool {
        self.link.is_lost()
    }

    /// Connect and report `Connected` to the session.
    pub async fn connect(&self) -> Result<()> {
        if self.peripheral.is_connected().await.unwrap_or(false) {
            info!("Peripheral already connected at BLE level");
        } else {
            self.peripheral
                .connect()
                .await
                .map_err(|e| Error::ConnectionFailed {
                    reason: e.to_string(),
                })?;
            info!("Connected to {}", self.peripheral.id());
        }

        self.start_notifications();
        self.send(SessionEvent::Connected);

        Ok(())
    }

    /// Watch the adapter for this peripheral dropping off.
    pub async fn watch_disconnect(&self, adapter: &Adapter) -> Result<()> {
        let mut central_events = adapter.events().await.map_err(Error::Bluetooth)?;
        let id = self.peripheral.id();
        let events = self.events.clone();
        let link = self.link.clone();

        let handle = tokio::spawn(async move {
            while let Some(event) = central_events.next().await {
                if let CentralEvent::DeviceDisconnected(lost) = event {
                    if lost == id {
                        warn!("Link to {} lost", id);
                        link.mark_lost();
                        let _ = events.send(SessionEvent::Disconnected);
                        break;
                    }
                }
            }
        });

        if let Some(previous) = self.watcher_handle.write().replace(handle) {
            previous.abort();
        }

        Ok(())
    }

    /// Enumerate services, reporting each followed by `ServicesDone`.
    pub async fn discover_services(&self) -> Result<()> {
        self.peripheral
            .discover_services()
            .await
            .map_err(Error::Bluetooth)?;

        let services = self.peripheral.services();
        debug!("Discovered {} services", services.len());

        for service in services {
            trace!("Found service: {}", service.uuid);
            self.send(SessionEvent::ServiceFound(service.uuid));
        }
        self.send(SessionEvent::ServicesDone);

        Ok(())
    }

    /// Report the characteristics of an already enumerated service.
    pub async fn discover_details(&self, service: Uuid) -> Result<()> {
        let resolved = self
            .peripheral
            .services()
            .into_iter()
            .find(|s| s.uuid == service)
            .ok_or_else(|| Error::ServiceNotFound {
                uuid: service.to_string(),
            })?;

        let characteristics: Vec<CharacteristicInfo> = resolved
            .characteristics
            .iter()
            .map(|c| {
                CharacteristicInfo::new(c.uuid, c.descriptors.iter().map(|d| d.uuid).collect())
            })
            .collect();

        debug!(
            "Service {} has {} characteristics",
            service,
            characteristics.len()
        );

        self.send(SessionEvent::ServiceResolved {
            service,
            characteristics,
        });

        Ok(())
    }

    fn find_characteristic(&self, service: Uuid, characteristic: Uuid) -> Result<Characteristic> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.service_uuid == service && c.uuid == characteristic)
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: characteristic.to_string(),
            })
    }

    /// Write a descriptor.
    ///
    /// Enabling indications through the CCCD goes through the platform
    /// subscribe call, since some stacks refuse raw CCCD writes.
    pub async fn write_descriptor(
        &self,
        service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<()> {
        let target = self.find_characteristic(service, characteristic)?;

        if descriptor == CCCD_UUID && value == ENABLE_INDICATION_VALUE {
            debug!(
                "Subscribing to {}, properties: {:?}",
                characteristic, target.properties
            );
            self.peripheral
                .subscribe(&target)
                .await
                .map_err(Error::Bluetooth)?;
            return Ok(());
        }

        let descriptor = target
            .descriptors
            .iter()
            .find(|d| d.uuid == descriptor)
            .cloned()
            .ok_or_else(|| Error::DescriptorNotFound {
                uuid: characteristic.to_string(),
            })?;

        self.peripheral
            .write_descriptor(&descriptor, value)
            .await
            .map_err(Error::Bluetooth)?;

        trace!("Wrote {} bytes to descriptor {}", value.len(), descriptor.uuid);

        Ok(())
    }

    /// Write to a characteristic.
    pub async fn write(
        &self,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
        mode: WriteMode,
    ) -> Result<()> {
        let target = self.find_characteristic(service, characteristic)?;

        self.peripheral
            .write(&target, value, mode.into())
            .await
            .map_err(Error::Bluetooth)?;

        trace!("Wrote {} bytes to characteristic {}", value.len(), characteristic);

        Ok(())
    }

    /// Disconnect and report `Disconnected` to the session.
    pub async fn disconnect(&self) -> Result<()> {
        if let Some(watcher) = self.watcher_handle.write().take() {
            watcher.abort();
        }
        self.stop_notifications().await;

        let result = self.peripheral.disconnect().await;
        self.send(SessionEvent::Disconnected);

        match result {
            Ok(()) => {
                info!("Disconnected from {}", self.peripheral.id());
                Ok(())
            }
            Err(e) => {
                error!("Failed to disconnect: {}", e);
                Err(Error::Bluetooth(e))
            }
        }
    }

    /// Forward indications to the session as `CharacteristicChanged`.
    fn start_notifications(&self) {
        if !self.link.begin_listening() {
            return;
        }

        let peripheral = self.peripheral.clone();
        let link = self.link.clone();
        let events = self.events.clone();

        let handle = tokio::spawn(async move {
            let mut notifications = match peripheral.notifications().await {
                Ok(n) => n,
                Err(e) => {
                    error!("Failed to get notifications stream: {}", e);
                    return;
                }
            };

            while link.is_listening() {
                tokio::select! {
                    Some(notification) = notifications.next() => {
                        trace!(
                            "Indication from {}: {:02X?}",
                            notification.uuid,
                            notification.value
                        );
                        let _ = events.send(SessionEvent::CharacteristicChanged {
                            characteristic: notification.uuid,
                            value: notification.value,
                        });
                    }
                    _ = tokio::time::sleep(std::time::Duration::from_millis(50)) => {
                        if !link.is_listening() {
                            break;
                        }
                    }
                }
            }

            debug!("Indication listener stopped");
        });

        *self.listener_handle.write() = Some(handle);
    }

    async fn stop_notifications(&self) {
        self.link.stop_listening();

        let handle = self.listener_handle.write().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    fn send(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            debug!("Session event channel closed");
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.link.stop_listening();
        if let Some(watcher) = self.watcher_handle.write().take() {
            watcher.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_loss_stops_listener() {
        let link = LinkState::new();
        let task_view = link.clone();

        assert!(link.begin_listening());
        assert!(!link.begin_listening());
        assert!(task_view.is_listening());

        task_view.mark_lost();

        assert!(link.is_lost());
        assert!(!link.is_listening());
    }

    #[test]
    fn test_explicit_stop_keeps_link() {
        let link = LinkState::new();
        link.begin_listening();
        link.stop_listening();

        assert!(!link.is_listening());
        assert!(!link.is_lost());
        assert!(link.begin_listening());
    }

    #[test]
    fn test_write_mode_mapping() {
        assert_eq!(
            WriteType::from(WriteMode::WithResponse),
            WriteType::WithResponse
        );
        assert_eq!(
            WriteType::from(WriteMode::WithoutResponse),
            WriteType::WithoutResponse
        );
    }
}
